//! Tool schemas as they appear on the wire.
//!
//! Tools declare their schema explicitly. [`ToolSchema::from_type`] is
//! the opt-in derivation from a typed record via `schemars`; nothing is
//! inferred silently.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameter type strings accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// A string parameter.
    #[default]
    String,
    /// An integer parameter.
    Integer,
    /// A floating-point parameter.
    Number,
    /// A boolean parameter.
    Boolean,
    /// An array parameter.
    Array,
    /// An object parameter.
    Object,
}

impl ParamType {
    /// Parse a wire type string, defaulting to `string` for unknowns.
    pub fn parse(s: &str) -> Self {
        match s {
            "integer" => Self::Integer,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "array" => Self::Array,
            "object" => Self::Object,
            _ => Self::String,
        }
    }
}

/// A single parameter declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParamSpec {
    /// Wire type of the parameter.
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Whether the parameter is required. Mirrored into the schema's
    /// `required` list on serialization.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    /// Allowed values, if closed.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    /// Default value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ParamSpec {
    /// A required parameter of the given type.
    pub fn required(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            description: description.into(),
            required: true,
            allowed: None,
            default: None,
        }
    }

    /// An optional parameter of the given type.
    pub fn optional(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(param_type, description)
        }
    }
}

/// The object schema for a tool's input.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputSchema {
    /// Parameter declarations keyed by name.
    pub properties: BTreeMap<String, ParamSpec>,
}

impl InputSchema {
    /// Names of all required parameters, in key order.
    pub fn required(&self) -> Vec<&str> {
        self.properties
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// A tool schema: name, description, and input object schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolSchema {
    /// Unique tool name.
    pub name: String,
    /// What the tool does, shown to the model.
    pub description: String,
    /// The input object schema.
    pub input_schema: InputSchema,
}

impl ToolSchema {
    /// Create a schema with no parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: InputSchema::default(),
        }
    }

    /// Add a parameter.
    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.input_schema.properties.insert(name.into(), spec);
        self
    }

    /// Derive an input schema from a typed record (opt-in).
    ///
    /// Walks the JSON schema `schemars` generates for `T`, keeping the
    /// wire subset: property types, descriptions, enums, defaults, and
    /// the required list.
    pub fn from_type<T: schemars::JsonSchema>(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let generated = schemars::schema_for!(T);
        let value = serde_json::to_value(&generated).unwrap_or_default();
        let mut schema = Self::new(name, description);

        let required: Vec<String> = value
            .get("required")
            .and_then(|r| r.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        if let Some(props) = value.get("properties").and_then(|p| p.as_object()) {
            for (pname, pvalue) in props {
                let spec = ParamSpec {
                    param_type: pvalue
                        .get("type")
                        .and_then(|t| t.as_str())
                        .map(ParamType::parse)
                        .unwrap_or_default(),
                    description: pvalue
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    required: required.iter().any(|r| r == pname),
                    allowed: pvalue.get("enum").and_then(|e| e.as_array()).map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    }),
                    default: pvalue.get("default").cloned(),
                };
                schema.input_schema.properties.insert(pname.clone(), spec);
            }
        }

        schema
    }

    /// Serialize to the wire shape:
    /// `{name, description, input_schema: {type: "object", properties, required}}`.
    pub fn to_wire(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        for (name, spec) in &self.input_schema.properties {
            let mut p = serde_json::Map::new();
            p.insert(
                "type".into(),
                serde_json::to_value(spec.param_type).unwrap_or_default(),
            );
            if !spec.description.is_empty() {
                p.insert("description".into(), spec.description.clone().into());
            }
            if let Some(allowed) = &spec.allowed {
                p.insert("enum".into(), serde_json::json!(allowed));
            }
            if let Some(default) = &spec.default {
                p.insert("default".into(), default.clone());
            }
            properties.insert(name.clone(), serde_json::Value::Object(p));
        }
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": {
                "type": "object",
                "properties": properties,
                "required": self.input_schema.required(),
            },
        })
    }

    /// Parse a wire-shaped JSON object back into a schema.
    ///
    /// Used when ingesting tool listings from remote servers.
    pub fn from_wire(value: &serde_json::Value) -> Option<Self> {
        let name = value.get("name")?.as_str()?.to_string();
        let description = value
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or_default()
            .to_string();
        let mut schema = Self::new(name, description);

        let input = value
            .get("input_schema")
            .or_else(|| value.get("inputSchema"))?;
        let required: Vec<&str> = input
            .get("required")
            .and_then(|r| r.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if let Some(props) = input.get("properties").and_then(|p| p.as_object()) {
            for (pname, pvalue) in props {
                let spec = ParamSpec {
                    param_type: pvalue
                        .get("type")
                        .and_then(|t| t.as_str())
                        .map(ParamType::parse)
                        .unwrap_or_default(),
                    description: pvalue
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    required: required.contains(&pname.as_str()),
                    allowed: None,
                    default: None,
                };
                schema.input_schema.properties.insert(pname.clone(), spec);
            }
        }
        Some(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape() {
        let schema = ToolSchema::new("read_file", "Read a file")
            .param("path", ParamSpec::required(ParamType::String, "File path"));
        let wire = schema.to_wire();
        assert_eq!(wire["name"], "read_file");
        assert_eq!(wire["input_schema"]["type"], "object");
        assert_eq!(wire["input_schema"]["properties"]["path"]["type"], "string");
        assert_eq!(wire["input_schema"]["required"][0], "path");
    }

    #[test]
    fn wire_round_trip() {
        let schema = ToolSchema::new("fetch", "Fetch a URL")
            .param("url", ParamSpec::required(ParamType::String, "Target URL"))
            .param("limit", ParamSpec::optional(ParamType::Integer, "Max bytes"));
        let back = ToolSchema::from_wire(&schema.to_wire()).unwrap();
        assert_eq!(back.name, "fetch");
        assert_eq!(back.input_schema.properties.len(), 2);
        assert_eq!(back.input_schema.required(), vec!["url"]);
    }

    #[test]
    fn from_type_derives_properties() {
        #[derive(schemars::JsonSchema)]
        #[allow(dead_code)]
        struct Params {
            /// The search query.
            query: String,
            /// Maximum results.
            limit: Option<u32>,
        }

        let schema = ToolSchema::from_type::<Params>("search", "Search things");
        let props = &schema.input_schema.properties;
        assert!(props.contains_key("query"));
        assert!(props.contains_key("limit"));
        assert!(props["query"].required);
        assert!(!props["limit"].required);
    }
}
