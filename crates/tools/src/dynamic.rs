//! Declarative (YAML) tools.
//!
//! A document can define tools whose implementation is an HTTP call, a
//! shell command, or a file read/write. String fields are templates
//! with `{{.param}}` placeholders, expanded against the merged
//! settings ⊕ params map at call time.

use std::collections::BTreeMap;
use std::time::Duration;

use rcore::{Error, Result, Settings, ToolDefinition, ToolImpl};
use serde_json::Value;

use crate::builtin::split_command;
use crate::{Registry, ToolDef};

/// Register every declarative tool from the document.
pub fn register_all(
    registry: &Registry,
    tools: &BTreeMap<String, ToolDefinition>,
    settings: &Settings,
) -> Result<()> {
    for def in tools.values() {
        register(registry, def, settings)?;
    }
    Ok(())
}

/// Register one declarative tool.
pub fn register(registry: &Registry, def: &ToolDefinition, settings: &Settings) -> Result<()> {
    let implementation = def.implementation.clone();
    let variables = settings.variables.clone();
    let sandbox = registry.sandbox().cloned();
    let name = def.name.clone();

    registry.register(
        def.name.clone(),
        ToolDef::new(def.schema(), move |_ctx, params| {
            let implementation = implementation.clone();
            let scope = merge_scope(&variables, &params);
            let sandbox = sandbox.clone();
            let name = name.clone();
            async move { run(&name, &implementation, &scope, sandbox.as_ref()).await }
        }),
    )
}

/// The merged template scope: settings variables overlaid with the
/// call's parameters.
fn merge_scope(
    variables: &BTreeMap<String, String>,
    params: &Value,
) -> BTreeMap<String, String> {
    let mut scope = variables.clone();
    if let Some(map) = params.as_object() {
        for (key, value) in map {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            scope.insert(key.clone(), rendered);
        }
    }
    scope
}

/// Expand `{{.name}}` placeholders. Unknown names expand to empty.
pub fn expand(template: &str, scope: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{.") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 3..];
        let Some(end) = tail.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = tail[..end].trim();
        if let Some(value) = scope.get(key) {
            out.push_str(value);
        }
        rest = &tail[end + 2..];
    }
    out.push_str(rest);
    out
}

async fn run(
    name: &str,
    implementation: &ToolImpl,
    scope: &BTreeMap<String, String>,
    sandbox: Option<&crate::Sandbox>,
) -> Result<String> {
    match implementation {
        ToolImpl::Http {
            url,
            method,
            headers,
            query,
            body,
        } => {
            let url = expand(url, scope);
            let client = reqwest::Client::new();
            let mut request = match method.to_uppercase().as_str() {
                "POST" => client.post(&url),
                "PUT" => client.put(&url),
                "DELETE" => client.delete(&url),
                "PATCH" => client.patch(&url),
                _ => client.get(&url),
            };
            for (key, template) in headers {
                request = request.header(key, expand(template, scope));
            }
            let query: Vec<(String, String)> = query
                .iter()
                .map(|(k, template)| (k.clone(), expand(template, scope)))
                .collect();
            if !query.is_empty() {
                request = request.query(&query);
            }
            if let Some(body) = body {
                request = request.body(expand(body, scope));
            }

            let response = request.send().await.map_err(|e| Error::tool(name, e))?;
            let status = response.status();
            let text = response.text().await.map_err(|e| Error::tool(name, e))?;
            if status.is_client_error() || status.is_server_error() {
                return Err(Error::tool(
                    name,
                    std::io::Error::other(format!("status {status}: {text}")),
                ));
            }
            Ok(text)
        }
        ToolImpl::Exec { command } => {
            let expanded = expand(command, scope);
            let argv = split_command(&expanded);
            if argv.is_empty() {
                return Err(Error::validation("command", "expanded to an empty command"));
            }
            let mut cmd = tokio::process::Command::new(&argv[0]);
            cmd.args(&argv[1..])
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .kill_on_drop(true);
            if let Some(sandbox) = sandbox {
                cmd.current_dir(sandbox.root());
                cmd.envs(sandbox.env());
            }
            let output = tokio::time::timeout(Duration::from_secs(60), cmd.output())
                .await
                .map_err(|_| {
                    Error::tool(name, std::io::Error::other("command timed out after 60s"))
                })?
                .map_err(|e| Error::tool(name, e))?;
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            if !output.status.success() {
                text.push_str(&String::from_utf8_lossy(&output.stderr));
            }
            Ok(text)
        }
        ToolImpl::FileRead { path } => {
            let path = resolve(&expand(path, scope), sandbox);
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::tool(name, e))
        }
        ToolImpl::FileWrite { path, content } => {
            let path = resolve(&expand(path, scope), sandbox);
            let content = expand(content, scope);
            tokio::fs::write(&path, content.as_bytes())
                .await
                .map_err(|e| Error::tool(name, e))?;
            Ok(format!("wrote {} bytes", content.len()))
        }
    }
}

fn resolve(path: &str, sandbox: Option<&crate::Sandbox>) -> std::path::PathBuf {
    match sandbox {
        Some(sandbox) => sandbox.resolve(path),
        None => std::path::PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcore::{Ctx, ParamSpec, ParamType};

    #[test]
    fn expand_substitutes_and_drops_unknown() {
        let mut scope = BTreeMap::new();
        scope.insert("city".to_string(), "Lisbon".to_string());
        assert_eq!(expand("wttr.in/{{.city}}", &scope), "wttr.in/Lisbon");
        assert_eq!(expand("x{{.missing}}y", &scope), "xy");
        assert_eq!(expand("no placeholders", &scope), "no placeholders");
    }

    #[test]
    fn params_override_settings_variables() {
        let mut variables = BTreeMap::new();
        variables.insert("token".to_string(), "from-settings".to_string());
        let params = serde_json::json!({"token": "from-params", "n": 3});
        let scope = merge_scope(&variables, &params);
        assert_eq!(scope["token"], "from-params");
        assert_eq!(scope["n"], "3");
    }

    #[tokio::test]
    async fn exec_dynamic_tool_runs_argv() {
        let registry = Registry::new();
        let def = ToolDefinition {
            name: "greeter".into(),
            description: "echoes a greeting".into(),
            params: vec![(
                "who".into(),
                ParamSpec::required(ParamType::String, "who to greet"),
            )],
            implementation: ToolImpl::Exec {
                command: "echo 'hello {{.who}}'".into(),
            },
        };
        register(&registry, &def, &rcore::Settings::default()).unwrap();
        let out = registry
            .execute(&Ctx::background(), "greeter", serde_json::json!({"who": "reef"}))
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello reef");
    }

    #[tokio::test]
    async fn file_dynamic_tools_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::with_sandbox(crate::Sandbox::new(dir.path()));
        let write = ToolDefinition {
            name: "save_note".into(),
            description: "saves a note".into(),
            params: vec![(
                "note".into(),
                ParamSpec::required(ParamType::String, "the note"),
            )],
            implementation: ToolImpl::FileWrite {
                path: "note.txt".into(),
                content: "{{.note}}".into(),
            },
        };
        let read = ToolDefinition {
            name: "load_note".into(),
            description: "loads the note".into(),
            params: vec![],
            implementation: ToolImpl::FileRead {
                path: "note.txt".into(),
            },
        };
        register(&registry, &write, &rcore::Settings::default()).unwrap();
        register(&registry, &read, &rcore::Settings::default()).unwrap();

        registry
            .execute(
                &Ctx::background(),
                "save_note",
                serde_json::json!({"note": "remember this"}),
            )
            .await
            .unwrap();
        let out = registry
            .execute(&Ctx::background(), "load_note", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(out, "remember this");
    }
}
