//! File tools: read, write, append, list.

use rcore::{Error, ParamSpec, ParamType, Result, ToolSchema};

use super::required_str;
use crate::Registry;

pub fn register(registry: &Registry) -> Result<()> {
    let sandbox_root = registry
        .sandbox()
        .map(|s| s.root().display().to_string());

    registry.register_fn(
        ToolSchema::new("read_file", "Read the contents of a file").param(
            "path",
            ParamSpec::required(ParamType::String, "Path of the file to read"),
        ),
        |_ctx, params| async move {
            let path = required_str(&params, "path")?.to_string();
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::tool("read_file", e))
        },
    )?;

    registry.register_fn(
        ToolSchema::new("write_file", "Write content to a file, replacing it")
            .param(
                "path",
                ParamSpec::required(ParamType::String, "Path of the file to write"),
            )
            .param(
                "content",
                ParamSpec::required(ParamType::String, "Content to write"),
            ),
        |_ctx, params| async move {
            let path = required_str(&params, "path")?.to_string();
            let content = required_str(&params, "content")?.to_string();
            if let Some(parent) = std::path::Path::new(&path).parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::tool("write_file", e))?;
            }
            tokio::fs::write(&path, content.as_bytes())
                .await
                .map_err(|e| Error::tool("write_file", e))?;
            Ok(format!("wrote {} bytes to {path}", content.len()))
        },
    )?;

    registry.register_fn(
        ToolSchema::new("append_file", "Append content to the end of a file")
            .param(
                "path",
                ParamSpec::required(ParamType::String, "Path of the file to append to"),
            )
            .param(
                "content",
                ParamSpec::required(ParamType::String, "Content to append"),
            ),
        |_ctx, params| async move {
            let path = required_str(&params, "path")?.to_string();
            let content = required_str(&params, "content")?.to_string();
            let mut existing = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            existing.push_str(&content);
            tokio::fs::write(&path, existing.as_bytes())
                .await
                .map_err(|e| Error::tool("append_file", e))?;
            Ok(format!("appended {} bytes to {path}", content.len()))
        },
    )?;

    registry.register_fn(
        ToolSchema::new("list_files", "List the entries of a directory").param(
            "path",
            ParamSpec::optional(ParamType::String, "Directory to list (defaults to the workspace)"),
        ),
        move |_ctx, params| {
            let fallback = sandbox_root.clone().unwrap_or_else(|| ".".into());
            async move {
                let path = params
                    .get("path")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or(&fallback)
                    .to_string();
                let mut reader = tokio::fs::read_dir(&path)
                    .await
                    .map_err(|e| Error::tool("list_files", e))?;
                let mut names = Vec::new();
                while let Some(entry) = reader
                    .next_entry()
                    .await
                    .map_err(|e| Error::tool("list_files", e))?
                {
                    let kind = if entry.path().is_dir() { "dir" } else { "file" };
                    names.push(format!("{kind}  {}", entry.file_name().to_string_lossy()));
                }
                names.sort();
                Ok(names.join("\n"))
            }
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcore::Ctx;
    use crate::Sandbox;

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::with_sandbox(Sandbox::new(dir.path()));
        register(&registry).unwrap();

        registry
            .execute(
                &Ctx::background(),
                "write_file",
                serde_json::json!({"path": "notes.txt", "content": "hello"}),
            )
            .await
            .unwrap();
        let read = registry
            .execute(
                &Ctx::background(),
                "read_file",
                serde_json::json!({"path": "notes.txt"}),
            )
            .await
            .unwrap();
        assert_eq!(read, "hello");
    }

    #[tokio::test]
    async fn sandbox_escape_lands_in_root() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::with_sandbox(Sandbox::new(dir.path()));
        register(&registry).unwrap();

        registry
            .execute(
                &Ctx::background(),
                "write_file",
                serde_json::json!({"path": "../etc/passwd", "content": "X"}),
            )
            .await
            .unwrap();
        let read = registry
            .execute(
                &Ctx::background(),
                "read_file",
                serde_json::json!({"path": "passwd"}),
            )
            .await
            .unwrap();
        assert_eq!(read, "X");
    }

    #[tokio::test]
    async fn append_creates_and_extends() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::with_sandbox(Sandbox::new(dir.path()));
        register(&registry).unwrap();

        for chunk in ["a", "b"] {
            registry
                .execute(
                    &Ctx::background(),
                    "append_file",
                    serde_json::json!({"path": "log.txt", "content": chunk}),
                )
                .await
                .unwrap();
        }
        let read = registry
            .execute(
                &Ctx::background(),
                "read_file",
                serde_json::json!({"path": "log.txt"}),
            )
            .await
            .unwrap();
        assert_eq!(read, "ab");
    }

    #[tokio::test]
    async fn list_files_defaults_to_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let registry = Registry::with_sandbox(Sandbox::new(dir.path()));
        register(&registry).unwrap();

        let listing = registry
            .execute(&Ctx::background(), "list_files", serde_json::json!({}))
            .await
            .unwrap();
        assert!(listing.contains("a.txt"));
    }
}
