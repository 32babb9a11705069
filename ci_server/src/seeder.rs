//! Loads build definitions from a directory into the in-memory store.
//!
//! Every `*.yml` / `*.yaml` file becomes one definition; its file stem is the
//! webhook token and caption. Files are loaded in name order.

use std::path::{Path, PathBuf};

use shipyard_pipeline::{BuildDefinitionContent, MemoryStore};

/// Owner recorded for seeded definitions.
const SEED_USER: i64 = 0;

fn is_definition_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

/// Seed definitions from `dir`. Returns how many were loaded.
pub async fn seed_definitions(store: &MemoryStore, dir: &Path) -> anyhow::Result<usize> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| anyhow::anyhow!("cannot read seed directory {}: {e}", dir.display()))?;

    let mut files: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && is_definition_file(&path) {
            files.push(path);
        }
    }
    files.sort();

    for path in &files {
        let Some(token) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let content = tokio::fs::read_to_string(path).await?;

        // Variables are substituted at run time, so a parse failure here is
        // only a hint.
        if let Err(e) = BuildDefinitionContent::parse(&content) {
            tracing::warn!(file = %path.display(), "Seeded definition does not parse yet: {e}");
        }

        let definition = store
            .insert_definition(token, &content, SEED_USER, Some(token))
            .await;
        tracing::info!(
            definition_id = definition.id,
            token = %definition.token,
            "Seeded build definition"
        );
    }

    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_pipeline::BuildStore;
    use tempfile::TempDir;

    const DOCUMENT: &str = "project_type: go
repository: {hoster: gitea, hoster_url: https://git.example.com/acme/app.git, name: acme/app, branch: main}
build: [make]
";

    #[tokio::test]
    async fn loads_yaml_files_keyed_by_stem() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("web-app.yml"), DOCUMENT).unwrap();
        std::fs::write(dir.path().join("api.yaml"), DOCUMENT).unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();
        std::fs::create_dir(dir.path().join("nested.yml")).unwrap();

        let store = MemoryStore::new();
        let count = seed_definitions(&store, dir.path()).await.unwrap();

        assert_eq!(count, 2);
        let api = store.definition_by_token("api").await.unwrap().unwrap();
        assert_eq!(api.id, 1);
        assert_eq!(api.content, DOCUMENT);
        assert!(store.definition_by_token("web-app").await.unwrap().is_some());
        assert!(store.definition_by_token("README").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let store = MemoryStore::new();
        assert!(seed_definitions(&store, Path::new("/nonexistent/seed/dir"))
            .await
            .is_err());
    }
}
