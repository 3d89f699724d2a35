//! Bulk import of exported collections.
//!
//! Accepts the two shapes database exports come in: a JSON array of
//! documents, or JSON Lines (one document per line). A file holding a
//! single JSON object is imported as one document.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;

use ems_metrics_core::models::Document;
use ems_metrics_core::store::DocumentStore;

use crate::config::Config;
use crate::{db, migrate};
use crate::sqlite_store::SqliteDocumentStore;

/// Parse an export file's text into documents.
pub fn parse_documents(content: &str) -> Result<Vec<Document>> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        let docs: Vec<Document> =
            serde_json::from_str(trimmed).context("invalid JSON array export")?;
        if let Some(n) = docs.iter().position(|d| !d.is_object()) {
            bail!("array element {} is not a JSON object", n + 1);
        }
        return Ok(docs);
    }

    // A lone pretty-printed object spans several lines; try it whole first.
    if let Ok(doc @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(vec![doc]);
    }

    let mut docs = Vec::new();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let doc: Document = serde_json::from_str(line)
            .with_context(|| format!("invalid JSON on line {}", n + 1))?;
        if !doc.is_object() {
            bail!("line {} is not a JSON object", n + 1);
        }
        docs.push(doc);
    }
    Ok(docs)
}

/// Load `path` into `collection`, optionally replacing what is there.
pub async fn import_into(
    store: &SqliteDocumentStore,
    collection: &str,
    path: &Path,
    replace: bool,
) -> Result<(u64, usize)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let docs = parse_documents(&content)
        .with_context(|| format!("Failed to parse import file: {}", path.display()))?;

    let (removed, inserted) = if replace {
        store.replace_collection(collection, &docs).await?
    } else {
        (0, store.insert_many(collection, &docs).await?)
    };
    tracing::info!(collection, inserted, removed, "imported documents");
    Ok((removed, inserted))
}

pub async fn run_import(config: &Config, collection: &str, path: &Path, replace: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let store = SqliteDocumentStore::new(pool);
    let (removed, inserted) = import_into(&store, collection, path, replace).await?;

    println!("import {}", collection);
    println!("  file: {}", path.display());
    if replace {
        println!("  removed documents: {}", removed);
    }
    println!("  inserted documents: {}", inserted);
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_array() {
        let docs = parse_documents(r#"[{"protocolId": "a"}, {"protocolId": "b"}]"#).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1], json!({"protocolId": "b"}));
    }

    #[test]
    fn test_parse_jsonl_skips_blank_lines() {
        let docs = parse_documents("{\"a\": 1}\n\n{\"a\": 2}\n").unwrap();
        assert_eq!(docs, vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[test]
    fn test_parse_single_pretty_object() {
        let docs = parse_documents("{\n  \"protocolId\": \"x\"\n}\n").unwrap();
        assert_eq!(docs, vec![json!({"protocolId": "x"})]);
    }

    #[test]
    fn test_parse_reports_line() {
        let err = parse_documents("{\"a\": 1}\n{oops}\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn test_parse_array_rejects_non_objects() {
        let err = parse_documents(r#"[{"protocolId": "a"}, 42]"#).unwrap_err();
        assert!(err.to_string().contains("array element 2"));
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_documents("  \n").unwrap().is_empty());
    }
}
