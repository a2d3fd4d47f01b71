//! Filesystem ingestion: scan a directory tree into documents and feed
//! them to the search service.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::IndexingConfig;
use crate::models::{Document, IndexReport};
use crate::service::SearchService;
use crate::store::BlobStore;

/// Scan `root` for files matching the configured globs and build
/// documents from them, stable-ordered by relative path.
///
/// The relative path doubles as the document id, so re-scanning the same
/// tree supersedes prior entries instead of duplicating them.
pub fn scan_directory(root: &Path, config: &IndexingConfig) -> Result<Vec<Document>> {
    if !root.exists() {
        bail!("Ingest root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        documents.push(file_to_document(path, &rel_str, config.space_id.as_deref())?);
    }

    documents.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(documents)
}

fn file_to_document(path: &Path, relative_path: &str, space_id: Option<&str>) -> Result<Document> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let modified_time = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    // Binary or non-UTF-8 files index as empty and are filtered later.
    let content = std::fs::read_to_string(path).unwrap_or_default();
    let content_hash = format!("{:x}", Sha256::digest(content.as_bytes()));

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let folder = Path::new(relative_path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    let folder_path = if folder.is_empty() {
        "/".to_string()
    } else {
        format!("/{folder}")
    };

    Ok(Document {
        id: relative_path.to_string(),
        name,
        size: content.len() as u64,
        content,
        mime_type: mime_type_for(path),
        modified_time,
        folder_id: folder_path.clone(),
        folder_path,
        space_id: space_id.map(str::to_string),
        is_chunk: false,
        parent_document_id: None,
        chunk_index: None,
        total_chunks: None,
        chunk_title: None,
        content_hash: Some(content_hash),
    })
}

fn mime_type_for(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("md") | Some("markdown") => "text/markdown",
        Some("rst") => "text/x-rst",
        _ => "text/plain",
    }
    .to_string()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Scan `root` and index everything new or changed.
///
/// Files whose content hash matches the already-indexed entry are
/// skipped; the rest are (re)indexed through the service's supersede
/// flow. Prints a summary.
pub async fn ingest_directory<S: BlobStore>(
    service: &mut SearchService<S>,
    root: &Path,
    config: &IndexingConfig,
) -> Result<IndexReport> {
    let scanned = scan_directory(root, config)?;
    if scanned.is_empty() {
        bail!("No files matched the configured globs under {}", root.display());
    }

    let known_hashes: HashMap<String, String> = service
        .get_documents()
        .await
        .iter()
        .filter_map(|d| {
            d.content_hash
                .clone()
                .map(|h| (d.parent_or_self_id().to_string(), h))
        })
        .collect();

    let total = scanned.len();
    let changed: Vec<Document> = scanned
        .into_iter()
        .filter(|doc| {
            known_hashes.get(&doc.id) != doc.content_hash.as_ref()
        })
        .collect();
    let unchanged = total - changed.len();

    if changed.is_empty() {
        println!("Scanned {total} files: all up to date");
        return Ok(IndexReport {
            documents: 0,
            entries: 0,
        });
    }

    let report = service.index_documents(changed).await?;

    println!(
        "Scanned {} files: indexed {} ({} entries), {} unchanged",
        total, report.documents, report.entries, unchanged
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBlobStore;

    fn write_file(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_respects_globs() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_file(tmp.path(), "notes/readme.md", "# Readme\nhello");
        write_file(tmp.path(), "notes/data.bin", "skip me");
        write_file(tmp.path(), "node_modules/pkg/doc.md", "skip me too");

        let config = IndexingConfig::default();
        let docs = scan_directory(tmp.path(), &config).unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "notes/readme.md");
        assert_eq!(docs[0].name, "readme.md");
        assert_eq!(docs[0].folder_path, "/notes");
        assert_eq!(docs[0].mime_type, "text/markdown");
        assert!(docs[0].content_hash.is_some());
    }

    #[tokio::test]
    async fn test_ingest_skips_unchanged_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_file(tmp.path(), "a.md", "alpha document content");
        write_file(tmp.path(), "b.md", "beta document content");

        let config = IndexingConfig::default();
        let mut service = SearchService::new("u1", MemoryBlobStore::new());

        let report = ingest_directory(&mut service, tmp.path(), &config)
            .await
            .unwrap();
        assert_eq!(report.documents, 2);

        // Second pass with one modified file only reindexes that file.
        write_file(tmp.path(), "b.md", "beta document content, revised");
        let report = ingest_directory(&mut service, tmp.path(), &config)
            .await
            .unwrap();
        assert_eq!(report.documents, 1);

        let status = service.status().await;
        assert_eq!(status.unique_documents, 2);
    }

    #[tokio::test]
    async fn test_ingest_skips_unchanged_chunked_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        // Large enough to be split into multiple chunks.
        write_file(tmp.path(), "big.md", &"content word ".repeat(8_000));

        let config = IndexingConfig::default();
        let mut service = SearchService::new("u1", MemoryBlobStore::new());

        let report = ingest_directory(&mut service, tmp.path(), &config)
            .await
            .unwrap();
        assert_eq!(report.documents, 1);
        assert!(report.entries > 1, "expected chunked entries");

        // Untouched file: the second pass indexes nothing.
        let report = ingest_directory(&mut service, tmp.path(), &config)
            .await
            .unwrap();
        assert_eq!(report.documents, 0);
        assert_eq!(report.entries, 0);
    }
}
