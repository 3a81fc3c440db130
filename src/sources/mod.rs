// Document sources
// The fetch capability the sync pipeline consumes, plus file-backed implementations


use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::attributes::{self, AttributeValue};
use crate::database::sqlite::models::NewDocument;
use crate::{RagError, Result};

pub const UNTITLED: &str = "Untitled";

/// Number of hex characters kept from the content hash when a document has no id
const CONTENT_ID_LENGTH: usize = 16;

const DIRECTORY_EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

/// One document as returned by a source, before identity fallback and sanitizing
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceDocument {
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub text: String,
    pub attributes: Map<String, Value>,
}

impl SourceDocument {
    #[inline]
    pub fn new(external_id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            title: Some(title.into()),
            text: text.into(),
            attributes: Map::new(),
        }
    }

    /// Resolve identity and title fallbacks and sanitize the attributes for storage
    #[inline]
    pub fn into_new_document(self) -> NewDocument {
        let source_id = match self.external_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => content_id(&self.text),
        };
        let title = match self.title {
            Some(title) if !title.trim().is_empty() => title,
            _ => UNTITLED.to_string(),
        };

        NewDocument {
            source_id,
            title,
            content: self.text,
            attributes: attributes::sanitize(self.attributes),
        }
    }
}

/// Stable identifier derived from document text
#[inline]
pub fn content_id(text: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(text.as_bytes()));
    digest[..CONTENT_ID_LENGTH].to_string()
}

/// External capability that lists every document of the knowledge base
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch the full corpus. Failures are reported as [`RagError::SourceFetch`].
    async fn fetch(&self) -> Result<Vec<SourceDocument>>;

    /// Human readable description for logs and progress output
    fn describe(&self) -> String;
}

/// Pick a file source for `path`: a `.json` file or a directory of text files
#[inline]
pub fn open_source(path: &Path) -> Arc<dyn DocumentSource> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        Arc::new(JsonFileSource::new(path))
    } else {
        Arc::new(DirectorySource::new(path))
    }
}

/// Every Markdown or plain text file below a root directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    async fn fetch(&self) -> Result<Vec<SourceDocument>> {
        let root = self.root.clone();
        let documents = tokio::task::spawn_blocking(move || read_directory(&root))
            .await
            .map_err(|e| RagError::SourceFetch(format!("Directory scan task failed: {}", e)))??;

        info!(
            "Loaded {} documents from {}",
            documents.len(),
            self.root.display()
        );
        Ok(documents)
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}

fn read_directory(root: &Path) -> Result<Vec<SourceDocument>> {
    if !root.is_dir() {
        return Err(RagError::SourceFetch(format!(
            "{} is not a readable directory",
            root.display()
        )));
    }

    let mut files = Vec::new();
    collect_files(root, &mut files)?;
    files.sort();

    files
        .into_iter()
        .map(|path| {
            let text = std::fs::read_to_string(&path).map_err(|e| {
                RagError::SourceFetch(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let title = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| relative.clone());

            let mut attributes = Map::new();
            attributes.insert("path".to_string(), Value::String(relative.clone()));
            attributes.insert("bytes".to_string(), Value::from(text.len()));

            debug!("Read {} ({} bytes)", relative, text.len());
            Ok(SourceDocument {
                external_id: Some(relative),
                title: Some(title),
                text,
                attributes,
            })
        })
        .collect()
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        RagError::SourceFetch(format!("Failed to list {}: {}", dir.display(), e))
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| {
            RagError::SourceFetch(format!("Failed to list {}: {}", dir.display(), e))
        })?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden {
            continue;
        }

        if path.is_dir() {
            collect_files(&path, files)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| DIRECTORY_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        {
            files.push(path);
        }
    }

    Ok(())
}

/// A JSON array of `{id?, title?, text, attributes?}` objects
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct JsonDocument {
    id: Option<Value>,
    title: Option<String>,
    text: String,
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl JsonFileSource {
    #[inline]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DocumentSource for JsonFileSource {
    async fn fetch(&self) -> Result<Vec<SourceDocument>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            RagError::SourceFetch(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        let raw: Vec<JsonDocument> = serde_json::from_str(&content).map_err(|e| {
            RagError::SourceFetch(format!("Failed to parse {}: {}", self.path.display(), e))
        })?;

        let documents: Vec<SourceDocument> = raw
            .into_iter()
            .map(|doc| SourceDocument {
                external_id: doc.id.and_then(|id| match AttributeValue::from_json(id) {
                    Some(AttributeValue::String(s)) => Some(s),
                    Some(AttributeValue::Number(n)) => Some(n.to_string()),
                    _ => None,
                }),
                title: doc.title,
                text: doc.text,
                attributes: doc.attributes,
            })
            .collect();

        info!(
            "Loaded {} documents from {}",
            documents.len(),
            self.path.display()
        );
        Ok(documents)
    }

    fn describe(&self) -> String {
        format!("JSON file {}", self.path.display())
    }
}
