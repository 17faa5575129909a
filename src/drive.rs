// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document storage for per-user folders, generated documents and uploaded objects.
//!
//! [`LocalDrive`] keeps everything under one root directory:
//!
//! ```text
//! <root>/<bucket>/<object name>          uploaded objects (CSV files)
//! <root>/.drive/<folder id>/manifest.json folder metadata
//! <root>/.drive/<folder id>/<doc id>.<ext> document bodies
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use walkdir::WalkDir;

const DRIVE_DIR: &str = ".drive";
const MANIFEST_FILE: &str = "manifest.json";

/// Folder metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub created_at: u64,
    #[serde(default)]
    pub documents: Vec<DocumentMeta>,
}

/// Document metadata without the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: String,
    pub folder_id: String,
    pub title: String,
    pub mime_type: String,
    pub updated_at: u64,
    /// Location of the stored body
    pub uri: String,
}

/// A document with its body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub meta: DocumentMeta,
    pub body: String,
}

/// Storage for folders, documents and raw uploaded objects.
pub trait DocumentStore: Send {
    /// Creates a folder, or returns the existing one with the same name.
    fn create_folder(&mut self, name: &str) -> Result<Folder>;

    fn folder(&self, id: &str) -> Result<Option<Folder>>;

    /// Stores a document; a document with the same title in the folder is replaced.
    fn put_document(
        &mut self,
        folder_id: &str,
        title: &str,
        mime_type: &str,
        body: &str,
    ) -> Result<DocumentMeta>;

    fn get_document(&self, id: &str) -> Result<Option<Document>>;

    fn list_documents(&self, folder_id: &str) -> Result<Vec<DocumentMeta>>;

    /// Reads an uploaded object, `None` when it does not exist.
    fn read_object(&self, bucket: &str, name: &str) -> Result<Option<Vec<u8>>>;
}

/// Filesystem-backed [`DocumentStore`].
pub struct LocalDrive {
    root: PathBuf,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn short_id(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    hasher.finalize().to_hex()[..16].to_string()
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "text/markdown" => "md",
        "application/json" => "json",
        "text/csv" => "csv",
        _ => "txt",
    }
}

/// Rejects names that could escape the root directory.
fn safe_relative(name: &str) -> Result<&Path> {
    let path = Path::new(name);
    if name.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        bail!("Invalid object path '{}'", name);
    }
    Ok(path)
}

impl LocalDrive {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(DRIVE_DIR))
            .with_context(|| format!("Failed to create drive directory: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder_dir(&self, id: &str) -> PathBuf {
        self.root.join(DRIVE_DIR).join(id)
    }

    fn load_folder(&self, id: &str) -> Result<Option<Folder>> {
        if safe_relative(id).is_err() {
            return Ok(None);
        }
        let manifest = self.folder_dir(id).join(MANIFEST_FILE);
        if !manifest.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&manifest)
            .with_context(|| format!("Failed to read folder manifest: {}", manifest.display()))?;
        let folder = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse folder manifest: {}", manifest.display()))?;
        Ok(Some(folder))
    }

    fn save_folder(&self, folder: &Folder) -> Result<()> {
        let dir = self.folder_dir(&folder.id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create folder: {}", dir.display()))?;
        let json = serde_json::to_string_pretty(folder)?;
        fs::write(dir.join(MANIFEST_FILE), json)
            .with_context(|| format!("Failed to write manifest for folder {}", folder.id))?;
        Ok(())
    }

    fn body_path(&self, meta: &DocumentMeta) -> PathBuf {
        self.folder_dir(&meta.folder_id)
            .join(format!("{}.{}", meta.id, extension_for(&meta.mime_type)))
    }
}

impl DocumentStore for LocalDrive {
    fn create_folder(&mut self, name: &str) -> Result<Folder> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Folder name must not be empty");
        }
        let id = short_id(&["folder", name]);
        if let Some(existing) = self.load_folder(&id)? {
            return Ok(existing);
        }
        let folder = Folder {
            id,
            name: name.to_string(),
            created_at: now_secs(),
            documents: Vec::new(),
        };
        self.save_folder(&folder)?;
        debug!("created folder {} ({})", folder.name, folder.id);
        Ok(folder)
    }

    fn folder(&self, id: &str) -> Result<Option<Folder>> {
        self.load_folder(id)
    }

    fn put_document(
        &mut self,
        folder_id: &str,
        title: &str,
        mime_type: &str,
        body: &str,
    ) -> Result<DocumentMeta> {
        let mut folder = self
            .load_folder(folder_id)?
            .ok_or_else(|| anyhow::anyhow!("Folder '{}' not found", folder_id))?;

        let id = short_id(&["document", folder_id, title]);
        let mut meta = DocumentMeta {
            id: id.clone(),
            folder_id: folder_id.to_string(),
            title: title.to_string(),
            mime_type: mime_type.to_string(),
            updated_at: now_secs(),
            uri: String::new(),
        };
        let path = self.body_path(&meta);
        meta.uri = path.display().to_string();

        fs::write(&path, body)
            .with_context(|| format!("Failed to write document: {}", path.display()))?;

        folder.documents.retain(|d| d.id != id);
        folder.documents.push(meta.clone());
        self.save_folder(&folder)?;
        Ok(meta)
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        for entry in WalkDir::new(self.root.join(DRIVE_DIR))
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() == MANIFEST_FILE)
        {
            let folder_id = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let Some(folder) = self.load_folder(&folder_id)? else {
                continue;
            };
            if let Some(meta) = folder.documents.into_iter().find(|d| d.id == id) {
                let path = self.body_path(&meta);
                let body = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read document: {}", path.display()))?;
                return Ok(Some(Document { meta, body }));
            }
        }
        Ok(None)
    }

    fn list_documents(&self, folder_id: &str) -> Result<Vec<DocumentMeta>> {
        Ok(self
            .load_folder(folder_id)?
            .map(|f| f.documents)
            .unwrap_or_default())
    }

    fn read_object(&self, bucket: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self
            .root
            .join(safe_relative(bucket)?)
            .join(safe_relative(name)?);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes =
            fs::read(&path).with_context(|| format!("Failed to read object: {}", path.display()))?;
        Ok(Some(bytes))
    }
}
