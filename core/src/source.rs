//! Pull-style access to the content repository the engine indexes.

use crate::error::{EngineError, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;
use walkdir::WalkDir;

/// One publishable page or post as handed over by the content repository.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_published")]
    pub published: bool,
}

fn default_published() -> bool { true }

impl SourceDocument {
    pub fn new(id: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self { id: id.into(), title: title.into(), body: body.into(), url: None, published: true }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Hex SHA-1 of the body, used to notice edits to already indexed pages.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.body.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

pub trait ContentSource: Send + Sync {
    /// All documents that may be recommended, in a stable order.
    fn publishable(&self) -> Result<Vec<SourceDocument>>;

    /// Full record for one document; `None` if it disappeared or was unpublished.
    fn fetch(&self, id: &str) -> Result<Option<SourceDocument>>;
}

/// Mutable in-memory content repository.
#[derive(Default)]
pub struct MemorySource {
    docs: RwLock<BTreeMap<String, SourceDocument>>,
}

impl MemorySource {
    pub fn new() -> Self { Self::default() }

    pub fn with_documents<I: IntoIterator<Item = SourceDocument>>(docs: I) -> Self {
        let source = Self::new();
        for doc in docs {
            source.upsert(doc);
        }
        source
    }

    pub fn upsert(&self, doc: SourceDocument) {
        self.docs.write().insert(doc.id.clone(), doc);
    }

    pub fn remove(&self, id: &str) -> Option<SourceDocument> {
        self.docs.write().remove(id)
    }
}

impl ContentSource for MemorySource {
    fn publishable(&self) -> Result<Vec<SourceDocument>> {
        Ok(self.docs.read().values().filter(|d| d.published).cloned().collect())
    }

    fn fetch(&self, id: &str) -> Result<Option<SourceDocument>> {
        Ok(self.docs.read().get(id).filter(|d| d.published).cloned())
    }
}

/// Content exported as `.json` / `.jsonl` files, from a single file or a directory tree.
///
/// `publishable` re-reads every export and keeps the parsed catalogue; `fetch`
/// serves from it and re-parses only when the file holding the record changed.
pub struct JsonSource {
    root: PathBuf,
    catalog: RwLock<Option<Catalog>>,
    loads: AtomicUsize,
}

/// Size and mtime of an export file when it was parsed.
type Stamp = (u64, Option<SystemTime>);

#[derive(Default)]
struct Catalog {
    docs: BTreeMap<String, SourceDocument>,
    origin: HashMap<String, PathBuf>,
    stamps: HashMap<PathBuf, Stamp>,
}

fn stamp(path: &Path) -> Option<Stamp> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.len(), meta.modified().ok()))
}

impl JsonSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            return Err(EngineError::Configuration(format!("content path {} does not exist", root.display())));
        }
        Ok(Self { root, catalog: RwLock::new(None), loads: AtomicUsize::new(0) })
    }

    /// How many times the export files were parsed.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = Vec::new();
        if self.root.is_dir() {
            for entry in WalkDir::new(&self.root).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
                let p = entry.path();
                if p.is_file() {
                    if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                        if matches!(ext, "json" | "jsonl") {
                            files.push(p.to_path_buf());
                        }
                    }
                }
            }
        } else if self.root.is_file() {
            files.push(self.root.clone());
        }
        files
    }

    fn load_all(&self) -> Result<Catalog> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let mut catalog = Catalog::default();
        for file in self.files() {
            let file_stamp = stamp(&file);
            let parsed = if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                read_jsonl(&file)?
            } else {
                read_json(&file)?
            };
            for doc in parsed {
                // Later files win, like a re-export overwriting an older one.
                catalog.origin.insert(doc.id.clone(), file.clone());
                catalog.docs.insert(doc.id.clone(), doc);
            }
            if let Some(file_stamp) = file_stamp {
                catalog.stamps.insert(file, file_stamp);
            }
        }
        tracing::debug!(root = %self.root.display(), documents = catalog.docs.len(), "content exports loaded");
        Ok(catalog)
    }

    /// Cached record for `id`, or `Err(())` when the catalogue is missing or stale for it.
    fn cached(&self, id: &str) -> std::result::Result<Option<SourceDocument>, ()> {
        let guard = self.catalog.read();
        let catalog = guard.as_ref().ok_or(())?;
        let Some(path) = catalog.origin.get(id) else { return Ok(None) };
        if stamp(path).as_ref() != catalog.stamps.get(path) {
            return Err(());
        }
        Ok(catalog.docs.get(id).cloned())
    }
}

fn read_jsonl(file: &Path) -> Result<Vec<SourceDocument>> {
    let reader = BufReader::new(File::open(file)?);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}

fn read_json(file: &Path) -> Result<Vec<SourceDocument>> {
    let reader = BufReader::new(File::open(file)?);
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    match json {
        serde_json::Value::Array(arr) => arr
            .into_iter()
            .map(|v| serde_json::from_value::<SourceDocument>(v).map_err(EngineError::from))
            .collect(),
        serde_json::Value::Object(_) => Ok(vec![serde_json::from_value(json)?]),
        _ => Ok(Vec::new()),
    }
}

impl ContentSource for JsonSource {
    fn publishable(&self) -> Result<Vec<SourceDocument>> {
        let catalog = self.load_all()?;
        let docs = catalog.docs.values().filter(|d| d.published).cloned().collect();
        *self.catalog.write() = Some(catalog);
        Ok(docs)
    }

    fn fetch(&self, id: &str) -> Result<Option<SourceDocument>> {
        let doc = match self.cached(id) {
            Ok(doc) => doc,
            Err(()) => {
                let catalog = self.load_all()?;
                let doc = catalog.docs.get(id).cloned();
                *self.catalog.write() = Some(catalog);
                doc
            }
        };
        Ok(doc.filter(|d| d.published))
    }
}
