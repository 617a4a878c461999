use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a document in the content repository.
pub type DocId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocState {
    Pending,
    /// Claimed by a running batch. Reported as pending everywhere outside the indexer.
    InProgress,
    Processed,
}

impl DocState {
    pub fn is_processed(self) -> bool { self == DocState::Processed }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub url: Option<String>,
    pub title: String,
    pub word_count: u32,
    pub state: DocState,
    /// Capped term -> raw count map. Empty until processed.
    pub term_frequencies: BTreeMap<String, u32>,
    /// RFC 3339 timestamp of the commit that marked the document processed.
    pub indexed_at: Option<String>,
    /// Hex SHA-1 of the source text last seen for this document.
    pub content_hash: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl Document {
    pub fn pending(id: DocId, title: String, url: Option<String>, content_hash: String) -> Self {
        Self {
            id,
            url,
            title,
            word_count: 0,
            state: DocState::Pending,
            term_frequencies: BTreeMap::new(),
            indexed_at: None,
            content_hash,
            attempts: 0,
            last_error: None,
        }
    }
}

/// One stored similarity edge, seen from the owning document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub doc_id: DocId,
    pub score: f32,
}
