use crate::error::{EngineError, Result};
use crate::index::{DocState, Document};
use crate::persist::Store;
use crate::source::{ContentSource, SourceDocument};
use crate::tokenizer::analyze;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use time::format_description::well_known::Rfc3339;

/// Failed processing attempts before a document is parked until the next `start_indexing`.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartIndexingResponse {
    pub success: bool,
    pub message: String,
    pub queued: usize,
    pub requeued: usize,
    pub already_indexed: usize,
    pub changed: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub success: bool,
    pub processed: usize,
    pub failed: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub total_documents: usize,
    pub total_terms: usize,
    pub processed_documents: usize,
    pub pending_documents: usize,
    pub average_word_count: f64,
}

/// Queue every publishable document the store has not seen yet.
///
/// Must not run concurrently with `process_batch`: documents found mid-claim are
/// treated as left over from an interrupted batch and queued again.
pub fn start_indexing(store: &Store, source: &dyn ContentSource) -> Result<StartIndexingResponse> {
    let publishable = source.publishable()?;
    let (mut queued, mut requeued, mut already_indexed, mut waiting, mut changed) = (0, 0, 0, 0, 0);

    for src in &publishable {
        let Some(mut doc) = store.load_document(&src.id)? else {
            let fresh = Document::pending(src.id.clone(), src.title.clone(), src.url.clone(), src.content_hash());
            if store.insert_pending(&fresh)? {
                queued += 1;
            }
            continue;
        };
        match doc.state {
            DocState::Processed => {
                if doc.content_hash != src.content_hash() {
                    tracing::warn!(id = %doc.id, "content changed since indexing; clear the index to pick it up");
                    changed += 1;
                } else {
                    already_indexed += 1;
                }
            }
            DocState::InProgress => {
                tracing::warn!(id = %doc.id, "re-queueing document left claimed by an interrupted batch");
                doc.state = DocState::Pending;
                store.release(&doc, true)?;
                requeued += 1;
            }
            DocState::Pending if doc.attempts >= MAX_ATTEMPTS => {
                tracing::info!(id = %doc.id, attempts = doc.attempts, "re-queueing parked document");
                doc.attempts = 0;
                store.release(&doc, true)?;
                requeued += 1;
            }
            DocState::Pending => waiting += 1,
        }
    }

    let message = format!(
        "Queued {queued} new documents for indexing ({requeued} re-queued, {waiting} already queued, {already_indexed} already indexed, {changed} changed since indexing)"
    );
    tracing::info!(queued, requeued, waiting, already_indexed, changed, "start indexing");
    Ok(StartIndexingResponse { success: true, message, queued, requeued, already_indexed, changed })
}

/// Claim and index up to `batch_size` pending documents.
pub fn process_batch(store: &Store, source: &dyn ContentSource, batch_size: usize, max_terms: usize) -> Result<BatchResponse> {
    if batch_size == 0 {
        return Err(EngineError::validation("batchSize must be a positive integer"));
    }
    let claimed = store.claim(batch_size)?;
    let (mut processed, mut failed) = (0, 0);

    for doc in claimed {
        let outcome = fetch_source(source, &doc.id)
            .map(|src| build_record(&doc, &src, max_terms))
            .and_then(|record| store.commit_processed(&record));
        match outcome {
            Ok(true) => {
                tracing::debug!(id = %doc.id, "document processed");
                processed += 1;
            }
            Ok(false) => tracing::debug!(id = %doc.id, "claim lost before commit"),
            Err(err) => {
                failed += 1;
                let id = doc.id.clone();
                // The claim stays in progress; the next start_indexing re-queues it.
                if let Err(release_err) = release_failed(store, doc, &err) {
                    tracing::error!(id = %id, error = %release_err, "could not release failed document");
                }
            }
        }
    }

    let remaining = store.queue_len();
    tracing::info!(processed, failed, remaining, "batch complete");
    Ok(BatchResponse { success: true, processed, failed, remaining })
}

fn fetch_source(source: &dyn ContentSource, id: &str) -> Result<SourceDocument> {
    source
        .fetch(id)?
        .ok_or_else(|| EngineError::Source { id: id.to_string(), reason: "no longer published".into() })
}

fn release_failed(store: &Store, mut doc: Document, err: &EngineError) -> Result<()> {
    doc.state = DocState::Pending;
    doc.attempts += 1;
    doc.last_error = Some(err.to_string());
    let requeue = doc.attempts < MAX_ATTEMPTS;
    if requeue {
        tracing::warn!(id = %doc.id, attempts = doc.attempts, error = %err, "document failed, released back to queue");
    } else {
        tracing::warn!(id = %doc.id, attempts = doc.attempts, error = %err, "document failed too often, parked");
    }
    store.release(&doc, requeue)
}

/// The processed form of `claimed`, ready to commit.
pub fn build_record(claimed: &Document, src: &SourceDocument, max_terms: usize) -> Document {
    let analysis = analyze(&src.body);
    let mut counts: HashMap<String, u32> = HashMap::new();
    for (term, _pos) in analysis.terms {
        *counts.entry(term).or_insert(0) += 1;
    }
    Document {
        id: claimed.id.clone(),
        url: src.url.clone(),
        title: src.title.clone(),
        word_count: u32::try_from(analysis.word_count).unwrap_or(u32::MAX),
        state: DocState::Processed,
        term_frequencies: top_terms(counts, max_terms),
        indexed_at: Some(now_rfc3339()),
        content_hash: src.content_hash(),
        attempts: claimed.attempts,
        last_error: None,
    }
}

/// Keep the `cap` most frequent terms; ties go to the alphabetically first term.
pub fn top_terms(counts: HashMap<String, u32>, cap: usize) -> BTreeMap<String, u32> {
    let mut ranked: Vec<(String, u32)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(cap);
    ranked.into_iter().collect()
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

pub fn index_stats(store: &Store) -> Result<IndexStats> {
    let mut stats = IndexStats::default();
    let mut words: u64 = 0;
    for doc in store.documents() {
        let doc = doc?;
        stats.total_documents += 1;
        if doc.state.is_processed() {
            stats.processed_documents += 1;
            words += u64::from(doc.word_count);
        } else {
            stats.pending_documents += 1;
        }
    }
    stats.total_terms = store.term_count();
    if stats.processed_documents > 0 {
        stats.average_word_count = words as f64 / stats.processed_documents as f64;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_terms_caps_by_frequency() {
        let counts: HashMap<String, u32> =
            [("build", 3), ("modular", 5), ("office", 1), ("commerci", 3)].into_iter().map(|(t, c)| (t.to_string(), c)).collect();
        let kept = top_terms(counts, 3);
        let terms: Vec<&str> = kept.keys().map(|s| s.as_str()).collect();
        assert_eq!(terms, vec!["build", "commerci", "modular"]);
    }

    #[test]
    fn build_record_counts_words_and_terms() {
        let claimed = Document::pending("d".into(), "old".into(), None, String::new());
        let src = SourceDocument::new("d", "Modular Offices", "Modular offices and modular classrooms").with_url("/modular");
        let rec = build_record(&claimed, &src, 100);
        assert_eq!(rec.state, DocState::Processed);
        assert_eq!(rec.word_count, 5);
        assert_eq!(rec.term_frequencies.get("modular"), Some(&2));
        assert_eq!(rec.title, "Modular Offices");
        assert_eq!(rec.url.as_deref(), Some("/modular"));
        assert!(rec.indexed_at.is_some());
    }
}
