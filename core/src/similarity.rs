//! Pairwise cosine similarity over the processed corpus.
//!
//! Each processed document becomes a sparse TF-IDF vector over its capped term
//! set. Every unordered pair is scored once and offered to both documents'
//! neighbour lists, which are kept at most `max_similar_per_doc` long.

use crate::error::Result;
use crate::index::{DocId, Neighbor};
use crate::indexer::index_stats;
use crate::persist::Store;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Pairs scoring below this are never stored.
pub const MIN_STORED_SIMILARITY: f32 = 0.01;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityResponse {
    pub success: bool,
    pub calculated: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Sparse TF-IDF vector, entries sorted by term id.
#[derive(Debug, Clone, Default)]
pub struct TfIdfVector {
    entries: Vec<(u32, f64)>,
    norm: f64,
}

impl TfIdfVector {
    pub fn new(mut entries: Vec<(u32, f64)>) -> Self {
        entries.retain(|(_, w)| *w > 0.0);
        entries.sort_by_key(|(t, _)| *t);
        let norm = entries.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        Self { entries, norm }
    }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

/// Cosine of the angle between two vectors, clamped to [0, 1].
pub fn cosine(a: &TfIdfVector, b: &TfIdfVector) -> f32 {
    if a.norm == 0.0 || b.norm == 0.0 {
        return 0.0;
    }
    let (mut i, mut j) = (0, 0);
    let mut dot = 0.0f64;
    while i < a.entries.len() && j < b.entries.len() {
        let (ta, wa) = a.entries[i];
        let (tb, wb) = b.entries[j];
        match ta.cmp(&tb) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                dot += wa * wb;
                i += 1;
                j += 1;
            }
        }
    }
    ((dot / (a.norm * b.norm)) as f32).clamp(0.0, 1.0)
}

/// Processed documents and their vectors, read under the engine's exclusive lock.
#[derive(Debug, Default)]
pub struct CorpusSnapshot {
    pub ids: Vec<DocId>,
    pub vectors: Vec<TfIdfVector>,
}

impl CorpusSnapshot {
    pub fn len(&self) -> usize { self.ids.len() }

    pub fn is_empty(&self) -> bool { self.ids.is_empty() }
}

/// Build vectors for every processed document from stored tf maps and the IDF table.
pub fn snapshot(store: &Store) -> Result<CorpusSnapshot> {
    let idf = store.idf_weights()?;
    let processed = index_stats(store)?.processed_documents as u64;
    match store.idf_corpus_size()? {
        Some(n) if n == processed => {}
        Some(n) => tracing::warn!(idf_documents = n, processed, "idf is stale; run recalculate_idf first"),
        None => tracing::warn!(processed, "no idf table; run recalculate_idf first"),
    }

    let mut vocabulary: HashMap<String, u32> = HashMap::new();
    let mut snap = CorpusSnapshot::default();
    for doc in store.documents() {
        let doc = doc?;
        if !doc.state.is_processed() {
            continue;
        }
        let mut entries = Vec::with_capacity(doc.term_frequencies.len());
        for (term, tf) in &doc.term_frequencies {
            let Some(&w) = idf.get(term) else { continue };
            let next_id = vocabulary.len() as u32;
            let tid = *vocabulary.entry(term.clone()).or_insert(next_id);
            entries.push((tid, f64::from(*tf) * w));
        }
        snap.ids.push(doc.id);
        snap.vectors.push(TfIdfVector::new(entries));
    }
    Ok(snap)
}

/// Offer `candidate` to a neighbour list, compacting once it holds twice the cap.
fn push_bounded(list: &mut Vec<(usize, f32)>, candidate: (usize, f32), cap: usize, ids: &[DocId]) {
    list.push(candidate);
    if list.len() >= cap.saturating_mul(2).max(2) {
        rank(list, ids);
        list.truncate(cap);
    }
}

fn rank(list: &mut [(usize, f32)], ids: &[DocId]) {
    list.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| ids[a.0].cmp(&ids[b.0]))
    });
}

/// Score all pairs and return each document's top `max_similar` neighbours.
pub fn top_neighbors(snap: &CorpusSnapshot, max_similar: usize) -> Vec<(DocId, Vec<Neighbor>)> {
    let n = snap.len();
    let mut lists: Vec<Vec<(usize, f32)>> = vec![Vec::new(); n];
    for i in 0..n {
        if snap.vectors[i].is_empty() {
            continue;
        }
        for j in (i + 1)..n {
            let score = cosine(&snap.vectors[i], &snap.vectors[j]);
            if score < MIN_STORED_SIMILARITY {
                continue;
            }
            push_bounded(&mut lists[i], (j, score), max_similar, &snap.ids);
            push_bounded(&mut lists[j], (i, score), max_similar, &snap.ids);
        }
    }

    lists
        .into_iter()
        .enumerate()
        .map(|(i, mut list)| {
            rank(&mut list, &snap.ids);
            list.truncate(max_similar);
            let neighbors = list
                .into_iter()
                .map(|(j, score)| Neighbor { doc_id: snap.ids[j].clone(), score })
                .collect();
            (snap.ids[i].clone(), neighbors)
        })
        .collect()
}

/// Score, truncate and persist neighbour lists for a snapshot. Returns edges written.
pub fn store_similarities(store: &Store, snap: &CorpusSnapshot, max_similar: usize) -> Result<SimilarityResponse> {
    if snap.len() < 2 {
        let message = format!(
            "At least 2 processed documents are required to calculate similarities (found {})",
            snap.len()
        );
        tracing::info!(documents = snap.len(), "similarity pass skipped");
        return Ok(SimilarityResponse { success: false, calculated: 0, message: Some(message) });
    }
    let lists = top_neighbors(snap, max_similar);
    let calculated = lists.iter().map(|(_, l)| l.len()).sum();
    store.replace_similar(&lists)?;
    tracing::info!(documents = snap.len(), calculated, "similarities calculated");
    Ok(SimilarityResponse { success: true, calculated, message: None })
}
