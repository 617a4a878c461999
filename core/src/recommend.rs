use crate::error::Result;
use crate::persist::Store;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub content_id: String,
    pub url: Option<String>,
    pub title: String,
    pub similarity_score: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResponse {
    pub page_id: String,
    pub recommendations: Vec<Recommendation>,
    pub count: usize,
}

impl RecommendationResponse {
    pub fn new(page_id: String, recommendations: Vec<Recommendation>) -> Self {
        let count = recommendations.len();
        Self { page_id, recommendations, count }
    }
}

/// Stored neighbours of `page_id` scoring at least `min_similarity`, best first.
///
/// Unknown or not yet scored pages simply have no neighbours.
pub fn similar_content(store: &Store, page_id: &str, limit: usize, min_similarity: f32) -> Result<Vec<Recommendation>> {
    let mut out = Vec::with_capacity(limit.min(32));
    for neighbor in store.load_similar(page_id)? {
        if out.len() >= limit {
            break;
        }
        if neighbor.doc_id == page_id || neighbor.score < min_similarity {
            continue;
        }
        // Lists are computed between passes; skip anything cleared since.
        let Some(doc) = store.load_document(&neighbor.doc_id)? else { continue };
        if !doc.state.is_processed() {
            continue;
        }
        out.push(Recommendation {
            content_id: doc.id,
            url: doc.url,
            title: doc.title,
            similarity_score: neighbor.score,
        });
    }
    out.sort_by(|a, b| b.similarity_score.partial_cmp(&a.similarity_score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(out)
}
