use crate::error::Result;
use crate::indexer::index_stats;
use crate::persist::Store;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdfResponse {
    pub success: bool,
    pub terms: usize,
    pub documents: usize,
}

/// `ln(N / df)`. Zero for an empty corpus or an unseen term.
pub fn idf(num_docs: u64, df: u64) -> f64 {
    if num_docs == 0 || df == 0 {
        return 0.0;
    }
    ((num_docs as f64) / (df as f64)).ln().max(0.0)
}

/// Recompute the IDF table for the whole corpus from the current df counts.
pub fn recalculate_idf(store: &Store) -> Result<IdfResponse> {
    let n = index_stats(store)?.processed_documents as u64;
    let mut weights: HashMap<String, f64> = HashMap::with_capacity(store.term_count());
    if n > 0 {
        for entry in store.document_frequencies() {
            let (term, df) = entry?;
            weights.insert(term, idf(n, df));
        }
    }
    store.replace_idf(&weights, n)?;
    tracing::info!(terms = weights.len(), documents = n, "idf recalculated");
    Ok(IdfResponse { success: true, terms: weights.len(), documents: n as usize })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idf_non_increasing_in_df() {
        let n = 50;
        let mut prev = f64::INFINITY;
        for df in 1..=n {
            let w = idf(n, df);
            assert!(w <= prev, "idf rose at df={df}");
            assert!(w >= 0.0);
            prev = w;
        }
        assert_eq!(idf(n, n), 0.0);
    }

    #[test]
    fn idf_matches_natural_log() {
        assert!((idf(3, 1) - 3f64.ln()).abs() < 1e-12);
        assert!((idf(3, 2) - 1.5f64.ln()).abs() < 1e-12);
        assert_eq!(idf(0, 0), 0.0);
    }
}
