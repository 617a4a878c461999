use crate::error::{EngineError, Result};
use crate::idf::{recalculate_idf, IdfResponse};
use crate::indexer::{self, BatchResponse, IndexStats, StartIndexingResponse};
use crate::persist::Store;
use crate::recommend::{similar_content, RecommendationResponse};
use crate::settings::{Settings, SettingsUpdate};
use crate::similarity::{self, SimilarityResponse};
use crate::source::ContentSource;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearResponse {
    pub success: bool,
    pub message: String,
}

/// What a full `run_to_completion` did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub start: StartIndexingResponse,
    pub batches: usize,
    pub processed: usize,
    pub failed: usize,
    pub remaining: usize,
    pub idf: IdfResponse,
    pub similarities: SimilarityResponse,
}

/// The recommendation engine: stores, content source and the locks that order operations.
///
/// Batches share `maintenance`; discovery, IDF, clearing and the similarity
/// snapshot take it exclusively. Similarity passes are serialized among
/// themselves so two writers never interleave their neighbour tables.
pub struct LinkEngine {
    store: Store,
    source: Arc<dyn ContentSource>,
    maintenance: RwLock<()>,
    similarity_pass: Mutex<()>,
    settings_write: Mutex<()>,
}

impl LinkEngine {
    pub fn open<P: AsRef<Path>>(db_path: P, source: Arc<dyn ContentSource>) -> Result<Self> {
        Ok(Self::with_store(Store::open(db_path)?, source))
    }

    pub fn temporary(source: Arc<dyn ContentSource>) -> Result<Self> {
        Ok(Self::with_store(Store::temporary()?, source))
    }

    pub fn with_store(store: Store, source: Arc<dyn ContentSource>) -> Self {
        Self {
            store,
            source,
            maintenance: RwLock::new(()),
            similarity_pass: Mutex::new(()),
            settings_write: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn start_indexing(&self) -> Result<StartIndexingResponse> {
        let _guard = self.maintenance.write();
        indexer::start_indexing(&self.store, self.source.as_ref())
    }

    pub fn process_batch(&self, batch_size: usize) -> Result<BatchResponse> {
        if batch_size == 0 {
            return Err(EngineError::validation("batchSize must be a positive integer"));
        }
        let max_terms = self.store.load_settings()?.max_terms_per_doc;
        let _guard = self.maintenance.read();
        indexer::process_batch(&self.store, self.source.as_ref(), batch_size, max_terms)
    }

    pub fn recalculate_idf(&self) -> Result<IdfResponse> {
        let _guard = self.maintenance.write();
        recalculate_idf(&self.store)
    }

    pub fn calculate_all_similarities(&self) -> Result<SimilarityResponse> {
        let _pass = self.similarity_pass.lock();
        let max_similar = self.store.load_settings()?.max_similar_per_doc;
        let snap = {
            let _guard = self.maintenance.write();
            similarity::snapshot(&self.store)?
        };
        similarity::store_similarities(&self.store, &snap, max_similar)
    }

    /// IDF followed by a similarity pass: the admin "recalculate" action.
    pub fn refresh_similarities(&self) -> Result<(IdfResponse, SimilarityResponse)> {
        let idf = self.recalculate_idf()?;
        let sims = self.calculate_all_similarities()?;
        Ok((idf, sims))
    }

    /// Recommendations for `page_id`. Missing `limit` / `min_similarity` fall back to settings.
    pub fn get_similar_content(
        &self,
        page_id: &str,
        limit: Option<usize>,
        min_similarity: Option<f32>,
    ) -> Result<RecommendationResponse> {
        let page_id = page_id.trim();
        if page_id.is_empty() {
            return Err(EngineError::validation("pageId is required"));
        }
        if limit == Some(0) {
            return Err(EngineError::validation("limit must be a positive integer"));
        }
        if let Some(min) = min_similarity {
            if !(0.0..=1.0).contains(&min) {
                return Err(EngineError::validation("minSimilarity must be between 0 and 1"));
            }
        }
        let settings = self.store.load_settings()?;
        if !settings.enabled {
            return Ok(RecommendationResponse::new(page_id.to_string(), Vec::new()));
        }
        let limit = limit.unwrap_or(settings.max_recommendations);
        let min_similarity = min_similarity.unwrap_or(settings.similarity_threshold);
        let recs = similar_content(&self.store, page_id, limit, min_similarity)?;
        Ok(RecommendationResponse::new(page_id.to_string(), recs))
    }

    pub fn get_index_stats(&self) -> Result<IndexStats> {
        indexer::index_stats(&self.store)
    }

    pub fn clear_index(&self) -> Result<ClearResponse> {
        let _pass = self.similarity_pass.lock();
        let _guard = self.maintenance.write();
        let documents = self.store.document_count();
        self.store.clear_index()?;
        tracing::info!(documents, "index cleared");
        Ok(ClearResponse { success: true, message: format!("Index cleared ({documents} documents removed)") })
    }

    pub fn settings(&self) -> Result<Settings> {
        self.store.load_settings()
    }

    pub fn update_settings(&self, update: &SettingsUpdate) -> Result<Settings> {
        let _guard = self.settings_write.lock();
        let next = self.store.load_settings()?.merged(update)?;
        self.store.save_settings(&next)?;
        tracing::info!(?update, "settings updated");
        Ok(next)
    }

    /// Discover, drain the queue in batches of `batch_size`, then refresh IDF and similarities.
    pub fn run_to_completion(&self, batch_size: usize) -> Result<RunSummary> {
        let start = self.start_indexing()?;
        let (mut batches, mut processed, mut failed, mut remaining) = (0, 0, 0, self.store.queue_len());
        while remaining > 0 {
            let batch = self.process_batch(batch_size)?;
            batches += 1;
            processed += batch.processed;
            failed += batch.failed;
            remaining = batch.remaining;
            if batch.processed + batch.failed == 0 {
                break;
            }
        }
        let (idf, similarities) = self.refresh_similarities()?;
        self.store.flush()?;
        Ok(RunSummary { start, batches, processed, failed, remaining, idf, similarities })
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}
