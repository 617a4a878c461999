use crate::error::{EngineError, Result};
use crate::index::{DocState, Document, Neighbor};
use crate::settings::Settings;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Batch, Db, IVec, Tree};
use std::collections::{HashMap, HashSet};
use std::path::Path;

type TxResult<T> = std::result::Result<T, TransactionError<EngineError>>;

const DOCUMENTS: &str = "documents";
const QUEUE: &str = "queue";
const TERMS: &str = "terms";
const IDF: &str = "idf";
const SIMILAR: &str = "similar";
const META: &str = "meta";
const SETTINGS: &str = "settings";

const SETTINGS_KEY: &[u8] = b"settings";
const IDF_DOCUMENTS_KEY: &[u8] = b"idf_documents";

/// Every persistent table the engine owns, stored as trees of one sled database.
#[derive(Clone)]
pub struct Store {
    db: Db,
    documents: Tree,
    queue: Tree,
    terms: Tree,
    idf: Tree,
    similar: Tree,
    meta: Tree,
    settings: Tree,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(raw)?)
}

fn decode_u64(tree: &'static str, raw: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| EngineError::Corrupt { tree, detail: format!("expected 8 bytes, got {}", raw.len()) })?;
    Ok(u64::from_be_bytes(bytes))
}

fn decode_f64(tree: &'static str, raw: &[u8]) -> Result<f64> {
    decode_u64(tree, raw).map(f64::from_bits)
}

fn utf8_key(tree: &'static str, raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec()).map_err(|e| EngineError::Corrupt { tree, detail: e.to_string() })
}

/// A batch that removes every key of `tree` matching `stale`; callers add their inserts.
fn stale_keys(tree: &Tree, stale: impl Fn(&[u8]) -> bool) -> Result<Batch> {
    let mut batch = Batch::default();
    for key in tree.iter().keys() {
        let key = key?;
        if stale(&key[..]) {
            batch.remove(key);
        }
    }
    Ok(batch)
}

fn abort(err: EngineError) -> ConflictableTransactionError<EngineError> {
    ConflictableTransactionError::Abort(err)
}

impl Store {
    /// Open (or create) the database directory at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| {
            EngineError::Configuration(format!("cannot open index database at {}: {e}", path.display()))
        })?;
        Self::from_db(db)
    }

    /// A throwaway database removed on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| EngineError::Configuration(format!("cannot create temporary database: {e}")))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            documents: db.open_tree(DOCUMENTS)?,
            queue: db.open_tree(QUEUE)?,
            terms: db.open_tree(TERMS)?,
            idf: db.open_tree(IDF)?,
            similar: db.open_tree(SIMILAR)?,
            meta: db.open_tree(META)?,
            settings: db.open_tree(SETTINGS)?,
            db,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // --- documents ---

    pub fn load_document(&self, id: &str) -> Result<Option<Document>> {
        match self.documents.get(id.as_bytes())? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn documents(&self) -> impl Iterator<Item = Result<Document>> + '_ {
        self.documents.iter().map(|entry| {
            let (_, raw) = entry?;
            decode(&raw)
        })
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Insert `doc` and its queue entry unless a record with the same id exists.
    pub fn insert_pending(&self, doc: &Document) -> Result<bool> {
        let seq = self.db.generate_id()?.to_be_bytes();
        let value = encode(doc)?;
        let key = doc.id.as_bytes();
        let res: TxResult<bool> = (&self.documents, &self.queue).transaction(|(docs, queue)| {
            if docs.get(key)?.is_some() {
                return Ok(false);
            }
            docs.insert(key, value.as_slice())?;
            queue.insert(&seq[..], key)?;
            Ok(true)
        });
        Ok(res?)
    }

    /// Write `doc` as given and, when `requeue` is set, append it to the tail of the queue.
    pub fn release(&self, doc: &Document, requeue: bool) -> Result<()> {
        let seq = self.db.generate_id()?.to_be_bytes();
        let value = encode(doc)?;
        let key = doc.id.as_bytes();
        let res: TxResult<()> = (&self.documents, &self.queue).transaction(|(docs, queue)| {
            docs.insert(key, value.as_slice())?;
            if requeue {
                queue.insert(&seq[..], key)?;
            }
            Ok(())
        });
        Ok(res?)
    }

    // --- queue ---

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Claim up to `limit` queued documents in discovery order.
    ///
    /// Removing the queue entry is the claim: under concurrent callers exactly one
    /// transaction observes the entry and moves the document to `InProgress`.
    pub fn claim(&self, limit: usize) -> Result<Vec<Document>> {
        let mut claimed = Vec::with_capacity(limit.min(self.queue.len()));
        for entry in self.queue.iter() {
            if claimed.len() >= limit {
                break;
            }
            let (seq, _) = entry?;
            let res: TxResult<Option<Document>> = (&self.queue, &self.documents).transaction(|(queue, docs)| {
                let Some(id) = queue.remove(seq.clone())? else { return Ok(None) };
                let Some(raw) = docs.get(&id)? else { return Ok(None) };
                let mut doc: Document = decode(&raw).map_err(abort)?;
                // Stale entry for a document some other path already finished.
                if doc.state != DocState::Pending {
                    return Ok(None);
                }
                doc.state = DocState::InProgress;
                docs.insert(id.clone(), encode(&doc).map_err(abort)?)?;
                Ok(Some(doc))
            });
            if let Some(doc) = res? {
                claimed.push(doc);
            }
        }
        Ok(claimed)
    }

    // --- terms ---

    /// Mark `doc` processed and bump df for each of its terms in one transaction.
    ///
    /// Returns `false` without touching df when the stored record is no longer
    /// claimed, so a document can never be counted twice.
    pub fn commit_processed(&self, doc: &Document) -> Result<bool> {
        let value = encode(doc)?;
        let key = doc.id.as_bytes();
        let res: TxResult<bool> = (&self.documents, &self.terms).transaction(|(docs, terms)| {
            let Some(raw) = docs.get(key)? else { return Ok(false) };
            let current: Document = decode(&raw).map_err(abort)?;
            if current.state != DocState::InProgress {
                return Ok(false);
            }
            for term in doc.term_frequencies.keys() {
                let df = match terms.get(term.as_bytes())? {
                    Some(raw) => decode_u64(TERMS, &raw).map_err(abort)?,
                    None => 0,
                };
                terms.insert(term.as_bytes(), &(df + 1).to_be_bytes()[..])?;
            }
            docs.insert(key, value.as_slice())?;
            Ok(true)
        });
        Ok(res?)
    }

    pub fn document_frequency(&self, term: &str) -> Result<u64> {
        match self.terms.get(term.as_bytes())? {
            Some(raw) => decode_u64(TERMS, &raw),
            None => Ok(0),
        }
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn document_frequencies(&self) -> impl Iterator<Item = Result<(String, u64)>> + '_ {
        self.terms.iter().map(|entry| {
            let (k, v) = entry?;
            Ok((utf8_key(TERMS, &k)?, decode_u64(TERMS, &v)?))
        })
    }

    // --- idf ---

    /// Swap in a freshly computed IDF table computed over `documents` processed docs.
    pub fn replace_idf(&self, weights: &HashMap<String, f64>, documents: u64) -> Result<()> {
        let mut batch = stale_keys(&self.idf, |key| {
            std::str::from_utf8(key).map_or(true, |term| !weights.contains_key(term))
        })?;
        for (term, idf) in weights {
            batch.insert(term.as_bytes(), &idf.to_bits().to_be_bytes()[..]);
        }
        self.idf.apply_batch(batch)?;
        self.meta.insert(IDF_DOCUMENTS_KEY, &documents.to_be_bytes()[..])?;
        Ok(())
    }

    pub fn idf_weights(&self) -> Result<HashMap<String, f64>> {
        let mut out = HashMap::with_capacity(self.idf.len());
        for entry in self.idf.iter() {
            let (k, v) = entry?;
            out.insert(utf8_key(IDF, &k)?, decode_f64(IDF, &v)?);
        }
        Ok(out)
    }

    pub fn idf(&self, term: &str) -> Result<Option<f64>> {
        match self.idf.get(term.as_bytes())? {
            Some(raw) => Ok(Some(decode_f64(IDF, &raw)?)),
            None => Ok(None),
        }
    }

    /// Corpus size used by the last IDF pass, if any ran since the last clear.
    pub fn idf_corpus_size(&self) -> Result<Option<u64>> {
        match self.meta.get(IDF_DOCUMENTS_KEY)? {
            Some(raw) => Ok(Some(decode_u64(META, &raw)?)),
            None => Ok(None),
        }
    }

    // --- similarity ---

    /// Swap in new neighbour lists. Readers see either the old table or the new one.
    pub fn replace_similar(&self, lists: &[(String, Vec<Neighbor>)]) -> Result<()> {
        let kept: HashSet<&[u8]> =
            lists.iter().filter(|(_, n)| !n.is_empty()).map(|(id, _)| id.as_bytes()).collect();
        let mut batch = stale_keys(&self.similar, |key| !kept.contains(key))?;
        for (id, neighbors) in lists {
            if neighbors.is_empty() {
                continue;
            }
            batch.insert(id.as_bytes(), encode(neighbors)?);
        }
        self.similar.apply_batch(batch)?;
        Ok(())
    }

    pub fn load_similar(&self, id: &str) -> Result<Vec<Neighbor>> {
        match self.similar.get(id.as_bytes())? {
            Some(raw) => decode(&raw),
            None => Ok(Vec::new()),
        }
    }

    pub fn edge_count(&self) -> Result<usize> {
        let mut total = 0;
        for entry in self.similar.iter() {
            let (_, raw) = entry?;
            total += decode::<Vec<Neighbor>>(&raw)?.len();
        }
        Ok(total)
    }

    // --- settings ---

    pub fn load_settings(&self) -> Result<Settings> {
        match self.settings.get(SETTINGS_KEY)? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(Settings::default()),
        }
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let json = serde_json::to_vec_pretty(settings)?;
        self.settings.insert(SETTINGS_KEY, IVec::from(json))?;
        Ok(())
    }

    /// Drop every document, queue entry, term, IDF weight and similarity edge.
    /// Settings survive.
    pub fn clear_index(&self) -> Result<()> {
        for tree in [&self.documents, &self.queue, &self.terms, &self.idf, &self.similar, &self.meta] {
            tree.clear()?;
        }
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str) -> Document {
        Document::pending(id.to_string(), format!("Title {id}"), None, "hash".into())
    }

    #[test]
    fn insert_pending_is_idempotent() {
        let store = Store::temporary().unwrap();
        assert!(store.insert_pending(&doc("a")).unwrap());
        assert!(!store.insert_pending(&doc("a")).unwrap());
        assert_eq!(store.document_count(), 1);
        assert_eq!(store.queue_len(), 1);
    }

    #[test]
    fn claim_is_fifo_and_exclusive() {
        let store = Store::temporary().unwrap();
        for id in ["a", "b", "c"] {
            store.insert_pending(&doc(id)).unwrap();
        }
        let first = store.claim(2).unwrap();
        let ids: Vec<&str> = first.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(first.iter().all(|d| d.state == DocState::InProgress));
        let rest = store.claim(10).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "c");
        assert!(store.claim(10).unwrap().is_empty());
    }

    #[test]
    fn commit_counts_df_once() {
        let store = Store::temporary().unwrap();
        store.insert_pending(&doc("a")).unwrap();
        let mut claimed = store.claim(1).unwrap().remove(0);
        claimed.state = DocState::Processed;
        claimed.term_frequencies.insert("modular".into(), 2);
        assert!(store.commit_processed(&claimed).unwrap());
        assert!(!store.commit_processed(&claimed).unwrap());
        assert_eq!(store.document_frequency("modular").unwrap(), 1);
    }

    #[test]
    fn claim_limit_larger_than_queue() {
        let store = Store::temporary().unwrap();
        for id in ["a", "b"] {
            store.insert_pending(&doc(id)).unwrap();
        }
        assert_eq!(store.claim(usize::MAX).unwrap().len(), 2);
    }

    #[test]
    fn replacing_tables_drops_stale_entries() {
        let store = Store::temporary().unwrap();
        let edge = |id: &str| vec![Neighbor { doc_id: id.to_string(), score: 0.5 }];
        store.replace_similar(&[("a".into(), edge("b")), ("b".into(), edge("a"))]).unwrap();
        store.replace_similar(&[("a".into(), edge("c")), ("b".into(), Vec::new())]).unwrap();
        assert_eq!(store.load_similar("a").unwrap()[0].doc_id, "c");
        assert!(store.load_similar("b").unwrap().is_empty());
        assert_eq!(store.edge_count().unwrap(), 1);

        let weights: HashMap<String, f64> = [("modular".to_string(), 0.4), ("office".to_string(), 1.1)].into();
        store.replace_idf(&weights, 3).unwrap();
        let weights: HashMap<String, f64> = [("modular".to_string(), 0.7)].into();
        store.replace_idf(&weights, 4).unwrap();
        assert_eq!(store.idf("modular").unwrap(), Some(0.7));
        assert_eq!(store.idf("office").unwrap(), None);
        assert_eq!(store.idf_corpus_size().unwrap(), Some(4));
    }

    #[test]
    fn settings_default_until_saved() {
        let store = Store::temporary().unwrap();
        assert_eq!(store.load_settings().unwrap(), Settings::default());
        let mut s = Settings::default();
        s.heading_text = "See also".into();
        store.save_settings(&s).unwrap();
        assert_eq!(store.load_settings().unwrap().heading_text, "See also");
    }

    #[test]
    fn clear_keeps_settings() {
        let store = Store::temporary().unwrap();
        store.insert_pending(&doc("a")).unwrap();
        let mut s = Settings::default();
        s.max_recommendations = 9;
        store.save_settings(&s).unwrap();
        store.clear_index().unwrap();
        assert_eq!(store.document_count(), 0);
        assert_eq!(store.queue_len(), 0);
        assert_eq!(store.load_settings().unwrap().max_recommendations, 9);
    }
}
