pub mod engine;
pub mod error;
pub mod idf;
pub mod index;
pub mod indexer;
pub mod persist;
pub mod recommend;
pub mod settings;
pub mod similarity;
pub mod source;
pub mod tokenizer;

pub use engine::LinkEngine;
pub use error::{EngineError, Result};
pub use index::{DocState, Document, Neighbor};
pub use settings::{DisplayPosition, Settings, SettingsUpdate};
pub use source::{ContentSource, JsonSource, MemorySource, SourceDocument};
