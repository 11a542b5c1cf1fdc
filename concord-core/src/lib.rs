pub mod config;
pub mod db;
pub mod error;
pub mod ipc;
pub mod models;
pub mod parse;
pub mod safety;
pub mod search;
pub mod semantic;

pub use config::ConcordConfig;
pub use error::ConcordError;
pub use parse::SemanticReply;
pub use safety::SafetyGate;
pub use search::{DocumentFilters, HttpSearchClient, SearchBackend, SearchError, SearchHit};
pub use semantic::{GeminiSemanticClient, SemanticBackend, SemanticConfig, SemanticError};
