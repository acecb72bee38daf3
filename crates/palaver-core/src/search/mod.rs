//! Full-text search domain: query, results, and the index trait.

pub mod model;
pub mod service;

pub use model::{SearchOutcome, SearchQuery, SearchResultItem};
pub use service::SearchIndex;
