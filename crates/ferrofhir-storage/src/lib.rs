//! Storage abstraction for the Ferrofhir platform layer.
//!
//! The core treats the concrete backend as a set of narrow traits:
//! CRUD plus history (`ResourceStore`), criteria matching for bulk
//! edits (`ResourceMatcher`), and point reads for graph traversal
//! (`ResourceFetcher`). The in-memory backend implements all three and
//! backs the test suite.

pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::StorageError;
pub use memory::InMemoryResourceStore;
pub use traits::{ResourceFetcher, ResourceMatcher, ResourceStore};
pub use types::{HistoryEntry, HistoryMethod, StoredResource};
