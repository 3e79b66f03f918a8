mod key;
mod ordering;
mod repository;
pub mod schema;

pub use key::{CompositeKey, IndexName, KeyRange, MAX_KEY, MIN_KEY};
pub use ordering::ChainIssue;
pub use repository::{ReadUndo, Repository};
