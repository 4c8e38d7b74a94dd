pub mod skiplist;

pub use skiplist::{Comparator, SkipList, UpsertOutcome};
