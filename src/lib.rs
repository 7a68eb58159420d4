pub mod coding;
pub mod comparator;
pub mod error;
pub mod format;
pub mod iterator;
pub mod memtable;
pub mod options;

pub use memdb_skiplist as skiplist;
