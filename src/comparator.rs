use std::cmp;

mod bytewise_comparator;
mod internal_key_comparator;

pub mod prelude {
    #![allow(unused)]

    pub use super::{
        Comparator, bytewise_comparator::BytewiseComparator, has_prefix,
        internal_key_comparator::InternalKeyComparator,
    };
}

pub trait Comparator: Send + Sync + Clone {
    fn compare(&self, a: &[u8], b: &[u8]) -> cmp::Ordering;

    fn name(&self) -> &'static str;
}

/// True iff `data` begins with `prefix`, compared byte for byte over the
/// prefix length.
pub fn has_prefix(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()] == *prefix
}
