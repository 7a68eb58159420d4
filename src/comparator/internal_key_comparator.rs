use std::cmp;

use crate::format::{get_key_seq, get_user_key};

use super::Comparator;

/// Orders internal keys by user key, then by sequence number descending so
/// the newest version of a key comes first.
#[derive(Clone, Debug, Default)]
pub struct InternalKeyComparator<C> {
    user: C,
}

impl<C> InternalKeyComparator<C>
where
    C: Comparator,
{
    pub fn new(user: C) -> Self {
        Self { user }
    }

    pub fn user_comparator(&self) -> &C {
        &self.user
    }
}

impl<C> Comparator for InternalKeyComparator<C>
where
    C: Comparator,
{
    fn compare(&self, a: &[u8], b: &[u8]) -> cmp::Ordering {
        self.user
            .compare(get_user_key(a), get_user_key(b))
            .then_with(|| get_key_seq(b).cmp(&get_key_seq(a)))
    }

    fn name(&self) -> &'static str {
        "memdb.InternalKeyComparator"
    }
}
