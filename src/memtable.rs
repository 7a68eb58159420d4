use std::{
    cmp::Ordering::*,
    ptr::NonNull,
    slice,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering::Relaxed},
    },
};

use bytes::BytesMut;
use memdb_skiplist::{
    arena::Arena,
    comparator::Comparator as ListComparator,
    skip_list::{SkipList, SkipListIter},
};
use parking_lot::Mutex;

use crate::{
    coding::{MAX_VARINT32_LEN, put_varint32},
    comparator::prelude::*,
    error::Result,
    format::{
        SEQ_LEN, decode_memtable_entry, encode_memtable_entry, get_key_seq, get_user_key,
        make_lookup_key, memtable_entry_len,
    },
    iterator::Iter,
    options::MemTableOptions,
};

/// Pointer to a length-prefixed internal key in arena (or lookup) memory.
#[derive(Clone, Copy)]
struct EntryPtr(NonNull<u8>);

// Points into immutable bytes owned by the memtable's arena.
unsafe impl Send for EntryPtr {}
unsafe impl Sync for EntryPtr {}

impl EntryPtr {
    fn from_lookup(lookup: &[u8]) -> Self {
        debug_assert!(!lookup.is_empty());
        Self(NonNull::from(lookup).cast())
    }

    /// # Safety
    ///
    /// Must point at an encoded entry or lookup key that outlives `'a`.
    unsafe fn internal_key<'a>(self) -> &'a [u8] {
        unsafe {
            let p = self.0.as_ptr();
            let (len, n) = read_varint32(p);
            slice::from_raw_parts(p.add(n), len as usize)
        }
    }

    /// # Safety
    ///
    /// Must point at a full memtable entry that outlives `'a`.
    unsafe fn entry<'a>(self) -> &'a [u8] {
        unsafe {
            let p = self.0.as_ptr();
            let (key_len, n) = read_varint32(p);
            let value_at = n + key_len as usize;
            let (value_len, m) = read_varint32(p.add(value_at));
            slice::from_raw_parts(p, value_at + m + value_len as usize)
        }
    }
}

// Reads byte by byte; the encoded length of an entry is not known up front.
unsafe fn read_varint32(p: *const u8) -> (u32, usize) {
    let mut n = 0u32;
    for i in 0..MAX_VARINT32_LEN {
        let byte = unsafe { p.add(i).read() };
        n |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return (n, i + 1);
        }
    }
    panic!("memtable entry has a malformed length prefix");
}

fn decode_entry<'a>(entry: EntryPtr) -> (&'a [u8], &'a [u8]) {
    decode_memtable_entry(unsafe { entry.entry() })
        .unwrap_or_else(|e| panic!("memtable entry: {e}"))
}

#[derive(Clone)]
struct MemTableKeyComparator<C>
where
    C: Comparator,
{
    c: InternalKeyComparator<C>,
}

impl<C> ListComparator for MemTableKeyComparator<C>
where
    C: Comparator,
{
    type Item = EntryPtr;

    fn compare(&self, a: &Self::Item, b: &Self::Item) -> std::cmp::Ordering {
        let (a, b) = unsafe { (a.internal_key(), b.internal_key()) };
        self.c.compare(a, b)
    }
}

type List<C> = SkipList<EntryPtr, MemTableKeyComparator<C>, Arc<Arena>>;
type ListIter<'a, C> = SkipListIter<'a, EntryPtr, MemTableKeyComparator<C>, Arc<Arena>>;

/// In-memory write buffer.
///
/// Entries are encoded into arena memory and indexed by a skip list. Writers
/// are serialized internally; readers never block.
pub struct MemTable<C>
where
    C: Comparator,
{
    list: List<C>,
    arena: Arc<Arena>,
    write_lock: Mutex<()>,
    len: AtomicUsize,
}

impl<C: Comparator> MemTable<C> {
    pub fn new(c: InternalKeyComparator<C>) -> Self {
        Self::with_options(c, &MemTableOptions::default())
    }

    pub fn with_options(c: InternalKeyComparator<C>, options: &MemTableOptions) -> Self {
        tracing::debug!(
            comparator = c.user_comparator().name(),
            arena_block_size = options.arena_block_size,
            "memtable: created"
        );

        let arena = Arc::new(Arena::with_block_size(options.arena_block_size));
        // the arena is fresh and only ever allocated from under `write_lock`
        let list = unsafe { SkipList::new(MemTableKeyComparator { c }, arena.clone()) };
        Self {
            list,
            arena,
            write_lock: Mutex::new(()),
            len: AtomicUsize::new(0),
        }
    }

    /// Adds `key` at sequence `seq`.
    ///
    /// Each `(key, seq)` pair must be added at most once; debug builds panic
    /// on a repeat.
    pub fn put(&self, seq: u64, key: &[u8], value: &[u8]) {
        let len = memtable_entry_len(key, value);

        let _guard = self.write_lock.lock();
        unsafe {
            let p = self.arena.allocate(len);
            encode_memtable_entry(slice::from_raw_parts_mut(p.as_ptr(), len), seq, key, value);
            self.list.insert(EntryPtr(p));
        }
        self.len.fetch_add(1, Relaxed);
    }

    /// Value of the newest version of `key` with a sequence `<= seq`.
    pub fn get(&self, seq: u64, key: &[u8]) -> Option<&[u8]> {
        let lookup = make_lookup_key(key, seq);
        let mut iter = self.list.iter();
        iter.seek(&EntryPtr::from_lookup(&lookup));

        let (internal_key, value) = decode_entry(*iter.key()?);
        let user = self.list.comparator().c.user_comparator();
        (user.compare(get_user_key(internal_key), key) == Equal).then_some(value)
    }

    /// Entries whose user key starts with `prefix`, as
    /// `(user_key, seq, value)`, in key order.
    ///
    /// Assumes the user comparator keeps keys sharing a prefix contiguous,
    /// as bytewise order does.
    pub fn scan_prefix<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (&'a [u8], u64, &'a [u8])> + 'a {
        let lookup = make_lookup_key(prefix, u64::MAX);
        let mut iter = self.list.iter();
        iter.seek(&EntryPtr::from_lookup(&lookup));

        std::iter::from_fn(move || {
            let (internal_key, value) = decode_entry(*iter.key()?);
            let user_key = get_user_key(internal_key);
            if !has_prefix(user_key, prefix) {
                return None;
            }
            iter.next();
            Some((user_key, get_key_seq(internal_key), value))
        })
    }

    pub fn iter(&self) -> MemTableIter<'_, C> {
        MemTableIter::new(self)
    }

    /// Bytes claimed by the arena, readable while a writer is active.
    pub fn approximate_memory_usage(&self) -> usize {
        self.arena.memory_usage()
    }

    pub fn len(&self) -> usize {
        self.len.load(Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct MemTableIter<'a, C: Comparator> {
    iter: ListIter<'a, C>,
    scratch: BytesMut,
}

impl<'a, C> MemTableIter<'a, C>
where
    C: Comparator,
{
    pub fn new(table: &'a MemTable<C>) -> Self {
        Self {
            iter: table.list.iter(),
            scratch: BytesMut::new(),
        }
    }
}

impl<C: Comparator> Iter for MemTableIter<'_, C> {
    fn prev(&mut self) {
        self.iter.prev();
    }

    fn next(&mut self) {
        self.iter.next();
    }

    fn key(&self) -> Option<&[u8]> {
        self.iter.key().map(|e| unsafe { e.internal_key() })
    }

    fn value(&self) -> Option<&[u8]> {
        self.iter.key().map(|e| decode_entry(*e).1)
    }

    fn rewind(&mut self, from_last: bool) {
        match from_last {
            false => self.iter.seek_to_first(),
            true => self.iter.seek_to_last(),
        }
    }

    /// Positions at the first entry `>= key`, which must be an internal key.
    fn seek(&mut self, key: &[u8]) {
        assert!(
            key.len() >= SEQ_LEN,
            "seek target of {} bytes is not an internal key",
            key.len()
        );
        self.scratch.clear();
        put_varint32(&mut self.scratch, key.len() as u32);
        self.scratch.extend_from_slice(key);
        self.iter.seek(&EntryPtr::from_lookup(&self.scratch));
    }

    fn is_valid(&self) -> bool {
        self.iter.is_valid()
    }

    fn status(&mut self) -> Result<()> {
        Ok(())
    }
}
