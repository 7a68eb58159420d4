use std::{
    cell::UnsafeCell,
    cmp::Ordering::*,
    mem::{self, MaybeUninit},
    ptr::{self, NonNull, null_mut},
    sync::atomic::{AtomicPtr, AtomicUsize, Ordering::*},
};

use rand::{Rng, SeedableRng, rngs::SmallRng};

use crate::{
    arena::{ALIGN, Arena},
    comparator::Comparator,
    mem_allocator::MemAllocator,
};

pub const MAX_HEIGHT: usize = 12;

const BRANCHING: u32 = 4;
const RNG_SEED: u64 = 0xdeadbeef;

// Nodes are allocated with only `height` tower slots, so a `&Node` is never
// formed; everything goes through raw pointers and per-slot references.
#[repr(C)]
struct Node<K> {
    key: MaybeUninit<K>,
    tower: [AtomicPtr<Self>; MAX_HEIGHT],
}

impl<K> Node<K> {
    fn alloc_size(height: usize) -> usize {
        assert!(height > 0 && height <= MAX_HEIGHT);
        mem::size_of::<Self>() - mem::size_of::<AtomicPtr<Self>>() * (MAX_HEIGHT - height)
    }

    /// # Safety
    ///
    /// No other allocation from `allocator` may run concurrently.
    unsafe fn new_in(
        key: MaybeUninit<K>,
        height: usize,
        allocator: &impl MemAllocator,
    ) -> NonNull<Self> {
        let size = Self::alloc_size(height);
        let align = mem::align_of::<Self>();

        unsafe {
            let p = if align <= ALIGN {
                allocator.allocate_aligned(size)
            } else {
                // over-allocate and round up for keys aligned past the arena
                let p = allocator.allocate(size + align - 1);
                let offset = p.as_ptr().align_offset(align);
                debug_assert!(offset < align);
                p.add(offset)
            }
            .cast::<Self>();
            let raw = p.as_ptr();
            ptr::addr_of_mut!((*raw).key).write(key);
            let tower = ptr::addr_of_mut!((*raw).tower).cast::<AtomicPtr<Self>>();
            for level in 0..height {
                tower.add(level).write(AtomicPtr::new(null_mut()));
            }
            p
        }
    }

    /// # Safety
    ///
    /// `this` is a live node of height greater than `level`.
    unsafe fn slot<'a>(this: *mut Self, level: usize) -> &'a AtomicPtr<Self> {
        unsafe {
            &*ptr::addr_of!((*this).tower)
                .cast::<AtomicPtr<Self>>()
                .add(level)
        }
    }

    /// # Safety
    ///
    /// `this` is a live node other than the head.
    unsafe fn key<'a>(this: *mut Self) -> &'a K {
        unsafe { (*ptr::addr_of!((*this).key)).assume_init_ref() }
    }

    // Acquire so the returned node is observed fully initialized.
    unsafe fn next(this: *mut Self, level: usize) -> *mut Self {
        unsafe { Self::slot(this, level).load(Acquire) }
    }

    // Release so anyone reading through this pointer sees the initialized node.
    unsafe fn set_next(this: *mut Self, level: usize, node: *mut Self) {
        unsafe { Self::slot(this, level).store(node, Release) }
    }

    unsafe fn no_barrier_next(this: *mut Self, level: usize) -> *mut Self {
        unsafe { Self::slot(this, level).load(Relaxed) }
    }

    unsafe fn no_barrier_set_next(this: *mut Self, level: usize, node: *mut Self) {
        unsafe { Self::slot(this, level).store(node, Relaxed) }
    }
}

/// Sorted, insert-only skip list whose nodes live in an arena.
///
/// Any number of threads may call [`SkipList::contains`] or walk a
/// [`SkipListIter`] without locking while one thread inserts. Nodes are
/// never removed or moved, so references handed out by the list stay valid
/// until it is dropped.
pub struct SkipList<K, C, A> {
    head: NonNull<Node<K>>,
    // Only raised by the writer. Readers may see a stale, lower value.
    max_height: AtomicUsize,
    // Touched by the writer only.
    rng: UnsafeCell<SmallRng>,
    c: C,
    a: A,
}

unsafe impl<K, C, A> Send for SkipList<K, C, A>
where
    K: Send,
    C: Send,
    A: Send,
{
}

unsafe impl<K, C, A> Sync for SkipList<K, C, A>
where
    K: Send + Sync,
    C: Sync,
    A: Sync,
{
}

impl<K, C> Default for SkipList<K, C, Arena>
where
    C: Comparator<Item = K> + Default,
{
    fn default() -> Self {
        // a fresh arena has no other users
        unsafe { Self::new(C::default(), Arena::new()) }
    }
}

impl<K, C, A> SkipList<K, C, A>
where
    C: Comparator<Item = K>,
    A: MemAllocator,
{
    /// Creates an empty list, allocating its head from `a`.
    ///
    /// # Safety
    ///
    /// No other thread may allocate from the memory behind `a` while this
    /// runs. Lists sharing one arena must be built and written under the same
    /// single-writer discipline as [`SkipList::insert`].
    pub unsafe fn new(c: C, a: A) -> Self {
        let head = unsafe { Node::new_in(MaybeUninit::uninit(), MAX_HEIGHT, &a) };
        SkipList {
            head,
            max_height: AtomicUsize::new(1),
            rng: UnsafeCell::new(SmallRng::seed_from_u64(RNG_SEED)),
            c,
            a,
        }
    }

    /// Current height of the tallest tower, in `1..=MAX_HEIGHT`.
    pub fn height(&self) -> usize {
        self.max_height.load(Relaxed)
    }

    pub fn comparator(&self) -> &C {
        &self.c
    }

    pub fn mem_usage(&self) -> usize {
        self.a.mem_usage()
    }

    pub fn is_empty(&self) -> bool {
        unsafe { Node::next(self.head.as_ptr(), 0).is_null() }
    }

    /// Inserts `key` into the list. Nothing comparing equal to `key` may
    /// already be in the list; debug builds check this.
    ///
    /// # Safety
    ///
    /// Only one thread may be allocating from the list's memory at a time,
    /// whether through `insert` or another list sharing it. Readers may run
    /// concurrently.
    pub unsafe fn insert(&self, key: K) {
        let mut prev = [null_mut(); MAX_HEIGHT];
        let x = self.find_greater_or_equal(&key, Some(&mut prev));

        // duplicates are not allowed
        debug_assert!(x.is_null() || self.c.compare(&key, unsafe { Node::key(x) }) != Equal);

        let height = unsafe { self.random_height() };
        let max_height = self.height();
        if height > max_height {
            for p in prev.iter_mut().take(height).skip(max_height) {
                *p = self.head.as_ptr();
            }
            // A reader that sees the new height either finds null in the new
            // head slots and drops a level, or finds the node linked below.
            tracing::trace!(from = max_height, to = height, "skiplist: height grows");
            self.max_height.store(height, Relaxed);
        }

        let node = unsafe { Node::new_in(MaybeUninit::new(key), height, &self.a) }.as_ptr();
        for (level, &p) in prev.iter().enumerate().take(height) {
            unsafe {
                // not yet reachable, the publishing store below is the barrier
                Node::no_barrier_set_next(node, level, Node::no_barrier_next(p, level));
                Node::set_next(p, level, node);
            }
        }
    }

    /// Returns true iff an entry comparing equal to `key` is in the list.
    pub fn contains(&self, key: &K) -> bool {
        let x = self.find_greater_or_equal(key, None);
        !x.is_null() && self.c.compare(key, unsafe { Node::key(x) }) == Equal
    }

    pub fn iter(&self) -> SkipListIter<'_, K, C, A> {
        SkipListIter::new(self)
    }

    // [1, MAX_HEIGHT], P(height >= h) = (1 / BRANCHING)^(h - 1)
    unsafe fn random_height(&self) -> usize {
        let rng = unsafe { &mut *self.rng.get() };
        let mut height = 1;
        while height < MAX_HEIGHT && rng.random_range(0..BRANCHING) == 0 {
            height += 1;
        }
        height
    }

    // null sorts after every key
    fn key_is_after_node(&self, key: &K, n: *mut Node<K>) -> bool {
        !n.is_null() && self.c.compare(unsafe { Node::key(n) }, key) == Less
    }

    /// Returns the first node whose key is `>= key`, or null. When `prev` is
    /// given, fills `prev[level]` for every level below the current height.
    fn find_greater_or_equal(
        &self,
        key: &K,
        mut prev: Option<&mut [*mut Node<K>; MAX_HEIGHT]>,
    ) -> *mut Node<K> {
        let mut x = self.head.as_ptr();
        let mut level = self.height() - 1;
        loop {
            let next = unsafe { Node::next(x, level) };
            if self.key_is_after_node(key, next) {
                x = next;
                continue;
            }

            if let Some(prev) = prev.as_deref_mut() {
                prev[level] = x;
            }
            if level == 0 {
                return next;
            }
            level -= 1;
        }
    }

    /// Returns the last node whose key is `< key`, or the head.
    fn find_less_than(&self, key: &K) -> *mut Node<K> {
        let head = self.head.as_ptr();
        let mut x = head;
        let mut level = self.height() - 1;
        loop {
            debug_assert!(
                ptr::eq(x, head) || self.c.compare(unsafe { Node::key(x) }, key) == Less
            );
            let next = unsafe { Node::next(x, level) };
            if next.is_null() || self.c.compare(unsafe { Node::key(next) }, key) != Less {
                if level == 0 {
                    return x;
                }
                level -= 1;
            } else {
                x = next;
            }
        }
    }

    /// Returns the last node, or the head if the list is empty.
    fn find_last(&self) -> *mut Node<K> {
        let mut x = self.head.as_ptr();
        let mut level = self.height() - 1;
        loop {
            let next = unsafe { Node::next(x, level) };
            if next.is_null() {
                if level == 0 {
                    return x;
                }
                level -= 1;
            } else {
                x = next;
            }
        }
    }
}

impl<K, C, A> Drop for SkipList<K, C, A> {
    fn drop(&mut self) {
        // Node memory belongs to the allocator; only the keys need dropping.
        if !mem::needs_drop::<K>() {
            return;
        }
        unsafe {
            let mut cur = Node::next(self.head.as_ptr(), 0);
            while !cur.is_null() {
                let next = Node::next(cur, 0);
                (*ptr::addr_of_mut!((*cur).key)).assume_init_drop();
                cur = next;
            }
        }
    }
}

/// Cursor over a [`SkipList`]. Starts out invalid.
pub struct SkipListIter<'a, K, C, A> {
    list: &'a SkipList<K, C, A>,
    node: *mut Node<K>,
}

unsafe impl<K, C, A> Send for SkipListIter<'_, K, C, A> where SkipList<K, C, A>: Sync {}

unsafe impl<K, C, A> Sync for SkipListIter<'_, K, C, A> where SkipList<K, C, A>: Sync {}

impl<K, C, A> Clone for SkipListIter<'_, K, C, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, C, A> Copy for SkipListIter<'_, K, C, A> {}

impl<'a, K, C, A> SkipListIter<'a, K, C, A>
where
    C: Comparator<Item = K>,
    A: MemAllocator,
{
    pub fn new(list: &'a SkipList<K, C, A>) -> Self {
        SkipListIter {
            list,
            node: null_mut(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.node.is_null()
    }

    pub fn key(&self) -> Option<&'a K> {
        if self.is_valid() {
            Some(unsafe { Node::key(self.node) })
        } else {
            None
        }
    }

    pub fn next(&mut self) {
        assert!(self.is_valid());
        self.node = unsafe { Node::next(self.node, 0) };
    }

    /// Steps back by searching for the last key before the current one;
    /// nodes carry no back links.
    pub fn prev(&mut self) {
        assert!(self.is_valid());
        let node = self.list.find_less_than(unsafe { Node::key(self.node) });
        self.node = if ptr::eq(node, self.list.head.as_ptr()) {
            null_mut()
        } else {
            node
        };
    }

    /// Positions at the first key `>= target`.
    pub fn seek(&mut self, target: &K) {
        self.node = self.list.find_greater_or_equal(target, None);
    }

    pub fn seek_to_first(&mut self) {
        self.node = unsafe { Node::next(self.list.head.as_ptr(), 0) };
    }

    pub fn seek_to_last(&mut self) {
        let node = self.list.find_last();
        self.node = if ptr::eq(node, self.list.head.as_ptr()) {
            null_mut()
        } else {
            node
        };
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeSet,
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use itertools::Itertools;
    use rand::{Rng, SeedableRng, rngs::SmallRng};

    use crate::{arena::Arena, comparator::DefaultComparator};

    use super::{MAX_HEIGHT, SkipList};

    type U64List<'a> = SkipList<u64, DefaultComparator<u64>, &'a Arena>;

    fn new_list(arena: &Arena) -> U64List<'_> {
        // each test builds its lists from a single thread
        unsafe { SkipList::new(DefaultComparator::default(), arena) }
    }

    fn collect_forward(list: &U64List<'_>) -> Vec<u64> {
        let mut iter = list.iter();
        iter.seek_to_first();
        let mut keys = Vec::new();
        while let Some(k) = iter.key() {
            keys.push(*k);
            iter.next();
        }
        keys
    }

    #[test]
    fn test_empty_list() {
        let arena = Arena::new();
        let list = new_list(&arena);
        assert!(list.is_empty());
        assert!(!list.contains(&10));
        assert_eq!(list.height(), 1);

        let mut iter = list.iter();
        assert!(!iter.is_valid());
        iter.seek_to_first();
        assert!(!iter.is_valid());
        iter.seek(&100);
        assert!(!iter.is_valid());
        iter.seek_to_last();
        assert!(!iter.is_valid());
        assert!(iter.key().is_none());
    }

    #[test]
    fn test_head_allocated_from_arena() {
        let arena = Arena::new();
        let list = new_list(&arena);
        assert!(list.mem_usage() > 0);
        assert_eq!(list.mem_usage(), arena.memory_usage());
    }

    #[test]
    fn test_seek_positions() {
        let arena = Arena::new();
        let list = new_list(&arena);
        for k in [20, 10, 30] {
            unsafe { list.insert(k) };
        }

        let mut iter = list.iter();
        iter.seek(&15);
        assert_eq!(iter.key(), Some(&20));
        iter.seek(&35);
        assert!(!iter.is_valid());
        iter.seek(&5);
        assert_eq!(iter.key(), Some(&10));
        iter.seek(&30);
        assert_eq!(iter.key(), Some(&30));

        iter.seek_to_last();
        assert_eq!(iter.key(), Some(&30));
        iter.prev();
        assert_eq!(iter.key(), Some(&20));
        iter.prev();
        assert_eq!(iter.key(), Some(&10));
        iter.prev();
        assert!(!iter.is_valid());
    }

    #[test]
    fn test_iterator_is_copy() {
        let arena = Arena::new();
        let list = new_list(&arena);
        for k in 0..10 {
            unsafe { list.insert(k) };
        }

        let mut a = list.iter();
        a.seek(&4);
        let mut b = a;
        b.next();
        assert_eq!(a.key(), Some(&4));
        assert_eq!(b.key(), Some(&5));
    }

    #[test]
    fn test_insert_and_lookup() {
        const N: usize = 2000;
        const R: u64 = 5000;

        let arena = Arena::new();
        let list = new_list(&arena);
        let mut rng = SmallRng::seed_from_u64(1000);
        let mut keys = BTreeSet::new();

        for _ in 0..N {
            let key = rng.random_range(0..R);
            if keys.insert(key) {
                unsafe { list.insert(key) };
            }
        }

        for i in 0..R {
            assert_eq!(list.contains(&i), keys.contains(&i), "key {i}");
        }

        let forward = collect_forward(&list);
        assert!(forward.iter().tuple_windows().all(|(a, b)| a < b));
        assert_eq!(forward, keys.iter().copied().collect_vec());

        // seek lands on the smallest key >= target
        let mut iter = list.iter();
        for target in 0..R {
            iter.seek(&target);
            assert_eq!(iter.key(), keys.range(target..).next());
        }

        // backward walk mirrors the forward one
        iter.seek_to_last();
        for expected in keys.iter().rev() {
            assert_eq!(iter.key(), Some(expected));
            iter.prev();
        }
        assert!(!iter.is_valid());

        assert!(list.height() > 1);
        assert!(list.height() <= MAX_HEIGHT);
    }

    #[test]
    fn test_ascending_and_descending_inserts() {
        const N: u64 = 100_000;

        let arena = Arena::new();
        let list = new_list(&arena);
        for i in (0..N).rev() {
            unsafe { list.insert(i * 2) };
        }
        for i in 0..N {
            unsafe { list.insert(i * 2 + 1) };
        }

        let forward = collect_forward(&list);
        assert_eq!(forward.len() as u64, 2 * N);
        assert!(forward.iter().enumerate().all(|(i, k)| *k == i as u64));
    }

    #[test]
    fn test_random_height_distribution() {
        const DRAWS: usize = 1_000_000;

        let arena = Arena::new();
        let list = new_list(&arena);
        let mut counts = [0usize; MAX_HEIGHT + 1];
        for _ in 0..DRAWS {
            let h = unsafe { list.random_height() };
            assert!((1..=MAX_HEIGHT).contains(&h));
            counts[h] += 1;
        }

        // P(height >= h) = (1/4)^(h-1)
        for h in 1..=5 {
            let at_least = counts[h..].iter().sum::<usize>() as f64 / DRAWS as f64;
            let expected = 0.25f64.powi(h as i32 - 1);
            assert!(
                (at_least - expected).abs() < expected * 0.05,
                "height {h}: {at_least} vs {expected}"
            );
        }
    }

    #[test]
    fn test_keys_dropped_with_list() {
        static DROP_COUNTER: AtomicUsize = AtomicUsize::new(0);

        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
        struct DropItem {
            key: String,
        }

        impl DropItem {
            fn new(key: usize) -> Self {
                DROP_COUNTER.fetch_add(1, Ordering::SeqCst);
                Self {
                    key: format!("key-{key:05}"),
                }
            }
        }

        impl Drop for DropItem {
            fn drop(&mut self) {
                DROP_COUNTER.fetch_sub(1, Ordering::SeqCst);
            }
        }

        let arena = Arena::new();
        let list = unsafe { SkipList::new(DefaultComparator::default(), &arena) };
        for i in 0..100 {
            unsafe { list.insert(DropItem::new(i)) };
        }
        assert_eq!(DROP_COUNTER.load(Ordering::SeqCst), 100);

        let needle = DropItem::new(42);
        assert!(list.contains(&needle));
        drop(needle);

        drop(list);
        assert_eq!(DROP_COUNTER.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_owned_arena() {
        let list: SkipList<u64, DefaultComparator<u64>, Arena> = SkipList::default();
        for k in (0..1000).rev() {
            unsafe { list.insert(k) };
        }
        assert!(list.contains(&999));
        assert!(list.mem_usage() > 1000 * std::mem::size_of::<u64>());
    }

    #[test]
    fn test_concurrent_read_during_write() {
        const N: u64 = 50_000;
        const READERS: usize = 4;

        let arena = Arena::new();
        let list = new_list(&arena);
        let written = AtomicUsize::new(0);
        let done = AtomicBool::new(false);

        crossbeam::scope(|s| {
            for r in 0..READERS {
                let list = &list;
                let written = &written;
                let done = &done;
                s.spawn(move |_| {
                    let mut rng = SmallRng::seed_from_u64(r as u64);
                    while !done.load(Ordering::Acquire) {
                        let w = written.load(Ordering::Acquire) as u64;
                        if w > 0 {
                            // everything fully inserted is visible
                            let k = rng.random_range(0..w);
                            assert!(list.contains(&k), "key {k} of {w} missing");
                        }
                        assert!(!list.contains(&(N + 1)));

                        // a fresh walk is ordered and sees at least the w first keys
                        let mut iter = list.iter();
                        iter.seek_to_first();
                        let mut expected = 0;
                        while let Some(&k) = iter.key() {
                            assert_eq!(k, expected);
                            expected += 1;
                            iter.next();
                        }
                        assert!(expected >= w);
                    }
                });
            }

            s.spawn(|_| {
                for k in 0..N {
                    unsafe { list.insert(k) };
                    written.store(k as usize + 1, Ordering::Release);
                }
                done.store(true, Ordering::Release);
            });
        })
        .unwrap();

        assert_eq!(collect_forward(&list).len() as u64, N);
    }

    #[test]
    fn test_concurrent_random_inserts() {
        const N: usize = 20_000;

        let arena = Arena::new();
        let list = new_list(&arena);
        let mut rng = SmallRng::seed_from_u64(7);
        let keys: Vec<u64> = (0..N as u64 * 4).step_by(4).collect();
        let mut shuffled = keys.clone();
        for i in (1..shuffled.len()).rev() {
            shuffled.swap(i, rng.random_range(0..=i));
        }
        let done = AtomicBool::new(false);

        crossbeam::scope(|s| {
            for _ in 0..3 {
                s.spawn(|_| {
                    while !done.load(Ordering::Acquire) {
                        let mut iter = list.iter();
                        iter.seek_to_last();
                        let mut prev: Option<u64> = None;
                        while let Some(&k) = iter.key() {
                            assert_eq!(k % 4, 0);
                            if let Some(p) = prev {
                                assert!(k < p);
                            }
                            prev = Some(k);
                            iter.prev();
                        }
                    }
                });
            }

            s.spawn(|_| {
                for &k in &shuffled {
                    unsafe { list.insert(k) };
                }
                done.store(true, Ordering::Release);
            });
        })
        .unwrap();

        assert_eq!(collect_forward(&list), keys);
    }

    #[test]
    fn test_lists_sharing_an_arena() {
        const THREADS: u64 = 4;
        const LISTS: u64 = 500;

        let arena = Arena::with_block_size(1024);
        // serializes every allocation from the shared arena
        let writer = std::sync::Mutex::new(());

        let built: Vec<Vec<U64List>> = crossbeam::scope(|s| {
            let handles = (0..THREADS)
                .map(|t| {
                    let (arena, writer) = (&arena, &writer);
                    s.spawn(move |_| {
                        (0..LISTS)
                            .map(|i| {
                                let _guard = writer.lock().unwrap();
                                let list = new_list(arena);
                                for k in 0..8 {
                                    unsafe { list.insert(t * 1_000_000 + i * 8 + k) };
                                }
                                list
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect_vec();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
        .unwrap();

        for (t, lists) in built.iter().enumerate() {
            for (i, list) in lists.iter().enumerate() {
                let base = t as u64 * 1_000_000 + i as u64 * 8;
                assert_eq!(collect_forward(list), (base..base + 8).collect_vec());
            }
        }
    }

    #[test]
    fn test_over_aligned_keys() {
        let arena = Arena::new();
        let list: SkipList<u128, DefaultComparator<u128>, &Arena> =
            unsafe { SkipList::new(DefaultComparator::default(), &arena) };

        let keys = (0..2000u128).map(|i| (i * 7919) % 2000 << 64 | i).collect_vec();
        for &k in &keys {
            // odd sizes keep the bump pointer off 16-byte boundaries
            unsafe { arena.allocate(3) };
            unsafe { list.insert(k) };
        }

        let mut iter = list.iter();
        iter.seek_to_first();
        let mut walked = Vec::new();
        while let Some(k) = iter.key() {
            assert!((k as *const u128).is_aligned());
            walked.push(*k);
            iter.next();
        }
        assert_eq!(walked, keys.iter().copied().sorted().collect_vec());
        assert!(list.contains(&(1999u128 * 7919 % 2000 << 64 | 1999)));
        assert!(!list.contains(&u128::MAX));
    }
}
