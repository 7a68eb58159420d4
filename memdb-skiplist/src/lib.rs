pub mod arena;
pub mod comparator;
pub mod mem_allocator;
pub mod skip_list;

pub mod prelude {
    pub use crate::arena::{ALIGN, Arena, DEFAULT_BLOCK_SIZE};
    pub use crate::comparator::{Comparator, DefaultComparator};
    pub use crate::mem_allocator::MemAllocator;
    pub use crate::skip_list::{MAX_HEIGHT, SkipList, SkipListIter};
}
