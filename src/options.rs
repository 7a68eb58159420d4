use memdb_skiplist::arena::{ALIGN, DEFAULT_BLOCK_SIZE};

use crate::error::{Error, Result};

pub const MIN_ARENA_BLOCK_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct MemTableOptions {
    pub(crate) arena_block_size: usize,
}

impl Default for MemTableOptions {
    fn default() -> Self {
        Self {
            arena_block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl MemTableOptions {
    pub fn arena_block_size(&self) -> usize {
        self.arena_block_size
    }
}

#[derive(Debug)]
pub struct MemTableOpenOptions {
    arena_block_size: usize,
}

impl Default for MemTableOpenOptions {
    fn default() -> Self {
        Self {
            arena_block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl MemTableOpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the standard arena block. Requests larger than a quarter of it
    /// get a block of their own.
    pub fn arena_block_size(&mut self, size: usize) -> &mut Self {
        self.arena_block_size = size;
        self
    }

    pub fn build(&self) -> Result<MemTableOptions> {
        if self.arena_block_size < MIN_ARENA_BLOCK_SIZE {
            return Err(Error::InvalidArgument(format!(
                "arena block size {} is below the minimum of {MIN_ARENA_BLOCK_SIZE}",
                self.arena_block_size
            )));
        }
        if self.arena_block_size % ALIGN != 0 {
            return Err(Error::InvalidArgument(format!(
                "arena block size {} is not a multiple of {ALIGN}",
                self.arena_block_size
            )));
        }

        Ok(MemTableOptions {
            arena_block_size: self.arena_block_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let opts = MemTableOpenOptions::new().build().unwrap();
        assert_eq!(opts.arena_block_size(), DEFAULT_BLOCK_SIZE);
        assert_eq!(MemTableOptions::default().arena_block_size(), DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn custom_block_size() {
        let opts = MemTableOpenOptions::new()
            .arena_block_size(1 << 16)
            .build()
            .unwrap();
        assert_eq!(opts.arena_block_size(), 1 << 16);
    }

    #[test]
    fn invalid_block_size() {
        for size in [0, 8, MIN_ARENA_BLOCK_SIZE - ALIGN, 4097] {
            let err = MemTableOpenOptions::new()
                .arena_block_size(size)
                .build()
                .unwrap_err();
            assert!(err.is_invalid_argument(), "size {size}: {err}");
        }
    }
}
