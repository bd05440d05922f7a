//! Block metadata - prefixed before every runtime allocation

/// Block header (16 bytes)
///
/// Keeps the block 16-byte aligned and remembers the requested size so
/// `mem_free` can rebuild the layout.
#[repr(C, align(16))]
pub struct BlockHeader {
    size: usize,
    magic: usize,
}

impl BlockHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    const LIVE: usize = 0x5AFE_B10C;
    const FREED: usize = 0xDEAD_B10C;

    #[inline]
    pub const fn new(size: usize) -> Self {
        Self {
            size,
            magic: Self::LIVE,
        }
    }

    /// Get header from block pointer
    ///
    /// # Safety
    /// `ptr` must point just past a `BlockHeader`.
    #[inline]
    pub unsafe fn from_block(ptr: *mut u8) -> *mut Self {
        ptr.sub(Self::SIZE) as *mut Self
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.magic == Self::LIVE
    }

    #[inline]
    pub fn poison(&mut self) {
        self.magic = Self::FREED;
    }
}
