use std::fmt;

/// Value of a Block1 or Block2 option: `num << 4 | more << 3 | szx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo(pub u32);

impl BlockInfo {
    const MORE_FLAG: u32 = 0b1000;

    /// Largest block number that fits the 20-bit field.
    pub const NUM_MAX: u32 = (1 << 20) - 1;

    /// Largest valid size exponent (1024 bytes). 7 is reserved.
    pub const SZX_MAX: u8 = 6;

    pub fn new(num: u32, more: bool, szx: u8) -> Option<BlockInfo> {
        if num > Self::NUM_MAX || szx > Self::SZX_MAX {
            return None;
        }
        Some(BlockInfo((num << 4) | ((more as u32) << 3) | szx as u32))
    }

    /// Build from a block size in bytes, which must be a power of two in
    /// 16..=1024.
    pub fn with_size(num: u32, more: bool, size: usize) -> Option<BlockInfo> {
        if !size.is_power_of_two() || !(16..=1024).contains(&size) {
            return None;
        }
        let szx = (size.trailing_zeros() - 4) as u8;
        Self::new(num, more, szx)
    }

    pub fn num(&self) -> u32 {
        self.0 >> 4
    }

    pub fn more(&self) -> bool {
        self.0 & Self::MORE_FLAG != 0
    }

    pub fn szx(&self) -> u8 {
        (self.0 & 0b111) as u8
    }

    /// Block size in bytes, `16 << szx`.
    pub fn size(&self) -> usize {
        16 << (self.0 & 0b111)
    }

    /// Byte offset of this block in the whole body.
    pub fn offset(&self) -> usize {
        self.num() as usize * self.size()
    }

    pub fn is_valid(&self) -> bool {
        self.szx() <= Self::SZX_MAX && self.num() <= Self::NUM_MAX
    }
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.num(), self.more() as u8, self.size())
    }
}
