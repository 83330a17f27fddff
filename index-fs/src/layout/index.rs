//! 两级索引
//! - 一级索引表：整个块连续存储**扇区号**，每个都指向一张二级索引表
//! - 二级索引表：整个块连续存储**扇区号**，每个都指向一个**数据块**
//!
//! ## 字节偏移的编码
//!
//! ```text
//!   一级    二级    块内偏移
//! [22:16] [15:9]  [8:0]
//! ```

use core::{ptr, slice};

use crate::{BLOCK_SIZE, SectorId};

/// 索引表的表项数量
pub const TABLE_LEN: usize = BLOCK_SIZE / 4;
/// 单个文件的最大字节数
pub const MAX_FILE_SIZE: usize = TABLE_LEN * TABLE_LEN * BLOCK_SIZE;

const L2_SHIFT: u32 = BLOCK_SIZE.trailing_zeros();
const L1_SHIFT: u32 = L2_SHIFT + TABLE_LEN.trailing_zeros();

/// 磁盘上表示“未分配”的表项，不可能是合法扇区号
const UNALLOCATED: u32 = u32::MAX;

/// 索引表，占满一个扇区
#[derive(Debug, Clone)]
#[repr(transparent)]
pub struct IndexTable([u32; TABLE_LEN]);

impl IndexTable {
    /// 所有表项均未分配的索引表
    pub const fn empty() -> Self {
        Self([UNALLOCATED; TABLE_LEN])
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<SectorId> {
        let raw = self.0[index];
        (raw != UNALLOCATED).then_some(SectorId::new(raw))
    }

    #[inline]
    pub fn set(&mut self, index: usize, sector: Option<SectorId>) {
        self.0[index] = match sector {
            Some(sector) => {
                let raw = u32::from(sector);
                assert_ne!(raw, UNALLOCATED, "sector id collides with the unallocated marker");
                raw
            }
            None => UNALLOCATED,
        };
    }

    /// 所有已分配的表项
    pub fn allocated(&self) -> impl Iterator<Item = SectorId> + '_ {
        (0..TABLE_LEN).filter_map(|index| self.get(index))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), BLOCK_SIZE) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), BLOCK_SIZE) }
    }
}

/// 字节偏移在两级索引中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAddr {
    /// 一级索引表的表项
    pub l1: usize,
    /// 二级索引表的表项
    pub l2: usize,
    /// 数据块内的字节偏移
    pub offset: usize,
}

impl BlockAddr {
    /// 拆分字节偏移；超出最大文件长度则返回`None`
    pub const fn of(pos: usize) -> Option<Self> {
        if pos >= MAX_FILE_SIZE {
            return None;
        }

        Some(Self {
            l1: (pos >> L1_SHIFT) & (TABLE_LEN - 1),
            l2: (pos >> L2_SHIFT) & (TABLE_LEN - 1),
            offset: pos & (BLOCK_SIZE - 1),
        })
    }
}
