use core::{ptr, slice};

use enumflags2::{BitFlags, bitflags};

use crate::{BLOCK_SIZE, MAGIC, SectorId};

/// inode 的属性位
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeAttr {
    Directory = 0b0000_0001,
}

/// 磁盘上的 inode，恰好占满一个扇区
#[derive(Debug, Clone)]
#[repr(C)]
pub struct DiskInode {
    /// 一级索引表所在扇区
    table: u32,
    /// 文件字节数，不用usize是为了严控布局
    length: i32,
    /// 属性位，见 [`InodeAttr`]
    attr: u8,
    _reserved: [u8; 499],
    /// 魔数：用于校验 inode 合法性
    magic: u32,
}

const _: () = assert!(core::mem::size_of::<DiskInode>() == BLOCK_SIZE);

impl DiskInode {
    pub const fn zeroed() -> Self {
        Self {
            table: 0,
            length: 0,
            attr: 0,
            _reserved: [0; 499],
            magic: 0,
        }
    }

    #[inline]
    pub fn new(table: SectorId, length: usize) -> Self {
        let mut inode = Self::zeroed();
        inode.table = table.into();
        inode.magic = MAGIC;
        inode.set_length(length);
        inode
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    /// 一级索引表所在扇区
    #[inline]
    pub fn table(&self) -> SectorId {
        SectorId::new(self.table)
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.length.max(0) as usize
    }

    #[inline]
    pub fn set_length(&mut self, length: usize) {
        debug_assert!(length <= i32::MAX as usize);
        self.length = length as i32;
    }

    #[inline]
    pub fn attr(&self) -> BitFlags<InodeAttr> {
        BitFlags::from_bits_truncate(self.attr)
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.attr().contains(InodeAttr::Directory)
    }

    #[inline]
    pub fn set_dir(&mut self) {
        self.attr = (self.attr() | InodeAttr::Directory).bits();
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), BLOCK_SIZE) }
    }

    /// 所有字段都是整数，任意字节序列都是合法的 [`DiskInode`]
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), BLOCK_SIZE) }
    }
}
