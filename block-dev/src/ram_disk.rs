use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::BlockDevice;

/// 内存盘的块大小
const SECTOR_SIZE: usize = 512;

/// 以内存模拟的块设备，并统计实际发生的读写次数。
#[derive(Debug)]
pub struct RamDisk {
    blocks: Mutex<Vec<[u8; SECTOR_SIZE]>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    /// 创建拥有`sectors`个全零块的内存盘
    pub fn new(sectors: usize) -> Self {
        Self {
            blocks: Mutex::new(vec![[0; SECTOR_SIZE]; sectors]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn sectors(&self) -> usize {
        self.blocks.lock().len()
    }

    /// 绕过任何缓存，直接取出块的内容
    pub fn snapshot(&self, block_id: usize) -> [u8; SECTOR_SIZE] {
        self.blocks.lock()[block_id]
    }

    /// 绕过任何缓存，直接改写块的内容
    pub fn poke(&self, block_id: usize, data: &[u8]) {
        self.blocks.lock()[block_id].copy_from_slice(data);
    }

    /// 设备被读的次数
    #[inline]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// 设备被写的次数
    #[inline]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE, "not a complete block!");
        buf.copy_from_slice(&self.blocks.lock()[block_id]);
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE, "not a complete block!");
        self.blocks.lock()[block_id].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}
