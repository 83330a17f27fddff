//! # 空闲扇区管理
//!
//! 文件系统只通过 [`SectorAllocator`] 申请与归还扇区；
//! [`FreeMap`] 是它的位图实现，位图本身作为普通文件保存在 0 号扇区的 inode 之下。

use alloc::vec;
use alloc::vec::Vec;

use crate::{FREE_MAP_SECTOR, ROOT_DIR_SECTOR, SectorId};

/// 扇区分配器
pub trait SectorAllocator {
    /// 分配连续`count`个扇区，返回首个扇区；空间不足时返回空
    fn allocate(&mut self, count: usize) -> Option<SectorId>;

    /// 归还从`sector`开始的连续`count`个扇区
    fn release(&mut self, sector: SectorId, count: usize);
}

/// 位图组，每一位指示一个扇区是否已被占用
type Group = u64;
const GROUP_BITS: usize = Group::BITS as usize;

/// 空闲位图
#[derive(Debug, Clone)]
pub struct FreeMap {
    groups: Vec<Group>,
    /// 位图所指示的扇区总数
    sectors: usize,
}

impl FreeMap {
    /// 新建位图，预留空闲位图文件与根目录的 inode 扇区
    pub fn new(sectors: usize) -> Self {
        assert!(sectors > ROOT_DIR_SECTOR.block(), "device is too small");

        let mut free_map = Self {
            groups: vec![0; sectors.div_ceil(GROUP_BITS)],
            sectors,
        };
        free_map.seal_tail();
        free_map.mark(FREE_MAP_SECTOR.block(), true);
        free_map.mark(ROOT_DIR_SECTOR.block(), true);
        free_map
    }

    /// 位图所指示的扇区总数
    #[inline]
    pub fn capacity(&self) -> usize {
        self.sectors
    }

    /// 尚未分配的扇区数
    pub fn free_count(&self) -> usize {
        self.groups
            .iter()
            .map(|group| group.count_zeros() as usize)
            .sum()
    }

    #[inline]
    pub fn is_used(&self, sector: SectorId) -> bool {
        let (group, bit) = Self::locate(sector.block());
        self.groups[group] & (1 << bit) != 0
    }

    /// 位图持久化后的字节数
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.sectors.div_ceil(8)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = self
            .groups
            .iter()
            .flat_map(|group| group.to_le_bytes())
            .collect();
        bytes.truncate(self.byte_len());
        bytes
    }

    /// 以持久化的位图覆盖当前状态
    pub fn load(&mut self, bytes: &[u8]) {
        assert_eq!(bytes.len(), self.byte_len(), "free map size mismatch");

        for (group, chunk) in self.groups.iter_mut().zip(bytes.chunks(GROUP_BITS / 8)) {
            let mut raw = [0; GROUP_BITS / 8];
            raw[..chunk.len()].copy_from_slice(chunk);
            *group = Group::from_le_bytes(raw);
        }
        self.seal_tail();
    }
}

impl FreeMap {
    /// 扇区号 -> (组索引, 组内索引)
    #[inline]
    fn locate(sector: usize) -> (usize, usize) {
        (sector / GROUP_BITS, sector % GROUP_BITS)
    }

    fn mark(&mut self, sector: usize, used: bool) {
        let (group, bit) = Self::locate(sector);
        if used {
            self.groups[group] |= 1 << bit;
        } else {
            self.groups[group] &= !(1 << bit);
        }
    }

    /// 末组中超出扇区总数的位恒为占用，分配时就不会越界
    fn seal_tail(&mut self) {
        let used_bits = self.sectors % GROUP_BITS;
        if used_bits != 0 {
            if let Some(last) = self.groups.last_mut() {
                *last |= Group::MAX << used_bits;
            }
        }
    }

    /// 首次适配：寻找连续`count`个空闲扇区的起点
    fn find_run(&self, count: usize) -> Option<usize> {
        let mut start = 0;
        let mut len = 0;
        for sector in 0..self.sectors {
            let (group, bit) = Self::locate(sector);
            if self.groups[group] & (1 << bit) != 0 {
                len = 0;
                start = sector + 1;
            } else {
                len += 1;
                if len == count {
                    return Some(start);
                }
            }
        }
        None
    }
}

impl SectorAllocator for FreeMap {
    fn allocate(&mut self, count: usize) -> Option<SectorId> {
        if count == 0 {
            return None;
        }

        let start = if count == 1 {
            // 单个扇区：直接找还有 0 的位图组
            self.groups
                .iter()
                .enumerate()
                .find_map(|(group, &bits)| {
                    (bits != Group::MAX)
                        .then_some(group * GROUP_BITS + bits.trailing_ones() as usize)
                })
        } else {
            self.find_run(count)
        };

        let Some(start) = start else {
            log::warn!("free map exhausted: cannot allocate {count} sector(s)");
            return None;
        };

        for sector in start..start + count {
            self.mark(sector, true);
        }
        Some(SectorId::new(start as u32))
    }

    fn release(&mut self, sector: SectorId, count: usize) {
        let start = sector.block();
        for sector in start..start + count {
            // 编号一定得有对应的位
            let (group, bit) = Self::locate(sector);
            assert_ne!(self.groups[group] & (1 << bit), 0, "double release of sector {sector}");
            self.mark(sector, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserves_system_sectors() {
        let free_map = FreeMap::new(100);
        assert!(free_map.is_used(FREE_MAP_SECTOR));
        assert!(free_map.is_used(ROOT_DIR_SECTOR));
        assert_eq!(98, free_map.free_count());
        assert_eq!(13, free_map.byte_len());
    }

    #[test]
    fn allocate_until_exhausted() {
        let mut free_map = FreeMap::new(70);
        let sectors: Vec<_> = (0..68).map_while(|_| free_map.allocate(1)).collect();

        assert_eq!(68, sectors.len());
        assert_eq!(SectorId::new(2), sectors[0]);
        assert_eq!(SectorId::new(69), sectors[67]);
        assert_eq!(None, free_map.allocate(1));
        assert_eq!(0, free_map.free_count());

        free_map.release(SectorId::new(40), 1);
        assert_eq!(Some(SectorId::new(40)), free_map.allocate(1));
    }

    #[test]
    fn contiguous_runs() {
        let mut free_map = FreeMap::new(64);
        assert_eq!(Some(SectorId::new(2)), free_map.allocate(3));
        free_map.release(SectorId::new(3), 1);

        // 空洞只有一个扇区，放不下两个
        assert_eq!(Some(SectorId::new(5)), free_map.allocate(2));
        assert_eq!(Some(SectorId::new(3)), free_map.allocate(1));
    }

    #[test]
    #[should_panic]
    fn double_release() {
        let mut free_map = FreeMap::new(64);
        let sector = free_map.allocate(1).unwrap();
        free_map.release(sector, 1);
        free_map.release(sector, 1);
    }

    #[test]
    fn persist_and_load() {
        let mut free_map = FreeMap::new(100);
        for _ in 0..10 {
            free_map.allocate(1);
        }
        free_map.release(SectorId::new(5), 1);

        let bytes = free_map.to_bytes();
        assert_eq!(free_map.byte_len(), bytes.len());

        let mut loaded = FreeMap::new(100);
        loaded.load(&bytes);
        assert_eq!(free_map.free_count(), loaded.free_count());
        assert!(!loaded.is_used(SectorId::new(5)));
        assert!(loaded.is_used(SectorId::new(11)));
        assert!(!loaded.is_used(SectorId::new(12)));
    }
}
