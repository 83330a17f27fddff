//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟缓冲区，
//! 把即将操作的块复制到内存中，提高对块设备的操作效率。
//!
//! 块缓存层对使用者来说是透明的，使用者对块设备的操作都经过块缓存层。
//! 缓冲池的槽位数量固定，写入只标记脏块，脏块在被替换或 [`BlockCache::flush_all`] 时才写回。
//!
//! 替换策略为时钟（二次机会）算法：指针循环扫过槽位，
//! 近期被访问过的槽位清除访问标记后跳过，第一个未被访问过的槽位即为牺牲者。

use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use spin::Mutex;

use crate::{BLOCK_SIZE, CACHE_CAPACITY, DataBlock, SectorId};

/// 块缓存，所有操作都持有同一把锁
pub struct BlockCache {
    device: Arc<dyn BlockDevice>,
    pool: Mutex<Pool>,
}

/// 缓存的运行统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    /// 被替换出去的已占用槽位数
    pub evictions: usize,
    /// 写回设备的次数
    pub write_backs: usize,
}

struct Pool {
    slots: Vec<Slot>,
    /// 时钟指针，指向上一次选中的槽位
    hand: usize,
    stats: CacheStats,
}

/// 内存中的块缓存槽位
struct Slot {
    /// 缓存的数据
    data: DataBlock,
    /// 对应的扇区，`None`表示槽位空闲
    sector: Option<SectorId>,
    /// 近期是否被访问过
    recent: bool,
    /// 是否为脏块
    dirty: bool,
}

impl BlockCache {
    #[inline]
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self::with_capacity(device, CACHE_CAPACITY)
    }

    pub fn with_capacity(device: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        assert!(capacity > 0, "block cache needs at least one slot");

        let slots = (0..capacity)
            .map(|_| Slot {
                data: [0; BLOCK_SIZE],
                sector: None,
                recent: false,
                dirty: false,
            })
            .collect();

        Self {
            device,
            pool: Mutex::new(Pool {
                slots,
                // 第一次前进后指向 0 号槽位
                hand: capacity - 1,
                stats: CacheStats::default(),
            }),
        }
    }

    /// 把扇区的当前内容复制到`buf`
    pub fn read(&self, sector: SectorId, buf: &mut [u8]) {
        assert_eq!(buf.len(), BLOCK_SIZE, "not a complete block!");
        let mut pool = self.pool.lock();

        let index = match pool.find(sector) {
            Some(index) => index,
            None => {
                let index = pool.victim(self.device.as_ref());
                let slot = &mut pool.slots[index];
                self.device.read_block(sector.block(), &mut slot.data);
                slot.sector = Some(sector);
                index
            }
        };

        let slot = &mut pool.slots[index];
        slot.recent = true;
        buf.copy_from_slice(&slot.data);
    }

    /// 用`buf`替换扇区的缓存内容，并标记为脏块
    pub fn write(&self, sector: SectorId, buf: &[u8]) {
        assert_eq!(buf.len(), BLOCK_SIZE, "not a complete block!");
        let mut pool = self.pool.lock();

        // 整块覆盖，未命中时无需先从设备读入
        let index = match pool.find(sector) {
            Some(index) => index,
            None => {
                let index = pool.victim(self.device.as_ref());
                pool.slots[index].sector = Some(sector);
                index
            }
        };

        let slot = &mut pool.slots[index];
        slot.recent = true;
        slot.dirty = true;
        slot.data.copy_from_slice(buf);
    }

    /// 写回所有脏块
    pub fn flush_all(&self) {
        let mut pool = self.pool.lock();
        let Pool { slots, stats, .. } = &mut *pool;

        for slot in slots.iter_mut().filter(|slot| slot.dirty) {
            if let Some(sector) = slot.sector {
                self.device.write_block(sector.block(), &slot.data);
                slot.dirty = false;
                stats.write_backs += 1;
            }
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.pool.lock().slots.len()
    }

    #[inline]
    pub fn stats(&self) -> CacheStats {
        self.pool.lock().stats
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        self.flush_all();
    }
}

impl Pool {
    fn find(&mut self, sector: SectorId) -> Option<usize> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.sector == Some(sector));

        match index {
            Some(_) => {
                self.stats.hits += 1;
                log::trace!("cache hit: {sector:?}");
            }
            None => {
                self.stats.misses += 1;
                log::trace!("cache miss: {sector:?}");
            }
        }

        index
    }

    /// 时钟算法选出一个可用槽位；若其中是脏块则先写回。
    /// 返回的槽位已处于空闲状态。
    fn victim(&mut self, device: &dyn BlockDevice) -> usize {
        // 至多转一圈就能清空所有访问标记，循环必然终止
        loop {
            self.hand = (self.hand + 1) % self.slots.len();
            let slot = &mut self.slots[self.hand];
            if slot.sector.is_some() && slot.recent {
                slot.recent = false;
            } else {
                break;
            }
        }

        let slot = &mut self.slots[self.hand];
        if let Some(sector) = slot.sector.take() {
            self.stats.evictions += 1;
            if slot.dirty {
                log::debug!("write back {sector:?} before eviction");
                device.write_block(sector.block(), &slot.data);
                slot.dirty = false;
                self.stats.write_backs += 1;
            } else {
                log::debug!("evict {sector:?}");
            }
        }

        self.hand
    }
}
