#![no_std]

extern crate alloc;

/* index-fs 的整体架构，自上而下 */

// 文件系统门面：按路径创建、打开、删除
mod fs;

// 路径解析层：把路径拆成 (所在目录, 文件名, 是否以`/`结尾)
mod path;

// 目录层：目录即是内容为目录项的 inode
mod directory;

// 索引节点层：两级索引、按需扩展、共享的打开表
mod inode;

// 空闲扇区管理
mod free_map;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
mod layout;

// 块缓存层：内存上的磁盘块数据缓存
mod block_cache;

pub use self::{
    block_cache::{BlockCache, CacheStats},
    directory::Dir,
    free_map::{FreeMap, SectorAllocator},
    fs::FileSystem,
    inode::Inode,
    layout::{BlockAddr, MAX_FILE_SIZE},
    path::is_root,
};
pub use block_dev::BlockDevice;
pub use vfs::Error;

use derive_more::{From, Into};

pub const MAGIC: u32 = 0x494e_4f44;
pub const BLOCK_SIZE: usize = 512;
/// 块缓存的槽位数
pub const CACHE_CAPACITY: usize = 64;
/// 文件名的最大长度
pub const NAME_MAX: usize = 14;

/// 空闲位图文件的 inode 所在扇区
pub const FREE_MAP_SECTOR: SectorId = SectorId::new(0);
/// 根目录的 inode 所在扇区
pub const ROOT_DIR_SECTOR: SectorId = SectorId::new(1);

type DataBlock = [u8; BLOCK_SIZE];

/// 扇区号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct SectorId(u32);

impl SectorId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// 交给块设备使用的块ID
    #[inline]
    pub fn block(self) -> usize {
        self.0 as usize
    }
}
