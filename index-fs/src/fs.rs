//! # 文件系统门面
//!
//! [`FileSystem`] 持有块缓存、扇区分配器与打开表，没有任何全局状态。
//! 它的所有修改操作都要求`&mut self`，内核在外面套一把锁即可共享。

use alloc::sync::Arc;
use alloc::vec;

use block_dev::BlockDevice;
use vfs::{DirEntryType, Error, Stat};

use crate::block_cache::BlockCache;
use crate::directory::Dir;
use crate::inode::{Inode, InodeTable};
use crate::layout::DiskInode;
use crate::path::is_root;
use crate::{BLOCK_SIZE, FREE_MAP_SECTOR, FreeMap, ROOT_DIR_SECTOR, SectorAllocator};

/// 根目录初始可容纳的目录项数
const ROOT_DIR_ENTRIES: usize = 16;

pub struct FileSystem<A: SectorAllocator = FreeMap> {
    pub(crate) cache: BlockCache,
    pub(crate) allocator: A,
    pub(crate) inodes: InodeTable,
}

impl<A: SectorAllocator> FileSystem<A> {
    pub(crate) fn new(device: Arc<dyn BlockDevice>, allocator: A) -> Self {
        Self {
            cache: BlockCache::new(device),
            allocator,
            inodes: InodeTable::default(),
        }
    }

    /// 在设备上建立只含根目录的新文件系统。
    ///
    /// `allocator`须已预留 [`FREE_MAP_SECTOR`] 与 [`ROOT_DIR_SECTOR`]。
    pub fn format(device: Arc<dyn BlockDevice>, allocator: A) -> Result<Self, Error> {
        let mut fs = Self::new(device, allocator);

        fs.create_dir(ROOT_DIR_SECTOR, ROOT_DIR_ENTRIES)?;
        let root = fs.open_root();
        let dots = fs
            .add_entry(&root, ".", ROOT_DIR_SECTOR)
            .and_then(|()| fs.add_entry(&root, "..", ROOT_DIR_SECTOR));
        fs.close_dir(root);
        dots?;

        fs.cache.flush_all();
        log::info!("formatted, root directory at {ROOT_DIR_SECTOR:?}");
        Ok(fs)
    }

    /// 挂载已有的文件系统，`allocator`须反映设备上的实际占用
    pub fn mount(device: Arc<dyn BlockDevice>, allocator: A) -> Result<Self, Error> {
        let fs = Self::new(device, allocator);

        let mut root = DiskInode::zeroed();
        fs.cache.read(ROOT_DIR_SECTOR, root.as_bytes_mut());
        if !root.is_valid() || !root.is_dir() {
            log::error!("{ROOT_DIR_SECTOR:?} does not hold a root directory");
            return Err(Error::InvalidVolume);
        }

        log::info!("mounted");
        Ok(fs)
    }

    /// 写回全部脏块并交还分配器
    pub fn unmount(self) -> A {
        let Self {
            cache,
            allocator,
            inodes,
        } = self;

        if inodes.len() > 0 {
            log::warn!("unmounting with {} inode(s) still open", inodes.len());
        }
        cache.flush_all();
        log::info!("unmounted");
        allocator
    }

    #[inline]
    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    #[inline]
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// 打开表中不同 inode 的数目
    #[inline]
    pub fn open_inodes(&self) -> usize {
        self.inodes.len()
    }

    /// 按路径创建长为`size`字节的普通文件
    pub fn create(&mut self, cwd: Option<&Dir>, path: &str, size: usize) -> Result<(), Error> {
        let (dir, name, dir_suffix) = self.parse_path(cwd, path)?;
        let created = if dir_suffix {
            Err(Error::InvalidPath)
        } else {
            self.create_subfile(&dir, &name, size)
        };
        self.close_dir(dir);
        created
    }

    /// 按路径打开文件或目录的 inode
    pub fn open(&mut self, cwd: Option<&Dir>, path: &str) -> Result<Inode, Error> {
        if is_root(path) {
            return Ok(self.open_root().into_inode());
        }

        let (dir, name, dir_suffix) = self.parse_path(cwd, path)?;
        let opened = match self.lookup(&dir, &name) {
            None => Err(Error::NotFound),
            Some(inode) if dir_suffix && !self.is_dir(&inode) => {
                self.close_inode(inode);
                Err(Error::NotADirectory)
            }
            Some(inode) => Ok(inode),
        };
        self.close_dir(dir);
        opened
    }

    /// 删除文件，或是没有在别处打开的空目录
    pub fn remove(&mut self, cwd: Option<&Dir>, path: &str) -> Result<(), Error> {
        let (dir, name, dir_suffix) = self.parse_path(cwd, path)?;
        let removed = match self.delete_subdir(&dir, &name) {
            Err(Error::NotADirectory) if !dir_suffix => self.delete_subfile(&dir, &name),
            other => other,
        };
        self.close_dir(dir);
        removed
    }

    pub fn mkdir(&mut self, cwd: Option<&Dir>, path: &str) -> Result<(), Error> {
        let (dir, name, _) = self.parse_path(cwd, path)?;
        let created = self.create_subdir(&dir, &name);
        self.close_dir(dir);
        created
    }

    /// 打开路径所指的目录，作为新的工作目录
    pub fn chdir(&mut self, cwd: Option<&Dir>, path: &str) -> Result<Dir, Error> {
        if is_root(path) {
            return Ok(self.open_root());
        }

        let (dir, name, _) = self.parse_path(cwd, path)?;
        let opened = match self.lookup(&dir, &name) {
            None => Err(Error::NotFound),
            Some(inode) if self.is_dir(&inode) => Ok(self.open_dir(inode)),
            Some(inode) => {
                self.close_inode(inode);
                Err(Error::NotADirectory)
            }
        };
        self.close_dir(dir);
        opened
    }

    pub fn stat(&self, inode: &Inode) -> Stat {
        let size = self.length(inode);
        Stat {
            inode: u32::from(self.inumber(inode)) as u64,
            mode: if self.is_dir(inode) {
                DirEntryType::Directory
            } else {
                DirEntryType::Regular
            },
            block_size: BLOCK_SIZE as u64,
            blocks: size.div_ceil(BLOCK_SIZE) as u64,
            size: size as u64,
        }
    }
}

/// 空闲位图保存在 [`FREE_MAP_SECTOR`] 处 inode 所指的文件中
impl FileSystem<FreeMap> {
    /// 格式化`sectors`个扇区的设备，并写入空闲位图文件
    pub fn create_volume(device: Arc<dyn BlockDevice>, sectors: usize) -> Result<Self, Error> {
        let mut fs = Self::format(device, FreeMap::new(sectors))?;
        let byte_len = fs.allocator.byte_len();
        fs.create_inode(FREE_MAP_SECTOR, byte_len)?;
        fs.store_free_map()?;
        fs.cache.flush_all();
        Ok(fs)
    }

    /// 挂载设备并从空闲位图文件恢复分配状态
    pub fn open_volume(device: Arc<dyn BlockDevice>, sectors: usize) -> Result<Self, Error> {
        let mut fs = Self::mount(device, FreeMap::new(sectors))?;

        let inode = fs.open_inode(FREE_MAP_SECTOR);
        let mut bytes = vec![0; fs.allocator.byte_len()];
        let loaded = fs.length(&inode) == bytes.len()
            && fs.read_at(&inode, &mut bytes, 0) == bytes.len();
        fs.close_inode(inode);

        if !loaded {
            log::error!("free map file does not match a {sectors}-sector device");
            return Err(Error::InvalidVolume);
        }
        fs.allocator.load(&bytes);
        log::debug!("{} free sector(s)", fs.allocator.free_count());
        Ok(fs)
    }

    /// 写入空闲位图文件后卸载
    pub fn close_volume(mut self) -> Result<(), Error> {
        let stored = self.store_free_map();
        self.unmount();
        stored
    }

    fn store_free_map(&mut self) -> Result<(), Error> {
        let bytes = self.allocator.to_bytes();
        let inode = self.open_inode(FREE_MAP_SECTOR);
        let written = self.write_at(&inode, &bytes, 0);
        self.close_inode(inode);

        if written != bytes.len() {
            return Err(Error::NoSpace);
        }
        Ok(())
    }
}
