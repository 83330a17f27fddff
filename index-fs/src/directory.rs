//! # 目录层
//!
//! 目录是带有目录标记的 inode，内容为一串定长的 [`DirEntry`]。
//! 每个目录都含有指向自己的`.`与指向父目录的`..`，列举目录时跳过它们。

use alloc::string::String;

use vfs::{DirEntryType, Error};

use crate::inode::Inode;
use crate::layout::DirEntry;
use crate::{FileSystem, ROOT_DIR_SECTOR, SectorAllocator, SectorId};

/// 已打开的目录，持有目录 inode 与列举游标
#[derive(Debug)]
#[must_use]
pub struct Dir {
    inode: Inode,
    /// 列举游标，字节偏移
    pos: usize,
}

impl Dir {
    #[inline]
    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    /// 放弃目录身份，交出 inode 的所有权
    #[inline]
    pub fn into_inode(self) -> Inode {
        self.inode
    }
}

fn is_dot(name: &str) -> bool {
    name == "." || name == ".."
}

impl<A: SectorAllocator> FileSystem<A> {
    /// 在`sector`处建立可容纳`entry_count`项的目录
    pub fn create_dir(&mut self, sector: SectorId, entry_count: usize) -> Result<(), Error> {
        self.create_inode(sector, entry_count * DirEntry::SIZE)?;
        let inode = self.open_inode(sector);
        self.set_dir(&inode);
        self.close_inode(inode);
        Ok(())
    }

    #[inline]
    pub fn open_dir(&mut self, inode: Inode) -> Dir {
        Dir { inode, pos: 0 }
    }

    #[inline]
    pub fn open_root(&mut self) -> Dir {
        let inode = self.open_inode(ROOT_DIR_SECTOR);
        self.open_dir(inode)
    }

    /// 重新打开同一目录，新句柄的游标从头开始
    pub fn reopen_dir(&mut self, dir: &Dir) -> Dir {
        let inode = self.reopen(&dir.inode);
        self.open_dir(inode)
    }

    #[inline]
    pub fn close_dir(&mut self, dir: Dir) {
        self.close_inode(dir.inode);
    }

    /// 按名字查找目录项并打开对应的 inode
    pub fn lookup(&mut self, dir: &Dir, name: &str) -> Option<Inode> {
        let (entry, _) = self.find_entry(dir, name)?;
        Some(self.open_inode(entry.inode_sector()))
    }

    /// 添加目录项，优先复用空闲槽位，否则追加到末尾
    pub fn add_entry(&mut self, dir: &Dir, name: &str, sector: SectorId) -> Result<(), Error> {
        DirEntry::check_name(name)?;
        if self.find_entry(dir, name).is_some() {
            return Err(Error::AlreadyExists);
        }

        let mut entry = DirEntry::default();
        let mut offset = 0;
        while self.read_at(&dir.inode, entry.as_bytes_mut(), offset) == DirEntry::SIZE {
            if !entry.in_use() {
                break;
            }
            offset += DirEntry::SIZE;
        }

        let entry = DirEntry::new(name, sector);
        if self.write_at(&dir.inode, entry.as_bytes(), offset) != DirEntry::SIZE {
            return Err(Error::NoSpace);
        }
        Ok(())
    }

    /// 清除目录项，并把对应的 inode 标记为删除
    pub fn remove_entry(&mut self, dir: &Dir, name: &str) -> Result<(), Error> {
        let (mut entry, offset) = self.find_entry(dir, name).ok_or(Error::NotFound)?;
        let inode = self.open_inode(entry.inode_sector());

        entry.release();
        // 槽位早已分配，只有目录被拒绝写入时才会写不进去
        let cleared = self.write_at(&dir.inode, entry.as_bytes(), offset) == DirEntry::SIZE;
        if cleared {
            self.remove_inode(&inode);
        }
        self.close_inode(inode);
        if cleared { Ok(()) } else { Err(Error::Busy) }
    }

    /// 取出下一个在用的目录项（跳过`.`与`..`），并前移游标
    pub fn list_next_entry(&mut self, dir: &mut Dir) -> Option<vfs::DirEntry> {
        let mut entry = DirEntry::default();
        while self.read_at(&dir.inode, entry.as_bytes_mut(), dir.pos) == DirEntry::SIZE {
            dir.pos += DirEntry::SIZE;
            if !entry.in_use() || is_dot(entry.name()) {
                continue;
            }

            let inode = self.open_inode(entry.inode_sector());
            let ty = if self.is_dir(&inode) {
                DirEntryType::Directory
            } else {
                DirEntryType::Regular
            };
            self.close_inode(inode);

            return Some(vfs::DirEntry {
                inode: u32::from(entry.inode_sector()) as u64,
                ty,
                name: String::from(entry.name()),
            });
        }
        None
    }

    /// 除`.`与`..`外没有在用的目录项
    pub fn is_empty_dir(&self, dir: &Dir) -> bool {
        self.entries(dir)
            .all(|(entry, _)| !entry.in_use() || is_dot(entry.name()))
    }

    /// 在`dir`下创建长为`size`字节的普通文件
    pub fn create_subfile(&mut self, dir: &Dir, name: &str, size: usize) -> Result<(), Error> {
        DirEntry::check_name(name)?;
        if self.find_entry(dir, name).is_some() {
            return Err(Error::AlreadyExists);
        }

        let sector = self.allocator.allocate(1).ok_or(Error::NoSpace)?;
        if let Err(err) = self.create_inode(sector, size) {
            self.allocator.release(sector, 1);
            return Err(err);
        }
        self.link_new(dir, name, sector)
    }

    /// 在`dir`下创建仅含`.`与`..`的子目录
    pub fn create_subdir(&mut self, dir: &Dir, name: &str) -> Result<(), Error> {
        DirEntry::check_name(name)?;
        if self.find_entry(dir, name).is_some() {
            return Err(Error::AlreadyExists);
        }

        let sector = self.allocator.allocate(1).ok_or(Error::NoSpace)?;
        if let Err(err) = self.create_dir(sector, 2) {
            self.allocator.release(sector, 1);
            return Err(err);
        }

        let parent = self.inumber(&dir.inode);
        let subdir = self.open_inode(sector);
        let subdir = self.open_dir(subdir);
        let dots = self
            .add_entry(&subdir, ".", sector)
            .and_then(|()| self.add_entry(&subdir, "..", parent));
        self.close_dir(subdir);

        match dots {
            Ok(()) => self.link_new(dir, name, sector),
            Err(err) => {
                self.discard(sector);
                Err(err)
            }
        }
    }

    /// 打开名为`name`的子目录
    pub fn lookup_subdir(&mut self, dir: &Dir, name: &str) -> Option<Dir> {
        let inode = self.lookup(dir, name)?;
        if self.is_dir(&inode) {
            Some(self.open_dir(inode))
        } else {
            self.close_inode(inode);
            None
        }
    }

    /// 打开名为`name`的普通文件
    pub fn lookup_subfile(&mut self, dir: &Dir, name: &str) -> Option<Inode> {
        let inode = self.lookup(dir, name)?;
        if self.is_dir(&inode) {
            self.close_inode(inode);
            None
        } else {
            Some(inode)
        }
    }

    /// 删除空的子目录。子目录不能在别处打开着，例如作为某个进程的工作目录。
    pub fn delete_subdir(&mut self, dir: &Dir, name: &str) -> Result<(), Error> {
        if is_dot(name) {
            return Err(Error::InvalidPath);
        }

        let inode = self.lookup(dir, name).ok_or(Error::NotFound)?;
        let subdir = self.open_dir(inode);
        let checked = if !self.is_dir(subdir.inode()) {
            Err(Error::NotADirectory)
        } else if self.open_count(subdir.inode()) > 1 {
            Err(Error::Busy)
        } else if !self.is_empty_dir(&subdir) {
            Err(Error::DirectoryNotEmpty)
        } else {
            Ok(())
        };
        self.close_dir(subdir);

        checked?;
        self.remove_entry(dir, name)
    }

    pub fn delete_subfile(&mut self, dir: &Dir, name: &str) -> Result<(), Error> {
        let inode = self.lookup(dir, name).ok_or(Error::NotFound)?;
        let is_dir = self.is_dir(&inode);
        self.close_inode(inode);

        if is_dir {
            return Err(Error::IsADirectory);
        }
        self.remove_entry(dir, name)
    }
}

impl<A: SectorAllocator> FileSystem<A> {
    /// 按顺序遍历目录中的全部槽位，附带各自的字节偏移
    fn entries<'a>(&'a self, dir: &'a Dir) -> impl Iterator<Item = (DirEntry, usize)> + 'a {
        (0..)
            .step_by(DirEntry::SIZE)
            .map_while(move |offset| {
                let mut entry = DirEntry::default();
                (self.read_at(&dir.inode, entry.as_bytes_mut(), offset) == DirEntry::SIZE)
                    .then_some((entry, offset))
            })
    }

    fn find_entry(&self, dir: &Dir, name: &str) -> Option<(DirEntry, usize)> {
        self.entries(dir)
            .find(|(entry, _)| entry.in_use() && entry.name() == name)
    }

    /// 把刚建好的 inode 挂到`dir`下；失败则整个回收
    fn link_new(&mut self, dir: &Dir, name: &str, sector: SectorId) -> Result<(), Error> {
        let linked = self.add_entry(dir, name, sector);
        if linked.is_err() {
            self.discard(sector);
        }
        linked
    }

    /// 回收尚未挂进任何目录的 inode，连同它所在的扇区
    fn discard(&mut self, sector: SectorId) {
        let inode = self.open_inode(sector);
        self.remove_inode(&inode);
        self.close_inode(inode);
    }
}
