//! # 索引节点层
//!
//! 内存中的 inode 由 [`FileSystem`] 的打开表统一持有：
//! 同一扇区的 inode 无论打开多少次，都共享同一条记录并累加打开计数，
//! 磁盘上的 inode 只在第一次打开时读入。
//!
//! 删除只做标记，真正回收索引表与数据块推迟到最后一个使用者关闭时。

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use vfs::Error;

use crate::block_cache::BlockCache;
use crate::layout::{BlockAddr, DiskInode, IndexTable, MAX_FILE_SIZE, TABLE_LEN};
use crate::{BLOCK_SIZE, DataBlock, FileSystem, SectorAllocator, SectorId};

const ZEROS: DataBlock = [0; BLOCK_SIZE];

/// 已打开的 inode 的凭据。
///
/// 同一扇区的多次打开得到相等的凭据，每个凭据都必须交还给
/// [`FileSystem::close_inode`] 恰好一次。
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct Inode {
    slot: usize,
}

/// 打开表中的一条记录
#[derive(Debug)]
struct OpenInode {
    /// inode 所在扇区
    sector: SectorId,
    open_count: usize,
    /// 最后一次关闭时是否回收
    removed: bool,
    /// 大于 0 时拒绝写入
    deny_write_count: usize,
    /// 磁盘 inode 的副本
    disk: DiskInode,
}

/// 打开表：记录的存放区加上 扇区 -> 存放位置 的登记簿
#[derive(Debug, Default)]
pub(crate) struct InodeTable {
    slots: Vec<Option<OpenInode>>,
    registry: BTreeMap<SectorId, usize>,
}

impl InodeTable {
    fn get(&self, inode: &Inode) -> &OpenInode {
        self.slots[inode.slot]
            .as_ref()
            .expect("use of a closed inode")
    }

    fn get_mut(&mut self, inode: &Inode) -> &mut OpenInode {
        self.slots[inode.slot]
            .as_mut()
            .expect("use of a closed inode")
    }

    fn insert(&mut self, open: OpenInode) -> usize {
        let sector = open.sector;
        let slot = match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.slots[slot] = Some(open);
                slot
            }
            None => {
                self.slots.push(Some(open));
                self.slots.len() - 1
            }
        };
        self.registry.insert(sector, slot);
        slot
    }

    fn remove(&mut self, slot: usize) -> OpenInode {
        let open = self.slots[slot].take().expect("use of a closed inode");
        self.registry.remove(&open.sector);
        open
    }

    /// 打开表中的 inode 数目
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.registry.len()
    }
}

impl<A: SectorAllocator> FileSystem<A> {
    /// 在`sector`处建立长为`length`字节的 inode，并立即分配覆盖全部内容的
    /// 索引表与全零数据块。
    ///
    /// 失败时本次分配的索引表与数据块都已归还，`sector`本身仍由调用者负责归还。
    pub fn create_inode(&mut self, sector: SectorId, length: usize) -> Result<(), Error> {
        if length > MAX_FILE_SIZE {
            return Err(Error::FileTooLarge);
        }

        let table = self.allocator.allocate(1).ok_or(Error::NoSpace)?;
        self.cache.write(sector, DiskInode::new(table, length).as_bytes());
        self.cache.write(table, IndexTable::empty().as_bytes());

        if length > 0 && grow(&self.cache, &mut self.allocator, table, 0, length - 1).is_none() {
            log::warn!("{sector:?}: not enough space for {length} bytes");
            reclaim(&self.cache, &mut self.allocator, table);
            return Err(Error::NoSpace);
        }

        log::debug!("{sector:?}: created with {length} bytes");
        Ok(())
    }

    /// 打开`sector`处的 inode；若已打开则共享并累加打开计数
    pub fn open_inode(&mut self, sector: SectorId) -> Inode {
        if let Some(&slot) = self.inodes.registry.get(&sector) {
            let inode = Inode { slot };
            self.inodes.get_mut(&inode).open_count += 1;
            return inode;
        }

        let mut disk = DiskInode::zeroed();
        self.cache.read(sector, disk.as_bytes_mut());
        if !disk.is_valid() {
            log::warn!("{sector:?}: opening a block without inode magic");
        }
        log::debug!("{sector:?}: opened");

        let slot = self.inodes.insert(OpenInode {
            sector,
            open_count: 1,
            removed: false,
            deny_write_count: 0,
            disk,
        });
        Inode { slot }
    }

    pub fn reopen(&mut self, inode: &Inode) -> Inode {
        self.inodes.get_mut(inode).open_count += 1;
        Inode { slot: inode.slot }
    }

    /// 关闭 inode。若为最后一个使用者且已被删除，
    /// 则回收全部数据块、索引表以及 inode 自身所在扇区。
    pub fn close_inode(&mut self, inode: Inode) {
        let open = self.inodes.get_mut(&inode);
        open.open_count -= 1;
        assert!(
            open.deny_write_count <= open.open_count,
            "{:?}: closed while still denying writes",
            open.sector
        );
        if open.open_count > 0 {
            return;
        }

        let open = self.inodes.remove(inode.slot);
        log::debug!("{:?}: closed", open.sector);

        if open.removed {
            log::debug!("{:?}: reclaiming blocks", open.sector);
            reclaim(&self.cache, &mut self.allocator, open.disk.table());
            self.allocator.release(open.sector, 1);
        }
    }

    /// 标记删除，回收推迟到最后一次关闭
    pub fn remove_inode(&mut self, inode: &Inode) {
        self.inodes.get_mut(inode).removed = true;
    }

    /// 从`offset`开始读出数据填充`buf`，返回实际读取的字节数
    pub fn read_at(&self, inode: &Inode, buf: &mut [u8], offset: usize) -> usize {
        let length = self.length(inode);
        let mut bounce = [0; BLOCK_SIZE];
        let mut offset = offset;
        let mut read_size = 0;

        while read_size < buf.len() {
            let Some(sector) = self.lookup_block(inode, offset) else {
                break;
            };
            let block_offset = offset % BLOCK_SIZE;
            let chunk = (buf.len() - read_size)
                .min(length - offset)
                .min(BLOCK_SIZE - block_offset);
            let dest = &mut buf[read_size..read_size + chunk];

            if chunk == BLOCK_SIZE {
                // 整块直接读入调用者的缓冲区
                self.cache.read(sector, dest);
            } else {
                self.cache.read(sector, &mut bounce);
                dest.copy_from_slice(&bounce[block_offset..block_offset + chunk]);
            }

            offset += chunk;
            read_size += chunk;
        }

        read_size
    }

    /// 把`buf`写到`offset`处，必要时逐块扩展文件；
    /// 返回实际写入的字节数，空间不足或写入被拒绝时会偏少。
    pub fn write_at(&mut self, inode: &Inode, buf: &[u8], offset: usize) -> usize {
        if self.inodes.get(inode).deny_write_count > 0 {
            return 0;
        }

        let mut bounce = [0; BLOCK_SIZE];
        let mut offset = offset;
        let mut written_size = 0;

        while written_size < buf.len() {
            let block_offset = offset % BLOCK_SIZE;
            let chunk = (buf.len() - written_size).min(BLOCK_SIZE - block_offset);
            let last = offset.saturating_add(chunk - 1);
            let Some(sector) = self.locate_block(inode, last, true) else {
                break;
            };
            let src = &buf[written_size..written_size + chunk];

            if chunk == BLOCK_SIZE {
                self.cache.write(sector, src);
            } else {
                // 块内还有不属于本次写入的数据，先读入再覆盖
                self.cache.read(sector, &mut bounce);
                bounce[block_offset..block_offset + chunk].copy_from_slice(src);
                self.cache.write(sector, &bounce);
            }

            offset += chunk;
            written_size += chunk;
        }

        written_size
    }

    /// 找到字节偏移`pos`所在的数据块。
    ///
    /// `pos`超出文件长度时：读返回空；写则扩展文件，
    /// 为`[长度, pos]`分配缺少的二级索引表与全零数据块，并把长度更新为`pos + 1`。
    /// 扩展途中空间耗尽则返回空，长度不变，已分配的块留在索引中。
    pub fn locate_block(&mut self, inode: &Inode, pos: usize, write: bool) -> Option<SectorId> {
        let open = self.inodes.get(inode);
        let length = open.disk.length();
        if pos < length {
            return self.lookup_block(inode, pos);
        }
        if !write {
            return None;
        }

        let (sector, table) = (open.sector, open.disk.table());
        if grow(&self.cache, &mut self.allocator, table, length, pos).is_none() {
            log::warn!("{sector:?}: extension to {} bytes aborted", pos + 1);
            return None;
        }

        let open = self.inodes.get_mut(inode);
        open.disk.set_length(pos + 1);
        self.cache.write(sector, open.disk.as_bytes());
        self.lookup_block(inode, pos)
    }

    /// 禁止写入，用于保护正在运行的可执行文件
    pub fn deny_write(&mut self, inode: &Inode) {
        let open = self.inodes.get_mut(inode);
        open.deny_write_count += 1;
        assert!(
            open.deny_write_count <= open.open_count,
            "{:?}: more write denials than openers",
            open.sector
        );
    }

    /// 每个调用过 [`FileSystem::deny_write`] 的使用者都必须在关闭前调用一次
    pub fn allow_write(&mut self, inode: &Inode) {
        let open = self.inodes.get_mut(inode);
        assert!(
            open.deny_write_count > 0,
            "{:?}: unbalanced allow_write",
            open.sector
        );
        open.deny_write_count -= 1;
    }

    #[inline]
    pub fn length(&self, inode: &Inode) -> usize {
        self.inodes.get(inode).disk.length()
    }

    /// inode 所在扇区，即 inode 编号
    #[inline]
    pub fn inumber(&self, inode: &Inode) -> SectorId {
        self.inodes.get(inode).sector
    }

    #[inline]
    pub fn is_dir(&self, inode: &Inode) -> bool {
        self.inodes.get(inode).disk.is_dir()
    }

    pub fn set_dir(&mut self, inode: &Inode) {
        let open = self.inodes.get_mut(inode);
        open.disk.set_dir();
        self.cache.write(open.sector, open.disk.as_bytes());
    }

    #[inline]
    pub fn open_count(&self, inode: &Inode) -> usize {
        self.inodes.get(inode).open_count
    }

    #[inline]
    pub fn is_removed(&self, inode: &Inode) -> bool {
        self.inodes.get(inode).removed
    }
}

impl<A: SectorAllocator> FileSystem<A> {
    /// 沿索引查找`pos`所在的数据块，不做任何分配
    fn lookup_block(&self, inode: &Inode, pos: usize) -> Option<SectorId> {
        let open = self.inodes.get(inode);
        if pos >= open.disk.length() {
            return None;
        }
        let addr = BlockAddr::of(pos)?;

        let mut table = IndexTable::empty();
        self.cache.read(open.disk.table(), table.as_bytes_mut());
        let l2 = table.get(addr.l1)?;
        self.cache.read(l2, table.as_bytes_mut());
        table.get(addr.l2)
    }
}

/// 为字节区间`[from, to]`内的每个数据块补齐二级索引表与全零数据块。
///
/// 无论成败，修改过的索引表都会写回，已分配的块始终挂在索引上。
fn grow<A: SectorAllocator>(
    cache: &BlockCache,
    allocator: &mut A,
    root: SectorId,
    from: usize,
    to: usize,
) -> Option<()> {
    let start = BlockAddr::of(from)?;
    let end = BlockAddr::of(to)?;

    let mut l1 = IndexTable::empty();
    cache.read(root, l1.as_bytes_mut());
    let grown = grow_tables(cache, allocator, &mut l1, start, end);
    cache.write(root, l1.as_bytes());
    grown
}

fn grow_tables<A: SectorAllocator>(
    cache: &BlockCache,
    allocator: &mut A,
    l1: &mut IndexTable,
    start: BlockAddr,
    end: BlockAddr,
) -> Option<()> {
    let mut l2 = IndexTable::empty();

    for i in start.l1..=end.l1 {
        let table = match l1.get(i) {
            Some(table) => {
                cache.read(table, l2.as_bytes_mut());
                table
            }
            None => {
                let table = allocator.allocate(1)?;
                l1.set(i, Some(table));
                l2 = IndexTable::empty();
                table
            }
        };

        let first = if i == start.l1 { start.l2 } else { 0 };
        let last = if i == end.l1 { end.l2 } else { TABLE_LEN - 1 };
        let filled = (first..=last).try_for_each(|j| {
            if l2.get(j).is_none() {
                let block = allocator.allocate(1)?;
                cache.write(block, &ZEROS);
                l2.set(j, Some(block));
            }
            Some(())
        });

        cache.write(table, l2.as_bytes());
        filled?;
    }

    Some(())
}

/// 归还索引上的全部数据块、二级索引表以及一级索引表自身
fn reclaim<A: SectorAllocator>(cache: &BlockCache, allocator: &mut A, root: SectorId) {
    let mut l1 = IndexTable::empty();
    let mut l2 = IndexTable::empty();
    cache.read(root, l1.as_bytes_mut());

    for table in l1.allocated() {
        cache.read(table, l2.as_bytes_mut());
        for block in l2.allocated() {
            allocator.release(block, 1);
        }
        allocator.release(table, 1);
    }
    allocator.release(root, 1);
}
