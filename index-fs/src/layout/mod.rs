//! # 磁盘数据结构层
//!
//! index-fs 的磁盘布局：
//! 0 号扇区为空闲位图文件的 inode，1 号扇区为根目录的 inode，其余扇区按需分配。
//!
//! 每个 inode 独占一个扇区，经由两级索引表定位数据块：
//! inode -> 一级索引表 -> 二级索引表 -> 数据块

mod inode;
pub use inode::{DiskInode, InodeAttr};

mod index;
pub use index::{BlockAddr, IndexTable, MAX_FILE_SIZE, TABLE_LEN};

/// 目录项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::DirEntry;
