use core::{ptr, slice};

use vfs::Error;

use crate::{NAME_MAX, SectorId};

/// 目录中的一项，定长 20 字节
#[derive(Debug, Default, Clone)]
#[repr(C)]
pub struct DirEntry {
    inode_sector: u32,
    // 最后一字节留给 \0
    name: [u8; NAME_MAX + 1],
    in_use: u8,
}

impl DirEntry {
    pub const SIZE: usize = 20;

    /// 调用者需先用 [`DirEntry::check_name`] 校验名字
    #[inline]
    pub fn new(name: &str, inode_sector: SectorId) -> Self {
        let bytes = name.as_bytes();
        let mut raw = [0; NAME_MAX + 1];
        raw[..bytes.len()].copy_from_slice(bytes);

        Self {
            inode_sector: inode_sector.into(),
            name: raw,
            in_use: 1,
        }
    }

    /// 名字不能为空、不能含`/`、不能超过 [`NAME_MAX`] 字节
    pub fn check_name(name: &str) -> Result<(), Error> {
        if name.is_empty() || name.contains('/') {
            Err(Error::InvalidPath)
        } else if name.len() > NAME_MAX {
            Err(Error::NameTooLong)
        } else {
            Ok(())
        }
    }

    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(NAME_MAX);
        core::str::from_utf8(&self.name[..len]).unwrap_or_default()
    }

    #[inline]
    pub fn inode_sector(&self) -> SectorId {
        SectorId::new(self.inode_sector)
    }

    #[inline]
    pub fn in_use(&self) -> bool {
        self.in_use != 0
    }

    #[inline]
    pub fn release(&mut self) {
        self.in_use = 0;
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), Self::SIZE) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), Self::SIZE) }
    }
}
