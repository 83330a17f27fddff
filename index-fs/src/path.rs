//! # 路径解析层
//!
//! 把路径拆成`(所在目录, 文件名, 是否以'/'结尾)`，
//! 沿途的中间目录都必须存在，文件名本身不做查找。

use alloc::string::String;

use vfs::Error;

use crate::directory::Dir;
use crate::layout::DirEntry;
use crate::{FileSystem, SectorAllocator};

trait Path {
    fn is_absolute(&self) -> bool;

    /// 去掉一个结尾的`/`，并返回是否去掉了
    fn strip_dir_suffix(&self) -> (&Self, bool);

    /// 路径的各级名字，忽略连续`/`产生的空项
    fn components(&self) -> impl Iterator<Item = &Self>;
}

impl Path for str {
    fn is_absolute(&self) -> bool {
        self.starts_with('/')
    }

    fn strip_dir_suffix(&self) -> (&Self, bool) {
        match self.strip_suffix('/') {
            Some(path) => (path, true),
            None => (self, false),
        }
    }

    fn components(&self) -> impl Iterator<Item = &Self> {
        self.split('/').filter(|s| !s.is_empty())
    }
}

/// 路径是否恰为根目录
#[inline]
pub fn is_root(path: &str) -> bool {
    path == "/"
}

impl<A: SectorAllocator> FileSystem<A> {
    /// 解析路径，返回`(所在目录, 文件名, 是否以'/'结尾)`，目录由调用者关闭。
    ///
    /// 绝对路径从根目录出发，相对路径从`cwd`出发，`cwd`为空时视作根目录。
    /// 空路径与`/`本身不接受，根目录请先用 [`is_root`] 判断。
    pub fn parse_path(
        &mut self,
        cwd: Option<&Dir>,
        raw: &str,
    ) -> Result<(Dir, String, bool), Error> {
        if raw.is_empty() || is_root(raw) {
            return Err(Error::InvalidPath);
        }

        let (path, dir_suffix) = raw.strip_dir_suffix();
        let mut dir = match cwd {
            Some(cwd) if !path.is_absolute() => self.reopen_dir(cwd),
            _ => self.open_root(),
        };

        let mut components = path.components().peekable();
        while let Some(name) = components.next() {
            if let Err(err) = DirEntry::check_name(name) {
                self.close_dir(dir);
                return Err(err);
            }
            if components.peek().is_none() {
                return Ok((dir, String::from(name), dir_suffix));
            }

            let next = self.lookup_subdir(&dir, name);
            self.close_dir(dir);
            dir = next.ok_or(Error::NotFound)?;
        }

        // 路径中只有`/`
        self.close_dir(dir);
        Err(Error::InvalidPath)
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use block_dev::RamDisk;

    use super::*;
    use crate::{FreeMap, ROOT_DIR_SECTOR};

    fn format() -> FileSystem {
        FileSystem::format(Arc::new(RamDisk::new(256)), FreeMap::new(256)).unwrap()
    }

    /// 建立 /a/b
    fn tree(fs: &mut FileSystem) {
        let root = fs.open_root();
        fs.create_subdir(&root, "a").unwrap();
        let a = fs.lookup_subdir(&root, "a").unwrap();
        fs.create_subdir(&a, "b").unwrap();
        fs.close_dir(a);
        fs.close_dir(root);
    }

    #[test]
    fn components() {
        assert_eq!(("a/b", true), "a/b/".strip_dir_suffix());
        assert_eq!(("a/b", false), "a/b".strip_dir_suffix());
        assert!("/a".is_absolute());
        assert!(!"a".is_absolute());
        assert_eq!(
            ["a", "b", "c"],
            "/a//b/c".components().collect::<alloc::vec::Vec<_>>().as_slice()
        );
        assert!(is_root("/"));
        assert!(!is_root("//"));
    }

    #[test]
    fn rejects_empty_and_root() {
        let mut fs = format();
        assert_eq!(Err(Error::InvalidPath), fs.parse_path(None, "").map(|_| ()));
        assert_eq!(Err(Error::InvalidPath), fs.parse_path(None, "/").map(|_| ()));
        assert_eq!(Err(Error::InvalidPath), fs.parse_path(None, "//").map(|_| ()));
        assert_eq!(0, fs.inodes.len());
    }

    #[test]
    fn trailing_slash_is_reported() {
        let mut fs = format();
        tree(&mut fs);

        let (dir, name, dir_suffix) = fs.parse_path(None, "a/b/").unwrap();
        assert_eq!("b", name);
        assert!(dir_suffix);
        let a = {
            let root = fs.open_root();
            let a = fs.lookup_subdir(&root, "a").unwrap();
            fs.close_dir(root);
            a
        };
        assert_eq!(fs.inumber(a.inode()), fs.inumber(dir.inode()));
        fs.close_dir(a);
        fs.close_dir(dir);
        assert_eq!(0, fs.inodes.len());
    }

    #[test]
    fn leaf_is_not_looked_up() {
        let mut fs = format();
        let (dir, name, dir_suffix) = fs.parse_path(None, "/missing").unwrap();
        assert_eq!(ROOT_DIR_SECTOR, fs.inumber(dir.inode()));
        assert_eq!("missing", name);
        assert!(!dir_suffix);
        fs.close_dir(dir);
    }

    #[test]
    fn relative_to_cwd() {
        let mut fs = format();
        tree(&mut fs);
        let root = fs.open_root();
        let a = fs.lookup_subdir(&root, "a").unwrap();
        fs.close_dir(root);

        let (dir, name, _) = fs.parse_path(Some(&a), "b/c").unwrap();
        assert_eq!("c", name);
        assert_ne!(fs.inumber(a.inode()), fs.inumber(dir.inode()));
        fs.close_dir(dir);

        // 绝对路径无视 cwd
        let (dir, _, _) = fs.parse_path(Some(&a), "/x").unwrap();
        assert_eq!(ROOT_DIR_SECTOR, fs.inumber(dir.inode()));
        fs.close_dir(dir);

        // `..` 就是普通的目录项
        let (dir, name, _) = fs.parse_path(Some(&a), "../a/b").unwrap();
        assert_eq!("b", name);
        assert_eq!(fs.inumber(a.inode()), fs.inumber(dir.inode()));
        fs.close_dir(dir);

        // 调用者的 cwd 不受影响
        assert_eq!(1, fs.open_count(a.inode()));
        fs.close_dir(a);
        assert_eq!(0, fs.inodes.len());
    }

    #[test]
    fn failures_release_every_handle() {
        let mut fs = format();
        tree(&mut fs);

        let cases = [
            ("a/missing/x", Error::NotFound),
            ("a/b/c/d", Error::NotFound),
            ("a/fifteen-bytes!!/x", Error::NameTooLong),
            ("a/b/fifteen-bytes!!", Error::NameTooLong),
        ];
        for (path, err) in cases {
            assert_eq!(Err(err), fs.parse_path(None, path).map(|_| ()), "{path}");
            assert_eq!(0, fs.inodes.len(), "{path}");
        }
    }

    #[test]
    fn file_in_the_middle() {
        let mut fs = format();
        let root = fs.open_root();
        fs.create_subfile(&root, "f", 0).unwrap();
        fs.close_dir(root);

        assert_eq!(Err(Error::NotFound), fs.parse_path(None, "f/x").map(|_| ()));
        assert_eq!(0, fs.inodes.len());
    }
}
