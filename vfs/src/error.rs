use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    AlreadyExists,
    NotFound,
    IsADirectory,
    NotADirectory,
    DirectoryNotEmpty,
    /// 目录仍被其它使用者打开
    Busy,
    /// 空闲扇区耗尽
    NoSpace,
    FileTooLarge,
    /// 路径为空或只有根目录
    InvalidPath,
    NameTooLong,
    /// 块设备上不是合法的文件系统
    InvalidVolume,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::AlreadyExists => "entry already exists",
            Self::NotFound => "no such file or directory",
            Self::IsADirectory => "is a directory",
            Self::NotADirectory => "not a directory",
            Self::DirectoryNotEmpty => "directory not empty",
            Self::Busy => "directory is in use",
            Self::NoSpace => "no space left on device",
            Self::FileTooLarge => "file too large",
            Self::InvalidPath => "invalid path",
            Self::NameTooLong => "file name too long",
            Self::InvalidVolume => "invalid volume",
        };
        f.write_str(msg)
    }
}
