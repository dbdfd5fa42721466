use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// File type mask and type bits of `st_mode`.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

/// Raw result of a `stat(2)` call (symlinks followed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Full `st_mode`, type bits included
    pub mode: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    /// Seconds since the Unix epoch
    pub modified: Option<i64>,
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Permission bits including setuid/setgid/sticky.
    pub fn permission_bits(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Access check performed on behalf of the service account, like `access(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
}

/// Native filesystem primitives the gateway tries before elevating.
///
/// Every method returns `io::Result` so callers can tell a permission
/// failure (`ErrorKind::PermissionDenied`) apart from everything else.
pub trait FileSystem: Send + Sync {
    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// Like `stat`, but reports a symlink itself instead of its target.
    fn lstat(&self, path: &Path) -> io::Result<FileStat>;

    fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_ok()
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.stat(path).map(|s| s.is_dir()).unwrap_or(false)
    }

    fn can_access(&self, path: &Path, mode: AccessMode) -> bool;

    fn owner_name(&self, uid: u32) -> Option<String>;
    fn group_name(&self, gid: u32) -> Option<String>;

    /// Entry names in directory order, without `.` and `..`.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Create an empty file, failing if it already exists.
    fn create_new(&self, path: &Path) -> io::Result<()>;
    fn create_dir(&self, path: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn remove_dir(&self, path: &Path) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64>;

    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;
    /// Create `link` pointing at `target`.
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Change owner and group by account name.
    fn chown(&self, path: &Path, user: &str, group: &str) -> io::Result<()>;
}
