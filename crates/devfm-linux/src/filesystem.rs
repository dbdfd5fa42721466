use std::fs;
use std::io;
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::{AccessFlags, Gid, Group, Uid, User};

use devfm_platform::filesystem::{AccessMode, FileStat, FileSystem};

/// Native primitives backed by `std::fs` and `nix`.
pub struct UnixFileSystem;

impl UnixFileSystem {
    pub fn new() -> Self {
        Self
    }

    fn lookup_user(name: &str) -> io::Result<Uid> {
        match User::from_name(name) {
            Ok(Some(user)) => Ok(user.uid),
            Ok(None) => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown user {}", name),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn lookup_group(name: &str) -> io::Result<Gid> {
        match Group::from_name(name) {
            Ok(Some(group)) => Ok(group.gid),
            Ok(None) => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown group {}", name),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

fn to_stat(meta: &fs::Metadata) -> FileStat {
    FileStat {
        mode: meta.mode(),
        size: meta.len(),
        uid: meta.uid(),
        gid: meta.gid(),
        modified: Some(meta.mtime()),
    }
}

impl Default for UnixFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for UnixFileSystem {
    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        fs::metadata(path).map(|m| to_stat(&m))
    }

    fn lstat(&self, path: &Path) -> io::Result<FileStat> {
        fs::symlink_metadata(path).map(|m| to_stat(&m))
    }

    fn can_access(&self, path: &Path, mode: AccessMode) -> bool {
        let flags = match mode {
            AccessMode::Read => AccessFlags::R_OK,
            AccessMode::Write => AccessFlags::W_OK,
            AccessMode::Execute => AccessFlags::X_OK,
        };
        nix::unistd::access(path, flags).is_ok()
    }

    fn owner_name(&self, uid: u32) -> Option<String> {
        User::from_uid(Uid::from_raw(uid)).ok().flatten().map(|u| u.name)
    }

    fn group_name(&self, gid: u32) -> Option<String> {
        Group::from_gid(Gid::from_raw(gid)).ok().flatten().map(|g| g.name)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("skipping dir entry in {}: {}", path.display(), e);
                    continue;
                }
            };
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => {
                    tracing::warn!("skipping non utf-8 name {:?} in {}", raw, path.display());
                }
            }
        }
        Ok(names)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        fs::write(path, data)
    }

    fn create_new(&self, path: &Path) -> io::Result<()> {
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map(|_| ())
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        fs::copy(from, to)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        symlink(target, link)
    }

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    fn chown(&self, path: &Path, user: &str, group: &str) -> io::Result<()> {
        let uid = Self::lookup_user(user)?;
        let gid = Self::lookup_group(group)?;
        nix::unistd::chown(path, Some(uid), Some(gid)).map_err(io::Error::from)
    }
}
