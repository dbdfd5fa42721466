//! One depth-first traversal shared by recursive delete, recursive copy and
//! search. Symlinks are reported as leaves and never followed.

use std::io;
use std::path::{Path, PathBuf};

use devfm_platform::filesystem::{FileStat, FileSystem};

/// Per-node actions. Directories get `enter_dir` before their children and
/// `leave_dir` after all of them.
pub trait TreeVisitor {
    type Error: From<io::Error>;

    fn enter_dir(&mut self, _path: &Path, _stat: &FileStat) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_file(&mut self, path: &Path, stat: &FileStat) -> Result<(), Self::Error>;

    fn leave_dir(&mut self, _path: &Path, _stat: &FileStat) -> Result<(), Self::Error> {
        Ok(())
    }

    /// A node could not be stat'ed or a directory could not be listed.
    /// Return `Ok` to skip it and keep walking.
    fn unreadable(&mut self, _path: &Path, err: io::Error) -> Result<(), Self::Error> {
        Err(err.into())
    }
}

enum Frame {
    Enter(PathBuf),
    Leave(PathBuf, FileStat),
}

pub fn walk<V: TreeVisitor>(fs: &dyn FileSystem, root: &Path, visitor: &mut V) -> Result<(), V::Error> {
    let mut stack = vec![Frame::Enter(root.to_path_buf())];

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(path) => {
                let stat = match fs.lstat(&path) {
                    Ok(st) => st,
                    Err(e) => {
                        visitor.unreadable(&path, e)?;
                        continue;
                    }
                };
                if !stat.is_dir() {
                    visitor.visit_file(&path, &stat)?;
                    continue;
                }

                visitor.enter_dir(&path, &stat)?;
                let names = match fs.read_dir(&path) {
                    Ok(names) => names,
                    Err(e) => {
                        visitor.unreadable(&path, e)?;
                        continue;
                    }
                };
                stack.push(Frame::Leave(path.clone(), stat));
                // reversed so children pop in directory order
                for name in names.into_iter().rev() {
                    stack.push(Frame::Enter(path.join(name)));
                }
            }
            Frame::Leave(path, stat) => visitor.leave_dir(&path, &stat)?,
        }
    }
    Ok(())
}

/// Removes files first, then each directory once it is empty.
pub struct RemoveTree<'a> {
    pub fs: &'a dyn FileSystem,
}

impl TreeVisitor for RemoveTree<'_> {
    type Error = io::Error;

    fn visit_file(&mut self, path: &Path, _stat: &FileStat) -> io::Result<()> {
        self.fs.remove_file(path)
    }

    fn leave_dir(&mut self, path: &Path, _stat: &FileStat) -> io::Result<()> {
        self.fs.remove_dir(path)
    }
}

/// Mirrors `from` into `to`, keeping every node's permission bits.
/// Symlinks are recreated as links, pointing where the original points.
///
/// Directory modes are applied on the way out so a read-only source
/// directory does not block copying its own children.
pub struct CopyTree<'a> {
    pub fs: &'a dyn FileSystem,
    pub from: &'a Path,
    pub to: &'a Path,
}

impl CopyTree<'_> {
    fn target(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(self.from) {
            Ok(rel) if rel.as_os_str().is_empty() => self.to.to_path_buf(),
            Ok(rel) => self.to.join(rel),
            Err(_) => self.to.to_path_buf(),
        }
    }
}

impl TreeVisitor for CopyTree<'_> {
    type Error = io::Error;

    fn enter_dir(&mut self, path: &Path, _stat: &FileStat) -> io::Result<()> {
        self.fs.create_dir(&self.target(path))
    }

    fn visit_file(&mut self, path: &Path, stat: &FileStat) -> io::Result<()> {
        let target = self.target(path);
        if stat.is_symlink() {
            let dest = self.fs.read_link(path)?;
            return self.fs.symlink(&dest, &target);
        }
        self.fs.copy_file(path, &target)?;
        self.fs.set_mode(&target, stat.permission_bits())
    }

    fn leave_dir(&mut self, path: &Path, stat: &FileStat) -> io::Result<()> {
        self.fs.set_mode(&self.target(path), stat.permission_bits())
    }
}
