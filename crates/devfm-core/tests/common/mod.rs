#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use devfm_core::{Gateway, GatewayConfig};
use devfm_linux::filesystem::UnixFileSystem;
use devfm_platform::command::PrivilegedCommand;
use devfm_platform::executor::{CommandResult, CommandRunner, ExecError};
use devfm_platform::filesystem::{AccessMode, FileStat, FileSystem};

/// Records every command and answers from a script, `("", 0)` once the
/// script runs out.
#[derive(Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<PrivilegedCommand>>,
    script: Mutex<VecDeque<Result<CommandResult, ExecError>>>,
}

impl RecordingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, result: CommandResult) {
        self.script.lock().unwrap().push_back(Ok(result));
    }

    pub fn fail(&self, err: ExecError) {
        self.script.lock().unwrap().push_back(Err(err));
    }

    pub fn commands(&self) -> Vec<PrivilegedCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &PrivilegedCommand, elevate: bool) -> Result<CommandResult, ExecError> {
        assert!(elevate, "gateway ran {} without elevation", command);
        self.commands.lock().unwrap().push(command.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(CommandResult::new("", 0)))
    }
}

/// The real filesystem, except that listed paths behave as if the
/// service account had no rights on them. Works the same under root.
pub struct DenyingFileSystem {
    inner: UnixFileSystem,
    denied: Mutex<HashSet<PathBuf>>,
    /// Directories whose entries cannot be unlinked (sticky, immutable)
    pinned: Mutex<HashSet<PathBuf>>,
    cross_device: AtomicBool,
}

impl DenyingFileSystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: UnixFileSystem::new(),
            denied: Mutex::new(HashSet::new()),
            pinned: Mutex::new(HashSet::new()),
            cross_device: AtomicBool::new(false),
        })
    }

    pub fn deny(&self, path: &Path) {
        self.denied.lock().unwrap().insert(path.to_path_buf());
    }

    /// Entries directly inside `dir` can be read and copied but not removed.
    pub fn pin(&self, dir: &Path) {
        self.pinned.lock().unwrap().insert(dir.to_path_buf());
    }

    /// Every `rename` fails with `EXDEV`, as across two mounts.
    pub fn cross_device(&self) {
        self.cross_device.store(true, Ordering::SeqCst);
    }

    fn check_removal(&self, path: &Path) -> io::Result<()> {
        self.check_parent(path)?;
        match path.parent() {
            Some(parent) if self.pinned.lock().unwrap().contains(parent) => {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "pinned by test"))
            }
            _ => Ok(()),
        }
    }

    fn is_denied(&self, path: &Path) -> bool {
        self.denied.lock().unwrap().contains(path)
    }

    fn check(&self, path: &Path) -> io::Result<()> {
        if self.is_denied(path) {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied by test"))
        } else {
            Ok(())
        }
    }

    fn check_parent(&self, path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) => self.check(parent),
            None => Ok(()),
        }
    }
}

impl FileSystem for DenyingFileSystem {
    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        self.inner.stat(path)
    }

    fn lstat(&self, path: &Path) -> io::Result<FileStat> {
        self.inner.lstat(path)
    }

    fn can_access(&self, path: &Path, mode: AccessMode) -> bool {
        !self.is_denied(path) && self.inner.can_access(path, mode)
    }

    fn owner_name(&self, uid: u32) -> Option<String> {
        self.inner.owner_name(uid)
    }

    fn group_name(&self, gid: u32) -> Option<String> {
        self.inner.group_name(gid)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        self.check(path)?;
        self.inner.read_dir(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.check(path)?;
        self.inner.read(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.check(path)?;
        self.inner.write(path, data)
    }

    fn create_new(&self, path: &Path) -> io::Result<()> {
        self.check_parent(path)?;
        self.inner.create_new(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        self.check_parent(path)?;
        self.inner.create_dir(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.check_removal(path)?;
        self.inner.remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        self.check_removal(path)?;
        self.inner.remove_dir(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.check_parent(from)?;
        self.check_parent(to)?;
        if self.cross_device.load(Ordering::SeqCst) {
            return Err(io::Error::from_raw_os_error(libc::EXDEV));
        }
        self.inner.rename(from, to)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        self.check(from)?;
        self.check_parent(to)?;
        self.inner.copy_file(from, to)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        self.check(path)?;
        self.inner.read_link(path)
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        self.check_parent(link)?;
        self.inner.symlink(target, link)
    }

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.check(path)?;
        self.inner.set_mode(path, mode)
    }

    fn chown(&self, path: &Path, user: &str, group: &str) -> io::Result<()> {
        self.check(path)?;
        self.inner.chown(path, user, group)
    }
}

/// A gateway rooted at `root`, with a service account that exists on any
/// test host.
pub struct Harness {
    pub gateway: Gateway,
    pub fs: Arc<DenyingFileSystem>,
    pub runner: Arc<RecordingRunner>,
}

pub fn config(root: &Path) -> GatewayConfig {
    GatewayConfig {
        managed_root: root.to_path_buf(),
        config_dir: root.join("env"),
        service_user: "nobody".to_string(),
        service_group: "nogroup".to_string(),
        temp_dirs: vec![root.join("tmp")],
        ..GatewayConfig::default()
    }
}

pub fn harness(config: GatewayConfig) -> Harness {
    let fs = DenyingFileSystem::new();
    let runner = RecordingRunner::new();
    let gateway = Gateway::new(Arc::new(config), fs.clone(), runner.clone());
    Harness { gateway, fs, runner }
}

pub fn p(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
