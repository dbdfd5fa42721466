//! Decides, per operation, whether the native primitive can be expected to
//! work and which allow-listed commands replace it when it cannot.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use devfm_platform::command::{ListingFormat, PrivilegedCommand};
use devfm_platform::filesystem::{AccessMode, FileSystem};

use crate::config::GatewayConfig;

/// Mode applied to every file created through the gateway.
pub const FILE_MODE: u32 = 0o664;
/// Mode applied to every directory created through the gateway; the setgid
/// bit makes children inherit the group.
pub const DIR_MODE: u32 = 0o2775;

/// A filesystem verb with the paths it touches.
#[derive(Clone, Copy)]
pub enum Operation<'a> {
    Read { path: &'a Path },
    List { dir: &'a Path },
    CreateFile { path: &'a Path },
    CreateDir { path: &'a Path },
    Write { path: &'a Path, content: &'a [u8], exists: bool },
    Delete { path: &'a Path, is_dir: bool },
    /// rename and move
    Rename { from: &'a Path, to: &'a Path },
    Copy { from: &'a Path, to: &'a Path, is_dir: bool },
    Chmod { path: &'a Path, mode: u32 },
    Upload { staged: &'a Path, target: &'a Path },
}

impl fmt::Display for Operation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read { path } => write!(f, "read {}", path.display()),
            Operation::List { dir } => write!(f, "list {}", dir.display()),
            Operation::CreateFile { path } => write!(f, "create {}", path.display()),
            Operation::CreateDir { path } => write!(f, "create_dir {}", path.display()),
            Operation::Write { path, content, .. } => {
                write!(f, "write {} ({} bytes)", path.display(), content.len())
            }
            Operation::Delete { path, .. } => write!(f, "delete {}", path.display()),
            Operation::Rename { from, to } => write!(f, "rename {} -> {}", from.display(), to.display()),
            Operation::Copy { from, to, .. } => write!(f, "copy {} -> {}", from.display(), to.display()),
            Operation::Chmod { path, mode } => write!(f, "chmod {:o} {}", mode, path.display()),
            Operation::Upload { target, .. } => write!(f, "upload {}", target.display()),
        }
    }
}

/// Commands that stand in for a native operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevationPlan {
    pub primary: PrivilegedCommand,
    /// Mode and ownership reset for whatever `primary` created
    pub normalize: Vec<PrivilegedCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Direct,
    Elevate(ElevationPlan),
}

pub struct CapabilityResolver {
    config: Arc<GatewayConfig>,
    fs: Arc<dyn FileSystem>,
}

impl CapabilityResolver {
    pub fn new(config: Arc<GatewayConfig>, fs: Arc<dyn FileSystem>) -> Self {
        Self { config, fs }
    }

    pub fn elevation_enabled(&self) -> bool {
        self.config.elevation_enabled
    }

    /// Pre-check: elevate up front when the access bits already say the
    /// native call would be refused. With elevation disabled this is
    /// always `Direct` and the native call reports the failure.
    pub fn plan(&self, op: &Operation<'_>) -> Plan {
        if !self.config.elevation_enabled || self.direct_access(op) {
            return Plan::Direct;
        }
        debug!("access check failed for {}, elevating", op);
        Plan::Elevate(self.elevation(op))
    }

    /// Post-check: a native call that was expected to work failed. Returns
    /// the stand-in plan when the failure was a permission error.
    ///
    /// Callers must have undone any partial native work first: `cp -R` and
    /// `mv` nest the source inside a destination that already exists.
    pub fn fallback(&self, op: &Operation<'_>, err: &io::Error) -> Option<ElevationPlan> {
        if !self.config.elevation_enabled || err.kind() != io::ErrorKind::PermissionDenied {
            return None;
        }
        debug!("native call failed for {} ({}), elevating", op, err);
        Some(self.elevation(op))
    }

    fn can(&self, path: &Path, mode: AccessMode) -> bool {
        self.fs.can_access(path, mode)
    }

    fn parent_writable(&self, path: &Path) -> bool {
        self.can(parent_of(path), AccessMode::Write)
    }

    fn direct_access(&self, op: &Operation<'_>) -> bool {
        use AccessMode::*;
        match *op {
            Operation::Read { path } => self.can(path, Read),
            Operation::List { dir } => self.can(dir, Read) && self.can(dir, Execute),
            Operation::CreateFile { path } | Operation::CreateDir { path } => self.parent_writable(path),
            Operation::Write { path, exists, .. } => {
                if exists {
                    self.can(path, Write)
                } else {
                    self.parent_writable(path)
                }
            }
            Operation::Delete { path, is_dir } => {
                self.parent_writable(path) && (!is_dir || self.can(path, Write))
            }
            Operation::Rename { from, to } => self.parent_writable(from) && self.parent_writable(to),
            Operation::Copy { from, to, .. } => self.can(from, Read) && self.parent_writable(to),
            Operation::Chmod { path, .. } => self.can(path, Write),
            Operation::Upload { target, .. } => self.parent_writable(target),
        }
    }

    fn normalize_file(&self, path: &Path) -> Vec<PrivilegedCommand> {
        self.normalize(path, FILE_MODE)
    }

    fn normalize(&self, path: &Path, mode: u32) -> Vec<PrivilegedCommand> {
        vec![
            PrivilegedCommand::Chmod {
                mode,
                path: path.to_path_buf(),
                recursive: false,
            },
            PrivilegedCommand::Chown {
                user: self.config.service_user.clone(),
                group: self.config.service_group.clone(),
                path: path.to_path_buf(),
                recursive: false,
            },
        ]
    }

    /// The allow-listed equivalent of `op`.
    pub fn elevation(&self, op: &Operation<'_>) -> ElevationPlan {
        let owned = |p: &Path| -> PathBuf { p.to_path_buf() };
        let (primary, normalize) = match *op {
            Operation::Read { path } => (PrivilegedCommand::ReadFile { path: owned(path) }, vec![]),
            Operation::List { dir } => (
                PrivilegedCommand::ListDir {
                    dir: owned(dir),
                    format: self.listing_format(),
                },
                vec![],
            ),
            Operation::CreateFile { path } => {
                (PrivilegedCommand::Touch { path: owned(path) }, self.normalize_file(path))
            }
            Operation::CreateDir { path } => {
                (PrivilegedCommand::MakeDir { path: owned(path) }, self.normalize(path, DIR_MODE))
            }
            Operation::Write { path, content, exists } => (
                PrivilegedCommand::WriteFile {
                    path: owned(path),
                    content: content.to_vec(),
                },
                if exists { vec![] } else { self.normalize_file(path) },
            ),
            Operation::Delete { path, is_dir } => (
                PrivilegedCommand::Remove {
                    path: owned(path),
                    recursive: is_dir,
                },
                vec![],
            ),
            Operation::Rename { from, to } => (
                PrivilegedCommand::Move {
                    from: owned(from),
                    to: owned(to),
                },
                vec![],
            ),
            Operation::Copy { from, to, is_dir } => (
                PrivilegedCommand::Copy {
                    from: owned(from),
                    to: owned(to),
                    recursive: is_dir,
                },
                vec![],
            ),
            Operation::Chmod { path, mode } => (
                PrivilegedCommand::Chmod {
                    mode,
                    path: owned(path),
                    recursive: false,
                },
                vec![],
            ),
            Operation::Upload { staged, target } => (
                PrivilegedCommand::Copy {
                    from: owned(staged),
                    to: owned(target),
                    recursive: false,
                },
                self.normalize_file(target),
            ),
        };
        ElevationPlan { primary, normalize }
    }

    pub fn listing_format(&self) -> ListingFormat {
        self.config.elevated_listing
    }
}

fn parent_of(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("/"),
    }
}
