use std::path::{Component, Path, PathBuf};

use crate::config::GatewayConfig;
use crate::error::GatewayError;

/// Turns request strings into absolute paths under the configured policy.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    root: PathBuf,
    restrict: bool,
}

impl PathPolicy {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            root: normalize(&config.managed_root),
            restrict: config.restrict_to_root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a request path. Relative paths hang off the managed root.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, GatewayError> {
        if raw.is_empty() {
            return Err(GatewayError::malformed("Percorso non specificato"));
        }
        if raw.contains('\0') {
            return Err(GatewayError::malformed("Percorso non valido"));
        }
        let path = Path::new(raw);
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let resolved = normalize(&joined);
        if self.restrict && !resolved.starts_with(&self.root) {
            return Err(GatewayError::denied("Percorso fuori dalla directory gestita"));
        }
        Ok(resolved)
    }

    /// Like [`resolve`](Self::resolve), falling back to the managed root
    /// when the parameter is absent or empty.
    pub fn resolve_or_root(&self, raw: Option<&str>) -> Result<PathBuf, GatewayError> {
        match raw {
            Some(r) if !r.is_empty() => self.resolve(r),
            _ => Ok(self.root.clone()),
        }
    }

    /// `dir/<basename of name>`, rejecting names that do not name an entry.
    pub fn child(&self, dir: &Path, name: &str) -> Result<PathBuf, GatewayError> {
        let name = basename(name).ok_or_else(|| GatewayError::malformed("Nome non valido"))?;
        Ok(dir.join(name))
    }
}

/// Lexically drop `.` and resolve `..` without touching the filesystem.
pub fn normalize(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Last path component of `name`, trailing slashes ignored. `None` for
/// empty names and for `.` / `..`.
pub fn basename(name: &str) -> Option<&str> {
    let last = name.trim_end_matches('/').rsplit('/').next()?;
    match last {
        "" | "." | ".." => None,
        n if n.contains('\0') => None,
        n => Some(n),
    }
}

/// Display form used in replies and log lines.
pub fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Final component as a string, `/` for the filesystem root.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| display(path))
}
