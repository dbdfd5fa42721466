use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use devfm_platform::filesystem::{FileStat, FileSystem};

use crate::classifier::icon_for;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::lister::EntryKind;
use crate::paths::{display, file_name};
use crate::walk::{walk, TreeVisitor};

/// Minimum query length, in characters.
pub const MIN_QUERY_CHARS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub icon: String,
}

struct NameMatcher<'a> {
    fs: &'a dyn FileSystem,
    root: &'a Path,
    query: &'a str,
    hits: Vec<(PathBuf, bool)>,
}

impl NameMatcher<'_> {
    fn consider(&mut self, path: &Path, stat: &FileStat) {
        if path == self.root {
            return;
        }
        let matches = path
            .file_name()
            .map(|n| n.to_string_lossy().contains(self.query))
            .unwrap_or(false);
        if matches {
            // a link to a directory is reported as a directory, like `is_dir`
            let is_dir = stat.is_dir() || (stat.is_symlink() && self.fs.is_dir(path));
            self.hits.push((path.to_path_buf(), is_dir));
        }
    }
}

impl TreeVisitor for NameMatcher<'_> {
    type Error = io::Error;

    fn enter_dir(&mut self, path: &Path, stat: &FileStat) -> io::Result<()> {
        self.consider(path, stat);
        Ok(())
    }

    fn visit_file(&mut self, path: &Path, stat: &FileStat) -> io::Result<()> {
        self.consider(path, stat);
        Ok(())
    }

    fn unreadable(&mut self, path: &Path, err: io::Error) -> io::Result<()> {
        debug!("search skipping {}: {}", path.display(), err);
        Ok(())
    }
}

fn find_by_name(fs: &dyn FileSystem, root: &Path, query: &str) -> io::Result<Vec<SearchHit>> {
    let mut matcher = NameMatcher {
        fs,
        root,
        query,
        hits: Vec::new(),
    };
    walk(fs, root, &mut matcher)?;

    let mut hits = matcher.hits;
    hits.sort();
    Ok(hits
        .into_iter()
        .map(|(path, is_dir)| {
            let name = file_name(&path);
            SearchHit {
                icon: if is_dir { "folder".to_string() } else { icon_for(&name).to_string() },
                kind: if is_dir { EntryKind::Directory } else { EntryKind::File },
                path: display(&path),
                name,
            }
        })
        .collect())
}

impl Gateway {
    /// Every file and directory under `dir` whose name contains `query`,
    /// sorted by path. Never elevated.
    pub async fn search(&self, dir: Option<&str>, query: &str) -> Result<Vec<SearchHit>, GatewayError> {
        if query.chars().count() < MIN_QUERY_CHARS {
            return Err(GatewayError::malformed("Query di ricerca troppo breve"));
        }
        let root = self.paths().resolve_or_root(dir)?;
        if !self.fs().is_dir(&root) {
            return Err(GatewayError::not_found(format!("Directory non trovata: {}", display(&root))));
        }

        let fs: Arc<dyn FileSystem> = self.fs().clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || find_by_name(fs.as_ref(), &root, &query))
            .await
            .map_err(|e| GatewayError::io("Errore nella ricerca", io::Error::other(e)))?
            .map_err(|e| GatewayError::io("Errore nella ricerca", e))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use devfm_linux::filesystem::UnixFileSystem;

    #[test]
    fn test_find_by_name_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("b/config")).unwrap();
        std::fs::write(root.join("config.php"), b"").unwrap();
        std::fs::write(root.join("b/config/app.conf"), b"").unwrap();
        std::fs::write(root.join("b/other.txt"), b"").unwrap();

        let hits = find_by_name(&UnixFileSystem::new(), root, "conf").unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["config", "app.conf", "config.php"]);
        assert_eq!(hits[0].kind, EntryKind::Directory);
        assert_eq!(hits[0].icon, "folder");
        assert_eq!(hits[1].icon, "cogs");
        assert_eq!(hits[2].icon, "php");
    }

    #[test]
    fn test_root_itself_is_not_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("conf");
        std::fs::create_dir(&root).unwrap();
        assert!(find_by_name(&UnixFileSystem::new(), &root, "conf").unwrap().is_empty());
    }
}
