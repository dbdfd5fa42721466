use std::io;
use std::path::Path;
use std::sync::Arc;

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::warn;

use devfm_platform::command::NULL_LISTING_FIELDS;
use devfm_platform::filesystem::{AccessMode, FileStat, FileSystem};

use crate::classifier::{format_mode, icon_for, is_protected_path, readable_size};
use crate::paths::{display, file_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One row of a directory listing, built fresh on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    /// Human readable, `-` for directories
    pub size: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub icon: String,
    pub permissions: String,
    pub owner: String,
    pub group: String,
    /// Local time, `YYYY-MM-DD HH:MM:SS`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    pub is_writable: bool,
    pub is_readable: bool,
    pub is_executable: bool,
    pub is_system: bool,
}

/// Enumerates directories natively and parses the elevated listings.
#[derive(Clone)]
pub struct DirectoryLister {
    fs: Arc<dyn FileSystem>,
}

impl DirectoryLister {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Stat-based entry for one path. Dangling symlinks are described by
    /// the link itself.
    pub fn entry(&self, path: &Path) -> io::Result<FileEntry> {
        let stat = match self.fs.stat(path) {
            Ok(st) => st,
            Err(_) => self.fs.lstat(path)?,
        };
        Ok(self.entry_from_stat(path, &stat))
    }

    fn entry_from_stat(&self, path: &Path, stat: &FileStat) -> FileEntry {
        let name = file_name(path);
        let is_dir = stat.is_dir();
        FileEntry {
            size: if is_dir { "-".to_string() } else { readable_size(stat.size) },
            kind: if is_dir { EntryKind::Directory } else { EntryKind::File },
            icon: icon(&name, is_dir),
            permissions: format_mode(stat.mode),
            owner: self
                .fs
                .owner_name(stat.uid)
                .unwrap_or_else(|| stat.uid.to_string()),
            group: self
                .fs
                .group_name(stat.gid)
                .unwrap_or_else(|| stat.gid.to_string()),
            last_modified: stat.modified.and_then(format_timestamp),
            is_writable: self.fs.can_access(path, AccessMode::Write),
            is_readable: self.fs.can_access(path, AccessMode::Read),
            is_executable: self.fs.can_access(path, AccessMode::Execute),
            is_system: is_protected_path(path),
            path: display(path),
            name,
        }
    }

    /// Entries of `dir` in directory order, `.` and `..` excluded.
    pub fn list_native(&self, dir: &Path) -> io::Result<Vec<FileEntry>> {
        let names = self.fs.read_dir(dir)?;
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let path = dir.join(&name);
            match self.entry(&path) {
                Ok(entry) => entries.push(entry),
                // raced with a delete, or a name we cannot stat
                Err(e) => warn!("skipping {}: {}", path.display(), e),
            }
        }
        Ok(entries)
    }
}

fn icon(name: &str, is_dir: bool) -> String {
    if is_dir {
        "folder".to_string()
    } else {
        icon_for(name).to_string()
    }
}

fn format_timestamp(secs: i64) -> Option<String> {
    Local
        .timestamp_opt(secs, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Entry described only by listing text, so access flags come from the
/// permission string rather than an access check.
fn entry_from_listing(
    dir: &Path,
    name: &str,
    permissions: &str,
    owner: &str,
    group: &str,
    size: &str,
    last_modified: Option<String>,
) -> FileEntry {
    let is_dir = permissions.starts_with('d');
    let path = dir.join(name);
    FileEntry {
        name: name.to_string(),
        path: display(&path),
        size: if is_dir {
            "-".to_string()
        } else {
            size.parse::<u64>()
                .map(readable_size)
                .unwrap_or_else(|_| size.to_string())
        },
        kind: if is_dir { EntryKind::Directory } else { EntryKind::File },
        icon: icon(name, is_dir),
        permissions: permissions.to_string(),
        owner: owner.to_string(),
        group: group.to_string(),
        last_modified,
        is_readable: permissions.contains('r'),
        is_writable: permissions.contains('w'),
        is_executable: permissions.contains('x'),
        is_system: is_protected_path(&path),
    }
}

/// Parse `find -printf` output: seven NUL-terminated fields per entry
/// (mode, links, owner, group, size, mtime, name).
pub fn parse_null_listing(dir: &Path, raw: &[u8]) -> Vec<FileEntry> {
    let fields: Vec<String> = raw
        .split(|b| *b == 0)
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .collect();

    fields
        .chunks_exact(NULL_LISTING_FIELDS)
        .filter_map(|f| {
            let name = f[6].as_str();
            if name.is_empty() || name == "." || name == ".." {
                return None;
            }
            // %TS carries fractional seconds
            let mtime = f[5].split('.').next().unwrap_or_default().to_string();
            Some(entry_from_listing(dir, name, &f[0], &f[2], &f[3], &f[4], Some(mtime)))
        })
        .collect()
}

/// Parse `ls -la` output. The first line (`total N`) is dropped and each
/// remaining line is split on whitespace into at most nine fields, the
/// ninth being the name.
///
/// Known limitation: leading whitespace of a name is eaten by the column
/// split, a symlink name containing ` -> ` is cut short, and a name
/// containing a newline breaks the line structure. The null-delimited
/// format has none of these problems.
pub fn parse_long_listing(dir: &Path, output: &str) -> Vec<FileEntry> {
    output
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let parts = split_fields(line, 9);
            if parts.len() < 9 {
                return None;
            }
            let permissions = parts[0];
            let mut name = parts[8];
            if permissions.starts_with('l') {
                if let Some((link, _target)) = name.split_once(" -> ") {
                    name = link;
                }
            }
            if name == "." || name == ".." {
                return None;
            }
            Some(entry_from_listing(dir, name, permissions, parts[2], parts[3], parts[4], None))
        })
        .collect()
}

/// Split on runs of whitespace into at most `max` fields; the last field
/// keeps the rest of the line verbatim.
fn split_fields(line: &str, max: usize) -> Vec<&str> {
    let mut parts = Vec::with_capacity(max);
    let mut rest = line.trim_start();
    while parts.len() + 1 < max {
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(&rest[..end]);
                rest = rest[end..].trim_start();
            }
            None => {
                if !rest.is_empty() {
                    parts.push(rest);
                }
                return parts;
            }
        }
    }
    if !rest.is_empty() {
        parts.push(rest);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_long_listing_parse() {
        let out = "total 16\n\
drwxr-xr-x  3 root     root     4096 Jan  2 10:00 .\n\
drwxr-xr-x 20 root     root     4096 Jan  2 10:00 ..\n\
-rw-r-----  1 root     adm      2048 Jan  2 10:00 secret.conf\n\
drwx------  2 www-data www-data 4096 Jan  2 10:00 cache\n\
lrwxrwxrwx  1 root     root        9 Jan  2 10:00 latest -> cache\n";
        let entries = parse_long_listing(Path::new("/root/"), out);
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].name, "secret.conf");
        assert_eq!(entries[0].path, "/root/secret.conf");
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[0].size, "2 KB");
        assert_eq!(entries[0].group, "adm");
        assert_eq!(entries[0].icon, "cogs");
        assert!(entries[0].is_readable && entries[0].is_writable && !entries[0].is_executable);
        assert!(entries[0].last_modified.is_none());

        assert_eq!(entries[1].kind, EntryKind::Directory);
        assert_eq!(entries[1].size, "-");
        assert_eq!(entries[1].icon, "folder");
        assert_eq!(entries[1].owner, "www-data");

        assert_eq!(entries[2].name, "latest");
    }

    #[test]
    fn test_long_listing_keeps_inner_single_spaces() {
        let out = "total 4\n-rw-r--r-- 1 root root 5 Jan  2 10:00 my file.txt\n";
        let entries = parse_long_listing(Path::new("/srv"), out);
        assert_eq!(entries[0].name, "my file.txt");
        assert_eq!(entries[0].size, "5 B");
    }

    #[test]
    fn test_long_listing_skips_short_lines() {
        let out = "total 0\nls: cannot access 'x': Permission denied\n";
        assert!(parse_long_listing(Path::new("/srv"), out).is_empty());
    }

    #[test]
    fn test_null_listing_parse() {
        let mut raw = Vec::new();
        for field in [
            "-rw-r--r--", "1", "root", "root", "1536", "2024-03-01 09:15:42.1234567890", "a b\nc.txt",
            "drwxrwsr-x", "2", "www-data", "www-data", "4096", "2024-03-01 09:15:42.0000000000", "sub",
        ] {
            raw.extend_from_slice(field.as_bytes());
            raw.push(0);
        }
        let entries = parse_null_listing(Path::new("/root"), &raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a b\nc.txt");
        assert_eq!(entries[0].path, "/root/a b\nc.txt");
        assert_eq!(entries[0].size, "1.5 KB");
        assert_eq!(entries[0].last_modified.as_deref(), Some("2024-03-01 09:15:42"));
        assert_eq!(entries[1].kind, EntryKind::Directory);
        assert!(entries[1].is_system);
    }

    #[test]
    fn test_null_listing_ignores_truncated_tail() {
        let raw = b"-rw-r--r--\x001\x00root\x00";
        assert!(parse_null_listing(Path::new("/x"), raw).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_native_listing() {
        use devfm_linux::filesystem::UnixFileSystem;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::set_permissions(dir.path().join("a.txt"), std::fs::Permissions::from_mode(0o644)).unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();

        let lister = DirectoryLister::new(Arc::new(UnixFileSystem::new()));
        let mut entries = lister.list_native(dir.path()).unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[0].size, "5 B");
        assert_eq!(entries[0].permissions, "-rw-r--r--");
        assert_eq!(PathBuf::from(&entries[0].path), dir.path().join("a.txt"));
        assert!(entries[0].last_modified.is_some());
        assert_eq!(entries[1].name, "b");
        assert_eq!(entries[1].kind, EntryKind::Directory);
        assert_eq!(entries[1].size, "-");
    }

    #[test]
    fn test_entry_serializes_type_key() {
        let entry = entry_from_listing(Path::new("/srv"), "x.php", "-rw-r--r--", "a", "b", "10", None);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "file");
        assert_eq!(json["icon"], "php");
        assert!(json.get("last_modified").is_none());
    }
}
