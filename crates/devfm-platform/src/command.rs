//! The allow-list of commands the privileged executor may run.
//!
//! Each variant renders to a fixed program plus an argv vector. Arguments
//! are passed to `execve` one by one, so no shell ever sees them and no
//! quoting is applied. Paths handed to `find` are made to start with `/`
//! or `./` so they cannot be parsed as an expression.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// How the elevated directory listing is produced and parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListingFormat {
    /// `find -printf` with NUL-terminated fields; safe for any file name.
    #[default]
    NullDelimited,
    /// `ls -la`, split on whitespace. Names with embedded whitespace are mangled.
    LongListing,
}

/// Node type selector for tree-wide `find` commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    Directories,
    Files,
}

impl TreeKind {
    fn find_type(self) -> &'static str {
        match self {
            TreeKind::Directories => "d",
            TreeKind::Files => "f",
        }
    }
}

/// Fields emitted per entry by the null-delimited listing, in order.
pub const NULL_LISTING_FIELDS: usize = 7;

const NULL_LISTING_FORMAT: &str = "%M\\0%n\\0%u\\0%g\\0%s\\0%TY-%Tm-%Td %TH:%TM:%TS\\0%f\\0";

/// Name patterns removed by the temp-directory cleanup.
pub const TEMP_PATTERNS: [&str; 3] = ["*.tmp", "*.temp", "*.bak"];

#[derive(Clone, PartialEq, Eq)]
pub enum PrivilegedCommand {
    ReadFile { path: PathBuf },
    /// Content is fed on stdin and never logged.
    WriteFile { path: PathBuf, content: Vec<u8> },
    Touch { path: PathBuf },
    MakeDir { path: PathBuf },
    Chmod { mode: u32, path: PathBuf, recursive: bool },
    Chown { user: String, group: String, path: PathBuf, recursive: bool },
    Remove { path: PathBuf, recursive: bool },
    Move { from: PathBuf, to: PathBuf },
    Copy { from: PathBuf, to: PathBuf, recursive: bool },
    ListDir { dir: PathBuf, format: ListingFormat },
    ChmodTree { root: PathBuf, kind: TreeKind, mode: u32 },
    PurgeTemp { dir: PathBuf, max_age_days: u32 },
    GrepKey { key: String, file: PathBuf },
}

impl PrivilegedCommand {
    pub fn program(&self) -> &'static str {
        match self {
            PrivilegedCommand::ReadFile { .. } => "cat",
            PrivilegedCommand::WriteFile { .. } => "dd",
            PrivilegedCommand::Touch { .. } => "touch",
            PrivilegedCommand::MakeDir { .. } => "mkdir",
            PrivilegedCommand::Chmod { .. } => "chmod",
            PrivilegedCommand::Chown { .. } => "chown",
            PrivilegedCommand::Remove { .. } => "rm",
            PrivilegedCommand::Move { .. } => "mv",
            PrivilegedCommand::Copy { .. } => "cp",
            PrivilegedCommand::ListDir { format: ListingFormat::NullDelimited, .. } => "find",
            PrivilegedCommand::ListDir { format: ListingFormat::LongListing, .. } => "ls",
            PrivilegedCommand::ChmodTree { .. } => "find",
            PrivilegedCommand::PurgeTemp { .. } => "find",
            PrivilegedCommand::GrepKey { .. } => "grep",
        }
    }

    /// Arguments following the program name.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        match self {
            PrivilegedCommand::ReadFile { path } => {
                args.push("--".into());
                args.push(path.into());
            }
            PrivilegedCommand::WriteFile { path, .. } => {
                let mut of = OsString::from("of=");
                of.push(path.as_os_str());
                args.push(of);
                args.push("status=none".into());
            }
            PrivilegedCommand::Touch { path } => {
                args.push("--".into());
                args.push(path.into());
            }
            PrivilegedCommand::MakeDir { path } => {
                args.push("-p".into());
                args.push("--".into());
                args.push(path.into());
            }
            PrivilegedCommand::Chmod { mode, path, recursive } => {
                if *recursive {
                    args.push("-R".into());
                }
                args.push(format!("{:o}", mode).into());
                args.push("--".into());
                args.push(path.into());
            }
            PrivilegedCommand::Chown { user, group, path, recursive } => {
                if *recursive {
                    args.push("-R".into());
                }
                args.push(format!("{}:{}", user, group).into());
                args.push("--".into());
                args.push(path.into());
            }
            PrivilegedCommand::Remove { path, recursive } => {
                if *recursive {
                    args.push("-rf".into());
                }
                args.push("--".into());
                args.push(path.into());
            }
            PrivilegedCommand::Move { from, to } => {
                args.push("--".into());
                args.push(from.into());
                args.push(to.into());
            }
            PrivilegedCommand::Copy { from, to, recursive } => {
                if *recursive {
                    args.push("-R".into());
                }
                args.push("--".into());
                args.push(from.into());
                args.push(to.into());
            }
            PrivilegedCommand::ListDir { dir, format: ListingFormat::NullDelimited } => {
                args.push(find_root(dir));
                for a in ["-mindepth", "1", "-maxdepth", "1", "-printf", NULL_LISTING_FORMAT] {
                    args.push(a.into());
                }
            }
            PrivilegedCommand::ListDir { dir, format: ListingFormat::LongListing } => {
                args.push("-la".into());
                args.push("--".into());
                args.push(dir.into());
            }
            PrivilegedCommand::ChmodTree { root, kind, mode } => {
                args.push(find_root(root));
                args.push("-type".into());
                args.push(kind.find_type().into());
                args.push("-exec".into());
                args.push("chmod".into());
                args.push(format!("{:o}", mode).into());
                args.push("{}".into());
                args.push("+".into());
            }
            PrivilegedCommand::PurgeTemp { dir, max_age_days } => {
                args.push(find_root(dir));
                args.push("-type".into());
                args.push("f".into());
                args.push("(".into());
                for (i, pattern) in TEMP_PATTERNS.iter().enumerate() {
                    if i > 0 {
                        args.push("-o".into());
                    }
                    args.push("-name".into());
                    args.push((*pattern).into());
                }
                args.push(")".into());
                args.push("-mtime".into());
                args.push(format!("+{}", max_age_days).into());
                args.push("-delete".into());
            }
            PrivilegedCommand::GrepKey { key, file } => {
                args.push("--".into());
                args.push(key.into());
                args.push(file.into());
            }
        }
        args
    }

    /// Bytes to feed on stdin, if any.
    pub fn stdin(&self) -> Option<&[u8]> {
        match self {
            PrivilegedCommand::WriteFile { content, .. } => Some(content),
            _ => None,
        }
    }
}

fn find_root(path: &Path) -> OsString {
    if path.is_absolute() {
        path.into()
    } else {
        Path::new(".").join(path).into()
    }
}

impl fmt::Display for PrivilegedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program())?;
        for arg in self.args() {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

impl fmt::Debug for PrivilegedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivilegedCommand::WriteFile { path, content } => f
                .debug_struct("WriteFile")
                .field("path", path)
                .field("content_len", &content.len())
                .finish(),
            other => write!(f, "PrivilegedCommand({})", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(cmd: &PrivilegedCommand) -> Vec<String> {
        std::iter::once(cmd.program().to_string())
            .chain(cmd.args().iter().map(|a| a.to_string_lossy().into_owned()))
            .collect()
    }

    #[test]
    fn test_hostile_path_stays_one_argument() {
        let cmd = PrivilegedCommand::Remove {
            path: PathBuf::from("/var/www/html/x; rm -rf / #"),
            recursive: true,
        };
        assert_eq!(argv(&cmd), vec!["rm", "-rf", "--", "/var/www/html/x; rm -rf / #"]);
    }

    #[test]
    fn test_chmod_renders_octal() {
        let cmd = PrivilegedCommand::Chmod {
            mode: 0o2775,
            path: PathBuf::from("/srv/a"),
            recursive: false,
        };
        assert_eq!(argv(&cmd), vec!["chmod", "2775", "--", "/srv/a"]);
    }

    #[test]
    fn test_write_file_feeds_stdin() {
        let cmd = PrivilegedCommand::WriteFile {
            path: PathBuf::from("/etc/motd"),
            content: b"hello".to_vec(),
        };
        assert_eq!(argv(&cmd), vec!["dd", "of=/etc/motd", "status=none"]);
        assert_eq!(cmd.stdin(), Some(&b"hello"[..]));
        // payload never reaches the log representation
        assert!(!format!("{:?}", cmd).contains("hello"));
    }

    #[test]
    fn test_find_root_never_looks_like_an_option() {
        let cmd = PrivilegedCommand::ChmodTree {
            root: PathBuf::from("-delete"),
            kind: TreeKind::Files,
            mode: 0o664,
        };
        let v = argv(&cmd);
        assert_eq!(v[1], "./-delete");
        assert_eq!(&v[2..], ["-type", "f", "-exec", "chmod", "664", "{}", "+"]);
    }

    #[test]
    fn test_purge_temp_groups_name_patterns() {
        let cmd = PrivilegedCommand::PurgeTemp {
            dir: PathBuf::from("/tmp"),
            max_age_days: 7,
        };
        assert_eq!(
            argv(&cmd).join(" "),
            "find /tmp -type f ( -name *.tmp -o -name *.temp -o -name *.bak ) -mtime +7 -delete"
        );
    }

    #[test]
    fn test_listing_formats() {
        let long = PrivilegedCommand::ListDir {
            dir: PathBuf::from("/root"),
            format: ListingFormat::LongListing,
        };
        assert_eq!(argv(&long), vec!["ls", "-la", "--", "/root"]);

        let nul = PrivilegedCommand::ListDir {
            dir: PathBuf::from("/root"),
            format: ListingFormat::NullDelimited,
        };
        let v = argv(&nul);
        assert_eq!(v[0], "find");
        assert_eq!(v[1], "/root");
        assert_eq!(v.last().map(|s| s.matches("\\0").count()), Some(NULL_LISTING_FIELDS));
    }
}
