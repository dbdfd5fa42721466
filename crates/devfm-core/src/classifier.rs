//! Pure helpers that turn raw filesystem facts into what the file manager
//! shows: protected-path flags, `ls -l` style permission strings, the
//! octal value the permission editor works with, sizes and icon hints.

use std::path::Path;

use devfm_platform::filesystem::{
    FileSystem, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK,
};

use crate::error::GatewayError;

/// System roots flagged for cautious treatment. Matching is by prefix on
/// the absolute path, so the roots themselves (e.g. `/etc`) are not flagged.
pub const PROTECTED_PREFIXES: [&str; 14] = [
    "/etc/", "/boot/", "/bin/", "/sbin/", "/usr/bin/", "/usr/sbin/", "/lib/", "/lib64/",
    "/usr/lib/", "/opt/", "/root/", "/proc/", "/sys/", "/dev/",
];

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

pub fn is_protected_path(path: &Path) -> bool {
    let path = path.to_string_lossy();
    PROTECTED_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// Render a full `st_mode` as a 10-character string like `drwxr-sr-x`.
pub fn format_mode(mode: u32) -> String {
    let kind = match mode & S_IFMT {
        S_IFSOCK => 's',
        S_IFLNK => 'l',
        S_IFREG => '-',
        S_IFBLK => 'b',
        S_IFDIR => 'd',
        S_IFCHR => 'c',
        S_IFIFO => 'p',
        _ => 'u',
    };

    let bit = |mask: u32, c: char| if mode & mask != 0 { c } else { '-' };
    // exec position with its special-bit overlay
    let exec = |x: u32, special: u32, set: char| match (mode & x != 0, mode & special != 0) {
        (true, true) => set,
        (false, true) => set.to_ascii_uppercase(),
        (true, false) => 'x',
        (false, false) => '-',
    };

    let mut out = String::with_capacity(10);
    out.push(kind);
    out.push(bit(0o400, 'r'));
    out.push(bit(0o200, 'w'));
    out.push(exec(0o100, 0o4000, 's'));
    out.push(bit(0o040, 'r'));
    out.push(bit(0o020, 'w'));
    out.push(exec(0o010, 0o2000, 's'));
    out.push(bit(0o004, 'r'));
    out.push(bit(0o002, 'w'));
    out.push(exec(0o001, 0o1000, 't'));
    out
}

/// Permission string of `path`, or `"unknown"` when it cannot be stat'ed.
pub fn format_permissions(fs: &dyn FileSystem, path: &Path) -> String {
    match fs.stat(path) {
        Ok(st) => format_mode(st.mode),
        Err(_) => "unknown".to_string(),
    }
}

/// Derive the 3-digit octal value the permission editor starts from.
///
/// Only a literal `r`, `w` or `x` at positions 1..=9 counts, so setuid,
/// setgid and sticky overlays (`s`, `S`, `t`, `T`) read as not executable.
pub fn parse_permissions_to_mode(perm: &str) -> String {
    let chars: Vec<char> = perm.chars().collect();
    let at = |i: usize, c: char| chars.get(i) == Some(&c);

    (0..3)
        .map(|class| {
            let base = 1 + class * 3;
            let mut digit = 0;
            if at(base, 'r') {
                digit += 4;
            }
            if at(base + 1, 'w') {
                digit += 2;
            }
            if at(base + 2, 'x') {
                digit += 1;
            }
            char::from(b'0' + digit)
        })
        .collect()
}

/// `^[0-7]{3,4}$`
fn is_octal_mode(mode: &str) -> bool {
    (3..=4).contains(&mode.len()) && mode.bytes().all(|b| (b'0'..=b'7').contains(&b))
}

/// Validate and parse a chmod argument. Accepts 3 or 4 octal digits only.
pub fn parse_mode(mode: &str) -> Result<u32, GatewayError> {
    if !is_octal_mode(mode) {
        return Err(GatewayError::malformed("Formato permessi non valido"));
    }
    u32::from_str_radix(mode, 8).map_err(|_| GatewayError::malformed("Formato permessi non valido"))
}

/// Checkbox state (owner rwx, group rwx, other rwx) for an octal mode
/// string. A 4-digit mode contributes only its last three digits.
pub fn mode_to_flags(mode: &str) -> Option<[bool; 9]> {
    if !is_octal_mode(mode) {
        return None;
    }
    let digits = &mode.as_bytes()[mode.len() - 3..];
    let mut flags = [false; 9];
    for (class, d) in digits.iter().enumerate() {
        let value = d - b'0';
        flags[class * 3] = value & 4 != 0;
        flags[class * 3 + 1] = value & 2 != 0;
        flags[class * 3 + 2] = value & 1 != 0;
    }
    Some(flags)
}

/// Inverse of [`mode_to_flags`], as the editor computes it.
pub fn flags_to_mode(flags: &[bool; 9]) -> String {
    flags
        .chunks(3)
        .map(|c| {
            let digit = (c[0] as u8) * 4 + (c[1] as u8) * 2 + (c[2] as u8);
            char::from(b'0' + digit)
        })
        .collect()
}

/// Base-1024 size with up to two decimals, e.g. `1.5 KB`.
pub fn readable_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    let rounded = (size * 100.0).round() / 100.0;
    format!("{} {}", rounded, SIZE_UNITS[unit])
}

/// Icon hint for a file name, keyed by lower-cased extension.
pub fn icon_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "html5",
        "css" => "css3-alt",
        "js" => "js",
        "php" => "php",
        "md" => "markdown",
        "py" => "python",
        "java" => "java",
        "rb" => "gem",
        "json" | "c" | "cpp" | "cs" | "yml" | "yaml" | "xml" => "file-code",
        "sql" | "db" => "database",
        "conf" | "ini" => "cogs",
        "sh" | "bash" => "terminal",
        "txt" => "file-alt",
        "pdf" => "file-pdf",
        "doc" | "docx" => "file-word",
        "xls" | "xlsx" => "file-excel",
        "ppt" | "pptx" => "file-powerpoint",
        "jpg" | "jpeg" | "png" | "gif" | "svg" => "file-image",
        "zip" | "tar" | "gz" | "rar" => "file-archive",
        _ => "file",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_prefixes() {
        for p in PROTECTED_PREFIXES {
            assert!(is_protected_path(Path::new(&format!("{}x", p))), "{}", p);
        }
        assert!(is_protected_path(Path::new("/usr/lib/x86_64-linux-gnu/libc.so")));
        assert!(!is_protected_path(Path::new("/var/www/html/index.php")));
        assert!(!is_protected_path(Path::new("/etc")));
        assert!(!is_protected_path(Path::new("/etcetera/file")));
        assert!(!is_protected_path(Path::new("/usr/local/bin/tool")));
    }

    #[test]
    fn test_format_mode_plain() {
        assert_eq!(format_mode(S_IFREG | 0o644), "-rw-r--r--");
        assert_eq!(format_mode(S_IFDIR | 0o755), "drwxr-xr-x");
        assert_eq!(format_mode(S_IFLNK | 0o777), "lrwxrwxrwx");
        assert_eq!(format_mode(0o755), "urwxr-xr-x");
    }

    #[test]
    fn test_format_mode_special_bits() {
        assert_eq!(format_mode(S_IFDIR | 0o2775), "drwxrwsr-x");
        assert_eq!(format_mode(S_IFREG | 0o4755), "-rwsr-xr-x");
        assert_eq!(format_mode(S_IFREG | 0o4644), "-rwSr--r--");
        assert_eq!(format_mode(S_IFDIR | 0o1777), "drwxrwxrwt");
        assert_eq!(format_mode(S_IFDIR | 0o1776), "drwxrwxrwT");
        assert_eq!(format_mode(S_IFREG | 0o2604), "-rw---Sr--");
    }

    #[test]
    fn test_parse_permissions_ignores_special_overlays() {
        assert_eq!(parse_permissions_to_mode("-rwxr-xr-x"), "755");
        assert_eq!(parse_permissions_to_mode("drwxrwsr-x"), "765");
        assert_eq!(parse_permissions_to_mode("drwxrwxrwt"), "776");
        assert_eq!(parse_permissions_to_mode("-rw-r--r--"), "644");
        assert_eq!(parse_permissions_to_mode("unknown"), "000");
    }

    #[test]
    fn test_editor_round_trip() {
        for mode in 0..0o1000u32 {
            let text = format!("{:03o}", mode);
            let flags = mode_to_flags(&text).unwrap();
            assert_eq!(flags_to_mode(&flags), text);
            assert_eq!(parse_permissions_to_mode(&format_mode(S_IFREG | mode)), text);
        }
    }

    #[test]
    fn test_mode_to_flags_uses_last_three_digits() {
        let flags = mode_to_flags("2775").unwrap();
        assert_eq!(flags, mode_to_flags("775").unwrap());
        assert_eq!(mode_to_flags("75"), None);
        assert_eq!(mode_to_flags("0o755"), None);
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("755").unwrap(), 0o755);
        assert_eq!(parse_mode("2775").unwrap(), 0o2775);
        for bad in ["", "75", "12345", "789", "rwx", " 755", "755\n"] {
            let err = parse_mode(bad).unwrap_err();
            assert_eq!(err.to_string(), "Formato permessi non valido", "{:?}", bad);
        }
    }

    #[test]
    fn test_readable_size() {
        assert_eq!(readable_size(0), "0 B");
        assert_eq!(readable_size(5), "5 B");
        assert_eq!(readable_size(1023), "1023 B");
        assert_eq!(readable_size(1024), "1 KB");
        assert_eq!(readable_size(1536), "1.5 KB");
        assert_eq!(readable_size(1024 * 1024 * 3 + 1024 * 256), "3.25 MB");
        assert_eq!(readable_size(1u64 << 50), "1024 TB");
    }

    #[test]
    fn test_icon_for() {
        assert_eq!(icon_for("index.PHP"), "php");
        assert_eq!(icon_for("style.css"), "css3-alt");
        assert_eq!(icon_for("backup.tar.gz"), "file-archive");
        assert_eq!(icon_for("deploy.sh"), "terminal");
        assert_eq!(icon_for("Makefile"), "file");
    }
}
