//! `FilesystemElement`: one filesystem entry's captured metadata, and
//! its one-line textual serialization.
//!
//! The line format, one element per line:
//!
//! ```text
//! <T><P> <user> <group> <YYYY-MM-DD> <HH:MM:SS> +0000 [<size> <hash>|<target>] <path>
//! ```
//!
//! where `T` is `-`/`d`/`l`/`?`, `P` is the 9-character rwx string, the
//! timestamp is always UTC, regular files carry size plus either the
//! 40-hex SHA-1 or `*` for "not computed", and symlinks carry their
//! target. Paths are written quoted so names with spaces round-trip.

use std::cmp::Ordering;
use std::fmt::{self, Write as _};
use std::path::Path;

use ddm_fs::{ExtFileStatus, FileKind};

use crate::error::CoreError;

/// Whether a filesystem scan computes content hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOpt {
    ComputeHash,
    OmitHash,
}

#[derive(Debug, Clone)]
pub struct FilesystemElement {
    kind: FileKind,
    /// 12-bit POSIX mode. The setuid/setgid/sticky bits survive in
    /// memory but are dropped by the 9-character serializer.
    permissions: u32,
    user: String,
    group: String,
    mtime: i64,
    size: u64,
    /// 40 hex digits, or empty for "not computed". Regular files only.
    hash: String,
    relative_path: String,
    symlink_target: String,
    /// Filled by scanning only, never serialized.
    hard_link_count: u64,
}

impl FilesystemElement {
    /// Build an element by lstat-ing `path`, recording its path relative
    /// to `top`. Symlink targets are taken verbatim from `readlink`;
    /// FIFOs, devices and sockets become `Unknown`.
    pub fn from_disk(path: &Path, top: &Path, opt: ScanOpt) -> Result<Self, CoreError> {
        let relative_path = ddm_fs::relative_to(path, top)?;
        let st = ExtFileStatus::symlink_status(path)?;
        let mut elem = Self {
            kind: st.kind(),
            permissions: st.permissions(),
            user: st.user()?,
            group: st.group()?,
            mtime: st.mtime(),
            size: 0,
            hash: String::new(),
            relative_path,
            symlink_target: String::new(),
            hard_link_count: st.hard_link_count(),
        };
        match elem.kind {
            FileKind::Regular => {
                elem.size = st.size();
                if opt == ScanOpt::ComputeHash {
                    elem.hash = ddm_fs::hash_file(path)?;
                }
            }
            FileKind::Symlink => {
                let target = std::fs::read_link(path)?;
                elem.symlink_target = target
                    .to_str()
                    .ok_or_else(|| ddm_fs::FsError::NonUtf8Path(target.clone()))?
                    .to_string();
            }
            FileKind::Directory | FileKind::Unknown => {}
        }
        Ok(elem)
    }

    /// Parse one metadata line. `file` and `line_no` feed error reports.
    pub fn parse(line: &str, file: &str, line_no: u32) -> Result<Self, CoreError> {
        let fail = |msg: &str| CoreError::ParseLine {
            file: file.to_string(),
            line: line_no,
            msg: msg.to_string(),
            content: line.to_string(),
        };

        let mut cur = Cursor::new(line);
        let perm_str = cur
            .token()
            .filter(|t| t.chars().count() == 10)
            .ok_or_else(|| fail("Error reading permission string"))?;
        let mut chars = perm_str.chars();
        let kind = match chars.next() {
            Some('-') => FileKind::Regular,
            Some('d') => FileKind::Directory,
            Some('l') => FileKind::Symlink,
            Some('?') => FileKind::Unknown,
            _ => return Err(fail("Unrecognized file type")),
        };
        let mut permissions = 0u32;
        const LETTERS: [char; 3] = ['r', 'w', 'x'];
        for (idx, c) in chars.enumerate() {
            if c == LETTERS[idx % 3] {
                permissions |= 1 << (8 - idx);
            } else if c != '-' {
                return Err(fail("Permissions not correct"));
            }
        }

        let user = cur
            .token()
            .ok_or_else(|| fail("Error reading user/group"))?
            .to_string();
        let group = cur
            .token()
            .ok_or_else(|| fail("Error reading user/group"))?
            .to_string();

        let date = cur.token().ok_or_else(|| fail("Error reading mtime"))?;
        let time = cur.token().ok_or_else(|| fail("Error reading mtime"))?;
        let stamp = format!("{date} {time}");
        let mtime = chrono::NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S")
            .map_err(|_| fail("Error reading mtime"))?
            .and_utc()
            .timestamp();
        // Only UTC is supported; the time zone column must be +0000.
        if cur.token() != Some("+0000") {
            return Err(fail("Error reading mtime"));
        }

        let mut size = 0u64;
        let mut hash = String::new();
        let mut symlink_target = String::new();
        match kind {
            FileKind::Regular => {
                size = cur
                    .token()
                    .and_then(|t| t.parse().ok())
                    .ok_or_else(|| fail("Error reading size"))?;
                let h = cur.token().ok_or_else(|| fail("Error reading hash"))?;
                if h != "*" {
                    // * means the hash was omitted at scan time
                    if h.len() != 40 || !h.chars().all(|c| c.is_ascii_hexdigit()) {
                        return Err(fail("Error reading hash"));
                    }
                    hash = h.to_string();
                }
            }
            FileKind::Symlink => {
                symlink_target = cur
                    .path_token()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| fail("Error reading symlink target"))?;
            }
            FileKind::Directory | FileKind::Unknown => {}
        }

        let relative_path = cur
            .path_token()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| fail("Error reading path"))?;
        if !cur.at_end() {
            return Err(fail("Extra characters at end of line"));
        }

        Ok(Self {
            kind,
            permissions,
            user,
            group,
            mtime,
            size,
            hash,
            relative_path,
            symlink_target,
            hard_link_count: 1,
        })
    }

    /// A clone of `self` placed at a different relative path. Used when
    /// copying subtrees between trees.
    pub fn with_relative_path(&self, relative_path: &str) -> Self {
        let mut elem = self.clone();
        elem.relative_path = relative_path.to_string();
        elem
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Human label for console messages.
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            FileKind::Regular => "file",
            FileKind::Directory => "directory",
            FileKind::Symlink => "symbolic link",
            FileKind::Unknown => "unknown file type",
        }
    }

    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn symlink_target(&self) -> &str {
        &self.symlink_target
    }

    pub fn hard_link_count(&self) -> u64 {
        self.hard_link_count
    }

    pub(crate) fn set_permissions(&mut self, permissions: u32) {
        self.permissions = permissions & 0o7777;
    }

    pub(crate) fn set_owner(&mut self, user: &str, group: &str) {
        self.user = user.to_string();
        self.group = group.to_string();
    }

    pub(crate) fn set_mtime(&mut self, mtime: i64) {
        self.mtime = mtime;
    }

    /// Fill the hash of a regular file whose scan omitted it.
    pub(crate) fn compute_hash_if_needed(&mut self, top: &Path) -> Result<(), CoreError> {
        if self.kind != FileKind::Regular || !self.hash.is_empty() {
            return Ok(());
        }
        self.hash = ddm_fs::hash_file(&top.join(&self.relative_path))?;
        Ok(())
    }
}

impl fmt::Display for FilesystemElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char(match self.kind {
            FileKind::Regular => '-',
            FileKind::Directory => 'd',
            FileKind::Symlink => 'l',
            FileKind::Unknown => '?',
        })?;
        for bit in (0..9).rev() {
            let on = self.permissions & (1 << bit) != 0;
            let letter = ['x', 'w', 'r'][bit % 3];
            f.write_char(if on { letter } else { '-' })?;
        }
        write!(f, " {} {} ", self.user, self.group)?;
        let stamp = chrono::DateTime::from_timestamp(self.mtime, 0).unwrap_or_default();
        write!(f, "{} +0000 ", stamp.format("%Y-%m-%d %H:%M:%S"))?;
        match self.kind {
            FileKind::Regular => {
                if self.hash.is_empty() {
                    write!(f, "{} * ", self.size)?;
                } else {
                    write!(f, "{} {} ", self.size, self.hash)?;
                }
            }
            FileKind::Symlink => {
                write_quoted(f, &self.symlink_target)?;
                f.write_char(' ')?;
            }
            FileKind::Directory | FileKind::Unknown => {}
        }
        write_quoted(f, &self.relative_path)
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        if c == '"' || c == '\\' {
            f.write_char('\\')?;
        }
        f.write_char(c)?;
    }
    f.write_char('"')
}

impl PartialEq for FilesystemElement {
    /// Full equality, except that the hash column is ternary: an element
    /// scanned with hashing omitted still compares equal to the same
    /// entry scanned fully.
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.permissions == other.permissions
            && self.user == other.user
            && self.group == other.group
            && self.mtime == other.mtime
            && self.size == other.size
            && self.relative_path == other.relative_path
            && self.symlink_target == other.symlink_target
            && (self.hash.is_empty() || other.hash.is_empty() || self.hash == other.hash)
    }
}

/// Sibling sort order: directories first, then byte order on the path.
pub fn sort_order(a: &FilesystemElement, b: &FilesystemElement) -> Ordering {
    (!a.is_directory())
        .cmp(&!b.is_directory())
        .then_with(|| a.relative_path.cmp(&b.relative_path))
}

/// Filtered comparison under `opt`. Type and path always participate;
/// each enabled axis must agree. The hash axis is skipped when either
/// side never computed one.
pub fn compare(a: &FilesystemElement, b: &FilesystemElement, opt: &crate::diff::CompareOpt) -> bool {
    if a.kind != b.kind || a.relative_path != b.relative_path {
        return false;
    }
    if opt.perm && a.permissions != b.permissions {
        return false;
    }
    if opt.owner && (a.user != b.user || a.group != b.group) {
        return false;
    }
    if opt.mtime && a.mtime != b.mtime {
        return false;
    }
    if opt.size && a.size != b.size {
        return false;
    }
    if opt.hash && !a.hash.is_empty() && !b.hash.is_empty() && a.hash != b.hash {
        return false;
    }
    if opt.symlink && a.symlink_target != b.symlink_target {
        return false;
    }
    true
}

/// Whitespace tokenizer with quoted-path support.
struct Cursor<'a> {
    s: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Self { s }
    }

    fn token(&mut self) -> Option<&'a str> {
        self.s = self.s.trim_start();
        if self.s.is_empty() {
            return None;
        }
        let end = self.s.find(char::is_whitespace).unwrap_or(self.s.len());
        let (tok, rest) = self.s.split_at(end);
        self.s = rest;
        Some(tok)
    }

    /// A path field: quoted with backslash escapes, or a bare token when
    /// it carries no quote.
    fn path_token(&mut self) -> Option<String> {
        self.s = self.s.trim_start();
        if !self.s.starts_with('"') {
            return self.token().map(str::to_string);
        }
        let mut out = String::new();
        let mut chars = self.s[1..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => return None,
                },
                '"' => {
                    self.s = &self.s[1 + i + 1..];
                    return Some(out);
                }
                _ => out.push(c),
            }
        }
        None // unterminated quote
    }

    /// True only when nothing at all is left, trailing whitespace
    /// included: the path is the last field of the line.
    fn at_end(&self) -> bool {
        self.s.is_empty()
    }
}
