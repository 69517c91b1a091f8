// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Synthetic diagnostic filesystem exposing generated read-only files.
// Author: Lukas Bower

//! Diagnostic filesystem.
//!
//! Directories and read-only files whose content is produced by a
//! [`ShowAttribute`] every time the file is opened. The filesystem has a
//! fixed entry budget so that registration can fail the way a kernel
//! diagnostic mount does under memory pressure.

use std::fmt;
use std::io;

use log::trace;
use thiserror::Error;

/// Errors raised by filesystem operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    /// No entry exists at the path.
    #[error("{0} not found")]
    NotFound(String),
    /// An entry with that name already exists.
    #[error("{0} already exists")]
    Exists(String),
    /// The entry budget is exhausted.
    #[error("no space left to create {0}")]
    NoSpace(String),
    /// The file does not accept writes.
    #[error("{0} is read-only")]
    Permission(String),
    /// A file operation targeted a directory.
    #[error("{0} is a directory")]
    IsDirectory(String),
    /// A path component is a file.
    #[error("{0} is not a directory")]
    NotDirectory(String),
    /// The name is empty or contains `/`.
    #[error("invalid entry name '{0}'")]
    InvalidName(String),
    /// The file's content generator failed.
    #[error("failed to generate {0}")]
    Generate(String),
}

/// Content generator for a read-only file.
pub trait ShowAttribute {
    /// Write the full file content to `out`.
    fn show(&self, out: &mut dyn fmt::Write) -> fmt::Result;
}

/// Handle to a created entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dentry {
    components: Vec<String>,
}

impl Dentry {
    /// Absolute path of the entry.
    #[must_use]
    pub fn path(&self) -> String {
        format!("/{}", self.components.join("/"))
    }

    /// Final path component.
    #[must_use]
    pub fn name(&self) -> &str {
        self.components.last().map_or("", String::as_str)
    }
}

enum EntryKind {
    Directory(Vec<Entry>),
    File(Box<dyn ShowAttribute>),
}

struct Entry {
    name: String,
    mode: u16,
    kind: EntryKind,
}

impl Entry {
    fn directory(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            mode: 0o755,
            kind: EntryKind::Directory(Vec::new()),
        }
    }

    fn child(&self, name: &str) -> Option<&Entry> {
        match &self.kind {
            EntryKind::Directory(children) => children.iter().find(|child| child.name == name),
            EntryKind::File(_) => None,
        }
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut Entry> {
        match &mut self.kind {
            EntryKind::Directory(children) => children.iter_mut().find(|child| child.name == name),
            EntryKind::File(_) => None,
        }
    }

    fn count(&self) -> usize {
        match &self.kind {
            EntryKind::Directory(children) => 1 + children.iter().map(Entry::count).sum::<usize>(),
            EntryKind::File(_) => 1,
        }
    }
}

/// Content of an opened file, generated once at open time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqFile {
    data: Vec<u8>,
    pos: usize,
}

impl SeqFile {
    /// Bytes at `offset`, at most `count` of them.
    #[must_use]
    pub fn read_at(&self, offset: u64, count: u32) -> &[u8] {
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        if start >= self.data.len() {
            return &[];
        }
        let end = start.saturating_add(count as usize).min(self.data.len());
        &self.data[start..end]
    }

    /// Total content length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the content is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Content as text; generators only produce UTF-8.
    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.data).unwrap_or_default()
    }

    /// Consume the handle and return the content.
    #[must_use]
    pub fn into_string(self) -> String {
        String::from_utf8(self.data).unwrap_or_default()
    }
}

impl io::Read for SeqFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = self.read_at(self.pos as u64, u32::try_from(buf.len()).unwrap_or(u32::MAX));
        let len = chunk.len();
        buf[..len].copy_from_slice(chunk);
        self.pos += len;
        Ok(len)
    }
}

/// In-memory diagnostic filesystem.
pub struct DiagFs {
    root: Entry,
    entries: usize,
    max_entries: usize,
}

impl Default for DiagFs {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagFs {
    /// Filesystem without an entry budget.
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// Filesystem holding at most `max_entries` entries besides the root.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            root: Entry::directory(""),
            entries: 0,
            max_entries,
        }
    }

    /// Number of entries besides the root.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    /// Create a directory under `parent`, or under the root when `None`.
    pub fn create_dir(&mut self, name: &str, parent: Option<&Dentry>) -> Result<Dentry, FsError> {
        self.insert(parent, Entry::directory(name))
    }

    /// Create a read-only file whose content comes from `attr`.
    pub fn create_file(
        &mut self,
        name: &str,
        mode: u16,
        parent: Option<&Dentry>,
        attr: Box<dyn ShowAttribute>,
    ) -> Result<Dentry, FsError> {
        self.insert(
            parent,
            Entry {
                name: name.to_owned(),
                mode: mode & 0o555,
                kind: EntryKind::File(attr),
            },
        )
    }

    /// Remove an entry and everything below it.
    pub fn remove_recursive(&mut self, dentry: &Dentry) -> Result<(), FsError> {
        let Some((name, parent)) = dentry.components.split_last() else {
            return Err(FsError::InvalidName(String::new()));
        };
        let dir = self.lookup_dir_mut(parent)?;
        let EntryKind::Directory(children) = &mut dir.kind else {
            return Err(FsError::NotDirectory(join(parent)));
        };
        let position = children
            .iter()
            .position(|child| &child.name == name)
            .ok_or_else(|| FsError::NotFound(dentry.path()))?;
        let removed = children.remove(position);
        self.entries -= removed.count();
        trace!("removed {} ({} entries)", dentry.path(), removed.count());
        Ok(())
    }

    /// Whether an entry exists at `path`.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.lookup(&split(path)).is_ok()
    }

    /// Permission bits of the entry at `path`.
    pub fn mode(&self, path: &str) -> Result<u16, FsError> {
        self.lookup(&split(path)).map(|entry| entry.mode)
    }

    /// Names of the entries in the directory at `path`.
    pub fn list(&self, path: &str) -> Result<Vec<String>, FsError> {
        let entry = self.lookup(&split(path))?;
        match &entry.kind {
            EntryKind::Directory(children) => {
                Ok(children.iter().map(|child| child.name.clone()).collect())
            }
            EntryKind::File(_) => Err(FsError::NotDirectory(path.to_owned())),
        }
    }

    /// Open the file at `path` for reading, generating its content.
    pub fn open(&self, path: &str) -> Result<SeqFile, FsError> {
        let entry = self.lookup(&split(path))?;
        let EntryKind::File(attr) = &entry.kind else {
            return Err(FsError::IsDirectory(path.to_owned()));
        };
        let mut text = String::new();
        attr.show(&mut text)
            .map_err(|_| FsError::Generate(path.to_owned()))?;
        Ok(SeqFile {
            data: text.into_bytes(),
            pos: 0,
        })
    }

    /// Writes are refused; every file is generated.
    pub fn write(&mut self, path: &str, _data: &[u8]) -> Result<usize, FsError> {
        let entry = self.lookup(&split(path))?;
        match entry.kind {
            EntryKind::Directory(_) => Err(FsError::IsDirectory(path.to_owned())),
            EntryKind::File(_) => Err(FsError::Permission(path.to_owned())),
        }
    }

    fn insert(&mut self, parent: Option<&Dentry>, entry: Entry) -> Result<Dentry, FsError> {
        if entry.name.is_empty() || entry.name.contains('/') {
            return Err(FsError::InvalidName(entry.name));
        }
        let mut components = parent.map(|dentry| dentry.components.clone()).unwrap_or_default();
        components.push(entry.name.clone());
        let dentry = Dentry { components };

        if self.entries >= self.max_entries {
            return Err(FsError::NoSpace(dentry.path()));
        }
        let parent_components = &dentry.components[..dentry.components.len() - 1];
        let dir = self.lookup_dir_mut(parent_components)?;
        if dir.child(&entry.name).is_some() {
            return Err(FsError::Exists(dentry.path()));
        }
        let EntryKind::Directory(children) = &mut dir.kind else {
            return Err(FsError::NotDirectory(join(parent_components)));
        };
        children.push(entry);
        self.entries += 1;
        trace!("created {}", dentry.path());
        Ok(dentry)
    }

    fn lookup(&self, components: &[String]) -> Result<&Entry, FsError> {
        let mut entry = &self.root;
        for (depth, component) in components.iter().enumerate() {
            entry = match &entry.kind {
                EntryKind::Directory(_) => entry
                    .child(component)
                    .ok_or_else(|| FsError::NotFound(join(&components[..=depth])))?,
                EntryKind::File(_) => {
                    return Err(FsError::NotDirectory(join(&components[..depth])));
                }
            };
        }
        Ok(entry)
    }

    fn lookup_dir_mut(&mut self, components: &[String]) -> Result<&mut Entry, FsError> {
        let mut entry = &mut self.root;
        for (depth, component) in components.iter().enumerate() {
            if matches!(entry.kind, EntryKind::File(_)) {
                return Err(FsError::NotDirectory(join(&components[..depth])));
            }
            entry = entry
                .child_mut(component)
                .ok_or_else(|| FsError::NotFound(join(&components[..=depth])))?;
        }
        if matches!(entry.kind, EntryKind::File(_)) {
            return Err(FsError::NotDirectory(join(components)));
        }
        Ok(entry)
    }
}

fn split(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}

fn join(components: &[String]) -> String {
    format!("/{}", components.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Read;

    struct Greeting;

    impl ShowAttribute for Greeting {
        fn show(&self, out: &mut dyn fmt::Write) -> fmt::Result {
            out.write_str("hello\n")
        }
    }

    fn greeting() -> Box<dyn ShowAttribute> {
        Box::new(Greeting)
    }

    #[test]
    fn create_open_and_read() {
        let mut fs = DiagFs::new();
        let dir = fs.create_dir("diag", None).unwrap();
        let file = fs.create_file("greeting", 0o444, Some(&dir), greeting()).unwrap();
        assert_eq!(file.path(), "/diag/greeting");
        assert_eq!(fs.list("/diag").unwrap(), vec!["greeting".to_owned()]);
        assert_eq!(fs.mode("/diag/greeting").unwrap(), 0o444);

        let mut handle = fs.open("/diag/greeting").unwrap();
        assert_eq!(handle.read_at(2, 2), b"ll");
        assert_eq!(handle.read_at(64, 2), b"");
        let mut text = String::new();
        handle.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello\n");
    }

    #[test]
    fn files_are_read_only() {
        let mut fs = DiagFs::new();
        fs.create_file("f", 0o644, None, greeting()).unwrap();
        assert_eq!(fs.mode("/f").unwrap(), 0o444);
        assert_eq!(fs.write("/f", b"x"), Err(FsError::Permission("/f".to_owned())));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut fs = DiagFs::new();
        fs.create_dir("diag", None).unwrap();
        assert_eq!(
            fs.create_dir("diag", None),
            Err(FsError::Exists("/diag".to_owned()))
        );
    }

    #[test]
    fn capacity_limits_creation() {
        let mut fs = DiagFs::with_capacity(1);
        let dir = fs.create_dir("diag", None).unwrap();
        assert_eq!(
            fs.create_file("f", 0o444, Some(&dir), greeting()),
            Err(FsError::NoSpace("/diag/f".to_owned()))
        );
    }

    #[test]
    fn remove_recursive_drops_subtree() {
        let mut fs = DiagFs::new();
        let dir = fs.create_dir("diag", None).unwrap();
        let nested = fs.create_dir("nested", Some(&dir)).unwrap();
        fs.create_file("f", 0o444, Some(&nested), greeting()).unwrap();
        assert_eq!(fs.entry_count(), 3);
        fs.remove_recursive(&dir).unwrap();
        assert_eq!(fs.entry_count(), 0);
        assert!(!fs.exists("/diag/nested/f"));
        assert_eq!(
            fs.remove_recursive(&dir),
            Err(FsError::NotFound("/diag".to_owned()))
        );
    }

    #[test]
    fn open_rejects_directories_and_missing_paths() {
        let mut fs = DiagFs::new();
        fs.create_dir("diag", None).unwrap();
        assert_eq!(fs.open("/diag"), Err(FsError::IsDirectory("/diag".to_owned())));
        assert_eq!(
            fs.open("/diag/missing"),
            Err(FsError::NotFound("/diag/missing".to_owned()))
        );
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut fs = DiagFs::new();
        assert!(matches!(fs.create_dir("a/b", None), Err(FsError::InvalidName(_))));
        assert!(matches!(fs.create_dir("", None), Err(FsError::InvalidName(_))));
    }
}
