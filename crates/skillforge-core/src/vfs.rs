//! In-memory virtual file system.
//!
//! The tree is owned top-down: every directory owns its children, so a node
//! has exactly one parent and cycles are impossible. All mutating operations
//! validate the whole request before touching the tree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Kind of a node in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// Errors that can occur during file system operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VfsError {
    #[error("{0}: No such file or directory")]
    PathNotFound(String),
    #[error("{path}: {}", mismatch_text(.found))]
    TypeMismatch { path: String, found: NodeKind },
    #[error("{0}: File exists")]
    AlreadyExists(String),
    #[error("{0}: Directory not empty")]
    NotEmpty(String),
    #[error("{0}: Device or resource busy")]
    Busy(String),
    #[error("cannot move or copy '{from}' into itself, '{to}'")]
    IntoItself { from: String, to: String },
    #[error("refusing to remove '/'")]
    RootRemoval,
}

const fn mismatch_text(found: &NodeKind) -> &'static str {
    match found {
        NodeKind::Directory => "Is a directory",
        NodeKind::File => "Not a directory",
    }
}

/// A file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    File {
        content: String,
        /// Bumped on every write.
        revision: u64,
    },
    Directory {
        #[serde(default)]
        children: BTreeMap<String, Node>,
    },
}

impl Node {
    const fn empty_dir() -> Self {
        Self::Directory {
            children: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::File { .. } => NodeKind::File,
            Self::Directory { .. } => NodeKind::Directory,
        }
    }
}

/// Serialized form, checked on load.
#[derive(Deserialize)]
struct VfsRepr {
    root: Node,
    cwd: String,
}

/// The virtual file system with its current-directory cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "VfsRepr")]
pub struct Vfs {
    root: Node,
    cwd: String,
}

impl TryFrom<VfsRepr> for Vfs {
    type Error = VfsError;

    fn try_from(repr: VfsRepr) -> Result<Self, Self::Error> {
        if repr.root.kind() != NodeKind::Directory {
            return Err(VfsError::TypeMismatch {
                path: "/".to_string(),
                found: NodeKind::File,
            });
        }
        let mut vfs = Self {
            root: repr.root,
            cwd: "/".to_string(),
        };
        vfs.change_dir(&repr.cwd)?;
        Ok(vfs)
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

fn join(components: &[String]) -> String {
    format!("/{}", components.join("/"))
}

impl Vfs {
    /// An empty tree with the cursor at `/`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Node::empty_dir(),
            cwd: "/".to_string(),
        }
    }

    /// Current working directory as an absolute path.
    #[must_use]
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    fn components(&self, path: &str) -> Vec<String> {
        let mut parts: Vec<String> = Vec::new();
        if !path.starts_with('/') {
            parts.extend(
                self.cwd()
                    .split('/')
                    .filter(|p| !p.is_empty())
                    .map(ToString::to_string),
            );
        }
        for part in path.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other.to_string()),
            }
        }
        parts
    }

    /// Normalize a path (relative to cwd) into an absolute path.
    #[must_use]
    pub fn resolve(&self, path: &str) -> String {
        join(&self.components(path))
    }

    fn lookup(&self, components: &[String], display: &str) -> Result<&Node, VfsError> {
        let mut node = &self.root;
        for part in components {
            node = match node {
                Node::Directory { children } => children
                    .get(part)
                    .ok_or_else(|| VfsError::PathNotFound(display.to_string()))?,
                Node::File { .. } => {
                    return Err(VfsError::TypeMismatch {
                        path: display.to_string(),
                        found: NodeKind::File,
                    });
                }
            };
        }
        Ok(node)
    }

    fn dir_mut(
        &mut self,
        components: &[String],
        display: &str,
    ) -> Result<&mut BTreeMap<String, Node>, VfsError> {
        let mut node = &mut self.root;
        for part in components {
            node = match node {
                Node::Directory { children } => children
                    .get_mut(part)
                    .ok_or_else(|| VfsError::PathNotFound(display.to_string()))?,
                Node::File { .. } => {
                    return Err(VfsError::TypeMismatch {
                        path: display.to_string(),
                        found: NodeKind::File,
                    });
                }
            };
        }
        match node {
            Node::Directory { children } => Ok(children),
            Node::File { .. } => Err(VfsError::TypeMismatch {
                path: display.to_string(),
                found: NodeKind::File,
            }),
        }
    }

    /// Kind of the node at `path`, if it exists.
    #[must_use]
    pub fn kind(&self, path: &str) -> Option<NodeKind> {
        self.lookup(&self.components(path), path)
            .ok()
            .map(Node::kind)
    }

    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.kind(path).is_some()
    }

    #[must_use]
    pub fn is_dir(&self, path: &str) -> bool {
        self.kind(path) == Some(NodeKind::Directory)
    }

    #[must_use]
    pub fn is_file(&self, path: &str) -> bool {
        self.kind(path) == Some(NodeKind::File)
    }

    /// Read a file's content.
    ///
    /// # Errors
    /// `PathNotFound` if missing, `TypeMismatch` if `path` is a directory.
    pub fn read(&self, path: &str) -> Result<&str, VfsError> {
        match self.lookup(&self.components(path), path)? {
            Node::File { content, .. } => Ok(content),
            Node::Directory { .. } => Err(VfsError::TypeMismatch {
                path: path.to_string(),
                found: NodeKind::Directory,
            }),
        }
    }

    /// Modification counter of a file.
    #[must_use]
    pub fn revision(&self, path: &str) -> Option<u64> {
        match self.lookup(&self.components(path), path).ok()? {
            Node::File { revision, .. } => Some(*revision),
            Node::Directory { .. } => None,
        }
    }

    /// Write `content` to a file, replacing what was there.
    ///
    /// Returns `true` when the file was created.
    ///
    /// # Errors
    /// `PathNotFound` if the parent is missing (or the file is missing and
    /// `create_if_missing` is false), `TypeMismatch` if `path` is a directory.
    pub fn write(
        &mut self,
        path: &str,
        content: &str,
        create_if_missing: bool,
    ) -> Result<bool, VfsError> {
        self.update(path, create_if_missing, |existing| {
            existing.clear();
            existing.push_str(content);
        })
    }

    /// Append `content` to a file, creating it when missing.
    ///
    /// # Errors
    /// Same as [`Vfs::write`].
    pub fn append(&mut self, path: &str, content: &str) -> Result<bool, VfsError> {
        self.update(path, true, |existing| existing.push_str(content))
    }

    /// Create an empty file or bump the revision of an existing one.
    ///
    /// # Errors
    /// Same as [`Vfs::write`].
    pub fn touch(&mut self, path: &str) -> Result<bool, VfsError> {
        self.update(path, true, |_| {})
    }

    fn update(
        &mut self,
        path: &str,
        create_if_missing: bool,
        edit: impl FnOnce(&mut String),
    ) -> Result<bool, VfsError> {
        let mut components = self.components(path);
        let Some(name) = components.pop() else {
            return Err(VfsError::TypeMismatch {
                path: path.to_string(),
                found: NodeKind::Directory,
            });
        };
        let parent = self.dir_mut(&components, path)?;
        match parent.get_mut(&name) {
            Some(Node::File { content, revision }) => {
                edit(content);
                *revision += 1;
                Ok(false)
            }
            Some(Node::Directory { .. }) => Err(VfsError::TypeMismatch {
                path: path.to_string(),
                found: NodeKind::Directory,
            }),
            None if create_if_missing => {
                let mut content = String::new();
                edit(&mut content);
                parent.insert(
                    name,
                    Node::File {
                        content,
                        revision: 1,
                    },
                );
                Ok(true)
            }
            None => Err(VfsError::PathNotFound(path.to_string())),
        }
    }

    /// Create a directory.
    ///
    /// With `recursive`, missing parents are created and an existing directory
    /// is not an error. Returns the absolute paths of created directories.
    ///
    /// # Errors
    /// `AlreadyExists`, `PathNotFound` for a missing parent without
    /// `recursive`, `TypeMismatch` when a file sits on the path.
    pub fn mkdir(&mut self, path: &str, recursive: bool) -> Result<Vec<String>, VfsError> {
        let components = self.components(path);

        let mut existing = 0;
        let mut node = &self.root;
        for part in &components {
            match node {
                Node::Directory { children } => match children.get(part) {
                    Some(child) => {
                        node = child;
                        existing += 1;
                    }
                    None => break,
                },
                Node::File { .. } => {
                    return Err(VfsError::TypeMismatch {
                        path: path.to_string(),
                        found: NodeKind::File,
                    });
                }
            }
        }

        if existing == components.len() {
            return match node {
                Node::Directory { .. } if recursive => Ok(Vec::new()),
                _ => Err(VfsError::AlreadyExists(path.to_string())),
            };
        }
        if !recursive && existing + 1 < components.len() {
            return Err(VfsError::PathNotFound(path.to_string()));
        }

        let mut subtree = Node::empty_dir();
        for part in components[existing + 1..].iter().rev() {
            subtree = Node::Directory {
                children: BTreeMap::from([(part.clone(), subtree)]),
            };
        }
        let created = (existing..components.len())
            .map(|i| join(&components[..=i]))
            .collect();
        self.dir_mut(&components[..existing], path)?
            .insert(components[existing].clone(), subtree);
        Ok(created)
    }

    /// Sorted names of the entries in a directory.
    ///
    /// # Errors
    /// `PathNotFound`, or `TypeMismatch` when `path` is a file.
    pub fn list(&self, path: &str) -> Result<Vec<String>, VfsError> {
        match self.lookup(&self.components(path), path)? {
            Node::Directory { children } => Ok(children.keys().cloned().collect()),
            Node::File { .. } => Err(VfsError::TypeMismatch {
                path: path.to_string(),
                found: NodeKind::File,
            }),
        }
    }

    fn contains_cwd(&self, components: &[String]) -> bool {
        let cwd: Vec<&str> = self.cwd.split('/').filter(|p| !p.is_empty()).collect();
        cwd.len() >= components.len() && components.iter().zip(&cwd).all(|(a, b)| a == b)
    }

    /// Remove a file or directory.
    ///
    /// # Errors
    /// `RootRemoval`, `PathNotFound`, `NotEmpty` for a non-empty directory
    /// without `recursive`, `Busy` when the directory holds the cwd.
    pub fn remove(&mut self, path: &str, recursive: bool) -> Result<(), VfsError> {
        let mut components = self.components(path);
        if components.is_empty() {
            return Err(VfsError::RootRemoval);
        }
        if let Node::Directory { children } = self.lookup(&components, path)? {
            if !children.is_empty() && !recursive {
                return Err(VfsError::NotEmpty(path.to_string()));
            }
            if self.contains_cwd(&components) {
                return Err(VfsError::Busy(path.to_string()));
            }
        }
        let Some(name) = components.pop() else {
            return Err(VfsError::RootRemoval);
        };
        self.dir_mut(&components, path)?.remove(&name);
        Ok(())
    }

    /// Move the cursor.
    ///
    /// # Errors
    /// `PathNotFound`, or `TypeMismatch` when `path` is a file.
    pub fn change_dir(&mut self, path: &str) -> Result<(), VfsError> {
        let components = self.components(path);
        match self.lookup(&components, path)? {
            Node::Directory { .. } => {
                self.cwd = join(&components);
                Ok(())
            }
            Node::File { .. } => Err(VfsError::TypeMismatch {
                path: path.to_string(),
                found: NodeKind::File,
            }),
        }
    }

    /// Absolute paths of every file at or below `path`, sorted.
    #[must_use]
    pub fn walk_files(&self, path: &str) -> Vec<String> {
        fn walk(node: &Node, prefix: &str, out: &mut Vec<String>) {
            match node {
                Node::File { .. } => out.push(prefix.to_string()),
                Node::Directory { children } => {
                    for (name, child) in children {
                        let child_path = if prefix == "/" {
                            format!("/{name}")
                        } else {
                            format!("{prefix}/{name}")
                        };
                        walk(child, &child_path, out);
                    }
                }
            }
        }

        let components = self.components(path);
        let mut out = Vec::new();
        if let Ok(node) = self.lookup(&components, path) {
            walk(node, &join(&components), &mut out);
        }
        out
    }

    /// Where `from` lands when copied or moved onto `to`.
    fn destination(&self, from: &[String], to: &str) -> Vec<String> {
        let mut dest = self.components(to);
        if self.is_dir(to) {
            if let Some(name) = from.last() {
                dest.push(name.clone());
            }
        }
        dest
    }

    fn check_transfer(&self, from: &str, to: &str) -> Result<(Vec<String>, Vec<String>), VfsError> {
        let source = self.components(from);
        if source.is_empty() {
            return Err(VfsError::RootRemoval);
        }
        let node = self.lookup(&source, from)?;
        let dest = self.destination(&source, to);
        if dest == source || (node.kind() == NodeKind::Directory && dest.starts_with(&source)) {
            return Err(VfsError::IntoItself {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let Some((_, parent)) = dest.split_last() else {
            return Err(VfsError::RootRemoval);
        };
        match self.lookup(parent, to)? {
            Node::Directory { .. } => {}
            Node::File { .. } => {
                return Err(VfsError::TypeMismatch {
                    path: to.to_string(),
                    found: NodeKind::File,
                });
            }
        }
        if let Ok(existing) = self.lookup(&dest, to) {
            if existing.kind() != node.kind() {
                return Err(VfsError::TypeMismatch {
                    path: to.to_string(),
                    found: existing.kind(),
                });
            }
            if let Node::Directory { children } = existing {
                if !children.is_empty() {
                    return Err(VfsError::NotEmpty(to.to_string()));
                }
            }
        }
        Ok((source, dest))
    }

    fn place(&mut self, mut dest: Vec<String>, to: &str, mut node: Node) -> Result<String, VfsError> {
        let path = join(&dest);
        let Some(name) = dest.pop() else {
            return Err(VfsError::RootRemoval);
        };
        let parent = self.dir_mut(&dest, to)?;
        if let (Some(Node::File { revision: old, .. }), Node::File { revision, .. }) =
            (parent.get(&name), &mut node)
        {
            *revision = old + 1;
        }
        parent.insert(name, node);
        Ok(path)
    }

    /// Copy a file (or, with `recursive`, a directory tree).
    ///
    /// Returns the absolute destination path.
    ///
    /// # Errors
    /// `TypeMismatch` when copying a directory without `recursive`, plus the
    /// lookup errors of the source and destination.
    pub fn copy(&mut self, from: &str, to: &str, recursive: bool) -> Result<String, VfsError> {
        let (source, dest) = self.check_transfer(from, to)?;
        let node = self.lookup(&source, from)?.clone();
        if node.kind() == NodeKind::Directory && !recursive {
            return Err(VfsError::TypeMismatch {
                path: from.to_string(),
                found: NodeKind::Directory,
            });
        }
        self.place(dest, to, node)
    }

    /// Move a file or directory.
    ///
    /// Returns the absolute destination path.
    ///
    /// # Errors
    /// `Busy` when the moved directory holds the cwd, plus the lookup errors
    /// of the source and destination.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<String, VfsError> {
        let (mut source, dest) = self.check_transfer(from, to)?;
        if self.lookup(&source, from)?.kind() == NodeKind::Directory && self.contains_cwd(&source)
        {
            return Err(VfsError::Busy(from.to_string()));
        }
        let Some(name) = source.pop() else {
            return Err(VfsError::RootRemoval);
        };
        let node = self
            .dir_mut(&source, from)?
            .remove(&name)
            .ok_or_else(|| VfsError::PathNotFound(from.to_string()))?;
        self.place(dest, to, node)
    }
}
