//! `DirectoryTree`: the in-memory representation of a directory tree.
//!
//! All nodes live in one flat map keyed by relative path. The map is
//! both the O(1) index and the owner of every node; parent nodes refer
//! to their children by path, in sibling sort order. This keeps index
//! and tree coherent by construction: there is exactly one entry per
//! reachable node, and no back pointers to keep alive.
//!
//! Mutations come in two flavors: tree-only (safe on trees loaded from
//! metadata files) and tree-and-filesystem (also applies the change on
//! disk under `top_path`, which must be set).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ddm_fs::FileKind;

use crate::element::{sort_order, FilesystemElement, ScanOpt};
use crate::error::CoreError;
use crate::paths;

/// Sink for non-fatal scan and mutation warnings. Shared between the
/// two scan threads, hence the bounds.
pub type WarningCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub(crate) struct Node {
    pub(crate) element: FilesystemElement,
    /// Relative paths of the children, in element sort order. Empty
    /// unless the element is a directory.
    pub(crate) children: Vec<String>,
}

#[derive(Default)]
pub struct DirectoryTree {
    top_path: Option<PathBuf>,
    /// Top-level relative paths, in element sort order.
    roots: Vec<String>,
    nodes: HashMap<String, Node>,
    warning: Option<WarningCallback>,
}

impl DirectoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the sink for warnings; without one they go to
    /// `tracing::warn!`.
    pub fn set_warning_callback(&mut self, callback: WarningCallback) {
        self.warning = Some(callback);
    }

    pub(crate) fn warn(&self, msg: &str) {
        match &self.warning {
            Some(cb) => cb(msg),
            None => tracing::warn!("{msg}"),
        }
    }

    pub fn clear(&mut self) {
        self.top_path = None;
        self.roots.clear();
        self.nodes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of elements in the tree (and entries in the index).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn top_path(&self) -> Option<&Path> {
        self.top_path.as_deref()
    }

    /// Attach a tree loaded from a metadata file to a directory on disk,
    /// enabling the filesystem mutations and hash completion.
    pub fn bind_to_top_path(&mut self, top: &Path) -> Result<(), CoreError> {
        self.top_path = Some(std::path::absolute(top)?);
        Ok(())
    }

    // -- construction --------------------------------------------------

    /// Recursively scan `top`. Children of each directory are visited in
    /// element sort order; symlinks are never followed. Unsupported file
    /// types and multiple hard links produce warnings, not errors.
    pub fn scan_directory(&mut self, top: &Path, opt: ScanOpt) -> Result<(), CoreError> {
        self.clear();
        let top = std::path::absolute(top)?;
        if !top.is_dir() {
            return Err(CoreError::ScanRootNotDirectory(top));
        }
        tracing::debug!("scanning {}", top.display());
        self.top_path = Some(top);
        self.scan_into("", opt)
    }

    fn scan_into(&mut self, rel: &str, opt: ScanOpt) -> Result<(), CoreError> {
        let top = self.top_path.clone().expect("scan_into requires top_path");
        let abs = if rel.is_empty() {
            top.clone()
        } else {
            top.join(rel)
        };
        let mut elems = Vec::new();
        for entry in std::fs::read_dir(&abs)? {
            elems.push(FilesystemElement::from_disk(&entry?.path(), &top, opt)?);
        }
        elems.sort_by(sort_order);
        let child_paths: Vec<String> =
            elems.iter().map(|e| e.relative_path().to_string()).collect();
        for elem in elems {
            if elem.kind() == FileKind::Unknown {
                self.warn(&format!(
                    "Warning: {} unsupported file type",
                    elem.relative_path()
                ));
            }
            if elem.kind() != FileKind::Directory && elem.hard_link_count() > 1 {
                self.warn(&format!(
                    "Warning: {} has multiple hardlinks",
                    elem.relative_path()
                ));
            }
            self.nodes.insert(
                elem.relative_path().to_string(),
                Node {
                    element: elem,
                    children: Vec::new(),
                },
            );
        }
        if rel.is_empty() {
            self.roots = child_paths.clone();
        } else {
            self.nodes
                .get_mut(rel)
                .expect("parent inserted before recursion")
                .children = child_paths.clone();
        }
        for path in &child_paths {
            // Directories only: a symlink to a directory is a symlink
            // here, which also keeps filesystem loops out of the scan.
            if self.nodes[path].element.is_directory() {
                self.scan_into(path, opt)?;
            }
        }
        Ok(())
    }

    /// Directory ⇒ scan it, anything else ⇒ parse it as a metadata file.
    pub fn load_path(&mut self, input: &Path, opt: ScanOpt) -> Result<(), CoreError> {
        if input.is_dir() {
            self.scan_directory(input, opt)
        } else {
            self.read_from_path(input)
        }
    }

    pub fn read_from_path(&mut self, metadata_file: &Path) -> Result<(), CoreError> {
        let file = File::open(metadata_file)
            .map_err(|_| CoreError::FileNotFound(metadata_file.to_path_buf()))?;
        self.read_from(
            BufReader::new(file),
            &metadata_file.display().to_string(),
        )
    }

    /// Parse a metadata file: blocks of lines separated by one blank
    /// line, each block holding the sorted children of one directory,
    /// top level first.
    pub fn read_from<R: BufRead>(&mut self, reader: R, file_name: &str) -> Result<(), CoreError> {
        self.clear();
        let mut line_no = 0u32;
        let mut block: Vec<FilesystemElement> = Vec::new();
        for line in reader.lines() {
            let line = line?;
            line_no += 1;
            if line.is_empty() {
                self.attach_block(&mut block, file_name, line_no)?;
            } else {
                block.push(FilesystemElement::parse(&line, file_name, line_no)?);
            }
        }
        self.attach_block(&mut block, file_name, line_no)
    }

    fn attach_block(
        &mut self,
        block: &mut Vec<FilesystemElement>,
        file: &str,
        line_no: u32,
    ) -> Result<(), CoreError> {
        if block.is_empty() {
            return Ok(());
        }
        let fail = |msg: &str| CoreError::ParseBlock {
            file: file.to_string(),
            line: line_no,
            msg: msg.to_string(),
        };
        let parent = paths::parent_of(block[0].relative_path()).to_string();
        let block_paths: Vec<String> = block
            .iter()
            .map(|e| e.relative_path().to_string())
            .collect();
        for elem in block.drain(..) {
            if paths::parent_of(elem.relative_path()) != parent {
                return Err(fail("different paths grouped"));
            }
            if elem.kind() == FileKind::Unknown {
                self.warn(&format!(
                    "Warning: {} unsupported file type",
                    elem.relative_path()
                ));
            }
            let path = elem.relative_path().to_string();
            let old = self.nodes.insert(
                path,
                Node {
                    element: elem,
                    children: Vec::new(),
                },
            );
            if old.is_some() {
                return Err(fail("duplicate path"));
            }
        }
        if self.roots.is_empty() {
            if !parent.is_empty() {
                return Err(fail("file does not start with top level directory"));
            }
            self.roots = block_paths;
        } else {
            let node = self
                .nodes
                .get_mut(&parent)
                .ok_or_else(|| fail("directory content not preceded by its directory"))?;
            if !node.element.is_directory() {
                return Err(fail("directory content under a non-directory"));
            }
            if !node.children.is_empty() {
                return Err(fail("duplicate noncontiguous directory content"));
            }
            node.children = block_paths;
        }
        Ok(())
    }

    pub fn write_to_path(&self, metadata_file: &Path) -> Result<(), CoreError> {
        let file = File::create(metadata_file)
            .map_err(|_| CoreError::CreateFile(metadata_file.to_path_buf()))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Pre-order block writer: each directory's children as one block,
    /// one blank line between blocks, none at head or tail.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let mut print_break = false;
        self.write_block(writer, &self.roots, &mut print_break)
    }

    fn write_block<W: Write>(
        &self,
        writer: &mut W,
        children: &[String],
        print_break: &mut bool,
    ) -> std::io::Result<()> {
        if *print_break {
            writeln!(writer)?;
        }
        for path in children {
            writeln!(writer, "{}", self.nodes[path].element)?;
        }
        *print_break = !children.is_empty();
        for path in children {
            let node = &self.nodes[path];
            if !node.element.is_directory() {
                break; // directories sort first
            }
            self.write_block(writer, &node.children, print_break)?;
        }
        Ok(())
    }

    // -- lookup --------------------------------------------------------

    /// O(1) index lookup; returns a copy of the element.
    pub fn search(&self, relative_path: &str) -> Option<FilesystemElement> {
        self.nodes.get(relative_path).map(|n| n.element.clone())
    }

    pub(crate) fn get_node(&self, relative_path: &str) -> Option<&Node> {
        self.nodes.get(relative_path)
    }

    pub(crate) fn roots(&self) -> &[String] {
        &self.roots
    }

    fn node(&self, relative_path: &str, op: &'static str) -> Result<&Node, CoreError> {
        self.nodes.get(relative_path).ok_or(CoreError::PathNotFound {
            op,
            path: relative_path.to_string(),
        })
    }

    fn node_mut(&mut self, relative_path: &str, op: &'static str) -> Result<&mut Node, CoreError> {
        self.nodes
            .get_mut(relative_path)
            .ok_or(CoreError::PathNotFound {
                op,
                path: relative_path.to_string(),
            })
    }

    fn check_top_path(&self, op: &'static str) -> Result<&Path, CoreError> {
        self.top_path.as_deref().ok_or(CoreError::NoTopPath(op))
    }

    /// Sort sibling paths by the element order of the nodes they name.
    fn sort_sibling_paths(&self, paths: &mut [String]) {
        paths.sort_by(|a, b| sort_order(&self.nodes[a].element, &self.nodes[b].element));
    }

    // -- mutation: copy ------------------------------------------------

    /// Deep-clone the subtree at `src_rel` of `src_tree` into the
    /// directory `dst_rel` of this tree (tree only).
    pub fn copy_from_tree(
        &mut self,
        src_tree: &DirectoryTree,
        src_rel: &str,
        dst_rel: &str,
    ) -> Result<(), CoreError> {
        self.tree_copy(src_tree, src_rel, dst_rel)?;
        Ok(())
    }

    /// As `copy_from_tree`, and also copy the data on disk: file content
    /// and permissions, symlinks verbatim, directories recursively.
    /// Ownership restoration soft-fails to a warning; mtimes are applied
    /// after content so directory recursion cannot clobber them, and the
    /// destination parent's mtime is restored last.
    pub fn copy_from_tree_and_filesystem(
        &mut self,
        src_tree: &DirectoryTree,
        src_rel: &str,
        dst_rel: &str,
    ) -> Result<(), CoreError> {
        const OP: &str = "copy from tree and filesystem";
        self.check_top_path(OP)?;
        src_tree.check_top_path(OP)?;
        let new_path = self.tree_copy(src_tree, src_rel, dst_rel)?;
        self.filesystem_copy(src_tree, src_rel, &new_path)?;
        self.fixup_parent_mtime(dst_rel)
    }

    /// The in-memory half of a copy; returns the new subtree root path.
    fn tree_copy(
        &mut self,
        src_tree: &DirectoryTree,
        src_rel: &str,
        dst_rel: &str,
    ) -> Result<String, CoreError> {
        const OP: &str = "tree copy";
        if src_rel.is_empty() {
            return Err(CoreError::EmptySourcePath);
        }
        src_tree.node(src_rel, OP)?;
        if !dst_rel.is_empty() {
            let dst = self.node(dst_rel, OP)?;
            if !dst.element.is_directory() {
                return Err(CoreError::NotADirectory {
                    op: OP,
                    path: dst_rel.to_string(),
                });
            }
        }
        let new_path = paths::join(dst_rel, paths::file_name_of(src_rel));
        if self.nodes.contains_key(&new_path) {
            return Err(CoreError::AlreadyExists {
                op: OP,
                path: new_path,
            });
        }
        self.clone_subtree(src_tree, src_rel, &new_path);
        if dst_rel.is_empty() {
            let mut roots = std::mem::take(&mut self.roots);
            roots.push(new_path.clone());
            self.sort_sibling_paths(&mut roots);
            self.roots = roots;
        } else {
            let mut children = std::mem::take(&mut self.node_mut(dst_rel, OP)?.children);
            children.push(new_path.clone());
            self.sort_sibling_paths(&mut children);
            self.node_mut(dst_rel, OP)?.children = children;
        }
        Ok(new_path)
    }

    /// Clone `src_path`'s subtree under the new prefix `dst_path`,
    /// indexing every cloned node. Sibling order is prefix-invariant, so
    /// child lists keep their order.
    fn clone_subtree(&mut self, src_tree: &DirectoryTree, src_path: &str, dst_path: &str) {
        let src_node = &src_tree.nodes[src_path];
        let mut children = Vec::with_capacity(src_node.children.len());
        for child in &src_node.children {
            let child_dst = paths::join(dst_path, paths::file_name_of(child));
            children.push(child_dst.clone());
            self.clone_subtree(src_tree, child, &child_dst);
        }
        self.nodes.insert(
            dst_path.to_string(),
            Node {
                element: src_node.element.with_relative_path(dst_path),
                children,
            },
        );
    }

    fn filesystem_copy(
        &self,
        src_tree: &DirectoryTree,
        src_path: &str,
        dst_path: &str,
    ) -> Result<(), CoreError> {
        let element = &self.nodes[dst_path].element;
        let src_abs = src_tree.top_path.as_ref().unwrap().join(src_path);
        let dst_abs = self.top_path.as_ref().unwrap().join(dst_path);
        match element.kind() {
            FileKind::Regular => ddm_fs::copy_file(&src_abs, &dst_abs)?,
            FileKind::Symlink => ddm_fs::copy_symlink(&src_abs, &dst_abs)?,
            FileKind::Directory => {
                ddm_fs::create_dir(&dst_abs)?;
                for child_dst in &self.nodes[dst_path].children {
                    let child_src = paths::join(src_path, paths::file_name_of(child_dst));
                    self.filesystem_copy(src_tree, &child_src, child_dst)?;
                }
                std::fs::set_permissions(
                    &dst_abs,
                    std::fs::Permissions::from_mode(element.permissions()),
                )?;
            }
            FileKind::Unknown => {
                return Err(CoreError::UnsupportedCopy(dst_path.to_string()));
            }
        }
        if ddm_fs::change_ownership(&dst_abs, element.user(), element.group()).is_err() {
            self.warn(&format!(
                "Warning: could not change ownership of {}: maybe retry with sudo?",
                dst_abs.display()
            ));
        }
        ddm_fs::set_symlink_mtime(&dst_abs, element.mtime())?;
        Ok(())
    }

    // -- mutation: remove ----------------------------------------------

    /// Drop the node at `rel` with all its descendants (tree only).
    pub fn remove_from_tree(&mut self, rel: &str) -> Result<(), CoreError> {
        const OP: &str = "remove from tree";
        if rel.is_empty() {
            return Err(CoreError::RemoveRoot);
        }
        self.node(rel, OP)?;
        for path in self.subtree_paths(rel) {
            self.nodes.remove(&path);
        }
        let parent = paths::parent_of(rel).to_string();
        if parent.is_empty() {
            self.roots.retain(|p| p != rel);
        } else if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.retain(|p| p != rel);
        }
        Ok(())
    }

    /// As `remove_from_tree`, plus recursive delete on disk; the parent
    /// directory's mtime is restored to its tree value afterwards.
    /// Returns how many filesystem entries were removed.
    pub fn remove_from_tree_and_filesystem(&mut self, rel: &str) -> Result<u64, CoreError> {
        let top = self.check_top_path("remove from tree and filesystem")?.to_path_buf();
        self.remove_from_tree(rel)?;
        let count = ddm_fs::remove_all(&top.join(rel))?;
        self.fixup_parent_mtime(paths::parent_of(rel))?;
        Ok(count)
    }

    /// All paths in the subtree rooted at `rel`, root included.
    fn subtree_paths(&self, rel: &str) -> Vec<String> {
        let mut out = vec![rel.to_string()];
        let mut i = 0;
        while i < out.len() {
            if let Some(node) = self.nodes.get(&out[i]) {
                out.extend(node.children.iter().cloned());
            }
            i += 1;
        }
        out
    }

    // -- mutation: add symlink -----------------------------------------

    /// Insert a symlink element whose parent directory already exists
    /// (tree only). The metadata file carries enough information to
    /// recreate a symlink, which is why only symlinks get an "add".
    pub fn add_symlink_to_tree(&mut self, symlink: &FilesystemElement) -> Result<(), CoreError> {
        const OP: &str = "add symlink to tree";
        if symlink.kind() != FileKind::Symlink {
            return Err(CoreError::NotASymlink(symlink.relative_path().to_string()));
        }
        let rel = symlink.relative_path().to_string();
        if self.nodes.contains_key(&rel) {
            return Err(CoreError::AlreadyExists { op: OP, path: rel });
        }
        let parent = paths::parent_of(&rel).to_string();
        if !parent.is_empty() {
            let parent_node = self.node(&parent, OP)?;
            if !parent_node.element.is_directory() {
                return Err(CoreError::NotADirectory {
                    op: OP,
                    path: parent,
                });
            }
        }
        self.nodes.insert(
            rel.clone(),
            Node {
                element: symlink.clone(),
                children: Vec::new(),
            },
        );
        if parent.is_empty() {
            let mut roots = std::mem::take(&mut self.roots);
            roots.push(rel);
            self.sort_sibling_paths(&mut roots);
            self.roots = roots;
        } else {
            let mut children = std::mem::take(&mut self.node_mut(&parent, OP)?.children);
            children.push(rel);
            self.sort_sibling_paths(&mut children);
            self.node_mut(&parent, OP)?.children = children;
        }
        Ok(())
    }

    pub fn add_symlink_to_tree_and_filesystem(
        &mut self,
        symlink: &FilesystemElement,
    ) -> Result<(), CoreError> {
        let top = self
            .check_top_path("add symlink to tree and filesystem")?
            .to_path_buf();
        self.add_symlink_to_tree(symlink)?;
        let abs = top.join(symlink.relative_path());
        ddm_fs::create_symlink(Path::new(symlink.symlink_target()), &abs)?;
        if ddm_fs::change_ownership(&abs, symlink.user(), symlink.group()).is_err() {
            self.warn(&format!(
                "Warning: could not change ownership of {}: maybe retry with sudo?",
                abs.display()
            ));
        }
        ddm_fs::set_symlink_mtime(&abs, symlink.mtime())?;
        self.fixup_parent_mtime(paths::parent_of(symlink.relative_path()))
    }

    // -- mutation: in-place metadata -----------------------------------

    pub fn modify_permissions_in_tree(&mut self, rel: &str, perms: u32) -> Result<(), CoreError> {
        self.node_mut(rel, "modify permissions in tree")?
            .element
            .set_permissions(perms);
        Ok(())
    }

    pub fn modify_permissions_in_tree_and_filesystem(
        &mut self,
        rel: &str,
        perms: u32,
    ) -> Result<(), CoreError> {
        let top = self
            .check_top_path("modify permissions in tree and filesystem")?
            .to_path_buf();
        self.modify_permissions_in_tree(rel, perms)?;
        std::fs::set_permissions(top.join(rel), std::fs::Permissions::from_mode(perms))?;
        self.fixup_parent_mtime(paths::parent_of(rel))
    }

    pub fn modify_owner_in_tree(
        &mut self,
        rel: &str,
        user: &str,
        group: &str,
    ) -> Result<(), CoreError> {
        self.node_mut(rel, "modify owner in tree")?
            .element
            .set_owner(user, group);
        Ok(())
    }

    /// Ownership changes soft-fail to a warning: running unprivileged is
    /// common and the rest of the mirror is still worth doing.
    pub fn modify_owner_in_tree_and_filesystem(
        &mut self,
        rel: &str,
        user: &str,
        group: &str,
    ) -> Result<(), CoreError> {
        let top = self
            .check_top_path("modify owner in tree and filesystem")?
            .to_path_buf();
        self.modify_owner_in_tree(rel, user, group)?;
        let abs = top.join(rel);
        if ddm_fs::change_ownership(&abs, user, group).is_err() {
            self.warn(&format!(
                "Warning: could not change ownership of {}: maybe retry with sudo?",
                abs.display()
            ));
        }
        self.fixup_parent_mtime(paths::parent_of(rel))
    }

    pub fn modify_mtime_in_tree(&mut self, rel: &str, mtime: i64) -> Result<(), CoreError> {
        self.node_mut(rel, "modify mtime in tree")?
            .element
            .set_mtime(mtime);
        Ok(())
    }

    pub fn modify_mtime_in_tree_and_filesystem(
        &mut self,
        rel: &str,
        mtime: i64,
    ) -> Result<(), CoreError> {
        let top = self
            .check_top_path("modify mtime in tree and filesystem")?
            .to_path_buf();
        self.modify_mtime_in_tree(rel, mtime)?;
        ddm_fs::set_symlink_mtime(&top.join(rel), mtime)?;
        Ok(())
    }

    /// Restamp a directory's on-disk mtime to the value its element
    /// holds. Every filesystem mutation that changes a directory's
    /// content calls this so the copy/remove machinery does not leave
    /// mtime drift behind.
    fn fixup_parent_mtime(&self, dir_rel: &str) -> Result<(), CoreError> {
        if dir_rel.is_empty() {
            return Ok(());
        }
        let node = self.node(dir_rel, "fixup parent mtime")?;
        let top = self.top_path.as_ref().expect("caller checked top_path");
        ddm_fs::set_symlink_mtime(&top.join(dir_rel), node.element.mtime())?;
        Ok(())
    }

    // -- hashes --------------------------------------------------------

    /// Compute the hash of every regular file that is still missing one,
    /// reading content under `top_path`.
    pub fn compute_missing_hashes(&mut self) -> Result<(), CoreError> {
        let top = self.check_top_path("compute missing hashes")?.to_path_buf();
        let mut todo: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.element.kind() == FileKind::Regular && n.element.hash().is_empty())
            .map(|(p, _)| p.clone())
            .collect();
        todo.sort();
        for path in todo {
            self.nodes
                .get_mut(&path)
                .expect("path collected above")
                .element
                .compute_hash_if_needed(&top)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DirectoryTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryTree")
            .field("top_path", &self.top_path)
            .field("elements", &self.nodes.len())
            .finish()
    }
}
