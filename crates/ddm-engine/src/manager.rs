//! Loading and saving the trees a scrub or backup works on.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use owo_colors::OwoColorize;

use ddm_core::{DirectoryTree, ScanOpt, WarningCallback};

use crate::error::EngineError;

/// Scan source and destination. With `parallel` set, the source scan
/// runs on a background thread while the foreground scans the
/// destination; the trees share nothing mutable but the id lookup
/// cache, which is internally locked. Errors from both sides are
/// stringified and concatenated, matching the single join point.
pub fn scan_source_and_dest(
    src: &Path,
    dst: &Path,
    parallel: bool,
    opt: ScanOpt,
    warning: Option<&WarningCallback>,
) -> Result<(DirectoryTree, DirectoryTree), EngineError> {
    print!("Scanning source and backup directory... ");
    std::io::stdout().flush().ok();
    let mut src_tree = DirectoryTree::new();
    let mut dst_tree = DirectoryTree::new();
    if let Some(cb) = warning {
        src_tree.set_warning_callback(cb.clone());
        dst_tree.set_warning_callback(cb.clone());
    }
    if parallel {
        let (src_result, dst_result) = std::thread::scope(|scope| {
            let handle = scope.spawn(|| src_tree.scan_directory(src, opt));
            let dst_result = dst_tree.scan_directory(dst, opt);
            let src_result = match handle.join() {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err("source scan thread panicked".to_string()),
            };
            (src_result, dst_result.map_err(|e| e.to_string()))
        });
        let mut message = String::new();
        if let Err(e) = dst_result {
            message.push_str(&e);
        }
        if let Err(e) = src_result {
            if !message.is_empty() {
                message.push(' ');
            }
            message.push_str(&e);
        }
        if !message.is_empty() {
            return Err(EngineError::Scan(message));
        }
    } else {
        src_tree.scan_directory(src, opt)?;
        dst_tree.scan_directory(dst, opt)?;
    }
    println!("Done.");
    Ok((src_tree, dst_tree))
}

/// Owns the trees of one scrub/backup run and the metadata replica
/// bookkeeping: which files to rewrite on exit and which deserve a
/// `.bak` of their previous version.
pub struct TreeManager {
    pub(crate) src_tree: Option<DirectoryTree>,
    pub(crate) dst_tree: DirectoryTree,
    pub(crate) meta1_tree: DirectoryTree,
    /// Dropped after a scrub inside a backup run to save memory; the
    /// first tree is then written to both replica files.
    pub(crate) meta2_tree: Option<DirectoryTree>,
    meta1_path: PathBuf,
    meta2_path: PathBuf,
    save: bool,
    meta1_backup: bool,
    meta2_backup: bool,
}

impl TreeManager {
    /// Load both replicas and scan source and destination.
    pub fn with_source(
        src: &Path,
        dst: &Path,
        meta1: &Path,
        meta2: &Path,
        opt: ScanOpt,
        parallel: bool,
        warning: Option<&WarningCallback>,
    ) -> Result<Self, EngineError> {
        let (meta1_tree, meta2_tree) = load_metadata_files(meta1, meta2, warning)?;
        let (src_tree, dst_tree) = scan_source_and_dest(src, dst, parallel, opt, warning)?;
        Ok(Self {
            src_tree: Some(src_tree),
            dst_tree,
            meta1_tree,
            meta2_tree: Some(meta2_tree),
            meta1_path: meta1.to_path_buf(),
            meta2_path: meta2.to_path_buf(),
            save: false,
            meta1_backup: false,
            meta2_backup: false,
        })
    }

    /// Load both replicas and scan only the backup directory.
    pub fn without_source(
        dst: &Path,
        meta1: &Path,
        meta2: &Path,
        opt: ScanOpt,
        warning: Option<&WarningCallback>,
    ) -> Result<Self, EngineError> {
        let (meta1_tree, meta2_tree) = load_metadata_files(meta1, meta2, warning)?;
        print!("Scanning backup directory... ");
        std::io::stdout().flush().ok();
        let mut dst_tree = DirectoryTree::new();
        if let Some(cb) = warning {
            dst_tree.set_warning_callback(cb.clone());
        }
        dst_tree.scan_directory(dst, opt)?;
        println!("Done.");
        Ok(Self {
            src_tree: None,
            dst_tree,
            meta1_tree,
            meta2_tree: Some(meta2_tree),
            meta1_path: meta1.to_path_buf(),
            meta2_path: meta2.to_path_buf(),
            save: false,
            meta1_backup: false,
            meta2_backup: false,
        })
    }

    pub fn has_source(&self) -> bool {
        self.src_tree.is_some()
    }

    pub fn discard_meta2(&mut self) {
        self.meta2_tree = None;
    }

    /// Request that `finalize` rewrite the replica files.
    pub fn save_metadata_on_exit(&mut self) {
        self.save = true;
    }

    pub fn save_meta1_previous_version(&mut self) {
        self.meta1_backup = true;
    }

    pub fn save_meta2_previous_version(&mut self) {
        self.meta2_backup = true;
    }

    /// Persist the metadata replicas if requested. Files flagged for a
    /// backup get their previous on-disk copy renamed to `<name>.bak`
    /// first, so a crash mid-write still leaves one valid copy.
    pub fn finalize(self) -> Result<(), EngineError> {
        if !self.save {
            return Ok(());
        }
        println!("Updating metadata file 1");
        if self.meta1_backup {
            std::fs::rename(&self.meta1_path, bak_path(&self.meta1_path))?;
        }
        self.meta1_tree.write_to_path(&self.meta1_path)?;
        println!("Updating metadata file 2");
        if self.meta2_backup {
            std::fs::rename(&self.meta2_path, bak_path(&self.meta2_path))?;
        }
        match &self.meta2_tree {
            Some(tree) => tree.write_to_path(&self.meta2_path)?,
            // Not a mistake: after discard_meta2 the first tree is the
            // single surviving copy and goes to both files.
            None => self.meta1_tree.write_to_path(&self.meta2_path)?,
        }
        Ok(())
    }
}

fn bak_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

fn load_metadata_files(
    meta1: &Path,
    meta2: &Path,
    warning: Option<&WarningCallback>,
) -> Result<(DirectoryTree, DirectoryTree), EngineError> {
    print!("Loading metadata files... ");
    std::io::stdout().flush().ok();
    let mut meta1_tree = DirectoryTree::new();
    let mut meta2_tree = DirectoryTree::new();
    if let Some(cb) = warning {
        meta1_tree.set_warning_callback(cb.clone());
        meta2_tree.set_warning_callback(cb.clone());
    }
    let loaded = meta1_tree
        .read_from_path(meta1)
        .and_then(|()| meta2_tree.read_from_path(meta2));
    if let Err(e) = loaded {
        println!(
            "{e}\nIt looks like at least one of the metadata files is corrupted to \
             the point that it cannot be read. The cause may be an unclean unmount \
             of the filesystem (did you run an fsck?), you tried to edit a metadata \
             file with a text editor or bit rot occurred in a metadata file.\n\
             {} You will need to manually fix the backup directory, possibly by \
             recreating metadata files and replacing the corrupted one(s).\n\
             The 'ddm diff' command may help to troubleshoot bad metadata.",
            "Unrecoverable inconsistencies found.".red().bold()
        );
        return Err(e.into());
    }
    println!("Done.");
    Ok((meta1_tree, meta2_tree))
}
