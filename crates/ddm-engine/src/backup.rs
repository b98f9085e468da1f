//! Backup: one-shot alignment of a destination tree to a source tree,
//! with an optional bit-rot guard when metadata replicas exist.

use std::io::Write as _;
use std::path::Path;

use owo_colors::OwoColorize;

use ddm_core::{
    compare, diff2, paths, CompareOpt, DirectoryTree, FileKind, ScanOpt, WarningCallback,
};

use crate::error::EngineError;
use crate::manager::{scan_source_and_dest, TreeManager};
use crate::prompt::Prompter;
use crate::scrub::scrub_impl;

/// Mirror `src` into `dst` without metadata replicas. Scans omit
/// hashing; change detection falls back to mtime and size.
pub fn backup(
    src: &Path,
    dst: &Path,
    parallel: bool,
    warning: Option<&WarningCallback>,
    prompter: &mut dyn Prompter,
) -> Result<i32, EngineError> {
    println!(
        "Backing up directory {}\nto directory {}",
        src.display(),
        dst.display()
    );
    let (src_tree, mut dst_tree) =
        scan_source_and_dest(src, dst, parallel, ScanOpt::OmitHash, warning)?;
    backup_impl(&src_tree, &mut dst_tree, None, prompter)
}

/// Mirror `src` into `dst` guarded by the two metadata replicas: a
/// scrub runs first, and the replicas are updated and persisted (with
/// `.bak` rotation) on the way out. With `hash_all` unset the scans
/// skip hashing and the missing hashes are computed afterwards, only
/// for entries whose hash is actually absent from the surviving
/// replica.
#[allow(clippy::too_many_arguments)]
pub fn backup_with_meta(
    src: &Path,
    dst: &Path,
    meta1: &Path,
    meta2: &Path,
    fixup: bool,
    hash_all: bool,
    parallel: bool,
    warning: Option<&WarningCallback>,
    prompter: &mut dyn Prompter,
) -> Result<i32, EngineError> {
    println!(
        "Backing up directory {}\nto directory {}\nand metadata files:\n- {}\n- {}",
        src.display(),
        dst.display(),
        meta1.display(),
        meta2.display()
    );
    let opt = if hash_all {
        ScanOpt::ComputeHash
    } else {
        ScanOpt::OmitHash
    };
    let mut tm = TreeManager::with_source(src, dst, meta1, meta2, opt, parallel, warning)?;
    println!("Scrubbing backup directory.");
    let mut result = scrub_impl(&mut tm, fixup, prompter)?;
    match result {
        1 => {
            if !prompter.confirm("Do you want to continue with the backup? [y/n]") {
                tm.finalize()?;
                return Ok(result);
            }
        }
        2 => {
            println!(
                "{}",
                "Refusing to perform backup to an inconsistent directory."
                    .red()
                    .bold()
            );
            tm.finalize()?;
            return Ok(result);
        }
        _ => {}
    }
    // After the scrub the two metadata trees are consistent, so only one
    // is kept. The destination tree cannot take over that role: with
    // hash_all unset it has no hashes for unmodified files, while the
    // replica still carries them.
    tm.discard_meta2();
    tm.save_metadata_on_exit();
    // A backup rewrites both replica files; keep both previous versions.
    tm.save_meta1_previous_version();
    tm.save_meta2_previous_version();
    let result2 = backup_impl(
        tm.src_tree.as_ref().expect("constructed with source"),
        &mut tm.dst_tree,
        Some(&mut tm.meta1_tree),
        prompter,
    )?;
    if result2 != 0 {
        result = result2;
    }
    if !hash_all {
        print!("Computing missing hashes in metadata files... ");
        std::io::stdout().flush().ok();
        tm.meta1_tree.bind_to_top_path(dst)?;
        if let Err(e) = tm.meta1_tree.compute_missing_hashes() {
            println!(
                "{} an error occurred while computing missing hashes. The metadata \
                 files may be corrupt in a silent way. Open them and look for an * \
                 instead of a hash for some files. Bit rot protection will not work \
                 for those files.",
                "Warning:".red().bold()
            );
            return Err(e.into());
        }
        println!("Done.");
    }
    tm.finalize()?;
    Ok(result)
}

/// Apply `diff2(src, dst)` onto the destination tree, the disk below
/// it, and the surviving metadata tree. Returns 2 if bit rot was
/// spotted in the source, else 0.
fn backup_impl(
    src_tree: &DirectoryTree,
    dst_tree: &mut DirectoryTree,
    mut meta_tree: Option<&mut DirectoryTree>,
    prompter: &mut dyn Prompter,
) -> Result<i32, EngineError> {
    print!("Performing backup.\nComparing source directory with backup directory... ");
    std::io::stdout().flush().ok();
    let diff = diff2(src_tree, dst_tree, &CompareOpt::default());
    println!("Done.");
    tracing::debug!("backup has {} differences to apply", diff.len());

    let mut bitrot = false;
    if diff.is_empty() {
        println!("No differences found.");
    }
    for d in &diff {
        match (&d.0[0], &d.0[1]) {
            // Extra in the destination: remove it.
            (None, Some(extra)) => {
                let rel = extra.relative_path().to_string();
                println!(
                    "- Removing {} \"{rel}\" from backup directory.",
                    extra.kind_label()
                );
                dst_tree.remove_from_tree_and_filesystem(&rel)?;
                if let Some(meta) = meta_tree.as_deref_mut() {
                    meta.remove_from_tree(&rel)?;
                }
            }
            // New in the source: copy it over.
            (Some(new), None) => {
                let rel = new.relative_path().to_string();
                println!(
                    "- Copying {} \"{rel}\" to backup directory.",
                    new.kind_label()
                );
                dst_tree.copy_from_tree_and_filesystem(src_tree, &rel, paths::parent_of(&rel))?;
                if let Some(meta) = meta_tree.as_deref_mut() {
                    meta.copy_from_tree(src_tree, &rel, paths::parent_of(&rel))?;
                }
            }
            // Present on both sides but different.
            (Some(src), Some(dst)) => {
                let rel = src.relative_path().to_string();
                let mut opt = CompareOpt {
                    perm: false,
                    owner: false,
                    ..CompareOpt::default()
                };
                if src.kind() != FileKind::Regular || dst.kind() != FileKind::Regular {
                    // The hashing caveat below only applies to regular files.
                    opt.mtime = false;
                } else if !src.hash().is_empty() && !dst.hash().is_empty() {
                    // Matching hashes prove content identity, so an mtime
                    // difference alone can be patched in place. Without
                    // hashes a different mtime must be treated as a
                    // modification: size alone cannot detect a content
                    // change.
                    opt.mtime = false;
                }
                if compare(src, dst, &opt) {
                    println!(
                        "- Updating the metadata of the {} \"{rel}\" in the backup \
                         directory.",
                        src.kind_label()
                    );
                    if src.permissions() != dst.permissions() {
                        dst_tree
                            .modify_permissions_in_tree_and_filesystem(&rel, src.permissions())?;
                        if let Some(meta) = meta_tree.as_deref_mut() {
                            meta.modify_permissions_in_tree(&rel, src.permissions())?;
                        }
                    }
                    if src.user() != dst.user() || src.group() != dst.group() {
                        dst_tree
                            .modify_owner_in_tree_and_filesystem(&rel, src.user(), src.group())?;
                        if let Some(meta) = meta_tree.as_deref_mut() {
                            meta.modify_owner_in_tree(&rel, src.user(), src.group())?;
                        }
                    }
                    if src.mtime() != dst.mtime() {
                        dst_tree.modify_mtime_in_tree_and_filesystem(&rel, src.mtime())?;
                        if let Some(meta) = meta_tree.as_deref_mut() {
                            meta.modify_mtime_in_tree(&rel, src.mtime())?;
                        }
                    }
                } else {
                    let rot_mask = CompareOpt {
                        size: false,
                        hash: false,
                        symlink: false,
                        ..CompareOpt::default()
                    };
                    if compare(src, dst, &rot_mask) {
                        // Content changed, mtime did not: the source copy is
                        // the suspect one, the backup copy is presumed good.
                        bitrot = true;
                        println!(
                            "{} The content of the {} \"{rel}\" changed but the \
                             modified time did not.\nNOT backing up this {} as the \
                             backup copy may be the good one.",
                            "Bit rot in the source directory detected.".red().bold(),
                            src.kind_label(),
                            src.kind_label()
                        );
                    } else {
                        let mut replace = true;
                        if src.mtime() < dst.mtime() {
                            print!("{d}");
                            let question = format!(
                                "The {} \"{rel}\" in the backup directory is newer \
                                 than the {} in the source directory, (did you write \
                                 something directly in the backup directory?)\nDo you \
                                 want me to DELETE the backup entry and REPLACE it \
                                 with the entry in the source directory? [y/n]",
                                dst.kind_label(),
                                src.kind_label()
                            );
                            if !prompter.confirm(&question) {
                                replace = false;
                                println!(
                                    "{} Note that you have to solve this manually, \
                                     and consider that the {} in the source directory \
                                     is currently without a backup.",
                                    "Leaving backup inconsistent.".yellow().bold(),
                                    src.kind_label()
                                );
                            }
                        }
                        if replace {
                            println!(
                                "- Replacing the {} \"{rel}\" in the backup directory \
                                 with the {} in the source directory.",
                                dst.kind_label(),
                                src.kind_label()
                            );
                            dst_tree.remove_from_tree_and_filesystem(&rel)?;
                            dst_tree.copy_from_tree_and_filesystem(
                                src_tree,
                                &rel,
                                paths::parent_of(&rel),
                            )?;
                            if let Some(meta) = meta_tree.as_deref_mut() {
                                meta.remove_from_tree(&rel)?;
                                meta.copy_from_tree(src_tree, &rel, paths::parent_of(&rel))?;
                            }
                        }
                    }
                }
            }
            (None, None) => unreachable!("diff line with no elements"),
        }
    }
    if bitrot {
        println!(
            "{} As this tool by design never writes into the source directory \
             during a backup, you will have to fix this manually. Review the listed \
             files, and if bit rot is confirmed, then manually replace the rotten \
             files in the source directory with the good copy in the backup \
             directory.\nI suggest also running a SMART check as your source disk \
             may be unreliable.",
            "Bit rot was detected in the source directory.".red().bold()
        );
    } else {
        println!("{}", "Backup complete.".green().bold());
    }
    Ok(if bitrot { 2 } else { 0 })
}
