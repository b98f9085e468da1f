//! Scrub: reconcile a backup directory against its two metadata
//! replicas under a quorum rule.
//!
//! The destination tree is authoritative for what is on disk; the two
//! replicas are authoritative for what should be there. Whenever two of
//! the three agree, the third is repaired towards them. When the two
//! replicas agree against the disk, repairing means touching the backup
//! directory itself, which may need the source directory and the
//! operator's consent.

use std::io::Write as _;
use std::path::Path;

use owo_colors::OwoColorize;

use ddm_core::{
    compare, diff3, paths, CompareOpt, DiffLine, DirectoryTree, FileKind, FilesystemElement,
    ScanOpt, WarningCallback,
};

use crate::error::EngineError;
use crate::manager::TreeManager;
use crate::prompt::Prompter;

/// Outcome of one fixup. The "invalidated" variants report that the fix
/// changed tree shape (diff lines no longer describe reality) or
/// metadata content (replica files must be rewritten), so the caller
/// can recompute or flag accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FixupResult {
    Failed,
    Success,
    SuccessDiffInvalidated,
    SuccessMetadataInvalidated,
    SuccessDiffMetadataInvalidated,
}

/// Scrub without a source directory.
pub fn scrub(
    dst: &Path,
    meta1: &Path,
    meta2: &Path,
    fixup: bool,
    warning: Option<&WarningCallback>,
    prompter: &mut dyn Prompter,
) -> Result<i32, EngineError> {
    println!(
        "Scrubbing backup directory {}\nby comparing it with metadata files:\n- {}\n- {}",
        dst.display(),
        meta1.display(),
        meta2.display()
    );
    let mut tm = TreeManager::without_source(dst, meta1, meta2, ScanOpt::ComputeHash, warning)?;
    let result = scrub_impl(&mut tm, fixup, prompter)?;
    tm.finalize()?;
    Ok(result)
}

/// Scrub with the source directory available for repairs.
pub fn scrub_with_source(
    src: &Path,
    dst: &Path,
    meta1: &Path,
    meta2: &Path,
    fixup: bool,
    parallel: bool,
    warning: Option<&WarningCallback>,
    prompter: &mut dyn Prompter,
) -> Result<i32, EngineError> {
    println!(
        "Scrubbing backup directory {}\nby comparing it with metadata files:\n- {}\n- {}\n\
         and with source directory {}",
        dst.display(),
        meta1.display(),
        meta2.display(),
        src.display()
    );
    let mut tm = TreeManager::with_source(
        src,
        dst,
        meta1,
        meta2,
        ScanOpt::ComputeHash,
        parallel,
        warning,
    )?;
    let result = scrub_impl(&mut tm, fixup, prompter)?;
    tm.finalize()?;
    Ok(result)
}

/// The scrub loop. Returns 0 (clean), 1 (inconsistencies found and all
/// reconciled) or 2 (unrecoverable, or recoverable only with --fixup).
pub(crate) fn scrub_impl(
    tm: &mut TreeManager,
    fixup: bool,
    prompter: &mut dyn Prompter,
) -> Result<i32, EngineError> {
    print!("Comparing backup directory with metadata... ");
    std::io::stdout().flush().ok();
    let full = CompareOpt::default();
    let mut diff = diff3(
        &tm.dst_tree,
        &tm.meta1_tree,
        tm.meta2_tree.as_ref().expect("scrub needs both replicas"),
        &full,
    );
    println!("Done.");
    tracing::debug!("scrub found {} inconsistencies", diff.len());

    if diff.is_empty() {
        println!(
            "{} No differences found.",
            "Scrub complete.".green().bold()
        );
        return Ok(0);
    }
    println!(
        "{} Processing them one by one.\nNote: in the following diff a is the \
         backup directory, b is metadata file 1 while c is metadata file 2",
        "Inconsistencies found.".yellow().bold()
    );

    let mut unrecoverable = false;
    let mut maybe_recoverable = false;
    let mut update_meta1 = false;
    let mut update_meta2 = false;
    loop {
        let mut redo = false;
        for d in &diff {
            // The whole Option<FilesystemElement> is compared, not just
            // the element, so absent entries participate in the vote.
            if d.0[0] == d.0[1] && d.0[0] != d.0[2] {
                print!("{d}");
                println!("Assuming metadata file 2 inconsistent in this case.");
                let result = fix_metadata_entry(
                    &tm.dst_tree,
                    tm.meta2_tree.as_mut().expect("checked above"),
                    &d.0[0],
                    &d.0[2],
                )?;
                update_meta2 = true;
                if result == FixupResult::SuccessDiffMetadataInvalidated {
                    redo = true;
                }
            } else if d.0[0] == d.0[2] && d.0[0] != d.0[1] {
                print!("{d}");
                println!("Assuming metadata file 1 inconsistent in this case.");
                let result = fix_metadata_entry(&tm.dst_tree, &mut tm.meta1_tree, &d.0[0], &d.0[1])?;
                update_meta1 = true;
                if result == FixupResult::SuccessDiffMetadataInvalidated {
                    redo = true;
                }
            } else if d.0[1] == d.0[2] && d.0[0] != d.0[1] {
                print!("{d}");
                println!(
                    "Metadata files are consistent between themselves but differ \
                     from backup directory content."
                );
                if fixup {
                    println!("Trying to fix this.");
                    let result = try_to_fix_backup_entry(
                        tm.src_tree.as_ref(),
                        &mut tm.dst_tree,
                        &mut tm.meta1_tree,
                        tm.meta2_tree.as_mut().expect("checked above"),
                        d,
                        prompter,
                    )?;
                    match result {
                        FixupResult::Success => {}
                        FixupResult::Failed => unrecoverable = true,
                        FixupResult::SuccessDiffInvalidated => redo = true,
                        FixupResult::SuccessMetadataInvalidated => {
                            update_meta1 = true;
                            update_meta2 = true;
                        }
                        FixupResult::SuccessDiffMetadataInvalidated => {
                            update_meta1 = true;
                            update_meta2 = true;
                            redo = true;
                        }
                    }
                } else {
                    println!("Not attempting to fix this because --fixup option not given.");
                    maybe_recoverable = true;
                }
            } else if d.0[0] != d.0[1] && d.0[1] != d.0[2] {
                print!("{d}");
                println!(
                    "Metadata files are inconsistent both among themselves and \
                     with backup directory content. Nothing can be done."
                );
                unrecoverable = true;
            } else {
                debug_assert!(false, "invalid diff line");
            }
            println!();
            if redo {
                break;
            }
        }
        if !redo {
            break;
        }
        println!(
            "\nThe fixup operation modified the backup directory content in a way \
             that invalidated the list of inconsistencies. Rechecking."
        );
        print!("Comparing backup directory with metadata... ");
        std::io::stdout().flush().ok();
        diff = diff3(
            &tm.dst_tree,
            &tm.meta1_tree,
            tm.meta2_tree.as_ref().expect("checked above"),
            &full,
        );
        println!("Done.");
    }
    println!("Inconsistencies processed.");

    if !unrecoverable && !maybe_recoverable {
        tm.save_metadata_on_exit();
        if update_meta1 {
            tm.save_meta1_previous_version();
        }
        if update_meta2 {
            tm.save_meta2_previous_version();
        }
        println!(
            "{} but it was possible to automatically reconcile them.\n\
             Backup directory is now good.",
            "Inconsistencies found".yellow().bold()
        );
        Ok(1)
    } else if unrecoverable {
        println!(
            "{} You will need to manually fix the backup directory.",
            "Unrecoverable inconsistencies found.".red().bold()
        );
        if maybe_recoverable {
            println!(
                "Some inconsistencies may be automatically recoverable by running \
                 again this command with the --fixup option."
            );
            if !tm.has_source() {
                println!("You may want to give me access to the source directory as well (-s option)");
            }
        }
        Ok(2)
    } else {
        println!(
            "{} However it looks like it is possible to attempt recovering all \
             inconsistencies automatically by running this command again and \
             adding the --fixup option.",
            "Unrecovered inconsistencies found.".red().bold()
        );
        if !tm.has_source() {
            println!("You may want to give me access to the source directory as well (-s option)");
        }
        Ok(2)
    }
}

/// Repair a replica that lost the vote: drop its stale entry, then
/// clone the good entry from the destination tree. Recreates the whole
/// subtree even when a single attribute differs; only the in-memory
/// tree is touched.
pub(crate) fn fix_metadata_entry(
    good_tree: &DirectoryTree,
    bad_tree: &mut DirectoryTree,
    good_entry: &Option<FilesystemElement>,
    bad_entry: &Option<FilesystemElement>,
) -> Result<FixupResult, EngineError> {
    if let Some(bad) = bad_entry {
        bad_tree.remove_from_tree(bad.relative_path())?;
    }
    if let Some(good) = good_entry {
        let rel = good.relative_path();
        bad_tree.copy_from_tree(good_tree, rel, paths::parent_of(rel))?;
    }
    let directory_involved = good_entry.as_ref().is_some_and(|e| e.is_directory())
        || bad_entry.as_ref().is_some_and(|e| e.is_directory());
    Ok(if directory_involved {
        FixupResult::SuccessDiffMetadataInvalidated
    } else {
        FixupResult::SuccessMetadataInvalidated
    })
}

/// The compare mask that isolates content: permissions, ownership and
/// mtime are ignored, so equality means "same bytes, same shape".
fn content_only() -> CompareOpt {
    CompareOpt {
        perm: false,
        owner: false,
        mtime: false,
        ..CompareOpt::default()
    }
}

/// The compare mask that isolates bit rot: size, hash and symlink
/// target are ignored, so equality means the content changed while
/// mtime, permissions and owner all stayed the same.
fn metadata_only() -> CompareOpt {
    CompareOpt {
        size: false,
        hash: false,
        symlink: false,
        ..CompareOpt::default()
    }
}

const NOT_FOUND_IN_SOURCE: &str = "There's nothing I can do, but I recommend to \
    double check the source directory path. If it's wrong, please re-run the \
    command with the correct path. If it's correct, please check the source \
    directory manually, if the entry really isn't there maybe it was deleted \
    manually both there and in the backup directory. If this is the only error \
    you could delete and recreate the metadata files.";

const RERUN_WITH_SOURCE: &str = "If you re-run the scrub giving me also the \
    source directory (-s option) I may be able to help by looking for the entry \
    there, but until then, there's nothing I can do.";

/// Try to fix the hard case: both replicas agree but the backup
/// directory content differs from them. `d` is one diff line with
/// `d[0]` the destination, `d[1]`/`d[2]` the agreeing replicas.
pub(crate) fn try_to_fix_backup_entry(
    src_tree: Option<&DirectoryTree>,
    dst_tree: &mut DirectoryTree,
    meta1_tree: &mut DirectoryTree,
    meta2_tree: &mut DirectoryTree,
    d: &DiffLine<3>,
    prompter: &mut dyn Prompter,
) -> Result<FixupResult, EngineError> {
    debug_assert!(d.0[1] == d.0[2], "replicas must agree here");
    match (&d.0[0], &d.0[1]) {
        // Missing from the backup directory.
        (None, Some(meta)) => {
            let rel = meta.relative_path().to_string();
            let label = meta.kind_label();
            println!(
                "The {label} \"{rel}\" is missing in the backup directory but the \
                 metadata files agree it should be there."
            );
            // Symlinks are special: the metadata line carries enough
            // information (the target) to recreate them outright.
            if meta.kind() == FileKind::Symlink {
                println!("Creating the missing symbolic link.");
                dst_tree.add_symlink_to_tree_and_filesystem(meta)?;
                return Ok(FixupResult::Success);
            }
            let Some(src_tree) = src_tree else {
                println!("{RERUN_WITH_SOURCE}");
                return Ok(FixupResult::Failed);
            };
            println!("Trying to see if I can find the missing {label} in the source directory.");
            let Some(item) = src_tree.search(&rel) else {
                println!("The {label} was not found. {NOT_FOUND_IN_SOURCE}");
                return Ok(FixupResult::Failed);
            };
            if &item == meta {
                println!(
                    "The {label} was found in the source directory and matches with \
                     the backup metadata.\nCopying it back into the backup directory."
                );
                dst_tree.copy_from_tree_and_filesystem(src_tree, &rel, paths::parent_of(&rel))?;
                return Ok(if meta.is_directory() {
                    FixupResult::SuccessDiffInvalidated
                } else {
                    FixupResult::Success
                });
            }
            println!(
                "An entry was found in the source directory however, its properties\n\
                 {item}\ndo not match the missing {label}."
            );
            if compare(&item, meta, &content_only()) {
                println!("However, the content is the same, updating backup.");
                dst_tree.copy_from_tree_and_filesystem(src_tree, &rel, paths::parent_of(&rel))?;
                if item.permissions() != meta.permissions() {
                    meta1_tree.modify_permissions_in_tree(&rel, item.permissions())?;
                    meta2_tree.modify_permissions_in_tree(&rel, item.permissions())?;
                }
                if item.user() != meta.user() || item.group() != meta.group() {
                    meta1_tree.modify_owner_in_tree(&rel, item.user(), item.group())?;
                    meta2_tree.modify_owner_in_tree(&rel, item.user(), item.group())?;
                }
                if item.mtime() != meta.mtime() {
                    meta1_tree.modify_mtime_in_tree(&rel, item.mtime())?;
                    meta2_tree.modify_mtime_in_tree(&rel, item.mtime())?;
                }
                Ok(if meta.is_directory() {
                    FixupResult::SuccessDiffMetadataInvalidated
                } else {
                    FixupResult::SuccessMetadataInvalidated
                })
            } else {
                println!(
                    "And the difference includes the entry content. However, as the \
                     entry in the backup is gone, and the source directory has \
                     changed, the best I can do is copy the new entry to the backup."
                );
                dst_tree.copy_from_tree_and_filesystem(src_tree, &rel, paths::parent_of(&rel))?;
                replace_in_metadata(meta1_tree, meta2_tree, src_tree, &rel)?;
                Ok(if item.is_directory() || meta.is_directory() {
                    FixupResult::SuccessDiffMetadataInvalidated
                } else {
                    FixupResult::SuccessMetadataInvalidated
                })
            }
        }
        // Extra entry in the backup directory.
        (Some(extra), None) => {
            let rel = extra.relative_path().to_string();
            let label = extra.kind_label();
            println!(
                "The {label} \"{rel}\" is present in the backup directory but the \
                 metadata files agree it should not be there."
            );
            if !prompter.confirm("Do you want to DELETE it? [y/n]") {
                return Ok(FixupResult::Failed);
            }
            println!("Removing the {label}.");
            let count = dst_tree.remove_from_tree_and_filesystem(&rel)?;
            println!("Removed {count} files or directories.");
            Ok(if extra.is_directory() {
                FixupResult::SuccessDiffInvalidated
            } else {
                FixupResult::Success
            })
        }
        // Present on both sides, but different.
        (Some(disk), Some(meta)) => {
            let rel = meta.relative_path().to_string();
            let label = meta.kind_label();
            println!(
                "The metadata files agree on the properties of the {label} \"{rel}\" \
                 but the entry in the backup directory differs."
            );
            if compare(disk, meta, &content_only()) {
                println!("However, the content is the same, updating backup directory.");
                if disk.permissions() != meta.permissions() {
                    dst_tree.modify_permissions_in_tree_and_filesystem(&rel, meta.permissions())?;
                }
                if disk.user() != meta.user() || disk.group() != meta.group() {
                    dst_tree.modify_owner_in_tree_and_filesystem(&rel, meta.user(), meta.group())?;
                }
                if disk.mtime() != meta.mtime() {
                    dst_tree.modify_mtime_in_tree_and_filesystem(&rel, meta.mtime())?;
                }
                return Ok(FixupResult::Success);
            }
            println!("And the difference includes the entry content.");
            if disk.kind() != meta.kind() {
                println!("{}", "Also, the types differ!".yellow().bold());
            }
            // Content changed while permissions, owner and mtime all
            // stayed the same: that is bit rot, and the operator is
            // warned instead of prompted.
            let bitrot = compare(disk, meta, &metadata_only());
            if bitrot {
                println!(
                    "{} The content of a file changed but the modified time did \
                     not. I suggest running a SMART check as your backup disk may \
                     be unreliable.",
                    "Bit rot in the backup directory detected.".red().bold()
                );
            }
            if disk.kind() == FileKind::Symlink && meta.kind() == FileKind::Symlink {
                if !bitrot
                    && !prompter.confirm("Do you want to UPDATE the symbolic link? [y/n]")
                {
                    return Ok(FixupResult::Failed);
                }
                println!("First removing the old symbolic link.");
                let count = dst_tree.remove_from_tree_and_filesystem(&rel)?;
                println!("Removed {count} entry. Creating updated symbolic link.");
                dst_tree.add_symlink_to_tree_and_filesystem(meta)?;
                return Ok(FixupResult::Success);
            }
            let Some(src_tree) = src_tree else {
                println!("{RERUN_WITH_SOURCE}");
                return Ok(FixupResult::Failed);
            };
            println!("Trying to see if I can find the {label} in the source directory.");
            let Some(item) = src_tree.search(&rel) else {
                println!("The {label} was not found. {NOT_FOUND_IN_SOURCE}");
                return Ok(FixupResult::Failed);
            };
            if &item == meta {
                println!(
                    "The {label} was found in the source directory and matches with \
                     the backup metadata."
                );
                if !bitrot {
                    let question = format!(
                        "Do you want to DELETE the {} in the backup directory and \
                         REPLACE it with the {label} in the source directory? [y/n]",
                        disk.kind_label()
                    );
                    if !prompter.confirm(&question) {
                        return Ok(FixupResult::Failed);
                    }
                }
                let count = dst_tree.remove_from_tree_and_filesystem(&rel)?;
                println!(
                    "Removed {count} files or directories.\nReplacing the content of \
                     the backup directory with the one of the source directory."
                );
                dst_tree.copy_from_tree_and_filesystem(src_tree, &rel, paths::parent_of(&rel))?;
                return Ok(if meta.is_directory() || disk.is_directory() {
                    FixupResult::SuccessDiffInvalidated
                } else {
                    FixupResult::Success
                });
            }
            println!(
                "An entry was found in the source directory however, its properties\n\
                 {item}\ndo not match the {label}."
            );
            if &item == disk {
                println!(
                    "But the source directory matches with the backup directory.\n\
                     Did you do a backup without updating the backup metadata? \
                     Assuming the metadata is not up to date."
                );
                replace_in_metadata(meta1_tree, meta2_tree, src_tree, &rel)?;
                println!("Metadata updated to reflect the source and backup.");
                if bitrot {
                    print_bitrot_epilogue();
                }
                return Ok(if item.is_directory() || meta.is_directory() {
                    FixupResult::SuccessDiffMetadataInvalidated
                } else {
                    FixupResult::SuccessMetadataInvalidated
                });
            }
            if item.kind() != meta.kind() {
                println!("{}", "Also, the types differ!".yellow().bold());
            }
            if compare(&item, disk, &content_only()) {
                println!("However, the content is the same, updating backup.");
                if item.permissions() != meta.permissions() {
                    dst_tree.modify_permissions_in_tree_and_filesystem(&rel, item.permissions())?;
                }
                if item.user() != meta.user() || item.group() != meta.group() {
                    dst_tree.modify_owner_in_tree_and_filesystem(&rel, item.user(), item.group())?;
                }
                if item.mtime() != meta.mtime() {
                    dst_tree.modify_mtime_in_tree_and_filesystem(&rel, item.mtime())?;
                }
                // Source and backup now differ only in metadata, but the
                // metadata files differ in content: update them too.
                println!("Updating metadata files too.");
                replace_in_metadata(meta1_tree, meta2_tree, src_tree, &rel)?;
                if bitrot {
                    print_bitrot_epilogue();
                }
                Ok(if meta.is_directory() || disk.is_directory() {
                    FixupResult::SuccessDiffMetadataInvalidated
                } else {
                    FixupResult::SuccessMetadataInvalidated
                })
            } else {
                let question = format!(
                    "And the difference includes the entry content.\nDo you want to \
                     DELETE the {} in the backup directory and REPLACE it with the \
                     {} in the source directory? [y/n]",
                    disk.kind_label(),
                    item.kind_label()
                );
                if !prompter.confirm(&question) {
                    return Ok(FixupResult::Failed);
                }
                let count = dst_tree.remove_from_tree_and_filesystem(&rel)?;
                println!(
                    "Removed {count} files or directories.\nReplacing the content of \
                     the backup directory with the one of the source directory."
                );
                dst_tree.copy_from_tree_and_filesystem(src_tree, &rel, paths::parent_of(&rel))?;
                replace_in_metadata(meta1_tree, meta2_tree, src_tree, &rel)?;
                Ok(
                    if meta.is_directory() || item.is_directory() || disk.is_directory() {
                        FixupResult::SuccessDiffMetadataInvalidated
                    } else {
                        FixupResult::SuccessMetadataInvalidated
                    },
                )
            }
        }
        (None, None) => {
            debug_assert!(false, "diff line with no elements");
            Ok(FixupResult::Failed)
        }
    }
}

/// Replace `rel` in both replicas with the source tree's version.
fn replace_in_metadata(
    meta1_tree: &mut DirectoryTree,
    meta2_tree: &mut DirectoryTree,
    src_tree: &DirectoryTree,
    rel: &str,
) -> Result<(), EngineError> {
    let parent = paths::parent_of(rel);
    // The entry may be new to a replica; a missing path is fine here.
    let _ = meta1_tree.remove_from_tree(rel);
    meta1_tree.copy_from_tree(src_tree, rel, parent)?;
    let _ = meta2_tree.remove_from_tree(rel);
    meta2_tree.copy_from_tree(src_tree, rel, parent)?;
    Ok(())
}

fn print_bitrot_epilogue() {
    println!(
        "{} Either you restored a backup and that explains why the source and \
         backup directory are the same and in this case you overwrote the good \
         file, or something strange happened to the mtime.",
        "About the bit rot.".yellow().bold()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_tree(text: &str) -> DirectoryTree {
        let mut tree = DirectoryTree::new();
        tree.read_from(text.as_bytes(), "test.met").unwrap();
        tree
    }

    const GOOD: &str = "\
drwxr-xr-x alice users 2020-09-13 12:26:40 +0000 \"sub\"
-rw-r--r-- alice users 2020-09-13 12:26:40 +0000 5 aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d \"f.txt\"

-rw-r--r-- alice users 2020-09-13 12:26:40 +0000 3 da39a3ee5e6b4b0d3255bfef95601890afd80709 \"sub/x\"
";

    #[test]
    fn fix_metadata_entry_replaces_a_rotten_file_entry() {
        let good = read_tree(GOOD);
        let mut bad = read_tree(&GOOD.replace(
            "5 aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d",
            "0 *",
        ));
        let good_entry = good.search("f.txt");
        let bad_entry = bad.search("f.txt");
        let result = fix_metadata_entry(&good, &mut bad, &good_entry, &bad_entry).unwrap();
        assert_eq!(result, FixupResult::SuccessMetadataInvalidated);
        assert_eq!(bad.search("f.txt").unwrap(), good_entry.unwrap());
    }

    #[test]
    fn fix_metadata_entry_recreates_a_missing_directory() {
        let good = read_tree(GOOD);
        let mut bad = read_tree(
            "-rw-r--r-- alice users 2020-09-13 12:26:40 +0000 \
             5 aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d \"f.txt\"\n",
        );
        let good_entry = good.search("sub");
        let result = fix_metadata_entry(&good, &mut bad, &good_entry, &None).unwrap();
        // a directory was involved: the diff over it is now stale
        assert_eq!(result, FixupResult::SuccessDiffMetadataInvalidated);
        assert!(bad.search("sub").unwrap().is_directory());
        assert!(bad.search("sub/x").is_some());
    }

    #[test]
    fn fix_metadata_entry_drops_an_entry_the_disk_does_not_have() {
        let good = read_tree(
            "-rw-r--r-- alice users 2020-09-13 12:26:40 +0000 \
             5 aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d \"f.txt\"\n",
        );
        let mut bad = read_tree(GOOD);
        let stale = bad.search("sub");
        let result = fix_metadata_entry(&good, &mut bad, &None, &stale).unwrap();
        assert_eq!(result, FixupResult::SuccessDiffMetadataInvalidated);
        assert!(bad.search("sub").is_none());
        assert!(bad.search("sub/x").is_none());
    }
}
