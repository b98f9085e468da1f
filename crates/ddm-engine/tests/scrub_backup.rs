//! End-to-end scenarios for scrub and backup over real temp
//! directories, with scripted operator answers.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use ddm_core::{diff2, CompareOpt, DirectoryTree, ScanOpt};
use ddm_engine::{backup, backup_with_meta, scrub, scrub_with_source, Prompter};

const MTIME: i64 = 1_600_000_000;
const HELLO_HASH: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

/// Fails the test on any prompt.
struct NoPrompts;

impl Prompter for NoPrompts {
    fn confirm(&mut self, question: &str) -> bool {
        panic!("unexpected prompt: {question}");
    }
}

/// Answers from a fixed script, failing on extra prompts.
struct Scripted(VecDeque<bool>);

impl Scripted {
    fn new(answers: &[bool]) -> Self {
        Self(answers.iter().copied().collect())
    }
}

impl Prompter for Scripted {
    fn confirm(&mut self, question: &str) -> bool {
        self.0.pop_front().unwrap_or_else(|| panic!("unexpected prompt: {question}"))
    }
}

fn write_file(path: &Path, content: &[u8]) {
    std::fs::write(path, content).unwrap();
    ddm_fs::set_symlink_mtime(path, MTIME).unwrap();
}

fn scan(root: &Path) -> DirectoryTree {
    let mut tree = DirectoryTree::new();
    tree.scan_directory(root, ScanOpt::ComputeHash).unwrap();
    tree
}

/// Write the two metadata replicas describing `dst` as it is now.
fn write_replicas(dst: &Path, meta_dir: &Path) -> (PathBuf, PathBuf) {
    let tree = scan(dst);
    let m1 = meta_dir.join("backup.1.met");
    let m2 = meta_dir.join("backup.2.met");
    tree.write_to_path(&m1).unwrap();
    tree.write_to_path(&m2).unwrap();
    (m1, m2)
}

fn trees_equal(a: &Path, b: &Path) -> bool {
    diff2(&scan(a), &scan(b), &CompareOpt::default()).is_empty()
}

#[test]
fn scrub_of_clean_backup_returns_zero() {
    let dst = tempfile::tempdir().unwrap();
    let meta = tempfile::tempdir().unwrap();
    write_file(&dst.path().join("f.txt"), b"hello");
    let (m1, m2) = write_replicas(dst.path(), meta.path());

    let code = scrub(dst.path(), &m1, &m2, false, None, &mut NoPrompts).unwrap();
    assert_eq!(code, 0);
    // clean scrub rewrites nothing
    assert!(!meta.path().join("backup.1.met.bak").exists());
    assert!(!meta.path().join("backup.2.met.bak").exists());
}

#[test]
fn scrub_repairs_rotten_replica_and_keeps_a_bak() {
    let dst = tempfile::tempdir().unwrap();
    let meta = tempfile::tempdir().unwrap();
    write_file(&dst.path().join("f.txt"), b"hello");
    let (m1, m2) = write_replicas(dst.path(), meta.path());

    // Corrupt replica 2: f.txt recorded with size 0 and no hash.
    let good = std::fs::read_to_string(&m2).unwrap();
    let corrupted = good.replace(&format!("5 {HELLO_HASH}"), "0 *");
    assert_ne!(good, corrupted);
    std::fs::write(&m2, &corrupted).unwrap();

    let code = scrub(dst.path(), &m1, &m2, true, None, &mut NoPrompts).unwrap();
    assert_eq!(code, 1);
    // replica 2 repaired, its previous version kept; replica 1 untouched
    assert_eq!(
        std::fs::read_to_string(&m2).unwrap(),
        std::fs::read_to_string(&m1).unwrap()
    );
    assert_eq!(
        std::fs::read_to_string(meta.path().join("backup.2.met.bak")).unwrap(),
        corrupted
    );
    assert!(!meta.path().join("backup.1.met.bak").exists());
    assert_eq!(std::fs::read_to_string(&m1).unwrap(), good);
    // the backup directory itself was never touched
    assert_eq!(std::fs::read(dst.path().join("f.txt")).unwrap(), b"hello");
}

#[test]
fn scrub_quorum_repairs_whichever_replica_lost_the_vote() {
    let dst = tempfile::tempdir().unwrap();
    let meta = tempfile::tempdir().unwrap();
    write_file(&dst.path().join("f.txt"), b"hello");
    let (m1, m2) = write_replicas(dst.path(), meta.path());

    // This time replica 1 rots: mtime drifts by an hour.
    let good = std::fs::read_to_string(&m1).unwrap();
    let corrupted = good.replace("12:26:40", "13:26:40");
    assert_ne!(good, corrupted);
    std::fs::write(&m1, &corrupted).unwrap();

    let code = scrub(dst.path(), &m1, &m2, true, None, &mut NoPrompts).unwrap();
    assert_eq!(code, 1);
    assert_eq!(std::fs::read_to_string(&m1).unwrap(), good);
    assert!(meta.path().join("backup.1.met.bak").exists());
    assert!(!meta.path().join("backup.2.met.bak").exists());
}

#[test]
fn scrub_detects_bit_rot_and_restores_from_source_without_prompting() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let meta = tempfile::tempdir().unwrap();
    write_file(&src.path().join("f.txt"), b"hello");
    write_file(&dst.path().join("f.txt"), b"hello");
    let (m1, m2) = write_replicas(dst.path(), meta.path());

    // Rot the backup copy: different bytes, same size, same mtime.
    write_file(&dst.path().join("f.txt"), b"jello");

    let code = scrub_with_source(
        src.path(),
        dst.path(),
        &m1,
        &m2,
        true,
        false,
        None,
        &mut NoPrompts, // bit rot suppresses the confirmation prompt
    )
    .unwrap();
    assert_eq!(code, 1);
    assert_eq!(std::fs::read(dst.path().join("f.txt")).unwrap(), b"hello");
}

#[test]
fn scrub_recreates_missing_symlink_from_metadata_alone() {
    let dst = tempfile::tempdir().unwrap();
    let meta = tempfile::tempdir().unwrap();
    write_file(&dst.path().join("f.txt"), b"hello");
    std::os::unix::fs::symlink("f.txt", dst.path().join("link")).unwrap();
    ddm_fs::set_symlink_mtime(&dst.path().join("link"), MTIME).unwrap();
    let (m1, m2) = write_replicas(dst.path(), meta.path());

    std::fs::remove_file(dst.path().join("link")).unwrap();

    // No source directory needed: the replica line carries the target.
    let code = scrub(dst.path(), &m1, &m2, true, None, &mut NoPrompts).unwrap();
    assert_eq!(code, 1);
    assert_eq!(
        std::fs::read_link(dst.path().join("link")).unwrap(),
        PathBuf::from("f.txt")
    );
}

#[test]
fn scrub_deletes_extra_entry_only_with_consent() {
    let dst = tempfile::tempdir().unwrap();
    let meta = tempfile::tempdir().unwrap();
    write_file(&dst.path().join("f.txt"), b"hello");
    let (m1, m2) = write_replicas(dst.path(), meta.path());
    write_file(&dst.path().join("stray.txt"), b"stray");

    // Without --fixup nothing is attempted and the exit hints at it.
    let code = scrub(dst.path(), &m1, &m2, false, None, &mut NoPrompts).unwrap();
    assert_eq!(code, 2);
    assert!(dst.path().join("stray.txt").exists());

    // Declined: the stray file survives, the scrub is unrecoverable.
    let code = scrub(dst.path(), &m1, &m2, true, None, &mut Scripted::new(&[false])).unwrap();
    assert_eq!(code, 2);
    assert!(dst.path().join("stray.txt").exists());

    // Accepted: the stray file goes away.
    let code = scrub(dst.path(), &m1, &m2, true, None, &mut Scripted::new(&[true])).unwrap();
    assert_eq!(code, 1);
    assert!(!dst.path().join("stray.txt").exists());
}

#[test]
fn scrub_restores_a_whole_missing_directory_and_recomputes_the_diff() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let meta = tempfile::tempdir().unwrap();
    for root in [src.path(), dst.path()] {
        write_file(&root.join("f.txt"), b"hello");
        std::fs::create_dir(root.join("sub")).unwrap();
        write_file(&root.join("sub/x"), b"xdata");
        write_file(&root.join("sub/y"), b"ydata");
        ddm_fs::set_symlink_mtime(&root.join("sub"), MTIME).unwrap();
    }
    let (m1, m2) = write_replicas(dst.path(), meta.path());

    // The whole subtree vanishes from the backup. The diff prunes it to
    // one line; repairing it invalidates that diff and forces a redo.
    std::fs::remove_dir_all(dst.path().join("sub")).unwrap();

    let code = scrub_with_source(
        src.path(),
        dst.path(),
        &m1,
        &m2,
        true,
        false,
        None,
        &mut NoPrompts,
    )
    .unwrap();
    assert_eq!(code, 1);
    assert_eq!(std::fs::read(dst.path().join("sub/x")).unwrap(), b"xdata");
    assert_eq!(std::fs::read(dst.path().join("sub/y")).unwrap(), b"ydata");
    assert!(trees_equal(src.path(), dst.path()));
}

#[test]
fn scrub_gives_up_when_no_two_copies_agree() {
    let dst = tempfile::tempdir().unwrap();
    let meta = tempfile::tempdir().unwrap();
    write_file(&dst.path().join("f.txt"), b"hello");
    let (m1, m2) = write_replicas(dst.path(), meta.path());

    // Three-way disagreement on the same entry: replica 1 drifts in
    // mtime, replica 2 in size, and the disk matches neither.
    let text = std::fs::read_to_string(&m1).unwrap();
    std::fs::write(&m1, text.replace("12:26:40", "13:26:40")).unwrap();
    let text = std::fs::read_to_string(&m2).unwrap();
    std::fs::write(&m2, text.replace(&format!("5 {HELLO_HASH}"), "6 *")).unwrap();
    write_file(&dst.path().join("f.txt"), b"jello");

    let m1_before = std::fs::read_to_string(&m1).unwrap();
    let code = scrub(dst.path(), &m1, &m2, true, None, &mut NoPrompts).unwrap();
    assert_eq!(code, 2);
    // nothing was persisted
    assert_eq!(std::fs::read_to_string(&m1).unwrap(), m1_before);
    assert!(!meta.path().join("backup.1.met.bak").exists());
}

#[test]
fn backup_reaches_a_fixed_point() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    write_file(&src.path().join("f.txt"), b"hello");
    std::fs::create_dir(src.path().join("sub")).unwrap();
    write_file(&src.path().join("sub/x"), b"xdata");
    std::os::unix::fs::symlink("f.txt", src.path().join("link")).unwrap();
    ddm_fs::set_symlink_mtime(&src.path().join("link"), MTIME).unwrap();
    ddm_fs::set_symlink_mtime(&src.path().join("sub"), MTIME).unwrap();
    write_file(&dst.path().join("stray.txt"), b"to be removed");

    let code = backup(src.path(), dst.path(), false, None, &mut NoPrompts).unwrap();
    assert_eq!(code, 0);
    assert!(!dst.path().join("stray.txt").exists());
    assert_eq!(std::fs::read(dst.path().join("sub/x")).unwrap(), b"xdata");
    assert!(trees_equal(src.path(), dst.path()));

    // Running it again finds nothing to do.
    let code = backup(src.path(), dst.path(), false, None, &mut NoPrompts).unwrap();
    assert_eq!(code, 0);
    assert!(trees_equal(src.path(), dst.path()));
}

#[test]
fn backup_patches_mtime_only_difference_when_hashes_match() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let meta = tempfile::tempdir().unwrap();
    write_file(&src.path().join("f.txt"), b"hello");
    write_file(&dst.path().join("f.txt"), b"hello");
    ddm_fs::set_symlink_mtime(&src.path().join("f.txt"), MTIME + 60).unwrap();
    let (m1, m2) = write_replicas(dst.path(), meta.path());

    let code = backup_with_meta(
        src.path(),
        dst.path(),
        &m1,
        &m2,
        false,
        true, // hash everything: identical hashes prove content identity
        false,
        None,
        &mut NoPrompts,
    )
    .unwrap();
    assert_eq!(code, 0);
    // content untouched, mtime patched in place
    assert_eq!(std::fs::read(dst.path().join("f.txt")).unwrap(), b"hello");
    assert!(trees_equal(src.path(), dst.path()));
}

#[test]
fn backup_nohash_copies_new_file_and_completes_hashes_lazily() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let meta = tempfile::tempdir().unwrap();
    write_file(&src.path().join("f.txt"), b"hello");
    write_file(&src.path().join("g.bin"), b"world!!");
    write_file(&dst.path().join("f.txt"), b"hello");
    let (m1, m2) = write_replicas(dst.path(), meta.path());

    let code = backup_with_meta(
        src.path(),
        dst.path(),
        &m1,
        &m2,
        false,
        false, // --nohash
        false,
        None,
        &mut NoPrompts,
    )
    .unwrap();
    assert_eq!(code, 0);
    assert_eq!(std::fs::read(dst.path().join("g.bin")).unwrap(), b"world!!");

    // Both replicas were rewritten with full hashes: the old one for
    // f.txt kept, the new one for g.bin computed from the destination.
    let m1_text = std::fs::read_to_string(&m1).unwrap();
    assert!(m1_text.contains(HELLO_HASH));
    assert!(m1_text.contains(&ddm_fs::hash_file(&dst.path().join("g.bin")).unwrap()));
    assert!(!m1_text.contains('*'));
    assert_eq!(m1_text, std::fs::read_to_string(&m2).unwrap());
    // previous replica versions were rotated away
    assert!(meta.path().join("backup.1.met.bak").exists());
    assert!(meta.path().join("backup.2.met.bak").exists());
}

#[test]
fn backup_refuses_to_propagate_source_bit_rot() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let meta = tempfile::tempdir().unwrap();
    write_file(&src.path().join("f.txt"), b"hello");
    write_file(&dst.path().join("f.txt"), b"hello");
    let (m1, m2) = write_replicas(dst.path(), meta.path());

    // Rot the source: new bytes, same size, same mtime.
    write_file(&src.path().join("f.txt"), b"jello");

    let code = backup_with_meta(
        src.path(),
        dst.path(),
        &m1,
        &m2,
        false,
        true,
        false,
        None,
        &mut NoPrompts,
    )
    .unwrap();
    assert_eq!(code, 2);
    // the presumed-good backup copy stays
    assert_eq!(std::fs::read(dst.path().join("f.txt")).unwrap(), b"hello");
}

#[test]
fn backup_asks_before_replacing_a_newer_destination_entry() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    write_file(&src.path().join("f.txt"), b"new");
    write_file(&dst.path().join("f.txt"), b"old!");
    ddm_fs::set_symlink_mtime(&dst.path().join("f.txt"), MTIME + 100).unwrap();

    // Declined: the newer destination copy survives.
    let code = backup(src.path(), dst.path(), false, None, &mut Scripted::new(&[false])).unwrap();
    assert_eq!(code, 0);
    assert_eq!(std::fs::read(dst.path().join("f.txt")).unwrap(), b"old!");

    // Accepted: the source version wins.
    let code = backup(src.path(), dst.path(), false, None, &mut Scripted::new(&[true])).unwrap();
    assert_eq!(code, 0);
    assert_eq!(std::fs::read(dst.path().join("f.txt")).unwrap(), b"new");
}

#[test]
fn parallel_and_sequential_scans_agree() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    write_file(&src.path().join("f.txt"), b"hello");
    std::fs::create_dir(src.path().join("sub")).unwrap();
    write_file(&src.path().join("sub/x"), b"xdata");
    ddm_fs::set_symlink_mtime(&src.path().join("sub"), MTIME).unwrap();

    let (seq_src, _) = ddm_engine::scan_source_and_dest(
        src.path(),
        dst.path(),
        false,
        ScanOpt::ComputeHash,
        None,
    )
    .unwrap();
    let (par_src, _) = ddm_engine::scan_source_and_dest(
        src.path(),
        dst.path(),
        true,
        ScanOpt::ComputeHash,
        None,
    )
    .unwrap();
    assert!(diff2(&seq_src, &par_src, &CompareOpt::default()).is_empty());
}
