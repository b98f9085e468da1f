//! Recursive 2-way and 3-way tree comparison with subtree pruning.
//!
//! Both diffs walk the trees level by level over the union of child
//! names. A name present on only one side is reported as a single line
//! and never recursed into: a whole missing subtree is one line, not
//! one per descendant. Recursion continues only through directories
//! present on at least two sides.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::element::{compare, FilesystemElement};
use crate::error::CoreError;
use crate::tree::DirectoryTree;

/// Which attributes participate in a filtered comparison. All enabled
/// by default; the CLI `-i` ignore list disables axes.
#[derive(Debug, Clone, Copy)]
pub struct CompareOpt {
    pub perm: bool,
    pub owner: bool,
    pub mtime: bool,
    pub size: bool,
    pub hash: bool,
    pub symlink: bool,
}

impl Default for CompareOpt {
    fn default() -> Self {
        Self {
            perm: true,
            owner: true,
            mtime: true,
            size: true,
            hash: true,
            symlink: true,
        }
    }
}

impl FromStr for CompareOpt {
    type Err = CoreError;

    /// Parse a comma or space separated ignore list: each token turns
    /// one axis off, `all` turns everything off so only presence and
    /// type matter.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut opt = Self::default();
        for token in s.split([',', ' ']).filter(|t| !t.is_empty()) {
            match token {
                "perm" => opt.perm = false,
                "owner" => opt.owner = false,
                "mtime" => opt.mtime = false,
                "size" => opt.size = false,
                "hash" => opt.hash = false,
                "symlink" => opt.symlink = false,
                "all" => {
                    opt = Self {
                        perm: false,
                        owner: false,
                        mtime: false,
                        size: false,
                        hash: false,
                        symlink: false,
                    }
                }
                other => return Err(CoreError::InvalidIgnoreOption(other.to_string())),
            }
        }
        Ok(opt)
    }
}

/// One point of disagreement between N trees: the element from each
/// tree, or `None` where the entry is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffLine<const N: usize>(pub [Option<FilesystemElement>; N]);

pub type DirectoryDiff<const N: usize> = Vec<DiffLine<N>>;

impl fmt::Display for DiffLine<2> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (prefix, side) in ["-", "+"].iter().zip(self.0.iter()) {
            match side {
                Some(e) => writeln!(f, "{prefix} {e}")?,
                None => writeln!(f, "{prefix} /dev/null")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for DiffLine<3> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (prefix, side) in ["a", "b", "c"].iter().zip(self.0.iter()) {
            match side {
                Some(e) => writeln!(f, "{prefix} {e}")?,
                None => writeln!(f, "{prefix} /dev/null")?,
            }
        }
        Ok(())
    }
}

/// Print a whole diff, one blank line after each entry.
pub fn write_diff<W: Write, const N: usize>(
    writer: &mut W,
    diff: &[DiffLine<N>],
) -> std::io::Result<()>
where
    DiffLine<N>: fmt::Display,
{
    for line in diff {
        writeln!(writer, "{line}")?;
    }
    Ok(())
}

/// Two-way diff between the trees `a` and `b` under `opt`.
pub fn diff2(a: &DirectoryTree, b: &DirectoryTree, opt: &CompareOpt) -> DirectoryDiff<2> {
    let mut result = Vec::new();
    recurse2(a, b, a.roots(), b.roots(), opt, &mut result);
    result
}

fn recurse2(
    a_tree: &DirectoryTree,
    b_tree: &DirectoryTree,
    a_children: &[String],
    b_children: &[String],
    opt: &CompareOpt,
    result: &mut DirectoryDiff<2>,
) {
    let mut names: Vec<&str> = a_children
        .iter()
        .map(String::as_str)
        .chain(b_children.iter().map(String::as_str))
        .collect();
    names.sort_unstable();
    names.dedup();
    let mut common_directories: Vec<&str> = Vec::new();
    for name in names {
        match (a_tree.get_node(name), b_tree.get_node(name)) {
            (Some(a), Some(b)) => {
                if !compare(&a.element, &b.element, opt) {
                    result.push(DiffLine([
                        Some(a.element.clone()),
                        Some(b.element.clone()),
                    ]));
                }
                // Pruning: only descend into directories present on
                // both sides. Equal directories still recurse so that
                // differing descendants surface.
                if a.element.is_directory() && b.element.is_directory() {
                    common_directories.push(name);
                }
            }
            (None, Some(b)) => result.push(DiffLine([None, Some(b.element.clone())])),
            (Some(a), None) => result.push(DiffLine([Some(a.element.clone()), None])),
            (None, None) => unreachable!("name came from one of the child lists"),
        }
    }
    for name in common_directories {
        recurse2(
            a_tree,
            b_tree,
            &a_tree.get_node(name).unwrap().children,
            &b_tree.get_node(name).unwrap().children,
            opt,
            result,
        );
    }
}

/// Three-way diff between `a`, `b` and `c` under `opt`.
pub fn diff3(
    a: &DirectoryTree,
    b: &DirectoryTree,
    c: &DirectoryTree,
    opt: &CompareOpt,
) -> DirectoryDiff<3> {
    let mut result = Vec::new();
    recurse3(a, b, c, a.roots(), b.roots(), c.roots(), opt, &mut result);
    result
}

#[allow(clippy::too_many_arguments)]
fn recurse3(
    a_tree: &DirectoryTree,
    b_tree: &DirectoryTree,
    c_tree: &DirectoryTree,
    a_children: &[String],
    b_children: &[String],
    c_children: &[String],
    opt: &CompareOpt,
    result: &mut DirectoryDiff<3>,
) {
    let mut names: Vec<&str> = a_children
        .iter()
        .chain(b_children.iter())
        .chain(c_children.iter())
        .map(String::as_str)
        .collect();
    names.sort_unstable();
    names.dedup();
    // Per side: the directory to recurse into, if that side has one.
    let mut common_directories: Vec<[Option<&str>; 3]> = Vec::new();
    for name in names {
        let a = a_tree.get_node(name);
        let b = b_tree.get_node(name);
        let c = c_tree.get_node(name);
        let existing = [a, b, c].iter().flatten().count();
        debug_assert!(existing > 0);
        if existing == 3 {
            let (ae, be, ce) = (&a.unwrap().element, &b.unwrap().element, &c.unwrap().element);
            let ab = compare(ae, be, opt);
            let bc = compare(be, ce, opt);
            if !ab || !bc {
                result.push(DiffLine([
                    Some(ae.clone()),
                    Some(be.clone()),
                    Some(ce.clone()),
                ]));
            } else {
                // Transitive property check
                debug_assert!(compare(ae, ce, opt));
            }
            let dirs = [ae, be, ce].iter().filter(|e| e.is_directory()).count();
            // Pruning: only go down if at least two sides are directories
            if dirs >= 2 {
                common_directories.push([
                    ae.is_directory().then_some(name),
                    be.is_directory().then_some(name),
                    ce.is_directory().then_some(name),
                ]);
            }
        } else {
            // At least one element is missing, always a difference
            result.push(DiffLine([
                a.map(|n| n.element.clone()),
                b.map(|n| n.element.clone()),
                c.map(|n| n.element.clone()),
            ]));
            let present_dirs = [a, b, c]
                .iter()
                .flatten()
                .filter(|n| n.element.is_directory())
                .count();
            if existing == 2 && present_dirs == 2 {
                common_directories.push([
                    a.map(|_| name),
                    b.map(|_| name),
                    c.map(|_| name),
                ]);
            }
        }
    }
    for dirs in common_directories {
        match dirs {
            [Some(an), Some(bn), Some(cn)] => recurse3(
                a_tree,
                b_tree,
                c_tree,
                &a_tree.get_node(an).unwrap().children,
                &b_tree.get_node(bn).unwrap().children,
                &c_tree.get_node(cn).unwrap().children,
                opt,
                result,
            ),
            // One side absent: the problem reduces to a 2-way diff over
            // the remaining two, lifted back into three columns.
            [None, Some(bn), Some(cn)] => {
                let mut sub = Vec::new();
                recurse2(
                    b_tree,
                    c_tree,
                    &b_tree.get_node(bn).unwrap().children,
                    &c_tree.get_node(cn).unwrap().children,
                    opt,
                    &mut sub,
                );
                result.extend(
                    sub.into_iter()
                        .map(|DiffLine([x, y])| DiffLine([None, x, y])),
                );
            }
            [Some(an), None, Some(cn)] => {
                let mut sub = Vec::new();
                recurse2(
                    a_tree,
                    c_tree,
                    &a_tree.get_node(an).unwrap().children,
                    &c_tree.get_node(cn).unwrap().children,
                    opt,
                    &mut sub,
                );
                result.extend(
                    sub.into_iter()
                        .map(|DiffLine([x, y])| DiffLine([x, None, y])),
                );
            }
            [Some(an), Some(bn), None] => {
                let mut sub = Vec::new();
                recurse2(
                    a_tree,
                    b_tree,
                    &a_tree.get_node(an).unwrap().children,
                    &b_tree.get_node(bn).unwrap().children,
                    opt,
                    &mut sub,
                );
                result.extend(
                    sub.into_iter()
                        .map(|DiffLine([x, y])| DiffLine([x, y, None])),
                );
            }
            _ => unreachable!("at least two sides are present"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_tree(text: &str) -> DirectoryTree {
        let mut tree = DirectoryTree::new();
        tree.read_from(text.as_bytes(), "test.met").unwrap();
        tree
    }

    const BASE: &str = "\
drwxr-xr-x alice users 2020-09-13 12:26:40 +0000 \"sub\"
-rw-r--r-- alice users 2020-09-13 12:26:40 +0000 5 aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d \"f.txt\"

-rw-r--r-- alice users 2020-09-13 12:26:40 +0000 0 da39a3ee5e6b4b0d3255bfef95601890afd80709 \"sub/x\"
-rw-r--r-- alice users 2020-09-13 12:26:40 +0000 0 da39a3ee5e6b4b0d3255bfef95601890afd80709 \"sub/y\"
";

    #[test]
    fn diff_of_identical_trees_is_empty() {
        let a = read_tree(BASE);
        let b = read_tree(BASE);
        assert!(diff2(&a, &b, &CompareOpt::default()).is_empty());
        let c = read_tree(BASE);
        assert!(diff3(&a, &b, &c, &CompareOpt::default()).is_empty());
    }

    #[test]
    fn diff_of_empty_trees_is_empty() {
        let a = DirectoryTree::new();
        let b = DirectoryTree::new();
        assert!(diff2(&a, &b, &CompareOpt::default()).is_empty());
    }

    #[test]
    fn added_file_is_one_line_with_absent_side() {
        let a = DirectoryTree::new();
        let b = read_tree(
            "-rw-r--r-- alice users 2020-09-13 12:26:40 +0000 \
             5 aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d \"f.txt\"\n",
        );
        let diff = diff2(&a, &b, &CompareOpt::default());
        assert_eq!(diff.len(), 1);
        assert!(diff[0].0[0].is_none());
        assert_eq!(diff[0].0[1].as_ref().unwrap().relative_path(), "f.txt");
        let printed = diff[0].to_string();
        assert!(printed.starts_with("- /dev/null\n+ -rw-r--r-- alice users"));
    }

    #[test]
    fn missing_subtree_is_pruned_to_one_line() {
        let a = read_tree(BASE);
        let b = read_tree(
            "-rw-r--r-- alice users 2020-09-13 12:26:40 +0000 \
             5 aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d \"f.txt\"\n",
        );
        let diff = diff2(&a, &b, &CompareOpt::default());
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].0[0].as_ref().unwrap().relative_path(), "sub");
        assert!(diff[0].0[1].is_none());
    }

    #[test]
    fn equal_directories_still_recurse() {
        let modified = BASE.replace(
            "da39a3ee5e6b4b0d3255bfef95601890afd80709 \"sub/y\"",
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d \"sub/y\"",
        );
        let a = read_tree(BASE);
        let b = read_tree(&modified);
        let diff = diff2(&a, &b, &CompareOpt::default());
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].0[0].as_ref().unwrap().relative_path(), "sub/y");
    }

    #[test]
    fn diff2_is_symmetric_with_sides_swapped() {
        let a = read_tree(BASE);
        let b = read_tree(
            "-rw-r--r-- alice users 2020-09-13 12:26:40 +0000 \
             5 aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d \"f.txt\"\n",
        );
        let fwd = diff2(&a, &b, &CompareOpt::default());
        let rev = diff2(&b, &a, &CompareOpt::default());
        assert_eq!(fwd.len(), rev.len());
        for (f, r) in fwd.iter().zip(rev.iter()) {
            assert_eq!(f.0[0], r.0[1]);
            assert_eq!(f.0[1], r.0[0]);
        }
    }

    #[test]
    fn masked_axes_suppress_differences() {
        let modified = BASE.replace("12:26:40 +0000 \"sub\"", "12:26:41 +0000 \"sub\"");
        let a = read_tree(BASE);
        let b = read_tree(&modified);
        assert_eq!(diff2(&a, &b, &CompareOpt::default()).len(), 1);
        let opt: CompareOpt = "mtime".parse().unwrap();
        assert!(diff2(&a, &b, &opt).is_empty());
    }

    #[test]
    fn ignore_list_parses_and_rejects_unknown_tokens() {
        let opt: CompareOpt = "perm,owner mtime".parse().unwrap();
        assert!(!opt.perm && !opt.owner && !opt.mtime);
        assert!(opt.size && opt.hash && opt.symlink);
        assert!("bogus".parse::<CompareOpt>().is_err());
        let all: CompareOpt = "all".parse().unwrap();
        assert!(!all.perm && !all.owner && !all.mtime && !all.size && !all.hash && !all.symlink);
    }

    #[test]
    fn diff3_reports_two_way_disagreement() {
        let changed = BASE.replace(
            "5 aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d",
            "5 da39a3ee5e6b4b0d3255bfef95601890afd80709",
        );
        let a = read_tree(BASE);
        let b = read_tree(BASE);
        let c = read_tree(&changed);
        let diff = diff3(&a, &b, &c, &CompareOpt::default());
        assert_eq!(diff.len(), 1);
        let line = &diff[0];
        assert_eq!(line.0[0], line.0[1]);
        assert_ne!(line.0[1], line.0[2]);
    }

    #[test]
    fn diff3_missing_side_degenerates_to_lifted_two_way() {
        // "sub" exists in b and c only, and its content differs there.
        let b_text = BASE.replace(
            "da39a3ee5e6b4b0d3255bfef95601890afd80709 \"sub/x\"",
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d \"sub/x\"",
        );
        let a = read_tree(
            "-rw-r--r-- alice users 2020-09-13 12:26:40 +0000 \
             5 aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d \"f.txt\"\n",
        );
        let b = read_tree(&b_text);
        let c = read_tree(BASE);
        let diff = diff3(&a, &b, &c, &CompareOpt::default());
        // one line for sub missing in a, one lifted line for sub/x
        assert_eq!(diff.len(), 2);
        let sub_line = diff
            .iter()
            .find(|d| d.0[1].as_ref().is_some_and(|e| e.relative_path() == "sub"))
            .unwrap();
        assert!(sub_line.0[0].is_none());
        let lifted = diff
            .iter()
            .find(|d| {
                d.0[1]
                    .as_ref()
                    .is_some_and(|e| e.relative_path() == "sub/x")
            })
            .unwrap();
        assert!(lifted.0[0].is_none());
        assert!(lifted.0[2].is_some());
    }

    #[test]
    fn three_way_print_uses_abc_prefixes() {
        let a = read_tree(BASE);
        let b = read_tree(BASE);
        let c = DirectoryTree::new();
        let diff = diff3(&a, &b, &c, &CompareOpt::default());
        let mut out = Vec::new();
        write_diff(&mut out, &diff).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\nc /dev/null\n"));
        assert!(text.lines().any(|l| l.starts_with("a d")));
    }
}
