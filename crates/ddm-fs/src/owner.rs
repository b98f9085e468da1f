//! uid/gid to name mapping with a process-wide cache, plus
//! symlink-preserving ownership changes.
//!
//! The cache is the only shared mutable state in the whole tool; both
//! scan threads go through it, so it sits behind a single mutex. It
//! grows monotonically for the life of the process.

use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use parking_lot::Mutex;

use crate::error::FsError;

struct IdCache {
    users: BTreeMap<u32, String>,
    groups: BTreeMap<u32, String>,
    user_ids: BTreeMap<String, u32>,
    group_ids: BTreeMap<String, u32>,
    // Buffer size for the reentrant passwd/group calls, sized once at
    // first use from sysconf.
    buf_size: usize,
}

static CACHE: Mutex<IdCache> = Mutex::new(IdCache {
    users: BTreeMap::new(),
    groups: BTreeMap::new(),
    user_ids: BTreeMap::new(),
    group_ids: BTreeMap::new(),
    buf_size: 0,
});

fn lookup_buf_size(cache: &mut IdCache) -> usize {
    if cache.buf_size == 0 {
        const DEFAULT: i64 = 2048;
        let u = unsafe { libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX) };
        let g = unsafe { libc::sysconf(libc::_SC_GETGR_R_SIZE_MAX) };
        let u = if u < 0 { DEFAULT } else { u };
        let g = if g < 0 { DEFAULT } else { g };
        cache.buf_size = u.max(g) as usize;
    }
    cache.buf_size
}

/// uid to name. An unknown uid is not an error: the decimal uid is
/// returned instead, so trees scanned on a foreign disk still serialize.
pub fn lookup_user(uid: u32) -> Result<String, FsError> {
    let mut cache = CACHE.lock();
    if let Some(name) = cache.users.get(&uid) {
        return Ok(name.clone());
    }
    let mut buf = vec![0i8; lookup_buf_size(&mut cache)];
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let rc = unsafe {
        libc::getpwuid_r(
            uid,
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 {
        return Err(FsError::IdLookup(rc));
    }
    let name = if result.is_null() {
        uid.to_string()
    } else {
        unsafe { CStr::from_ptr(pwd.pw_name) }
            .to_string_lossy()
            .into_owned()
    };
    cache.users.insert(uid, name.clone());
    cache.user_ids.insert(name.clone(), uid);
    Ok(name)
}

/// Name to uid. Here an unknown name must be an error: there is no id
/// to chown to.
pub fn lookup_uid(user: &str) -> Result<u32, FsError> {
    let mut cache = CACHE.lock();
    if let Some(uid) = cache.user_ids.get(user) {
        return Ok(*uid);
    }
    let mut buf = vec![0i8; lookup_buf_size(&mut cache)];
    let cname =
        CString::new(user).map_err(|_| FsError::UserNotFound(user.to_string()))?;
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let rc = unsafe {
        libc::getpwnam_r(
            cname.as_ptr(),
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 {
        return Err(FsError::IdLookup(rc));
    }
    if result.is_null() {
        return Err(FsError::UserNotFound(user.to_string()));
    }
    let uid = pwd.pw_uid;
    cache.user_ids.insert(user.to_string(), uid);
    cache.users.insert(uid, user.to_string());
    Ok(uid)
}

/// gid to name, decimal fallback for unknown gids.
pub fn lookup_group(gid: u32) -> Result<String, FsError> {
    let mut cache = CACHE.lock();
    if let Some(name) = cache.groups.get(&gid) {
        return Ok(name.clone());
    }
    let mut buf = vec![0i8; lookup_buf_size(&mut cache)];
    let mut grp: libc::group = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::group = std::ptr::null_mut();
    let rc = unsafe {
        libc::getgrgid_r(
            gid,
            &mut grp,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 {
        return Err(FsError::IdLookup(rc));
    }
    let name = if result.is_null() {
        gid.to_string()
    } else {
        unsafe { CStr::from_ptr(grp.gr_name) }
            .to_string_lossy()
            .into_owned()
    };
    cache.groups.insert(gid, name.clone());
    cache.group_ids.insert(name.clone(), gid);
    Ok(name)
}

/// Name to gid; unknown name is an error.
pub fn lookup_gid(group: &str) -> Result<u32, FsError> {
    let mut cache = CACHE.lock();
    if let Some(gid) = cache.group_ids.get(group) {
        return Ok(*gid);
    }
    let mut buf = vec![0i8; lookup_buf_size(&mut cache)];
    let cname =
        CString::new(group).map_err(|_| FsError::GroupNotFound(group.to_string()))?;
    let mut grp: libc::group = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::group = std::ptr::null_mut();
    let rc = unsafe {
        libc::getgrnam_r(
            cname.as_ptr(),
            &mut grp,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 {
        return Err(FsError::IdLookup(rc));
    }
    if result.is_null() {
        return Err(FsError::GroupNotFound(group.to_string()));
    }
    let gid = grp.gr_gid;
    cache.group_ids.insert(group.to_string(), gid);
    cache.groups.insert(gid, group.to_string());
    Ok(gid)
}

/// Change owner and group by name, without following symlinks.
pub fn change_ownership(path: &Path, user: &str, group: &str) -> Result<(), FsError> {
    let uid = lookup_uid(user)?;
    let gid = lookup_gid(group)?;
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| FsError::NonUtf8Path(path.to_path_buf()))?;
    let rc = unsafe { libc::lchown(cpath.as_ptr(), uid, gid) };
    if rc != 0 {
        return Err(FsError::ChangeOwnership {
            path: path.to_path_buf(),
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_user_round_trips() {
        let uid = unsafe { libc::getuid() };
        let name = lookup_user(uid).unwrap();
        assert!(!name.is_empty());
        assert_eq!(lookup_uid(&name).unwrap(), uid);
    }

    #[test]
    fn current_group_round_trips() {
        let gid = unsafe { libc::getgid() };
        let name = lookup_group(gid).unwrap();
        assert!(!name.is_empty());
        assert_eq!(lookup_gid(&name).unwrap(), gid);
    }

    #[test]
    fn unknown_name_is_an_error() {
        assert!(matches!(
            lookup_uid("no-such-user-ddm-test"),
            Err(FsError::UserNotFound(_))
        ));
        assert!(matches!(
            lookup_gid("no-such-group-ddm-test"),
            Err(FsError::GroupNotFound(_))
        ));
    }
}
