//! Streaming SHA-1 of a file, as a 40-digit lowercase hex string.
//!
//! SHA-1 is used purely to detect content changes between scans; it is
//! not a security boundary here.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::FsError;

pub fn hash_file(path: &Path) -> Result<String, FsError> {
    let map_err = |source| FsError::Hash {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(map_err)?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(map_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
