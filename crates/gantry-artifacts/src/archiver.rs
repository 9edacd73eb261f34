//! Directory packing for artifacts.
//!
//! A directory artifact travels as a plain tar stream; the store compresses
//! it like any other blob.

use gantry_core::{Error, Result};
use std::path::Path;

/// Offset of the `ustar` magic inside a tar header.
const USTAR_MAGIC_OFFSET: usize = 257;

/// Pack the contents of `dir` into a tar stream. Entry names are relative
/// to `dir`.
pub fn pack_dir(dir: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", dir)
        .map_err(|e| Error::Internal(format!("Failed to pack dir: {}", e)))?;
    builder
        .into_inner()
        .map_err(|e| Error::Internal(format!("Failed to finish tar: {}", e)))
}

/// Extract a tar stream produced by [`pack_dir`] into `dest`.
pub fn unpack(data: &[u8], dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    let mut archive = tar::Archive::new(data);
    archive
        .unpack(dest)
        .map_err(|e| Error::Internal(format!("Failed to unpack archive: {}", e)))
}

/// True if `data` starts with a POSIX tar header.
pub fn is_archive(data: &[u8]) -> bool {
    data.get(USTAR_MAGIC_OFFSET..USTAR_MAGIC_OFFSET + 5) == Some(b"ustar".as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_and_unpack_directory() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("assets")).unwrap();
        std::fs::write(src.path().join("index.html"), "<html></html>").unwrap();
        std::fs::write(src.path().join("assets/app.js"), "console.log(1)").unwrap();

        let data = pack_dir(src.path()).unwrap();
        assert!(is_archive(&data));

        let dest = tempfile::tempdir().unwrap();
        unpack(&data, dest.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(dest.path().join("assets/app.js")).unwrap(),
            "console.log(1)"
        );
    }

    #[test]
    fn test_plain_bytes_are_not_archives() {
        assert!(!is_archive(b"hello"));
        assert!(!is_archive(&[0u8; 600]));
    }
}
