//! MD5 fingerprints for snapshot files and in-memory buffers
//!
//! The etag of a registered snapshot is the MD5 of its bytes, so the same
//! content dropped into the queue twice under different names is only
//! registered once.

use crate::error::Result;
use std::io::Read;
use std::path::Path;

/// Compute the MD5 hex digest of a byte slice
pub fn compute_md5(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Compute the MD5 hex digest of a file, streaming it in fixed-size chunks
pub fn compute_file_md5(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_reader_md5(&mut file)
}

/// Compute the MD5 hex digest of any readable source
pub fn compute_reader_md5<R: Read>(reader: &mut R) -> Result<String> {
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        context.consume(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", context.compute()))
}
