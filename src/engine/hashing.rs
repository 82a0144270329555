//! Blake3 digests of staged and backed-up files.

use anyhow::{Context, Result};
use blake3::Hasher;
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// File size above which hashing uses memory-mapped I/O (bytes). 100 MB.
const HASH_MMAP_THRESHOLD: u64 = 100 * 1024 * 1024;
/// Chunk size for streaming copies and reads (bytes). 1 MB.
pub(crate) const COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// Hash a file with blake3. Uses memory-mapped I/O for files above threshold, chunked reading otherwise.
pub fn hash_file(path: &Path) -> Result<[u8; 32]> {
    let file = File::open(path).with_context(|| format!("open {} for hashing", path.display()))?;
    let size = file.metadata()?.len();
    let mut hasher = Hasher::new();

    if size > HASH_MMAP_THRESHOLD {
        let mmap = unsafe { Mmap::map(&file)? };
        hasher.update(&mmap);
    } else {
        let mut reader = io::BufReader::with_capacity(COPY_CHUNK_SIZE, file);
        let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
    }

    Ok(*hasher.finalize().as_bytes())
}

/// Copy `reader` into `writer`, hashing the bytes on the way. Returns (bytes copied, digest).
pub fn copy_and_hash<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
) -> io::Result<(u64, [u8; 32])> {
    let mut hasher = Hasher::new();
    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..n])?;
        hasher.update(&buffer[..n]);
        total += n as u64;
    }
    writer.flush()?;
    Ok((total, *hasher.finalize().as_bytes()))
}

/// Lowercase hex of a digest, for logs and manifests.
pub fn to_hex(digest: &[u8; 32]) -> String {
    blake3::Hash::from(*digest).to_hex().to_string()
}
