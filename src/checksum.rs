//! Content digests of local files.
//!
//! The archive publishes MD5 sums as lowercase hex, so that is what is
//! computed here. Files are hashed in fixed-size blocks on the blocking pool;
//! sequence files are routinely tens of gigabytes.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::domain::Digest;

const BLOCK_SIZE: usize = 1 << 16;

/// Hex MD5 of everything readable from `reader`.
pub fn md5_hex<R: Read>(mut reader: R) -> io::Result<String> {
    let mut context = md5::Context::new();
    let mut block = vec![0u8; BLOCK_SIZE];
    loop {
        let read = match reader.read(&mut block) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        context.consume(&block[..read]);
    }
    Ok(format!("{:x}", context.compute()))
}

pub fn file_md5(path: &Path) -> io::Result<String> {
    md5_hex(File::open(path)?)
}

/// True iff `path` exists and its digest equals `expected`. A missing or
/// unreadable file is simply not valid.
pub async fn verify(path: &Path, expected: &Digest) -> bool {
    let path: PathBuf = path.to_path_buf();
    let task_path = path.clone();
    let computed = tokio::task::spawn_blocking(move || {
        if !task_path.is_file() {
            return Ok(None);
        }
        file_md5(&task_path).map(Some)
    })
    .await;

    match computed {
        Ok(Ok(Some(digest))) => {
            let matches = expected.matches(&digest);
            if !matches {
                tracing::debug!(
                    path = %path.display(),
                    expected = %expected,
                    computed = %digest,
                    "digest mismatch"
                );
            }
            matches
        }
        Ok(Ok(None)) => false,
        Ok(Err(err)) => {
            tracing::warn!("Cannot hash {}: {}", path.display(), err);
            false
        }
        Err(err) => {
            tracing::warn!("Hash task for {} failed: {}", path.display(), err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_known_inputs() {
        assert_eq!(
            md5_hex(&b""[..]).unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            md5_hex(&b"The quick brown fox jumps over the lazy dog"[..]).unwrap(),
            "9e107d9d372bb6826bd81d3542a419d6"
        );
    }

    #[test]
    fn md5_spans_blocks() {
        let data = vec![7u8; BLOCK_SIZE * 3 + 11];
        let streamed = md5_hex(&data[..]).unwrap();
        let whole = format!("{:x}", md5::compute(&data));
        assert_eq!(streamed, whole);
    }

    #[tokio::test]
    async fn verify_existing_and_missing() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("reads.fastq.gz");
        std::fs::write(&path, b"The quick brown fox jumps over the lazy dog").unwrap();

        let good: Digest = "9E107D9D372BB6826BD81D3542A419D6".parse().unwrap();
        let bad: Digest = "d41d8cd98f00b204e9800998ecf8427e".parse().unwrap();
        assert!(verify(&path, &good).await);
        assert!(!verify(&path, &bad).await);
        assert!(!verify(&temp.path().join("absent.fastq.gz"), &good).await);
    }
}
