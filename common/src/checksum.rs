//! # Checksum Engine
//!
//! Pure digest computation over byte streams. No I/O lives here: callers
//! read payload bytes from the Object Store Gateway or a local file and
//! hand them to `digest`/`digest_reader`.

use std::fmt;
use std::str::FromStr;

use md5::Md5;
use sha2::{Digest as Sha2Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// The checksum algorithms the pipeline understands. Any other label found
/// in object metadata is rejected as `UnsupportedAlgorithm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Sha256,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Algorithm::Md5 => write!(f, "MD5"),
            Algorithm::Sha256 => write!(f, "SHA256"),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a supported checksum algorithm")]
pub struct UnsupportedAlgorithm(pub String);

impl FromStr for Algorithm {
    type Err = UnsupportedAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MD5" => Ok(Algorithm::Md5),
            "SHA256" => Ok(Algorithm::Sha256),
            other => Err(UnsupportedAlgorithm(other.to_owned())),
        }
    }
}

/// Compute the lowercase hex digest of `bytes` under `algorithm`.
pub fn digest(algorithm: Algorithm, bytes: &[u8]) -> String {
    match algorithm {
        Algorithm::Md5 => {
            let mut hasher = Md5::new();
            hasher.update(bytes);
            hex::encode(hasher.finalize())
        }
        Algorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            hex::encode(hasher.finalize())
        }
    }
}

/// Stream an async reader through `algorithm`, without buffering the whole
/// payload in memory at once. Used when verifying payloads read off disk.
pub async fn digest_reader<R: AsyncRead + Unpin>(
    algorithm: Algorithm,
    mut reader: R,
) -> std::io::Result<String> {
    const CHUNK_SIZE: usize = 64 * 1024;
    let mut buf = vec![0u8; CHUNK_SIZE];

    match algorithm {
        Algorithm::Md5 => {
            let mut hasher = Md5::new();
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        Algorithm::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
    }
}

/// Case-insensitive comparison of two hex digests.
pub fn digests_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_known_input() {
        let got = digest(Algorithm::Md5, b"hello world");
        assert_eq!(got, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn sha256_of_known_input() {
        let got = digest(Algorithm::Sha256, b"hello world");
        assert_eq!(
            got,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde"
        );
    }

    #[test]
    fn algorithm_parses_case_insensitively() {
        assert_eq!("md5".parse::<Algorithm>().unwrap(), Algorithm::Md5);
        assert_eq!("Sha256".parse::<Algorithm>().unwrap(), Algorithm::Sha256);
    }

    #[test]
    fn unsupported_algorithm_is_rejected() {
        let err = "crc32".parse::<Algorithm>().unwrap_err();
        assert_eq!(err, UnsupportedAlgorithm("CRC32".to_owned()));
    }

    #[test]
    fn digests_compare_case_insensitively() {
        assert!(digests_match(
            "5EB63BBBE01EEED093CB22BB8F5ACDC3",
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        ));
        assert!(!digests_match("abc", "def"));
    }

    #[tokio::test]
    async fn digest_reader_matches_digest() {
        let data = b"streamed payload bytes".to_vec();
        let expected = digest(Algorithm::Sha256, &data);
        let got = digest_reader(Algorithm::Sha256, data.as_slice())
            .await
            .unwrap();
        assert_eq!(expected, got);
    }
}
