use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("unknown checksum algorithm '{0}', expected sha256 or blake3")]
    UnknownAlgorithm(String),
    #[error("invalid {algorithm} digest '{digest}': expected 64 hex characters")]
    InvalidDigest { algorithm: String, digest: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
    Blake3,
}

impl ChecksumAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An expected content digest, written `sha256:<hex>`, `blake3:<hex>`, or bare
/// 64-character hex (sha256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl Checksum {
    pub fn parse(input: &str) -> Result<Self, ChecksumError> {
        let input = input.trim();
        let (algorithm, digest) = match input.split_once(':') {
            Some(("sha256", d)) => (ChecksumAlgorithm::Sha256, d),
            Some(("blake3", d)) => (ChecksumAlgorithm::Blake3, d),
            Some((other, _)) => return Err(ChecksumError::UnknownAlgorithm(other.to_owned())),
            None => (ChecksumAlgorithm::Sha256, input),
        };
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChecksumError::InvalidDigest {
                algorithm: algorithm.to_string(),
                digest: digest.to_owned(),
            });
        }
        Ok(Self {
            algorithm,
            hex: digest.to_ascii_lowercase(),
        })
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    pub fn hasher(&self) -> ContentHasher {
        ContentHasher::new(self.algorithm)
    }

    /// Compare against a lowercase hex digest computed with the same algorithm.
    pub fn matches_hex(&self, actual: &str) -> bool {
        self.hex.eq_ignore_ascii_case(actual)
    }

    /// Hash the file at `path` and compare. Missing files are an error, not a mismatch.
    pub fn matches_file(&self, path: &Path) -> std::io::Result<bool> {
        let actual = digest_file(path, self.algorithm)?;
        Ok(self.matches_hex(&actual))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl TryFrom<String> for Checksum {
    type Error = ChecksumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Checksum> for String {
    fn from(value: Checksum) -> Self {
        value.to_string()
    }
}

/// Incremental hasher for either supported algorithm.
pub enum ContentHasher {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl ContentHasher {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            ChecksumAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => Digest::update(h, data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Stream a file through the given algorithm and return its lowercase hex digest.
pub fn digest_file(path: &Path, algorithm: ChecksumAlgorithm) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = ContentHasher::new(algorithm);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize_hex())
}
