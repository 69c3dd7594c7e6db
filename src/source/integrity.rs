//! Artifact integrity hashes.
//!
//! Tarball locators may embed the expected digest in their fragment, either as an
//! SRI string (`sha512-<base64>`) or as bare hex whose length selects the algorithm.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;

use crate::core::TrellisError;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha384" => Some(Self::Sha384),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            40 => Some(Self::Sha1),
            64 => Some(Self::Sha256),
            96 => Some(Self::Sha384),
            128 => Some(Self::Sha512),
            _ => None,
        }
    }

    /// SRI prefix of the algorithm.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// A fresh incremental hasher for this algorithm.
    #[must_use]
    pub fn hasher(self) -> IntegrityHasher {
        match self {
            Self::Sha1 => IntegrityHasher::Sha1(Sha1::new()),
            Self::Sha256 => IntegrityHasher::Sha256(Sha256::new()),
            Self::Sha384 => IntegrityHasher::Sha384(Sha384::new()),
            Self::Sha512 => IntegrityHasher::Sha512(Sha512::new()),
        }
    }
}

/// An expected digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Integrity {
    pub algorithm: HashAlgorithm,
    pub digest: Vec<u8>,
}

impl Integrity {
    /// Parse `sha512-<base64>` or bare hex.
    pub fn parse(input: &str) -> Result<Self, TrellisError> {
        let input = input.trim();
        let invalid = |reason: &str| TrellisError::InvalidLocator {
            locator: input.to_string(),
            reason: reason.to_string(),
        };

        let sri = input
            .split_once('-')
            .and_then(|(name, encoded)| HashAlgorithm::from_name(name).map(|a| (a, encoded)));
        if let Some((algorithm, encoded)) = sri {
            let digest =
                STANDARD.decode(encoded).map_err(|_| invalid("integrity is not valid base64"))?;
            return Ok(Self {
                algorithm,
                digest,
            });
        }

        let algorithm = HashAlgorithm::from_hex_len(input.len())
            .ok_or_else(|| invalid("hex digest length does not match sha1/256/384/512"))?;
        let digest = hex::decode(input).map_err(|_| invalid("integrity is not valid hex"))?;
        Ok(Self {
            algorithm,
            digest,
        })
    }

    /// Hash `bytes` with this algorithm.
    #[must_use]
    pub fn compute(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(bytes);
        hasher.finish()
    }

    /// Fail with [`TrellisError::IntegrityError`] unless `actual` matches.
    pub fn verify(&self, actual: &Self, source_url: &str) -> Result<(), TrellisError> {
        if self == actual {
            return Ok(());
        }
        Err(TrellisError::IntegrityError {
            source_url: source_url.to_string(),
            expected: self.to_string(),
            actual: actual.to_string(),
        })
    }
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.algorithm.name(), STANDARD.encode(&self.digest))
    }
}

/// Incremental hasher fed while a download streams.
pub enum IntegrityHasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl IntegrityHasher {
    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(bytes),
            Self::Sha256(h) => h.update(bytes),
            Self::Sha384(h) => h.update(bytes),
            Self::Sha512(h) => h.update(bytes),
        }
    }

    #[must_use]
    pub fn finish(self) -> Integrity {
        let (algorithm, digest) = match self {
            Self::Sha1(h) => (HashAlgorithm::Sha1, h.finalize().to_vec()),
            Self::Sha256(h) => (HashAlgorithm::Sha256, h.finalize().to_vec()),
            Self::Sha384(h) => (HashAlgorithm::Sha384, h.finalize().to_vec()),
            Self::Sha512(h) => (HashAlgorithm::Sha512, h.finalize().to_vec()),
        };
        Integrity {
            algorithm,
            digest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sri_and_hex() {
        let computed = Integrity::compute(HashAlgorithm::Sha512, b"hello");
        let sri = computed.to_string();
        assert!(sri.starts_with("sha512-"));
        assert_eq!(Integrity::parse(&sri).unwrap(), computed);

        let sha1_hex = hex::encode(Integrity::compute(HashAlgorithm::Sha1, b"hello").digest);
        let parsed = Integrity::parse(&sha1_hex).unwrap();
        assert_eq!(parsed.algorithm, HashAlgorithm::Sha1);

        let sha256_hex = hex::encode(Integrity::compute(HashAlgorithm::Sha256, b"hello").digest);
        assert_eq!(Integrity::parse(&sha256_hex).unwrap().algorithm, HashAlgorithm::Sha256);

        assert!(Integrity::parse("abc").is_err());
        assert!(Integrity::parse("sha512-***").is_err());
    }

    #[test]
    fn test_verify_mismatch() {
        let expected = Integrity::compute(HashAlgorithm::Sha256, b"one");
        let actual = Integrity::compute(HashAlgorithm::Sha256, b"two");
        let err = expected.verify(&actual, "https://example.com/a.tgz").unwrap_err();
        assert!(err.is_integrity_error());
        assert!(expected.verify(&expected.clone(), "x").is_ok());
    }
}
