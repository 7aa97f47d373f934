//! Sidecar metadata (`<name>.tar.gz.enc.meta.json`)
//!
//! Records everything needed to re-derive the key: the salt and the Argon2id
//! cost parameters. The salt is base64 (standard alphabet, padded) so that
//! files written by earlier releases keep parsing.

use chrono::{DateTime, Utc};
use dk_core::{DkError, DkResult};
use serde::{Deserialize, Serialize};

use crate::kdf::KdfParams;
use crate::{ALGORITHM, FORMAT_VERSION, KDF_NAME, SALT_SIZE};

/// Largest Argon2 memory cost accepted from metadata (1 GiB)
pub const MAX_KDF_MEMORY_KIB: u32 = 1024 * 1024;
/// Largest Argon2 iteration count accepted from metadata
pub const MAX_KDF_TIME: u32 = 10;
/// Largest Argon2 lane count accepted from metadata
pub const MAX_KDF_THREADS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    /// Format version; must match byte 0 of the frame
    pub version: u32,
    /// Always "AES-256-GCM" in version 1
    pub algorithm: String,
    /// Always "Argon2id" in version 1
    pub kdf: String,
    #[serde(with = "salt_base64")]
    pub salt: [u8; SALT_SIZE],
    pub kdf_time: u32,
    /// KiB
    pub kdf_memory: u32,
    pub kdf_threads: u32,
    /// Backup creation instant (RFC 3339)
    pub timestamp: DateTime<Utc>,
    /// Size of the plaintext tar.gz before encryption
    pub original_size: u64,
}

impl EncryptionMetadata {
    pub fn new(
        salt: [u8; SALT_SIZE],
        params: &KdfParams,
        original_size: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            version: FORMAT_VERSION as u32,
            algorithm: ALGORITHM.to_string(),
            kdf: KDF_NAME.to_string(),
            salt,
            kdf_time: params.time_cost,
            kdf_memory: params.mem_cost_kib,
            kdf_threads: params.parallelism,
            timestamp,
            original_size,
        }
    }

    /// KDF parameters to use when re-deriving this backup's key.
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            mem_cost_kib: self.kdf_memory,
            time_cost: self.kdf_time,
            parallelism: self.kdf_threads,
        }
    }

    /// Reject versions and algorithms this build cannot decrypt.
    pub fn validate(&self) -> DkResult<()> {
        if self.version != FORMAT_VERSION as u32 {
            return Err(DkError::Format(format!(
                "unsupported metadata version {} (expected {FORMAT_VERSION})",
                self.version
            )));
        }
        if self.algorithm != ALGORITHM {
            return Err(DkError::Format(format!(
                "unsupported algorithm: {}",
                self.algorithm
            )));
        }
        if self.kdf != KDF_NAME {
            return Err(DkError::Format(format!("unsupported KDF: {}", self.kdf)));
        }
        // The sidecar is unauthenticated; bound what it can make Argon2 allocate
        if self.kdf_memory > MAX_KDF_MEMORY_KIB
            || self.kdf_time > MAX_KDF_TIME
            || self.kdf_threads > MAX_KDF_THREADS
        {
            return Err(DkError::Format(format!(
                "KDF parameters out of range: m={} KiB, t={}, p={}",
                self.kdf_memory, self.kdf_time, self.kdf_threads
            )));
        }
        Ok(())
    }

    /// Serialize to indented JSON bytes
    pub fn to_json(&self) -> DkResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| DkError::Format(format!("metadata serialization: {e}")))
    }

    /// Deserialize and validate JSON bytes
    pub fn from_json(data: &[u8]) -> DkResult<Self> {
        let meta: Self = serde_json::from_slice(data)
            .map_err(|e| DkError::Format(format!("metadata deserialization: {e}")))?;
        meta.validate()?;
        Ok(meta)
    }
}

mod salt_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::SALT_SIZE;

    pub fn serialize<S: Serializer>(salt: &[u8; SALT_SIZE], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(salt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; SALT_SIZE], D::Error> {
        let encoded = String::deserialize(d)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| D::Error::custom(format!("salt is not base64: {e}")))?;
        bytes.try_into().map_err(|b: Vec<u8>| {
            D::Error::custom(format!("salt must be {SALT_SIZE} bytes, got {}", b.len()))
        })
    }
}
