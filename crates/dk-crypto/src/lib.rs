//! dk-crypto: password-based encryption of backup archives
//!
//! Pipeline: password + random salt → Argon2id → 256-bit key → AES-256-GCM
//!
//! On-disk frame (`<name>.tar.gz.enc`):
//! ```text
//! [1 byte: version][16 bytes: salt][12 bytes: nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! The sidecar `<name>.tar.gz.enc.meta.json` repeats the salt and records the
//! KDF cost parameters so that future revisions can change them without
//! breaking existing backups. No associated data is bound in format version 1.

pub mod cipher;
pub mod kdf;
pub mod metadata;

pub use cipher::{decrypt, encrypt, parse_frame, FrameHeader};
pub use kdf::{derive_key, generate_salt, DerivedKey, KdfParams};
pub use metadata::EncryptionMetadata;

/// Size of the AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the Argon2id salt in bytes
pub const SALT_SIZE: usize = 16;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Current on-disk format version (frame byte 0 and metadata `version`)
pub const FORMAT_VERSION: u8 = 1;

/// Bytes preceding the ciphertext in a frame
pub const HEADER_SIZE: usize = 1 + SALT_SIZE + NONCE_SIZE;

pub const ALGORITHM: &str = "AES-256-GCM";
pub const KDF_NAME: &str = "Argon2id";
