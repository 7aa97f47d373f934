//! AES-256-GCM encryption of a whole archive into a self-describing frame
//!
//! Frame format (binary):
//! ```text
//! [1 byte: version][16 bytes: salt][12 bytes: random nonce][N bytes: ciphertext][16 bytes: tag]
//! ```
//!
//! The salt is copied in for self-description only; decryption takes an
//! already-derived key and never reads it.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use dk_core::{DkError, DkResult};
use rand::{rngs::OsRng, RngCore};

use crate::{FORMAT_VERSION, HEADER_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};

/// The fixed-size prefix of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub salt: [u8; SALT_SIZE],
    pub nonce: [u8; NONCE_SIZE],
}

/// Split a frame into its header and the ciphertext+tag that follows.
///
/// Fails with `Format` when the frame is shorter than the header.
pub fn parse_frame(frame: &[u8]) -> DkResult<(FrameHeader, &[u8])> {
    if frame.len() < HEADER_SIZE {
        return Err(DkError::Format(format!(
            "ciphertext too short: {} bytes (minimum {HEADER_SIZE})",
            frame.len()
        )));
    }

    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&frame[1..1 + SALT_SIZE]);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&frame[1 + SALT_SIZE..HEADER_SIZE]);

    let header = FrameHeader {
        version: frame[0],
        salt,
        nonce,
    };
    Ok((header, &frame[HEADER_SIZE..]))
}

/// Encrypt `plaintext` under a 32-byte `key`.
///
/// Returns `[version][salt][nonce][ciphertext][tag]`, exactly
/// `HEADER_SIZE + plaintext.len() + TAG_SIZE` bytes.
pub fn encrypt(plaintext: &[u8], key: &[u8], salt: &[u8; SALT_SIZE]) -> DkResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| DkError::Cipher(format!("invalid key length: {} bytes", key.len())))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .map_err(|e| DkError::Cipher(format!("nonce generation failed: {e}")))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| DkError::Cipher(format!("encryption failed: {e}")))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    frame.push(FORMAT_VERSION);
    frame.extend_from_slice(salt);
    frame.extend_from_slice(&nonce_bytes);
    frame.extend_from_slice(&ciphertext);
    Ok(frame)
}

/// Decrypt a frame produced by [`encrypt`].
///
/// Any tag failure (wrong key, bit flip, truncation) is `Authentication`.
pub fn decrypt(frame: &[u8], key: &[u8]) -> DkResult<Vec<u8>> {
    let (header, ciphertext) = parse_frame(frame)?;

    if header.version != FORMAT_VERSION {
        return Err(DkError::Format(format!(
            "unsupported frame version {} (expected {FORMAT_VERSION})",
            header.version
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| DkError::Cipher(format!("invalid key length: {} bytes", key.len())))?;

    if ciphertext.len() < TAG_SIZE {
        return Err(DkError::Authentication);
    }

    cipher
        .decrypt(Nonce::from_slice(&header.nonce), ciphertext)
        .map_err(|_| DkError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::{derive_key, generate_salt, KdfParams};
    use crate::KEY_SIZE;
    use secrecy::SecretString;

    fn fast_params() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn test_key() -> [u8; KEY_SIZE] {
        [42u8; KEY_SIZE]
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let salt = generate_salt().unwrap();
        let key = derive_key(&SecretString::from("my-secure-password"), &salt, &fast_params())
            .unwrap();
        let plaintext = b"Hello, World! This is a secret message.";

        let frame = encrypt(plaintext, key.as_bytes(), &salt).unwrap();
        assert_eq!(frame[0], FORMAT_VERSION);
        assert_eq!(&frame[1..1 + SALT_SIZE], &salt, "salt is embedded verbatim");

        let decrypted = decrypt(&frame, key.as_bytes()).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let frame = encrypt(b"", &test_key(), &[0u8; SALT_SIZE]).unwrap();
        assert_eq!(frame.len(), HEADER_SIZE + TAG_SIZE);
        assert_eq!(decrypt(&frame, &test_key()).unwrap(), b"");
    }

    #[test]
    fn test_frame_size() {
        let plaintext = vec![0u8; 1000];
        let frame = encrypt(&plaintext, &test_key(), &[9u8; SALT_SIZE]).unwrap();

        // version (1) + salt (16) + nonce (12) + plaintext (1000) + tag (16) = 1045
        assert_eq!(frame.len(), 1 + 16 + 12 + 1000 + 16);
    }

    #[test]
    fn test_nonce_is_fresh() {
        let salt = [3u8; SALT_SIZE];
        let a = encrypt(b"Same message", &test_key(), &salt).unwrap();
        let b = encrypt(b"Same message", &test_key(), &salt).unwrap();
        assert_ne!(a, b, "random nonce must make frames differ");
        assert_eq!(decrypt(&a, &test_key()).unwrap(), b"Same message");
        assert_eq!(decrypt(&b, &test_key()).unwrap(), b"Same message");
    }

    #[test]
    fn test_wrong_password() {
        let salt = generate_salt().unwrap();
        let right = derive_key(&SecretString::from("correct"), &salt, &fast_params()).unwrap();
        let wrong = derive_key(&SecretString::from("wrong"), &salt, &fast_params()).unwrap();

        let frame = encrypt(b"Secret data", right.as_bytes(), &salt).unwrap();
        let err = decrypt(&frame, wrong.as_bytes()).unwrap_err();
        assert!(matches!(err, DkError::Authentication), "got {err:?}");
    }

    #[test]
    fn test_short_frame_is_format_error() {
        assert!(matches!(decrypt(&[], &test_key()), Err(DkError::Format(_))));
        assert!(matches!(
            decrypt(&[1u8; HEADER_SIZE - 1], &test_key()),
            Err(DkError::Format(_))
        ));
    }

    #[test]
    fn test_truncated_tag_is_authentication_error() {
        let frame = encrypt(b"abc", &test_key(), &[0u8; SALT_SIZE]).unwrap();
        let truncated = &frame[..HEADER_SIZE + 2];
        assert!(matches!(
            decrypt(truncated, &test_key()),
            Err(DkError::Authentication)
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut frame = encrypt(b"abc", &test_key(), &[0u8; SALT_SIZE]).unwrap();
        frame[0] = 2;
        assert!(matches!(
            decrypt(&frame, &test_key()),
            Err(DkError::Format(_))
        ));
    }

    #[test]
    fn test_bad_key_length() {
        let err = encrypt(b"abc", &[0u8; 16], &[0u8; SALT_SIZE]).unwrap_err();
        assert!(matches!(err, DkError::Cipher(_)));
    }

    #[test]
    fn test_parse_frame() {
        let salt = [5u8; SALT_SIZE];
        let frame = encrypt(b"payload", &test_key(), &salt).unwrap();
        let (header, body) = parse_frame(&frame).unwrap();
        assert_eq!(header.version, FORMAT_VERSION);
        assert_eq!(header.salt, salt);
        assert_eq!(&header.nonce[..], &frame[1 + SALT_SIZE..HEADER_SIZE]);
        assert_eq!(body.len(), b"payload".len() + TAG_SIZE);
    }
}
