//! Encrypted persistence for generated test cases
//!
//! A case file is the JSON-serialized case list encrypted with
//! ChaCha20-Poly1305; the 96-bit nonce is prefixed to the ciphertext. Writes
//! go through a temp file in the target directory and are renamed into
//! place, so a failed build never leaves a truncated case file behind.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::error::{ForgeError, Result};
use crate::keyring::CaseKey;
use crate::sample::Case;

/// Nonce size for ChaCha20-Poly1305 (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Reads and writes one encrypted case file with a fixed key
pub struct EncryptedCaseStore {
    cipher: ChaCha20Poly1305,
}

impl EncryptedCaseStore {
    pub fn new(key: &CaseKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Serialize and encrypt `cases`, writing atomically to `path`
    pub fn write(&self, path: &Path, cases: &[Case]) -> Result<()> {
        let payload = serde_json::to_vec(cases)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, payload.as_ref())
            .map_err(|e| ForgeError::Encryption(e.to_string()))?;

        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = match dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
            None => tempfile::NamedTempFile::new()?,
        };
        tmp.write_all(&nonce_bytes)?;
        tmp.write_all(&ciphertext)?;
        tmp.persist(path).map_err(|e| ForgeError::Io(e.error))?;

        debug!(path = %path.display(), n_cases = cases.len(), "Wrote case file");
        Ok(())
    }

    /// Decrypt and deserialize the case list at `path`
    pub fn read(&self, path: &Path) -> Result<Vec<Case>> {
        let raw = std::fs::read(path)?;
        if raw.len() < NONCE_SIZE {
            return Err(ForgeError::Decryption(format!(
                "case file too short: {} bytes",
                raw.len()
            )));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let payload = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| ForgeError::Decryption("authentication failed".to_string()))?;

        serde_json::from_slice(&payload)
            .map_err(|e| ForgeError::Deserialization(format!("invalid case list: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::generate_case_key;
    use serde_json::json;

    fn sample_cases(n: usize) -> Vec<Case> {
        (0..n)
            .map(|i| {
                let mut case = Case::new();
                case.insert("x".to_string(), json!(i));
                case.insert("output_0".to_string(), json!(i * 2 + 3));
                case
            })
            .collect()
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tc_sample");
        let key = generate_case_key();
        let store = EncryptedCaseStore::new(&key);

        let cases = sample_cases(10);
        store.write(&path, &cases).unwrap();
        let recovered = store.read(&path).unwrap();

        assert_eq!(recovered, cases);
    }

    #[test]
    fn test_round_trip_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tc_empty");
        let store = EncryptedCaseStore::new(&generate_case_key());

        store.write(&path, &[]).unwrap();
        assert_eq!(store.read(&path).unwrap(), Vec::<Case>::new());
    }

    #[test]
    fn test_wrong_key_fails_decryption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tc_sample");

        EncryptedCaseStore::new(&generate_case_key())
            .write(&path, &sample_cases(3))
            .unwrap();

        let result = EncryptedCaseStore::new(&generate_case_key()).read(&path);
        assert!(matches!(result, Err(ForgeError::Decryption(_))));
    }

    #[test]
    fn test_truncated_file_fails_decryption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tc_sample");
        let key = generate_case_key();
        let store = EncryptedCaseStore::new(&key);

        store.write(&path, &sample_cases(3)).unwrap();
        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..raw.len() - 4]).unwrap();

        assert!(matches!(store.read(&path), Err(ForgeError::Decryption(_))));
    }

    #[test]
    fn test_short_file_fails_decryption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tc_sample");
        std::fs::write(&path, b"abc").unwrap();

        let store = EncryptedCaseStore::new(&generate_case_key());
        assert!(matches!(store.read(&path), Err(ForgeError::Decryption(_))));
    }
}
