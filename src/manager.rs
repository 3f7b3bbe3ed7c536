//! Case-set verification helpers
//!
//! Instructors verify builds by decrypting the written case files and
//! comparing them, either directly or by digest. Digests make A/B
//! comparison of two independent builds cheap: same keyring, same registry,
//! same digest.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::keyring::Keyring;
use crate::sample::Case;
use crate::store::EncryptedCaseStore;

pub struct CaseManager {
    keyring: Keyring,
    public_dir: PathBuf,
}

impl CaseManager {
    /// Load the keyring at `keys_path` for case files under `public_dir`
    pub fn new(keys_path: &Path, public_dir: &Path) -> Result<Self> {
        Ok(Self {
            keyring: Keyring::load(keys_path)?,
            public_dir: public_dir.to_path_buf(),
        })
    }

    pub fn with_keyring(keyring: Keyring, public_dir: &Path) -> Self {
        Self {
            keyring,
            public_dir: public_dir.to_path_buf(),
        }
    }

    /// Decrypt the visible and hidden case sets for one exercise
    pub fn load_cases(&self, ex_name: &str) -> Result<(Vec<Case>, Vec<Case>)> {
        let file_name = format!("tc_{}", ex_name);
        let visible = EncryptedCaseStore::new(&self.keyring.visible_key)
            .read(&self.public_dir.join(&file_name))?;
        let hidden = EncryptedCaseStore::new(&self.keyring.hidden_key)
            .read(&self.public_dir.join("encrypted").join(&file_name))?;
        Ok((visible, hidden))
    }

    /// Hex SHA-256 digest of a decrypted case list, for build comparison
    pub fn case_digest(cases: &[Case]) -> Result<String> {
        let payload = serde_json::to_vec(cases)?;
        Ok(hex::encode(Sha256::digest(&payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cases(seed: i64) -> Vec<Case> {
        (0..3)
            .map(|i| {
                let mut case = Case::new();
                case.insert("x".to_string(), json!(seed + i));
                case
            })
            .collect()
    }

    #[test]
    fn test_digest_is_stable_and_discriminating() {
        let a = CaseManager::case_digest(&cases(0)).unwrap();
        let b = CaseManager::case_digest(&cases(0)).unwrap();
        let c = CaseManager::case_digest(&cases(1)).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_load_cases_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let public = dir.path().join("public");
        std::fs::create_dir_all(public.join("encrypted")).unwrap();

        let keyring = Keyring {
            visible_key: [3u8; 32],
            hidden_key: [4u8; 32],
            rng_seed: 6040,
        };
        EncryptedCaseStore::new(&keyring.visible_key)
            .write(&public.join("tc_foo"), &cases(0))
            .unwrap();
        EncryptedCaseStore::new(&keyring.hidden_key)
            .write(&public.join("encrypted/tc_foo"), &cases(10))
            .unwrap();

        let manager = CaseManager::with_keyring(keyring, &public);
        let (visible, hidden) = manager.load_cases("foo").unwrap();
        assert_eq!(visible, cases(0));
        assert_eq!(hidden, cases(10));
    }
}
