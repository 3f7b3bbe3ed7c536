//! Encryption keys and sampling seed for a build target
//!
//! A keyring holds the two symmetric keys (visible, hidden) and the RNG seed
//! that make rebuilds comparable. It is created once per assignment and then
//! loaded verbatim on every subsequent build; regenerating it would make all
//! previously written case files unreadable and case sets non-comparable.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{ForgeError, Result};

/// Symmetric key size for ChaCha20-Poly1305 (256 bits)
pub const KEY_SIZE: usize = 32;

/// A case-file encryption key
pub type CaseKey = [u8; KEY_SIZE];

/// Generate a fresh random case key
pub fn generate_case_key() -> CaseKey {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// The persisted key material for one assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyring {
    /// Key for the student-visible case files
    pub visible_key: CaseKey,
    /// Key for the withheld grading case files
    pub hidden_key: CaseKey,
    /// Seed for the deterministic sampler RNG
    pub rng_seed: u64,
}

/// On-disk form of the keyring (keys hex-encoded)
#[derive(Serialize, Deserialize)]
struct StoredKeyring {
    visible_key: String,
    hidden_key: String,
    rng_seed: u64,
}

fn decode_key(hex_key: &str, field: &str) -> Result<CaseKey> {
    let bytes = hex::decode(hex_key)
        .map_err(|e| ForgeError::Deserialization(format!("invalid {} hex: {}", field, e)))?;
    bytes.try_into().map_err(|_| {
        ForgeError::Deserialization(format!("{} must be {} bytes", field, KEY_SIZE))
    })
}

impl Keyring {
    /// Generate a fresh keyring with random keys and a small sampling seed
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            visible_key: generate_case_key(),
            hidden_key: generate_case_key(),
            rng_seed: rng.gen_range(1000..=9999),
        }
    }

    /// Load the keyring from `path`, or generate and persist a fresh one if
    /// the file does not exist. An existing file is never regenerated.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let keyring = Self::load(path)?;
            info!(path = %path.display(), "Loaded existing keyring");
            Ok(keyring)
        } else {
            let keyring = Self::generate();
            keyring.save(path)?;
            info!(path = %path.display(), "Generated new keyring");
            Ok(keyring)
        }
    }

    /// Load the keyring from an existing file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let stored: StoredKeyring = serde_json::from_slice(&raw)
            .map_err(|e| ForgeError::Deserialization(format!("invalid keyring file: {}", e)))?;
        Ok(Self {
            visible_key: decode_key(&stored.visible_key, "visible_key")?,
            hidden_key: decode_key(&stored.hidden_key, "hidden_key")?,
            rng_seed: stored.rng_seed,
        })
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let stored = StoredKeyring {
            visible_key: hex::encode(self.visible_key),
            hidden_key: hex::encode(self.hidden_key),
            rng_seed: self.rng_seed,
        };
        std::fs::write(path, serde_json::to_vec_pretty(&stored)?)?;
        Ok(())
    }
}
