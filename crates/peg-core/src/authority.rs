//! The treasury credential: mint authority of the pegged token and owner of
//! the reserve vault.
//!
//! Loaded once and shared read-only. Regenerating it while a vault and mint
//! are live would orphan both, so the only way to get a new key is an absent
//! keystore file.

use std::path::Path;
use std::sync::Arc;

use peg_keys::Keypair;
use peg_sol::{Pubkey, TransactionBundle};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct TreasuryAuthority {
    keypair: Arc<Keypair>,
}

impl TreasuryAuthority {
    /// Load the keystore at `path`, generating and persisting a fresh key if
    /// the file does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let keypair = peg_keys::load_or_create(path)?;
        Ok(Self::from_keypair(keypair))
    }

    /// Wrap an already loaded credential, e.g. a disposable test key.
    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Add the treasury's signature to `bundle`.
    pub fn sign(&self, bundle: &mut TransactionBundle) -> Result<()> {
        bundle.partial_sign(self.keypair.signing_key())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TreasuryError;

    #[test]
    fn identity_is_stable_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("treasury.json");

        let first = TreasuryAuthority::load_or_create(&path).unwrap();
        assert!(path.exists());
        let second = TreasuryAuthority::load_or_create(&path).unwrap();
        assert_eq!(first.pubkey(), second.pubkey());
    }

    #[test]
    fn corrupt_keystore_is_a_keystore_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("treasury.json");
        std::fs::write(&path, "not a keypair").unwrap();

        let err = TreasuryAuthority::load_or_create(&path).unwrap_err();
        assert!(matches!(err, TreasuryError::Keystore(_)));
        // The broken file is left alone.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not a keypair");
    }

    #[test]
    fn clones_share_one_key() {
        let authority = TreasuryAuthority::from_keypair(Keypair::from_seed(&[3; 32]));
        let clone = authority.clone();
        assert_eq!(authority.pubkey(), clone.pubkey());
        assert!(Arc::ptr_eq(&authority.keypair, &clone.keypair));
    }
}
