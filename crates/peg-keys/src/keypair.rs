use std::fmt;

use ed25519_dalek::{Signer, SigningKey};
use peg_sol::Pubkey;
use rand_core::OsRng;
use zeroize::Zeroizing;

use crate::error::KeyError;

/// Length of the serialized keypair: 32-byte seed followed by the 32-byte
/// public key.
pub const KEYPAIR_LENGTH: usize = 64;

/// An Ed25519 signing identity.
///
/// The secret half is wiped on drop (`ed25519-dalek` zeroizes `SigningKey`)
/// and never appears in `Debug` output.
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Build from a 32-byte secret seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Parse the 64-byte `seed || pubkey` form, checking that both halves
    /// belong together.
    pub fn from_keypair_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != KEYPAIR_LENGTH {
            return Err(KeyError::InvalidKeyLength {
                expected: KEYPAIR_LENGTH,
                actual: bytes.len(),
            });
        }

        let mut seed = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&bytes[..32]);
        let keypair = Self::from_seed(&seed);

        if keypair.pubkey().as_ref() != &bytes[32..] {
            return Err(KeyError::KeyMismatch);
        }
        Ok(keypair)
    }

    /// Serialize to the 64-byte `seed || pubkey` form.
    pub fn to_keypair_bytes(&self) -> Zeroizing<[u8; KEYPAIR_LENGTH]> {
        Zeroizing::new(self.signing.to_keypair_bytes())
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey::new_from_array(self.signing.verifying_key().to_bytes())
    }

    /// The underlying key, for filling bundle signature slots.
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("pubkey", &self.pubkey())
            .finish_non_exhaustive()
    }
}
