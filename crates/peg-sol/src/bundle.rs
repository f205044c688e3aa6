//! Partially signed transaction bundles.
//!
//! A bundle is one compiled message plus a signature slot per required
//! signer. The ledger executes all of its instructions or none of them, so
//! everything that must happen together goes into a single bundle. Signers
//! may fill their slots independently and in any order.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

use crate::address::Pubkey;
use crate::error::SolError;
use crate::transaction::{
    compile_message, encode_compact_u16, serialize_message, Blockhash, CompiledMessage,
    SolInstruction,
};

#[derive(Debug, Clone)]
pub struct TransactionBundle {
    instructions: Vec<SolInstruction>,
    message: CompiledMessage,
    message_bytes: Vec<u8>,
    signatures: Vec<Option<[u8; 64]>>,
}

impl TransactionBundle {
    /// Compile `instructions` into an unsigned bundle.
    pub fn new(
        instructions: Vec<SolInstruction>,
        fee_payer: &Pubkey,
        recent_blockhash: &Blockhash,
    ) -> Result<Self, SolError> {
        let message = compile_message(&instructions, fee_payer, recent_blockhash)?;
        let message_bytes = serialize_message(&message)?;
        let signatures = vec![None; message.num_required_signatures as usize];

        Ok(Self {
            instructions,
            message,
            message_bytes,
            signatures,
        })
    }

    /// The instructions in execution order.
    pub fn instructions(&self) -> &[SolInstruction] {
        &self.instructions
    }

    pub fn message(&self) -> &CompiledMessage {
        &self.message
    }

    pub fn message_bytes(&self) -> &[u8] {
        &self.message_bytes
    }

    pub fn fee_payer(&self) -> &Pubkey {
        self.message.fee_payer()
    }

    pub fn recent_blockhash(&self) -> &Blockhash {
        &self.message.recent_blockhash
    }

    /// Every account whose signature the ledger requires.
    pub fn signer_keys(&self) -> &[Pubkey] {
        self.message.signer_keys()
    }

    /// Sign with `key`, filling that signer's slot.
    ///
    /// Fails if the key is not one of the required signers.
    pub fn partial_sign(&mut self, key: &SigningKey) -> Result<(), SolError> {
        let signer = Pubkey::new_from_array(key.verifying_key().to_bytes());
        let slot = self.slot_of(&signer)?;
        self.signatures[slot] = Some(key.sign(&self.message_bytes).to_bytes());
        Ok(())
    }

    /// Insert a signature produced elsewhere (a user wallet, say).
    ///
    /// The signature is verified before it is accepted.
    pub fn add_signature(&mut self, signer: &Pubkey, signature: [u8; 64]) -> Result<(), SolError> {
        let slot = self.slot_of(signer)?;
        verify_one(signer, &signature, &self.message_bytes)?;
        self.signatures[slot] = Some(signature);
        Ok(())
    }

    /// Signature for `signer`, if its slot is filled.
    pub fn signature_of(&self, signer: &Pubkey) -> Option<[u8; 64]> {
        let slot = self.signer_keys().iter().position(|k| k == signer)?;
        self.signatures[slot]
    }

    /// Required signers whose slots are still empty.
    pub fn missing_signers(&self) -> Vec<Pubkey> {
        self.signer_keys()
            .iter()
            .zip(&self.signatures)
            .filter(|(_, sig)| sig.is_none())
            .map(|(key, _)| *key)
            .collect()
    }

    pub fn is_fully_signed(&self) -> bool {
        self.signatures.iter().all(Option::is_some)
    }

    /// Check that every slot is filled with a valid signature over the
    /// message.
    pub fn verify_signatures(&self) -> Result<(), SolError> {
        for (key, sig) in self.signer_keys().iter().zip(&self.signatures) {
            let sig = sig.ok_or_else(|| SolError::SigningError(format!("missing signature for {key}")))?;
            verify_one(key, &sig, &self.message_bytes)?;
        }
        Ok(())
    }

    /// Transaction id: the fee payer's signature in Base58.
    pub fn id(&self) -> Option<String> {
        self.signatures
            .first()
            .copied()
            .flatten()
            .map(|sig| bs58::encode(sig).into_string())
    }

    /// Wire bytes; empty slots are zero-filled.
    pub fn to_wire(&self) -> Result<Vec<u8>, SolError> {
        let count = u16::try_from(self.signatures.len())
            .map_err(|_| SolError::SerializationError("too many signatures".into()))?;

        let mut wire = Vec::with_capacity(3 + 64 * self.signatures.len() + self.message_bytes.len());
        wire.extend_from_slice(&encode_compact_u16(count));
        for sig in &self.signatures {
            wire.extend_from_slice(&sig.unwrap_or([0u8; 64]));
        }
        wire.extend_from_slice(&self.message_bytes);
        Ok(wire)
    }

    fn slot_of(&self, signer: &Pubkey) -> Result<usize, SolError> {
        self.signer_keys()
            .iter()
            .position(|k| k == signer)
            .ok_or_else(|| SolError::SigningError(format!("{signer} is not a required signer")))
    }
}

fn verify_one(signer: &Pubkey, signature: &[u8; 64], message: &[u8]) -> Result<(), SolError> {
    let key = VerifyingKey::from_bytes(signer.as_bytes())
        .map_err(|e| SolError::SigningError(format!("{signer} is not a verifying key: {e}")))?;
    key.verify_strict(message, &Signature::from_bytes(signature))
        .map_err(|_| SolError::SigningError(format!("invalid signature for {signer}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spl_token::{mint_to_checked, transfer_checked};
    use rand::rngs::OsRng;

    struct Fixture {
        user: SigningKey,
        treasury: SigningKey,
        bundle: TransactionBundle,
    }

    fn pubkey(key: &SigningKey) -> Pubkey {
        Pubkey::new_from_array(key.verifying_key().to_bytes())
    }

    /// Deposit-shaped bundle: user transfers reserve, treasury mints.
    fn fixture() -> Fixture {
        let user = SigningKey::generate(&mut OsRng);
        let treasury = SigningKey::generate(&mut OsRng);
        let reserve_mint = Pubkey::new_from_array([1; 32]);
        let pegged_mint = Pubkey::new_from_array([2; 32]);

        let ixs = vec![
            transfer_checked(
                &Pubkey::new_from_array([3; 32]),
                &reserve_mint,
                &Pubkey::new_from_array([4; 32]),
                &pubkey(&user),
                1_500_000,
                6,
            )
            .unwrap(),
            mint_to_checked(
                &pegged_mint,
                &Pubkey::new_from_array([5; 32]),
                &pubkey(&treasury),
                1_500_000_000,
                9,
            )
            .unwrap(),
        ];
        let bundle = TransactionBundle::new(ixs, &pubkey(&user), &Blockhash([7; 32])).unwrap();

        Fixture {
            user,
            treasury,
            bundle,
        }
    }

    #[test]
    fn fresh_bundle_needs_both_signers() {
        let f = fixture();
        assert_eq!(f.bundle.signer_keys(), &[pubkey(&f.user), pubkey(&f.treasury)]);
        assert_eq!(f.bundle.missing_signers().len(), 2);
        assert!(!f.bundle.is_fully_signed());
        assert!(f.bundle.id().is_none());
    }

    #[test]
    fn signers_fill_slots_in_any_order() {
        let mut f = fixture();

        f.bundle.partial_sign(&f.treasury).unwrap();
        assert_eq!(f.bundle.missing_signers(), vec![pubkey(&f.user)]);
        assert!(f.bundle.verify_signatures().is_err());

        f.bundle.partial_sign(&f.user).unwrap();
        assert!(f.bundle.is_fully_signed());
        f.bundle.verify_signatures().unwrap();
        assert!(f.bundle.id().is_some());
    }

    #[test]
    fn stranger_cannot_sign() {
        let mut f = fixture();
        let stranger = SigningKey::generate(&mut OsRng);
        let err = f.bundle.partial_sign(&stranger).unwrap_err();
        assert!(err.to_string().contains("not a required signer"));
    }

    #[test]
    fn external_signature_is_verified() {
        let mut f = fixture();
        let good = f.user.sign(f.bundle.message_bytes()).to_bytes();
        let user = pubkey(&f.user);

        assert!(f.bundle.add_signature(&user, [9u8; 64]).is_err());
        f.bundle.add_signature(&user, good).unwrap();
        assert_eq!(f.bundle.signature_of(&user), Some(good));
    }

    #[test]
    fn wire_format_prefixes_signature_slots() {
        let mut f = fixture();
        f.bundle.partial_sign(&f.treasury).unwrap();
        let wire = f.bundle.to_wire().unwrap();

        assert_eq!(wire[0], 2);
        assert_eq!(&wire[1..65], &[0u8; 64], "user slot still empty");
        assert_eq!(&wire[129..], f.bundle.message_bytes());
    }
}
