//! Token program instructions and associated token account derivation.
//!
//! Builds the token program's checked instruction variants and the
//! associated-token-account creation instruction by hand, without the
//! `spl-token` or `spl-associated-token-account` crates. Each builder mirrors
//! the on-chain instruction layout exactly; the program itself is external.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::Pubkey;
use crate::error::SolError;
use crate::transaction::{SolAccountMeta, SolInstruction};

// ---------------------------------------------------------------------------
// Well-known program IDs
// ---------------------------------------------------------------------------

/// System Program ID: `11111111111111111111111111111111`
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new_from_array([0u8; 32]);

/// SPL Token Program ID: `TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA`
pub const TOKEN_PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    0x06, 0xdd, 0xf6, 0xe1, 0xd7, 0x65, 0xa1, 0x93, 0xd9, 0xcb, 0xe1, 0x46, 0xce, 0xeb, 0x79,
    0xac, 0x1c, 0xb4, 0x85, 0xed, 0x5f, 0x5b, 0x37, 0x91, 0x3a, 0x8c, 0xf5, 0x85, 0x7e, 0xff,
    0x00, 0xa9,
]);

/// Associated Token Account Program ID: `ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL`
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    0x8c, 0x97, 0x25, 0x8f, 0x4e, 0x24, 0x89, 0xf1, 0xbb, 0x3d, 0x10, 0x29, 0x14, 0x8e, 0x0d,
    0x83, 0x0b, 0x5a, 0x13, 0x99, 0xda, 0xff, 0x10, 0x84, 0x04, 0x8e, 0x7b, 0xd8, 0xdb, 0xe9,
    0xf8, 0x59,
]);

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

const TRANSFER_CHECKED_TAG: u8 = 12;
const MINT_TO_CHECKED_TAG: u8 = 14;
const BURN_CHECKED_TAG: u8 = 15;

/// Associated token program: `CreateIdempotent`.
pub const ATA_CREATE_IDEMPOTENT_TAG: u8 = 1;

// ---------------------------------------------------------------------------
// Instruction decoding
// ---------------------------------------------------------------------------

/// The token program instructions this workspace emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenInstruction {
    TransferChecked { amount: u64, decimals: u8 },
    MintToChecked { amount: u64, decimals: u8 },
    BurnChecked { amount: u64, decimals: u8 },
}

impl TokenInstruction {
    /// Decode token program instruction data.
    ///
    /// All three checked variants share the layout `[tag, amount u64 LE,
    /// decimals u8]`.
    pub fn unpack(data: &[u8]) -> Result<Self, SolError> {
        if data.len() != 10 {
            return Err(SolError::SerializationError(format!(
                "token instruction must be 10 bytes, got {}",
                data.len()
            )));
        }
        let mut amount_bytes = [0u8; 8];
        amount_bytes.copy_from_slice(&data[1..9]);
        let amount = u64::from_le_bytes(amount_bytes);
        let decimals = data[9];

        match data[0] {
            TRANSFER_CHECKED_TAG => Ok(Self::TransferChecked { amount, decimals }),
            MINT_TO_CHECKED_TAG => Ok(Self::MintToChecked { amount, decimals }),
            BURN_CHECKED_TAG => Ok(Self::BurnChecked { amount, decimals }),
            other => Err(SolError::SerializationError(format!(
                "unsupported token instruction tag {other}"
            ))),
        }
    }

    fn pack(tag: u8, amount: u64, decimals: u8) -> Vec<u8> {
        let mut data = Vec::with_capacity(10);
        data.push(tag);
        data.extend_from_slice(&amount.to_le_bytes());
        data.push(decimals);
        data
    }
}

// ---------------------------------------------------------------------------
// Instruction builders
// ---------------------------------------------------------------------------

/// How reserve transfers are encoded.
///
/// Only plain transfers exist today. A confidential-transfer variant would
/// be added here and routed through [`build_transfer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TransferMode {
    #[default]
    Plain,
}

/// Build a reserve transfer in the given mode.
pub fn build_transfer(
    mode: TransferMode,
    source: &Pubkey,
    mint: &Pubkey,
    destination: &Pubkey,
    authority: &Pubkey,
    amount: u64,
    decimals: u8,
) -> Result<SolInstruction, SolError> {
    match mode {
        TransferMode::Plain => {
            transfer_checked(source, mint, destination, authority, amount, decimals)
        }
    }
}

/// Build a `TransferChecked` instruction.
///
/// Moves `amount` base units from `source` to `destination`. The program
/// rejects the transfer if `decimals` does not match the mint, so a unit
/// mix-up between tokens fails on-chain instead of moving the wrong value.
pub fn transfer_checked(
    source: &Pubkey,
    mint: &Pubkey,
    destination: &Pubkey,
    authority: &Pubkey,
    amount: u64,
    decimals: u8,
) -> Result<SolInstruction, SolError> {
    ensure_nonzero(amount, "transfer")?;

    Ok(SolInstruction {
        program_id: TOKEN_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::writable(*source, false),
            SolAccountMeta::readonly(*mint, false),
            SolAccountMeta::writable(*destination, false),
            SolAccountMeta::readonly(*authority, true),
        ],
        data: TokenInstruction::pack(TRANSFER_CHECKED_TAG, amount, decimals),
    })
}

/// Build a `MintToChecked` instruction signed by the mint authority.
pub fn mint_to_checked(
    mint: &Pubkey,
    destination: &Pubkey,
    mint_authority: &Pubkey,
    amount: u64,
    decimals: u8,
) -> Result<SolInstruction, SolError> {
    ensure_nonzero(amount, "mint")?;

    Ok(SolInstruction {
        program_id: TOKEN_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::writable(*mint, false),
            SolAccountMeta::writable(*destination, false),
            SolAccountMeta::readonly(*mint_authority, true),
        ],
        data: TokenInstruction::pack(MINT_TO_CHECKED_TAG, amount, decimals),
    })
}

/// Build a `BurnChecked` instruction.
///
/// The burn authority is the owner of `source` (or its delegate), not the
/// mint authority.
pub fn burn_checked(
    source: &Pubkey,
    mint: &Pubkey,
    owner: &Pubkey,
    amount: u64,
    decimals: u8,
) -> Result<SolInstruction, SolError> {
    ensure_nonzero(amount, "burn")?;

    Ok(SolInstruction {
        program_id: TOKEN_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::writable(*source, false),
            SolAccountMeta::writable(*mint, false),
            SolAccountMeta::readonly(*owner, true),
        ],
        data: TokenInstruction::pack(BURN_CHECKED_TAG, amount, decimals),
    })
}

/// Build an associated-token-account `CreateIdempotent` instruction.
///
/// Succeeds on-chain when the account already exists with the expected
/// owner and mint, which makes retries safe.
pub fn create_associated_token_account_idempotent(
    payer: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
) -> Result<SolInstruction, SolError> {
    let account = derive_associated_token_address(owner, mint)?;

    Ok(SolInstruction {
        program_id: ASSOCIATED_TOKEN_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::writable(*payer, true),
            SolAccountMeta::writable(account, false),
            SolAccountMeta::readonly(*owner, false),
            SolAccountMeta::readonly(*mint, false),
            SolAccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
            SolAccountMeta::readonly(TOKEN_PROGRAM_ID, false),
        ],
        data: vec![ATA_CREATE_IDEMPOTENT_TAG],
    })
}

fn ensure_nonzero(amount: u64, what: &str) -> Result<(), SolError> {
    if amount == 0 {
        return Err(SolError::InstructionBuildError(format!(
            "{what} amount must be > 0"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Associated Token Account (PDA) derivation
// ---------------------------------------------------------------------------

/// Derive the associated token account address for an owner + mint pair.
///
/// Seeds: `[owner, token_program_id, mint]`, derived from the associated
/// token account program.
pub fn derive_associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Result<Pubkey, SolError> {
    find_program_address(
        &[owner.as_ref(), TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .map(|(address, _bump)| address)
}

/// Find a Program Derived Address for the given seeds and program.
///
/// Iterates bump seeds from 255 down to 0 and returns the first hash of
/// `seed_0 || ... || bump || program_id || "ProgramDerivedAddress"` that is
/// NOT a valid Ed25519 point.
pub fn find_program_address(
    seeds: &[&[u8]],
    program_id: &Pubkey,
) -> Result<(Pubkey, u8), SolError> {
    for bump in (0u8..=255).rev() {
        if let Some(address) = try_create_program_address(seeds, &[bump], program_id) {
            return Ok((address, bump));
        }
    }

    Err(SolError::InvalidAddress(
        "could not find valid PDA bump seed".into(),
    ))
}

fn try_create_program_address(
    seeds: &[&[u8]],
    bump_seed: &[u8],
    program_id: &Pubkey,
) -> Option<Pubkey> {
    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update(bump_seed);
    hasher.update(program_id.as_ref());
    hasher.update(PDA_MARKER);

    let hash: [u8; 32] = hasher.finalize().into();

    if is_on_curve(&hash) {
        return None;
    }
    Some(Pubkey::new_from_array(hash))
}

/// Whether 32 bytes decompress to an Ed25519 point.
pub fn is_on_curve(bytes: &[u8; 32]) -> bool {
    curve25519_dalek::edwards::CompressedEdwardsY(*bytes)
        .decompress()
        .is_some()
}
