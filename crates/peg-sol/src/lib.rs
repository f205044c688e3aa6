//! Ledger wire layer for the peg treasury.
//!
//! Addresses, token program instructions, associated token account
//! derivation, and the compact transaction format, all implemented by hand
//! on top of `ed25519-dalek`, `curve25519-dalek`, `sha2` and `bs58` rather
//! than `solana-sdk`.

pub mod address;
pub mod bundle;
pub mod error;
pub mod spl_token;
pub mod transaction;

pub use address::{address_to_bytes, bytes_to_address, validate_address, Pubkey};
pub use bundle::TransactionBundle;
pub use error::SolError;
pub use spl_token::{
    build_transfer, burn_checked, create_associated_token_account_idempotent,
    derive_associated_token_address, find_program_address, mint_to_checked, transfer_checked,
    TokenInstruction, TransferMode, ASSOCIATED_TOKEN_PROGRAM_ID, SYSTEM_PROGRAM_ID,
    TOKEN_PROGRAM_ID,
};
pub use transaction::{
    compile_message, decode_compact_u16, encode_compact_u16, serialize_message, Blockhash,
    CompiledInstruction, CompiledMessage, SolAccountMeta, SolInstruction,
};
