use std::time::Duration;

use peg_sol::Pubkey;
use thiserror::Error;

use crate::client::LedgerError;

#[derive(Debug, Error)]
pub enum TreasuryError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount {amount} outside bounds [{min}, {max}]")]
    OutOfBounds { amount: u64, min: u64, max: u64 },

    #[error("Unsupported precision: reserve has {reserve} decimals, pegged has {pegged}")]
    UnsupportedPrecision { reserve: u8, pegged: u8 },

    #[error("Insufficient balance in {account}: required {required}, available {available}")]
    InsufficientBalance {
        account: Pubkey,
        required: u64,
        available: u64,
    },

    #[error("Undercollateralized: vault holds {available}, withdrawal needs {required}")]
    Undercollateralized { required: u64, available: u64 },

    #[error("Treasury-controlled account {0} cannot take part in a conversion")]
    TreasuryAccount(Pubkey),

    #[error("Keystore error: {0}")]
    Keystore(#[from] peg_keys::KeyError),

    #[error("Ledger call timed out after {0:?}")]
    LedgerTimeout(Duration),

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    #[error("Account creation failed for {account}: {reason}")]
    AccountCreationFailed { account: Pubkey, reason: String },

    #[error("Transaction build failed: {0}")]
    Transaction(#[from] peg_sol::SolError),

    #[error("Missing signatures from: {0:?}")]
    MissingSignatures(Vec<Pubkey>),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<LedgerError> for TreasuryError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Unavailable(reason) => TreasuryError::LedgerUnavailable(reason),
            other => TreasuryError::Ledger(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, TreasuryError>;
