//! The ledger client seam.
//!
//! Connectivity, RPC transport and confirmation tracking live outside this
//! crate. The treasury only needs the handful of calls below; every one of
//! them is a suspension point and is bounded by [`timed`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use peg_sol::{Blockhash, Pubkey, TransactionBundle};
use thiserror::Error;

use crate::error::{Result, TreasuryError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("account not found: {0}")]
    AccountNotFound(Pubkey),

    #[error("account already exists: {0}")]
    AccountAlreadyExists(Pubkey),

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// Proof that a bundle landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Base58 transaction id (the fee payer's signature).
    pub signature: String,
    /// Ledger slot or sequence number the bundle was confirmed in.
    pub slot: u64,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Atomic balance of a token account.
    async fn token_balance(&self, account: &Pubkey) -> std::result::Result<u64, LedgerError>;

    /// Whether any account exists at `address`.
    async fn account_exists(&self, address: &Pubkey) -> std::result::Result<bool, LedgerError>;

    /// Total atomic supply of a mint.
    async fn token_supply(&self, mint: &Pubkey) -> std::result::Result<u64, LedgerError>;

    async fn latest_blockhash(&self) -> std::result::Result<Blockhash, LedgerError>;

    /// Submit a fully signed bundle and wait until it is confirmed. The
    /// ledger applies all of the bundle's instructions or none of them.
    async fn submit_and_confirm(
        &self,
        bundle: &TransactionBundle,
    ) -> std::result::Result<Receipt, LedgerError>;
}

/// Run a ledger call under `limit`, mapping expiry to `LedgerTimeout`.
pub async fn timed<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, LedgerError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(TreasuryError::from),
        Err(_) => Err(TreasuryError::LedgerTimeout(limit)),
    }
}
