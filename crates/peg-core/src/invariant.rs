//! Peg invariant: `pegged_supply == vault_balance * multiplier`.
//!
//! A mismatch is reported, never raised. It can be transient while a
//! bundle is in flight, so deciding what to do about it is the caller's job.

use std::sync::Arc;
use std::time::Duration;

use peg_sol::Pubkey;
use serde::Serialize;
use tracing::{debug, warn};

use crate::client::{timed, LedgerClient};
use crate::error::Result;
use crate::vault::ReserveVault;

/// A snapshot of supply against backing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PegReport {
    /// Total pegged supply, pegged atomic units.
    pub pegged_supply: u64,
    /// Vault balance, reserve atomic units.
    pub vault_balance: u64,
    pub multiplier: u64,
    /// `vault_balance * multiplier`: the pegged supply the vault can back.
    pub backed_supply: u128,
}

impl PegReport {
    pub fn new(pegged_supply: u64, vault_balance: u64, multiplier: u64) -> Self {
        Self {
            pegged_supply,
            vault_balance,
            multiplier,
            backed_supply: vault_balance as u128 * multiplier as u128,
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.pegged_supply as u128 == self.backed_supply
    }

    /// Pegged atomic units in circulation without backing.
    pub fn unbacked(&self) -> u128 {
        (self.pegged_supply as u128).saturating_sub(self.backed_supply)
    }

    /// Backing (in pegged atomic units) not matched by supply.
    pub fn excess_backing(&self) -> u128 {
        self.backed_supply.saturating_sub(self.pegged_supply as u128)
    }
}

pub struct InvariantChecker {
    ledger: Arc<dyn LedgerClient>,
    pegged_mint: Pubkey,
    vault: Arc<ReserveVault>,
    multiplier: u64,
    timeout: Duration,
}

impl InvariantChecker {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        pegged_mint: Pubkey,
        vault: Arc<ReserveVault>,
        multiplier: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            pegged_mint,
            vault,
            multiplier,
            timeout,
        }
    }

    /// Read supply and vault balance. Read failures are errors, not
    /// mismatches.
    pub async fn audit(&self) -> Result<PegReport> {
        let pegged_supply = timed(self.timeout, self.ledger.token_supply(&self.pegged_mint)).await?;
        let vault_balance = self.vault.balance().await?;
        let report = PegReport::new(pegged_supply, vault_balance, self.multiplier);

        if report.is_balanced() {
            debug!(pegged_supply, vault_balance, "peg invariant holds");
        } else {
            warn!(
                pegged_supply,
                vault_balance,
                unbacked = %report.unbacked(),
                excess_backing = %report.excess_backing(),
                "peg invariant violated"
            );
        }
        Ok(report)
    }

    pub async fn check_peg_invariant(&self) -> Result<bool> {
        Ok(self.audit().await?.is_balanced())
    }
}
