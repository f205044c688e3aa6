//! The reserve vault: the treasury's token account for the reserve mint.
//!
//! Its balance is the only backing for pegged supply. Balances are always
//! read fresh from the ledger; the vault caches nothing but its address.

use std::sync::Arc;
use std::time::Duration;

use peg_sol::Pubkey;
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::authority::TreasuryAuthority;
use crate::client::{timed, LedgerClient};
use crate::error::{Result, TreasuryError};
use crate::resolver::AccountResolver;

pub struct ReserveVault {
    address: Pubkey,
    mint: Pubkey,
    owner: Pubkey,
    ledger: Arc<dyn LedgerClient>,
    timeout: Duration,
    /// Serializes solvency decisions against this vault.
    gate: Mutex<()>,
}

impl ReserveVault {
    /// Resolve the vault for `authority` and `mint`, creating the account
    /// if this is the first run.
    pub async fn open(
        resolver: &AccountResolver,
        ledger: Arc<dyn LedgerClient>,
        mint: &Pubkey,
        authority: &TreasuryAuthority,
        timeout: Duration,
    ) -> Result<Self> {
        let address = resolver.resolve(mint, &authority.pubkey(), authority.keypair()).await?;
        info!(vault = %address, %mint, "reserve vault ready");
        Ok(Self {
            address,
            mint: *mint,
            owner: authority.pubkey(),
            ledger,
            timeout,
            gate: Mutex::new(()),
        })
    }

    pub fn address(&self) -> &Pubkey {
        &self.address
    }

    pub fn mint(&self) -> &Pubkey {
        &self.mint
    }

    /// The key that controls the vault (the treasury authority).
    pub fn owner(&self) -> &Pubkey {
        &self.owner
    }

    /// Current on-ledger balance in reserve atomic units.
    pub async fn balance(&self) -> Result<u64> {
        timed(self.timeout, self.ledger.token_balance(&self.address)).await
    }

    /// Fail with `Undercollateralized` unless the vault currently holds at
    /// least `required`. Returns the balance that was read.
    pub async fn ensure_covers(&self, required: u64) -> Result<u64> {
        let available = self.balance().await?;
        if available < required {
            return Err(TreasuryError::Undercollateralized {
                required,
                available,
            });
        }
        Ok(available)
    }

    /// Hold this while checking solvency and acting on the answer.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }
}

impl std::fmt::Debug for ReserveVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReserveVault")
            .field("address", &self.address)
            .field("mint", &self.mint)
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use peg_keys::Keypair;

    use super::*;
    use crate::memory::MemoryLedger;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn open() -> (Arc<MemoryLedger>, ReserveVault, TreasuryAuthority) {
        let ledger = Arc::new(MemoryLedger::new());
        let mint = Pubkey::new_from_array([0x20; 32]);
        ledger.create_mint(mint, 6, None);
        let authority = TreasuryAuthority::from_keypair(Keypair::generate());
        let resolver = AccountResolver::new(ledger.clone(), TIMEOUT);
        let vault = ReserveVault::open(&resolver, ledger.clone(), &mint, &authority, TIMEOUT)
            .await
            .unwrap();
        (ledger, vault, authority)
    }

    #[tokio::test]
    async fn open_creates_the_vault_account() {
        let (ledger, vault, authority) = open().await;

        let account = ledger.token_account(vault.address()).unwrap();
        assert_eq!(account.owner, authority.pubkey());
        assert_eq!(account.mint, *vault.mint());
        assert_eq!(vault.balance().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn balance_is_read_fresh() {
        let (ledger, vault, authority) = open().await;
        ledger.issue(vault.mint(), &authority.pubkey(), 100).unwrap();
        assert_eq!(vault.balance().await.unwrap(), 100);

        ledger.issue(vault.mint(), &authority.pubkey(), 50).unwrap();
        assert_eq!(vault.balance().await.unwrap(), 150);
    }

    #[tokio::test]
    async fn ensure_covers_rejects_shortfall() {
        let (ledger, vault, authority) = open().await;
        ledger.issue(vault.mint(), &authority.pubkey(), 100).unwrap();

        assert_eq!(vault.ensure_covers(100).await.unwrap(), 100);
        let err = vault.ensure_covers(150).await.unwrap_err();
        assert!(matches!(
            err,
            TreasuryError::Undercollateralized {
                required: 150,
                available: 100
            }
        ));
    }
}
