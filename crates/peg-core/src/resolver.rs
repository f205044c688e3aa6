//! Account resolution: `(mint, owner)` → token account address.
//!
//! The address is the owner's associated token account, a pure function of
//! mint and owner. When the ledger does not have it yet, the resolver
//! creates it in its own confirmed bundle, paid for and signed by `payer`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use peg_keys::Keypair;
use peg_sol::{
    create_associated_token_account_idempotent, derive_associated_token_address, Pubkey,
    TransactionBundle,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::client::{timed, LedgerClient, LedgerError};
use crate::error::{Result, TreasuryError};

/// One async mutex per key, created on first use and dropped once nobody
/// holds or waits on it.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<Pubkey, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &Pubkey) -> KeyGuard<'_> {
        let lock = self
            .locks
            .entry(*key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        KeyGuard {
            locks: self,
            key: *key,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of keys with a live mutex.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Holds one key of a [`KeyedLocks`]. The last guard out removes the entry.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: Pubkey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Release first so the map's Arc is the only one left if nobody waits.
        self.guard.take();
        self.locks
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct AccountResolver {
    ledger: Arc<dyn LedgerClient>,
    timeout: Duration,
    known: DashSet<Pubkey>,
    creating: KeyedLocks,
}

impl AccountResolver {
    pub fn new(ledger: Arc<dyn LedgerClient>, timeout: Duration) -> Self {
        Self {
            ledger,
            timeout,
            known: DashSet::new(),
            creating: KeyedLocks::new(),
        }
    }

    /// The token account address for `owner` and `mint`. Pure; no ledger
    /// access.
    pub fn derive(mint: &Pubkey, owner: &Pubkey) -> Result<Pubkey> {
        Ok(derive_associated_token_address(owner, mint)?)
    }

    /// Whether `address` has been seen on the ledger by this resolver.
    pub fn is_known(&self, address: &Pubkey) -> bool {
        self.known.contains(address)
    }

    /// Fresh existence check. Positive answers are remembered.
    pub async fn exists(&self, address: &Pubkey) -> Result<bool> {
        let exists = timed(self.timeout, self.ledger.account_exists(address)).await?;
        if exists {
            self.known.insert(*address);
        }
        Ok(exists)
    }

    /// Return the token account for `owner` and `mint`, creating it if the
    /// ledger does not have it.
    ///
    /// Concurrent calls for the same account wait on each other, so at most
    /// one creation is submitted per process.
    pub async fn resolve(&self, mint: &Pubkey, owner: &Pubkey, payer: &Keypair) -> Result<Pubkey> {
        let address = Self::derive(mint, owner)?;
        if self.is_known(&address) {
            return Ok(address);
        }

        let _guard = self.creating.lock(&address).await;
        if self.is_known(&address) {
            return Ok(address);
        }

        if !self.exists(&address).await? {
            self.create(&address, mint, owner, payer).await?;
            self.known.insert(address);
        }
        Ok(address)
    }

    async fn create(
        &self,
        address: &Pubkey,
        mint: &Pubkey,
        owner: &Pubkey,
        payer: &Keypair,
    ) -> Result<()> {
        let ix = create_associated_token_account_idempotent(&payer.pubkey(), owner, mint)?;
        let blockhash = timed(self.timeout, self.ledger.latest_blockhash()).await?;
        let mut bundle = TransactionBundle::new(vec![ix], &payer.pubkey(), &blockhash)?;
        bundle.partial_sign(payer.signing_key())?;

        match timed(self.timeout, self.ledger.submit_and_confirm(&bundle)).await {
            Ok(receipt) => {
                info!(account = %address, %owner, %mint, signature = %receipt.signature, "created token account");
                Ok(())
            }
            Err(TreasuryError::Ledger(LedgerError::AccountAlreadyExists(_))) => {
                debug!(account = %address, "token account already exists");
                Ok(())
            }
            Err(e @ (TreasuryError::LedgerTimeout(_) | TreasuryError::LedgerUnavailable(_))) => {
                Err(e)
            }
            Err(e) => {
                warn!(account = %address, error = %e, "token account creation failed");
                Err(TreasuryError::AccountCreationFailed {
                    account: *address,
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use peg_sol::Blockhash;

    use super::*;
    use crate::client::Receipt;
    use crate::memory::MemoryLedger;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn setup() -> (Arc<MemoryLedger>, AccountResolver, Pubkey, Keypair) {
        let ledger = Arc::new(MemoryLedger::new());
        let mint = Pubkey::new_from_array([0x10; 32]);
        ledger.create_mint(mint, 6, None);
        let resolver = AccountResolver::new(ledger.clone(), TIMEOUT);
        (ledger, resolver, mint, Keypair::generate())
    }

    #[tokio::test]
    async fn keyed_locks_are_released_after_use() {
        let locks = KeyedLocks::new();
        let a = Pubkey::new_from_array([1; 32]);
        let b = Pubkey::new_from_array([2; 32]);

        {
            let _a = locks.lock(&a).await;
            let _b = locks.lock(&b).await;
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn keyed_lock_survives_while_someone_waits() {
        let locks = KeyedLocks::new();
        let key = Pubkey::new_from_array([7; 32]);

        let first = locks.lock(&key).await;
        let waiter = locks.lock(&key);
        tokio::pin!(waiter);
        // Queues the waiter behind `first`.
        assert!(poll_briefly(waiter.as_mut()).await.is_none());

        drop(first);
        assert_eq!(locks.len(), 1, "entry kept for the waiter");
        let second = waiter.await;
        drop(second);
        assert!(locks.is_empty());
    }

    async fn poll_briefly<F: std::future::Future + Unpin>(fut: F) -> Option<F::Output> {
        tokio::time::timeout(Duration::from_millis(10), fut).await.ok()
    }

    #[tokio::test]
    async fn creates_missing_account_once() {
        let (ledger, resolver, mint, payer) = setup();
        let owner = Keypair::generate().pubkey();

        let first = resolver.resolve(&mint, &owner, &payer).await.unwrap();
        assert_eq!(ledger.confirmed_count(), 1);
        assert_eq!(ledger.token_account(&first).unwrap().owner, owner);

        let second = resolver.resolve(&mint, &owner, &payer).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(ledger.confirmed_count(), 1, "no duplicate creation");
    }

    #[tokio::test]
    async fn existing_account_is_not_recreated() {
        let (ledger, resolver, mint, payer) = setup();
        let owner = Keypair::generate().pubkey();
        let existing = ledger.issue(&mint, &owner, 25).unwrap();

        let address = resolver.resolve(&mint, &owner, &payer).await.unwrap();
        assert_eq!(address, existing);
        assert_eq!(ledger.confirmed_count(), 0);
        assert_eq!(ledger.token_account(&address).unwrap().amount, 25);
    }

    #[tokio::test]
    async fn concurrent_resolutions_create_once() {
        let (ledger, resolver, mint, payer) = setup();
        let owner = Keypair::generate().pubkey();

        let (a, b, c) = tokio::join!(
            resolver.resolve(&mint, &owner, &payer),
            resolver.resolve(&mint, &owner, &payer),
            resolver.resolve(&mint, &owner, &payer),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert!(c.is_ok());
        assert_eq!(ledger.confirmed_count(), 1);
    }

    #[tokio::test]
    async fn rejected_creation_is_account_creation_failed() {
        let (_ledger, resolver, _mint, payer) = setup();
        let unknown_mint = Pubkey::new_from_array([0x99; 32]);
        let owner = Keypair::generate().pubkey();

        let err = resolver.resolve(&unknown_mint, &owner, &payer).await.unwrap_err();
        assert!(matches!(err, TreasuryError::AccountCreationFailed { .. }));
    }

    #[tokio::test]
    async fn offline_ledger_surfaces_unavailable() {
        let (ledger, resolver, mint, payer) = setup();
        ledger.set_unavailable(true);

        let err = resolver
            .resolve(&mint, &Keypair::generate().pubkey(), &payer)
            .await
            .unwrap_err();
        assert!(matches!(err, TreasuryError::LedgerUnavailable(_)));
    }

    /// Reports accounts absent, then loses the creation race to someone
    /// else.
    #[derive(Default)]
    struct RacingLedger {
        submits: AtomicUsize,
    }

    #[async_trait]
    impl LedgerClient for RacingLedger {
        async fn token_balance(&self, account: &Pubkey) -> std::result::Result<u64, LedgerError> {
            Err(LedgerError::AccountNotFound(*account))
        }

        async fn account_exists(&self, _: &Pubkey) -> std::result::Result<bool, LedgerError> {
            Ok(false)
        }

        async fn token_supply(&self, mint: &Pubkey) -> std::result::Result<u64, LedgerError> {
            Err(LedgerError::AccountNotFound(*mint))
        }

        async fn latest_blockhash(&self) -> std::result::Result<Blockhash, LedgerError> {
            Ok(Blockhash([1; 32]))
        }

        async fn submit_and_confirm(
            &self,
            bundle: &TransactionBundle,
        ) -> std::result::Result<Receipt, LedgerError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            let target = bundle.instructions()[0].accounts[1].pubkey;
            Err(LedgerError::AccountAlreadyExists(target))
        }
    }

    #[tokio::test]
    async fn already_exists_counts_as_success() {
        let ledger = Arc::new(RacingLedger::default());
        let resolver = AccountResolver::new(ledger.clone(), TIMEOUT);
        let mint = Pubkey::new_from_array([0x10; 32]);
        let owner = Keypair::generate().pubkey();

        let address = resolver.resolve(&mint, &owner, &Keypair::generate()).await.unwrap();
        assert_eq!(address, AccountResolver::derive(&mint, &owner).unwrap());
        assert!(resolver.is_known(&address));

        resolver.resolve(&mint, &owner, &Keypair::generate()).await.unwrap();
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 1);
    }
}
