//! # Conversion Engine
//!
//! Builds the two atomic bundles the treasury offers:
//!
//! - **deposit**: the user's reserve tokens move into the vault and the same
//!   value of pegged tokens is minted to the user;
//! - **withdraw**: the user's pegged tokens are burned and the same value of
//!   reserve tokens leaves the vault for the user.
//!
//! Builders never submit. The returned bundle is already signed by the
//! treasury; the user signs it as fee payer and token authority, and the
//! caller submits it, either directly or through [`ConversionEngine::submit`],
//! which re-checks solvency first.
//!
//! Requests for the same user are serialized, and a withdrawal holds the
//! vault gate while it checks solvency and builds, so concurrent withdrawals
//! cannot both spend the same backing.

use std::sync::Arc;
use std::time::Duration;

use peg_keys::Keypair;
use peg_sol::{
    build_transfer, burn_checked, mint_to_checked, Pubkey, SolInstruction, TransactionBundle,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::authority::TreasuryAuthority;
use crate::client::{timed, LedgerClient, LedgerError, Receipt};
use crate::config::{AmountBounds, TreasuryConfig};
use crate::error::{Result, TreasuryError};
use crate::invariant::{InvariantChecker, PegReport};
use crate::resolver::{AccountResolver, KeyedLocks};
use crate::units::{pegged_to_reserve, reserve_to_pegged, to_atomic, DecimalAmount};
use crate::vault::ReserveVault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Reserve in, pegged minted.
    Deposit,
    /// Pegged burned, reserve out.
    Withdraw,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Deposit => f.write_str("deposit"),
            Direction::Withdraw => f.write_str("withdraw"),
        }
    }
}

/// A single conversion request. The amount is in units of the token the
/// user gives up: reserve for deposits, pegged for withdrawals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub direction: Direction,
    pub user: Pubkey,
    pub amount: DecimalAmount,
    /// Overrides the configured bounds for this direction.
    pub bounds: Option<AmountBounds>,
}

impl ConversionRequest {
    pub fn deposit(user: Pubkey, amount: DecimalAmount) -> Self {
        Self {
            direction: Direction::Deposit,
            user,
            amount,
            bounds: None,
        }
    }

    pub fn withdraw(user: Pubkey, amount: DecimalAmount) -> Self {
        Self {
            direction: Direction::Withdraw,
            user,
            amount,
            bounds: None,
        }
    }

    pub fn with_bounds(mut self, bounds: AmountBounds) -> Self {
        self.bounds = Some(bounds);
        self
    }
}

/// A built conversion, ready for the user's signature.
#[derive(Debug, Clone)]
pub struct ConversionBundle {
    pub direction: Direction,
    pub user: Pubkey,
    pub reserve_atomic: u64,
    pub pegged_atomic: u64,
    pub bundle: TransactionBundle,
    /// Treasury-side signers. Their signatures are already on the bundle.
    pub signers: Vec<Pubkey>,
}

impl ConversionBundle {
    /// Add a signature from a local keypair, typically the user's.
    pub fn sign_with(&mut self, keypair: &Keypair) -> Result<()> {
        self.bundle.partial_sign(keypair.signing_key())?;
        Ok(())
    }

    /// Signers whose signatures the bundle still lacks.
    pub fn pending_signers(&self) -> Vec<Pubkey> {
        self.bundle.missing_signers()
    }
}

pub struct ConversionEngine {
    config: TreasuryConfig,
    multiplier: u64,
    timeout: Duration,
    ledger: Arc<dyn LedgerClient>,
    authority: TreasuryAuthority,
    resolver: AccountResolver,
    vault: Arc<ReserveVault>,
    checker: InvariantChecker,
    user_locks: KeyedLocks,
}

impl ConversionEngine {
    /// Start the treasury from configuration: load (or create) the keystore,
    /// then continue as [`ConversionEngine::new`].
    pub async fn initialize(config: TreasuryConfig, ledger: Arc<dyn LedgerClient>) -> Result<Self> {
        config.validate()?;
        let authority = TreasuryAuthority::load_or_create(&config.keystore_path)?;
        Self::new(config, ledger, authority).await
    }

    /// Build an engine around an injected authority. Opens (creating if
    /// needed) the reserve vault and checks the peg once; a violation is
    /// logged, not fatal.
    pub async fn new(
        config: TreasuryConfig,
        ledger: Arc<dyn LedgerClient>,
        authority: TreasuryAuthority,
    ) -> Result<Self> {
        config.validate()?;
        let multiplier = config.multiplier()?;
        let timeout = config.ledger_timeout();

        let resolver = AccountResolver::new(ledger.clone(), timeout);
        let vault = ReserveVault::open(
            &resolver,
            ledger.clone(),
            &config.reserve.mint,
            &authority,
            timeout,
        )
        .await?;
        let vault = Arc::new(vault);
        let checker = InvariantChecker::new(
            ledger.clone(),
            config.pegged.mint,
            vault.clone(),
            multiplier,
            timeout,
        );

        match checker.check_peg_invariant().await {
            Ok(true) => info!(authority = %authority.pubkey(), "treasury initialized, peg holds"),
            Ok(false) => warn!(authority = %authority.pubkey(), "treasury initialized with peg invariant violated"),
            Err(e) => warn!(error = %e, "treasury initialized without a peg check"),
        }

        Ok(Self {
            config,
            multiplier,
            timeout,
            ledger,
            authority,
            resolver,
            vault,
            checker,
            user_locks: KeyedLocks::new(),
        })
    }

    pub fn config(&self) -> &TreasuryConfig {
        &self.config
    }

    pub fn authority(&self) -> &TreasuryAuthority {
        &self.authority
    }

    pub fn vault(&self) -> &ReserveVault {
        &self.vault
    }

    pub fn resolver(&self) -> &AccountResolver {
        &self.resolver
    }

    pub fn multiplier(&self) -> u64 {
        self.multiplier
    }

    // -- conversions ---------------------------------------------------------

    pub async fn execute(&self, request: &ConversionRequest) -> Result<ConversionBundle> {
        match request.direction {
            Direction::Deposit => {
                self.deposit(&request.user, &request.amount, request.bounds.as_ref())
                    .await
            }
            Direction::Withdraw => {
                self.withdraw(&request.user, &request.amount, request.bounds.as_ref())
                    .await
            }
        }
    }

    /// Build a deposit of `amount` reserve tokens from `user`.
    pub async fn deposit(
        &self,
        user: &Pubkey,
        amount: &DecimalAmount,
        bounds: Option<&AmountBounds>,
    ) -> Result<ConversionBundle> {
        let result = self.build_deposit(user, amount, bounds).await;
        log_outcome(Direction::Deposit, user, amount, &result);
        result
    }

    /// Build a withdrawal of `amount` pegged tokens by `user`.
    pub async fn withdraw(
        &self,
        user: &Pubkey,
        amount: &DecimalAmount,
        bounds: Option<&AmountBounds>,
    ) -> Result<ConversionBundle> {
        let result = self.build_withdraw(user, amount, bounds).await;
        log_outcome(Direction::Withdraw, user, amount, &result);
        result
    }

    async fn build_deposit(
        &self,
        user: &Pubkey,
        amount: &DecimalAmount,
        bounds: Option<&AmountBounds>,
    ) -> Result<ConversionBundle> {
        let reserve = self.config.reserve;
        let pegged = self.config.pegged;

        let bounds = bounds.or(self.config.deposit_bounds.as_ref());
        let reserve_atomic = checked_atomic(amount, reserve.decimals, bounds)?;
        let pegged_atomic = reserve_to_pegged(reserve_atomic, self.multiplier)?;
        self.ensure_outside_treasury(user)?;

        let _user = self.user_locks.lock(user).await;
        let payer = self.authority.keypair();
        let user_reserve = self.resolver.resolve(&reserve.mint, user, payer).await?;
        self.ensure_outside_treasury(&user_reserve)?;
        let user_pegged = self.resolver.resolve(&pegged.mint, user, payer).await?;

        let available = self.balance_or_zero(&user_reserve).await?;
        if available < reserve_atomic {
            return Err(TreasuryError::InsufficientBalance {
                account: user_reserve,
                required: reserve_atomic,
                available,
            });
        }

        let instructions = vec![
            build_transfer(
                self.config.transfer_mode,
                &user_reserve,
                &reserve.mint,
                self.vault.address(),
                user,
                reserve_atomic,
                reserve.decimals,
            )?,
            mint_to_checked(
                &pegged.mint,
                &user_pegged,
                &self.authority.pubkey(),
                pegged_atomic,
                pegged.decimals,
            )?,
        ];

        self.assemble(Direction::Deposit, user, instructions, reserve_atomic, pegged_atomic)
            .await
    }

    async fn build_withdraw(
        &self,
        user: &Pubkey,
        amount: &DecimalAmount,
        bounds: Option<&AmountBounds>,
    ) -> Result<ConversionBundle> {
        let reserve = self.config.reserve;
        let pegged = self.config.pegged;

        let bounds = bounds.or(self.config.withdraw_bounds.as_ref());
        let pegged_atomic = checked_atomic(amount, pegged.decimals, bounds)?;
        let reserve_atomic = pegged_to_reserve(pegged_atomic, self.multiplier).map_err(|_| {
            TreasuryError::InvalidAmount(format!(
                "{amount} is finer than the reserve token's {}-decimal precision",
                reserve.decimals
            ))
        })?;
        self.ensure_outside_treasury(user)?;

        let _user = self.user_locks.lock(user).await;

        // A user with no pegged account simply has nothing to burn.
        let user_pegged = AccountResolver::derive(&pegged.mint, user)?;
        let available = self.balance_or_zero(&user_pegged).await?;
        if available < pegged_atomic {
            return Err(TreasuryError::InsufficientBalance {
                account: user_pegged,
                required: pegged_atomic,
                available,
            });
        }

        let _gate = self.vault.lock().await;
        self.vault.ensure_covers(reserve_atomic).await?;

        let user_reserve = self
            .resolver
            .resolve(&reserve.mint, user, self.authority.keypair())
            .await?;
        self.ensure_outside_treasury(&user_reserve)?;

        let instructions = vec![
            burn_checked(&user_pegged, &pegged.mint, user, pegged_atomic, pegged.decimals)?,
            build_transfer(
                self.config.transfer_mode,
                self.vault.address(),
                &reserve.mint,
                &user_reserve,
                &self.authority.pubkey(),
                reserve_atomic,
                reserve.decimals,
            )?,
        ];

        self.assemble(Direction::Withdraw, user, instructions, reserve_atomic, pegged_atomic)
            .await
    }

    /// The treasury's own key and vault never act as the user side of a
    /// conversion: the treasury signature alone would complete the bundle.
    fn ensure_outside_treasury(&self, key: &Pubkey) -> Result<()> {
        if *key == self.authority.pubkey() || key == self.vault.address() {
            return Err(TreasuryError::TreasuryAccount(*key));
        }
        Ok(())
    }

    /// Compile `instructions` with `user` as fee payer and sign as treasury.
    async fn assemble(
        &self,
        direction: Direction,
        user: &Pubkey,
        instructions: Vec<SolInstruction>,
        reserve_atomic: u64,
        pegged_atomic: u64,
    ) -> Result<ConversionBundle> {
        let blockhash = timed(self.timeout, self.ledger.latest_blockhash()).await?;
        let mut bundle = TransactionBundle::new(instructions, user, &blockhash)?;
        self.authority.sign(&mut bundle)?;

        Ok(ConversionBundle {
            direction,
            user: *user,
            reserve_atomic,
            pegged_atomic,
            bundle,
            signers: vec![self.authority.pubkey()],
        })
    }

    // -- submission ----------------------------------------------------------

    /// Submit a fully signed conversion and wait for confirmation.
    ///
    /// Withdrawals re-read the vault under its gate right before submission
    /// and fail with `Undercollateralized` if the backing has gone since the
    /// bundle was built.
    pub async fn submit(&self, conversion: &ConversionBundle) -> Result<Receipt> {
        let missing = conversion.bundle.missing_signers();
        if !missing.is_empty() {
            return Err(TreasuryError::MissingSignatures(missing));
        }
        conversion.bundle.verify_signatures()?;

        let receipt = match conversion.direction {
            Direction::Deposit => {
                timed(self.timeout, self.ledger.submit_and_confirm(&conversion.bundle)).await?
            }
            Direction::Withdraw => {
                let _gate = self.vault.lock().await;
                self.vault.ensure_covers(conversion.reserve_atomic).await?;
                timed(self.timeout, self.ledger.submit_and_confirm(&conversion.bundle)).await?
            }
        };

        info!(
            direction = %conversion.direction,
            user = %conversion.user,
            reserve_atomic = conversion.reserve_atomic,
            pegged_atomic = conversion.pegged_atomic,
            signature = %receipt.signature,
            slot = receipt.slot,
            "conversion confirmed"
        );
        Ok(receipt)
    }

    // -- reads ---------------------------------------------------------------

    /// Vault balance in reserve atomic units.
    pub async fn reserve_balance(&self) -> Result<u64> {
        self.vault.balance().await
    }

    /// `user`'s balance of `mint` in atomic units; 0 if the account does not
    /// exist yet.
    pub async fn user_balance(&self, mint: &Pubkey, user: &Pubkey) -> Result<u64> {
        let account = AccountResolver::derive(mint, user)?;
        self.balance_or_zero(&account).await
    }

    pub async fn check_peg_invariant(&self) -> Result<bool> {
        self.checker.check_peg_invariant().await
    }

    pub async fn audit(&self) -> Result<PegReport> {
        self.checker.audit().await
    }

    async fn balance_or_zero(&self, account: &Pubkey) -> Result<u64> {
        match timed(self.timeout, self.ledger.token_balance(account)).await {
            Err(TreasuryError::Ledger(LedgerError::AccountNotFound(_))) => Ok(0),
            other => other,
        }
    }
}

/// Validate a requested amount and convert it to atomic units at
/// `decimals`. Runs before any ledger access.
fn checked_atomic(
    amount: &DecimalAmount,
    decimals: u8,
    bounds: Option<&AmountBounds>,
) -> Result<u64> {
    if !amount.is_positive() {
        return Err(TreasuryError::InvalidAmount(format!(
            "{amount} must be greater than zero"
        )));
    }
    let atomic = to_atomic(amount, decimals)?;

    if let Some(bounds) = bounds {
        let (min, max) = bounds.to_atomic(decimals)?;
        if atomic < min || atomic > max {
            return Err(TreasuryError::OutOfBounds {
                amount: atomic,
                min,
                max,
            });
        }
    }
    Ok(atomic)
}

fn log_outcome(
    direction: Direction,
    user: &Pubkey,
    amount: &DecimalAmount,
    result: &Result<ConversionBundle>,
) {
    match result {
        Ok(c) => info!(
            %direction,
            %user,
            %amount,
            reserve_atomic = c.reserve_atomic,
            pegged_atomic = c.pegged_atomic,
            "conversion built"
        ),
        Err(
            e @ (TreasuryError::InvalidAmount(_)
            | TreasuryError::OutOfBounds { .. }
            | TreasuryError::TreasuryAccount(_)
            | TreasuryError::InsufficientBalance { .. }),
        ) => debug!(%direction, %user, %amount, error = %e, "conversion rejected"),
        Err(e) => warn!(%direction, %user, %amount, error = %e, "conversion failed"),
    }
}
