//! In-memory ledger for tests and local simulation.
//!
//! Executes the token and associated-token-account instructions the
//! treasury emits, with the same all-or-nothing bundle semantics and
//! signer checks as the real programs. Fault injection (unavailability,
//! latency) exercises the timeout and error paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use peg_sol::{
    derive_associated_token_address, Blockhash, Pubkey, SolInstruction, TokenInstruction,
    TransactionBundle, ASSOCIATED_TOKEN_PROGRAM_ID, TOKEN_PROGRAM_ID,
};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::client::{LedgerClient, LedgerError, Receipt};

/// How many recent blockhashes stay valid for submission.
const RECENT_BLOCKHASH_WINDOW: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintAccount {
    pub decimals: u8,
    pub supply: u64,
    pub mint_authority: Option<Pubkey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAccount {
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    mints: HashMap<Pubkey, MintAccount>,
    accounts: HashMap<Pubkey, TokenAccount>,
    slot: u64,
    blockhash_seq: u64,
    recent_blockhashes: VecDeque<Blockhash>,
    processed: HashSet<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    unavailable: bool,
    latency: Duration,
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    faults: Mutex<Faults>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // -- setup ---------------------------------------------------------------

    /// Register a mint with zero supply.
    pub fn create_mint(&self, mint: Pubkey, decimals: u8, mint_authority: Option<Pubkey>) {
        self.state.lock().mints.insert(
            mint,
            MintAccount {
                decimals,
                supply: 0,
                mint_authority,
            },
        );
    }

    /// Issue `amount` of `mint` into `owner`'s associated account, creating
    /// it if needed, without any authority check. Models tokens arriving
    /// from outside the treasury, including mints the peg never saw.
    pub fn issue(&self, mint: &Pubkey, owner: &Pubkey, amount: u64) -> Result<Pubkey, LedgerError> {
        let address = derive_associated_token_address(owner, mint)
            .map_err(|e| LedgerError::Rejected(e.to_string()))?;

        let mut state = self.state.lock();
        let mint_state = state
            .mints
            .get_mut(mint)
            .ok_or(LedgerError::AccountNotFound(*mint))?;
        mint_state.supply = mint_state
            .supply
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Rejected("supply overflow".into()))?;

        let account = state.accounts.entry(address).or_insert(TokenAccount {
            mint: *mint,
            owner: *owner,
            amount: 0,
        });
        account.amount += amount;
        Ok(address)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.lock().unavailable = unavailable;
    }

    /// Delay every call by `latency` before it is served.
    pub fn set_latency(&self, latency: Duration) {
        self.faults.lock().latency = latency;
    }

    // -- inspection ----------------------------------------------------------

    pub fn token_account(&self, address: &Pubkey) -> Option<TokenAccount> {
        self.state.lock().accounts.get(address).copied()
    }

    pub fn mint(&self, mint: &Pubkey) -> Option<MintAccount> {
        self.state.lock().mints.get(mint).copied()
    }

    /// Number of bundles confirmed so far.
    pub fn confirmed_count(&self) -> u64 {
        self.state.lock().slot
    }

    async fn preflight(&self) -> Result<(), LedgerError> {
        let faults = *self.faults.lock();
        if !faults.latency.is_zero() {
            tokio::time::sleep(faults.latency).await;
        }
        if faults.unavailable {
            return Err(LedgerError::Unavailable("memory ledger is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn token_balance(&self, account: &Pubkey) -> Result<u64, LedgerError> {
        self.preflight().await?;
        self.state
            .lock()
            .accounts
            .get(account)
            .map(|a| a.amount)
            .ok_or(LedgerError::AccountNotFound(*account))
    }

    async fn account_exists(&self, address: &Pubkey) -> Result<bool, LedgerError> {
        self.preflight().await?;
        let state = self.state.lock();
        Ok(state.accounts.contains_key(address) || state.mints.contains_key(address))
    }

    async fn token_supply(&self, mint: &Pubkey) -> Result<u64, LedgerError> {
        self.preflight().await?;
        self.state
            .lock()
            .mints
            .get(mint)
            .map(|m| m.supply)
            .ok_or(LedgerError::AccountNotFound(*mint))
    }

    async fn latest_blockhash(&self) -> Result<Blockhash, LedgerError> {
        self.preflight().await?;
        let mut state = self.state.lock();
        state.blockhash_seq += 1;

        let mut hasher = Sha256::new();
        hasher.update(b"memory-ledger-blockhash");
        hasher.update(state.blockhash_seq.to_le_bytes());
        let hash = Blockhash(hasher.finalize().into());

        state.recent_blockhashes.push_back(hash);
        if state.recent_blockhashes.len() > RECENT_BLOCKHASH_WINDOW {
            state.recent_blockhashes.pop_front();
        }
        Ok(hash)
    }

    async fn submit_and_confirm(&self, bundle: &TransactionBundle) -> Result<Receipt, LedgerError> {
        self.preflight().await?;
        bundle
            .verify_signatures()
            .map_err(|e| LedgerError::Rejected(e.to_string()))?;
        let signature = bundle
            .id()
            .ok_or_else(|| LedgerError::Rejected("bundle has no signatures".into()))?;

        let mut state = self.state.lock();
        if !state.recent_blockhashes.contains(bundle.recent_blockhash()) {
            return Err(LedgerError::Rejected("blockhash not found".into()));
        }
        if state.processed.contains(&signature) {
            return Err(LedgerError::Rejected("already processed".into()));
        }

        let signers: HashSet<Pubkey> = bundle.signer_keys().iter().copied().collect();
        let mut next = state.clone();
        for (i, ix) in bundle.instructions().iter().enumerate() {
            execute(&mut next, ix, &signers)
                .map_err(|msg| LedgerError::Rejected(format!("instruction {i}: {msg}")))?;
        }

        next.slot += 1;
        next.processed.insert(signature.clone());
        let slot = next.slot;
        *state = next;

        debug!(%signature, slot, instructions = bundle.instructions().len(), "bundle confirmed");
        Ok(Receipt { signature, slot })
    }
}

// ---------------------------------------------------------------------------
// Instruction execution
// ---------------------------------------------------------------------------

fn execute(
    state: &mut LedgerState,
    ix: &SolInstruction,
    signers: &HashSet<Pubkey>,
) -> Result<(), String> {
    trace!(program = %ix.program_id, "executing instruction");
    let account = |i: usize| -> Result<Pubkey, String> {
        ix.accounts
            .get(i)
            .map(|m| m.pubkey)
            .ok_or_else(|| format!("missing account #{i}"))
    };
    let require_signer = |key: &Pubkey| -> Result<(), String> {
        if signers.contains(key) {
            Ok(())
        } else {
            Err(format!("{key} did not sign"))
        }
    };

    if ix.program_id == ASSOCIATED_TOKEN_PROGRAM_ID {
        if ix.data != [peg_sol::spl_token::ATA_CREATE_IDEMPOTENT_TAG] {
            return Err("unsupported associated token instruction".into());
        }
        let (payer, address, owner, mint) = (account(0)?, account(1)?, account(2)?, account(3)?);
        require_signer(&payer)?;
        if !state.mints.contains_key(&mint) {
            return Err(format!("mint {mint} does not exist"));
        }
        let expected = derive_associated_token_address(&owner, &mint).map_err(|e| e.to_string())?;
        if expected != address {
            return Err(format!("{address} is not the associated account of {owner}"));
        }
        return match state.accounts.get(&address) {
            Some(existing) if existing.owner == owner && existing.mint == mint => Ok(()),
            Some(_) => Err(format!("{address} exists with a different owner or mint")),
            None => {
                state.accounts.insert(
                    address,
                    TokenAccount {
                        mint,
                        owner,
                        amount: 0,
                    },
                );
                Ok(())
            }
        };
    }

    if ix.program_id != TOKEN_PROGRAM_ID {
        return Err(format!("unsupported program {}", ix.program_id));
    }

    let check_mint = |state: &LedgerState, mint: &Pubkey, decimals: u8| -> Result<(), String> {
        let m = state
            .mints
            .get(mint)
            .ok_or_else(|| format!("mint {mint} does not exist"))?;
        if m.decimals != decimals {
            return Err(format!("mint {mint} has {} decimals, got {decimals}", m.decimals));
        }
        Ok(())
    };
    let token_account = |state: &LedgerState, address: &Pubkey, mint: &Pubkey| -> Result<TokenAccount, String> {
        let a = state
            .accounts
            .get(address)
            .copied()
            .ok_or_else(|| format!("token account {address} does not exist"))?;
        if a.mint != *mint {
            return Err(format!("{address} holds a different mint"));
        }
        Ok(a)
    };

    match TokenInstruction::unpack(&ix.data).map_err(|e| e.to_string())? {
        TokenInstruction::TransferChecked { amount, decimals } => {
            let (source, mint, destination, authority) =
                (account(0)?, account(1)?, account(2)?, account(3)?);
            check_mint(state, &mint, decimals)?;
            let from = token_account(state, &source, &mint)?;
            token_account(state, &destination, &mint)?;
            if from.owner != authority {
                return Err(format!("{authority} does not own {source}"));
            }
            require_signer(&authority)?;
            if from.amount < amount {
                return Err("insufficient funds".into());
            }
            if let Some(a) = state.accounts.get_mut(&source) {
                a.amount -= amount;
            }
            if let Some(a) = state.accounts.get_mut(&destination) {
                a.amount = a.amount.checked_add(amount).ok_or("balance overflow")?;
            }
        }
        TokenInstruction::MintToChecked { amount, decimals } => {
            let (mint, destination, authority) = (account(0)?, account(1)?, account(2)?);
            check_mint(state, &mint, decimals)?;
            token_account(state, &destination, &mint)?;
            let m = state
                .mints
                .get_mut(&mint)
                .ok_or_else(|| format!("mint {mint} does not exist"))?;
            if m.mint_authority != Some(authority) {
                return Err(format!("{authority} is not the mint authority"));
            }
            require_signer(&authority)?;
            m.supply = m.supply.checked_add(amount).ok_or("supply overflow")?;
            if let Some(a) = state.accounts.get_mut(&destination) {
                a.amount = a.amount.checked_add(amount).ok_or("balance overflow")?;
            }
        }
        TokenInstruction::BurnChecked { amount, decimals } => {
            let (source, mint, owner) = (account(0)?, account(1)?, account(2)?);
            check_mint(state, &mint, decimals)?;
            let from = token_account(state, &source, &mint)?;
            if from.owner != owner {
                return Err(format!("{owner} does not own {source}"));
            }
            require_signer(&owner)?;
            if from.amount < amount {
                return Err("insufficient funds".into());
            }
            if let Some(a) = state.accounts.get_mut(&source) {
                a.amount -= amount;
            }
            if let Some(m) = state.mints.get_mut(&mint) {
                m.supply -= amount;
            }
        }
    }
    Ok(())
}
