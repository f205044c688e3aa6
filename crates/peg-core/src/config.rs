//! # Treasury Configuration
//!
//! Token mints, precisions, conversion bounds and ledger timeouts. Nothing
//! about the tokens is hardcoded; a deployment supplies a JSON document and
//! [`TreasuryConfig::validate`] rejects combinations the peg cannot honor
//! before any ledger traffic happens.

use std::path::{Path, PathBuf};
use std::time::Duration;

use peg_sol::{Pubkey, TransferMode};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TreasuryError};
use crate::units::{precision_multiplier, to_atomic, DecimalAmount};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Reserve token precision in the reference deployment (a USDC-style token).
pub const REFERENCE_RESERVE_DECIMALS: u8 = 6;

/// Pegged token precision in the reference deployment.
pub const REFERENCE_PEGGED_DECIMALS: u8 = 9;

/// Where the treasury keypair lives unless configured otherwise.
pub const DEFAULT_KEYSTORE_PATH: &str = "keys/treasury.json";

/// Upper bound on any single ledger read or submission.
pub const DEFAULT_LEDGER_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A fungible token: mint address plus decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub mint: Pubkey,
    pub decimals: u8,
}

/// Inclusive decimal bounds on a single conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountBounds {
    #[serde(with = "decimal_text")]
    pub min: DecimalAmount,
    #[serde(with = "decimal_text")]
    pub max: DecimalAmount,
}

impl AmountBounds {
    pub fn new(min: DecimalAmount, max: DecimalAmount) -> Self {
        Self { min, max }
    }

    /// The bounds in atomic units at `decimals` precision.
    ///
    /// Fails with `InvalidAmount` if either end is negative, not exact at
    /// that precision, or if `min > max`.
    pub fn to_atomic(&self, decimals: u8) -> Result<(u64, u64)> {
        let min = to_atomic(&self.min, decimals)?;
        let max = to_atomic(&self.max, decimals)?;
        if min > max {
            return Err(TreasuryError::InvalidAmount(format!(
                "bounds minimum {} exceeds maximum {}",
                self.min, self.max
            )));
        }
        Ok((min, max))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreasuryConfig {
    /// The collateral token held by the reserve vault.
    pub reserve: TokenConfig,
    /// The synthetic token minted against the reserve.
    pub pegged: TokenConfig,
    #[serde(default = "default_keystore_path")]
    pub keystore_path: PathBuf,
    #[serde(default = "default_ledger_timeout_ms")]
    pub ledger_timeout_ms: u64,
    /// Default bounds for deposits, in reserve-token units.
    #[serde(default)]
    pub deposit_bounds: Option<AmountBounds>,
    /// Default bounds for withdrawals, in pegged-token units.
    #[serde(default)]
    pub withdraw_bounds: Option<AmountBounds>,
    #[serde(default)]
    pub transfer_mode: TransferMode,
}

fn default_keystore_path() -> PathBuf {
    PathBuf::from(DEFAULT_KEYSTORE_PATH)
}

fn default_ledger_timeout_ms() -> u64 {
    DEFAULT_LEDGER_TIMEOUT.as_millis() as u64
}

impl TreasuryConfig {
    /// Config with default keystore, timeout and no bounds.
    pub fn new(reserve: TokenConfig, pegged: TokenConfig) -> Self {
        Self {
            reserve,
            pegged,
            keystore_path: default_keystore_path(),
            ledger_timeout_ms: default_ledger_timeout_ms(),
            deposit_bounds: None,
            withdraw_bounds: None,
            transfer_mode: TransferMode::default(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TreasuryError::Config(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| TreasuryError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Check that the configuration can uphold the peg.
    pub fn validate(&self) -> Result<()> {
        if self.reserve.mint == self.pegged.mint {
            return Err(TreasuryError::Config(
                "reserve and pegged mints must differ".into(),
            ));
        }
        if self.ledger_timeout_ms == 0 {
            return Err(TreasuryError::Config("ledger timeout must be > 0".into()));
        }

        precision_multiplier(self.reserve.decimals, self.pegged.decimals)?;

        if let Some(bounds) = &self.deposit_bounds {
            bounds.to_atomic(self.reserve.decimals)?;
        }
        if let Some(bounds) = &self.withdraw_bounds {
            // Withdrawals pay out reserve, so bounds must be exact there too.
            bounds.to_atomic(self.reserve.decimals)?;
        }
        Ok(())
    }

    /// Pegged atomic units per reserve atomic unit.
    pub fn multiplier(&self) -> Result<u64> {
        precision_multiplier(self.reserve.decimals, self.pegged.decimals)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }
}

mod decimal_text {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::units::DecimalAmount;

    pub fn serialize<S: Serializer>(value: &DecimalAmount, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DecimalAmount, D::Error> {
        let text = String::deserialize(d)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
