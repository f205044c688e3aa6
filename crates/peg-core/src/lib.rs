//! Client-side core of a reserve-backed pegged token treasury.
//!
//! Users deposit a reserve token and receive a pegged token one-for-one in
//! value; withdrawing burns the pegged token and pays reserve out of the
//! treasury's vault. The two tokens may differ in precision, so every amount
//! is converted exactly (see [`units`]) and the treasury checks that pegged
//! supply always equals the vault balance scaled by the precision gap
//! ([`invariant`]).
//!
//! The engine only builds and optionally submits bundles; executing them is
//! the ledger's job, reached through [`client::LedgerClient`].

pub mod authority;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod invariant;
pub mod logging;
pub mod memory;
pub mod resolver;
pub mod units;
pub mod vault;

pub use authority::TreasuryAuthority;
pub use client::{LedgerClient, LedgerError, Receipt};
pub use config::{AmountBounds, TokenConfig, TreasuryConfig};
pub use engine::{ConversionBundle, ConversionEngine, ConversionRequest, Direction};
pub use error::{Result, TreasuryError};
pub use invariant::{InvariantChecker, PegReport};
pub use logging::{init_logging, LogFormat};
pub use memory::MemoryLedger;
pub use resolver::AccountResolver;
pub use units::DecimalAmount;
pub use vault::ReserveVault;
