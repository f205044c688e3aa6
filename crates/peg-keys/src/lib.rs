//! # peg-keys
//!
//! The treasury's signing identity: an Ed25519 keypair with zeroize-on-drop
//! secret handling, and the durable keystore file it is loaded from.

pub mod error;
pub mod keypair;
pub mod keystore;

pub use error::KeyError;
pub use keypair::{Keypair, KEYPAIR_LENGTH};
pub use keystore::{load, load_or_create, persist_new};
