//! Durable storage for the treasury credential.
//!
//! The keystore is a JSON array of the 64 keypair bytes (`seed || pubkey`),
//! the same layout the Solana CLI writes, so an existing CLI-generated
//! keypair file can be used as-is.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::KeyError;
use crate::keypair::Keypair;

/// Load the keypair at `path`, or generate and persist one if the file does
/// not exist.
///
/// An existing file is never overwritten. If another process creates the
/// file between our lookup and our write, its keypair wins and is loaded.
pub fn load_or_create(path: impl AsRef<Path>) -> Result<Keypair, KeyError> {
    let path = path.as_ref();

    match load(path) {
        Ok(keypair) => {
            info!(path = %path.display(), pubkey = %keypair.pubkey(), "loaded keypair");
            return Ok(keypair);
        }
        Err(KeyError::Io { ref source, .. }) if source.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let keypair = Keypair::generate();
    match persist_new(path, &keypair) {
        Ok(()) => {
            info!(path = %path.display(), pubkey = %keypair.pubkey(), "generated new keypair");
            Ok(keypair)
        }
        Err(KeyError::Io { ref source, .. }) if source.kind() == ErrorKind::AlreadyExists => {
            warn!(path = %path.display(), "keystore appeared concurrently, loading it");
            load(path)
        }
        Err(e) => Err(e),
    }
}

/// Read and parse the keypair at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<Keypair, KeyError> {
    let path = path.as_ref();
    let text = Zeroizing::new(fs::read_to_string(path).map_err(|e| KeyError::io(path, e))?);

    let bytes: Vec<u8> = serde_json::from_str(&text)
        .map_err(|e| KeyError::Parse(format!("{}: {e}", path.display())))?;
    let bytes = Zeroizing::new(bytes);

    Keypair::from_keypair_bytes(&bytes)
}

/// Write `keypair` to a file that must not already exist.
///
/// Parent directories are created as needed. On Unix the file is readable
/// by its owner only.
pub fn persist_new(path: impl AsRef<Path>, keypair: &Keypair) -> Result<(), KeyError> {
    let path = path.as_ref();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| KeyError::io(parent, e))?;
    }

    let bytes = keypair.to_keypair_bytes();
    let json = Zeroizing::new(
        serde_json::to_string(&bytes[..]).map_err(|e| KeyError::Parse(e.to_string()))?,
    );

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(|e| KeyError::io(path, e))?;
    let written = file
        .write_all(json.as_bytes())
        .and_then(|()| file.sync_all());

    if let Err(e) = written {
        // A half-written keystore would fail every later load.
        let _ = fs::remove_file(path);
        return Err(KeyError::io(path, e));
    }
    Ok(())
}
