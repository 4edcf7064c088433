//! Roll command implementation.

use msglog_core::{LogStorage, PidLock, StorageConfig};
use std::path::Path;
use tracing::info;

/// Closes every active segment of an idle log directory.
///
/// A running collector holds the directory lock; send it SIGHUP instead.
pub fn run(logdir: &Path, clear_stale_lock: bool) -> Result<(), Box<dyn std::error::Error>> {
    if clear_stale_lock && PidLock::clear_stale(logdir)? {
        info!(logdir = %logdir.display(), "cleared stale lock");
    }

    let config = StorageConfig::new(logdir).with_create_if_missing(false);
    let mut storage = LogStorage::open(config)?;
    storage.roll()?;
    println!("Rolled {}", logdir.display());
    Ok(())
}
