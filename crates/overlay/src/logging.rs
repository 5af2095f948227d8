//! File-backed tracing setup.
//!
//! The host process has no console, so logs go to a plain file the embedder
//! chooses (typically next to the host's other plugin logs).

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;

/// Initialize the global tracing subscriber writing to `path`, truncating
/// any previous run's log. Errors if a subscriber is already set.
pub fn init_file_logging(path: &Path) -> anyhow::Result<()> {
    let file = File::create(path)?;
    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(LevelFilter::DEBUG)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to set tracing subscriber: {err}"))?;
    Ok(())
}
