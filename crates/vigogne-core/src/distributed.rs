//! Process-level coordination for multi-process training runs.
//!
//! Training processes are launched by an external launcher (one process per
//! device) that exports `WORLD_SIZE`, `RANK` and `LOCAL_RANK`. The only
//! coordination the driver needs is a single-writer barrier around
//! corpus-wide preprocessing: rank 0 does the work and publishes the cached
//! result, every other rank waits and then reads that same result.

use crate::{DeviceMap, Result, VigogneError};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

/// Default time non-main ranks wait for the main process.
pub const DEFAULT_BARRIER_TIMEOUT: Duration = Duration::from_secs(60 * 60);

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Position of this process within the training job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessContext {
    /// Global rank.
    pub rank: usize,
    /// Rank on the local node (selects the device).
    pub local_rank: usize,
    /// Total number of processes.
    pub world_size: usize,
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::single()
    }
}

impl ProcessContext {
    /// Context of a single-process run.
    pub fn single() -> Self {
        Self {
            rank: 0,
            local_rank: 0,
            world_size: 1,
        }
    }

    /// Read the context from the launcher's environment variables.
    pub fn from_env() -> Result<Self> {
        let world_size = env_usize("WORLD_SIZE")?.unwrap_or(1);
        let local_rank = env_usize("LOCAL_RANK")?.unwrap_or(0);
        let rank = env_usize("RANK")?.unwrap_or(local_rank);
        Self::new(rank, local_rank, world_size)
    }

    /// Build and validate a context.
    pub fn new(rank: usize, local_rank: usize, world_size: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(VigogneError::Distributed("WORLD_SIZE must be > 0".into()));
        }
        if rank >= world_size {
            return Err(VigogneError::Distributed(format!(
                "rank {rank} is out of bounds for world size {world_size}"
            )));
        }
        Ok(Self {
            rank,
            local_rank,
            world_size,
        })
    }

    /// Whether this is the process that performs shared work.
    #[must_use]
    pub fn is_main_process(&self) -> bool {
        self.rank == 0
    }

    /// Whether more than one process takes part in the run.
    #[must_use]
    pub fn is_distributed(&self) -> bool {
        self.world_size > 1
    }

    /// Device placement for the base model.
    ///
    /// Distributed runs pin the whole model to the local device; single
    /// process runs let the backend spread it.
    #[must_use]
    pub fn device_map(&self) -> DeviceMap {
        if self.is_distributed() {
            DeviceMap::Device(self.local_rank)
        } else {
            DeviceMap::Auto
        }
    }

    /// Log level for this process: full logs on rank 0, warnings elsewhere.
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        if self.is_main_process() {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| VigogneError::Distributed(format!("invalid {name}={value:?}: {e}"))),
        _ => Ok(None),
    }
}

/// Run `f` on the main process first, then on every other process.
///
/// `key` identifies the shared result (typically a cache fingerprint) so
/// markers left by an earlier run with the same inputs stay valid. Non-main
/// processes block until the main process has published its marker, then run
/// `f` themselves, which is expected to read the result the main process
/// cached. A failure on the main process is propagated to every rank.
pub fn main_process_first<T, F>(
    ctx: &ProcessContext,
    marker_dir: &Path,
    key: &str,
    timeout: Duration,
    f: F,
) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    if !ctx.is_distributed() {
        return f();
    }

    let done = marker_dir.join(format!("{key}.done"));
    let failed = marker_dir.join(format!("{key}.failed"));

    if ctx.is_main_process() {
        fs::create_dir_all(marker_dir)?;
        if failed.exists() {
            fs::remove_file(&failed)?;
        }
        tracing::info!(key, "Main process running shared preprocessing");
        return match f() {
            Ok(value) => {
                fs::write(&done, format!("rank={}\n", ctx.rank))?;
                Ok(value)
            }
            Err(e) => {
                fs::write(&failed, e.to_string())?;
                Err(e)
            }
        };
    }

    tracing::debug!(rank = ctx.rank, key, "Waiting for main process");
    let start = Instant::now();
    loop {
        if done.exists() {
            break;
        }
        if failed.exists() {
            let reason = fs::read_to_string(&failed).unwrap_or_default();
            return Err(VigogneError::Distributed(format!(
                "main process failed during shared preprocessing: {}",
                reason.trim()
            )));
        }
        if start.elapsed() >= timeout {
            return Err(VigogneError::Distributed(format!(
                "timed out after {:?} waiting for main process ({})",
                timeout,
                done.display()
            )));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    f()
}
