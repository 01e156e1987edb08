//! The extraction engine: miners, a bound stream and the worker pool that
//! runs one over the other.
pub(crate) mod scheduler;

use crate::error::{ByteminerError, ErrorKind, Result as ByteminerResult};
use crate::metrics::Metrics;
use crate::occurrence::{drop_enclosed, sort_candidates, Batch};
use crate::plugin_system::{ListedMiner, LoadedMiner, MinerLibrary, PluginRegistry};
use crate::stream::{SharedStream, Stream, StreamStatus};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::sync::{Arc, Weak};

pub const DEFAULT_SLICE_SIZE: usize = 64 * 1024;
pub const DEFAULT_MAX_SPAN: usize = 4 * 1024;

/// Extraction behaviour toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtractFlags(u32);

impl ExtractFlags {
    pub const NONE: ExtractFlags = ExtractFlags(0);
    /// Drop occurrences whose span lies inside a strictly larger one
    pub const NO_ENCLOSED_OCCURRENCES: ExtractFlags = ExtractFlags(1);

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Unknown bits are discarded
    pub fn from_bits(bits: u32) -> Self {
        ExtractFlags(bits & Self::NO_ENCLOSED_OCCURRENCES.0)
    }

    pub fn contains(self, other: ExtractFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ExtractFlags {
    type Output = ExtractFlags;

    fn bitor(self, rhs: ExtractFlags) -> ExtractFlags {
        ExtractFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub threads: usize,
    pub slice_size: usize,
    /// Furthest a match may run past the end of its slice
    pub max_span: usize,
    pub flags: ExtractFlags,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            slice_size: DEFAULT_SLICE_SIZE,
            max_span: DEFAULT_MAX_SPAN,
            flags: ExtractFlags::NONE,
        }
    }
}

impl EngineConfig {
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads,
            ..Self::default()
        }
    }

    /// Bytes one round buffers ahead of the cursor, `None` on overflow
    pub fn round_bytes(&self) -> Option<usize> {
        self.threads
            .checked_mul(self.slice_size)?
            .checked_add(self.max_span)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No live stream bound
    Created,
    Streaming,
    Drained,
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Created => write!(f, "created"),
            EngineState::Streaming => write!(f, "streaming"),
            EngineState::Drained => write!(f, "drained"),
            EngineState::Failed => write!(f, "failed"),
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    // Declared before `registry` so miners drop first.
    miners: Vec<LoadedMiner>,
    registry: PluginRegistry,
    stream: Option<Weak<Mutex<Stream>>>,
    last_error: Option<(ErrorKind, String)>,
    horizon: u64,
    metrics: Arc<Metrics>,
    pool: ThreadPool,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("miners", &self.miners)
            .field("state", &self.state())
            .finish()
    }
}

impl Engine {
    /// Engine with `threads` workers and default slicing
    pub fn new(threads: usize) -> ByteminerResult<Self> {
        Self::with_config(EngineConfig::with_threads(threads))
    }

    pub fn with_config(config: EngineConfig) -> ByteminerResult<Self> {
        if config.threads == 0 {
            return Err(ByteminerError::Argument(
                "thread count must be at least 1".to_string(),
            ));
        }
        if config.slice_size == 0 {
            return Err(ByteminerError::Argument(
                "slice size must be at least 1 byte".to_string(),
            ));
        }
        if config.round_bytes().is_none() {
            return Err(ByteminerError::Argument(format!(
                "{} workers with {} byte slices and a {} byte max span overflow the read window",
                config.threads, config.slice_size, config.max_span
            )));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("byteminer-worker-{i}"))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to start worker pool: {e}"))?;

        debug!(
            "Engine started with {} workers, {} byte slices, {} byte max span",
            config.threads, config.slice_size, config.max_span
        );

        Ok(Self {
            config,
            miners: Vec::new(),
            registry: PluginRegistry::new(),
            stream: None,
            last_error: None,
            horizon: 0,
            metrics: Arc::new(Metrics::new()),
            pool,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn threads(&self) -> usize {
        self.config.threads
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    fn record_error(&mut self, err: ByteminerError) {
        debug!("Engine error: {}", err);
        self.last_error = Some((err.kind(), err.to_string()));
    }

    /// Most recent failure, empty if none
    pub fn last_error(&self) -> &str {
        self.last_error
            .as_ref()
            .map(|(_, message)| message.as_str())
            .unwrap_or("")
    }

    pub fn last_error_kind(&self) -> Option<ErrorKind> {
        self.last_error.as_ref().map(|(kind, _)| *kind)
    }

    /// Make an in-process library loadable by its pseudo path
    pub fn provide_library(&mut self, library: Arc<dyn MinerLibrary>) {
        self.registry.provide(library);
    }

    /// Load `symbol` from `path` and append it to the miner list
    pub fn add_miner(&mut self, path: &str, symbol: &str, config: &str) -> bool {
        match self.registry.load(path, symbol, config) {
            Ok(miner) => {
                self.miners.push(miner);
                true
            }
            Err(e) => {
                warn!("Cannot add miner {}::{}: {}", path, symbol, e);
                self.record_error(e);
                false
            }
        }
    }

    pub fn miners(&self) -> &[LoadedMiner] {
        &self.miners
    }

    pub fn loaded_miners(&self) -> Vec<ListedMiner> {
        self.registry.list()
    }

    pub fn introspect(&self, path: &str) -> ByteminerResult<Vec<ListedMiner>> {
        self.registry.introspect(path)
    }

    /// Label to (path, miner, label); later libraries win on duplicate labels
    pub fn meta_by_label(&self) -> HashMap<String, ListedMiner> {
        self.loaded_miners()
            .into_iter()
            .map(|listed| (listed.label.clone(), listed))
            .collect()
    }

    pub fn flags(&self) -> ExtractFlags {
        self.config.flags
    }

    pub fn set_flags(&mut self, flags: ExtractFlags) -> ExtractFlags {
        self.config.flags = self.config.flags | flags;
        self.config.flags
    }

    pub fn unset_flags(&mut self, flags: ExtractFlags) -> ExtractFlags {
        self.config.flags = ExtractFlags(self.config.flags.0 & !flags.0);
        self.config.flags
    }

    /// The bound stream, if its owner still holds it
    pub fn bound_stream(&self) -> Option<SharedStream> {
        self.stream.as_ref().and_then(Weak::upgrade)
    }

    pub fn bind_stream(&mut self, stream: &SharedStream) -> bool {
        if self.bound_stream().is_some() {
            self.record_error(ByteminerError::Argument(
                "a stream is already bound; unbind it first".to_string(),
            ));
            return false;
        }

        {
            let guard = stream.lock();
            if guard.status() == StreamStatus::Failed {
                warn!("Binding failed stream {}", guard.origin());
            } else {
                info!(
                    "Bound stream {} at offset {}",
                    guard.origin(),
                    guard.position()
                );
            }
        }
        self.stream = Some(Arc::downgrade(stream));
        self.horizon = 0;
        true
    }

    pub fn unbind_stream(&mut self) {
        if self.stream.take().is_some() {
            debug!("Stream unbound");
        }
    }

    fn stream_status(&self) -> Option<StreamStatus> {
        let stream = self.bound_stream()?;
        let status = stream.lock().status();
        Some(status)
    }

    pub fn is_at_end(&self) -> bool {
        self.stream_status() == Some(StreamStatus::EndOfInput)
    }

    pub fn state(&self) -> EngineState {
        match self.stream_status() {
            None => EngineState::Created,
            Some(StreamStatus::Ok) => EngineState::Streaming,
            Some(StreamStatus::EndOfInput) => EngineState::Drained,
            Some(StreamStatus::Failed) => EngineState::Failed,
        }
    }

    /// Mine forward until at least `batch_size` occurrences are collected or
    /// the stream ends.
    ///
    /// Occurrences are ordered by position, ties by miner registration. The
    /// batch may exceed `batch_size` by the occurrences of one slice.
    pub fn next(&mut self, batch_size: usize) -> Batch {
        if batch_size == 0 {
            self.record_error(ByteminerError::Argument(
                "batch size must be at least 1".to_string(),
            ));
            return Batch::new();
        }
        let Some(shared) = self.bound_stream() else {
            return Batch::new();
        };
        let mut stream = shared.lock();

        match stream.status() {
            StreamStatus::EndOfInput => return Batch::new(),
            StreamStatus::Failed => {
                let reason = stream.failure().unwrap_or("unknown failure").to_string();
                self.record_error(ByteminerError::StreamFailed(reason));
                return Batch::new();
            }
            StreamStatus::Ok => {}
        }

        let threads = self.config.threads;
        let slice_size = self.config.slice_size;
        let max_span = self.config.max_span;
        let want = threads.saturating_mul(slice_size).saturating_add(max_span);
        let no_enclosed = self.config.flags.contains(ExtractFlags::NO_ENCLOSED_OCCURRENCES);

        let mut batch = Batch::new();
        'rounds: while stream.status() == StreamStatus::Ok {
            stream.fill(want);
            if stream.status() == StreamStatus::Failed {
                let reason = stream.failure().unwrap_or("read error").to_string();
                self.record_error(ByteminerError::StreamFailed(reason));
                break;
            }

            let window = stream.window();
            let input_ends = stream.source_exhausted() && window.len() <= want;
            let available = window.len().min(want);
            let plans =
                scheduler::plan_round(available, input_ends, threads, slice_size, max_span);
            if plans.is_empty() {
                break;
            }
            debug!(
                "Round at offset {}: {} slice(s) over {} bytes{}",
                stream.position(),
                plans.len(),
                available,
                if input_ends { " (end of input)" } else { "" }
            );

            let outcomes = scheduler::run_round(
                &self.pool,
                &self.miners,
                &window[..available],
                stream.position(),
                stream.previous_byte(),
                &plans,
                &self.metrics,
            );

            for (plan, outcome) in plans.iter().zip(outcomes) {
                let mut candidates = match outcome {
                    Ok(candidates) => candidates,
                    Err(e) => {
                        stream.fail(e.to_string());
                        self.record_error(e);
                        break 'rounds;
                    }
                };

                if no_enclosed {
                    candidates = drop_enclosed(candidates, &mut self.horizon);
                } else {
                    sort_candidates(&mut candidates);
                    for candidate in &candidates {
                        self.horizon = self.horizon.max(candidate.occurrence.end());
                    }
                }
                batch.extend(candidates.into_iter().map(|c| c.occurrence));

                stream.consume(plan.scan_len);
                self.metrics.bytes_scanned.inc_by(plan.scan_len as u64);

                if batch.len() >= batch_size {
                    break 'rounds;
                }
            }
        }

        self.metrics.occurrences_emitted.inc_by(batch.len() as u64);
        debug!(
            "Batch of {} occurrence(s), cursor at {} ({})",
            batch.len(),
            stream.position(),
            stream.status()
        );
        batch
    }
}
