//! High-level extraction over one engine and one stream at a time
use crate::engine::{Engine, EngineConfig, ExtractFlags};
use crate::error::{ByteminerError, Result as ByteminerResult};
use crate::metrics::Metrics;
use crate::occurrence::Batch;
use crate::plugin_system::{ListedMiner, MinerLibrary};
use crate::stream::{SharedStream, Stream, StreamStatus};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// A miner to load: `<library>::<symbol>[=<config>]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerSpec {
    pub library: String,
    pub symbol: String,
    #[serde(default)]
    pub config: String,
}

impl MinerSpec {
    pub fn new(library: impl Into<String>, symbol: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            symbol: symbol.into(),
            config: config.into(),
        }
    }
}

impl FromStr for MinerSpec {
    type Err = ByteminerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ByteminerError::Argument(format!(
                "invalid miner '{s}', expected LIBRARY::SYMBOL[=CONFIG]"
            ))
        };
        let (head, config) = match s.split_once('=') {
            Some((head, config)) => (head, config),
            None => (s, ""),
        };
        let (library, symbol) = head.rsplit_once("::").ok_or_else(invalid)?;
        if library.is_empty() || symbol.is_empty() {
            return Err(invalid());
        }
        Ok(MinerSpec::new(library, symbol, config))
    }
}

impl fmt::Display for MinerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.library, self.symbol)?;
        if !self.config.is_empty() {
            write!(f, "={}", self.config)?;
        }
        Ok(())
    }
}

pub struct Extractor {
    engine: Engine,
    batch: usize,
    specs: Vec<MinerSpec>,
    // Streams opened by `open` are kept alive here; the engine only holds a weak reference.
    owned: Option<SharedStream>,
}

impl Extractor {
    /// `threads == None` uses every CPU. Miners that fail to load are skipped.
    pub fn new(miners: &[MinerSpec], batch: usize, threads: Option<usize>) -> ByteminerResult<Self> {
        let config = EngineConfig {
            threads: threads.unwrap_or_else(num_cpus::get),
            ..EngineConfig::default()
        };
        Self::with_config(config, batch, &[], miners)
    }

    pub fn with_config(
        config: EngineConfig,
        batch: usize,
        libraries: &[Arc<dyn MinerLibrary>],
        miners: &[MinerSpec],
    ) -> ByteminerResult<Self> {
        if batch == 0 {
            return Err(ByteminerError::Argument(
                "batch size must be at least 1".to_string(),
            ));
        }
        let mut engine = Engine::with_config(config)?;
        for library in libraries {
            engine.provide_library(library.clone());
        }

        let mut extractor = Self {
            engine,
            batch,
            specs: Vec::new(),
            owned: None,
        };
        for spec in miners {
            extractor.add_miner(spec);
        }
        Ok(extractor)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.engine.metrics()
    }

    pub fn provide_library(&mut self, library: Arc<dyn MinerLibrary>) {
        self.engine.provide_library(library);
    }

    pub fn add_miner(&mut self, spec: &MinerSpec) -> bool {
        if self.engine.add_miner(&spec.library, &spec.symbol, &spec.config) {
            self.specs.push(spec.clone());
            true
        } else {
            warn!("Skipping miner {}: {}", spec, self.engine.last_error());
            false
        }
    }

    /// Miners that loaded successfully, in registration order
    pub fn miners(&self) -> &[MinerSpec] {
        &self.specs
    }

    /// Open `path` and mine it next. Any previous stream is released.
    pub fn open(&mut self, path: impl AsRef<Path>) -> ByteminerResult<()> {
        let path = path.as_ref();
        let stream = Stream::open_file(path);
        if let Some(reason) = stream.failure() {
            return Err(ByteminerError::StreamOpen {
                path: path.to_path_buf(),
                reason: reason.to_string(),
            });
        }
        let shared = stream.into_shared();
        self.set_stream(&shared)?;
        self.owned = Some(shared);
        info!("Extracting from {}", path.display());
        Ok(())
    }

    pub fn close(&mut self) {
        self.unset_stream();
    }

    /// Mine a stream owned by the caller
    pub fn set_stream(&mut self, stream: &SharedStream) -> ByteminerResult<()> {
        self.unset_stream();
        if self.engine.bind_stream(stream) {
            Ok(())
        } else {
            Err(ByteminerError::Argument(self.engine.last_error().to_string()))
        }
    }

    pub fn unset_stream(&mut self) {
        self.engine.unbind_stream();
        self.owned = None;
    }

    fn current_stream(&self) -> ByteminerResult<SharedStream> {
        self.engine
            .bound_stream()
            .ok_or_else(|| ByteminerError::Argument("no stream set".to_string()))
    }

    pub fn eof(&self) -> ByteminerResult<bool> {
        let stream = self.current_stream()?;
        let at_end = stream.lock().status() == StreamStatus::EndOfInput;
        Ok(at_end)
    }

    pub fn next(&mut self) -> ByteminerResult<Batch> {
        self.next_with(self.batch)
    }

    /// Occurrences merged before a miner fault are still returned; the
    /// failure is then reported by the following call.
    pub fn next_with(&mut self, batch: usize) -> ByteminerResult<Batch> {
        let stream = self.current_stream()?;
        let occurrences = self.engine.next(batch);

        let guard = stream.lock();
        let failure = (guard.status() == StreamStatus::Failed)
            .then(|| guard.failure().unwrap_or("unknown failure").to_string());
        drop(guard);

        if let Some(reason) = failure {
            if occurrences.is_empty() {
                return Err(ByteminerError::StreamFailed(reason));
            }
            warn!(
                "Stream failed after {} occurrence(s): {}",
                occurrences.len(),
                reason
            );
            return Ok(occurrences);
        }

        if batch == 0 {
            return Err(ByteminerError::Argument(self.engine.last_error().to_string()));
        }
        Ok(occurrences)
    }

    /// Fold every remaining batch until end of input
    pub fn reduce<T, F>(&mut self, init: T, mut f: F) -> ByteminerResult<T>
    where
        F: FnMut(T, Batch) -> T,
    {
        let mut acc = init;
        for batch in self.batches() {
            acc = f(acc, batch?);
        }
        Ok(acc)
    }

    /// Iterator over the remaining batches of the current stream
    pub fn batches(&mut self) -> Batches<'_> {
        Batches {
            extractor: self,
            done: false,
        }
    }

    /// Label to (path, miner, label) for every loaded library
    pub fn meta(&self) -> HashMap<String, ListedMiner> {
        self.engine.meta_by_label()
    }

    /// Label map of a library, without instantiating its miners
    pub fn extract_meta(&self, path: &str) -> ByteminerResult<HashMap<String, ListedMiner>> {
        Ok(self
            .engine
            .introspect(path)?
            .into_iter()
            .map(|listed| (listed.label.clone(), listed))
            .collect())
    }

    pub fn set_flags(&mut self, flags: ExtractFlags) -> ExtractFlags {
        self.engine.set_flags(flags)
    }

    pub fn unset_flags(&mut self, flags: ExtractFlags) -> ExtractFlags {
        self.engine.unset_flags(flags)
    }

    pub fn last_error(&self) -> &str {
        self.engine.last_error()
    }
}

pub struct Batches<'a> {
    extractor: &'a mut Extractor,
    done: bool,
}

impl Iterator for Batches<'_> {
    type Item = ByteminerResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.extractor.eof() {
            Ok(true) => {
                self.done = true;
                return None;
            }
            Ok(false) => {}
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        }
        match self.extractor.next() {
            Ok(batch) if batch.is_empty() => {
                self.done = true;
                None
            }
            Ok(batch) => Some(Ok(batch)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
