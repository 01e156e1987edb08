//! Opaque-id access to engines and streams.
//!
//! A [`Session`] owns every engine and stream it creates and hands out typed
//! ids instead of references, so callers across a thread or language
//! boundary never hold addresses. Unknown ids are argument errors.
use crate::engine::{Engine, ExtractFlags};
use crate::error::{ByteminerError, Result as ByteminerResult};
use crate::occurrence::Batch;
use crate::plugin_system::{self, ListedMiner, MinerLibrary};
use crate::stream::{SharedStream, Stream, StreamStatus};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine#{}", self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

type SharedEngine = Arc<Mutex<Engine>>;

#[derive(Default)]
pub struct Session {
    engines: HashMap<EngineId, SharedEngine>,
    streams: HashMap<StreamId, SharedStream>,
    libraries: Vec<Arc<dyn MinerLibrary>>,
    last_id: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn engine(&self, id: EngineId) -> ByteminerResult<&SharedEngine> {
        self.engines
            .get(&id)
            .ok_or_else(|| ByteminerError::Argument(format!("unknown {id}")))
    }

    fn stream(&self, id: StreamId) -> ByteminerResult<&SharedStream> {
        self.streams
            .get(&id)
            .ok_or_else(|| ByteminerError::Argument(format!("unknown {id}")))
    }

    pub fn create_engine(&mut self, threads: usize) -> ByteminerResult<EngineId> {
        let mut engine = Engine::new(threads)?;
        for library in &self.libraries {
            engine.provide_library(library.clone());
        }
        let id = EngineId(self.allocate());
        self.engines.insert(id, Arc::new(Mutex::new(engine)));
        debug!("Created {} with {} worker(s)", id, threads);
        Ok(id)
    }

    /// Unbinds the engine's stream and releases the engine
    pub fn destroy_engine(&mut self, id: EngineId) -> ByteminerResult<()> {
        let engine = self
            .engines
            .remove(&id)
            .ok_or_else(|| ByteminerError::Argument(format!("unknown {id}")))?;
        engine.lock().unbind_stream();
        debug!("Destroyed {}", id);
        Ok(())
    }

    /// Offered to every engine created afterwards
    pub fn provide_library(&mut self, library: Arc<dyn MinerLibrary>) {
        self.libraries.push(library);
    }

    pub fn add_miner(
        &self,
        id: EngineId,
        path: &str,
        symbol: &str,
        config: &str,
    ) -> ByteminerResult<bool> {
        Ok(self.engine(id)?.lock().add_miner(path, symbol, config))
    }

    /// Declared miners of a library; in-process libraries resolve too
    pub fn introspect(&self, path: &str) -> ByteminerResult<Vec<ListedMiner>> {
        if let Some(library) = self.libraries.iter().rev().find(|l| l.path() == path) {
            return Ok(library
                .declarations()
                .iter()
                .map(|d| ListedMiner {
                    path: path.to_string(),
                    miner: d.name.clone(),
                    label: d.label.clone(),
                })
                .collect());
        }
        plugin_system::introspect(path)
    }

    pub fn loaded_miners(&self, id: EngineId) -> ByteminerResult<Vec<ListedMiner>> {
        Ok(self.engine(id)?.lock().loaded_miners())
    }

    pub fn set_flags(&self, id: EngineId, flags: ExtractFlags) -> ByteminerResult<ExtractFlags> {
        Ok(self.engine(id)?.lock().set_flags(flags))
    }

    pub fn unset_flags(&self, id: EngineId, flags: ExtractFlags) -> ByteminerResult<ExtractFlags> {
        Ok(self.engine(id)?.lock().unset_flags(flags))
    }

    fn register_stream(&mut self, stream: Stream, path: &Path) -> ByteminerResult<StreamId> {
        if let Some(reason) = stream.failure() {
            return Err(ByteminerError::StreamOpen {
                path: path.to_path_buf(),
                reason: reason.to_string(),
            });
        }
        let id = StreamId(self.allocate());
        debug!("Opened {} over {}", id, stream.origin());
        self.streams.insert(id, stream.into_shared());
        Ok(id)
    }

    pub fn open_file_stream(&mut self, path: impl AsRef<Path>) -> ByteminerResult<StreamId> {
        let path = path.as_ref();
        self.register_stream(Stream::open_file(path), path)
    }

    /// The bytes are copied; the caller may reuse its buffer
    pub fn open_buffer_stream(&mut self, bytes: &[u8]) -> ByteminerResult<StreamId> {
        self.register_stream(Stream::open_buffer(bytes), Path::new("<buffer>"))
    }

    pub fn stream_ok(&self, id: StreamId) -> ByteminerResult<bool> {
        Ok(self.stream(id)?.lock().is_ok())
    }

    pub fn stream_status(&self, id: StreamId) -> ByteminerResult<StreamStatus> {
        Ok(self.stream(id)?.lock().status())
    }

    /// Engines bound to it see it as unbound from now on
    pub fn destroy_stream(&mut self, id: StreamId) -> ByteminerResult<()> {
        self.streams
            .remove(&id)
            .map(|_| debug!("Destroyed {}", id))
            .ok_or_else(|| ByteminerError::Argument(format!("unknown {id}")))
    }

    pub fn bind_stream(&self, engine: EngineId, stream: StreamId) -> ByteminerResult<bool> {
        let stream = self.stream(stream)?;
        Ok(self.engine(engine)?.lock().bind_stream(stream))
    }

    pub fn unbind_stream(&self, id: EngineId) -> ByteminerResult<()> {
        self.engine(id)?.lock().unbind_stream();
        Ok(())
    }

    pub fn is_at_end(&self, id: EngineId) -> ByteminerResult<bool> {
        Ok(self.engine(id)?.lock().is_at_end())
    }

    /// Blocks until the batch is assembled
    pub fn next(&self, id: EngineId, batch_size: usize) -> ByteminerResult<Batch> {
        Ok(self.engine(id)?.lock().next(batch_size))
    }

    /// Runs `next` on a dedicated thread and hands the batch to `callback`
    pub fn next_deferred<F>(
        &self,
        id: EngineId,
        batch_size: usize,
        callback: F,
    ) -> ByteminerResult<JoinHandle<()>>
    where
        F: FnOnce(EngineId, Batch) + Send + 'static,
    {
        let engine = self.engine(id)?.clone();
        let handle = thread::Builder::new()
            .name(format!("byteminer-deferred-{}", id.0))
            .spawn(move || {
                let batch = engine.lock().next(batch_size);
                callback(id, batch);
            })?;
        Ok(handle)
    }

    /// `next` on tokio's blocking pool
    pub async fn next_async(&self, id: EngineId, batch_size: usize) -> ByteminerResult<Batch> {
        let engine = self.engine(id)?.clone();
        let batch = tokio::task::spawn_blocking(move || {
            let mut engine = engine.lock();
            engine.next(batch_size)
        })
        .await
        .map_err(|e| anyhow::anyhow!("extraction task for {id} did not complete: {e}"))?;
        Ok(batch)
    }

    pub fn last_error(&self, id: EngineId) -> ByteminerResult<String> {
        Ok(self.engine(id)?.lock().last_error().to_string())
    }

    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}
