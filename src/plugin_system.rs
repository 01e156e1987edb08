//! Miner libraries: dynamic loading, in-process libraries and the registry
use crate::error::{ByteminerError, MinerFault, Result as ByteminerResult};
use crate::miner::{
    AbiVersionFn, MetaFn, MineView, Miner, MinerFactory, MinerMeta, Proposal, ABI_VERSION_SYMBOL,
    META_SYMBOL, MINER_ABI_VERSION,
};
use libloading::{Library, Symbol};
use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Capability every miner library offers, whatever its origin
pub trait MinerLibrary: Send + Sync {
    /// Path (or pseudo path) the library is registered under
    fn path(&self) -> &str;

    /// Miners the library declares, in declaration order
    fn declarations(&self) -> &[MinerMeta];

    /// Build the miner exported as `symbol`
    fn instantiate(&self, symbol: &str, config: &str) -> ByteminerResult<Box<dyn Miner>>;
}

/// One (path, miner, label) row of the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedMiner {
    pub path: String,
    pub miner: String,
    pub label: String,
}

/// Shared library opened through `libloading`
pub struct DynamicLibrary {
    path: String,
    declarations: Vec<MinerMeta>,
    library: Library,
}

impl DynamicLibrary {
    /// Open a library and read its declared metadata
    pub fn open(path: impl AsRef<Path>) -> ByteminerResult<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let library = unsafe { Library::new(path) }.map_err(|e| ByteminerError::load(&display, e))?;

        let abi_version = unsafe {
            let abi_fn: Symbol<AbiVersionFn> = library
                .get(ABI_VERSION_SYMBOL.as_bytes())
                .map_err(|e| ByteminerError::load(&display, format!("not a miner library: {e}")))?;
            abi_fn()
        };
        if abi_version != MINER_ABI_VERSION {
            return Err(ByteminerError::load(
                &display,
                format!("miner ABI version mismatch: library={abi_version}, host={MINER_ABI_VERSION}"),
            ));
        }

        let declarations = unsafe {
            let meta_fn: Symbol<MetaFn> = library
                .get(META_SYMBOL.as_bytes())
                .map_err(|e| ByteminerError::load(&display, format!("no metadata table: {e}")))?;
            meta_fn().iter().map(MinerMeta::from).collect::<Vec<_>>()
        };

        debug!(
            "Opened miner library {} declaring {} miner(s)",
            display,
            declarations.len()
        );

        Ok(Self {
            path: display,
            declarations,
            library,
        })
    }
}

impl MinerLibrary for DynamicLibrary {
    fn path(&self) -> &str {
        &self.path
    }

    fn declarations(&self) -> &[MinerMeta] {
        &self.declarations
    }

    fn instantiate(&self, symbol: &str, config: &str) -> ByteminerResult<Box<dyn Miner>> {
        // Only declared symbols are known to have the factory signature.
        if !self.declarations.iter().any(|d| d.name == symbol) {
            return Err(ByteminerError::Symbol {
                path: self.path.clone(),
                symbol: symbol.to_string(),
                reason: "not declared in the library metadata".to_string(),
            });
        }

        let factory: MinerFactory = unsafe {
            let symbol_ref: Symbol<MinerFactory> =
                self.library
                    .get(symbol.as_bytes())
                    .map_err(|e| ByteminerError::Symbol {
                        path: self.path.clone(),
                        symbol: symbol.to_string(),
                        reason: e.to_string(),
                    })?;
            *symbol_ref
        };

        run_factory(symbol, || factory(config))
    }
}

type StaticFactory = Arc<dyn Fn(&str) -> Result<Box<dyn Miner>, String> + Send + Sync>;

/// Miner library living in the host process, registered under a pseudo path
#[derive(Clone)]
pub struct StaticLibrary {
    path: String,
    declarations: Vec<MinerMeta>,
    factories: HashMap<String, StaticFactory>,
}

impl StaticLibrary {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            declarations: Vec::new(),
            factories: HashMap::new(),
        }
    }

    /// Declare a miner and the factory that builds it
    pub fn miner<F>(mut self, name: &str, label: &str, concurrent: bool, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Box<dyn Miner>, String> + Send + Sync + 'static,
    {
        self.declarations.push(MinerMeta {
            name: name.to_string(),
            label: label.to_string(),
            concurrent,
        });
        self.factories.insert(name.to_string(), Arc::new(factory));
        self
    }
}

impl fmt::Debug for StaticLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticLibrary")
            .field("path", &self.path)
            .field("declarations", &self.declarations)
            .finish()
    }
}

impl MinerLibrary for StaticLibrary {
    fn path(&self) -> &str {
        &self.path
    }

    fn declarations(&self) -> &[MinerMeta] {
        &self.declarations
    }

    fn instantiate(&self, symbol: &str, config: &str) -> ByteminerResult<Box<dyn Miner>> {
        let factory = self
            .factories
            .get(symbol)
            .ok_or_else(|| ByteminerError::Symbol {
                path: self.path.clone(),
                symbol: symbol.to_string(),
                reason: "no such miner".to_string(),
            })?;
        run_factory(symbol, || factory(config))
    }
}

fn run_factory<F>(symbol: &str, build: F) -> ByteminerResult<Box<dyn Miner>>
where
    F: FnOnce() -> Result<Box<dyn Miner>, String>,
{
    match panic::catch_unwind(AssertUnwindSafe(build)) {
        Ok(Ok(miner)) => Ok(miner),
        Ok(Err(reason)) => Err(ByteminerError::Config {
            symbol: symbol.to_string(),
            reason,
        }),
        Err(payload) => Err(ByteminerError::Config {
            symbol: symbol.to_string(),
            reason: format!("factory panicked: {}", panic_message(payload.as_ref())),
        }),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Live miner instance bound to the library that produced it
pub struct LoadedMiner {
    // Dropped before `library`, so plugin code outlives the instance.
    miner: Box<dyn Miner>,
    gate: Option<Mutex<()>>,
    symbol: String,
    label: String,
    config: String,
    library: Arc<dyn MinerLibrary>,
}

impl LoadedMiner {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> &str {
        &self.config
    }

    pub fn library_path(&self) -> &str {
        self.library.path()
    }

    /// True when calls are serialized through the miner's own lock
    pub fn is_serialized(&self) -> bool {
        self.gate.is_some()
    }

    /// Run the miner over `view`, turning a panic into a fault
    pub fn invoke(&self, view: &MineView<'_>, out: &mut Vec<Proposal>) -> Result<(), MinerFault> {
        let _guard = self.gate.as_ref().map(|gate| gate.lock());
        match panic::catch_unwind(AssertUnwindSafe(|| self.miner.mine(view, out))) {
            Ok(result) => result,
            Err(payload) => Err(MinerFault::new(format!(
                "miner panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }
}

impl fmt::Debug for LoadedMiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedMiner")
            .field("library", &self.library.path())
            .field("symbol", &self.symbol)
            .field("label", &self.label)
            .field("serialized", &self.gate.is_some())
            .finish()
    }
}

/// Registry entry: one loaded library and what it declares
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub path: String,
    pub miners: Vec<MinerMeta>,
}

/// Resolves libraries and records which ones have been loaded
#[derive(Default)]
pub struct PluginRegistry {
    provided: HashMap<String, Arc<dyn MinerLibrary>>,
    opened: HashMap<String, Arc<dyn MinerLibrary>>,
    entries: Vec<RegistryEntry>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an in-process library resolvable under its path
    pub fn provide(&mut self, library: Arc<dyn MinerLibrary>) {
        debug!("Providing in-process miner library {}", library.path());
        self.provided.insert(library.path().to_string(), library);
    }

    fn resolve(&mut self, path: &str) -> ByteminerResult<Arc<dyn MinerLibrary>> {
        if let Some(library) = self.provided.get(path) {
            return Ok(library.clone());
        }
        if let Some(library) = self.opened.get(path) {
            return Ok(library.clone());
        }
        let library: Arc<dyn MinerLibrary> = Arc::new(DynamicLibrary::open(path)?);
        self.opened.insert(path.to_string(), library.clone());
        Ok(library)
    }

    /// Instantiate `symbol` from the library at `path` with `config`
    pub fn load(&mut self, path: &str, symbol: &str, config: &str) -> ByteminerResult<LoadedMiner> {
        let library = self.resolve(path)?;
        let miner = library.instantiate(symbol, config)?;

        let declared = library.declarations().iter().find(|d| d.name == symbol);
        let concurrent = declared.map(|d| d.concurrent).unwrap_or(false);
        let label = declared
            .map(|d| d.label.clone())
            .unwrap_or_else(|| symbol.to_string());

        if !self.entries.iter().any(|e| e.path == path) {
            self.entries.push(RegistryEntry {
                path: path.to_string(),
                miners: library.declarations().to_vec(),
            });
        }

        info!(
            "Loaded miner {}::{} (label {}, {})",
            path,
            symbol,
            label,
            if concurrent { "concurrent" } else { "serialized" }
        );

        Ok(LoadedMiner {
            miner,
            gate: if concurrent { None } else { Some(Mutex::new(())) },
            symbol: symbol.to_string(),
            label,
            config: config.to_string(),
            library,
        })
    }

    /// Declared miners of a library without instantiating any of them
    pub fn introspect(&self, path: &str) -> ByteminerResult<Vec<ListedMiner>> {
        if let Some(library) = self.provided.get(path).or_else(|| self.opened.get(path)) {
            return Ok(listing(path, library.declarations()));
        }
        introspect(path)
    }

    /// Flattened contents of every library loaded so far
    pub fn list(&self) -> Vec<ListedMiner> {
        self.entries
            .iter()
            .flat_map(|entry| listing(&entry.path, &entry.miners))
            .collect()
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }
}

fn listing(path: &str, declarations: &[MinerMeta]) -> Vec<ListedMiner> {
    declarations
        .iter()
        .map(|d| ListedMiner {
            path: path.to_string(),
            miner: d.name.clone(),
            label: d.label.clone(),
        })
        .collect()
}

/// Read the declared (miner, label) pairs of a shared library
pub fn introspect(path: impl AsRef<Path>) -> ByteminerResult<Vec<ListedMiner>> {
    let library = DynamicLibrary::open(path)?;
    Ok(listing(library.path(), library.declarations()))
}

/// Locate a miner library by name
///
/// Names containing a path separator (or pseudo paths registered in-process)
/// are used as given. Bare names are looked up in each search directory as
/// `name`, `name.<ext>` and `lib<name>.<ext>`.
pub fn resolve_library_path(name: &str, search_paths: &[PathBuf]) -> String {
    if name.contains('/') || name.contains('\\') || name.contains(':') {
        return name.to_string();
    }

    let ext = if cfg!(target_os = "macos") {
        "dylib"
    } else if cfg!(target_os = "windows") {
        "dll"
    } else {
        "so"
    };

    let candidates = [
        name.to_string(),
        format!("{name}.{ext}"),
        format!("lib{name}.{ext}"),
    ];
    for dir in search_paths {
        for candidate in &candidates {
            let path = dir.join(candidate);
            if path.is_file() {
                return path.display().to_string();
            }
        }
    }
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Nothing;

    impl Miner for Nothing {
        fn mine(&self, _view: &MineView<'_>, _out: &mut Vec<Proposal>) -> Result<(), MinerFault> {
            Ok(())
        }
    }

    struct Panicky;

    impl Miner for Panicky {
        fn mine(&self, _view: &MineView<'_>, _out: &mut Vec<Proposal>) -> Result<(), MinerFault> {
            panic!("bad plugin")
        }
    }

    fn library(built: Arc<AtomicUsize>) -> StaticLibrary {
        StaticLibrary::new("builtin:test")
            .miner("match_nothing", "NOTHING", true, move |_| {
                built.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(Nothing) as Box<dyn Miner>)
            })
            .miner("match_strict", "STRICT", false, |config| {
                if config.is_empty() {
                    Err("config required".to_string())
                } else {
                    Ok(Box::new(Nothing) as Box<dyn Miner>)
                }
            })
            .miner("match_panic", "PANIC", false, |_| Ok(Box::new(Panicky) as Box<dyn Miner>))
    }

    #[test]
    fn test_load_records_library_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        registry.provide(Arc::new(library(built.clone())));

        let first = registry.load("builtin:test", "match_nothing", "").unwrap();
        let second = registry.load("builtin:test", "match_nothing", "x").unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert!(!first.is_serialized());
        assert_eq!(second.config(), "x");
        assert_eq!(registry.entries().len(), 1);

        let list = registry.list();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].miner, "match_nothing");
        assert_eq!(list[1].label, "STRICT");
    }

    #[test]
    fn test_load_errors() {
        let mut registry = PluginRegistry::new();
        registry.provide(Arc::new(library(Arc::new(AtomicUsize::new(0)))));

        let err = registry.load("builtin:test", "match_missing", "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Symbol);

        let err = registry.load("builtin:test", "match_strict", "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = registry
            .load("/nonexistent/libminers.so", "match_glob", "")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_introspect_does_not_instantiate() {
        let built = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        registry.provide(Arc::new(library(built.clone())));

        let listed = registry.introspect("builtin:test").unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_introspect_rejects_non_library() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"definitely not ELF").unwrap();
        let err = introspect(file.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
    }

    #[test]
    fn test_invoke_catches_panics() {
        let mut registry = PluginRegistry::new();
        registry.provide(Arc::new(library(Arc::new(AtomicUsize::new(0)))));
        let miner = registry.load("builtin:test", "match_panic", "").unwrap();
        assert!(miner.is_serialized());

        let view = MineView::new(b"abc", 0, 3, true, None);
        let mut out = Vec::new();
        let fault = miner.invoke(&view, &mut out).unwrap_err();
        assert!(fault.0.contains("bad plugin"));
    }

    #[test]
    fn test_resolve_library_path() {
        let dir = tempfile::tempdir().unwrap();
        let ext = if cfg!(target_os = "macos") {
            "dylib"
        } else if cfg!(target_os = "windows") {
            "dll"
        } else {
            "so"
        };
        let lib = dir.path().join(format!("libglob_miners.{ext}"));
        std::fs::write(&lib, b"").unwrap();

        let resolved = resolve_library_path("glob_miners", &[dir.path().to_path_buf()]);
        assert_eq!(resolved, lib.display().to_string());
        assert_eq!(resolve_library_path("./x.so", &[]), "./x.so");
        assert_eq!(resolve_library_path("builtin:test", &[]), "builtin:test");
    }
}
