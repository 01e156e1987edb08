//! Pattern mining over byte streams.
//!
//! Miners are loaded from shared libraries (or provided in-process), an
//! [`Engine`] runs them in parallel over slices of a bound [`Stream`], and
//! results come back as ordered batches of [`Occurrence`]s.
//!
//! ```no_run
//! use byteminer::{Extractor, MinerSpec};
//!
//! # fn main() -> byteminer::Result<()> {
//! let spec: MinerSpec = "./libglob_miners.so::match_glob=c?t".parse()?;
//! let mut extractor = Extractor::new(&[spec], 1000, None)?;
//! extractor.open("input.txt")?;
//! let total = extractor.reduce(0, |n, batch| n + batch.len())?;
//! println!("{total} occurrences");
//! # Ok(())
//! # }
//! ```
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod handles;
pub mod metrics;
pub mod miner;
pub mod occurrence;
pub mod output_formats;
pub mod plugin_cli;
pub mod plugin_system;
pub mod progress;
pub mod stream;

pub use engine::{Engine, EngineConfig, EngineState, ExtractFlags};
pub use error::{ByteminerError, ErrorKind, MinerFault, Result};
pub use extractor::{Extractor, MinerSpec};
pub use handles::{EngineId, Session, StreamId};
pub use miner::{MineView, Miner, MinerDecl, Proposal};
pub use occurrence::{Batch, Occurrence};
pub use plugin_system::{ListedMiner, MinerLibrary, StaticLibrary};
pub use stream::{SharedStream, Stream, StreamStatus};
