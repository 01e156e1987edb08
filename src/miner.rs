//! The miner capability and the plugin ABI around it.
//!
//! A miner library is a `cdylib` compiled against this crate. It exports:
//!
//! - `byteminer_abi_version() -> u32`, compared against [`MINER_ABI_VERSION`];
//! - `byteminer_meta() -> &'static [MinerDecl]`, the declared miners;
//! - one [`MinerFactory`] per declared miner, named after the miner.
//!
//! [`export_miners!`](crate::export_miners) generates all of them.
use crate::error::MinerFault;
use serde::Serialize;

/// Bumped whenever [`Miner`], [`MineView`], [`Proposal`] or [`MinerDecl`] change shape.
pub const MINER_ABI_VERSION: u32 = 1;

pub const ABI_VERSION_SYMBOL: &str = "byteminer_abi_version";
pub const META_SYMBOL: &str = "byteminer_meta";

/// Builds a miner from its configuration string.
pub type MinerFactory = fn(&str) -> Result<Box<dyn Miner>, String>;
pub type MetaFn = fn() -> &'static [MinerDecl];
pub type AbiVersionFn = fn() -> u32;

/// A pluggable unit that proposes occurrences from stream bytes.
///
/// `mine` must be a pure function of the view contents and the miner's
/// configuration. It must not keep the view past the call. Miners whose
/// declaration sets `concurrent` may be invoked from several workers at
/// once; all others are serialized by the engine.
pub trait Miner: Send + Sync {
    fn mine(&self, view: &MineView<'_>, out: &mut Vec<Proposal>) -> Result<(), MinerFault>;
}

/// Static declaration of one miner inside a library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinerDecl {
    pub name: &'static str,
    pub label: &'static str,
    pub concurrent: bool,
}

/// Owned copy of a [`MinerDecl`], valid after its library is unloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MinerMeta {
    pub name: String,
    pub label: String,
    pub concurrent: bool,
}

impl From<&MinerDecl> for MinerMeta {
    fn from(decl: &MinerDecl) -> Self {
        Self {
            name: decl.name.to_string(),
            label: decl.label.to_string(),
            concurrent: decl.concurrent,
        }
    }
}

/// A match proposed by a miner, relative to the view it was given.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub start: usize,
    pub len: usize,
    /// Overrides the label declared for the miner.
    pub label: Option<String>,
    pub confidence: f32,
}

impl Proposal {
    pub fn new(start: usize, len: usize) -> Self {
        Self {
            start,
            len,
            label: None,
            confidence: 1.0,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Read-only view over one slice of the stream.
///
/// `bytes()` holds the slice followed by up to `max_span` bytes of lookahead.
/// Proposals must start inside `[0, scan_len())` and end inside `bytes()`.
#[derive(Debug, Clone, Copy)]
pub struct MineView<'a> {
    bytes: &'a [u8],
    base: u64,
    scan_len: usize,
    at_end: bool,
    previous: Option<u8>,
}

impl<'a> MineView<'a> {
    pub fn new(
        bytes: &'a [u8],
        base: u64,
        scan_len: usize,
        at_end: bool,
        previous: Option<u8>,
    ) -> Self {
        Self {
            bytes,
            base,
            scan_len: scan_len.min(bytes.len()),
            at_end,
            previous,
        }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Stream offset of `bytes()[0]`.
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn scan_len(&self) -> usize {
        self.scan_len
    }

    /// True when `bytes()` runs up to the end of the input.
    pub fn at_end(&self) -> bool {
        self.at_end
    }

    /// Byte just before `bytes()[0]`, `None` at the start of the stream.
    pub fn previous(&self) -> Option<u8> {
        self.previous
    }

    /// Byte before offset `i` of the view.
    pub fn byte_before(&self, i: usize) -> Option<u8> {
        if i == 0 {
            self.previous
        } else {
            self.bytes.get(i - 1).copied()
        }
    }

    /// Byte at offset `i`. `Err(())` means the view was cut before `i` and
    /// the byte is not known yet.
    #[allow(clippy::result_unit_err)]
    pub fn byte_at(&self, i: usize) -> Result<Option<u8>, ()> {
        match self.bytes.get(i) {
            Some(b) => Ok(Some(*b)),
            None if self.at_end => Ok(None),
            None => Err(()),
        }
    }
}

/// Exports miners from a plugin crate built as a `cdylib`.
///
/// ```ignore
/// byteminer::export_miners! {
///     match_glob => { label: "GLOB", concurrent: true, factory: GlobMiner::from_config },
/// }
/// ```
#[macro_export]
macro_rules! export_miners {
    ($( $symbol:ident => { label: $label:expr, concurrent: $concurrent:expr, factory: $factory:expr $(,)? } ),+ $(,)?) => {
        #[no_mangle]
        pub fn byteminer_abi_version() -> u32 {
            $crate::miner::MINER_ABI_VERSION
        }

        #[no_mangle]
        pub fn byteminer_meta() -> &'static [$crate::miner::MinerDecl] {
            const DECLS: &[$crate::miner::MinerDecl] = &[
                $( $crate::miner::MinerDecl {
                    name: stringify!($symbol),
                    label: $label,
                    concurrent: $concurrent,
                } ),+
            ];
            DECLS
        }

        $(
            #[no_mangle]
            pub fn $symbol(
                config: &str,
            ) -> ::std::result::Result<::std::boxed::Box<dyn $crate::miner::Miner>, ::std::string::String> {
                let factory: $crate::miner::MinerFactory = $factory;
                factory(config)
            }
        )+
    };
}
