//! Token glob and literal miners.
//!
//! Built as a `cdylib` this crate is a loadable miner library; linked as an
//! `rlib` it offers the same miners in-process through [`static_library`].
use byteminer::miner::{MineView, Miner, Proposal};
use byteminer::plugin_system::StaticLibrary;
use byteminer::MinerFault;
use log::debug;
use memchr::memmem;

pub const LIBRARY_NAME: &str = "builtin:glob_miners";

byteminer::export_miners! {
    match_glob => { label: "GLOB", concurrent: true, factory: GlobMiner::from_config },
    match_literal => { label: "LITERAL", concurrent: true, factory: LiteralMiner::from_config },
}

/// The miners of this crate registered under [`LIBRARY_NAME`]
pub fn static_library() -> StaticLibrary {
    StaticLibrary::new(LIBRARY_NAME)
        .miner("match_glob", "GLOB", true, GlobMiner::from_config)
        .miner("match_literal", "LITERAL", true, LiteralMiner::from_config)
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
}

/// Glob over alphanumeric tokens.
///
/// `?` matches one alphanumeric byte, `*` a run (possibly empty) of them,
/// and every other byte itself. A match begins and ends on token
/// boundaries, so `c?t` finds `cat` but not the `cat` in `cats`.
#[derive(Debug, Clone)]
pub struct GlobMiner {
    pattern: Vec<u8>,
}

impl GlobMiner {
    pub fn new(pattern: impl Into<Vec<u8>>) -> Result<Self, String> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err("glob pattern must not be empty".to_string());
        }
        Ok(Self { pattern })
    }

    pub fn from_config(config: &str) -> Result<Box<dyn Miner>, String> {
        debug!("match_glob pattern {:?}", config);
        Ok(Box::new(Self::new(config)?))
    }

    /// End offset of the longest match starting at `start`.
    ///
    /// Tracks every pattern position alive after each byte, so a pattern
    /// with stars costs `pattern.len()` steps per byte instead of
    /// backtracking.
    fn longest_match(&self, view: &MineView<'_>, start: usize) -> Option<usize> {
        let pattern = &self.pattern;
        let bytes = view.bytes();
        let mut live = vec![false; pattern.len() + 1];
        let mut next = vec![false; pattern.len() + 1];
        live[0] = true;
        close_stars(pattern, &mut live);

        let mut longest = None;
        let mut pos = start;
        loop {
            if live[pattern.len()] && ends_token(view, pos) {
                longest = Some(pos);
            }
            let Some(&b) = bytes.get(pos) else {
                break;
            };

            next.fill(false);
            let mut advanced = false;
            for (i, &p) in pattern.iter().enumerate() {
                if !live[i] {
                    continue;
                }
                let target = match p {
                    b'*' if is_token_byte(b) => i,
                    b'?' if is_token_byte(b) => i + 1,
                    b'*' | b'?' => continue,
                    literal if literal == b => i + 1,
                    _ => continue,
                };
                next[target] = true;
                advanced = true;
            }
            if !advanced {
                break;
            }
            close_stars(pattern, &mut next);
            std::mem::swap(&mut live, &mut next);
            pos += 1;
        }
        longest
    }
}

/// A live `*` may also match nothing
fn close_stars(pattern: &[u8], live: &mut [bool]) {
    for (i, &p) in pattern.iter().enumerate() {
        if p == b'*' && live[i] {
            live[i + 1] = true;
        }
    }
}

fn starts_token(view: &MineView<'_>, pos: usize) -> bool {
    let before = view.byte_before(pos).is_some_and(is_token_byte);
    let at = view.bytes().get(pos).copied().is_some_and(is_token_byte);
    !(before && at)
}

fn ends_token(view: &MineView<'_>, pos: usize) -> bool {
    if pos == 0 {
        return false;
    }
    let last = is_token_byte(view.bytes()[pos - 1]);
    match view.byte_at(pos) {
        Ok(Some(next)) => !(last && is_token_byte(next)),
        Ok(None) => true,
        // Cut before the next byte; the boundary is unknown.
        Err(()) => false,
    }
}

impl Miner for GlobMiner {
    fn mine(&self, view: &MineView<'_>, out: &mut Vec<Proposal>) -> Result<(), MinerFault> {
        for start in 0..view.scan_len() {
            if !starts_token(view, start) {
                continue;
            }
            if let Some(end) = self.longest_match(view, start) {
                if end > start {
                    out.push(Proposal::new(start, end - start));
                }
            }
        }
        Ok(())
    }
}

/// Every occurrence of a fixed byte string, overlapping ones included
pub struct LiteralMiner {
    finder: memmem::Finder<'static>,
}

impl LiteralMiner {
    pub fn new(needle: &[u8]) -> Result<Self, String> {
        if needle.is_empty() {
            return Err("literal must not be empty".to_string());
        }
        Ok(Self {
            finder: memmem::Finder::new(needle).into_owned(),
        })
    }

    pub fn from_config(config: &str) -> Result<Box<dyn Miner>, String> {
        Ok(Box::new(Self::new(config.as_bytes())?))
    }
}

impl Miner for LiteralMiner {
    fn mine(&self, view: &MineView<'_>, out: &mut Vec<Proposal>) -> Result<(), MinerFault> {
        let len = self.finder.needle().len();
        let bytes = view.bytes();
        let mut from = 0;
        while from < view.scan_len() {
            let Some(found) = self.finder.find(&bytes[from..]) else {
                break;
            };
            let start = from + found;
            if start >= view.scan_len() {
                break;
            }
            out.push(Proposal::new(start, len));
            from = start + 1;
        }
        Ok(())
    }
}
