#![allow(dead_code)]

use byteminer::miner::{MineView, Miner, Proposal};
use byteminer::{MinerFault, StaticLibrary};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const TEST_LIBRARY: &str = "builtin:test";

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
}

/// Whole alphanumeric tokens in the scan range whose end is known
pub fn tokens(view: &MineView<'_>) -> Vec<(usize, usize)> {
    let bytes = view.bytes();
    let mut found = Vec::new();
    for start in 0..view.scan_len() {
        if !is_token_byte(bytes[start]) || view.byte_before(start).is_some_and(is_token_byte) {
            continue;
        }
        let len = bytes[start..].iter().take_while(|&&b| is_token_byte(b)).count();
        if view.byte_at(start + len).is_ok() {
            found.push((start, len));
        }
    }
    found
}

pub struct TokenMiner;

impl Miner for TokenMiner {
    fn mine(&self, view: &MineView<'_>, out: &mut Vec<Proposal>) -> Result<(), MinerFault> {
        out.extend(tokens(view).into_iter().map(|(s, l)| Proposal::new(s, l)));
        Ok(())
    }
}

pub struct AnimalMiner;

impl Miner for AnimalMiner {
    fn mine(&self, view: &MineView<'_>, out: &mut Vec<Proposal>) -> Result<(), MinerFault> {
        for (start, len) in tokens(view) {
            let word = &view.bytes()[start..start + len];
            if matches!(word, b"cat" | b"dog" | b"cow") {
                out.push(Proposal::new(start, len));
            }
        }
        Ok(())
    }
}

/// Every occurrence of a byte string
pub struct LiteralMiner(Vec<u8>);

impl Miner for LiteralMiner {
    fn mine(&self, view: &MineView<'_>, out: &mut Vec<Proposal>) -> Result<(), MinerFault> {
        let bytes = view.bytes();
        for start in 0..view.scan_len() {
            if bytes[start..].starts_with(&self.0) {
                out.push(Proposal::new(start, self.0.len()));
            }
        }
        Ok(())
    }
}

/// Panics as soon as it sees its trigger byte
pub struct PanicMiner(u8);

impl Miner for PanicMiner {
    fn mine(&self, view: &MineView<'_>, _out: &mut Vec<Proposal>) -> Result<(), MinerFault> {
        if view.bytes()[..view.scan_len()].contains(&self.0) {
            panic!("trigger byte {:?} seen", self.0 as char);
        }
        Ok(())
    }
}

/// Faults if two calls ever overlap
#[derive(Default)]
pub struct ExclusiveMiner {
    busy: AtomicBool,
}

impl Miner for ExclusiveMiner {
    fn mine(&self, view: &MineView<'_>, out: &mut Vec<Proposal>) -> Result<(), MinerFault> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(MinerFault::new("entered concurrently"));
        }
        thread::sleep(Duration::from_millis(1));
        if view.scan_len() > 0 {
            out.push(Proposal::new(0, 1).with_label("SLICE"));
        }
        self.busy.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Proposes spans that fall outside its view
pub struct OutOfBoundsMiner;

impl Miner for OutOfBoundsMiner {
    fn mine(&self, view: &MineView<'_>, out: &mut Vec<Proposal>) -> Result<(), MinerFault> {
        out.push(Proposal::new(view.scan_len(), 1));
        out.push(Proposal::new(0, 0));
        out.push(Proposal::new(0, view.bytes().len() + 1));
        out.push(Proposal::new(0, 1).with_confidence(f32::NAN));
        if view.scan_len() > 0 {
            out.push(Proposal::new(0, 1).with_confidence(7.5));
        }
        Ok(())
    }
}

pub fn test_library() -> StaticLibrary {
    StaticLibrary::new(TEST_LIBRARY)
        .miner("match_token", "TOKEN", true, |_| Ok(Box::new(TokenMiner) as Box<dyn Miner>))
        .miner("match_animal", "ANIMAL", true, |_| Ok(Box::new(AnimalMiner) as Box<dyn Miner>))
        .miner("match_literal", "LITERAL", true, |config| {
            if config.is_empty() {
                return Err("literal must not be empty".to_string());
            }
            Ok(Box::new(LiteralMiner(config.as_bytes().to_vec())) as Box<dyn Miner>)
        })
        .miner("match_panic", "PANIC", true, |config| {
            let trigger = config.bytes().next().unwrap_or(b'!');
            Ok(Box::new(PanicMiner(trigger)) as Box<dyn Miner>)
        })
        .miner("match_exclusive", "EXCLUSIVE", false, |_| {
            Ok(Box::new(ExclusiveMiner::default()) as Box<dyn Miner>)
        })
        .miner("match_out_of_bounds", "OOB", true, |_| {
            Ok(Box::new(OutOfBoundsMiner) as Box<dyn Miner>)
        })
}

pub fn shared_test_library() -> Arc<dyn byteminer::MinerLibrary> {
    Arc::new(test_library())
}
