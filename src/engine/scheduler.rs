//! Slice planning and parallel miner dispatch
use crate::error::{ByteminerError, Result as ByteminerResult};
use crate::metrics::Metrics;
use crate::miner::{MineView, Proposal};
use crate::occurrence::{Candidate, Occurrence};
use crate::plugin_system::LoadedMiner;
use log::warn;
use rayon::prelude::*;
use rayon::ThreadPool;

/// One unit of work: a scan range plus its lookahead, relative to the round window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlicePlan {
    pub start: usize,
    pub scan_len: usize,
    pub view_end: usize,
    pub at_end: bool,
}

/// Cut `available` buffered bytes into at most `workers` slices.
///
/// Unless the window reaches the end of input, the last `max_span` bytes are
/// only lookahead and are left for a later round.
pub(crate) fn plan_round(
    available: usize,
    input_ends: bool,
    workers: usize,
    slice_size: usize,
    max_span: usize,
) -> Vec<SlicePlan> {
    let scannable = if input_ends {
        available
    } else {
        available.saturating_sub(max_span)
    };

    let mut plans = Vec::with_capacity(workers);
    let mut start = 0;
    while start < scannable && plans.len() < workers {
        let scan_len = slice_size.min(scannable - start);
        let view_end = (start + scan_len).saturating_add(max_span).min(available);
        plans.push(SlicePlan {
            start,
            scan_len,
            view_end,
            at_end: input_ends && view_end == available,
        });
        start += scan_len;
    }
    plans
}

/// Run every miner over every planned slice on the worker pool.
///
/// Results come back in slice order.
pub(crate) fn run_round(
    pool: &ThreadPool,
    miners: &[LoadedMiner],
    window: &[u8],
    base: u64,
    previous: Option<u8>,
    plans: &[SlicePlan],
    metrics: &Metrics,
) -> Vec<ByteminerResult<Vec<Candidate>>> {
    metrics.slices_dispatched.inc_by(plans.len() as u64);
    pool.install(|| {
        plans
            .par_iter()
            .map(|plan| mine_slice(miners, window, base, previous, plan, metrics))
            .collect()
    })
}

fn mine_slice(
    miners: &[LoadedMiner],
    window: &[u8],
    base: u64,
    previous: Option<u8>,
    plan: &SlicePlan,
    metrics: &Metrics,
) -> ByteminerResult<Vec<Candidate>> {
    let bytes = &window[plan.start..plan.view_end];
    let previous = if plan.start == 0 {
        previous
    } else {
        Some(window[plan.start - 1])
    };
    let view = MineView::new(
        bytes,
        base + plan.start as u64,
        plan.scan_len,
        plan.at_end,
        previous,
    );

    let mut candidates = Vec::new();
    let mut proposals = Vec::new();
    for (miner_index, miner) in miners.iter().enumerate() {
        proposals.clear();
        if let Err(fault) = miner.invoke(&view, &mut proposals) {
            metrics.miner_faults.inc();
            return Err(ByteminerError::Plugin {
                miner: format!("{}::{}", miner.library_path(), miner.symbol()),
                source: fault,
            });
        }

        for proposal in proposals.drain(..) {
            match accept(&view, proposal, miner) {
                Some(occurrence) => candidates.push(Candidate {
                    occurrence,
                    miner_index,
                }),
                None => metrics.proposals_rejected.inc(),
            }
        }
    }
    Ok(candidates)
}

fn accept(view: &MineView<'_>, proposal: Proposal, miner: &LoadedMiner) -> Option<Occurrence> {
    let end = proposal.start.checked_add(proposal.len);
    let valid = proposal.start < view.scan_len()
        && proposal.len > 0
        && end.is_some_and(|end| end <= view.bytes().len())
        && proposal.confidence.is_finite();
    if !valid {
        warn!(
            "Dropping proposal from {} at view offset {} (len {}, confidence {}): outside view of {} bytes",
            miner.symbol(),
            proposal.start,
            proposal.len,
            proposal.confidence,
            view.bytes().len()
        );
        return None;
    }

    let start = proposal.start;
    Some(Occurrence {
        position: view.base() + start as u64,
        length: proposal.len,
        label: proposal
            .label
            .unwrap_or_else(|| miner.label().to_string()),
        value: view.bytes()[start..start + proposal.len].to_vec(),
        confidence: proposal.confidence.clamp(0.0, 1.0),
    })
}
