//! Sharing step size adaptation between chains that run concurrently.
//!
//! Every chain contributes its dual averaging accumulators at the end of a
//! warmup iteration and blocks until all chains have done the same. The
//! combined accumulators are then handed to every chain, so all of them
//! continue with the same step size.

use std::sync::{Condvar, Mutex};

use crate::stepsize::AdaptationStats;

/// Merges the adaptation state of several chains into one.
pub trait AdaptationCombiner: Send + Sync {
    fn combine(&self, stats: &[AdaptationStats]) -> AdaptationStats;
}

/// Averages the accumulators. The iteration count is the largest count of
/// any chain, which is the same for all chains in lock step.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanCombiner;

impl AdaptationCombiner for MeanCombiner {
    fn combine(&self, stats: &[AdaptationStats]) -> AdaptationStats {
        let n = stats.len() as f64;
        let mean = |f: fn(&AdaptationStats) -> f64| stats.iter().map(f).sum::<f64>() / n;
        AdaptationStats {
            count: stats.iter().map(|s| s.count).max().unwrap_or(0),
            hbar: mean(|s| s.hbar),
            log_step: mean(|s| s.log_step),
            log_step_adapted: mean(|s| s.log_step_adapted),
        }
    }
}

impl<F> AdaptationCombiner for F
where
    F: Fn(&[AdaptationStats]) -> AdaptationStats + Send + Sync,
{
    fn combine(&self, stats: &[AdaptationStats]) -> AdaptationStats {
        self(stats)
    }
}

#[derive(Debug)]
struct BarrierState {
    generation: u64,
    arrived: usize,
    contributions: Vec<Option<AdaptationStats>>,
    result: Option<AdaptationStats>,
    cancelled: bool,
}

/// A reusable barrier that combines adaptation statistics.
pub struct CrossChainCoordinator {
    num_chains: usize,
    combiner: Box<dyn AdaptationCombiner>,
    state: Mutex<BarrierState>,
    cond: Condvar,
}

impl CrossChainCoordinator {
    pub fn new(num_chains: usize) -> Self {
        Self::with_combiner(num_chains, Box::new(MeanCombiner))
    }

    pub fn with_combiner(num_chains: usize, combiner: Box<dyn AdaptationCombiner>) -> Self {
        Self {
            num_chains,
            combiner,
            state: Mutex::new(BarrierState {
                generation: 0,
                arrived: 0,
                contributions: vec![None; num_chains],
                result: None,
                cancelled: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn num_chains(&self) -> usize {
        self.num_chains
    }

    /// Contribute the statistics of chain `chain_idx` and wait for all other
    /// chains.
    ///
    /// Returns the combined statistics, or `None` if the coordinator was
    /// cancelled before every chain arrived. A `chain_idx` outside the
    /// coordinator's chains cancels it.
    pub fn synchronize(&self, chain_idx: usize, stats: AdaptationStats) -> Option<AdaptationStats> {
        let mut state = self.state.lock().expect("Poisoned lock");
        if chain_idx >= self.num_chains {
            state.cancelled = true;
            self.cond.notify_all();
        }
        if state.cancelled {
            return None;
        }

        state.contributions[chain_idx] = Some(stats);
        state.arrived += 1;

        if state.arrived == self.num_chains {
            let all: Vec<AdaptationStats> = state
                .contributions
                .iter_mut()
                .flat_map(Option::take)
                .collect();
            let combined = self.combiner.combine(&all);
            state.result = Some(combined);
            state.arrived = 0;
            state.generation += 1;
            self.cond.notify_all();
            return Some(combined);
        }

        let generation = state.generation;
        let state = self
            .cond
            .wait_while(state, |s| s.generation == generation && !s.cancelled)
            .expect("Poisoned lock");

        // A completed round wins over a later cancellation.
        if state.generation != generation {
            state.result
        } else {
            None
        }
    }

    /// Release all waiting chains. Every later call to
    /// [`synchronize`](Self::synchronize) returns `None` immediately.
    pub fn cancel(&self) {
        let mut state = self.state.lock().expect("Poisoned lock");
        state.cancelled = true;
        self.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().expect("Poisoned lock").cancelled
    }
}

impl std::fmt::Debug for CrossChainCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossChainCoordinator")
            .field("num_chains", &self.num_chains)
            .field("state", &self.state)
            .finish()
    }
}
