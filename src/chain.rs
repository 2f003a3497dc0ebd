use std::fmt::Debug;

use rand::Rng;

use crate::{error::Result, stepsize::DualAverage, stepsize::DualAverageSettings};

/// The position of a chain: unconstrained continuous parameters plus
/// discrete parameters, which the HMC kernels carry along unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainState {
    pub continuous: Vec<f64>,
    pub discrete: Vec<i64>,
}

impl ChainState {
    pub fn new(continuous: Vec<f64>) -> Self {
        Self {
            continuous,
            discrete: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.continuous.len()
    }
}

/// The result of a single kernel step.
#[derive(Debug, Clone)]
pub struct Transition<S> {
    pub state: ChainState,
    /// The log density at the new state.
    pub logp: f64,
    /// Acceptance statistic in `[0, 1]` that drives step size adaptation.
    pub accept_stat: f64,
    pub stats: S,
}

/// Kernel specific diagnostics of a transition.
pub trait KernelStats: Debug + Send {
    /// Append the values matching [`TransitionKernel::stat_names`].
    fn write_stats(&self, out: &mut Vec<f64>);

    /// Append the values matching [`TransitionKernel::diagnostic_names`].
    fn write_diagnostics(&self, _out: &mut Vec<f64>) {}
}

/// A Markov transition that is parametrized by a step size.
///
/// The kernel does not own the random number generator, it borrows the one
/// of the chain for every step.
pub trait TransitionKernel: Send {
    type Stats: KernelStats;

    /// The dimensionality of the continuous state.
    fn dim(&self) -> usize;

    /// Limit the size of trajectories, for kernels that build trees.
    fn set_max_depth(&mut self, _max_depth: u64) {}

    /// Find a reasonable starting step size before adaptation starts.
    fn init_stepsize<R: Rng + ?Sized>(
        &mut self,
        _state: &ChainState,
        step_size: f64,
        _rng: &mut R,
    ) -> Result<f64> {
        Ok(step_size)
    }

    /// Advance the chain by one transition.
    ///
    /// Numerical problems inside the transition are reported through the
    /// acceptance statistic and the stats, not as errors.
    fn step<R: Rng + ?Sized>(
        &mut self,
        state: &ChainState,
        step_size: f64,
        rng: &mut R,
    ) -> Result<Transition<Self::Stats>>;

    /// Names of the sampler columns written for every draw, e.g. `stepsize__`.
    fn stat_names(&self) -> Vec<String>;

    /// Names of the extra columns written to the diagnostic output.
    fn diagnostic_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A transition kernel combined with dual averaging step size adaptation.
pub struct AdaptiveSampler<K, R> {
    kernel: K,
    rng: R,
    nominal_step_size: f64,
    step_size_jitter: f64,
    adaptation: DualAverage,
    adapting: bool,
}

impl<K: TransitionKernel, R: Rng> AdaptiveSampler<K, R> {
    pub fn new(kernel: K, rng: R) -> Self {
        AdaptiveSampler {
            kernel,
            rng,
            nominal_step_size: 1.,
            step_size_jitter: 0.,
            adaptation: DualAverage::new(DualAverageSettings::default(), 1.),
            adapting: false,
        }
    }

    pub fn set_nominal_stepsize(&mut self, step_size: f64) {
        if step_size > 0. {
            self.nominal_step_size = step_size;
        }
    }

    pub fn nominal_stepsize(&self) -> f64 {
        self.nominal_step_size
    }

    pub fn set_stepsize_jitter(&mut self, jitter: f64) {
        if (0. ..1.).contains(&jitter) {
            self.step_size_jitter = jitter;
        }
    }

    pub fn stepsize_jitter(&self) -> f64 {
        self.step_size_jitter
    }

    pub fn set_max_depth(&mut self, max_depth: u64) {
        if max_depth > 0 {
            self.kernel.set_max_depth(max_depth);
        }
    }

    pub fn stepsize_adaptation(&self) -> &DualAverage {
        &self.adaptation
    }

    pub fn stepsize_adaptation_mut(&mut self) -> &mut DualAverage {
        &mut self.adaptation
    }

    pub fn engage_adaptation(&mut self) {
        self.adapting = true;
    }

    /// Stop adapting and freeze the step size at the averaged iterate.
    ///
    /// If no transition was adapted there is nothing to average and the
    /// nominal step size stays as it is.
    pub fn disengage_adaptation(&mut self) {
        self.adapting = false;
        if self.adaptation.stats().count > 0 {
            self.nominal_step_size = self.adaptation.current_step_size_adapted();
        }
    }

    pub fn is_adapting(&self) -> bool {
        self.adapting
    }

    /// Replace the adaptation state, e.g. with statistics combined across
    /// chains, and continue from the step size it implies.
    pub fn sync_adaptation(&mut self, stats: crate::stepsize::AdaptationStats) {
        self.adaptation.set_stats(stats);
        self.nominal_step_size = self.adaptation.current_step_size();
    }

    /// Run the kernel's step size heuristic from `state` and restart the
    /// adaptation around the step size it picked.
    ///
    /// Without warmup iterations the adapted step size is that pick.
    pub fn init_stepsize(&mut self, state: &ChainState) -> Result<()> {
        self.nominal_step_size =
            self.kernel
                .init_stepsize(state, self.nominal_step_size, &mut self.rng)?;
        self.adaptation.restart(self.nominal_step_size);
        Ok(())
    }

    /// The step size for the next transition, with jitter applied.
    fn sample_stepsize(&mut self) -> f64 {
        let mut step_size = self.nominal_step_size;
        if self.step_size_jitter > 0. {
            let u: f64 = self.rng.random();
            step_size *= 1. + self.step_size_jitter * (2. * u - 1.);
        }
        step_size
    }

    pub fn transition(&mut self, state: &ChainState) -> Result<Transition<K::Stats>> {
        let step_size = self.sample_stepsize();
        let transition = self.kernel.step(state, step_size, &mut self.rng)?;
        if self.adapting {
            self.adaptation.advance(transition.accept_stat);
            self.nominal_step_size = self.adaptation.current_step_size();
        }
        Ok(transition)
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn rng_mut(&mut self) -> &mut R {
        &mut self.rng
    }
}
