//! The adaptive run loop: warmup with step size adaptation, then sampling
//! with a frozen step size.
//!
//! [`SingleChain`] and [`CrossChain`] share everything except what happens
//! at the end of a warmup iteration.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use rand::Rng;

use crate::{
    callbacks::{Interrupt, Logger},
    chain::{AdaptiveSampler, ChainState, TransitionKernel},
    cross_chain::CrossChainCoordinator,
    error::{ErrorCode, NutsError, Result},
    mcmc_writer::McmcWriter,
    model::Model,
    stepsize::AdaptationStats,
    storage::Writer,
};

/// Settings of one run that do not concern the kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunConfig {
    pub num_warmup: u64,
    pub num_samples: u64,
    /// Keep every `num_thin`-th draw.
    pub num_thin: u64,
    /// Write warmup draws to the sample output as well.
    pub save_warmup: bool,
    /// Report progress every `refresh` iterations. Zero disables reporting.
    pub refresh: u64,
    pub random_seed: u64,
    pub chain: u64,
    /// Random initial values are drawn from `[-init_radius, init_radius]`.
    pub init_radius: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_warmup: 1000,
            num_samples: 1000,
            num_thin: 1,
            save_warmup: false,
            refresh: 100,
            random_seed: 0,
            chain: 1,
            init_radius: 2.,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_thin == 0 {
            return Err(NutsError::Config("num_thin must be positive".into()));
        }
        if !(self.init_radius >= 0. && self.init_radius.is_finite()) {
            return Err(NutsError::Config(format!(
                "init_radius must be a non-negative number, got {}",
                self.init_radius
            )));
        }
        Ok(())
    }
}

/// What happens to the adaptation state after a warmup iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WarmupSync {
    /// Continue with the local state.
    Keep,
    /// Continue with the given state instead.
    Replace(AdaptationStats),
    /// Stop the run.
    Stop,
}

/// The part of the run loop that differs between single chain and cross chain
/// warmup.
pub trait RunLoop {
    fn end_of_warmup_iteration(&mut self, local: AdaptationStats) -> WarmupSync;

    /// Called once the chain stops, for whatever reason.
    fn finish(&mut self) {}
}

/// Each chain adapts on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleChain;

impl RunLoop for SingleChain {
    fn end_of_warmup_iteration(&mut self, _local: AdaptationStats) -> WarmupSync {
        WarmupSync::Keep
    }
}

/// The chain waits for its peers after every warmup iteration and continues
/// with the combined adaptation state.
#[derive(Debug, Clone)]
pub struct CrossChain {
    coordinator: Arc<CrossChainCoordinator>,
    chain_idx: usize,
}

impl CrossChain {
    /// Take slot `chain_idx` of `coordinator`.
    ///
    /// An index outside the coordinator's chains cancels it, so that the
    /// other chains do not wait for a slot nobody fills.
    pub fn new(coordinator: Arc<CrossChainCoordinator>, chain_idx: usize) -> Result<Self> {
        if chain_idx >= coordinator.num_chains() {
            coordinator.cancel();
            return Err(NutsError::Config(format!(
                "chain index {} out of range for {} chains",
                chain_idx,
                coordinator.num_chains()
            )));
        }
        Ok(Self {
            coordinator,
            chain_idx,
        })
    }
}

impl RunLoop for CrossChain {
    fn end_of_warmup_iteration(&mut self, local: AdaptationStats) -> WarmupSync {
        match self.coordinator.synchronize(self.chain_idx, local) {
            Some(combined) => WarmupSync::Replace(combined),
            None => WarmupSync::Stop,
        }
    }

    fn finish(&mut self) {
        // Peers must not wait for a chain that is gone.
        self.coordinator.cancel();
    }
}

/// The phase a block of iterations belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Warmup,
    Sampling,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Warmup => "(Warmup)",
            Phase::Sampling => "(Sampling)",
        }
    }
}

/// Whether a block of iterations ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Finished,
    Stopped,
}

/// Everything the transition loop borrows from the caller.
struct Session<'a, 'w, M: ?Sized, I: ?Sized, L: ?Sized, S: ?Sized, D: ?Sized> {
    model: &'a M,
    config: &'a RunConfig,
    interrupt: &'a mut I,
    logger: &'a mut L,
    writer: McmcWriter<'w, S, D>,
}

impl<M, I, L, S, D> Session<'_, '_, M, I, L, S, D>
where
    M: Model,
    I: Interrupt + ?Sized,
    L: Logger + ?Sized,
    S: Writer + ?Sized,
    D: Writer + ?Sized,
{
    fn log_progress(&mut self, iteration: u64, phase: Phase) {
        let total = self.config.num_warmup + self.config.num_samples;
        let width = total.to_string().len();
        let percent = (100 * iteration) / total.max(1);
        self.logger.info(&format!(
            "Iteration: {:>width$} / {} [{:>3}%]  {}",
            iteration,
            total,
            percent,
            phase.label(),
            width = width
        ));
    }

    /// Run `num_iterations` transitions starting at global iteration `start`.
    #[allow(clippy::too_many_arguments)]
    fn generate_transitions<K, R, RL>(
        &mut self,
        sampler: &mut AdaptiveSampler<K, R>,
        state: &mut ChainState,
        run_loop: &mut RL,
        num_iterations: u64,
        start: u64,
        phase: Phase,
        save: bool,
    ) -> Result<Progress>
    where
        K: TransitionKernel,
        R: Rng,
        RL: RunLoop + ?Sized,
    {
        let finish = self.config.num_warmup + self.config.num_samples;
        let refresh = self.config.refresh;

        for m in 0..num_iterations {
            if self.interrupt.stop_requested() {
                self.logger.info("Sampling interrupted, stopping early.");
                return Ok(Progress::Stopped);
            }

            let iteration = start + m + 1;
            if refresh > 0 && (iteration == finish || m == 0 || (m + 1) % refresh == 0) {
                self.log_progress(iteration, phase);
            }

            let transition = sampler.transition(state)?;

            if save && m % self.config.num_thin == 0 {
                self.writer
                    .write_sample_params(sampler.rng_mut(), &transition, self.model)?;
                self.writer.write_diagnostic_params(&transition)?;
            }
            *state = transition.state;

            if phase == Phase::Warmup {
                let local = sampler.stepsize_adaptation().stats();
                match run_loop.end_of_warmup_iteration(local) {
                    WarmupSync::Keep => {}
                    WarmupSync::Replace(stats) => sampler.sync_adaptation(stats),
                    WarmupSync::Stop => {
                        self.logger
                            .warn("Cross-chain adaptation was cancelled, stopping early.");
                        return Ok(Progress::Stopped);
                    }
                }
            }
        }
        Ok(Progress::Finished)
    }
}

/// Run warmup and sampling for one chain.
///
/// Returns [`ErrorCode::Ok`] after a complete run, after an interrupt and
/// when no usable initial step size exists. Errors of the model or the
/// writers are returned as errors.
#[allow(clippy::too_many_arguments)]
pub fn run_adaptive_sampler<K, R, M, RL, I, L, S, D>(
    sampler: &mut AdaptiveSampler<K, R>,
    model: &M,
    initial: Vec<f64>,
    config: &RunConfig,
    run_loop: &mut RL,
    interrupt: &mut I,
    logger: &mut L,
    sample_writer: &mut S,
    diagnostic_writer: &mut D,
) -> Result<ErrorCode>
where
    K: TransitionKernel,
    R: Rng,
    M: Model,
    RL: RunLoop + ?Sized,
    I: Interrupt + ?Sized,
    L: Logger + ?Sized,
    S: Writer + ?Sized,
    D: Writer + ?Sized,
{
    let result = run_phases(
        sampler,
        model,
        initial,
        config,
        run_loop,
        interrupt,
        logger,
        sample_writer,
        diagnostic_writer,
    );
    run_loop.finish();
    result
}

#[allow(clippy::too_many_arguments)]
fn run_phases<K, R, M, RL, I, L, S, D>(
    sampler: &mut AdaptiveSampler<K, R>,
    model: &M,
    initial: Vec<f64>,
    config: &RunConfig,
    run_loop: &mut RL,
    interrupt: &mut I,
    logger: &mut L,
    sample_writer: &mut S,
    diagnostic_writer: &mut D,
) -> Result<ErrorCode>
where
    K: TransitionKernel,
    R: Rng,
    M: Model,
    RL: RunLoop + ?Sized,
    I: Interrupt + ?Sized,
    L: Logger + ?Sized,
    S: Writer + ?Sized,
    D: Writer + ?Sized,
{
    if let Err(err) = config.validate() {
        logger.error(&err.to_string());
        return Err(err);
    }
    let mut state = ChainState::new(initial);

    sampler.engage_adaptation();
    if let Err(err) = sampler.init_stepsize(&state) {
        logger.info("Exception initializing step size.");
        logger.info(&err.to_string());
        return Ok(ErrorCode::Ok);
    }

    let mut session = Session {
        model,
        config,
        interrupt,
        logger,
        writer: McmcWriter::new(sample_writer, diagnostic_writer),
    };
    session.writer.write_sample_names(sampler.kernel(), model)?;
    session.writer.write_diagnostic_names(sampler.kernel(), model)?;

    let start = Instant::now();
    let progress = session.generate_transitions(
        sampler,
        &mut state,
        run_loop,
        config.num_warmup,
        0,
        Phase::Warmup,
        config.save_warmup,
    )?;
    if progress == Progress::Stopped {
        return Ok(ErrorCode::Ok);
    }
    let warmup: Duration = start.elapsed();

    sampler.disengage_adaptation();
    session.writer.write_adapt_finish(sampler.nominal_stepsize())?;

    let start = Instant::now();
    let progress = session.generate_transitions(
        sampler,
        &mut state,
        run_loop,
        config.num_samples,
        config.num_warmup,
        Phase::Sampling,
        true,
    )?;
    if progress == Progress::Stopped {
        return Ok(ErrorCode::Ok);
    }
    let sampling = start.elapsed();

    session
        .writer
        .write_timing(warmup, sampling, &mut *session.logger)?;
    Ok(ErrorCode::Ok)
}
