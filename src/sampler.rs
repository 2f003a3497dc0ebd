//! Entry points that set up and run NUTS chains with a unit metric and
//! step size adaptation.

use std::{
    fmt::Debug,
    sync::{mpsc::channel, Arc},
};

use anyhow::{Context, Result};
use itertools::Itertools;
use rayon::ThreadPoolBuilder;

use crate::{
    callbacks::{Interrupt, Logger},
    chain::AdaptiveSampler,
    context::InitContext,
    cross_chain::CrossChainCoordinator,
    error::{ErrorCode, NutsError},
    initialize::initialize,
    model::Model,
    nuts::UnitNuts,
    rng::create_rng,
    run::{run_adaptive_sampler, CrossChain, RunConfig, RunLoop, SingleChain},
    stepsize::DualAverageSettings,
    storage::Writer,
};

/// Settings for the kernel and its step size adaptation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptSettings {
    /// The initial step size.
    pub stepsize: f64,
    /// Every step size is multiplied by a uniform draw from
    /// `[1 - stepsize_jitter, 1 + stepsize_jitter]`.
    pub stepsize_jitter: f64,
    /// The maximum tree depth. The number of leapfrog steps
    /// is smaller than 2 ^ max_depth.
    pub max_depth: u64,
    pub dual_average: DualAverageSettings,
}

impl Default for AdaptSettings {
    fn default() -> Self {
        Self {
            stepsize: 1.,
            stepsize_jitter: 0.,
            max_depth: 10,
            dual_average: DualAverageSettings::default(),
        }
    }
}

impl AdaptSettings {
    pub fn validate(&self) -> std::result::Result<(), NutsError> {
        if !(self.stepsize > 0. && self.stepsize.is_finite()) {
            return Err(NutsError::Config(format!(
                "stepsize must be positive, got {}",
                self.stepsize
            )));
        }
        if !(0. ..1.).contains(&self.stepsize_jitter) {
            return Err(NutsError::Config(format!(
                "stepsize_jitter must be in [0, 1), got {}",
                self.stepsize_jitter
            )));
        }
        if self.max_depth == 0 {
            return Err(NutsError::Config("max_depth must be positive".into()));
        }
        self.dual_average.validate().map_err(NutsError::Config)
    }
}

/// How a chain adapts its step size during warmup.
#[derive(Debug, Clone, Default)]
pub enum RunMode {
    #[default]
    SingleChain,
    /// Share adaptation with the other chains of `coordinator`, using slot
    /// `chain_idx`.
    CrossChain {
        coordinator: Arc<CrossChainCoordinator>,
        chain_idx: usize,
    },
}

impl RunMode {
    fn run_loop(self) -> std::result::Result<Box<dyn RunLoop>, NutsError> {
        Ok(match self {
            RunMode::SingleChain => Box::new(SingleChain),
            RunMode::CrossChain {
                coordinator,
                chain_idx,
            } => Box::new(CrossChain::new(coordinator, chain_idx)?),
        })
    }
}

/// Run one chain of NUTS with a unit metric and step size adaptation.
///
/// Configuration problems are logged and returned before anything is drawn.
/// An initialization failure is returned as
/// [`NutsError::Initialization`], whose code is [`ErrorCode::DataErr`].
#[allow(clippy::too_many_arguments)]
pub fn hmc_nuts_unit_e_adapt<M, C, I, L, W1, W2, W3>(
    model: &M,
    init: &C,
    config: &RunConfig,
    settings: &AdaptSettings,
    mode: RunMode,
    interrupt: &mut I,
    logger: &mut L,
    init_writer: &mut W1,
    sample_writer: &mut W2,
    diagnostic_writer: &mut W3,
) -> std::result::Result<ErrorCode, NutsError>
where
    M: Model,
    C: InitContext + ?Sized,
    I: Interrupt + ?Sized,
    L: Logger + ?Sized,
    W1: Writer + ?Sized,
    W2: Writer + ?Sized,
    W3: Writer + ?Sized,
{
    let mut run_loop = match mode.run_loop() {
        Ok(run_loop) => run_loop,
        Err(err) => {
            logger.error(&err.to_string());
            return Err(err);
        }
    };

    let checked = config.validate().and_then(|()| settings.validate());
    if let Err(err) = checked {
        logger.error(&err.to_string());
        run_loop.finish();
        return Err(err);
    }

    let mut rng = create_rng(config.random_seed, config.chain);

    let initial = match initialize(
        model,
        init,
        &mut rng,
        config.init_radius,
        true,
        logger,
        init_writer,
    ) {
        Ok(initial) => initial,
        Err(err) => {
            run_loop.finish();
            return Err(err);
        }
    };

    let mut sampler = AdaptiveSampler::new(UnitNuts::new(model), rng);
    sampler.set_nominal_stepsize(settings.stepsize);
    sampler.set_stepsize_jitter(settings.stepsize_jitter);
    sampler.set_max_depth(settings.max_depth);

    let adaptation = sampler.stepsize_adaptation_mut();
    adaptation.set_settings(settings.dual_average);
    adaptation.set_mu((10. * settings.stepsize).ln());
    adaptation.restart(settings.stepsize);

    run_adaptive_sampler(
        &mut sampler,
        model,
        initial,
        config,
        &mut *run_loop,
        interrupt,
        logger,
        sample_writer,
        diagnostic_writer,
    )
}

/// The callbacks of one chain in a multi-chain run.
pub struct ChainCallbacks {
    pub interrupt: Box<dyn Interrupt>,
    pub logger: Box<dyn Logger>,
    pub init_writer: Box<dyn Writer>,
    pub sample_writer: Box<dyn Writer>,
    pub diagnostic_writer: Box<dyn Writer>,
}

impl Debug for ChainCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainCallbacks").finish_non_exhaustive()
    }
}

/// Run `num_chains` chains in parallel that share their step size
/// adaptation during warmup.
///
/// Chain `k` uses the chain id `config.chain + k`, which selects its random
/// number stream. `callbacks` is called once per chain id before sampling
/// starts. If a chain stops early, the others stop at their next warmup
/// iteration instead of waiting for it.
pub fn hmc_nuts_unit_e_adapt_cross_chain<M, C, F>(
    model: &M,
    init: &C,
    num_chains: usize,
    config: &RunConfig,
    settings: &AdaptSettings,
    coordinator: Option<Arc<CrossChainCoordinator>>,
    callbacks: F,
) -> Result<ErrorCode>
where
    M: Model,
    C: InitContext + Sync + ?Sized,
    F: Fn(u64) -> Result<ChainCallbacks> + Sync,
{
    if num_chains == 0 {
        anyhow::bail!(NutsError::Config("num_chains must be positive".into()));
    }
    let coordinator =
        coordinator.unwrap_or_else(|| Arc::new(CrossChainCoordinator::new(num_chains)));
    if coordinator.num_chains() != num_chains {
        anyhow::bail!(NutsError::Config(format!(
            "coordinator expects {} chains, got {}",
            coordinator.num_chains(),
            num_chains
        )));
    }

    let mut chain_callbacks = Vec::with_capacity(num_chains);
    for idx in 0..num_chains {
        let chain = config.chain + idx as u64;
        let cbs = callbacks(chain)
            .with_context(|| format!("Could not create callbacks for chain {}", chain))?;
        chain_callbacks.push(cbs);
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(num_chains)
        .thread_name(|i| format!("nuts-chain-{}", i))
        .build()
        .context("Could not start thread pool")?;

    let (results_tx, results_rx) = channel();
    let coordinator = &coordinator;

    pool.scope_fifo(move |scope| {
        for (idx, mut cbs) in chain_callbacks.into_iter().enumerate() {
            let results = results_tx.clone();
            scope.spawn_fifo(move |_| {
                let chain_config = RunConfig {
                    chain: config.chain + idx as u64,
                    ..*config
                };
                let mode = RunMode::CrossChain {
                    coordinator: coordinator.clone(),
                    chain_idx: idx,
                };
                let result = hmc_nuts_unit_e_adapt(
                    model,
                    init,
                    &chain_config,
                    settings,
                    mode,
                    &mut *cbs.interrupt,
                    &mut *cbs.logger,
                    &mut *cbs.init_writer,
                    &mut *cbs.sample_writer,
                    &mut *cbs.diagnostic_writer,
                );
                let result = result.map_err(|source| NutsError::ChainFailed {
                    chain: chain_config.chain,
                    source: Box::new(source),
                });
                // The receiver outlives the scope.
                let _ = results.send((idx, result));
            });
        }
        drop(results_tx);
    });

    let results = results_rx
        .into_iter()
        .sorted_by_key(|(idx, _)| *idx)
        .map(|(_, result)| result)
        .collect_vec();

    if results.len() != num_chains {
        anyhow::bail!("Only {} of {} chains reported back", results.len(), num_chains);
    }

    let mut code = ErrorCode::Ok;
    for result in results {
        match result {
            Ok(ErrorCode::Ok) => {}
            Ok(other) => code = other,
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Cross-chain sampling with {} chains failed", num_chains)
                })
            }
        }
    }
    Ok(code)
}
