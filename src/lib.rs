//! Adaptive No-U-Turn sampling with a unit metric.
//!
//! A chain is started by [`hmc_nuts_unit_e_adapt`]: it derives a random
//! number stream from the seed and chain id, searches for an initial point,
//! tunes the step size with dual averaging during warmup and then draws with
//! the step size frozen. [`hmc_nuts_unit_e_adapt_cross_chain`] runs several
//! chains in parallel that share their step size adaptation.
//!
//! Models implement [`Model`], output goes through [`Writer`] implementations
//! and progress through a [`Logger`].

pub(crate) mod callbacks;
pub(crate) mod chain;
pub(crate) mod context;
pub(crate) mod cross_chain;
pub(crate) mod error;
pub(crate) mod initialize;
pub(crate) mod math;
pub(crate) mod mcmc_writer;
pub(crate) mod model;
pub(crate) mod nuts;
pub(crate) mod rng;
pub(crate) mod run;
pub(crate) mod sampler;
pub(crate) mod stepsize;
pub(crate) mod storage;

pub use callbacks::{
    Interrupt, InterruptFn, Level, Logger, MemoryLogger, NoInterrupt, NullLogger, TracingLogger,
};
pub use chain::{AdaptiveSampler, ChainState, KernelStats, Transition, TransitionKernel};
pub use context::{EmptyContext, InitContext};
pub use cross_chain::{AdaptationCombiner, CrossChainCoordinator, MeanCombiner};
pub use error::{ErrorCode, NutsError};
pub use initialize::{initialize, MAX_INIT_TRIES};
pub use mcmc_writer::McmcWriter;
pub use model::{LogpError, Model};
pub use nuts::{NutsStats, UnitNuts};
pub use rng::{create_rng, ChainRng};
pub use run::{run_adaptive_sampler, CrossChain, RunConfig, RunLoop, SingleChain, WarmupSync};
pub use sampler::{
    hmc_nuts_unit_e_adapt, hmc_nuts_unit_e_adapt_cross_chain, AdaptSettings, ChainCallbacks,
    RunMode,
};
pub use stepsize::{AdaptationStats, DualAverage, DualAverageSettings};
pub use storage::{ArrowWriter, CsvConfig, CsvWriter, MemoryWriter, NullWriter, Writer};
