//! Search for a starting point of a chain.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::{
    callbacks::Logger,
    context::InitContext,
    error::{NutsError, Result},
    math::all_finite,
    model::{LogpError, Model},
    storage::Writer,
};

/// Number of random points we try before giving up.
pub const MAX_INIT_TRIES: usize = 100;

/// Consecutive rejections after which a warning is logged.
const WARN_AFTER_REJECTIONS: usize = 10;

/// Find an initial value in the unconstrained space.
///
/// Coordinates present in `context` are used verbatim. Missing coordinates are
/// drawn uniformly from `[-init_radius, init_radius]` if `allow_random_init`
/// is set, and are zero otherwise. A point is accepted once the log density
/// and its gradient are both finite. If no random draw is involved there is
/// only a single attempt.
///
/// The accepted point is written to `init_writer`.
pub fn initialize<M, C, R, L, W>(
    model: &M,
    context: &C,
    rng: &mut R,
    init_radius: f64,
    allow_random_init: bool,
    logger: &mut L,
    init_writer: &mut W,
) -> Result<Vec<f64>>
where
    M: Model,
    C: InitContext + ?Sized,
    R: Rng + ?Sized,
    L: Logger + ?Sized,
    W: Writer + ?Sized,
{
    let names = model.param_names();
    let dim = model.dim();
    if names.len() != dim {
        return Err(NutsError::Config(format!(
            "model reports {} parameter names for dimension {}",
            names.len(),
            dim
        )));
    }

    let given: Vec<Option<f64>> = names.iter().map(|name| context.value(name)).collect();
    let is_random = allow_random_init && init_radius > 0. && given.iter().any(Option::is_none);
    let attempts = if is_random { MAX_INIT_TRIES } else { 1 };

    let mut position = vec![0f64; dim];
    let mut gradient = vec![0f64; dim];
    let mut rejected = 0;

    for _ in 0..attempts {
        for (x, value) in position.iter_mut().zip(given.iter()) {
            *x = match value {
                Some(value) => *value,
                None if is_random => init_radius * (2. * rng.random::<f64>() - 1.),
                None => 0.,
            };
        }

        let start = Instant::now();
        let evaluated = model.logp(&position, &mut gradient);
        let elapsed = start.elapsed();

        let usable = match evaluated {
            Ok(logp) if !logp.is_finite() => {
                logger.info("Rejecting initial value:");
                logger.info("  Log probability evaluates to log(0), i.e. negative infinity.");
                logger.info("  Sampling cannot start from this initial value.");
                false
            }
            Ok(_) if !all_finite(&gradient) => {
                logger.info("Gradient evaluated at the initial value is not finite.");
                false
            }
            Ok(_) => true,
            Err(err) if err.is_recoverable() => {
                logger.info("Rejecting initial value:");
                logger.info("  Error evaluating the log probability at the initial value.");
                logger.info(&format!("  {}", err));
                false
            }
            Err(err) => return Err(NutsError::LogpFailure(Box::new(err))),
        };

        if !usable {
            rejected += 1;
            if rejected == WARN_AFTER_REJECTIONS {
                logger.warn(&format!(
                    "{} initial values rejected so far, {} attempts left",
                    rejected,
                    attempts - rejected
                ));
            }
            continue;
        }

        log_timing_hint(elapsed, logger);

        init_writer.write_names(&names)?;
        init_writer.write_values(&position)?;
        return Ok(position);
    }

    let err = NutsError::Initialization {
        radius: init_radius,
        attempts,
    };
    logger.error(&err.to_string());
    logger.error(
        "Try specifying initial values, reducing ranges of constrained values, \
         or reparameterizing the model.",
    );
    Err(err)
}

/// Tell the user what to expect from the duration of one gradient
/// evaluation.
fn log_timing_hint<L: Logger + ?Sized>(elapsed: Duration, logger: &mut L) {
    let seconds = elapsed.as_secs_f64();

    logger.info("");
    logger.info(&format!("Gradient evaluation took {:.2e} seconds", seconds));
    logger.info(&format!(
        "1000 transitions using 10 leapfrog steps per transition would take {:.2e} seconds.",
        seconds * 1000. * 10.
    ));
    logger.info("Adjust your expectations accordingly!");
    logger.info("");
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;
    use rand::Rng;

    use super::*;
    use crate::{
        callbacks::{Level, MemoryLogger},
        context::EmptyContext,
        model::test_logps::{HalfSpaceLogp, NormalLogp, UndefinedLogp},
        rng::create_rng,
        storage::MemoryWriter,
    };

    fn full_context() -> HashMap<String, f64> {
        [("x.1", 0.25), ("x.2", -1.5), ("x.3", 3.)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn full_context_with_zero_radius_is_used_verbatim() {
        let model = NormalLogp { dim: 3, mu: 0. };
        let mut rng = create_rng(42, 1);
        let mut untouched = rng.clone();
        let mut logger = MemoryLogger::new();
        let mut writer = MemoryWriter::new();

        let init = initialize(
            &model,
            &full_context(),
            &mut rng,
            0.,
            true,
            &mut logger,
            &mut writer,
        )
        .unwrap();

        assert_eq!(init, vec![0.25, -1.5, 3.]);
        // No random draws happened.
        assert_eq!(rng.random::<u64>(), untouched.random::<u64>());
        assert_eq!(writer.names, vec!["x.1", "x.2", "x.3"]);
        assert_eq!(writer.rows, vec![vec![0.25, -1.5, 3.]]);
        assert!(logger.contains(Level::Info, "Gradient evaluation took"));
    }

    #[test]
    fn random_init_stays_in_radius() {
        let model = NormalLogp { dim: 20, mu: 0. };
        let mut rng = create_rng(3, 2);
        let init = initialize(
            &model,
            &EmptyContext,
            &mut rng,
            0.5,
            true,
            &mut MemoryLogger::new(),
            &mut MemoryWriter::new(),
        )
        .unwrap();
        assert_eq!(init.len(), 20);
        assert!(init.iter().all(|x| x.abs() <= 0.5));
        assert!(init.iter().any(|&x| x != 0.));
    }

    #[test]
    fn partial_context_keeps_given_values() {
        let model = NormalLogp { dim: 3, mu: 0. };
        let context: HashMap<String, f64> = [("x.2".to_string(), 7.)].into_iter().collect();
        let init = initialize(
            &model,
            &context,
            &mut create_rng(0, 0),
            2.,
            true,
            &mut MemoryLogger::new(),
            &mut MemoryWriter::new(),
        )
        .unwrap();
        assert_eq!(init[1], 7.);
    }

    #[test]
    fn rejected_points_are_retried() {
        // Each draw lands in the positive orthant with probability 1/4.
        let model = HalfSpaceLogp { dim: 2 };
        let mut logger = MemoryLogger::new();
        let init = initialize(
            &model,
            &EmptyContext,
            &mut create_rng(11, 0),
            2.,
            true,
            &mut logger,
            &mut MemoryWriter::new(),
        )
        .unwrap();
        assert!(init.iter().all(|&x| x > 0.));
    }

    #[test]
    fn zero_radius_outside_support_fails_once() {
        let model = HalfSpaceLogp { dim: 2 };
        let mut logger = MemoryLogger::new();
        let mut writer = MemoryWriter::new();
        let err = initialize(
            &model,
            &EmptyContext,
            &mut create_rng(1, 0),
            0.,
            true,
            &mut logger,
            &mut writer,
        )
        .unwrap_err();
        assert!(matches!(err, NutsError::Initialization { attempts: 1, .. }));
        assert!(logger.contains(Level::Info, "negative infinity"));
        assert_eq!(logger.count(Level::Warn), 0);
        assert_eq!(writer.num_rows(), 0);
    }

    #[test]
    fn exhausted_attempts_are_an_error() {
        let model = UndefinedLogp { dim: 2 };
        let mut logger = MemoryLogger::new();
        let err = initialize(
            &model,
            &EmptyContext,
            &mut create_rng(1, 0),
            2.,
            true,
            &mut logger,
            &mut MemoryWriter::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            NutsError::Initialization {
                attempts: MAX_INIT_TRIES,
                ..
            }
        ));
        assert_eq!(err.code(), crate::ErrorCode::DataErr);
        assert!(logger.contains(Level::Error, "failed after 100 attempts"));
        assert_eq!(logger.count(Level::Warn), 1);
        assert!(logger.contains(
            Level::Warn,
            "10 initial values rejected so far, 90 attempts left"
        ));
    }
}
