//! Core abstractions for the models we sample from.
//!
//! A model only needs to evaluate its unnormalized log density and gradient
//! on the unconstrained parameter space. Everything else has defaults.

use rand::Rng;

/// Errors that happen when we evaluate the logp and gradient function
pub trait LogpError: std::error::Error + Send + Sync + 'static {
    /// Unrecoverable errors during logp computation stop sampling,
    /// recoverable errors are seen as divergences.
    fn is_recoverable(&self) -> bool;
}

/// A differentiable posterior density over an unconstrained parameter space.
///
/// Models are shared between chains running on different threads, so
/// evaluation takes `&self`.
pub trait Model: Send + Sync {
    type LogpError: LogpError;

    /// The number of unconstrained parameters.
    fn dim(&self) -> usize;

    /// Compute the unnormalized log probability density and its gradient.
    ///
    /// Non-finite return values are allowed; the initializer treats them as a
    /// rejected point and the kernel as a divergence.
    fn logp(&self, position: &[f64], gradient: &mut [f64]) -> Result<f64, Self::LogpError>;

    /// Names of the unconstrained parameters, used to look up initial values
    /// and to label diagnostic output.
    fn param_names(&self) -> Vec<String> {
        (1..=self.dim()).map(|i| format!("x.{}", i)).collect()
    }

    /// Names of the values produced by [`Model::write_array`].
    fn output_names(&self) -> Vec<String> {
        self.param_names()
    }

    /// Map an unconstrained draw to the values stored in the sample output.
    fn write_array<R: Rng + ?Sized>(
        &self,
        _rng: &mut R,
        position: &[f64],
        out: &mut Vec<f64>,
    ) -> Result<(), Self::LogpError> {
        out.clear();
        out.extend_from_slice(position);
        Ok(())
    }
}

impl<M: Model> Model for &M {
    type LogpError = M::LogpError;

    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn logp(&self, position: &[f64], gradient: &mut [f64]) -> Result<f64, Self::LogpError> {
        (**self).logp(position, gradient)
    }

    fn param_names(&self) -> Vec<String> {
        (**self).param_names()
    }

    fn output_names(&self) -> Vec<String> {
        (**self).output_names()
    }

    fn write_array<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        position: &[f64],
        out: &mut Vec<f64>,
    ) -> Result<(), Self::LogpError> {
        (**self).write_array(rng, position, out)
    }
}
