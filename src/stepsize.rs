//! Dual averaging step size adaptation.
//!
//! During warmup the controller proposes `exp(log_step)`, a noisy iterate
//! that explores around the target acceptance statistic. When warmup ends
//! the step size is fixed to `exp(log_step_adapted)`, the weighted average
//! of all iterates.

/// Settings for step size adaptation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DualAverageSettings {
    /// Target acceptance statistic.
    pub delta: f64,
    /// Regularization scale.
    pub gamma: f64,
    /// Relaxation exponent of the averaging weights.
    pub kappa: f64,
    /// Iteration offset.
    pub t0: f64,
}

impl Default for DualAverageSettings {
    fn default() -> DualAverageSettings {
        DualAverageSettings {
            delta: 0.8,
            gamma: 0.05,
            kappa: 0.75,
            t0: 10.,
        }
    }
}

impl DualAverageSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.delta > 0. && self.delta < 1.) {
            return Err(format!("delta must be in (0, 1), got {}", self.delta));
        }
        if !(self.gamma > 0. && self.gamma.is_finite()) {
            return Err(format!("gamma must be positive, got {}", self.gamma));
        }
        if !(self.kappa > 0. && self.kappa <= 1.) {
            return Err(format!("kappa must be in (0, 1], got {}", self.kappa));
        }
        if !(self.t0 > 0. && self.t0.is_finite()) {
            return Err(format!("t0 must be positive, got {}", self.t0));
        }
        Ok(())
    }
}

/// The accumulators of the controller.
///
/// This is what cooperating chains exchange during cross-chain warmup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptationStats {
    pub count: u64,
    pub hbar: f64,
    pub log_step: f64,
    pub log_step_adapted: f64,
}

#[derive(Debug, Clone)]
pub struct DualAverage {
    log_step: f64,
    log_step_adapted: f64,
    hbar: f64,
    mu: f64,
    count: u64,
    settings: DualAverageSettings,
}

impl DualAverage {
    pub fn new(settings: DualAverageSettings, initial_step: f64) -> DualAverage {
        DualAverage {
            log_step: initial_step.ln(),
            log_step_adapted: initial_step.ln(),
            hbar: 0.,
            mu: (10. * initial_step).ln(),
            count: 0,
            settings,
        }
    }

    /// Feed the acceptance statistic of the latest transition.
    pub fn advance(&mut self, accept_stat: f64) {
        let accept_stat = accept_stat.min(1.);
        self.count += 1;
        let count = self.count as f64;

        let w = 1. / (count + self.settings.t0);
        self.hbar = (1. - w) * self.hbar + w * (self.settings.delta - accept_stat);
        self.log_step = self.mu - self.hbar * count.sqrt() / self.settings.gamma;
        let mk = count.powf(-self.settings.kappa);
        self.log_step_adapted = mk * self.log_step + (1. - mk) * self.log_step_adapted;
    }

    /// The step size to use for the next warmup transition.
    pub fn current_step_size(&self) -> f64 {
        self.log_step.exp()
    }

    /// The step size to use once adaptation is finished.
    pub fn current_step_size_adapted(&self) -> f64 {
        self.log_step_adapted.exp()
    }

    /// Forget everything learned so far and restart around `initial_step`.
    pub fn restart(&mut self, initial_step: f64) {
        self.log_step = initial_step.ln();
        self.log_step_adapted = initial_step.ln();
        self.hbar = 0.;
        self.count = 0;
    }

    pub fn set_mu(&mut self, mu: f64) {
        self.mu = mu;
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn settings(&self) -> &DualAverageSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: DualAverageSettings) {
        self.settings = settings;
    }

    pub fn stats(&self) -> AdaptationStats {
        AdaptationStats {
            count: self.count,
            hbar: self.hbar,
            log_step: self.log_step,
            log_step_adapted: self.log_step_adapted,
        }
    }

    pub fn set_stats(&mut self, stats: AdaptationStats) {
        self.count = stats.count;
        self.hbar = stats.hbar;
        self.log_step = stats.log_step;
        self.log_step_adapted = stats.log_step_adapted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    fn settings() -> DualAverageSettings {
        DualAverageSettings {
            delta: 0.8,
            gamma: 0.05,
            kappa: 0.75,
            t0: 10.,
        }
    }

    #[test]
    fn constant_target_acceptance_is_a_fixed_point() {
        let mut adapt = DualAverage::new(settings(), 0.5);
        let mut last_distance = f64::INFINITY;
        for _ in 0..1000 {
            adapt.advance(0.8);
            assert_eq!(adapt.stats().hbar, 0.);
            let distance = (adapt.stats().log_step_adapted - adapt.mu()).abs();
            assert!(distance <= last_distance);
            last_distance = distance;
        }
        assert_abs_diff_eq!(adapt.current_step_size(), 5., epsilon = 1e-12);
        assert_abs_diff_eq!(adapt.current_step_size_adapted(), 5., epsilon = 1e-12);
        assert_eq!(adapt.stats().count, 1000);
    }

    #[test]
    fn converges_on_synthetic_acceptance_curve() {
        // Acceptance falls off as exp(-eps), so the target 0.8 is hit at -ln(0.8).
        let target = -(0.8f64).ln();
        let mut adapt = DualAverage::new(settings(), 1.);
        for _ in 0..1000 {
            let eps = adapt.current_step_size();
            adapt.advance((-eps).exp());
        }
        assert_abs_diff_eq!(adapt.current_step_size_adapted(), target, epsilon = 0.02);
        assert!(adapt.stats().hbar.abs() < 0.01);
    }

    #[test]
    fn first_update_matches_closed_form() {
        let mut adapt = DualAverage::new(settings(), 1.);
        adapt.advance(0.3);
        let hbar = (0.8 - 0.3) / 11.;
        let log_step = (10f64).ln() - hbar / 0.05;
        let stats = adapt.stats();
        assert_abs_diff_eq!(stats.hbar, hbar, epsilon = 1e-14);
        assert_abs_diff_eq!(stats.log_step, log_step, epsilon = 1e-12);
        // The first averaging weight is one.
        assert_abs_diff_eq!(stats.log_step_adapted, log_step, epsilon = 1e-12);
    }

    #[test]
    fn acceptance_above_one_is_clamped() {
        let mut a = DualAverage::new(settings(), 1.);
        let mut b = DualAverage::new(settings(), 1.);
        a.advance(1.);
        b.advance(3.);
        assert_eq!(a.stats(), b.stats());
    }

    #[test]
    fn restart_keeps_mu() {
        let mut adapt = DualAverage::new(settings(), 1.);
        adapt.set_mu(0.5);
        adapt.advance(0.1);
        adapt.restart(2.);
        assert_eq!(adapt.stats().count, 0);
        assert_eq!(adapt.stats().hbar, 0.);
        assert_eq!(adapt.mu(), 0.5);
        assert_abs_diff_eq!(adapt.current_step_size(), 2., epsilon = 1e-12);
    }

    #[test]
    fn invalid_settings() {
        assert!(settings().validate().is_ok());
        let bad = DualAverageSettings {
            delta: 1.,
            ..settings()
        };
        assert!(bad.validate().unwrap_err().contains("delta"));
        let bad = DualAverageSettings {
            kappa: 0.,
            ..settings()
        };
        assert!(bad.validate().unwrap_err().contains("kappa"));
    }
}
