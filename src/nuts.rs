//! No-U-Turn transitions with a unit (identity) mass matrix.
//!
//! Trajectories are built by repeated doubling in a random direction, the
//! draw is chosen by multinomial sampling over the trajectory, and the
//! generalized no-U-turn criterion is checked across every merge.

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::{
    chain::{ChainState, KernelStats, Transition, TransitionKernel},
    error::{NutsError, Result},
    math::{all_finite, axpy, axpy_out, dot, logaddexp},
    model::{LogpError, Model},
};

const ACCEPTANCE_TARGET_LOG: f64 = -0.22314355131420976; // ln(0.8)
const MAX_STEP_SIZE: f64 = 1e7;

#[derive(Debug, Copy, Clone)]
enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.,
            Direction::Backward => -1.,
        }
    }
}

/// A point in phase space.
#[derive(Debug, Clone)]
struct Point {
    q: Box<[f64]>,
    p: Box<[f64]>,
    grad: Box<[f64]>,
    potential_energy: f64,
    kinetic_energy: f64,
    idx_in_trajectory: i64,
}

impl Point {
    fn energy(&self) -> f64 {
        self.potential_energy + self.kinetic_energy
    }

    fn logp(&self) -> f64 {
        -self.potential_energy
    }
}

/// Running mean of the leapfrog acceptance probabilities of one trajectory.
#[derive(Debug, Default)]
struct AcceptanceCollector {
    sum: f64,
    count: u64,
}

impl AcceptanceCollector {
    fn register_leapfrog(&mut self, initial_energy: f64, end: Option<&Point>) {
        match end {
            Some(end) => self.sum += (initial_energy - end.energy()).min(0.).exp(),
            None => self.sum += 0.,
        }
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Information about a draw, exported as part of the sampler stats
#[derive(Debug, Clone)]
pub struct NutsStats {
    pub step_size: f64,
    /// The depth of the trajectory that this point was sampled from
    pub depth: u64,
    pub n_leapfrog: u64,
    pub diverging: bool,
    /// Whether the trajectory was terminated because it reached
    /// the maximum tree depth.
    pub reached_maxdepth: bool,
    pub energy: f64,
    pub momentum: Box<[f64]>,
    pub gradient: Box<[f64]>,
}

impl KernelStats for NutsStats {
    fn write_stats(&self, out: &mut Vec<f64>) {
        out.push(self.step_size);
        out.push(self.depth as f64);
        out.push(self.n_leapfrog as f64);
        out.push(if self.diverging { 1. } else { 0. });
        out.push(self.energy);
    }

    fn write_diagnostics(&self, out: &mut Vec<f64>) {
        out.extend_from_slice(&self.momentum);
        out.extend_from_slice(&self.gradient);
    }
}

/// The outcome of a leapfrog step that did not fail irrecoverably.
enum Leapfrog {
    Ok(Point),
    Divergence,
}

/// A part of the trajectory tree during NUTS sampling.
struct NutsTree {
    /// The left position of the tree.
    ///
    /// The left side always has the smaller index_in_trajectory.
    /// Leapfrogs in backward direction will replace the left.
    left: Point,
    right: Point,

    /// A draw from the trajectory between left and right using
    /// multinomial sampling.
    draw: Point,
    /// Sum of the momenta of all points in the tree.
    p_sum: Box<[f64]>,
    log_size: f64,
    depth: u64,

    /// A tree is the main tree if it contains the initial point
    /// of the trajectory.
    is_main: bool,
}

enum ExtendResult {
    /// The tree extension succeeded properly, and the termination
    /// criterion was not reached.
    Ok(NutsTree),
    /// Tree extension succeeded and the termination criterion
    /// was reached.
    Turning(NutsTree),
    /// A divergence happend during tree extension.
    Diverging(NutsTree),
}

/// Everything a trajectory needs besides the tree itself.
struct Trajectory<'a, M: Model> {
    kernel: &'a UnitNuts<M>,
    step_size: f64,
    initial_energy: f64,
    collector: AcceptanceCollector,
}

impl<M: Model> Trajectory<'_, M> {
    fn leapfrog(&mut self, start: &Point, direction: Direction) -> Result<Leapfrog> {
        let epsilon = direction.sign() * self.step_size;
        let end = self.kernel.leapfrog(start, epsilon)?;
        let end = end.filter(|end| {
            let energy_error = end.energy() - self.initial_energy;
            energy_error.is_finite() && energy_error.abs() <= self.kernel.max_energy_error
        });
        self.collector
            .register_leapfrog(self.initial_energy, end.as_ref());
        Ok(match end {
            Some(mut end) => {
                end.idx_in_trajectory = start.idx_in_trajectory + direction.sign() as i64;
                Leapfrog::Ok(end)
            }
            None => Leapfrog::Divergence,
        })
    }
}

fn is_turning(left_tree: &NutsTree, right_tree: &NutsTree, p_sum: &[f64]) -> bool {
    fn uturn(rho: &[f64], minus: &[f64], plus: &[f64]) -> bool {
        dot(rho, minus) <= 0. || dot(rho, plus) <= 0.
    }

    if uturn(p_sum, &left_tree.left.p, &right_tree.right.p) {
        return true;
    }

    let mut rho: Box<[f64]> = left_tree.p_sum.clone();
    axpy(&right_tree.left.p, &mut rho, 1.);
    if uturn(&rho, &left_tree.left.p, &right_tree.left.p) {
        return true;
    }

    let mut rho: Box<[f64]> = right_tree.p_sum.clone();
    axpy(&left_tree.right.p, &mut rho, 1.);
    uturn(&rho, &left_tree.right.p, &right_tree.right.p)
}

impl NutsTree {
    fn new(point: Point) -> NutsTree {
        NutsTree {
            p_sum: point.p.clone(),
            right: point.clone(),
            left: point.clone(),
            draw: point,
            depth: 0,
            log_size: 0.,
            is_main: true,
        }
    }

    fn extend<R, M>(
        mut self,
        rng: &mut R,
        trajectory: &mut Trajectory<'_, M>,
        direction: Direction,
    ) -> Result<ExtendResult>
    where
        R: Rng + ?Sized,
        M: Model,
    {
        let mut other = match self.single_step(trajectory, direction)? {
            Some(tree) => tree,
            None => return Ok(ExtendResult::Diverging(self)),
        };

        while other.depth < self.depth {
            other = match other.extend(rng, trajectory, direction)? {
                ExtendResult::Ok(tree) => tree,
                ExtendResult::Turning(_) => {
                    return Ok(ExtendResult::Turning(self));
                }
                ExtendResult::Diverging(_) => {
                    return Ok(ExtendResult::Diverging(self));
                }
            };
        }

        let mut p_sum = self.p_sum.clone();
        axpy(&other.p_sum, &mut p_sum, 1.);

        let turning = match direction {
            Direction::Forward => is_turning(&self, &other, &p_sum),
            Direction::Backward => is_turning(&other, &self, &p_sum),
        };

        self.merge_into(other, p_sum, rng, direction);

        if turning {
            Ok(ExtendResult::Turning(self))
        } else {
            Ok(ExtendResult::Ok(self))
        }
    }

    fn merge_into<R: Rng + ?Sized>(
        &mut self,
        other: NutsTree,
        p_sum: Box<[f64]>,
        rng: &mut R,
        direction: Direction,
    ) {
        assert!(self.depth == other.depth);
        assert!(self.left.idx_in_trajectory <= self.right.idx_in_trajectory);
        match direction {
            Direction::Forward => {
                self.right = other.right;
            }
            Direction::Backward => {
                self.left = other.left;
            }
        }
        let log_size = logaddexp(self.log_size, other.log_size);

        let self_log_size = if self.is_main {
            assert!(self.left.idx_in_trajectory <= 0);
            assert!(self.right.idx_in_trajectory >= 0);
            self.log_size
        } else {
            log_size
        };

        if other.log_size >= self_log_size {
            self.draw = other.draw;
        } else {
            let prob = (other.log_size - self_log_size).exp();
            if prob.is_finite() && rng.random_bool(prob.clamp(0., 1.)) {
                self.draw = other.draw;
            }
        }

        self.depth += 1;
        self.log_size = log_size;
        self.p_sum = p_sum;
    }

    fn single_step<M: Model>(
        &self,
        trajectory: &mut Trajectory<'_, M>,
        direction: Direction,
    ) -> Result<Option<NutsTree>> {
        let start = match direction {
            Direction::Forward => &self.right,
            Direction::Backward => &self.left,
        };
        let end = match trajectory.leapfrog(start, direction)? {
            Leapfrog::Ok(end) => end,
            Leapfrog::Divergence => return Ok(None),
        };

        let log_size = trajectory.initial_energy - end.energy();
        Ok(Some(NutsTree {
            p_sum: end.p.clone(),
            right: end.clone(),
            left: end.clone(),
            draw: end,
            depth: 0,
            log_size,
            is_main: false,
        }))
    }
}

/// NUTS with an identity mass matrix.
pub struct UnitNuts<M: Model> {
    model: M,
    max_depth: u64,
    max_energy_error: f64,
    /// The last point we returned, reused if the next step starts there.
    current: Option<Point>,
}

impl<M: Model> UnitNuts<M> {
    pub fn new(model: M) -> Self {
        UnitNuts {
            model,
            max_depth: 10,
            max_energy_error: 1000.,
            current: None,
        }
    }

    /// Evaluate the density. `Ok(None)` means the point is unusable but
    /// sampling may continue.
    fn evaluate(&self, q: &[f64], grad: &mut [f64]) -> Result<Option<f64>> {
        match self.model.logp(q, grad) {
            Ok(logp) if logp.is_finite() && all_finite(grad) => Ok(Some(logp)),
            Ok(_) => Ok(None),
            Err(err) if err.is_recoverable() => Ok(None),
            Err(err) => Err(NutsError::LogpFailure(Box::new(err))),
        }
    }

    fn init_point(&self, position: &[f64]) -> Result<Point> {
        let dim = self.model.dim();
        if position.len() != dim {
            return Err(NutsError::Config(format!(
                "State has dimension {} but the model has {}",
                position.len(),
                dim
            )));
        }
        let mut grad: Box<[f64]> = vec![0f64; dim].into();
        let logp = match self.model.logp(position, &mut grad) {
            Ok(logp) => logp,
            Err(err) => return Err(NutsError::LogpFailure(Box::new(err))),
        };
        Ok(Point {
            q: position.into(),
            p: vec![0f64; dim].into(),
            grad,
            potential_energy: -logp,
            kinetic_energy: 0.,
            idx_in_trajectory: 0,
        })
    }

    fn start_point(&mut self, state: &ChainState) -> Result<Point> {
        match self.current.take() {
            Some(point) if *point.q == *state.continuous => Ok(point),
            _ => self.init_point(&state.continuous),
        }
    }

    fn randomize_momentum<R: Rng + ?Sized>(&self, point: &mut Point, rng: &mut R) {
        point
            .p
            .iter_mut()
            .for_each(|p| *p = StandardNormal.sample(rng));
        point.kinetic_energy = 0.5 * dot(&point.p, &point.p);
        point.idx_in_trajectory = 0;
    }

    /// One leapfrog step of size `epsilon` (negative for backward steps).
    ///
    /// Returns `None` if the density could not be evaluated at the end point.
    fn leapfrog(&self, start: &Point, epsilon: f64) -> Result<Option<Point>> {
        let dim = start.q.len();
        let mut p_half: Box<[f64]> = vec![0f64; dim].into();
        axpy_out(&start.p, &start.grad, epsilon / 2., &mut p_half);

        let mut q: Box<[f64]> = vec![0f64; dim].into();
        axpy_out(&start.q, &p_half, epsilon, &mut q);

        let mut grad: Box<[f64]> = vec![0f64; dim].into();
        let Some(logp) = self.evaluate(&q, &mut grad)? else {
            return Ok(None);
        };

        let mut p = p_half;
        axpy(&grad, &mut p, epsilon / 2.);
        let kinetic_energy = 0.5 * dot(&p, &p);

        Ok(Some(Point {
            q,
            p,
            grad,
            potential_energy: -logp,
            kinetic_energy,
            idx_in_trajectory: start.idx_in_trajectory,
        }))
    }

    /// Energy change of a single leapfrog step from fresh momentum.
    fn one_step_delta<R: Rng + ?Sized>(
        &self,
        init: &Point,
        step_size: f64,
        rng: &mut R,
    ) -> Result<f64> {
        let mut start = init.clone();
        self.randomize_momentum(&mut start, rng);
        let initial_energy = start.energy();
        let energy = match self.leapfrog(&start, step_size)? {
            Some(end) if !end.energy().is_nan() => end.energy(),
            _ => f64::INFINITY,
        };
        Ok(initial_energy - energy)
    }
}

impl<M: Model> TransitionKernel for UnitNuts<M> {
    type Stats = NutsStats;

    fn dim(&self) -> usize {
        self.model.dim()
    }

    fn set_max_depth(&mut self, max_depth: u64) {
        self.max_depth = max_depth;
    }

    /// Double or halve the step size until the acceptance probability of a
    /// single leapfrog step crosses 0.8.
    fn init_stepsize<R: Rng + ?Sized>(
        &mut self,
        state: &ChainState,
        step_size: f64,
        rng: &mut R,
    ) -> Result<f64> {
        if step_size == 0. || step_size > MAX_STEP_SIZE || step_size.is_nan() {
            return Ok(step_size);
        }
        let init = self.init_point(&state.continuous)?;
        let mut step_size = step_size;

        let delta = self.one_step_delta(&init, step_size, rng)?;
        let increase = delta > ACCEPTANCE_TARGET_LOG;

        loop {
            let delta = self.one_step_delta(&init, step_size, rng)?;
            if increase && !(delta > ACCEPTANCE_TARGET_LOG) {
                break;
            }
            if !increase && !(delta < ACCEPTANCE_TARGET_LOG) {
                break;
            }
            step_size = if increase {
                2. * step_size
            } else {
                0.5 * step_size
            };

            if step_size > MAX_STEP_SIZE {
                return Err(NutsError::BadStepSize(
                    "Posterior is improper. Please check your model.".to_string(),
                ));
            }
            if step_size == 0. {
                return Err(NutsError::BadStepSize(
                    "No acceptably small step size could be found. \
                     Perhaps the posterior is not continuous?"
                        .to_string(),
                ));
            }
        }
        Ok(step_size)
    }

    fn step<R: Rng + ?Sized>(
        &mut self,
        state: &ChainState,
        step_size: f64,
        rng: &mut R,
    ) -> Result<Transition<NutsStats>> {
        let mut init = self.start_point(state)?;
        self.randomize_momentum(&mut init, rng);
        let initial_energy = init.energy();

        let mut trajectory = Trajectory {
            kernel: self,
            step_size,
            initial_energy,
            collector: AcceptanceCollector::default(),
        };

        let mut tree = NutsTree::new(init.clone());
        let mut diverging = false;
        let mut reached_maxdepth = true;
        while tree.depth < self.max_depth {
            let direction = if rng.random::<bool>() {
                Direction::Forward
            } else {
                Direction::Backward
            };
            tree = match tree.extend(rng, &mut trajectory, direction)? {
                ExtendResult::Ok(tree) => tree,
                ExtendResult::Turning(tree) => {
                    reached_maxdepth = false;
                    tree
                }
                ExtendResult::Diverging(tree) => {
                    reached_maxdepth = false;
                    diverging = true;
                    tree
                }
            };
            if !reached_maxdepth {
                break;
            }
        }

        let collector = trajectory.collector;
        let draw = tree.draw;
        let stats = NutsStats {
            step_size,
            depth: tree.depth,
            n_leapfrog: collector.count,
            diverging,
            reached_maxdepth,
            energy: draw.energy(),
            momentum: draw.p.clone(),
            gradient: draw.grad.clone(),
        };
        let transition = Transition {
            state: ChainState {
                continuous: draw.q.to_vec(),
                discrete: state.discrete.clone(),
            },
            logp: draw.logp(),
            accept_stat: collector.mean(),
            stats,
        };
        self.current = Some(draw);
        Ok(transition)
    }

    fn stat_names(&self) -> Vec<String> {
        ["stepsize__", "treedepth__", "n_leapfrog__", "divergent__", "energy__"]
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    fn diagnostic_names(&self) -> Vec<String> {
        let names = self.model.param_names();
        names
            .iter()
            .map(|name| format!("p_{}", name))
            .chain(names.iter().map(|name| format!("g_{}", name)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_logps::{NormalLogp, UndefinedLogp};
    use crate::rng::create_rng;
    use pretty_assertions::assert_eq;

    fn run(
        kernel: &mut UnitNuts<NormalLogp>,
        step_size: f64,
        n: usize,
    ) -> Vec<Transition<NutsStats>> {
        let mut rng = create_rng(42, 1);
        let mut state = ChainState::new(vec![3.5; kernel.dim()]);
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let transition = kernel.step(&state, step_size, &mut rng).unwrap();
            state = transition.state.clone();
            out.push(transition);
        }
        out
    }

    #[test]
    fn deterministic() {
        let mut a = UnitNuts::new(NormalLogp { dim: 3, mu: 3. });
        let mut b = UnitNuts::new(NormalLogp { dim: 3, mu: 3. });
        let draws_a = run(&mut a, 0.5, 5);
        let draws_b = run(&mut b, 0.5, 5);
        for (x, y) in draws_a.iter().zip(draws_b.iter()) {
            assert_eq!(x.state, y.state);
            assert_eq!(x.accept_stat, y.accept_stat);
        }
    }

    #[test]
    fn samples_normal() {
        let mut kernel = UnitNuts::new(NormalLogp { dim: 2, mu: 3. });
        let draws = run(&mut kernel, 0.7, 2000);
        let mean = draws.iter().map(|t| t.state.continuous[0]).sum::<f64>() / 2000.;
        assert!((mean - 3.).abs() < 0.15, "mean {mean}");
        assert!(draws
            .iter()
            .all(|t| (0. ..=1.).contains(&t.accept_stat)));
        assert!(draws.iter().all(|t| !t.stats.diverging));
        let mean_accept = draws.iter().map(|t| t.accept_stat).sum::<f64>() / 2000.;
        assert!(mean_accept > 0.7);
    }

    #[test]
    fn huge_step_size_diverges() {
        let mut kernel = UnitNuts::new(NormalLogp { dim: 2, mu: 0. });
        let draws = run(&mut kernel, 1e3, 10);
        assert!(draws.iter().all(|t| t.stats.diverging));
        assert!(draws.iter().all(|t| t.accept_stat == 0.));
        assert!(draws.iter().all(|t| t.state.continuous == vec![3.5, 3.5]));
    }

    #[test]
    fn respects_max_depth() {
        let mut kernel = UnitNuts::new(NormalLogp { dim: 2, mu: 0. });
        kernel.set_max_depth(2);
        let draws = run(&mut kernel, 1e-3, 20);
        assert!(draws.iter().all(|t| t.stats.depth <= 2));
        assert!(draws.iter().all(|t| t.stats.reached_maxdepth));
        assert!(draws.iter().all(|t| t.stats.n_leapfrog == 3));
    }

    #[test]
    fn stats_layout() {
        let kernel = UnitNuts::new(NormalLogp { dim: 2, mu: 0. });
        assert_eq!(kernel.stat_names().len(), 5);
        assert_eq!(
            kernel.diagnostic_names(),
            vec!["p_x.1", "p_x.2", "g_x.1", "g_x.2"]
        );
        let mut kernel = kernel;
        let draws = run(&mut kernel, 0.5, 1);
        let mut values = Vec::new();
        draws[0].stats.write_stats(&mut values);
        assert_eq!(values.len(), 5);
        assert_eq!(values[0], 0.5);
        values.clear();
        draws[0].stats.write_diagnostics(&mut values);
        assert_eq!(values.len(), 4);
    }

    #[test]
    fn init_stepsize_normal() {
        let mut kernel = UnitNuts::new(NormalLogp { dim: 5, mu: 0. });
        let mut rng = create_rng(3, 1);
        let state = ChainState::new(vec![0.5; 5]);
        let eps = kernel.init_stepsize(&state, 1e-3, &mut rng).unwrap();
        assert!(eps > 1e-3);
        assert!(eps < 10.);
        let eps = kernel.init_stepsize(&state, 0., &mut rng).unwrap();
        assert_eq!(eps, 0.);
    }

    #[derive(Debug)]
    struct FlatLogp;

    impl Model for FlatLogp {
        type LogpError = crate::model::test_logps::NormalLogpError;

        fn dim(&self) -> usize {
            1
        }

        fn logp(
            &self,
            _position: &[f64],
            gradient: &mut [f64],
        ) -> std::result::Result<f64, Self::LogpError> {
            gradient.fill(0.);
            Ok(0.)
        }
    }

    #[test]
    fn init_stepsize_flat_density_is_improper() {
        let mut kernel = UnitNuts::new(FlatLogp);
        let mut rng = create_rng(3, 1);
        let state = ChainState::new(vec![1.]);
        let result = kernel.init_stepsize(&state, 1., &mut rng);
        assert!(matches!(result, Err(NutsError::BadStepSize(msg)) if msg.contains("improper")));
    }

    #[test]
    fn unrecoverable_start_is_an_error() {
        let mut kernel = UnitNuts::new(UndefinedLogp { dim: 2 });
        let mut rng = create_rng(1, 1);
        let state = ChainState::new(vec![0., 0.]);
        assert!(matches!(
            kernel.step(&state, 0.1, &mut rng),
            Err(NutsError::LogpFailure(_))
        ));
    }

    #[test]
    fn dimension_mismatch() {
        let mut kernel = UnitNuts::new(NormalLogp { dim: 2, mu: 0. });
        let mut rng = create_rng(1, 1);
        let state = ChainState::new(vec![0.]);
        assert!(matches!(
            kernel.step(&state, 0.1, &mut rng),
            Err(NutsError::Config(_))
        ));
    }
}
