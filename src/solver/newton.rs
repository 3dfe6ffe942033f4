//! The damped Gauss-Newton (Levenberg-Marquardt) iteration.

use faer::ColRef;
use faer::prelude::Solve;

use crate::SolveError;

use super::{Config, Model};

/// How many damping adjustments to try within one iteration before
/// declaring the current point a local minimum. Generous: after a run of
/// accepted steps lambda can sit near its floor, and a sharp valley then
/// needs many doublings to climb back out.
const MAX_DAMPING_RETRIES: usize = 20;

/// Floor for the damping parameter.
const MIN_LAMBDA: f64 = 1e-15;

impl Model<'_> {
    /// Iterate `(JᵀJ + λI) d = -Jᵀr` until every relation is satisfied, the
    /// step shrinks below the step tolerance (a local minimum, which for an
    /// inconsistent system is its least-squares answer), or the iteration
    /// cap is hit.
    ///
    /// Returns the number of iterations taken. An inconsistent system still
    /// returns `Ok`; the caller discovers which relations don't hold via the
    /// satisfaction check. `Err` is reserved for running out of iterations
    /// while the residual was still improving.
    pub(crate) fn solve_damped_newton(
        &self,
        values: &mut [f64],
        config: Config,
    ) -> Result<usize, SolveError> {
        let m = self.num_relations();
        let n = values.len();
        if m == 0 {
            return Ok(0);
        }
        let mut residuals = vec![0.0; m];
        let mut trial_residuals = vec![0.0; m];
        let mut lambda = config.lambda_initial;

        for iteration in 0..config.max_iterations {
            if self.all_satisfied(values) {
                return Ok(iteration);
            }
            self.residuals_into(values, &mut residuals);
            let current_sq: f64 = residuals.iter().map(|r| r * r).sum();

            let jac = self.jacobian(values);
            let jtj = jac.transpose() * jac.as_ref();
            let b = jac.transpose() * -ColRef::from_slice(&residuals);

            let mut stepped = false;
            for _attempt in 0..MAX_DAMPING_RETRIES {
                let mut damped = jtj.clone();
                for i in 0..n {
                    damped[(i, i)] += lambda;
                }
                let factored = damped.full_piv_lu();
                let step = factored.solve(&b);

                let candidate: Vec<f64> = values
                    .iter()
                    .zip(step.iter())
                    .map(|(value, delta)| value + delta)
                    .collect();
                if candidate.iter().any(|v| !v.is_finite()) {
                    lambda *= config.lambda_factor;
                    continue;
                }
                self.residuals_into(&candidate, &mut trial_residuals);
                let trial_sq: f64 = trial_residuals.iter().map(|r| r * r).sum();

                if trial_sq.is_finite() && trial_sq < current_sq {
                    let value_inf = values.iter().fold(0.0, |acc: f64, v| libm::fmax(acc, v.abs()));
                    let step_inf = step.iter().fold(0.0, |acc: f64, d| libm::fmax(acc, d.abs()));
                    values.copy_from_slice(&candidate);
                    lambda = libm::fmax(lambda / config.lambda_factor, MIN_LAMBDA);
                    stepped = true;
                    if step_inf <= config.step_tolerance * (value_inf + config.step_tolerance) {
                        return Ok(iteration + 1);
                    }
                    break;
                }
                lambda *= config.lambda_factor;
            }

            if !stepped {
                // No damping level improved the residual: we've settled at a
                // local minimum.
                return Ok(iteration);
            }
        }

        if self.all_satisfied(values) {
            Ok(config.max_iterations)
        } else {
            Err(SolveError::IterationLimit)
        }
    }
}
