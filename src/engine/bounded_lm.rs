use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use std::fmt;

/// Damping factor ceiling. Once lambda is driven this high without an
/// acceptable step the iterate is a stationary point of the damped problem.
const LAMBDA_MAX: f64 = 1e12;
const LAMBDA_MIN: f64 = 1e-12;

/// Reasons the bounded least-squares fit terminated without a result.
#[derive(Debug, Clone, PartialEq)]
pub enum FitError {
    /// Model output length or bound vector length does not match the problem.
    WrongDimensions(String),
    /// Fewer data points than parameters, no degrees of freedom left.
    Underdetermined { points: usize, params: usize },
    /// Model produced NaN or inf at the starting point and damping could not
    /// steer away from it.
    Numerical(&'static str),
    /// Normal equations stayed singular even after regularization.
    SingularNormalEquations,
    /// Model evaluation budget exhausted before convergence.
    BudgetExhausted(usize),
    /// A lower bound exceeds its upper bound.
    InvalidBounds(usize),
}

impl fmt::Display for FitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FitError::WrongDimensions(what) => write!(f, "dimension mismatch: {}", what),
            FitError::Underdetermined { points, params } => write!(
                f,
                "underdetermined fit: {} data values for {} parameters",
                points, params
            ),
            FitError::Numerical(what) => write!(f, "non-finite value encountered in {}", what),
            FitError::SingularNormalEquations => {
                write!(f, "singular normal equations, Jacobian is rank-deficient")
            }
            FitError::BudgetExhausted(n) => {
                write!(f, "no convergence within {} model evaluations", n)
            }
            FitError::InvalidBounds(i) => {
                write!(f, "lower bound exceeds upper bound for parameter {}", i)
            }
        }
    }
}

impl std::error::Error for FitError {}

/// Converged fit: point estimates, covariance-derived standard errors and
/// the residual sum of squares at the optimum.
#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    pub parameters: DVector<f64>,
    pub standard_errors: DVector<f64>,
    /// Sum of squared residuals at the returned parameters.
    pub ssr: f64,
    pub evaluations: usize,
    pub iterations: usize,
}

/// Box-constrained Levenberg-Marquardt least squares with a numerical
/// Jacobian.
///
/// Classic Marquardt damping of the normal equations
/// `(JtJ + lambda diag(JtJ)) h = Jt r`, trial steps clamped into the box,
/// accepted when they reduce the residual sum of squares. Standard errors
/// come from `(JtJ)^-1 * ssr / (m - n)` at the optimum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundedLevenbergMarquardt {
    max_evals: usize,
    ftol: f64,
    xtol: f64,
    lambda_0: f64,
    lambda_up_fac: f64,
    lambda_dn_fac: f64,
}

impl Default for BoundedLevenbergMarquardt {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundedLevenbergMarquardt {
    pub fn new() -> Self {
        Self {
            max_evals: 5000,
            ftol: 1e-12,
            xtol: 1e-12,
            lambda_0: 1e-3,
            lambda_up_fac: 11.0,
            lambda_dn_fac: 9.0,
        }
    }

    /// Set the model-evaluation budget.
    ///
    /// # Panics
    ///
    /// Panics if `max_evals` is zero.
    #[must_use]
    pub fn with_max_evals(self, max_evals: usize) -> Self {
        assert!(max_evals > 0, "max_evals must be > 0");
        Self { max_evals, ..self }
    }

    /// Set the relative residual-reduction tolerance.
    ///
    /// # Panics
    ///
    /// Panics if `ftol` is negative.
    #[must_use]
    pub fn with_ftol(self, ftol: f64) -> Self {
        assert!(!ftol.is_sign_negative(), "ftol must be >= 0");
        Self { ftol, ..self }
    }

    /// Set the relative step-size tolerance.
    ///
    /// # Panics
    ///
    /// Panics if `xtol` is negative.
    #[must_use]
    pub fn with_xtol(self, xtol: f64) -> Self {
        assert!(!xtol.is_sign_negative(), "xtol must be >= 0");
        Self { xtol, ..self }
    }

    /// Set the initial damping factor.
    ///
    /// # Panics
    ///
    /// Panics if `lambda_0 <= 0`.
    #[must_use]
    pub fn with_lambda_0(self, lambda_0: f64) -> Self {
        assert!(lambda_0.is_sign_positive(), "lambda_0 must be > 0");
        Self { lambda_0, ..self }
    }

    /// Minimize `||y - model(a)||^2` over the box `[lower, upper]` starting
    /// from `initial` (clamped into the box first).
    pub fn minimize<F>(
        &self,
        model: F,
        initial: &DVector<f64>,
        lower: &DVector<f64>,
        upper: &DVector<f64>,
        y: &DVector<f64>,
    ) -> Result<FitReport, FitError>
    where
        F: Fn(&DVector<f64>) -> DVector<f64>,
    {
        let n = initial.len();
        let m = y.len();
        if n == 0 {
            return Err(FitError::WrongDimensions("no parameters".to_string()));
        }
        if lower.len() != n || upper.len() != n {
            return Err(FitError::WrongDimensions(format!(
                "bounds have lengths {}/{}, expected {}",
                lower.len(),
                upper.len(),
                n
            )));
        }
        for i in 0..n {
            if lower[i] > upper[i] {
                return Err(FitError::InvalidBounds(i));
            }
        }
        if m <= n {
            return Err(FitError::Underdetermined {
                points: m,
                params: n,
            });
        }

        let clamp = |v: &DVector<f64>| {
            DVector::from_fn(n, |i, _| v[i].max(lower[i]).min(upper[i]))
        };

        let mut a = clamp(initial);
        let mut evals: usize = 0;
        let mut eval_model = |x: &DVector<f64>, evals: &mut usize| -> Result<DVector<f64>, FitError> {
            if *evals >= self.max_evals {
                return Err(FitError::BudgetExhausted(self.max_evals));
            }
            *evals += 1;
            let f = model(x);
            if f.len() != m {
                return Err(FitError::WrongDimensions(format!(
                    "model returned {} values, expected {}",
                    f.len(),
                    m
                )));
            }
            Ok(f)
        };

        let mut f = eval_model(&a, &mut evals)?;
        let mut residual = y - &f;
        let mut chi2 = residual.norm_squared();
        if !chi2.is_finite() {
            return Err(FitError::Numerical("initial residuals"));
        }

        let mut lambda = self.lambda_0;
        let mut iterations: usize = 0;
        let mut converged = chi2 <= f64::MIN_POSITIVE;

        while !converged {
            iterations += 1;
            let jac = numeric_jacobian(&mut eval_model, &a, lower, upper, &f, &mut evals)?;
            let jtj = jac.transpose() * &jac;
            let jtr = jac.transpose() * &residual;
            if jtr.iter().any(|v| !v.is_finite()) {
                return Err(FitError::Numerical("gradient"));
            }

            // Damping loop: escalate lambda until a step reduces chi2 or the
            // ceiling tells us the iterate cannot be improved.
            loop {
                let mut damped = jtj.clone();
                for i in 0..n {
                    // A zero diagonal entry would make Marquardt scaling a
                    // no-op for that parameter; fall back to plain damping.
                    let d = if jtj[(i, i)] > 0.0 { jtj[(i, i)] } else { 1.0 };
                    damped[(i, i)] += lambda * d;
                }
                let step = match damped.lu().solve(&jtr) {
                    Some(h) => h,
                    None => {
                        lambda *= self.lambda_up_fac;
                        if lambda > LAMBDA_MAX {
                            return Err(FitError::SingularNormalEquations);
                        }
                        continue;
                    }
                };

                let a_try = clamp(&(&a + &step));
                let f_try = eval_model(&a_try, &mut evals)?;
                let residual_try = y - &f_try;
                let chi2_try = residual_try.norm_squared();

                if chi2_try.is_finite() && chi2_try < chi2 {
                    // Accepted: relax damping, check convergence on the
                    // relative reduction and the relative step size.
                    let reduction = (chi2 - chi2_try) / chi2.max(f64::MIN_POSITIVE);
                    let max_rel_step = (0..n)
                        .map(|i| (a_try[i] - a[i]).abs() / (a[i].abs() + self.xtol))
                        .fold(0.0, f64::max);
                    a = a_try;
                    f = f_try;
                    residual = residual_try;
                    chi2 = chi2_try;
                    lambda = (lambda / self.lambda_dn_fac).max(LAMBDA_MIN);
                    debug!(
                        ">{:3}:{:4} | chi_sq={:10.3e} | lambda={:8.1e}",
                        iterations, evals, chi2, lambda
                    );
                    if chi2 <= f64::MIN_POSITIVE
                        || reduction <= self.ftol
                        || max_rel_step <= self.xtol
                    {
                        converged = true;
                    }
                    break;
                }

                lambda *= self.lambda_up_fac;
                if lambda > LAMBDA_MAX {
                    // No descent direction left at maximal damping: the
                    // current iterate is as good as this model gets.
                    converged = true;
                    break;
                }
            }
        }

        info!(
            "LM converged: chi_sq = {:.3e}, {} iterations, {} evaluations",
            chi2, iterations, evals
        );
        let standard_errors = standard_errors(&mut eval_model, &a, lower, upper, &f, &mut evals, chi2, m, n)?;
        Ok(FitReport {
            parameters: a,
            standard_errors,
            ssr: chi2,
            evaluations: evals,
            iterations,
        })
    }
}

/// Forward-difference Jacobian of the model, stepping backwards where a
/// forward step would leave the box.
fn numeric_jacobian<E>(
    eval_model: &mut E,
    a: &DVector<f64>,
    lower: &DVector<f64>,
    upper: &DVector<f64>,
    f0: &DVector<f64>,
    evals: &mut usize,
) -> Result<DMatrix<f64>, FitError>
where
    E: FnMut(&DVector<f64>, &mut usize) -> Result<DVector<f64>, FitError>,
{
    let n = a.len();
    let m = f0.len();
    let sqrt_eps = f64::EPSILON.sqrt();
    let mut jac = DMatrix::zeros(m, n);
    for j in 0..n {
        let h = if a[j] != 0.0 {
            sqrt_eps * a[j].abs()
        } else {
            sqrt_eps
        };
        let mut a_step = a.clone();
        let sign = if a[j] + h <= upper[j] {
            a_step[j] = a[j] + h;
            1.0
        } else if a[j] - h >= lower[j] {
            a_step[j] = a[j] - h;
            -1.0
        } else {
            // Bounds tighter than the step: parameter is effectively fixed.
            continue;
        };
        let fj = eval_model(&a_step, evals)?;
        for i in 0..m {
            let d = sign * (fj[i] - f0[i]) / h;
            if !d.is_finite() {
                return Err(FitError::Numerical("jacobian"));
            }
            jac[(i, j)] = d;
        }
    }
    Ok(jac)
}

/// Standard errors from the covariance matrix `(JtJ)^-1 * ssr/(m - n)` at
/// the optimum, with the reference solver's mild regularization fallback
/// when `JtJ` is numerically singular.
#[allow(clippy::too_many_arguments)]
fn standard_errors<E>(
    eval_model: &mut E,
    a: &DVector<f64>,
    lower: &DVector<f64>,
    upper: &DVector<f64>,
    f0: &DVector<f64>,
    evals: &mut usize,
    ssr: f64,
    m: usize,
    n: usize,
) -> Result<DVector<f64>, FitError>
where
    E: FnMut(&DVector<f64>, &mut usize) -> Result<DVector<f64>, FitError>,
{
    let jac = numeric_jacobian(eval_model, a, lower, upper, f0, evals)?;
    let jtj = jac.transpose() * &jac;
    let sigma2 = ssr / (m - n) as f64;
    let covariance = match jtj.clone().try_inverse() {
        Some(inv) => inv,
        None => {
            let mut regularized = jtj.clone();
            let trace_avg = jtj.trace() / n as f64;
            for i in 0..n {
                regularized[(i, i)] += 1e-6 * trace_avg;
            }
            regularized
                .try_inverse()
                .ok_or(FitError::SingularNormalEquations)?
        }
    };
    Ok(DVector::from_fn(n, |i, _| {
        (covariance[(i, i)] * sigma2).max(0.0).sqrt()
    }))
}
