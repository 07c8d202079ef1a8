//! Minimization methods.
//!
//! Thin adapters over `argmin` solvers for a scalar objective of a
//! `Vec<f64>`. Gradient methods differentiate the objective numerically with
//! central differences.

use argmin::core::{CostFunction, Error as ArgminError, Executor, Gradient, State};
use argmin::solver::conjugategradient::beta::PolakRibiere;
use argmin::solver::conjugategradient::NonlinearConjugateGradient;
use argmin::solver::gradientdescent::SteepestDescent;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Relative simplex step for nonzero starting coordinates.
const SIMPLEX_STEP: f64 = 0.05;
/// Absolute simplex step for zero starting coordinates.
const SIMPLEX_ZERO_STEP: f64 = 0.00025;
/// Nelder-Mead stops once the spread of simplex costs falls below this.
const SIMPLEX_TOLERANCE: f64 = 1e-12;
/// L-BFGS history length.
const LBFGS_MEMORY: usize = 7;

/// A minimization method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    /// Derivative-free downhill simplex.
    NelderMead,
    /// Limited-memory BFGS.
    #[serde(rename = "lbfgs")]
    Lbfgs,
    /// Nonlinear conjugate gradient with the Polak-Ribière update.
    #[serde(rename = "cg")]
    ConjugateGradient,
    SteepestDescent,
}

impl Method {
    pub const ALL: [Method; 4] = [
        Method::NelderMead,
        Method::Lbfgs,
        Method::ConjugateGradient,
        Method::SteepestDescent,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Method::NelderMead => "nelder-mead",
            Method::Lbfgs => "lbfgs",
            Method::ConjugateGradient => "cg",
            Method::SteepestDescent => "steepest-descent",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Method::ALL
            .into_iter()
            .find(|m| m.name() == lower)
            .ok_or_else(|| {
                let known: Vec<&str> = Method::ALL.iter().map(|m| m.name()).collect();
                format!("unknown method '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

/// A scalar function to minimize.
pub trait Objective {
    type Error: std::error::Error + Send + Sync + 'static;

    fn loss(&self, x: &[f64]) -> Result<f64, Self::Error>;
}

#[derive(Error, Debug)]
pub enum SolverError<E> {
    /// The objective itself failed.
    #[error(transparent)]
    Objective(E),
    #[error("{0}")]
    Failed(String),
}

/// Best point found by one solver run.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub params: Vec<f64>,
    pub loss: f64,
}

/// Bridges an [`Objective`] into argmin and remembers the best point seen.
struct Problem<'a, O> {
    objective: &'a O,
    best: &'a RefCell<Option<Minimum>>,
}

impl<O: Objective> Problem<'_, O> {
    fn eval(&self, x: &[f64]) -> Result<f64, O::Error> {
        let loss = self.objective.loss(x)?;
        let mut best = self.best.borrow_mut();
        let improved = match best.as_ref() {
            Some(b) => loss < b.loss,
            None => loss.is_finite(),
        };
        if improved {
            *best = Some(Minimum {
                params: x.to_vec(),
                loss,
            });
        }
        Ok(loss)
    }
}

impl<O: Objective> CostFunction for Problem<'_, O> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, ArgminError> {
        Ok(self.eval(param)?)
    }
}

impl<O: Objective> Gradient for Problem<'_, O> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, ArgminError> {
        Ok(central_difference(param, |x| self.eval(x))?)
    }
}

/// Gradient of `f` at `x` by central differences.
pub fn central_difference<E>(
    x: &[f64],
    mut f: impl FnMut(&[f64]) -> Result<f64, E>,
) -> Result<Vec<f64>, E> {
    let mut probe = x.to_vec();
    let mut grad = Vec::with_capacity(x.len());
    for i in 0..x.len() {
        let h = f64::EPSILON.cbrt() * x[i].abs().max(1.0);
        probe[i] = x[i] + h;
        let up = f(&probe)?;
        probe[i] = x[i] - h;
        let down = f(&probe)?;
        probe[i] = x[i];
        grad.push((up - down) / (2.0 * h));
    }
    Ok(grad)
}

/// Starting simplex around `x0`: the point itself plus one vertex per
/// coordinate, stepped 5 % (or 0.00025 when the coordinate is zero).
pub fn initial_simplex(x0: &[f64]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(x0.len() + 1);
    simplex.push(x0.to_vec());
    for i in 0..x0.len() {
        let mut vertex = x0.to_vec();
        vertex[i] = if vertex[i] != 0.0 {
            vertex[i] * (1.0 + SIMPLEX_STEP)
        } else {
            SIMPLEX_ZERO_STEP
        };
        simplex.push(vertex);
    }
    simplex
}

/// Minimize `objective` from `x0` with `method`.
pub fn minimize<O: Objective>(
    method: Method,
    objective: &O,
    x0: &[f64],
    max_iters: u64,
) -> Result<Minimum, SolverError<O::Error>> {
    if x0.is_empty() {
        let loss = objective.loss(x0).map_err(SolverError::Objective)?;
        return Ok(Minimum {
            params: vec![],
            loss,
        });
    }

    let best = RefCell::new(None);
    let outcome = run(method, Problem { objective, best: &best }, x0, max_iters);

    let best = best.into_inner();
    match outcome {
        Ok(found) => Ok(match best {
            Some(best) if best.loss < found.loss => best,
            _ => found,
        }),
        Err(err) => match err.downcast::<O::Error>() {
            Ok(e) => Err(SolverError::Objective(e)),
            // Line searches give up near a flat optimum; keep what was found
            Err(err) => match best {
                Some(best) => {
                    log::warn!("{method} stopped early: {err}");
                    Ok(best)
                }
                None => Err(SolverError::Failed(err.to_string())),
            },
        },
    }
}

fn run<O: Objective>(
    method: Method,
    problem: Problem<'_, O>,
    x0: &[f64],
    max_iters: u64,
) -> Result<Minimum, ArgminError> {
    let (params, loss) = match method {
        Method::NelderMead => {
            let simplex = initial_simplex(x0);
            // argmin unwraps the vertex costs during init
            for vertex in &simplex {
                problem.eval(vertex)?;
            }
            let solver = NelderMead::new(simplex).with_sd_tolerance(SIMPLEX_TOLERANCE)?;
            let res = Executor::new(problem, solver)
                .configure(|state| state.max_iters(max_iters))
                .run()?;
            let state = res.state();
            (state.get_best_param().cloned(), state.get_best_cost())
        }
        Method::Lbfgs => {
            let linesearch: MoreThuenteLineSearch<Vec<f64>, Vec<f64>, f64> = MoreThuenteLineSearch::new();
            let solver = LBFGS::new(linesearch, LBFGS_MEMORY);
            let res = Executor::new(problem, solver)
                .configure(|state| state.param(x0.to_vec()).max_iters(max_iters))
                .run()?;
            let state = res.state();
            (state.get_best_param().cloned(), state.get_best_cost())
        }
        Method::ConjugateGradient => {
            let linesearch: MoreThuenteLineSearch<Vec<f64>, Vec<f64>, f64> = MoreThuenteLineSearch::new();
            let solver = NonlinearConjugateGradient::new(linesearch, PolakRibiere::new());
            let res = Executor::new(problem, solver)
                .configure(|state| state.param(x0.to_vec()).max_iters(max_iters))
                .run()?;
            let state = res.state();
            (state.get_best_param().cloned(), state.get_best_cost())
        }
        Method::SteepestDescent => {
            let linesearch: MoreThuenteLineSearch<Vec<f64>, Vec<f64>, f64> = MoreThuenteLineSearch::new();
            let solver = SteepestDescent::new(linesearch);
            let res = Executor::new(problem, solver)
                .configure(|state| state.param(x0.to_vec()).max_iters(max_iters))
                .run()?;
            let state = res.state();
            (state.get_best_param().cloned(), state.get_best_cost())
        }
    };

    let params = params.unwrap_or_else(|| x0.to_vec());
    Ok(Minimum { params, loss })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    /// Shifted quadratic bowl with its minimum at `center`.
    struct Bowl {
        center: Vec<f64>,
    }

    impl Objective for Bowl {
        type Error = Infallible;

        fn loss(&self, x: &[f64]) -> Result<f64, Infallible> {
            Ok(x.iter()
                .zip(&self.center)
                .map(|(a, c)| (a - c) * (a - c))
                .sum())
        }
    }

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    struct Failing;

    impl Objective for Failing {
        type Error = Boom;

        fn loss(&self, _x: &[f64]) -> Result<f64, Boom> {
            Err(Boom)
        }
    }

    fn bowl() -> Bowl {
        Bowl {
            center: vec![0.3, -1.2],
        }
    }

    #[test]
    fn method_names_parse() {
        for method in Method::ALL {
            assert_eq!(method.name().parse::<Method>().unwrap(), method);
        }
        assert_eq!("Nelder-Mead".parse::<Method>().unwrap(), Method::NelderMead);
        assert!("powell".parse::<Method>().is_err());
    }

    #[test]
    fn method_serde_uses_cli_names() {
        let json = serde_json::to_string(&[Method::NelderMead, Method::Lbfgs, Method::ConjugateGradient]).unwrap();
        assert_eq!(json, r#"["nelder-mead","lbfgs","cg"]"#);
    }

    #[test]
    fn simplex_steps() {
        let simplex = initial_simplex(&[2.0, 0.0]);
        assert_eq!(simplex.len(), 3);
        assert_eq!(simplex[0], vec![2.0, 0.0]);
        assert!((simplex[1][0] - 2.1).abs() < 1e-12);
        assert_eq!(simplex[2], vec![2.0, 0.00025]);
    }

    #[test]
    fn central_difference_of_quadratic() {
        let grad = central_difference(&[1.0, -2.0], |x: &[f64]| -> Result<f64, Infallible> {
            Ok(x[0] * x[0] + 3.0 * x[1])
        })
        .unwrap();
        assert!((grad[0] - 2.0).abs() < 1e-6);
        assert!((grad[1] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn nelder_mead_finds_bowl_minimum() {
        let min = minimize(Method::NelderMead, &bowl(), &[1.0, 1.0], 2000).unwrap();
        assert!((min.params[0] - 0.3).abs() < 1e-4);
        assert!((min.params[1] + 1.2).abs() < 1e-4);
        assert!(min.loss < 1e-8);
    }

    #[test]
    fn lbfgs_finds_bowl_minimum() {
        let min = minimize(Method::Lbfgs, &bowl(), &[1.0, 1.0], 200).unwrap();
        assert!((min.params[0] - 0.3).abs() < 1e-4);
        assert!((min.params[1] + 1.2).abs() < 1e-4);
    }

    #[test]
    fn empty_problem_evaluates_once() {
        let min = minimize(Method::Lbfgs, &Bowl { center: vec![] }, &[], 10).unwrap();
        assert!(min.params.is_empty());
        assert_eq!(min.loss, 0.0);
    }

    /// Fails only away from the starting point.
    struct FailsOffOrigin;

    impl Objective for FailsOffOrigin {
        type Error = Boom;

        fn loss(&self, x: &[f64]) -> Result<f64, Boom> {
            if x.iter().all(|v| *v == 0.0) {
                Ok(1.0)
            } else {
                Err(Boom)
            }
        }
    }

    #[test]
    fn simplex_vertex_errors_are_returned() {
        let err = minimize(Method::NelderMead, &FailsOffOrigin, &[0.0, 0.0], 10).unwrap_err();
        assert!(matches!(err, SolverError::Objective(Boom)));
    }

    #[test]
    fn objective_errors_are_returned_unchanged() {
        for method in Method::ALL {
            let err = minimize(method, &Failing, &[1.0], 10).unwrap_err();
            assert!(matches!(err, SolverError::Objective(Boom)), "{method}");
        }
    }
}
