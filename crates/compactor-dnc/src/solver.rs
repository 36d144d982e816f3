//! Linear-program solver seam.
//!
//! The optimizer builds its program against the [`LpSolver`] trait so the
//! backing solver stays swappable. The shipped adapter is a dense two-phase
//! primal simplex: the programs here are tiny (two variables per flow in a
//! coupling group, tens of rows), so a textbook tableau with Bland's rule is
//! both exact at the vertex and fast enough by a wide margin.

use std::fmt;

/// Handle to an LP variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Var(pub(crate) usize);

/// Constraint comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Le,
    Eq,
    Ge,
}

/// Objective direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    Minimize,
    Maximize,
}

/// Solver failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveError {
    /// No assignment satisfies the constraints.
    Infeasible,
    /// The objective improves without bound.
    Unbounded,
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveError::Infeasible => write!(f, "infeasible program"),
            SolveError::Unbounded => write!(f, "unbounded program"),
        }
    }
}

impl std::error::Error for SolveError {}

/// A solved program.
#[derive(Debug, Clone)]
pub struct LpSolution {
    values: Vec<f64>,
    objective: f64,
}

impl LpSolution {
    /// Value of a variable at the optimum.
    pub fn value(&self, var: Var) -> f64 {
        self.values[var.0]
    }

    /// Objective value at the optimum.
    pub fn objective(&self) -> f64 {
        self.objective
    }
}

/// Abstract LP interface: build variables and constraints, set an
/// objective, solve, read back.
pub trait LpSolver {
    /// Adds a variable bounded to `[lb, ub]`; `ub` may be infinite.
    fn add_variable(&mut self, lb: f64, ub: f64) -> Var;
    /// Adds the constraint `sum(coeff * var) op rhs`.
    fn add_constraint(&mut self, terms: &[(f64, Var)], op: ConstraintOp, rhs: f64);
    /// Sets the objective function.
    fn set_objective(&mut self, direction: Objective, terms: &[(f64, Var)]);
    /// Solves the program.
    fn solve(&self) -> Result<LpSolution, SolveError>;
}

struct Constraint {
    terms: Vec<(f64, Var)>,
    op: ConstraintOp,
    rhs: f64,
}

/// Dense two-phase primal simplex.
#[derive(Default)]
pub struct SimplexSolver {
    bounds: Vec<(f64, f64)>,
    constraints: Vec<Constraint>,
    objective: Vec<f64>,
    direction: Option<Objective>,
}

impl SimplexSolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LpSolver for SimplexSolver {
    fn add_variable(&mut self, lb: f64, ub: f64) -> Var {
        self.bounds.push((lb, ub));
        self.objective.push(0.0);
        Var(self.bounds.len() - 1)
    }

    fn add_constraint(&mut self, terms: &[(f64, Var)], op: ConstraintOp, rhs: f64) {
        self.constraints.push(Constraint {
            terms: terms.to_vec(),
            op,
            rhs,
        });
    }

    fn set_objective(&mut self, direction: Objective, terms: &[(f64, Var)]) {
        self.direction = Some(direction);
        for c in self.objective.iter_mut() {
            *c = 0.0;
        }
        for &(coeff, var) in terms {
            self.objective[var.0] += coeff;
        }
    }

    fn solve(&self) -> Result<LpSolution, SolveError> {
        Tableau::build(self)?.solve(self)
    }
}

const EPS: f64 = 1e-9;

/// Standard-form tableau. Variables are shifted by their lower bound so
/// every structural variable is non-negative; finite upper bounds become
/// extra rows.
struct Tableau {
    /// m x (n + 1) coefficient matrix, last column is the rhs.
    rows: Vec<Vec<f64>>,
    /// Basic variable (column index) of each row.
    basis: Vec<usize>,
    /// Total columns excluding rhs.
    cols: usize,
    /// Structural variable count (before slack/artificial columns).
    structural: usize,
    /// Columns holding artificial variables.
    artificial: Vec<usize>,
}

impl Tableau {
    fn build(solver: &SimplexSolver) -> Result<Self, SolveError> {
        let structural = solver.bounds.len();

        // Gather rows over shifted variables, normalized to rhs >= 0 (a
        // sign flip also flips the operator).
        let mut raw: Vec<(Vec<f64>, ConstraintOp, f64)> = Vec::new();
        let mut push_row = |mut coeffs: Vec<f64>, mut op: ConstraintOp, mut rhs: f64| {
            if rhs < 0.0 {
                for c in coeffs.iter_mut() {
                    *c = -*c;
                }
                rhs = -rhs;
                op = match op {
                    ConstraintOp::Le => ConstraintOp::Ge,
                    ConstraintOp::Ge => ConstraintOp::Le,
                    ConstraintOp::Eq => ConstraintOp::Eq,
                };
            }
            raw.push((coeffs, op, rhs));
        };
        for c in &solver.constraints {
            let mut coeffs = vec![0.0; structural];
            let mut rhs = c.rhs;
            for &(coeff, var) in &c.terms {
                coeffs[var.0] += coeff;
                rhs -= coeff * solver.bounds[var.0].0;
            }
            push_row(coeffs, c.op, rhs);
        }
        for (j, &(lb, ub)) in solver.bounds.iter().enumerate() {
            if ub.is_finite() {
                let span = ub - lb;
                if span < 0.0 {
                    return Err(SolveError::Infeasible);
                }
                let mut coeffs = vec![0.0; structural];
                coeffs[j] = 1.0;
                push_row(coeffs, ConstraintOp::Le, span);
            }
        }

        // Count slack/surplus and artificial columns.
        let mut slack_count = 0;
        let mut artificial_count = 0;
        for (_, op, _) in &raw {
            match op {
                ConstraintOp::Le => slack_count += 1,
                ConstraintOp::Ge => {
                    slack_count += 1;
                    artificial_count += 1;
                }
                ConstraintOp::Eq => artificial_count += 1,
            }
        }
        let cols = structural + slack_count + artificial_count;

        let mut rows = Vec::with_capacity(raw.len());
        let mut basis = Vec::with_capacity(raw.len());
        let mut artificial = Vec::new();
        let mut next_slack = structural;
        let mut next_artificial = structural + slack_count;
        for (coeffs, op, rhs) in raw {
            let mut row = vec![0.0; cols + 1];
            row[..structural].copy_from_slice(&coeffs);
            row[cols] = rhs;
            match op {
                ConstraintOp::Le => {
                    row[next_slack] = 1.0;
                    basis.push(next_slack);
                    next_slack += 1;
                }
                ConstraintOp::Ge => {
                    row[next_slack] = -1.0;
                    next_slack += 1;
                    row[next_artificial] = 1.0;
                    basis.push(next_artificial);
                    artificial.push(next_artificial);
                    next_artificial += 1;
                }
                ConstraintOp::Eq => {
                    row[next_artificial] = 1.0;
                    basis.push(next_artificial);
                    artificial.push(next_artificial);
                    next_artificial += 1;
                }
            }
            rows.push(row);
        }

        Ok(Self {
            rows,
            basis,
            cols,
            structural,
            artificial,
        })
    }

    fn solve(mut self, solver: &SimplexSolver) -> Result<LpSolution, SolveError> {
        // Phase 1: minimize the artificial sum down to zero.
        if !self.artificial.is_empty() {
            let mut cost = vec![0.0; self.cols];
            for &col in &self.artificial {
                cost[col] = 1.0;
            }
            let objective = self.run(&cost, false)?;
            if objective > EPS {
                return Err(SolveError::Infeasible);
            }
            // Pivot lingering zero-valued artificials out of the basis
            // where a non-artificial column allows it; their columns are
            // frozen in phase 2 either way.
            let real_cols = self.cols - self.artificial.len();
            for row in 0..self.basis.len() {
                if !self.artificial.contains(&self.basis[row]) {
                    continue;
                }
                if let Some(col) = (0..real_cols).find(|&col| {
                    self.rows[row][col].abs() > EPS && !self.basis.contains(&col)
                }) {
                    self.pivot(row, col);
                }
            }
        }

        // Phase 2: the real objective, artificial columns excluded.
        let sign = match solver.direction.unwrap_or(Objective::Minimize) {
            Objective::Minimize => 1.0,
            Objective::Maximize => -1.0,
        };
        let mut cost = vec![0.0; self.cols];
        for (j, &c) in solver.objective.iter().enumerate() {
            cost[j] = sign * c;
        }
        let objective = self.run(&cost, true)?;

        // Read back, unshifting lower bounds.
        let mut values = vec![0.0; solver.bounds.len()];
        for (row, &col) in self.basis.iter().enumerate() {
            if col < self.structural {
                values[col] = self.rows[row][self.cols];
            }
        }
        let mut shift = 0.0;
        for (j, &(lb, _)) in solver.bounds.iter().enumerate() {
            shift += solver.objective[j] * lb;
            values[j] += lb;
        }
        Ok(LpSolution {
            values,
            objective: sign * objective + shift,
        })
    }

    /// Runs simplex iterations against the given cost vector; returns the
    /// final objective value. Bland's rule prevents cycling.
    fn run(&mut self, cost: &[f64], freeze_artificials: bool) -> Result<f64, SolveError> {
        let mut frozen = vec![false; self.cols];
        if freeze_artificials {
            // Artificials never re-enter once phase 1 has priced them out.
            for &col in &self.artificial {
                frozen[col] = true;
            }
        }
        loop {
            let reduced = self.reduced_costs(cost);
            let entering = (0..self.cols)
                .find(|&col| !frozen[col] && reduced[col] < -EPS && !self.basis.contains(&col));
            let Some(entering) = entering else {
                return Ok(self.objective_value(cost));
            };
            let mut leaving: Option<(usize, f64)> = None;
            for row in 0..self.rows.len() {
                let coeff = self.rows[row][entering];
                if coeff > EPS {
                    let ratio = self.rows[row][self.cols] / coeff;
                    let better = match leaving {
                        None => true,
                        Some((best_row, best_ratio)) => {
                            ratio < best_ratio - EPS
                                || (ratio < best_ratio + EPS
                                    && self.basis[row] < self.basis[best_row])
                        }
                    };
                    if better {
                        leaving = Some((row, ratio));
                    }
                }
            }
            let Some((leaving, _)) = leaving else {
                return Err(SolveError::Unbounded);
            };
            self.pivot(leaving, entering);
        }
    }

    fn reduced_costs(&self, cost: &[f64]) -> Vec<f64> {
        let mut reduced = cost.to_vec();
        for (row, &basic) in self.basis.iter().enumerate() {
            let basic_cost = cost[basic];
            if basic_cost != 0.0 {
                for col in 0..self.cols {
                    reduced[col] -= basic_cost * self.rows[row][col];
                }
            }
        }
        reduced
    }

    fn objective_value(&self, cost: &[f64]) -> f64 {
        self.basis
            .iter()
            .enumerate()
            .map(|(row, &basic)| cost[basic] * self.rows[row][self.cols])
            .sum()
    }

    fn pivot(&mut self, pivot_row: usize, pivot_col: usize) {
        let divisor = self.rows[pivot_row][pivot_col];
        for value in self.rows[pivot_row].iter_mut() {
            *value /= divisor;
        }
        for row in 0..self.rows.len() {
            if row == pivot_row {
                continue;
            }
            let factor = self.rows[row][pivot_col];
            if factor != 0.0 {
                for col in 0..=self.cols {
                    let delta = factor * self.rows[pivot_row][col];
                    self.rows[row][col] -= delta;
                }
            }
        }
        self.basis[pivot_row] = pivot_col;
    }
}
