use std::collections::BTreeSet;
use std::fmt;

/// A named constraint handed to the solver: an SMT formula string plus the
/// integer variables it mentions. Formulas are opaque to the core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmtConstraint {
    pub name: String,
    pub formula: String,
    pub variables: Vec<String>,
}

impl SmtConstraint {
    pub fn new(name: impl Into<String>, formula: impl Into<String>, variables: Vec<String>) -> Self {
        Self {
            name: name.into(),
            formula: formula.into(),
            variables,
        }
    }

    pub fn to_smtlib(&self) -> String {
        let mut lines: Vec<String> = self
            .variables
            .iter()
            .map(|v| format!("(declare-const {v} Int)"))
            .collect();
        lines.push(format!("(assert {})", self.formula));
        lines.push("(check-sat)".to_owned());
        lines.join("\n")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown,
}

/// The pluggable solver seam. The core ships only the permissive stub; a
/// real solver binds here without touching anything else.
pub trait SolverBackend: fmt::Debug {
    fn check(&mut self, script: &str) -> SatResult;
}

/// Default backend: answers satisfiable for everything.
#[derive(Clone, Debug, Default)]
pub struct PermissiveSolver;

impl SolverBackend for PermissiveSolver {
    fn check(&mut self, _script: &str) -> SatResult {
        SatResult::Sat
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Accumulates named constraints and dispatches them to the backend as a
/// QF_LIA script.
#[derive(Debug)]
pub struct SmtSolver {
    constraints: Vec<SmtConstraint>,
    backend: Box<dyn SolverBackend>,
}

impl Default for SmtSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtSolver {
    pub fn new() -> Self {
        Self::with_backend(Box::new(PermissiveSolver))
    }

    pub fn with_backend(backend: Box<dyn SolverBackend>) -> Self {
        Self {
            constraints: Vec::new(),
            backend,
        }
    }

    pub fn constraints(&self) -> &[SmtConstraint] {
        &self.constraints
    }

    pub fn add_constraint(&mut self, constraint: SmtConstraint) {
        self.constraints.push(constraint);
    }

    fn binop(&mut self, name: &str, op: &str, a: &str, b: &str) {
        let variables = [a, b]
            .iter()
            .filter(|s| is_identifier(s))
            .map(|s| (*s).to_owned())
            .collect();
        self.constraints.push(SmtConstraint::new(
            name,
            format!("({op} {a} {b})"),
            variables,
        ));
    }

    pub fn assert_eq(&mut self, name: &str, a: &str, b: &str) {
        self.binop(name, "=", a, b);
    }

    pub fn assert_lt(&mut self, name: &str, a: &str, b: &str) {
        self.binop(name, "<", a, b);
    }

    pub fn assert_le(&mut self, name: &str, a: &str, b: &str) {
        self.binop(name, "<=", a, b);
    }

    /// Disjointness of [r1, r1+size1) and [r2, r2+size2), encoded as
    /// `or(r1+size1 ≤ r2, r2+size2 ≤ r1)`.
    pub fn assert_disjoint(&mut self, name: &str, r1: &str, r2: &str, size1: &str, size2: &str) {
        let variables = [r1, r2, size1, size2]
            .iter()
            .filter(|s| is_identifier(s))
            .map(|s| (*s).to_owned())
            .collect();
        self.constraints.push(SmtConstraint::new(
            name,
            format!("(or (<= (+ {r1} {size1}) {r2}) (<= (+ {r2} {size2}) {r1}))"),
            variables,
        ));
    }

    /// True when the accumulated constraints are satisfiable.
    pub fn check(&mut self) -> bool {
        let script = self.to_smtlib();
        self.backend.check(&script) == SatResult::Sat
    }

    /// True when the accumulated constraints are unsatisfiable. Proofs
    /// usually check that the negation of a property is UNSAT.
    pub fn check_unsat(&mut self) -> bool {
        let script = self.to_smtlib();
        self.backend.check(&script) == SatResult::Unsat
    }

    pub fn to_smtlib(&self) -> String {
        let mut lines = vec!["(set-logic QF_LIA)".to_owned()];

        let variables: BTreeSet<&str> = self
            .constraints
            .iter()
            .flat_map(|c| c.variables.iter().map(String::as_str))
            .collect();
        for variable in variables {
            lines.push(format!("(declare-const {variable} Int)"));
        }

        for constraint in &self.constraints {
            lines.push(format!("; {}", constraint.name));
            lines.push(format!("(assert {})", constraint.formula));
        }

        lines.push("(check-sat)".to_owned());
        lines.push("(get-model)".to_owned());
        lines.join("\n")
    }

    pub fn reset(&mut self) {
        self.constraints.clear();
    }
}
