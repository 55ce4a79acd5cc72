use std::collections::{BTreeMap, BTreeSet};

use crate::error::{LinearityViolation, SirError, SirErrorKind};
use crate::types::Ty;

/// The typing context Γ: variable bindings plus accumulated refinement
/// predicates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TypeContext {
    bindings: BTreeMap<String, Ty>,
    refinements: Vec<String>,
}

impl TypeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, name: impl Into<String>, ty: Ty) -> TypeContext {
        let mut next = self.clone();
        next.bindings.insert(name.into(), ty);
        next
    }

    pub fn lookup(&self, name: &str) -> Option<&Ty> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn add_refinement(&self, predicate: impl Into<String>) -> TypeContext {
        let mut next = self.clone();
        next.refinements.push(predicate.into());
        next
    }

    pub fn refinements(&self) -> &[String] {
        &self.refinements
    }
}

/// The linear context Δ: linear and affine resources with consumption
/// tracking. Linear resources must be consumed exactly once, affine
/// resources at most once.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinearContext {
    resources: BTreeMap<String, Ty>,
    consumed: BTreeSet<String>,
}

impl LinearContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource(&self, name: impl Into<String>, ty: Ty) -> LinearContext {
        let mut next = self.clone();
        next.resources.insert(name.into(), ty);
        next
    }

    pub fn consume(&self, name: &str) -> Result<LinearContext, SirError> {
        if self.consumed.contains(name) {
            return Err(SirError::new(
                SirErrorKind::LinearityViolation(LinearityViolation::DoubleConsume(
                    name.to_owned(),
                )),
                vec![],
            ));
        }
        if !self.resources.contains_key(name) {
            return Err(SirError::new(
                SirErrorKind::LinearityViolation(LinearityViolation::UnconsumedLinear(
                    name.to_owned(),
                )),
                vec!["unknown linear resource".to_owned()],
            ));
        }
        let mut next = self.clone();
        next.consumed.insert(name.to_owned());
        Ok(next)
    }

    pub fn is_consumed(&self, name: &str) -> bool {
        self.consumed.contains(name)
    }

    /// Linear resources that were never consumed. Affine resources may be
    /// dropped freely.
    pub fn unconsumed_linear(&self) -> Vec<String> {
        self.resources
            .iter()
            .filter(|(name, ty)| ty.is_linear() && !self.consumed.contains(*name))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Splits the context for parallel composition: resources named in
    /// `names` to the left, the rest to the right.
    pub fn split(&self, names: &BTreeSet<String>) -> (LinearContext, LinearContext) {
        let partition = |keep: bool| LinearContext {
            resources: self
                .resources
                .iter()
                .filter(|(n, _)| names.contains(*n) == keep)
                .map(|(n, t)| (n.clone(), t.clone()))
                .collect(),
            consumed: self
                .consumed
                .iter()
                .filter(|n| names.contains(*n) == keep)
                .cloned()
                .collect(),
        };
        (partition(true), partition(false))
    }
}
