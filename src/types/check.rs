use serde_json::Value;

use crate::effects::{Effect, EffectSet, analyze_deadlocks, analyze_races};
use crate::error::{
    DeadlockDetected, Diagnostics, LinearityViolation, MemorySafetyViolation, RaceDetected,
    SirError, SirErrorKind, TypeError,
};
use crate::memory::RegionManager;
use crate::sir::{HyperGraph, Vertex, VertexKind};
use crate::types::context::{LinearContext, TypeContext};
use crate::types::{Ty, TypeSystem};

/// The result of judging one expression vertex:
/// Γ; Δ ⊢ e ⇝ v : τ ▷ φ.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeJudgment {
    pub ty: Option<Ty>,
    pub effects: EffectSet,
    pub valid: bool,
    /// Witness term in A-normal form.
    pub proof: String,
}

impl TypeJudgment {
    fn invalid() -> Self {
        Self {
            ty: None,
            effects: EffectSet::new(),
            valid: false,
            proof: String::new(),
        }
    }

    fn of(ty: Ty) -> Self {
        Self {
            ty: Some(ty),
            effects: EffectSet::new(),
            valid: true,
            proof: String::new(),
        }
    }

    fn with_effects(mut self, effects: EffectSet) -> Self {
        self.effects = effects;
        self
    }
}

/// Drives the three judgments over a graph: expression typing, program
/// typing with linear-resource threading, and the safety judgment.
#[derive(Debug, Default)]
pub struct TypeChecker {
    type_system: TypeSystem,
}

impl TypeChecker {
    pub fn new() -> Self {
        Self {
            type_system: TypeSystem::new(),
        }
    }

    pub fn type_system(&self) -> &TypeSystem {
        &self.type_system
    }

    /// Γ; Δ ⊢ prog ⊣ Δ': walks the graph in topological order, typing each
    /// vertex, binding its result and consuming linear resources at their
    /// uses. Returns the final contexts together with the collected
    /// diagnostics.
    pub fn check_program(
        &self,
        graph: &HyperGraph,
    ) -> (TypeContext, LinearContext, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let mut context = TypeContext::new();
        let mut linear = LinearContext::new();

        // Linear and affine resources enter Δ up front; their uses are the
        // data-flow consumers encountered along the walk.
        for vertex in graph.vertices() {
            if let Some(ty) = &vertex.metadata.ty
                && (ty.is_linear() || ty.is_affine())
            {
                linear = linear.add_resource(vertex.id.as_str(), ty.clone());
            }
        }

        for id in graph.topological_order() {
            let Some(vertex) = graph.vertex(&id) else {
                continue;
            };

            for pred in graph.predecessors(&id) {
                let is_tracked = pred
                    .metadata
                    .ty
                    .as_ref()
                    .is_some_and(|t| t.is_linear() || t.is_affine());
                if !is_tracked {
                    continue;
                }
                match linear.consume(pred.id.as_str()) {
                    Ok(next) => linear = next,
                    Err(err) => diagnostics
                        .errors
                        .push(err.with_context(format!("consumed at {id}"))),
                }
            }

            let judgment = self.check_vertex(vertex, &context, graph, &mut diagnostics);
            if !judgment.valid {
                diagnostics.error(SirErrorKind::TypeError(TypeError::IllTyped {
                    vertex: id.to_string(),
                    detail: "no valid typing derivation".to_owned(),
                }));
            } else if let Some(ty) = judgment.ty {
                context = context.bind(id.as_str(), ty);
            }
        }

        for name in linear.unconsumed_linear() {
            diagnostics.error(SirErrorKind::LinearityViolation(
                LinearityViolation::UnconsumedLinear(name),
            ));
        }

        (context, linear, diagnostics)
    }

    /// Convenience wrapper over [`TypeChecker::check_program`] returning the
    /// overall verdict.
    pub fn check(&self, graph: &HyperGraph) -> (bool, Diagnostics) {
        let (_, _, diagnostics) = self.check_program(graph);
        (diagnostics.is_clean(), diagnostics)
    }

    /// Γ; Δ ⊢ e ⇝ v : τ ▷ φ for a single vertex.
    pub fn check_vertex(
        &self,
        vertex: &Vertex,
        context: &TypeContext,
        graph: &HyperGraph,
        diagnostics: &mut Diagnostics,
    ) -> TypeJudgment {
        if let Some(ty) = &vertex.metadata.ty {
            if let Ty::Fn { params, ret, .. } = ty.erase_refinement() {
                return self.check_apply(vertex, params, ret, context, graph, diagnostics);
            }
            return TypeJudgment::of(ty.clone())
                .with_effects(vertex.metadata.effects.clone());
        }

        match vertex.kind {
            VertexKind::Const => match Self::infer_const(&vertex.value) {
                Some(ty) => TypeJudgment::of(ty),
                None => TypeJudgment::invalid(),
            },
            VertexKind::Load => TypeJudgment::of(Ty::unit())
                .with_effects(EffectSet::from([Effect::Read])),
            VertexKind::Store => TypeJudgment::of(Ty::unit())
                .with_effects(EffectSet::from([Effect::Write])),
            VertexKind::KernelLaunch => TypeJudgment::of(Ty::unit())
                .with_effects(EffectSet::from([Effect::GpuLaunch])),
            _ => TypeJudgment::of(Ty::unit()),
        }
    }

    fn check_apply(
        &self,
        vertex: &Vertex,
        params: &[Ty],
        ret: &Ty,
        context: &TypeContext,
        graph: &HyperGraph,
        diagnostics: &mut Diagnostics,
    ) -> TypeJudgment {
        let preds = graph.predecessors(&vertex.id);
        for (pred, expected) in preds.iter().zip(params) {
            let actual = pred
                .metadata
                .ty
                .clone()
                .or_else(|| context.lookup(pred.id.as_str()).cloned());
            let Some(actual) = actual else {
                continue;
            };
            if self.type_system.unify(&actual, expected).is_none() {
                diagnostics.error(SirErrorKind::TypeError(TypeError::UnificationFailure {
                    left: actual.display_name(),
                    right: expected.display_name(),
                }));
                return TypeJudgment::invalid();
            }
        }
        TypeJudgment::of(ret.clone()).with_effects(vertex.metadata.effects.clone())
    }

    fn infer_const(value: &Value) -> Option<Ty> {
        match value {
            Value::Bool(_) => Some(Ty::boolean()),
            Value::Number(n) if n.is_f64() && !n.is_i64() && !n.is_u64() => Some(Ty::f64()),
            Value::Number(_) => Some(Ty::i64()),
            Value::Null => Some(Ty::unit()),
            _ => None,
        }
    }

    /// Γ ⊢ prog safe: memory safety (structural and region-model), race
    /// freedom and deadlock freedom. Returns every violation found.
    pub fn check_safety(&self, graph: &HyperGraph, regions: &RegionManager) -> Vec<SirError> {
        let mut violations = Vec::new();

        for message in graph.verify_memory_safety() {
            violations.push(SirError::new(
                SirErrorKind::MemorySafetyViolation(MemorySafetyViolation::MissingAllocation {
                    vertex: message,
                }),
                vec!["structural check".to_owned()],
            ));
        }
        violations.extend(regions.check_safety(graph).errors);

        let races = analyze_races(graph);
        for (first, second, region) in races.race_pairs {
            violations.push(SirError::new(
                SirErrorKind::RaceDetected(RaceDetected {
                    first: first.to_string(),
                    second: second.to_string(),
                    region,
                }),
                vec![],
            ));
        }

        let deadlocks = analyze_deadlocks(graph);
        for cycle in deadlocks.cycles {
            violations.push(SirError::new(
                SirErrorKind::DeadlockDetected(DeadlockDetected {
                    cycle: cycle.iter().map(|id| id.to_string()).collect(),
                }),
                vec![],
            ));
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sir::{GraphBuilder, HyperEdge};
    use serde_json::json;

    #[test]
    fn well_typed_arithmetic_passes() {
        let mut b = GraphBuilder::new("f");
        let c1 = b.constant(json!(42), Some(Ty::i64()));
        let c2 = b.constant(json!(1), Some(Ty::i64()));
        let sum = b.apply("op_+", &[c1, c2], Ty::i64(), EffectSet::from([Effect::Pure]));
        b.ret(&sum, Ty::i64());
        let g = b.build();

        let checker = TypeChecker::new();
        let (ok, diagnostics) = checker.check(&g);
        assert!(ok, "unexpected diagnostics: {diagnostics:?}");
    }

    #[test]
    fn const_types_are_inferred_without_metadata() {
        let mut g = HyperGraph::new("consts");
        let b = g.add_vertex(Vertex::constant(json!(true), None));
        let i = g.add_vertex(Vertex::constant(json!(3), None));
        let f = g.add_vertex(Vertex::constant(json!(2.5), None));

        let checker = TypeChecker::new();
        let mut diagnostics = Diagnostics::new();
        let ctx = TypeContext::new();
        let judge = |id: &crate::utils::VertexId, diagnostics: &mut Diagnostics| {
            checker.check_vertex(g.vertex(id).unwrap(), &ctx, &g, diagnostics)
        };
        assert_eq!(judge(&b, &mut diagnostics).ty, Some(Ty::boolean()));
        assert_eq!(judge(&i, &mut diagnostics).ty, Some(Ty::i64()));
        assert_eq!(judge(&f, &mut diagnostics).ty, Some(Ty::f64()));
    }

    #[test]
    fn fn_typed_apply_checks_argument_unification() {
        let mut b = GraphBuilder::new("bad_call");
        let arg = b.constant(json!(1.5), Some(Ty::f64()));
        let fn_ty = Ty::function(vec![Ty::i64()], Ty::i64(), EffectSet::new());
        let call = b.apply("takes_int", &[arg], fn_ty, EffectSet::new());
        b.ret(&call, Ty::i64());
        let g = b.build();

        let (ok, diagnostics) = TypeChecker::new().check(&g);
        assert!(!ok);
        assert!(diagnostics.errors.iter().any(|e| matches!(
            e.kind(),
            SirErrorKind::TypeError(TypeError::UnificationFailure { .. })
        )));
    }

    #[test]
    fn linear_resource_must_be_consumed_exactly_once() {
        // Unused linear resource.
        let mut g = HyperGraph::new("unused");
        g.add_vertex(
            Vertex::alloc(8u64.into(), Ty::linear(Ty::i64()), "heap"),
        );
        let (ok, diagnostics) = TypeChecker::new().check(&g);
        assert!(!ok);
        assert!(diagnostics.errors.iter().any(|e| matches!(
            e.kind(),
            SirErrorKind::LinearityViolation(LinearityViolation::UnconsumedLinear(_))
        )));

        // Doubly consumed linear resource.
        let mut g = HyperGraph::new("double");
        let token = g.add_vertex(Vertex::alloc(8u64.into(), Ty::linear(Ty::i64()), "heap"));
        let u1 = g.add_vertex(Vertex::apply("use1", Ty::unit(), EffectSet::new()));
        let u2 = g.add_vertex(Vertex::apply("use2", Ty::unit(), EffectSet::new()));
        g.add_edge(HyperEdge::data_flow([token.clone()], [u1]));
        g.add_edge(HyperEdge::data_flow([token], [u2]));
        let (ok, diagnostics) = TypeChecker::new().check(&g);
        assert!(!ok);
        assert!(diagnostics.errors.iter().any(|e| matches!(
            e.kind(),
            SirErrorKind::LinearityViolation(LinearityViolation::DoubleConsume(_))
        )));
    }

    #[test]
    fn affine_resource_may_be_dropped() {
        let mut g = HyperGraph::new("droppable");
        g.add_vertex(Vertex::alloc(8u64.into(), Ty::affine(Ty::i64()), "heap"));
        let (ok, diagnostics) = TypeChecker::new().check(&g);
        assert!(ok, "affine drop should be allowed: {diagnostics:?}");
    }
}
