//! The DLETS type system: base, dependent, refinement, linear and affine
//! types, with effect-annotated function types and the three judgments
//! driving graph checking.

pub mod check;
pub mod context;

pub use check::{TypeChecker, TypeJudgment};
pub use context::{LinearContext, TypeContext};

use serde_derive::{Deserialize, Serialize};

use crate::effects::EffectSet;

/// An array or tensor dimension: concrete, or a symbolic (dependent)
/// expression carried verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    Fixed(u64),
    Symbolic(String),
}

impl From<u64> for Dim {
    fn from(n: u64) -> Self {
        Dim::Fixed(n)
    }
}

impl From<&str> for Dim {
    fn from(s: &str) -> Self {
        Dim::Symbolic(s.to_owned())
    }
}

impl std::fmt::Display for Dim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{n}"),
            Dim::Symbolic(s) => f.write_str(s),
        }
    }
}

/// A type term. Refinement predicates are opaque SMT strings, carried
/// verbatim and never interpreted by the core.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ty {
    Unit,
    Bool,
    Int {
        bits: u16,
        signed: bool,
    },
    Float {
        bits: u16,
    },
    Ptr {
        pointee: Box<Ty>,
        region: String,
    },
    Array {
        elem: Box<Ty>,
        len: Dim,
    },
    Tensor {
        elem: Box<Ty>,
        shape: Vec<Dim>,
    },
    Fn {
        params: Vec<Ty>,
        ret: Box<Ty>,
        effects: EffectSet,
    },
    Struct {
        name: String,
        fields: Vec<(String, Ty)>,
    },
    Region {
        name: String,
    },
    /// Dependent function type Π(x:τ).σ.
    Pi {
        var: String,
        domain: Box<Ty>,
        codomain: Box<Ty>,
        effects: EffectSet,
    },
    /// Dependent pair type Σ(x:τ).σ.
    Sigma {
        var: String,
        domain: Box<Ty>,
        codomain: Box<Ty>,
    },
    /// Refinement type {x:τ | φ}.
    Refinement {
        var: String,
        base: Box<Ty>,
        predicate: String,
    },
    Linear {
        inner: Box<Ty>,
    },
    Affine {
        inner: Box<Ty>,
    },
}

impl Ty {
    pub fn unit() -> Ty {
        Ty::Unit
    }

    pub fn boolean() -> Ty {
        Ty::Bool
    }

    pub fn int(bits: u16, signed: bool) -> Ty {
        Ty::Int { bits, signed }
    }

    pub fn i8() -> Ty {
        Ty::int(8, true)
    }

    pub fn i16() -> Ty {
        Ty::int(16, true)
    }

    pub fn i32() -> Ty {
        Ty::int(32, true)
    }

    pub fn i64() -> Ty {
        Ty::int(64, true)
    }

    pub fn f32() -> Ty {
        Ty::Float { bits: 32 }
    }

    pub fn f64() -> Ty {
        Ty::Float { bits: 64 }
    }

    pub fn ptr(pointee: Ty, region: impl Into<String>) -> Ty {
        Ty::Ptr {
            pointee: Box::new(pointee),
            region: region.into(),
        }
    }

    pub fn array(elem: Ty, len: impl Into<Dim>) -> Ty {
        Ty::Array {
            elem: Box::new(elem),
            len: len.into(),
        }
    }

    pub fn tensor(elem: Ty, shape: Vec<Dim>) -> Ty {
        Ty::Tensor {
            elem: Box::new(elem),
            shape,
        }
    }

    pub fn function(params: Vec<Ty>, ret: Ty, effects: EffectSet) -> Ty {
        Ty::Fn {
            params,
            ret: Box::new(ret),
            effects,
        }
    }

    pub fn pi(var: impl Into<String>, domain: Ty, codomain: Ty, effects: EffectSet) -> Ty {
        Ty::Pi {
            var: var.into(),
            domain: Box::new(domain),
            codomain: Box::new(codomain),
            effects,
        }
    }

    pub fn sigma(var: impl Into<String>, domain: Ty, codomain: Ty) -> Ty {
        Ty::Sigma {
            var: var.into(),
            domain: Box::new(domain),
            codomain: Box::new(codomain),
        }
    }

    pub fn refinement(var: impl Into<String>, base: Ty, predicate: impl Into<String>) -> Ty {
        Ty::Refinement {
            var: var.into(),
            base: Box::new(base),
            predicate: predicate.into(),
        }
    }

    pub fn linear(inner: Ty) -> Ty {
        Ty::Linear {
            inner: Box::new(inner),
        }
    }

    pub fn affine(inner: Ty) -> Ty {
        Ty::Affine {
            inner: Box::new(inner),
        }
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, Ty::Linear { .. })
    }

    pub fn is_affine(&self) -> bool {
        matches!(self, Ty::Affine { .. })
    }

    /// Strips refinement wrappers; subtyping looks through them and leaves
    /// predicate equality to the SMT interface.
    pub fn erase_refinement(&self) -> &Ty {
        match self {
            Ty::Refinement { base, .. } => base.erase_refinement(),
            other => other,
        }
    }

    /// Human-readable rendering (`i64`, `*i64`, `fn(i64) -> i64`, …).
    pub fn display_name(&self) -> String {
        match self {
            Ty::Unit => "unit".into(),
            Ty::Bool => "bool".into(),
            Ty::Int { bits, signed } => {
                format!("{}{bits}", if *signed { "i" } else { "u" })
            }
            Ty::Float { bits } => format!("f{bits}"),
            Ty::Ptr { pointee, .. } => format!("*{}", pointee.display_name()),
            Ty::Array { elem, len } => format!("[{}; {len}]", elem.display_name()),
            Ty::Tensor { elem, shape } => {
                let dims: Vec<String> = shape.iter().map(Dim::to_string).collect();
                format!("tensor<{}, [{}]>", elem.display_name(), dims.join(","))
            }
            Ty::Fn { params, ret, effects } => {
                let params: Vec<String> = params.iter().map(Ty::display_name).collect();
                let effect_row = if effects.is_empty() {
                    String::new()
                } else {
                    let names: Vec<String> =
                        effects.iter().map(|e| format!("{e:?}")).collect();
                    format!(" ! {}", names.join(", "))
                };
                format!("fn({}) -> {}{effect_row}", params.join(", "), ret.display_name())
            }
            Ty::Struct { name, .. } => name.clone(),
            Ty::Region { name } => format!("region<{name}>"),
            Ty::Pi { var, domain, codomain, .. } => format!(
                "Π({var}:{}).{}",
                domain.display_name(),
                codomain.display_name()
            ),
            Ty::Sigma { var, domain, codomain } => format!(
                "Σ({var}:{}).{}",
                domain.display_name(),
                codomain.display_name()
            ),
            Ty::Refinement { var, base, predicate } => {
                format!("{{{var}:{} | {predicate}}}", base.display_name())
            }
            Ty::Linear { inner } => format!("lin {}", inner.display_name()),
            Ty::Affine { inner } => format!("aff {}", inner.display_name()),
        }
    }
}

/// Subtyping and unification over [`Ty`].
#[derive(Debug, Default)]
pub struct TypeSystem;

impl TypeSystem {
    pub fn new() -> Self {
        Self
    }

    /// t1 <: t2. Integers widen by bit width; pointers are covariant in the
    /// pointee within the same region; refinements are transparent.
    pub fn subtype(&self, t1: &Ty, t2: &Ty) -> bool {
        let t1 = t1.erase_refinement();
        let t2 = t2.erase_refinement();
        match (t1, t2) {
            (Ty::Int { bits: b1, .. }, Ty::Int { bits: b2, .. }) => b1 <= b2,
            (
                Ty::Ptr {
                    pointee: p1,
                    region: r1,
                },
                Ty::Ptr {
                    pointee: p2,
                    region: r2,
                },
            ) => r1 == r2 && self.subtype(p1, p2),
            _ => t1 == t2,
        }
    }

    /// The supremum of two types, when one exists.
    pub fn unify(&self, t1: &Ty, t2: &Ty) -> Option<Ty> {
        if t1 == t2 {
            return Some(t1.clone());
        }
        if self.subtype(t1, t2) {
            return Some(t2.clone());
        }
        if self.subtype(t2, t1) {
            return Some(t1.clone());
        }
        None
    }
}
