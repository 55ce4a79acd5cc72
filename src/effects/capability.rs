use serde_derive::{Deserialize, Serialize};
use serde_json::json;

use crate::effects::lattice::{Effect, EffectLattice, EffectSet};

/// A right to perform an effect, possibly scoped to a region.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capability {
    pub effect: Effect,
    pub region: Option<String>,
    pub exclusive: bool,
}

impl Capability {
    pub fn new(effect: Effect) -> Self {
        Self {
            effect,
            region: None,
            exclusive: false,
        }
    }

    pub fn scoped(effect: Effect, region: impl Into<String>) -> Self {
        Self {
            effect,
            region: Some(region.into()),
            exclusive: false,
        }
    }

    pub fn can_perform(&self, effect: Effect) -> bool {
        EffectLattice::leq(effect, self.effect)
    }

    /// Combines two capabilities: effects join, regions intersect (differing
    /// regions drop the scope), exclusivity conjoins.
    pub fn combine(&self, other: &Capability) -> Capability {
        Capability {
            effect: EffectLattice::join(self.effect, other.effect),
            region: if self.region == other.region {
                self.region.clone()
            } else {
                None
            },
            exclusive: self.exclusive && other.exclusive,
        }
    }
}

/// The effect row of a function type: `Fn(params) -> ret ! effects`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FunctionEffect {
    pub effects: EffectSet,
    pub required_caps: Vec<Capability>,
    pub granted_caps: Vec<Capability>,
}

impl FunctionEffect {
    pub fn new(effects: EffectSet) -> Self {
        Self {
            effects,
            required_caps: Vec::new(),
            granted_caps: Vec::new(),
        }
    }

    pub fn pure_fn() -> Self {
        Self::new(EffectSet::from([Effect::Pure]))
    }

    pub fn io_fn() -> Self {
        Self::new(EffectSet::from([Effect::Io]))
    }

    pub fn concurrent_fn<I: IntoIterator<Item = Effect>>(effects: I) -> Self {
        Self::new(effects.into_iter().collect())
    }

    /// Derived flag: a function is pure iff it declares no effect beyond
    /// [`Effect::Pure`].
    pub fn is_pure(&self) -> bool {
        self.effects.is_empty() || self.effects.iter().all(|&e| e == Effect::Pure)
    }

    /// Composition: effects and requirements union, grants intersect.
    pub fn join(&self, other: &FunctionEffect) -> FunctionEffect {
        let mut required = self.required_caps.clone();
        for cap in &other.required_caps {
            if !required.contains(cap) {
                required.push(cap.clone());
            }
        }
        FunctionEffect {
            effects: self.effects.union(&other.effects).copied().collect(),
            required_caps: required,
            granted_caps: self
                .granted_caps
                .iter()
                .filter(|c| other.granted_caps.contains(c))
                .cloned()
                .collect(),
        }
    }

    pub fn can_call_with(&self, caps: &[Capability]) -> bool {
        self.required_caps
            .iter()
            .all(|req| caps.iter().any(|c| c.can_perform(req.effect)))
    }

    pub fn to_json(&self) -> serde_json::Value {
        let caps = |caps: &[Capability]| {
            caps.iter()
                .map(|c| json!({ "effect": c.effect, "region": c.region }))
                .collect::<Vec<_>>()
        };
        json!({
            "effects": self.effects,
            "required_caps": caps(&self.required_caps),
            "granted_caps": caps(&self.granted_caps),
            "pure": self.is_pure(),
        })
    }
}
