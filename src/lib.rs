// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! sirc — the core of a polyglot compiler substrate.
//!
//! Source programs in several surface dialects are lifted (externally)
//! into one semantic IR: a typed, attributed hypergraph carrying
//! ownership, effects, hardware affinity, regions and provenance. This
//! crate holds the hypergraph itself, the type system, the region and
//! borrow model, the effect lattice with its race and deadlock analyses,
//! the proof synthesizer and its small trusted verifier, the
//! kernel-fusion optimizer, the adaptive scheduler, and the view backend
//! emitters lower from.
//!
//! The pipeline: lifter → [`sir::HyperGraph`] → type/borrow/effect checks
//! → proof synthesis → fusion rewrites (proof-preserving) → scheduling →
//! [`emit::EmitContext`].

pub mod effects;
pub mod emit;
pub mod error;
pub mod fusion;
pub mod memory;
pub mod proof;
pub mod schedule;
pub mod sir;
pub mod types;
pub mod utils;
#[cfg(feature = "visualization")]
pub mod visualization;

pub use effects::{Effect, EffectLattice, EffectSet};
pub use error::{Diagnostics, SirError, SirErrorKind};
pub use memory::RegionManager;
pub use proof::{ProofKind, ProofTerm};
pub use sir::{GraphBuilder, HardwareAffinity, HyperEdge, HyperGraph, Vertex};

use crate::effects::EffectChecker;
use crate::emit::EmitContext;
use crate::fusion::KernelFuser;
use crate::memory::BorrowChecker;
use crate::proof::{ProofSynthesizer, ProofVerifier};
use crate::schedule::{AdaptiveScheduler, Device, ScheduleResult};
use crate::types::TypeChecker;

/// Tunables for one compilation.
#[derive(Clone, Debug, PartialEq)]
pub struct SirSettings {
    /// Run the fusion optimizer between checking and scheduling.
    pub run_fusion: bool,
    /// Minimum profiled improvement before the scheduler migrates a task.
    pub migration_threshold: f64,
}

impl Default for SirSettings {
    fn default() -> Self {
        Self {
            run_fusion: true,
            migration_threshold: 0.2,
        }
    }
}

/// The explicit context threaded through the pipeline: owns the region
/// manager and the settings. Created at core entry, dropped at exit;
/// nothing here is global.
pub struct CoreCtxt {
    pub regions: RegionManager,
    settings: SirSettings,
}

impl Default for CoreCtxt {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreCtxt {
    pub fn new() -> Self {
        Self::with_settings(SirSettings::default())
    }

    pub fn with_settings(settings: SirSettings) -> Self {
        Self {
            regions: RegionManager::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &SirSettings {
        &self.settings
    }
}

/// Everything the pipeline produces for one module.
pub struct CompiledModule {
    /// The optimized graph the backends lower.
    pub graph: HyperGraph,
    /// Collected analysis errors and warnings. Errors do not abort
    /// compilation; they cost capability bits instead.
    pub diagnostics: Diagnostics,
    /// Proofs that survived synthesis, rewriting and verification.
    pub proofs: Vec<ProofTerm>,
    /// The `.aion_caps` byte.
    pub capability_bits: u8,
    pub schedule: ScheduleResult,
    pub speedup_estimate: f64,
}

impl CompiledModule {
    /// The lowering view handed to backend emitters.
    pub fn emit_context<'a>(&'a self, ctxt: &'a CoreCtxt) -> EmitContext<'a> {
        EmitContext::new(
            &self.graph,
            &self.schedule,
            &ctxt.regions,
            &self.proofs,
            self.capability_bits,
        )
    }
}

/// Runs the whole core over one lifted graph: checks, proof synthesis,
/// fusion, verification and scheduling.
pub fn compile_module(
    ctxt: &mut CoreCtxt,
    graph: &HyperGraph,
    devices: Vec<Device>,
) -> CompiledModule {
    tracing::info!(graph = %graph.name, "compiling module");
    let mut diagnostics = Diagnostics::new();

    // Lower the graph's memory behavior into the region manager first:
    // the borrow checker, the safety judgment and the region/lifetime
    // proofs all read this state.
    diagnostics.extend(ctxt.regions.lower_graph(graph));

    let type_checker = TypeChecker::new();
    let (_, type_diagnostics) = type_checker.check(graph);
    diagnostics.extend(type_diagnostics);
    diagnostics.extend(BorrowChecker::new(&ctxt.regions).check(graph));
    diagnostics.extend(EffectChecker::new().check(graph));
    for violation in type_checker.check_safety(graph, &ctxt.regions) {
        diagnostics.errors.push(violation);
    }

    let mut synthesizer = ProofSynthesizer::new();
    let proofs = synthesizer.synthesize(graph, &ctxt.regions);
    for omitted in synthesizer.errors() {
        diagnostics.warn(omitted.clone());
    }

    let (optimized, proofs, speedup) = if ctxt.settings.run_fusion {
        let result = KernelFuser::new().optimize(graph, &proofs);
        (result.graph, result.proofs, result.speedup_estimate)
    } else {
        (graph.clone_graph(), proofs, 1.0)
    };

    // Verification gates the capability bits; a failing proof is dropped
    // from the emitted list and leaves its bit clear.
    let mut verifier = ProofVerifier::new();
    let mut verified = Vec::new();
    let mut capability_bits = 0u8;
    for proof in proofs {
        if verifier.verify(&proof) {
            capability_bits |= proof.kind.bit();
            verified.push(proof);
        } else {
            diagnostics.warn(format!(
                "proof of {} rejected by the verifier",
                proof.kind.name()
            ));
        }
    }

    let mut scheduler = AdaptiveScheduler::new(devices);
    scheduler.migration_threshold = ctxt.settings.migration_threshold;
    let schedule = scheduler.schedule(&optimized);

    CompiledModule {
        graph: optimized,
        diagnostics,
        proofs: verified,
        capability_bits,
        schedule,
        speedup_estimate: speedup,
    }
}
