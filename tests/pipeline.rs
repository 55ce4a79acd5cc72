//! End-to-end scenarios over the whole core: build a graph, run the
//! checks, synthesize and verify proofs, fuse, schedule, and inspect the
//! emitted sections.

use pretty_assertions::assert_eq;
use serde_json::json;

use sirc::effects::{Effect, EffectSet, analyze_deadlocks, analyze_races};
use sirc::fusion::KernelFuser;
use sirc::memory::RegionManager;
use sirc::proof::{ProofKind, ProofSynthesizer, ProofTerm, ProofVerifier};
use sirc::schedule::{AdaptiveScheduler, Device, DeviceKind, TaskStatus};
use sirc::sir::{
    GraphBuilder, HardwareAffinity, HyperEdge, HyperGraph, ParallelismKind, Vertex, VertexKind,
};
use sirc::types::Ty;
use sirc::{CoreCtxt, compile_module};

/// Serialize, deserialize, re-serialize: the third step's bytes equal the
/// first's.
#[test]
fn round_trip_is_byte_stable() {
    let mut g = HyperGraph::new("round_trip");
    let c1 = g.add_vertex(Vertex::constant(json!(42), Some(Ty::i64())));
    let c2 = g.add_vertex(Vertex::constant(json!(1), Some(Ty::i64())));
    let a = g.add_vertex(Vertex::apply(
        "op_+",
        Ty::i64(),
        EffectSet::from([Effect::Pure]),
    ));
    g.add_edge(HyperEdge::data_flow([c1], [a.clone()]));
    g.add_edge(HyperEdge::data_flow([c2], [a]));

    let first = g.to_json_string();
    let reloaded = HyperGraph::from_dict(&g.serialize()).expect("round trip");
    let third = reloaded.to_json_string();
    assert_eq!(first, third);
}

/// A load reachable only after the free of its allocation: proof synthesis
/// must fail, and a forged proof must be rejected by the verifier.
#[test]
fn use_after_free_has_no_proof_and_forgeries_fail() {
    let mut g = HyperGraph::new("use_after_free");
    let alloc = g.add_vertex(Vertex::alloc(8u64.into(), Ty::i64(), "heap"));
    let free = g.add_vertex(Vertex::apply(
        "free",
        Ty::unit(),
        EffectSet::from([Effect::Free]),
    ));
    let load = g.add_vertex(Vertex::load(Ty::i64(), "heap"));
    g.add_edge(HyperEdge::data_flow([alloc.clone()], [free.clone()]));
    g.add_edge(HyperEdge::data_flow([alloc], [load.clone()]));
    g.add_edge(HyperEdge::data_flow([free], [load]));

    let mut synthesizer = ProofSynthesizer::new();
    let proofs = synthesizer.synthesize(&g, &RegionManager::new());
    assert!(proofs.iter().all(|p| p.kind != ProofKind::MemorySafety));

    // Forge the proof the synthesizer refused to produce.
    let forged = ProofTerm::new(ProofKind::MemorySafety, "memory_safe(program)")
        .with_premises(vec!["valid_alloc".into()])
        .with_evidence(json!({
            "allocations": [
                {"id": 0, "vertex_id": "a", "region": "heap", "size": 8, "program_point": 1}
            ],
            "frees": [{"alloc_id": 0, "vertex_id": "f", "program_point": 2}],
            "uses": [{"vertex_id": "l", "alloc_id": 0, "program_point": 3}],
        }));
    let mut verifier = ProofVerifier::new();
    assert!(!verifier.verify(&forged));
}

/// Two parallel stores to one region, no ordering edge: exactly one race
/// pair, no race-freedom proof, capability bit 1 clear.
#[test]
fn parallel_stores_race_and_cost_the_capability_bit() {
    let mut g = HyperGraph::new("race");
    let s1 = g.add_vertex(Vertex::store(Ty::i64(), "heap"));
    let s2 = g.add_vertex(Vertex::store(Ty::i64(), "heap"));
    g.add_edge(HyperEdge::parallel(
        [s1.clone(), s2.clone()],
        ParallelismKind::Simd,
        HardwareAffinity::Any,
    ));

    let analysis = analyze_races(&g);
    assert_eq!(analysis.race_pairs.len(), 1);
    let (first, second, _) = &analysis.race_pairs[0];
    let pair = [first.clone(), second.clone()];
    assert!(pair.contains(&s1) && pair.contains(&s2));

    let mut ctxt = CoreCtxt::new();
    let module = compile_module(
        &mut ctxt,
        &g,
        vec![Device::new("cpu0", DeviceKind::Cpu, 1.0)],
    );
    assert!(module.proofs.iter().all(|p| p.kind != ProofKind::RaceFreedom));
    assert_eq!(module.capability_bits & ProofKind::RaceFreedom.bit(), 0);
}

/// Two GPU kernels with identical launch dimensions fuse into one, with
/// combined effects, a ≥ 2× estimate, and the boundary edges re-homed.
#[test]
fn identical_kernels_fuse_into_one_launch() {
    let mut g = HyperGraph::new("kernels");
    let input = g.add_vertex(Vertex::alloc(1024u64.into(), Ty::f32(), "gpu_global"));
    let k1 = g.add_vertex(Vertex::kernel_launch(
        "normalize",
        [16, 16, 1],
        [16, 16, 1],
        Ty::unit(),
        HardwareAffinity::Gpu,
    ));
    let k2 = g.add_vertex(Vertex::kernel_launch(
        "reduce",
        [16, 16, 1],
        [16, 16, 1],
        Ty::unit(),
        HardwareAffinity::Gpu,
    ));
    let output = g.add_vertex(Vertex::store(Ty::f32(), "gpu_global"));
    g.add_edge(HyperEdge::data_flow([input], [k1.clone()]));
    g.add_edge(HyperEdge::data_flow([k1], [k2.clone()]));
    g.add_edge(HyperEdge::data_flow([k2], [output]));

    let result = KernelFuser::new().optimize(&g, &[]);
    assert!(result.speedup_estimate >= 2.0);

    let launches: Vec<&Vertex> = result
        .graph
        .vertices()
        .filter(|v| v.kind == VertexKind::KernelLaunch)
        .collect();
    assert_eq!(launches.len(), 1);
    let fused = launches[0];
    assert!(fused.metadata.effects.contains(&Effect::Io));
    assert!(fused.metadata.effects.contains(&Effect::WarpSync));

    // Every input of the first kernel and every output of the second are
    // now incident to the fused vertex.
    let alloc = result
        .graph
        .vertices()
        .find(|v| v.kind == VertexKind::Alloc)
        .expect("alloc survives");
    assert!(
        result
            .graph
            .successors(&alloc.id)
            .iter()
            .any(|v| v.id == fused.id)
    );
    let store = result
        .graph
        .vertices()
        .find(|v| v.kind == VertexKind::Store)
        .expect("store survives");
    assert!(
        result
            .graph
            .predecessors(&store.id)
            .iter()
            .any(|v| v.id == fused.id)
    );
}

/// Three independent tasks on a CPU and a GPU: after profiling shows the
/// other device ≥ 20% faster for one task, a fresh schedule migrates it.
#[test]
fn profiling_migrates_tasks_across_devices() {
    let mut g = HyperGraph::new("independent");
    let tasks: Vec<_> = (0..3)
        .map(|i| {
            g.add_vertex(Vertex::apply(
                format!("job{i}"),
                Ty::unit(),
                EffectSet::new(),
            ))
        })
        .collect();

    let devices = vec![
        Device::new("cpu0", DeviceKind::Cpu, 1.0),
        Device::new("gpu0", DeviceKind::Gpu, 10.0),
    ];
    let mut scheduler = AdaptiveScheduler::new(devices);

    let initial = scheduler.schedule(&g);
    assert_eq!(initial.migrations, 0);
    let target = &tasks[0];
    let assigned = initial
        .task(target)
        .and_then(|t| t.assigned_device.clone())
        .expect("task was scheduled");
    let other = if assigned.as_str() == "cpu0" { "gpu0" } else { "cpu0" };

    scheduler.record_execution(target.clone(), assigned, 10.0);
    scheduler.record_execution(target.clone(), other.into(), 7.5);

    let rescheduled = scheduler.schedule(&g);
    assert!(rescheduled.migrations >= 1);
    let migrated = rescheduled.task(target).expect("task still scheduled");
    assert_eq!(migrated.status, TaskStatus::Migrated);
    assert_eq!(migrated.assigned_device.as_ref().unwrap().as_str(), other);
}

/// Two channel receives, each reachable from the other: deadlock analysis
/// reports a cycle naming both, and the deadlock-freedom proof is absent.
#[test]
fn mutual_receives_deadlock() {
    let mut g = HyperGraph::new("deadlock");
    let recv_a = g.add_vertex(Vertex::apply(
        "recv_left",
        Ty::unit(),
        EffectSet::from([Effect::ChannelRecv]),
    ));
    let recv_b = g.add_vertex(Vertex::apply(
        "recv_right",
        Ty::unit(),
        EffectSet::from([Effect::ChannelRecv]),
    ));
    g.add_edge(HyperEdge::data_flow([recv_a.clone()], [recv_b.clone()]));
    g.add_edge(HyperEdge::data_flow([recv_b.clone()], [recv_a.clone()]));

    let analysis = analyze_deadlocks(&g);
    assert!(analysis.has_deadlock);
    assert!(
        analysis.cycles[0].contains(&recv_a) && analysis.cycles[0].contains(&recv_b),
        "cycle {:?} should contain both receives",
        analysis.cycles[0]
    );

    let mut synthesizer = ProofSynthesizer::new();
    let proofs = synthesizer.synthesize(&g, &RegionManager::new());
    assert!(proofs.iter().all(|p| p.kind != ProofKind::DeadlockFreedom));
}

/// The full pipeline over a mixed-language graph, down to the emitted
/// sections.
#[test]
fn polyglot_module_compiles_to_sections() {
    let mut b = GraphBuilder::new("polyglot");
    let buf = b.alloc(4096u64.into(), Ty::array(Ty::f32(), 1024u64), "gpu_global");
    let kernel = b.kernel(
        "saxpy",
        [8, 1, 1],
        [128, 1, 1],
        &[buf.clone()],
        Ty::unit(),
        HardwareAffinity::Gpu,
    );
    let result = b.load(Ty::f32(), "gpu_global", Some(&kernel));
    b.ret(&result, Ty::f32());
    let graph = b.build();

    let mut ctxt = CoreCtxt::new();
    let module = compile_module(
        &mut ctxt,
        &graph,
        vec![
            Device::new("cpu0", DeviceKind::Cpu, 1.0),
            Device::new("gpu0", DeviceKind::Gpu, 10.0),
        ],
    );

    assert!(module.capability_bits & ProofKind::BoundedResources.bit() != 0);
    assert!(module.schedule.makespan > 0.0);

    let emit = module.emit_context(&ctxt);
    let sir_tree = emit.sir_section();
    assert_eq!(sir_tree["name"], json!("polyglot"));
    assert_eq!(emit.caps_section().len(), 1);

    let proof_bytes = emit.proof_section();
    let envelope: serde_json::Value = serde_json::from_slice(&proof_bytes).expect("valid json");
    assert_eq!(envelope["version"], json!("1.0"));
    assert!(!envelope["proofs"].as_array().unwrap().is_empty());
}
