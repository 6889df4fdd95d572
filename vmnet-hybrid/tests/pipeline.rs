//! End-to-end runs of both backends on small trees.

use std::collections::BTreeSet;
use std::time::Duration;

use vmnet_core::{
    build_vm_model, decode_placement, NodeId, TierRule, TopologyConfig, Tree, VmDemand, VmId,
    VmPlacement, Workload, WorkloadConfig,
};
use vmnet_hybrid::{
    check, compile, AnnealSettings, AnnealingSampler, Backend, BranchAndBoundSolver,
    ExactSolver, OrchestratorSettings, PenaltyOrchestrator, PenaltyWeights, PipelineReport,
    SolveStatus, StageStatus, TwoStagePipeline, WeightDefaults,
};

fn default_case(depth: usize) -> (Tree, Workload) {
    let tree = TopologyConfig::binary(depth, 10.0, 5.0, 10.0, 2.0).build().unwrap();
    let workload = WorkloadConfig::default().generate(&tree).unwrap();
    (tree, workload)
}

fn exact() -> Backend {
    Backend::exact(BranchAndBoundSolver::default(), Duration::from_secs(30))
}

fn hybrid(seed: u64) -> Backend {
    let sampler = AnnealingSampler::new(AnnealSettings::default().with_seed(seed));
    Backend::hybrid(sampler, OrchestratorSettings::default().with_max_iterations(20))
}

/// Every decoded route is exactly the tree path between the two hosts.
fn assert_routes_follow_tree(tree: &Tree, workload: &Workload, report: &PipelineReport) {
    let placement = report.placement.as_ref().unwrap();
    let routes = report.routes.as_ref().unwrap();
    assert_eq!(routes.len(), workload.num_flows());

    for (f, flow) in workload.flows() {
        let src = placement.host(flow.src).unwrap();
        let dst = placement.host(flow.dst).unwrap();
        let expected: BTreeSet<_> = tree.route(src, dst).unwrap().into_iter().collect();
        let found: BTreeSet<_> = routes[f.0].iter().copied().collect();
        assert_eq!(found, expected, "flow {}", f);
    }
}

/// Root with two leaves, every node able to host 10 units.
fn half_capacity_case() -> (Tree, Vec<VmDemand>) {
    let rule = TierRule {
        compute: 10.0,
        memory: 10.0,
        idle_power: 5.0,
        dynamic_power: 1.0,
        uplink_bandwidth: 5.0,
        uplink_latency: 1.0,
    };
    let tree = TopologyConfig::new(vec![2], vec![rule; 2]).build().unwrap();
    (tree, vec![VmDemand::compute(5.0); 2])
}

/// Compute load per node never exceeds the node's capacity.
fn assert_within_capacity(tree: &Tree, vms: &[VmDemand], placement: &VmPlacement) {
    for node in tree.nodes() {
        let load: f64 = vms
            .iter()
            .enumerate()
            .filter(|&(vm, _)| placement.host(VmId(vm)) == Some(node.id))
            .map(|(_, d)| d.compute)
            .sum();
        assert!(load <= node.compute, "{} carries {}", node.id, load);
    }
}

#[test]
fn test_hybrid_half_capacity_vms_split_across_leaves_or_share_root() {
    let (tree, vms) = half_capacity_case();
    let model = build_vm_model(&tree, &vms).unwrap();

    let sampler = AnnealingSampler::new(AnnealSettings::default().with_seed(3));
    let mut orchestrator = PenaltyOrchestrator::new(sampler, OrchestratorSettings::default());
    let outcome = orchestrator.solve(&model).unwrap();

    assert_eq!(outcome.status, SolveStatus::Accepted);
    let feasibility = outcome.feasibility.as_ref().unwrap();
    assert_eq!(feasibility.num_violated(), 0);

    let assignment = outcome.assignment.as_ref().unwrap();
    let placement = decode_placement(&tree, vms.len(), assignment).unwrap();
    assert_within_capacity(&tree, &vms, &placement);
    let hosts = placement.hosts();
    let leaves: Vec<NodeId> = tree.leaves().collect();
    let one_per_leaf = hosts[0] != hosts[1] && hosts.iter().all(|h| leaves.contains(h));
    let both_on_root = hosts.iter().all(|&h| h == NodeId(0));
    assert!(one_per_leaf || both_on_root, "hosts {:?}", hosts);
}

#[test]
fn test_exact_half_capacity_vms_share_one_node() {
    let (tree, vms) = half_capacity_case();
    let model = build_vm_model(&tree, &vms).unwrap();

    let mut solver = BranchAndBoundSolver::default();
    let assignment = solver.solve(&model, Duration::from_secs(10)).unwrap().unwrap();
    let placement = decode_placement(&tree, vms.len(), &assignment).unwrap();

    // One node on (idle 5) carrying both VMs (2 x 5 dynamic) beats two nodes.
    assert_eq!(placement.hosts()[0], placement.hosts()[1]);
    assert_within_capacity(&tree, &vms, &placement);
    assert!((model.objective_value(&assignment).unwrap() - 15.0).abs() < 1e-9);
}

#[test]
fn test_exact_pipeline_depth_one() {
    let (tree, workload) = default_case(1);
    let mut pipeline = TwoStagePipeline::new(exact());
    let report = pipeline.run(&tree, &workload).unwrap();

    assert!(report.is_complete());
    assert_eq!(report.vm.status, StageStatus::Solved);
    // Each 6 unit VM needs its own leaf, so the flow crosses the root.
    let hosts = report.placement.as_ref().unwrap().hosts().to_vec();
    assert_ne!(hosts[0], hosts[1]);
    assert_routes_follow_tree(&tree, &workload, &report);
    assert!(report.total_objective().is_some());
}

#[test]
fn test_exact_pipeline_depth_two() {
    let (tree, workload) = default_case(2);
    let mut pipeline = TwoStagePipeline::new(exact());
    let report = pipeline.run(&tree, &workload).unwrap();

    assert!(report.is_complete());
    assert_routes_follow_tree(&tree, &workload, &report);
}

#[test]
fn test_hybrid_pipeline_depth_one() {
    let (tree, workload) = default_case(1);
    let mut pipeline = TwoStagePipeline::new(hybrid(5));
    let report = pipeline.run(&tree, &workload).unwrap();

    assert_eq!(report.vm.status, StageStatus::Accepted);
    assert!(report.is_complete());
    assert_routes_follow_tree(&tree, &workload, &report);
}

#[test]
fn test_exact_full_model_matches_two_stage_routes() {
    let (tree, workload) = default_case(1);
    let mut pipeline = TwoStagePipeline::new(exact());
    let full = pipeline.run_full(&tree, &workload).unwrap();

    assert_eq!(full.stage.status, StageStatus::Solved);
    let placement = full.placement.unwrap();
    let routes = full.routes.unwrap();
    let src = placement.host(workload.flows[0].src).unwrap();
    let dst = placement.host(workload.flows[0].dst).unwrap();
    assert_ne!(src, dst);
    let expected: BTreeSet<_> = tree.route(src, dst).unwrap().into_iter().collect();
    assert_eq!(routes[0].iter().copied().collect::<BTreeSet<_>>(), expected);
}

#[test]
fn test_exact_optimum_is_feasible_under_penalties() {
    let (tree, workload) = default_case(1);
    let model = build_vm_model(&tree, &workload.vms).unwrap();
    let mut pipeline = TwoStagePipeline::new(exact());
    let report = pipeline.run(&tree, &workload).unwrap();
    let assignment = report.vm.assignment.unwrap();

    let feasibility = check(&model, &assignment, 1e-6).unwrap();
    assert!(feasibility.feasible);

    // Its penalty encoding carries no penalty energy.
    let weights = PenaltyWeights::from_defaults(&model, &WeightDefaults::default());
    let compiled = compile(&model, &weights).unwrap();
    let bits = compiled.encode(&assignment).unwrap();
    for i in 0..compiled.penalties().len() {
        assert!(compiled.penalty_energy(i, &bits).abs() < 1e-9);
    }
    let objective = model.objective_value(&assignment).unwrap();
    assert!((compiled.energy(&bits) - objective).abs() < 1e-9);
    assert_eq!(compiled.decode(&bits).unwrap(), assignment);
}
