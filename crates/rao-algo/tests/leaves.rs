//! Leaf lifecycle and bloom behavior, driven through the public API.

use rao_algo::search_tree::{Leaf, LeafId, LeafStatus, SearchTreeBloomer, SnapshotPool};
use rao_algo::{
    IteratingLinearOptimizerInput, LinearSensitivityEngine, ObjectiveFunction,
    OptimizationPerimeter, SearchTreeParameters, SensitivityComputer, SensitivityEngine,
    SensitivityRequest, SensitivityValues,
};
use rao_core::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn preventive() -> UsageRule {
    UsageRule::OnInstant {
        instant: Instant::Preventive,
    }
}

fn topo(id: &str, element: &str) -> Arc<NetworkAction> {
    topo_of("FR", id, element)
}

fn topo_of(operator: &str, id: &str, element: &str) -> Arc<NetworkAction> {
    Arc::new(
        NetworkAction::new(
            id,
            operator,
            vec![ElementaryAction::Topology {
                element: element.into(),
                action: ActionType::Open,
            }],
        )
        .with_usage_rule(preventive()),
    )
}

fn root_snapshot() -> NetworkSnapshot {
    NetworkSnapshot::new("root")
        .with_element("line-1", true)
        .with_element("line-a", true)
        .with_element("line-b", true)
        .with_element("line-c", true)
}

struct CountingEngine {
    inner: LinearSensitivityEngine,
    calls: AtomicUsize,
}

impl SensitivityEngine for CountingEngine {
    fn name(&self) -> &str {
        "counting"
    }

    fn run(&self, snapshot: &NetworkSnapshot, request: &SensitivityRequest<'_>) -> RaoResult<SensitivityValues> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.run(snapshot, request)
    }
}

struct Setup {
    perimeter: Arc<OptimizationPerimeter>,
    engine: Arc<CountingEngine>,
    computer: SensitivityComputer,
    objective: ObjectiveFunction,
    pool: Arc<SnapshotPool>,
    actions: Vec<Arc<NetworkAction>>,
}

fn setup(params: &SearchTreeParameters) -> Setup {
    setup_with_operators(params, ["FR", "FR", "FR"])
}

fn setup_with_operators(params: &SearchTreeParameters, operators: [&str; 3]) -> Setup {
    let root = root_snapshot();
    let actions = vec![
        topo_of(operators[0], "a", "line-a"),
        topo_of(operators[1], "b", "line-b"),
        topo_of(operators[2], "c", "line-c"),
    ];
    let cnec = FlowCnec::new("c-1", "FR", "line-1", State::preventive())
        .with_symmetric_threshold(Unit::Megawatt, 100.0);
    let perimeter = Arc::new(
        OptimizationPerimeter::new(State::preventive(), vec![Arc::new(cnec)], actions.clone(), vec![]).unwrap(),
    );
    let engine = Arc::new(CountingEngine {
        inner: LinearSensitivityEngine::new(root.clone())
            .with_reference_flow("c-1", 110.0)
            .with_topology_shift("c-1", "line-a", -3.0)
            .with_topology_shift("c-1", "line-b", -2.0)
            .with_topology_shift("c-1", "line-c", -1.0),
        calls: AtomicUsize::new(0),
    });
    let computer =
        SensitivityComputer::new(engine.clone(), perimeter.clone(), params, None, &root).unwrap();
    let initial = computer.compute(&root).unwrap();
    let objective = ObjectiveFunction::build(&perimeter, &initial, params).unwrap();
    Setup {
        perimeter,
        engine,
        computer,
        objective,
        pool: SnapshotPool::new(root, 4),
        actions,
    }
}

fn combination(actions: &[&Arc<NetworkAction>]) -> NetworkActionCombination {
    NetworkActionCombination::new(
        actions.iter().map(|na| Arc::clone(na)).collect(),
        CombinationOrigin::Predefined,
    )
}

fn labels(candidates: &[NetworkActionCombination]) -> Vec<String> {
    candidates.iter().map(|c| c.concatenated_id()).collect()
}

#[test]
fn test_evaluation_runs_once() {
    let s = setup(&SearchTreeParameters::default());
    let calls_before = s.engine.calls.load(Ordering::SeqCst);

    let mut leaf = Leaf::root(LeafId(0), &s.pool).unwrap();
    leaf.evaluate(&s.objective, &s.computer);
    let first = leaf.cost().unwrap();
    leaf.evaluate(&s.objective, &s.computer);
    leaf.evaluate(&s.objective, &s.computer);

    assert_eq!(s.engine.calls.load(Ordering::SeqCst), calls_before + 1);
    assert_eq!(leaf.cost().unwrap(), first);
    assert_eq!(leaf.status(), LeafStatus::Evaluated);
}

#[test]
fn test_child_replays_parent_actions() {
    let s = setup(&SearchTreeParameters::default());
    let mut root = Leaf::root(LeafId(0), &s.pool).unwrap();
    root.evaluate(&s.objective, &s.computer);
    let child = Leaf::child(LeafId(1), &root, NetworkActionCombination::single(s.actions[0].clone()), &s.pool).unwrap();
    let grandchild =
        Leaf::child(LeafId(2), &child, NetworkActionCombination::single(s.actions[2].clone()), &s.pool).unwrap();

    let snapshot = grandchild.snapshot().unwrap();
    assert_eq!(snapshot.is_connected("line-a"), Some(false));
    assert_eq!(snapshot.is_connected("line-b"), Some(true));
    assert_eq!(snapshot.is_connected("line-c"), Some(false));
    let applied: Vec<&str> = grandchild
        .applied_network_actions()
        .iter()
        .map(|na| na.id.as_str())
        .collect();
    assert_eq!(applied, vec!["a", "c"]);
    // the parents' snapshots are untouched
    assert_eq!(root.snapshot().unwrap().is_connected("line-a"), Some(true));
    assert_eq!(child.snapshot().unwrap().is_connected("line-c"), Some(true));
}

#[test]
fn test_bloom_respects_max_ra() {
    let mut params = SearchTreeParameters::default();
    params.usage_limits.max_ra = Some(2);
    // generous operator limits that never bind
    params.usage_limits.max_tso = Some(3);
    for tso in ["FR", "BE", "NL"] {
        params.usage_limits.max_topo_per_tso.insert(tso.into(), 1);
    }
    let s = setup_with_operators(&params, ["FR", "BE", "NL"]);
    let [a, b, c] = [&s.actions[0], &s.actions[1], &s.actions[2]];
    let predefined = vec![combination(&[a, b]), combination(&[b, c]), combination(&[a, b, c])];
    let bloomer = SearchTreeBloomer::new(&s.perimeter, &params, &predefined, &[], None);

    let mut root = Leaf::root(LeafId(0), &s.pool).unwrap();
    root.evaluate(&s.objective, &s.computer);
    let at_root = bloomer.bloom(&root, None).unwrap();
    // the three-action combination exceeds max_ra
    assert_eq!(labels(&at_root), vec!["a + b", "b + c", "a", "b", "c"]);

    let mut child = Leaf::child(LeafId(1), &root, NetworkActionCombination::single(a.clone()), &s.pool).unwrap();
    child.evaluate(&s.objective, &s.computer);
    let below_a = bloomer.bloom(&child, None).unwrap();
    // {a, b} was tested at depth 1, {b, c} on top of a makes three actions
    assert_eq!(labels(&below_a), vec!["c"]);
    for candidate in &below_a {
        assert!(candidate.len() + child.activated_network_actions().len() <= 2);
    }
}

#[test]
fn test_bloom_per_operator_limits() {
    let mut params = SearchTreeParameters::default();
    params.usage_limits.max_topo_per_tso.insert("FR".into(), 1);
    let s = setup(&params);
    let bloomer = SearchTreeBloomer::new(&s.perimeter, &params, &[], &[], None);

    let mut root = Leaf::root(LeafId(0), &s.pool).unwrap();
    root.evaluate(&s.objective, &s.computer);
    assert_eq!(bloomer.bloom(&root, None).unwrap().len(), 3);

    let mut child =
        Leaf::child(LeafId(1), &root, NetworkActionCombination::single(s.actions[1].clone()), &s.pool).unwrap();
    child.evaluate(&s.objective, &s.computer);
    assert!(bloomer.bloom(&child, None).unwrap().is_empty());
}

#[test]
fn test_bloom_skips_far_actions() {
    let mut params = SearchTreeParameters::default();
    params.network_actions.max_number_of_boundaries_for_skipping_actions = Some(1);
    let root_snapshot = root_snapshot();
    let near = Arc::new(
        NetworkAction::new(
            "near",
            "FR",
            vec![ElementaryAction::Topology {
                element: "line-a".into(),
                action: ActionType::Open,
            }],
        )
        .with_location("BE")
        .with_usage_rule(preventive()),
    );
    let far = Arc::new(
        NetworkAction::new(
            "far",
            "FR",
            vec![ElementaryAction::Topology {
                element: "line-b".into(),
                action: ActionType::Open,
            }],
        )
        .with_location("DE")
        .with_usage_rule(preventive()),
    );
    let cnec = FlowCnec::new("c-1", "FR", "line-1", State::preventive())
        .with_symmetric_threshold(Unit::Megawatt, 100.0)
        .with_location("FR");
    let perimeter = Arc::new(
        OptimizationPerimeter::new(State::preventive(), vec![Arc::new(cnec)], vec![near, far], vec![]).unwrap(),
    );
    let engine = Arc::new(LinearSensitivityEngine::new(root_snapshot.clone()).with_reference_flow("c-1", 110.0));
    let computer = SensitivityComputer::new(engine, perimeter.clone(), &params, None, &root_snapshot).unwrap();
    let initial = computer.compute(&root_snapshot).unwrap();
    let objective = ObjectiveFunction::build(&perimeter, &initial, &params).unwrap();
    let pool = SnapshotPool::new(root_snapshot, 1);

    let graph = AreaGraph::from_boundaries(&parse_boundaries(&["FR-BE", "BE-NL", "NL-DE"]).unwrap());
    let bloomer = SearchTreeBloomer::new(&perimeter, &params, &[], &[], Some(&graph));
    let mut root = Leaf::root(LeafId(0), &pool).unwrap();
    root.evaluate(&objective, &computer);
    assert_eq!(labels(&bloomer.bloom(&root, None).unwrap()), vec!["near"]);

    let unpruned = SearchTreeBloomer::new(&perimeter, &params, &[], &[], None);
    assert_eq!(labels(&unpruned.bloom(&root, None).unwrap()), vec!["far", "near"]);
}

#[test]
fn test_accessors_need_evaluation() {
    let s = setup(&SearchTreeParameters::default());
    let leaf = Leaf::root(LeafId(0), &s.pool).unwrap();
    assert!(matches!(leaf.functional_cost(), Err(RaoError::ContractViolation(_))));
    assert!(matches!(leaf.costly_elements("mnec-cost", 1), Err(RaoError::ContractViolation(_))));
    let params = SearchTreeParameters::default();
    let bloomer = SearchTreeBloomer::new(&s.perimeter, &params, &[], &[], None);
    assert!(bloomer.bloom(&leaf, None).is_err());
}

#[test]
fn test_child_starts_from_parent_optimized_taps() {
    let root_snapshot = root_snapshot().with_tap("pst-1", 0);
    let table = (-10..=10).map(|t| (t, t as f64 * 0.5)).collect();
    let pst = RangeAction::pst("pst", "FR", "pst-1", table).with_usage_rule(preventive());
    let cnec = FlowCnec::new("c-1", "FR", "line-1", State::preventive())
        .with_symmetric_threshold(Unit::Megawatt, 100.0);
    let perimeter = Arc::new(
        OptimizationPerimeter::new(
            State::preventive(),
            vec![Arc::new(cnec)],
            vec![topo("a", "line-a")],
            vec![Arc::new(pst)],
        )
        .unwrap(),
    );
    let engine = Arc::new(
        LinearSensitivityEngine::new(root_snapshot.clone())
            .with_reference_flow("c-1", 110.0)
            .with_sensitivity("c-1", "pst-1", -4.0)
            .with_topology_shift("c-1", "line-a", -3.0),
    );
    let params = SearchTreeParameters::default();
    let computer = SensitivityComputer::new(engine, perimeter.clone(), &params, None, &root_snapshot).unwrap();
    let initial = computer.compute(&root_snapshot).unwrap();
    let objective = ObjectiveFunction::build(&perimeter, &initial, &params).unwrap();
    let input = IteratingLinearOptimizerInput {
        computer: &computer,
        objective: &objective,
        pre_perimeter_flows: &initial,
    };
    let pool = SnapshotPool::new(root_snapshot, 2);

    let mut root = Leaf::root(LeafId(0), &pool).unwrap();
    root.evaluate(&objective, &computer);
    root.optimize(&input, &params).unwrap();
    assert_eq!(root.snapshot().unwrap().tap("pst-1"), Some(10));

    let a = perimeter.network_actions()[0].clone();
    let mut child = Leaf::child(LeafId(1), &root, NetworkActionCombination::single(a), &pool).unwrap();
    assert_eq!(child.snapshot().unwrap().tap("pst-1"), Some(10));
    assert_eq!(child.snapshot().unwrap().is_connected("line-a"), Some(false));

    // 110 - 20 - 3 = 87 MW
    child.evaluate(&objective, &computer);
    assert!((child.cost().unwrap() + 13.0).abs() < 1e-6);
}
