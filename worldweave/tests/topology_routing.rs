//! Topology routing and the node-set invariant, including the literal
//! hub-spoke recipient scenario.

mod init_logging;

use worldweave::topology::{
    build_topology, RoutingMode, TopologyGraph, TopologySpec, TopologyType,
};

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn hub_spoke_recipients_under_all_modes() {
    init_logging::init();
    let agents = ids(&["mod", "s1", "s2"]);
    let graph = build_topology(&TopologySpec::hub_spoke("mod"), &agents, 0).unwrap();

    assert_eq!(
        graph.valid_recipients("s1", RoutingMode::DirectOnly),
        ids(&["mod"])
    );
    assert_eq!(
        graph.valid_recipients("s1", RoutingMode::Broadcast),
        ids(&["mod", "s2"])
    );
    // s2 is reachable through mod.
    assert_eq!(
        graph.valid_recipients("s1", RoutingMode::MultiHop),
        ids(&["mod", "s2"])
    );

    assert!(graph.can_send("s1", "mod", RoutingMode::DirectOnly));
    assert!(!graph.can_send("s1", "s2", RoutingMode::DirectOnly));
    assert!(graph.can_send("s1", "s2", RoutingMode::MultiHop));
    assert_eq!(
        graph.shortest_path("s1", "s2"),
        Some(ids(&["s1", "mod", "s2"]))
    );
}

#[test]
fn node_set_tracks_agent_set_through_changes() {
    let agents = ids(&["a", "b", "c"]);
    let mut graph = build_topology(&TopologySpec::mesh(), &agents, 0).unwrap();
    assert_eq!(graph.nodes(), agents);

    graph.add_node("d");
    assert_eq!(graph.nodes(), ids(&["a", "b", "c", "d"]));

    graph.remove_node("b");
    assert_eq!(graph.nodes(), ids(&["a", "c", "d"]));
    assert!(!graph.has_edge("a", "b"));
    assert!(graph.has_edge("a", "c"));
}

#[test]
fn every_builder_covers_the_agent_set() {
    let agents: Vec<String> = (0..9).map(|i| format!("agent{}", i)).collect();
    let specs = vec![
        TopologySpec::mesh(),
        TopologySpec::hub_spoke(agents[0].clone()),
        TopologySpec {
            topology_type: TopologyType::Hierarchical,
            branching_factor: Some(3),
            ..TopologySpec::default()
        },
        TopologySpec {
            topology_type: TopologyType::SmallWorld,
            k: Some(4),
            p: Some(0.2),
            ..TopologySpec::default()
        },
        TopologySpec {
            topology_type: TopologyType::ScaleFree,
            m: Some(2),
            ..TopologySpec::default()
        },
    ];

    for spec in specs {
        let graph = build_topology(&spec, &agents, 11).unwrap();
        assert_eq!(
            graph.nodes(),
            agents,
            "{:?} must cover the agent set",
            spec.topology_type
        );
    }
}

#[test]
fn directed_graphs_route_one_way() {
    let agents = ids(&["up", "down"]);
    let mut spec = TopologySpec::custom(vec![("up".into(), "down".into(), 1.0)]);
    spec.directed = true;
    let graph = build_topology(&spec, &agents, 0).unwrap();

    assert!(graph.can_send("up", "down", RoutingMode::DirectOnly));
    assert!(!graph.can_send("down", "up", RoutingMode::DirectOnly));
    assert!(!graph.can_send("down", "up", RoutingMode::MultiHop));
    // Broadcast ignores the topology entirely.
    assert!(graph.can_send("down", "up", RoutingMode::Broadcast));
}

#[test]
fn serialization_preserves_routing() {
    let agents = ids(&["mod", "s1", "s2"]);
    let graph = build_topology(&TopologySpec::hub_spoke("mod"), &agents, 0).unwrap();
    let restored = TopologyGraph::from_value(&graph.to_value()).unwrap();
    assert_eq!(restored, graph);
    assert_eq!(
        restored.valid_recipients("s1", RoutingMode::DirectOnly),
        ids(&["mod"])
    );
}

#[test]
fn mesh_metrics_shape() {
    let agents = ids(&["a", "b", "c", "d"]);
    let graph = build_topology(&TopologySpec::mesh(), &agents, 0).unwrap();
    let metrics = graph.metrics();
    assert_eq!(metrics.node_count, 4);
    assert_eq!(metrics.edge_count, 6);
    assert!(metrics.is_connected);
    assert_eq!(metrics.diameter, Some(1));
    assert_eq!(metrics.degree_distribution["a"], 3);
}
