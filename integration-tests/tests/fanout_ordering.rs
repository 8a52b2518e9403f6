use aerofleet_orchestrator::backend::stub::StubBackend;
use aerofleet_orchestrator::backend::Backend;
use aerofleet_orchestrator::{ClusterRole, NodeId};

#[tokio::test]
async fn test_run_commands_keeps_node_order_for_any_limit() {
    let stub = StubBackend::new();
    stub.seed_cluster(ClusterRole::Server, "dc1", 5, "service {\n}\n");
    stub.fail_commands_on(NodeId(3));
    let nodes: Vec<NodeId> = (1..=5).map(NodeId).collect();
    let commands = vec![vec!["cat".to_string(), "/etc/aerospike/aerospike.conf".to_string()]];

    for limit in [0, 1, 4] {
        let outputs = stub
            .run_commands(ClusterRole::Server, "dc1", &commands, &nodes, limit)
            .await
            .unwrap();

        let order: Vec<NodeId> = outputs.iter().map(|o| o.node).collect();
        assert_eq!(order, nodes, "limit {}", limit);
        for output in &outputs {
            if output.node == NodeId(3) {
                assert!(output.error.is_some());
            } else {
                assert!(output.error.is_none());
                assert_eq!(output.stdout(), "service {\n}\n");
            }
        }
    }
}

