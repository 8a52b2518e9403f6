use aerofleet_orchestrator::confpatch::SeedPolicy;
use aerofleet_orchestrator::services::{fix_mesh, ClusterLifecycle, ClusterSpec, DeployState};
use aerofleet_orchestrator::{ClusterRole, DeployError, NodeId};

use crate::common::{seed_ips, spec, TestFleet, LATEST_VERSION};

#[tokio::test]
async fn test_create_grow_and_fix_mesh() {
    let fleet = TestFleet::new();

    let created = fleet.deployer.create(&spec("dc1", 3)).await.unwrap();
    assert_eq!(created.state, DeployState::Done);
    assert_eq!(created.new_nodes, vec![NodeId(1), NodeId(2), NodeId(3)]);
    assert_eq!(created.template.version, LATEST_VERSION);
    for n in 1..=3 {
        assert_eq!(created.heartbeat_transformations[&NodeId(n)], 2);
        assert_eq!(
            seed_ips(&fleet.conf("dc1", n)),
            vec!["172.17.0.2", "172.17.0.3", "172.17.0.4"]
        );
    }

    let grown = fleet.deployer.grow(&spec("dc1", 2)).await.unwrap();
    assert_eq!(grown.new_nodes, vec![NodeId(4), NodeId(5)]);
    assert!(grown.template_cache_hit);
    assert_eq!(seed_ips(&fleet.conf("dc1", 1)).len(), 3);
    assert_eq!(seed_ips(&fleet.conf("dc1", 5)).len(), 5);

    let report = fix_mesh(&fleet.backend, "dc1", SeedPolicy::AllNodes, 2)
        .await
        .unwrap();
    assert_eq!(report.patched.len(), 5);
    assert!(report.skipped.is_empty());
    for n in 1..=5 {
        assert_eq!(seed_ips(&fleet.conf("dc1", n)).len(), 5);
    }
}

#[tokio::test]
async fn test_fix_mesh_skips_stopped_nodes_and_excludes_self() {
    let fleet = TestFleet::new();
    fleet.deployer.create(&spec("dc1", 3)).await.unwrap();

    let lifecycle = ClusterLifecycle::new(fleet.backend.clone());
    lifecycle
        .stop(ClusterRole::Server, "dc1", Some(&[NodeId(3)][..]))
        .await
        .unwrap();

    let report = fix_mesh(&fleet.backend, "dc1", SeedPolicy::ExcludeSelf, 0)
        .await
        .unwrap();
    assert_eq!(report.patched, vec![NodeId(1), NodeId(2)]);
    assert_eq!(report.skipped, vec![NodeId(3)]);
    assert_eq!(seed_ips(&fleet.conf("dc1", 1)), vec!["172.17.0.3"]);
    assert_eq!(seed_ips(&fleet.conf("dc1", 2)), vec!["172.17.0.2"]);
    // untouched while stopped
    assert_eq!(seed_ips(&fleet.conf("dc1", 3)).len(), 3);
}

#[tokio::test]
async fn test_invalid_requests_leave_backend_untouched() {
    let fleet = TestFleet::new();

    let requests = [
        spec("", 1),
        spec("dc1", 0),
        ClusterSpec {
            multicast_port: Some("9918".to_string()),
            ..spec("dc1", 1)
        },
        spec("dc1", 256),
    ];
    for request in &requests {
        let err = fleet.deployer.create(request).await.unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)), "{:?}", err);
    }

    let err = fleet.deployer.grow(&spec("dc1", 1)).await.unwrap_err();
    assert!(matches!(err, DeployError::Validation(_)));

    assert_eq!(fleet.stub.deploy_template_calls(), 0);
    assert!(fleet.source.downloads().is_empty());
    assert!(fleet
        .backend
        .cluster_list(ClusterRole::Server)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_create_rejects_existing_cluster() {
    let fleet = TestFleet::new();
    fleet.deployer.create(&spec("dc1", 1)).await.unwrap();

    let err = fleet.deployer.create(&spec("dc1", 1)).await.unwrap_err();
    assert!(matches!(err, DeployError::Validation(_)));
    assert_eq!(
        fleet
            .backend
            .node_list_in_cluster(ClusterRole::Server, "dc1")
            .await
            .unwrap(),
        vec![NodeId(1)]
    );
}

#[tokio::test]
async fn test_autostart_failure_is_a_distribution_error() {
    let fleet = TestFleet::new();
    fleet.stub.fail_commands_matching("service aerospike start");

    let err = fleet.deployer.create(&spec("dc1", 2)).await.unwrap_err();
    assert_eq!(err.failed_nodes(), vec![NodeId(1), NodeId(2)]);
}

#[tokio::test]
async fn test_lifecycle_list_and_partial_destroy() {
    let fleet = TestFleet::new();
    fleet.deployer.create(&spec("dc2", 2)).await.unwrap();
    fleet.deployer.create(&spec("dc1", 3)).await.unwrap();

    let lifecycle = ClusterLifecycle::new(fleet.backend.clone());
    let clusters = lifecycle.list(ClusterRole::Server).await.unwrap();
    let names: Vec<&str> = clusters.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["dc1", "dc2"]);
    assert_eq!(clusters[0].ips.len(), 3);

    let err = lifecycle
        .destroy(ClusterRole::Server, "dc1", Some(&[NodeId(9)][..]))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Validation(_)));

    lifecycle
        .destroy(ClusterRole::Server, "dc1", Some(&[NodeId(2)][..]))
        .await
        .unwrap();
    assert_eq!(
        fleet
            .backend
            .node_list_in_cluster(ClusterRole::Server, "dc1")
            .await
            .unwrap(),
        vec![NodeId(1), NodeId(3)]
    );

    lifecycle.destroy(ClusterRole::Server, "dc2", None).await.unwrap();
    let clusters = lifecycle.list(ClusterRole::Server).await.unwrap();
    assert_eq!(clusters.len(), 1);
}
