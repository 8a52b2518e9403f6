use aerofleet_orchestrator::services::ClusterSpec;
use aerofleet_orchestrator::{Arch, ClusterRole, DeployError, ExtraParams, TemplateKey};

use crate::common::{spec, TestFleet, LATEST_UBUNTU, LATEST_VERSION};

#[tokio::test]
async fn test_template_is_shared_across_clusters() {
    let fleet = TestFleet::new();

    let first = fleet.deployer.create(&spec("dc1", 1)).await.unwrap();
    let second = fleet.deployer.create(&spec("dc2", 2)).await.unwrap();

    assert!(!first.template_cache_hit);
    assert!(second.template_cache_hit);
    assert_eq!(first.template, second.template);
    assert_eq!(first.template.distro_version, LATEST_UBUNTU);
    assert_eq!(fleet.stub.deploy_template_calls(), 1);
    assert_eq!(fleet.source.downloads().len(), 1);
}

#[tokio::test]
async fn test_failed_build_is_vacuumed_and_nothing_deployed() {
    let fleet = TestFleet::new();
    fleet.stub.fail_deploy_template();

    let err = fleet.deployer.create(&spec("dc1", 2)).await.unwrap_err();
    assert!(matches!(err, DeployError::Provisioning(_)), "{:?}", err);
    assert!(fleet.stub.build_instances().is_empty());
    assert!(fleet.stub.templates().is_empty());
    assert!(fleet
        .backend
        .cluster_list(ClusterRole::Server)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_failed_build_kept_for_inspection() {
    let fleet = TestFleet::new();
    fleet.stub.fail_deploy_template();

    let err = fleet
        .deployer
        .create(&ClusterSpec {
            no_vacuum_on_fail: true,
            ..spec("dc1", 1)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Provisioning(_)));
    assert_eq!(fleet.stub.build_instances().len(), 1);
    assert_eq!(fleet.stub.vacuum_calls(), 0);

    fleet.templates.vacuum(None).await.unwrap();
    assert!(fleet.stub.build_instances().is_empty());
}

#[tokio::test]
async fn test_pinned_version_skips_resolution() {
    let fleet = TestFleet::new();
    let key = TemplateKey::new("ubuntu", "22.04", "6.4.0.7", Arch::Amd64);
    let outcome = fleet
        .templates
        .ensure(&key, &ExtraParams::default(), false)
        .await
        .unwrap();

    assert_eq!(outcome.key.version, "6.4.0.7");
    assert_ne!(outcome.key.version, LATEST_VERSION);
    assert_eq!(fleet.templates.list().await.unwrap(), vec![key.clone()]);

    fleet.templates.destroy(&key).await.unwrap();
    assert!(fleet.templates.list().await.unwrap().is_empty());
}
