//! Tests for infrastructure provisioning.

#[cfg(test)]
mod tests {
    use crate::clients::{
        CloudResource, InstanceType, MockCloudApi, NodePoolSpec, NodePoolState,
    };
    use crate::config::{DeployConfig, WaitSettings};
    use crate::context::{InfrastructureHandle, RunContext};
    use crate::errors::{CloudError, DeployError, ResourceKind};
    use crate::polling::PollOutcome;
    use crate::provision::InfrastructureProvisioner;
    use crate::testing::{sample_config, FakeCloud, FakeKube};
    use crate::tools::{ExecEnv, KubeAccess};
    use mockall::Sequence;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn setup() -> (TempDir, DeployConfig, RunContext) {
        let dir = TempDir::new().unwrap();
        let config = sample_config(dir.path());
        let ctx = RunContext::new(&config);
        ctx.create_run_dir().unwrap();
        (dir, config, ctx)
    }

    fn locked(id: &str) -> CloudError {
        CloudError::Locked {
            kind: ResourceKind::NodePool,
            id: id.to_string(),
            message: "operation in progress".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_provision_records_every_resource() {
        let (_dir, config, ctx) = setup();
        let cloud = FakeCloud::new();
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);
        let mut handle = InfrastructureHandle::new(ctx.zone());

        let summary = provisioner.provision(&mut handle).await.unwrap();

        assert_eq!(summary.instance_type_id, "it-standard-medium");
        assert_eq!(summary.kubernetes_version, "1.31.2");
        assert!(summary.attach.attached);
        assert!(!summary.is_degraded());
        assert!(summary.warnings.is_empty());

        assert!(handle.security_group_id().is_some());
        assert!(handle.cluster_id().is_some());
        let pool = handle.node_pool.as_ref().unwrap();
        assert!(pool.security_group_attached);
        assert_eq!(pool.name, "acme-web-workers");
        assert_eq!(pool.size, 2);
        assert_eq!(handle.kubeconfig(), Some(ctx.kubeconfig_path().as_path()));
        assert_eq!(cloud.existing().len(), 3);

        let specs = cloud.cluster_specs();
        assert_eq!(specs[0].cni, "calico");
        assert_eq!(specs[0].level, "pro");
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_failure_keeps_security_group_id() {
        let (_dir, config, ctx) = setup();
        let cloud = FakeCloud::new();
        cloud.fail_next(
            "create_cluster",
            CloudError::QuotaExceeded("sks clusters".to_string()),
        );
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);
        let mut handle = InfrastructureHandle::new(ctx.zone());

        let err = provisioner.provision(&mut handle).await.unwrap_err();

        assert!(matches!(err, DeployError::Cloud(CloudError::QuotaExceeded(_))));
        assert!(handle.security_group_id().is_some());
        assert!(handle.cluster_id().is_none());
        assert!(handle.node_pool.is_none());
        assert!(handle.has_resources());
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_conflict_is_distinct() {
        let (_dir, config, ctx) = setup();
        let cloud = FakeCloud::new();
        cloud.fail_next(
            "create_security_group",
            CloudError::NameConflict {
                kind: ResourceKind::SecurityGroup,
                name: ctx.names().security_group.clone(),
            },
        );
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);
        let mut handle = InfrastructureHandle::new(ctx.zone());

        let err = provisioner.provision(&mut handle).await.unwrap_err();

        assert!(matches!(err, DeployError::Cloud(CloudError::NameConflict { .. })));
        assert!(!handle.has_resources());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_error_state_is_fatal() {
        let (_dir, config, ctx) = setup();
        let cloud = FakeCloud::new();
        cloud.script_pool_states(vec![NodePoolState::Creating, NodePoolState::Error]);
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);
        let mut handle = InfrastructureHandle::new(ctx.zone());

        let err = provisioner.provision(&mut handle).await.unwrap_err();

        assert!(matches!(err, DeployError::FatalStage { .. }));
        assert!(handle.node_pool_id().is_some());
        assert!(cloud.calls_of("attach_security_group").is_empty());
        assert_eq!(cloud.calls_of("node_pool_state").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_deadline_names_last_state() {
        let (_dir, mut config, ctx) = setup();
        config.timeouts.pool_running = WaitSettings::new(30, 10);
        let cloud = FakeCloud::new();
        cloud.script_pool_states(vec![NodePoolState::Creating; 10]);
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);
        let mut handle = InfrastructureHandle::new(ctx.zone());

        let err = provisioner.provision(&mut handle).await.unwrap_err();

        match err {
            DeployError::DeadlineExceeded { what, waited_secs } => {
                assert!(what.contains("last state: creating"), "{what}");
                assert_eq!(waited_secs, 30);
            }
            other => panic!("expected deadline error, got {other:?}"),
        }
        assert_eq!(handle.resources().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_exhaustion_is_degraded() {
        let (_dir, config, ctx) = setup();
        let cloud = FakeCloud::new();
        for _ in 0..config.policy.attach_retry.max_attempts {
            cloud.fail_next("attach_security_group", locked("pool-0003"));
        }
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);
        let mut handle = InfrastructureHandle::new(ctx.zone());

        let summary = provisioner.provision(&mut handle).await.unwrap();

        assert!(summary.is_degraded());
        assert!(!summary.attach.attached);
        assert_eq!(summary.attach.retries, 4);
        assert!(summary.attach.error.is_some());
        assert_eq!(summary.warnings.len(), 1);
        assert!(!handle.node_pool.as_ref().unwrap().security_group_attached);
        assert_eq!(cloud.calls_of("attach_security_group").len(), 5);
        assert!(handle.kubeconfig().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_recovers_after_lock() {
        let (_dir, config, ctx) = setup();
        let cloud = FakeCloud::new();
        cloud.fail_next("attach_security_group", locked("pool-0003"));
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);
        let mut handle = InfrastructureHandle::new(ctx.zone());

        let summary = provisioner.provision(&mut handle).await.unwrap();

        assert!(summary.attach.attached);
        assert_eq!(summary.attach.retries, 1);
        assert!(handle.node_pool.as_ref().unwrap().security_group_attached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_retries_server_error() {
        let (_dir, config, ctx) = setup();
        let cloud = FakeCloud::new();
        cloud.fail_next("attach_security_group", CloudError::api(Some(500), "internal server error"));
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);
        let mut handle = InfrastructureHandle::new(ctx.zone());

        let summary = provisioner.provision(&mut handle).await.unwrap();

        assert!(summary.attach.attached);
        assert_eq!(summary.attach.retries, 1);
        assert!(!summary.is_degraded());
        assert_eq!(cloud.calls_of("attach_security_group").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_gives_up_on_missing_pool() {
        let (_dir, config, ctx) = setup();
        let cloud = FakeCloud::new();
        cloud.fail_next(
            "attach_security_group",
            CloudError::NotFound {
                kind: ResourceKind::NodePool,
                id: "pool-0003".to_string(),
            },
        );
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);
        let mut handle = InfrastructureHandle::new(ctx.zone());

        let summary = provisioner.provision(&mut handle).await.unwrap();

        assert!(!summary.attach.attached);
        assert_eq!(summary.attach.retries, 0);
        assert!(summary.is_degraded());
        assert_eq!(cloud.calls_of("attach_security_group").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_only_after_running_observed() {
        let (_dir, config, ctx) = setup();
        let mut cloud = MockCloudApi::new();
        let mut seq = Sequence::new();

        cloud
            .expect_list_instance_types()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![InstanceType::new("it-1", "standard", "medium")]));
        cloud
            .expect_list_kubernetes_versions()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec!["1.31.2".to_string()]));
        cloud
            .expect_create_security_group()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("sg-1".to_string()));
        cloud
            .expect_create_cluster()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("c-1".to_string()));
        cloud
            .expect_create_node_pool()
            .withf(|_, cluster_id, spec: &NodePoolSpec| {
                cluster_id == "c-1" && spec.instance_type_id == "it-1" && spec.size == 2
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok("p-1".to_string()));
        cloud
            .expect_node_pool_state()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(NodePoolState::Creating));
        cloud
            .expect_node_pool_state()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(NodePoolState::Running));
        cloud
            .expect_attach_security_group()
            .withf(|_, cluster_id, pool_id, sg_id| {
                cluster_id == "c-1" && pool_id == "p-1" && sg_id == "sg-1"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));
        cloud
            .expect_generate_kubeconfig()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok("apiVersion: v1\nkind: Config\n".to_string()));

        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);
        let mut handle = InfrastructureHandle::new(ctx.zone());
        let summary = provisioner.provision(&mut handle).await.unwrap();

        assert!(summary.attach.attached);
        assert_eq!(
            handle.resources(),
            vec![
                CloudResource::NodePool {
                    cluster_id: "c-1".to_string(),
                    id: "p-1".to_string()
                },
                CloudResource::Cluster {
                    id: "c-1".to_string()
                },
                CloudResource::SecurityGroup {
                    id: "sg-1".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_micro_size_upgraded_to_small() {
        let (_dir, mut config, ctx) = setup();
        config.nodes.size = "Micro".to_string();
        let cloud = FakeCloud::new();
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);

        let (id, warnings) = provisioner.resolve_instance_type().await.unwrap();

        assert_eq!(id, "it-standard-small");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("micro"));
    }

    #[tokio::test]
    async fn test_unknown_type_falls_back_to_first() {
        let (_dir, mut config, ctx) = setup();
        config.nodes.family = "gpu".to_string();
        let cloud = FakeCloud::new();
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);

        let (id, warnings) = provisioner.resolve_instance_type().await.unwrap();

        assert_eq!(id, "it-standard-small");
        assert!(warnings[0].contains("falling back to standard.small"));
    }

    #[tokio::test]
    async fn test_no_instance_types_is_fatal() {
        let (_dir, config, ctx) = setup();
        let cloud = FakeCloud::new().with_instance_types(Vec::new());
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);

        let err = provisioner.resolve_instance_type().await.unwrap_err();

        assert!(matches!(err, DeployError::FatalStage { .. }));
    }

    #[tokio::test]
    async fn test_pinned_version_skips_listing() {
        let (_dir, mut config, ctx) = setup();
        config.cluster.kubernetes_version = Some("1.29.9".to_string());
        let mut cloud = MockCloudApi::new();
        cloud.expect_list_kubernetes_versions().never();
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);

        let version = provisioner.resolve_kubernetes_version().await.unwrap();

        assert_eq!(version, "1.29.9");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kubeconfig_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, config, ctx) = setup();
        let cloud = FakeCloud::new();
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);
        let mut handle = InfrastructureHandle::new(ctx.zone());

        let path = provisioner.fetch_kubeconfig(&mut handle, "c-1").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("name: admin"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nodes_ready_partial_times_out() {
        let (_dir, mut config, ctx) = setup();
        config.timeouts.nodes_ready = WaitSettings::new(60, 20);
        let cloud = FakeCloud::new();
        let kube = FakeKube::new();
        kube.set_nodes(1, 1);
        let access = KubeAccess::new(ctx.kubeconfig_path(), ExecEnv::new(&config.search_path));
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);

        let outcome = provisioner.wait_for_nodes_ready(&kube, &access, 2).await;

        match outcome {
            PollOutcome::Pending(Some(readiness)) => {
                assert_eq!(readiness.ready, 1);
                assert_eq!(readiness.registered, 2);
            }
            other => panic!("expected pending, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_nodes_ready_tolerates_unreachable_api() {
        let (_dir, mut config, ctx) = setup();
        config.timeouts.nodes_ready = WaitSettings::new(40, 20);
        let cloud = FakeCloud::new();
        let kube = FakeKube::new();
        kube.set_unreachable(true);
        let access = KubeAccess::new(ctx.kubeconfig_path(), ExecEnv::new(&config.search_path));
        let provisioner = InfrastructureProvisioner::new(&cloud, &config, &ctx);

        let outcome = provisioner.wait_for_nodes_ready(&kube, &access, 2).await;
        assert!(matches!(outcome, PollOutcome::Pending(None)));

        kube.set_unreachable(false);
        kube.set_nodes(2, 0);
        let outcome = provisioner.wait_for_nodes_ready(&kube, &access, 2).await;
        assert!(outcome.is_ready());
    }
}
