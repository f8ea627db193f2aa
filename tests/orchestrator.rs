// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use tokio::runtime::Runtime;

    use benchctl_lib::{
        config::Documents,
        orchestrator::{Orchestrator, OrchestratorError},
        role::RoleRegistry,
        state::ClusterState,
        test_env::*,
    };

    fn names(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    /// Configure `implementation` as cluster "bench".
    async fn configure(env: &TestEnvironment, orchestrator: &Orchestrator, implementation: &str) {
        orchestrator
            .configure("bench", &env.documents(), implementation, false)
            .await
            .unwrap();
    }

    #[test]
    fn configure_creates_descriptor() {
        let env = TestEnvironment::new("configure_creates_descriptor");
        let orchestrator = env.orchestrator();

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let descriptor = orchestrator
                .configure("bench", &env.documents(), "standard", false)
                .await
                .unwrap();

            assert_eq!(descriptor.state, ClusterState::NotReady);
            assert_eq!(descriptor.topology_map["driver"], "driver_0,driver_1");
            assert_eq!(descriptor.topology_map["proxy"], "proxy_0");
            assert_eq!(descriptor.topology_map["backend"], "backend_0");
            assert!(descriptor.members.is_empty());
            assert_eq!(env.store().load("bench").unwrap(), descriptor);

            let err = orchestrator
                .configure("bench", &env.documents(), "standard", false)
                .await
                .unwrap_err();
            assert!(matches!(err, OrchestratorError::AlreadyConfigured(_)));

            orchestrator
                .configure("bench", &env.documents(), "split", true)
                .await
                .unwrap();
            assert_eq!(env.store().load("bench").unwrap().implementation, "split");
        });
    }

    #[test]
    fn forced_configure_refuses_allocated_cluster() {
        let env = TestEnvironment::new("forced_configure_refuses_allocated_cluster");
        let orchestrator = env.orchestrator();

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            configure(&env, &orchestrator, "standard").await;
            let allocated = orchestrator.allocate("bench", false).await.unwrap();

            let err = orchestrator
                .configure("bench", &env.documents(), "split", true)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                OrchestratorError::HoldsResources {
                    state: ClusterState::Allocated,
                    ..
                }
            ));
            assert_eq!(env.store().load("bench").unwrap(), allocated);

            // The machines are still known, so clean can tear them all down.
            orchestrator.clean("bench").await.unwrap();
            assert_eq!(env.cloud.terminated().len(), 4);
            assert_eq!(env.cloud.destroyed(), vec!["vol-fake-r1-data"]);
        });
    }

    #[test]
    fn forced_configure_refuses_failed_cluster() {
        let env = TestEnvironment::new("forced_configure_refuses_failed_cluster");
        env.cloud.no_capacity_for("backend_1");
        let orchestrator = env.orchestrator();

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            configure(&env, &orchestrator, "triple_backend").await;
            orchestrator.allocate("bench", false).await.unwrap_err();

            let err = orchestrator
                .configure("bench", &env.documents(), "triple_backend", true)
                .await
                .unwrap_err();
            assert!(matches!(err, OrchestratorError::HoldsResources { .. }));
            assert_eq!(env.store().load("bench").unwrap().members.len(), 3);
        });
    }

    #[test]
    fn configure_refuses_running_cluster() {
        let env = TestEnvironment::new("configure_refuses_running_cluster");
        env.cloud.set_running(true);
        let orchestrator = env.orchestrator();

        let rt = Runtime::new().unwrap();
        let err = rt
            .block_on(orchestrator.configure("bench", &env.documents(), "standard", false))
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::AlreadyRunning { .. }));
        assert!(!env.store().exists("bench").unwrap());
    }

    #[test]
    fn configure_rejects_roles_without_parameters() {
        let env = TestEnvironment::new("configure_rejects_roles_without_parameters");
        let orchestrator = env.orchestrator();
        let documents = Documents::from_strs(
            TOPOLOGIES,
            r#"
            [partial]
            topology = "three_tier"
            [partial.defaults]
            cloud = "fake"
            region = "r1"
            [partial.roles.driver]
            [partial.roles.proxy]
            "#,
            CLOUDS,
        )
        .unwrap();

        let rt = Runtime::new().unwrap();
        let err = rt
            .block_on(orchestrator.configure("bench", &documents, "partial", false))
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Topology(_)));
        assert!(!env.store().exists("bench").unwrap());
        assert!(env.cloud.launched().is_empty());
    }

    #[test]
    fn partial_allocation_failure() {
        let env = TestEnvironment::new("partial_allocation_failure");
        env.cloud.no_capacity_for("backend_1");
        let orchestrator = env.orchestrator();

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            configure(&env, &orchestrator, "triple_backend").await;

            let err = orchestrator.allocate("bench", false).await.unwrap_err();
            match err {
                OrchestratorError::AllocationFailed { failed, .. } => {
                    assert_eq!(failed, vec!["backend_1"])
                }
                other => panic!("unexpected error: {other}"),
            }

            let descriptor = env.store().load("bench").unwrap();
            assert_eq!(descriptor.state, ClusterState::Failed);
            let members: Vec<&str> = descriptor.members.keys().map(|k| k.as_str()).collect();
            assert_eq!(members, vec!["backend_0", "backend_2", "driver_0"]);

            // Without --force a failed cluster stays as it is.
            let err = orchestrator.allocate("bench", false).await.unwrap_err();
            assert!(matches!(err, OrchestratorError::Transition(_)));
            assert_eq!(env.store().load("bench").unwrap(), descriptor);

            // With it, only the missing instance is launched again.
            env.cloud.restore_capacity("backend_1");
            let launched_before = env.cloud.launched().len();
            let descriptor = orchestrator.allocate("bench", true).await.unwrap();
            assert_eq!(env.cloud.launched()[launched_before..].to_vec(), vec!["backend_1"]);
            assert_eq!(descriptor.state, ClusterState::Allocated);
            assert_eq!(descriptor.members.len(), 4);
        });
    }

    #[test]
    fn allocate_on_ready_cluster_is_rejected() {
        let env = TestEnvironment::new("allocate_on_ready_cluster_is_rejected");
        let orchestrator = env.orchestrator();

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            orchestrator
                .all("bench", &env.documents(), "standard", false)
                .await
                .unwrap();
            let before = env.store().load("bench").unwrap();
            assert_eq!(before.state, ClusterState::Ready);
            let launched = env.cloud.launched().len();

            for force in [false, true] {
                let err = orchestrator.allocate("bench", force).await.unwrap_err();
                assert!(matches!(err, OrchestratorError::Transition(_)));
            }

            assert_eq!(env.store().load("bench").unwrap(), before);
            assert_eq!(env.cloud.launched().len(), launched);
        });
    }

    #[test]
    fn connection_target_goes_through_proxy() {
        let env = TestEnvironment::new("connection_target_goes_through_proxy");
        let orchestrator = env.orchestrator();

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let descriptor = orchestrator
                .all("bench", &env.documents(), "standard", false)
                .await
                .unwrap();

            let address = |name: &str| {
                descriptor.members[name]
                    .public_address
                    .clone()
                    .unwrap()
            };
            let target = descriptor.connection_target.clone().unwrap();
            assert_eq!(target.hosts, vec![address("proxy_0")]);
            assert_eq!(target.port, Some(6432));
            assert_eq!(target.user.as_deref(), Some("bench"));
            assert_eq!(target.database.as_deref(), Some("bench"));
            assert_eq!(target.dialect, "postgresql");

            // The proxy was pointed at the backend.
            let expected = format!("point-proxy {}:5432", address("backend_0"));
            assert_eq!(
                env.transport.hosts_running(&expected),
                names(&["proxy_0"])
            );
            assert_eq!(
                env.transport.hosts_running("install-driver"),
                names(&["driver_0", "driver_1"])
            );
        });
    }

    #[test]
    fn placeholder_target_without_backend() {
        let env = TestEnvironment::new("placeholder_target_without_backend");
        let orchestrator = env.orchestrator();
        let documents = Documents::from_strs(
            "[drivers.driver]",
            r#"
            [load]
            topology = "drivers"
            [load.defaults]
            cloud = "fake"
            region = "r1"
            [load.roles.driver]
            "#,
            CLOUDS,
        )
        .unwrap();

        let rt = Runtime::new().unwrap();
        let descriptor = rt
            .block_on(orchestrator.all("bench", &documents, "load", false))
            .unwrap();

        assert!(descriptor.connection_target.unwrap().is_placeholder());
        assert_eq!(descriptor.state, ClusterState::Ready);
    }

    #[test]
    fn failed_install_keeps_cluster_allocated() {
        let env = TestEnvironment::new("failed_install_keeps_cluster_allocated");
        env.transport.fail_on("backend_0", 1);
        let orchestrator = env.orchestrator();

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            configure(&env, &orchestrator, "standard").await;
            orchestrator.allocate("bench", false).await.unwrap();

            let err = orchestrator.install("bench").await.unwrap_err();
            assert!(matches!(
                err,
                OrchestratorError::PhaseFailed { phase: "install", .. }
            ));

            let descriptor = env.store().load("bench").unwrap();
            assert_eq!(descriptor.state, ClusterState::Allocated);
            assert!(descriptor.connection_target.is_none());
        });
    }

    #[test]
    fn shared_storage_once_per_environment() {
        let env = TestEnvironment::new("shared_storage_once_per_environment");
        let orchestrator = env.orchestrator();

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            configure(&env, &orchestrator, "split").await;
            let descriptor = orchestrator.allocate("bench", false).await.unwrap();

            let mut volumes = env.cloud.volumes();
            volumes.sort();
            let expected: Vec<(String, String)> = [
                ("fake-r1", "data"),
                ("fake-r1", "logs"),
                ("fake-r2", "data"),
                ("fake-r2", "logs"),
            ]
            .iter()
            .map(|(e, v)| (e.to_string(), v.to_string()))
            .collect();
            assert_eq!(volumes, expected);
            assert_eq!(descriptor.shared_storage.len(), 4);

            // Nothing is missing, so forcing another allocation creates nothing.
            orchestrator.allocate("bench", true).await.unwrap();
            assert_eq!(env.cloud.volumes().len(), 4);
        });
    }

    #[test]
    fn external_members_round_robin() {
        let env = TestEnvironment::new("external_members_round_robin");
        let orchestrator = env.orchestrator();

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            configure(&env, &orchestrator, "external").await;
            let descriptor = orchestrator.allocate("bench", false).await.unwrap();

            let address = |name: &str| descriptor.members[name].public_address.clone();
            assert_eq!(address("backend_0").as_deref(), Some("db1.example.com:2222"));
            assert_eq!(address("backend_1").as_deref(), Some("db2.example.com"));
            assert_eq!(address("backend_2").as_deref(), Some("db1.example.com:2222"));
            assert!(!descriptor.members["backend_0"].managed);
            assert_eq!(env.cloud.launched(), vec!["driver_0"]);

            // Only managed members are prepared.
            orchestrator.make("bench").await.unwrap();
            let prepared: Vec<String> = env
                .transport
                .records()
                .into_iter()
                .map(|r| r.host)
                .collect();
            assert_eq!(prepared, vec!["driver_0"]);

            // External members are forgotten, not terminated.
            orchestrator.clean("bench").await.unwrap();
            assert_eq!(env.cloud.terminated(), vec!["driver_0"]);
            assert!(!env.store().exists("bench").unwrap());
        });
    }

    #[test]
    fn make_runs_baseline_with_sudo() {
        let env = TestEnvironment::new("make_runs_baseline_with_sudo");
        let orchestrator = env.orchestrator();

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            configure(&env, &orchestrator, "standard").await;

            let err = orchestrator.make("bench").await.unwrap_err();
            assert!(matches!(err, OrchestratorError::Transition(_)));

            orchestrator.allocate("bench", false).await.unwrap();
            orchestrator.make("bench").await.unwrap();

            let records = env.transport.records();
            assert_eq!(records.len(), 4);
            assert!(records.iter().all(|r| r.sudo));
            assert!(records
                .iter()
                .all(|r| r.script.starts_with("set -e\n") && r.script.contains("sysctl")));
            assert_eq!(
                env.store().load("bench").unwrap().state,
                ClusterState::Allocated
            );
        });
    }

    #[test]
    fn clean_failed_cluster() {
        let env = TestEnvironment::new("clean_failed_cluster");
        env.cloud.no_capacity_for("backend_1");
        let orchestrator = env.orchestrator();

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            configure(&env, &orchestrator, "triple_backend").await;
            orchestrator.allocate("bench", false).await.unwrap_err();

            orchestrator.clean("bench").await.unwrap();

            let mut terminated = env.cloud.terminated();
            terminated.sort();
            assert_eq!(terminated, vec!["backend_0", "backend_2", "driver_0"]);
            // Nothing was installed, so no role cleanup ran.
            assert!(env.transport.records().is_empty());
            assert!(!env.store().exists("bench").unwrap());
        });
    }

    #[test]
    fn clean_keeps_descriptor_on_teardown_failure() {
        let env = TestEnvironment::new("clean_keeps_descriptor_on_teardown_failure");
        env.cloud.cannot_terminate("driver_1");
        let orchestrator = env.orchestrator();

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            orchestrator
                .all("bench", &env.documents(), "standard", false)
                .await
                .unwrap();

            let err = orchestrator.clean("bench").await.unwrap_err();
            match err {
                OrchestratorError::CleanupFailed { remaining, .. } => {
                    assert_eq!(remaining, vec!["driver_1"])
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(
                env.transport.hosts_running("clean-driver"),
                names(&["driver_0", "driver_1"])
            );

            let descriptor = env.store().load("bench").unwrap();
            assert_eq!(descriptor.state, ClusterState::Failed);
            assert_eq!(descriptor.members.len(), 1);
            assert!(descriptor.shared_storage.is_empty());
        });
    }

    #[test]
    fn stop_and_start_skip_ephemeral_members() {
        let env = TestEnvironment::new("stop_and_start_skip_ephemeral_members");
        let orchestrator = env.orchestrator();

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            orchestrator
                .all("bench", &env.documents(), "standard", false)
                .await
                .unwrap();

            let descriptor = orchestrator.stop("bench").await.unwrap();
            assert_eq!(descriptor.state, ClusterState::Down);
            let mut stopped = env.cloud.stopped();
            stopped.sort();
            assert_eq!(stopped, vec!["backend_0", "proxy_0"]);
            assert_eq!(
                env.transport.hosts_running("stop-driver"),
                names(&["driver_0", "driver_1"])
            );

            let err = orchestrator.stop("bench").await.unwrap_err();
            assert!(matches!(err, OrchestratorError::Transition(_)));

            let descriptor = orchestrator.start("bench").await.unwrap();
            assert_eq!(descriptor.state, ClusterState::Ready);
            let mut started = env.cloud.started();
            started.sort();
            assert_eq!(started, vec!["backend_0", "proxy_0"]);
        });
    }

    #[test]
    fn interrupted_allocation_launches_nothing() {
        let env = TestEnvironment::new("interrupted_allocation_launches_nothing");
        let context = env.context();
        let orchestrator = env.orchestrator_with(context.clone(), RoleRegistry::with_builtins());

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            configure(&env, &orchestrator, "triple_backend").await;
            context.interrupt();

            let err = orchestrator.allocate("bench", false).await.unwrap_err();
            assert!(matches!(err, OrchestratorError::Interrupted));
            assert!(env.cloud.launched().is_empty());
            assert_eq!(
                env.store().load("bench").unwrap().state,
                ClusterState::NotReady
            );
        });
    }

    #[test]
    fn interrupt_during_allocation_stops_new_launches() {
        let env = TestEnvironment::new("interrupt_during_allocation_stops_new_launches");
        let mut context = env.context();
        context.settings.parallelism = Some(1);
        env.cloud.interrupt_on_launch(&context);
        let orchestrator = env.orchestrator_with(context.clone(), RoleRegistry::with_builtins());

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            configure(&env, &orchestrator, "triple_backend").await;

            let err = orchestrator.allocate("bench", false).await.unwrap_err();
            match err {
                OrchestratorError::AllocationFailed { failed, .. } => assert_eq!(failed.len(), 3),
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(env.cloud.launched().len(), 1);

            // The one machine that came up is recorded so clean can find it.
            let descriptor = env.store().load("bench").unwrap();
            assert_eq!(descriptor.state, ClusterState::Failed);
            assert_eq!(descriptor.members.len(), 1);
        });
    }

    #[test]
    fn shared_backend_is_provisioned_once() {
        let env = TestEnvironment::new("shared_backend_is_provisioned_once");
        let orchestrator = env.orchestrator();

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let descriptor = orchestrator
                .all("bench", &env.documents(), "shared", false)
                .await
                .unwrap();

            assert_eq!(descriptor.topology_map["backend"], "backend_0,backend_1");
            let mut launched = env.cloud.launched();
            launched.sort();
            assert_eq!(
                launched,
                vec![
                    "backend_0",
                    "backend_1",
                    "driver1_0",
                    "driver2_0",
                    "proxy1_0",
                    "proxy2_0"
                ]
            );

            // The backend's parent is the first group that references it, so its target is
            // chained through proxy1 only.
            let target = descriptor.connection_target.unwrap();
            let proxy1 = descriptor.members["proxy1_0"].public_address.clone().unwrap();
            assert_eq!(target.hosts, vec![proxy1]);
            assert_eq!(target.port, Some(6432));
            assert_eq!(env.transport.hosts_running("point-proxy"), names(&["proxy1_0"]));
        });
    }

    #[test]
    fn interrupted_phases_issue_no_remote_work() {
        let env = TestEnvironment::new("interrupted_phases_issue_no_remote_work");
        let context = env.context();
        let orchestrator = env.orchestrator_with(context.clone(), RoleRegistry::with_builtins());

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            configure(&env, &orchestrator, "standard").await;
            orchestrator.allocate("bench", false).await.unwrap();
            context.interrupt();

            let err = orchestrator.make("bench").await.unwrap_err();
            assert!(matches!(err, OrchestratorError::Interrupted));
            let err = orchestrator.install("bench").await.unwrap_err();
            assert!(matches!(err, OrchestratorError::Interrupted));

            assert!(env.transport.records().is_empty());
            assert_eq!(
                env.store().load("bench").unwrap().state,
                ClusterState::Allocated
            );
        });
    }

    #[test]
    fn interrupted_power_operations_do_nothing() {
        let env = TestEnvironment::new("interrupted_power_operations_do_nothing");
        let context = env.context();
        let orchestrator = env.orchestrator_with(context.clone(), RoleRegistry::with_builtins());

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            orchestrator
                .all("bench", &env.documents(), "standard", false)
                .await
                .unwrap();
            let records = env.transport.records().len();
            context.interrupt();

            let err = orchestrator.stop("bench").await.unwrap_err();
            assert!(matches!(err, OrchestratorError::Interrupted));
            assert!(env.cloud.stopped().is_empty());
            assert_eq!(env.transport.records().len(), records);
            assert_eq!(env.store().load("bench").unwrap().state, ClusterState::Ready);
        });
    }

    #[test]
    fn interrupted_start_does_nothing() {
        let env = TestEnvironment::new("interrupted_start_does_nothing");
        let context = env.context();
        let orchestrator = env.orchestrator_with(context.clone(), RoleRegistry::with_builtins());

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            orchestrator
                .all("bench", &env.documents(), "standard", false)
                .await
                .unwrap();
            orchestrator.stop("bench").await.unwrap();
            context.interrupt();

            let err = orchestrator.start("bench").await.unwrap_err();
            assert!(matches!(err, OrchestratorError::Interrupted));
            assert!(env.cloud.started().is_empty());
            assert_eq!(env.store().load("bench").unwrap().state, ClusterState::Down);
        });
    }

    #[test]
    fn interrupted_all_stops_before_configuring() {
        let env = TestEnvironment::new("interrupted_all_stops_before_configuring");
        let context = env.context();
        let orchestrator = env.orchestrator_with(context.clone(), RoleRegistry::with_builtins());
        context.interrupt();

        let rt = Runtime::new().unwrap();
        let err = rt
            .block_on(orchestrator.all("bench", &env.documents(), "standard", false))
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Interrupted));
        assert!(!env.store().exists("bench").unwrap());
        assert!(env.cloud.launched().is_empty());
        assert!(env.transport.records().is_empty());
    }
}
