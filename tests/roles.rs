// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc, time::Duration};

    use benchctl_lib::{
        cluster::{ComponentParams, ConnectionTarget, Environment},
        context::Metrics,
        host::{Host, NodeGroup},
        remote::{ExecOptions, RemoteExecutor, Transport},
        retry::RetryPolicy,
        role::{RoleContext, RoleError, RoleRegistry},
        test_env::*,
    };

    fn params(role: &str, implementation: &str, parameters: &[(&str, &str)]) -> ComponentParams {
        ComponentParams {
            role: role.to_string(),
            implementation: implementation.to_string(),
            count: 1,
            cloud: "fake".to_string(),
            region: "r1".to_string(),
            instance_type: None,
            image: None,
            user: Some("bench".to_string()),
            managed: true,
            ephemeral: false,
            hosts: Vec::new(),
            parameters: parameters
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn context(
        transport: &Arc<FakeTransport>,
        params: ComponentParams,
        addresses: &[&str],
    ) -> RoleContext {
        let hosts = addresses
            .iter()
            .enumerate()
            .map(|(i, address)| {
                Host::new(&format!("{}_{i}", params.role), address, Some("bench"), None)
            })
            .collect();
        let executor = RemoteExecutor::new(
            Arc::clone(transport) as Arc<dyn Transport>,
            Arc::new(Metrics::default()),
        );
        let options = ExecOptions::default()
            .with_timeout(Duration::from_secs(1))
            .with_retry(RetryPolicy::once());
        RoleContext {
            cluster: "bench".to_string(),
            environment: Environment::new("fake", "fake", "r1"),
            params,
            group: NodeGroup::new(hosts, Arc::new(executor), options),
        }
    }

    #[tokio::test]
    async fn backend_produces_target() {
        let transport = Arc::new(FakeTransport::new());
        let params = params(
            "backend",
            "backend",
            &[
                ("install", "install-backend --name {name}"),
                ("db_user", "bench"),
                ("db_password", "secret"),
                ("database", "tpcc"),
                ("port", "26257"),
                ("dialect", "cockroachdb"),
                ("ssl_ca", "/certs/ca.crt"),
            ],
        );
        let role = RoleRegistry::with_builtins()
            .build(context(&transport, params, &["10.0.0.1", "10.0.0.2"]))
            .unwrap();

        let target = role.install().await.unwrap().unwrap();

        // Clients talk to the first member.
        assert_eq!(target.hosts, vec!["10.0.0.1"]);
        assert_eq!(target.port, Some(26257));
        assert_eq!(target.password.as_deref(), Some("secret"));
        assert_eq!(target.dialect, "cockroachdb");
        let ssl = target.ssl.as_ref().unwrap();
        assert_eq!(ssl.ca.as_deref(), Some("/certs/ca.crt"));
        assert!(ssl.cert.is_none());
        assert_eq!(
            target.to_string(),
            "cockroachdb://bench@10.0.0.1:26257/tpcc"
        );

        assert_eq!(
            transport.scripts_for("backend_1"),
            vec!["set -e\ninstall-backend --name backend_1"]
        );
        assert!(role.as_proxy().is_none());
    }

    #[tokio::test]
    async fn proxy_points_at_target() {
        let transport = Arc::new(FakeTransport::new());
        let params = params(
            "proxy",
            "proxy",
            &[
                (
                    "post_install",
                    "configure-proxy --backend {target_hosts} --port {target_port} --db {target_database}",
                ),
                ("listen_port", "6432"),
            ],
        );
        let role = RoleRegistry::with_builtins()
            .build(context(&transport, params, &["10.0.0.5"]))
            .unwrap();
        assert!(role.install().await.unwrap().is_none());

        let backend = ConnectionTarget {
            hosts: vec!["10.0.0.1".to_string()],
            user: Some("bench".to_string()),
            password: None,
            database: Some("tpcc".to_string()),
            port: Some(5432),
            dialect: "postgresql".to_string(),
            ssl: None,
        };
        let proxy = role.as_proxy().unwrap();
        let target = proxy.post_install(backend.clone()).await.unwrap();

        assert_eq!(target.hosts, vec!["10.0.0.5"]);
        assert_eq!(target.port, Some(6432));
        assert_eq!(target.user, backend.user);
        assert_eq!(target.database, backend.database);
        assert_eq!(
            transport.scripts_for("proxy_0"),
            vec!["set -e\nconfigure-proxy --backend 10.0.0.1 --port 5432 --db tpcc"]
        );
    }

    #[tokio::test]
    async fn proxy_without_listen_port_keeps_target_port() {
        let transport = Arc::new(FakeTransport::new());
        let params = params("proxy", "proxy", &[]);
        let role = RoleRegistry::with_builtins()
            .build(context(&transport, params, &["10.0.0.5"]))
            .unwrap();

        let backend = ConnectionTarget {
            hosts: vec!["10.0.0.1".to_string()],
            port: Some(5432),
            ..ConnectionTarget::placeholder()
        };
        let target = role.as_proxy().unwrap().post_install(backend).await.unwrap();

        assert_eq!(target.hosts, vec!["10.0.0.5"]);
        assert_eq!(target.port, Some(5432));
        assert!(transport.records().is_empty());
    }

    #[tokio::test]
    async fn clean_ignores_failures() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_on("driver_0", 1);
        let params = params(
            "driver",
            "driver",
            &[("clean", "rm -rf /tmp/load"), ("stop", "pkill load")],
        );
        let role = RoleRegistry::with_builtins()
            .build(context(&transport, params, &["10.0.0.9"]))
            .unwrap();

        role.clean().await.unwrap();
        let err = role.stop().await.unwrap_err();
        assert!(matches!(err, RoleError::Remote { step: "stop", .. }));
    }

    #[test]
    fn invalid_roles_are_rejected() {
        let transport = Arc::new(FakeTransport::new());
        let registry = RoleRegistry::with_builtins();

        let err = registry
            .build(context(
                &transport,
                params("backend", "backend", &[("port", "fifty")]),
                &["10.0.0.1"],
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            RoleError::InvalidParameter { ref key, ref value, .. } if key == "port" && value == "fifty"
        ));

        let err = registry
            .build(context(&transport, params("backend", "backend", &[]), &[]))
            .unwrap_err();
        assert!(matches!(err, RoleError::NoMembers { .. }));

        let err = registry
            .build(context(&transport, params("cache", "memcached", &[]), &["10.0.0.1"]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "no role implementation named 'memcached' is registered"
        );
    }
}
