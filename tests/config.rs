// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use benchctl_lib::{config::*, retry::RetryPolicy, test_env::*};

    fn documents() -> Documents {
        Documents::from_strs(TOPOLOGIES, IMPLEMENTATIONS, CLOUDS).unwrap()
    }

    #[test]
    fn merge_precedence() {
        let plan = documents().plan("standard").unwrap();

        assert_eq!(plan.topology_name, "three_tier");
        assert_eq!(plan.environments.len(), 1);
        assert_eq!(plan.environments[0].name, "fake-r1");
        assert_eq!(plan.environments[0].client, "fake");

        let roles = &plan.components["fake-r1"];
        let backend = &roles["backend"];
        // The role's own table beats the implementation defaults, which beat the cloud's.
        assert_eq!(backend.instance_type.as_deref(), Some("large"));
        assert_eq!(roles["proxy"].instance_type.as_deref(), Some("small"));
        assert_eq!(backend.image.as_deref(), Some("ubuntu-22.04"));
        assert_eq!(backend.user.as_deref(), Some("bench"));

        assert_eq!(backend.implementation, "backend");
        assert_eq!(backend.count, 1);
        assert!(backend.managed);
        assert!(!backend.ephemeral);
        assert_eq!(backend.parameter("port"), Some("5432"));

        let driver = &roles["driver"];
        assert_eq!(driver.count, 2);
        assert!(driver.ephemeral);
        assert_eq!(plan.count_of("driver"), Some(2));
        assert_eq!(plan.count_of("nope"), None);

        assert_eq!(plan.shared_storage.len(), 1);
        assert_eq!(plan.shared_storage[0].mount.as_deref(), Some("/data"));
    }

    #[test]
    fn parameters_merge_key_by_key() {
        let mut base = RoleOverrides::default();
        base.parameters.insert("a".to_string(), "1".to_string());
        base.parameters.insert("b".to_string(), "1".to_string());
        base.count = Some(3);

        let mut over = RoleOverrides::default();
        over.parameters.insert("b".to_string(), "2".to_string());
        over.region = Some("r9".to_string());

        base.merge(&over);
        assert_eq!(base.parameters["a"], "1");
        assert_eq!(base.parameters["b"], "2");
        assert_eq!(base.count, Some(3));
        assert_eq!(base.region.as_deref(), Some("r9"));
    }

    #[test]
    fn one_environment_per_cloud_and_region() {
        let plan = documents().plan("split").unwrap();

        let names: Vec<&str> = plan.environments.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["fake-r1", "fake-r2"]);
        assert!(plan.components["fake-r2"].contains_key("driver"));
        assert!(plan.components["fake-r1"].contains_key("backend"));
        assert!(plan.components["fake-r1"].contains_key("proxy"));
    }

    #[test]
    fn external_roles() {
        let plan = documents().plan("external").unwrap();

        let backend = &plan.components["lab-lab"]["backend"];
        assert!(!backend.managed);
        assert_eq!(backend.hosts.len(), 2);
        assert_eq!(plan.environments[0].client, "external");
    }

    #[test]
    fn configuration_errors() {
        let docs = documents();
        assert!(matches!(
            docs.plan("nope"),
            Err(ConfigError::UnknownImplementation(_))
        ));

        let docs = Documents::from_strs(
            TOPOLOGIES,
            r#"
            [a]
            topology = "missing"
            "#,
            CLOUDS,
        )
        .unwrap();
        assert!(matches!(
            docs.plan("a"),
            Err(ConfigError::UnknownTopology { .. })
        ));

        let docs = Documents::from_strs(
            TOPOLOGIES,
            r#"
            [a]
            topology = "flat"
            [a.roles.driver]
            cloud = "mars"
            region = "r1"
            "#,
            CLOUDS,
        )
        .unwrap();
        assert!(matches!(docs.plan("a"), Err(ConfigError::UnknownCloud { .. })));

        let docs = Documents::from_strs(
            TOPOLOGIES,
            r#"
            [a]
            topology = "flat"
            [a.roles.driver]
            cloud = "fake"
            "#,
            CLOUDS,
        )
        .unwrap();
        assert!(matches!(
            docs.plan("a"),
            Err(ConfigError::MissingField { field: "region", .. })
        ));

        let docs = Documents::from_strs(
            TOPOLOGIES,
            r#"
            [a]
            topology = "flat"
            [a.roles.backend]
            cloud = "lab"
            "#,
            CLOUDS,
        )
        .unwrap();
        assert!(matches!(docs.plan("a"), Err(ConfigError::NoHosts(_))));
    }

    #[test]
    fn each_document_parses_into_its_own_type() {
        let documents = documents();
        assert!(documents.topologies.contains_key("three_tier"));
        assert_eq!(documents.implementations["standard"].topology, "three_tier");
        assert_eq!(documents.clouds["lab"].client, "external");

        let err = Documents::from_strs(TOPOLOGIES, IMPLEMENTATIONS, "[fake\n").unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path.to_str(), Some(CLOUDS_FILE)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn documents_load_from_directory() {
        let env = TestEnvironment::new("documents_load_from_directory");
        let dir = env.state_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(TOPOLOGIES_FILE), TOPOLOGIES).unwrap();
        std::fs::write(dir.join(IMPLEMENTATIONS_FILE), IMPLEMENTATIONS).unwrap();
        std::fs::write(dir.join(CLOUDS_FILE), CLOUDS).unwrap();

        assert_eq!(Documents::load(&dir).unwrap(), documents());
    }

    #[test]
    fn unknown_role_fields_are_rejected() {
        let result = Documents::from_strs(
            TOPOLOGIES,
            r#"
            [a]
            topology = "flat"
            [a.roles.driver]
            cuont = 3
            "#,
            CLOUDS,
        );
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn settings_defaults() {
        let env = TestEnvironment::new("settings_defaults");
        let settings = Settings::load(&env.state_dir()).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.worker_count() >= 1);
        assert_eq!(settings.remote_retry, RetryPolicy::remote_default());
    }

    #[test]
    fn settings_from_toml() {
        let settings: Settings = toml::from_str(
            r#"
            parallelism = 0
            command_timeout_secs = 60

            [cloud_retry]
            attempts = 2
            delays = { kind = "constant", delay_ms = 100 }

            [ssh]
            identity_file = "/root/.ssh/bench"

            [make]
            script = "echo ready"
            "#,
        )
        .unwrap();

        assert_eq!(settings.worker_count(), 1);
        assert_eq!(settings.command_timeout(), Duration::from_secs(60));
        assert_eq!(settings.cloud_timeout(), Duration::from_secs(600));
        assert_eq!(
            settings.cloud_retry,
            RetryPolicy::constant(2, Duration::from_millis(100))
        );
        assert_eq!(settings.make.script.as_deref(), Some("echo ready"));
        assert_eq!(settings.ssh.connect_timeout_secs, 10);
    }
}
