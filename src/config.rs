//! TOML bootstrap configuration: how a set of monitors and their backends
//! are declared on disk before `bootstrap` turns them into registered,
//! started [`crate::monitor::MonitorInstance`]s.

use crate::backend::ServerRef;
use crate::collab::{Credentials, ExternalCommand, ProbeTransport, ServiceRouter};
use crate::error::{MonitorError, Result};
use crate::monitor::MonitorInstance;
use crate::probe::classic::ClassicReplicationProbe;
use crate::probe::synced::SyncedQuorumProbe;
use crate::probe::Probe;
use crate::registry::Registry;
use crate::settings::MonitorSettings;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    ClassicReplication,
    SyncedQuorum,
}

impl ProbeKind {
    /// The `module` tag stored on the resulting [`MonitorInstance`], used by
    /// [`crate::registry::Registry::reactivate`] to match a deactivated
    /// instance back to the probe kind asking for it (§3, §4.6).
    fn module_name(self) -> &'static str {
        match self {
            ProbeKind::ClassicReplication => "classic_replication",
            ProbeKind::SyncedQuorum => "synced_quorum",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub node_id: i64,
    #[serde(default = "default_master_id")]
    pub master_id: i64,
    #[serde(default)]
    pub extra_port: Option<u16>,
    #[serde(default)]
    pub disk_space_threshold: Option<String>,
}

fn default_master_id() -> i64 {
    -1
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorEntry {
    pub probe: ProbeKind,
    pub journal_path: PathBuf,
    #[serde(flatten)]
    pub settings: MonitorSettings,
    pub servers: Vec<ServerEntry>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: HashMap<String, MonitorEntry>,
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| MonitorError::ConfigInvalid(e.to_string()))
    }
}

/// Turns a parsed [`AppConfig`] into registered monitors. Does not start
/// them: callers decide when/whether to call
/// [`crate::monitor::MonitorInstance::start`] for each, typically right
/// after bootstrapping all of them so a bad config in one doesn't block the
/// others from coming up.
pub fn bootstrap(
    config: &AppConfig,
    registry: &Registry,
    service_router: Arc<dyn ServiceRouter>,
    external_command: Arc<dyn ExternalCommand>,
) -> Result<()> {
    for (name, entry) in &config.monitor {
        if registry.find(name).is_some() {
            return Err(MonitorError::ConfigInvalid(format!("duplicate monitor name '{name}'")));
        }

        let credentials = Credentials {
            username: entry.settings.monitor_user.clone().unwrap_or_default(),
            password: entry.settings.monitor_password.clone().unwrap_or_default(),
        };
        let probe: Box<dyn Probe> = match entry.probe {
            ProbeKind::ClassicReplication => Box::new(ClassicReplicationProbe::new(credentials)),
            ProbeKind::SyncedQuorum => Box::new(SyncedQuorumProbe::new(credentials)),
        };

        let instance = Arc::new(MonitorInstance::new(
            name.clone(),
            entry.probe.module_name().to_string(),
            entry.settings.clone(),
            entry.journal_path.clone(),
            probe,
            Arc::clone(&service_router),
            Arc::clone(&external_command),
        ));

        for server in &entry.servers {
            let disk_limits = match &server.disk_space_threshold {
                Some(raw) => crate::settings::parse_disk_space_threshold(raw)?,
                None => entry.settings.disk_space_limits()?,
            };
            instance.add_server(
                ServerRef {
                    name: server.name.clone(),
                    address: server.address.clone(),
                    port: server.port,
                    extra_port: server.extra_port,
                    node_id: server.node_id,
                    master_id: server.master_id,
                },
                disk_limits,
            )?;
        }

        for existing in registry.list() {
            for server in &entry.servers {
                if registry
                    .find(&existing)
                    .is_some_and(|m| m.has_backend(&server.name))
                {
                    return Err(MonitorError::ServerAlreadyMonitored(server.name.clone(), existing));
                }
            }
        }

        registry.insert_front(instance);
    }
    Ok(())
}

/// Starts every monitor currently in `registry` that isn't already running,
/// using the same transport for all of them.
pub fn start_all(registry: &Registry, transport: Arc<dyn ProbeTransport>) -> Result<()> {
    let mut first_err = None;
    registry.foreach(|monitor| {
        if monitor.state() == crate::monitor::MonitorState::Stopped {
            if let Err(e) = monitor.start(Arc::clone(&transport)) {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        true
    });
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Reads a monitor TOML file from disk, bootstraps every monitor it
/// declares into `registry`, and starts them all against `transport`.
///
/// This is the host application's usual entry point — equivalent in shape to
/// `warden::run(config_path)` in the teacher, but synchronous: the monitor
/// core drives plain OS threads, not `tokio` tasks, so there's no runtime to
/// hand control to. Uses `anyhow` for the top-level error chain (file I/O,
/// TOML parse, bootstrap, start) the way the teacher's `run()` does, rather
/// than forcing every caller through a single `MonitorError` variant.
pub fn load_and_start(
    path: &Path,
    registry: &Registry,
    service_router: Arc<dyn ServiceRouter>,
    external_command: Arc<dyn ExternalCommand>,
    transport: Arc<dyn ProbeTransport>,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading monitor config {}: {e}", path.display()))?;
    let config = AppConfig::from_toml_str(&text)?;
    bootstrap(&config, registry, service_router, external_command)?;
    start_all(registry, transport)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{NullExternalCommand, NullServiceRouter};

    #[test]
    fn parses_minimal_monitor_config() {
        let toml_text = r#"
            [monitor.cluster1]
            probe = "classic_replication"
            journal_path = "/tmp/cluster1.journal"
            monitor_interval = "2s"

            [[monitor.cluster1.servers]]
            name = "db1"
            address = "10.0.0.1"
            port = 3306
        "#;
        let config = AppConfig::from_toml_str(toml_text).unwrap();
        let entry = config.monitor.get("cluster1").unwrap();
        assert_eq!(entry.probe, ProbeKind::ClassicReplication);
        assert_eq!(entry.servers.len(), 1);
    }

    #[test]
    fn bootstrap_registers_one_monitor_per_table() {
        let toml_text = r#"
            [monitor.cluster1]
            probe = "classic_replication"
            journal_path = "/tmp/cluster1.journal"

            [[monitor.cluster1.servers]]
            name = "db1"
            address = "10.0.0.1"
            port = 3306
        "#;
        let config = AppConfig::from_toml_str(toml_text).unwrap();
        let registry = Registry::new();
        bootstrap(&config, &registry, Arc::new(NullServiceRouter), Arc::new(NullExternalCommand)).unwrap();
        assert_eq!(registry.list(), vec!["cluster1".to_string()]);
        assert!(registry.find("cluster1").unwrap().has_backend("db1"));
    }

    #[test]
    fn bootstrap_rejects_duplicate_monitor_registration() {
        let toml_text = r#"
            [monitor.cluster1]
            probe = "classic_replication"
            journal_path = "/tmp/cluster1.journal"
            servers = []
        "#;
        let config = AppConfig::from_toml_str(toml_text).unwrap();
        let registry = Registry::new();
        bootstrap(&config, &registry, Arc::new(NullServiceRouter), Arc::new(NullExternalCommand)).unwrap();
        let err = bootstrap(&config, &registry, Arc::new(NullServiceRouter), Arc::new(NullExternalCommand)).unwrap_err();
        assert!(matches!(err, MonitorError::ConfigInvalid(_)));
    }

    struct RefusingTransport;
    impl ProbeTransport for RefusingTransport {
        fn connect(
            &self,
            _: &str,
            _: u16,
            _: Option<u16>,
            _: &Credentials,
            _: crate::collab::ProbeTimeouts,
        ) -> std::result::Result<crate::collab::ConnHandle, crate::collab::TransportError> {
            Err(crate::collab::TransportError::Refused)
        }
        fn ping(&self, _: crate::collab::ConnHandle) -> std::result::Result<(), crate::collab::TransportError> {
            Err(crate::collab::TransportError::Other)
        }
        fn query(
            &self,
            _: crate::collab::ConnHandle,
            _: &str,
        ) -> std::result::Result<Vec<Vec<(String, String)>>, crate::collab::TransportError> {
            Err(crate::collab::TransportError::Refused)
        }
        fn close(&self, _: crate::collab::ConnHandle) {}
    }

    #[test]
    fn load_and_start_reports_a_readable_error_for_a_missing_file() {
        let registry = Registry::new();
        let err = load_and_start(
            Path::new("/nonexistent/does-not-exist.toml"),
            &registry,
            Arc::new(NullServiceRouter),
            Arc::new(NullExternalCommand),
            Arc::new(RefusingTransport),
        )
        .unwrap_err();
        assert!(err.to_string().contains("does-not-exist.toml"));
    }

    struct AcceptingTransport;
    impl ProbeTransport for AcceptingTransport {
        fn connect(
            &self,
            _: &str,
            _: u16,
            _: Option<u16>,
            _: &Credentials,
            _: crate::collab::ProbeTimeouts,
        ) -> std::result::Result<crate::collab::ConnHandle, crate::collab::TransportError> {
            Ok(crate::collab::ConnHandle(1))
        }
        fn ping(&self, _: crate::collab::ConnHandle) -> std::result::Result<(), crate::collab::TransportError> {
            Ok(())
        }
        fn query(
            &self,
            _: crate::collab::ConnHandle,
            _: &str,
        ) -> std::result::Result<Vec<Vec<(String, String)>>, crate::collab::TransportError> {
            Ok(vec![])
        }
        fn close(&self, _: crate::collab::ConnHandle) {}
    }

    #[test]
    fn load_and_start_brings_up_every_declared_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let journal_path = dir.path().join("cluster1.journal");
        let config_path = dir.path().join("monitors.toml");
        std::fs::write(
            &config_path,
            format!(
                r#"
                [monitor.cluster1]
                probe = "classic_replication"
                journal_path = "{}"
                monitor_interval = "50ms"

                [[monitor.cluster1.servers]]
                name = "db1"
                address = "10.0.0.1"
                port = 3306
                "#,
                journal_path.display()
            ),
        )
        .unwrap();

        let registry = Registry::new();
        load_and_start(
            &config_path,
            &registry,
            Arc::new(NullServiceRouter),
            Arc::new(NullExternalCommand),
            Arc::new(AcceptingTransport),
        )
        .unwrap();

        let monitor = registry.find("cluster1").unwrap();
        assert_eq!(monitor.state(), crate::monitor::MonitorState::Running);
        monitor.stop().unwrap();
    }

    #[test]
    fn load_and_start_fails_without_starting_when_permission_check_cannot_connect() {
        let dir = tempfile::tempdir().unwrap();
        let journal_path = dir.path().join("cluster1.journal");
        let config_path = dir.path().join("monitors.toml");
        std::fs::write(
            &config_path,
            format!(
                r#"
                [monitor.cluster1]
                probe = "classic_replication"
                journal_path = "{}"

                [[monitor.cluster1.servers]]
                name = "db1"
                address = "10.0.0.1"
                port = 3306
                "#,
                journal_path.display()
            ),
        )
        .unwrap();

        let registry = Registry::new();
        let err = load_and_start(
            &config_path,
            &registry,
            Arc::new(NullServiceRouter),
            Arc::new(NullExternalCommand),
            Arc::new(RefusingTransport),
        )
        .unwrap_err();

        assert!(err.to_string().contains("permission check"));
        assert_eq!(registry.find("cluster1").unwrap().state(), crate::monitor::MonitorState::Stopped);
    }
}
