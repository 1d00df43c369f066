//! Worker process supervisor

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::domain::account::AccountRegistry;
use crate::domain::instance::{InstanceStatus, ServerInstance};
use crate::error::{Error, Result};
use crate::infra::config_store::ConfigStore;
use crate::service::credential::CredentialManager;

/// Environment variables handed to every worker
pub const ENV_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const ENV_PROJECT: &str = "GOOGLE_CLOUD_PROJECT";
pub const ENV_HOST: &str = "HOST";
pub const ENV_PORT: &str = "PORT";
pub const ENV_PASSWORD: &str = "GEMINI_AUTH_PASSWORD";
pub const ENV_ACCOUNT_TYPE: &str = "PROXY_ACCOUNT_TYPE";

/// How workers are launched and stopped
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub program: String,
    pub args: Vec<String>,
    pub host: String,
    pub stop_timeout: Duration,
    pub probe_timeout: Duration,
}

/// Result of a successful start
#[derive(Debug, Clone, Serialize)]
pub struct StartedWorker {
    pub instance_id: String,
    pub pid: Option<u32>,
    pub port: u16,
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// In-memory record of a spawned worker
struct WorkerHandle {
    port: u16,
    child: Child,
}

impl WorkerHandle {
    /// Non-blocking liveness check
    fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                warn!("Failed to poll worker on port {}: {}", self.port, e);
                false
            }
        }
    }
}

/// Supervisor owning the table of running workers, keyed by instance id
pub struct ProcessSupervisor {
    store: Arc<ConfigStore>,
    credentials: Arc<CredentialManager>,
    accounts: Arc<AccountRegistry>,
    options: WorkerOptions,
    handles: Mutex<HashMap<String, WorkerHandle>>,
}

impl ProcessSupervisor {
    /// Create a new supervisor
    pub fn new(
        store: Arc<ConfigStore>,
        credentials: Arc<CredentialManager>,
        accounts: Arc<AccountRegistry>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            store,
            credentials,
            accounts,
            options,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Start the worker for an instance.
    ///
    /// The conflict checks and the insert happen under one lock, so two
    /// concurrent starts can never both claim the same port.
    pub async fn start(&self, instance_id: &str) -> Result<StartedWorker> {
        let instance = self
            .store
            .load()
            .await
            .into_iter()
            .find(|i| i.id == instance_id)
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))?;

        let mut handles = self.handles.lock().await;

        match handles.get_mut(instance_id).map(WorkerHandle::is_alive) {
            Some(true) => return Err(Error::AlreadyRunning(instance_id.to_string())),
            Some(false) => {
                handles.remove(instance_id);
            }
            None => {}
        }

        for (owner, handle) in handles.iter_mut() {
            if handle.port == instance.port && handle.is_alive() {
                return Err(Error::PortConflict {
                    port: instance.port,
                    reason: format!("used by instance {}", owner),
                });
            }
        }

        if port_in_use(instance.port, self.options.probe_timeout).await {
            return Err(Error::PortConflict {
                port: instance.port,
                reason: "another process is listening".to_string(),
            });
        }

        let env = self.worker_env(&instance)?;
        let child = Command::new(&self.options.program)
            .args(&self.options.args)
            .envs(env)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| Error::SpawnFailure(format!("{}: {}", self.options.program, e)))?;

        let pid = child.id();
        info!(
            "Started worker for instance {} ({}) on port {} with pid {:?}",
            instance.id, instance.name, instance.port, pid
        );

        handles.insert(
            instance.id.clone(),
            WorkerHandle {
                port: instance.port,
                child,
            },
        );

        Ok(StartedWorker {
            instance_id: instance.id,
            pid,
            port: instance.port,
        })
    }

    /// Stop the worker for an instance.
    ///
    /// The handle leaves the table before termination begins, so it is gone
    /// whichever way termination ends.
    pub async fn stop(&self, instance_id: &str) -> StopOutcome {
        let handle = self.handles.lock().await.remove(instance_id);
        match handle {
            Some(handle) => {
                terminate(instance_id, handle, self.options.stop_timeout).await;
                StopOutcome::Stopped
            }
            None => StopOutcome::NotRunning,
        }
    }

    /// Probe every tracked worker, evicting the ones that have exited
    pub async fn reconcile(&self) -> Vec<(String, InstanceStatus)> {
        let mut handles = self.handles.lock().await;
        let mut report = Vec::with_capacity(handles.len());

        handles.retain(|instance_id, handle| {
            let alive = handle.is_alive();
            if alive {
                report.push((instance_id.clone(), InstanceStatus::Running));
            } else {
                info!("Worker for instance {} has exited", instance_id);
                report.push((instance_id.clone(), InstanceStatus::Stopped));
            }
            alive
        });

        report
    }

    /// Stop every tracked worker
    pub async fn stop_all(&self) {
        let drained: Vec<(String, WorkerHandle)> = self.handles.lock().await.drain().collect();
        if drained.is_empty() {
            return;
        }

        info!("Stopping {} workers", drained.len());
        let timeout = self.options.stop_timeout;
        futures::future::join_all(
            drained
                .into_iter()
                .map(|(instance_id, handle)| async move {
                    terminate(&instance_id, handle, timeout).await
                }),
        )
        .await;
    }

    /// Number of tracked workers that are still alive
    pub async fn running_count(&self) -> usize {
        let mut handles = self.handles.lock().await;
        handles
            .values_mut()
            .map(WorkerHandle::is_alive)
            .filter(|alive| *alive)
            .count()
    }

    fn worker_env(&self, instance: &ServerInstance) -> Result<Vec<(&'static str, String)>> {
        let profile = self.accounts.get(instance.account_type);
        let credential_path: PathBuf =
            std::path::absolute(self.credentials.credential_path(profile, &instance.token_file)?)?;

        Ok(vec![
            (ENV_CREDENTIALS, credential_path.to_string_lossy().into_owned()),
            (ENV_PROJECT, instance.project_id.clone()),
            (ENV_HOST, self.options.host.clone()),
            (ENV_PORT, instance.port.to_string()),
            (ENV_PASSWORD, instance.password.clone()),
            (ENV_ACCOUNT_TYPE, instance.account_type.as_str().to_string()),
        ])
    }
}

/// True if something accepts TCP connections on the local port
async fn port_in_use(port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

/// Ask the worker to exit, escalating to a kill after `grace`
async fn terminate(instance_id: &str, mut handle: WorkerHandle, grace: Duration) {
    if let Err(e) = request_exit(&mut handle.child) {
        warn!("Failed to signal worker for instance {}: {}", instance_id, e);
    }

    match tokio::time::timeout(grace, handle.child.wait()).await {
        Ok(Ok(status)) => info!("Worker for instance {} exited with {}", instance_id, status),
        Ok(Err(e)) => error!("Failed to wait for worker {}: {}", instance_id, e),
        Err(_) => {
            warn!(
                "Worker for instance {} did not exit within {:?}, killing",
                instance_id, grace
            );
            if let Err(e) = handle.child.kill().await {
                error!("Failed to kill worker for instance {}: {}", instance_id, e);
            }
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::account::{AccountProfile, AccountType};
    use crate::domain::instance::InstanceParams;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<ConfigStore>,
        supervisor: ProcessSupervisor,
    }

    async fn fixture(program: &str, args: &[&str], instances: &[(&str, u16)]) -> Fixture {
        fixture_with_grace(program, args, instances, Duration::from_secs(2)).await
    }

    async fn fixture_with_grace(
        program: &str,
        args: &[&str],
        instances: &[(&str, u16)],
        stop_timeout: Duration,
    ) -> Fixture {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = Arc::new(ConfigStore::new(dir.path().join("servers_config.json")));
        let credentials = Arc::new(
            CredentialManager::new(dir.path().join("tokens"), Duration::from_secs(2))
                .expect("Failed to create manager"),
        );
        let accounts = Arc::new(AccountRegistry::new(
            AccountProfile::standard(),
            AccountProfile::alternate(),
        ));

        let records: Vec<ServerInstance> = instances
            .iter()
            .map(|(id, port)| {
                ServerInstance::new(
                    id.to_string(),
                    InstanceParams {
                        name: id.to_string(),
                        account_type: AccountType::Standard,
                        token_file: "alice.json".to_string(),
                        project_id: "proj-a".to_string(),
                        project_source: None,
                        project_history: None,
                        port: *port,
                        password: "pw".to_string(),
                        is_pro: None,
                    },
                )
            })
            .collect();
        store.save(&records).await.expect("Failed to seed store");

        let supervisor = ProcessSupervisor::new(
            store.clone(),
            credentials,
            accounts,
            WorkerOptions {
                program: program.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                host: "127.0.0.1".to_string(),
                stop_timeout,
                probe_timeout: Duration::from_millis(200),
            },
        );

        Fixture {
            _dir: dir,
            store,
            supervisor,
        }
    }

    /// A port nothing is listening on right now
    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
        listener.local_addr().expect("Failed to read address").port()
    }

    fn status_of(report: &[(String, InstanceStatus)], id: &str) -> Option<InstanceStatus> {
        report.iter().find(|(i, _)| i == id).map(|(_, s)| *s)
    }

    #[tokio::test]
    async fn test_start_then_reconcile_then_stop() {
        let port = free_port();
        let f = fixture("sleep", &["30"], &[("a", port)]).await;

        let started = f.supervisor.start("a").await.expect("Failed to start");
        assert_eq!(started.port, port);
        assert!(started.pid.is_some());

        let report = f.supervisor.reconcile().await;
        assert_eq!(status_of(&report, "a"), Some(InstanceStatus::Running));
        assert_eq!(f.supervisor.running_count().await, 1);

        assert_eq!(f.supervisor.stop("a").await, StopOutcome::Stopped);
        assert!(f.supervisor.reconcile().await.is_empty());
        assert_eq!(f.supervisor.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_start_twice_is_already_running() {
        let f = fixture("sleep", &["30"], &[("a", free_port())]).await;

        f.supervisor.start("a").await.expect("Failed to start");
        let second = f.supervisor.start("a").await;
        assert!(matches!(second, Err(Error::AlreadyRunning(_))));

        f.supervisor.stop_all().await;
    }

    #[tokio::test]
    async fn test_unknown_instance_is_not_found() {
        let f = fixture("sleep", &["30"], &[]).await;
        let result = f.supervisor.start("missing").await;
        assert!(matches!(result, Err(Error::InstanceNotFound(_))));
        assert!(f.supervisor.reconcile().await.is_empty());
    }

    #[tokio::test]
    async fn test_shared_port_conflicts_with_tracked_worker() {
        let port = free_port();
        let f = fixture("sleep", &["30"], &[("a", port), ("b", port)]).await;

        f.supervisor.start("a").await.expect("Failed to start first");
        let second = f.supervisor.start("b").await;
        assert!(matches!(second, Err(Error::PortConflict { port: p, .. }) if p == port));

        let report = f.supervisor.reconcile().await;
        assert_eq!(report.len(), 1);
        assert_eq!(status_of(&report, "b"), None);

        f.supervisor.stop_all().await;
    }

    #[tokio::test]
    async fn test_external_listener_is_a_port_conflict() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
        let port = listener.local_addr().expect("Failed to read address").port();
        let f = fixture("sleep", &["30"], &[("a", port)]).await;

        let result = f.supervisor.start("a").await;
        assert!(matches!(result, Err(Error::PortConflict { .. })));
        assert!(f.supervisor.reconcile().await.is_empty());
        drop(listener);
    }

    #[tokio::test]
    async fn test_stop_without_handle_is_idempotent() {
        let f = fixture("sleep", &["30"], &[("a", free_port())]).await;
        assert_eq!(f.supervisor.stop("a").await, StopOutcome::NotRunning);
        assert_eq!(f.supervisor.stop("a").await, StopOutcome::NotRunning);
        assert_eq!(f.supervisor.stop("unknown").await, StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_exited_worker_is_reported_stopped_and_evicted() {
        let f = fixture("sh", &["-c", "exit 0"], &[("a", free_port())]).await;
        f.supervisor.start("a").await.expect("Failed to start");

        // An exited worker stops counting as running before it is evicted
        let mut running = 1;
        for _ in 0..50 {
            running = f.supervisor.running_count().await;
            if running == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(running, 0);

        let mut report = Vec::new();
        for _ in 0..50 {
            report = f.supervisor.reconcile().await;
            if status_of(&report, "a") == Some(InstanceStatus::Stopped) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(status_of(&report, "a"), Some(InstanceStatus::Stopped));
        assert!(f.supervisor.reconcile().await.is_empty());

        // A dead handle does not block a fresh start
        f.supervisor.start("a").await.expect("Failed to restart");
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill_when_term_is_ignored() {
        let f = fixture_with_grace(
            "sh",
            &["-c", "trap '' TERM; sleep 30"],
            &[("a", free_port())],
            Duration::from_millis(300),
        )
        .await;

        f.supervisor.start("a").await.expect("Failed to start");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = tokio::time::timeout(Duration::from_secs(5), f.supervisor.stop("a"))
            .await
            .expect("stop must not hang");
        assert_eq!(outcome, StopOutcome::Stopped);
        assert!(f.supervisor.reconcile().await.is_empty());
    }

    #[tokio::test]
    async fn test_worker_receives_environment_contract() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let out = dir.path().join("env.txt");
        let script = format!(
            "echo \"$GOOGLE_APPLICATION_CREDENTIALS|$GOOGLE_CLOUD_PROJECT|$HOST|$PORT|$GEMINI_AUTH_PASSWORD|$PROXY_ACCOUNT_TYPE\" > {}",
            out.display()
        );
        let port = free_port();
        let f = fixture("sh", &["-c", &script], &[("a", port)]).await;

        f.supervisor.start("a").await.expect("Failed to start");
        let mut written = String::new();
        for _ in 0..50 {
            written = std::fs::read_to_string(&out).unwrap_or_default();
            if written.ends_with('\n') {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let fields: Vec<&str> = written.trim_end().split('|').collect();
        assert_eq!(fields.len(), 6, "unexpected worker env: {:?}", written);
        assert!(std::path::Path::new(fields[0]).is_absolute());
        assert!(fields[0].ends_with("tokens/standard/alice.json"));
        assert_eq!(fields[1], "proj-a");
        assert_eq!(fields[2], "127.0.0.1");
        assert_eq!(fields[3], port.to_string());
        assert_eq!(fields[4], "pw");
        assert_eq!(fields[5], "standard");

        let stored = f.store.load().await;
        assert_eq!(stored.len(), 1);
    }
}
