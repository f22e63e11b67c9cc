use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Mutex, RwLock};

use arbor_core::types::ProjectKey;
use arbor_sync::{Coordinator, LocalSandbox, Sandbox, SyncSession};

use crate::error::{io_err, DaemonError};
use crate::paths::{run_dir, sandbox_dir, sandboxes_dir, socket_path};
use crate::protocol::{key, DaemonRequest, DaemonResponse};

/// A live sandbox the daemon holds open for a project.
struct OpenSession {
    sandbox: Arc<LocalSandbox>,
    session: SyncSession,
    opened_at_unix: u64,
}

/// Daemon state shared by every socket client.
pub struct Daemon {
    home: PathBuf,
    coordinator: Coordinator,
    sessions: RwLock<HashMap<ProjectKey, OpenSession>>,
    /// Serializes opening and closing per project; `sessions` is only
    /// locked for lookups and inserts.
    session_gates: Mutex<HashMap<ProjectKey, Arc<Mutex<()>>>>,
    shutdown: broadcast::Sender<()>,
    started_at_unix: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon until a `stop` request or ctrl-c.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let coordinator = Coordinator::open_at(&home)?;

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let daemon = Arc::new(Daemon::new(home.clone(), coordinator, shutdown_tx.clone()));

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let daemon = daemon.clone();
        tokio::spawn(async move {
            let result = socket_server_task(daemon, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    daemon.close_all_sessions().await;

    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

impl Daemon {
    pub fn new(home: PathBuf, coordinator: Coordinator, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            home,
            coordinator,
            sessions: RwLock::new(HashMap::new()),
            session_gates: Mutex::new(HashMap::new()),
            shutdown,
            started_at_unix: unix_seconds_now(),
        }
    }

    /// Answer one request. Failures become error responses.
    pub async fn dispatch(&self, request: DaemonRequest) -> DaemonResponse {
        let cmd = request.name();
        match self.handle(request).await {
            Ok(data) => DaemonResponse::ok(data),
            Err(err) => {
                tracing::warn!(cmd, error = %err, "request failed");
                DaemonResponse::error(err.to_string())
            }
        }
    }

    async fn handle(&self, request: DaemonRequest) -> Result<Value, DaemonError> {
        let coordinator = &self.coordinator;
        let data = match request {
            DaemonRequest::Status => self.status_payload().await,
            DaemonRequest::Stop => {
                let _ = self.shutdown.send(());
                json!({ "stopping": true })
            }
            DaemonRequest::List { owner } => to_json(coordinator.list(&owner).await?)?,
            DaemonRequest::Create {
                owner,
                name,
                project_type,
                files,
            } => to_json(coordinator.create(&owner, &name, project_type, files).await?)?,
            DaemonRequest::Load { owner, project } => {
                to_json(coordinator.load(&key(&owner, &project)).await?)?
            }
            DaemonRequest::Save {
                owner,
                project,
                tree,
            } => {
                let key = key(&owner, &project);
                let session = self.session(&key).await;
                to_json(coordinator.save(&key, tree, session).await?)?
            }
            DaemonRequest::Push { owner, project } => {
                to_json(coordinator.push(&key(&owner, &project)).await?)?
            }
            DaemonRequest::Pull { owner, project } => {
                let key = key(&owner, &project);
                let session = self.session(&key).await;
                to_json(coordinator.pull(&key, session).await?)?
            }
            DaemonRequest::Init { owner, project } => {
                to_json(coordinator.init(&key(&owner, &project)).await?)?
            }
            DaemonRequest::Import {
                owner,
                repo,
                name,
                branch,
            } => to_json(coordinator.import(&owner, repo, &name, branch).await?)?,
            DaemonRequest::Delete { owner, project } => {
                let key = key(&owner, &project);
                self.close_session(&key).await?;
                to_json(coordinator.delete(&key).await?)?
            }
            DaemonRequest::History {
                owner,
                project,
                limit,
            } => to_json(coordinator.history(&key(&owner, &project), limit).await?)?,
            DaemonRequest::OpenSession { owner, project } => {
                self.open_session(key(&owner, &project)).await?
            }
            DaemonRequest::CloseSession { owner, project } => {
                let closed = self.close_session(&key(&owner, &project)).await?;
                json!({ "closed": closed })
            }
        };
        Ok(data)
    }

    async fn session(&self, key: &ProjectKey) -> Option<SyncSession> {
        self.sessions
            .read()
            .await
            .get(key)
            .map(|open| open.session.clone())
    }

    async fn gate(&self, key: &ProjectKey) -> Arc<Mutex<()>> {
        self.session_gates
            .lock()
            .await
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Boot a sandbox for `key` and mount the project's loaded tree into it.
    /// Opening an already open session reports the existing one.
    async fn open_session(&self, key: ProjectKey) -> Result<Value, DaemonError> {
        let gate = self.gate(&key).await;
        let _opening = gate.lock().await;
        if let Some(open) = self.sessions.read().await.get(&key) {
            return Ok(session_payload(&key, open, false));
        }

        let tree = self.coordinator.load(&key).await?;
        let sandbox = LocalSandbox::boot(
            sandbox_dir(&self.home, &key),
            self.coordinator.exclusions().clone(),
        )
        .await?;
        sandbox.mount(&tree).await?;

        let sandbox = Arc::new(sandbox);
        let open = OpenSession {
            session: SyncSession::new(key.clone(), sandbox.clone()),
            sandbox,
            opened_at_unix: unix_seconds_now(),
        };
        tracing::info!(project = %key, files = tree.file_count(), "session opened");
        let payload = session_payload(&key, &open, true);
        self.sessions.write().await.insert(key, open);
        Ok(payload)
    }

    async fn close_session(&self, key: &ProjectKey) -> Result<bool, DaemonError> {
        let gate = self.gate(key).await;
        let _closing = gate.lock().await;
        let Some(open) = self.sessions.write().await.remove(key) else {
            return Ok(false);
        };
        open.sandbox.teardown().await?;
        tracing::info!(project = %key, "session closed");
        Ok(true)
    }

    async fn close_all_sessions(&self) {
        let open: Vec<(ProjectKey, OpenSession)> =
            self.sessions.write().await.drain().collect();
        for (key, session) in open {
            if let Err(err) = session.sandbox.teardown().await {
                tracing::warn!(project = %key, error = %err, "sandbox teardown failed");
            }
        }
    }

    async fn status_payload(&self) -> Value {
        let sessions: Vec<Value> = {
            let sessions = self.sessions.read().await;
            let mut keys: Vec<&ProjectKey> = sessions.keys().collect();
            keys.sort();
            keys.into_iter()
                .map(|key| {
                    json!({
                        "project": key.to_string(),
                        "opened_at_unix": sessions[key].opened_at_unix,
                    })
                })
                .collect()
        };
        json!({
            "running": true,
            "started_at_unix": self.started_at_unix,
            "sessions": sessions,
            "socket": socket_path(&self.home).display().to_string(),
            "home": self.home.display().to_string(),
        })
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, DaemonError> {
    Ok(serde_json::to_value(value)?)
}

fn session_payload(key: &ProjectKey, open: &OpenSession, opened: bool) -> Value {
    json!({
        "project": key.to_string(),
        "sandbox": open.sandbox.root().display().to_string(),
        "opened": opened,
        "opened_at_unix": open.opened_at_unix,
    })
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    daemon: Arc<Daemon>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&daemon.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let daemon = daemon.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, daemon).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, daemon: Arc<Daemon>) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request: {err}")),
                )
                .await?;
                continue;
            }
        };
        let stop = request == DaemonRequest::Stop;
        let response = daemon.dispatch(request).await;
        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }
    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }
    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [run_dir(home), sandboxes_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
