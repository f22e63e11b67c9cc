use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use arbor_core::tree::Tree;
use arbor_core::types::{BranchName, OwnerId, ProjectId, ProjectKey, ProjectType, RepoRef};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

fn default_history_limit() -> usize {
    20
}

/// JSON newline-delimited request, tagged by `cmd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum DaemonRequest {
    Status,
    Stop,
    List {
        owner: OwnerId,
    },
    Create {
        owner: OwnerId,
        name: String,
        #[serde(default)]
        project_type: ProjectType,
        /// Starter files; the type's template when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        files: Option<Tree>,
    },
    Load {
        owner: OwnerId,
        project: ProjectId,
    },
    /// Reconciled against the open session when there is one.
    Save {
        owner: OwnerId,
        project: ProjectId,
        tree: Tree,
    },
    Push {
        owner: OwnerId,
        project: ProjectId,
    },
    Pull {
        owner: OwnerId,
        project: ProjectId,
    },
    Init {
        owner: OwnerId,
        project: ProjectId,
    },
    Import {
        owner: OwnerId,
        repo: RepoRef,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<BranchName>,
    },
    Delete {
        owner: OwnerId,
        project: ProjectId,
    },
    History {
        owner: OwnerId,
        project: ProjectId,
        #[serde(default = "default_history_limit")]
        limit: usize,
    },
    OpenSession {
        owner: OwnerId,
        project: ProjectId,
    },
    CloseSession {
        owner: OwnerId,
        project: ProjectId,
    },
}

impl DaemonRequest {
    pub fn name(&self) -> &'static str {
        match self {
            DaemonRequest::Status => "status",
            DaemonRequest::Stop => "stop",
            DaemonRequest::List { .. } => "list",
            DaemonRequest::Create { .. } => "create",
            DaemonRequest::Load { .. } => "load",
            DaemonRequest::Save { .. } => "save",
            DaemonRequest::Push { .. } => "push",
            DaemonRequest::Pull { .. } => "pull",
            DaemonRequest::Init { .. } => "init",
            DaemonRequest::Import { .. } => "import",
            DaemonRequest::Delete { .. } => "delete",
            DaemonRequest::History { .. } => "history",
            DaemonRequest::OpenSession { .. } => "open_session",
            DaemonRequest::CloseSession { .. } => "close_session",
        }
    }
}

pub(crate) fn key(owner: &OwnerId, project: &ProjectId) -> ProjectKey {
    ProjectKey::new(owner.clone(), *project)
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn into_data(self) -> Result<Value, DaemonError> {
        if self.ok {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(DaemonError::Protocol(
                self.error
                    .unwrap_or_else(|| "unknown daemon error".to_string()),
            ))
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    Ok(serde_json::from_str(line.trim_end())?)
}

/// Send `request` and unwrap the response payload.
pub fn request(home: &Path, request: &DaemonRequest) -> Result<Value, DaemonError> {
    send_request(home, request)?.into_data()
}

/// Status, retrying briefly while a freshly started daemon binds its socket.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &DaemonRequest::Status) {
            Ok(response) => return response.into_data(),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    request(home, &DaemonRequest::Stop).map(|_| ())
}
