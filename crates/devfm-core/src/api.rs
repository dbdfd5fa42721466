//! Request dispatch: maps an `action` plus its parameters onto one gateway
//! operation and renders the reply the front-end expects.

use std::collections::HashMap;
use std::io;

use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::upload::{StagedUpload, UploadFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One parsed request. GET carries the read-only actions, POST the
/// mutating ones; uploads arrive as multipart and go through [`upload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    List { dir: Option<String> },
    Read { file: String, download: bool },
    Details { file: String },
    Search { query: String, dir: Option<String> },
    Credentials,
    FixPermissions { dir: Option<String> },
    CleanupTmp,
    Create { file: String, dir: Option<String> },
    CreateDir { name: String, dir: String },
    Save { file: String, content: String, sudo: bool },
    Delete { path: String },
    Rename { old_path: String, new_name: String },
    Chmod { path: String, mode: String },
    Copy { source: String, destination: String },
    Move { source: String, destination: String },
}

/// What goes back over the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Always HTTP 200, errors included
    Json(Value),
    /// `read` with `download=true`
    Download { file_name: String, data: Bytes },
    /// Plain-text failure of a download
    Text { status: u16, body: String },
}

impl Reply {
    /// `{"error": msg}`
    pub fn error(msg: impl Into<String>) -> Self {
        Reply::Json(json!({ "error": msg.into() }))
    }
}

fn invalid() -> GatewayError {
    GatewayError::malformed("Azione non valida")
}

impl Request {
    /// Parse a request from its method and flattened parameters. GET
    /// without an `action` lists the managed root.
    pub fn parse(method: Method, params: &HashMap<String, String>) -> Result<Self, GatewayError> {
        let opt = |key: &str| params.get(key).cloned();
        let req = |key: &str| params.get(key).cloned().ok_or_else(invalid);
        let flag = |key: &str| params.get(key).is_some_and(|v| v == "true");

        let action = params.get("action").map(String::as_str);
        let request = match (method, action) {
            (Method::Get, None | Some("list")) => Request::List { dir: opt("dir") },
            (Method::Get, Some("read")) => Request::Read {
                file: req("file")?,
                download: flag("download"),
            },
            (Method::Get, Some("details")) => Request::Details { file: req("file")? },
            (Method::Get, Some("search")) => Request::Search {
                query: req("query")?,
                dir: opt("dir"),
            },
            (Method::Get, Some("get_mysql_credentials")) => Request::Credentials,
            (Method::Get, Some("fix_permissions")) => Request::FixPermissions { dir: opt("dir") },
            (Method::Get, Some("cleanup_tmp")) => Request::CleanupTmp,

            (Method::Post, Some("create")) => Request::Create {
                file: req("file")?,
                dir: opt("dir"),
            },
            (Method::Post, Some("create_dir")) => Request::CreateDir {
                name: req("name")?,
                dir: req("dir")?,
            },
            (Method::Post, Some("save")) => Request::Save {
                file: req("file")?,
                content: req("content")?,
                sudo: flag("sudo"),
            },
            (Method::Post, Some("delete")) => Request::Delete { path: req("path")? },
            (Method::Post, Some("rename")) => Request::Rename {
                old_path: req("old_path")?,
                new_name: req("new_name")?,
            },
            (Method::Post, Some("chmod")) => Request::Chmod {
                path: req("path")?,
                mode: req("mode")?,
            },
            (Method::Post, Some("copy")) => Request::Copy {
                source: req("source")?,
                destination: req("destination")?,
            },
            (Method::Post, Some("move")) => Request::Move {
                source: req("source")?,
                destination: req("destination")?,
            },
            _ => return Err(invalid()),
        };
        Ok(request)
    }

    pub fn action(&self) -> &'static str {
        match self {
            Request::List { .. } => "list",
            Request::Read { .. } => "read",
            Request::Details { .. } => "details",
            Request::Search { .. } => "search",
            Request::Credentials => "get_mysql_credentials",
            Request::FixPermissions { .. } => "fix_permissions",
            Request::CleanupTmp => "cleanup_tmp",
            Request::Create { .. } => "create",
            Request::CreateDir { .. } => "create_dir",
            Request::Save { .. } => "save",
            Request::Delete { .. } => "delete",
            Request::Rename { .. } => "rename",
            Request::Chmod { .. } => "chmod",
            Request::Copy { .. } => "copy",
            Request::Move { .. } => "move",
        }
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, GatewayError> {
    serde_json::to_value(value).map_err(|e| GatewayError::io("Errore nella serializzazione", io::Error::from(e)))
}

fn log_failure(action: &str, err: &GatewayError) {
    if err.is_user_error() {
        warn!("{} rejected: {}", action, err);
    } else {
        error!("{} failed: {}", action, err);
    }
}

/// Parse then dispatch; a request that does not parse gets the
/// "Azione non valida" reply.
pub async fn handle(gateway: &Gateway, method: Method, params: &HashMap<String, String>) -> Reply {
    match Request::parse(method, params) {
        Ok(request) => dispatch(gateway, request).await,
        Err(e) => {
            warn!("rejected request: {}", e);
            Reply::error(e.to_string())
        }
    }
}

pub async fn dispatch(gateway: &Gateway, request: Request) -> Reply {
    let action = request.action();

    let result = match request {
        Request::Read { file, download: true } => return download(gateway, &file).await,
        Request::Details { file } => match gateway.details(&file) {
            Ok(None) => return Reply::Json(json!({ "exists": false, "error": "File non trovato" })),
            Ok(Some(details)) => to_json(details),
            Err(e) => Err(e),
        },
        Request::Credentials => match gateway.credentials().await {
            Ok(creds) => to_json(creds),
            Err(e) => {
                log_failure(action, &e);
                return Reply::error(format!("Errore nel recupero delle credenziali: {}", e));
            }
        },
        Request::List { dir } => gateway.list(dir.as_deref()).await.and_then(to_json),
        Request::Read { file, download: false } => gateway
            .read(&file)
            .await
            .and_then(|content| to_json(content.into_outcome())),
        Request::Search { query, dir } => gateway.search(dir.as_deref(), &query).await.and_then(to_json),
        Request::FixPermissions { dir } => gateway.fix_permissions(dir.as_deref()).await.and_then(to_json),
        Request::CleanupTmp => gateway.cleanup_tmp().await.and_then(to_json),
        Request::Create { file, dir } => gateway.create(dir.as_deref(), &file).await.and_then(to_json),
        Request::CreateDir { name, dir } => gateway.create_dir(Some(dir.as_str()), &name).await.and_then(to_json),
        Request::Save { file, content, sudo } => gateway
            .save(&file, content.as_bytes(), sudo)
            .await
            .and_then(to_json),
        Request::Delete { path } => gateway.delete(&path).await.and_then(to_json),
        Request::Rename { old_path, new_name } => gateway.rename(&old_path, &new_name).await.and_then(to_json),
        Request::Chmod { path, mode } => gateway.chmod(&path, &mode).await.and_then(to_json),
        Request::Copy { source, destination } => gateway.copy(&source, &destination).await.and_then(to_json),
        Request::Move { source, destination } => gateway
            .move_entry(&source, &destination)
            .await
            .and_then(to_json),
    };

    match result {
        Ok(value) => Reply::Json(value),
        Err(e) => {
            log_failure(action, &e);
            Reply::error(e.to_string())
        }
    }
}

async fn download(gateway: &Gateway, file: &str) -> Reply {
    match gateway.read(file).await {
        Ok(content) => Reply::Download {
            file_name: content.name,
            data: Bytes::from(content.bytes),
        },
        Err(e) => {
            log_failure("download", &e);
            let (status, body) = match &e {
                GatewayError::NotFound(_) => (404, "File non trovato".to_string()),
                GatewayError::MalformedInput(_) => (400, "Non è possibile scaricare directory".to_string()),
                GatewayError::PermissionDenied(_) | GatewayError::SubprocessFailed { .. } => {
                    (403, "File non leggibile".to_string())
                }
                other => (500, other.to_string()),
            };
            Reply::Text { status, body }
        }
    }
}

/// Place every staged part in `dir`. The reply is the last success, or
/// the first failure.
pub async fn upload(gateway: &Gateway, dir: Option<&str>, staged: Result<Vec<StagedUpload>, UploadFailure>) -> Reply {
    let files = match staged {
        Ok(files) if files.is_empty() => Err(UploadFailure::NoFile),
        other => other,
    };
    let files = match files {
        Ok(files) => files,
        Err(failure) => {
            let e = GatewayError::Upload(failure);
            log_failure("upload", &e);
            return Reply::error(e.to_string());
        }
    };

    let mut last = Reply::Json(json!({ "success": true }));
    for file in &files {
        match gateway.upload(dir, file).await.and_then(to_json) {
            Ok(value) => last = Reply::Json(value),
            Err(e) => {
                log_failure("upload", &e);
                return Reply::error(e.to_string());
            }
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_get_defaults_to_list() {
        assert_eq!(
            Request::parse(Method::Get, &params(&[])).unwrap(),
            Request::List { dir: None }
        );
        assert_eq!(
            Request::parse(Method::Get, &params(&[("dir", "/srv")])).unwrap(),
            Request::List {
                dir: Some("/srv".into())
            }
        );
    }

    #[test]
    fn test_post_requires_action() {
        let err = Request::parse(Method::Post, &params(&[("path", "/x")])).unwrap_err();
        assert_eq!(err.to_string(), "Azione non valida");
    }

    #[test]
    fn test_missing_parameter_is_invalid() {
        let err = Request::parse(Method::Post, &params(&[("action", "rename"), ("old_path", "/a")])).unwrap_err();
        assert_eq!(err.to_string(), "Azione non valida");
    }

    #[test]
    fn test_mutations_are_post_only() {
        assert!(Request::parse(Method::Get, &params(&[("action", "delete"), ("path", "/a")])).is_err());
        assert!(Request::parse(Method::Post, &params(&[("action", "read"), ("file", "/a")])).is_err());
    }

    #[test]
    fn test_flags() {
        let read = Request::parse(Method::Get, &params(&[("action", "read"), ("file", "a"), ("download", "true")])).unwrap();
        assert_eq!(
            read,
            Request::Read {
                file: "a".into(),
                download: true
            }
        );
        let save = Request::parse(
            Method::Post,
            &params(&[("action", "save"), ("file", "a"), ("content", ""), ("sudo", "1")]),
        )
        .unwrap();
        assert_eq!(
            save,
            Request::Save {
                file: "a".into(),
                content: String::new(),
                sudo: false
            }
        );
        assert_eq!(save.action(), "save");
    }
}
