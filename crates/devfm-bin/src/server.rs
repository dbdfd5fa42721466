//! HTTP endpoint: the legacy single-script surface, GET for reads and POST
//! (url-encoded or multipart) for mutations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use devfm_core::api::{self, Method, Reply};
use devfm_core::upload::{StagedUpload, UploadFailure};
use devfm_core::Gateway;

#[derive(Clone)]
struct AppState {
    gateway: Arc<Gateway>,
    /// Where multipart file parts are parked before placement
    staging_dir: PathBuf,
}

pub fn router(gateway: Arc<Gateway>) -> Router {
    let body_limit = gateway.config().max_upload_bytes;
    let state = AppState {
        gateway,
        staging_dir: std::env::temp_dir(),
    };
    Router::new()
        .route("/", get(get_action).post(post_action))
        .route("/file-manager.php", get(get_action).post(post_action))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub async fn serve(gateway: Arc<Gateway>) -> Result<()> {
    let addr = gateway.config().listen_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("listening on {}", addr);

    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("received Ctrl+C, shutting down");
}

async fn get_action(State(state): State<AppState>, Query(params): Query<HashMap<String, String>>) -> Response {
    render(api::handle(&state.gateway, Method::Get, &params).await)
}

async fn post_action(State(state): State<AppState>, request: Request) -> Response {
    let multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if multipart {
        return match Multipart::from_request(request, &state).await {
            Ok(multipart) => handle_multipart(&state, multipart).await,
            Err(rejection) => {
                warn!("bad multipart request: {}", rejection);
                render(Reply::error("Azione non valida"))
            }
        };
    }

    match Form::<HashMap<String, String>>::from_request(request, &state).await {
        Ok(Form(params)) => render(api::handle(&state.gateway, Method::Post, &params).await),
        Err(rejection) => {
            warn!("bad form body: {}", rejection);
            render(Reply::error("Azione non valida"))
        }
    }
}

/// Collect text fields as parameters and stage every file part. Upload
/// requests go to the upload path, anything else is a regular POST.
async fn handle_multipart(state: &AppState, mut multipart: Multipart) -> Response {
    let mut params = HashMap::new();
    let mut staged = Vec::new();
    let mut failure = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                failure = Some(transport_failure(&e));
                break;
            }
        };
        if field.file_name().is_some() {
            match stage(&state.staging_dir, field).await {
                Ok(Some(upload)) => staged.push(upload),
                Ok(None) => {}
                Err(f) => {
                    failure = Some(f);
                    break;
                }
            }
            continue;
        }
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match field.text().await {
            Ok(text) => {
                params.insert(name, text);
            }
            Err(e) => {
                failure = Some(transport_failure(&e));
                break;
            }
        }
    }

    if params.get("action").map(String::as_str) == Some("upload") {
        let files = match failure {
            Some(f) => Err(f),
            None => Ok(staged),
        };
        let dir = params.get("dir").map(String::as_str);
        return render(api::upload(&state.gateway, dir, files).await);
    }
    if let Some(f) = failure {
        warn!("multipart body rejected: {}", f);
        return render(Reply::error(f.message()));
    }
    render(api::handle(&state.gateway, Method::Post, &params).await)
}

/// Stream one file part to a staging file. `None` for an empty file
/// input (no name chosen).
async fn stage(dir: &Path, mut field: Field<'_>) -> Result<Option<StagedUpload>, UploadFailure> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    if file_name.is_empty() {
        return Ok(None);
    }
    let (staged, mut file) = StagedUpload::create(dir, file_name).await?;
    while let Some(chunk) = field.chunk().await.map_err(|e| transport_failure(&e))? {
        file.write_all(&chunk).await.map_err(|e| {
            debug!("writing {}: {}", staged.path().display(), e);
            UploadFailure::CantWrite
        })?;
    }
    file.flush().await.map_err(|_| UploadFailure::CantWrite)?;
    Ok(Some(staged))
}

fn transport_failure(e: &MultipartError) -> UploadFailure {
    debug!("multipart error: {}", e);
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadFailure::IniSize
    } else {
        UploadFailure::Partial
    }
}

fn render(reply: Reply) -> Response {
    match reply {
        Reply::Json(value) => Json(value).into_response(),
        Reply::Download { file_name, data } => {
            let disposition = format!("attachment; filename=\"{}\"", file_name.replace(['"', '\\'], "_"));
            let disposition =
                HeaderValue::from_str(&disposition).unwrap_or_else(|_| HeaderValue::from_static("attachment"));
            (
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                data,
            )
                .into_response()
        }
        Reply::Text { status, body } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, body).into_response()
        }
    }
}
