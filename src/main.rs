mod catalog;
mod export;
mod http;
mod idempotency;
mod jobs;
mod metrics;
mod models;
mod pipeline;
mod pricing;
mod resolver;
mod security;
mod sessions;
mod vision;

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Extension, Multipart, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use export::ExportError;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, ExportRequest, ExportResponse, ProcessRequest, ProcessResponse,
    SizeSelectionRequest, SizeSelectionResponse, UrlsSource,
};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use security::{AuthContext, AuthState, require_api_auth};
use serde::Serialize;
use serde_json::json;
use sessions::SessionStore;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "wooex.api", "server crashed: {err}");
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let auth_state = AuthState::from_env();
    let pipeline = Pipeline::from_env();
    let sessions = SessionStore::from_env();
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone(), sessions.clone());
    let openapi_raw = include_str!("../docs/openapi.yaml");
    let openapi: serde_json::Value =
        serde_yaml::from_str(openapi_raw).unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prom recorder");
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|u| redis::Client::open(u).ok());
    let state = AppState {
        pipeline,
        queue,
        sessions,
        export_dir: Arc::new(export_dir_from_env()),
        openapi: Arc::new(openapi),
        idempotency: Arc::new(idempotency::MemoryStore::from_env()),
        prometheus_handle,
        redis,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/process", post(process_batch))
        .route("/process/upload", post(process_upload))
        .nest(
            "/sessions",
            Router::new()
                .route("/{id}/products/{sku}/sizes", put(set_sizes))
                .route(
                    "/{id}/products/{sku}/sizes/toggle_all",
                    post(toggle_all_sizes),
                )
                .route("/{id}/export", post(export_session)),
        )
        .nest(
            "/jobs",
            Router::new()
                .route("/process", post(enqueue_process_job))
                .route("/{id}", get(get_job_status)),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/download/{filename}", get(download))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "wooex.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: jobs::JobQueue,
    sessions: SessionStore,
    export_dir: Arc<PathBuf>,
    openapi: Arc<serde_json::Value>,
    idempotency: Arc<idempotency::MemoryStore>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "wooex-api-rs",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Pipeline(PipelineError::invalid_input(
                "docs",
                "unauthorized",
            )));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Wooex API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(1024 * 1024)
}

fn export_dir_from_env() -> PathBuf {
    std::env::var("EXPORT_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("exports"))
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

/// Run the images → product-records pipeline and open a session.
///
/// - Method: `POST`
/// - Path: `/process`
/// - Auth: `Authorization: Bearer <key>` or `X-Wooex-Key: <key>`
/// - Body: `ProcessRequest`
/// - Response: `ProcessResponse` (session id + records + per-item failures)
async fn process_batch(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, AppError> {
    crate::metrics::inc_requests("/process");
    info!(
        target = "wooex.api",
        org_id = %context.org_id,
        api_key = %context.api_key_id,
        "process batch invoked",
    );

    if let Some(key) = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        if let Some(client) = &state.redis {
            if let Some(existing) = idempotency::redis_get(client, &key).await {
                return Ok(Json(existing));
            }
            let response = run_batch(&state, &payload).await?;
            idempotency::redis_set(client, &key, &response, idempotency::ttl_secs_from_env())
                .await;
            return Ok(Json(response));
        }
        if let Some(existing) = state.idempotency.get(&key).await {
            return Ok(Json(existing));
        }
        let response = run_batch(&state, &payload).await?;
        state.idempotency.set(key, response.clone()).await;
        return Ok(Json(response));
    }

    let response = run_batch(&state, &payload).await?;
    Ok(Json(response))
}

async fn run_batch(
    state: &AppState,
    payload: &ProcessRequest,
) -> Result<ProcessResponse, AppError> {
    let outcome = state.pipeline.run(payload).await?;
    Ok(sessions::register_batch(
        &state.sessions,
        outcome,
        state.pipeline.config.size_options.clone(),
        payload.expansion,
    )
    .await)
}

/// Same as `/process`, but the URL list arrives as an uploaded text file.
///
/// - Method: `POST`
/// - Path: `/process/upload`
/// - Body: multipart; `file` = plain-text URL list, optional `sizes` field
///   (comma-separated), optional `expansion` field.
async fn process_upload(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    mut multipart: Multipart,
) -> Result<Json<ProcessResponse>, AppError> {
    crate::metrics::inc_requests("/process/upload");
    info!(
        target = "wooex.api",
        org_id = %context.org_id,
        "upload batch invoked",
    );

    let mut urls: Option<Vec<String>> = None;
    let mut sizes: Option<Vec<String>> = None;
    let mut expansion = models::ExpansionMode::default();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        AppError::Pipeline(PipelineError::invalid_input(
            "resolve_sources",
            err.to_string(),
        ))
    })? {
        let name = field.name().unwrap_or_default().to_string();
        let text = field.text().await.map_err(|err| {
            AppError::Pipeline(PipelineError::invalid_input(
                "resolve_sources",
                err.to_string(),
            ))
        })?;
        match name.as_str() {
            "file" => urls = Some(resolver::parse_upload(&text)),
            "sizes" => {
                sizes = Some(
                    text.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
                )
            }
            "expansion" if text.trim() == "combined" => {
                expansion = models::ExpansionMode::Combined
            }
            _ => {}
        }
    }

    let Some(urls) = urls.filter(|u| !u.is_empty()) else {
        return Err(AppError::Pipeline(PipelineError::invalid_input(
            "resolve_sources",
            "no image urls provided",
        )));
    };

    let payload = ProcessRequest {
        urls_source: UrlsSource::Multiple(urls),
        sizes,
        expansion,
    };
    let response = run_batch(&state, &payload).await?;
    Ok(Json(response))
}

/// Replace one product's size selection.
async fn set_sizes(
    State(state): State<AppState>,
    Path((id, sku)): Path<(String, String)>,
    Json(payload): Json<SizeSelectionRequest>,
) -> Result<Json<SizeSelectionResponse>, AppError> {
    crate::metrics::inc_requests("/sessions/sizes");
    let session_id = parse_session_id(&id)?;
    let updated = state
        .sessions
        .with_session(session_id, |session| {
            let options = session.size_options.clone();
            session
                .products
                .iter_mut()
                .find(|product| product.sku == sku)
                .map(|product| {
                    product.set_sizes(&payload.sizes, &options);
                    product.sizes.clone()
                })
        })
        .await
        .ok_or(AppError::NotFound("session_not_found"))?
        .ok_or(AppError::NotFound("sku_not_found"))?;
    Ok(Json(SizeSelectionResponse {
        sku,
        sizes: updated,
    }))
}

/// Toggle-all sizes on one product: all selected → none, anything else → all.
async fn toggle_all_sizes(
    State(state): State<AppState>,
    Path((id, sku)): Path<(String, String)>,
) -> Result<Json<SizeSelectionResponse>, AppError> {
    crate::metrics::inc_requests("/sessions/toggle_all");
    let session_id = parse_session_id(&id)?;
    let updated = state
        .sessions
        .with_session(session_id, |session| {
            let options = session.size_options.clone();
            session
                .products
                .iter_mut()
                .find(|product| product.sku == sku)
                .map(|product| {
                    product.toggle_all_sizes(&options);
                    product.sizes.clone()
                })
        })
        .await
        .ok_or(AppError::NotFound("session_not_found"))?
        .ok_or(AppError::NotFound("sku_not_found"))?;
    Ok(Json(SizeSelectionResponse {
        sku,
        sizes: updated,
    }))
}

/// Render the session's records to a CSV artifact.
///
/// - Method: `POST`
/// - Path: `/sessions/{id}/export`
/// - Response: `{ success, download_url, filename, row_count }`
async fn export_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<ExportRequest>>,
) -> Result<Json<ExportResponse>, AppError> {
    crate::metrics::inc_requests("/sessions/export");
    let session_id = parse_session_id(&id)?;
    let (records, session_mode) = state
        .sessions
        .with_session(session_id, |session| {
            (session.products.clone(), session.expansion)
        })
        .await
        .ok_or(AppError::NotFound("session_not_found"))?;

    let mode = payload
        .and_then(|Json(req)| req.expansion)
        .unwrap_or(session_mode);
    let artifact = export::write_csv(&records, mode, &state.export_dir)?;

    Ok(Json(ExportResponse {
        success: true,
        download_url: format!("/download/{}", urlencoding::encode(&artifact.filename)),
        filename: artifact.filename,
        row_count: artifact.row_count,
    }))
}

/// Serve a previously generated export artifact.
async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    crate::metrics::inc_requests("/download");
    // Refuse anything that is not a bare CSV basename.
    let safe = std::path::Path::new(&filename)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| *name == filename && name.ends_with(".csv"))
        .ok_or(AppError::NotFound("file_not_found"))?;

    let path = state.export_dir.join(safe);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| AppError::NotFound("file_not_found"))?;

    Response::builder()
        .header("Content-Type", "text/csv; charset=utf-8")
        .header(
            "Content-Disposition",
            format!("attachment; filename=\"{safe}\""),
        )
        .header("Cache-Control", "no-cache, no-store, must-revalidate")
        .body(Body::from(bytes))
        .map_err(|err| AppError::Pipeline(PipelineError::internal("download", err.to_string())))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_process_job(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<ProcessRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/process");
    let id = state
        .queue
        .enqueue_batch(payload, context)
        .await
        .map_err(|err| AppError::Pipeline(PipelineError::internal("enqueue", err.error)))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = Uuid::parse_str(&id) else {
        return Err(AppError::Pipeline(PipelineError::invalid_input(
            "jobs",
            "invalid_job_id",
        )));
    };
    if let Some(info) = state.queue.get(uuid).await {
        Ok(Json(info))
    } else {
        Err(AppError::NotFound("job_not_found"))
    }
}

fn parse_session_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| {
        AppError::Pipeline(PipelineError::invalid_input("sessions", "invalid_session_id"))
    })
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    Export(ExportError),
    NotFound(&'static str),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl From<ExportError> for AppError {
    fn from(value: ExportError) -> Self {
        Self::Export(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::ServiceUnavailable => StatusCode::BAD_GATEWAY,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
            AppError::Export(err) => {
                let payload = ApiError {
                    error: "export".to_string(),
                    detail: Some(err.to_string()),
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
            }
            AppError::NotFound(code) => {
                let payload = ApiError {
                    error: code.to_string(),
                    detail: None,
                };
                (StatusCode::NOT_FOUND, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
