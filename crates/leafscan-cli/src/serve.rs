//! HTTP boundary: upload intake and JSON responses around [`Pipeline`].
//!
//! Routes:
//! - `GET /` upload page
//! - `POST /predict` multipart field `file` → `{"crop": {...}, "disease": {...}}`
//! - `GET /health`
//! - `GET /favicon.ico`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use leafscan_ai::Pipeline;
use leafscan_core::{Diagnosis, InferenceError};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Largest accepted upload.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>leafscan</title></head>
<body>
  <h1>Leaf diagnosis</h1>
  <form id="upload">
    <input type="file" name="file" accept="image/*">
    <button type="submit">Predict</button>
  </form>
  <pre id="result"></pre>
  <script>
    document.getElementById("upload").addEventListener("submit", async (event) => {
      event.preventDefault();
      const response = await fetch("/predict", { method: "POST", body: new FormData(event.target) });
      document.getElementById("result").textContent = JSON.stringify(await response.json(), null, 2);
    });
  </script>
</body>
</html>
"#;

pub type SharedPipeline = Arc<Pipeline>;

/// Build the router. The pipeline is fully loaded before any route can run.
pub fn router(pipeline: SharedPipeline) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/predict", post(predict))
        .route("/health", get(health))
        .route("/favicon.ico", get(favicon))
        .with_state(pipeline)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(pipeline: SharedPipeline, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("serving on http://{addr}");
    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}

/// JSON error body `{"error": "..."}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<InferenceError> for ApiError {
    fn from(err: InferenceError) -> Self {
        if err.is_client_error() {
            warn!(error = %err, "rejected upload");
            Self::bad_request(err.to_string())
        } else {
            error!(error = %err, "inference failed");
            Self::internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn predict(
    State(pipeline): State<SharedPipeline>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Diagnosis>, ApiError> {
    let mut multipart = multipart.map_err(|e| {
        warn!(error = %e, "upload is not multipart");
        ApiError::bad_request("No file uploaded")
    })?;
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed upload: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("reading upload: {e}")))?;
        upload = Some((filename, bytes));
        break;
    }

    let Some((filename, bytes)) = upload else {
        return Err(ApiError::bad_request("No file uploaded"));
    };
    if filename.is_empty() {
        return Err(ApiError::bad_request("No file selected"));
    }

    // Inference is CPU-bound; keep it off the async workers.
    let diagnosis = tokio::task::spawn_blocking(move || pipeline.infer_bytes(&bytes))
        .await
        .map_err(|e| ApiError::internal(format!("inference task failed: {e}")))??;

    info!(
        file = %filename,
        crop = %diagnosis.crop.name,
        disease = %diagnosis.disease.name,
        "prediction"
    );
    Ok(Json(diagnosis))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    embedding_dim: usize,
    crop_classes: usize,
    disease_classes: usize,
}

async fn health(State(pipeline): State<SharedPipeline>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        embedding_dim: pipeline.embedding_dim(),
        crop_classes: pipeline.crop_labels().len(),
        disease_classes: pipeline.disease_labels().len(),
    })
}

async fn favicon() -> Json<serde_json::Value> {
    Json(json!({ "message": "No favicon provided" }))
}
