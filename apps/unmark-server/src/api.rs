//! HTTP handlers

use std::io::Write;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};
use unmark_core::{RemovalTally, WatermarkConfig, WatermarkDetector, WatermarkRemover};

use crate::error::ServerError;
use crate::AppState;

const NO_FILE_SELECTED: &str = "No file selected. Please choose a PDF file.";
const INVALID_FILE_TYPE: &str = "Invalid file type. Please upload a PDF file.";

/// Multipart field names accepted for the upload
const UPLOAD_FIELDS: [&str; 2] = ["pdf_file", "file"];

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "Watermark remover API is running",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize, Debug, Default)]
pub struct RemovalDetails {
    pub total_removed: usize,
    pub images_removed: usize,
    pub links_removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_filename: Option<String>,
}

/// Response for POST /api/remove-watermark
#[derive(Serialize, Debug)]
pub struct RemovalResponse {
    pub success: bool,
    pub message: String,
    pub details: RemovalDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

struct Upload {
    filename: String,
    data: Bytes,
}

/// Decides who owns the output file when the request times out. The job
/// persists and the handler abandons under the same lock, so either the job
/// sees `abandoned` and never persists, or the handler sees `persisted` and
/// removes the file.
#[derive(Debug, Default)]
pub(crate) struct Handoff {
    abandoned: bool,
    persisted: Option<PathBuf>,
}

fn lock(handoff: &Mutex<Handoff>) -> MutexGuard<'_, Handoff> {
    handoff.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Moves `staged` to `destination` unless the request was abandoned.
/// Returns false when it was; dropping `staged` then deletes it.
pub(crate) fn finish_output(
    handoff: &Mutex<Handoff>,
    staged: NamedTempFile,
    destination: &FsPath,
) -> Result<bool, ServerError> {
    let mut state = lock(handoff);
    if state.abandoned {
        return Ok(false);
    }
    staged
        .persist(destination)
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    state.persisted = Some(destination.to_path_buf());
    Ok(true)
}

/// Marks the request as given up and deletes any output already in place
pub(crate) fn abandon(handoff: &Mutex<Handoff>) {
    let mut state = lock(handoff);
    state.abandoned = true;
    if let Some(path) = state.persisted.take() {
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed abandoned output {}", path.display()),
            Err(e) => warn!("Could not remove abandoned output {}: {}", path.display(), e),
        }
    }
}

enum Outcome {
    NotWatermarked,
    Cleaned(RemovalTally),
}

/// POST /api/remove-watermark
pub async fn handle_remove_watermark(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<RemovalResponse>, ServerError> {
    let upload = read_upload(&mut multipart).await?;

    if upload.filename.is_empty() {
        return Err(ServerError::InvalidRequest(NO_FILE_SELECTED.into()));
    }
    if !is_pdf(&upload.filename) {
        return Err(ServerError::InvalidRequest(INVALID_FILE_TYPE.into()));
    }
    let filename = sanitize_filename(&upload.filename)
        .ok_or_else(|| ServerError::InvalidRequest(NO_FILE_SELECTED.into()))?;
    let output_name = format!("processed_{}", filename);

    info!(
        "Processing upload {} ({} bytes)",
        filename,
        upload.data.len()
    );

    let mut input = tempfile::Builder::new()
        .prefix("unmark-upload-")
        .suffix(".pdf")
        .tempfile()?;
    input.write_all(&upload.data)?;
    input.flush()?;

    let handoff = Arc::new(Mutex::new(Handoff::default()));
    let job = {
        let config = state.config.clone();
        let output_dir = state.output_dir.clone();
        let output_name = output_name.clone();
        let handoff = Arc::clone(&handoff);
        tokio::task::spawn_blocking(move || {
            process_upload(input, &config, &output_dir, &output_name, &handoff)
        })
    };

    let outcome = match tokio::time::timeout(Duration::from_millis(state.timeout_ms), job).await
    {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => return Err(ServerError::Internal(format!("Task failed: {}", e))),
        Err(_) => {
            abandon(&handoff);
            warn!("Processing {} timed out after {}ms", filename, state.timeout_ms);
            return Err(ServerError::Timeout(state.timeout_ms));
        }
    };

    let response = match outcome {
        Outcome::Cleaned(tally) => RemovalResponse {
            success: true,
            message: "Watermarks successfully removed!".into(),
            details: RemovalDetails {
                total_removed: tally.total(),
                images_removed: tally.images_removed,
                links_removed: tally.links_removed,
                output_filename: Some(output_name.clone()),
            },
            download_url: Some(format!("/api/download/{}", output_name)),
        },
        Outcome::NotWatermarked => RemovalResponse {
            success: true,
            message: format!(
                "{} watermarks not found in PDF.",
                state.config.target_domain()
            ),
            details: RemovalDetails::default(),
            download_url: None,
        },
    };

    Ok(Json(response))
}

/// GET /api/download/:filename
pub async fn handle_download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ServerError> {
    if sanitize_filename(&filename).as_deref() != Some(filename.as_str()) {
        return Err(ServerError::InvalidRequest("Invalid file name".into()));
    }

    let path = state.output_dir.join(&filename);
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ServerError::NotFound("File not found".into()));
        }
        Err(e) => return Err(e.into()),
    };

    debug!("Serving {} ({} bytes)", filename, data.len());

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(header::CONTENT_LENGTH, data.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from(data))
        .map_err(|e| ServerError::Internal(e.to_string()))
}

async fn read_upload(multipart: &mut Multipart) -> Result<Upload, ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::InvalidRequest(format!("Failed to read upload: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if !UPLOAD_FIELDS.contains(&name.as_str()) {
            debug!("Skipping multipart field {}", name);
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ServerError::InvalidRequest(format!("Failed to read upload: {}", e)))?;
        return Ok(Upload { filename, data });
    }

    Err(ServerError::InvalidRequest(NO_FILE_SELECTED.into()))
}

/// Runs detection then removal. Blocking.
///
/// The cleaned file is staged in `output_dir` and only renamed to
/// `output_name` through [`finish_output`].
fn process_upload(
    input: NamedTempFile,
    config: &WatermarkConfig,
    output_dir: &FsPath,
    output_name: &str,
    handoff: &Mutex<Handoff>,
) -> Result<Outcome, ServerError> {
    let report = WatermarkDetector::new(config.clone()).identify(input.path());
    if let Some(error) = report.error {
        return Err(ServerError::Detection(error));
    }
    if !report.has_watermark() {
        info!("No watermark found");
        return Ok(Outcome::NotWatermarked);
    }

    let staged = tempfile::Builder::new()
        .prefix(".unmark-")
        .suffix(".pdf")
        .tempfile_in(output_dir)?;
    let tally = WatermarkRemover::new(config.clone())
        .clean(input.path(), staged.path())
        .map_err(|e| ServerError::Processing(e.to_string()))?;

    let destination = output_dir.join(output_name);
    if !finish_output(handoff, staged, &destination)? {
        return Err(ServerError::Timeout(0));
    }

    info!(
        "Removed {} images and {} links, saved {}",
        tally.images_removed,
        tally.links_removed,
        destination.display()
    );
    Ok(Outcome::Cleaned(tally))
}

/// Extension check on the client-supplied name
pub fn is_pdf(filename: &str) -> bool {
    FsPath::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Reduces a client-supplied name to a plain file name.
///
/// Drops directory components, folds accented letters to their ASCII base
/// (`é` becomes `e`), joins whitespace runs with `_`, keeps only ASCII
/// alphanumerics plus `.`, `-` and `_`, and trims leading/trailing dots and
/// underscores. `None` if nothing is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or("");
    let folded: String = base
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    let joined = folded.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
