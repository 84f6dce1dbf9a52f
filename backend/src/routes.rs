use actix_cors::Cors;
use actix_multipart::{Field, Multipart};
use actix_web::http::{StatusCode, header};
use actix_web::{HttpResponse, ResponseError, web};
use futures::TryStreamExt;
use log::{debug, error, info, warn};
use shared::{ErrorResponse, HealthResponse, PredictionResponse};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::inference::model::{InferenceError, Model};
use crate::inference::preprocess::ImageError;

const FILE_FIELD: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Model not loaded.")]
    ModelUnavailable,
    #[error("No file provided. Use form field 'file'.")]
    MissingFile,
    #[error("No file selected.")]
    EmptyFilename,
    #[error("File too large. Maximum upload size is {0} bytes.")]
    PayloadTooLarge(usize),
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Prediction failed: {0}")]
    PredictionFailed(String),
}

impl From<InferenceError> for ApiError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::NotLoaded => ApiError::ModelUnavailable,
            InferenceError::Image(ImageError::InvalidImage(reason)) => ApiError::InvalidImage(reason),
            other => ApiError::PredictionFailed(other.to_string()),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::PredictionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::MissingFile
            | ApiError::EmptyFilename
            | ApiError::InvalidUpload(_)
            | ApiError::InvalidImage(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            detail: self.to_string(),
        })
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/predict").route(web::post().to(predict)));
}

/// Only the configured origins get CORS headers. Other origins are still
/// served; the browser enforces the boundary.
pub fn cors(config: &ServerConfig) -> Cors {
    config
        .allowed_origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
        .block_on_origin_mismatch(false)
        .max_age(3600)
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse::ok())
}

async fn predict(
    model: web::Data<Model>,
    config: web::Data<ServerConfig>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    if !model.is_loaded() {
        return Err(ApiError::ModelUnavailable);
    }

    let (filename, image_data) = read_upload(&mut payload, config.max_upload_bytes).await?;
    let request_id = Uuid::new_v4();
    debug!("Request {}: received {} ({} bytes)", request_id, filename, image_data.len());

    let model = model.into_inner();
    let result = web::block(move || model.inference(&image_data))
        .await
        .map_err(|e| ApiError::PredictionFailed(e.to_string()))?;

    match result {
        Ok(decision) => {
            info!(
                "Request {}: {} with confidence {:.4}",
                request_id, decision.status, decision.confidence
            );
            Ok(HttpResponse::Ok().json(PredictionResponse::from(decision)))
        }
        Err(e) => {
            let err = ApiError::from(e);
            match &err {
                ApiError::PredictionFailed(_) => error!("Request {}: {}", request_id, err),
                _ => warn!("Request {}: {}", request_id, err),
            }
            Err(err)
        }
    }
}

/// Finds the first `file` part that carries a filename and reads it whole.
/// A `file` part without a filename is a plain form value, not an upload.
async fn read_upload(payload: &mut Multipart, max_bytes: usize) -> Result<(String, Vec<u8>), ApiError> {
    loop {
        let mut field = match payload.try_next().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(ApiError::MissingFile),
            Err(e) => {
                warn!("Unreadable multipart body: {}", e);
                return Err(ApiError::MissingFile);
            }
        };

        let filename = if field.name() == Some(FILE_FIELD) {
            field
                .content_disposition()
                .and_then(|cd| cd.get_filename())
                .map(str::to_owned)
        } else {
            None
        };

        let Some(filename) = filename else {
            drain(&mut field).await?;
            continue;
        };
        if filename.is_empty() {
            return Err(ApiError::EmptyFilename);
        }

        let mut image_data = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| ApiError::InvalidUpload(e.to_string()))?
        {
            if image_data.len() + chunk.len() > max_bytes {
                return Err(ApiError::PayloadTooLarge(max_bytes));
            }
            image_data.extend_from_slice(&chunk);
        }
        return Ok((filename, image_data));
    }
}

async fn drain(field: &mut Field) -> Result<(), ApiError> {
    while field
        .try_next()
        .await
        .map_err(|e| ApiError::InvalidUpload(e.to_string()))?
        .is_some()
    {}
    Ok(())
}
