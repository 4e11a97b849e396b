use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Everything that can go wrong while receiving an upload.
///
/// The client only ever sees the status code plus `{"success": false}`;
/// the detail carried here is for the server-side logs.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("unsupported content type {0:?}")]
    UnsupportedContentType(String),

    #[error("multipart part is neither a file nor a form field")]
    MalformedPart,

    #[error("malformed multipart body: {0}")]
    MalformedMultipartBody(String),

    #[error("missing x-file-name header on octet-stream upload")]
    MissingFilenameHeader,

    #[error("invalid filename {0:?}")]
    InvalidFilename(String),

    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    #[error("preflight is only supported for POST")]
    UnsupportedPreflightMethod,
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedContentType(_) | Self::UnsupportedPreflightMethod => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
