use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::{
        multipart::{Field, MultipartError},
        BodyStream, ConnectInfo, FromRequest, Multipart, RequestParts,
    },
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use futures::TryStreamExt;
use tracing::{error, info, warn};

use crate::{
    error::UploadError,
    models::UploadOutcome,
    sink::{sanitize_filename, FileSink},
};

const FILENAME_HEADER: &str = "x-file-name";

// handler for POST /upload; accepts multipart forms and raw octet-stream bodies
pub async fn post_upload(
    Extension(sink): Extension<Arc<FileSink>>,
    req: Request<Body>,
) -> Response {
    let mut parts = RequestParts::new(req);
    let origin = request_origin(parts.headers());

    match dispatch(&mut parts, &sink).await {
        Ok(()) => (StatusCode::OK, Json(UploadOutcome::ok())).into_response(),
        Err(err) => {
            error!(origin = %origin, error = %err, "upload failed");
            (err.status(), Json(UploadOutcome::failed())).into_response()
        }
    }
}

async fn dispatch(
    parts: &mut RequestParts<Body>,
    sink: &FileSink,
) -> Result<(), UploadError> {
    // parameters such as the multipart boundary are not relevant for routing
    let media_type = parts
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_owned();

    match media_type.as_str() {
        "multipart/form-data" => {
            let multipart = Multipart::from_request(parts)
                .await
                .map_err(|err| UploadError::MalformedMultipartBody(err.to_string()))?;
            receive_multipart(multipart, sink).await
        }
        "application/octet-stream" => receive_octet_stream(parts, sink).await,
        other => Err(UploadError::UnsupportedContentType(other.to_owned())),
    }
}

enum UploadPart<'a> {
    File {
        filename: String,
        content: Field<'a>,
    },
    Parameter {
        name: String,
        value: String,
    },
}

async fn next_part(multipart: &mut Multipart) -> Result<Option<UploadPart<'_>>, UploadError> {
    let field = match multipart.next_field().await.map_err(into_multipart_failure)? {
        Some(field) => field,
        None => return Ok(None),
    };

    if let Some(filename) = field.file_name().map(str::to_owned) {
        return Ok(Some(UploadPart::File {
            filename,
            content: field,
        }));
    }
    match field.name().map(str::to_owned) {
        Some(name) => {
            // form field values are small, read them eagerly
            let value = field.text().await.map_err(into_multipart_failure)?;
            Ok(Some(UploadPart::Parameter { name, value }))
        }
        None => Err(UploadError::MalformedPart),
    }
}

async fn receive_multipart(
    mut multipart: Multipart,
    sink: &FileSink,
) -> Result<(), UploadError> {
    while let Some(part) = next_part(&mut multipart).await? {
        match part {
            UploadPart::File { filename, content } => {
                let name = sanitize_filename(&filename)?;
                let written = sink
                    .store(name, content.map_err(into_multipart_failure))
                    .await?;
                info!(filename = name, bytes = written, "received file part");
            }
            UploadPart::Parameter { name, value } => {
                info!(name = %name, value = %value, "received form parameter");
            }
        }
    }

    Ok(())
}

// the whole body is one file; the filename travels in a header
async fn receive_octet_stream(
    parts: &mut RequestParts<Body>,
    sink: &FileSink,
) -> Result<(), UploadError> {
    let raw = parts
        .headers()
        .get(FILENAME_HEADER)
        .ok_or(UploadError::MissingFilenameHeader)?
        .to_str()
        .map_err(|_| UploadError::InvalidFilename(String::from("<not utf-8>")))?
        .to_owned();
    let filename = sanitize_filename(&raw)?;

    let body = BodyStream::from_request(parts)
        .await
        .map_err(into_io_failure)?;
    let written = sink.store(filename, body.map_err(into_io_failure)).await?;
    info!(filename = filename, bytes = written, "received octet-stream upload");

    Ok(())
}

// handler for OPTIONS /upload; browsers send this before a cross-origin POST
pub async fn preflight(
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let origin = request_origin(&headers);
    let remote = connect
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| String::from("unknown"));

    match headers.get(header::ACCESS_CONTROL_REQUEST_METHOD) {
        Some(method) if method == "POST" => {
            info!(origin = %origin, remote = %remote, "answering cors preflight");
            (StatusCode::OK, preflight_headers(), "").into_response()
        }
        _ => {
            let err = UploadError::UnsupportedPreflightMethod;
            warn!(origin = %origin, remote = %remote, error = %err, "rejecting cors preflight");
            err.status().into_response()
        }
    }
}

fn preflight_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type,x-file-name,x-requested-with"),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("100"));
    headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("Keep-Alive"));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers
}

fn request_origin(headers: &HeaderMap) -> String {
    headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_owned()
}

fn into_io_failure<E>(err: E) -> UploadError
where
    E: std::error::Error + Send + Sync + 'static,
{
    UploadError::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
}

// axum reports framing and transport errors on a multipart stream as
// one error type, so anything failing mid-body lands here
fn into_multipart_failure(err: MultipartError) -> UploadError {
    UploadError::MalformedMultipartBody(err.to_string())
}
