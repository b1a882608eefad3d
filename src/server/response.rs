use std::time::SystemTime;

use anyhow::Result;
use chrono::{DateTime, Utc};
use govein_adapter::ProxyFile;
use rama::http::{Body, Response, StatusCode, header};
use tokio_util::io::ReaderStream;

use crate::{error::ProxyError, toolchain::ToolchainError};

/// Responds with plain text
pub fn respond_text(status: StatusCode, body: &str) -> Result<Response<Body>> {
    Response::builder()
        .status(status)
        .header(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        )
        .body(Body::from(body.to_owned()))
        .map_err(Into::into)
}

/// Streams an opened cache file to the client
pub fn respond_file(
    file: ProxyFile,
    content_type: &'static str,
    head_only: bool,
) -> Result<Response<Body>> {
    let ProxyFile {
        file,
        size,
        modified,
        ..
    } = file;

    let mut builder = Response::builder().status(StatusCode::OK);
    {
        let headers = builder
            .headers_mut()
            .ok_or_else(|| anyhow::anyhow!("failed to get headers for file response"))?;
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static(content_type),
        );
        headers.insert(
            header::CONTENT_LENGTH,
            header::HeaderValue::from_str(&size.to_string())?,
        );
        if let Some(modified) = modified {
            headers.insert(
                header::LAST_MODIFIED,
                header::HeaderValue::from_str(&http_date(modified))?,
            );
        }
    }

    let body = if head_only {
        Body::empty()
    } else {
        Body::from_stream(ReaderStream::new(file))
    };
    builder.body(body).map_err(Into::into)
}

/// Maps an operation failure onto the status code a go client understands
pub fn error_status(err: &ProxyError) -> StatusCode {
    match err {
        ProxyError::Forbidden(_) => StatusCode::FORBIDDEN,
        ProxyError::Module(_) | ProxyError::MissingFile { .. } => StatusCode::NOT_FOUND,
        ProxyError::Toolchain(ToolchainError::Failed { .. } | ToolchainError::Spawn { .. }) => {
            StatusCode::BAD_GATEWAY
        }
        ProxyError::Toolchain(ToolchainError::Decode { .. }) | ProxyError::PathMismatch { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ProxyError::Storage(err) if err.is_not_found() => StatusCode::NOT_FOUND,
        ProxyError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn respond_error(err: &ProxyError) -> Result<Response<Body>> {
    let status = error_status(err);
    let body = match err {
        ProxyError::Forbidden(_) => "forbidden\n".to_string(),
        // local cache paths stay in the server log
        ProxyError::Storage(_) if status == StatusCode::NOT_FOUND => "not found\n".to_string(),
        ProxyError::Storage(_) => "internal error\n".to_string(),
        other => format!("{other}\n"),
    };
    respond_text(status, &body)
}

/// Formats a timestamp as an IMF-fixdate for `Last-Modified`.
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
