use std::collections::HashMap;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{AppError, AppResult};

const MAX_REQUEST_BYTES: usize = 1024 * 1024;

pub(crate) struct HttpRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) body: Vec<u8>,
}

/// Error already mapped to a status code and error kind.
#[derive(Debug)]
pub(crate) struct HttpError {
    pub(crate) status: u16,
    pub(crate) kind: &'static str,
    pub(crate) message: String,
}

impl HttpError {
    pub(crate) fn new(status: u16, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, "validation", message)
    }
}

impl From<AppError> for HttpError {
    fn from(err: AppError) -> Self {
        let kind = err.kind();
        Self::new(kind.http_status(), kind.as_str(), err.to_string())
    }
}

pub(crate) async fn read_http_request(socket: &mut TcpStream) -> Result<HttpRequest, HttpError> {
    let mut buffer: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let header_end;

    loop {
        let bytes = socket
            .read(&mut chunk)
            .await
            .map_err(|err| HttpError::bad_request(format!("Failed to read request: {}", err)))?;
        if bytes == 0 {
            return Err(HttpError::bad_request("Empty request"));
        }
        let read_slice = chunk
            .get(..bytes)
            .ok_or_else(|| HttpError::bad_request("Invalid read length"))?;
        buffer.extend_from_slice(read_slice);
        if buffer.len() > MAX_REQUEST_BYTES {
            return Err(HttpError::new(413, "validation", "Request too large"));
        }
        if let Some(pos) = find_header_end(&buffer) {
            header_end = pos;
            break;
        }
    }

    let header_bytes = buffer
        .get(..header_end)
        .ok_or_else(|| HttpError::bad_request("Malformed request headers"))?;
    let header_text = std::str::from_utf8(header_bytes)
        .map_err(|err| HttpError::bad_request(format!("Invalid request encoding: {}", err)))?;
    let mut lines = header_text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| HttpError::bad_request("Missing request line"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| HttpError::bad_request("Missing HTTP method"))?;
    let target = parts
        .next()
        .ok_or_else(|| HttpError::bad_request("Missing request path"))?;
    let path = target.split_once('?').map_or(target, |(path, _)| path);

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(HttpError::bad_request("Malformed header"));
        };
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Err(HttpError::new(413, "validation", "Request body too large"));
    }
    let body_start = header_end
        .checked_add(4)
        .ok_or_else(|| HttpError::bad_request("Malformed request headers"))?;
    let mut body = buffer.get(body_start..).unwrap_or_default().to_vec();
    while body.len() < content_length {
        let bytes = socket
            .read(&mut chunk)
            .await
            .map_err(|err| HttpError::bad_request(format!("Failed to read body: {}", err)))?;
        if bytes == 0 {
            break;
        }
        let read_slice = chunk
            .get(..bytes)
            .ok_or_else(|| HttpError::bad_request("Invalid read length"))?;
        body.extend_from_slice(read_slice);
    }
    body.truncate(content_length);

    Ok(HttpRequest {
        method: method.to_ascii_uppercase(),
        path: path.to_owned(),
        body,
    })
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

const fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        422 => "Unprocessable Entity",
        502 => "Bad Gateway",
        _ => "Internal Server Error",
    }
}

pub(crate) async fn write_json_response<T>(
    socket: &mut TcpStream,
    status: u16,
    response: &T,
) -> AppResult<()>
where
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(response)?;
    write_response(socket, status, &body).await
}

pub(crate) async fn write_error_response(socket: &mut TcpStream, err: &HttpError) -> AppResult<()> {
    #[derive(Serialize)]
    struct ErrorResponse<'msg> {
        error: &'msg str,
        kind: &'msg str,
    }
    let body = serde_json::to_vec(&ErrorResponse {
        error: &err.message,
        kind: err.kind,
    })?;
    write_response(socket, err.status, &body).await
}

async fn write_response(socket: &mut TcpStream, status: u16, body: &[u8]) -> AppResult<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        status_text(status),
        body.len()
    );
    socket.write_all(head.as_bytes()).await?;
    socket.write_all(body).await?;
    socket.flush().await?;
    Ok(())
}
