//! Minimal HTTP/1.1 request reading and response writing.
//!
//! One request per connection; every response closes the connection.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tempfile::TempPath;

use crate::sink::{MjpegStream, MJPEG_CONTENT_TYPE};

const MAX_HEAD_BYTES: usize = 16 * 1024;
const HEAD_TIMEOUT: Duration = Duration::from_secs(5);
const BODY_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) const FLASH_COOKIE: &str = "flash";

#[derive(Debug)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn content_length(&self) -> Result<Option<u64>> {
        self.header("content-length")
            .map(|value| {
                value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| anyhow!("invalid content-length '{}'", value))
            })
            .transpose()
    }

    /// Decoded value of the flash cookie, if present and non-empty.
    pub fn flash(&self) -> Option<String> {
        let cookies = self.header("cookie")?;
        cookies
            .split(';')
            .map(str::trim)
            .filter(|pair| pair.starts_with(FLASH_COOKIE))
            .flat_map(|pair| url::form_urlencoded::parse(pair.as_bytes()))
            .find(|(key, _)| key == FLASH_COOKIE)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    }
}

/// Read the request line and headers. Bytes read past the header block are
/// kept as the start of the body.
pub(crate) fn read_head(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(HEAD_TIMEOUT))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEAD_BYTES {
            return Err(anyhow!("request head too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request head"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body: data[header_end + 4..].to_vec(),
    })
}

/// Read the rest of a `len`-byte body into `request.body`.
pub(crate) fn read_body(stream: &mut TcpStream, request: &mut HttpRequest, len: u64) -> Result<()> {
    let len = usize::try_from(len).context("request body too large for this platform")?;
    stream.set_read_timeout(Some(BODY_TIMEOUT))?;
    if request.body.len() > len {
        request.body.truncate(len);
        return Ok(());
    }
    let already = request.body.len();
    request.body.resize(len, 0);
    stream
        .read_exact(&mut request.body[already..])
        .context("read request body")?;
    Ok(())
}

pub(crate) enum Body {
    Bytes(Vec<u8>),
    /// Temporary file streamed to the client, deleted once the response ends.
    File(TempPath),
    Stream(MjpegStream),
}

pub(crate) struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl Response {
    pub fn bytes(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: Body::Bytes(body.into()),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::bytes(status, "text/plain; charset=utf-8", body.into())
    }

    pub fn html(body: String) -> Self {
        Self::bytes(200, "text/html; charset=utf-8", body)
    }

    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::bytes(status, "application/json", body.to_string())
    }

    pub fn redirect(location: &str) -> Self {
        Self::bytes(302, "text/plain; charset=utf-8", Vec::new()).with_header("Location", location)
    }

    /// Redirect carrying a one-shot message for the target page.
    pub fn redirect_with_flash(location: &str, message: &str) -> Self {
        let encoded: String = url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
        Self::redirect(location).with_header(
            "Set-Cookie",
            &format!("{FLASH_COOKIE}={encoded}; Path=/; HttpOnly; SameSite=Lax"),
        )
    }

    pub fn file(content_type: &str, download_name: &str, path: TempPath) -> Self {
        Self {
            status: 200,
            headers: vec![
                ("Content-Type".to_string(), content_type.to_string()),
                (
                    "Content-Disposition".to_string(),
                    format!("attachment; filename=\"{download_name}\""),
                ),
            ],
            body: Body::File(path),
        }
    }

    pub fn stream(stream: MjpegStream) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type".to_string(), MJPEG_CONTENT_TYPE.to_string())],
            body: Body::Stream(stream),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn clear_flash(self) -> Self {
        self.with_header(
            "Set-Cookie",
            &format!("{FLASH_COOKIE}=; Path=/; Max-Age=0"),
        )
    }
}

pub(crate) fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        302 => "Found",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        411 => "Length Required",
        413 => "Payload Too Large",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

fn write_head(stream: &mut TcpStream, response: &Response, content_length: Option<u64>) -> Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status,
        status_text(response.status)
    );
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    if let Some(len) = content_length {
        head.push_str(&format!("Content-Length: {len}\r\n"));
    }
    head.push_str("Connection: close\r\n\r\n");
    stream.write_all(head.as_bytes())?;
    Ok(())
}

/// Write `response` and return the number of body bytes sent.
///
/// A streaming body is written part by part until it ends or the client
/// disconnects; a disconnect is not an error.
pub(crate) fn write_response(stream: &mut TcpStream, response: Response) -> Result<u64> {
    let Response { status, headers, body } = response;
    let head = Response {
        status,
        headers,
        body: Body::Bytes(Vec::new()),
    };
    match body {
        Body::Bytes(bytes) => {
            write_head(stream, &head, Some(bytes.len() as u64))?;
            stream.write_all(&bytes)?;
            Ok(bytes.len() as u64)
        }
        Body::File(path) => {
            let mut file = File::open(&path)
                .with_context(|| format!("open response file {}", path.display()))?;
            let len = file.metadata()?.len();
            write_head(stream, &head, Some(len))?;
            let sent = std::io::copy(&mut file, stream).context("send response file")?;
            stream.flush()?;
            drop(file);
            // Removing the file only after the last byte went out.
            path.close()
                .with_context(|| "remove response file after sending")?;
            Ok(sent)
        }
        Body::Stream(mut parts) => {
            write_head(stream, &head, None)?;
            let mut sent = 0u64;
            for part in parts.by_ref() {
                let part = match part {
                    Ok(part) => part,
                    Err(err) => {
                        log::error!("stream ended by error: {:#}", err);
                        break;
                    }
                };
                if let Err(err) = stream.write_all(&part).and_then(|_| stream.flush()) {
                    log::info!("stream client disconnected: {}", err);
                    break;
                }
                sent += part.len() as u64;
            }
            parts.close();
            Ok(sent)
        }
    }
}
