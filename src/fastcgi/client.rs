//! Minimal FastCGI client
//!
//! Speaks just enough of the protocol to issue one Responder request per
//! connection, the way nginx does without `fastcgi_keep_conn`. Used by the
//! `query` command to check a running daemon without a web server in front.

use crate::error::{AppResult, SensorError};
use crate::fastcgi::protocol::{
    decode_pairs, encode_pairs, encode_stream, BeginRequestBody, EndRequestBody, ProtocolStatus,
    Record, RecordType, Role, NULL_REQUEST_ID,
};
use crate::fastcgi::request::Response;
use bytes::BytesMut;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, warn};

/// Raw outcome of a request
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Concatenated STDOUT stream
    pub stdout: Vec<u8>,
    /// Concatenated STDERR stream
    pub stderr: Vec<u8>,
    /// Final END_REQUEST body
    pub end: EndRequestBody,
}

/// Client bound to one socket path
#[derive(Debug, Clone)]
pub struct FastCgiClient {
    socket_path: PathBuf,
    request_id: u16,
}

impl FastCgiClient {
    /// Create a client for the daemon listening on `socket_path`
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            request_id: 1,
        }
    }

    /// Socket this client connects to
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// `GET` the current snapshot
    pub async fn get(&self) -> AppResult<Response> {
        self.request(&cgi_params("GET", None, 0), &[]).await
    }

    /// `POST` `body` with the given content type
    pub async fn post(&self, content_type: &str, body: &[u8]) -> AppResult<Response> {
        self.request(&cgi_params("POST", Some(content_type), body.len()), body)
            .await
    }

    /// Send a Responder request with explicit CGI params and parse the CGI output.
    pub async fn request(&self, params: &[(String, String)], body: &[u8]) -> AppResult<Response> {
        let raw = self
            .send(
                BeginRequestBody {
                    role: Role::Responder as u16,
                    flags: 0,
                },
                params,
                body,
            )
            .await?;

        if raw.end.protocol_status != ProtocolStatus::RequestComplete {
            return Err(SensorError::Protocol(format!(
                "Request rejected: {:?}",
                raw.end.protocol_status
            )));
        }
        if !raw.stderr.is_empty() {
            warn!("stderr: {}", String::from_utf8_lossy(&raw.stderr));
        }
        Response::parse(&raw.stdout).ok_or_else(|| {
            SensorError::Protocol("Response is not valid CGI output".to_string())
        })
    }

    /// Send a request and return the raw record streams.
    pub async fn send(
        &self,
        begin: BeginRequestBody,
        params: &[(String, String)],
        body: &[u8],
    ) -> AppResult<RawResponse> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;
        let id = self.request_id;

        let mut out = BytesMut::new();
        Record::new(RecordType::BeginRequest, id, begin.encode()).encode(&mut out)?;
        encode_stream(RecordType::Params, id, &encode_pairs(params), &mut out)?;
        encode_stream(RecordType::Stdin, id, body, &mut out)?;
        stream.write_all(&out).await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        loop {
            let record = Record::read_from(&mut reader).await?.ok_or_else(|| {
                SensorError::Protocol("Connection closed before FCGI_END_REQUEST".to_string())
            })?;
            if record.request_id != id {
                debug!(request_id = record.request_id, "Skipping foreign record");
                continue;
            }
            match record.kind() {
                Some(RecordType::Stdout) => stdout.extend_from_slice(&record.content),
                Some(RecordType::Stderr) => stderr.extend_from_slice(&record.content),
                Some(RecordType::EndRequest) => {
                    let end = EndRequestBody::decode(&record.content)?;
                    return Ok(RawResponse {
                        stdout,
                        stderr,
                        end,
                    });
                }
                _ => debug!(record_type = record.record_type, "Unexpected record"),
            }
        }
    }

    /// Query management variables such as `FCGI_MAX_CONNS`.
    pub async fn get_values(&self, names: &[&str]) -> AppResult<Vec<(String, String)>> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;
        let query: Vec<(&str, &str)> = names.iter().map(|n| (*n, "")).collect();

        let mut out = BytesMut::new();
        Record::new(RecordType::GetValues, NULL_REQUEST_ID, encode_pairs(&query))
            .encode(&mut out)?;
        stream.write_all(&out).await?;

        let record = Record::read_from(&mut stream).await?.ok_or_else(|| {
            SensorError::Protocol("Connection closed before FCGI_GET_VALUES_RESULT".to_string())
        })?;
        if record.kind() != Some(RecordType::GetValuesResult) {
            return Err(SensorError::Protocol(format!(
                "Expected FCGI_GET_VALUES_RESULT, got type {}",
                record.record_type
            )));
        }
        decode_pairs(&record.content)
    }
}

/// The CGI params nginx's `fastcgi_params` would send for a simple request
pub fn cgi_params(
    method: &str,
    content_type: Option<&str>,
    content_length: usize,
) -> Vec<(String, String)> {
    let mut params = vec![
        ("REQUEST_METHOD".to_string(), method.to_string()),
        ("SCRIPT_NAME".to_string(), "/sensor/".to_string()),
        ("REQUEST_URI".to_string(), "/sensor/".to_string()),
        ("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string()),
        ("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string()),
    ];
    if let Some(content_type) = content_type {
        params.push(("CONTENT_TYPE".to_string(), content_type.to_string()));
        params.push(("CONTENT_LENGTH".to_string(), content_length.to_string()));
    }
    params
}
