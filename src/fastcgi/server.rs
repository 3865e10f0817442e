//! FastCGI Responder over a Unix domain socket
//!
//! The web server (nginx with `fastcgi_pass unix:/tmp/sensorsocket;`) opens a
//! connection per request, or reuses one when it sets `FCGI_KEEP_CONN`. Each
//! connection runs in its own task and serves one request at a time; a second
//! concurrent request id is refused with `FCGI_CANT_MPX_CONN`.
//!
//! On shutdown the accept loop stops, idle connections are closed, requests in
//! progress get a grace period to finish, and the socket file is removed.

use crate::config::ServerConfig;
use crate::error::{AppResult, SensorError};
use crate::fastcgi::protocol::{
    decode_pairs, encode_pairs, encode_stream, unknown_type_body, BeginRequestBody,
    EndRequestBody, ProtocolStatus, Record, RecordType, Role, FCGI_MAX_CONNS, FCGI_MAX_REQS,
    FCGI_MPXS_CONNS, NULL_REQUEST_ID,
};
use crate::fastcgi::request::{Request, Response};
use crate::shutdown::ShutdownListener;
use async_trait::async_trait;
use bytes::BytesMut;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

/// How long in-flight connections may run after shutdown was requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Application side of a Responder request
#[async_trait]
pub trait Handler: Send + Sync {
    /// Produce the response for a fully received request
    async fn handle(&self, request: &Request) -> Response;
}

/// Limits applied to every connection
#[derive(Debug, Clone, Copy)]
struct Limits {
    max_connections: usize,
    max_body_bytes: usize,
    max_params_bytes: usize,
}

/// Bound FastCGI listener
pub struct FastCgiServer {
    listener: UnixListener,
    socket_path: PathBuf,
    handler: Arc<dyn Handler>,
    limits: Limits,
}

impl FastCgiServer {
    /// Bind the socket described by `config`.
    ///
    /// A stale socket left behind by a previous run is removed first. Any other
    /// kind of file at that path is an error. The socket is then chmodded to
    /// `config.socket_mode` so the web server user can connect.
    pub fn bind(config: &ServerConfig, handler: Arc<dyn Handler>) -> AppResult<Self> {
        let socket_path = config.socket_path.clone();
        remove_stale_socket(&socket_path)?;

        let listener = UnixListener::bind(&socket_path)?;
        std::fs::set_permissions(
            &socket_path,
            std::fs::Permissions::from_mode(config.socket_mode),
        )?;
        info!(
            socket = %socket_path.display(),
            mode = %format!("{:o}", config.socket_mode),
            "FastCGI server listening"
        );

        Ok(Self {
            listener,
            socket_path,
            handler,
            limits: Limits {
                max_connections: config.max_connections,
                max_body_bytes: config.max_body_bytes,
                max_params_bytes: config.max_params_bytes,
            },
        })
    }

    /// Path of the bound socket
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve connections until `shutdown` fires.
    pub async fn run(self, mut shutdown: ShutdownListener) -> AppResult<()> {
        let permits = Arc::new(Semaphore::new(self.limits.max_connections));
        let mut connections = JoinSet::new();

        loop {
            // wait for a free slot before accepting so excess clients queue in the backlog
            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.recv() => break,
            };

            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let handler = self.handler.clone();
                            let limits = self.limits;
                            let shutdown = shutdown.clone();
                            connections.spawn(async move {
                                if let Err(e) = serve_connection(stream, handler, limits, shutdown).await {
                                    warn!("FastCGI connection error: {}", e);
                                }
                                drop(permit);
                            });
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = shutdown.recv() => break,
            }

            // reap finished connections
            while connections.try_join_next().is_some() {}
        }

        info!(
            active = connections.len(),
            "FastCGI server stopping, waiting for open connections"
        );
        let drained = timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Aborting {} connection(s) after grace period", connections.len());
            connections.shutdown().await;
        }

        drop(self.listener);
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(socket = %self.socket_path.display(), "FastCGI server stopped");
        Ok(())
    }
}

fn remove_stale_socket(path: &Path) -> AppResult<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            debug!(socket = %path.display(), "Removing stale socket");
            std::fs::remove_file(path)?;
            Ok(())
        }
        Ok(_) => Err(SensorError::Configuration(format!(
            "{} exists and is not a socket",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Request being assembled on a connection
struct Pending {
    request: Request,
    params: Vec<u8>,
    params_done: bool,
    stdin_done: bool,
    too_large: bool,
}

impl Pending {
    fn new(request_id: u16, keep_conn: bool) -> Self {
        Self {
            request: Request {
                request_id,
                keep_conn,
                ..Default::default()
            },
            params: Vec::new(),
            params_done: false,
            stdin_done: false,
            too_large: false,
        }
    }

    fn is_complete(&self) -> bool {
        self.params_done && self.stdin_done
    }
}

/// What the connection loop should do after a record
enum Next {
    Continue,
    Close,
}

async fn serve_connection(
    mut stream: UnixStream,
    handler: Arc<dyn Handler>,
    limits: Limits,
    mut shutdown: ShutdownListener,
) -> AppResult<()> {
    let (read_half, mut writer) = stream.split();
    let mut reader = BufReader::new(read_half);
    let mut pending: Option<Pending> = None;

    loop {
        let record = tokio::select! {
            biased;
            record = Record::read_from(&mut reader) => record?,
            _ = shutdown.recv(), if pending.is_none() => {
                debug!("Closing idle FastCGI connection for shutdown");
                break;
            }
        };
        let Some(record) = record else {
            debug!("FastCGI peer closed connection");
            break;
        };

        let mut out = BytesMut::new();
        let next = process_record(record, &mut pending, &handler, limits, &mut out).await?;
        if !out.is_empty() {
            writer.write_all(&out).await?;
            writer.flush().await?;
        }
        if let Next::Close = next {
            break;
        }
    }

    writer.shutdown().await.ok();
    Ok(())
}

async fn process_record(
    record: Record,
    pending: &mut Option<Pending>,
    handler: &Arc<dyn Handler>,
    limits: Limits,
    out: &mut BytesMut,
) -> AppResult<Next> {
    if record.is_management() {
        match record.kind() {
            Some(RecordType::GetValues) => {
                let values = get_values_result(&record.content, limits)?;
                Record::new(RecordType::GetValuesResult, NULL_REQUEST_ID, values).encode(out)?;
            }
            _ => {
                debug!(record_type = record.record_type, "Unknown management record");
                Record::new(
                    RecordType::UnknownType,
                    NULL_REQUEST_ID,
                    unknown_type_body(record.record_type),
                )
                .encode(out)?;
            }
        }
        return Ok(Next::Continue);
    }

    let request_id = record.request_id;
    match record.kind() {
        Some(RecordType::BeginRequest) => {
            let begin = BeginRequestBody::decode(&record.content)?;
            if let Some(current) = pending.as_ref() {
                warn!(
                    active = current.request.request_id,
                    rejected = request_id,
                    "Multiplexed request refused"
                );
                end_request(request_id, 0, ProtocolStatus::CantMpxConn, out)?;
                return Ok(Next::Continue);
            }
            if begin.role() != Some(Role::Responder) {
                warn!(role = begin.role, "Unsupported FastCGI role");
                end_request(request_id, 0, ProtocolStatus::UnknownRole, out)?;
                return Ok(if begin.keep_conn() {
                    Next::Continue
                } else {
                    Next::Close
                });
            }
            *pending = Some(Pending::new(request_id, begin.keep_conn()));
        }
        Some(RecordType::AbortRequest) => {
            if let Some(current) = active(pending, request_id) {
                let keep_conn = current.request.keep_conn;
                *pending = None;
                info!(request_id, "Request aborted by web server");
                end_request(request_id, 1, ProtocolStatus::RequestComplete, out)?;
                if !keep_conn {
                    return Ok(Next::Close);
                }
            }
        }
        Some(RecordType::Params) => {
            if let Some(current) = active(pending, request_id) {
                if record.content.is_empty() {
                    current.request.params = decode_pairs(&current.params)?.into_iter().collect();
                    current.params_done = true;
                } else if current.params.len() + record.content.len() > limits.max_params_bytes {
                    warn!(
                        request_id,
                        limit = limits.max_params_bytes,
                        "FCGI_PARAMS too large, closing connection"
                    );
                    return Err(SensorError::Protocol(format!(
                        "FCGI_PARAMS exceed {} bytes",
                        limits.max_params_bytes
                    )));
                } else {
                    current.params.extend_from_slice(&record.content);
                }
            }
        }
        Some(RecordType::Stdin) => {
            if let Some(current) = active(pending, request_id) {
                if record.content.is_empty() {
                    current.stdin_done = true;
                } else if current.request.stdin.len() + record.content.len() > limits.max_body_bytes
                {
                    current.too_large = true;
                } else {
                    current.request.stdin.extend_from_slice(&record.content);
                }
            }
        }
        _ => {
            debug!(
                record_type = record.record_type,
                request_id, "Ignoring record"
            );
        }
    }

    let ready = pending.as_ref().is_some_and(Pending::is_complete);
    if !ready {
        return Ok(Next::Continue);
    }
    let Some(done) = pending.take() else {
        return Ok(Next::Continue);
    };

    let response = if done.too_large {
        warn!(
            request_id,
            limit = limits.max_body_bytes,
            "Request body too large"
        );
        Response::error(
            413,
            &format!("Request body exceeds {} bytes", limits.max_body_bytes),
        )
    } else {
        handler.handle(&done.request).await
    };
    debug!(
        request_id,
        status = response.status,
        method = done.request.method().unwrap_or("-"),
        "Request served"
    );

    encode_stream(RecordType::Stdout, request_id, &response.to_bytes(), out)?;
    end_request(request_id, 0, ProtocolStatus::RequestComplete, out)?;

    Ok(if done.request.keep_conn {
        Next::Continue
    } else {
        Next::Close
    })
}

fn active(pending: &mut Option<Pending>, request_id: u16) -> Option<&mut Pending> {
    pending
        .as_mut()
        .filter(|p| p.request.request_id == request_id)
}

fn end_request(
    request_id: u16,
    app_status: u32,
    protocol_status: ProtocolStatus,
    out: &mut BytesMut,
) -> AppResult<()> {
    let body = EndRequestBody {
        app_status,
        protocol_status,
    };
    Record::new(RecordType::EndRequest, request_id, body.encode()).encode(out)
}

fn get_values_result(content: &[u8], limits: Limits) -> AppResult<Vec<u8>> {
    let max = limits.max_connections.to_string();
    let answers: Vec<(String, String)> = decode_pairs(content)?
        .into_iter()
        .filter_map(|(name, _)| {
            let value = match name.as_str() {
                FCGI_MAX_CONNS | FCGI_MAX_REQS => max.clone(),
                FCGI_MPXS_CONNS => "0".to_string(),
                _ => return None,
            };
            Some((name, value))
        })
        .collect();
    Ok(encode_pairs(&answers))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(&self, request: &Request) -> Response {
            let mut response = Response::new(200, "text/plain");
            response.body = request.body().to_vec();
            response
        }
    }

    fn limits() -> Limits {
        Limits {
            max_connections: 4,
            max_body_bytes: 8,
            max_params_bytes: 64,
        }
    }

    async fn feed(records: Vec<Record>, pending: &mut Option<Pending>) -> (BytesMut, bool) {
        let handler: Arc<dyn Handler> = Arc::new(Echo);
        let mut out = BytesMut::new();
        let mut closed = false;
        for record in records {
            if let Next::Close = process_record(record, pending, &handler, limits(), &mut out)
                .await
                .unwrap()
            {
                closed = true;
            }
        }
        (out, closed)
    }

    fn decode_all(mut buf: &[u8]) -> Vec<Record> {
        let mut records = Vec::new();
        while !buf.is_empty() {
            let (record, used) = Record::decode(buf).unwrap();
            records.push(record);
            buf = &buf[used..];
        }
        records
    }

    fn begin(id: u16, role: u16, flags: u8) -> Record {
        Record::new(
            RecordType::BeginRequest,
            id,
            BeginRequestBody { role, flags }.encode(),
        )
    }

    #[tokio::test]
    async fn test_get_values() {
        let query = encode_pairs(&[
            (FCGI_MAX_CONNS, ""),
            (FCGI_MPXS_CONNS, ""),
            ("SOMETHING_ELSE", ""),
        ]);
        let mut pending = None;
        let (out, closed) = feed(
            vec![Record::new(RecordType::GetValues, 0, query)],
            &mut pending,
        )
        .await;
        assert!(!closed);

        let records = decode_all(&out);
        assert_eq!(records[0].kind(), Some(RecordType::GetValuesResult));
        let pairs = decode_pairs(&records[0].content).unwrap();
        assert_eq!(
            pairs,
            vec![
                (FCGI_MAX_CONNS.to_string(), "4".to_string()),
                (FCGI_MPXS_CONNS.to_string(), "0".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_management_type() {
        let mut pending = None;
        let record = Record {
            record_type: 42,
            request_id: 0,
            content: Vec::new(),
        };
        let (out, _) = feed(vec![record], &mut pending).await;
        let records = decode_all(&out);
        assert_eq!(records[0].kind(), Some(RecordType::UnknownType));
        assert_eq!(records[0].content[0], 42);
    }

    #[tokio::test]
    async fn test_unknown_role() {
        let mut pending = None;
        let (out, closed) = feed(vec![begin(1, 2, 0)], &mut pending).await;
        assert!(closed);
        let end = EndRequestBody::decode(&decode_all(&out)[0].content).unwrap();
        assert_eq!(end.protocol_status, ProtocolStatus::UnknownRole);
    }

    #[tokio::test]
    async fn test_second_request_refused() {
        let mut pending = None;
        let (out, closed) = feed(vec![begin(1, 1, 1), begin(2, 1, 1)], &mut pending).await;
        assert!(!closed);
        let records = decode_all(&out);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request_id, 2);
        let end = EndRequestBody::decode(&records[0].content).unwrap();
        assert_eq!(end.protocol_status, ProtocolStatus::CantMpxConn);
        assert!(pending.is_some());
    }

    #[tokio::test]
    async fn test_abort_request() {
        let mut pending = None;
        let (out, closed) = feed(
            vec![
                begin(3, 1, 0),
                Record::new(RecordType::AbortRequest, 3, Vec::new()),
            ],
            &mut pending,
        )
        .await;
        assert!(closed);
        assert!(pending.is_none());
        let end = EndRequestBody::decode(&decode_all(&out)[0].content).unwrap();
        assert_eq!(end.app_status, 1);
    }

    #[tokio::test]
    async fn test_full_request_cycle() {
        let mut pending = None;
        let params = encode_pairs(&[("REQUEST_METHOD", "POST"), ("CONTENT_LENGTH", "5")]);
        let (out, closed) = feed(
            vec![
                begin(1, 1, 0),
                Record::new(RecordType::Params, 1, params),
                Record::new(RecordType::Params, 1, Vec::new()),
                Record::new(RecordType::Stdin, 1, b"hello".to_vec()),
                Record::new(RecordType::Stdin, 1, Vec::new()),
            ],
            &mut pending,
        )
        .await;
        assert!(closed);

        let records = decode_all(&out);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].kind(), Some(RecordType::Stdout));
        assert!(records[0].content.ends_with(b"\r\n\r\nhello"));
        assert!(records[1].content.is_empty());
        let end = EndRequestBody::decode(&records[2].content).unwrap();
        assert_eq!(end.protocol_status, ProtocolStatus::RequestComplete);
        assert_eq!(end.app_status, 0);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let mut pending = None;
        let (out, _) = feed(
            vec![
                begin(1, 1, 1),
                Record::new(RecordType::Params, 1, Vec::new()),
                Record::new(RecordType::Stdin, 1, b"0123456789".to_vec()),
                Record::new(RecordType::Stdin, 1, Vec::new()),
            ],
            &mut pending,
        )
        .await;
        let stdout = &decode_all(&out)[0].content;
        assert!(stdout.starts_with(b"Status: 413"));
    }

    #[tokio::test]
    async fn test_params_limit() {
        let handler: Arc<dyn Handler> = Arc::new(Echo);
        let mut pending = None;
        let mut out = BytesMut::new();
        process_record(begin(1, 1, 0), &mut pending, &handler, limits(), &mut out)
            .await
            .unwrap();

        let chunk = Record::new(RecordType::Params, 1, vec![b'x'; 40]);
        process_record(chunk.clone(), &mut pending, &handler, limits(), &mut out)
            .await
            .unwrap();
        let result = process_record(chunk, &mut pending, &handler, limits(), &mut out).await;
        assert!(matches!(result, Err(SensorError::Protocol(_))));
        assert_eq!(pending.as_ref().map(|p| p.params.len()), Some(40));
        assert!(out.is_empty());
    }

    #[test]
    fn test_refuses_to_replace_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-socket");
        std::fs::write(&path, "data").unwrap();
        assert!(remove_stale_socket(&path).is_err());
        assert!(path.exists());
        assert!(remove_stale_socket(&dir.path().join("missing")).is_ok());
    }
}
