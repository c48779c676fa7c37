//! Unix Socket Server
//!
//! Serves the control surface as newline-delimited JSON.
//!
//! # Limits
//! - **Connection limits**: Maximum concurrent connections enforced
//! - **Timeouts**: Read/write timeouts prevent resource exhaustion
//! - **Message limits**: Maximum message size prevents memory exhaustion
//! - **Audit**: Peer credentials logged for every attribute write

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use fpc_core::{ControlSurface, FpcError};
use fpc_protocol::{Request, RequestEnvelope, Response, ResponseData, ResponseEnvelope};

// ============================================================================
// Limits
// ============================================================================

/// Maximum concurrent client connections
const MAX_CONNECTIONS: usize = 16;

/// Maximum message size in bytes
const MAX_MESSAGE_SIZE: usize = fpc_protocol::MAX_MESSAGE_SIZE;

/// Idle time allowed between requests; longer than the longest wait
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Write timeout per message
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket permissions (owner and group read/write)
const SOCKET_MODE: u32 = 0o660;

/// Global connection counter
static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(0);
        }

        let (take_len, found_newline) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Message too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// Serve until `shutdown` is notified
pub async fn run_server(
    socket_path: &str,
    surface: ControlSurface,
    shutdown: Arc<Notify>,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = Path::new(socket_path);

    // Remove a stale socket, never a symlink
    if path.exists() {
        let metadata = path.symlink_metadata()?;
        if metadata.file_type().is_symlink() {
            return Err("Socket path is a symlink - refusing for security".into());
        }
        std::fs::remove_file(path)?;
        debug!("Removed existing socket file");
    }

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

    info!("Listening on {} (mode {:o})", socket_path, SOCKET_MODE);
    info!("Limits: max_conn={}, max_msg={}", MAX_CONNECTIONS, MAX_MESSAGE_SIZE);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = ACTIVE_CONNECTIONS.load(Ordering::SeqCst);
                        if current >= MAX_CONNECTIONS {
                            warn!("Connection limit reached ({}), rejecting new connection", current);
                            drop(stream);
                            continue;
                        }

                        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst);
                        let surface = surface.clone();
                        tokio::spawn(async move {
                            handle_client(stream, surface).await;
                            ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown.notified() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    info!("Server stopped ({} connections still open)", ACTIVE_CONNECTIONS.load(Ordering::SeqCst));
    Ok(())
}

/// Client credentials from Unix socket peer
#[derive(Debug, Clone, Copy)]
struct PeerCredentials {
    uid: u32,
    gid: u32,
    pid: i32,
}

fn get_peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: ucred is a plain C struct; all-zero is a valid value
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    // SAFETY: fd is a live socket and cred/len describe a correctly sized buffer
    let result = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };

    (result == 0).then_some(PeerCredentials {
        uid: cred.uid,
        gid: cred.gid,
        pid: cred.pid,
    })
}

async fn handle_client(stream: UnixStream, surface: ControlSurface) {
    let cred = match get_peer_credentials(&stream) {
        Some(c) => c,
        None => {
            error!("Failed to get peer credentials, rejecting connection");
            return;
        }
    };
    debug!("Connection from uid={}, gid={}, pid={}", cred.uid, cred.gid, cred.pid);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut request_count: u64 = 0;
    let connection_start = Instant::now();

    loop {
        let read_result = timeout(
            READ_TIMEOUT,
            read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE),
        )
        .await;

        match read_result {
            Ok(Ok(0)) => {
                debug!(
                    "Client disconnected: uid={}, pid={}, requests={}, duration={:?}",
                    cred.uid,
                    cred.pid,
                    request_count,
                    connection_start.elapsed()
                );
                break;
            }
            Ok(Ok(n)) => {
                request_count += 1;
                trace!("Request #{} from uid={}: {} bytes", request_count, cred.uid, n);

                let line_str = match std::str::from_utf8(&line) {
                    Ok(s) => s,
                    Err(e) => {
                        debug!("Non-UTF8 request from uid={}: {}", cred.uid, e);
                        let envelope = ResponseEnvelope::new(0, Response::error("Invalid request encoding"));
                        let _ = send_response(&mut writer, &envelope).await;
                        break;
                    }
                };

                let envelope = process_request(line_str, &cred, &surface).await;
                if send_response(&mut writer, &envelope).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    warn!(
                        "Message too large (>{} bytes) from uid={}, pid={}",
                        MAX_MESSAGE_SIZE, cred.uid, cred.pid
                    );
                    let too_large = FpcError::MessageTooLarge {
                        size: MAX_MESSAGE_SIZE + 1,
                        max_size: MAX_MESSAGE_SIZE,
                    };
                    let envelope = ResponseEnvelope::new(0, Response::error(too_large.to_string()));
                    let _ = send_response(&mut writer, &envelope).await;
                } else {
                    error!("Read error from uid={}, pid={}: {}", cred.uid, cred.pid, e);
                }
                break;
            }
            Err(_) => {
                debug!("Read timeout for uid={}, pid={}", cred.uid, cred.pid);
                break;
            }
        }
    }
}

async fn send_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    envelope: &ResponseEnvelope,
) -> Result<(), ()> {
    let json = serde_json::to_string(envelope).unwrap_or_else(|_| {
        r#"{"id":0,"status":"error","data":{"message":"Serialization error","code":5}}"#.to_string()
    });

    let write_result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok::<_, std::io::Error>(())
    })
    .await;

    match write_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}

fn error_response(e: &FpcError) -> Response {
    Response::error_with_code(e.to_string(), e.errno())
}

async fn process_request(
    line: &str,
    cred: &PeerCredentials,
    surface: &ControlSurface,
) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(e) => e,
        Err(e) => {
            debug!("Invalid JSON from uid={}: {}", cred.uid, e);
            return ResponseEnvelope::new(0, Response::error_with_code("Invalid request format", 22));
        }
    };

    let request_id = envelope.id;
    let request = envelope.request;

    if let Err(e) = request.validate() {
        debug!("Request validation failed from uid={}: {}", cred.uid, e);
        return ResponseEnvelope::new(request_id, Response::error_with_code(e, 22));
    }

    trace!(
        "Processing {} (id={}) from uid={}, pid={}",
        request.type_name(),
        request_id,
        cred.uid,
        cred.pid
    );

    if request.is_write() {
        info!(
            "AUDIT: {:?} by uid={}, pid={}",
            request, cred.uid, cred.pid
        );
    }

    let response = match request {
        Request::Ping => Response::ok_string("pong"),

        Request::Version => Response::ok_string(env!("CARGO_PKG_VERSION")),

        Request::Status => Response::Ok(ResponseData::device_status(surface.status())),

        Request::ReadAttribute { attribute } => match surface.read(attribute) {
            Ok(value) => Response::ok_string(value),
            Err(e) => error_response(&e),
        },

        Request::WriteAttribute { attribute, value } => {
            if attribute.requires_root() && cred.uid != 0 {
                warn!(
                    "Denied write to {} from uid={}, pid={}",
                    attribute, cred.uid, cred.pid
                );
                error_response(&FpcError::PermissionDenied(format!(
                    "{} is writable by root only",
                    attribute
                )))
            } else {
                match surface.write(attribute, &value) {
                    Ok(n) => Response::ok_written(n),
                    Err(e) => error_response(&e),
                }
            }
        }

        Request::WaitAttribute {
            attribute,
            after_generation,
            timeout_ms,
        } => {
            // Blocks on a condition variable, so keep it off the runtime threads
            let surface = surface.clone();
            let wait = tokio::task::spawn_blocking(move || {
                surface.wait(
                    attribute,
                    after_generation,
                    Duration::from_millis(timeout_ms as u64),
                )
            })
            .await;
            match wait {
                Ok(Ok((generation, value))) => {
                    Response::Ok(ResponseData::notified(generation, value))
                }
                Ok(Err(e)) => error_response(&e),
                Err(e) => {
                    error!("Wait task failed: {}", e);
                    Response::error("Internal error")
                }
            }
        }
    };

    ResponseEnvelope::new(request_id, response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpc_core::{
        AttachOptions, Collaborators, DeferredWork, Device, PriorityControl, SimInput,
        SimInterrupt, SimLineProvider,
    };
    use fpc_protocol::Attribute;

    struct NoProcess;
    impl PriorityControl for NoProcess {
        fn set_named_nice(&self, _name: &str, _nice: i32) -> fpc_core::Result<bool> {
            Ok(false)
        }
    }

    fn surface() -> ControlSurface {
        let collab = Collaborators::new(
            Arc::new(SimLineProvider::with_straps((true, true, true))),
            Arc::new(SimInterrupt::new()),
            Arc::new(SimInput::new()),
            Arc::new(NoProcess),
        );
        let options = AttachOptions {
            deferred: DeferredWork::Manual,
            ..AttachOptions::default()
        };
        ControlSurface::new(Arc::new(Device::attach(collab, options).unwrap()))
    }

    fn cred() -> PeerCredentials {
        PeerCredentials { uid: 0, gid: 0, pid: 1 }
    }

    fn request(req: Request) -> String {
        serde_json::to_string(&RequestEnvelope::with_id(req, 7)).unwrap()
    }

    #[tokio::test]
    async fn test_read_attribute() {
        let s = surface();
        let line = request(Request::ReadAttribute { attribute: Attribute::SensorIdentity });
        let resp = process_request(&line, &cred(), &s).await;
        assert_eq!(resp.id, 7);
        match resp.response {
            Response::Ok(data) => assert_eq!(data.value.as_deref(), Some("fpc1245 FPC(OF)\n")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_home_value_reports_einval() {
        let s = surface();
        let line = request(Request::WriteAttribute {
            attribute: Attribute::ReportHome,
            value: "left".into(),
        });
        match process_request(&line, &cred(), &s).await.response {
            Response::Error { code, .. } => assert_eq!(code, 22),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_times_out_with_etimedout() {
        let s = surface();
        let line = request(Request::WaitAttribute {
            attribute: Attribute::Irq,
            after_generation: 0,
            timeout_ms: 20,
        });
        match process_request(&line, &cred(), &s).await.response {
            Response::Error { code, .. } => assert_eq!(code, 110),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_returns_after_interrupt() {
        let s = surface();
        s.device().events().handle_interrupt();
        let line = request(Request::WaitAttribute {
            attribute: Attribute::Irq,
            after_generation: 0,
            timeout_ms: 1000,
        });
        match process_request(&line, &cred(), &s).await.response {
            Response::Ok(data) => {
                assert_eq!(data.generation, Some(1));
                assert_eq!(data.value.as_deref(), Some("0\n"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    async fn write(s: &ControlSurface, cred: &PeerCredentials, attribute: Attribute, value: &str) -> Response {
        let line = request(Request::WriteAttribute { attribute, value: value.into() });
        process_request(&line, cred, s).await.response
    }

    #[tokio::test]
    async fn test_esd_guard_flipped_by_root() {
        let s = surface();
        assert!(matches!(write(&s, &cred(), Attribute::ReportHome, "down").await, Response::Ok(_)));

        assert!(matches!(
            write(&s, &cred(), Attribute::IgnoreHomeForEsd, "1").await,
            Response::Ok(_)
        ));
        match write(&s, &cred(), Attribute::ReportHome, "up").await {
            Response::Error { code, .. } => assert_eq!(code, 22),
            other => panic!("unexpected {:?}", other),
        }

        write(&s, &cred(), Attribute::IgnoreHomeForEsd, "0").await;
        assert!(matches!(write(&s, &cred(), Attribute::ReportHome, "up").await, Response::Ok(_)));
    }

    #[tokio::test]
    async fn test_esd_guard_denied_to_users() {
        let s = surface();
        let user = PeerCredentials { uid: 1000, gid: 1000, pid: 42 };
        match write(&s, &user, Attribute::IgnoreHomeForEsd, "1").await {
            Response::Error { code, .. } => assert_eq!(code, 13),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!s.device().ignore_home_for_esd());
        // Other writes stay open to socket users
        assert!(matches!(write(&s, &user, Attribute::ReportHome, "down").await, Response::Ok(_)));
    }

    #[tokio::test]
    async fn test_garbage_rejected() {
        let s = surface();
        let resp = process_request("{nope", &cred(), &s).await;
        assert_eq!(resp.id, 0);
        assert!(matches!(resp.response, Response::Error { .. }));
    }

    #[tokio::test]
    async fn test_bounded_read() {
        let data: &[u8] = b"0123456789\nrest";
        let mut reader = tokio::io::BufReader::new(data);
        let mut out = Vec::new();
        assert!(read_line_bounded(&mut reader, &mut out, 4).await.is_err());

        let mut reader = tokio::io::BufReader::new(data);
        assert_eq!(read_line_bounded(&mut reader, &mut out, 64).await.unwrap(), 11);
    }
}
