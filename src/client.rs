/*
 * This file is part of fpcctl.
 *
 * Copyright (C) 2025 fpc contributors
 *
 * fpcctl is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * fpcctl is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with fpcctl. If not, see <https://www.gnu.org/licenses/>.
 */

//! Daemon Client
//!
//! Talks to fpcd over its Unix socket, one JSON line per request.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fpc_error::{FpcError, Result};
use fpc_protocol::{
    generate_request_id, Attribute, DeviceStatus, Request, RequestEnvelope, Response,
    ResponseData, ResponseEnvelope, MAX_MESSAGE_SIZE,
};

const TIMEOUT_MS: u64 = 5000;

const INITIAL_BUFFER_SIZE: usize = 512;

pub struct DaemonClient {
    path: PathBuf,
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

impl DaemonClient {
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&path).map_err(|e| {
            FpcError::DaemonConnection(format!("{}: {}", path.display(), e))
        })?;
        let reader_stream = stream.try_clone()?;

        stream.set_write_timeout(Some(Duration::from_millis(TIMEOUT_MS)))?;
        reader_stream.set_read_timeout(Some(Duration::from_millis(TIMEOUT_MS)))?;

        Ok(Self {
            path,
            writer: stream,
            reader: BufReader::new(reader_stream),
        })
    }

    /// Send one request and return the daemon's response, error responses included
    pub fn request(&mut self, req: Request) -> Result<Response> {
        req.validate().map_err(FpcError::InvalidArgument)?;

        // A wait may legitimately outlast the normal read timeout
        let read_timeout = match &req {
            Request::WaitAttribute { timeout_ms, .. } => {
                Duration::from_millis(TIMEOUT_MS + *timeout_ms as u64)
            }
            _ => Duration::from_millis(TIMEOUT_MS),
        };
        self.reader.get_ref().set_read_timeout(Some(read_timeout))?;

        let request_id = generate_request_id();
        let envelope = RequestEnvelope::with_id(req, request_id);

        let mut json = serde_json::to_vec(&envelope)?;
        json.push(b'\n');
        if json.len() > MAX_MESSAGE_SIZE {
            return Err(FpcError::MessageTooLarge {
                size: json.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }
        self.writer
            .write_all(&json)
            .map_err(|e| FpcError::DaemonRequest(format!("Failed to send request: {}", e)))?;

        let mut response_buf: Vec<u8> = Vec::with_capacity(INITIAL_BUFFER_SIZE);
        self.reader
            .read_until(b'\n', &mut response_buf)
            .map_err(|e| FpcError::DaemonRequest(format!("Failed to read response: {}", e)))?;

        if response_buf.is_empty() {
            return Err(FpcError::DaemonConnection(format!(
                "{}: daemon closed connection",
                self.path.display()
            )));
        }
        if response_buf.len() > MAX_MESSAGE_SIZE {
            return Err(FpcError::MessageTooLarge {
                size: response_buf.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }
        if response_buf.last() == Some(&b'\n') {
            response_buf.pop();
        }

        let response: ResponseEnvelope = serde_json::from_slice(&response_buf)
            .map_err(|e| FpcError::IpcProtocol(format!("Failed to parse response: {}", e)))?;

        if response.id != request_id {
            return Err(FpcError::IpcProtocol(format!(
                "Response ID mismatch: expected {}, got {}",
                request_id, response.id
            )));
        }

        Ok(response.response)
    }

    fn request_data(&mut self, req: Request) -> Result<ResponseData> {
        match self.request(req)? {
            Response::Ok(data) => Ok(data),
            Response::Error { message, code } => Err(error_from_code(code, message)),
        }
    }

    pub fn ping(&mut self) -> Result<String> {
        self.request_data(Request::Ping)?
            .value
            .ok_or_else(|| missing("value"))
    }

    pub fn version(&mut self) -> Result<String> {
        self.request_data(Request::Version)?
            .value
            .ok_or_else(|| missing("value"))
    }

    pub fn status(&mut self) -> Result<DeviceStatus> {
        self.request_data(Request::Status)?
            .status
            .ok_or_else(|| missing("status"))
    }

    pub fn read(&mut self, attribute: Attribute) -> Result<String> {
        self.request_data(Request::ReadAttribute { attribute })?
            .value
            .ok_or_else(|| missing("value"))
    }

    /// Returns the number of bytes the daemon consumed
    pub fn write(&mut self, attribute: Attribute, value: &str) -> Result<usize> {
        self.request_data(Request::WriteAttribute {
            attribute,
            value: value.to_string(),
        })?
        .written
        .ok_or_else(|| missing("written"))
    }

    /// Block until `attribute` changes past `after_generation`
    pub fn wait(
        &mut self,
        attribute: Attribute,
        after_generation: u64,
        timeout_ms: u32,
    ) -> Result<(u64, String)> {
        let data = self.request_data(Request::WaitAttribute {
            attribute,
            after_generation,
            timeout_ms,
        })?;
        match (data.generation, data.value) {
            (Some(generation), Some(value)) => Ok((generation, value)),
            _ => Err(missing("generation")),
        }
    }
}

fn missing(field: &str) -> FpcError {
    FpcError::IpcProtocol(format!("Response is missing '{}'", field))
}

/// Map a daemon error response back onto the error kind it came from
pub fn error_from_code(code: i32, message: String) -> FpcError {
    match code {
        22 => FpcError::InvalidArgument(message),
        13 => FpcError::PermissionDenied(message),
        95 => FpcError::NotSupported(message),
        110 => FpcError::Timeout(message),
        _ => FpcError::DaemonRequest(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;
    use tempfile::TempDir;

    /// One-connection fake daemon that answers each request with `reply(request)`
    fn fake_daemon<F>(dir: &TempDir, reply: F) -> PathBuf
    where
        F: Fn(RequestEnvelope) -> ResponseEnvelope + Send + 'static,
    {
        let path = dir.path().join("fpcd.sock");
        let listener = UnixListener::bind(&path).unwrap();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let reader = BufReader::new(stream);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                let request: RequestEnvelope = serde_json::from_str(&line).unwrap();
                let mut out = serde_json::to_vec(&reply(request)).unwrap();
                out.push(b'\n');
                writer.write_all(&out).unwrap();
            }
        });
        path
    }

    #[test]
    fn test_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = fake_daemon(&dir, |req| {
            let response = match req.request {
                Request::ReadAttribute { attribute: Attribute::ScreenState } => {
                    Response::ok_string("1\n")
                }
                _ => Response::error("unexpected"),
            };
            ResponseEnvelope::new(req.id, response)
        });

        let mut client = DaemonClient::connect(&path).unwrap();
        assert_eq!(client.read(Attribute::ScreenState).unwrap(), "1\n");
    }

    #[test]
    fn test_error_codes_map_back() {
        let dir = TempDir::new().unwrap();
        let path = fake_daemon(&dir, |req| {
            ResponseEnvelope::new(req.id, Response::error_with_code("Invalid argument: bad", 22))
        });

        let mut client = DaemonClient::connect(&path).unwrap();
        let err = client.write(Attribute::ReportHome, "bad").unwrap_err();
        assert!(matches!(err, FpcError::InvalidArgument(_)));
    }

    #[test]
    fn test_id_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let path = fake_daemon(&dir, |req| {
            ResponseEnvelope::new(req.id.wrapping_add(1), Response::ok_string("pong"))
        });

        let mut client = DaemonClient::connect(&path).unwrap();
        assert!(matches!(client.ping(), Err(FpcError::IpcProtocol(_))));
    }

    #[test]
    fn test_invalid_request_not_sent() {
        let dir = TempDir::new().unwrap();
        let path = fake_daemon(&dir, |req| ResponseEnvelope::new(req.id, Response::ok()));

        let mut client = DaemonClient::connect(&path).unwrap();
        // screen_state is read-only
        let err = client.write(Attribute::ScreenState, "0").unwrap_err();
        assert!(matches!(err, FpcError::InvalidArgument(_)));
    }

    #[test]
    fn test_connect_failure() {
        let dir = TempDir::new().unwrap();
        let err = DaemonClient::connect(dir.path().join("absent.sock")).err().unwrap();
        assert!(matches!(err, FpcError::DaemonConnection(_)));
    }

    #[test]
    fn test_error_from_code() {
        assert!(matches!(error_from_code(110, "t".into()), FpcError::Timeout(_)));
        assert!(matches!(error_from_code(13, "p".into()), FpcError::PermissionDenied(_)));
        assert!(matches!(error_from_code(5, "io".into()), FpcError::DaemonRequest(_)));
    }
}
