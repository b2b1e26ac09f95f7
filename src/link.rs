//! ==============================================================================
//! link.rs - TCP/HTTP link to the remote controller
//! ==============================================================================
//!
//! purpose:
//!     pushes each reading to the controller (`POST /api/data`) and fetches
//!     its status (`GET /api/status`) with plain HTTP/1.1 over a fresh TCP
//!     connection per call.
//!
//! state machine:
//!
//!     ┌──────────────┐  probe connect ok   ┌───────────┐
//!     │ Disconnected │ ──────────────────> │ Connected │
//!     │  (initial)   │ <────────────────── │           │
//!     └──────────────┘  any call failure   └───────────┘
//!
//!     while disconnected, a probe is attempted only if no probe has been made
//!     yet or the last one is older than the reconnect interval; otherwise the
//!     call fails with `LinkError::Unavailable` without touching the network.
//!
//! relationships:
//!     - used by: sensors.rs (best-effort push after every read_all)
//!     - used by: main.rs (status probe at startup)
//!
//! ==============================================================================

use crate::domain::Reading;
use crate::error::LinkError;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

pub const DATA_PATH: &str = "/api/data";
pub const STATUS_PATH: &str = "/api/status";

/// Opens a fresh byte stream to the controller.
pub trait Dial {
    type Stream: Read + Write;

    fn dial(&mut self) -> io::Result<Self::Stream>;

    /// value for the Host header
    fn host(&self) -> &str;
}

/// Production dialer: bounded connect plus read/write timeouts on every stream.
pub struct TcpDialer {
    host: String,
    port: u16,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl TcpDialer {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
            io_timeout,
        }
    }
}

impl Dial for TcpDialer {
    type Stream = TcpStream;

    fn dial(&mut self) -> io::Result<TcpStream> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, format!("no address for {}", self.host)))?;
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;
        Ok(stream)
    }

    fn host(&self) -> &str {
        &self.host
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
}

/// Controller status document, as returned by `GET /api/status`.
pub type ControllerStatus = serde_json::Value;

pub struct ControllerLink<D: Dial> {
    dialer: D,
    state: LinkState,
    last_attempt: Option<Instant>,
    reconnect_interval: Duration,
    success_token: String,
}

impl<D: Dial> ControllerLink<D> {
    pub fn new(dialer: D, reconnect_interval: Duration, success_token: impl Into<String>) -> Self {
        Self {
            dialer,
            state: LinkState::Disconnected,
            last_attempt: None,
            reconnect_interval,
            success_token: success_token.into(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Probe the controller with a throwaway connection.
    pub fn connect(&mut self) -> bool {
        self.last_attempt = Some(Instant::now());
        match self.dialer.dial() {
            Ok(_) => {
                tracing::info!("[LINK] Connected to controller at {}", self.dialer.host());
                self.state = LinkState::Connected;
                true
            }
            Err(e) => {
                tracing::warn!("[LINK] Cannot reach controller at {}: {}", self.dialer.host(), e);
                self.state = LinkState::Disconnected;
                false
            }
        }
    }

    /// Push a reading. Fails fast while disconnected and throttled.
    pub fn send(&mut self, reading: &Reading) -> Result<(), LinkError> {
        self.send_at(reading, Instant::now())
    }

    fn send_at(&mut self, reading: &Reading, now: Instant) -> Result<(), LinkError> {
        let body = serde_json::to_string(&reading.controller_payload())?;
        self.ensure_connected(now)?;

        let request = format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            DATA_PATH,
            self.dialer.host(),
            body.len(),
            body
        );

        let result = self.exchange_once(&request);
        let outcome = result.and_then(|response| {
            if response.contains(&self.success_token) {
                Ok(())
            } else {
                Err(LinkError::Rejected(status_line(&response)))
            }
        });
        self.settle(outcome)?;
        tracing::debug!("[LINK] Reading delivered to controller");
        Ok(())
    }

    /// Fetch the controller's status document.
    pub fn get_status(&mut self) -> Result<ControllerStatus, LinkError> {
        self.get_status_at(Instant::now())
    }

    fn get_status_at(&mut self, now: Instant) -> Result<ControllerStatus, LinkError> {
        self.ensure_connected(now)?;

        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            STATUS_PATH,
            self.dialer.host()
        );

        let outcome = self.exchange_to_end(&request).and_then(|response| {
            if !response.contains(&self.success_token) {
                return Err(LinkError::Rejected(status_line(&response)));
            }
            let start = response
                .find('{')
                .ok_or_else(|| LinkError::MalformedResponse("no JSON object in response".into()))?;
            serde_json::from_str(response[start..].trim_end())
                .map_err(|e| LinkError::MalformedResponse(e.to_string()))
        });
        self.settle(outcome)
    }

    fn ensure_connected(&mut self, now: Instant) -> Result<(), LinkError> {
        if self.state == LinkState::Connected {
            return Ok(());
        }
        let due = self
            .last_attempt
            .map_or(true, |at| now.saturating_duration_since(at) > self.reconnect_interval);
        if !due {
            return Err(LinkError::Unavailable);
        }
        let connected = self.connect();
        self.last_attempt = Some(now);
        if connected {
            Ok(())
        } else {
            Err(LinkError::Unavailable)
        }
    }

    /// Any failed exchange drops the link back to disconnected.
    fn settle<T>(&mut self, outcome: Result<T, LinkError>) -> Result<T, LinkError> {
        if let Err(e) = &outcome {
            tracing::warn!("[LINK] Controller call failed, marking link down: {}", e);
            self.state = LinkState::Disconnected;
        }
        outcome
    }

    /// Write the request and take a single read of at most 1 KiB.
    fn exchange_once(&mut self, request: &str) -> Result<String, LinkError> {
        let mut stream = self.dialer.dial()?;
        stream.write_all(request.as_bytes())?;
        stream.flush()?;
        let mut buf = [0u8; 1024];
        let n = stream.read(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    /// Write the request and read until the peer closes or the read times out.
    fn exchange_to_end(&mut self, request: &str) -> Result<String, LinkError> {
        let mut stream = self.dialer.dial()?;
        stream.write_all(request.as_bytes())?;
        stream.flush()?;

        let mut response = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => response.extend_from_slice(&buf[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(String::from_utf8_lossy(&response).into_owned())
    }
}

fn status_line(response: &str) -> String {
    match response.lines().next() {
        Some(line) if !line.is_empty() => line.to_string(),
        _ => "empty response".to_string(),
    }
}
