//! ==============================================================================
//! dispatcher.rs - single-threaded cooperative main loop
//! ==============================================================================
//!
//! purpose:
//!     owns the sensor aggregator and the local HTTP listener and interleaves
//!     them on one thread with two independent timers.
//!
//! each tick:
//!     1. sampling timer due         -> read_all() + check_thresholds()
//!     2. connection-check timer due -> accept at most one client, serve it,
//!                                      close it
//!     run() then sleeps one loop quantum.
//!
//! both timers start out due, so the first tick samples immediately.
//!
//! scheduling:
//!     the listener is non-blocking, so an idle check costs one syscall.
//!     a client that is accepted is served synchronously under the client
//!     read/write timeouts; a slow client therefore still delays the next
//!     sampling check by up to those timeouts.
//!
//! relationships:
//!     - uses: sensors.rs (SensorAggregator), web.rs (routing, responses)
//!     - used by: main.rs
//!
//! ==============================================================================

use crate::config::StationConfig;
use crate::sensors::SensorAggregator;
use crate::web::{self, Route};
use anyhow::Context;
use std::fmt::Display;
use std::io::{self, ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Bytes read from a client; the request line is all that matters.
const REQUEST_BUFFER: usize = 1024;

/// Fires when it has never fired or a full interval has passed since it last did.
#[derive(Debug, Clone)]
pub struct Timer {
    interval: Duration,
    last_fire: Option<Instant>,
}

impl Timer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fire: None,
        }
    }

    /// Check the timer at `now`, restarting it when it fires.
    pub fn due(&mut self, now: Instant) -> bool {
        let due = match self.last_fire {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_fire = Some(now);
        }
        due
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub sample_interval: Duration,
    pub connection_check: Duration,
    pub quantum: Duration,
    pub client_timeout: Duration,
}

impl Schedule {
    pub fn from_config(config: &StationConfig) -> Self {
        Self {
            sample_interval: config.polling.sample_interval(),
            connection_check: config.polling.connection_check(),
            quantum: config.polling.loop_quantum(),
            client_timeout: Duration::from_millis(config.web.client_timeout_ms),
        }
    }
}

pub struct Dispatcher {
    aggregator: SensorAggregator,
    listener: TcpListener,
    sampling: Timer,
    connection_check: Timer,
    quantum: Duration,
    client_timeout: Duration,
}

impl Dispatcher {
    pub fn bind<A: ToSocketAddrs + Display>(
        addr: A,
        aggregator: SensorAggregator,
        schedule: Schedule,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&addr).with_context(|| format!("failed to bind {}", addr))?;
        listener
            .set_nonblocking(true)
            .context("failed to make listener non-blocking")?;

        Ok(Self {
            aggregator,
            listener,
            sampling: Timer::new(schedule.sample_interval),
            connection_check: Timer::new(schedule.connection_check),
            quantum: schedule.quantum,
            client_timeout: schedule.client_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[cfg(test)]
    pub fn aggregator(&self) -> &SensorAggregator {
        &self.aggregator
    }

    pub fn run(&mut self) -> ! {
        loop {
            self.tick(Instant::now());
            std::thread::sleep(self.quantum);
        }
    }

    /// One pass over both timers.
    pub fn tick(&mut self, now: Instant) {
        if self.sampling.due(now) {
            self.aggregator.read_all();
            self.aggregator.check_thresholds();
        }

        if self.connection_check.due(now) {
            if let Err(e) = self.poll_client() {
                tracing::warn!("[HTTP] Client servicing failed: {}", e);
            }
        }
    }

    /// Accept and serve at most one pending client. `Ok(false)` if none was waiting.
    pub fn poll_client(&mut self) -> io::Result<bool> {
        let (stream, peer) = match self.listener.accept() {
            Ok(client) => client,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        };
        tracing::debug!("[HTTP] Connection from {}", peer);
        self.serve(stream)?;
        Ok(true)
    }

    fn serve(&mut self, mut stream: TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.client_timeout))?;
        stream.set_write_timeout(Some(self.client_timeout))?;

        let mut buf = [0u8; REQUEST_BUFFER];
        let n = stream.read(&mut buf)?;
        let request = String::from_utf8_lossy(&buf[..n]);

        let Some(route) = web::route(&request) else {
            tracing::debug!("[HTTP] Empty or malformed request ({} bytes), closing", n);
            return Ok(());
        };

        let response = match route {
            Route::Dashboard => {
                let reading = self.aggregator.read_all();
                let percentage = self.aggregator.tank().percentage(reading.water_level.value());
                web::dashboard(&reading, percentage)
            }
            Route::Data => web::json(&self.aggregator.read_all()),
            Route::NotFound => web::not_found(),
        };
        tracing::info!("[HTTP] {:?} -> {}", route, response.status);

        response.write_to(&mut stream)
    }
}
