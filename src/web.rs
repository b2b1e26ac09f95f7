//! ==============================================================================
//! web.rs - local HTTP surface
//! ==============================================================================
//!
//! purpose:
//!     turns the first bytes of an inbound request into a route and renders
//!     the matching response. no I/O happens here; dispatcher.rs owns the
//!     socket.
//!
//! routes:
//!     GET /      -> 200 text/html, dashboard with the reading embedded
//!     GET /data  -> 200 application/json, the reading
//!                   (500 {"error": ..} if it cannot be serialized)
//!     anything   -> 404 text/plain "404 Not Found"
//!
//! only the request target is looked at; the method is ignored.
//!
//! ==============================================================================

use crate::domain::{Reading, Sample};
use serde::Serialize;
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Dashboard,
    Data,
    NotFound,
}

/// Route for a raw request, or `None` when there is no request line to speak of.
pub fn route(request: &str) -> Option<Route> {
    let path = request.split_whitespace().nth(1)?;
    Some(match path {
        "/" => Route::Dashboard,
        "/data" => Route::Data,
        _ => Route::NotFound,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    fn new(status: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            404 => "Not Found",
            _ => "Internal Server Error",
        }
    }

    /// Status line, headers and body in one buffer so the client sees a single write.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len()
        )
        .into_bytes();
        out.extend_from_slice(&self.body);
        out
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.to_bytes())?;
        out.flush()
    }
}

pub fn not_found() -> Response {
    Response::new(404, "text/plain", "404 Not Found")
}

/// JSON body for `/data`; a serialization failure becomes a 500 with the cause.
pub fn json<T: Serialize>(value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => Response::new(200, "application/json", body),
        Err(e) => {
            tracing::error!("[HTTP] Failed to serialize reading: {}", e);
            let body = serde_json::json!({ "error": e.to_string() }).to_string();
            Response::new(500, "application/json", body)
        }
    }
}

pub fn dashboard(reading: &Reading, tank_percentage: f32) -> Response {
    // reading is all numbers, bools and a fixed-format timestamp
    let initial = serde_json::to_string(reading).unwrap_or_else(|_| "null".to_string());
    let alerts = reading.alerts;
    let badge = |on: bool| if on { "alert" } else { "ok" };

    let html = format!(
        r#"<!doctype html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Tank Station</title>
    <style>
        body {{ font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee; }}
        .grid {{ display: grid; grid-template-columns: repeat(auto-fit, minmax(180px, 1fr)); gap: 1rem; }}
        .card {{ background: #16213e; padding: 1rem; border-radius: 8px; }}
        .card p {{ font-size: 1.6rem; margin: 0.3rem 0 0; }}
        .fallback {{ color: #f0a500; }}
        .alert {{ color: #ff6b6b; }}
        .ok {{ color: #4ecca3; }}
    </style>
</head>
<body>
    <h1>Tank Station</h1>
    <div class="grid">
        <div class="card"><h3>Temperature 1</h3><p id="temp1"{t1c}>{t1:.1}°C</p><small class="{t1a}">{t1a}</small></div>
        <div class="card"><h3>Temperature 2</h3><p id="temp2"{t2c}>{t2:.1}°C</p><small class="{t2a}">{t2a}</small></div>
        <div class="card"><h3>Room</h3><p id="room-temp"{rtc}>{rt:.1}°C</p></div>
        <div class="card"><h3>Humidity</h3><p id="humidity"{huc}>{hu:.1}%</p></div>
        <div class="card"><h3>Water Level</h3><p id="water-level"{wlc}>{wl:.2}m</p><small class="{wla}">{wla}</small></div>
        <div class="card"><h3>Tank Volume</h3><p id="tank-volume">{vol:.1}L</p><small>{pct:.1}%</small></div>
    </div>
    <p>Last update: <span id="last-update">{ts}</span></p>
    <script>
    const initialSensorData = {initial};
    </script>
</body>
</html>"#,
        t1 = reading.temp1.value(),
        t1c = fallback_class(reading.temp1),
        t1a = badge(alerts.temp1),
        t2 = reading.temp2.value(),
        t2c = fallback_class(reading.temp2),
        t2a = badge(alerts.temp2),
        rt = reading.room_temp.value(),
        rtc = fallback_class(reading.room_temp),
        hu = reading.humidity.value(),
        huc = fallback_class(reading.humidity),
        wl = reading.water_level.value(),
        wlc = fallback_class(reading.water_level),
        wla = badge(alerts.water_level),
        vol = reading.tank_volume,
        pct = tank_percentage,
        ts = html_escape(&reading.timestamp),
        initial = initial,
    );
    Response::new(200, "text/html", html)
}

fn fallback_class(sample: Sample) -> &'static str {
    if sample.is_fallback() {
        r#" class="fallback""#
    } else {
        ""
    }
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
