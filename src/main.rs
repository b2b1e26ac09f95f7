//! ==============================================================================
//! main.rs - tank station entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the station together and hands control to the dispatcher.
//!
//! responsibilities:
//!     - load configuration (--config, config/station.toml or defaults)
//!     - install the tracing subscriber
//!     - open the peripherals (mock or real, see hal.rs)
//!     - build the RS-485 transport and the Modbus level sensor
//!     - probe the remote controller once and log its status
//!     - bind the local HTTP listener and run the cooperative loop forever
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                 dispatcher (one thread)                      │
//!     │  ┌──────────────────────┐        ┌────────────────────────┐  │
//!     │  │ sampling timer (60s) │        │ conn. check (500ms)    │  │
//!     │  └──────────┬───────────┘        └───────────┬────────────┘  │
//!     │             ▼                                ▼               │
//!     │  ┌──────────────────────┐        ┌────────────────────────┐  │
//!     │  │  SensorAggregator    │ <───── │ web: /  /data  404     │  │
//!     │  └──┬───────┬───────┬───┘        └────────────────────────┘  │
//!     └─────┼───────┼───────┼────────────────────────────────────────┘
//!           │       │       │
//!           ▼       ▼       ▼
//!     MAX31855 x2  DHT22   RS-485 ──> Modbus level sensor
//!                           │
//!                           └─ reading ──> ControllerLink ──> controller
//!
//! relationships:
//!     - uses: every other module
//!
//! ==============================================================================

mod config;
mod crc;
mod dispatcher;
mod domain;
mod error;
mod hal;
mod link;
mod logging;
mod modbus;
mod rs485;
mod sensors;
mod web;

use anyhow::{Context, Result};
use clap::Parser;
use config::StationConfig;
use dispatcher::{Dispatcher, Schedule};
use link::{ControllerLink, TcpDialer};
use rs485::{Rs485Transport, Turnaround};
use sensors::{LogNotifier, ModbusLevelSensor, SensorAggregator, Sources};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "tank-station", version, about = "Tank monitoring sensor station")]
struct Args {
    /// Path to station.toml (default: config/station.toml, then ../config/station.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // startup banner
    println!("===========================================================");
    println!("  Tank Station");
    println!("  Thermocouples + DHT22 + Modbus RTU level over RS-485");
    println!("===========================================================");

    // step 1: load configuration
    let config = match args.config {
        Some(path) => StationConfig::load(&path)?,
        None => StationConfig::load_or_default(),
    };
    logging::init(&config.logging.level).context("failed to initialize logging")?;
    config.print_summary();

    // step 2: peripherals
    println!("\n[STARTUP] Opening peripherals...");
    let peripherals = hal::open(&config).context("failed to open peripherals")?;

    let timing = Turnaround {
        guard: Duration::from_millis(config.rs485.guard_ms),
        settle: Duration::from_millis(config.rs485.settle_ms),
    };
    let transport = Rs485Transport::new(peripherals.serial, peripherals.direction, timing)
        .context("failed to set up RS-485 transport")?;
    let request = modbus::build_read_request(config.rs485.slave_address, config.rs485.register, 1);
    tracing::info!("[MODBUS] Level request: {}", hex::encode(request.to_bytes()));
    let level = ModbusLevelSensor::new(transport, request);
    println!("[STARTUP] ✓ Sensors ready");

    // step 3: controller link
    let dialer = TcpDialer::new(
        config.controller.host.clone(),
        config.controller.port,
        config.controller_connect_timeout(),
        config.controller_read_timeout(),
    );
    let mut controller = ControllerLink::new(
        dialer,
        config.reconnect_interval(),
        config.controller.success_token.clone(),
    );
    match controller.get_status() {
        Ok(status) => tracing::info!("[LINK] Controller status: {}", status),
        Err(e) => tracing::warn!(
            "[LINK] Controller status unavailable ({:?}), retrying every {}s: {}",
            controller.state(),
            config.controller.reconnect_interval_seconds,
            e
        ),
    }

    // step 4: aggregator
    let sources = Sources {
        thermocouple1: peripherals.thermocouple1,
        thermocouple2: peripherals.thermocouple2,
        climate: peripherals.climate,
        level: Box::new(level),
    };
    let notifier = LogNotifier::new(
        config.alerts.email_sender.clone(),
        config.alerts.phone_number.clone(),
    );
    let aggregator = SensorAggregator::new(
        sources,
        Box::new(controller),
        Box::new(notifier),
        config.tank,
        config.thresholds,
    )
    .show_sensor_data(config.logging.show_sensor_data);

    // step 5: local HTTP + main loop
    let addr = format!("{}:{}", config.web.bind, config.web.port);
    let mut dispatcher = Dispatcher::bind(addr.as_str(), aggregator, Schedule::from_config(&config))?;
    let local = dispatcher.local_addr().context("listener has no local address")?;
    println!("[STARTUP] ✓ Dashboard live at http://{}", local);

    println!(
        "\n[RUNTIME] Sampling every {}s, checking clients every {}ms",
        config.polling.sample_interval_seconds, config.polling.connection_check_ms
    );
    println!("────────────────────────────────────────────────────────────");

    dispatcher.run()
}
