// Telemetry monitor: prints pose, health and module states from the runtime
//
// Usage: cargo run --example telemetry_monitor -- [--rate-hz 5]

use std::time::Duration;

use clap::Parser;
use tokio::time::interval;
use tracing::{info, warn};

use swerve_zenoh_runtime::config::{TOPIC_HEALTH, TOPIC_TELEMETRY};
use swerve_zenoh_runtime::messages::{DriveTelemetry, RuntimeHealth};

#[derive(Parser, Debug)]
struct Args {
    /// Print rate
    #[arg(long, default_value_t = 5)]
    rate_hz: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let sub_telemetry = session.declare_subscriber(TOPIC_TELEMETRY).await?;
    let sub_health = session.declare_subscriber(TOPIC_HEALTH).await?;
    info!("Subscribed to: {}, {}", TOPIC_TELEMETRY, TOPIC_HEALTH);

    let mut latest: Option<DriveTelemetry> = None;
    let mut health: Option<RuntimeHealth> = None;
    let mut tick = interval(Duration::from_millis(1000 / args.rate_hz.max(1)));

    loop {
        tick.tick().await;

        // Keep only the newest message of each kind
        while let Ok(Some(sample)) = sub_telemetry.try_recv() {
            match serde_json::from_slice::<DriveTelemetry>(&sample.payload().to_bytes()) {
                Ok(t) => latest = Some(t),
                Err(e) => warn!("Failed to parse telemetry: {}", e),
            }
        }
        while let Ok(Some(sample)) = sub_health.try_recv() {
            match serde_json::from_slice::<RuntimeHealth>(&sample.payload().to_bytes()) {
                Ok(h) => health = Some(h),
                Err(e) => warn!("Failed to parse health: {}", e),
            }
        }

        let Some(t) = &latest else {
            info!("Waiting for telemetry...");
            continue;
        };

        info!(
            "{:?} | pose {} | cmd {} | meas {} | {:.1} V",
            health.unwrap_or(RuntimeHealth::CmdStale),
            t.pose,
            t.commanded_speeds,
            t.measured_speeds,
            t.bus_voltage
        );
        for m in &t.modules {
            let flags = [
                (m.drive_saturated, "drive-sat"),
                (m.steer_saturated, "steer-sat"),
                (m.write_fault, "write-fault"),
                (m.has_sensor_fault(), "sensor-fault"),
            ]
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(",");

            info!(
                "  {:<12} want {} got {} out {:+.2}/{:+.2} {}",
                m.name, m.desired, m.measured, m.drive_output, m.steer_output, flags
            );
        }
    }
}
