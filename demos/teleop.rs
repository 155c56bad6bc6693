// Keyboard teleop: WASD move, Z/X rotate, R/F speed, T field-relative,
// Space stop, C reset pose, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use swerve_zenoh_runtime::config::{TOPIC_CMD_BASE, TOPIC_CMD_CONTROL};
use swerve_zenoh_runtime::messages::{BaseCommand, ControlCommand};

const SPEEDS: [f64; 3] = [0.5, 1.5, 3.0]; // m/s
const THETA_SPEEDS: [f64; 3] = [0.5, 1.5, 3.0]; // rad/s
const INPUT_TIMEOUT_MS: u64 = 100; // Reset velocities after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let pub_base = session.declare_publisher(TOPIC_CMD_BASE).await?;
    let pub_control = session.declare_publisher(TOPIC_CMD_CONTROL).await?;

    info!("Controls: WASD=move, Z/X=rotate, R/F=speed, T=field-relative, Space=stop, C=reset, Q=quit");
    info!("Speed: LOW, robot-relative");

    enable_raw_mode()?;
    let result = run_teleop(&pub_base, &pub_control).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    pub_base: &zenoh::pubsub::Publisher<'_>,
    pub_control: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut field_relative = false;

    // Persistent velocity state
    let mut x_vel = 0.0;
    let mut y_vel = 0.0;
    let mut theta_vel = 0.0;
    let mut last_movement_input = Instant::now();

    loop {
        let mut control = None;

        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Movement - update velocity and refresh timestamp
                    KeyCode::Char('w') if pressed => {
                        x_vel = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        x_vel = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        y_vel = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        y_vel = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Rotation, CCW positive
                    KeyCode::Char('z') if pressed => {
                        theta_vel = THETA_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('x') if pressed => {
                        theta_vel = -THETA_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_mode(speed_idx, field_relative);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_mode(speed_idx, field_relative);
                    }
                    KeyCode::Char('t') if kind == KeyEventKind::Press => {
                        field_relative = !field_relative;
                        print_mode(speed_idx, field_relative);
                    }

                    // One-shot controls
                    KeyCode::Char(' ') if kind == KeyEventKind::Press => {
                        control = Some(ControlCommand::Stop);
                    }
                    KeyCode::Char('c') if kind == KeyEventKind::Press => {
                        control = Some(ControlCommand::ResetPose {
                            x: 0.0,
                            y: 0.0,
                            theta: 0.0,
                        });
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if let Some(control) = control {
            info!("Sending {:?}", control);
            pub_control.put(serde_json::to_string(&control)?).await?;
            continue;
        }

        // Reset velocities if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            x_vel = 0.0;
            y_vel = 0.0;
            theta_vel = 0.0;
        }

        // Always publish at ~50Hz
        let cmd = BaseCommand {
            x_vel,
            y_vel,
            theta_vel,
            field_relative,
        };
        pub_base.put(serde_json::to_string(&cmd)?).await?;
    }

    // Leave the drivetrain stopped
    pub_control
        .put(serde_json::to_string(&ControlCommand::Stop)?)
        .await?;
    Ok(())
}

fn print_mode(idx: usize, field_relative: bool) {
    let label = ["LOW", "MED", "HIGH"][idx];
    let frame = if field_relative { "field-relative" } else { "robot-relative" };
    info!("Speed: {}, {}", label, frame);
}
