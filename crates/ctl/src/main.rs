//! kinect-ctl
//!
//! Command line front end for the sensor session layer: enumerate devices,
//! print the mode catalog, drive the LED and tilt motor, and capture frames.

use anyhow::{Context as _, Result, anyhow};
use catalog::{LedStatus, StreamKind, TiltStatus};
use clap::{Parser, Subcommand};
use common::{frame_channel, setup_logging};
use ctl::CtlConfig;
use session::{Context, DeviceSession, probe};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "kinect-ctl")]
#[command(author, version, about = "Control and capture from a motion sensor")]
#[command(long_about = "
Control and capture from a Kinect-style motion sensor.

EXAMPLES:
    # List attached sensors
    kinect-ctl list

    # Tilt the sensor up by 15 degrees
    kinect-ctl tilt 15

    # Capture 30 depth frames from the simulated sensor
    kinect-ctl --simulate capture --stream depth --frames 30

CONFIGURATION:
    kinect-ctl looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/kinect-ctl/config.toml
    3. /etc/kinect-ctl/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Use the simulated sensor instead of hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Device index to act on
    #[arg(short, long, value_name = "INDEX", global = true)]
    device: Option<u32>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count attached devices and list sensor USB sub-devices
    List,
    /// Print the supported capture modes
    Modes {
        /// Only print modes of this stream (video or depth)
        #[arg(long)]
        stream: Option<StreamKind>,
    },
    /// Set the status LED (off, green, red, yellow, blink_green, blink_red_yellow)
    Led { status: LedStatus },
    /// Tilt the sensor and wait for the motor to settle
    Tilt {
        /// Target angle in degrees, clamped to ±31
        #[arg(allow_negative_numbers = true)]
        degrees: f64,
    },
    /// Stream frames and print their size and timestamp
    Capture {
        /// Stream to capture (video or depth)
        #[arg(long, default_value = "video")]
        stream: StreamKind,
        /// Number of frames to capture
        #[arg(long, default_value_t = 30)]
        frames: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = CtlConfig::default();
        let path = CtlConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        CtlConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        CtlConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("kinect-ctl v{}", env!("CARGO_PKG_VERSION"));

    let Some(command) = args.command else {
        println!("No command given, see --help");
        return Ok(());
    };

    if let Command::Modes { stream } = &command {
        print_modes(*stream);
        return Ok(());
    }

    let ctx = create_context(&config, args.simulate)?;
    ctx.set_log_level(config.driver_log_level()?);
    let index = args.device.unwrap_or(config.general.device_index);

    let result = match command {
        Command::List => list_devices(&ctx),
        Command::Led { status } => set_led(&ctx, index, status),
        Command::Tilt { degrees } => tilt(&ctx, &config, index, degrees).await,
        Command::Capture { stream, frames } => {
            capture(&ctx, &config, index, stream, frames).await
        }
        Command::Modes { .. } => Ok(()),
    };

    info!("Shutting down...");
    if let Err(e) = ctx.shutdown() {
        warn!("Error during shutdown: {}", e);
    }
    result
}

/// Build the driver context the configuration and flags ask for
fn create_context(config: &CtlConfig, simulate: bool) -> Result<Context> {
    if simulate || config.general.simulate {
        info!("Using simulated sensor");
        let (ctx, _sim) = Context::simulated(config.sim.to_sim_config());
        return Ok(ctx);
    }
    native_context()
}

#[cfg(feature = "libfreenect")]
fn native_context() -> Result<Context> {
    Context::native().context("Failed to initialize libfreenect")
}

#[cfg(not(feature = "libfreenect"))]
fn native_context() -> Result<Context> {
    Err(anyhow!(
        "kinect-ctl was built without the libfreenect feature, use --simulate"
    ))
}

fn print_modes(stream: Option<StreamKind>) {
    let kinds = match stream {
        Some(kind) => vec![kind],
        None => StreamKind::ALL.to_vec(),
    };
    for kind in kinds {
        println!("{} modes:", kind);
        for mode in catalog::modes(kind) {
            println!("  [{:#06x}] {}", mode.id, mode);
        }
        println!();
    }
}

fn list_devices(ctx: &Context) -> Result<()> {
    let count = ctx.num_devices().context("Failed to count devices")?;
    println!("Driver ({}) reports {} device(s)", ctx.driver().name(), count);

    match probe() {
        Ok(found) if found.is_empty() => println!("No sensor found on the USB bus."),
        Ok(found) => {
            println!(
                "Found {} sensor(s) on the USB bus:\n",
                session::probe::sensor_count(&found)
            );
            for device in found {
                println!("  {}", device);
            }
        }
        Err(e) => warn!("USB probe unavailable: {}", e),
    }
    Ok(())
}

fn open(ctx: &Context, index: u32) -> Result<DeviceSession> {
    ctx.open_device(index)
        .with_context(|| format!("Failed to open device {}", index))
}

fn set_led(ctx: &Context, index: u32, status: LedStatus) -> Result<()> {
    let device = open(ctx, index)?;
    device.set_led(status).context("Failed to set LED")?;
    println!("LED set to {}", status);
    Ok(())
}

async fn tilt(ctx: &Context, config: &CtlConfig, index: u32, degrees: f64) -> Result<()> {
    let device = open(ctx, index)?;
    let target = catalog::clamp_tilt_degrees(degrees);
    device
        .set_tilt_angle(target)
        .context("Failed to set tilt angle")?;

    let deadline = Instant::now() + config.tilt.settle_timeout;
    let state = loop {
        let state = device
            .refresh_tilt_state()
            .context("Failed to read tilt state")?;
        if state.status != TiltStatus::Moving {
            break state;
        }
        if Instant::now() >= deadline {
            warn!(
                "Motor still moving after {:?}",
                config.tilt.settle_timeout
            );
            break state;
        }
        tokio::time::sleep(config.tilt.poll_interval).await;
    };

    println!(
        "Tilt {:.1}° (target {:.1}°) status {} accel [{:.2}, {:.2}, {:.2}] m/s²",
        state.angle_degrees,
        target,
        state.status,
        state.accel[0],
        state.accel[1],
        state.accel[2]
    );
    if (state.angle_degrees - target).abs() > config.tilt.tolerance_degrees {
        warn!(
            "Tilt settled {:.1}° away from the target",
            state.angle_degrees - target
        );
    }
    Ok(())
}

async fn capture(
    ctx: &Context,
    config: &CtlConfig,
    index: u32,
    kind: StreamKind,
    frames: usize,
) -> Result<()> {
    let device = open(ctx, index)?;
    let mode = config.stream_mode(kind)?;
    device
        .set_mode(kind, mode.resolution, mode.format)
        .context("Failed to set mode")?;

    let (handler, receiver) = frame_channel(8);
    device.start(kind, handler).context("Failed to start stream")?;
    ctx.process_events_background()
        .context("Failed to start event pump")?;
    info!("Capturing {} {} frames ({})", frames, kind, mode);

    let mut received = 0;
    let started = Instant::now();
    let result = loop {
        if received >= frames {
            break Ok(());
        }
        tokio::select! {
            frame = tokio::time::timeout(Duration::from_secs(2), receiver.recv()) => {
                match frame {
                    Ok(Ok(frame)) => {
                        received += 1;
                        println!(
                            "#{:<4} {} bytes ts={} epoch={}",
                            received,
                            frame.data.len(),
                            frame.timestamp,
                            frame.epoch
                        );
                    }
                    Ok(Err(e)) => break Err(anyhow!(e).context("Frame channel closed")),
                    Err(_) => break Err(anyhow!("No frame received for 2s")),
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping capture");
                break Ok(());
            }
        }
    };

    device.stop(kind).context("Failed to stop stream")?;
    let elapsed = started.elapsed().as_secs_f64();
    println!(
        "Captured {} frame(s) in {:.2}s, {} dropped by the consumer",
        received,
        elapsed,
        receiver.dropped_frames()
    );
    result
}
