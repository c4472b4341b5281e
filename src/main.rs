use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use grblstream::{
    init_logging, list_ports, load_program, CommunicatorConfig, CommunicatorEvent,
    ConnectionParams, ControllerType, ErrorPolicy, GrblController, ProbeParams, ProbeSession,
    StatusPoller,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List serial ports that look like CNC controllers
    Ports,
    /// Stream a G-code file
    Stream {
        /// G-code file to send
        file: PathBuf,

        #[command(flatten)]
        link: LinkArgs,

        /// Wait for each acknowledgement before sending the next command
        #[arg(long)]
        single_step: bool,

        /// What to do when the firmware rejects a command
        #[arg(long, value_parser = parse_policy)]
        on_error: Option<ErrorPolicy>,
    },
    /// Find the outside XY corner of the workpiece with a touch probe
    ProbeCorner {
        #[command(flatten)]
        link: LinkArgs,

        /// Distance along X to the Y probing lane
        #[arg(long, default_value_t = 10.0, allow_hyphen_values = true)]
        x_spacing: f64,

        /// Distance along Y to the X probing lane
        #[arg(long, default_value_t = 10.0, allow_hyphen_values = true)]
        y_spacing: f64,

        /// Fast probe feed rate in mm/min
        #[arg(long, default_value_t = 100.0)]
        feed: f64,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 120)]
        timeout: u64,
    },
}

#[derive(Args, Debug)]
struct LinkArgs {
    /// Config file (.json or .toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port (e.g. /dev/ttyUSB0, COM3)
    #[arg(short, long, conflicts_with = "host")]
    port: Option<String>,

    /// Serial baud rate
    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,

    /// Host of a TCP bridge
    #[arg(long)]
    host: Option<String>,

    /// TCP port of the bridge
    #[arg(long, default_value_t = 23)]
    tcp_port: u16,

    /// Firmware: grbl, grblhal or fluidnc
    #[arg(short, long)]
    firmware: Option<ControllerType>,
}

fn parse_policy(value: &str) -> Result<ErrorPolicy, String> {
    match value.to_ascii_lowercase().as_str() {
        "continue" => Ok(ErrorPolicy::Continue),
        "pause" => Ok(ErrorPolicy::Pause),
        "abort" => Ok(ErrorPolicy::Abort),
        other => Err(format!("unknown error policy '{}'", other)),
    }
}

impl LinkArgs {
    /// Config file values, overridden by the command line
    fn config(&self) -> Result<CommunicatorConfig> {
        let mut config = match &self.config {
            Some(path) => CommunicatorConfig::load_from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => CommunicatorConfig::default(),
        };

        if let Some(host) = &self.host {
            config.connection = ConnectionParams {
                timeout_ms: config.connection.timeout_ms,
                ..ConnectionParams::tcp(host.clone(), self.tcp_port)
            };
        } else if let Some(port) = &self.port {
            config.connection = ConnectionParams {
                timeout_ms: config.connection.timeout_ms,
                ..ConnectionParams::serial(port.clone(), self.baud)
            };
        }
        if let Some(firmware) = self.firmware {
            config.firmware = firmware;
        }

        config.validate()?;
        config.connection.validate().context(
            "no usable connection; pass --port or --host, or set one in the config file",
        )?;
        Ok(config)
    }
}

type Events = mpsc::UnboundedReceiver<CommunicatorEvent>;

/// Connect and forward every event to a channel
fn open(config: &CommunicatorConfig) -> Result<(GrblController, Events)> {
    let controller = GrblController::from_config(config);
    let (tx, rx) = mpsc::unbounded_channel();
    controller.add_listener(Arc::new(move |event: &CommunicatorEvent| {
        let _ = tx.send(event.clone());
    }));

    controller
        .connect(&config.connection)
        .with_context(|| format!("failed to connect to {}", config.connection.describe()))?;
    Ok((controller, rx))
}

/// Give the firmware a moment to print its banner after the port opened
async fn await_banner(events: &mut Events) {
    let wait = tokio::time::sleep(Duration::from_millis(2500));
    tokio::pin!(wait);

    loop {
        tokio::select! {
            _ = &mut wait => {
                tracing::debug!("No startup banner, continuing");
                return;
            }
            Some(event) = events.recv() => {
                if let CommunicatorEvent::RawResponse { line } = event {
                    if line.starts_with("Grbl") {
                        println!("{}", line);
                        return;
                    }
                }
            }
        }
    }
}

async fn stream(
    file: PathBuf,
    link: LinkArgs,
    single_step: bool,
    on_error: Option<ErrorPolicy>,
) -> Result<bool> {
    let program = load_program(&file)?;
    if program.is_empty() {
        bail!("{} contains no commands", file.display());
    }

    let mut config = link.config()?;
    config.single_step |= single_step;
    if let Some(policy) = on_error {
        config.error_policy = policy;
    }

    let (controller, mut events) = open(&config)?;
    await_banner(&mut events).await;
    let poller = StatusPoller::from_millis(controller.clone(), config.status_poll_ms);

    let total = program.len();
    controller.enqueue_program(&program)?;
    println!(
        "Streaming {} commands from {} ({} byte buffer)",
        total,
        file.display(),
        controller.capacity()
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut done = 0usize;

    let success = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("Interrupted, cancelling");
                controller.cancel()?;
                break false;
            }
            event = events.recv() => {
                let Some(event) = event else { break false };
                match event {
                    CommunicatorEvent::CommandComplete(cmd) => {
                        done += 1;
                        println!(
                            "[{:>5}/{}] {:<40} {}",
                            done,
                            total,
                            cmd.text(),
                            cmd.response().unwrap_or("")
                        );
                    }
                    CommunicatorEvent::CommandSkipped(_) => done += 1,
                    CommunicatorEvent::Paused => {
                        println!("Paused; fix the problem and restart the program");
                    }
                    CommunicatorEvent::Alarm { code, description } => {
                        eprintln!("ALARM:{} {}", code, description);
                    }
                    CommunicatorEvent::ConnectionError { reason } => {
                        eprintln!("Connection error: {}", reason);
                    }
                    CommunicatorEvent::StatusUpdated(status) => {
                        tracing::debug!(
                            "{} {} buffer {}%",
                            status.state_string,
                            status.work_coord,
                            controller.buffer_usage_percent()
                        );
                    }
                    CommunicatorEvent::StreamComplete { success } => break success,
                    _ => {}
                }
            }
        }
    };

    if let Some(poller) = poller {
        poller.stop().await;
    }
    controller.disconnect();
    println!("{}", if success { "Done" } else { "Program did not complete" });
    Ok(success)
}

async fn probe_corner(link: LinkArgs, params: ProbeParams, timeout: Duration) -> Result<bool> {
    let config = link.config()?;
    let (controller, mut events) = open(&config)?;
    await_banner(&mut events).await;
    drop(events);

    // the session records its start from the latest status report
    controller.query_status()?;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let session = ProbeSession::new(params).with_timeout(timeout);
    let worker = controller.clone();
    let result = tokio::task::spawn_blocking(move || session.run(&worker)).await?;
    controller.disconnect();

    match result {
        Ok(corner) => {
            let (x, y) = corner.corner();
            println!("Corner at X{:.3} Y{:.3} (machine coordinates)", x, y);
            Ok(true)
        }
        Err(e) => {
            eprintln!("{}", e);
            Ok(false)
        }
    }
}

fn ports() -> Result<bool> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No controller ports found");
    }
    for port in ports {
        println!("{:<24} {}", port.port_name, port.description);
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;
    tracing::debug!("grblstream {} built {}", grblstream::VERSION, grblstream::BUILD_DATE);

    let ok = match cli.command {
        Cmd::Ports => ports()?,
        Cmd::Stream {
            file,
            link,
            single_step,
            on_error,
        } => stream(file, link, single_step, on_error).await?,
        Cmd::ProbeCorner {
            link,
            x_spacing,
            y_spacing,
            feed,
            timeout,
        } => {
            let params = ProbeParams {
                x_spacing,
                y_spacing,
                feed_rate: feed,
            };
            probe_corner(link, params, Duration::from_secs(timeout)).await?
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
