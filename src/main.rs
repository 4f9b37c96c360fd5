mod batch;
mod controller;
mod reader;
mod sequencer;
mod status;
mod transport;

use anyhow::{Context, Result};
use clap::Parser;
use controller::{Controller, ControllerConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tcm_shared::{timing, BatchResult, Command};
use transport::{
    MockTransport, SerialConfig, SerialConnector, TcpConnector, Transport, TransportConnector,
};

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Run a batch of commands against a temperature controller
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Instrument table (CSV with Device,Module,Register,Type columns)
    #[clap(short, long)]
    batch: PathBuf,

    /// Serial port of the controller
    #[clap(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial baud rate
    #[clap(long, default_value_t = timing::DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Serial device server address (host:port) used instead of a local port
    #[clap(long, conflicts_with = "simulate")]
    tcp: Option<String>,

    /// Attempts allowed for a failing command
    #[clap(long, default_value_t = timing::DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Reply polls (500 ms each) before a command times out
    #[clap(long, default_value_t = timing::REPLY_MAX_POLLS)]
    timeout_polls: u32,

    /// Answer every command from an in-memory simulated controller
    #[clap(long)]
    simulate: bool,

    /// Print the assembled commands without opening any port
    #[clap(long)]
    dry_run: bool,

    /// Transparent command written before the batch, reply not tracked (repeatable)
    #[clap(long = "raw", value_name = "TEXT")]
    raw: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(result) if result.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<BatchResult> {
    let rows = batch::load_csv(&args.batch)?;
    let commands = batch::assemble_batch(&rows);
    info!(
        "Loaded {} command(s) from {} ({} row(s))",
        commands.len(),
        args.batch.display(),
        rows.len()
    );

    if args.dry_run {
        for text in &args.raw {
            println!("raw  {}", text);
        }
        for (i, command) in commands.iter().enumerate() {
            println!("{:>3}  {}", i + 1, command);
        }
        return Ok(BatchResult::Success);
    }

    let mut config = ControllerConfig::default();
    config.sequencer.max_retries = args.max_retries;
    config.sequencer.max_polls = args.timeout_polls;

    let serial = SerialConfig {
        port: args.port,
        baud_rate: args.baud,
        ..Default::default()
    };

    if args.simulate {
        let kinds = commands
            .iter()
            .map(|command| (command.text().to_owned(), command.kind()))
            .collect();
        let (transport, _) = MockTransport::simulated_device(kinds);
        info!("Running against simulated controller");
        drive(transport, config, &args.raw, commands).await
    } else if let Some(address) = args.tcp {
        let connector = TcpConnector::new(address, serial.read_timeout);
        let transport = connect(&connector).await?;
        drive(transport, config, &args.raw, commands).await
    } else {
        let connector = SerialConnector::new(serial);
        let transport = connect(&connector).await?;
        drive(transport, config, &args.raw, commands).await
    }
}

async fn connect<C: TransportConnector>(connector: &C) -> Result<C::Transport> {
    info!("Connecting via {}", connector.name());
    tokio::time::timeout(Duration::from_secs(10), connector.connect())
        .await
        .with_context(|| format!("{} connect timeout", connector.name()))?
}

async fn drive<T: Transport>(
    transport: T,
    config: ControllerConfig,
    raw: &[String],
    commands: Vec<Command>,
) -> Result<BatchResult> {
    let controller = Controller::new(transport, config);

    let result = send_raw_then_execute(&controller, raw, commands).await;
    let values = controller.current_value().await;
    let status = controller.status().await;
    controller.stop().await?;

    let result = result?;
    info!(
        "Batch ended at command {}/{} (retry count {})",
        status.active_index(),
        status.batch_len(),
        status.retry_count()
    );
    match (&values.value, &values.percent) {
        (Some(value), Some(percent)) => println!("Last value: {} ({}%)", value, percent),
        (Some(value), None) => println!("Last value: {}", value),
        _ => {}
    }
    println!("Result: {:?}", result);
    Ok(result)
}

/// Raw commands go out first; their replies arrive while nothing is `Sent`
/// and are dropped as stray before the batch starts
async fn send_raw_then_execute<T: Transport>(
    controller: &Controller<T>,
    raw: &[String],
    commands: Vec<Command>,
) -> Result<BatchResult> {
    if !raw.is_empty() {
        controller.start().await?;
        for text in raw {
            info!("Sending raw command: {}", text);
            controller.send_raw(text).await?;
        }
        tokio::time::sleep(Duration::from_millis(timing::INTER_COMMAND_DELAY_MS)).await;
    }
    controller.execute(commands).await
}
