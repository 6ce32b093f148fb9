use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use capprobe::capture::{self, CaptureSession, FileCapture};
use capprobe::config::{self, HarnessConfig, InterfaceSelection, PassPolicy};
use capprobe::Harness;

/// Exit code for setup errors
const EXIT_SETUP: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "capprobe")]
#[command(about = "Verify that live packet capture sees a probe sent through the host's network stack")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Interface name, or "first" for the first device libpcap reports
    #[arg(short, long, env = config::INTERFACE_ENV, default_value = "first")]
    interface: InterfaceSelection,
    /// Shorten the wait once the probe has been sent
    #[arg(long, env = config::FAST_ENV, value_parser = BoolishValueParser::new())]
    fast: bool,
    #[arg(long, default_value = "30", value_parser = parse_secs)]
    deadline_secs: Duration,
    #[arg(long, default_value = "1", value_parser = parse_secs)]
    fast_deadline_secs: Duration,
    #[arg(long, default_value = config::DEFAULT_TARGET_HOST)]
    target_host: String,
    #[arg(long, default_value_t = config::DEFAULT_TARGET_PORT)]
    target_port: u16,
    /// BPF filter; defaults to "host <target-host> && port <target-port>"
    #[arg(long)]
    filter: Option<String>,
    #[arg(long, default_value_t = config::DEFAULT_SNAPLEN)]
    snaplen: i32,
    #[arg(long)]
    promisc: bool,
    #[arg(long, value_enum, default_value_t = PassPolicy::FirstPacket)]
    policy: PassPolicy,
}

impl RunArgs {
    fn into_config(self) -> HarnessConfig {
        let mut config = HarnessConfig::default()
            .with_interface(self.interface)
            .with_target(self.target_host, self.target_port)
            .with_deadline(self.deadline_secs)
            .with_policy(self.policy);
        config.fast = self.fast;
        config.fast_deadline = self.fast_deadline_secs;
        config.filter = self.filter;
        config.capture.snaplen = self.snaplen;
        config.capture.promisc = self.promisc;
        config
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture on an interface, send one UDP probe and check that it is captured
    Run(RunArgs),
    /// List capture-capable devices
    Devices,
    /// Replay a pcap file through the filtered capture pipeline
    Inspect {
        #[arg(short, long)]
        file: String,
        #[arg(long, default_value = "host 8.8.8.8 && port 9")]
        filter: String,
    },
    /// Compile a filter expression without opening a device
    CheckFilter {
        expression: String,
        /// Link type name (e.g. EN10MB, RAW) or DLT number
        #[arg(long, default_value = "EN10MB")]
        link_type: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose, cli.quiet) {
        eprintln!("Logging error: {:#}", e);
        std::process::exit(EXIT_SETUP);
    }

    let result = match cli.command {
        Commands::Run(args) => run_harness(args.into_config()).await,
        Commands::Devices => run_devices(),
        Commands::Inspect { file, filter } => run_inspect(&file, &filter).await,
        Commands::CheckFilter { expression, link_type } => run_check_filter(&expression, &link_type),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Setup error: {:#}", e);
            std::process::exit(EXIT_SETUP);
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(verbose >= 2)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("invalid seconds '{}': {}", s, e))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid seconds '{}': {}", s, e))
}

fn cancel_on_ctrlc() -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, shutting down gracefully...");
        handler_token.cancel();
    })
    .context("failed to install Ctrl+C handler")?;
    Ok(token)
}

async fn run_harness(config: HarnessConfig) -> Result<i32> {
    let harness = Harness::new(config).with_cancellation(cancel_on_ctrlc()?);
    let config = harness.config();
    tracing::info!(
        "probing {} on interface {} (filter {:?}, deadline {:?}, fast {})",
        config.target(),
        config.capture.interface,
        config.filter_expression(),
        config.deadline,
        config.fast
    );

    let report = harness.run().await.context("capture setup failed")?;

    if let Some(e) = report.probe_error() {
        tracing::error!("probe never left the host: {}", e);
    }
    if let Some(stats) = report.stats {
        tracing::debug!(
            "capture stats: {} received, {} dropped",
            stats.packets_received,
            stats.packets_dropped
        );
    }
    tracing::info!("{}", report.verdict);
    Ok(report.exit_code())
}

fn run_devices() -> Result<i32> {
    let devices = capture::list_devices().context("failed to list devices")?;
    if devices.is_empty() {
        tracing::warn!("No capture devices found. You may need elevated privileges.");
    }
    for (i, name) in devices.iter().enumerate() {
        println!("{}: {}", i, name);
    }
    Ok(0)
}

async fn run_inspect(path: &str, filter: &str) -> Result<i32> {
    let source = FileCapture::open(path)?;
    let mut session = CaptureSession::new(Box::new(source), filter)?;
    let mut packets = session.packets()?;
    let cancel = cancel_on_ctrlc()?;

    let mut matched = 0u64;
    loop {
        tokio::select! {
            packet = packets.recv() => match packet {
                Some(packet) => {
                    matched += 1;
                    tracing::info!("captured packet: {}", packet);
                }
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }

    drop(packets);
    session.close().await;
    tracing::info!("{} packets matched {:?} in {}", matched, filter, path);
    Ok(if matched > 0 { 0 } else { 1 })
}

fn run_check_filter(expression: &str, link_type: &str) -> Result<i32> {
    let link_type = match link_type.parse::<i32>() {
        Ok(dlt) => pcap::Linktype(dlt),
        Err(_) => pcap::Linktype::from_name(link_type)
            .with_context(|| format!("unknown link type: {}", link_type))?,
    };
    capture::validate_filter(expression, link_type)?;
    println!("ok: {:?} compiles for {}", expression, capture::link_type_name(link_type));
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_config(args: &[&str]) -> HarnessConfig {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Run(run) => run.into_config(),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_run_args_map_to_config() {
        let config = run_config(&[
            "capprobe", "run", "--interface", "eth1", "--fast", "--deadline-secs", "5",
            "--fast-deadline-secs", "0.5", "--target-port", "4000", "--policy", "until-deadline",
        ]);
        assert_eq!(config.capture.interface, InterfaceSelection::Named("eth1".to_string()));
        assert!(config.fast);
        assert_eq!(config.deadline, Duration::from_secs(5));
        assert_eq!(config.fast_deadline, Duration::from_millis(500));
        assert_eq!(config.filter_expression(), "host 8.8.8.8 && port 4000");
        assert_eq!(config.policy, PassPolicy::UntilDeadline);
    }

    #[test]
    fn test_fast_env_accepts_boolish_values() {
        // Only test in this binary touching the variable
        for (value, expected) in [("1", true), ("yes", true), ("on", true), ("true", true), ("0", false), ("off", false)] {
            std::env::set_var(config::FAST_ENV, value);
            let config = run_config(&["capprobe", "run"]);
            assert_eq!(config.fast, expected, "{}={}", config::FAST_ENV, value);
            assert_eq!(config.fast, HarnessConfig::from_env().fast, "{}={}", config::FAST_ENV, value);
        }
        std::env::remove_var(config::FAST_ENV);
        assert!(!run_config(&["capprobe", "run"]).fast);
    }
}
