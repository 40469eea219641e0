//! pktwatch - packet capture to protocol events.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pktwatch::capture::PnetCapture;
use pktwatch::reporter::ConsolePublisher;
use pktwatch::{Config, Supervisor};

#[derive(Parser, Debug, Clone)]
#[command(name = "pktwatch", version)]
#[command(about = "Capture packets and report protocol events as JSON lines")]
struct Args {
    /// Config file (default: $PKTWATCH_CONFIG or /etc/pktwatch.conf)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Network interface to capture on
    #[arg(short = 'i', long)]
    interface: Option<String>,

    /// Read packet data from the specified pcap file
    #[arg(short = 'I', long = "file")]
    file: Option<PathBuf>,

    /// Loop the file; 0 loops forever
    #[arg(short = 'l', long = "loop")]
    loop_count: Option<u32>,

    /// Read packets as fast as possible, without sleeping
    #[arg(short = 't', long)]
    top_speed: bool,

    /// Read packets one at a time (press Enter)
    #[arg(short = 'O', long)]
    one_at_a_time: bool,

    /// Write all captured packets to this pcap file
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Run in managed mode: SIGHUP reloads the config file
    #[arg(long)]
    managed: bool,

    /// Print one summary line per event instead of JSON
    #[arg(long)]
    summary: bool,

    /// List capture interfaces and exit
    #[arg(long)]
    list_interfaces: bool,
}

impl Args {
    /// Command line flags win over the config file and environment.
    fn apply(&self, config: &mut Config) {
        if let Some(interface) = &self.interface {
            config.capture.device = Some(interface.clone());
        }
        if let Some(file) = &self.file {
            config.capture.file = Some(file.clone());
        }
        if let Some(loop_count) = self.loop_count {
            config.capture.loop_count = loop_count;
        }
        if self.top_speed {
            config.capture.top_speed = true;
        }
        if self.one_at_a_time {
            config.capture.one_at_a_time = true;
        }
        if let Some(dump) = &self.dump {
            config.capture.dumpfile = Some(dump.clone());
        }
        if self.managed {
            config.managed = true;
        }
    }

    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref()).context("Failed to load configuration")?;
        self.apply(&mut config);
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.list_interfaces {
        for name in PnetCapture::list_interfaces() {
            println!("{}", name);
        }
        return ExitCode::SUCCESS;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = args.load_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting pktwatch");

    let publisher = Arc::new(ConsolePublisher::new().with_summary(args.summary));
    let supervisor = Supervisor::new(config, publisher).context("Invalid configuration")?;

    let stop = supervisor.stop_handle();
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
        stop.stop();
    });

    let reloads = if supervisor.is_managed() {
        let sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(handle_sighup(sighup, tx, args.clone()));
        Some(rx)
    } else {
        None
    };

    supervisor.run(reloads).await.context("Capture failed")?;
    info!("pktwatch stopped");
    Ok(())
}

/// Re-read the configuration on SIGHUP and hand it to the supervisor.
async fn handle_sighup(mut sighup: Signal, reloads: mpsc::Sender<Config>, args: Args) {
    while sighup.recv().await.is_some() {
        info!("Received SIGHUP, reloading configuration");
        match args.load_config() {
            Ok(config) => {
                if reloads.send(config).await.is_err() {
                    return;
                }
            }
            Err(e) => error!("Failed to reload configuration: {:#}", e),
        }
    }
}
