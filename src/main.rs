//! Rendev — rendezvous frame router.
//!
//! Two parties that cannot address each other directly exchange short
//! binary frames through this relay: writers POST frame batches, readers
//! poll their own mailbox by cursor. All state is in memory.

use rendev::service;
use rendev::system::System;
use rendev::types::RouterConfig;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "rendev", version, about = "Rendev: rendezvous frame router")]
struct Args {
    /// Run supervised (no stdin watcher)
    #[arg(long)]
    service: bool,

    /// Install the system service
    #[arg(long)]
    install: bool,

    /// Uninstall the system service
    #[arg(long)]
    uninstall: bool,

    /// Start the installed service
    #[arg(long)]
    start: bool,

    /// Stop the installed service
    #[arg(long)]
    stop: bool,

    /// HTTP listen port
    #[arg(short, long, default_value = "8084")]
    port: u16,

    /// UDP peer-discovery port
    #[arg(long, default_value = "8585")]
    discovery_port: u16,

    /// Data directory (billing collaborator)
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Require a proof-of-work envelope on every transport-frame deposit
    #[arg(long)]
    require_pow: bool,
}

/// Switch the working directory to the executable's folder so the relative
/// data paths resolve the same under systemd and by hand.
fn set_app_path() {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let _ = std::env::set_current_dir(dir);
        }
    }
}

fn run_service_command(args: &Args) -> bool {
    let result = if args.install {
        Some(("installed", service::install()))
    } else if args.uninstall {
        Some(("uninstalled", service::uninstall()))
    } else if args.start {
        Some(("started", service::start()))
    } else if args.stop {
        Some(("stopped", service::stop()))
    } else {
        None
    };

    match result {
        Some((verb, Ok(()))) => {
            println!("service {}", verb);
            true
        }
        Some((verb, Err(e))) => {
            eprintln!("service not {}: {}", verb, e);
            true
        }
        None => false,
    }
}

#[tokio::main]
async fn main() {
    set_app_path();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rendev=info".parse().expect("static directive")),
        )
        .init();

    let args = Args::parse();
    if run_service_command(&args) {
        return;
    }

    let config = RouterConfig {
        http_port: args.port,
        discovery_port: args.discovery_port,
        require_pow_on_deposit: args.require_pow,
        data_dir: args.data_dir.clone(),
        ..Default::default()
    };

    info!("Rendev v{} starting", VERSION);
    let system = Arc::new(System::new(config));
    let addr = match system.start().await {
        Ok(addr) => addr,
        Err(e) => {
            error!("start failed: {}", e);
            return;
        }
    };
    info!("router listening on {}", addr);

    if args.service {
        tokio::signal::ctrl_c().await.ok();
    } else {
        info!("running in foreground, press Enter to stop");
        let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut line = String::new();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = stdin.read_line(&mut line) => {}
        }
    }

    info!("shutting down");
    if let Err(e) = system.stop().await {
        error!("stop failed: {}", e);
    }
}
