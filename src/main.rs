use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use dorabot::{
    CameraDriver, CommandDispatcher, DorabotConfig, LinkSession, MacroServer, RobotController,
    SimulatedCamera, SimulatedClassifier, SimulatedMotors,
};

#[derive(Parser, Debug)]
#[command(name = "dorabot")]
#[command(about = "Self-driving hobby robot: record labeled driving clips or drive autonomously")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "dorabot.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the robot")]
    validate_config: bool,

    /// Serial device to run the link session on, overriding the config
    #[arg(long, value_name = "DEVICE", help = "Read link commands from this serial device")]
    link_device: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting dorabot v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match DorabotConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate()?;

    // Hardware backends plug in behind the driver traits; the reference
    // binary wires the simulated set so the whole control surface can be
    // exercised off-robot.
    let camera: Arc<dyn CameraDriver> = Arc::new(SimulatedCamera::new());
    let motors = Box::new(SimulatedMotors::new());
    let classifier = Box::new(SimulatedClassifier::new(config.model.input_side));
    info!(
        "Classifier parameters expected at {} ({}x{} input)",
        config.model.param_file, config.model.input_side, config.model.input_side
    );

    let controller = Arc::new(RobotController::new(&config, camera, motors, classifier)?);
    let dispatcher = Arc::new(CommandDispatcher::new(Arc::clone(&controller)));

    let server = MacroServer::new(config.server.clone(), Arc::clone(&dispatcher));
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.start().await {
            error!("Macro server error: {}", e);
        }
    });

    let link_device = args.link_device.clone().or_else(|| config.link.device.clone());
    let link_task = link_device.map(|device| {
        let session = LinkSession::new(Arc::clone(&controller), config.link.end_of_link);
        tokio::spawn(async move {
            match tokio::fs::File::open(&device).await {
                Ok(file) => {
                    let reader = tokio::io::BufReader::new(file);
                    match session.run(reader).await {
                        Ok(exit) => info!("Link session ended: {:?}", exit),
                        Err(e) => error!("Link session failed: {}", e),
                    }
                }
                Err(e) => error!("Failed to open link device {}: {}", device, e),
            }
        })
    });

    let shutdown = controller.shutdown_token();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received, shutting down"),
        _ = sigterm() => info!("SIGTERM received, shutting down"),
        _ = shutdown.cancelled() => info!("Shutdown requested by operator"),
    }

    // Motors released, recording closed, autonomy joined -- on every exit
    // path.
    controller.halt().await;

    server_task.abort();
    if let Some(task) = link_task {
        task.abort();
    }

    if config.system.shutdown_on_exit {
        info!("Powering the system down");
        let _ = std::process::Command::new("sudo")
            .args(["shutdown", "now", "-h"])
            .status();
    }

    info!("dorabot exited cleanly");
    Ok(())
}

async fn sigterm() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    std::future::pending::<()>().await;
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dorabot={}", log_level)));

    fmt().with_env_filter(env_filter).init();

    Ok(())
}
