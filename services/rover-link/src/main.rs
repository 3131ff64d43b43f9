use clap::{Arg, ArgAction, ArgMatches, Command};
use rover_link::api::RoverApi;
use rover_link::config::{self, RoverLinkConfig};
use rover_link::session::SessionEvent;
use rover_link::{BridgeSession, SessionRegistry, SessionSettings};
use rover_protocol::Waypoint;
use std::path::Path;
use tracing::{error, info, warn};

fn parse_waypoint(value: &str) -> Result<Waypoint, String> {
    let (lat, lng) = value
        .split_once(',')
        .ok_or_else(|| "Waypoint must be <lat>,<lng>".to_owned())?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|_| format!("Invalid latitude: {lat}"))?;
    let lng: f64 = lng
        .trim()
        .parse()
        .map_err(|_| format!("Invalid longitude: {lng}"))?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(format!("Waypoint out of range: {lat},{lng}"));
    }
    Ok(Waypoint { lat, lng })
}

fn cli() -> Command {
    Command::new("rover-link")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Telemetry and control link for a single rover")
        .arg(
            Arg::new("config")
                .help("Path to the TOML config file")
                .short('c')
                .long("config")
                .default_value(config::DEFAULT_CONFIG_PATH),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("monitor").about("Connect and log state changes until interrupted"),
        )
        .subcommand(
            Command::new("launch")
                .about("Launch an autonomous mission over the given waypoints")
                .arg(
                    Arg::new("waypoint")
                        .help("Waypoint as <lat>,<lng>; repeat for a route")
                        .short('w')
                        .long("waypoint")
                        .value_parser(parse_waypoint)
                        .action(ArgAction::Append)
                        .required(true),
                ),
        )
        .subcommand(Command::new("manual").about("Enable manual control until interrupted"))
        .subcommand(Command::new("stop").about("Stop the rover and clear its mission"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "rover-link starting");

    let matches = cli().get_matches();
    let config_path = matches
        .get_one::<String>("config")
        .map_or(config::DEFAULT_CONFIG_PATH, String::as_str);

    let cfg = match config::load_config_from_path(Path::new(config_path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let registry = match build_registry(&cfg) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("FATAL: failed to build API client: {}", e);
            std::process::exit(1);
        }
    };
    let session = registry.get_or_create(SessionSettings::from_config(&cfg));
    if cfg.cameras.iter().any(|c| c.enabled) {
        warn!("no media engine in this build, camera channels unavailable");
    }

    let code = run(&session, &matches).await;
    registry.disconnect_all();
    std::process::exit(code);
}

fn build_registry(cfg: &RoverLinkConfig) -> Result<SessionRegistry, rover_link::error::UploadError> {
    let api = cfg
        .api
        .base_url
        .as_deref()
        .map(RoverApi::new)
        .transpose()?;
    Ok(SessionRegistry::new(None, api))
}

async fn run(session: &BridgeSession, matches: &ArgMatches) -> i32 {
    let log_task = tokio::spawn(log_events(session.clone()));

    if let Err(e) = session.connect().await {
        error!(error = %e, "could not connect to rover");
        log_task.abort();
        return 1;
    }

    let code = match matches.subcommand() {
        Some(("monitor", _)) => {
            wait_for_shutdown().await;
            0
        }
        Some(("launch", sub)) => {
            let waypoints: Vec<Waypoint> = sub
                .get_many::<Waypoint>("waypoint")
                .map(|w| w.copied().collect())
                .unwrap_or_default();
            match session.launch_rover(&waypoints).await {
                Ok(()) => {
                    wait_for_shutdown().await;
                    session.stop_rover();
                    0
                }
                Err(e) => {
                    error!(error = %e, "launch failed");
                    1
                }
            }
        }
        Some(("manual", _)) => match session.enable_manual_control().await {
            Ok(()) => {
                wait_for_shutdown().await;
                session.stop_rover();
                0
            }
            Err(e) => {
                error!(error = %e, "manual control failed");
                1
            }
        },
        Some(("stop", _)) => {
            session.stop_rover();
            0
        }
        _ => 2,
    };

    log_task.abort();
    code
}

/// Log state changes until the session goes away or the task is aborted.
async fn log_events(session: BridgeSession) {
    let mut events = session.subscribe();
    loop {
        match events.recv().await {
            Ok(SessionEvent::StateChanged(status)) => info!(
                rover_id = %status.rover_id,
                state = ?status.state,
                connected = status.is_connected,
                navigating = status.mission.is_navigating,
                rover_state = ?status.rover_state,
                "session state changed"
            ),
            Ok(SessionEvent::SensorUpdated(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "event log lagging");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Ctrl-C, or SIGTERM on unix.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("shutdown: SIGINT received"),
            _ = sigterm.recv() => info!("shutdown: SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown: Ctrl-C received");
    }
}
