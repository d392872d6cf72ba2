use anyhow::{bail, Result};
use std::path::PathBuf;
use tello_console::transport::TcpConnector;
use tello_console::{
    ClientError, EventClient, RequestClient, Session, SessionConfig, TransportMode,
};
use tello_shared::Category;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Either facade, chosen by the configured transport mode
enum Console {
    Events(EventClient),
    Requests(RequestClient),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = load_config()?;
    info!("Tello console starting");
    info!("  Intermediary: {}", config.endpoint());
    info!("  Mode: {:?}", config.mode);

    let session = Session::new(TcpConnector::new(config.server.clone()), config.clone());
    subscribe_logging(&session);

    let console = match config.mode {
        TransportMode::Push => Console::Events(EventClient::new(session)),
        TransportMode::RequestResponse => Console::Requests(RequestClient::new(session)),
    };

    info!("Commands: connect, disconnect, move <dir>, rotate <dir>, flip <dir>, state, takeoff, land, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        if words[0] == "quit" || words[0] == "exit" {
            break;
        }
        if let Err(e) = console.run(&words).await {
            error!("{}", e);
        }
    }

    if let Err(e) = console.disconnect().await {
        warn!("Disconnect on exit failed: {}", e);
    }
    info!("Tello console stopped");
    Ok(())
}

/// Config path from the first argument or `TELLO_CONFIG`, else defaults
fn load_config() -> Result<SessionConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TELLO_CONFIG").ok())
        .map(PathBuf::from);

    match path {
        Some(path) => {
            info!("Loading config from {}", path.display());
            SessionConfig::load(&path)
        }
        None => Ok(SessionConfig::default()),
    }
}

fn subscribe_logging(session: &Session) {
    let router = session.router();
    for category in Category::ALL {
        router.subscribe(category, move |envelope| {
            if envelope.is_success() {
                info!("[{}] {}", category, envelope.message);
            } else {
                warn!("[{}] {}: {}", category, envelope.status, envelope.message);
            }
        });
    }
    router.subscribe_telemetry(|state| {
        info!(
            "Telemetry: battery {}%, height {}cm, speed {:.1}, temp {:.1}C, flight time {}s",
            state.battery_percentage,
            state.height,
            state.total_speed,
            state.average_temperature,
            state.time_of_flight
        );
    });
}

impl Console {
    async fn run(&self, words: &[&str]) -> Result<()> {
        let argument = words.get(1).copied();
        match (self, words[0], argument) {
            (_, "connect", _) => {
                let message = match self {
                    Console::Events(client) => client.connect().await.map(|_| String::new())?,
                    Console::Requests(client) => client.connect().await?,
                };
                info!("Connected {}", message);
            }
            (_, "disconnect", _) => self.disconnect().await?,
            (Console::Events(client), "move", Some(direction)) => client.move_to(direction).await?,
            (Console::Events(client), "rotate", Some(direction)) => client.rotate(direction).await?,
            (Console::Events(client), "flip", Some(direction)) => client.flip(direction).await?,
            (Console::Events(client), "state", _) => client.request_state().await?,
            (Console::Requests(client), "move", Some(direction)) => {
                report(client.move_to(direction).await)?
            }
            (Console::Requests(client), "rotate", Some(direction)) => {
                report(client.rotate(direction).await)?
            }
            (Console::Requests(client), "flip", Some(direction)) => {
                report(client.flip(direction).await)?
            }
            (Console::Requests(client), "takeoff", _) => report(client.takeoff().await)?,
            (Console::Requests(client), "land", _) => report(client.land().await)?,
            (Console::Requests(client), "state", _) => {
                let state = client.request_state().await?;
                info!("{}", serde_json::to_string(&state)?);
            }
            (Console::Events(_), "takeoff" | "land", _) => {
                bail!("`{}` needs mode = \"request-response\"", words[0])
            }
            (_, "move" | "rotate" | "flip", None) => bail!("`{}` needs a direction", words[0]),
            (_, other, _) => bail!("Unknown command `{}`", other),
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        match self {
            Console::Events(client) => client.disconnect().await,
            Console::Requests(client) => client.disconnect().await,
        }
    }
}

fn report(result: Result<String, ClientError>) -> Result<(), ClientError> {
    let message = result?;
    info!("{}", message);
    Ok(())
}
