use clap::Parser;
use log::info;
use server::network::Server;
use shared::ServerConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maintenance ticks per second (reservation expiry, mirror sweeps)
    #[arg(short, long, default_value = "20")]
    tick_rate: u32,

    /// Maximum number of connected actors
    #[arg(short, long, default_value = "16")]
    max_clients: usize,

    /// How many possessables one actor may hold at once
    #[arg(long, default_value = "1")]
    max_held: usize,

    /// Seconds before an unconfirmed reservation lapses
    #[arg(long, default_value = "5")]
    reservation_timeout: u64,
}

impl Args {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            max_clients: self.max_clients,
            max_held_per_actor: self.max_held.max(1),
            reservation_timeout: Duration::from_secs(self.reservation_timeout),
            tick_duration: Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64),
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    info!("Starting possession server on {}", address);
    let mut server = Server::new(&address, args.config()).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
