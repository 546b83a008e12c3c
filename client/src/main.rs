use clap::Parser;
use client::network::Client;
use log::info;
use shared::{ClientConfig, TimeoutPolicy};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Random extra delay per packet, up to this many milliseconds (may reorder packets)
    #[arg(short = 'j', long, default_value = "0")]
    jitter: u64,

    /// What to do when ownership cannot be verified in time (strict or degraded)
    #[arg(short = 'p', long, default_value = "strict")]
    timeout_policy: TimeoutPolicy,

    /// Seconds to wait for the grant behind an attachment
    #[arg(long, default_value = "3")]
    verify_timeout: u64,

    /// Number of inventory slots
    #[arg(long, default_value = "4")]
    slots: usize,
}

impl Args {
    fn config(&self) -> ClientConfig {
        ClientConfig {
            timeout_policy: self.timeout_policy,
            verify_timeout: Duration::from_secs(self.verify_timeout),
            slot_capacity: self.slots,
            ..ClientConfig::default()
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

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 || args.jitter > 0 {
        info!(
            "Simulating {}ms latency with up to {}ms jitter",
            args.fake_ping, args.jitter
        );
    }
    info!("Verification timeout policy: {}", args.timeout_policy);

    let mut client = Client::new(&args.server, args.config(), args.fake_ping, args.jitter).await?;

    client.run().await?;

    Ok(())
}
