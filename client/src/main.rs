use clap::Parser;
use client::network::Client;
use client::sync::DEFAULT_LATENCY_ESTIMATE_MS;
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// User identity to play as
    #[arg(short, long)]
    user: String,

    /// Estimated round-trip latency in milliseconds, used to pad predicted
    /// construction finish times
    #[arg(short, long, default_value_t = DEFAULT_LATENCY_ESTIMATE_MS)]
    latency_estimate: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {} as {}", args.server, args.user);

    let mut client = Client::new(&args.server, &args.user, args.latency_estimate).await?;
    println!("Type 'help' for commands");
    client.run().await
}
