use std::time::Duration;

use clap::Parser;

use abserve::{ClientFactory, Server, ServerConfig};

/// Demo HTTP server for A/B tests and feature flags.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "ABSERVE_PORT", default_value_t = ServerConfig::DEFAULT_PORT)]
    port: u16,

    /// URL of the remote datafile.
    #[arg(long, env = "ABSERVE_DATAFILE_URL", default_value = ServerConfig::DEFAULT_DATAFILE_URL)]
    datafile_url: String,

    /// Seconds between two datafile fetches.
    #[arg(long, env = "ABSERVE_REFRESH_INTERVAL", default_value_t = 30)]
    refresh_interval: u64,

    /// URL that events are posted to.
    #[arg(long, env = "ABSERVE_EVENT_ENDPOINT", default_value = "https://logx.optimizely.com/v1/events")]
    event_endpoint: String,

    /// Session lifetime in seconds.
    #[arg(long, env = "ABSERVE_SESSION_TTL", default_value_t = 60_000)]
    session_ttl: u64,
}

#[tokio::main]
async fn main() -> abserve::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::debug!(target: "abserve", "starting with {args:?}");

    let mut config = ServerConfig::new();
    config
        .port(args.port)
        .datafile_url(args.datafile_url)
        .refresh_interval(Duration::from_secs(args.refresh_interval))
        .event_endpoint(args.event_endpoint)
        .session_ttl(Duration::from_secs(args.session_ttl));

    let server = Server::new(config)?;
    let poller = server.start_poller(ClientFactory::new())?;

    let result = server.run().await;
    poller.stop();
    result
}
