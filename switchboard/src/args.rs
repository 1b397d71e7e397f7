use std::net::SocketAddr;

use clap::Parser;

/// Format-translating LLM gateway.
#[derive(Debug, Parser)]
#[command(name = "switchboard", version, about)]
pub struct Args {
    /// Address to listen on; overrides the PORT environment variable.
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Log filter, e.g. `info` or `server=debug,gateway=debug`.
    #[arg(long, default_value = "info", env = "SWITCHBOARD_LOG")]
    pub log: String,
}
