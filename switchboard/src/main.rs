use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use args::Args;
use clap::Parser;
use server::{ServeConfig, ServeError};
use tokio_util::sync::CancellationToken;

mod args;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            std::process::exit(1);
        }
    };

    let listen_address = args
        .listen
        .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.server.port));

    let shutdown_signal = CancellationToken::new();
    spawn_signal_handler(shutdown_signal.clone());

    let result = server::serve(ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter: args.log,
        version: env!("CARGO_PKG_VERSION").to_string(),
        bound_addr_sender: None,
    })
    .await;

    match result {
        Ok(()) => {}
        Err(error @ ServeError::Init(_)) => {
            log::error!("{error:#}");
            eprintln!("{error:#}");
            std::process::exit(1);
        }
        Err(error @ ServeError::Runtime(_)) => {
            log::error!("{error:#}");
            eprintln!("{error:#}");
            std::process::exit(2);
        }
    }
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    log::error!("failed to install SIGTERM handler: {e}");
                    return;
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        shutdown.cancel();
    });
}
