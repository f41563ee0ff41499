use std::io::Read;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nostr_deflate_client::config::build_config_from_args;
use nostr_deflate_client::driver;
use nostr_deflate_client::error::ClientError;
use nostr_deflate_client::handshake;
use nostr_deflate_client::prefixed::PrefixedStream;
use nostr_deflate_client::probe;
use nostr_deflate_client::sink::EventSink;
use nostr_deflate_client::transport;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if matches!(e, ClientError::UngracefulClose) {
                info!(error = %e, "connection ended");
            } else {
                error!(error = %e, "fatal error");
            }
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run() -> Result<(), ClientError> {
    let mut stdin_text = String::new();
    std::io::stdin()
        .read_to_string(&mut stdin_text)
        .map_err(|e| {
            ClientError::Config(nostr_deflate_client::error::ConfigError::FilterRead(e))
        })?;

    let config = build_config_from_args(std::env::args(), &stdin_text)?;

    let mut raw_transport = transport::connect(&config).await?;
    let relay_info = probe::probe(&mut raw_transport, &config.hostname).await?;
    info!(
        software = relay_info.software.as_deref().unwrap_or("unknown"),
        "relay metadata probe complete"
    );

    let outcome = handshake::upgrade(&mut raw_transport, &config.hostname).await?;
    info!(
        compression = outcome.extensions.compression_active,
        client_no_context_takeover = outcome.extensions.client_no_context_takeover,
        server_no_context_takeover = outcome.extensions.server_no_context_takeover,
        "websocket upgrade complete"
    );

    let (read_half, write_half) = tokio::io::split(raw_transport);
    let prefixed_read = PrefixedStream::new(outcome.prebuffer, read_half);

    let sink = EventSink::open(&config.output).await?;

    driver::run(&config, outcome.extensions, prefixed_read, write_half, sink).await
}
