use clap::Parser;
use tonic::transport::Server;

#[derive(Parser, Debug)]
struct Args {
    /// Name in the certificate that clients of this server verify.
    #[arg(long, default_value = "logcache.example.com")]
    server_name: String,
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    // Required before any TLS configuration is built.
    let _ = logcache_tls::rustls::crypto::aws_lc_rs::default_provider().install_default();
    let args = Args::parse();

    let config = logcache::Config::load()?;
    config.report();
    let creds = config.tls.credentials_or_exit(&args.server_name);

    let (_reporter, health_service) = tonic_health::server::health_reporter();
    let incoming = creds.incoming(config.addr)?;
    log::info!("serving gRPC health over mutual TLS on {}", config.addr);
    Server::builder()
        .add_service(health_service)
        .serve_with_incoming_shutdown(incoming, async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutting down");
        })
        .await?;
    Ok(())
}
