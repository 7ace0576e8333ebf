use clap::Parser;
use std::time::Duration;
use tonic::transport::Endpoint;
use tonic_health::pb::HealthCheckRequest;
use tonic_health::pb::health_client::HealthClient;

#[derive(Parser, Debug)]
struct Args {
    /// Server to check, for example http://127.0.0.1:8080. TLS is always
    /// used; the scheme only selects the default port.
    #[arg(long)]
    target: String,
    /// Name the server's certificate must carry.
    #[arg(long, default_value = "logcache.example.com")]
    server_name: String,
    /// Service to ask about. The default asks about the server as a whole.
    #[arg(long, default_value = "")]
    service: String,
    /// Keep checking at this interval instead of checking once.
    #[arg(long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let _ = logcache_tls::rustls::crypto::aws_lc_rs::default_provider().install_default();
    let args = Args::parse();

    let creds = logcache::TlsPaths::load()?.credentials_or_exit(&args.server_name);
    let channel = creds.connect_lazy(Endpoint::from_shared(args.target)?);
    let mut client = HealthClient::new(channel);
    loop {
        let request = HealthCheckRequest {
            service: args.service.clone(),
        };
        match client.check(request).await {
            Ok(response) => println!("{:?}", response.into_inner().status()),
            Err(status) => println!("{}", status),
        }
        match args.interval {
            Some(interval) => tokio::time::sleep(interval).await,
            None => return Ok(()),
        }
    }
}
