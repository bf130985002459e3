use anyhow::Result;
use clap::{Parser, Subcommand};

use signet_client::{version, JwksCache, RemoteVerifier, ServiceAuthConfig, ServiceAuthHelper};

#[derive(Debug, Parser)]
#[command(name = "signetctl")]
#[command(author, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch and print the published key set.
    Jwks {
        #[clap(long, env = "SIGNET_ENDPOINT")]
        endpoint: String,
    },
    /// Request a token for a service subject.
    Sign {
        #[clap(long, env = "SIGNET_ENDPOINT")]
        endpoint: String,
        #[clap(long)]
        sub: String,
        #[clap(long, value_delimiter = ',')]
        aud: Vec<String>,
        #[clap(long)]
        ttl: Option<i64>,
    },
    /// Ask the service for a verdict on a token.
    Verify {
        #[clap(long, env = "SIGNET_ENDPOINT")]
        endpoint: String,
        #[clap(long)]
        token: String,
    },
    #[command(short_flag = 'v')]
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signetctl=info".into()),
        )
        .init();

    let args = Cli::parse();
    let client = reqwest::Client::new();
    match args.command {
        Commands::Jwks { endpoint } => {
            let cache = JwksCache::new(client, &endpoint);
            cache.refresh().await?;
            let jwks = cache.snapshot().await;
            println!("{}", serde_json::to_string_pretty(&jwks)?);
        }
        Commands::Sign {
            endpoint,
            sub,
            aud,
            ttl,
        } => {
            let helper = ServiceAuthHelper::new(
                client,
                ServiceAuthConfig {
                    base_url: endpoint,
                    sub,
                    aud,
                    ttl,
                    refresh_before: 300,
                    attributes: Default::default(),
                },
            );
            println!("{}", helper.token().await?);
        }
        Commands::Verify { endpoint, token } => {
            let verdict =
                RemoteVerifier::new(client, &endpoint).verify(&token).await?;
            println!("status: {}", verdict.status);
            if let Some(claims) = verdict.claims {
                println!("{}", serde_json::to_string_pretty(&claims)?);
            }
        }
        Commands::Version => {
            println!("{}", version());
        }
    }
    Ok(())
}
