use std::{fs, ops::RangeInclusive};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug, Clone, Deserialize)]
#[command(name = "server")]
#[command(author, version, about, long_about = None)]
pub struct AppConfig {
    #[clap(long)]
    #[arg(short = 'c')]
    #[serde(default)]
    pub config: Option<String>,
    #[clap(long, env)]
    pub database_url: String,
    #[clap(long, env)]
    #[arg(default_value_t = 50)]
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    #[clap(long, env)]
    #[arg(default_value_t = 30)]
    #[serde(default = "default_min_idle")]
    pub min_idle: u32,
    #[clap(long, env)]
    #[arg(default_value_t = false)]
    #[serde(default)]
    pub run_migrations: bool,
    #[clap(long, env)]
    #[arg(default_value_t = String::from("signet_server=info,server=info"))]
    #[serde(default = "default_rust_log")]
    pub rust_log: String,
    #[clap(long, env)]
    #[arg(value_parser = port_in_range, short = 'p', default_value_t = 30060)]
    #[serde(default = "default_port")]
    pub port: u16,
    #[clap(long, env)]
    pub cors_origin: String,
    /// Issuer written into every token and required back on verify.
    #[clap(long, env)]
    #[arg(default_value_t = String::from("http://127.0.0.1:30060"))]
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Directory holding one PEM file of private material per key.
    #[clap(long, env)]
    #[arg(default_value_t = String::from("keys"))]
    #[serde(default = "default_keys_dir")]
    pub keys_dir: String,
    /// Algorithm for newly rotated-in keys.
    #[clap(long, env)]
    #[arg(default_value_t = String::from("RS256"))]
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Seconds between rotations; 30 days.
    #[clap(long, env)]
    #[arg(default_value_t = 2_592_000)]
    #[serde(default = "default_rotation_interval")]
    pub rotation_interval: i64,
    /// Seconds a superseded key keeps verifying; 7 days.
    #[clap(long, env)]
    #[arg(default_value_t = 604_800)]
    #[serde(default = "default_grace_period")]
    pub grace_period: i64,
    #[clap(long, env)]
    #[arg(default_value_t = 3)]
    #[serde(default = "default_max_keys_in_jwks")]
    pub max_keys_in_jwks: usize,
    /// Seconds between background rotation checks.
    #[clap(long, env)]
    #[arg(default_value_t = 60)]
    #[serde(default = "default_rotation_check_interval")]
    pub rotation_check_interval: u64,
    /// Server-side JWKS rebuild cache, in seconds.
    #[clap(long, env)]
    #[arg(default_value_t = 60)]
    #[serde(default = "default_jwks_cache_ttl")]
    pub jwks_cache_ttl: u64,
    /// Tolerated clock difference on exp/nbf checks, in seconds.
    #[clap(long, env)]
    #[arg(default_value_t = 60)]
    #[serde(default = "default_clock_skew")]
    pub clock_skew: i64,
    /// Default token lifetime when the sign request names none.
    #[clap(long, env)]
    #[arg(default_value_t = 3600)]
    #[serde(default = "default_expiration")]
    pub expiration: i64,
    /// Audiences accepted on verify; empty disables the audience check.
    #[clap(long, env, value_delimiter = ',')]
    #[serde(default)]
    pub allowed_audiences: Vec<String>,
}

fn default_rust_log() -> String {
    String::from("signet_server=info,server=info")
}

fn default_endpoint() -> String {
    String::from("http://127.0.0.1:30060")
}

fn default_port() -> u16 {
    30060
}

fn default_max_size() -> u32 {
    50
}

fn default_min_idle() -> u32 {
    30
}

fn default_keys_dir() -> String {
    String::from("keys")
}

fn default_algorithm() -> String {
    String::from("RS256")
}

fn default_rotation_interval() -> i64 {
    2_592_000
}

fn default_grace_period() -> i64 {
    604_800
}

fn default_max_keys_in_jwks() -> usize {
    3
}

fn default_rotation_check_interval() -> u64 {
    60
}

fn default_jwks_cache_ttl() -> u64 {
    60
}

fn default_clock_skew() -> i64 {
    60
}

fn default_expiration() -> i64 {
    3600
}

const PORT_RANGE: RangeInclusive<usize> = 1..=65535;

fn port_in_range(s: &str) -> Result<u16, String> {
    let port: usize = s
        .parse()
        .map_err(|_| format!("`{s}` isn't a port number"))?;
    if PORT_RANGE.contains(&port) {
        Ok(port as u16)
    } else {
        Err(format!(
            "port not in range {}-{}",
            PORT_RANGE.start(),
            PORT_RANGE.end()
        ))
    }
}

pub fn load(cfg: &str) -> Result<AppConfig> {
    let content =
        fs::read_to_string(cfg).context("could not read config file")?;
    toml::from_str(&content).context("could not parse config file")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_defaults_fill_in() {
        let config: AppConfig = toml::from_str(
            r#"
            database_url = "mysql://localhost/signet"
            cors_origin = "*"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 30060);
        assert_eq!(config.rotation_interval, 2_592_000);
        assert_eq!(config.grace_period, 604_800);
        assert_eq!(config.max_keys_in_jwks, 3);
        assert_eq!(config.jwks_cache_ttl, 60);
        assert_eq!(config.clock_skew, 60);
        assert_eq!(config.expiration, 3600);
        assert_eq!(config.algorithm, "RS256");
        assert!(config.allowed_audiences.is_empty());
    }
}
