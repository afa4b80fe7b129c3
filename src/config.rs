use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::auth::{AcceptAnyBearer, Hs256Verifier, TokenGate};
use crate::model::Device;
use crate::traits::TokenVerifier;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Serve the HTTP API (default).
    Serve,
    /// Segment a single image or every image under a directory.
    Segment { input: PathBuf },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Service configuration. Every option can also come from the environment.
#[derive(Args, Clone, Debug)]
pub struct Config {
    #[arg(short = 'm', long, env = "CHECKPOINT_PATH")]
    pub checkpoint_path: PathBuf,

    #[arg(short, long, env = "DEVICE", default_value = "cpu", value_parser = check_device)]
    pub device: Device,

    #[arg(short, long, env = "OUTPUT_DIR", default_value = "output")]
    pub output_dir: PathBuf,

    #[arg(long, env = "SERVICE_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    pub service_version: String,

    #[arg(long, env = "ENVIRONMENT", default_value = "local")]
    pub environment: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: SocketAddr,

    #[arg(
        long,
        env = "MAX_CONCURRENT_INFERENCES",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_concurrent_inferences: u32,

    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 20 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// Reject requests without credentials instead of treating them as anonymous.
    #[arg(long, env = "AUTH_AUTO_REJECT", default_value_t = true, action = ArgAction::Set)]
    pub auth_auto_reject: bool,

    /// Shared secret for HS256 tokens. Without it any bearer token is accepted.
    #[arg(long, env = "AUTH_HS256_SECRET", hide_env_values = true)]
    pub auth_hs256_secret: Option<String>,

    #[arg(long, env = "AUTH_ISSUER")]
    pub auth_issuer: Option<String>,
}

impl Config {
    pub const fn inference_permits(&self) -> usize {
        self.max_concurrent_inferences as usize
    }

    pub fn token_verifier(&self) -> Arc<dyn TokenVerifier> {
        match &self.auth_hs256_secret {
            Some(secret) => Arc::new(Hs256Verifier::new(
                secret.as_bytes(),
                self.auth_issuer.clone(),
            )),
            None => Arc::new(AcceptAnyBearer),
        }
    }

    pub fn token_gate(&self) -> TokenGate {
        TokenGate::new(self.token_verifier(), self.auth_auto_reject)
    }
}

fn check_device(s: &str) -> Result<Device, String> {
    s.parse()
}
