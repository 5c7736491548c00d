use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;

/// Runtime server configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "runtime", about = "Run untrusted scripts in throwaway containers")]
pub struct RuntimeConfig {
    /// Address to bind the HTTP API to
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the HTTP API to
    #[arg(long, env = "SERVER_PORT", default_value_t = 8080)]
    pub port: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl RuntimeConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}
