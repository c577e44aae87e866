use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, anyhow};

use crate::constants::{DEFAULT_PORT, LISTEN_BACKLOG, RECV_TIMEOUT};

pub const BIND_ENV: &str = "LOADCAST_BIND";
pub const PORT_ENV: &str = "LOADCAST_PORT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_ip: IpAddr,
    pub port: u16,
    pub backlog: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            backlog: LISTEN_BACKLOG,
        }
    }
}

impl ServerConfig {
    /// Read `LOADCAST_BIND` and `LOADCAST_PORT`, falling back to all interfaces on the default port.
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_ip = get_env_or_default(BIND_ENV, "0.0.0.0")?;
        let port = get_env_or_default(PORT_ENV, &DEFAULT_PORT.to_string())?;
        Self::parse(&bind_ip, &port)
    }

    fn parse(bind_ip: &str, port: &str) -> anyhow::Result<Self> {
        Ok(Self {
            bind_ip: bind_ip
                .parse()
                .with_context(|| format!("invalid bind address {bind_ip:?}"))?,
            port: port
                .parse()
                .with_context(|| format!("invalid port {port:?}"))?,
            ..Self::default()
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long to wait for the full response after a request was sent.
    pub recv_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            recv_timeout: RECV_TIMEOUT,
        }
    }
}

pub fn get_env_or_default(key: &str, default: &str) -> anyhow::Result<String> {
    match std::env::var(key) {
        Ok(value) => Ok(value),
        Err(e) => match e {
            std::env::VarError::NotPresent => Ok(default.to_owned()),
            std::env::VarError::NotUnicode(_os_string) => Err(anyhow!(
                "Could not fetch env variable {key} because it is not unicode"
            )),
        },
    }
}
