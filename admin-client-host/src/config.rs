use std::net::SocketAddr;

use admin_client::application::ServerInfo;
use admin_client::config::ClientConfig;
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    /// `0` picks a free port; the registry is told the one actually bound.
    #[envconfig(from = "BIND_PORT", default = "0")]
    pub port: u16,

    #[envconfig(from = "HOSTNAME", default = "localhost")]
    pub hostname: String,

    #[envconfig(from = "CONTEXT_PATH", default = "/")]
    pub context_path: String,

    #[envconfig(from = "MANAGEMENT_CONTEXT_PATH", default = "")]
    pub management_context_path: String,

    #[envconfig(from = "HEALTH_PATH", default = "health")]
    pub health_path: String,

    #[envconfig(from = "EXPORT_PROMETHEUS", default = "true")]
    pub export_prometheus: bool,

    #[envconfig(nested = true)]
    pub client: ClientConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn index_route(&self) -> String {
        route_path(&[&self.context_path])
    }

    pub fn health_route(&self) -> String {
        route_path(&[
            &self.context_path,
            &self.management_context_path,
            &self.health_path,
        ])
    }

    /// What the admin client gets to know about this server once it listens on `local_addr`.
    pub fn server_info(&self, local_addr: SocketAddr) -> ServerInfo {
        let ip = local_addr.ip();

        ServerInfo {
            hostname: Some(self.hostname.clone()),
            ip_address: (!ip.is_unspecified()).then_some(ip),
            port: Some(local_addr.port()),
            management_port: None,
            context_path: self.context_path.clone(),
            management_context_path: self.management_context_path.clone(),
            health_path: self.health_path.clone(),
        }
    }
}

/// Join path segments into an absolute route, dropping empty segments and duplicate slashes.
pub fn route_path(segments: &[&str]) -> String {
    let joined = segments
        .iter()
        .map(|segment| segment.trim_matches('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    format!("/{}", joined)
}
