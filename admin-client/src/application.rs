use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::InstanceConfig;
use crate::error::ConfigurationError;

/// What the registry gets told about this running instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDescription {
    pub name: String,
    pub management_url: Url,
    pub health_url: Url,
    pub service_url: Url,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Network facts about the embedding server. Most of them are only known once the server
/// has bound its listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub hostname: Option<String>,
    pub ip_address: Option<IpAddr>,
    pub port: Option<u16>,
    /// Only set when management endpoints are served on their own port.
    pub management_port: Option<u16>,
    pub context_path: String,
    pub management_context_path: String,
    pub health_path: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            hostname: None,
            ip_address: None,
            port: None,
            management_port: None,
            context_path: "/".to_owned(),
            management_context_path: String::new(),
            health_path: "health".to_owned(),
        }
    }
}

pub trait ServerInfoProvider: Send + Sync {
    fn server_info(&self) -> ServerInfo;
}

/// A `ServerInfoProvider` the host keeps a clone of, to fill in the port once it is bound.
#[derive(Debug, Clone, Default)]
pub struct SharedServerInfo {
    inner: Arc<RwLock<ServerInfo>>,
}

impl SharedServerInfo {
    pub fn new(info: ServerInfo) -> Self {
        Self {
            inner: Arc::new(RwLock::new(info)),
        }
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ServerInfo),
    {
        // Poisoning only means an earlier update panicked, the info itself stays usable.
        let mut info = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut info);
    }

    pub fn set_port(&self, port: u16) {
        self.update(|info| info.port = Some(port));
    }
}

impl ServerInfoProvider for SharedServerInfo {
    fn server_info(&self) -> ServerInfo {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ServerInfoProvider for ServerInfo {
    fn server_info(&self) -> ServerInfo {
        self.clone()
    }
}

/// Produces a fresh `InstanceDescription` for every registration attempt.
pub trait ApplicationFactory: Send + Sync {
    fn describe(&self) -> Result<InstanceDescription, ConfigurationError>;
}

/// Builds the description from `InstanceConfig` overrides, falling back to what the
/// server info provider reports.
pub struct DefaultApplicationFactory {
    instance: InstanceConfig,
    server: Arc<dyn ServerInfoProvider>,
}

impl DefaultApplicationFactory {
    pub fn new(instance: InstanceConfig, server: Arc<dyn ServerInfoProvider>) -> Self {
        Self { instance, server }
    }

    fn host(&self, server: &ServerInfo) -> Result<String, ConfigurationError> {
        if self.instance.prefer_ip {
            return server.ip_address.map(url_host).ok_or_else(|| {
                ConfigurationError::UnresolvedHost("no ip address available".to_owned())
            });
        }

        match (&server.hostname, server.ip_address) {
            (Some(hostname), _) if !hostname.is_empty() => Ok(hostname.clone()),
            (_, Some(ip)) => Ok(url_host(ip)),
            _ => Err(ConfigurationError::UnresolvedHost(
                "neither hostname nor ip address available".to_owned(),
            )),
        }
    }

    fn service_url(&self, server: &ServerInfo) -> Result<Url, ConfigurationError> {
        if let Some(url) = &self.instance.service_url {
            return Ok(url.clone());
        }

        let base = match &self.instance.service_base_url {
            Some(base) => base.clone(),
            None => {
                let port = server.port.ok_or(ConfigurationError::MissingServerPort)?;
                parse_url(format!("http://{}:{}", self.host(server)?, port))?
            }
        };

        join_path(&base, &server.context_path)
    }

    fn management_url(
        &self,
        server: &ServerInfo,
        service_url: &Url,
    ) -> Result<Url, ConfigurationError> {
        if let Some(url) = &self.instance.management_url {
            return Ok(url.clone());
        }

        if let Some(base) = &self.instance.management_base_url {
            return join_path(base, &server.management_context_path);
        }

        match server.management_port {
            Some(port) if Some(port) != server.port => {
                let base = parse_url(format!("http://{}:{}", self.host(server)?, port))?;
                join_path(&base, &server.management_context_path)
            }
            _ => join_path(service_url, &server.management_context_path),
        }
    }
}

impl ApplicationFactory for DefaultApplicationFactory {
    fn describe(&self) -> Result<InstanceDescription, ConfigurationError> {
        let server = self.server.server_info();

        let service_url = self.service_url(&server)?;
        let management_url = self.management_url(&server, &service_url)?;
        let health_url = match &self.instance.health_url {
            Some(url) => url.clone(),
            None => join_path(&management_url, &server.health_path)?,
        };

        Ok(InstanceDescription {
            name: self.instance.name.clone(),
            management_url,
            health_url,
            service_url,
            metadata: self.instance.metadata.0.clone(),
        })
    }
}

/// Append `path` to `base`, keeping exactly one `/` between them.
pub fn join_path(base: &Url, path: &str) -> Result<Url, ConfigurationError> {
    let segment = path.trim_matches('/');
    if segment.is_empty() {
        return Ok(base.clone());
    }

    parse_url(format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        segment
    ))
}

fn parse_url(url: String) -> Result<Url, ConfigurationError> {
    Url::parse(&url).map_err(|error| ConfigurationError::InvalidUrl { url, error })
}

fn url_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(ip) => ip.to_string(),
        IpAddr::V6(ip) => format!("[{}]", ip),
    }
}
