use std::collections::BTreeMap;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use url::Url;

/// Settings for talking to the registry, read once from the environment at startup.
#[derive(Envconfig, Clone)]
pub struct ClientConfig {
    /// Comma separated list of registry base URLs.
    #[envconfig(from = "ADMIN_URL", default = "")]
    pub registry_urls: RegistryUrls,

    #[envconfig(from = "ADMIN_API_PATH", default = "applications")]
    pub api_path: String,

    #[envconfig(from = "ADMIN_USERNAME")]
    pub username: Option<String>,

    #[envconfig(from = "ADMIN_PASSWORD")]
    pub password: Option<String>,

    #[envconfig(from = "ADMIN_PERIOD_MS", default = "10000")]
    pub period: EnvMsDuration,

    #[envconfig(from = "ADMIN_AUTO_REGISTER", default = "true")]
    pub auto_register: bool,

    #[envconfig(from = "ADMIN_AUTO_DEREGISTER", default = "true")]
    pub auto_deregister: bool,

    /// Stop at the first registry that accepts the registration.
    #[envconfig(from = "ADMIN_REGISTER_ONCE", default = "true")]
    pub register_once: bool,

    #[envconfig(from = "ADMIN_ENABLED", default = "true")]
    pub enabled: bool,

    #[envconfig(from = "ADMIN_CONNECT_TIMEOUT_MS", default = "5000")]
    pub connect_timeout: EnvMsDuration,

    #[envconfig(from = "ADMIN_READ_TIMEOUT_MS", default = "5000")]
    pub read_timeout: EnvMsDuration,

    #[envconfig(nested = true)]
    pub instance: InstanceConfig,
}

impl ClientConfig {
    /// The client only runs when switched on and pointed at a registry.
    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.registry_urls.is_empty()
    }

    pub fn scheduling(&self) -> SchedulingConfig {
        SchedulingConfig {
            period: self.period.0,
            auto_register: self.auto_register,
            auto_deregister: self.auto_deregister,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            registry_urls: RegistryUrls::default(),
            api_path: "applications".to_owned(),
            username: None,
            password: None,
            period: EnvMsDuration(time::Duration::from_secs(10)),
            auto_register: true,
            auto_deregister: true,
            register_once: true,
            enabled: true,
            connect_timeout: EnvMsDuration(time::Duration::from_secs(5)),
            read_timeout: EnvMsDuration(time::Duration::from_secs(5)),
            instance: InstanceConfig::default(),
        }
    }
}

/// How this instance describes itself to the registry.
#[derive(Envconfig, Clone, Debug)]
pub struct InstanceConfig {
    #[envconfig(from = "INSTANCE_NAME", default = "application")]
    pub name: String,

    #[envconfig(from = "INSTANCE_SERVICE_URL")]
    pub service_url: Option<Url>,

    #[envconfig(from = "INSTANCE_MANAGEMENT_URL")]
    pub management_url: Option<Url>,

    #[envconfig(from = "INSTANCE_HEALTH_URL")]
    pub health_url: Option<Url>,

    #[envconfig(from = "INSTANCE_SERVICE_BASE_URL")]
    pub service_base_url: Option<Url>,

    #[envconfig(from = "INSTANCE_MANAGEMENT_BASE_URL")]
    pub management_base_url: Option<Url>,

    #[envconfig(from = "INSTANCE_PREFER_IP", default = "false")]
    pub prefer_ip: bool,

    #[envconfig(from = "INSTANCE_METADATA", default = "")]
    pub metadata: Metadata,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: "application".to_owned(),
            service_url: None,
            management_url: None,
            health_url: None,
            service_base_url: None,
            management_base_url: None,
            prefer_ip: false,
            metadata: Metadata::default(),
        }
    }
}

/// The subset of `ClientConfig` the scheduler acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingConfig {
    pub period: time::Duration,
    pub auto_register: bool,
    pub auto_deregister: bool,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            period: time::Duration::from_secs(10),
            auto_register: true,
            auto_deregister: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistryUrls(pub Vec<Url>);

impl RegistryUrls {
    pub fn iter(&self) -> std::slice::Iter<'_, Url> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseRegistryUrlsError(pub String);

impl FromStr for RegistryUrls {
    type Err = ParseRegistryUrlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let urls = s
            .split(',')
            .map(str::trim)
            .filter(|candidate| !candidate.is_empty())
            .map(|candidate| {
                Url::parse(candidate).map_err(|_| ParseRegistryUrlsError(candidate.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RegistryUrls(urls))
    }
}

/// Free-form key/value pairs sent along with the registration, parsed from `k1=v1,k2=v2`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(pub BTreeMap<String, String>);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseMetadataError(pub String);

impl FromStr for Metadata {
    type Err = ParseMetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries = BTreeMap::new();

        for pair in s.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
            match pair.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    entries.insert(key.trim().to_owned(), value.trim().to_owned());
                }
                _ => return Err(ParseMetadataError(pair.to_owned())),
            }
        }

        Ok(Metadata(entries))
    }
}
