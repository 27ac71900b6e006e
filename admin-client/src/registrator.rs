use std::fmt;

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::application::{join_path, InstanceDescription};
use crate::config::ClientConfig;
use crate::error::{ConfigurationError, RegistrationError};

/// Opaque token the registry hands out for a registered instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationId(pub String);

impl RegistrationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegistrationId {
    fn from(id: &str) -> Self {
        RegistrationId(id.to_owned())
    }
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    id: String,
}

/// Single-shot calls against the registry. Retrying is up to the caller.
#[async_trait]
pub trait Registrator: Send + Sync {
    async fn register(
        &self,
        description: &InstanceDescription,
    ) -> Result<RegistrationId, RegistrationError>;

    /// An entry the registry no longer knows about counts as removed.
    async fn deregister(&self, id: &RegistrationId) -> Result<(), RegistrationError>;
}

/// `Registrator` speaking JSON over HTTP to every configured registry.
pub struct ApplicationRegistrator {
    client: reqwest::Client,
    /// Registration endpoints, one per registry, in configuration order.
    endpoints: Vec<Url>,
    credentials: Option<(String, Option<String>)>,
    register_once: bool,
}

impl ApplicationRegistrator {
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigurationError> {
        if config.registry_urls.is_empty() {
            return Err(ConfigurationError::MissingRegistryUrl);
        }

        let endpoints = config
            .registry_urls
            .iter()
            .map(|registry_url| join_path(registry_url, &config.api_path))
            .collect::<Result<Vec<_>, _>>()?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("admin-client/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout.0)
            .timeout(config.read_timeout.0)
            .build()
            .map_err(|error| ConfigurationError::HttpClient(error.to_string()))?;

        let credentials = config
            .username
            .as_ref()
            .map(|username| (username.clone(), config.password.clone()));

        Ok(Self {
            client,
            endpoints,
            credentials,
            register_once: config.register_once,
        })
    }

    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((username, password)) => request.basic_auth(username, password.as_ref()),
            None => request,
        }
    }

    async fn register_with(
        &self,
        endpoint: &Url,
        description: &InstanceDescription,
    ) -> Result<RegistrationId, RegistrationError> {
        let request = self.authorize(self.client.post(endpoint.clone()).json(description));

        let response = request
            .send()
            .await
            .map_err(|error| RegistrationError::Network {
                url: endpoint.to_string(),
                error,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistrationError::HttpStatus {
                url: endpoint.to_string(),
                status,
            });
        }

        let body = response
            .json::<RegistrationResponse>()
            .await
            .map_err(|error| RegistrationError::Decode {
                url: endpoint.to_string(),
                error,
            })?;

        Ok(RegistrationId(body.id))
    }

    async fn deregister_with(
        &self,
        endpoint: &Url,
        id: &RegistrationId,
    ) -> Result<(), RegistrationError> {
        let url = instance_url(endpoint, id);
        let request = self.authorize(self.client.delete(url.clone()));

        let response = request
            .send()
            .await
            .map_err(|error| RegistrationError::Network {
                url: url.to_string(),
                error,
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(url = %url, "registration already removed from registry");
                Ok(())
            }
            status => Err(RegistrationError::HttpStatus {
                url: url.to_string(),
                status,
            }),
        }
    }
}

#[async_trait]
impl Registrator for ApplicationRegistrator {
    async fn register(
        &self,
        description: &InstanceDescription,
    ) -> Result<RegistrationId, RegistrationError> {
        let mut registered: Option<RegistrationId> = None;
        let mut failure: Option<RegistrationError> = None;

        for endpoint in &self.endpoints {
            match self.register_with(endpoint, description).await {
                Ok(id) => {
                    debug!(endpoint = %endpoint, id = %id, "registered with registry");
                    if registered.is_none() {
                        registered = Some(id);
                    }
                    if self.register_once {
                        break;
                    }
                }
                Err(error) => {
                    if self.endpoints.len() > 1 {
                        warn!(endpoint = %endpoint, "failed to register with registry: {}", error);
                    }
                    failure = Some(error);
                }
            }
        }

        match (registered, failure) {
            (Some(id), _) => Ok(id),
            (None, Some(error)) => Err(error),
            (None, None) => Err(RegistrationError::NoEndpoint),
        }
    }

    async fn deregister(&self, id: &RegistrationId) -> Result<(), RegistrationError> {
        let mut deregistered = false;
        let mut failure: Option<RegistrationError> = None;

        for endpoint in &self.endpoints {
            match self.deregister_with(endpoint, id).await {
                Ok(()) => {
                    deregistered = true;
                    if self.register_once {
                        break;
                    }
                }
                Err(error) => {
                    if self.endpoints.len() > 1 {
                        warn!(endpoint = %endpoint, "failed to deregister from registry: {}", error);
                    }
                    failure = Some(error);
                }
            }
        }

        match (deregistered, failure) {
            (true, _) => Ok(()),
            (false, Some(error)) => Err(error),
            (false, None) => Err(RegistrationError::NoEndpoint),
        }
    }
}

/// `{endpoint}/{id}`, with the id percent-encoded as a single path segment.
fn instance_url(endpoint: &Url, id: &RegistrationId) -> Url {
    let mut url = endpoint.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(id.as_str());
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvMsDuration, RegistryUrls};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time;

    fn description() -> InstanceDescription {
        InstanceDescription {
            name: "billing".to_owned(),
            management_url: Url::parse("http://billing:8080/manage").unwrap(),
            health_url: Url::parse("http://billing:8080/manage/health").unwrap(),
            service_url: Url::parse("http://billing:8080/").unwrap(),
            metadata: BTreeMap::from([("zone".to_owned(), "eu".to_owned())]),
        }
    }

    fn config(registry_urls: &[String]) -> ClientConfig {
        ClientConfig {
            registry_urls: RegistryUrls(
                registry_urls
                    .iter()
                    .map(|url| Url::parse(url).unwrap())
                    .collect(),
            ),
            ..ClientConfig::default()
        }
    }

    fn registrator(config: &ClientConfig) -> ApplicationRegistrator {
        ApplicationRegistrator::new(config).expect("failed to build registrator")
    }

    #[test]
    fn test_new_requires_registry_url() {
        let result = ApplicationRegistrator::new(&ClientConfig::default());

        assert!(matches!(result, Err(ConfigurationError::MissingRegistryUrl)));
    }

    #[test]
    fn test_endpoints_use_api_path() {
        let config = ClientConfig {
            api_path: "/api/applications/".to_owned(),
            ..config(&["http://admin:8080/".to_owned()])
        };

        let registrator = registrator(&config);

        assert_eq!(
            registrator.endpoints()[0].as_str(),
            "http://admin:8080/api/applications"
        );
    }

    #[test]
    fn test_instance_url_encodes_id() {
        let endpoint = Url::parse("http://admin:8080/applications").unwrap();

        assert_eq!(
            instance_url(&endpoint, &RegistrationId::from("abc123")).as_str(),
            "http://admin:8080/applications/abc123"
        );
        assert_eq!(
            instance_url(&endpoint, &RegistrationId::from("a/b c")).as_str(),
            "http://admin:8080/applications/a%2Fb%20c"
        );
    }

    #[tokio::test]
    async fn test_register_posts_description() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/applications")
                    .header("content-type", "application/json")
                    .json_body(json!({
                        "name": "billing",
                        "managementUrl": "http://billing:8080/manage",
                        "healthUrl": "http://billing:8080/manage/health",
                        "serviceUrl": "http://billing:8080/",
                        "metadata": {"zone": "eu"}
                    }));
                then.status(201).json_body(json!({"id": "abc123"}));
            })
            .await;

        let registrator = registrator(&config(&[server.base_url()]));
        let id = registrator
            .register(&description())
            .await
            .expect("failed to register");

        assert_eq!(id, RegistrationId::from("abc123"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_register_twice_is_accepted() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/applications");
                then.status(200).json_body(json!({"id": "abc123"}));
            })
            .await;

        let registrator = registrator(&config(&[server.base_url()]));
        let first = registrator.register(&description()).await.unwrap();
        let second = registrator.register(&description()).await.unwrap();

        assert_eq!(first, second);
        mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_register_with_basic_auth() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                // base64("user:pass")
                when.method(POST)
                    .path("/applications")
                    .header("authorization", "Basic dXNlcjpwYXNz");
                then.status(201).json_body(json!({"id": "abc123"}));
            })
            .await;

        let config = ClientConfig {
            username: Some("user".to_owned()),
            password: Some("pass".to_owned()),
            ..config(&[server.base_url()])
        };

        registrator(&config)
            .register(&description())
            .await
            .expect("failed to register");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_register_rejected_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/applications");
                then.status(503);
            })
            .await;

        let error = registrator(&config(&[server.base_url()]))
            .register(&description())
            .await
            .unwrap_err();

        match error {
            RegistrationError::HttpStatus { status, .. } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE)
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_register_malformed_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/applications");
                then.status(201).body("registered!");
            })
            .await;

        let error = registrator(&config(&[server.base_url()]))
            .register(&description())
            .await
            .unwrap_err();

        assert!(matches!(error, RegistrationError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_register_unreachable_registry() {
        let error = registrator(&config(&["http://127.0.0.1:1".to_owned()]))
            .register(&description())
            .await
            .unwrap_err();

        assert!(matches!(error, RegistrationError::Network { .. }));
    }

    #[tokio::test]
    async fn test_register_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/applications");
                then.status(201)
                    .json_body(json!({"id": "abc123"}))
                    .delay(time::Duration::from_secs(2));
            })
            .await;

        let config = ClientConfig {
            read_timeout: EnvMsDuration(time::Duration::from_millis(100)),
            ..config(&[server.base_url()])
        };

        let error = registrator(&config)
            .register(&description())
            .await
            .unwrap_err();

        match error {
            RegistrationError::Network { error, .. } => assert!(error.is_timeout()),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_register_once_stops_at_first_success() {
        let failing = MockServer::start_async().await;
        let failing_mock = failing
            .mock_async(|when, then| {
                when.method(POST).path("/applications");
                then.status(500);
            })
            .await;
        let first = MockServer::start_async().await;
        let first_mock = first
            .mock_async(|when, then| {
                when.method(POST).path("/applications");
                then.status(201).json_body(json!({"id": "first"}));
            })
            .await;
        let second = MockServer::start_async().await;
        let second_mock = second
            .mock_async(|when, then| {
                when.method(POST).path("/applications");
                then.status(201).json_body(json!({"id": "second"}));
            })
            .await;

        let registrator = registrator(&config(&[
            failing.base_url(),
            first.base_url(),
            second.base_url(),
        ]));
        let id = registrator.register(&description()).await.unwrap();

        assert_eq!(id, RegistrationId::from("first"));
        failing_mock.assert_hits_async(1).await;
        first_mock.assert_hits_async(1).await;
        second_mock.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_register_with_every_registry() {
        let first = MockServer::start_async().await;
        let first_mock = first
            .mock_async(|when, then| {
                when.method(POST).path("/applications");
                then.status(201).json_body(json!({"id": "first"}));
            })
            .await;
        let second = MockServer::start_async().await;
        let second_mock = second
            .mock_async(|when, then| {
                when.method(POST).path("/applications");
                then.status(201).json_body(json!({"id": "second"}));
            })
            .await;

        let config = ClientConfig {
            register_once: false,
            ..config(&[first.base_url(), second.base_url()])
        };
        let id = registrator(&config)
            .register(&description())
            .await
            .unwrap();

        assert_eq!(id, RegistrationId::from("first"));
        first_mock.assert_hits_async(1).await;
        second_mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_deregister() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/applications/abc123");
                then.status(204);
            })
            .await;

        registrator(&config(&[server.base_url()]))
            .deregister(&RegistrationId::from("abc123"))
            .await
            .expect("failed to deregister");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_deregister_not_found_is_success() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/applications/gone");
                then.status(404);
            })
            .await;

        let result = registrator(&config(&[server.base_url()]))
            .deregister(&RegistrationId::from("gone"))
            .await;

        assert!(result.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_deregister_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/applications/abc123");
                then.status(500);
            })
            .await;

        let error = registrator(&config(&[server.base_url()]))
            .deregister(&RegistrationId::from("abc123"))
            .await
            .unwrap_err();

        assert!(matches!(error, RegistrationError::HttpStatus { .. }));
    }
}
