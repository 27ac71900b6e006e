use thiserror::Error;

/// A URL describing this instance, or the registry itself, could not be built.
///
/// Raised at construction time this is fatal. Raised while describing the instance for a
/// registration attempt it only fails that attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no registry url configured")]
    MissingRegistryUrl,
    #[error("the server port is not known yet")]
    MissingServerPort,
    #[error("cannot resolve the host of this instance: {0}")]
    UnresolvedHost(String),
    #[error("{url} is not a valid url: {error}")]
    InvalidUrl { url: String, error: url::ParseError },
    #[error("failed to build http client: {0}")]
    HttpClient(String),
}

/// Enumeration of errors for a single call to the registry.
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("failed to reach registry at {url}: {error}")]
    Network { url: String, error: reqwest::Error },
    #[error("registry at {url} responded with {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("failed to decode registry response from {url}: {error}")]
    Decode { url: String, error: reqwest::Error },
    #[error("no registry endpoint to talk to")]
    NoEndpoint,
}
