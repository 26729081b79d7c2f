//! The Engine API client: pooled requests, version detection and auth headers

pub mod endpoints;
pub mod request;

pub use endpoints::*;
pub use request::{Request, Response};

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use http::header::{HOST, HeaderValue, USER_AGENT};
use http_body_util::Full;
use hyper::body::Incoming;

use crate::auth::{AuthConfigs, CredentialProvider};
use crate::config::{
    ApiVersion, ClientConfig, DEFAULT_API_VERSION, Host, MINIMUM_API_VERSION, Scheme,
};
use crate::error::DockerError;
use crate::parser::host::parse_host;
use crate::parser::version;
use crate::pool::{HttpConnector, Lease, Pool, PoolConfig, PoolStatus};
use crate::stream::{ResponseBody, StreamingResponse};
use crate::transport::Transport;

use request::{api_error, check_status};

/// A Docker Engine API client
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    host: Host,
    /// Pool key, every connection of a client goes to the same daemon
    key: String,
    transport: Arc<Transport>,
    pool: Pool<HttpConnector>,
    /// Set once when the client is built
    api_version: OnceLock<String>,
    config: ClientConfig,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.inner.key)
            .field("api_version", &self.api_version())
            .field("transport", &self.inner.transport.name())
            .field("pool", &self.inner.pool)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connect to the daemon described by `config`
    ///
    /// With [`ApiVersion::Auto`] this performs a `GET /version` to pick the version;
    /// otherwise no request is made until the first call.
    pub async fn connect(config: ClientConfig) -> Result<Self, DockerError> {
        Self::build(config, None).await
    }

    /// Like [`Client::connect`], sending registry credentials from `credentials`
    pub async fn connect_with_credentials(
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, DockerError> {
        Self::build(config, Some(credentials)).await
    }

    /// Connect using `DOCKER_HOST` and friends, with credentials from the Docker config file
    ///
    /// An unreadable config file is logged and skipped.
    pub async fn from_env() -> Result<Self, DockerError> {
        let config = ClientConfig::from_env()?;
        let credentials: Option<Arc<dyn CredentialProvider>> = match AuthConfigs::load(None) {
            Ok(auths) => Some(Arc::new(auths)),
            Err(e) => {
                log::warn!("Ignoring Docker config file: {}", e);
                None
            }
        };
        Self::build(config, credentials).await
    }

    #[tracing::instrument(skip_all, fields(host = %config.host))]
    async fn build(
        config: ClientConfig,
        credentials: Option<Arc<dyn CredentialProvider>>,
    ) -> Result<Self, DockerError> {
        let host = parse_host(&config.host, config.tls.is_some())?;
        if config.tls.is_some() && !matches!(host.scheme(), Scheme::Http | Scheme::Https) {
            return Err(DockerError::TlsParameter(format!(
                "TLS is only supported for TCP hosts, not {}",
                host
            )));
        }

        let transport = Arc::new(Transport::new(&host, &config)?);
        let pool = Pool::new(
            HttpConnector::new(Arc::clone(&transport), config.connect_timeout),
            PoolConfig {
                max_size: config.max_pool_size,
                block: config.pool_block,
                timeout: config.pool_timeout,
            },
        );

        let fixed = match &config.api_version {
            ApiVersion::Fixed(fixed) if !version::is_valid(fixed) => {
                return Err(DockerError::InvalidVersion(format!(
                    "{} is not a valid API version",
                    fixed
                )));
            }
            ApiVersion::Fixed(fixed) => Some(fixed.clone()),
            ApiVersion::Auto => None,
        };

        let client = Client {
            inner: Arc::new(Inner {
                key: host.to_string(),
                host,
                transport,
                pool,
                api_version: OnceLock::new(),
                config,
                credentials,
            }),
        };

        let api_version = match fixed {
            Some(fixed) => fixed,
            None => client.detect_version().await?,
        };
        log::debug!(
            "Client for {} speaks API version {}",
            client.inner.key,
            api_version
        );
        // only unversioned requests have been made so far
        let _ = client.inner.api_version.set(api_version);

        Ok(client)
    }

    async fn detect_version(&self) -> Result<String, DockerError> {
        let response = self.request(Request::get("/version").unversioned()).await?;
        let detected: bollard::models::SystemVersion = response.json()?;

        let Some(api_version) = detected.api_version else {
            return Err(DockerError::InvalidVersion(
                "the daemon did not report an API version".to_string(),
            ));
        };
        if !version::is_valid(&api_version) {
            return Err(DockerError::InvalidVersion(format!(
                "the daemon reported an invalid API version: {}",
                api_version
            )));
        }
        if version::version_lt(&api_version, MINIMUM_API_VERSION) {
            return Err(DockerError::InvalidVersion(format!(
                "API versions below {} are not supported (daemon speaks {})",
                MINIMUM_API_VERSION, api_version
            )));
        }

        log::debug!("Detected API version {}", api_version);
        Ok(api_version)
    }

    #[must_use]
    pub fn host(&self) -> &Host {
        &self.inner.host
    }

    #[must_use]
    pub fn api_version(&self) -> &str {
        self.inner
            .api_version
            .get()
            .map_or(DEFAULT_API_VERSION, String::as_str)
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn pool_status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    pub(crate) fn credentials(&self) -> Option<&dyn CredentialProvider> {
        self.inner.credentials.as_deref()
    }

    /// Fail unless the negotiated version is at least `minimum`
    pub fn check_min_version(&self, feature: &str, minimum: &str) -> Result<(), DockerError> {
        if version::version_lt(self.api_version(), minimum) {
            return Err(DockerError::InvalidVersion(format!(
                "{} is not available for API version < {}",
                feature, minimum
            )));
        }
        Ok(())
    }

    /// Send `request` and read the whole response
    ///
    /// The exchange, from pool checkout to the last body byte, is bounded by the
    /// configured request timeout.
    ///
    /// # Errors
    ///
    /// Non-2xx responses become [`DockerError::Api`].
    #[tracing::instrument(skip_all, fields(method = %request.method(), path = request.path()))]
    pub async fn request(&self, request: Request) -> Result<Response, DockerError> {
        let timeout = self.inner.config.timeout;
        let exchange = async {
            let (parts, incoming, lease) = self.send(request).await?;
            let body = StreamingResponse::new(
                parts.status,
                parts.headers.clone(),
                ResponseBody::new(incoming, lease, None),
            )
            .bytes()
            .await?;
            check_status(parts.status, &body)?;
            Ok(Response {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(response) => response,
            Err(_) => Err(request_timeout(timeout)),
        }
    }

    /// Send `request` and hand back the body unread
    ///
    /// Only the wait for the response head is bounded by the request timeout; reads
    /// use the stream read timeout. Error bodies are read in full.
    #[tracing::instrument(skip_all, fields(method = %request.method(), path = request.path()))]
    pub async fn stream(&self, request: Request) -> Result<StreamingResponse, DockerError> {
        let timeout = self.inner.config.timeout;
        let (parts, incoming, lease) = match tokio::time::timeout(timeout, self.send(request)).await
        {
            Ok(sent) => sent?,
            Err(_) => return Err(request_timeout(timeout)),
        };

        if !parts.status.is_success() {
            let body = ResponseBody::new(incoming, lease, Some(timeout));
            let body = StreamingResponse::new(parts.status, parts.headers, body)
                .bytes()
                .await?;
            return Err(api_error(parts.status, &body));
        }

        let body = ResponseBody::new(incoming, lease, self.inner.config.stream_read_timeout);
        Ok(StreamingResponse::new(parts.status, parts.headers, body))
    }

    async fn send(
        &self,
        request: Request,
    ) -> Result<(http::response::Parts, Incoming, Lease), DockerError> {
        let target = request.target(self.inner.host.path_prefix(), self.api_version());
        let (method, headers, body) = request.into_parts();

        let mut builder = hyper::Request::builder()
            .method(method)
            .uri(&target)
            .header(HOST, self.inner.host.authority())
            .header(USER_AGENT, self.user_agent()?);
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }
        let outgoing = builder
            .body(Full::new(body))
            .map_err(|e| DockerError::InvalidRequest(format!("{}: {}", target, e)))?;

        let mut lease = self.inner.pool.get(&self.inner.key).await?;
        log::trace!("{} {} on connection #{}", outgoing.method(), target, lease.id());

        if let Err(e) = lease.sender().ready().await {
            lease.discard().await;
            return Err(self.send_error(e));
        }
        match lease.sender().send_request(outgoing).await {
            Ok(response) => {
                let (parts, incoming) = response.into_parts();
                Ok((parts, incoming, lease))
            }
            Err(e) => {
                lease.discard().await;
                Err(self.send_error(e))
            }
        }
    }

    fn user_agent(&self) -> Result<HeaderValue, DockerError> {
        HeaderValue::from_str(&self.inner.config.user_agent)
            .map_err(|e| DockerError::InvalidRequest(format!("invalid user agent: {}", e)))
    }

    fn send_error(&self, err: hyper::Error) -> DockerError {
        if err.is_closed() || err.is_incomplete_message() || err.is_canceled() {
            DockerError::connection(self.inner.key.clone(), std::io::Error::other(err))
        } else {
            DockerError::Http(err)
        }
    }

    /// Close every pooled connection and shared transport state
    ///
    /// Requests made afterwards fail with [`DockerError::PoolClosed`]. Close failures
    /// are collected rather than stopping at the first.
    #[tracing::instrument(skip(self), fields(host = %self.inner.key))]
    pub async fn close(&self) -> Result<(), DockerError> {
        let mut errors = Vec::new();
        if let Err(e) = self.inner.pool.close_all().await {
            match e {
                DockerError::Close(inner) => errors.extend(inner),
                other => errors.push(other),
            }
        }
        if let Err(e) = self.inner.transport.shutdown().await {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            log::warn!("{} error(s) while closing the client", errors.len());
            Err(DockerError::Close(errors))
        }
    }
}

fn request_timeout(after: Duration) -> DockerError {
    DockerError::Timeout {
        operation: "waiting for the daemon to respond",
        after,
    }
}

