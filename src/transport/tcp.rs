use tokio::net::TcpStream;

use super::channel::Channel;
use crate::config::{Host, Scheme, TlsConfig};
use crate::error::DockerError;

/// A `host:port` target, optionally wrapped in TLS
#[derive(Clone)]
pub struct TcpTarget {
    host: String,
    port: u16,
    #[cfg(feature = "tls")]
    tls: Option<tokio_native_tls::TlsConnector>,
}

impl std::fmt::Debug for TcpTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.is_tls())
            .finish()
    }
}

impl TcpTarget {
    pub fn new(host: &Host, tls: Option<&TlsConfig>) -> Result<Self, DockerError> {
        let Some(port) = host.port() else {
            return Err(DockerError::InvalidHost(format!("{} has no port", host)));
        };

        let tls = match (host.scheme(), tls) {
            (Scheme::Https, Some(config)) => Some(config.clone()),
            (Scheme::Https, None) => Some(TlsConfig::default()),
            _ => None,
        };

        cfg_if::cfg_if! {
            if #[cfg(feature = "tls")] {
                let tls = tls.as_ref().map(connector).transpose()?;
                Ok(Self {
                    host: host.address().to_string(),
                    port,
                    tls,
                })
            } else {
                if tls.is_some() {
                    return Err(DockerError::TlsParameter(
                        "dockwire was built without the `tls` feature".to_string(),
                    ));
                }
                Ok(Self {
                    host: host.address().to_string(),
                    port,
                })
            }
        }
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        cfg_if::cfg_if! {
            if #[cfg(feature = "tls")] {
                self.tls.is_some()
            } else {
                false
            }
        }
    }

    pub async fn connect(&self) -> Result<Channel, DockerError> {
        let target = format!("{}:{}", self.host, self.port);
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| DockerError::connection(&target, e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| DockerError::connection(&target, e))?;

        #[cfg(feature = "tls")]
        if let Some(connector) = &self.tls {
            let stream = connector
                .connect(&self.host, stream)
                .await
                .map_err(|e| DockerError::connection(&target, std::io::Error::other(e)))?;
            return Ok(Channel::Tls(Box::new(stream)));
        }

        Ok(Channel::Tcp(stream))
    }
}

/// Build a connector from PEM files
///
/// The client key must be PKCS#8 (`BEGIN PRIVATE KEY`).
#[cfg(feature = "tls")]
fn connector(config: &TlsConfig) -> Result<tokio_native_tls::TlsConnector, DockerError> {
    use tokio_native_tls::native_tls::{Certificate, Identity, TlsConnector};

    let read = |path: &std::path::Path| {
        std::fs::read(path).map_err(|e| {
            DockerError::TlsParameter(format!("Failed to read {}: {}", path.display(), e))
        })
    };

    let mut builder = TlsConnector::builder();

    if let Some((cert, key)) = config.client_cert() {
        let identity = Identity::from_pkcs8(&read(cert)?, &read(key)?)
            .map_err(|e| DockerError::TlsParameter(format!("Invalid client certificate: {}", e)))?;
        builder.identity(identity);
    }

    if let Some(ca) = config.ca_cert() {
        let ca = Certificate::from_pem(&read(ca)?)
            .map_err(|e| DockerError::TlsParameter(format!("Invalid CA certificate: {}", e)))?;
        builder.add_root_certificate(ca);
    }

    builder
        .danger_accept_invalid_certs(!config.verify())
        .danger_accept_invalid_hostnames(!config.assert_hostname_enabled());

    let connector = builder
        .build()
        .map_err(|e| DockerError::TlsParameter(e.to_string()))?;
    Ok(tokio_native_tls::TlsConnector::from(connector))
}
