use std::path::{Path, PathBuf};

use crate::error::DockerError;

const TLS_HINT: &str = ". TLS configurations should map the Docker CLI client configurations. \
     See https://docs.docker.com/engine/articles/https/ for API details.";

/// TLS settings for `https://` hosts
///
/// Mirrors the Docker CLI options: `--tlscert`/`--tlskey` for the client certificate,
/// `--tlscacert` for the CA bundle and `--tlsverify` for peer verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub(crate) client_cert: Option<(PathBuf, PathBuf)>,
    pub(crate) ca_cert: Option<PathBuf>,
    pub(crate) verify: bool,
    pub(crate) assert_hostname: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            client_cert: None,
            ca_cert: None,
            verify: true,
            assert_hostname: true,
        }
    }
}

impl TlsConfig {
    /// Create a validated TLS configuration
    ///
    /// # Errors
    ///
    /// * The certificate or key file does not exist
    /// * Verification is requested with a CA file that does not exist
    pub fn new(
        client_cert: Option<(PathBuf, PathBuf)>,
        ca_cert: Option<PathBuf>,
        verify: bool,
    ) -> Result<Self, DockerError> {
        if let Some((cert, key)) = &client_cert {
            if !is_file(cert) || !is_file(key) {
                return Err(tls_error(
                    "Path to a certificate and key files must be provided through the client_cert param",
                ));
            }
        }

        if verify {
            if let Some(ca) = &ca_cert {
                if !is_file(ca) {
                    return Err(tls_error("Invalid CA certificate provided for `ca_cert`"));
                }
            }
        }

        Ok(Self {
            client_cert,
            ca_cert,
            verify,
            assert_hostname: verify,
        })
    }

    /// Toggle hostname verification independently of certificate verification
    #[must_use]
    pub fn assert_hostname(mut self, assert: bool) -> Self {
        self.assert_hostname = assert;
        self
    }

    #[must_use]
    pub fn client_cert(&self) -> Option<(&Path, &Path)> {
        self.client_cert
            .as_ref()
            .map(|(cert, key)| (cert.as_path(), key.as_path()))
    }

    #[must_use]
    pub fn ca_cert(&self) -> Option<&Path> {
        self.ca_cert.as_deref()
    }

    #[must_use]
    pub fn verify(&self) -> bool {
        self.verify
    }

    #[must_use]
    pub fn assert_hostname_enabled(&self) -> bool {
        self.assert_hostname
    }
}

fn is_file(path: &Path) -> bool {
    path.is_file()
}

fn tls_error(msg: &str) -> DockerError {
    DockerError::TlsParameter(format!("{}{}", msg, TLS_HINT))
}
