use std::fmt;
use std::str::FromStr;

use crate::error::DockerError;
use crate::parser::host::parse_host;

/// The transport a [`Host`] is reached through
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Scheme {
    /// Unix domain socket
    Unix,
    /// Windows named pipe
    NamedPipe,
    /// `docker system dial-stdio` over SSH
    Ssh,
    /// Plain TCP
    Http,
    /// TCP wrapped in TLS
    Https,
}

impl Scheme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Unix => "unix",
            Scheme::NamedPipe => "npipe",
            Scheme::Ssh => "ssh",
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Whether the scheme has a single logical endpoint rather than a real `host:port`
    #[must_use]
    pub fn is_local(self) -> bool {
        matches!(self, Scheme::Unix | Scheme::NamedPipe | Scheme::Ssh)
    }
}

/// A parsed connection target
///
/// For socket and pipe schemes `address` is a filesystem path. For TCP and SSH it is a
/// hostname, with the port and (SSH only) user alongside.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Host {
    pub(crate) scheme: Scheme,
    pub(crate) address: String,
    pub(crate) port: Option<u16>,
    pub(crate) user: Option<String>,
    pub(crate) path_prefix: String,
}

impl Host {
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The socket/pipe path, or the hostname for TCP and SSH targets
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// A path prepended to every request, e.g. `/docker` for `tcp://host:2375/docker`
    #[must_use]
    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    /// Value for the `Host` request header
    #[must_use]
    pub fn authority(&self) -> String {
        match (self.scheme.is_local(), self.port) {
            (true, _) => String::from("localhost"),
            (false, Some(port)) if self.address.contains(':') => {
                format!("[{}]:{}", self.address, port)
            }
            (false, Some(port)) => format!("{}:{}", self.address, port),
            (false, None) => self.address.clone(),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::Unix | Scheme::NamedPipe => {
                write!(f, "{}://{}", self.scheme.as_str(), self.address)
            }
            Scheme::Ssh => {
                write!(f, "ssh://")?;
                if let Some(user) = &self.user {
                    write!(f, "{}@", user)?;
                }
                write!(f, "{}", self.address)?;
                if let Some(port) = self.port {
                    write!(f, ":{}", port)?;
                }
                Ok(())
            }
            Scheme::Http | Scheme::Https => {
                write!(f, "{}://{}", self.scheme.as_str(), self.authority())?;
                write!(f, "{}", self.path_prefix)
            }
        }
    }
}

impl FromStr for Host {
    type Err = DockerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_host(s, false)
    }
}
