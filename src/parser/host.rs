use crate::config::{Host, Scheme};
use crate::error::DockerError;
use crate::parser::ssh::SshDestination;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_UNIX_SOCKET: &str = "/var/run/docker.sock";
pub const DEFAULT_NPIPE: &str = "//./pipe/docker_engine";

/// The daemon address used when no host is configured
#[must_use]
pub fn default_host() -> Host {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            local(Scheme::NamedPipe, DEFAULT_NPIPE)
        } else {
            local(Scheme::Unix, DEFAULT_UNIX_SOCKET)
        }
    }
}

fn local(scheme: Scheme, path: &str) -> Host {
    Host {
        scheme,
        address: path.to_string(),
        port: None,
        user: None,
        path_prefix: String::new(),
    }
}

/// Parse a Docker base URL into a [`Host`]
///
/// # Format
///
/// The following forms are accepted:
/// - `unix:///path/to/socket` (also `http+unix://`)
/// - `npipe:////./pipe/name`
/// - `ssh://[user@]host[:port]`
/// - `tcp://host:port[/path]`, which becomes `https` when `tls` is set
/// - `http://host:port[/path]` and `https://host:port[/path]`
/// - `host:port`, treated like `tcp://`
///
/// An empty address (or a bare `unix://`) resolves to the platform default.
pub fn parse_host(addr: &str, tls: bool) -> Result<Host, DockerError> {
    let addr = addr.trim();
    if addr.is_empty() || addr == "unix://" {
        return Ok(default_host());
    }

    let (scheme, rest) = match addr.split_once("://") {
        None => (if tls { Scheme::Https } else { Scheme::Http }, addr),
        Some(("unix" | "http+unix", rest)) => (Scheme::Unix, rest),
        Some(("npipe", rest)) => (Scheme::NamedPipe, rest),
        Some(("ssh", rest)) => (Scheme::Ssh, rest),
        Some(("tcp" | "http", rest)) => (if tls { Scheme::Https } else { Scheme::Http }, rest),
        Some(("https", rest)) => (Scheme::Https, rest),
        Some(("fd", _)) => {
            return Err(DockerError::InvalidHost(
                "fd protocol is not implemented".to_string(),
            ));
        }
        Some(_) => {
            return Err(DockerError::InvalidHost(format!(
                "Invalid bind address protocol: {}",
                addr
            )));
        }
    };

    match scheme {
        Scheme::Unix => {
            let path = if rest.starts_with('/') {
                rest.to_string()
            } else {
                format!("/{}", rest)
            };
            Ok(local(Scheme::Unix, &path))
        }
        Scheme::NamedPipe => {
            if rest.is_empty() {
                return Err(DockerError::InvalidHost(format!(
                    "Invalid bind address format: {}",
                    addr
                )));
            }
            Ok(local(Scheme::NamedPipe, rest))
        }
        Scheme::Ssh => {
            let dest: SshDestination = rest.parse()?;
            Ok(Host {
                scheme,
                address: dest.host,
                port: dest.port,
                user: dest.user,
                path_prefix: String::new(),
            })
        }
        Scheme::Http | Scheme::Https => parse_tcp(scheme, rest, addr),
    }
}

fn parse_tcp(scheme: Scheme, rest: &str, addr: &str) -> Result<Host, DockerError> {
    if rest.is_empty() {
        return Err(DockerError::InvalidHost(format!(
            "Invalid bind address format: {}",
            addr
        )));
    }

    let (authority, path_prefix) = match rest.find('/') {
        Some(idx) => (&rest[..idx], rest[idx..].trim_end_matches('/')),
        None => (rest, ""),
    };

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        // [ipv6]:port
        let Some((host, port)) = bracketed.split_once("]:") else {
            return Err(DockerError::InvalidHost(format!(
                "Bind address needs a port: {}",
                addr
            )));
        };
        (host, port)
    } else {
        let parts: Vec<&str> = authority.split(':').collect();
        match parts.as_slice() {
            [host, port] => (*host, *port),
            [_] => {
                return Err(DockerError::InvalidHost(format!(
                    "Bind address needs a port: {}",
                    addr
                )));
            }
            _ => {
                return Err(DockerError::InvalidHost(format!(
                    "Invalid bind address format: {}",
                    addr
                )));
            }
        }
    };

    let port = port
        .parse::<u16>()
        .map_err(|_| DockerError::InvalidHost(format!("Invalid port: {}", addr)))?;
    let host = if host.is_empty() { DEFAULT_HTTP_HOST } else { host };

    Ok(Host {
        scheme,
        address: host.to_string(),
        port: Some(port),
        user: None,
        path_prefix: path_prefix.to_string(),
    })
}
