use crate::error::DockerError;
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;

/// The destination part of an `ssh://` host
///
/// # Format
///
/// `[ssh://][user@]host[:port]`, with IPv6 hosts in brackets. Only the components that
/// are present are populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshDestination {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl FromStr for SshDestination {
    type Err = DockerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static DESTINATION: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(
                r"^(?:(?P<user>[^@/:]+)@)?(?P<host>\[[^\]]+\]|[^@:/\[\]]+)(?::(?P<port>[0-9]+))?$",
            )
            .unwrap()
        });

        let dest = s.strip_prefix("ssh://").unwrap_or(s);
        let dest = dest.trim_end_matches('/');

        let Some(captures) = DESTINATION.captures(dest) else {
            return Err(DockerError::InvalidHost(format!(
                "Invalid SSH destination: {}",
                s
            )));
        };

        let host = captures["host"]
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = match captures.name("port") {
            Some(port) => Some(port.as_str().parse::<u16>().map_err(|_| {
                DockerError::InvalidHost(format!("Invalid SSH port: {}", s))
            })?),
            None => None,
        };

        Ok(SshDestination {
            user: captures.name("user").map(|u| u.as_str().to_string()),
            host,
            port,
        })
    }
}

impl SshDestination {
    /// Arguments placed before the remote command, e.g. `-p 2222 -l user host`
    #[must_use]
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(port) = self.port {
            args.push(String::from("-p"));
            args.push(port.to_string());
        }
        if let Some(user) = &self.user {
            args.push(String::from("-l"));
            args.push(user.clone());
        }
        args.push(self.host.clone());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_full_destination() {
        let dest: SshDestination = "user@hostname:1234".parse().unwrap();
        assert_eq!(dest.user.as_deref(), Some("user"));
        assert_eq!(dest.host, "hostname");
        assert_eq!(dest.port, Some(1234));
    }

    #[test]
    fn test_partial_destinations() {
        let dest: SshDestination = "hostname".parse().unwrap();
        assert_eq!(dest.user, None);
        assert_eq!(dest.host, "hostname");
        assert_eq!(dest.port, None);

        let dest: SshDestination = "user@hostname".parse().unwrap();
        assert_eq!(dest.user.as_deref(), Some("user"));
        assert_eq!(dest.port, None);

        let dest: SshDestination = "ssh://hostname:22".parse().unwrap();
        assert_eq!(dest.user, None);
        assert_eq!(dest.host, "hostname");
        assert_eq!(dest.port, Some(22));
    }

    #[test]
    fn test_ipv6_destination() {
        let dest: SshDestination = "root@[::1]:2222".parse().unwrap();
        assert_eq!(dest.host, "::1");
        assert_eq!(dest.port, Some(2222));
    }

    #[test]
    fn test_invalid_destinations() {
        for input in ["", "user@", "host:port", "host:99999", "a@b@c"] {
            assert!(input.parse::<SshDestination>().is_err(), "{}", input);
        }
    }

    #[test]
    fn test_ssh_args() {
        let dest: SshDestination = "me@box:2222".parse().unwrap();
        assert_eq!(dest.ssh_args(), vec!["-p", "2222", "-l", "me", "box"]);

        let dest: SshDestination = "box".parse().unwrap();
        assert_eq!(dest.ssh_args(), vec!["box"]);
    }
}
