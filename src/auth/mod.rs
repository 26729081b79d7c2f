//! Registry credentials and the headers that carry them

pub mod header;

pub use header::*;

use std::collections::HashMap;
use std::path::Path;

use bollard::auth::DockerCredentials;

use crate::error::DockerError;
use crate::parser::auth_config;

/// Hostname of the public registry
pub const INDEX_NAME: &str = "docker.io";
/// Server address the public registry is stored under in config files
pub const INDEX_URL: &str = "https://index.docker.io/v1/";

/// Supplies registry credentials to the client
///
/// Implement this to plug in a credential store. [`AuthConfigs`] is the file-backed
/// implementation.
pub trait CredentialProvider: Send + Sync {
    /// Credentials for one registry hostname, `None` to proceed unauthenticated
    fn credentials(&self, registry: &str) -> Option<DockerCredentials>;

    /// Every known registry, for builds that may pull from several
    fn all_credentials(&self) -> HashMap<String, DockerCredentials>;
}

/// Registry credentials keyed by server address
#[derive(Debug, Clone, Default)]
pub struct AuthConfigs {
    auths: HashMap<String, DockerCredentials>,
}

impl AuthConfigs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the first Docker config file found, see [`auth_config::find_config_file`]
    ///
    /// A missing file yields an empty set.
    pub fn load(explicit: Option<&Path>) -> Result<Self, DockerError> {
        let env: HashMap<String, String> = std::env::vars().collect();
        match auth_config::find_config_file(explicit, &env) {
            Some(path) => auth_config::load_config(&path),
            None => {
                log::debug!("No Docker config file found");
                Ok(Self::new())
            }
        }
    }

    pub fn insert(&mut self, registry: impl Into<String>, credentials: DockerCredentials) {
        self.auths.insert(registry.into(), credentials);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.auths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.auths.is_empty()
    }

    /// Credentials for `registry`, defaulting to the public index
    ///
    /// Entries match on hostname, so `https://host/v1/`, `http://host` and `host` are
    /// the same registry.
    #[must_use]
    pub fn resolve(&self, registry: Option<&str>) -> Option<&DockerCredentials> {
        let wanted = resolve_index_name(registry.unwrap_or(INDEX_NAME));
        log::debug!("Looking for auth entry for {}", wanted);

        if let Some(creds) = self.auths.get(&wanted) {
            return Some(creds);
        }

        self.auths
            .iter()
            .find(|(key, _)| resolve_index_name(key) == wanted)
            .map(|(_, creds)| creds)
    }

    /// Credentials for the registry `image` lives in
    pub fn for_image(&self, image: &str) -> Result<Option<&DockerCredentials>, DockerError> {
        let (registry, _) = resolve_repository_name(image)?;
        Ok(self.resolve(Some(&registry)))
    }
}

impl FromIterator<(String, DockerCredentials)> for AuthConfigs {
    fn from_iter<T: IntoIterator<Item = (String, DockerCredentials)>>(iter: T) -> Self {
        Self {
            auths: iter.into_iter().collect(),
        }
    }
}

impl CredentialProvider for AuthConfigs {
    fn credentials(&self, registry: &str) -> Option<DockerCredentials> {
        self.resolve(Some(registry)).cloned()
    }

    fn all_credentials(&self) -> HashMap<String, DockerCredentials> {
        let mut all = HashMap::with_capacity(self.auths.len());
        for (registry, creds) in &self.auths {
            all.insert(registry.clone(), creds.clone());
            // the daemon looks the public index up by either name
            let name = resolve_index_name(registry);
            if name == INDEX_NAME {
                all.entry(INDEX_URL.to_string()).or_insert_with(|| creds.clone());
                all.entry(INDEX_NAME.to_string()).or_insert_with(|| creds.clone());
            }
        }
        all
    }
}

/// Split an image reference into `(registry, remote name)`
///
/// Names without a registry part (`ubuntu`, `user/repo:tag`) live on [`INDEX_NAME`].
///
/// # Errors
///
/// The name contains a scheme, or names the index by its legacy hostname.
pub fn resolve_repository_name(repo_name: &str) -> Result<(String, String), DockerError> {
    if repo_name.contains("://") {
        return Err(DockerError::InvalidRepository(format!(
            "Repository name cannot contain a scheme ({})",
            repo_name
        )));
    }

    let (index_name, remote_name) = match repo_name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first, rest)
        }
        _ => return Ok((INDEX_NAME.to_string(), repo_name.to_string())),
    };

    if index_name.starts_with('-') || index_name.ends_with('-') {
        return Err(DockerError::InvalidRepository(format!(
            "Invalid index name ({}). Cannot begin or end with a hyphen.",
            index_name
        )));
    }

    if index_name.contains("index.docker.io") || index_name.contains("registry.hub.docker.com") {
        return Err(DockerError::InvalidRepository(format!(
            "Invalid repository name, try \"{}\" instead",
            remote_name
        )));
    }

    Ok((index_name.to_string(), remote_name.to_string()))
}

/// Strip the scheme and path from a registry address
#[must_use]
pub fn convert_to_hostname(url: &str) -> &str {
    let url = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url);
    url.split('/').next().unwrap_or(url)
}

/// Hostname of a registry, with the legacy index hostname folded into [`INDEX_NAME`]
#[must_use]
pub fn resolve_index_name(registry: &str) -> String {
    let hostname = convert_to_hostname(registry);
    if hostname == "index.docker.io" || hostname == INDEX_NAME {
        INDEX_NAME.to_string()
    } else {
        hostname.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn creds(name: &str) -> DockerCredentials {
        DockerCredentials {
            username: Some(name.to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        }
    }

    fn resolved(name: &str) -> (String, String) {
        resolve_repository_name(name).unwrap()
    }

    #[test]
    fn test_repository_names() {
        let index = INDEX_NAME.to_string();
        assert_eq!(resolved("root"), (index.clone(), "root".into()));
        assert_eq!(resolved("root:tag"), (index.clone(), "root:tag".into()));
        assert_eq!(resolved("root:tag.minor"), (index.clone(), "root:tag.minor".into()));
        assert_eq!(resolved("user/repo:tag"), (index, "user/repo:tag".into()));
        assert_eq!(
            resolved("localhost:5000/user/repo"),
            ("localhost:5000".into(), "user/repo".into())
        );
        assert_eq!(
            resolved("domain.name:5000/user/repo:tag"),
            ("domain.name:5000".into(), "user/repo:tag".into())
        );
        assert_eq!(resolved("localhost/image"), ("localhost".into(), "image".into()));
    }

    #[test]
    fn test_invalid_repository_names() {
        for name in [
            "https://docker.io/ubuntu",
            "index.docker.io/library/ubuntu",
            "-registry.example.com/image",
        ] {
            assert!(
                matches!(
                    resolve_repository_name(name),
                    Err(DockerError::InvalidRepository(_))
                ),
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_resolve_defaults_to_index() {
        let mut configs = AuthConfigs::new();
        configs.insert(INDEX_URL, creds("indexuser"));
        configs.insert("my.registry.net", creds("privateuser"));

        let found = configs.resolve(None).unwrap();
        assert_eq!(found.username.as_deref(), Some("indexuser"));
        let found = configs.resolve(Some("docker.io")).unwrap();
        assert_eq!(found.username.as_deref(), Some("indexuser"));
    }

    #[test]
    fn test_resolve_either_scheme() {
        let mut configs = AuthConfigs::new();
        configs.insert("http://my.registry.net/v1/", creds("privateuser"));

        for registry in [
            "my.registry.net",
            "http://my.registry.net",
            "https://my.registry.net/v1/",
        ] {
            let found = configs.resolve(Some(registry)).unwrap();
            assert_eq!(found.username.as_deref(), Some("privateuser"));
        }

        assert!(configs.resolve(Some("other.registry.net")).is_none());
        assert!(configs.resolve(None).is_none());
    }

    #[test]
    fn test_credentials_for_image() {
        let mut configs = AuthConfigs::new();
        configs.insert("localhost:5000", creds("local"));

        let found = configs.for_image("localhost:5000/app:1.0").unwrap().unwrap();
        assert_eq!(found.username.as_deref(), Some("local"));
        assert!(configs.for_image("ubuntu").unwrap().is_none());
    }

    #[test]
    fn test_all_credentials_aliases_index() {
        let mut configs = AuthConfigs::new();
        configs.insert(INDEX_URL, creds("indexuser"));

        let all = configs.all_credentials();
        assert!(all.contains_key(INDEX_URL));
        assert!(all.contains_key(INDEX_NAME));
    }
}
