use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use bollard::auth::DockerCredentials;
use serde_json::{Map, Value};

use crate::auth::{AuthConfigs, INDEX_URL};
use crate::error::DockerError;

pub const DOCKER_CONFIG_FILENAME: &str = "config.json";
pub const LEGACY_DOCKER_CONFIG_FILENAME: &str = ".dockercfg";

const AUTH_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Locate the Docker config file
///
/// Candidates, first existing wins:
/// 1. `explicit`
/// 2. `$DOCKER_CONFIG/config.json`
/// 3. `$HOME/.docker/config.json`
/// 4. `$HOME/.dockercfg`
#[must_use]
pub fn find_config_file(
    explicit: Option<&Path>,
    env: &HashMap<String, String>,
) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    if let Some(dir) = env.get("DOCKER_CONFIG").filter(|d| !d.is_empty()) {
        candidates.push(Path::new(dir).join(DOCKER_CONFIG_FILENAME));
    }
    if let Some(home) = env.get("HOME").filter(|h| !h.is_empty()) {
        let home = Path::new(home);
        candidates.push(home.join(".docker").join(DOCKER_CONFIG_FILENAME));
        candidates.push(home.join(LEGACY_DOCKER_CONFIG_FILENAME));
    }

    log::debug!("Trying config paths: {:?}", candidates);
    candidates.into_iter().find(|path| path.is_file())
}

/// Read and parse a config file, see [`parse_config`]
pub fn load_config(path: &Path) -> Result<AuthConfigs, DockerError> {
    log::debug!("Loading auth configuration from {}", path.display());
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse auth data out of a Docker config file
///
/// # Format
///
/// Three layouts are recognized, tried in order:
/// 1. `config.json`: a JSON object with an `auths` map of registry entries
/// 2. legacy `.dockercfg` JSON: the registry map at the top level
/// 3. legacy plain text, authenticating against the public index:
///    ```text
///    auth = <base64 user:password>
///    email = user@example.com
///    ```
///
/// Registry entries carry `auth` (base64 `user:password`), or `identitytoken`, and
/// optionally `email`.
pub fn parse_config(content: &str) -> Result<AuthConfigs, DockerError> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(root)) => match root.get("auths") {
            Some(Value::Object(auths)) => parse_auths(auths),
            Some(_) => Err(DockerError::InvalidConfigFile(
                "`auths` must be an object".to_string(),
            )),
            None => {
                log::debug!("No `auths` section, assuming legacy .dockercfg layout");
                parse_auths(&root)
            }
        },
        Ok(_) => Err(DockerError::InvalidConfigFile(
            "expected a JSON object".to_string(),
        )),
        Err(_) => {
            log::debug!("Config is not JSON, trying the legacy plain text layout");
            parse_legacy(content)
        }
    }
}

fn parse_auths(auths: &Map<String, Value>) -> Result<AuthConfigs, DockerError> {
    let mut configs = AuthConfigs::new();

    for (registry, entry) in auths {
        let Value::Object(entry) = entry else {
            return Err(DockerError::InvalidConfigFile(format!(
                "Invalid entry for registry {}",
                registry
            )));
        };

        let field = |name: &str| entry.get(name).and_then(Value::as_str).map(String::from);
        let mut credentials = DockerCredentials {
            email: field("email"),
            serveraddress: Some(registry.clone()),
            ..Default::default()
        };

        if let Some(token) = field("identitytoken") {
            credentials.identitytoken = Some(token);
        } else if let Some(auth) = field("auth") {
            let (username, password) = decode_auth(&auth)?;
            credentials.username = Some(username);
            credentials.password = Some(password);
        } else {
            log::debug!(
                "Auth data for {} is absent. Client might be using a credentials store instead.",
                registry
            );
        }

        configs.insert(registry.clone(), credentials);
    }

    Ok(configs)
}

fn parse_legacy(content: &str) -> Result<AuthConfigs, DockerError> {
    let values: Vec<&str> = content
        .lines()
        .filter_map(|line| line.trim().split_once(" = ").map(|(_, value)| value.trim()))
        .collect();

    let [auth, email, ..] = values.as_slice() else {
        return Err(DockerError::InvalidConfigFile(
            "Invalid or empty configuration file!".to_string(),
        ));
    };

    let (username, password) = decode_auth(auth)?;
    let mut configs = AuthConfigs::new();
    configs.insert(
        INDEX_URL,
        DockerCredentials {
            username: Some(username),
            password: Some(password),
            email: Some((*email).to_string()),
            serveraddress: Some(INDEX_URL.to_string()),
            ..Default::default()
        },
    );

    Ok(configs)
}

/// Decode a base64 `user:password` pair
pub fn decode_auth(auth: &str) -> Result<(String, String), DockerError> {
    let bytes = AUTH_ENGINE
        .decode(auth.trim())
        .map_err(|e| DockerError::InvalidConfigFile(format!("Invalid auth value: {}", e)))?;
    let decoded = String::from_utf8(bytes)
        .map_err(|_| DockerError::InvalidConfigFile("auth value is not UTF-8".to_string()))?;

    match decoded.split_once(':') {
        Some((username, password)) => Ok((username.to_string(), password.to_string())),
        None => Err(DockerError::InvalidConfigFile(
            "auth value must be `user:password`".to_string(),
        )),
    }
}

/// Inverse of [`decode_auth`]
#[must_use]
pub fn encode_auth(username: &str, password: &str) -> String {
    AUTH_ENGINE.encode(format!("{}:{}", username, password))
}
