use std::collections::HashMap;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use bollard::auth::DockerCredentials;
use serde_json::{Map, Value};

use crate::error::DockerError;

/// Username sent alongside an identity token in `X-Registry-Config`
pub const IDENTITY_TOKEN_USERNAME: &str = "<token>";

/// URL-safe alphabet, padded on encode, padding optional on decode
const HEADER_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode one set of credentials for the `X-Registry-Auth` header
pub fn encode_header(credentials: &DockerCredentials) -> Result<String, DockerError> {
    let json = serde_json::to_vec(&Value::Object(credentials_object(credentials)))?;
    Ok(HEADER_ENGINE.encode(json))
}

/// Encode every known registry for the `X-Registry-Config` header
///
/// Identity tokens are sent as `{"username": "<token>", "password": <token>}`.
pub fn encode_full_header(
    credentials: &HashMap<String, DockerCredentials>,
) -> Result<String, DockerError> {
    let mut configs = Map::new();
    for (registry, creds) in credentials {
        let mut entry = Map::new();
        if let Some(token) = &creds.identitytoken {
            entry.insert("username".into(), IDENTITY_TOKEN_USERNAME.into());
            entry.insert("password".into(), token.clone().into());
        } else {
            if let Some(username) = &creds.username {
                entry.insert("username".into(), username.clone().into());
            }
            if let Some(password) = &creds.password {
                entry.insert("password".into(), password.clone().into());
            }
        }
        configs.insert(registry.clone(), Value::Object(entry));
    }

    let json = serde_json::to_vec(&Value::Object(configs))?;
    Ok(HEADER_ENGINE.encode(json))
}

/// Inverse of [`encode_header`]
pub fn decode_header(header: &str) -> Result<DockerCredentials, DockerError> {
    let bytes = decode(header)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Inverse of [`encode_full_header`]
pub fn decode_full_header(header: &str) -> Result<HashMap<String, DockerCredentials>, DockerError> {
    let bytes = decode(header)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn decode(header: &str) -> Result<Vec<u8>, DockerError> {
    HEADER_ENGINE
        .decode(header.trim())
        .map_err(|e| DockerError::Decode(format!("invalid auth header: {}", e)))
}

fn credentials_object(credentials: &DockerCredentials) -> Map<String, Value> {
    let fields = [
        ("username", &credentials.username),
        ("password", &credentials.password),
        ("auth", &credentials.auth),
        ("email", &credentials.email),
        ("serveraddress", &credentials.serveraddress),
        ("identitytoken", &credentials.identitytoken),
        ("registrytoken", &credentials.registrytoken),
    ];

    fields
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_ref()
                .map(|v| (key.to_string(), Value::String(v.clone())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn user(name: &str, password: &str) -> DockerCredentials {
        DockerCredentials {
            username: Some(name.to_string()),
            password: Some(password.to_string()),
            serveraddress: Some("https://index.docker.io/v1/".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_header_round_trip() {
        let creds = user("sakuya", "izayoi?>~");
        let header = encode_header(&creds).unwrap();
        assert!(!header.contains('+') && !header.contains('/'));

        let decoded = decode_header(&header).unwrap();
        assert_eq!(decoded.username, creds.username);
        assert_eq!(decoded.password, creds.password);
        assert_eq!(decoded.serveraddress, creds.serveraddress);
        assert_eq!(decoded.email, None);
    }

    #[test]
    fn test_header_omits_unset_fields() {
        let header = encode_header(&user("a", "b")).unwrap();
        let json: Value = serde_json::from_slice(&decode(&header).unwrap()).unwrap();
        let mut keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["password", "serveraddress", "username"]);
    }

    #[test]
    fn test_decode_without_padding() {
        let header = encode_header(&user("ab", "c")).unwrap();
        let unpadded = header.trim_end_matches('=');
        assert_eq!(decode_header(unpadded).unwrap().username.as_deref(), Some("ab"));
    }

    #[test]
    fn test_full_header_round_trip() {
        let mut all = HashMap::new();
        all.insert("registry.example.com".to_string(), user("remilia", "scarlet"));
        all.insert(
            "docker.io".to_string(),
            DockerCredentials {
                identitytoken: Some("tok-123".to_string()),
                ..Default::default()
            },
        );

        let decoded = decode_full_header(&encode_full_header(&all).unwrap()).unwrap();
        assert_eq!(decoded.len(), 2);

        let entry = &decoded["registry.example.com"];
        assert_eq!(entry.username.as_deref(), Some("remilia"));
        assert_eq!(entry.password.as_deref(), Some("scarlet"));

        let token = &decoded["docker.io"];
        assert_eq!(token.username.as_deref(), Some(IDENTITY_TOKEN_USERNAME));
        assert_eq!(token.password.as_deref(), Some("tok-123"));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_header("!!not base64!!"),
            Err(DockerError::Decode(_))
        ));
    }
}
