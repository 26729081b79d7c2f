use pretty_assertions::assert_eq;
use std::collections::HashMap;

use super::fixtures::{get_config_json, get_legacy_dockercfg, get_plain_dockercfg};
use crate::auth::{CredentialProvider, INDEX_NAME, INDEX_URL};
use crate::parser::auth_config::{find_config_file, load_config};

#[test]
fn test_load_config_json() {
    let auths = load_config(&get_config_json()).unwrap();
    assert_eq!(auths.len(), 3);

    let index = auths.resolve(None).unwrap();
    assert_eq!(index.username.as_deref(), Some("indexuser"));
    assert_eq!(index.password.as_deref(), Some("indexpass"));
    assert_eq!(index.serveraddress.as_deref(), Some(INDEX_URL));

    // the password keeps everything after the first colon
    let private = auths.resolve(Some("registry.example.com:5000")).unwrap();
    assert_eq!(private.username.as_deref(), Some("privateuser"));
    assert_eq!(private.password.as_deref(), Some("private:pass"));

    let token = auths.resolve(Some("https://tokens.example.com")).unwrap();
    assert_eq!(token.identitytoken.as_deref(), Some("eyJhbGciOi.token"));
    assert!(token.username.is_none());

    assert!(auths.resolve(Some("unknown.example.com")).is_none());
}

#[test]
fn test_load_legacy_json() {
    let auths = load_config(&get_legacy_dockercfg()).unwrap();
    assert_eq!(auths.len(), 2);

    let index = auths.credentials(INDEX_NAME).unwrap();
    assert_eq!(index.username.as_deref(), Some("legacyuser"));
    assert_eq!(index.email.as_deref(), Some("legacy@example.com"));

    let old = auths.resolve(Some("old.registry.net")).unwrap();
    assert_eq!(old.username.as_deref(), Some("olduser"));
    assert_eq!(old.password.as_deref(), Some("oldpass"));
}

#[test]
fn test_load_legacy_plain() {
    let auths = load_config(&get_plain_dockercfg()).unwrap();
    assert_eq!(auths.len(), 1);

    let index = auths.resolve(None).unwrap();
    assert_eq!(index.username.as_deref(), Some("plainuser"));
    assert_eq!(index.password.as_deref(), Some("plainpass"));
    assert_eq!(index.email.as_deref(), Some("plain@example.com"));
}

#[test]
fn test_config_file_preference() {
    let home = tempfile::tempdir().unwrap();
    let docker_dir = home.path().join(".docker");
    std::fs::create_dir(&docker_dir).unwrap();
    std::fs::copy(get_legacy_dockercfg(), home.path().join(".dockercfg")).unwrap();

    let mut env = HashMap::new();
    env.insert(
        "HOME".to_string(),
        home.path().to_string_lossy().to_string(),
    );

    // only the legacy file exists
    assert_eq!(
        find_config_file(None, &env),
        Some(home.path().join(".dockercfg"))
    );

    std::fs::copy(get_config_json(), docker_dir.join("config.json")).unwrap();
    assert_eq!(
        find_config_file(None, &env),
        Some(docker_dir.join("config.json"))
    );

    // an explicit path wins over everything
    assert_eq!(
        find_config_file(Some(&get_plain_dockercfg()), &env),
        Some(get_plain_dockercfg())
    );
}

#[test]
fn test_all_credentials_aliases_index() {
    let auths = load_config(&get_config_json()).unwrap();
    let all = auths.all_credentials();
    assert!(all.contains_key(INDEX_URL));
    assert!(all.contains_key(INDEX_NAME));
    assert!(all.contains_key("registry.example.com:5000"));
}
