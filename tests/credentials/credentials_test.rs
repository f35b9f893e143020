//! Coverage for credential loading and permission checks.

use std::fs;
use std::path::{Path, PathBuf};

use socialconnector::credentials::{load_credentials, Credentials, ENV_FILE_NAME};

fn write_env(dir: &Path, contents: &str) -> PathBuf {
    let env_path = dir.join(ENV_FILE_NAME);
    let write = fs::write(&env_path, contents);
    assert!(write.is_ok());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::set_permissions(&env_path, fs::Permissions::from_mode(0o600));
        assert!(perms.is_ok());
    }
    env_path
}

#[test]
fn loads_env_credentials() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let env_path = write_env(
        tmp.path(),
        "TELEGRAM_BOT_TOKEN=123456:test-token\n# comment\nSLACK_TOKEN=\"quoted value\"\n",
    );

    let credentials = match load_credentials(&env_path) {
        Ok(credentials) => credentials,
        Err(err) => panic!("credentials should load: {err}"),
    };

    assert_eq!(credentials.len(), 2);
    assert_eq!(credentials.get("TELEGRAM_BOT_TOKEN"), Some("123456:test-token"));
    assert_eq!(credentials.get("SLACK_TOKEN"), Some("quoted value"));
    assert!(credentials.require("MISSING").is_err());
}

#[cfg(unix)]
#[test]
fn rejects_group_or_world_readable_env_file() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().expect("should create temp dir");
    let env_path = write_env(tmp.path(), "TELEGRAM_BOT_TOKEN=123456:test-token\n");
    let perms = fs::set_permissions(&env_path, fs::Permissions::from_mode(0o644));
    assert!(perms.is_ok());

    let err = load_credentials(&env_path).expect_err("0644 must be rejected");
    assert!(err.to_string().contains("must be 0600"));
}

#[test]
fn missing_file_is_an_error() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let err = load_credentials(&tmp.path().join(ENV_FILE_NAME)).expect_err("no file");
    assert!(err.to_string().contains("does not exist"));
}

#[test]
fn resolve_prefers_the_file_over_the_environment() {
    // PATH is always set in the test process.
    let credentials = Credentials::from_map(
        [("PATH".to_owned(), "from-file".to_owned())]
            .into_iter()
            .collect(),
    );
    assert_eq!(credentials.resolve("PATH").as_deref(), Some("from-file"));

    let empty = Credentials::default();
    assert!(empty.is_empty());
    assert!(empty.resolve("PATH").is_some());
    assert_eq!(empty.resolve("SOCIALCONNECTOR_SURELY_UNSET_VARIABLE"), None);
}

#[test]
fn known_secrets_lists_non_blank_values() {
    let credentials = Credentials::from_map(
        [
            ("A".to_owned(), "alpha-secret".to_owned()),
            ("B".to_owned(), "   ".to_owned()),
        ]
        .into_iter()
        .collect(),
    );
    assert_eq!(credentials.known_secrets(), vec!["alpha-secret".to_owned()]);
}
