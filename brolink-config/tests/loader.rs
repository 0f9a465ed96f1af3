use std::{
    fs, io,
    path::Path,
    sync::{Arc, Mutex},
};

use brolink_config::{ConfigGuardRailError, ConfigLoadError, ConfigLoader, CredentialsRef};
use brolink_model::QualityRegime;
use once_cell::sync::Lazy;
use tempfile::{TempDir, tempdir};

static ENV_LOCK: Lazy<tokio::sync::Mutex<()>> = Lazy::new(|| tokio::sync::Mutex::new(()));

const KEYS: &[&str] = &[
    "BROLINK_CONFIG_PATH",
    "MAX_ATTEMPTS",
    "MAX_BACKOFF_SECONDS",
    "BACKOFF_BASE_SECONDS",
    "BACKOFF_JITTER_RATIO",
    "PENDING_DEADLINE_SECONDS",
    "ALLOW_PROVISIONAL_ADDITIONS",
    "QUALITY_REGIME_DEFAULT",
    "SUBMIT_DEADLINE_SECONDS",
    "POLL_DEADLINE_SECONDS",
    "REGISTRY_BASE_URL",
    "REGISTRY_CREDENTIALS_REF",
    "DATABASE_URL",
    "SHARD_INDEX",
    "SHARD_COUNT",
    "TESTBRO_TOKEN",
    "TESTBRO_KVK",
];

fn clear_env() {
    for key in KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

fn set(key: &str, value: &str) {
    unsafe { std::env::set_var(key, value) };
}

fn with_env_credentials() {
    set("REGISTRY_CREDENTIALS_REF", "env:TESTBRO");
    set("TESTBRO_TOKEN", "token-from-env");
    set("TESTBRO_KVK", "87654321");
}

/// Loader that never picks up a developer's `.env`.
fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::new().with_env_file(dir.path().join("absent.env"))
}

fn write(path: &Path, contents: &str) {
    fs::write(path, contents).expect("write fixture");
}

#[tokio::test]
async fn defaults_apply_when_only_required_values_are_set() {
    let _guard = ENV_LOCK.lock().await;
    clear_env();
    let dir = tempdir().unwrap();
    set("REGISTRY_BASE_URL", "https://registry.example.org/api/");
    with_env_credentials();

    let load = loader(&dir).load().expect("config loads");
    let config = load.config;
    assert_eq!(config.delivery.max_attempts, 3);
    assert_eq!(config.delivery.retry.backoff_base_secs, 30);
    assert_eq!(config.delivery.retry.max_backoff_secs, 900);
    assert_eq!(config.delivery.deadlines.pending_secs, 86_400);
    assert_eq!(config.delivery.deadlines.submit_secs, 30);
    assert_eq!(config.delivery.deadlines.poll_secs, 15);
    assert!(!config.delivery.allow_provisional_additions);
    assert_eq!(config.delivery.quality_regime_default, QualityRegime::Imbro);
    assert_eq!(config.database.url, "sqlite://brolink.db");
    assert_eq!(config.registry.credentials.company_number, "87654321");
    assert_eq!(config.registry.credentials.token(), "token-from-env");
    assert!(!config.metadata.env_file_loaded);
    assert!(load.warnings.contains("No brolink.toml detected"));
    clear_env();
}

#[tokio::test]
async fn environment_wins_over_file() {
    let _guard = ENV_LOCK.lock().await;
    clear_env();
    let dir = tempdir().unwrap();
    let secrets = dir.path().join("bro.toml");
    write(&secrets, "token = \"file-token\"\ncompany_number = \"11112222\"\n");
    let config_path = dir.path().join("brolink.toml");
    write(
        &config_path,
        &format!(
            r#"
            [delivery]
            max_attempts = 7
            backoff_base_seconds = 10
            quality_regime_default = "IMBRO/A"

            [registry]
            base_url = "https://file.example.org/"
            credentials_ref = "file:{}"

            [database]
            url = "sqlite://from-file.db"

            [shard]
            index = 1
            count = 2
            "#,
            secrets.display()
        ),
    );
    set("MAX_ATTEMPTS", "4");
    set("SHARD_INDEX", "0");

    let config = loader(&dir)
        .with_config_path(&config_path)
        .load()
        .expect("config loads")
        .config;
    assert_eq!(config.delivery.max_attempts, 4);
    assert_eq!(config.delivery.retry.backoff_base_secs, 10);
    assert_eq!(config.delivery.quality_regime_default, QualityRegime::ImbroA);
    assert_eq!(config.delivery.shard.index, 0);
    assert_eq!(config.delivery.shard.count, 2);
    assert_eq!(config.registry.base_url.as_str(), "https://file.example.org/");
    assert!(matches!(config.registry.credentials_ref, CredentialsRef::File { .. }));
    assert_eq!(config.registry.credentials.token(), "file-token");
    assert_eq!(config.database.url, "sqlite://from-file.db");
    assert_eq!(config.metadata.config_path.as_deref(), Some(config_path.as_path()));
    clear_env();
}

#[tokio::test]
async fn env_file_seeds_the_environment() {
    let _guard = ENV_LOCK.lock().await;
    clear_env();
    let dir = tempdir().unwrap();
    let env_file = dir.path().join(".env");
    write(
        &env_file,
        "REGISTRY_BASE_URL=https://registry.example.org/\n\
         REGISTRY_CREDENTIALS_REF=env:TESTBRO\n\
         TESTBRO_TOKEN=dotenv-token\n\
         TESTBRO_KVK=12345678\n\
         ALLOW_PROVISIONAL_ADDITIONS=yes\n",
    );

    let config = ConfigLoader::new()
        .with_env_file(&env_file)
        .load()
        .expect("config loads")
        .config;
    assert!(config.metadata.env_file_loaded);
    assert!(config.delivery.allow_provisional_additions);
    assert_eq!(config.registry.credentials.token(), "dotenv-token");
    clear_env();
}

#[tokio::test]
async fn missing_registry_settings_are_reported_by_name() {
    let _guard = ENV_LOCK.lock().await;
    clear_env();
    let dir = tempdir().unwrap();

    match loader(&dir).load() {
        Err(ConfigLoadError::MissingValue { key }) => assert_eq!(key, "REGISTRY_BASE_URL"),
        other => panic!("expected missing value, got {other:?}"),
    }

    set("REGISTRY_BASE_URL", "https://registry.example.org/");
    set("REGISTRY_CREDENTIALS_REF", "env:TESTBRO");
    match loader(&dir).load() {
        Err(ConfigLoadError::MissingValue { key }) => assert_eq!(key, "TESTBRO_TOKEN"),
        other => panic!("expected missing token, got {other:?}"),
    }
    clear_env();
}

#[tokio::test]
async fn explicit_config_path_must_exist() {
    let _guard = ENV_LOCK.lock().await;
    clear_env();
    let dir = tempdir().unwrap();
    let err = loader(&dir)
        .with_config_path(dir.path().join("nope.toml"))
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[tokio::test]
async fn malformed_toml_is_a_parse_error() {
    let _guard = ENV_LOCK.lock().await;
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("brolink.toml");
    write(&path, "[delivery\nmax_attempts = ");
    let err = loader(&dir).with_config_path(&path).load().unwrap_err();
    assert!(matches!(err, ConfigLoadError::Parse { .. }));
}

#[tokio::test]
async fn guard_rails_reject_impossible_settings() {
    let _guard = ENV_LOCK.lock().await;
    let dir = tempdir().unwrap();

    let cases: &[(&str, &str, fn(&ConfigGuardRailError) -> bool)] = &[
        ("SHARD_COUNT", "0", |e| matches!(e, ConfigGuardRailError::ZeroShardCount)),
        ("SHARD_INDEX", "1", |e| {
            matches!(e, ConfigGuardRailError::ShardIndexOutOfRange { index: 1, count: 1 })
        }),
        ("BACKOFF_JITTER_RATIO", "1.0", |e| {
            matches!(e, ConfigGuardRailError::InvalidJitter { .. })
        }),
        ("REGISTRY_BASE_URL", "ftp://registry.example.org/", |e| {
            matches!(e, ConfigGuardRailError::UnsupportedRegistryScheme { .. })
        }),
        ("POLL_DEADLINE_SECONDS", "0", |e| {
            matches!(e, ConfigGuardRailError::ZeroDeadline { field: "POLL_DEADLINE_SECONDS" })
        }),
    ];

    for (key, value, expected) in cases {
        clear_env();
        set("REGISTRY_BASE_URL", "https://registry.example.org/");
        with_env_credentials();
        set(key, value);
        match loader(&dir).load() {
            Err(ConfigLoadError::GuardRail(err)) => assert!(expected(&err), "{key}: {err}"),
            other => panic!("{key}={value}: expected guard rail error, got {other:?}"),
        }
    }
    clear_env();
}

#[tokio::test]
async fn guard_rails_warn_on_risky_settings() {
    let _guard = ENV_LOCK.lock().await;
    clear_env();
    let dir = tempdir().unwrap();
    set("REGISTRY_BASE_URL", "http://localhost:8080/");
    with_env_credentials();
    set("MAX_ATTEMPTS", "0");
    set("BACKOFF_BASE_SECONDS", "600");
    set("MAX_BACKOFF_SECONDS", "60");

    let load = loader(&dir).load().expect("risky settings still load");
    assert!(load.warnings.contains("plain http"));
    assert!(load.warnings.contains("MAX_ATTEMPTS is 0"));
    assert!(load.warnings.contains("exceeds MAX_BACKOFF_SECONDS"));
    assert_eq!(load.config.delivery.max_attempts, 0);
    clear_env();
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn resolved_config_path_is_logged_with_its_provenance() {
    let _guard = ENV_LOCK.lock().await;
    clear_env();
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("brolink.toml");
    write(&config_path, "[registry]\nbase_url = \"https://registry.example.org/\"\n");
    set("BROLINK_CONFIG_PATH", &config_path.display().to_string());
    with_env_credentials();

    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, || loader(&dir).load().expect("config loads"));

    let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("configuration file resolved"), "{output}");
    assert!(output.contains("provenance=Env"), "{output}");
    clear_env();
}
