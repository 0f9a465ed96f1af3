use std::{fmt, fs, path::PathBuf, str::FromStr};

use brolink_model::RegistryCredentials;
use serde::Deserialize;

use crate::loader::error::ConfigLoadError;

/// Pointer to the default registry credentials.
///
/// `env:<PREFIX>` reads `<PREFIX>_TOKEN` and `<PREFIX>_KVK`; `file:<path>`
/// reads a TOML file with `token` and `company_number` keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialsRef {
    Env { prefix: String },
    File { path: PathBuf },
}

#[derive(Deserialize)]
struct CredentialsFile {
    token: String,
    company_number: String,
}

impl CredentialsRef {
    pub fn resolve(&self) -> Result<RegistryCredentials, ConfigLoadError> {
        match self {
            CredentialsRef::Env { prefix } => {
                let token = required_var(&format!("{prefix}_TOKEN"))?;
                let company_number = required_var(&format!("{prefix}_KVK"))?;
                Ok(RegistryCredentials::new(company_number, token))
            }
            CredentialsRef::File { path } => {
                let contents = fs::read_to_string(path).map_err(|source| {
                    ConfigLoadError::SecretFileIo {
                        path: path.clone(),
                        source,
                    }
                })?;
                let file: CredentialsFile =
                    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                        path: path.clone(),
                        source,
                    })?;
                if file.token.trim().is_empty() {
                    return Err(ConfigLoadError::InvalidCredentialsRef {
                        value: self.to_string(),
                        reason: "token is empty".into(),
                    });
                }
                Ok(RegistryCredentials::new(
                    file.company_number.trim(),
                    file.token.trim(),
                ))
            }
        }
    }
}

fn required_var(name: &str) -> Result<String, ConfigLoadError> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigLoadError::MissingValue {
            key: name.to_string(),
        })
}

impl FromStr for CredentialsRef {
    type Err = ConfigLoadError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigLoadError::InvalidCredentialsRef {
            value: raw.to_string(),
            reason: reason.to_string(),
        };
        match raw.trim().split_once(':') {
            Some(("env", prefix)) if !prefix.trim().is_empty() => Ok(CredentialsRef::Env {
                prefix: prefix.trim().to_string(),
            }),
            Some(("file", path)) if !path.trim().is_empty() => Ok(CredentialsRef::File {
                path: PathBuf::from(path.trim()),
            }),
            Some(("env" | "file", _)) => Err(invalid("missing value after the scheme")),
            _ => Err(invalid("expected env:<PREFIX> or file:<path>")),
        }
    }
}

impl fmt::Display for CredentialsRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialsRef::Env { prefix } => write!(f, "env:{prefix}"),
            CredentialsRef::File { path } => write!(f, "file:{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_schemes() {
        assert_eq!(
            "env:BRO".parse::<CredentialsRef>().unwrap(),
            CredentialsRef::Env {
                prefix: "BRO".into()
            }
        );
        assert_eq!(
            "file:/run/secrets/bro.toml".parse::<CredentialsRef>().unwrap(),
            CredentialsRef::File {
                path: PathBuf::from("/run/secrets/bro.toml")
            }
        );
    }

    #[test]
    fn rejects_unknown_schemes_and_empty_values() {
        for raw in ["vault:bro", "env:", "BRO_TOKEN", "file: "] {
            assert!(
                matches!(
                    raw.parse::<CredentialsRef>(),
                    Err(ConfigLoadError::InvalidCredentialsRef { .. })
                ),
                "{raw}"
            );
        }
    }

    #[test]
    fn reads_toml_credentials_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bro.toml");
        fs::write(&path, "token = \"abc\"\ncompany_number = \"12345678\"\n").unwrap();

        let credentials = CredentialsRef::File { path }.resolve().unwrap();
        assert_eq!(credentials.token(), "abc");
        assert_eq!(credentials.company_number, "12345678");
    }

    #[test]
    fn missing_file_is_reported_with_its_path() {
        let err = CredentialsRef::File {
            path: PathBuf::from("/nonexistent/bro.toml"),
        }
        .resolve()
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/bro.toml"));
    }
}
