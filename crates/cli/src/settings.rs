use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use repochat_stream::{ClientDefaults, StreamProtocol};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "repochat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "REPOCHAT_";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub protocol: StreamProtocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    #[serde(default)]
    pub file_paths: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        self.endpoint = self.endpoint.trim().to_string();
        self.repo_id = self
            .repo_id
            .map(|repo_id| repo_id.trim().to_string())
            .filter(|repo_id| !repo_id.is_empty());
        self.file_paths = self
            .file_paths
            .into_iter()
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .collect();
        self
    }

    pub fn to_client_defaults(&self) -> ClientDefaults {
        ClientDefaults {
            protocol: self.protocol,
            repo_id: self.repo_id.clone(),
            file_paths: (!self.file_paths.is_empty()).then(|| self.file_paths.clone()),
            metadata: self.metadata.clone(),
        }
    }
}

pub struct SettingsStore {
    settings: ClientSettings,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".repochat"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Loads defaults, then the settings file, then `REPOCHAT_*` environment variables.
    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_layers(&config_path);
        Self {
            settings,
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update(&mut self, settings: ClientSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings = normalized_settings;
        Ok(())
    }

    fn load_layers(path: &Path) -> ClientSettings {
        let mut figment = Figment::from(Serialized::defaults(ClientSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::debug!(path = ?path, "settings file not found, using defaults");
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<ClientSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = ?path,
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                ClientSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ClientSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = ?self.config_path, "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = SettingsStore::new(dir.path().join("absent.json"));

        assert_eq!(store.settings().endpoint, "");
        assert_eq!(store.settings().protocol, StreamProtocol::Auto);
        assert_eq!(store.settings().repo_id, None);
    }

    #[test]
    fn update_persists_normalized_settings_atomically() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);
        let mut store = SettingsStore::new(path.clone());

        let mut metadata = Map::new();
        metadata.insert("client".to_string(), json!("cli"));
        store
            .update(ClientSettings {
                endpoint: "  https://answers.example.com/api/ask  ".to_string(),
                protocol: StreamProtocol::Ndjson,
                repo_id: Some("   ".to_string()),
                file_paths: vec![" src/main.rs ".to_string(), "".to_string()],
                metadata,
            })
            .expect("settings should save");

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = SettingsStore::new(path);
        let settings = reloaded.settings();
        assert_eq!(settings.endpoint, "https://answers.example.com/api/ask");
        assert_eq!(settings.protocol, StreamProtocol::Ndjson);
        assert_eq!(settings.repo_id, None);
        assert_eq!(settings.file_paths, vec!["src/main.rs".to_string()]);
        assert_eq!(settings.metadata.get("client"), Some(&json!("cli")));
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{ not json").expect("write fixture");

        let store = SettingsStore::new(path);
        assert_eq!(store.settings(), &ClientSettings::default());
    }

    #[test]
    fn client_defaults_drop_empty_file_scope() {
        let settings = ClientSettings {
            repo_id: Some("repo-1".to_string()),
            ..ClientSettings::default()
        };
        let defaults = settings.to_client_defaults();

        assert_eq!(defaults.repo_id.as_deref(), Some("repo-1"));
        assert_eq!(defaults.file_paths, None);
        assert_eq!(defaults.protocol, StreamProtocol::Auto);
    }
}
