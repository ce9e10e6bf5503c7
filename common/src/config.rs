use config::{Config, ConfigError};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub storage: StorageSettings,
    /// Only required when a locator uses the s3:// scheme.
    #[serde(default)]
    pub s3: Option<S3Settings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    /// Root locator holding the raw song_data/ and log_data/ directories.
    pub input_root: String,
    /// Root locator the warehouse tables are written under.
    pub output_root: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3Settings {
    #[serde(default = "default_s3_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
}

fn default_s3_endpoint() -> String {
    "http://localhost:9000".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

impl StorageSettings {
    /// Locator of a raw source directory under the input root.
    pub fn source(&self, name: &str) -> String {
        join_locator(&self.input_root, name)
    }

    /// Locator of a warehouse table directory under the output root.
    pub fn table(&self, name: &str) -> String {
        join_locator(&self.output_root, name)
    }
}

// The trailing slash matters: it marks the locator as a directory for
// listing-table resolution.
fn join_locator(root: &str, name: &str) -> String {
    format!("{}/{}/", root.trim_end_matches('/'), name)
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;

        debug!(
            input_root = %settings.storage.input_root,
            output_root = %settings.storage.output_root,
            "loaded warehouse settings"
        );

        Ok(settings)
    }
}
