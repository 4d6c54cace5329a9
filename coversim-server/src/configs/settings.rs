use std::env;

use config::{Config, ConfigError, Environment, File};
use coversim_core::CoveringConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub clean_start: bool,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub auth_user: Option<String>,
    #[serde(default)]
    pub auth_pass: Option<String>,
    /// Dedicated listener port. The webhook shares the control surface listener when unset.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub https: bool,
    #[serde(default)]
    pub https_key_file: Option<String>,
    #[serde(default)]
    pub https_cert_file: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Default for Webhook {
    fn default() -> Self {
        Self {
            enabled: true,
            auth_user: None,
            auth_pass: None,
            port: None,
            https: false,
            https_key_file: None,
            https_cert_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: Server,
    pub logger: Logger,
    pub database: Option<Database>,
    #[serde(default)]
    pub webhook: Webhook,
    #[serde(default)]
    pub coverings: Vec<CoveringConfig>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or("development".into());

        Config::builder()
            .add_source(File::with_name("configs/default"))
            .add_source(File::with_name(&format!("configs/{run_mode}")).required(false))
            .add_source(Environment::default().separator("__"))
            .build()?
            .try_deserialize()
    }
}
