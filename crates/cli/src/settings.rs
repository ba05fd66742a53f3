//! Handles settings for the application. Configuration is written in
//! `settings.toml`.

use std::collections::HashMap;

use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct App {
    pub level: String,
}

#[derive(Debug, Deserialize)]
pub struct Database {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub app: App,
    pub database: Database,
    /// Merchant substring patterns mapped to a category, applied while
    /// importing bank exports.
    pub rules: Option<HashMap<String, String>>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("app.level", "info")?
            .set_default("database.path", "./quaderno.db")?
            .add_source(File::with_name("settings").required(false))
            .build()?;

        settings.try_deserialize()
    }
}
