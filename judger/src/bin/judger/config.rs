use std::path::PathBuf;

use judgerlib::config::{BrokerConfig, ResultsConfig};
use rocket::serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub upload_dir: PathBuf,
    pub max_file_size_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            upload_dir: PathBuf::from("./uploads"),
            max_file_size_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub results: ResultsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}
