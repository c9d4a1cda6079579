use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

pub const CONFIG_ENV: &str = "JUDGER_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "judger.toml";

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    pub queue_key: String,
    pub result_key_prefix: String,
    /// How long a terminated result log stays readable.
    pub result_ttl_secs: u64,
    /// Upper bound of one blocking broker call.
    pub poll_block_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            url: "redis://127.0.0.1:6379/0".to_string(),
            queue_key: "riscv-kernel-judger:queue".to_string(),
            result_key_prefix: "riscv-kernel-judger:task".to_string(),
            result_ttl_secs: 5,
            poll_block_ms: 5000,
        }
    }
}

impl BrokerConfig {
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn poll_block(&self) -> Duration {
        Duration::from_millis(self.poll_block_ms)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ResultsConfig {
    pub artifact_dir: PathBuf,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        ResultsConfig {
            artifact_dir: PathBuf::from("./results"),
        }
    }
}

/// Adds the config file (`JUDGER_CONFIG`, default `judger.toml`) and the
/// `JUDGER_` environment on top of `base`. Nested keys use `__`, e.g.
/// `JUDGER_BROKER__URL`.
pub fn layered(base: Figment) -> Figment {
    base.merge(Toml::file(Env::var_or(CONFIG_ENV, DEFAULT_CONFIG_FILE)))
        .merge(Env::prefixed("JUDGER_").ignore(&["CONFIG"]).split("__"))
}

pub fn build_config() -> Figment {
    layered(Figment::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Sections {
        #[serde(default)]
        broker: BrokerConfig,
        #[serde(default)]
        results: ResultsConfig,
    }

    #[test]
    fn defaults_apply_to_missing_sections() {
        figment::Jail::expect_with(|_jail| {
            let cfg: Sections = build_config().extract()?;
            assert_eq!(cfg.broker.queue_key, "riscv-kernel-judger:queue");
            assert_eq!(cfg.broker.result_ttl(), Duration::from_secs(5));
            assert_eq!(cfg.results.artifact_dir, PathBuf::from("./results"));
            Ok(())
        });
    }

    #[test]
    fn file_and_env_are_layered() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "judger.toml",
                r#"
                [broker]
                url = "redis://broker:6379/1"
                result_ttl_secs = 9
                "#,
            )?;
            jail.set_env("JUDGER_BROKER__QUEUE_KEY", "grading");

            let cfg: Sections = build_config().extract()?;
            assert_eq!(cfg.broker.url, "redis://broker:6379/1");
            assert_eq!(cfg.broker.result_ttl_secs, 9);
            assert_eq!(cfg.broker.queue_key, "grading");
            Ok(())
        });
    }
}
