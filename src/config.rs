use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::coordinator::DEFAULT_CONCURRENCY;
use crate::domain::TaxonResult;
use crate::ena::EnaEndpoints;
use crate::engine::LoopPolicy;
use crate::error::EnaError;
use crate::metadata::RecordFilter;
use crate::retry::RetryPolicy;
use crate::store::Store;

pub const DEFAULT_CONFIG_FILE: &str = "ena-fetch.json";

/// On-disk configuration. Every key is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub outdir: Option<PathBuf>,
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub transfer_attempts: Option<u32>,
    #[serde(default)]
    pub item_attempts: Option<u32>,
    #[serde(default)]
    pub item_timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub taxon_result: Option<TaxonResult>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub library_source: Option<String>,
    #[serde(default)]
    pub portal_url: Option<String>,
    #[serde(default)]
    pub browser_url: Option<String>,
}

/// Values given on the command line; they win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub outdir: Option<PathBuf>,
    pub threads: Option<usize>,
    pub transfer_attempts: Option<u32>,
    pub item_attempts: Option<u32>,
    pub item_timeout_secs: Option<u64>,
    pub taxon_result: Option<TaxonResult>,
    pub platform: Option<String>,
    pub library_source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub outdir: Utf8PathBuf,
    pub concurrency: usize,
    pub transfer: RetryPolicy,
    pub item: LoopPolicy,
    pub taxon_result: TaxonResult,
    pub filter: RecordFilter,
    pub endpoints: EnaEndpoints,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load `path` (required) or `ena-fetch.json` in the working directory
    /// (used only when present), then apply `overrides`.
    pub fn resolve(path: Option<&Path>, overrides: Overrides) -> Result<ResolvedConfig, EnaError> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)?
                } else {
                    Config::default()
                }
            }
        };
        Self::resolve_config(config, overrides)
    }

    pub fn load(path: &Path) -> Result<Config, EnaError> {
        let content =
            fs::read_to_string(path).map_err(|_| EnaError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| EnaError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config, overrides: Overrides) -> Result<ResolvedConfig, EnaError> {
        let outdir = match overrides.outdir.or(config.outdir) {
            Some(path) => Utf8PathBuf::from_path_buf(path).map_err(|path| {
                EnaError::InvalidConfig(format!("output path is not UTF-8: {}", path.display()))
            })?,
            None => Store::default_root()?,
        };

        let concurrency = overrides
            .threads
            .or(config.threads)
            .unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(EnaError::InvalidConfig(
                "threads must be at least 1".to_string(),
            ));
        }

        let mut transfer = RetryPolicy::default();
        if let Some(attempts) = overrides.transfer_attempts.or(config.transfer_attempts) {
            if attempts == 0 {
                return Err(EnaError::InvalidConfig(
                    "transfer attempts must be at least 1".to_string(),
                ));
            }
            transfer.max_attempts = attempts;
        }

        let mut item = LoopPolicy::default();
        if let Some(attempts) = overrides.item_attempts.or(config.item_attempts) {
            item.max_attempts = attempts;
        }
        if let Some(secs) = overrides.item_timeout_secs.or(config.item_timeout_secs) {
            item.time_budget = Some(Duration::from_secs(secs));
        }
        if let Some(ms) = config.retry_delay_ms {
            let delay = Duration::from_millis(ms);
            transfer.base_delay = delay;
            transfer.max_delay = transfer.max_delay.max(delay);
            item.retry_delay = delay;
        }
        if item.is_unbounded() {
            tracing::warn!("Item attempts are unbounded; a wrong published digest retries forever");
        }

        let defaults = EnaEndpoints::default();
        let endpoints = EnaEndpoints {
            portal_url: config.portal_url.unwrap_or(defaults.portal_url),
            browser_url: config.browser_url.unwrap_or(defaults.browser_url),
        };

        Ok(ResolvedConfig {
            outdir,
            concurrency,
            transfer,
            item,
            taxon_result: overrides
                .taxon_result
                .or(config.taxon_result)
                .unwrap_or_default(),
            filter: RecordFilter {
                platform: overrides.platform.or(config.platform),
                library_source: overrides.library_source.or(config.library_source),
            },
            endpoints,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let resolved = ConfigLoader::resolve_config(
            Config::default(),
            Overrides {
                outdir: Some(PathBuf::from("/tmp/out")),
                ..Overrides::default()
            },
        )
        .unwrap();
        assert_eq!(resolved.concurrency, 12);
        assert_eq!(resolved.transfer.max_attempts, 15);
        assert_eq!(resolved.item.max_attempts, 10);
        assert_eq!(resolved.taxon_result, TaxonResult::Assembly);
        assert!(resolved.filter.is_empty());
        assert_eq!(resolved.endpoints, EnaEndpoints::default());
    }

    #[test]
    fn overrides_beat_file_values() {
        let config: Config = serde_json::from_str(
            r#"{"threads": 4, "platform": "ILLUMINA", "outdir": "/srv/a", "retry_delay_ms": 0}"#,
        )
        .unwrap();
        let resolved = ConfigLoader::resolve_config(
            config,
            Overrides {
                threads: Some(2),
                ..Overrides::default()
            },
        )
        .unwrap();
        assert_eq!(resolved.concurrency, 2);
        assert_eq!(resolved.outdir, Utf8PathBuf::from("/srv/a"));
        assert_eq!(resolved.filter.platform.as_deref(), Some("ILLUMINA"));
        assert_eq!(resolved.item.retry_delay, Duration::ZERO);
    }
}
