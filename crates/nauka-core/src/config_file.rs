use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Config;
use crate::politeness::RobotsFallback;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub catalog: Option<CatalogConfig>,
    pub concurrency: Option<ConcurrencyConfig>,
    pub download: Option<DownloadConfig>,
    pub output: Option<OutputConfig>,
    pub manifest: Option<ManifestConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub base_url: Option<String>,
    pub repositories: Option<Vec<String>>,
    pub metadata_prefix: Option<String>,
    pub language: Option<String>,
    pub title_language: Option<String>,
    pub request_interval_ms: Option<u64>,
    pub gate_catalog: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub num_workers: Option<usize>,
    pub prefetch: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub connect_timeout_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    pub robots_fallback: Option<RobotsFallback>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub output_dir: Option<String>,
    pub data_dir: Option<String>,
    pub corpus_name: Option<String>,
    pub min_text_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestConfig {
    pub project: Option<String>,
    pub description: Option<String>,
    pub license: Option<String>,
    pub language: Option<String>,
    pub source_name: Option<String>,
    pub source_url: Option<String>,
}

/// Platform config directory path: `<config_dir>/nauka/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("nauka").join("config.toml"))
}

/// Load config by cascading CWD `.nauka.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".nauka.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparsable config file");
            None
        }
    }
}

fn pick<S, T>(overlay: &Option<S>, base: &Option<S>, field: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (b, o) = (&base, &overlay);
    ConfigFile {
        catalog: Some(CatalogConfig {
            base_url: pick(&o.catalog, &b.catalog, |c| c.base_url.clone()),
            repositories: pick(&o.catalog, &b.catalog, |c| c.repositories.clone()),
            metadata_prefix: pick(&o.catalog, &b.catalog, |c| c.metadata_prefix.clone()),
            language: pick(&o.catalog, &b.catalog, |c| c.language.clone()),
            title_language: pick(&o.catalog, &b.catalog, |c| c.title_language.clone()),
            request_interval_ms: pick(&o.catalog, &b.catalog, |c| c.request_interval_ms),
            gate_catalog: pick(&o.catalog, &b.catalog, |c| c.gate_catalog),
        }),
        concurrency: Some(ConcurrencyConfig {
            num_workers: pick(&o.concurrency, &b.concurrency, |c| c.num_workers),
            prefetch: pick(&o.concurrency, &b.concurrency, |c| c.prefetch),
        }),
        download: Some(DownloadConfig {
            connect_timeout_secs: pick(&o.download, &b.download, |d| d.connect_timeout_secs),
            timeout_secs: pick(&o.download, &b.download, |d| d.timeout_secs),
            user_agent: pick(&o.download, &b.download, |d| d.user_agent.clone()),
            robots_fallback: pick(&o.download, &b.download, |d| d.robots_fallback),
        }),
        output: Some(OutputConfig {
            output_dir: pick(&o.output, &b.output, |d| d.output_dir.clone()),
            data_dir: pick(&o.output, &b.output, |d| d.data_dir.clone()),
            corpus_name: pick(&o.output, &b.output, |d| d.corpus_name.clone()),
            min_text_chars: pick(&o.output, &b.output, |d| d.min_text_chars),
        }),
        manifest: Some(ManifestConfig {
            project: pick(&o.manifest, &b.manifest, |m| m.project.clone()),
            description: pick(&o.manifest, &b.manifest, |m| m.description.clone()),
            license: pick(&o.manifest, &b.manifest, |m| m.license.clone()),
            language: pick(&o.manifest, &b.manifest, |m| m.language.clone()),
            source_name: pick(&o.manifest, &b.manifest, |m| m.source_name.clone()),
            source_url: pick(&o.manifest, &b.manifest, |m| m.source_url.clone()),
        }),
    }
}

impl ConfigFile {
    /// Overwrite every field of `config` that this file sets.
    pub fn apply(&self, config: &mut Config) {
        if let Some(c) = &self.catalog {
            set(&mut config.base_url, c.base_url.clone());
            set(&mut config.repositories, c.repositories.clone());
            set(&mut config.metadata_prefix, c.metadata_prefix.clone());
            set(&mut config.language, c.language.clone());
            set(&mut config.title_language, c.title_language.clone());
            if let Some(ms) = c.request_interval_ms {
                config.request_interval = (ms > 0).then(|| Duration::from_millis(ms));
            }
            set(&mut config.gate_catalog, c.gate_catalog);
        }
        if let Some(c) = &self.concurrency {
            set(&mut config.num_workers, c.num_workers);
            set(&mut config.prefetch, c.prefetch);
        }
        if let Some(d) = &self.download {
            set(&mut config.connect_timeout_secs, d.connect_timeout_secs);
            set(&mut config.download_timeout_secs, d.timeout_secs);
            set(&mut config.user_agent, d.user_agent.clone());
            set(&mut config.robots_fallback, d.robots_fallback);
        }
        if let Some(o) = &self.output {
            set(&mut config.output_dir, o.output_dir.as_ref().map(PathBuf::from));
            set(&mut config.data_dir, o.data_dir.as_ref().map(PathBuf::from));
            set(&mut config.manifest.name, o.corpus_name.clone());
            set(&mut config.min_text_chars, o.min_text_chars);
        }
        if let Some(m) = &self.manifest {
            set(&mut config.manifest.project, m.project.clone());
            set(&mut config.manifest.description, m.description.clone());
            set(&mut config.manifest.license, m.license.clone());
            set(&mut config.manifest.language, m.language.clone());
            set(&mut config.manifest.source_name, m.source_name.clone());
            set(&mut config.manifest.source_url, m.source_url.clone());
        }
    }

    /// Snapshot of a resolved configuration, with every field set.
    pub fn from_config(config: &Config) -> Self {
        Self {
            catalog: Some(CatalogConfig {
                base_url: Some(config.base_url.clone()),
                repositories: Some(config.repositories.clone()),
                metadata_prefix: Some(config.metadata_prefix.clone()),
                language: Some(config.language.clone()),
                title_language: Some(config.title_language.clone()),
                request_interval_ms: Some(
                    config
                        .request_interval
                        .map(|d| d.as_millis() as u64)
                        .unwrap_or(0),
                ),
                gate_catalog: Some(config.gate_catalog),
            }),
            concurrency: Some(ConcurrencyConfig {
                num_workers: Some(config.num_workers),
                prefetch: Some(config.prefetch),
            }),
            download: Some(DownloadConfig {
                connect_timeout_secs: Some(config.connect_timeout_secs),
                timeout_secs: Some(config.download_timeout_secs),
                user_agent: Some(config.user_agent.clone()),
                robots_fallback: Some(config.robots_fallback),
            }),
            output: Some(OutputConfig {
                output_dir: Some(config.output_dir.display().to_string()),
                data_dir: Some(config.data_dir.display().to_string()),
                corpus_name: Some(config.manifest.name.clone()),
                min_text_chars: Some(config.min_text_chars),
            }),
            manifest: Some(ManifestConfig {
                project: Some(config.manifest.project.clone()),
                description: Some(config.manifest.description.clone()),
                license: Some(config.manifest.license.clone()),
                language: Some(config.manifest.language.clone()),
                source_name: Some(config.manifest.source_name.clone()),
                source_url: Some(config.manifest.source_url.clone()),
            }),
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}
