//! Configuration loading and management.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use render_protocol::OutputFormat;
use serde::{Deserialize, Serialize};

use crate::source::{parse_model, JobSource};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:3030/render-form";

/// Main test configuration loaded from YAML or assembled from flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Queue capacity; defaults to `concurrency`.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub jobs: JobSelection,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub textures: TextureSettings,
    #[serde(default)]
    pub output: OutputSettings,
    /// Check `GET /health` before dispatching.
    #[serde(default)]
    pub health_check: bool,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_concurrency() -> usize {
    1
}

fn default_timeout_secs() -> u64 {
    120
}

/// Which jobs to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSelection {
    /// One model, `count` times. `model` is a URL or a local path.
    Repeat {
        model: String,
        #[serde(default = "default_count")]
        count: usize,
    },
    /// Every matching file in a directory.
    Directory {
        dir: PathBuf,
        #[serde(default = "default_extension")]
        extension: String,
        #[serde(default)]
        model_base_url: Option<String>,
    },
}

fn default_count() -> usize {
    1
}

fn default_extension() -> String {
    "glb".to_string()
}

impl JobSelection {
    pub fn to_source(&self) -> JobSource {
        match self {
            JobSelection::Repeat { model, count } => JobSource::Repeat {
                model: parse_model(model),
                count: *count,
            },
            JobSelection::Directory {
                dir,
                extension,
                model_base_url,
            } => JobSource::Directory {
                dir: dir.clone(),
                extension: extension.clone(),
                model_base_url: model_base_url.clone(),
            },
        }
    }
}

/// Requested output image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub format: OutputFormat,
}

fn default_width() -> u32 {
    3000
}

fn default_height() -> u32 {
    2700
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            format: OutputFormat::default(),
        }
    }
}

/// Texture images, resized once before the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureSettings {
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    /// Slot index to image path.
    #[serde(default)]
    pub slots: BTreeMap<u32, PathBuf>,
}

fn default_max_dimension() -> u32 {
    2000
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self {
            max_dimension: default_max_dimension(),
            slots: BTreeMap::new(),
        }
    }
}

/// Artifact persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(default)]
    pub save: bool,
    #[serde(default = "default_out_dir")]
    pub dir: PathBuf,
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("out")
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            save: false,
            dir: default_out_dir(),
        }
    }
}

impl TestConfig {
    /// Load configuration from YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        let config: TestConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing scenario {}", path.display()))?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be > 0");
        }
        if self.queue_capacity == Some(0) {
            anyhow::bail!("queue_capacity must be > 0");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be > 0");
        }
        if self.render.width == 0 || self.render.height == 0 {
            anyhow::bail!("render width and height must be > 0");
        }
        if self.textures.max_dimension == 0 {
            anyhow::bail!("textures.max_dimension must be > 0");
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            anyhow::bail!("endpoint must be an http(s) URL: {}", self.endpoint);
        }
        match &self.jobs {
            JobSelection::Repeat { model, .. } if model.trim().is_empty() => {
                anyhow::bail!("jobs.model must not be empty")
            }
            JobSelection::Directory { extension, .. } if extension.trim_matches('.').is_empty() => {
                anyhow::bail!("jobs.extension must not be empty")
            }
            _ => {}
        }
        Ok(())
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.concurrency)
    }

    /// Base URL of the service (endpoint minus its last path segment).
    pub fn base_url(&self) -> &str {
        let after_scheme = self.endpoint.find("://").map(|i| i + 3).unwrap_or(0);
        match self.endpoint[after_scheme..].rfind('/') {
            Some(i) => &self.endpoint[..after_scheme + i],
            None => &self.endpoint,
        }
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url())
    }
}
