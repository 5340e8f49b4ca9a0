//! Application configuration for feeddigest.
//!
//! User config lives at `~/.feeddigest/feeddigest.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DigestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "feeddigest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".feeddigest";

// ---------------------------------------------------------------------------
// Config structs (matching feeddigest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub digest: DigestSection,

    #[serde(default)]
    pub images: ImagesSection,

    #[serde(default)]
    pub convert: ConvertSection,

    #[serde(default)]
    pub delivery: DeliverySection,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// Path of the JSON entry store.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "~/.feeddigest/entries.json".into()
}

/// `[digest]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestSection {
    /// Directory the composite document, manifest and images are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Document title; the build date is appended.
    #[serde(default = "default_title")]
    pub title: String,

    /// Web endpoint that flips the read tag, e.g. `https://host/mark-read`.
    /// Keys are appended as `?keys=k1,k2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_read_endpoint: Option<String>,
}

impl Default for DigestSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            title: default_title(),
            mark_read_endpoint: None,
        }
    }
}

fn default_output_dir() -> String {
    "~/.feeddigest/outbox".into()
}
fn default_title() -> String {
    "Daily feed digest".into()
}

/// `[images]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesSection {
    /// Download images next to the document (otherwise keep remote URLs).
    #[serde(default = "default_true")]
    pub download: bool,

    /// Images with declared width*height below this are dropped.
    #[serde(default = "default_min_area")]
    pub min_area: u64,

    /// Stand-in for a dimension attribute that cannot be parsed.
    #[serde(default = "default_dimension")]
    pub default_dimension: u64,

    /// Concurrent image downloads.
    #[serde(default = "default_image_concurrency")]
    pub concurrency: u32,

    /// Per-image request timeout.
    #[serde(default = "default_image_timeout")]
    pub timeout_secs: u64,
}

impl Default for ImagesSection {
    fn default() -> Self {
        Self {
            download: true,
            min_area: default_min_area(),
            default_dimension: default_dimension(),
            concurrency: default_image_concurrency(),
            timeout_secs: default_image_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_min_area() -> u64 {
    10_000
}
fn default_dimension() -> u64 {
    100
}
fn default_image_concurrency() -> u32 {
    4
}
fn default_image_timeout() -> u64 {
    20
}

/// `[convert]` section: external document converter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertSection {
    #[serde(default = "default_convert_program")]
    pub program: String,

    /// Arguments; `{input}` and `{output}` are substituted.
    #[serde(default = "default_convert_args")]
    pub args: Vec<String>,

    /// Extension of the converted file.
    #[serde(default = "default_convert_extension")]
    pub extension: String,
}

impl Default for ConvertSection {
    fn default() -> Self {
        Self {
            program: default_convert_program(),
            args: default_convert_args(),
            extension: default_convert_extension(),
        }
    }
}

fn default_convert_program() -> String {
    "ebook-convert".into()
}
fn default_convert_args() -> Vec<String> {
    vec!["{input}".into(), "{output}".into()]
}
fn default_convert_extension() -> String {
    "epub".into()
}

/// `[delivery]` section: external mail transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySection {
    #[serde(default = "default_delivery_program")]
    pub program: String,

    /// Arguments; `{subject}` and `{attachment}` are substituted and a bare
    /// `{recipients}` expands to one argument per recipient.
    #[serde(default = "default_delivery_args")]
    pub args: Vec<String>,

    #[serde(default)]
    pub recipients: Vec<String>,

    #[serde(default = "default_subject")]
    pub subject: String,
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            program: default_delivery_program(),
            args: default_delivery_args(),
            recipients: Vec::new(),
            subject: default_subject(),
        }
    }
}

fn default_delivery_program() -> String {
    "mutt".into()
}
fn default_delivery_args() -> Vec<String> {
    ["-s", "{subject}", "-a", "{attachment}", "--", "{recipients}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_subject() -> String {
    "Daily feed digest".into()
}

// ---------------------------------------------------------------------------
// Runtime configs (resolved from the config file)
// ---------------------------------------------------------------------------

/// Runtime settings for the asset rewriter.
#[derive(Debug, Clone)]
pub struct RewriteConfig {
    /// Where downloaded images are stored.
    pub images_dir: PathBuf,
    /// Prefix written into rewritten `src` attributes (relative to the document).
    pub images_href_prefix: String,
    pub download: bool,
    pub min_area: u64,
    pub default_dimension: u64,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

impl RewriteConfig {
    /// Defaults with images stored under `output_dir/images`.
    pub fn for_output_dir(output_dir: &Path) -> Self {
        Self::from_section(&ImagesSection::default(), output_dir)
    }

    fn from_section(images: &ImagesSection, output_dir: &Path) -> Self {
        Self {
            images_dir: output_dir.join("images"),
            images_href_prefix: "images".into(),
            download: images.download,
            min_area: images.min_area,
            default_dimension: images.default_dimension,
            concurrency: images.concurrency.max(1) as usize,
            timeout_secs: images.timeout_secs,
        }
    }
}

/// Runtime settings for building a digest.
#[derive(Debug, Clone)]
pub struct DigestConfig {
    pub output_dir: PathBuf,
    pub title: String,
    pub mark_read_endpoint: Option<url::Url>,
    pub rewrite: RewriteConfig,
}

impl DigestConfig {
    /// Defaults writing into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        Self {
            rewrite: RewriteConfig::for_output_dir(&output_dir),
            output_dir,
            title: default_title(),
            mark_read_endpoint: None,
        }
    }
}

impl TryFrom<&AppConfig> for DigestConfig {
    type Error = DigestError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let output_dir = expand_home(&config.digest.output_dir)?;
        let mark_read_endpoint = config
            .digest
            .mark_read_endpoint
            .as_deref()
            .map(|raw| {
                url::Url::parse(raw).map_err(|e| {
                    DigestError::config(format!("invalid mark_read_endpoint '{raw}': {e}"))
                })
            })
            .transpose()?;

        Ok(Self {
            rewrite: RewriteConfig::from_section(&config.images, &output_dir),
            output_dir,
            title: config.digest.title.clone(),
            mark_read_endpoint,
        })
    }
}

/// Runtime settings for the external converter.
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    pub program: String,
    pub args: Vec<String>,
    pub extension: String,
}

impl From<&AppConfig> for ConvertConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            program: config.convert.program.clone(),
            args: config.convert.args.clone(),
            extension: config.convert.extension.clone(),
        }
    }
}

/// Runtime settings for the external transport.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub program: String,
    pub args: Vec<String>,
    pub recipients: Vec<String>,
    pub subject: String,
}

impl From<&AppConfig> for DeliveryConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            program: config.delivery.program.clone(),
            args: config.delivery.args.clone(),
            recipients: config.delivery.recipients.clone(),
            subject: config.delivery.subject.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.feeddigest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DigestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.feeddigest/feeddigest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DigestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DigestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DigestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DigestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DigestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| DigestError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

/// Check that delivery has somewhere to go.
pub fn validate_delivery(config: &DeliveryConfig) -> Result<()> {
    if config.recipients.iter().all(|r| r.trim().is_empty()) {
        return Err(DigestError::config(
            "no delivery recipients configured. Set [delivery] recipients in feeddigest.toml",
        ));
    }
    Ok(())
}
