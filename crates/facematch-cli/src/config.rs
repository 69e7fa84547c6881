use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_TARGET_WIDTH: u32 = 800;
const DEFAULT_CHIP_SIZE: u32 = 256;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// CLI configuration: `FACEMATCH_*` environment variables over an optional
/// TOML file named by `FACEMATCH_CONFIG`, over built-in defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Width input images are resized to before detection.
    pub target_width: u32,
    /// Edge length of the aligned face chip.
    pub chip_size: u32,
    /// Upper bound on a single enroll/match call.
    pub timeout_secs: u64,
}

/// Keys accepted in the TOML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    model_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    target_width: Option<u32>,
    chip_size: Option<u32>,
    timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = match env("FACEMATCH_CONFIG") {
            Some(path) => FileConfig::read(Path::new(&path))?,
            None => FileConfig::default(),
        };

        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facematch");

        let model_dir = env("FACEMATCH_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(|| data_dir.join("models"));

        let db_path = env("FACEMATCH_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("identities.db"));

        let config = Self {
            model_dir,
            db_path,
            target_width: env_parse(&env, "FACEMATCH_TARGET_WIDTH")?
                .or(file.target_width)
                .unwrap_or(DEFAULT_TARGET_WIDTH),
            chip_size: env_parse(&env, "FACEMATCH_CHIP_SIZE")?
                .or(file.chip_size)
                .unwrap_or(DEFAULT_CHIP_SIZE),
            timeout_secs: env_parse(&env, "FACEMATCH_TIMEOUT_SECS")?
                .or(file.timeout_secs)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.target_width > 0, "target_width must be positive");
        anyhow::ensure!(self.chip_size > 0, "chip_size must be positive");
        anyhow::ensure!(self.timeout_secs > 0, "timeout_secs must be positive");
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// Parse an optional numeric variable; a value that does not parse is an error.
fn env_parse<T>(env: impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env(key)
        .map(|v| v.trim().parse::<T>().with_context(|| format!("invalid {key}={v:?}")))
        .transpose()
}
