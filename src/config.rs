//! Configuration for talkinghead paths and stage backends.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (TALKINGHEAD_HOME, TALKINGHEAD_ARTIFACTS)
//! 2. Config file (.talkinghead/config.yaml)
//! 3. Defaults (~/.talkinghead)
//!
//! Config file discovery:
//! - Searches current directory and parents for .talkinghead/config.yaml
//! - Paths in config file are relative to the config file's parent directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<std::result::Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub stages: Option<StagesConfig>,
    #[serde(default)]
    pub retention: Option<RetentionConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to config file)
    pub home: Option<String>,
    /// Artifact output directory (relative to config file)
    pub artifacts: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StagesConfig {
    pub speech: Option<SpeechConfig>,
    pub portrait: Option<PortraitConfig>,
    pub animation: Option<AnimationConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpeechConfig {
    pub command: Option<String>,
    /// When set, speech synthesis POSTs here instead of spawning `command`
    pub endpoint: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortraitConfig {
    pub command: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub prompt: Option<String>,
    pub seed: Option<u64>,
    pub steps: Option<u32>,
    pub size: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnimationConfig {
    pub command: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub enhancer: Option<String>,
    pub still: Option<bool>,
    pub preprocess: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetentionConfig {
    /// Artifacts kept per stage directory by `clean`
    pub keep_artifacts: Option<usize>,
}

/// Resolved configuration with absolute paths and defaults applied
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to talkinghead home (engine state)
    pub home: PathBuf,
    /// Absolute path to the artifact store root
    pub artifacts: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Speech stage settings
    pub speech: SpeechSettings,
    /// Portrait stage settings
    pub portrait: PortraitSettings,
    /// Animation stage settings
    pub animation: AnimationSettings,
    /// Retention settings
    pub retention: RetentionSettings,
}

#[derive(Debug, Clone)]
pub struct SpeechSettings {
    pub command: String,
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            command: "tts".to_string(),
            endpoint: None,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortraitSettings {
    pub command: String,
    pub timeout: Duration,
    pub prompt: String,
    pub seed: Option<u64>,
    pub steps: u32,
    pub size: u32,
}

impl Default for PortraitSettings {
    fn default() -> Self {
        Self {
            command: "txt2img".to_string(),
            timeout: Duration::from_secs(600),
            prompt: "Front-facing portrait, smiling, clean background, photo-realistic"
                .to_string(),
            seed: None,
            steps: 30,
            size: 512,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnimationSettings {
    pub command: String,
    pub timeout: Duration,
    pub enhancer: Option<String>,
    pub still: bool,
    pub preprocess: String,
}

impl Default for AnimationSettings {
    fn default() -> Self {
        Self {
            command: "sadtalker".to_string(),
            timeout: Duration::from_secs(1800),
            enhancer: Some("gfpgan".to_string()),
            still: true,
            preprocess: "full".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetentionSettings {
    pub keep_artifacts: usize,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self { keep_artifacts: 3 }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".talkinghead").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn resolve_speech(file: Option<&SpeechConfig>) -> SpeechSettings {
    let defaults = SpeechSettings::default();
    match file {
        Some(cfg) => SpeechSettings {
            command: cfg.command.clone().unwrap_or(defaults.command),
            endpoint: cfg.endpoint.clone(),
            timeout: cfg
                .timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        },
        None => defaults,
    }
}

fn resolve_portrait(file: Option<&PortraitConfig>) -> PortraitSettings {
    let defaults = PortraitSettings::default();
    match file {
        Some(cfg) => PortraitSettings {
            command: cfg.command.clone().unwrap_or(defaults.command),
            timeout: cfg
                .timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            prompt: cfg.prompt.clone().unwrap_or(defaults.prompt),
            seed: cfg.seed,
            steps: cfg.steps.unwrap_or(defaults.steps),
            size: cfg.size.unwrap_or(defaults.size),
        },
        None => defaults,
    }
}

fn resolve_animation(file: Option<&AnimationConfig>) -> AnimationSettings {
    let defaults = AnimationSettings::default();
    match file {
        Some(cfg) => AnimationSettings {
            command: cfg.command.clone().unwrap_or(defaults.command),
            timeout: cfg
                .timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            enhancer: cfg.enhancer.clone().or(defaults.enhancer),
            still: cfg.still.unwrap_or(defaults.still),
            preprocess: cfg.preprocess.clone().unwrap_or(defaults.preprocess),
        },
        None => defaults,
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    // Default home directory
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".talkinghead");

    // Check for config file
    let config_file = find_config_file();

    let (home, artifacts, speech, portrait, animation, retention) =
        if let Some(ref config_path) = config_file {
            let config = load_config_file(config_path)?;

            // Base directory is the parent of .talkinghead/ (project root)
            let base_dir = config_path
                .parent() // .talkinghead/
                .and_then(|p| p.parent()) // project root
                .unwrap_or(Path::new("."));

            let home = if let Ok(env_home) = std::env::var("TALKINGHEAD_HOME") {
                PathBuf::from(env_home)
            } else if let Some(ref home_path) = config.paths.home {
                // home is relative to the .talkinghead/ directory
                let config_dir = config_path.parent().unwrap_or(Path::new("."));
                resolve_path(config_dir, home_path)
            } else {
                default_home.clone()
            };

            let artifacts = if let Ok(env_artifacts) = std::env::var("TALKINGHEAD_ARTIFACTS") {
                PathBuf::from(env_artifacts)
            } else if let Some(ref artifacts_path) = config.paths.artifacts {
                resolve_path(base_dir, artifacts_path)
            } else {
                home.join("artifacts")
            };

            let stages = config.stages.unwrap_or_default();
            let retention = RetentionSettings {
                keep_artifacts: config
                    .retention
                    .as_ref()
                    .and_then(|r| r.keep_artifacts)
                    .unwrap_or(RetentionSettings::default().keep_artifacts),
            };

            (
                home,
                artifacts,
                resolve_speech(stages.speech.as_ref()),
                resolve_portrait(stages.portrait.as_ref()),
                resolve_animation(stages.animation.as_ref()),
                retention,
            )
        } else {
            // No config file - use env vars or defaults
            let home = std::env::var("TALKINGHEAD_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_home.clone());

            let artifacts = std::env::var("TALKINGHEAD_ARTIFACTS")
                .map(PathBuf::from)
                .unwrap_or_else(|_| home.join("artifacts"));

            (
                home,
                artifacts,
                SpeechSettings::default(),
                PortraitSettings::default(),
                AnimationSettings::default(),
                RetentionSettings::default(),
            )
        };

    Ok(ResolvedConfig {
        home,
        artifacts,
        config_file,
        speech,
        portrait,
        animation,
        retention,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

// ============================================================================
// Convenience functions
// ============================================================================

/// Get the talkinghead home directory (engine state)
pub fn talkinghead_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the runs directory ($TALKINGHEAD_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("runs"))
}

/// Get the artifact store root
pub fn artifacts_dir() -> Result<PathBuf> {
    Ok(config()?.artifacts.clone())
}
