//! Stage and pipeline configuration
//!
//! This module provides:
//! - Typed parameter sets for every stage variant
//! - Parsing of the command-line suboption form (`gain,g=-6,d=0.001`)
//! - Pipeline presets with TOML serialization
//! - Construction of stages and pipelines from configuration

use crate::domain::audio::{db_to_linear, Geometry};
use crate::domain::diagnostics::DiagnosticSink;
use crate::domain::dsp::{
    BiquadCoeffs, BiquadDesign, ClipStage, FilterType, FirStage, GainStage, GateStage, IirStage,
    Stage, StageKind,
};
use crate::domain::pipeline::Pipeline;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while reading or applying configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown stage type: {0}")]
    UnknownStage(String),

    #[error("{stage}: unknown option '{key}'")]
    UnknownKey { stage: StageKind, key: String },

    #[error("{stage}: missing value for option '{key}'")]
    MissingValue { stage: StageKind, key: String },

    #[error("{stage}: '{value}' is not a valid number for option '{key}'")]
    InvalidNumber {
        stage: StageKind,
        key: String,
        value: String,
    },

    #[error("{stage}: invalid option combination [{keys}]")]
    InvalidCombination { stage: StageKind, keys: String },

    #[error("Cannot read coefficient file {}: {source}", path.display())]
    CoefficientOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Coefficient file {}, line {line}: '{value}' is not a number", path.display())]
    CoefficientParse {
        path: PathBuf,
        line: usize,
        value: String,
    },

    #[error("Coefficient file {} contains no coefficients", path.display())]
    CoefficientEmpty { path: PathBuf },
}

// ============================================================================
// Stage parameter sets
// ============================================================================

/// Gain/delay parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GainParams {
    /// Gain in dB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub g: Option<f32>,
    /// Linear gain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gl: Option<f32>,
    /// Delay in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<f32>,
    /// Clip threshold in dBFS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<f32>,
}

/// Clip parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClipParams {
    /// Linear threshold
    pub t: f32,
}

/// Noise gate parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateParams {
    /// Threshold in dBFS
    pub t: f32,
    /// Hold time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<f32>,
}

/// FIR parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirParams {
    /// Coefficient file
    pub h: PathBuf,
}

/// Biquad parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IirParams {
    pub filter: FilterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub f: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub g: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b0: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a2: Option<f64>,
}

impl IirParams {
    /// Parameters with only the filter type set
    pub fn new(filter: FilterType) -> Self {
        Self {
            filter,
            f: None,
            q: None,
            g: None,
            b0: None,
            b1: None,
            b2: None,
            a1: None,
            a2: None,
        }
    }

    fn fields(&self) -> [(&'static str, Option<f64>); 8] {
        [
            ("f", self.f),
            ("q", self.q),
            ("g", self.g),
            ("b0", self.b0),
            ("b1", self.b1),
            ("b2", self.b2),
            ("a1", self.a1),
            ("a2", self.a2),
        ]
    }

    fn design(&self) -> Result<BiquadDesign> {
        let missing = || ConfigError::InvalidCombination {
            stage: StageKind::Iir,
            keys: present_keys(self),
        };
        if self.filter == FilterType::Direct {
            let coeffs = BiquadCoeffs {
                b0: self.b0.ok_or_else(missing)?,
                b1: self.b1.ok_or_else(missing)?,
                b2: self.b2.ok_or_else(missing)?,
                a1: self.a1.ok_or_else(missing)?,
                a2: self.a2.ok_or_else(missing)?,
            };
            return Ok(BiquadDesign::Direct(coeffs));
        }
        Ok(BiquadDesign::Designed {
            filter: self.filter,
            freq: self.f.ok_or_else(missing)?,
            q: self.q.ok_or_else(missing)?,
            gain_db: self.g.unwrap_or(0.0),
        })
    }
}

fn present_keys(params: &IirParams) -> String {
    StageConfig::Iir(params.clone()).keys().join(",")
}

/// Configuration of one stage, tagged by `type` in presets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StageConfig {
    Gain(GainParams),
    Clip(ClipParams),
    Gate(GateParams),
    Fir(FirParams),
    Iir(IirParams),
}

impl StageConfig {
    pub fn kind(&self) -> StageKind {
        match self {
            StageConfig::Gain(_) => StageKind::Gain,
            StageConfig::Clip(_) => StageKind::Clip,
            StageConfig::Gate(_) => StageKind::Gate,
            StageConfig::Fir(_) => StageKind::Fir,
            StageConfig::Iir(_) => StageKind::Iir,
        }
    }

    /// Supplied option names, as written in the suboption form
    pub fn keys(&self) -> Vec<&'static str> {
        fn set<T>(keys: &mut Vec<&'static str>, key: &'static str, value: &Option<T>) {
            if value.is_some() {
                keys.push(key);
            }
        }

        let mut keys = Vec::new();
        match self {
            StageConfig::Gain(p) => {
                set(&mut keys, "g", &p.g);
                set(&mut keys, "gl", &p.gl);
                set(&mut keys, "d", &p.d);
                set(&mut keys, "t", &p.t);
            }
            StageConfig::Clip(_) => keys.push("t"),
            StageConfig::Gate(p) => {
                keys.push("t");
                set(&mut keys, "h", &p.h);
            }
            StageConfig::Fir(_) => keys.push("h"),
            StageConfig::Iir(p) => {
                keys.push(p.filter.name());
                for (key, value) in p.fields() {
                    set(&mut keys, key, &value);
                }
            }
        }
        keys
    }

    /// Check that the supplied options form a valid combination
    pub fn validate(&self) -> Result<()> {
        let keys = self.keys();
        if self.kind().accepts(&keys) {
            Ok(())
        } else {
            Err(ConfigError::InvalidCombination {
                stage: self.kind(),
                keys: keys.join(","),
            })
        }
    }

    /// Parse the suboption form: stage name, then `key=value` pairs or flags
    ///
    /// ```
    /// use qdsp_core::StageConfig;
    ///
    /// let stage = StageConfig::parse("gain,g=-6,d=0.001").unwrap();
    /// assert_eq!(stage.to_string(), "gain,g=-6,d=0.001");
    /// ```
    pub fn parse(spec: &str) -> Result<Self> {
        let mut parts = spec.split(',').map(str::trim).filter(|p| !p.is_empty());
        let name = parts
            .next()
            .ok_or_else(|| ConfigError::Invalid("empty stage description".to_string()))?;
        let kind =
            StageKind::from_name(name).ok_or_else(|| ConfigError::UnknownStage(name.to_string()))?;

        let mut opts = Suboptions::new(kind);
        for part in parts {
            opts.push(part)?;
        }

        let config = match kind {
            StageKind::Gain => StageConfig::Gain(GainParams {
                g: opts.number("g")?,
                gl: opts.number("gl")?,
                d: opts.number("d")?,
                t: opts.number("t")?,
            }),
            StageKind::Clip => StageConfig::Clip(ClipParams {
                t: opts.required("t")?,
            }),
            StageKind::Gate => StageConfig::Gate(GateParams {
                t: opts.required("t")?,
                h: opts.number("h")?,
            }),
            StageKind::Fir => StageConfig::Fir(FirParams {
                h: PathBuf::from(opts.required_str("h")?),
            }),
            StageKind::Iir => StageConfig::Iir(IirParams {
                filter: opts.filter()?,
                f: opts.number("f")?,
                q: opts.number("q")?,
                g: opts.number("g")?,
                b0: opts.number("b0")?,
                b1: opts.number("b1")?,
                b2: opts.number("b2")?,
                a1: opts.number("a1")?,
                a2: opts.number("a2")?,
            }),
        };

        config.validate()?;
        Ok(config)
    }

    /// Construct the stage
    pub fn build(&self, sink: &dyn DiagnosticSink) -> Result<Box<dyn Stage>> {
        self.validate()?;

        let stage: Box<dyn Stage> = match self {
            StageConfig::Gain(p) => {
                let gain = match (p.g, p.gl) {
                    (Some(db), _) => db_to_linear(db),
                    (None, Some(linear)) => linear,
                    (None, None) => 1.0,
                };
                Box::new(GainStage::new(
                    gain,
                    p.d.unwrap_or(0.0),
                    p.t.map(db_to_linear),
                )?)
            }
            StageConfig::Clip(p) => Box::new(ClipStage::new(p.t)?),
            StageConfig::Gate(p) => Box::new(GateStage::new(p.t, p.h.unwrap_or(0.0))?),
            StageConfig::Fir(p) => Box::new(FirStage::from_file(&p.h)?),
            StageConfig::Iir(p) => Box::new(IirStage::new(p.design()?)),
        };

        sink.info(format_args!("created stage {}", self));
        Ok(stage)
    }
}

impl FromStr for StageConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Renders the suboption form accepted by [`StageConfig::parse`]
impl fmt::Display for StageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(f: &mut fmt::Formatter<'_>, key: &str, value: &Option<T>) -> fmt::Result {
            match value {
                Some(v) => write!(f, ",{}={}", key, v),
                None => Ok(()),
            }
        }

        f.write_str(self.kind().name())?;
        match self {
            StageConfig::Gain(p) => {
                opt(f, "g", &p.g)?;
                opt(f, "gl", &p.gl)?;
                opt(f, "d", &p.d)?;
                opt(f, "t", &p.t)
            }
            StageConfig::Clip(p) => write!(f, ",t={}", p.t),
            StageConfig::Gate(p) => {
                write!(f, ",t={}", p.t)?;
                opt(f, "h", &p.h)
            }
            StageConfig::Fir(p) => write!(f, ",h={}", p.h.display()),
            StageConfig::Iir(p) => {
                write!(f, ",{}", p.filter)?;
                for (key, value) in p.fields() {
                    opt(f, key, &value)?;
                }
                Ok(())
            }
        }
    }
}

/// `key=value` pairs and bare flags of one stage description
struct Suboptions {
    stage: StageKind,
    values: Vec<(String, String)>,
    flags: Vec<FilterType>,
}

impl Suboptions {
    fn new(stage: StageKind) -> Self {
        Self {
            stage,
            values: Vec::new(),
            flags: Vec::new(),
        }
    }

    fn allowed(&self) -> &'static [&'static str] {
        match self.stage {
            StageKind::Gain => &["g", "gl", "d", "t"],
            StageKind::Clip => &["t"],
            StageKind::Gate => &["t", "h"],
            StageKind::Fir => &["h"],
            StageKind::Iir => &["f", "q", "g", "b0", "b1", "b2", "a1", "a2"],
        }
    }

    fn push(&mut self, part: &str) -> Result<()> {
        let (key, value) = match part.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value.trim())),
            None => (part, None),
        };

        if self.stage == StageKind::Iir && value.is_none() {
            if let Some(filter) = FilterType::from_name(key) {
                self.flags.push(filter);
                return Ok(());
            }
        }
        if !self.allowed().contains(&key) {
            return Err(ConfigError::UnknownKey {
                stage: self.stage,
                key: key.to_string(),
            });
        }
        match value {
            Some(value) if !value.is_empty() => {
                // Later occurrences win
                self.values.retain(|(k, _)| k != key);
                self.values.push((key.to_string(), value.to_string()));
                Ok(())
            }
            _ => Err(ConfigError::MissingValue {
                stage: self.stage,
                key: key.to_string(),
            }),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn number<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(|value| {
                value.parse::<T>().map_err(|_| ConfigError::InvalidNumber {
                    stage: self.stage,
                    key: key.to_string(),
                    value: value.to_string(),
                })
            })
            .transpose()
    }

    fn combination_error(&self) -> ConfigError {
        let mut keys: Vec<&str> = self.flags.iter().map(|f| f.name()).collect();
        keys.extend(self.values.iter().map(|(k, _)| k.as_str()));
        ConfigError::InvalidCombination {
            stage: self.stage,
            keys: keys.join(","),
        }
    }

    fn required<T: FromStr>(&self, key: &str) -> Result<T> {
        self.number(key)?.ok_or_else(|| self.combination_error())
    }

    fn required_str(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| self.combination_error())
    }

    fn filter(&self) -> Result<FilterType> {
        match self.flags.as_slice() {
            [filter] => Ok(*filter),
            _ => Err(self.combination_error()),
        }
    }
}

// ============================================================================
// Pipeline presets
// ============================================================================

/// Ordered stage list plus the block size to run it at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Frames per block
    #[serde(default = "PipelineConfig::default_frames")]
    pub frames: usize,

    /// Stages in processing order
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frames: Self::DEFAULT_FRAMES,
            stages: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub const DEFAULT_FRAMES: usize = 1024;

    fn default_frames() -> usize {
        Self::DEFAULT_FRAMES
    }

    /// Parse a list of suboption strings
    pub fn from_tokens<S: AsRef<str>>(frames: usize, tokens: &[S]) -> Result<Self> {
        let stages = tokens
            .iter()
            .map(|t| StageConfig::parse(t.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { frames, stages })
    }

    /// Load a preset from a TOML file
    ///
    /// Relative coefficient file paths are resolved against the preset's
    /// directory.
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading pipeline preset");

        let contents = fs::read_to_string(path).await?;
        let mut config: Self = toml::from_str(&contents)?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        for stage in &mut config.stages {
            stage.validate()?;
            if let StageConfig::Fir(params) = stage {
                if params.h.is_relative() {
                    params.h = base.join(&params.h);
                }
            }
        }

        debug!(stages = config.stages.len(), "Preset loaded successfully");
        Ok(config)
    }

    /// Save the preset to a TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving pipeline preset");

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Preset saved successfully");
        Ok(())
    }

    /// Geometry for this preset at a given sample rate and channel count
    pub fn geometry(&self, sample_rate: u32, channels: usize) -> crate::domain::audio::Result<Geometry> {
        Geometry::new(sample_rate, channels, self.frames)
    }

    /// Construct every stage and wrap them in an unconfigured pipeline
    pub fn build(&self, sink: Arc<dyn DiagnosticSink>) -> Result<Pipeline> {
        let stages = self
            .stages
            .iter()
            .map(|stage| stage.build(sink.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Pipeline::new(stages, sink))
    }
}
