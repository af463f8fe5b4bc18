//! Loading pipeline: finds data files, deserializes them, and resolves the
//! on-disk schema into `ladder-core` definitions.
//!
//! Chain references (`follows`, scaling targets) are carried through as
//! names. Checking them is the chain graph's job, so a reload can reject
//! just the offending types instead of the whole file.

use ladder_core::id::CurrencyId;
use ladder_core::progression::{
    CostModel, CostScaling, ProgressionType, ResetPolicy, RewardRule, ScalingMode,
};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::schema::*;
use crate::settings::RuntimeSettings;

/// Base name of the required progression file.
pub const PROGRESSIONS_FILE: &str = "progressions";
/// Base name of the optional settings file.
pub const SETTINGS_FILE: &str = "settings";

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    /// A value parsed but is out of range for its field.
    #[error("invalid value for '{name}' in {file}: {detail}")]
    Invalid {
        file: PathBuf,
        name: String,
        detail: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file from its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Look for `{base_name}.ron`, `.toml` or `.json` in `dir`.
///
/// Returns `Ok(None)` if none exists and `ConflictingFormats` if more than
/// one does.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;

    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

/// Like [`find_data_file`], but a missing file is an error.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

fn parse_error(path: &Path, e: impl std::fmt::Display) -> DataLoadError {
    DataLoadError::Parse {
        file: path.to_path_buf(),
        detail: e.to_string(),
    }
}

/// Read a file and deserialize it according to its extension.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(path, e)),
    }
}

/// Deserialize a list. TOML files hold the array under `toml_key` in a
/// top-level table; RON and JSON files are the array itself.
pub fn deserialize_list<T: DeserializeOwned>(
    path: &Path,
    toml_key: &str,
) -> Result<Vec<T>, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => {
            let mut table: toml::Table =
                toml::from_str(&content).map_err(|e| parse_error(path, e))?;
            let array = table.remove(toml_key).ok_or_else(|| {
                parse_error(path, format!("missing key '{toml_key}' in TOML file"))
            })?;
            array
                .try_into()
                .map_err(|e: toml::de::Error| parse_error(path, e))
        }
    }
}

/// Return a `DuplicateName` error if `name` is already in `map`.
pub fn check_duplicate<V>(
    map: &HashMap<String, V>,
    name: &str,
    file: &Path,
) -> Result<(), DataLoadError> {
    if map.contains_key(name) {
        Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

// ===========================================================================
// Resolution
// ===========================================================================

/// Everything a data directory defines.
#[derive(Debug, Clone)]
pub struct LadderData {
    /// Definitions in declaration order.
    pub progressions: Vec<ProgressionType>,
    pub settings: RuntimeSettings,
}

/// Load `progressions.*` (required) and `settings.*` (optional) from `dir`.
pub fn load_ladder_data(dir: &Path) -> Result<LadderData, DataLoadError> {
    let progressions = load_progressions(&require_data_file(dir, PROGRESSIONS_FILE)?)?;
    let settings = match find_data_file(dir, SETTINGS_FILE)? {
        Some(path) => deserialize_file(&path)?,
        None => RuntimeSettings::default(),
    };
    Ok(LadderData {
        progressions,
        settings,
    })
}

/// Load and resolve one progression file.
pub fn load_progressions(path: &Path) -> Result<Vec<ProgressionType>, DataLoadError> {
    let data: Vec<ProgressionData> = deserialize_list(path, "progressions")?;

    // name -> declaration index
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(data.len());
    data.into_iter()
        .enumerate()
        .map(|(i, entry)| {
            check_duplicate(&seen, &entry.name, path)?;
            seen.insert(entry.name.clone(), i);
            resolve_progression(entry, path)
        })
        .collect()
}

fn resolve_progression(data: ProgressionData, path: &Path) -> Result<ProgressionType, DataLoadError> {
    let invalid = |detail: String| DataLoadError::Invalid {
        file: path.to_path_buf(),
        name: data.name.clone(),
        detail,
    };

    if data.name.trim().is_empty() {
        return Err(invalid("name must not be empty".into()));
    }

    let cost_model = match data.cost {
        CostData::Linear { base, per_level } => CostModel::Linear { base, per_level },
        CostData::Exponential { base, multiplier } => {
            if !multiplier.is_finite() || multiplier < 0.0 {
                return Err(invalid(format!("multiplier {multiplier} must be >= 0")));
            }
            CostModel::Exponential { base, multiplier }
        }
    };

    let scaling = match &data.scaling {
        Some(s) => {
            if !s.value.is_finite() {
                return Err(invalid(format!("scaling value {} is not finite", s.value)));
            }
            Some(CostScaling {
                scale_with: s.with.clone(),
                mode: match s.mode {
                    ScalingModeData::Multiplier => ScalingMode::Multiplicative,
                    ScalingModeData::Additive => ScalingMode::Additive,
                },
                value: s.value,
            })
        }
        None => None,
    };

    let mut reward_rules = Vec::new();
    if !data.rewards.every_level.is_empty() {
        reward_rules.push(RewardRule::EveryLevel(data.rewards.every_level.clone()));
    }
    for (key, commands) in &data.rewards.interval {
        let n = parse_level(key).map_err(&invalid)?;
        if n == 0 {
            return Err(invalid("reward interval must be non-zero".into()));
        }
        reward_rules.push(RewardRule::Interval {
            n,
            commands: commands.clone(),
        });
    }
    for (key, commands) in &data.rewards.first_time {
        let level = parse_level(key).map_err(&invalid)?;
        reward_rules.push(RewardRule::FirstTime {
            level,
            commands: commands.clone(),
        });
    }

    let mut def = ProgressionType::new(data.name.clone());
    def.display_name = data.display_name.clone().unwrap_or_else(|| data.name.clone());
    def.command = data.command.clone().unwrap_or_else(|| data.name.clone());
    def.command_alias = data.command_alias.clone();
    def.follows = data.follows.clone();
    def.level_limit = data.limit;
    def.enabled = data.enabled;
    def.requires_prior_max_level = data.requires_max_level;
    def.currency = CurrencyId::new(data.currency.clone());
    def.cost_model = cost_model;
    def.scaling = scaling;
    def.reset_on_advance = ResetPolicy {
        currencies: data
            .resets
            .currencies
            .iter()
            .map(|c| CurrencyId::new(c.clone()))
            .collect(),
        reset_previous: data.resets.previous,
    };
    def.auto_advance_enabled = data.auto.enabled;
    def.auto_advance_delay_ticks = data.auto.delay_ticks;
    def.max_advance_enabled = data.max_enabled;
    def.reward_rules = reward_rules;
    Ok(def)
}

fn parse_level(key: &str) -> Result<u64, String> {
    key.trim()
        .parse::<u64>()
        .map_err(|e| format!("level key '{key}': {e}"))
}

// ===========================================================================
// Tests
// ===========================================================================
