//! Compilation and runtime configuration
//!
//! Defaults can be overridden from the environment:
//! `CPYC_OPT_LEVEL` (`none`, `basic`, `aggressive`) and `CPYC_HEAP_WORDS`.

use serde::{Deserialize, Serialize};

/// Optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptLevel {
    /// No optimizations
    None,
    /// Constant propagation and folding
    Basic,
    /// Constant propagation followed by copy propagation
    #[default]
    Aggressive,
}

impl OptLevel {
    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "0" => Some(OptLevel::None),
            "basic" | "1" => Some(OptLevel::Basic),
            "aggressive" | "full" | "2" => Some(OptLevel::Aggressive),
            _ => None,
        }
    }
}

impl std::fmt::Display for OptLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptLevel::None => write!(f, "none"),
            OptLevel::Basic => write!(f, "basic"),
            OptLevel::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Default safety limit on whole-program optimization rounds
pub const DEFAULT_MAX_ROUNDS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOptions {
    #[serde(default)]
    pub opt_level: OptLevel,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::default(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

impl CompileOptions {
    pub fn with_opt_level(mut self, level: OptLevel) -> Self {
        self.opt_level = level;
        self
    }

    /// Defaults, with `CPYC_OPT_LEVEL` applied when set to a recognized level
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(value) = std::env::var("CPYC_OPT_LEVEL") {
            match OptLevel::parse(&value) {
                Some(level) => options.opt_level = level,
                None => log::warn!("ignoring unrecognized CPYC_OPT_LEVEL `{}`", value),
            }
        }
        options
    }
}

/// Default linear memory capacity in words
pub const DEFAULT_HEAP_WORDS: usize = 65536;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapConfig {
    #[serde(default = "default_capacity")]
    pub capacity_words: usize,
    /// Largest reference number handed out before allocation fails
    #[serde(default = "default_max_references")]
    pub max_references: u32,
}

fn default_capacity() -> usize {
    DEFAULT_HEAP_WORDS
}

fn default_max_references() -> u32 {
    i32::MAX as u32
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            capacity_words: DEFAULT_HEAP_WORDS,
            max_references: default_max_references(),
        }
    }
}

impl HeapConfig {
    pub fn with_capacity(capacity_words: usize) -> Self {
        Self {
            capacity_words,
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("CPYC_HEAP_WORDS") {
            match value.trim().parse::<usize>() {
                Ok(words) if words > 0 => config.capacity_words = words,
                _ => log::warn!("ignoring invalid CPYC_HEAP_WORDS `{}`", value),
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opt_level_parse() {
        assert_eq!(OptLevel::parse("NONE"), Some(OptLevel::None));
        assert_eq!(OptLevel::parse("1"), Some(OptLevel::Basic));
        assert_eq!(OptLevel::parse("full"), Some(OptLevel::Aggressive));
        assert_eq!(OptLevel::parse("fast"), None);
    }

    #[test]
    fn test_defaults() {
        let options = CompileOptions::default();
        assert_eq!(options.opt_level, OptLevel::Aggressive);
        assert_eq!(options.max_rounds, DEFAULT_MAX_ROUNDS);
        assert_eq!(HeapConfig::default().max_references, 2147483647);
    }

    #[test]
    fn test_options_from_partial_json() {
        let options: CompileOptions = serde_json::from_str(r#"{"opt_level":"basic"}"#).unwrap();
        assert_eq!(options.opt_level, OptLevel::Basic);
        assert_eq!(options.max_rounds, DEFAULT_MAX_ROUNDS);

        let heap: HeapConfig = serde_json::from_str(r#"{"capacity_words":128}"#).unwrap();
        assert_eq!(heap, HeapConfig::with_capacity(128));
    }
}
