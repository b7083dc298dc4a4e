//! Simple configuration persistence for irfx
//!
//! Stores the convolver settings and audio preferences.

use crate::preprocess::{AutoGain, KernelPreprocessor};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Settings applied to a convolver
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolverSettings {
    /// Impulse response file, `None` for pass-through
    pub kernel_path: Option<PathBuf>,
    /// Stereo width in percent (0 - 200)
    pub ir_width: u32,
    pub autogain: AutoGain,
    pub input_gain_db: f32,
    pub output_gain_db: f32,
    pub bypass: bool,
    /// Upper bound for the operational block size (latency budget)
    pub max_block_size: usize,
}

impl Default for ConvolverSettings {
    fn default() -> Self {
        Self {
            kernel_path: None,
            ir_width: 100,
            autogain: AutoGain::default(),
            input_gain_db: 0.0,
            output_gain_db: 0.0,
            bypass: false,
            max_block_size: 8192,
        }
    }
}

impl ConvolverSettings {
    /// Preprocessor matching these settings
    pub fn preprocessor(&self) -> KernelPreprocessor {
        KernelPreprocessor::new(self.autogain, self.ir_width)
    }

    /// Whether switching from `other` to `self` requires rebuilding the kernel
    pub fn needs_reload(&self, other: &ConvolverSettings) -> bool {
        self.kernel_path != other.kernel_path
            || self.ir_width != other.ir_width
            || self.autogain != other.autogain
            || self.max_block_size != other.max_block_size
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub convolver: ConvolverSettings,
    /// Preferred host buffer size in frames
    pub block_size: usize,
    /// Folder searched for kernels by name
    pub ir_directory: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            convolver: ConvolverSettings::default(),
            block_size: 512,
            ir_directory: None,
        }
    }
}

impl Config {
    /// Load config from the default location
    ///
    /// Returns default config if file doesn't exist or can't be parsed.
    pub fn load() -> Self {
        let path = Self::config_path();
        Self::load_from(&path).unwrap_or_default()
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save config to the default location
    pub fn save(&self) -> io::Result<()> {
        let path = Self::config_path();
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, self.serialize())
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("irfx")
            .join("config.txt")
    }

    /// Parse config from simple key=value format
    ///
    /// Unknown keys and values that fail to parse keep their defaults.
    fn parse(content: &str) -> Self {
        let mut config = Self::default();
        let settings = &mut config.convolver;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "kernel_path" => {
                    settings.kernel_path = (!value.is_empty()).then(|| PathBuf::from(value));
                }
                "ir_width" => {
                    if let Ok(w) = value.parse::<u32>() {
                        settings.ir_width = w.min(KernelPreprocessor::MAX_WIDTH);
                    }
                }
                "autogain" => {
                    if let Some(mode) = AutoGain::parse(value) {
                        settings.autogain = mode;
                    }
                }
                "input_gain_db" => {
                    if let Some(db) = parse_finite(value) {
                        settings.input_gain_db = db;
                    }
                }
                "output_gain_db" => {
                    if let Some(db) = parse_finite(value) {
                        settings.output_gain_db = db;
                    }
                }
                "bypass" => {
                    if let Ok(b) = value.parse::<bool>() {
                        settings.bypass = b;
                    }
                }
                "max_block_size" => {
                    if let Ok(n) = value.parse::<usize>() {
                        if n > 0 {
                            settings.max_block_size = n;
                        }
                    }
                }
                "block_size" => {
                    if let Ok(n) = value.parse::<usize>() {
                        if n > 0 {
                            config.block_size = n;
                        }
                    }
                }
                "ir_directory" => {
                    config.ir_directory = (!value.is_empty()).then(|| PathBuf::from(value));
                }
                _ => {}
            }
        }

        config
    }

    /// Serialize config to simple key=value format
    fn serialize(&self) -> String {
        let s = &self.convolver;
        let mut lines = vec!["# irfx configuration".to_string()];

        if let Some(ref path) = s.kernel_path {
            lines.push(format!("kernel_path={}", path.display()));
        }
        lines.push(format!("ir_width={}", s.ir_width));
        lines.push(format!("autogain={}", s.autogain.as_str()));
        lines.push(format!("input_gain_db={}", s.input_gain_db));
        lines.push(format!("output_gain_db={}", s.output_gain_db));
        lines.push(format!("bypass={}", s.bypass));
        lines.push(format!("max_block_size={}", s.max_block_size));
        lines.push(format!("block_size={}", self.block_size));
        if let Some(ref dir) = self.ir_directory {
            lines.push(format!("ir_directory={}", dir.display()));
        }

        lines.join("\n")
    }
}

fn parse_finite(value: &str) -> Option<f32> {
    value.parse::<f32>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        let config = Config::parse("");
        assert_eq!(config, Config::default());
        assert_eq!(config.convolver.autogain, AutoGain::Peak);
    }

    #[test]
    fn test_parse_values() {
        let content = "# Comment\n\
                       kernel_path=/irs/hall.irs\n\
                       ir_width=150\n\
                       autogain=rms\n\
                       input_gain_db=-3.5\n\
                       bypass=true\n\
                       block_size=256";
        let config = Config::parse(content);

        assert_eq!(
            config.convolver.kernel_path,
            Some(PathBuf::from("/irs/hall.irs"))
        );
        assert_eq!(config.convolver.ir_width, 150);
        assert_eq!(config.convolver.autogain, AutoGain::Rms);
        assert!((config.convolver.input_gain_db + 3.5).abs() < 1e-6);
        assert!(config.convolver.bypass);
        assert_eq!(config.block_size, 256);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = Config::parse("ir_width=wide\nautogain=loud\nmax_block_size=0\nunknown=1\noutput_gain_db=inf");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_width_is_clamped() {
        let config = Config::parse("ir_width=900");
        assert_eq!(config.convolver.ir_width, 200);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut config = Config::default();
        config.convolver.kernel_path = Some(PathBuf::from("/test/room.irs"));
        config.convolver.autogain = AutoGain::Off;
        config.convolver.output_gain_db = 6.0;
        config.ir_directory = Some(PathBuf::from("/test"));

        let parsed = Config::parse(&config.serialize());
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_needs_reload() {
        let base = ConvolverSettings::default();

        let mut gain_only = base.clone();
        gain_only.output_gain_db = -6.0;
        gain_only.bypass = true;
        assert!(!gain_only.needs_reload(&base));

        let mut wider = base.clone();
        wider.ir_width = 120;
        assert!(wider.needs_reload(&base));
    }
}
