//! Analysis configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bottom_up::FramePolicy;

/// Frames forwarded to the parser unless configured otherwise
pub const DEFAULT_MAX_FRAMES: u32 = 1024;

/// Bytes read from the stream source per chunk
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// How sample costs are grouped at the top of the bottom-up tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CostAggregation {
    /// Frames directly below the implicit root
    #[default]
    BySymbol,
    /// One synthetic root per thread
    ByThread,
    /// One synthetic root per process
    ByProcess,
    /// One synthetic root per cpu
    ByCpu,
}

impl CostAggregation {
    /// Whether the first tree level holds synthetic grouping symbols
    pub fn has_synthetic_root(&self) -> bool {
        !matches!(self, CostAggregation::BySymbol)
    }
}

impl std::str::FromStr for CostAggregation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "by-symbol" | "symbol" => Ok(CostAggregation::BySymbol),
            "by-thread" | "thread" => Ok(CostAggregation::ByThread),
            "by-process" | "process" => Ok(CostAggregation::ByProcess),
            "by-cpu" | "cpu" => Ok(CostAggregation::ByCpu),
            _ => anyhow::bail!("Invalid cost aggregation: {}", s),
        }
    }
}

/// Settings for decoding and aggregating one recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// `hotspot-perfparser` compatible binary used for raw `perf.data` input
    pub parser_binary: Option<PathBuf>,

    /// Forwarded as `--sysroot`
    pub sysroot: Option<String>,

    /// Forwarded as `--kallsyms`
    pub kallsyms: Option<String>,

    /// Forwarded as `--debug`
    pub debug_paths: Option<String>,

    /// Forwarded as `--extra`
    pub extra_lib_paths: Option<String>,

    /// Forwarded as `--app`
    pub app_path: Option<String>,

    /// Forwarded as `--arch`
    pub arch: Option<String>,

    /// Maximum unwound frames per sample
    pub max_frames: u32,

    /// Prepended to `DEBUGINFOD_URLS` for the parser process
    pub debuginfod_urls: Vec<String>,

    pub cost_aggregation: CostAggregation,

    pub frame_policy: FramePolicy,

    /// Bytes requested from the stream source per read
    pub read_chunk_size: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            parser_binary: None,
            sysroot: None,
            kallsyms: None,
            debug_paths: None,
            extra_lib_paths: None,
            app_path: None,
            arch: None,
            max_frames: DEFAULT_MAX_FRAMES,
            debuginfod_urls: Vec::new(),
            cost_aggregation: CostAggregation::default(),
            frame_policy: FramePolicy::default(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl AnalysisConfig {
    /// Load from an optional file, overridden by `PERFSTREAM_*` variables.
    ///
    /// Nested keys use `__` in variable names; `PERFSTREAM_DEBUGINFOD_URLS`
    /// is split on spaces.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("PERFSTREAM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(" ")
                .with_list_parse_key("debuginfod_urls"),
        );

        let config: AnalysisConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration values")?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_frames == 0 {
            anyhow::bail!("max_frames must be greater than 0");
        }

        if self.read_chunk_size == 0 {
            anyhow::bail!("read_chunk_size must be greater than 0");
        }

        Ok(())
    }

    /// Arguments for the parser process reading `input`
    pub fn parser_args(&self, input: &Path) -> Vec<String> {
        let mut args = vec![
            "--input".to_string(),
            input.display().to_string(),
            "--max-frames".to_string(),
            self.max_frames.to_string(),
        ];
        let optional = [
            ("--sysroot", &self.sysroot),
            ("--kallsyms", &self.kallsyms),
            ("--debug", &self.debug_paths),
            ("--extra", &self.extra_lib_paths),
            ("--app", &self.app_path),
            ("--arch", &self.arch),
        ];
        for (flag, value) in optional {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                args.push(flag.to_string());
                args.push(value.to_string());
            }
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AnalysisConfig::default();
        assert_eq!(config.max_frames, 1024);
        assert_eq!(config.cost_aggregation, CostAggregation::BySymbol);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let config = AnalysisConfig {
            max_frames: 0,
            ..AnalysisConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AnalysisConfig {
            read_chunk_size: 0,
            ..AnalysisConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parser_args() {
        let config = AnalysisConfig {
            sysroot: Some("/opt/sysroot".to_string()),
            arch: Some(String::new()),
            max_frames: 64,
            ..AnalysisConfig::default()
        };
        let args = config.parser_args(Path::new("perf.data"));
        assert_eq!(
            args,
            vec![
                "--input",
                "perf.data",
                "--max-frames",
                "64",
                "--sysroot",
                "/opt/sysroot"
            ]
        );
    }

    #[test]
    fn test_cost_aggregation_from_str() {
        assert_eq!(
            "by-thread".parse::<CostAggregation>().unwrap(),
            CostAggregation::ByThread
        );
        assert_eq!("CPU".parse::<CostAggregation>().unwrap(), CostAggregation::ByCpu);
        assert!("by-library".parse::<CostAggregation>().is_err());
        assert!(!CostAggregation::BySymbol.has_synthetic_root());
        assert!(CostAggregation::ByProcess.has_synthetic_root());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "max_frames = 128\ncost_aggregation = \"by-process\"\nframe_policy = \"keep-all\"\nsysroot = \"/sysroot\""
        )
        .unwrap();

        let config = AnalysisConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.max_frames, 128);
        assert_eq!(config.cost_aggregation, CostAggregation::ByProcess);
        assert_eq!(config.frame_policy, FramePolicy::KeepAll);
        assert_eq!(config.sysroot.as_deref(), Some("/sysroot"));
        assert_eq!(config.read_chunk_size, DEFAULT_READ_CHUNK_SIZE);
    }

    #[test]
    fn test_load_rejects_invalid_file_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "max_frames = 0").unwrap();
        assert!(AnalysisConfig::load(Some(file.path())).is_err());
    }
}
