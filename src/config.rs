use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine configuration, loadable from CLI args, a TOML config file, or both
/// (CLI wins).
///
/// Example configuration file content
/// # RTMP ingest configuration
///
/// port = 8889
/// app = "app"
/// timeout_secs = 10
/// output = "/home/user/Desktop/output.mp4"
/// # url = "rtmp://192.168.1.7:8889/live/app"  # skip interface discovery
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Ingest endpoint URL; when unset, the endpoint is discovered from the
    /// first qualifying network interface
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// RTMP listen port used when building the discovered endpoint URL
    #[arg(short, long, default_value_t = 8889)]
    #[serde(default = "default_port")]
    pub port: u16,

    /// RTMP application path segment (`rtmp://<addr>:<port>/live/<app>`)
    #[arg(short, long, default_value = "app")]
    #[serde(default = "default_app")]
    pub app: String,

    /// Connection/read timeout for the input open, in seconds
    #[arg(short, long, default_value_t = 10)]
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,

    /// Output MP4 path; defaults to `output.mp4` on the Desktop
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Enable verbose FFmpeg library logging
    #[arg(long, default_value_t = false)]
    #[serde(default)]
    pub ffmpeg_debug: bool,

    /// Configuration file path (CLI arguments take precedence)
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: None,
            port: default_port(),
            app: default_app(),
            timeout_secs: default_timeout(),
            output: None,
            ffmpeg_debug: false,
            config: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        if self.port == default_port() {
            self.port = file_config.port;
        }
        if self.app == default_app() {
            self.app = file_config.app;
        }
        if self.timeout_secs == default_timeout() {
            self.timeout_secs = file_config.timeout_secs;
        }
        if !self.ffmpeg_debug {
            self.ffmpeg_debug = file_config.ffmpeg_debug;
        }
        if self.url.is_none() {
            self.url = file_config.url;
        }
        if self.output.is_none() {
            self.output = file_config.output;
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.app.is_empty() {
            return Err(anyhow::anyhow!("RTMP application name cannot be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow::anyhow!("timeout must be at least one second"));
        }
        if let Some(url) = &self.url {
            if !url.starts_with("rtmp://") && !url.starts_with("rtmps://") {
                return Err(anyhow::anyhow!(
                    "ingest URL must start with rtmp:// or rtmps://"
                ));
            }
        }
        Ok(())
    }

    /// Resolved capture file path: explicit setting, or `output.mp4` on the
    /// platform Desktop directory (temp dir when no Desktop exists).
    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => PathBuf::from(path),
            None => dirs::desktop_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("output.mp4"),
        }
    }
}

fn default_port() -> u16 {
    8889
}

fn default_app() -> String {
    "app".to_string()
}

fn default_timeout() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_endpoint_layout() {
        let config = Config::default();
        assert_eq!(config.port, 8889);
        assert_eq!(config.app, "app");
        assert_eq!(config.timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_non_rtmp_urls() {
        let config = Config {
            url: Some("http://example.com/live".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_values_yield_to_cli_overrides() {
        let cli = Config {
            port: 1935,
            ..Default::default()
        };
        let file = Config {
            port: 9999,
            app: "studio".into(),
            ..Default::default()
        };
        let merged = cli.merge_with_file(file);
        assert_eq!(merged.port, 1935);
        assert_eq!(merged.app, "studio");
    }

    #[test]
    fn explicit_output_wins_over_desktop_default() {
        let config = Config {
            output: Some("/tmp/capture.mp4".into()),
            ..Default::default()
        };
        assert_eq!(config.output_path(), PathBuf::from("/tmp/capture.mp4"));
    }
}
