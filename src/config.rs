use anyhow::Context;
use mbterm_lib::protocol as proto;
use mbterm_lib::session_log;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// Serial defaults read from a YAML file. Command line values win.
///
/// ```yaml
/// serial:
///   device: /dev/ttyUSB1
///   baud_rate: 19200
///   timeout: 500ms
///   delay: 20ms
///   log_capacity: 200
///   reassemble: true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_device_name")]
    pub device: String,
    #[serde(default)]
    pub baud_rate: proto::BaudRate,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_delay", with = "humantime_serde")]
    pub delay: Duration,
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Reassemble frames split across serial reads.
    #[serde(default)]
    pub reassemble: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: default_device_name(),
            baud_rate: proto::BaudRate::default(),
            timeout: default_timeout(),
            delay: default_delay(),
            log_capacity: default_log_capacity(),
            reassemble: false,
        }
    }
}

pub fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_log_capacity() -> usize {
    session_log::DEFAULT_CAPACITY
}

pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    log::debug!("Loading config file from {:?}", path);
    let config_file =
        File::open(path).with_context(|| format!("Cannot open config file {path:?}"))?;
    let config: Config = serde_yaml::from_reader(&config_file)
        .with_context(|| format!("Cannot parse config file {path:?}"))?;
    Ok(config)
}
