//! Runtime configuration.
//!
//! Everything here has a compiled-in default taken from one of the
//! `jcblock`/`tones` source variants. An INI file (default
//! `jcblockd.conf`, see `-c`) can override any of them; a missing file or
//! a missing key falls back to the default, so the daemon runs with zero
//! configuration on a fresh checkout.

use std::time::Duration;

use configparser::ini::Ini;
use log::warn;

use crate::dtmf::variants::DtmfVariant;

/// Serial device used when no `-p`/config override is given.
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";
/// ALSA PCM device name used when no config override is given.
pub const DEFAULT_AUDIO_DEVICE: &str = "default";

#[derive(Debug, Clone)]
pub struct Config {
  /// Serial device path for the modem.
  pub serial_port: String,
  /// ALSA capture device name.
  pub audio_device: String,
  /// Whether the `*`-key DTMF feature is active at all.
  pub dtmf_enabled: bool,
  /// Which Goertzel parameter/detection-policy set to run.
  pub dtmf_variant: DtmfVariant,
  /// True when an answering machine shares the line (gates the DTMF
  /// window to ring count == 3, spec.md §4.6 step 6.4).
  pub answering_machine_present: bool,
  /// Age beyond which a blacklist record is eligible for truncation by
  /// the (external) maintenance sweep (spec.md §9: "9 vs 12 months,
  /// variant-dependent").
  pub blacklist_truncate_age: Duration,
  /// Age beyond which a call-log record is eligible for truncation.
  pub call_log_truncate_age: Duration,
  /// Minimum interval between maintenance sweeps.
  pub maintenance_min_interval: Duration,
}

impl Default for Config {
  fn default() -> Config {
    Config {
      serial_port: DEFAULT_SERIAL_PORT.to_string(),
      audio_device: DEFAULT_AUDIO_DEVICE.to_string(),
      dtmf_enabled: true,
      dtmf_variant: DtmfVariant::default(),
      answering_machine_present: false,
      blacklist_truncate_age: Duration::from_secs(365 * 24 * 3600),
      call_log_truncate_age: Duration::from_secs(365 * 24 * 3600),
      maintenance_min_interval: Duration::from_secs(30 * 24 * 3600),
    }
  }
}

impl Config {
  /// Load configuration from `path`, overlaying it onto the defaults.
  /// A missing file is not an error: the daemon must start with none.
  pub fn load(path: &str) -> Config {
    let mut config = Config::default();
    let mut ini = Ini::new();
    let sections = match ini.load(path) {
      Ok(sections) => sections,
      Err(_) => {
        warn!("Configfile {} nicht gefunden, verwende Defaults", path);
        return config;
      }
    };
    let Some(section) = sections.get("jcblockd") else {
      return config;
    };
    if let Some(Some(v)) = section.get("serial_port") {
      config.serial_port = v.clone();
    }
    if let Some(Some(v)) = section.get("audio_device") {
      config.audio_device = v.clone();
    }
    if let Some(Some(v)) = section.get("dtmf_enabled") {
      config.dtmf_enabled = v.eq_ignore_ascii_case("true") || v == "1";
    }
    if let Some(Some(v)) = section.get("dtmf_variant") {
      match DtmfVariant::from_name(v) {
        Some(variant) => config.dtmf_variant = variant,
        None => warn!("Unbekannte dtmf_variant '{}', verwende Default", v),
      }
    }
    if let Some(Some(v)) = section.get("answering_machine_present") {
      config.answering_machine_present = v.eq_ignore_ascii_case("true") || v == "1";
    }
    if let Some(Some(v)) = section.get("blacklist_truncate_age_days") {
      if let Ok(days) = v.parse::<u64>() {
        config.blacklist_truncate_age = Duration::from_secs(days * 24 * 3600);
      }
    }
    if let Some(Some(v)) = section.get("call_log_truncate_age_days") {
      if let Ok(days) = v.parse::<u64>() {
        config.call_log_truncate_age = Duration::from_secs(days * 24 * 3600);
      }
    }
    if let Some(Some(v)) = section.get("maintenance_min_interval_days") {
      if let Ok(days) = v.parse::<u64>() {
        config.maintenance_min_interval = Duration::from_secs(days * 24 * 3600);
      }
    }
    config
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_gives_defaults() {
    let config = Config::load("/nonexistent/jcblockd.conf");
    assert_eq!(config.serial_port, DEFAULT_SERIAL_PORT);
    assert!(config.dtmf_enabled);
    assert!(!config.answering_machine_present);
  }
}
