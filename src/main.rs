//! jcblockd
//! Lizenz: GPL V3
//!
//! Caller-ID-Anrufsperre für eine analoge Telefonleitung über ein
//! sprachfähiges Modem.

use std::{env, process};

use log::{error, info, warn};

use crate::{
  calllog::CallLog,
  call_state_machine::CallStateMachine,
  config::Config,
  dtmf::{
    pcm::{AlsaPcmSource, PcmSource},
    Detector,
  },
  list_store::{ErrorBias, ListStore, NoopMaintenanceHook},
  modem::{at, transport::ModemTransport, BAUD_CALLER_ID},
};

mod calllog;
mod callerid;
mod call_state_machine;
mod config;
mod dtmf;
mod lifecycle;
mod list_store;
mod modem;

/// Default whitelist path. Its absence is not fatal (spec.md §7).
const DEFAULT_WHITELIST: &str = "whitelist.dat";
/// Default blacklist path. Must exist for the daemon to start (spec.md §7).
const DEFAULT_BLACKLIST: &str = "blacklist.dat";
/// Default call log path (spec.md §3 "Call log entry").
const DEFAULT_CALL_LOG: &str = "callerID.dat";

/// Kommandozeilenparameter
#[derive(Debug)]
struct CmdLineConfig {
  /// Zu verwendendes Modem-Gerät, Default kommt aus `Config`.
  port: Option<String>,
  /// Zu verwendendes Configfile, Default ist `jcblockd.conf`.
  config_file: String,
}

impl CmdLineConfig {
  /// Liefert die aus den Kommandozeilen Argumenten gelesene Konfiguration zurück.
  /// Err mit Fehlertext -> Hilfetextausgabe, Programmabbruch
  /// -h -> Hilfetext, Programmabbruch
  /// -p port -> zu verwendendes Modem-Device
  /// -c configfile -> zu verwendendes Configfile
  /// # Arguments
  /// * args - Kommandozeilenargumente
  fn parse_cmd_line(mut args: impl Iterator<Item = String>) -> Result<CmdLineConfig, String> {
    args.next(); // eigener Pfad
    let mut cmd_line_config = CmdLineConfig {
      port: None,
      config_file: "jcblockd.conf".to_string(),
    };
    loop {
      match args.next() {
        Some(val) => match val.as_str() {
          "-h" => return Err("".to_string()),
          "-p" => {
            cmd_line_config.port = match args.next() {
              Some(val) => Some(val),
              None => return Err("-p ohne Port".to_string()),
            }
          }
          "-c" => {
            cmd_line_config.config_file = match args.next() {
              Some(val) => val,
              None => return Err("-c ohne Configfile".to_string()),
            }
          }
          _ => return Err(format!("Unbekannter Parameter {val}")),
        },
        None => break,
      }
    }
    Ok(cmd_line_config)
  }
}

fn main() {
  env::set_var("RUST_BACKTRACE", "1");
  if env::var("RUST_LOG").is_err() {
    env::set_var("RUST_LOG", "INFO");
  }
  env_logger::builder().format_timestamp_millis().init();
  if let Err(msg) = start(env::args()) {
    error!("Start fehlgeschlagen: {}", msg);
    process::exit(1);
  }
}

/// Start jcblockd. Builds every collaborator, wires the signal-driven
/// cleanup (spec.md §4.7), and hands control to `CallStateMachine`.
fn start(args: impl Iterator<Item = String>) -> Result<(), String> {
  println!(
    "{} V{}",
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_VERSION")
  );
  let cmd_line_config = match CmdLineConfig::parse_cmd_line(args) {
    Ok(v) => v,
    Err(message) => {
      println!(
        "Aufruf: {} [-p port] [-c configfile]",
        env!("CARGO_PKG_NAME")
      );
      println!("-p port        zu verwendendes Modem-Gerät");
      println!("-c configfile  zu verwendendes Configfile");
      if !message.is_empty() {
        println!("{message}");
      }
      process::exit(1);
    }
  };

  let config = Config::load(&cmd_line_config.config_file);
  let serial_port = cmd_line_config.port.unwrap_or(config.serial_port.clone());

  let mut transport = ModemTransport::open(&serial_port, BAUD_CALLER_ID)
    .map_err(|e| format!("Modem {} konnte nicht geöffnet werden: {}", serial_port, e))?;
  lifecycle::register_modem_fd(transport.raw_fd());
  lifecycle::spawn_signal_thread()?;

  // spec.md §9 "Open Ambiguities": AT#CID=1 and AT+VCID=1 are both in use
  // across real modems; AT+VCID=1 is the broader-compatibility default.
  let enable_cmd = "AT+VCID=1\r".to_string();
  at::init_caller_id(&mut transport, &enable_cmd)
    .map_err(|e| format!("Caller-ID-Initialisierung fehlgeschlagen: {}", e))?;
  info!("Modem {} initialisiert, warte auf Anrufe", serial_port);

  // Whitelist is optional; its absence just means every call falls
  // through to the blacklist check (spec.md §7).
  let whitelist = if std::path::Path::new(DEFAULT_WHITELIST).exists() {
    Some(ListStore::new(
      DEFAULT_WHITELIST,
      ErrorBias::TreatAsMatch,
      "whitelist",
    ))
  } else {
    warn!(
      "{} nicht gefunden, Anrufe werden nicht gegen eine Positivliste geprüft",
      DEFAULT_WHITELIST
    );
    None
  };
  if !std::path::Path::new(DEFAULT_BLACKLIST).exists() {
    return Err(format!(
      "{} nicht gefunden; die Datei muss vor dem Start existieren",
      DEFAULT_BLACKLIST
    ));
  }
  let blacklist = ListStore::new(DEFAULT_BLACKLIST, ErrorBias::TreatAsNoMatch, "blacklist");

  let call_log = CallLog::new(DEFAULT_CALL_LOG);

  let dtmf = if config.dtmf_enabled {
    match AlsaPcmSource::open(&config.audio_device, config.dtmf_variant.params().sample_format) {
      Ok(source) => Some((
        Detector::new(config.dtmf_variant),
        Box::new(source) as Box<dyn PcmSource>,
      )),
      Err(e) => {
        warn!(
          "Audiogerät {} konnte nicht geöffnet werden ({}), *-Taste deaktiviert",
          config.audio_device, e
        );
        None
      }
    }
  } else {
    None
  };

  let mut state_machine = CallStateMachine::new(
    transport,
    enable_cmd,
    whitelist,
    blacklist,
    call_log,
    config,
    dtmf,
    Box::new(NoopMaintenanceHook),
  );
  state_machine.run_forever(|| false);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_cmd_line_defaults() {
    let cmd_line_config = CmdLineConfig::parse_cmd_line(vec!["".to_string()].into_iter())
      .expect("keine Argumente sind gültig");
    assert_eq!(cmd_line_config.port, None);
    assert_eq!(cmd_line_config.config_file, "jcblockd.conf");
  }

  #[test]
  fn parse_cmd_line_help() {
    let msg = CmdLineConfig::parse_cmd_line(vec!["".to_string(), "-h".to_string()].into_iter())
      .expect_err("-h muss Err liefern");
    assert_eq!(msg, "");
  }

  #[test]
  fn parse_cmd_line_unknown_flag() {
    let msg =
      CmdLineConfig::parse_cmd_line(vec!["".to_string(), "-x".to_string()].into_iter())
        .expect_err("unbekanntes Flag muss Err liefern");
    assert_eq!(msg, "Unbekannter Parameter -x");
  }

  #[test]
  fn parse_cmd_line_port_and_config() {
    let cmd_line_config = CmdLineConfig::parse_cmd_line(
      vec![
        "".to_string(),
        "-p".to_string(),
        "/dev/ttyACM0".to_string(),
        "-c".to_string(),
        "other.conf".to_string(),
      ]
      .into_iter(),
    )
    .expect("gültige Argumente");
    assert_eq!(cmd_line_config.port, Some("/dev/ttyACM0".to_string()));
    assert_eq!(cmd_line_config.config_file, "other.conf");
  }

  #[test]
  fn parse_cmd_line_dangling_flags_error() {
    CmdLineConfig::parse_cmd_line(vec!["".to_string(), "-p".to_string()].into_iter())
      .expect_err("-p ohne Wert muss Err liefern");
    CmdLineConfig::parse_cmd_line(vec!["".to_string(), "-c".to_string()].into_iter())
      .expect_err("-c ohne Wert muss Err liefern");
  }
}
