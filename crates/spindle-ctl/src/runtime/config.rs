use serde::Deserialize;
use spindle_core::{CaptureMode, ControlConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing value for {0}")]
    MissingValue(&'static str),
    #[error("invalid value {value:?} for {flag}")]
    InvalidValue { flag: &'static str, value: String },
    #[error("unknown argument {0:?}")]
    UnknownArgument(String),
    #[error("failed to read tuning file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse tuning file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid tuning: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureChoice {
    Interrupt,
    Polling,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_seconds: Option<u64>,
    pub json_logs: bool,
    pub metrics_addr: Option<String>,
    pub journal_path: Option<PathBuf>,
    pub modbus_addr: Option<String>,
    pub tuning_path: Option<PathBuf>,
    /// `None` leaves the mode to the tuning file, which defaults to interrupt.
    pub capture: Option<CaptureChoice>,
    pub sim_rpm: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            run_seconds: None,
            json_logs: false,
            metrics_addr: None,
            journal_path: None,
            modbus_addr: None,
            tuning_path: None,
            capture: None,
            sim_rpm: 600.0,
        }
    }
}

const DEFAULT_POLLING_INTERVAL_US: u64 = 250;

fn value<'a>(args: &'a [String], i: usize, flag: &'static str) -> Result<&'a str, ConfigError> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or(ConfigError::MissingValue(flag))
}

fn parse<T: std::str::FromStr>(raw: &str, flag: &'static str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        flag,
        value: raw.to_string(),
    })
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Result<Self, ConfigError> {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--run-seconds" => {
                    cfg.run_seconds = Some(parse(value(args, i, "--run-seconds")?, "--run-seconds")?);
                    i += 1;
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--metrics-addr" => {
                    cfg.metrics_addr = Some(value(args, i, "--metrics-addr")?.to_string());
                    i += 1;
                }
                "--journal" => {
                    cfg.journal_path = Some(PathBuf::from(value(args, i, "--journal")?));
                    i += 1;
                }
                "--modbus" => {
                    cfg.modbus_addr = Some(value(args, i, "--modbus")?.to_string());
                    i += 1;
                }
                "--tuning" => {
                    cfg.tuning_path = Some(PathBuf::from(value(args, i, "--tuning")?));
                    i += 1;
                }
                "--capture" => {
                    cfg.capture = Some(match value(args, i, "--capture")? {
                        "interrupt" => CaptureChoice::Interrupt,
                        "polling" => CaptureChoice::Polling,
                        other => {
                            return Err(ConfigError::InvalidValue {
                                flag: "--capture",
                                value: other.to_string(),
                            })
                        }
                    });
                    i += 1;
                }
                "--sim-rpm" => {
                    let rpm: f64 = parse(value(args, i, "--sim-rpm")?, "--sim-rpm")?;
                    if !rpm.is_finite() || rpm < 0.0 {
                        return Err(ConfigError::InvalidValue {
                            flag: "--sim-rpm",
                            value: rpm.to_string(),
                        });
                    }
                    cfg.sim_rpm = rpm;
                    i += 1;
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                other => return Err(ConfigError::UnknownArgument(other.to_string())),
            }
            i += 1;
        }
        Ok(cfg)
    }

    /// Control tuning after applying the tuning file and capture choice.
    pub fn control_config(&self) -> Result<ControlConfig, ConfigError> {
        let mut control = ControlConfig::default();
        if let Some(path) = &self.tuning_path {
            Tuning::load(path)?.apply(&mut control)?;
        }
        match self.capture {
            None => {}
            Some(CaptureChoice::Interrupt) => control.capture.mode = CaptureMode::Interrupt,
            Some(CaptureChoice::Polling) => {
                if control.capture.mode == CaptureMode::Interrupt {
                    control.capture.mode = CaptureMode::Polling {
                        interval: Duration::from_micros(DEFAULT_POLLING_INTERVAL_US),
                    };
                }
            }
        }
        Ok(control)
    }

    pub fn print_help() {
        println!(
            r#"spindle-ctl - Motorized spindle controller

USAGE:
    spindle-ctl [OPTIONS]

OPTIONS:
    --run-seconds <SECS>    Run for a fixed duration then exit
    --json-logs             Output logs in JSON format (for log aggregation)
    --metrics-addr <ADDR>   Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --journal <PATH>        Append every status update to the specified JSONL file
    --modbus <ADDR>         Drive a Modbus TCP I/O module (e.g. 192.168.1.10:502)
    --tuning <PATH>         Load timing overrides from a JSON file
    --capture <MODE>        Rotation capture mode (interrupt|polling), overrides the tuning file
                            [default: interrupt]
    --sim-rpm <RPM>         Simulated spindle speed without --modbus [default: 600]
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log filter (e.g., RUST_LOG=debug,spindle_core=trace)

EXAMPLES:
    # Simulated run with metrics
    spindle-ctl --metrics-addr 0.0.0.0:9090

    # Hardware run with a status journal
    spindle-ctl --modbus 192.168.1.10:502 --journal /var/log/spindle/status.jsonl

    # Short test run
    spindle-ctl --run-seconds 10 --capture polling
"#
        );
    }
}

/// Timing overrides read from `--tuning`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tuning {
    pub debounce_ms: Option<u64>,
    pub settle_ms: Option<u64>,
    pub interlock_tick_ms: Option<u64>,
    pub toggle_poll_ms: Option<u64>,
    pub toggle_stable_polls: Option<u32>,
    pub toggle_max_polls: Option<u32>,
    pub confirm_poll_ms: Option<u64>,
    pub confirm_samples: Option<u32>,
    pub confirm_max_polls: Option<u32>,
    pub emergency_pulse_ms: Option<u64>,
    pub rpm_period_ms: Option<u64>,
    pub rpm_max_age_ms: Option<u64>,
    pub rpm_alpha: Option<f64>,
    pub rpm_min_delta: Option<f64>,
    pub register_width: Option<u8>,
    /// Selects polling capture at this interval.
    pub polling_interval_us: Option<u64>,
    pub edge_sample_us: Option<u64>,
    pub status_refresh_ms: Option<u64>,
}

fn set_ms(slot: &mut Duration, ms: Option<u64>) {
    if let Some(ms) = ms {
        *slot = Duration::from_millis(ms);
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

impl Tuning {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply(&self, control: &mut ControlConfig) -> Result<(), ConfigError> {
        set_ms(&mut control.debounce_interval, self.debounce_ms);
        set_ms(&mut control.settle_delay, self.settle_ms);
        set_ms(&mut control.interlock_tick, self.interlock_tick_ms);
        set_ms(&mut control.status_refresh, self.status_refresh_ms);

        let interlock = &mut control.interlock;
        set_ms(&mut interlock.toggle_poll_interval, self.toggle_poll_ms);
        set(&mut interlock.toggle_stable_polls, self.toggle_stable_polls);
        set(&mut interlock.toggle_max_polls, self.toggle_max_polls);
        set_ms(&mut interlock.confirm_poll_interval, self.confirm_poll_ms);
        set(&mut interlock.confirm_samples, self.confirm_samples);
        set(&mut interlock.confirm_max_polls, self.confirm_max_polls);
        set_ms(&mut interlock.emergency_discharge_pulse, self.emergency_pulse_ms);

        let rpm = &mut control.rpm;
        set_ms(&mut rpm.period, self.rpm_period_ms);
        set_ms(&mut rpm.max_age, self.rpm_max_age_ms);
        set(&mut rpm.alpha, self.rpm_alpha);
        set(&mut rpm.min_delta, self.rpm_min_delta);

        set(&mut control.capture.register_width, self.register_width);
        if let Some(us) = self.edge_sample_us {
            control.capture.edge_sample_period = Duration::from_micros(us);
        }
        if let Some(us) = self.polling_interval_us {
            control.capture.mode = CaptureMode::Polling {
                interval: Duration::from_micros(us),
            };
        }

        validate(control)
    }
}

fn validate(control: &ControlConfig) -> Result<(), ConfigError> {
    let interlock = &control.interlock;
    if interlock.toggle_stable_polls == 0 || interlock.toggle_stable_polls > interlock.toggle_max_polls {
        return Err(ConfigError::Invalid(format!(
            "toggle_stable_polls {} must be within 1..={}",
            interlock.toggle_stable_polls, interlock.toggle_max_polls
        )));
    }
    if interlock.confirm_samples == 0 || interlock.confirm_samples > interlock.confirm_max_polls {
        return Err(ConfigError::Invalid(format!(
            "confirm_samples {} must be within 1..={}",
            interlock.confirm_samples, interlock.confirm_max_polls
        )));
    }
    if !control.rpm.alpha.is_finite() || !control.rpm.min_delta.is_finite() {
        return Err(ConfigError::Invalid("rpm_alpha and rpm_min_delta must be finite".into()));
    }
    if control.rpm.period.is_zero()
        || control.interlock_tick.is_zero()
        || control.status_refresh.is_zero()
    {
        return Err(ConfigError::Invalid("loop periods must be non-zero".into()));
    }
    if let CaptureMode::Polling { interval } = control.capture.mode {
        if interval.is_zero() {
            return Err(ConfigError::Invalid("polling_interval_us must be non-zero".into()));
        }
    }
    if control.capture.edge_sample_period.is_zero() {
        return Err(ConfigError::Invalid("edge_sample_us must be non-zero".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("spindle-ctl")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    fn tuning_file(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_all_flags() {
        let cfg = RuntimeConfig::from_args(&args(&[
            "--run-seconds",
            "5",
            "--json-logs",
            "--metrics-addr",
            "0.0.0.0:9090",
            "--journal",
            "/tmp/status.jsonl",
            "--modbus",
            "10.0.0.2:502",
            "--capture",
            "polling",
            "--sim-rpm",
            "1200",
        ]))
        .unwrap();
        assert_eq!(cfg.run_seconds, Some(5));
        assert!(cfg.json_logs);
        assert_eq!(cfg.metrics_addr.as_deref(), Some("0.0.0.0:9090"));
        assert_eq!(cfg.journal_path, Some(PathBuf::from("/tmp/status.jsonl")));
        assert_eq!(cfg.modbus_addr.as_deref(), Some("10.0.0.2:502"));
        assert_eq!(cfg.capture, Some(CaptureChoice::Polling));
        assert_eq!(cfg.sim_rpm, 1200.0);
    }

    #[test]
    fn help_stops_parsing() {
        let cfg = RuntimeConfig::from_args(&args(&["-h", "--bogus"])).unwrap();
        assert!(cfg.show_help);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(matches!(
            RuntimeConfig::from_args(&args(&["--capture", "dma"])),
            Err(ConfigError::InvalidValue { flag: "--capture", .. })
        ));
        assert!(matches!(
            RuntimeConfig::from_args(&args(&["--run-seconds"])),
            Err(ConfigError::MissingValue("--run-seconds"))
        ));
        assert!(matches!(
            RuntimeConfig::from_args(&args(&["--bind", "x"])),
            Err(ConfigError::UnknownArgument(_))
        ));
    }

    #[test]
    fn polling_choice_uses_default_interval() {
        let cfg = RuntimeConfig::from_args(&args(&["--capture", "polling"])).unwrap();
        let control = cfg.control_config().unwrap();
        assert_eq!(
            control.capture.mode,
            CaptureMode::Polling {
                interval: Duration::from_micros(250)
            }
        );
    }

    #[test]
    fn tuning_overrides_defaults() {
        let file = tuning_file(
            r#"{"debounce_ms": 20, "confirm_max_polls": 40, "rpm_alpha": 1.0, "register_width": 6}"#,
        );
        let cfg = RuntimeConfig {
            tuning_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let control = cfg.control_config().unwrap();
        assert_eq!(control.debounce_interval, Duration::from_millis(20));
        assert_eq!(control.interlock.confirm_max_polls, 40);
        assert_eq!(control.interlock.confirm_timeout(), Duration::from_secs(2));
        assert_eq!(control.rpm.alpha, 1.0);
        assert_eq!(control.capture.register_width, 6);
        assert_eq!(control.capture.mode, CaptureMode::Interrupt);
    }

    #[test]
    fn tuning_file_selects_polling_without_flag() {
        let file = tuning_file(r#"{"polling_interval_us": 500}"#);
        let cfg = RuntimeConfig {
            tuning_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let control = cfg.control_config().unwrap();
        assert_eq!(
            control.capture.mode,
            CaptureMode::Polling {
                interval: Duration::from_micros(500)
            }
        );

        // The flag still wins over the file.
        let cfg = RuntimeConfig {
            capture: Some(CaptureChoice::Interrupt),
            ..cfg
        };
        assert_eq!(cfg.control_config().unwrap().capture.mode, CaptureMode::Interrupt);
    }

    #[test]
    fn tuning_rejects_zero_periods() {
        for json in [
            r#"{"status_refresh_ms": 0}"#,
            r#"{"polling_interval_us": 0}"#,
            r#"{"edge_sample_us": 0}"#,
            r#"{"rpm_period_ms": 0}"#,
        ] {
            let file = tuning_file(json);
            let cfg = RuntimeConfig {
                tuning_path: Some(file.path().to_path_buf()),
                ..Default::default()
            };
            assert!(
                matches!(cfg.control_config(), Err(ConfigError::Invalid(_))),
                "{json} accepted"
            );
        }
    }

    #[test]
    fn tuning_rejects_unknown_fields() {
        let file = tuning_file(r#"{"debounce": 20}"#);
        assert!(matches!(
            Tuning::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn tuning_rejects_inconsistent_counts() {
        let file = tuning_file(r#"{"confirm_samples": 10, "confirm_max_polls": 5}"#);
        let cfg = RuntimeConfig {
            tuning_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(cfg.control_config(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_tuning_file_is_read_error() {
        let cfg = RuntimeConfig {
            tuning_path: Some(PathBuf::from("/nonexistent/tuning.json")),
            ..Default::default()
        };
        assert!(matches!(cfg.control_config(), Err(ConfigError::Read { .. })));
    }
}
