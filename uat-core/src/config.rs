//! Aggregate receiver configuration shared by the binaries.
//!
//! The CLI layers map their arguments onto this struct; `validate` rejects
//! contradictory settings before anything starts.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::phase::SampleFormat;
use crate::types::UatError;

/// A `[host:]port` listen or connect address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    pub host: String,
    pub port: u16,
}

impl FromStr for ListenAddr {
    type Err = UatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || UatError::InvalidListenAddress(s.to_string());
        match s.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(invalid());
                }
                Ok(ListenAddr {
                    host: host.to_string(),
                    port: port.parse().map_err(|_| invalid())?,
                })
            }
            None => Ok(ListenAddr {
                host: "0.0.0.0".to_string(),
                port: s.parse().map_err(|_| invalid())?,
            }),
        }
    }
}

impl std::fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where sample data comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    Stdin,
    File { path: PathBuf, throttle: bool },
    Sdr { device: String },
}

/// SDR tuning options. Gain of `None` means hardware AGC.
#[derive(Debug, Clone, Default)]
pub struct SdrSettings {
    pub gain_db: Option<f64>,
    pub auto_gain: bool,
    pub ppm: f64,
    pub antenna: Option<String>,
    pub stream_settings: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sample_format: SampleFormat,
    pub input: InputSource,
    pub sdr: SdrSettings,
    pub raw_listen: Vec<ListenAddr>,
    pub json_listen: Vec<ListenAddr>,
    pub raw_stdout: bool,
    pub json_stdout: bool,
    pub reconnect_interval: Duration,
}

impl Config {
    /// Reject configurations that could not do anything useful.
    pub fn validate(&self) -> Result<(), UatError> {
        if !self.raw_stdout
            && !self.json_stdout
            && self.raw_listen.is_empty()
            && self.json_listen.is_empty()
        {
            return Err(UatError::Config(
                "no outputs configured; use --raw-stdout, --json-stdout, --raw-port or --json-port"
                    .to_string(),
            ));
        }
        if matches!(self.input, InputSource::Sdr { .. })
            && self.sdr.auto_gain
            && self.sdr.gain_db.is_some()
        {
            return Err(UatError::Config(
                "--sdr-gain and --sdr-auto-gain are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse `key=value,key=value` SDR stream settings.
pub fn parse_stream_settings(s: &str) -> Result<Vec<(String, String)>, UatError> {
    let mut settings = Vec::new();
    for item in s.split(',').filter(|item| !item.is_empty()) {
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| UatError::Config(format!("bad stream setting: {item}")))?;
        settings.push((key.to_string(), value.to_string()));
    }
    Ok(settings)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            sample_format: SampleFormat::Cu8,
            input: InputSource::Stdin,
            sdr: SdrSettings::default(),
            raw_listen: Vec::new(),
            json_listen: Vec::new(),
            raw_stdout: true,
            json_stdout: false,
            reconnect_interval: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_listen_addr_with_host() {
        let addr: ListenAddr = "localhost:30978".parse().unwrap();
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 30978);
        assert_eq!(addr.to_string(), "localhost:30978");
    }

    #[test]
    fn test_listen_addr_port_only() {
        let addr: ListenAddr = "30978".parse().unwrap();
        assert_eq!(addr.host, "0.0.0.0");
        assert_eq!(addr.port, 30978);
    }

    #[test]
    fn test_listen_addr_rejects_garbage() {
        assert!(":30978".parse::<ListenAddr>().is_err());
        assert!("host:".parse::<ListenAddr>().is_err());
        assert!("host:notaport".parse::<ListenAddr>().is_err());
        assert!("".parse::<ListenAddr>().is_err());
    }

    #[test]
    fn test_validate_requires_an_output() {
        let mut config = base_config();
        config.raw_stdout = false;
        assert!(config.validate().is_err());

        config.json_listen.push("30979".parse().unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_gain_conflict() {
        let mut config = base_config();
        config.input = InputSource::Sdr {
            device: "driver=rtlsdr".to_string(),
        };
        config.sdr.auto_gain = true;
        config.sdr.gain_db = Some(40.0);
        assert!(config.validate().is_err());

        config.sdr.gain_db = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_stream_settings() {
        let settings = parse_stream_settings("biastee=true,digital_agc=false").unwrap();
        assert_eq!(
            settings,
            vec![
                ("biastee".to_string(), "true".to_string()),
                ("digital_agc".to_string(), "false".to_string()),
            ]
        );
        assert!(parse_stream_settings("novalue").is_err());
        assert_eq!(parse_stream_settings("").unwrap(), vec![]);
    }
}
