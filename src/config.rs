use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::dialplan::Dialplan;
use crate::mode::{Legs, Mode};

/// Key of the template entry in the `links` and `calls` tables
pub const DEFAULT_KEY: &str = ":default:";

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "CALLTEST_CONFIG";

/// Backends this build can talk to
pub const SUPPORTED_BACKENDS: &[&str] = &["loopback"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub backend: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Application name calls are routed to
    pub app: String,
    /// Seconds to wait for the controller connection plus greeting
    pub init_timeout: u64,
    pub dialplan: Dialplan,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            backend: "loopback".to_string(),
            host: "localhost".to_string(),
            port: 8088,
            username: "asterisk".to_string(),
            password: "asterisk".to_string(),
            app: "calltest".to_string(),
            init_timeout: 5,
            dialplan: Dialplan::default(),
        }
    }
}

/// Status HTTP server that publishes check results as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

// Raw table entries as written in the file. Every field is optional so an
// entry can be merged field by field over the ":default:" entry and then
// over the built-in defaults.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawLink {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prio: Option<i32>,
}

impl RawLink {
    pub fn merge(self, base: &RawLink) -> RawLink {
        RawLink {
            channel: self.channel.or_else(|| base.channel.clone()),
            number: self.number.or_else(|| base.number.clone()),
            prio: self.prio.or(base.prio),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDtmf {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub may_repeat: Option<bool>,
    /// Seconds between sent digits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub between: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDelay {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ring: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAudio {
    /// Caller side: file to record into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_in: Option<String>,
    /// Caller side: file to play
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_out: Option<String>,
    /// Callee side: file to record into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_in: Option<String>,
    /// Callee side: file to play
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_out: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Digit that ends a recording in `record` mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_digit: Option<char>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawThresholds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warn: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail: Option<u32>,
    /// Only run when triggered manually
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
    /// Number to dial when there is no `dst` link
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<f64>,
    /// Verify the caller number on inbound legs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callerid: Option<bool>,
    #[serde(default)]
    pub dtmf: RawDtmf,
    #[serde(default)]
    pub delay: RawDelay,
    #[serde(default)]
    pub audio: RawAudio,
    #[serde(default)]
    pub test: RawThresholds,
}

impl RawCall {
    pub fn merge(self, base: &RawCall) -> RawCall {
        RawCall {
            mode: self.mode.or(base.mode),
            info: self.info.or_else(|| base.info.clone()),
            src: self.src.or_else(|| base.src.clone()),
            dst: self.dst.or_else(|| base.dst.clone()),
            number: self.number.or_else(|| base.number.clone()),
            timeout: self.timeout.or(base.timeout),
            retry: self.retry.or(base.retry),
            repeat: self.repeat.or(base.repeat),
            callerid: self.callerid.or(base.callerid),
            dtmf: RawDtmf {
                len: self.dtmf.len.or(base.dtmf.len),
                may_repeat: self.dtmf.may_repeat.or(base.dtmf.may_repeat),
                between: self.dtmf.between.or(base.dtmf.between),
            },
            delay: RawDelay {
                pre: self.delay.pre.or(base.delay.pre),
                ring: self.delay.ring.or(base.delay.ring),
                answer: self.delay.answer.or(base.delay.answer),
            },
            audio: RawAudio {
                src_in: self.audio.src_in.or_else(|| base.audio.src_in.clone()),
                src_out: self.audio.src_out.or_else(|| base.audio.src_out.clone()),
                dst_in: self.audio.dst_in.or_else(|| base.audio.dst_in.clone()),
                dst_out: self.audio.dst_out.or_else(|| base.audio.dst_out.clone()),
                format: self.audio.format.or_else(|| base.audio.format.clone()),
                stop_digit: self.audio.stop_digit.or(base.audio.stop_digit),
            },
            test: RawThresholds {
                warn: self.test.warn.or(base.test.warn),
                fail: self.test.fail.or(base.test.fail),
                skip: self.test.skip.or(base.test.skip),
            },
        }
    }

    /// Built-in defaults: repeat every 10 minutes when successful, retry
    /// every 5 minutes when not.
    pub fn builtin() -> RawCall {
        RawCall {
            mode: Some(Mode::Dtmf),
            info: Some("-".to_string()),
            src: None,
            dst: None,
            number: None,
            timeout: Some(30.0),
            retry: Some(5.0 * 60.0),
            repeat: Some(10.0 * 60.0),
            callerid: Some(false),
            dtmf: RawDtmf {
                len: Some(5),
                may_repeat: Some(false),
                between: Some(0.5),
            },
            delay: RawDelay {
                pre: Some(0.0),
                ring: Some(1.0),
                answer: Some(1.0),
            },
            audio: RawAudio {
                format: Some("wav".to_string()),
                stop_digit: Some('#'),
                ..Default::default()
            },
            test: RawThresholds {
                warn: Some(1),
                fail: Some(3),
                skip: Some(false),
            },
        }
    }
}

/// The configuration file as written
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub controller: ControllerConfig,
    pub server: ServerConfig,
    pub links: BTreeMap<String, RawLink>,
    pub calls: BTreeMap<String, RawCall>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub channel: Option<String>,
    pub number: Option<String>,
    pub prio: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DtmfConfig {
    pub len: usize,
    pub may_repeat: bool,
    pub between: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DelayConfig {
    pub pre: Duration,
    pub ring: Duration,
    pub answer: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioConfig {
    pub src_in: Option<String>,
    pub src_out: Option<String>,
    pub dst_in: Option<String>,
    pub dst_out: Option<String>,
    pub format: String,
    pub stop_digit: char,
}

/// Fully resolved settings of one check
#[derive(Debug, Clone, PartialEq)]
pub struct CallConfig {
    pub mode: Mode,
    pub info: String,
    pub src: Option<String>,
    pub dst: Option<String>,
    pub number: Option<String>,
    pub timeout: Duration,
    pub retry: Duration,
    pub repeat: Duration,
    pub callerid: bool,
    pub dtmf: DtmfConfig,
    pub delay: DelayConfig,
    pub audio: AudioConfig,
    pub warn: u32,
    pub fail: u32,
    pub skip: bool,
}

/// Seconds from the file; negative or non-finite values become zero and
/// are reported by `validate`. Values too large for a `Duration` saturate.
fn secs(v: Option<f64>) -> Duration {
    match v {
        Some(v) if v.is_finite() && v > 0.0 => {
            Duration::try_from_secs_f64(v).unwrap_or(Duration::MAX)
        }
        _ => Duration::ZERO,
    }
}

impl CallConfig {
    fn resolve(raw: RawCall) -> CallConfig {
        let raw = raw.merge(&RawCall::builtin());
        CallConfig {
            mode: raw.mode.unwrap_or(Mode::Dtmf),
            info: raw.info.unwrap_or_else(|| "-".to_string()),
            src: raw.src,
            dst: raw.dst,
            number: raw.number,
            timeout: secs(raw.timeout),
            retry: secs(raw.retry),
            repeat: secs(raw.repeat),
            callerid: raw.callerid.unwrap_or(false),
            dtmf: DtmfConfig {
                len: raw.dtmf.len.unwrap_or(5),
                may_repeat: raw.dtmf.may_repeat.unwrap_or(false),
                between: secs(raw.dtmf.between),
            },
            delay: DelayConfig {
                pre: secs(raw.delay.pre),
                ring: secs(raw.delay.ring),
                answer: secs(raw.delay.answer),
            },
            audio: AudioConfig {
                src_in: raw.audio.src_in,
                src_out: raw.audio.src_out,
                dst_in: raw.audio.dst_in,
                dst_out: raw.audio.dst_out,
                format: raw.audio.format.unwrap_or_else(|| "wav".to_string()),
                stop_digit: raw.audio.stop_digit.unwrap_or('#'),
            },
            warn: raw.test.warn.unwrap_or(1),
            fail: raw.test.fail.unwrap_or(3),
            skip: raw.test.skip.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub controller: ControllerConfig,
    pub server: ServerConfig,
    /// Merged link entries, without the default template
    pub links: BTreeMap<String, LinkConfig>,
    /// Merged check entries, without the default template
    pub calls: BTreeMap<String, CallConfig>,
    /// The file after merging, for `--dump-config`
    file: ConfigFile,
}

impl Config {
    /// Load the file named by `path`, or by `CALLTEST_CONFIG`, then apply
    /// environment overrides.
    pub fn from_env(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => env::var(CONFIG_ENV).ok().map(Into::into),
        };
        let mut config = match path {
            Some(p) => Self::load(&p)?,
            None => Self::from_file(ConfigFile::default()),
        };
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text).context("TOML parse error")?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: ConfigFile) -> Self {
        let link_default = file.links.get(DEFAULT_KEY).cloned().unwrap_or_default();
        let call_default = file.calls.get(DEFAULT_KEY).cloned().unwrap_or_default();

        let mut merged = file.clone();
        merged.links = file
            .links
            .iter()
            .filter(|(k, _)| k.as_str() != DEFAULT_KEY)
            .map(|(k, v)| (k.clone(), v.clone().merge(&link_default)))
            .collect();
        merged.calls = file
            .calls
            .iter()
            .filter(|(k, _)| k.as_str() != DEFAULT_KEY)
            .map(|(k, v)| (k.clone(), v.clone().merge(&call_default)))
            .collect();

        let links = merged
            .links
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    LinkConfig {
                        channel: v.channel.clone(),
                        number: v.number.clone(),
                        prio: v.prio.unwrap_or(0),
                    },
                )
            })
            .collect();
        let calls = merged
            .calls
            .iter()
            .map(|(k, v)| (k.clone(), CallConfig::resolve(v.clone())))
            .collect();

        Config {
            controller: merged.controller.clone(),
            server: merged.server.clone(),
            links,
            calls,
            file: merged,
        }
    }

    /// Apply overrides from a getter (the environment in production)
    pub fn apply_env<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = get("CALLTEST_CONTROLLER_HOST").filter(|s| !s.is_empty()) {
            self.controller.host = host;
        }
        if let Some(port) = get("CALLTEST_CONTROLLER_PORT") {
            self.controller.port = port
                .trim()
                .parse()
                .context("CALLTEST_CONTROLLER_PORT must be a valid port number")?;
        }
        if let Some(user) = get("CALLTEST_CONTROLLER_USERNAME") {
            self.controller.username = user;
        }
        if let Some(pass) = get("CALLTEST_CONTROLLER_PASSWORD") {
            self.controller.password = pass;
        }
        if let Some(port) = get("CALLTEST_SERVER_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .context("CALLTEST_SERVER_PORT must be a valid port number")?;
        }
        self.file.controller = self.controller.clone();
        self.file.server = self.server.clone();
        Ok(())
    }

    /// Validate configuration values at startup.
    /// Returns Ok(()) if all validations pass, or Err listing every problem.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if !SUPPORTED_BACKENDS.contains(&self.controller.backend.as_str()) {
            errors.push(format!(
                "controller.backend '{}' is not supported (available: {}).",
                self.controller.backend,
                SUPPORTED_BACKENDS.join(", ")
            ));
        }

        for (name, call) in &self.calls {
            errors.extend(self.check_call(name, call));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }

    fn check_call(&self, name: &str, call: &CallConfig) -> Vec<String> {
        let mut errors = Vec::new();
        let raw = self.file.calls.get(name).cloned().unwrap_or_default();

        for (field, link) in [("src", &call.src), ("dst", &call.dst)] {
            if let Some(link) = link {
                if !self.links.contains_key(link) {
                    errors.push(format!("calls.{}: {} link '{}' does not exist.", name, field, link));
                }
            }
        }

        let needs_src = matches!(call.mode.legs(), Legs::Out | Legs::Dual);
        let needs_dst = matches!(call.mode.legs(), Legs::In | Legs::Dual);
        if needs_src && call.src.is_none() {
            errors.push(format!("calls.{}: mode '{}' needs a src link.", name, call.mode));
        }
        if needs_dst && call.dst.is_none() {
            errors.push(format!("calls.{}: mode '{}' needs a dst link.", name, call.mode));
        }
        if call.mode.legs() == Legs::Out && call.dst.is_none() && call.number.is_none() {
            errors.push(format!("calls.{}: mode '{}' needs a dst link or a number.", name, call.mode));
        }
        if let Some(src) = call.src.as_ref().and_then(|s| self.links.get(s)) {
            if needs_src && src.channel.is_none() {
                errors.push(format!("calls.{}: src link '{}' has no channel.", name, call.src.as_deref().unwrap_or("")));
            }
        }

        if call.timeout.is_zero() {
            errors.push(format!("calls.{}: timeout must be greater than 0.", name));
        }
        for (field, value) in [
            ("retry", raw.retry),
            ("repeat", raw.repeat),
            ("delay.pre", raw.delay.pre),
            ("delay.ring", raw.delay.ring),
            ("delay.answer", raw.delay.answer),
            ("dtmf.between", raw.dtmf.between),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    errors.push(format!("calls.{}: {} must be a non-negative number of seconds.", name, field));
                }
            }
        }
        if call.mode == Mode::Dtmf && call.dtmf.len == 0 {
            errors.push(format!("calls.{}: dtmf.len must be greater than 0.", name));
        }
        if call.fail == 0 {
            errors.push(format!("calls.{}: test.fail must be at least 1.", name));
        }
        if call.warn > call.fail {
            errors.push(format!(
                "calls.{}: test.warn ({}) must not exceed test.fail ({}).",
                name, call.warn, call.fail
            ));
        }
        if call.callerid && call.src.is_none() {
            errors.push(format!("calls.{}: callerid check needs a src link to compare with.", name));
        }
        errors
    }

    /// The effective configuration as TOML
    pub fn dump(&self) -> Result<String> {
        toml::to_string_pretty(&self.file).context("Cannot serialize configuration")
    }

    /// Names of checks that run on their own schedule
    pub fn scheduled_calls(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter(|(_, c)| !c.skip)
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
[links.":default:"]
prio = 1

[links.l1]
channel = "SIP/trunk/{nr}"
number = "+4930111"

[links.l2]
channel = "SIP/trunk/{nr}"
number = "+4930222"
prio = 0

[calls.":default:"]
timeout = 20

[calls.a]
mode = "ring"
src = "l1"
dst = "l2"

[calls.b]
mode = "dtmf"
src = "l1"
dst = "l2"
dtmf = { len = 7 }
test = { skip = true }
"#;

    #[test]
    fn test_valid_minimal_config() {
        let config = Config::from_toml_str(MINIMAL).expect("should parse valid config");
        assert_eq!(config.links.len(), 2);
        assert_eq!(config.calls.len(), 2);
        assert_eq!(config.controller.port, 8088); // default
        assert_eq!(config.server.port, 8080); // default
        config.validate().expect("should validate");
    }

    #[test]
    fn test_link_default_merged() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.links["l1"].prio, 1); // from :default:
        assert_eq!(config.links["l2"].prio, 0); // explicit override wins
    }

    #[test]
    fn test_call_defaults_layered() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        let a = &config.calls["a"];
        assert_eq!(a.mode, Mode::Ring);
        assert_eq!(a.timeout, Duration::from_secs(20)); // file default
        assert_eq!(a.retry, Duration::from_secs(300)); // built-in
        assert_eq!(a.repeat, Duration::from_secs(600)); // built-in
        assert_eq!(a.delay.ring, Duration::from_secs(1));
        assert_eq!(a.warn, 1);
        assert_eq!(a.fail, 3);
        assert!(!a.skip);

        let b = &config.calls["b"];
        assert_eq!(b.dtmf.len, 7);
        assert!(!b.dtmf.may_repeat);
        assert!(b.skip);
    }

    #[test]
    fn test_default_entries_not_exposed() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert!(!config.links.contains_key(DEFAULT_KEY));
        assert!(!config.calls.contains_key(DEFAULT_KEY));
    }

    #[test]
    fn test_scheduled_calls_skip_manual() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.scheduled_calls(), vec!["a"]);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let text = "[calls.a]\nmode = \"teleport\"\n";
        assert!(Config::from_toml_str(text).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let text = "[links.l1]\nchanel = \"SIP/x\"\n";
        assert!(Config::from_toml_str(text).is_err());
    }

    #[test]
    fn test_duplicate_check_name_rejected() {
        let text = "[calls.a]\nmode = \"ring\"\n[calls.a]\nmode = \"wait\"\n";
        assert!(Config::from_toml_str(text).is_err());
    }

    #[test]
    fn test_validation_unknown_link() {
        let text = "[calls.a]\nmode = \"wait\"\ndst = \"ghost\"\n";
        let config = Config::from_toml_str(text).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("ghost"), "error should mention link: {}", err);
    }

    #[test]
    fn test_validation_mode_requirements() {
        let text = r#"
[links.l1]
channel = "SIP/x/{nr}"

[calls.r]
mode = "ring"
src = "l1"

[calls.w]
mode = "wait"

[calls.d]
mode = "dtmf"
dst = "l1"
"#;
        let config = Config::from_toml_str(text).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("calls.r: mode 'ring' needs a dst link or a number"), "{}", err);
        assert!(err.contains("calls.w: mode 'wait' needs a dst link"), "{}", err);
        assert!(err.contains("calls.d: mode 'dtmf' needs a src link"), "{}", err);
    }

    #[test]
    fn test_validation_thresholds_and_timing() {
        let text = r#"
[links.l1]
channel = "SIP/x/{nr}"
number = "1"

[calls.a]
mode = "ring"
src = "l1"
number = "2"
timeout = 0
retry = -5
test = { warn = 4, fail = 2 }
"#;
        let config = Config::from_toml_str(text).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("timeout must be greater than 0"), "{}", err);
        assert!(err.contains("retry must be a non-negative"), "{}", err);
        assert!(err.contains("test.warn (4) must not exceed test.fail (2)"), "{}", err);
    }

    #[test]
    fn test_validation_unsupported_backend() {
        let text = "[controller]\nbackend = \"ari\"\n";
        let config = Config::from_toml_str(text).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("backend 'ari'"), "{}", err);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::from_toml_str(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = [
            ("CALLTEST_CONTROLLER_HOST", "pbx.example.com"),
            ("CALLTEST_CONTROLLER_PORT", "8089"),
            ("CALLTEST_CONTROLLER_PASSWORD", "secret"),
            ("CALLTEST_SERVER_PORT", "9090"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.controller.host, "pbx.example.com");
        assert_eq!(config.controller.port, 8089);
        assert_eq!(config.controller.password, "secret");
        assert_eq!(config.server.port, 9090);
        assert!(config.dump().unwrap().contains("pbx.example.com"));
    }

    #[test]
    fn test_env_invalid_port() {
        let mut config = Config::from_toml_str(MINIMAL).unwrap();
        let err = config
            .apply_env(|k| (k == "CALLTEST_CONTROLLER_PORT").then(|| "99999".to_string()))
            .unwrap_err()
            .to_string();
        assert!(err.contains("CALLTEST_CONTROLLER_PORT"), "{}", err);
    }

    #[test]
    fn test_dump_roundtrips() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        let dumped = config.dump().unwrap();
        let again = Config::from_toml_str(&dumped).unwrap();
        assert_eq!(again.calls, config.calls);
        assert_eq!(again.links, config.links);
    }

    #[test]
    fn test_empty_config() {
        let config = Config::from_toml_str("").unwrap();
        assert!(config.calls.is_empty());
        assert!(config.validate().is_ok());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any non-negative timing values survive parsing unchanged
        #[test]
        fn timings_parse(timeout in 1u32..3600, retry in 0u32..86400, repeat in 0u32..86400) {
            let text = format!(
                "[links.l1]\nchannel = \"SIP/x/{{nr}}\"\n[calls.a]\nmode = \"ring\"\nsrc = \"l1\"\nnumber = \"1\"\ntimeout = {}\nretry = {}\nrepeat = {}\n",
                timeout, retry, repeat
            );
            let config = Config::from_toml_str(&text).unwrap();
            let a = &config.calls["a"];
            prop_assert_eq!(a.timeout, Duration::from_secs(timeout as u64));
            prop_assert_eq!(a.retry, Duration::from_secs(retry as u64));
            prop_assert_eq!(a.repeat, Duration::from_secs(repeat as u64));
            prop_assert!(config.validate().is_ok());
        }

        /// Parsing arbitrary text never panics
        #[test]
        fn from_toml_never_panics(text in ".{0,200}") {
            let _ = Config::from_toml_str(&text);
        }

        /// An entry's own value always wins over the default entry
        #[test]
        fn override_wins(own in 0i32..100, default in 0i32..100) {
            let text = format!(
                "[links.\":default:\"]\nprio = {}\n[links.l1]\nprio = {}\n[links.l2]\n",
                default, own
            );
            let config = Config::from_toml_str(&text).unwrap();
            prop_assert_eq!(config.links["l1"].prio, own);
            prop_assert_eq!(config.links["l2"].prio, default);
        }
    }
}
