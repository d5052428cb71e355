//! Mode protocol library
//!
//! A [`Mode`] is the behavior one check exercises. Each variant lives in
//! its own module and is written against the leg primitives in [`leg`],
//! the rendezvous [`signal::Signal`] and the run's [`scope::RunScope`].

pub mod answer;
pub mod audio;
pub mod call;
pub mod dtmf;
pub mod leg;
pub mod play;
pub mod record;
pub mod ring;
pub mod scope;
pub mod signal;
pub mod wait;

#[cfg(test)]
mod model;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::check::Harness;
use crate::config::CallConfig;
use crate::controller::Controller;
use crate::endpoint::Endpoint;
use crate::error::TestError;

use scope::RunScope;

/// Which legs a mode drives, and so which endpoints it locks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Legs {
    /// Originates from `src`
    Out,
    /// Receives on `dst`
    In,
    /// Calls from `src` to `dst`
    Dual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Ring,
    Wait,
    Call,
    Dtmf,
    Play,
    Answer,
    Record,
    Audio,
}

impl Mode {
    pub const ALL: [Mode; 8] = [
        Mode::Ring,
        Mode::Wait,
        Mode::Call,
        Mode::Dtmf,
        Mode::Play,
        Mode::Answer,
        Mode::Record,
        Mode::Audio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Ring => "ring",
            Mode::Wait => "wait",
            Mode::Call => "call",
            Mode::Dtmf => "dtmf",
            Mode::Play => "play",
            Mode::Answer => "answer",
            Mode::Record => "record",
            Mode::Audio => "audio",
        }
    }

    pub fn legs(&self) -> Legs {
        match self {
            Mode::Ring | Mode::Play => Legs::Out,
            Mode::Wait | Mode::Answer | Mode::Record => Legs::In,
            Mode::Call | Mode::Dtmf | Mode::Audio => Legs::Dual,
        }
    }

    pub async fn run(&self, ctx: &RunContext<'_>) -> Result<(), TestError> {
        match self {
            Mode::Ring => ring::run(ctx).await,
            Mode::Wait => wait::run(ctx).await,
            Mode::Call => call::run(ctx).await,
            Mode::Dtmf => dtmf::run(ctx).await,
            Mode::Play => play::run(ctx).await,
            Mode::Answer => answer::run(ctx).await,
            Mode::Record => record::run(ctx).await,
            Mode::Audio => audio::run(ctx).await,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = TestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| TestError::config(format!("unknown mode '{}'", s)))
    }
}

/// Everything a mode needs for one run
pub struct RunContext<'a> {
    /// Check name, passed to the controller as application argument
    pub name: &'a str,
    pub config: &'a CallConfig,
    pub harness: &'a Harness,
    pub src: Option<&'a Arc<Endpoint>>,
    pub dst: Option<&'a Arc<Endpoint>>,
    pub scope: &'a RunScope,
}

impl<'a> RunContext<'a> {
    pub fn controller(&self) -> &dyn Controller {
        &*self.harness.controller
    }

    pub fn src(&self) -> Result<&'a Arc<Endpoint>, TestError> {
        self.src
            .ok_or_else(|| TestError::config(format!("{}: mode {} needs a src link", self.name, self.config.mode)))
    }

    pub fn dst(&self) -> Result<&'a Arc<Endpoint>, TestError> {
        self.dst
            .ok_or_else(|| TestError::config(format!("{}: mode {} needs a dst link", self.name, self.config.mode)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names_roundtrip() {
        for mode in Mode::ALL {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
        assert_eq!(" DTMF ".parse::<Mode>().unwrap(), Mode::Dtmf);
    }

    #[test]
    fn test_unknown_mode() {
        let err = "fax".parse::<Mode>().unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }

    #[test]
    fn test_legs() {
        assert_eq!(Mode::Ring.legs(), Legs::Out);
        assert_eq!(Mode::Play.legs(), Legs::Out);
        assert_eq!(Mode::Wait.legs(), Legs::In);
        assert_eq!(Mode::Answer.legs(), Legs::In);
        assert_eq!(Mode::Record.legs(), Legs::In);
        assert_eq!(Mode::Call.legs(), Legs::Dual);
        assert_eq!(Mode::Dtmf.legs(), Legs::Dual);
        assert_eq!(Mode::Audio.legs(), Legs::Dual);
    }

    #[test]
    fn test_serde_lowercase() {
        #[derive(Deserialize)]
        struct W {
            mode: Mode,
        }
        let w: W = toml::from_str("mode = \"record\"").unwrap();
        assert_eq!(w.mode, Mode::Record);
    }
}
