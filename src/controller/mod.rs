//! Telephony controller interface
//!
//! The check engine never speaks a controller wire protocol itself. It
//! drives calls through these traits; `loopback` provides an in-memory
//! implementation used by the simulator backend and the test suites.

pub mod loopback;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub use loopback::{Loopback, LoopbackOptions};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    /// The channel, bridge or recording no longer exists. During teardown
    /// this is an expected race, not a failure.
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("controller connection closed")]
    Closed,

    #[error("controller request failed: {0}")]
    Failed(String),
}

impl ControllerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::NotFound(_))
    }
}

pub type ControllerResult<T> = std::result::Result<T, ControllerError>;

/// Signaling state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Created, not yet ringing
    Down,
    Ringing,
    /// Answered
    Up,
    /// Hung up by either side
    Gone,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Down => "Down",
            ChannelState::Ringing => "Ringing",
            ChannelState::Up => "Up",
            ChannelState::Gone => "Gone",
        };
        f.write_str(s)
    }
}

/// What to do when a recording target already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfExists {
    Fail,
    Overwrite,
    Append,
}

impl IfExists {
    pub fn as_str(&self) -> &'static str {
        match self {
            IfExists::Fail => "fail",
            IfExists::Overwrite => "overwrite",
            IfExists::Append => "append",
        }
    }
}

/// Parameters for originating an outbound channel
#[derive(Debug, Clone, Default)]
pub struct OriginateRequest {
    /// Dial string, already formatted from the endpoint template
    pub endpoint: String,
    /// Application that receives the channel
    pub app: String,
    pub app_args: Vec<String>,
    pub variables: HashMap<String, String>,
    pub caller_id: Option<String>,
}

/// Audio and DTMF operations shared by channels and bridges.
///
/// Implementations must buffer DTMF events from the moment the object
/// exists, so a listener that starts late does not lose digits.
#[async_trait]
pub trait Media: Send + Sync {
    /// Play a media file and wait until playback has finished
    async fn play(&self, media: &str) -> ControllerResult<()>;

    /// Start recording; the returned handle stops it
    async fn record(
        &self,
        name: &str,
        format: &str,
        if_exists: IfExists,
    ) -> ControllerResult<Box<dyn Recording>>;

    /// Wait for the next received DTMF digit
    async fn next_dtmf(&self) -> ControllerResult<char>;
}

#[async_trait]
pub trait Channel: Media {
    fn id(&self) -> &str;

    /// Caller number as presented by the network, if any
    fn caller_number(&self) -> Option<String>;

    fn state(&self) -> ChannelState;

    /// Wait until the channel is in one of `states`. Returns the state
    /// reached; fails with `NotFound` if the channel is gone first and
    /// `Gone` was not among the wanted states.
    async fn wait_state(&self, states: &[ChannelState]) -> ControllerResult<ChannelState>;

    async fn ring(&self) -> ControllerResult<()>;

    async fn answer(&self) -> ControllerResult<()>;

    async fn hangup(&self) -> ControllerResult<()>;

    async fn send_dtmf(&self, digits: &str, between: Duration) -> ControllerResult<()>;
}

#[async_trait]
pub trait Bridge: Media {
    fn id(&self) -> &str;

    async fn add(&self, channel: Arc<dyn Channel>) -> ControllerResult<()>;

    async fn destroy(&self) -> ControllerResult<()>;
}

#[async_trait]
pub trait Recording: Send + Sync {
    fn name(&self) -> &str;

    async fn stop(&self) -> ControllerResult<()>;
}

/// Inbound calls delivered for one destination. Dropping the receiver
/// ends the subscription.
pub type Incoming = mpsc::UnboundedReceiver<Arc<dyn Channel>>;

#[async_trait]
pub trait Controller: Send + Sync {
    async fn originate(&self, request: OriginateRequest) -> ControllerResult<Arc<dyn Channel>>;

    /// Register interest in calls arriving for the endpoint `destination`
    fn incoming(&self, destination: &str) -> ControllerResult<Incoming>;

    async fn bridge(&self) -> ControllerResult<Arc<dyn Bridge>>;
}

/// Wait until a channel is ringing (or already answered)
pub async fn wait_ringing(chan: &dyn Channel) -> ControllerResult<ChannelState> {
    chan.wait_state(&[ChannelState::Ringing, ChannelState::Up]).await
}

/// Wait until a channel is answered
pub async fn wait_answered(chan: &dyn Channel) -> ControllerResult<ChannelState> {
    chan.wait_state(&[ChannelState::Up]).await
}

/// Run a teardown call, treating "not found" as already done
pub fn tolerate_gone(result: ControllerResult<()>) -> ControllerResult<()> {
    match result {
        Err(e) if e.is_not_found() => {
            tracing::debug!("Teardown race: {}", e);
            Ok(())
        }
        other => other,
    }
}
