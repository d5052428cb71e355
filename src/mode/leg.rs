//! Inbound and outbound call legs plus the connect helpers every mode
//! builds on

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::RunContext;
use crate::controller::{
    tolerate_gone, wait_answered, wait_ringing, Channel, ControllerError, Incoming,
    OriginateRequest,
};
use crate::dialplan::redact_number;
use crate::endpoint::Endpoint;
use crate::error::TestError;

/// Application arguments tagging a channel as ours
pub const DIALED_TAG: &str = ":dialed";

/// Subscription to the next call on the destination endpoint, made before
/// the other leg originates so the call cannot slip past
pub struct PendingInLeg {
    dst: Arc<Endpoint>,
    incoming: Incoming,
}

/// The claimed inbound call
pub struct InLeg {
    pub channel: Arc<dyn Channel>,
}

/// The originated outbound call
pub struct OutLeg {
    pub channel: Arc<dyn Channel>,
}

impl InLeg {
    pub fn listen(ctx: &RunContext<'_>) -> Result<PendingInLeg, TestError> {
        let dst = ctx.dst()?.clone();
        let incoming = ctx.controller().incoming(&dst.name)?;
        debug!("{}: listening on {}", ctx.name, dst.name);
        Ok(PendingInLeg { dst, incoming })
    }
}

impl PendingInLeg {
    /// Wait for the call, claim it, and verify the caller if configured.
    ///
    /// From here on any further call on the same destination is hung up
    /// and aborts the run with a collision error.
    pub async fn arrive(mut self, ctx: &RunContext<'_>) -> Result<InLeg, TestError> {
        let channel = self.incoming.recv().await.ok_or(ControllerError::Closed)?;
        ctx.scope.track_channel(channel.clone());
        debug!("{}: incoming {} on {}", ctx.name, channel.id(), self.dst.name);

        let faults = ctx.scope.faults();
        let dst = self.dst.name.clone();
        let check = ctx.name.to_string();
        let mut incoming = self.incoming;
        ctx.scope.spawn(async move {
            if let Some(intruder) = incoming.recv().await {
                warn!("{}: second call {} on {}, hanging up", check, intruder.id(), dst);
                if let Err(e) = tolerate_gone(intruder.hangup().await) {
                    debug!("{}: hanging up {} failed: {}", check, intruder.id(), e);
                }
                faults.raise(TestError::Collision(dst));
            }
        });

        if ctx.config.callerid {
            verify_caller(ctx, &*channel)?;
        }
        Ok(InLeg { channel })
    }
}

fn verify_caller(ctx: &RunContext<'_>, channel: &dyn Channel) -> Result<(), TestError> {
    let src = ctx.src()?;
    let expected = src
        .number
        .as_deref()
        .ok_or_else(|| TestError::config(format!("link '{}' has no number to check caller ID against", src.name)))?;
    let received = channel.caller_number().unwrap_or_default();
    if ctx.harness.dialplan.same_number(expected, &received) {
        debug!("{}: caller ID {} verified", ctx.name, redact_number(&received));
        Ok(())
    } else {
        Err(TestError::WrongCallerId {
            expected: redact_number(expected),
            received: redact_number(&received),
        })
    }
}

impl OutLeg {
    /// Call the destination from the source endpoint
    pub async fn originate(ctx: &RunContext<'_>) -> Result<OutLeg, TestError> {
        let src = ctx.src()?;
        let number = match (&ctx.config.number, ctx.dst) {
            (Some(nr), _) => nr.clone(),
            (None, Some(dst)) => dst.number.clone().ok_or_else(|| {
                TestError::config(format!("link '{}' has no number to dial", dst.name))
            })?,
            (None, None) => {
                return Err(TestError::config(format!(
                    "{}: nothing to dial, set dst or number",
                    ctx.name
                )))
            }
        };

        let mut variables = HashMap::new();
        if let Some(own) = &src.number {
            variables.insert("CALLERID(num)".to_string(), own.clone());
        }
        let request = OriginateRequest {
            endpoint: src.dial_string(&number)?,
            app: ctx.harness.app.clone(),
            app_args: vec![DIALED_TAG.to_string(), ctx.name.to_string()],
            variables,
            caller_id: src.number.clone(),
        };
        let channel = ctx.controller().originate(request).await?;
        ctx.scope.track_channel(channel.clone());
        debug!("{}: calling {} from {} as {}", ctx.name, redact_number(&number), src.name, channel.id());
        Ok(OutLeg { channel })
    }
}

async fn pause(d: Duration) {
    if !d.is_zero() {
        sleep(d).await;
    }
}

/// Bring the inbound leg up: wait `pre`, ring, wait `ring`, then answer
/// and wait `answer` if requested
pub async fn connect_in(ctx: &RunContext<'_>, leg: &InLeg, answer: bool) -> Result<(), TestError> {
    let delay = &ctx.config.delay;
    pause(delay.pre).await;
    leg.channel.ring().await?;
    pause(delay.ring).await;
    if answer {
        leg.channel.answer().await?;
        wait_answered(&*leg.channel).await?;
        debug!("{}: answered {}", ctx.name, leg.channel.id());
        pause(delay.answer).await;
    }
    Ok(())
}

/// How far `connect_out` follows the outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutWait {
    Nothing,
    Ringing,
    Answered,
}

pub async fn connect_out(ctx: &RunContext<'_>, leg: &OutLeg, until: OutWait) -> Result<(), TestError> {
    match until {
        OutWait::Nothing => {}
        OutWait::Ringing => {
            wait_ringing(&*leg.channel).await?;
            debug!("{}: {} is ringing", ctx.name, leg.channel.id());
        }
        OutWait::Answered => {
            wait_answered(&*leg.channel).await?;
            debug!("{}: {} answered", ctx.name, leg.channel.id());
            pause(ctx.config.delay.answer).await;
        }
    }
    Ok(())
}
