//! `record`: accept the call, bridge it, optionally play a prompt, and
//! record until the stop digit arrives or the caller hangs up

use tracing::{debug, trace};

use super::leg::{connect_in, InLeg};
use super::RunContext;
use crate::controller::{tolerate_gone, Bridge, Channel, ChannelState, ControllerResult, IfExists};
use crate::error::TestError;

pub async fn run(ctx: &RunContext<'_>) -> Result<(), TestError> {
    let leg = InLeg::listen(ctx)?.arrive(ctx).await?;
    connect_in(ctx, &leg, true).await?;

    let bridge = ctx.controller().bridge().await?;
    ctx.scope.track_bridge(bridge.clone());
    bridge.add(leg.channel.clone()).await?;

    let audio = &ctx.config.audio;
    let recording = match &audio.dst_in {
        Some(infile) => Some(bridge.record(infile, &audio.format, IfExists::Overwrite).await?),
        None => None,
    };
    if let Some(outfile) = &audio.dst_out {
        bridge.play(outfile).await?;
    }

    if let Some(rec) = recording {
        tokio::select! {
            res = stop_digit(&*bridge, audio.stop_digit) => res?,
            res = hung_up(&*leg.channel) => res?,
        }
        debug!("{}: recording {} finished", ctx.name, rec.name());
        tolerate_gone(rec.stop().await)?;
    }
    Ok(())
}

/// Read digits until `stop`. A vanished call also ends the recording.
async fn stop_digit(bridge: &dyn Bridge, stop: char) -> ControllerResult<()> {
    loop {
        match bridge.next_dtmf().await {
            Ok(d) if d.eq_ignore_ascii_case(&stop) => return Ok(()),
            Ok(d) => trace!("Ignoring DTMF '{}' while recording", d),
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

async fn hung_up(channel: &dyn Channel) -> ControllerResult<()> {
    channel.wait_state(&[ChannelState::Gone]).await.map(|_| ())
}
