//! `answer`: accept the call, bridge it, play `audio.dst_out` while
//! optionally recording into `audio.dst_in`. The call ends when playback
//! does, or right away without anything to play.

use super::leg::{connect_in, InLeg};
use super::RunContext;
use crate::controller::{tolerate_gone, IfExists};
use crate::error::TestError;

pub async fn run(ctx: &RunContext<'_>) -> Result<(), TestError> {
    let leg = InLeg::listen(ctx)?.arrive(ctx).await?;
    connect_in(ctx, &leg, true).await?;

    let bridge = ctx.controller().bridge().await?;
    ctx.scope.track_bridge(bridge.clone());
    bridge.add(leg.channel.clone()).await?;

    let audio = &ctx.config.audio;
    if let Some(outfile) = &audio.dst_out {
        let recording = match &audio.dst_in {
            Some(infile) => Some(bridge.record(infile, &audio.format, IfExists::Overwrite).await?),
            None => None,
        };
        bridge.play(outfile).await?;
        if let Some(rec) = recording {
            tolerate_gone(rec.stop().await)?;
        }
    }
    Ok(())
}
