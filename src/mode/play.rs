//! `play`: originate, wait for the answer, play `audio.src_out` while
//! optionally recording into `audio.src_in`

use tracing::debug;

use super::leg::{connect_out, OutLeg, OutWait};
use super::RunContext;
use crate::controller::{tolerate_gone, IfExists};
use crate::error::TestError;

pub async fn run(ctx: &RunContext<'_>) -> Result<(), TestError> {
    let leg = OutLeg::originate(ctx).await?;
    connect_out(ctx, &leg, OutWait::Answered).await?;

    let audio = &ctx.config.audio;
    let Some(outfile) = &audio.src_out else {
        debug!("{}: nothing to play", ctx.name);
        return Ok(());
    };
    let recording = match &audio.src_in {
        Some(infile) => Some(leg.channel.record(infile, &audio.format, IfExists::Overwrite).await?),
        None => None,
    };
    leg.channel.play(outfile).await?;
    if let Some(rec) = recording {
        tolerate_gone(rec.stop().await)?;
    }
    Ok(())
}
