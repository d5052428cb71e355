//! `audio`: both legs answer and take turns. The caller records while the
//! callee plays, then the callee records while the caller plays.
//!
//! `recording_out` tells the callee the caller is recording, `played_in`
//! tells the caller the callee's prompt is done, `done` ends the callee's
//! recording after the caller's prompt.

use tracing::debug;

use super::leg::{connect_in, connect_out, InLeg, OutLeg, OutWait};
use super::signal::Signal;
use super::RunContext;
use crate::controller::{tolerate_gone, Channel, IfExists, Recording};
use crate::error::TestError;

pub async fn run(ctx: &RunContext<'_>) -> Result<(), TestError> {
    let audio = &ctx.config.audio;
    let pending = InLeg::listen(ctx)?;
    let recording_out = Signal::new();
    let played_in = Signal::new();
    let done = Signal::new();

    let callee = async {
        let leg = pending.arrive(ctx).await?;
        connect_in(ctx, &leg, true).await?;
        recording_out.wait().await;
        if let Some(outfile) = &audio.dst_out {
            leg.channel.play(outfile).await?;
        }
        let rec = start_record(&*leg.channel, audio.dst_in.as_deref(), &audio.format).await?;
        played_in.set();
        done.wait().await;
        stop_record(rec).await?;
        debug!("{}: callee side complete", ctx.name);
        Ok::<_, TestError>(())
    };

    let caller = async {
        let leg = OutLeg::originate(ctx).await?;
        connect_out(ctx, &leg, OutWait::Answered).await?;
        let rec = start_record(&*leg.channel, audio.src_in.as_deref(), &audio.format).await?;
        recording_out.set();
        played_in.wait().await;
        stop_record(rec).await?;
        if let Some(outfile) = &audio.src_out {
            leg.channel.play(outfile).await?;
        }
        done.set();
        debug!("{}: caller side complete", ctx.name);
        Ok::<_, TestError>(())
    };

    tokio::try_join!(callee, caller)?;
    Ok(())
}

async fn start_record(
    channel: &dyn Channel,
    name: Option<&str>,
    format: &str,
) -> Result<Option<Box<dyn Recording>>, TestError> {
    match name {
        Some(name) => Ok(Some(channel.record(name, format, IfExists::Overwrite).await?)),
        None => Ok(None),
    }
}

async fn stop_record(rec: Option<Box<dyn Recording>>) -> Result<(), TestError> {
    if let Some(rec) = rec {
        tolerate_gone(rec.stop().await)?;
    }
    Ok(())
}
