//! `call`: src calls dst; the callee rings and stays up until the caller
//! has seen the ringing

use tracing::debug;

use super::leg::{connect_in, connect_out, InLeg, OutLeg, OutWait};
use super::signal::Signal;
use super::RunContext;
use crate::controller::wait_ringing;
use crate::error::TestError;

pub async fn run(ctx: &RunContext<'_>) -> Result<(), TestError> {
    let pending = InLeg::listen(ctx)?;
    let ringing = Signal::new();
    let done = Signal::new();

    let callee = async {
        let leg = pending.arrive(ctx).await?;
        connect_in(ctx, &leg, false).await?;
        ringing.wait().await;
        done.set();
        Ok::<_, TestError>(())
    };

    let caller = async {
        let leg = OutLeg::originate(ctx).await?;
        connect_out(ctx, &leg, OutWait::Nothing).await?;
        wait_ringing(&*leg.channel).await?;
        debug!("{}: caller sees ringing", ctx.name);
        ringing.set();
        done.wait().await;
        Ok::<_, TestError>(())
    };

    tokio::try_join!(callee, caller)?;
    Ok(())
}
