//! `ring`: originate, wait until the far side rings, hang up

use tracing::info;

use super::leg::{connect_out, OutLeg, OutWait};
use super::RunContext;
use crate::error::TestError;

pub async fn run(ctx: &RunContext<'_>) -> Result<(), TestError> {
    let leg = OutLeg::originate(ctx).await?;
    connect_out(ctx, &leg, OutWait::Ringing).await?;
    info!("{}: far side rang", ctx.name);
    Ok(())
}
