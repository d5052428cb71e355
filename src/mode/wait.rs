//! `wait`: accept the next incoming call, ring it, hang up unanswered

use super::leg::{connect_in, InLeg};
use super::RunContext;
use crate::error::TestError;

pub async fn run(ctx: &RunContext<'_>) -> Result<(), TestError> {
    let leg = InLeg::listen(ctx)?.arrive(ctx).await?;
    connect_in(ctx, &leg, false).await
}
