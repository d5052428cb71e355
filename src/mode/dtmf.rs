//! `dtmf`: both legs answer, the callee sends a random digit sequence, the
//! caller verifies it and answers with its own, which the callee verifies.
//!
//! Three signals keep the legs in step: nobody sends before the receiving
//! side is listening, and the caller stays on the line until the callee
//! has everything.
//!
//! ```text
//! callee                      caller
//! connect (answer)            connect (until answered)
//!                             listen, set heard_in
//! wait heard_in
//! send in_digits  ----------> match in_digits
//! listen, set heard_out       wait heard_out
//! match out_digits <--------- send out_digits
//! set done                    wait done
//! ```

use tracing::debug;

use super::leg::{connect_in, connect_out, InLeg, OutLeg, OutWait};
use super::signal::Signal;
use super::RunContext;
use crate::dtmf::{expect_digits, random_dtmf, DigitMatcher};
use crate::error::TestError;

/// What one exchange sent and matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtmfReport {
    /// Sent by the callee, verified by the caller
    pub in_digits: String,
    pub in_matched: usize,
    /// Sent by the caller, verified by the callee
    pub out_digits: String,
    pub out_matched: usize,
}

pub async fn run(ctx: &RunContext<'_>) -> Result<(), TestError> {
    let report = exchange(ctx).await?;
    debug!(
        "{}: DTMF {}/{} and {}/{} matched",
        ctx.name,
        report.in_matched,
        report.in_digits.len(),
        report.out_matched,
        report.out_digits.len()
    );
    Ok(())
}

pub async fn exchange(ctx: &RunContext<'_>) -> Result<DtmfReport, TestError> {
    let dtmf = &ctx.config.dtmf;
    let in_digits = random_dtmf(dtmf.len);
    let out_digits = random_dtmf(dtmf.len);

    let pending = InLeg::listen(ctx)?;
    let heard_in = Signal::new();
    let heard_out = Signal::new();
    let done = Signal::new();

    let callee = async {
        let leg = pending.arrive(ctx).await?;
        connect_in(ctx, &leg, true).await?;
        heard_in.wait().await;
        leg.channel.send_dtmf(&in_digits, dtmf.between).await?;
        let mut matcher = DigitMatcher::new(&out_digits, dtmf.may_repeat);
        expect_digits(&*leg.channel, &mut matcher, Some(&heard_out)).await?;
        done.set();
        Ok::<_, TestError>(matcher.position())
    };

    let caller = async {
        let leg = OutLeg::originate(ctx).await?;
        connect_out(ctx, &leg, OutWait::Answered).await?;
        let mut matcher = DigitMatcher::new(&in_digits, dtmf.may_repeat);
        expect_digits(&*leg.channel, &mut matcher, Some(&heard_in)).await?;
        heard_out.wait().await;
        leg.channel.send_dtmf(&out_digits, dtmf.between).await?;
        done.wait().await;
        Ok::<_, TestError>(matcher.position())
    };

    let (out_matched, in_matched) = tokio::try_join!(callee, caller)?;
    Ok(DtmfReport {
        in_digits,
        in_matched,
        out_digits,
        out_matched,
    })
}
