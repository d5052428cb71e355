/// DTMF sequence generation and matching
/// A small state machine that verifies an expected digit sequence arrives,
/// optionally tolerating digits the signaling layer reports twice.

use rand::Rng;
use tracing::{debug, trace};

use crate::controller::Media;
use crate::error::TestError;
use crate::mode::signal::Signal;

/// Digits used for generated sequences. A-D and the '#'/'*' keys are left
/// out because many trunks swallow or reinterpret them.
pub const DTMF_DIGITS: &[u8] = b"0123456789";

/// Generate a random DTMF sequence of the given length
pub fn random_dtmf(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| DTMF_DIGITS[rng.gen_range(0..DTMF_DIGITS.len())] as char)
        .collect()
}

/// Result of feeding one digit into a [`DigitMatcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Digit matched, position advanced
    Advanced,
    /// Duplicate of the previous digit, ignored
    Repeated,
    /// Whole sequence has been received
    Complete,
}

#[derive(Debug, Clone)]
pub struct DigitMatcher {
    expected: Vec<char>,
    pos: usize,
    may_repeat: bool,
}

impl DigitMatcher {
    pub fn new(expected: &str, may_repeat: bool) -> Self {
        Self {
            expected: expected.chars().map(|c| c.to_ascii_uppercase()).collect(),
            pos: 0,
            may_repeat,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.expected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.pos >= self.expected.len()
    }

    /// Consume one received digit.
    ///
    /// Digits arriving after completion are ignored.
    pub fn feed(&mut self, digit: char) -> Result<Step, TestError> {
        if self.is_complete() {
            return Ok(Step::Complete);
        }
        let digit = digit.to_ascii_uppercase();
        let want = self.expected[self.pos];

        if digit == want {
            self.pos += 1;
            return Ok(if self.is_complete() { Step::Complete } else { Step::Advanced });
        }

        if self.may_repeat && self.pos > 0 && digit == self.expected[self.pos - 1] {
            return Ok(Step::Repeated);
        }

        Err(TestError::Dtmf {
            expected: want,
            digit,
            position: self.pos,
        })
    }
}

/// Read digits from `media` until `matcher` completes.
///
/// `ready` is set once listening has started, so the peer may begin
/// sending. Fails on the first digit the matcher rejects.
pub async fn expect_digits<M: Media + ?Sized>(
    media: &M,
    matcher: &mut DigitMatcher,
    ready: Option<&Signal>,
) -> Result<(), TestError> {
    if let Some(ready) = ready {
        ready.set();
    }
    while !matcher.is_complete() {
        let digit = media.next_dtmf().await?;
        match matcher.feed(digit)? {
            Step::Repeated => debug!("Ignoring repeated DTMF '{}' at {}", digit, matcher.position()),
            step => trace!("DTMF '{}' -> {:?} ({}/{})", digit, step, matcher.position(), matcher.len()),
        }
    }
    Ok(())
}



/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    #[kani::proof]
    #[kani::unwind(5)]
    fn position_never_exceeds_len() {
        let mut m = DigitMatcher::new("123", kani::any());
        for _ in 0..4 {
            let d: u8 = kani::any();
            kani::assume(d < 10);
            let _ = m.feed((b'0' + d) as char);
            kani::assert(m.position() <= m.len(), "position must stay within the sequence");
        }
    }
}
