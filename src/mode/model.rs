/// DTMF rendezvous - Stateright Model
/// Checks the three-signal handshake of the dtmf mode: no digit is sent
/// before the receiving leg listens, the caller never leaves before the
/// callee has verified everything, and both legs always finish.
///
/// Run with: cargo test --release dtmf_model -- --nocapture

use stateright::*;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum CalleePc {
    Connect,
    AwaitHeardIn,
    Send(u8),
    Listen,
    Finished,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum CallerPc {
    Connect,
    Listen,
    AwaitHeardOut,
    Send(u8),
    AwaitDone,
    Finished,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Step {
    Callee,
    Caller,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Rendezvous {
    pub callee: CalleePc,
    pub caller: CallerPc,
    pub heard_in: bool,
    pub heard_out: bool,
    pub done: bool,
    /// Digits queued toward each leg
    pub to_caller: u8,
    pub to_callee: u8,
    pub caller_got: u8,
    pub callee_got: u8,
    /// Digits sent while the receiver was not listening
    pub early: u8,
}

#[derive(Clone)]
pub struct DtmfChecker {
    pub digits: u8,
    /// Drop the callee's wait for the caller, to show the checker notices
    pub skip_heard_in: bool,
}

impl Default for DtmfChecker {
    fn default() -> Self {
        Self {
            digits: 3,
            skip_heard_in: false,
        }
    }
}

impl DtmfChecker {
    fn callee_enabled(&self, s: &Rendezvous) -> bool {
        match s.callee {
            CalleePc::Connect | CalleePc::Send(_) => true,
            CalleePc::AwaitHeardIn => s.heard_in || self.skip_heard_in,
            CalleePc::Listen => s.to_callee > 0,
            CalleePc::Finished => false,
        }
    }

    fn caller_enabled(&self, s: &Rendezvous) -> bool {
        match s.caller {
            CallerPc::Connect | CallerPc::Send(_) => true,
            CallerPc::Listen => s.to_caller > 0,
            CallerPc::AwaitHeardOut => s.heard_out,
            CallerPc::AwaitDone => s.done,
            CallerPc::Finished => false,
        }
    }
}

impl Model for DtmfChecker {
    type State = Rendezvous;
    type Action = Step;

    fn init_states(&self) -> Vec<Self::State> {
        vec![Rendezvous {
            callee: CalleePc::Connect,
            caller: CallerPc::Connect,
            heard_in: false,
            heard_out: false,
            done: false,
            to_caller: 0,
            to_callee: 0,
            caller_got: 0,
            callee_got: 0,
            early: 0,
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        if self.callee_enabled(state) {
            actions.push(Step::Callee);
        }
        if self.caller_enabled(state) {
            actions.push(Step::Caller);
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();

        match action {
            Step::Callee => match state.callee {
                CalleePc::Connect => next.callee = CalleePc::AwaitHeardIn,
                CalleePc::AwaitHeardIn => next.callee = CalleePc::Send(0),
                CalleePc::Send(i) => {
                    next.to_caller += 1;
                    if state.caller != CallerPc::Listen {
                        next.early += 1;
                    }
                    if i + 1 == self.digits {
                        // Listening starts before heard_out is set
                        next.callee = CalleePc::Listen;
                        next.heard_out = true;
                    } else {
                        next.callee = CalleePc::Send(i + 1);
                    }
                }
                CalleePc::Listen => {
                    next.to_callee -= 1;
                    next.callee_got += 1;
                    if next.callee_got == self.digits {
                        next.done = true;
                        next.callee = CalleePc::Finished;
                    }
                }
                CalleePc::Finished => return None,
            },

            Step::Caller => match state.caller {
                CallerPc::Connect => {
                    next.caller = CallerPc::Listen;
                    next.heard_in = true;
                }
                CallerPc::Listen => {
                    next.to_caller -= 1;
                    next.caller_got += 1;
                    if next.caller_got == self.digits {
                        next.caller = CallerPc::AwaitHeardOut;
                    }
                }
                CallerPc::AwaitHeardOut => next.caller = CallerPc::Send(0),
                CallerPc::Send(i) => {
                    next.to_callee += 1;
                    if state.callee != CalleePc::Listen {
                        next.early += 1;
                    }
                    next.caller = if i + 1 == self.digits {
                        CallerPc::AwaitDone
                    } else {
                        CallerPc::Send(i + 1)
                    };
                }
                CallerPc::AwaitDone => next.caller = CallerPc::Finished,
                CallerPc::Finished => return None,
            },
        }

        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            // Safety: every digit finds its receiver already listening
            Property::always("no_digit_before_listener", |_, state: &Rendezvous| {
                state.early == 0
            }),
            // Safety: the caller hangs up only after the callee verified
            Property::always("caller_waits_for_callee", |_, state: &Rendezvous| {
                state.caller != CallerPc::Finished || state.callee == CalleePc::Finished
            }),
            // Safety: nobody receives more than was sent
            Property::always("no_extra_digits", |model: &DtmfChecker, state: &Rendezvous| {
                state.caller_got <= model.digits && state.callee_got <= model.digits
            }),
            // Liveness: both legs finish on every interleaving
            Property::eventually("both_finish", |_, state: &Rendezvous| {
                state.callee == CalleePc::Finished && state.caller == CallerPc::Finished
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateright::Checker;

    #[test]
    fn dtmf_model_check_properties() {
        let checker = DtmfChecker::default().checker().spawn_bfs().join();
        println!("States explored: {}", checker.unique_state_count());
        checker.assert_properties();
    }

    #[test]
    fn dtmf_model_interleavings_explored() {
        let checker = DtmfChecker::default().checker().spawn_bfs().join();
        assert!(
            checker.unique_state_count() > 10,
            "Expected more than 10 states, got {}",
            checker.unique_state_count()
        );
    }

    #[test]
    fn dtmf_model_detects_missing_barrier() {
        let model = DtmfChecker {
            skip_heard_in: true,
            ..Default::default()
        };
        let checker = model.checker().spawn_bfs().join();
        assert!(
            checker.discovery("no_digit_before_listener").is_some(),
            "sending without waiting for the caller must be caught"
        );
    }

    #[test]
    fn dtmf_model_happy_path() {
        let model = DtmfChecker { digits: 1, ..Default::default() };
        let mut state = model.init_states()[0].clone();

        state = model.next_state(&state, Step::Callee).unwrap();
        assert_eq!(state.callee, CalleePc::AwaitHeardIn);
        assert!(!model.callee_enabled(&state));

        state = model.next_state(&state, Step::Caller).unwrap();
        assert!(state.heard_in);

        state = model.next_state(&state, Step::Callee).unwrap();
        state = model.next_state(&state, Step::Callee).unwrap();
        assert_eq!(state.callee, CalleePc::Listen);
        assert!(state.heard_out);

        state = model.next_state(&state, Step::Caller).unwrap();
        assert_eq!(state.caller, CallerPc::AwaitHeardOut);
        state = model.next_state(&state, Step::Caller).unwrap();
        state = model.next_state(&state, Step::Caller).unwrap();
        assert_eq!(state.caller, CallerPc::AwaitDone);
        assert!(!model.caller_enabled(&state));

        state = model.next_state(&state, Step::Callee).unwrap();
        assert!(state.done);
        state = model.next_state(&state, Step::Caller).unwrap();
        assert_eq!(state.caller, CallerPc::Finished);
        assert_eq!(state.early, 0);
    }
}
