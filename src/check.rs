//! Test definitions and their runtime state
//!
//! A [`Check`] owns one configured test: its resolved endpoints, its own
//! run lock, and a state record that is only ever read through
//! [`Check::snapshot`]. [`Check::run_once`] is the single place where a
//! mode run is turned into counters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CallConfig;
use crate::controller::Controller;
use crate::dialplan::Dialplan;
use crate::endpoint::{Endpoint, Registry};
use crate::error::TestError;
use crate::lock;
use crate::mode::scope::RunScope;
use crate::mode::{Legs, RunContext};

/// Outcomes kept per check
pub const HISTORY_LEN: usize = 20;

/// What every run talks to
pub struct Harness {
    pub controller: Arc<dyn Controller>,
    pub dialplan: Dialplan,
    /// Application name originated calls are sent to
    pub app: String,
}

impl Harness {
    pub fn new(controller: Arc<dyn Controller>, dialplan: Dialplan, app: &str) -> Self {
        Self {
            controller,
            dialplan,
            app: app.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    New,
    /// Queued behind the check's own lock or its endpoints
    Waiting,
    Running,
    Idle,
}

/// Health classification from the consecutive failure count
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Ok,
    Warn,
    Fail,
}

/// Classify `fail_count` against the thresholds. `warn` applies only
/// below `fail`.
pub fn classify(fail_count: u32, warn: u32, fail: u32) -> Level {
    if fail_count >= fail {
        Level::Fail
    } else if fail_count >= warn && fail_count > 0 {
        Level::Warn
    } else {
        Level::Ok
    }
}

/// Result of one `run_once`
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Passed,
    Failed(TestError),
    /// Stopped on request without counting
    Stopped,
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Failed(_))
    }
}

/// Receives a snapshot after every state change
pub trait Observer: Send + Sync {
    fn on_update(&self, snapshot: CheckSnapshot);
}

/// Observer that ignores everything
pub struct NoObserver;

impl Observer for NoObserver {
    fn on_update(&self, _snapshot: CheckSnapshot) {}
}

impl<F> Observer for F
where
    F: Fn(CheckSnapshot) + Send + Sync,
{
    fn on_update(&self, snapshot: CheckSnapshot) {
        self(snapshot)
    }
}

#[derive(Debug)]
struct CheckState {
    status: CheckStatus,
    n_run: u64,
    n_fail: u64,
    fail_count: u32,
    history: VecDeque<bool>,
    error: Option<String>,
    error_kind: Option<&'static str>,
    t_wait: Duration,
    t_run: Duration,
    last_run: Option<DateTime<Utc>>,
    /// Token of the run in flight. Taken out by a stop that should not
    /// count, so the run sees itself as disowned.
    scope: Option<CancellationToken>,
    start_now: Option<oneshot::Sender<()>>,
}

impl Default for CheckState {
    fn default() -> Self {
        Self {
            status: CheckStatus::New,
            n_run: 0,
            n_fail: 0,
            fail_count: 0,
            history: VecDeque::with_capacity(HISTORY_LEN),
            error: None,
            error_kind: None,
            t_wait: Duration::ZERO,
            t_run: Duration::ZERO,
            last_run: None,
            scope: None,
            start_now: None,
        }
    }
}

/// Point-in-time copy of a check's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSnapshot {
    pub name: String,
    pub mode: String,
    pub info: String,
    pub status: CheckStatus,
    pub level: Level,
    pub skip: bool,
    pub n_run: u64,
    pub n_fail: u64,
    pub fail_count: u32,
    pub warn: u32,
    pub fail: u32,
    /// Oldest first, `true` for success
    pub history: Vec<bool>,
    pub error: Option<String>,
    pub t_wait: f64,
    pub t_run: f64,
    pub last_run: Option<DateTime<Utc>>,
}

pub struct Check {
    pub name: String,
    pub config: CallConfig,
    src: Option<Arc<Endpoint>>,
    dst: Option<Arc<Endpoint>>,
    run_lock: tokio::sync::Mutex<()>,
    state: Mutex<CheckState>,
}

impl Check {
    /// Resolve the endpoints named by `config`
    pub fn new(name: &str, config: CallConfig, registry: &Registry) -> Result<Self, TestError> {
        let src = config.src.as_deref().map(|n| registry.resolve(n)).transpose()?;
        let dst = config.dst.as_deref().map(|n| registry.resolve(n)).transpose()?;
        Ok(Self {
            name: name.to_string(),
            config,
            src,
            dst,
            run_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(CheckState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, CheckState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> CheckSnapshot {
        let st = self.state();
        CheckSnapshot {
            name: self.name.clone(),
            mode: self.config.mode.to_string(),
            info: self.config.info.clone(),
            status: st.status,
            level: classify(st.fail_count, self.config.warn, self.config.fail),
            skip: self.config.skip,
            n_run: st.n_run,
            n_fail: st.n_fail,
            fail_count: st.fail_count,
            warn: self.config.warn,
            fail: self.config.fail,
            history: st.history.iter().copied().collect(),
            error: st.error.clone(),
            t_wait: st.t_wait.as_secs_f64(),
            t_run: st.t_run.as_secs_f64(),
            last_run: st.last_run,
        }
    }

    pub fn level(&self) -> Level {
        classify(self.state().fail_count, self.config.warn, self.config.fail)
    }

    pub fn status(&self) -> CheckStatus {
        self.state().status
    }

    pub fn fail_count(&self) -> u32 {
        self.state().fail_count
    }

    /// Endpoints this check's mode occupies, in no particular order
    fn resources(&self) -> Result<Vec<&Endpoint>, TestError> {
        let missing = |which: &str| {
            TestError::config(format!("{}: mode {} needs a {} link", self.name, self.config.mode, which))
        };
        let src = self.src.as_deref();
        let dst = self.dst.as_deref();
        Ok(match self.config.mode.legs() {
            Legs::Out => vec![src.ok_or_else(|| missing("src"))?],
            Legs::In => vec![dst.ok_or_else(|| missing("dst"))?],
            Legs::Dual => vec![
                src.ok_or_else(|| missing("src"))?,
                dst.ok_or_else(|| missing("dst"))?,
            ],
        })
    }

    /// Run the check once and account for the result
    pub async fn run_once(&self, harness: &Harness, observer: &dyn Observer) -> RunOutcome {
        let waited = Instant::now();
        {
            // A run queued behind another leaves the running one's status alone
            let mut st = self.state();
            if st.status != CheckStatus::Running {
                st.status = CheckStatus::Waiting;
            }
        }
        observer.on_update(self.snapshot());

        // The token slot belongs to whoever holds the run lock
        let run_guard = self.run_lock.lock().await;
        let token = CancellationToken::new();
        {
            let mut st = self.state();
            st.status = CheckStatus::Waiting;
            st.scope = Some(token.clone());
        }

        let scope = RunScope::new(&self.name, token.clone());
        let prepared = tokio::select! {
            biased;
            _ = token.cancelled() => Err(TestError::Cancelled),
            res = self.prepare(&scope) => res,
        };
        if let Err(e) = prepared {
            self.state().t_wait += waited.elapsed();
            scope.close().await;
            let outcome = self.finish(Err(e), observer);
            drop(run_guard);
            return outcome;
        }

        {
            let mut st = self.state();
            st.t_wait += waited.elapsed();
            st.status = CheckStatus::Running;
        }
        observer.on_update(self.snapshot());
        debug!("{}: running {}", self.name, self.config.mode);

        let started = Instant::now();
        let ctx = RunContext {
            name: &self.name,
            config: &self.config,
            harness,
            src: self.src.as_ref(),
            dst: self.dst.as_ref(),
            scope: &scope,
        };
        let limit = self.config.timeout;
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(TestError::Cancelled),
            err = scope.fault() => Err(err),
            res = timeout(limit, self.config.mode.run(&ctx)) => match res {
                Ok(res) => res,
                Err(_) => Err(TestError::Timeout(limit)),
            },
        };
        scope.close().await;
        self.state().t_run += started.elapsed();

        let outcome = self.finish(result, observer);
        drop(run_guard);
        outcome
    }

    /// Take the endpoint locks in global order
    async fn prepare(&self, scope: &RunScope) -> Result<(), TestError> {
        let resources = self.resources()?;
        scope.hold(lock::acquire(&resources).await);
        Ok(())
    }

    fn finish(&self, result: Result<(), TestError>, observer: &dyn Observer) -> RunOutcome {
        let outcome = {
            let mut st = self.state();
            let owned = st.scope.take().is_some();
            st.status = CheckStatus::Idle;
            match result {
                Err(TestError::Cancelled) if !owned => RunOutcome::Stopped,
                Ok(()) => {
                    st.n_run += 1;
                    st.fail_count = 0;
                    st.error = None;
                    st.error_kind = None;
                    st.last_run = Some(Utc::now());
                    push_history(&mut st.history, true);
                    RunOutcome::Passed
                }
                Err(e) => {
                    st.n_run += 1;
                    st.n_fail += 1;
                    st.fail_count += 1;
                    st.error = Some(e.to_string());
                    st.last_run = Some(Utc::now());
                    push_history(&mut st.history, false);
                    if st.error_kind != Some(e.kind()) {
                        warn!("{}: failed ({} in a row): {}", self.name, st.fail_count, e);
                    } else {
                        debug!("{}: failed again ({} in a row): {}", self.name, st.fail_count, e);
                    }
                    st.error_kind = Some(e.kind());
                    RunOutcome::Failed(e)
                }
            }
        };
        match &outcome {
            RunOutcome::Passed => info!("{}: OK", self.name),
            RunOutcome::Stopped => info!("{}: stopped", self.name),
            RunOutcome::Failed(_) => {}
        }
        observer.on_update(self.snapshot());
        outcome
    }

    /// Register a pending wait the scheduler can be woken from
    pub(crate) fn arm_start(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.state().start_now = Some(tx);
        rx
    }

    pub(crate) fn disarm_start(&self) {
        self.state().start_now = None;
    }

    pub(crate) fn add_wait(&self, waited: Duration) {
        self.state().t_wait += waited;
    }

    /// Cut a pending wait short. False when nothing is waiting.
    pub fn request_start(&self) -> bool {
        let pending = self.state().start_now.take();
        match pending {
            Some(tx) => {
                info!("{}: start requested", self.name);
                // A receiver that already gave up still counts as woken
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Cancel the run in flight. False when nothing is running.
    ///
    /// Without `count_as_failure` the run is disowned first and ends as
    /// [`RunOutcome::Stopped`] without touching the counters.
    pub fn request_stop(&self, count_as_failure: bool) -> bool {
        let token = {
            let mut st = self.state();
            if count_as_failure {
                st.scope.clone()
            } else {
                st.scope.take()
            }
        };
        match token {
            Some(token) => {
                info!("{}: stop requested (count as failure: {})", self.name, count_as_failure);
                token.cancel();
                true
            }
            None => false,
        }
    }
}

fn push_history(history: &mut VecDeque<bool>, ok: bool) {
    if history.len() == HISTORY_LEN {
        history.pop_front();
    }
    history.push_back(ok);
}



/// Stateright model of the status transitions a check goes through
#[cfg(test)]
mod state_machine {
    use stateright::*;

    #[derive(Clone, Debug, Hash, PartialEq, Eq)]
    pub enum St {
        New,
        Waiting,
        Running,
        Idle,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq)]
    pub enum Ev {
        Begin,
        Locked,
        Pass,
        Fail,
        Stop { count: bool },
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq)]
    pub struct CheckModel {
        pub st: St,
        pub owned: bool,
        pub n_run: u8,
        pub n_fail: u8,
        pub fail_count: u8,
    }

    pub struct CheckMachine {
        pub max_runs: u8,
    }

    impl Model for CheckMachine {
        type State = CheckModel;
        type Action = Ev;

        fn init_states(&self) -> Vec<Self::State> {
            vec![CheckModel { st: St::New, owned: false, n_run: 0, n_fail: 0, fail_count: 0 }]
        }

        fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
            match state.st {
                St::New | St::Idle => {
                    if state.n_run < self.max_runs {
                        actions.push(Ev::Begin);
                    }
                }
                St::Waiting => {
                    actions.push(Ev::Locked);
                    actions.push(Ev::Stop { count: true });
                    actions.push(Ev::Stop { count: false });
                }
                St::Running => {
                    actions.push(Ev::Pass);
                    actions.push(Ev::Fail);
                    actions.push(Ev::Stop { count: true });
                    actions.push(Ev::Stop { count: false });
                }
            }
        }

        fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
            let mut next = state.clone();
            match action {
                Ev::Begin => {
                    next.st = St::Waiting;
                    next.owned = true;
                }
                Ev::Locked => next.st = St::Running,
                Ev::Pass => {
                    next.st = St::Idle;
                    next.owned = false;
                    next.n_run += 1;
                    next.fail_count = 0;
                }
                Ev::Fail | Ev::Stop { count: true } => {
                    next.st = St::Idle;
                    next.owned = false;
                    next.n_run += 1;
                    next.n_fail += 1;
                    next.fail_count += 1;
                }
                Ev::Stop { count: false } => {
                    // Disowned: the run ends without accounting
                    next.st = St::Idle;
                    next.owned = false;
                }
            }
            Some(next)
        }

        fn properties(&self) -> Vec<Property<Self>> {
            vec![
                Property::always("token_only_while_active", |_, s: &CheckModel| {
                    s.owned == matches!(s.st, St::Waiting | St::Running)
                }),
                Property::always("consecutive_within_total", |_, s: &CheckModel| {
                    s.fail_count <= s.n_fail && s.n_fail <= s.n_run
                }),
                Property::sometimes("reaches_failure", |_, s: &CheckModel| s.fail_count >= 2),
            ]
        }
    }

    #[test]
    fn check_state_machine_properties() {
        let checker = CheckMachine { max_runs: 4 }.checker().spawn_bfs().join();
        checker.assert_properties();
    }
}
