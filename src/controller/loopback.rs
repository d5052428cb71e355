/// In-memory telephony exchange
/// Routes originated calls back to subscribed destinations so the check
/// engine can run without a real controller (simulator backend, tests).
///
/// Routing: the trailing number of the dial string (after the last '/',
/// before any '@') is normalized through the dialplan and matched against
/// the registered link numbers. A matching, subscribed destination gets an
/// inbound channel paired with the outbound one; otherwise the call rings
/// (and optionally answers) on its own after `ring_delay`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, trace};

use super::{
    Bridge, Channel, ChannelState, Controller, ControllerError, ControllerResult, IfExists,
    Incoming, Media, OriginateRequest, Recording,
};
use crate::dialplan::{redact_number, Dialplan};
use crate::endpoint::Registry;

#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Delay before an unrouted outbound call reports ringing (and again
    /// before it auto-answers)
    pub ring_delay: Duration,
    /// Answer unrouted outbound calls after ringing
    pub auto_answer: bool,
    /// How long playback of any media file takes
    pub media_duration: Duration,
    /// Deliver every DTMF digit twice, like a trunk with duplicate detection
    pub repeat_digits: bool,
    /// Present this caller number on inbound legs instead of the real one
    pub caller_id_override: Option<String>,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            ring_delay: Duration::from_millis(200),
            auto_answer: true,
            media_duration: Duration::from_millis(500),
            repeat_digits: false,
            caller_id_override: None,
        }
    }
}

/// Counters and media log, for assertions and the simulator's summary
#[derive(Debug, Clone, Default)]
pub struct LoopbackStats {
    pub originated: usize,
    pub delivered: usize,
    pub unrouted: usize,
    pub hangups: usize,
    pub bridges: usize,
    pub played: Vec<String>,
    pub recorded: Vec<String>,
}

struct Exchange {
    options: LoopbackOptions,
    dialplan: Dialplan,
    /// (destination name, normalized number)
    routes: Vec<(String, String)>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Arc<dyn Channel>>>>>,
    stats: Mutex<LoopbackStats>,
    next_id: AtomicU64,
}

impl Exchange {
    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, LoopbackStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn route(&self, dial: &str) -> Option<&str> {
        let number = self.dialplan.normalize(dialed_number(dial));
        self.routes
            .iter()
            .find(|(_, n)| *n == number)
            .map(|(dest, _)| dest.as_str())
    }

    /// Hand `chan` to the first live subscriber of `dest`
    fn deliver(&self, dest: &str, chan: Arc<dyn Channel>) -> bool {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let Some(list) = subs.get_mut(dest) else {
            return false;
        };
        list.retain(|tx| !tx.is_closed());
        for tx in list.iter() {
            if tx.send(chan.clone()).is_ok() {
                return true;
            }
        }
        false
    }
}

/// Extract the dialed number from a dial string such as `SIP/trunk/0301234`
/// or `PJSIP/0301234@trunk`.
pub fn dialed_number(dial: &str) -> &str {
    let tail = dial.rsplit('/').next().unwrap_or(dial);
    tail.split('@').next().unwrap_or(tail)
}

#[derive(Clone)]
pub struct Loopback {
    inner: Arc<Exchange>,
}

impl Loopback {
    pub fn new(dialplan: Dialplan, options: LoopbackOptions) -> Self {
        Self {
            inner: Arc::new(Exchange {
                options,
                dialplan,
                routes: Vec::new(),
                subscribers: Mutex::new(HashMap::new()),
                stats: Mutex::new(LoopbackStats::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Route every link that has a number back to itself
    pub fn from_registry(registry: &Registry, dialplan: Dialplan, options: LoopbackOptions) -> Self {
        let mut lb = Self::new(dialplan, options);
        for ep in registry.iter() {
            if let Some(number) = &ep.number {
                lb = lb.route(&ep.name, number);
            }
        }
        lb
    }

    /// Add a route; only valid before the exchange is shared
    pub fn route(mut self, destination: &str, number: &str) -> Self {
        let normalized = self.inner.dialplan.normalize(number);
        if let Some(ex) = Arc::get_mut(&mut self.inner) {
            ex.routes.push((destination.to_string(), normalized));
        }
        self
    }

    pub fn stats(&self) -> LoopbackStats {
        self.inner.stats().clone()
    }
}

#[async_trait]
impl Controller for Loopback {
    async fn originate(&self, request: OriginateRequest) -> ControllerResult<Arc<dyn Channel>> {
        let ex = &self.inner;
        let out = LoopChannel::new(ex, ex.next_id("out"), request.caller_id.clone());
        ex.stats().originated += 1;
        debug!(
            "Loopback originate {} via {} (app {}, args {:?})",
            out.id,
            redact_number(dialed_number(&request.endpoint)),
            request.app,
            request.app_args
        );

        let routed = match ex.route(&request.endpoint) {
            Some(dest) => {
                let caller = ex.options.caller_id_override.clone().or(request.caller_id);
                let inbound = LoopChannel::new(ex, ex.next_id("in"), caller);
                out.pair(&inbound);
                if ex.deliver(dest, inbound.clone()) {
                    ex.stats().delivered += 1;
                    trace!("Loopback delivered {} to {}", inbound.id, dest);
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if !routed {
            ex.stats().unrouted += 1;
            let weak = Arc::downgrade(&out);
            let delay = ex.options.ring_delay;
            let auto_answer = ex.options.auto_answer;
            tokio::spawn(async move {
                sleep(delay).await;
                let Some(chan) = weak.upgrade() else { return };
                chan.set_state(ChannelState::Ringing);
                drop(chan);
                if auto_answer {
                    sleep(delay).await;
                    if let Some(chan) = weak.upgrade() {
                        chan.set_state(ChannelState::Up);
                    }
                }
            });
        }

        Ok(out as Arc<dyn Channel>)
    }

    fn incoming(&self, destination: &str) -> ControllerResult<Incoming> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(destination.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn bridge(&self) -> ControllerResult<Arc<dyn Bridge>> {
        let ex = &self.inner;
        ex.stats().bridges += 1;
        Ok(Arc::new(LoopBridge {
            id: ex.next_id("bridge"),
            exchange: ex.clone(),
            channels: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }))
    }
}

struct LoopChannel {
    id: String,
    caller: Option<String>,
    exchange: Arc<Exchange>,
    state: watch::Sender<ChannelState>,
    dtmf_tx: mpsc::UnboundedSender<char>,
    dtmf_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<char>>,
    peer: Mutex<Weak<LoopChannel>>,
}

impl LoopChannel {
    fn new(exchange: &Arc<Exchange>, id: String, caller: Option<String>) -> Arc<Self> {
        let (dtmf_tx, dtmf_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ChannelState::Down);
        Arc::new(Self {
            id,
            caller,
            exchange: exchange.clone(),
            state,
            dtmf_tx,
            dtmf_rx: tokio::sync::Mutex::new(dtmf_rx),
            peer: Mutex::new(Weak::new()),
        })
    }

    fn pair(self: &Arc<Self>, other: &Arc<Self>) {
        *self.peer.lock().unwrap_or_else(|e| e.into_inner()) = Arc::downgrade(other);
        *other.peer.lock().unwrap_or_else(|e| e.into_inner()) = Arc::downgrade(self);
    }

    fn peer(&self) -> Option<Arc<LoopChannel>> {
        self.peer.lock().unwrap_or_else(|e| e.into_inner()).upgrade()
    }

    /// Move to `next` unless already gone
    fn set_state(&self, next: ChannelState) {
        self.state.send_if_modified(|cur| {
            if *cur == ChannelState::Gone || *cur == next {
                false
            } else {
                *cur = next;
                true
            }
        });
    }

    fn ensure_alive(&self) -> ControllerResult<()> {
        if *self.state.borrow() == ChannelState::Gone {
            Err(ControllerError::NotFound(self.id.clone()))
        } else {
            Ok(())
        }
    }

    async fn wait_gone(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == ChannelState::Gone).await;
    }
}

#[async_trait]
impl Media for LoopChannel {
    async fn play(&self, media: &str) -> ControllerResult<()> {
        self.ensure_alive()?;
        self.exchange.stats().played.push(format!("{}:{}", self.id, media));
        sleep(self.exchange.options.media_duration).await;
        self.ensure_alive()
    }

    async fn record(
        &self,
        name: &str,
        format: &str,
        if_exists: IfExists,
    ) -> ControllerResult<Box<dyn Recording>> {
        self.ensure_alive()?;
        trace!("Recording {} as {}.{} ({})", self.id, name, format, if_exists.as_str());
        Ok(Box::new(LoopRecording {
            name: name.to_string(),
            exchange: self.exchange.clone(),
            stopped: AtomicBool::new(false),
        }))
    }

    async fn next_dtmf(&self) -> ControllerResult<char> {
        let mut rx = self.dtmf_rx.lock().await;
        tokio::select! {
            biased;
            digit = rx.recv() => digit.ok_or(ControllerError::Closed),
            _ = self.wait_gone() => Err(ControllerError::NotFound(self.id.clone())),
        }
    }
}

#[async_trait]
impl Channel for LoopChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn caller_number(&self) -> Option<String> {
        self.caller.clone()
    }

    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    async fn wait_state(&self, states: &[ChannelState]) -> ControllerResult<ChannelState> {
        let mut rx = self.state.subscribe();
        let reached = *rx
            .wait_for(|s| states.contains(s) || *s == ChannelState::Gone)
            .await
            .map_err(|_| ControllerError::Closed)?;
        if reached == ChannelState::Gone && !states.contains(&ChannelState::Gone) {
            return Err(ControllerError::NotFound(self.id.clone()));
        }
        Ok(reached)
    }

    async fn ring(&self) -> ControllerResult<()> {
        self.ensure_alive()?;
        self.set_state(ChannelState::Ringing);
        if let Some(peer) = self.peer() {
            peer.set_state(ChannelState::Ringing);
        }
        Ok(())
    }

    async fn answer(&self) -> ControllerResult<()> {
        self.ensure_alive()?;
        self.set_state(ChannelState::Up);
        if let Some(peer) = self.peer() {
            peer.set_state(ChannelState::Up);
        }
        Ok(())
    }

    async fn hangup(&self) -> ControllerResult<()> {
        self.ensure_alive()?;
        self.set_state(ChannelState::Gone);
        self.exchange.stats().hangups += 1;
        if let Some(peer) = self.peer() {
            peer.set_state(ChannelState::Gone);
        }
        Ok(())
    }

    async fn send_dtmf(&self, digits: &str, between: Duration) -> ControllerResult<()> {
        let repeat = if self.exchange.options.repeat_digits { 2 } else { 1 };
        for (i, digit) in digits.chars().enumerate() {
            self.ensure_alive()?;
            if i > 0 {
                sleep(between).await;
            }
            let peer = self
                .peer()
                .ok_or_else(|| ControllerError::Failed(format!("{} has no peer", self.id)))?;
            for _ in 0..repeat {
                let _ = peer.dtmf_tx.send(digit);
            }
        }
        Ok(())
    }
}

struct LoopBridge {
    id: String,
    exchange: Arc<Exchange>,
    channels: Mutex<Vec<Arc<dyn Channel>>>,
    destroyed: AtomicBool,
}

impl LoopBridge {
    fn ensure_alive(&self) -> ControllerResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            Err(ControllerError::NotFound(self.id.clone()))
        } else {
            Ok(())
        }
    }

    fn first_channel(&self) -> ControllerResult<Arc<dyn Channel>> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .first()
            .cloned()
            .ok_or_else(|| ControllerError::Failed(format!("{} is empty", self.id)))
    }
}

#[async_trait]
impl Media for LoopBridge {
    async fn play(&self, media: &str) -> ControllerResult<()> {
        self.ensure_alive()?;
        self.exchange.stats().played.push(format!("{}:{}", self.id, media));
        sleep(self.exchange.options.media_duration).await;
        self.ensure_alive()
    }

    async fn record(
        &self,
        name: &str,
        format: &str,
        if_exists: IfExists,
    ) -> ControllerResult<Box<dyn Recording>> {
        self.ensure_alive()?;
        trace!("Recording {} as {}.{} ({})", self.id, name, format, if_exists.as_str());
        Ok(Box::new(LoopRecording {
            name: name.to_string(),
            exchange: self.exchange.clone(),
            stopped: AtomicBool::new(false),
        }))
    }

    async fn next_dtmf(&self) -> ControllerResult<char> {
        self.ensure_alive()?;
        self.first_channel()?.next_dtmf().await
    }
}

#[async_trait]
impl Bridge for LoopBridge {
    fn id(&self) -> &str {
        &self.id
    }

    async fn add(&self, channel: Arc<dyn Channel>) -> ControllerResult<()> {
        self.ensure_alive()?;
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(channel);
        Ok(())
    }

    async fn destroy(&self) -> ControllerResult<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Err(ControllerError::NotFound(self.id.clone()));
        }
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}

struct LoopRecording {
    name: String,
    exchange: Arc<Exchange>,
    stopped: AtomicBool,
}

#[async_trait]
impl Recording for LoopRecording {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stop(&self) -> ControllerResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(ControllerError::NotFound(self.name.clone()));
        }
        self.exchange.stats().recorded.push(self.name.clone());
        Ok(())
    }
}
