//! Guidance loop: the task wiring around the navigator and the arbiter.
//!
//! ```text
//!  gps thread ──sentences──▶ navigation task ─┐
//!                                             │
//!  depth thread ──alerts, retractions─────────┼──▶ inbox ──▶ scheduler task ──▶ SpeechOutput
//!                                             │                   ▲                  │
//!  depth supervisor (watchdog) ───────────────┘                   └── SpeechFinished ┘
//! ```
//!
//! - The two producers run on their own OS threads because sentence
//!   sources and cameras block.
//! - The navigation task owns the [`PositionTracker`] and the
//!   [`Navigator`]; nothing else touches fixes or the route.
//! - The scheduler task owns the [`AlertScheduler`] and is the only writer
//!   of the voice channel.
//! - Every stage publishes what it did on the [`EventBus`] for observers.
//!
//! [`spawn_guidance`] starts everything and returns a [`GuidanceHandle`]
//! for route commands and shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use waysense_hal::{DepthCamera, SentenceSource};
use waysense_kernel::{AlertScheduler, FeedTransition, Watchdog};
use waysense_middleware::{
    Admission, EventBus, InboxReceiver, InboxSender, RoutePlanner, SpeechOutcome, SpeechOutput,
    Topic, inbox,
};
use waysense_perception::{ObstacleProcessor, PositionTracker};
use waysense_types::{
    Alert, AlertKind, DepthFrame, Event, EventPayload, GpsFix, Millis, NavError, NavigationState,
    RoutePlan, SchedulerInput, Sector, VoiceRequest, WayError, Waypoint,
};

use crate::clock::MonotonicClock;
use crate::config::GuidanceConfig;
use crate::instruction;
use crate::navigator::{Navigator, NavigatorOutput, RerouteRequest};

const DEPTH_FEED: &str = "depth";
const GPS_LINE_BUFFER: usize = 64;
const COMMAND_BUFFER: usize = 16;

// ────────────────────────────────────────────────────────────────────────────
// Public surface
// ────────────────────────────────────────────────────────────────────────────

/// Inputs and collaborators of one guidance session.
pub struct GuidanceParts {
    pub gps: Box<dyn SentenceSource>,
    /// `None` runs without obstacle detection.
    pub depth: Option<Box<dyn DepthCamera>>,
    pub speech: Arc<dyn SpeechOutput>,
    pub planner: Arc<dyn RoutePlanner>,
    pub bus: EventBus,
    /// Loaded before the first sentence is read.
    pub initial_route: Option<Vec<Waypoint>>,
}

/// Snapshot answered by [`GuidanceHandle::status`].
#[derive(Debug, Clone, PartialEq)]
pub struct GuidanceStatus {
    pub state: NavigationState,
    pub fix: Option<GpsFix>,
    pub target: Option<Waypoint>,
    /// Waypoints not yet reached, the current target included.
    pub waypoints_left: usize,
    pub epoch: u32,
}

enum NavCommand {
    LoadRoute {
        waypoints: Vec<Waypoint>,
        /// Re-route answers apply only to the route they were asked for.
        expected_epoch: Option<u32>,
        reply: Option<oneshot::Sender<Result<(), WayError>>>,
    },
    Cancel(oneshot::Sender<Result<(), WayError>>),
    Status(oneshot::Sender<GuidanceStatus>),
}

/// Control handle for a running guidance session.
///
/// Dropping the handle stops the async tasks; [`shutdown`](Self::shutdown)
/// additionally waits for them.
pub struct GuidanceHandle {
    commands: mpsc::Sender<NavCommand>,
    shutdown: watch::Sender<bool>,
    running: Arc<AtomicBool>,
    inbox: InboxSender<SchedulerInput>,
    bus: EventBus,
    tasks: Vec<JoinHandle<()>>,
}

impl GuidanceHandle {
    /// Replace the active route.
    ///
    /// # Errors
    ///
    /// [`WayError::Navigation`] for an empty route, [`WayError::Channel`]
    /// once the session has stopped.
    pub async fn load_route(&self, waypoints: Vec<Waypoint>) -> Result<(), WayError> {
        let (reply, rx) = oneshot::channel();
        self.send(NavCommand::LoadRoute {
            waypoints,
            expected_epoch: None,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| stopped())?
    }

    /// Abandon the active route.
    pub async fn cancel(&self) -> Result<(), WayError> {
        let (reply, rx) = oneshot::channel();
        self.send(NavCommand::Cancel(reply)).await?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn status(&self) -> Result<GuidanceStatus, WayError> {
        let (reply, rx) = oneshot::channel();
        self.send(NavCommand::Status(reply)).await?;
        rx.await.map_err(|_| stopped())
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Stop every task and wait for the async ones to finish.  Producer
    /// threads exit after their next read.
    pub async fn shutdown(self) {
        let GuidanceHandle {
            shutdown,
            running,
            inbox,
            tasks,
            ..
        } = self;
        running.store(false, Ordering::Release);
        shutdown.send_replace(true);
        inbox.close();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "guidance task ended abnormally");
            }
        }
        info!("guidance stopped");
    }

    async fn send(&self, command: NavCommand) -> Result<(), WayError> {
        self.commands.send(command).await.map_err(|_| stopped())
    }
}

fn stopped() -> WayError {
    WayError::Channel("guidance session stopped".into())
}

/// Validate `config`, start the producer threads and the guidance tasks.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// [`WayError::Config`] for an invalid configuration,
/// [`WayError::Navigation`] for an empty initial route and
/// [`WayError::Device`] if a producer thread cannot be started.
pub fn spawn_guidance(config: GuidanceConfig, parts: GuidanceParts) -> Result<GuidanceHandle, WayError> {
    config.validate()?;
    let initial_route = parts.initial_route.map(RoutePlan::new).transpose()?;

    let clock = MonotonicClock::start();
    let running = Arc::new(AtomicBool::new(true));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (inbox_tx, inbox_rx) = inbox::<SchedulerInput>(config.inbox_capacity);
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (line_tx, line_rx) = mpsc::channel(GPS_LINE_BUFFER);
    let tick = Duration::from_millis(config.tick_interval_ms);

    spawn_gps_reader(parts.gps, line_tx, Arc::clone(&running))?;

    let mut tasks = Vec::new();
    let with_depth = parts.depth.is_some();
    if let Some(camera) = parts.depth {
        let watchdog = Arc::new(Mutex::new(Watchdog::new()));
        lock(&watchdog).register(DEPTH_FEED, config.depth_timeout_ms, clock.now());
        DepthWorker {
            camera,
            processor: ObstacleProcessor::new(config.obstacle_thresholds()),
            inbox: inbox_tx.clone(),
            bus: parts.bus.clone(),
            watchdog: Arc::clone(&watchdog),
            clock,
            running: Arc::clone(&running),
            interval: Duration::from_millis(config.depth_frame_interval_ms),
            timeout_ms: config.depth_timeout_ms,
        }
        .spawn()?;
        tasks.push(tokio::spawn(supervise_depth(
            watchdog,
            inbox_tx.clone(),
            parts.bus.clone(),
            clock,
            tick,
            shutdown_rx.clone(),
        )));
    }

    let navigation = NavigationTask {
        navigator: Navigator::new(config.clone()),
        tracker: PositionTracker::new(config.min_heading_speed_mps),
        inbox: inbox_tx.clone(),
        bus: parts.bus.clone(),
        planner: parts.planner,
        commands: cmd_tx.clone(),
        clock,
    };
    tasks.push(tokio::spawn(navigation.run(
        initial_route,
        line_rx,
        cmd_rx,
        tick,
        shutdown_rx.clone(),
    )));

    let scheduler = SchedulerTask {
        scheduler: AlertScheduler::new(config.scheduler_config()),
        completions: inbox_tx.clone(),
        speech: parts.speech,
        bus: parts.bus.clone(),
        clock,
    };
    tasks.push(tokio::spawn(scheduler.run(inbox_rx, shutdown_rx)));

    info!(depth = with_depth, "guidance started");
    Ok(GuidanceHandle {
        commands: cmd_tx,
        shutdown: shutdown_tx,
        running,
        inbox: inbox_tx,
        bus: parts.bus,
        tasks,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Shared helpers
// ────────────────────────────────────────────────────────────────────────────

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Push into the inbox; backpressure losses are logged, never propagated.
fn offer(inbox: &InboxSender<SchedulerInput>, input: SchedulerInput) {
    match inbox.push(input) {
        Ok(Admission::Accepted) => {}
        Ok(Admission::Displaced(old)) => debug!(?old, "inbox full, displaced older input"),
        Ok(Admission::Rejected(new)) => debug!(?new, "inbox full, input dropped"),
        Err(e) => debug!(error = %e, "inbox closed"),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Producers
// ────────────────────────────────────────────────────────────────────────────

fn spawn_gps_reader(
    mut source: Box<dyn SentenceSource>,
    lines: mpsc::Sender<String>,
    running: Arc<AtomicBool>,
) -> Result<(), WayError> {
    let id = source.id().to_string();
    thread::Builder::new()
        .name("waysense-gps".into())
        .spawn(move || {
            debug!(source = %id, "positioning reader started");
            while running.load(Ordering::Acquire) {
                match source.next_sentence() {
                    Ok(Some(line)) => {
                        if lines.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!(source = %id, "positioning stream ended");
                        break;
                    }
                    Err(e) => {
                        warn!(source = %id, error = %e, "positioning source failed");
                        break;
                    }
                }
            }
        })
        .map(drop)
        .map_err(|e| WayError::Device {
            device: "gps reader".into(),
            details: e.to_string(),
        })
}

struct DepthWorker {
    camera: Box<dyn DepthCamera>,
    processor: ObstacleProcessor,
    inbox: InboxSender<SchedulerInput>,
    bus: EventBus,
    watchdog: Arc<Mutex<Watchdog>>,
    clock: MonotonicClock,
    running: Arc<AtomicBool>,
    interval: Duration,
    timeout_ms: Millis,
}

impl DepthWorker {
    fn spawn(self) -> Result<(), WayError> {
        thread::Builder::new()
            .name("waysense-depth".into())
            .spawn(move || self.run())
            .map(drop)
            .map_err(|e| WayError::Device {
                device: "depth reader".into(),
                details: e.to_string(),
            })
    }

    fn run(mut self) {
        debug!(camera = self.camera.id(), "depth reader started");
        let mut last_frame_at: Option<Millis> = None;
        let mut failing = false;
        while self.running.load(Ordering::Acquire) {
            let now = self.clock.now();
            match self.camera.capture(now) {
                Ok(Some(frame)) => {
                    failing = false;
                    if last_frame_at.is_some_and(|t| now.saturating_sub(t) > self.timeout_ms) {
                        let stale = self.processor.reset();
                        debug!(?stale, "depth feed resumed, sector state reset");
                    }
                    last_frame_at = Some(now);
                    lock(&self.watchdog).heartbeat(DEPTH_FEED, now);
                    self.handle_frame(&frame, now);
                }
                Ok(None) => {}
                Err(e) => {
                    if !failing {
                        warn!(camera = self.camera.id(), error = %e, "depth capture failed");
                        failing = true;
                    }
                }
            }
            thread::sleep(self.interval);
        }
        debug!("depth reader stopped");
    }

    fn handle_frame(&mut self, frame: &DepthFrame, now: Millis) {
        match self.processor.process(frame, now) {
            Ok(scan) => {
                for sector in scan.cleared {
                    offer(&self.inbox, SchedulerInput::RetractSector(sector));
                }
                for alert in scan.alerts {
                    offer(&self.inbox, SchedulerInput::Alert(alert));
                }
                self.bus.emit(
                    Topic::Obstacles,
                    Event::new("obstacle_processor", EventPayload::ObstacleScan(scan.readings.to_vec())),
                );
            }
            Err(e) => {
                debug!(error = %e, "depth frame skipped");
                for sector in self.processor.take_cleared() {
                    offer(&self.inbox, SchedulerInput::RetractSector(sector));
                }
            }
        }
    }
}

/// Announce each depth-feed outage once and its end once.
async fn supervise_depth(
    watchdog: Arc<Mutex<Watchdog>>,
    inbox: InboxSender<SchedulerInput>,
    bus: EventBus,
    clock: MonotonicClock,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                let now = clock.now();
                let transitions = lock(&watchdog).poll(now);
                for transition in transitions {
                    match transition {
                        FeedTransition::Lost(feed) => {
                            warn!(%feed, "sensor feed silent");
                            for sector in Sector::ALL {
                                offer(&inbox, SchedulerInput::RetractSector(sector));
                            }
                            offer(&inbox, SchedulerInput::Alert(Alert::obstacle(
                                AlertKind::Degraded,
                                None,
                                instruction::DEPTH_LOST,
                                now,
                                0,
                            )));
                            bus.emit(
                                Topic::SystemAlerts,
                                Event::new("watchdog", EventPayload::Degraded {
                                    component: feed,
                                    message: instruction::DEPTH_LOST.into(),
                                }),
                            );
                        }
                        FeedTransition::Restored(feed) => {
                            info!(%feed, "sensor feed restored");
                            offer(&inbox, SchedulerInput::Alert(Alert::obstacle(
                                AlertKind::Progress,
                                None,
                                instruction::DEPTH_RESTORED,
                                now,
                                0,
                            )));
                        }
                    }
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Navigation task
// ────────────────────────────────────────────────────────────────────────────

struct NavigationTask {
    navigator: Navigator,
    tracker: PositionTracker,
    inbox: InboxSender<SchedulerInput>,
    bus: EventBus,
    planner: Arc<dyn RoutePlanner>,
    /// Loops re-route answers back into this task.
    commands: mpsc::Sender<NavCommand>,
    clock: MonotonicClock,
}

impl NavigationTask {
    async fn run(
        mut self,
        initial_route: Option<RoutePlan>,
        mut lines: mpsc::Receiver<String>,
        mut commands: mpsc::Receiver<NavCommand>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if let Some(plan) = initial_route {
            let now = self.clock.now();
            let result = self.navigator.load_route(plan, now);
            self.settle(result);
        }

        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut gps_open = true;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(command) = commands.recv() => self.on_command(command),
                line = lines.recv(), if gps_open => match line {
                    Some(line) => self.on_sentence(&line),
                    None => {
                        gps_open = false;
                        debug!("positioning channel closed");
                    }
                },
                _ = tick.tick() => {
                    let out = self.navigator.on_tick(self.clock.now());
                    self.apply(out);
                }
            }
        }
        debug!("navigation task stopped");
    }

    fn on_sentence(&mut self, line: &str) {
        let now = self.clock.now();
        match self.tracker.ingest(line, now) {
            Ok(Some(fix)) => {
                self.bus
                    .emit(Topic::Positioning, Event::new("position_tracker", EventPayload::Fix(fix)));
                let result = self.navigator.on_fix(fix, now);
                self.settle(result);
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, sentence = line, "sentence discarded"),
        }
    }

    fn on_command(&mut self, command: NavCommand) {
        let now = self.clock.now();
        match command {
            NavCommand::LoadRoute {
                waypoints,
                expected_epoch,
                reply,
            } => {
                if expected_epoch.is_some_and(|e| e != self.navigator.epoch()) {
                    debug!("discarding re-route for a replaced route");
                    return;
                }
                let result = RoutePlan::new(waypoints)
                    .and_then(|plan| self.navigator.load_route(plan, now))
                    .map(|out| self.apply(out))
                    .map_err(WayError::from);
                if let Err(e) = &result {
                    warn!(error = %e, "route rejected");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            NavCommand::Cancel(reply) => {
                let result = self
                    .navigator
                    .cancel(now)
                    .map(|out| self.apply(out))
                    .map_err(WayError::from);
                let _ = reply.send(result);
            }
            NavCommand::Status(reply) => {
                let route = self.navigator.route();
                let status = GuidanceStatus {
                    state: self.navigator.state().clone(),
                    fix: self.navigator.last_fix().copied(),
                    target: route.map(|r| r.current_target().clone()),
                    waypoints_left: route.map_or(0, |r| r.len() - r.current_index()),
                    epoch: self.navigator.epoch(),
                };
                let _ = reply.send(status);
            }
        }
    }

    fn settle(&mut self, result: Result<NavigatorOutput, NavError>) {
        match result {
            Ok(out) => self.apply(out),
            Err(e) => warn!(error = %e, "navigation step rejected"),
        }
    }

    /// Forward one navigator step to the arbiter and the bus.
    fn apply(&mut self, out: NavigatorOutput) {
        if out.is_empty() {
            return;
        }
        if let Some(epoch) = out.flush_epoch {
            offer(&self.inbox, SchedulerInput::FlushNavigation { epoch });
        }
        for transition in &out.transitions {
            self.bus.emit(
                Topic::Navigation,
                Event::new("navigator", EventPayload::PhaseChanged(*transition)),
            );
        }
        for alert in out.alerts {
            if alert.kind == AlertKind::Degraded {
                self.bus.emit(
                    Topic::SystemAlerts,
                    Event::new("navigator", EventPayload::Degraded {
                        component: "positioning".into(),
                        message: alert.message.clone(),
                    }),
                );
            }
            offer(&self.inbox, SchedulerInput::Alert(alert));
        }
        if let Some(request) = out.reroute {
            self.request_reroute(request);
        }
        self.bus.emit(
            Topic::Navigation,
            Event::new("navigator", EventPayload::Navigation(self.navigator.state().clone())),
        );
    }

    fn request_reroute(&self, request: RerouteRequest) {
        self.bus.emit(
            Topic::Navigation,
            Event::new("navigator", EventPayload::RerouteRequested {
                from: request.from,
                target: request.target.clone(),
            }),
        );
        let planner = Arc::clone(&self.planner);
        let commands = self.commands.clone();
        let epoch = self.navigator.epoch();
        tokio::spawn(async move {
            match planner.request_reroute(request.from, &request.target).await {
                Ok(Some(waypoints)) => {
                    let command = NavCommand::LoadRoute {
                        waypoints,
                        expected_epoch: Some(epoch),
                        reply: None,
                    };
                    if commands.send(command).await.is_err() {
                        debug!("re-route arrived after shutdown");
                    }
                }
                Ok(None) => info!("planner offered no new route"),
                Err(e) => warn!(error = %e, "re-route request failed"),
            }
        });
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scheduler task
// ────────────────────────────────────────────────────────────────────────────

struct SchedulerTask {
    scheduler: AlertScheduler,
    completions: InboxSender<SchedulerInput>,
    speech: Arc<dyn SpeechOutput>,
    bus: EventBus,
    clock: MonotonicClock,
}

impl SchedulerTask {
    async fn run(
        mut self,
        mut inputs: InboxReceiver<SchedulerInput>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let deadline = self.scheduler.next_deadline();
            tokio::select! {
                _ = shutdown.changed() => break,
                input = inputs.recv() => match input {
                    Some(input) => {
                        let requests = self.scheduler.handle(input, self.clock.now());
                        self.dispatch(requests);
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(self.clock.instant_at(deadline.unwrap_or_default())),
                    if deadline.is_some() =>
                {
                    let requests = self.scheduler.poll(self.clock.now());
                    self.dispatch(requests);
                }
            }
        }
        debug!("scheduler task stopped");
    }

    fn dispatch(&self, requests: Vec<VoiceRequest>) {
        for request in requests {
            info!(
                id = request.id,
                priority = request.priority,
                interrupt = request.interrupt,
                text = %request.text,
                "voice request"
            );
            self.bus.emit(
                Topic::Speech,
                Event::new("alert_scheduler", EventPayload::Spoken(request.clone())),
            );
            let speech = Arc::clone(&self.speech);
            let completions = self.completions.clone();
            tokio::spawn(async move {
                let request_id = request.id;
                let interrupted = match speech.speak(request).await {
                    Ok(outcome) => outcome == SpeechOutcome::Interrupted,
                    Err(e) => {
                        warn!(request_id, error = %e, "speech output failed");
                        false
                    }
                };
                offer(&completions, SchedulerInput::SpeechFinished {
                    request_id,
                    interrupted,
                });
            });
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use waysense_hal::{LineSentenceSource, SimDepthCamera, SimGps};
    use waysense_perception::geodesic;
    use waysense_types::{Coordinate, NavPhase};

    // ── Test doubles ──

    #[derive(Default, Clone)]
    struct RecordingSpeech {
        spoken: Arc<Mutex<Vec<VoiceRequest>>>,
    }

    impl RecordingSpeech {
        fn texts(&self) -> Vec<String> {
            lock(&self.spoken).iter().map(|r| r.text.clone()).collect()
        }
    }

    #[async_trait]
    impl SpeechOutput for RecordingSpeech {
        async fn speak(&self, request: VoiceRequest) -> Result<SpeechOutcome, WayError> {
            lock(&self.spoken).push(request);
            Ok(SpeechOutcome::Completed)
        }
    }

    /// Records every request, then holds it until the gate opens.
    #[derive(Clone)]
    struct GatedSpeech {
        record: RecordingSpeech,
        gate: Arc<tokio::sync::Semaphore>,
    }

    impl GatedSpeech {
        fn closed() -> Self {
            Self {
                record: RecordingSpeech::default(),
                gate: Arc::new(tokio::sync::Semaphore::new(0)),
            }
        }

        fn open(&self) {
            self.gate.add_permits(1_000);
        }
    }

    #[async_trait]
    impl SpeechOutput for GatedSpeech {
        async fn speak(&self, request: VoiceRequest) -> Result<SpeechOutcome, WayError> {
            lock(&self.record.spoken).push(request);
            let _permit = self.gate.acquire().await;
            Ok(SpeechOutcome::Completed)
        }
    }

    #[derive(Default)]
    struct FixedPlanner {
        route: Option<Vec<Waypoint>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RoutePlanner for FixedPlanner {
        async fn request_reroute(
            &self,
            _from: Coordinate,
            _target: &Waypoint,
        ) -> Result<Option<Vec<Waypoint>>, WayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.route.clone())
        }
    }

    /// A camera that never produces a frame.
    struct DeadCamera;

    impl DepthCamera for DeadCamera {
        fn id(&self) -> &str {
            "dead"
        }

        fn capture(&mut self, _now: Millis) -> Result<Option<DepthFrame>, WayError> {
            Ok(None)
        }
    }

    fn no_gps() -> Box<dyn SentenceSource> {
        Box::new(LineSentenceSource::new("empty", Cursor::new(Vec::new())))
    }

    fn fast_config() -> GuidanceConfig {
        GuidanceConfig {
            tick_interval_ms: 10,
            depth_frame_interval_ms: 10,
            speech_lead_in_ms: 0,
            speech_words_per_minute: 60_000,
            ..GuidanceConfig::default()
        }
    }

    fn origin() -> Coordinate {
        Coordinate::new(51.5007, -0.1246)
    }

    fn waypoint_at(c: Coordinate, label: &str) -> Waypoint {
        Waypoint::new(c.latitude, c.longitude).with_label(label)
    }

    fn session(
        gps: Box<dyn SentenceSource>,
        depth: Option<Box<dyn DepthCamera>>,
        speech: &RecordingSpeech,
        planner: Arc<dyn RoutePlanner>,
        route: Option<Vec<Waypoint>>,
    ) -> GuidanceParts {
        GuidanceParts {
            gps,
            depth,
            speech: Arc::new(speech.clone()),
            planner,
            bus: EventBus::default(),
            initial_route: route,
        }
    }

    async fn wait_for_speech(speech: &RecordingSpeech, needle: &str) {
        let found = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if speech.texts().iter().any(|t| t.contains(needle)) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(found.is_ok(), "never heard {needle:?}; heard {:?}", speech.texts());
    }

    // ── Tests ──

    #[tokio::test]
    async fn simulated_walk_reaches_the_destination() {
        let target = geodesic::destination(origin(), 0.0, 40.0);
        let gps = SimGps::walk(vec![origin(), target], 5.0, 1_000).with_max_steps(12);
        let speech = RecordingSpeech::default();
        let parts = session(
            Box::new(gps),
            None,
            &speech,
            Arc::new(FixedPlanner::default()),
            Some(vec![waypoint_at(target, "the fountain")]),
        );
        let mut phases = parts.bus.subscribe_to(Topic::Navigation);
        let handle = spawn_guidance(fast_config(), parts).unwrap();

        let mut seen = Vec::new();
        let reached_idle = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = phases.next().await {
                if let EventPayload::PhaseChanged(t) = event.payload {
                    seen.push(t.to);
                    if t.to == NavPhase::Idle {
                        return;
                    }
                }
            }
        })
        .await;
        assert!(reached_idle.is_ok(), "phases seen: {seen:?}");
        assert_eq!(
            seen,
            vec![NavPhase::Navigating, NavPhase::Approaching, NavPhase::Arrived, NavPhase::Idle]
        );

        wait_for_speech(&speech, instruction::DESTINATION_REACHED).await;
        let status = handle.status().await.unwrap();
        assert_eq!(status.state.phase, NavPhase::Idle);
        assert!(status.fix.is_some());
        assert_eq!(status.waypoints_left, 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn danger_obstacle_is_spoken_without_positioning() {
        let camera = SimDepthCamera::new(6, 2).with_script(vec![[0.3, 3.0, 3.0]]);
        let speech = RecordingSpeech::default();
        let parts = session(
            no_gps(),
            Some(Box::new(camera)),
            &speech,
            Arc::new(FixedPlanner::default()),
            None,
        );
        let mut scans = parts.bus.subscribe_to(Topic::Obstacles);
        let handle = spawn_guidance(fast_config(), parts).unwrap();

        wait_for_speech(&speech, "Stop, obstacle very close on your left").await;
        let event = tokio::time::timeout(Duration::from_secs(5), scans.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event.payload, EventPayload::ObstacleScan(ref r) if r.len() == 3));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn silent_positioning_enters_degraded_mode() {
        let speech = RecordingSpeech::default();
        let target = geodesic::destination(origin(), 90.0, 200.0);
        let parts = session(
            no_gps(),
            None,
            &speech,
            Arc::new(FixedPlanner::default()),
            Some(vec![waypoint_at(target, "the station")]),
        );
        let mut system = parts.bus.subscribe_to(Topic::SystemAlerts);
        let config = GuidanceConfig {
            fix_stale_ms: 50,
            ..fast_config()
        };
        let handle = spawn_guidance(config, parts).unwrap();

        wait_for_speech(&speech, "Starting navigation to the station. Waiting for GPS signal").await;
        wait_for_speech(&speech, instruction::GPS_LOST).await;
        let event = tokio::time::timeout(Duration::from_secs(5), system.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event.payload, EventPayload::Degraded { ref component, .. } if component == "positioning"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let lost = speech.texts().iter().filter(|t| *t == instruction::GPS_LOST).count();
        assert_eq!(lost, 1, "degraded mode is announced once");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn silent_depth_feed_is_announced_once() {
        let speech = RecordingSpeech::default();
        let parts = session(
            no_gps(),
            Some(Box::new(DeadCamera)),
            &speech,
            Arc::new(FixedPlanner::default()),
            None,
        );
        let config = GuidanceConfig {
            depth_timeout_ms: 50,
            ..fast_config()
        };
        let handle = spawn_guidance(config, parts).unwrap();

        wait_for_speech(&speech, instruction::DEPTH_LOST).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let lost = speech.texts().iter().filter(|t| *t == instruction::DEPTH_LOST).count();
        assert_eq!(lost, 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn route_commands_drive_the_phase() {
        let speech = RecordingSpeech::default();
        let parts = session(no_gps(), None, &speech, Arc::new(FixedPlanner::default()), None);
        let handle = spawn_guidance(fast_config(), parts).unwrap();

        assert_eq!(handle.status().await.unwrap().state.phase, NavPhase::Idle);
        let target = geodesic::destination(origin(), 0.0, 100.0);
        handle
            .load_route(vec![waypoint_at(target, "the gate"), waypoint_at(origin(), "home")])
            .await
            .unwrap();
        let status = handle.status().await.unwrap();
        assert_eq!(status.state.phase, NavPhase::Navigating);
        assert_eq!(status.waypoints_left, 2);
        assert_eq!(status.epoch, 1);
        assert_eq!(status.target.unwrap().label.as_deref(), Some("the gate"));

        let err = handle.load_route(Vec::new()).await.unwrap_err();
        assert!(matches!(err, WayError::Navigation(_)));

        handle.cancel().await.unwrap();
        assert_eq!(handle.status().await.unwrap().state.phase, NavPhase::Idle);
        wait_for_speech(&speech, instruction::NAVIGATION_CANCELLED).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn persistent_deviation_asks_the_planner_once() {
        let start = origin();
        let target = geodesic::destination(start, 0.0, 500.0);
        // Walk due east, away from a route that heads north.
        let east = geodesic::destination(start, 90.0, 2_000.0);
        let gps = SimGps::walk(vec![start, east], 500.0, 20).realtime().with_max_steps(40);
        let planner = Arc::new(FixedPlanner {
            route: Some(vec![waypoint_at(east, "the bridge")]),
            calls: AtomicUsize::new(0),
        });
        let speech = RecordingSpeech::default();
        let parts = session(
            Box::new(gps),
            None,
            &speech,
            planner.clone(),
            Some(vec![waypoint_at(target, "the park")]),
        );
        let mut nav_events = parts.bus.subscribe_to(Topic::Navigation);
        let config = GuidanceConfig {
            off_route_grace_ms: 50,
            ..fast_config()
        };
        let handle = spawn_guidance(config, parts).unwrap();

        wait_for_speech(&speech, "Starting navigation to the bridge").await;
        assert_eq!(planner.calls.load(Ordering::SeqCst), 1);

        let mut reroutes = 0;
        while let Ok(event) = nav_events.try_recv() {
            if matches!(event.payload, EventPayload::RerouteRequested { .. }) {
                reroutes += 1;
            }
        }
        assert_eq!(reroutes, 1);
        assert_eq!(handle.status().await.unwrap().epoch, 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn route_reload_drops_queued_navigation_but_keeps_obstacles() {
        let speech = GatedSpeech::closed();
        let parts = GuidanceParts {
            gps: no_gps(),
            depth: None,
            speech: Arc::new(speech.clone()),
            planner: Arc::new(FixedPlanner::default()),
            bus: EventBus::default(),
            initial_route: None,
        };
        // Occupancy windows outlast the test; only completions free the channel.
        let config = GuidanceConfig {
            speech_lead_in_ms: 60_000,
            ..fast_config()
        };
        let handle = spawn_guidance(config, parts).unwrap();

        offer(&handle.inbox, SchedulerInput::Alert(Alert::obstacle(
            AlertKind::ObstacleDanger,
            Some(Sector::Center),
            "Stop, obstacle very close ahead",
            0,
            0,
        )));
        wait_for_speech(&speech.record, "Stop, obstacle very close ahead").await;

        // Queued behind the danger alert: route 1's start and a turn, plus a caution.
        handle
            .load_route(vec![waypoint_at(geodesic::destination(origin(), 0.0, 300.0), "the gate")])
            .await
            .unwrap();
        offer(&handle.inbox, SchedulerInput::Alert(Alert::navigation(
            AlertKind::Turn,
            "Turn left at the old corner",
            1,
            0,
        )));
        offer(&handle.inbox, SchedulerInput::Alert(Alert::obstacle(
            AlertKind::ObstacleCaution,
            Some(Sector::Left),
            "Obstacle on your left at 90 centimeters",
            0,
            0,
        )));
        handle
            .load_route(vec![waypoint_at(geodesic::destination(origin(), 180.0, 300.0), "the park")])
            .await
            .unwrap();

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.inbox.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(drained.is_ok(), "scheduler never drained its inbox");
        assert_eq!(speech.record.texts().len(), 1, "danger still holds the channel");

        speech.open();
        wait_for_speech(&speech.record, "Starting navigation to the park").await;
        let heard = speech.record.texts();
        assert!(heard.iter().any(|t| t == "Obstacle on your left at 90 centimeters"), "{heard:?}");
        assert!(!heard.iter().any(|t| t.contains("the gate")), "{heard:?}");
        assert!(!heard.iter().any(|t| t.contains("old corner")), "{heard:?}");
        handle.shutdown().await;
    }
}
