//! Async driver for one streaming session
//!
//! Reads inbound frames, feeds the session state, runs windows on the
//! blocking pool and sends events back in window order. Only a lost
//! transport ends a session early; every other fault is reported and the
//! session carries on.

use crate::config::ServerConfig;
use async_trait::async_trait;
use futures::stream::{FuturesOrdered, Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{self, Instant};
use tunematch_core::{
    audio::AudioWindow, EngineConfig, EngineError, Extractor, FingerprintIndex, IndexHandle,
    MatchAggregator, MatchResult, ResultPublisher, ServerEvent, SessionLimits, SessionPhase,
    SessionState, SessionStats,
};

/// One message from the client transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// s16le mono PCM
    Audio(Vec<u8>),
    Text(String),
    Close,
    Disconnected(String),
}

/// Destination for outbound events
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: ServerEvent) -> anyhow::Result<()>;
}

#[async_trait]
impl EventSink for tokio::sync::mpsc::UnboundedSender<ServerEvent> {
    async fn send(&mut self, event: ServerEvent) -> anyhow::Result<()> {
        tokio::sync::mpsc::UnboundedSender::send(self, event)
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))
    }
}

/// Per-session knobs derived from [`ServerConfig`]
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub engine: EngineConfig,
    pub limits: SessionLimits,
    pub max_in_flight_windows: usize,
    pub receive_timeout: Duration,
    pub grace_period: Duration,
    pub status_interval: Duration,
    pub outbound_queue: usize,
}

impl SessionSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            engine: config.engine.clone(),
            limits: config.session_limits(),
            max_in_flight_windows: config.max_in_flight_windows.max(1),
            receive_timeout: config.receive_timeout(),
            grace_period: config.grace_period(),
            status_interval: config.status_interval(),
            outbound_queue: config.outbound_queue.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ClientClosed,
    IdleTimeout,
    TransportLost,
    /// The client stopped reading and its event queue filled up
    SlowClient,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: u64,
    pub end: SessionEnd,
    pub stats: SessionStats,
    pub matches_published: u64,
    /// Windows abandoned when the grace period ran out
    pub skipped_windows: usize,
}

/// Drive a session until the client closes, goes idle or disconnects
///
/// Events reach `sink` through a bounded queue drained alongside the
/// session loop, so a slow transport never holds up intake.
pub async fn run_session<S, K>(
    session_id: u64,
    inbound: S,
    sink: &mut K,
    index: Arc<IndexHandle>,
    settings: &SessionSettings,
) -> SessionSummary
where
    S: Stream<Item = Inbound> + Unpin + Send,
    K: EventSink,
{
    let (tx, rx) = mpsc::channel(settings.outbound_queue.max(1));
    let driver = drive_session(session_id, inbound, Outbox::new(tx), index, settings);
    let writer = forward_events(session_id, rx, sink);
    tokio::pin!(driver);
    tokio::pin!(writer);

    let mut writer_done = false;
    let summary = loop {
        tokio::select! {
            summary = &mut driver => break summary,
            _ = &mut writer, if !writer_done => writer_done = true,
        }
    };

    // The driver has dropped its sender; flush what is queued, within bounds
    if !writer_done && time::timeout(settings.grace_period, writer).await.is_err() {
        log::debug!(
            "Session {}: client not reading, discarding queued events",
            session_id
        );
    }
    summary
}

/// Write queued events to the transport until the queue closes or a write fails
async fn forward_events<K: EventSink>(
    session_id: u64,
    mut rx: mpsc::Receiver<ServerEvent>,
    sink: &mut K,
) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = sink.send(event).await {
            log::debug!("Session {}: event not delivered: {}", session_id, e);
            break;
        }
    }
}

/// Sending half of the event queue; never waits on the transport
struct Outbox {
    tx: mpsc::Sender<ServerEvent>,
    lost: Option<SessionEnd>,
}

impl Outbox {
    fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self { tx, lost: None }
    }

    fn is_open(&self) -> bool {
        self.lost.is_none()
    }

    /// Queue an event. Status events are dropped when the queue is full;
    /// a full queue for anything else means the client has stopped reading.
    fn deliver(&mut self, event: ServerEvent) {
        if self.lost.is_some() {
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(ServerEvent::Status { message, .. })) => {
                log::debug!("Event queue full, dropping status '{}'", message);
            }
            Err(TrySendError::Full(_)) => self.lost = Some(SessionEnd::SlowClient),
            Err(TrySendError::Closed(_)) => self.lost = Some(SessionEnd::TransportLost),
        }
    }
}

async fn drive_session<S>(
    session_id: u64,
    mut inbound: S,
    mut outbox: Outbox,
    index: Arc<IndexHandle>,
    settings: &SessionSettings,
) -> SessionSummary
where
    S: Stream<Item = Inbound> + Unpin + Send,
{
    let mut state = SessionState::new(session_id, &settings.engine, settings.limits);
    let mut publisher = ResultPublisher::new(session_id);
    let extractor = Arc::new(Extractor::new(&settings.engine));
    let aggregator = MatchAggregator::new(&settings.engine);

    let mut in_flight = FuturesOrdered::new();
    let mut status_tick = time::interval_at(
        Instant::now() + settings.status_interval,
        settings.status_interval,
    );
    let mut last_activity = Instant::now();
    let mut grace_deadline: Option<Instant> = None;
    let mut end = SessionEnd::ClientClosed;
    let mut skipped_windows = 0;

    state.start();
    log::info!("Session {} started", session_id);
    outbox.deliver(publisher.status("session started", &state.stats(), index.current_version()));

    while outbox.is_open() {
        while in_flight.len() < settings.max_in_flight_windows {
            let Some(window) = state.next_window() else {
                break;
            };
            in_flight.push_back(analyse_window(
                window,
                extractor.clone(),
                aggregator.clone(),
                index.snapshot(),
            ));
        }

        let closing = grace_deadline.is_some();
        if closing && in_flight.is_empty() {
            break;
        }
        let idle_deadline = last_activity + settings.receive_timeout;

        tokio::select! {
            biased;

            message = inbound.next(), if !closing => {
                last_activity = Instant::now();
                match message {
                    Some(Inbound::Audio(bytes)) => {
                        if let Err(e) = state.push_chunk(&bytes) {
                            outbox.deliver(publisher.input_error(&EngineError::from(e)));
                        }
                    }
                    Some(Inbound::Text(_)) => {
                        state.note_input_error();
                        outbox.deliver(ServerEvent::error("text frames are not accepted; send binary PCM"));
                    }
                    Some(Inbound::Close) => {
                        log::info!("Session {}: client closed", session_id);
                        state.close();
                        grace_deadline = Some(Instant::now() + settings.grace_period);
                    }
                    Some(Inbound::Disconnected(reason)) => {
                        log::warn!("Session {}: transport error: {}", session_id, reason);
                        end = SessionEnd::TransportLost;
                        break;
                    }
                    None => {
                        log::info!("Session {}: transport closed", session_id);
                        end = SessionEnd::TransportLost;
                        break;
                    }
                }
            }

            _ = time::sleep_until(idle_deadline), if !closing => {
                log::info!("Session {}: idle for {:?}, closing", session_id, settings.receive_timeout);
                end = SessionEnd::IdleTimeout;
                state.close();
                grace_deadline = Some(Instant::now() + settings.grace_period);
            }

            Some(outcome) = in_flight.next(), if !in_flight.is_empty() => {
                if let Some(event) = publisher.publish(outcome, &state.stats()) {
                    outbox.deliver(event);
                }
            }

            _ = status_tick.tick() => {
                outbox.deliver(publisher.status("streaming", &state.stats(), index.current_version()));
            }

            _ = time::sleep_until(grace_deadline.unwrap_or_else(Instant::now)), if closing => {
                skipped_windows = in_flight.len() + state.pending_windows();
                log::warn!(
                    "Session {}: grace period over, skipping {} windows",
                    session_id,
                    skipped_windows
                );
                break;
            }
        }
    }

    if let Some(lost) = outbox.lost {
        end = lost;
        if lost == SessionEnd::SlowClient {
            log::warn!("Session {}: client stopped reading events", session_id);
        }
    }
    if state.phase() != SessionPhase::Closed {
        state.close();
    }
    if end != SessionEnd::TransportLost {
        outbox.deliver(publisher.status("closed", &state.stats(), index.current_version()));
    }

    let stats = state.stats();
    log::info!(
        "Session {} ended ({:?}): {} windows, {} matches, {} dropped windows, {} dropped samples",
        session_id,
        end,
        stats.windows_cut,
        publisher.matches_published(),
        stats.dropped_windows,
        stats.dropped_samples
    );

    SessionSummary {
        session_id,
        end,
        stats,
        matches_published: publisher.matches_published(),
        skipped_windows,
    }
}

/// Start analysing a window on the blocking pool, bound to one snapshot
fn analyse_window(
    window: AudioWindow,
    extractor: Arc<Extractor>,
    aggregator: MatchAggregator,
    snapshot: Option<Arc<FingerprintIndex>>,
) -> impl Future<Output = Result<Vec<MatchResult>, EngineError>> {
    let window_index = window.index;
    let job = snapshot.map(|index| {
        spawn_window_job(window_index, move || {
            let hashes = extractor.extract(&window)?;
            Ok(aggregator.aggregate(&window, &hashes, &index))
        })
    });

    async move {
        match job {
            Some(job) => job.await,
            None => Err(EngineError::IndexUnavailable),
        }
    }
}

/// Run a window job; a panic is confined to that window
fn spawn_window_job<F>(
    window_index: u64,
    job: F,
) -> impl Future<Output = Result<Vec<MatchResult>, EngineError>>
where
    F: FnOnce() -> Result<Vec<MatchResult>, EngineError> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(job);
    async move {
        handle.await.unwrap_or_else(|e| {
            Err(EngineError::Internal {
                window_index,
                message: e.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::sync::mpsc;
    use tunematch_core::audio::encode_pcm_s16le;
    use tunematch_core::{synth, IndexBuilder, TrackInfo};

    fn settings() -> SessionSettings {
        let mut settings = SessionSettings::from_config(&ServerConfig::default());
        // Debug builds on a busy machine can be slow to finish the last window
        settings.grace_period = Duration::from_secs(30);
        settings
    }

    /// Index with track "A" (180 s) and one distractor
    fn fixture() -> (Arc<IndexHandle>, Vec<f32>) {
        let config = EngineConfig::default();
        let extractor = Extractor::new(&config);
        let track_a = synth::melody(1, 180.0, config.sample_rate);
        let other = synth::melody(2, 60.0, config.sample_rate);

        let mut builder = IndexBuilder::new(&config);
        for (track_id, title, samples) in [(1u32, "A", &track_a), (2, "B", &other)] {
            builder.add_track(
                TrackInfo {
                    track_id,
                    title: title.to_string(),
                    duration_ms: (samples.len() / 8) as u32,
                    source_path: String::new(),
                },
                &extractor.fingerprint_track(samples),
            );
        }
        (Arc::new(IndexHandle::with_index(builder.build(1))), track_a)
    }

    /// One-second PCM chunks of `samples[from_secs..to_secs]`
    fn chunks(samples: &[f32], from_secs: usize, to_secs: usize) -> Vec<Inbound> {
        (from_secs..to_secs)
            .map(|s| Inbound::Audio(encode_pcm_s16le(&samples[s * 8_000..(s + 1) * 8_000])))
            .collect()
    }

    async fn run(
        frames: Vec<Inbound>,
        index: Arc<IndexHandle>,
        settings: &SessionSettings,
    ) -> (SessionSummary, Vec<ServerEvent>) {
        let (mut tx, mut rx) = mpsc::unbounded_channel();
        let summary = run_session(7, stream::iter(frames), &mut tx, index, settings).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (summary, events)
    }

    fn matches(events: &[ServerEvent]) -> Vec<MatchResult> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::Match { data } => Some(data.matches.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn count_kind(events: &[ServerEvent], kind: &str) -> usize {
        events.iter().filter(|e| e.kind() == kind).count()
    }

    #[tokio::test]
    async fn test_streamed_excerpt_is_identified_after_third_chunk() {
        let (index, track_a) = fixture();
        let mut frames = chunks(&track_a, 30, 33);
        frames.push(Inbound::Close);

        let (summary, events) = run(frames, index, &settings()).await;

        assert_eq!(summary.end, SessionEnd::ClientClosed);
        assert_eq!(summary.stats.windows_cut, 1);
        assert_eq!(count_kind(&events, "match"), 1);
        assert_eq!(count_kind(&events, "error"), 0);

        let results = matches(&events);
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.title, "A");
        assert_eq!(result.window_index, 0);
        assert!(result.confidence >= 0.5, "confidence {}", result.confidence);
        assert!((29.0..31.0).contains(&result.start_time), "start {}", result.start_time);
        assert!((32.0..34.0).contains(&result.end_time), "end {}", result.end_time);

        match events.last() {
            Some(ServerEvent::Status { message, .. }) => assert_eq!(message, "closed"),
            other => panic!("expected closing status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_white_noise_and_silence_produce_no_matches() {
        let (index, _) = fixture();

        let noise = synth::white_noise(5, 5.0, 8_000);
        let mut frames = chunks(&noise, 0, 5);
        frames.push(Inbound::Close);
        let (_, events) = run(frames, index.clone(), &settings()).await;
        assert_eq!(count_kind(&events, "match"), 0);
        assert_eq!(count_kind(&events, "error"), 0);

        let silence = vec![0.0f32; 5 * 8_000];
        let mut frames = chunks(&silence, 0, 5);
        frames.push(Inbound::Close);
        let (summary, events) = run(frames, index, &settings()).await;
        assert_eq!(count_kind(&events, "match"), 0);
        assert_eq!(count_kind(&events, "error"), 0);
        assert_eq!(summary.stats.input_errors, 0);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_agree() {
        let (index, track_a) = fixture();
        let mut frames = chunks(&track_a, 60, 64);
        frames.push(Inbound::Close);

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let frames = frames.clone();
                let index = index.clone();
                tokio::spawn(async move { run(frames, index, &settings()).await })
            })
            .collect();

        let mut outcomes = Vec::new();
        for task in tasks {
            let (_, events) = task.await.unwrap();
            let key: Vec<_> = matches(&events)
                .iter()
                .map(|r| (r.window_index, r.track_id, r.confidence, r.start_time, r.end_time))
                .collect();
            outcomes.push(key);
        }
        assert!(!outcomes[0].is_empty());
        assert_eq!(outcomes[0], outcomes[1]);
    }

    #[tokio::test]
    async fn test_backlog_drops_oldest_windows_without_blocking_intake() {
        let (index, track_a) = fixture();
        let mut settings = settings();
        settings.max_in_flight_windows = 1;
        settings.limits.max_pending_windows = 2;

        let mut frames = chunks(&track_a, 30, 40);
        frames.push(Inbound::Close);
        let (summary, events) = run(frames, index, &settings).await;

        // Window 0 is in flight while windows 1..=7 are cut; only 6 and 7 stay queued
        assert_eq!(summary.stats.samples_received, 80_000);
        assert_eq!(summary.stats.windows_cut, 8);
        assert_eq!(summary.stats.dropped_windows, 5);
        let published: Vec<u64> = matches(&events).iter().map(|r| r.window_index).collect();
        assert!(published.iter().all(|i| [0, 6, 7].contains(i)), "{:?}", published);
    }

    #[tokio::test]
    async fn test_bad_chunks_are_reported_and_skipped() {
        let (index, track_a) = fixture();
        let mut frames = vec![
            Inbound::Audio(vec![1, 2, 3]),
            Inbound::Text("hello".to_string()),
        ];
        frames.extend(chunks(&track_a, 30, 33));
        frames.push(Inbound::Close);

        let (summary, events) = run(frames, index, &settings()).await;
        assert_eq!(summary.stats.input_errors, 2);
        assert_eq!(count_kind(&events, "error"), 2);
        assert_eq!(matches(&events).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_index_reports_status() {
        let (_, track_a) = fixture();
        let mut frames = chunks(&track_a, 30, 33);
        frames.push(Inbound::Close);

        let (_, events) = run(frames, Arc::new(IndexHandle::new()), &settings()).await;
        assert_eq!(count_kind(&events, "match"), 0);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::Status { message, index_version: None, .. } if message.contains("unavailable")
        )));
    }

    #[tokio::test]
    async fn test_idle_session_times_out() {
        let mut settings = settings();
        settings.receive_timeout = Duration::from_millis(50);
        let (mut tx, _rx) = mpsc::unbounded_channel();

        let summary = run_session(
            1,
            stream::pending::<Inbound>(),
            &mut tx,
            Arc::new(IndexHandle::new()),
            &settings,
        )
        .await;
        assert_eq!(summary.end, SessionEnd::IdleTimeout);
    }

    #[tokio::test]
    async fn test_status_ticks_do_not_extend_idle_timeout() {
        let mut settings = settings();
        settings.receive_timeout = Duration::from_millis(600);
        settings.status_interval = Duration::from_millis(200);
        let (mut tx, mut rx) = mpsc::unbounded_channel();

        let started = Instant::now();
        let summary = time::timeout(
            Duration::from_secs(5),
            run_session(
                1,
                stream::pending::<Inbound>(),
                &mut tx,
                Arc::new(IndexHandle::new()),
                &settings,
            ),
        )
        .await
        .expect("idle session kept running");
        assert_eq!(summary.end, SessionEnd::IdleTimeout);
        assert!(started.elapsed() < Duration::from_secs(2));

        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        // started, at least one tick, closed
        assert!(count_kind(&events, "status") >= 3, "{:?}", events);
    }

    #[tokio::test]
    async fn test_activity_resets_idle_timeout() {
        let (index, track_a) = fixture();
        let mut settings = settings();
        settings.receive_timeout = Duration::from_millis(300);

        // Five frames 150 ms apart: the session outlives a single timeout
        let frames = stream::iter(chunks(&track_a, 30, 35)).then(|frame| async move {
            time::sleep(Duration::from_millis(150)).await;
            frame
        });
        let inbound = Box::pin(frames.chain(stream::pending()));
        let (mut tx, _rx) = mpsc::unbounded_channel();

        let started = Instant::now();
        let summary = time::timeout(
            Duration::from_secs(30),
            run_session(1, inbound, &mut tx, index, &settings),
        )
        .await
        .expect("session did not time out");
        assert_eq!(summary.end, SessionEnd::IdleTimeout);
        assert_eq!(summary.stats.samples_received, 40_000);
        assert!(started.elapsed() >= Duration::from_millis(750 + 300));
    }

    /// Transport whose writes never complete
    struct StalledSink;

    #[async_trait]
    impl EventSink for StalledSink {
        async fn send(&mut self, _event: ServerEvent) -> anyhow::Result<()> {
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stalled_client_does_not_block_intake() {
        let (index, track_a) = fixture();
        let mut settings = settings();
        settings.outbound_queue = 1;
        settings.grace_period = Duration::from_millis(100);

        let inbound = stream::iter(chunks(&track_a, 30, 40)).chain(stream::pending());
        let summary = time::timeout(
            Duration::from_secs(30),
            run_session(1, inbound, &mut StalledSink, index, &settings),
        )
        .await
        .expect("session stuck behind a stalled transport");

        // Every chunk was read although no event could be written
        assert_eq!(summary.stats.samples_received, 80_000);
        assert_eq!(summary.end, SessionEnd::SlowClient);
    }

    #[tokio::test]
    async fn test_grace_period_skips_unfinished_windows() {
        let (index, track_a) = fixture();
        let mut settings = settings();
        settings.grace_period = Duration::ZERO;
        settings.max_in_flight_windows = 1;
        settings.limits.max_pending_windows = 16;

        let mut frames = chunks(&track_a, 30, 40);
        frames.push(Inbound::Close);
        let (summary, events) = time::timeout(Duration::from_secs(10), run(frames, index, &settings))
            .await
            .expect("close waited on unfinished windows");

        assert_eq!(summary.end, SessionEnd::ClientClosed);
        assert_eq!(summary.stats.windows_cut, 8);
        assert!(summary.skipped_windows > 0, "{:?}", summary);
        let published: std::collections::BTreeSet<u64> =
            matches(&events).iter().map(|r| r.window_index).collect();
        assert!(published.len() + summary.skipped_windows <= 8);
        match events.last() {
            Some(ServerEvent::Status { message, .. }) => assert_eq!(message, "closed"),
            other => panic!("expected closing status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_loss_ends_session() {
        let (index, track_a) = fixture();
        let frames = chunks(&track_a, 0, 1);
        let (summary, events) = run(frames, index, &settings()).await;
        assert_eq!(summary.end, SessionEnd::TransportLost);
        // No closing status on a dead transport
        assert_eq!(count_kind(&events, "status"), 1);
    }

    #[tokio::test]
    async fn test_panicking_window_becomes_internal_error() {
        let result = spawn_window_job(3, || panic!("boom")).await;
        match result {
            Err(EngineError::Internal { window_index, .. }) => assert_eq!(window_index, 3),
            other => panic!("unexpected {:?}", other),
        }
    }
}
