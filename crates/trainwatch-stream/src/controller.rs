//! Subscription controller
//!
//! Binds the selected job to exactly one `(StreamSession, HistoryStore)`
//! pair. Selecting a different job tears the pair down and builds a fresh
//! one; the pair never outlives the selection.
//!
//! All session events from all transports and timers arrive on one queue
//! owned by the controller. Each session gets a fresh session number, so an
//! event from a torn-down session fails the generation check of whatever
//! session is current and is dropped.

use crate::address::{JobId, Origin};
use crate::config::{SessionConfig, WatchConfig};
use crate::error::ConfigError;
use crate::session::{ConnectionStatus, SessionState, SessionStats, SessionUpdate, StreamSession};
use crate::transport::{Connector, EventReceiver, EventSender, SessionEvent};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};
use trainwatch_core::{
    AxisConfig, DecodeError, HistorySnapshot, HistoryStore, MetricSample, Projection,
    RetentionPolicy, SeriesProjector,
};

/// Input to [`SubscriptionController::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCommand {
    /// User picked a job; an empty id unsubscribes
    SelectJob(String),
    /// Job catalog arrived
    CatalogLoaded(Vec<String>),
    /// Tear down and stop
    Shutdown,
}

/// Everything the presentation layer needs for one redraw
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    /// Selected job
    pub job: Option<JobId>,
    /// Connection status of the active session
    pub status: ConnectionStatus,
    /// Why the connection is down, while it is
    pub status_reason: Option<String>,
    /// Most recent sample of the active history
    pub latest: Option<Arc<MetricSample>>,
    /// Samples retained for the selected job
    pub history_len: usize,
    /// Chart series for the selected job
    pub projection: Projection,
    /// Counters of the active session
    pub stats: SessionStats,
    /// Most recent rejected frame
    pub last_diagnostic: Option<DecodeError>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            job: None,
            status: ConnectionStatus::Disconnected,
            status_reason: None,
            latest: None,
            history_len: 0,
            projection: Projection::default(),
            stats: SessionStats::default(),
            last_diagnostic: None,
        }
    }
}

/// The active pair; lives exactly as long as the selection
#[derive(Debug)]
struct Subscription {
    session: StreamSession,
    history: HistoryStore,
}

enum Step {
    Command(ControllerCommand),
    Event(SessionEvent),
    Stop,
}

/// Owns the selected job's session and history
pub struct SubscriptionController {
    connector: Arc<dyn Connector>,
    origin: Origin,
    retention: RetentionPolicy,
    session_config: SessionConfig,
    known_jobs: Vec<JobId>,
    /// Set once the default selection can no longer apply
    default_settled: bool,
    active: Option<Subscription>,
    next_session: u64,
    last_diagnostic: Option<DecodeError>,
    inbox_tx: EventSender,
    inbox_rx: EventReceiver,
}

impl SubscriptionController {
    /// Create a controller from validated configuration
    ///
    /// # Errors
    /// - `ConfigError` if the configuration does not validate
    pub fn new(connector: Arc<dyn Connector>, config: &WatchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_origin(
            connector,
            config.parsed_origin()?,
            config.retention,
            config.session.clone(),
        ))
    }

    /// Create a controller from parts
    #[must_use]
    pub fn with_origin(
        connector: Arc<dyn Connector>,
        origin: Origin,
        retention: RetentionPolicy,
        session_config: SessionConfig,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            origin,
            retention,
            session_config,
            known_jobs: Vec::new(),
            default_settled: false,
            active: None,
            next_session: 1,
            last_diagnostic: None,
            inbox_tx,
            inbox_rx,
        }
    }

    /// Select a job
    ///
    /// Re-selecting the current job is a no-op. Any other id tears down the
    /// current pair first; a blank id leaves nothing subscribed.
    pub fn select_job(&mut self, job: &str) -> Vec<SessionUpdate> {
        self.default_settled = true;
        let job = JobId::new(job);

        if job.is_some() && job.as_ref() == self.selected_job() {
            trace!(job = ?job, "job already selected");
            return Vec::new();
        }

        let mut updates = self.teardown();
        if let Some(job) = job {
            updates.extend(self.start(job));
        }
        updates
    }

    /// Record the job catalog
    ///
    /// The first catalog selects its last entry unless a job was already
    /// chosen; later catalogs only refresh the list.
    pub fn catalog_loaded(&mut self, jobs: Vec<String>) -> Vec<SessionUpdate> {
        self.known_jobs = jobs.into_iter().filter_map(JobId::new).collect();
        debug!(count = self.known_jobs.len(), "job catalog loaded");

        if self.default_settled {
            return Vec::new();
        }
        self.default_settled = true;

        match self.known_jobs.last().cloned() {
            Some(job) if self.active.is_none() => {
                info!(%job, "selecting most recent job");
                self.start(job)
            }
            _ => Vec::new(),
        }
    }

    /// Tear down the active pair, if any
    ///
    /// The session is released before its history is cleared.
    pub fn teardown(&mut self) -> Vec<SessionUpdate> {
        let Some(mut active) = self.active.take() else {
            return Vec::new();
        };
        info!(job = %active.session.job(), "unsubscribing");

        let updates = active.session.teardown();
        active.history.clear();
        self.last_diagnostic = None;
        updates
    }

    fn start(&mut self, job: JobId) -> Vec<SessionUpdate> {
        let session_number = self.next_session;
        self.next_session += 1;

        let url = self.origin.subscription_url(&job);
        info!(%job, %url, session = session_number, "subscribing");

        let session = StreamSession::new(
            job,
            url,
            session_number,
            Arc::clone(&self.connector),
            self.inbox_tx.clone(),
            self.session_config.clone(),
        );
        let active = self.active.insert(Subscription {
            session,
            history: HistoryStore::new(self.retention),
        });
        active.session.subscribe()
    }

    #[inline]
    #[must_use]
    pub fn known_jobs(&self) -> &[JobId] {
        &self.known_jobs
    }

    #[inline]
    #[must_use]
    pub fn selected_job(&self) -> Option<&JobId> {
        self.active.as_ref().map(|a| a.session.job())
    }

    /// Status as shown to the user
    #[must_use]
    pub fn current_status(&self) -> ConnectionStatus {
        self.session_state()
            .map_or(ConnectionStatus::Disconnected, SessionState::status)
    }

    /// Why the connection is down, while it is
    #[must_use]
    pub fn status_reason(&self) -> Option<String> {
        self.session_state().and_then(SessionState::reason)
    }

    /// Most recent sample of the active history
    #[must_use]
    pub fn latest_sample(&self) -> Option<&Arc<MetricSample>> {
        self.active.as_ref().and_then(|a| a.history.latest())
    }

    /// Ordered view of the active history; empty when nothing is selected
    #[must_use]
    pub fn history_snapshot(&self) -> HistorySnapshot<'_> {
        match &self.active {
            Some(active) => active.history.snapshot(),
            None => HistorySnapshot::empty(),
        }
    }

    #[must_use]
    pub fn session_state(&self) -> Option<&SessionState> {
        self.active.as_ref().map(|a| a.session.state())
    }

    #[must_use]
    pub fn session_stats(&self) -> SessionStats {
        self.active
            .as_ref()
            .map(|a| a.session.stats())
            .unwrap_or_default()
    }

    #[inline]
    #[must_use]
    pub fn last_diagnostic(&self) -> Option<&DecodeError> {
        self.last_diagnostic.as_ref()
    }

    /// Apply one queued session event
    pub fn handle_event(&mut self, event: SessionEvent) -> Vec<SessionUpdate> {
        let Some(active) = self.active.as_mut() else {
            trace!(generation = %event.generation(), "event with no active session");
            return Vec::new();
        };

        let updates = active.session.handle(event, &mut active.history);
        for update in &updates {
            if let SessionUpdate::Rejected(error) = update {
                self.last_diagnostic = Some(error.clone());
            }
        }
        updates
    }

    /// Apply every event already queued, without waiting
    pub fn drain_pending(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = self.inbox_rx.try_recv() {
            updates.extend(self.handle_event(event));
        }
        updates
    }

    /// Wait for the next queued event and apply it
    pub async fn next_updates(&mut self) -> Vec<SessionUpdate> {
        // The controller holds a sender, so the queue never closes
        match self.inbox_rx.recv().await {
            Some(event) => self.handle_event(event),
            None => Vec::new(),
        }
    }

    /// Current view, projected through `projector`
    pub fn view(&self, projector: &mut SeriesProjector) -> ViewState {
        let snapshot = self.history_snapshot();
        ViewState {
            job: self.selected_job().cloned(),
            status: self.current_status(),
            status_reason: self.status_reason(),
            latest: snapshot.latest().cloned(),
            history_len: snapshot.len(),
            projection: projector.update(&snapshot).clone(),
            stats: self.session_stats(),
            last_diagnostic: self.last_diagnostic.clone(),
        }
    }

    /// Drive the controller until `Shutdown` or the command channel closes
    ///
    /// Commands and session events are applied one at a time on this task.
    /// A new [`ViewState`] is published after every input that changed
    /// something.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<ControllerCommand>,
        views: watch::Sender<ViewState>,
        axes: AxisConfig,
    ) {
        let mut projector = SeriesProjector::new(axes);
        views.send_replace(self.view(&mut projector));

        loop {
            let step = tokio::select! {
                command = commands.recv() => command.map_or(Step::Stop, Step::Command),
                event = self.inbox_rx.recv() => event.map_or(Step::Stop, Step::Event),
            };

            let updates = match step {
                Step::Command(ControllerCommand::SelectJob(job)) => self.select_job(&job),
                Step::Command(ControllerCommand::CatalogLoaded(jobs)) => self.catalog_loaded(jobs),
                Step::Event(event) => self.handle_event(event),
                Step::Command(ControllerCommand::Shutdown) | Step::Stop => break,
            };
            if updates.is_empty() {
                continue;
            }

            for update in &updates {
                if let SessionUpdate::Sample(sample) = update {
                    debug!(
                        epoch = sample.epoch(),
                        batch = sample.batch(),
                        loss = sample.loss(),
                        accuracy = sample.accuracy(),
                        "sample"
                    );
                }
            }
            views.send_replace(self.view(&mut projector));
        }

        self.teardown();
        views.send_replace(self.view(&mut projector));
        debug!("controller stopped");
    }
}

impl std::fmt::Debug for SubscriptionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionController")
            .field("origin", &self.origin)
            .field("retention", &self.retention)
            .field("known_jobs", &self.known_jobs)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{EventSink, TransportHandle};
    use url::Url;

    struct NeverConnects;

    impl Connector for NeverConnects {
        fn open(&self, _url: &Url, _sink: EventSink) -> TransportHandle {
            let (close, _) = tokio::sync::oneshot::channel();
            TransportHandle::new(close)
        }
    }

    fn controller() -> SubscriptionController {
        SubscriptionController::new(Arc::new(NeverConnects), &WatchConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn nothing_selected_is_disconnected() {
        let controller = controller();
        assert_eq!(controller.current_status(), ConnectionStatus::Disconnected);
        assert!(controller.latest_sample().is_none());
        assert!(controller.history_snapshot().is_empty());
        assert!(controller.selected_job().is_none());
    }

    #[tokio::test]
    async fn catalog_selects_last_entry_once() {
        let mut controller = controller();
        controller.catalog_loaded(vec!["run-1".into(), "run-2".into()]);
        assert_eq!(controller.selected_job().map(JobId::as_str), Some("run-2"));
        assert_eq!(controller.current_status(), ConnectionStatus::Connecting);

        controller.select_job("run-1");
        controller.catalog_loaded(vec!["run-1".into(), "run-2".into(), "run-3".into()]);
        assert_eq!(controller.selected_job().map(JobId::as_str), Some("run-1"));
        assert_eq!(controller.known_jobs().len(), 3);
    }

    #[tokio::test]
    async fn user_choice_beats_late_catalog() {
        let mut controller = controller();
        controller.select_job("mine");
        controller.catalog_loaded(vec!["other".into()]);
        assert_eq!(controller.selected_job().map(JobId::as_str), Some("mine"));
    }

    #[tokio::test]
    async fn blank_selection_unsubscribes() {
        let mut controller = controller();
        controller.select_job("run-1");
        let updates = controller.select_job("");
        assert_eq!(updates, vec![SessionUpdate::Status(SessionState::Idle)]);
        assert!(controller.selected_job().is_none());
        assert_eq!(controller.current_status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn reselecting_same_job_is_noop() {
        let mut controller = controller();
        controller.select_job("run-1");
        let generation = controller.active.as_ref().map(|a| a.session.generation());

        assert!(controller.select_job("run-1").is_empty());
        assert_eq!(
            controller.active.as_ref().map(|a| a.session.generation()),
            generation
        );
    }
}
