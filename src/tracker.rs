use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::delivery::{DeliveryClient, HttpDeliveryClient, Reachability};
use crate::engagement::EngagementManager;
use crate::event::{
    Action, DeviceInfo, Event, EventsBuilder, Metadata, SiteIdSource, VideoMetadata,
};
use crate::queue::{EventPipeline, EventSink, FlushOutcome};
use crate::runtime::Timer;
use crate::storage::{SqliteStorage, Storage};
use crate::TrackerError;

/// Platform services the tracker runs on.
pub struct Collaborators {
    pub storage: Arc<dyn Storage>,
    pub client: Arc<dyn DeliveryClient>,
    pub reachability: Arc<dyn Reachability>,
    pub clock: Arc<dyn Clock>,
    pub device_info: DeviceInfo,
}

impl Collaborators {
    /// SQLite store at `db_path`, HTTP delivery and the system clock.
    pub fn persistent(
        config: &TrackerConfig,
        db_path: impl AsRef<Path>,
        reachability: Arc<dyn Reachability>,
        device_info: DeviceInfo,
    ) -> Result<Self, TrackerError> {
        let storage = SqliteStorage::open(db_path)?;
        let client = HttpDeliveryClient::new(config.request_timeout())?;
        Ok(Self {
            storage: Arc::new(storage),
            client: Arc::new(client),
            reachability,
            clock: Arc::new(SystemClock::new()),
            device_info,
        })
    }
}

/// Narrow read-only view of the tracker's internals for debugging and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugSnapshot {
    pub engagement_active: bool,
    pub video_active: bool,
    pub engagement_interval: Option<Duration>,
    pub video_interval: Option<Duration>,
    pub flush_interval: Duration,
    pub flush_timer_active: bool,
    pub buffer_size: usize,
    pub stored_size: usize,
    pub dry_run: bool,
}

#[derive(Default)]
struct Sessions {
    last_pageview_uuid: Option<String>,
    engagement: Option<EngagementManager>,
    video: Option<EngagementManager>,
}

/// Host-facing entry point: builds events, runs the article and video
/// heartbeat sessions, and owns the delivery pipeline.
///
/// Every operation returns without waiting on storage or network I/O and
/// may be called from any thread.
pub struct Tracker {
    config: TrackerConfig,
    pipeline: Arc<EventPipeline>,
    builder: EventsBuilder,
    timer: Timer,
    clock: Arc<dyn Clock>,
    sessions: Mutex<Sessions>,
}

impl Tracker {
    /// Validate `config`, wire the pipeline on `runtime`, and start the
    /// flush timer so events persisted by an earlier process go out.
    pub fn new(
        config: TrackerConfig,
        collaborators: Collaborators,
        runtime: Handle,
    ) -> Result<Self, TrackerError> {
        config.validate()?;

        let timer = Timer::new(runtime);
        let pipeline = Arc::new(EventPipeline::new(
            &config,
            timer.clone(),
            collaborators.storage,
            collaborators.client,
            collaborators.reachability,
        ));
        let builder = EventsBuilder::new(
            config.site_id.trim(),
            collaborators.device_info,
            Arc::clone(&collaborators.clock),
        );

        pipeline.start_flush_timer();
        tracing::info!(
            "tracker ready for site {} (flush every {}s{})",
            config.site_id,
            config.flush_interval_secs,
            if config.dry_run { ", dry run" } else { "" }
        );

        Ok(Self {
            config,
            pipeline,
            builder,
            timer,
            clock: collaborators.clock,
            sessions: Mutex::new(Sessions::default()),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Record a pageview. Its uuid becomes the `pvid` of later engagement
    /// heartbeats.
    pub fn track_pageview(
        &self,
        url: &str,
        url_ref: &str,
        metadata: Option<&Metadata>,
        extra_data: Option<&Map<String, Value>>,
        site_id: &SiteIdSource,
    ) -> Result<(), TrackerError> {
        require_url(url)?;

        let uuid = Uuid::new_v4().to_string();
        let event = self.builder.build_event(
            url,
            url_ref,
            Action::Pageview,
            metadata,
            extra_data,
            &uuid,
            site_id,
        );
        self.sessions().last_pageview_uuid = Some(uuid);
        self.pipeline.enqueue(event);
        Ok(())
    }

    /// Start article heartbeats for `url`, replacing any running session.
    /// Requires an earlier [`Tracker::track_pageview`].
    pub fn start_engagement(
        &self,
        url: &str,
        url_ref: &str,
        extra_data: Option<&Map<String, Value>>,
        site_id: &SiteIdSource,
    ) -> Result<(), TrackerError> {
        require_url(url)?;

        let mut sessions = self.sessions();
        let Some(pageview_uuid) = sessions.last_pageview_uuid.clone() else {
            return Err(TrackerError::EngagementWithoutPageview);
        };

        if let Some(previous) = sessions.engagement.take() {
            previous.stop();
        }

        let event = self.builder.build_event(
            url,
            url_ref,
            Action::Heartbeat,
            None,
            extra_data,
            &pageview_uuid,
            site_id,
        );
        let manager = self.engagement_manager(event);
        manager.start();
        sessions.engagement = Some(manager);
        Ok(())
    }

    /// Stop article heartbeats, sending the engaged time accumulated since
    /// the last one.
    pub fn stop_engagement(&self) {
        if let Some(manager) = self.sessions().engagement.take() {
            manager.stop();
            tracing::debug!("engagement session stopped");
        }
    }

    /// Start or resume video tracking.
    ///
    /// Playing the video that is already tracked resumes it without a new
    /// `videostart`. A different video stops the old session and starts
    /// over.
    pub fn track_play(
        &self,
        url: &str,
        url_ref: &str,
        metadata: &VideoMetadata,
        extra_data: Option<&Map<String, Value>>,
        site_id: &SiteIdSource,
    ) -> Result<(), TrackerError> {
        require_url(url)?;

        let mut sessions = self.sessions();
        if let Some(current) = sessions.video.take() {
            let link = metadata.video_id();
            if current.is_same_session(url, url_ref, link, metadata.duration_seconds) {
                if !current.is_running() {
                    current.start();
                }
                sessions.video = Some(current);
                return Ok(());
            }
            current.stop();
        }

        let uuid = Uuid::new_v4().to_string();
        let metadata = Metadata::Video(metadata.clone());
        let videostart = self.builder.build_event(
            url,
            url_ref,
            Action::VideoStart,
            Some(&metadata),
            extra_data,
            &uuid,
            site_id,
        );
        self.pipeline.enqueue(videostart);

        let heartbeat = self.builder.build_event(
            url,
            url_ref,
            Action::VideoHeartbeat,
            Some(&metadata),
            extra_data,
            &uuid,
            site_id,
        );
        let manager = self.engagement_manager(heartbeat);
        manager.start();
        sessions.video = Some(manager);
        Ok(())
    }

    /// Pause the video session. A later matching `track_play` resumes it.
    pub fn track_pause(&self) {
        if let Some(manager) = self.sessions().video.as_ref() {
            manager.stop();
        }
    }

    /// Stop and forget the video session. The next `track_play` is a new view.
    pub fn reset_video(&self) {
        if let Some(manager) = self.sessions().video.take() {
            manager.stop();
        }
    }

    /// Queue an event built by the host.
    pub fn enqueue(&self, event: Event) {
        self.pipeline.enqueue(event);
    }

    /// The app moved to the background: flush without waiting.
    pub fn on_app_background(&self) {
        tracing::debug!("app backgrounded, flushing");
        self.pipeline.flush_in_background();
    }

    /// Flush now. Shares the pipeline's critical section, so it queues
    /// behind a flush already in progress.
    pub async fn flush_now(&self) -> FlushOutcome {
        self.pipeline.flush_now().await
    }

    pub fn start_flush_timer(&self) -> bool {
        self.pipeline.start_flush_timer()
    }

    pub fn stop_flush_timer(&self) -> bool {
        self.pipeline.stop_flush_timer()
    }

    pub fn is_flush_timer_running(&self) -> bool {
        self.pipeline.is_flush_timer_running()
    }

    pub fn flush_interval(&self) -> Duration {
        self.pipeline.flush_interval()
    }

    pub fn buffer_size(&self) -> usize {
        self.pipeline.buffer_size()
    }

    pub async fn stored_size(&self) -> usize {
        self.pipeline.stored_size().await
    }

    /// Wait for every overflow check triggered so far.
    pub async fn settle(&self) {
        self.pipeline.settle().await;
    }

    pub fn is_engagement_active(&self) -> bool {
        self.sessions()
            .engagement
            .as_ref()
            .is_some_and(EngagementManager::is_running)
    }

    pub fn is_video_active(&self) -> bool {
        self.sessions()
            .video
            .as_ref()
            .is_some_and(EngagementManager::is_running)
    }

    pub fn engagement_interval(&self) -> Option<Duration> {
        self.sessions().engagement.as_ref().map(EngagementManager::interval)
    }

    pub fn video_interval(&self) -> Option<Duration> {
        self.sessions().video.as_ref().map(EngagementManager::interval)
    }

    pub async fn debug_snapshot(&self) -> DebugSnapshot {
        let stored_size = self.stored_size().await;
        DebugSnapshot {
            engagement_active: self.is_engagement_active(),
            video_active: self.is_video_active(),
            engagement_interval: self.engagement_interval(),
            video_interval: self.video_interval(),
            flush_interval: self.flush_interval(),
            flush_timer_active: self.is_flush_timer_running(),
            buffer_size: self.buffer_size(),
            stored_size,
            dry_run: self.config.dry_run,
        }
    }

    fn engagement_manager(&self, base_event: Event) -> EngagementManager {
        let sink: Arc<dyn EventSink> = self.pipeline.clone();
        EngagementManager::new(
            base_event,
            self.config.base_engagement_interval(),
            self.timer.clone(),
            sink,
            Arc::clone(&self.clock),
        )
    }

    fn sessions(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().expect("tracker sessions mutex poisoned")
    }
}

fn require_url(url: &str) -> Result<(), TrackerError> {
    if url.trim().is_empty() {
        return Err(TrackerError::InvalidArgument("url cannot be empty".to_string()));
    }
    Ok(())
}
