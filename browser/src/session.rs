use crate::{
    capture::{
        CaptureScript,
        HOST_CALLBACK,
    },
    driver::{
        PageDriver,
        Permission,
    },
    join::{
        AdmissionOutcome,
        JoinOrchestrator,
    },
    presence::PresenceMonitor,
    selectors,
    sink::{
        spawn_chunk_pump,
        FileSink,
        RecordingSink,
    },
    state::{
        Lifecycle,
        LifecycleState,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use eyre::{
    Context as _,
    Result,
};
use meet_recorder_config::SessionConfig;
use std::{
    future::Future,
    path::PathBuf,
    sync::Arc,
};
use tokio::{
    task::JoinHandle,
    time::Instant,
};

/// Why the session is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ShutdownTrigger {
    #[display("termination signal")]
    Signal,
    #[display("page closed")]
    PageClosed,
    #[display("alone in the meeting")]
    Alone,
}

/// One run of the recorder against one room.
#[derive(Debug)]
pub struct Session {
    pub config: SessionConfig,
    pub started: DateTime<Utc>,
    pub recording_path: PathBuf,
    pub lifecycle: Lifecycle,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let started = Utc::now();
        let recording_path = config
            .app_config
            .recordings_dir
            .join(format!("meet-record-{}.webm", started.timestamp_millis()));
        Self {
            config,
            started,
            recording_path,
            lifecycle: Lifecycle::default(),
        }
    }
}

/// Owns the page for the whole session and the one shutdown path.
pub struct SessionController<D: ?Sized> {
    session: Session,
    driver: Arc<D>,
    capture: CaptureScript,
    sink: Option<Arc<dyn RecordingSink>>,
    pump: Option<JoinHandle<()>>,
}

impl<D: PageDriver + ?Sized> SessionController<D> {
    pub fn new(session: Session, driver: Arc<D>) -> Self {
        let capture = CaptureScript::new(&session.config.app_config.timings);
        Self {
            session,
            driver,
            capture,
            sink: None,
            pump: None,
        }
    }

    /// Records into `sink` instead of a file at [`Session::recording_path`].
    pub fn with_sink(mut self, sink: Arc<dyn RecordingSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.session.lifecycle
    }

    /// Attends the meeting until `shutdown` resolves or the session ends on
    /// its own, then tears everything down. Errors only if the room could not
    /// be opened.
    #[instrument(level = "info", skip_all, fields(room = %self.session.config.room_url))]
    pub async fn run(mut self, shutdown: impl Future<Output = ShutdownTrigger>) -> Result<()> {
        info!(
            name = self.session.config.display_name,
            started = %self.session.started,
            path = ?self.session.recording_path,
            "Starting session"
        );

        let result = tokio::select! {
            biased;

            trigger = shutdown => Ok(trigger),
            result = self.attend() => result,
        };

        match &result {
            Ok(trigger) => info!(%trigger, "Shutting down"),
            Err(err) => error!("Session failed: {err:#}"),
        }

        self.shutdown().await;

        result.map(|_| ())
    }

    async fn attend(&mut self) -> Result<ShutdownTrigger> {
        let timings = self.session.config.app_config.timings.clone();
        let lifecycle = self.session.lifecycle.clone();

        let origin = self.session.config.room_origin();
        if let Err(err) = self
            .driver
            .grant_permissions(&[Permission::Microphone, Permission::Camera], &origin)
            .await
        {
            warn!(origin, "Failed to grant media permissions: {err:#}");
        }

        self.driver
            .navigate(&self.session.config.room_url)
            .await
            .wrap_err_with(|| format!("Failed to open {}", self.session.config.room_url))?;

        self.wait_for_login().await?;

        let orchestrator = JoinOrchestrator::new(
            &*self.driver,
            &self.session.config.display_name,
            &timings,
            &lifecycle,
        );
        orchestrator.join().await;

        if orchestrator.wait_for_admission().await == AdmissionOutcome::TimedOut {
            warn!("Never made it into the meeting, not recording");
            return Ok(std::future::pending().await);
        }

        lifecycle.advance(LifecycleState::InMeeting);
        let entered_at = Instant::now();

        if let Err(err) = self.start_recording().await {
            error!("Recording not started: {err:#}");
        }

        if !self.session.config.app_config.auto_exit {
            info!("Auto exit disabled, recording until stopped");
            return Ok(std::future::pending().await);
        }

        PresenceMonitor::new(&*self.driver, entered_at, &timings).run().await;
        Ok(ShutdownTrigger::Alone)
    }

    /// Waits while the page is away from the room host, e.g. on a login
    /// page.
    async fn wait_for_login(&self) -> Result<()> {
        let config = &self.session.config;
        let current = self.driver.current_url().await.context("Failed to read page url")?;
        if current.as_ref().map_or(true, |url| config.is_room_url(url)) {
            return Ok(());
        }

        self.session.lifecycle.advance(LifecycleState::AwaitingAuth);
        info!(url = ?current.map(|url| url.to_string()), "Waiting for login to finish");

        let started = Instant::now();
        loop {
            tokio::time::sleep(config.app_config.timings.auth_poll()).await;
            match self.driver.current_url().await {
                Ok(Some(url)) if config.is_room_url(&url) => {
                    info!(elapsed = ?started.elapsed(), "Back on the room");
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) => trace!("Failed to read page url: {err:#}"),
            }
        }
    }

    async fn start_recording(&mut self) -> Result<()> {
        tokio::time::sleep(self.session.config.app_config.timings.settle()).await;

        // Counts as a user gesture for autoplay and audio contexts.
        if let Err(err) = self.driver.click(&selectors::PAGE_BODY).await {
            debug!("Failed to click page body: {err:#}");
        }

        let payloads = self
            .driver
            .register_host_callback(HOST_CALLBACK)
            .await
            .context("Failed to expose chunk callback")?;

        let sink = match &self.sink {
            Some(sink) => sink.clone(),
            None => {
                let sink: Arc<dyn RecordingSink> = Arc::new(FileSink::create(&self.session.recording_path).await?);
                self.sink = Some(sink.clone());
                sink
            }
        };
        self.pump = Some(spawn_chunk_pump(payloads, sink));

        let report = self.capture.start(&*self.driver).await?;
        if report.ok {
            info!(
                video = ?report.video_track,
                audio = report.audio_track,
                sources = report.connected,
                already_running = report.already_running,
                "Recording"
            );
        } else {
            warn!(error = ?report.error, "Capture could not be started");
        }

        Ok(())
    }

    /// Runs the shutdown sequence. Every step is best effort; only the first
    /// call does anything.
    pub async fn shutdown(&mut self) -> bool {
        let lifecycle = self.session.lifecycle.clone();
        if !lifecycle.begin_shutdown() {
            debug!("Shutdown already in progress");
            return false;
        }
        let timings = &self.session.config.app_config.timings;
        let started = Instant::now();

        if self.pump.is_some() {
            match self.capture.stop(&*self.driver).await {
                Ok(stopped) => debug!(stopped, "Stopped capture"),
                Err(err) => warn!("Failed to stop capture: {err:#}"),
            }
            tokio::time::sleep(timings.drain()).await;
        }

        self.leave().await;

        if let Some(sink) = &self.sink {
            if let Err(err) = sink.close().await {
                error!(path = ?self.session.recording_path, "Failed to close recording: {err:#}");
            }
        }

        match tokio::time::timeout(timings.browser_close(), self.driver.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("Failed to close browser: {err:#}"),
            Err(_) => warn!(timeout = ?timings.browser_close(), "Browser did not close in time, leaving it behind"),
        }

        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        lifecycle.advance(LifecycleState::Closed);
        info!(elapsed = ?started.elapsed(), "Session closed");

        true
    }

    async fn leave(&self) {
        let timings = &self.session.config.app_config.timings;
        for control in &selectors::LEAVE_BUTTONS {
            if !self.driver.is_visible(control, timings.leave_probe()).await.unwrap_or(false) {
                continue;
            }
            match self.driver.click(control).await {
                Ok(()) => {
                    info!("Left the meeting");
                    tokio::time::sleep(timings.leave_signal()).await;
                    return;
                }
                Err(err) => debug!(%control, "Failed to click leave: {err:#}"),
            }
        }
        debug!("No leave control found");
    }
}
