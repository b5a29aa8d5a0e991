use crate::{
    driver::{
        Locator,
        PageDriver,
    },
    selectors,
    state::{
        Lifecycle,
        LifecycleState,
    },
};
use meet_recorder_config::Timings;
use std::time::Duration;
use tokio::time::Instant;

/// What happened to a local media toggle during an entry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum MediaToggle {
    #[display("not found")]
    NotFound,
    #[display("already off")]
    AlreadyOff,
    #[display("turned off")]
    TurnedOff,
    #[display("click failed")]
    ClickFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum NameField {
    #[display("not visible")]
    NotVisible,
    #[display("kept existing")]
    KeptExisting,
    #[display("filled")]
    Filled,
    #[display("fill failed")]
    FillFailed,
}

/// Result of one pass over the pre-join screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAttempt {
    /// Overlays clicked away, in probe order.
    pub dismissed: Vec<String>,
    pub microphone: MediaToggle,
    pub camera: MediaToggle,
    pub name: NameField,
    /// The join control that was clicked, if any.
    pub join_control: Option<String>,
}

impl JoinAttempt {
    pub fn entered(&self) -> bool {
        self.join_control.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Clicked { attempts: u64 },
    Exhausted { attempts: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Admitted,
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
enum Device {
    Microphone,
    Camera,
}

impl Device {
    fn toggle(self) -> Locator {
        match self {
            Device::Microphone => selectors::MICROPHONE_TOGGLE,
            Device::Camera => selectors::CAMERA_TOGGLE,
        }
    }

    /// Reads the toggle label as "device is currently on".
    fn is_on(self, label: &str) -> bool {
        let label = label.to_lowercase();
        if label.contains("turn off") {
            return true;
        }
        match self {
            Device::Microphone => label
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word == "mute"),
            Device::Camera => label.contains("disable"),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Microphone => write!(f, "microphone"),
            Device::Camera => write!(f, "camera"),
        }
    }
}

/// Gets the bot from the pre-join screen into the call.
pub struct JoinOrchestrator<'a, D: ?Sized> {
    driver: &'a D,
    display_name: &'a str,
    timings: &'a Timings,
    lifecycle: &'a Lifecycle,
}

impl<'a, D: PageDriver + ?Sized> JoinOrchestrator<'a, D> {
    pub fn new(driver: &'a D, display_name: &'a str, timings: &'a Timings, lifecycle: &'a Lifecycle) -> Self {
        Self {
            driver,
            display_name,
            timings,
            lifecycle,
        }
    }

    /// Retries entry attempts until a join control was clicked, the join
    /// budget has passed or the attempt cap is reached.
    #[instrument(level = "debug", skip_all, fields(name = %self.display_name))]
    pub async fn join(&self) -> JoinOutcome {
        self.lifecycle.advance(LifecycleState::Joining);

        let deadline = Instant::now() + self.timings.join_budget();
        let max_attempts = self.timings.join_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let join_attempt = self.attempt_entry_until(deadline).await;
            debug!(
                attempt,
                dismissed = ?join_attempt.dismissed,
                microphone = %join_attempt.microphone,
                camera = %join_attempt.camera,
                name = %join_attempt.name,
                join_control = ?join_attempt.join_control,
                "Entry attempt"
            );

            if join_attempt.entered() {
                info!(attempt, "Clicked join control");
                return JoinOutcome::Clicked { attempts: attempt };
            }

            if attempt >= max_attempts || Instant::now() >= deadline {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.timings.join_interval().min(remaining)).await;
            if Instant::now() >= deadline {
                break;
            }
        }

        warn!(attempts = attempt, "No join control found, manual intervention required");
        JoinOutcome::Exhausted { attempts: attempt }
    }

    /// One pass over the pre-join screen. Never clicks more than one join
    /// control.
    pub async fn attempt_entry(&self) -> JoinAttempt {
        self.attempt_entry_until(Instant::now() + self.timings.join_budget())
            .await
    }

    /// Like [`Self::attempt_entry`], with every probe cut short at `deadline`.
    async fn attempt_entry_until(&self, deadline: Instant) -> JoinAttempt {
        let dismissed = self.dismiss_overlays(deadline).await;
        let microphone = self.force_off(Device::Microphone, deadline).await;
        let camera = self.force_off(Device::Camera, deadline).await;
        let name = self.supply_name(deadline).await;
        let join_control = self.click_join_control(deadline).await;

        JoinAttempt {
            dismissed,
            microphone,
            camera,
            name,
            join_control,
        }
    }

    async fn probe(&self, locator: &Locator, timeout: Duration) -> bool {
        let started = Instant::now();
        match self.driver.is_visible(locator, timeout).await {
            Ok(visible) => visible,
            Err(err) => {
                trace!(%locator, elapsed = ?started.elapsed(), "Visibility probe failed: {err:#}");
                false
            }
        }
    }

    async fn probe_until(&self, locator: &Locator, timeout: Duration, deadline: Instant) -> bool {
        self.probe(locator, timeout.min(deadline.saturating_duration_since(Instant::now())))
            .await
    }

    async fn dismiss_overlays(&self, deadline: Instant) -> Vec<String> {
        let mut dismissed = Vec::new();
        for overlay in &selectors::DISMISS_OVERLAYS {
            if !self.probe_until(overlay, self.timings.overlay_probe(), deadline).await {
                continue;
            }
            match self.driver.click(overlay).await {
                Ok(()) => dismissed.push(overlay.to_string()),
                Err(err) => debug!(%overlay, "Failed to dismiss overlay: {err:#}"),
            }
        }
        dismissed
    }

    async fn force_off(&self, device: Device, deadline: Instant) -> MediaToggle {
        let toggle = device.toggle();
        if !self.probe_until(&toggle, self.timings.overlay_probe(), deadline).await {
            return MediaToggle::NotFound;
        }

        let label = self
            .driver
            .attribute(&toggle, "aria-label")
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        let unmuted = self
            .driver
            .attribute(&toggle, "data-is-muted")
            .await
            .ok()
            .flatten()
            .is_some_and(|muted| muted == "false");

        if !device.is_on(&label) && !unmuted {
            return MediaToggle::AlreadyOff;
        }

        match self.driver.click(&toggle).await {
            Ok(()) => {
                debug!(%device, label, "Turned off");
                MediaToggle::TurnedOff
            }
            Err(err) => {
                debug!(%device, %toggle, "Failed to turn off: {err:#}");
                MediaToggle::ClickFailed
            }
        }
    }

    async fn supply_name(&self, deadline: Instant) -> NameField {
        let input = selectors::NAME_INPUT;
        if !self.probe_until(&input, self.timings.name_probe(), deadline).await {
            return NameField::NotVisible;
        }

        match self.driver.input_value(&input).await {
            Ok(value) if !value.trim().is_empty() => {
                trace!(value, "Keeping the name already entered");
                return NameField::KeptExisting;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(%input, "Failed to read name field: {err:#}");
                return NameField::FillFailed;
            }
        }

        match self.driver.fill(&input, self.display_name).await {
            Ok(()) => NameField::Filled,
            Err(err) => {
                debug!(%input, "Failed to fill name: {err:#}");
                NameField::FillFailed
            }
        }
    }

    async fn click_join_control(&self, deadline: Instant) -> Option<String> {
        for control in &selectors::JOIN_BUTTONS {
            if !self.probe_until(control, self.timings.join_probe(), deadline).await {
                continue;
            }
            match self.driver.click(control).await {
                Ok(()) => return Some(control.to_string()),
                Err(err) => debug!(%control, "Join control click failed: {err:#}"),
            }
        }
        None
    }

    /// Waits until the page shows controls that only exist inside the call,
    /// then until the waiting-for-host notice is gone.
    pub async fn wait_for_admission(&self) -> AdmissionOutcome {
        self.lifecycle.advance(LifecycleState::WaitingAdmission);
        let timeout = self.timings.admission_timeout();
        let started = Instant::now();

        match self
            .driver
            .wait_for_any(&selectors::IN_MEETING_INDICATORS, timeout)
            .await
        {
            Ok(index) => debug!(indicator = %selectors::IN_MEETING_INDICATORS[index], "Meeting controls visible"),
            Err(err) => {
                warn!(elapsed = ?started.elapsed(), "Not admitted: {err:#}");
                return AdmissionOutcome::TimedOut;
            }
        }

        let waiting = selectors::WAITING_FOR_HOST;
        if self.probe(&waiting, self.timings.waiting_probe()).await {
            info!("Waiting for the host to let us in");
            if let Err(err) = self.driver.wait_for_hidden(&waiting, timeout).await {
                warn!(elapsed = ?started.elapsed(), "Not admitted: {err:#}");
                return AdmissionOutcome::TimedOut;
            }
        }

        info!(elapsed = ?started.elapsed(), "Admitted to the meeting");
        AdmissionOutcome::Admitted
    }
}
