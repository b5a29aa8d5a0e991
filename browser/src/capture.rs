use crate::driver::PageDriver;
use eyre::{
    Context as _,
    Result,
};
use meet_recorder_config::Timings;
use serde::{
    Deserialize,
    Serialize,
};

/// Name of the function the page calls with every recorded chunk.
pub const HOST_CALLBACK: &str = "__meetRecorderChunk";

const CAPTURE_CLASS: &str = include_str!("js/capture.js");
const INSTANCE: &str = "window.__meetRecorderCapture";

#[cfg(test)]
pub(crate) const START_MARKER: &str = "__meetRecorderCapture.start()";
#[cfg(test)]
pub(crate) const STOP_MARKER: &str = "__meetRecorderCapture.stop()";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CaptureOptions {
    callback: &'static str,
    mime_type: &'static str,
    chunk_interval_ms: u64,
    discovery_interval_ms: u64,
}

/// Outcome of starting the capture inside the page.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureReport {
    pub ok: bool,
    pub already_running: bool,
    pub error: Option<String>,
    pub video_track: Option<String>,
    pub audio_track: bool,
    /// Media elements wired into the mix by the first discovery pass.
    pub connected: u32,
}

/// Drives the single capture object that lives inside the page.
///
/// The object owns the audio graph, the recorder and the markers of the
/// media elements it has already connected, so starting and stopping from
/// the host is safe to repeat.
#[derive(Debug, Clone)]
pub struct CaptureScript {
    options: CaptureOptions,
}

impl CaptureScript {
    pub fn new(timings: &Timings) -> Self {
        Self {
            options: CaptureOptions {
                callback: HOST_CALLBACK,
                mime_type: "video/webm",
                chunk_interval_ms: timings.chunk_interval().as_millis() as u64,
                discovery_interval_ms: timings.discovery_interval().as_millis() as u64,
            },
        }
    }

    fn start_expression(&self) -> Result<String> {
        let options = serde_json::to_string(&self.options).context("failed to serialize capture options")?;
        Ok(format!(
            "(async () => {{\n\
             const MeetRecorderCapture = {CAPTURE_CLASS};\n\
             {INSTANCE} = {INSTANCE} || new MeetRecorderCapture({options});\n\
             return await {INSTANCE}.start();\n\
             }})()"
        ))
    }

    fn stop_expression() -> String {
        format!("({INSTANCE} ? {INSTANCE}.stop() : {{ stopped: false }})")
    }

    /// Starts recording the page. A report with `ok == false` means the page
    /// could not set up capture; the session can go on without it.
    pub async fn start<D: PageDriver + ?Sized>(&self, driver: &D) -> Result<CaptureReport> {
        let value = driver
            .evaluate(&self.start_expression()?)
            .await
            .context("failed to evaluate capture script")?;
        serde_json::from_value(value).context("unexpected capture script result")
    }

    /// Stops the recorder, its tracks and the audio graph. Returns whether a
    /// recording was running.
    pub async fn stop<D: PageDriver + ?Sized>(&self, driver: &D) -> Result<bool> {
        #[derive(Deserialize)]
        struct Stopped {
            #[serde(default)]
            stopped: bool,
        }

        let value = driver
            .evaluate(&Self::stop_expression())
            .await
            .context("failed to stop capture script")?;
        Ok(serde_json::from_value::<Stopped>(value)
            .map(|stopped| stopped.stopped)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn start_expression_embeds_options() {
        let script = CaptureScript::new(&Timings::default());
        let expression = script.start_expression().unwrap();
        assert!(expression.contains("class MeetRecorderCapture"));
        assert!(expression.contains(r#""callback":"__meetRecorderChunk""#));
        assert!(expression.contains(r#""chunkIntervalMs":1000"#));
        assert!(expression.contains(r#""discoveryIntervalMs":3000"#));
        assert!(expression.contains(r#""mimeType":"video/webm""#));
    }

    #[test]
    fn failed_setup_releases_the_tab_capture() {
        let (_, failure_path) = CAPTURE_CLASS
            .split_once("Failed composite recording")
            .unwrap();
        let (failure_path, _) = failure_path.split_once("return { ok: false").unwrap();
        assert!(failure_path.contains("display.getTracks().forEach((track) => track.stop())"));
    }

    #[tokio::test]
    async fn reports_setup_failure() {
        let driver = MockDriver::default();
        driver.on_evaluate(
            START_MARKER,
            [json!({ "ok": false, "error": "Permission denied" })],
        );

        let report = CaptureScript::new(&Timings::default()).start(&driver).await.unwrap();
        assert_eq!(
            report,
            CaptureReport {
                ok: false,
                error: Some("Permission denied".to_string()),
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn reports_started_capture() {
        let driver = MockDriver::default();
        driver.on_evaluate(
            START_MARKER,
            [json!({ "ok": true, "videoTrack": "Meet tab", "audioTrack": true, "connected": 2 })],
        );

        let report = CaptureScript::new(&Timings::default()).start(&driver).await.unwrap();
        assert!(report.ok);
        assert_eq!(report.video_track.as_deref(), Some("Meet tab"));
        assert!(report.audio_track);
        assert_eq!(report.connected, 2);
    }

    #[tokio::test]
    async fn stop_is_safe_without_capture() {
        let driver = MockDriver::default();
        let script = CaptureScript::new(&Timings::default());

        // The page answers `undefined` when nothing was ever installed.
        assert!(!script.stop(&driver).await.unwrap());

        driver.on_evaluate(STOP_MARKER, [json!({ "stopped": true }), json!({ "stopped": false })]);
        assert!(script.stop(&driver).await.unwrap());
        assert!(!script.stop(&driver).await.unwrap());
    }
}
