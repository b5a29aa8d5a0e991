//! Scripted stand-ins for the browser and the recording sink.

use crate::{
    driver::{
        Locator,
        PageDriver,
        Permission,
    },
    sink::{
        RecordingChunk,
        RecordingSink,
    },
};
use async_trait::async_trait;
use eyre::{
    bail,
    Result,
};
use futures::{
    stream::BoxStream,
    StreamExt as _,
};
use std::{
    collections::{
        HashMap,
        HashSet,
        VecDeque,
    },
    sync::Mutex,
    time::Duration,
};
use tokio::sync::mpsc::{
    unbounded_channel,
    UnboundedReceiver,
    UnboundedSender,
};
use url::Url;

#[derive(Default)]
struct MockState {
    visibility: HashMap<String, VecDeque<bool>>,
    attributes: HashMap<(String, String), String>,
    values: HashMap<String, String>,
    failing_clicks: HashSet<String>,
    evaluations: Vec<(String, VecDeque<serde_json::Value>)>,
    urls: VecDeque<Url>,
    navigation_error: Option<String>,

    clicks: Vec<String>,
    fills: Vec<(String, String)>,
    evaluated: Vec<String>,
    permissions: Vec<(Vec<Permission>, String)>,
    callbacks: Vec<String>,
    closed: usize,

    wait_out_probes: bool,
    hang_on_close: bool,
}

/// [`PageDriver`] whose page state is scripted by the test.
///
/// Visibility answers are consumed one per probe; the last scripted answer
/// sticks. Unknown locators are invisible and, unless
/// [`MockDriver::wait_out_probes`] was called, answer right away.
pub struct MockDriver {
    state: Mutex<MockState>,
    callback_sender: UnboundedSender<String>,
    callback_receiver: Mutex<Option<UnboundedReceiver<String>>>,
}

impl Default for MockDriver {
    fn default() -> Self {
        let (callback_sender, callback_receiver) = unbounded_channel();
        Self {
            state: Default::default(),
            callback_sender,
            callback_receiver: Mutex::new(Some(callback_receiver)),
        }
    }
}

impl MockDriver {
    pub fn set_visible(&self, locator: &Locator, visible: bool) {
        self.script_visibility(locator, [visible]);
    }

    pub fn script_visibility(&self, locator: &Locator, answers: impl IntoIterator<Item = bool>) {
        self.state
            .lock()
            .unwrap()
            .visibility
            .insert(locator.to_string(), answers.into_iter().collect());
    }

    pub fn set_attribute(&self, locator: &Locator, name: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .attributes
            .insert((locator.to_string(), name.to_string()), value.to_string());
    }

    pub fn set_value(&self, locator: &Locator, value: &str) {
        self.state
            .lock()
            .unwrap()
            .values
            .insert(locator.to_string(), value.to_string());
    }

    pub fn fail_clicks_on(&self, locator: &Locator) {
        self.state.lock().unwrap().failing_clicks.insert(locator.to_string());
    }

    /// Answers evaluations of scripts containing `marker`, one answer per
    /// call, the last one sticking.
    pub fn on_evaluate(&self, marker: &str, answers: impl IntoIterator<Item = serde_json::Value>) {
        self.state
            .lock()
            .unwrap()
            .evaluations
            .push((marker.to_string(), answers.into_iter().collect()));
    }

    /// URLs reported by `current_url`, one per call, the last one sticking.
    pub fn script_urls(&self, urls: impl IntoIterator<Item = &'static str>) {
        self.state.lock().unwrap().urls = urls.into_iter().map(|url| url.parse().unwrap()).collect();
    }

    /// Makes probes for invisible elements wait out their whole timeout, the
    /// way a real page does.
    pub fn wait_out_probes(&self) {
        self.state.lock().unwrap().wait_out_probes = true;
    }

    /// Makes `close` never finish.
    pub fn hang_on_close(&self) {
        self.state.lock().unwrap().hang_on_close = true;
    }

    pub fn fail_navigation(&self, reason: &str) {
        self.state.lock().unwrap().navigation_error = Some(reason.to_string());
    }

    /// Calls the function the page registered as host callback.
    pub fn deliver(&self, payload: impl ToString) {
        self.callback_sender.send(payload.to_string()).unwrap();
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().fills.clone()
    }

    pub fn evaluated(&self) -> Vec<String> {
        self.state.lock().unwrap().evaluated.clone()
    }

    pub fn permissions(&self) -> Vec<(Vec<Permission>, String)> {
        self.state.lock().unwrap().permissions.clone()
    }

    pub fn callbacks(&self) -> Vec<String> {
        self.state.lock().unwrap().callbacks.clone()
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

fn next_answer<T: Clone>(answers: &mut VecDeque<T>) -> Option<T> {
    if answers.len() > 1 {
        answers.pop_front()
    } else {
        answers.front().cloned()
    }
}

#[async_trait]
impl PageDriver for MockDriver {
    async fn navigate(&self, _url: &Url) -> Result<()> {
        if let Some(reason) = &self.state.lock().unwrap().navigation_error {
            bail!("{reason}");
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<Option<Url>> {
        Ok(next_answer(&mut self.state.lock().unwrap().urls))
    }

    async fn is_visible(&self, locator: &Locator, timeout: Duration) -> Result<bool> {
        let (visible, wait_out) = {
            let mut state = self.state.lock().unwrap();
            let visible = state
                .visibility
                .get_mut(&locator.to_string())
                .and_then(|answers| next_answer(answers))
                .unwrap_or(false);
            (visible, state.wait_out_probes)
        };
        if !visible && wait_out {
            tokio::time::sleep(timeout).await;
        }
        Ok(visible)
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let key = locator.to_string();
        if state.failing_clicks.contains(&key) {
            bail!("click on {key} intercepted");
        }
        state.clicks.push(key);
        Ok(())
    }

    async fn fill(&self, locator: &Locator, text: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.values.insert(locator.to_string(), text.to_string());
        state.fills.push((locator.to_string(), text.to_string()));
        Ok(())
    }

    async fn input_value(&self, locator: &Locator) -> Result<String> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .values
            .get(&locator.to_string())
            .cloned()
            .unwrap_or_default())
    }

    async fn attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .attributes
            .get(&(locator.to_string(), name.to_string()))
            .cloned())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let mut state = self.state.lock().unwrap();
        state.evaluated.push(script.to_string());
        let answer = state
            .evaluations
            .iter_mut()
            .find(|(marker, _)| script.contains(marker.as_str()))
            .and_then(|(_, answers)| next_answer(answers));
        Ok(answer.unwrap_or(serde_json::Value::Null))
    }

    async fn register_host_callback(&self, name: &str) -> Result<BoxStream<'static, String>> {
        self.state.lock().unwrap().callbacks.push(name.to_string());
        let Some(receiver) = self.callback_receiver.lock().unwrap().take() else {
            bail!("host callback {name} registered twice");
        };
        Ok(futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|payload| (payload, receiver))
        })
        .boxed())
    }

    async fn grant_permissions(&self, permissions: &[Permission], origin: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .permissions
            .push((permissions.to_vec(), origin.to_string()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.closed += 1;
            state.hang_on_close
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// [`RecordingSink`] that keeps chunks in memory and counts `close` calls.
#[derive(Default)]
pub struct MockSink {
    chunks: Mutex<Vec<RecordingChunk>>,
    closes: Mutex<usize>,
    fail_close: bool,
}

impl MockSink {
    pub fn failing_close() -> Self {
        Self {
            fail_close: true,
            ..Default::default()
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.chunks
            .lock()
            .unwrap()
            .iter()
            .flat_map(|chunk| chunk.bytes.iter().copied())
            .collect()
    }

    pub fn closes(&self) -> usize {
        *self.closes.lock().unwrap()
    }
}

#[async_trait]
impl RecordingSink for MockSink {
    async fn write(&self, chunk: RecordingChunk) -> Result<()> {
        self.chunks.lock().unwrap().push(chunk);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.closes.lock().unwrap() += 1;
        if self.fail_close {
            bail!("disk full");
        }
        Ok(())
    }
}
