//! Append-only storage for the recording produced inside the page.

use async_trait::async_trait;
use base64::{
    engine::general_purpose::STANDARD as BASE64,
    Engine as _,
};
use eyre::{
    bail,
    eyre,
    Context as _,
    Result,
};
use futures::{
    stream::BoxStream,
    StreamExt as _,
};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    path::{
        Path,
        PathBuf,
    },
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
    },
};
use tokio::{
    fs::File,
    io::{
        AsyncWriteExt as _,
        BufWriter,
    },
    sync::Mutex,
    task::JoinHandle,
};

/// One piece of the recording, in the order it arrived at the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingChunk {
    /// Position in arrival order, starting at zero.
    pub arrival: u64,
    pub bytes: Vec<u8>,
}

/// Bytes of a chunk as the page hands them over.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ChunkPayload {
    Base64(String),
    Bytes(Vec<u8>),
    /// Typed arrays serialized as plain objects: `{"0": 26, "1": 69, ..}`.
    Indexed(BTreeMap<String, u8>),
}

impl ChunkPayload {
    /// Normalizes the payload into one contiguous byte sequence.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            ChunkPayload::Base64(encoded) => BASE64.decode(encoded).context("chunk is not valid base64"),
            ChunkPayload::Bytes(bytes) => Ok(bytes),
            ChunkPayload::Indexed(map) => {
                let mut indexed = map
                    .into_iter()
                    .map(|(index, byte)| {
                        index
                            .parse::<usize>()
                            .map(|index| (index, byte))
                            .map_err(|_| eyre!("chunk index {index:?} is not a number"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                indexed.sort_unstable_by_key(|(index, _)| *index);
                Ok(indexed.into_iter().map(|(_, byte)| byte).collect())
            }
        }
    }
}

/// What the capture script passes to the host callback.
#[derive(Debug, Deserialize)]
pub struct ChunkMessage {
    /// Sequence number assigned in the page. Only used to spot gaps.
    #[serde(default)]
    pub seq: Option<u64>,
    pub data: ChunkPayload,
}

impl ChunkMessage {
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("malformed chunk message")
    }
}

#[async_trait]
pub trait RecordingSink: Send + Sync {
    /// Appends the chunk after everything written before.
    async fn write(&self, chunk: RecordingChunk) -> Result<()>;

    /// Makes every accepted write durable and releases the artifact. Calling
    /// it again is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Writes the recording into a single file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
    written: AtomicU64,
}

impl FileSink {
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err_with(|| format!("Failed to create recordings directory {parent:?}"))?;
        }
        let file = File::create(&path)
            .await
            .wrap_err_with(|| format!("Failed to create recording file {path:?}"))?;

        info!(?path, "Opened recording file");

        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
            written: AtomicU64::new(0),
        })
    }

    pub fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RecordingSink for FileSink {
    async fn write(&self, chunk: RecordingChunk) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            bail!("recording file {:?} is already closed", self.path);
        };
        writer
            .write_all(&chunk.bytes)
            .await
            .wrap_err_with(|| format!("Failed to append chunk {} to {:?}", chunk.arrival, self.path))?;

        let total = self.written.fetch_add(chunk.bytes.len() as u64, Ordering::Relaxed) + chunk.bytes.len() as u64;
        trace!(arrival = chunk.arrival, len = chunk.bytes.len(), total, "Saved chunk");

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(mut writer) = self.writer.lock().await.take() else {
            debug!(path = ?self.path, "Recording file already closed");
            return Ok(());
        };
        writer.flush().await.context("Failed to flush recording file")?;
        writer
            .get_mut()
            .sync_all()
            .await
            .context("Failed to sync recording file")?;

        info!(path = ?self.path, bytes = self.bytes_written(), "Closed recording file");

        Ok(())
    }
}

/// Feeds every payload from the page into the sink, one at a time and in
/// arrival order. Ends when the page side of the stream goes away.
pub fn spawn_chunk_pump(mut payloads: BoxStream<'static, String>, sink: Arc<dyn RecordingSink>) -> JoinHandle<()> {
    tokio::task::spawn(async move {
        let mut arrival = 0;
        let mut expected_seq = None;

        while let Some(raw) = payloads.next().await {
            let message = match ChunkMessage::decode(&raw) {
                Ok(message) => message,
                Err(err) => {
                    warn!(arrival, "Dropping chunk: {err:#}");
                    continue;
                }
            };

            if let (Some(expected), Some(seq)) = (expected_seq, message.seq) {
                if seq != expected {
                    warn!(expected, seq, "Chunk sequence gap");
                }
            }
            expected_seq = message.seq.map(|seq| seq + 1);

            let bytes = match message.data.into_bytes() {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(arrival, "Dropping chunk: {err:#}");
                    continue;
                }
            };

            if let Err(err) = sink.write(RecordingChunk { arrival, bytes }).await {
                error!(arrival, "Failed to write chunk: {err:#}");
            }
            arrival += 1;
        }

        debug!(chunks = arrival, "Chunk delivery ended");
    })
}
