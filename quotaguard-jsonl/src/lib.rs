//! JSONL event recorder for `quotaguard`. Writes one event per line.
//! Every append is flushed and synced before `record` returns; bring your own path.

use async_trait::async_trait;
use quotaguard::audit::{EventFilter, EventId, EventRecorder, RateLimitEvent, RecorderError};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct JsonlEventRecorder {
    path: PathBuf,
    // Serializes appends so lines from concurrent writers never interleave.
    write_lock: Arc<Mutex<()>>,
}

impl JsonlEventRecorder {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into(), write_lock: Arc::new(Mutex::new(())) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, event: &RateLimitEvent) -> Result<(), RecorderError> {
        let line = serde_json::to_string(event).map_err(|e| RecorderError::Encode(e.to_string()))? + "\n";
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;
        let len = self.drop_torn_tail(&mut file).await?;
        if let Err(err) = write_line(&mut file, line.as_bytes()).await {
            // Leave no partial line behind for the next append to glue onto.
            if let Err(trunc) = file.set_len(len).await {
                warn!(target: "quotaguard::events", path = %self.path.display(), error = %trunc, "could not truncate partial line");
            }
            return Err(err.into());
        }
        file.sync_data().await?;
        Ok(())
    }

    // Length of the file once a trailing line without its newline, left by an
    // interrupted append, has been cut off.
    async fn drop_torn_tail(&self, file: &mut File) -> Result<u64, RecorderError> {
        let len = file.metadata().await?.len();
        if len == 0 {
            return Ok(0);
        }
        file.seek(SeekFrom::End(-1)).await?;
        if file.read_u8().await? == b'\n' {
            return Ok(len);
        }
        let contents = tokio::fs::read(&self.path).await?;
        let keep = contents.iter().rposition(|b| *b == b'\n').map_or(0, |i| i as u64 + 1);
        file.set_len(keep).await?;
        warn!(
            target: "quotaguard::events",
            path = %self.path.display(),
            dropped_bytes = len - keep,
            "dropped incomplete trailing line"
        );
        Ok(keep)
    }

    async fn read_all(&self) -> Result<Vec<RateLimitEvent>, RecorderError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        // A last line without its newline may still be mid-write.
        let torn_tail = !contents.is_empty() && !contents.ends_with('\n');
        let last = contents.lines().count().saturating_sub(1);
        let mut events = Vec::new();
        for (n, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(event) => events.push(event),
                Err(_) if torn_tail && n == last => {
                    debug!(target: "quotaguard::events", path = %self.path.display(), "skipping incomplete trailing line");
                }
                Err(e) => return Err(RecorderError::Encode(format!("line {}: {e}", n + 1))),
            }
        }
        Ok(events)
    }
}

async fn write_line(file: &mut File, line: &[u8]) -> io::Result<()> {
    file.write_all(line).await?;
    file.flush().await
}

#[async_trait]
impl EventRecorder for JsonlEventRecorder {
    async fn record(&self, event: RateLimitEvent) -> Result<EventId, RecorderError> {
        self.append(&event).await?;
        debug!(target: "quotaguard::events", path = %self.path.display(), event_id = %event.event_id, "event appended");
        Ok(event.event_id)
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<RateLimitEvent>, RecorderError> {
        let events = self.read_all().await?;
        Ok(filter.apply(events.iter()))
    }
}

impl tower_service::Service<RateLimitEvent> for JsonlEventRecorder {
    type Response = EventId;
    type Error = RecorderError;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<EventId, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: RateLimitEvent) -> Self::Future {
        let recorder = self.clone();
        Box::pin(async move { recorder.record(event).await })
    }
}
