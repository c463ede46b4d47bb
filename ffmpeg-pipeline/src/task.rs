use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::{
    config::TranscodeConfig,
    error::{Error, Result},
    pipeline::{TranscodeStats, Transcoder},
    remux::Remuxer,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Progress {
    Started,
    Packet {
        output_index: usize,
        pts: Option<i64>,
        size: usize,
    },
    Finished(TranscodeStats),
}

pub type ProgressSender = broadcast::Sender<Progress>;
pub type ProgressReceiver = broadcast::Receiver<Progress>;
pub type ProgressStream = Pin<Box<dyn Stream<Item = Progress> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Transcode,
    Remux,
}

/// Runs one pipeline on the blocking pool.
pub struct TranscodeTask {
    cancel: CancellationToken,
    progress: ProgressSender,
    handle: Option<JoinHandle<Result<TranscodeStats>>>,
}

impl Default for TranscodeTask {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscodeTask {
    pub fn new() -> Self {
        let cancel = CancellationToken::new();
        let (sender, _) = broadcast::channel(1024);

        Self {
            cancel,
            progress: sender,
            handle: None,
        }
    }

    pub fn start(&mut self, config: TranscodeConfig, mode: Mode) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::InvalidState("task already started".into()));
        }
        config.validate()?;

        let cancel = self.cancel.clone();
        let progress = self.progress.clone();
        self.handle = Some(tokio::task::spawn_blocking(move || {
            log::info!(
                "{:?} {} -> {} started",
                mode,
                config.input.location,
                config.output.location
            );
            let result = match mode {
                Mode::Transcode => Transcoder::new(config)
                    .with_cancel(cancel)
                    .with_progress(progress)
                    .execute(),
                Mode::Remux => Remuxer::new(config)
                    .with_cancel(cancel)
                    .with_progress(progress)
                    .execute(),
            };
            if let Err(e) = &result {
                log::error!("{:?} failed: {}", mode, e);
            }
            result
        }));
        Ok(())
    }

    pub fn subscribe(&self) -> ProgressReceiver {
        self.progress.subscribe()
    }

    /// Progress events as a stream; events dropped by a lagging receiver
    /// are skipped.
    pub fn progress(&self) -> ProgressStream {
        let stream = BroadcastStream::new(self.subscribe()).filter_map(|r| async move {
            match r {
                Ok(event) => Some(event),
                Err(e) => {
                    log::debug!("progress receiver lagged: {}", e);
                    None
                }
            }
        });
        Box::pin(stream)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the pipeline to finish and return its outcome.
    pub async fn wait(&mut self) -> Result<TranscodeStats> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| Error::InvalidState("task not started".into()))?;
        handle
            .await
            .map_err(|e| Error::InvalidState(format!("transcode task panicked: {}", e)))?
    }
}

impl Drop for TranscodeTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
