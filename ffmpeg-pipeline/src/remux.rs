use std::collections::BTreeMap;

use ffmpeg_next::Rational;
use tokio_util::sync::CancellationToken;

use crate::{
    config::TranscodeConfig,
    demuxer::Demuxer,
    error::{Error, Result},
    muxer::{Muxer, OutputStream},
    pipeline::{StreamStats, TranscodeStats, finish},
    stream::MediaKind,
    task::{Progress, ProgressSender},
};

struct CopiedStream {
    output: OutputStream,
    time_base: Rational,
    stats: StreamStats,
}

/// Copies packets from one container into another without decoding.
pub struct Remuxer {
    config: TranscodeConfig,
    demuxer: Demuxer,
    muxer: Muxer,
    streams: BTreeMap<usize, CopiedStream>,
    packets_read: u64,
    packets_skipped: u64,
    cancel: Option<CancellationToken>,
    progress: Option<ProgressSender>,
}

impl Remuxer {
    pub fn new(config: TranscodeConfig) -> Self {
        Self {
            config,
            demuxer: Demuxer::new(),
            muxer: Muxer::new(),
            streams: BTreeMap::new(),
            packets_read: 0,
            packets_skipped: 0,
            cancel: None,
            progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Open both containers, register a copy of every audio, video and
    /// subtitle stream and write the header.
    pub fn open(&mut self) -> Result<()> {
        let (input, output) = (&self.config.input, &self.config.output);
        self.demuxer.open(&input.location, input.format())?;
        self.muxer.open(&output.location, output.format())?;

        for stream in self.demuxer.streams()? {
            let kind = stream.kind();
            if !matches!(kind, MediaKind::Video | MediaKind::Audio | MediaKind::Subtitle) {
                log::warn!("dropping {} stream {}", kind, stream.index());
                continue;
            }
            let handle = self.muxer.add_stream_copy(stream)?;
            self.streams.insert(
                stream.index(),
                CopiedStream {
                    output: handle,
                    time_base: stream.time_base(),
                    stats: StreamStats {
                        input_index: stream.index(),
                        output_index: Some(handle.index()),
                        kind: kind.to_string(),
                        ..Default::default()
                    },
                },
            );
        }

        let header_options = self.config.header_options()?;
        self.muxer.write_header(&header_options)?;
        for stream in self.streams.values_mut() {
            stream.time_base = self.muxer.stream_time_base(stream.output)?;
        }
        Ok(())
    }

    pub fn run(&mut self) -> Result<TranscodeStats> {
        if !self.muxer.is_header_written() {
            return Err(Error::InvalidState("output header has not been written".into()));
        }
        if let Some(progress) = &self.progress {
            let _ = progress.send(Progress::Started);
        }

        loop {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                return Err(Error::Cancelled);
            }
            let Some(mut packet) = self.demuxer.read_packet()? else {
                break;
            };
            self.packets_read += 1;

            let Some(stream) = self.streams.get_mut(&packet.stream_index()) else {
                self.packets_skipped += 1;
                continue;
            };
            stream.stats.packets_read += 1;

            packet.rescale_ts(stream.time_base);
            packet.set_stream_index(stream.output.index());
            let (pts, size) = (packet.pts(), packet.size());
            self.muxer.write_interleaved(packet)?;
            stream.stats.packets_written += 1;

            if let Some(progress) = &self.progress {
                let _ = progress.send(Progress::Packet {
                    output_index: stream.output.index(),
                    pts,
                    size,
                });
            }
        }

        self.muxer.write_trailer()?;
        let stats = self.stats();
        if let Some(progress) = &self.progress {
            let _ = progress.send(Progress::Finished(stats.clone()));
        }
        Ok(stats)
    }

    pub fn stats(&self) -> TranscodeStats {
        let streams: Vec<StreamStats> = self.streams.values().map(|s| s.stats.clone()).collect();
        TranscodeStats {
            packets_read: self.packets_read,
            packets_skipped: self.packets_skipped,
            packets_written: streams.iter().map(|s| s.packets_written).sum(),
            streams,
        }
    }

    pub fn close(&mut self) -> Result<()> {
        self.demuxer.close();
        self.muxer.close()
    }

    pub fn execute(&mut self) -> Result<TranscodeStats> {
        let result = self.open().and_then(|_| self.run());
        finish(result, self.close())
    }
}

/// Copy every audio, video and subtitle stream of `config.input` into
/// `config.output` without re-encoding.
pub fn remux(config: &TranscodeConfig) -> Result<TranscodeStats> {
    config.validate()?;
    Remuxer::new(config.clone()).execute()
}
