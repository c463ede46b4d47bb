use std::collections::BTreeMap;

use ffmpeg_next::Rational;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    config::TranscodeConfig,
    decoder::Decoder,
    demuxer::Demuxer,
    encoder::{Encoder, EncoderOptions},
    error::{Error, Result},
    muxer::{Muxer, OutputStream},
    packet::Packet,
    stream::MediaKind,
    task::{Progress, ProgressSender},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub input_index: usize,
    pub output_index: Option<usize>,
    pub kind: String,
    pub packets_read: u64,
    pub frames_decoded: u64,
    pub frames_encoded: u64,
    pub packets_written: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeStats {
    pub packets_read: u64,
    /// Packets of streams that were not selected for output.
    pub packets_skipped: u64,
    pub packets_written: u64,
    pub streams: Vec<StreamStats>,
}

/// Per input stream state: its decoder, the encoder feeding the matching
/// output stream, and that stream's time base once the header is written.
pub struct StreamContext {
    decoder: Decoder,
    encoder: Option<Encoder>,
    output: Option<OutputStream>,
    output_time_base: Rational,
    packets_read: u64,
    packets_written: u64,
}

impl StreamContext {
    fn new(decoder: Decoder) -> Self {
        Self {
            decoder,
            encoder: None,
            output: None,
            output_time_base: Rational::new(0, 1),
            packets_read: 0,
            packets_written: 0,
        }
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn encoder(&self) -> Option<&Encoder> {
        self.encoder.as_ref()
    }

    pub fn output(&self) -> Option<OutputStream> {
        self.output
    }

    pub fn output_time_base(&self) -> Rational {
        self.output_time_base
    }

    fn stats(&self) -> StreamStats {
        StreamStats {
            input_index: self.decoder.stream().index(),
            output_index: self.output.map(|o| o.index()),
            kind: self.decoder.stream().kind().to_string(),
            packets_read: self.packets_read,
            frames_decoded: self.decoder.frames_decoded(),
            frames_encoded: self.encoder.as_ref().map_or(0, |e| e.frames_encoded()),
            packets_written: self.packets_written,
        }
    }

    /// Split into the decoder, the encoder, and a sink that muxes the
    /// encoder's packets into this stream's output.
    fn stages<'a>(
        &'a mut self,
        muxer: &'a mut Muxer,
        progress: Option<&'a ProgressSender>,
    ) -> Result<(
        &'a mut Decoder,
        &'a mut Encoder,
        impl FnMut(Packet) -> Result<()> + 'a,
    )> {
        let Self {
            decoder,
            encoder,
            output,
            output_time_base,
            packets_written,
            ..
        } = self;
        let encoder = encoder.as_mut().ok_or(Error::NotOpen("encoder"))?;
        let output = output.ok_or(Error::NotOpen("output stream"))?;
        let time_base = *output_time_base;
        let write = move |packet: Packet| -> Result<()> {
            mux_packet(muxer, progress, packet, output, time_base)?;
            *packets_written += 1;
            Ok(())
        };
        Ok((decoder, encoder, write))
    }

    /// Decode one packet and push everything it yields through the encoder
    /// into the muxer.
    fn transcode_packet(
        &mut self,
        muxer: &mut Muxer,
        progress: Option<&ProgressSender>,
        packet: &mut Packet,
    ) -> Result<()> {
        let (decoder, encoder, mut write) = self.stages(muxer, progress)?;
        decoder.decode(packet, |mut frame| {
            encoder.encode(&mut frame, &mut write)?;
            Ok(())
        })?;
        Ok(())
    }

    /// Flush the decoder into the encoder, then the encoder into the muxer.
    fn flush(&mut self, muxer: &mut Muxer, progress: Option<&ProgressSender>) -> Result<()> {
        let index = self.decoder.stream().index();
        let (decoder, encoder, mut write) = self.stages(muxer, progress)?;

        let frames = decoder.flush(|mut frame| {
            encoder.encode(&mut frame, &mut write)?;
            Ok(())
        })?;
        log::debug!("stream {}: {} frames left in decoder", index, frames);

        if encoder.needs_flush() {
            let packets = encoder.flush(&mut write)?;
            log::debug!("stream {}: {} packets left in encoder", index, packets);
        } else {
            log::debug!(
                "stream {}: encoder {} has no delay, skipping flush",
                index,
                encoder.codec_name()
            );
        }
        Ok(())
    }
}

/// Move an encoded packet into output numbering and time base and queue it
/// for interleaved writing.
fn mux_packet(
    muxer: &mut Muxer,
    progress: Option<&ProgressSender>,
    mut packet: Packet,
    output: OutputStream,
    output_time_base: Rational,
) -> Result<()> {
    packet.rescale_ts(output_time_base);
    packet.set_stream_index(output.index());
    let (pts, size) = (packet.pts(), packet.size());
    muxer.write_interleaved(packet)?;
    if let Some(progress) = progress {
        let _ = progress.send(Progress::Packet {
            output_index: output.index(),
            pts,
            size,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Transcode,
    Skip,
}

/// Decide what happens to an input stream of `kind`. Audio and video are
/// transcoded; streams of unknown kind fail the run unless accepted.
pub fn select_stream(kind: MediaKind, index: usize, accept_unknown: bool) -> Result<Selection> {
    match kind {
        MediaKind::Video | MediaKind::Audio => Ok(Selection::Transcode),
        MediaKind::Unknown if !accept_unknown => Err(Error::UnsupportedStream {
            index,
            kind: kind.to_string(),
        }),
        MediaKind::Subtitle | MediaKind::Data | MediaKind::Attachment | MediaKind::Unknown => {
            Ok(Selection::Skip)
        }
    }
}

/// Decode/encode pipeline from one input container to one output container.
pub struct Transcoder {
    config: TranscodeConfig,
    demuxer: Demuxer,
    muxer: Muxer,
    streams: BTreeMap<usize, StreamContext>,
    packets_read: u64,
    packets_skipped: u64,
    cancel: Option<CancellationToken>,
    progress: Option<ProgressSender>,
}

impl Transcoder {
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

    /// Stop between packets once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn streams(&self) -> &BTreeMap<usize, StreamContext> {
        &self.streams
    }

    /// Open the input and a decoder for every audio and video stream.
    pub fn open_input(&mut self) -> Result<()> {
        let input = &self.config.input;
        self.demuxer.open(&input.location, input.format())?;

        for stream in self.demuxer.streams()? {
            let index = stream.index();
            match select_stream(stream.kind(), index, self.config.accept_unknown_streams)? {
                Selection::Transcode => {
                    let decoder = Decoder::open(stream)?;
                    self.streams.insert(index, StreamContext::new(decoder));
                }
                Selection::Skip => {
                    log::warn!("skipping {} stream {}", stream.kind(), index);
                }
            }
        }

        if self.streams.is_empty() {
            return Err(Error::open(
                &input.location,
                "no audio or video streams to transcode",
            ));
        }
        Ok(())
    }

    /// Open the output, register one stream and encoder per decoded stream,
    /// and write the container header.
    pub fn open_output(&mut self) -> Result<()> {
        if !self.demuxer.is_open() {
            return Err(Error::NotOpen("demuxer"));
        }
        let output = &self.config.output;
        self.muxer.open(&output.location, output.format())?;
        let global_header = self.muxer.requires_global_header()?;

        for ctx in self.streams.values_mut() {
            let handle = self.muxer.add_stream(ctx.decoder.stream())?;
            let hints = ctx.decoder.encoder_hints()?;
            let options = EncoderOptions {
                codec: self.config.codec_for(hints.kind).map(str::to_string),
                global_header,
                ..Default::default()
            };
            let encoder = Encoder::open(&hints, &options)?;
            self.muxer
                .set_stream_parameters(handle, encoder.parameters()?, encoder.time_base())?;
            ctx.encoder = Some(encoder);
            ctx.output = Some(handle);
        }

        let header_options = self.config.header_options()?;
        self.muxer.write_header(&header_options)?;

        for (index, ctx) in self.streams.iter_mut() {
            if let Some(handle) = ctx.output {
                ctx.output_time_base = self.muxer.stream_time_base(handle)?;
                log::info!(
                    "input stream {} -> output stream {}, time_base={}",
                    index,
                    handle.index(),
                    ctx.output_time_base
                );
            }
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    /// Read, decode, encode and mux until the input ends, then flush every
    /// stream and write the trailer.
    pub fn run(&mut self) -> Result<TranscodeStats> {
        if !self.muxer.is_header_written() {
            return Err(Error::InvalidState("output header has not been written".into()));
        }
        let progress = self.progress.clone();
        if let Some(progress) = &progress {
            let _ = progress.send(Progress::Started);
        }

        loop {
            if self.is_cancelled() {
                log::info!("transcode of {} cancelled", self.config.input.location);
                return Err(Error::Cancelled);
            }
            let Some(mut packet) = self.demuxer.read_packet()? else {
                break;
            };
            self.packets_read += 1;

            let Some(ctx) = self.streams.get_mut(&packet.stream_index()) else {
                self.packets_skipped += 1;
                continue;
            };
            ctx.packets_read += 1;
            packet.rescale_ts(ctx.decoder.time_base());
            ctx.transcode_packet(&mut self.muxer, progress.as_ref(), &mut packet)?;
        }

        log::debug!("end of input after {} packets, flushing", self.packets_read);
        for ctx in self.streams.values_mut() {
            ctx.flush(&mut self.muxer, progress.as_ref())?;
        }
        self.muxer.write_trailer()?;

        let stats = self.stats();
        if let Some(progress) = &progress {
            let _ = progress.send(Progress::Finished(stats.clone()));
        }
        Ok(stats)
    }

    pub fn stats(&self) -> TranscodeStats {
        let streams: Vec<StreamStats> = self.streams.values().map(StreamContext::stats).collect();
        TranscodeStats {
            packets_read: self.packets_read,
            packets_skipped: self.packets_skipped,
            packets_written: streams.iter().map(|s| s.packets_written).sum(),
            streams,
        }
    }

    /// Close encoders, decoders, the demuxer and the muxer, in that order.
    /// Every resource is closed even if an earlier one fails.
    pub fn close(&mut self) -> Result<()> {
        for ctx in self.streams.values_mut() {
            if let Some(encoder) = ctx.encoder.as_mut() {
                encoder.close();
            }
        }
        for ctx in self.streams.values_mut() {
            ctx.decoder.close();
        }
        self.demuxer.close();
        self.muxer.close()
    }

    /// Open, run and close, reporting the first error encountered.
    pub fn execute(&mut self) -> Result<TranscodeStats> {
        let result = self
            .open_input()
            .and_then(|_| self.open_output())
            .and_then(|_| self.run());
        finish(result, self.close())
    }
}

/// Keep the first error; a teardown failure after a failed run is only logged.
pub(crate) fn finish<T>(result: Result<T>, closed: Result<()>) -> Result<T> {
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Err(close_err)) => {
            log::warn!("teardown after failure also failed: {}", close_err);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
    }
}

/// Transcode `config.input` into `config.output`.
pub fn transcode(config: &TranscodeConfig) -> Result<TranscodeStats> {
    config.validate()?;
    Transcoder::new(config.clone()).execute()
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
