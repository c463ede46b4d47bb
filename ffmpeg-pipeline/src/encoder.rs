use std::collections::{BTreeMap, VecDeque};

use ffmpeg_next::{
    Dictionary, Rational,
    codec::{Capabilities, Parameters, flag::Flags},
    format::{Pixel, Sample},
    picture,
};

use crate::{
    error::{Error, Result},
    frame::{Frame, RawFrame},
    packet::Packet,
    scaler::Scaler,
    stage::{self, CodecStage},
    stream::MediaKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoHints {
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: Rational,
    pub format: Pixel,
    pub frame_rate: Rational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioHints {
    pub sample_rate: u32,
    pub format: Sample,
    pub channels: u32,
    /// Native channel mask, when the source layout has one.
    pub channel_mask: Option<u64>,
}

/// Source-side media parameters the encoder derives its settings from.
#[derive(Debug, Clone)]
pub struct EncoderHints {
    pub stream_index: usize,
    pub kind: MediaKind,
    pub codec_id: ffmpeg_next::codec::Id,
    pub video: Option<VideoHints>,
    pub audio: Option<AudioHints>,
}

#[derive(Debug, Clone, Default)]
pub struct EncoderOptions {
    /// Encoder name (e.g. "libx264"); `None` re-encodes to the source codec.
    pub codec: Option<String>,
    /// Set when the output container wants codec headers out of band.
    pub global_header: bool,
    /// Private codec options passed when the encoder is opened.
    pub codec_options: BTreeMap<String, String>,
}

pub enum EncoderType {
    Video(ffmpeg_next::codec::encoder::Video),
    Audio(ffmpeg_next::codec::encoder::Audio),
}

impl EncoderType {
    fn context(&self) -> &ffmpeg_next::codec::Context {
        match self {
            EncoderType::Video(encoder) => encoder,
            EncoderType::Audio(encoder) => encoder,
        }
    }

    fn send_frame(&mut self, frame: &RawFrame) -> std::result::Result<(), ffmpeg_next::Error> {
        match (self, frame) {
            (EncoderType::Video(encoder), RawFrame::Video(frame)) => encoder.send_frame(frame),
            (EncoderType::Audio(encoder), RawFrame::Audio(frame)) => encoder.send_frame(frame),
            _ => Err(ffmpeg_next::Error::InvalidData),
        }
    }

    fn send_eof(&mut self) -> std::result::Result<(), ffmpeg_next::Error> {
        match self {
            EncoderType::Video(encoder) => encoder.send_eof(),
            EncoderType::Audio(encoder) => encoder.send_eof(),
        }
    }

    fn receive_packet(
        &mut self,
        packet: &mut ffmpeg_next::Packet,
    ) -> std::result::Result<(), ffmpeg_next::Error> {
        match self {
            EncoderType::Video(encoder) => encoder.receive_packet(packet),
            EncoderType::Audio(encoder) => encoder.receive_packet(packet),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Flushing,
    Drained,
    Closed,
}

/// Re-encodes the frames of one stream.
pub struct Encoder {
    stream_index: usize,
    codec: ffmpeg_next::Codec,
    inner: Option<EncoderType>,
    time_base: Rational,
    scaler: Option<Scaler>,
    last_pts: Option<i64>,
    pending: VecDeque<Packet>,
    state: State,
    frames: u64,
    packets: u64,
}

impl Encoder {
    pub fn open(hints: &EncoderHints, options: &EncoderOptions) -> Result<Self> {
        let codec = match &options.codec {
            Some(name) => ffmpeg_next::encoder::find_by_name(name)
                .ok_or_else(|| Error::UnsupportedCodec(name.clone()))?,
            None => ffmpeg_next::encoder::find(hints.codec_id)
                .ok_or_else(|| Error::UnsupportedCodec(format!("{:?}", hints.codec_id).to_lowercase()))?,
        };

        let index = hints.stream_index;
        let mut dict = Dictionary::new();
        for (key, value) in &options.codec_options {
            dict.set(key, value);
        }
        let encoder_ctx = ffmpeg_next::codec::Context::new_with_codec(codec);

        let inner = match (hints.kind, hints.video, hints.audio) {
            (MediaKind::Video, Some(video), _) => {
                let mut encoder = encoder_ctx
                    .encoder()
                    .video()
                    .map_err(|e| encode_error(index, e))?;

                let format = codec
                    .video()
                    .ok()
                    .and_then(|v| v.formats())
                    .and_then(|mut formats| formats.next())
                    .unwrap_or(video.format);

                encoder.set_width(video.width);
                encoder.set_height(video.height);
                encoder.set_aspect_ratio(video.aspect_ratio);
                encoder.set_format(format);
                encoder.set_frame_rate(Some(video.frame_rate));
                encoder.set_time_base(video.frame_rate.invert());
                if options.global_header {
                    encoder.set_flags(Flags::GLOBAL_HEADER);
                }

                let encoder = encoder
                    .open_as_with(codec, dict)
                    .map_err(|e| encode_error(index, e))?;
                EncoderType::Video(encoder)
            }
            (MediaKind::Audio, _, Some(audio)) => {
                let mut encoder = encoder_ctx
                    .encoder()
                    .audio()
                    .map_err(|e| encode_error(index, e))?;

                let format = codec
                    .audio()
                    .ok()
                    .and_then(|a| a.formats())
                    .and_then(|mut formats| formats.next())
                    .unwrap_or(audio.format);

                encoder.set_rate(audio.sample_rate as i32);
                encoder.set_format(format);
                encoder.set_time_base(Rational::new(1, audio.sample_rate as i32));
                unsafe {
                    let layout = &mut (*encoder.as_mut_ptr()).ch_layout;
                    let from_mask = match audio.channel_mask {
                        Some(mask) => ffmpeg_next::ffi::av_channel_layout_from_mask(layout, mask),
                        None => -1,
                    };
                    if from_mask < 0 {
                        ffmpeg_next::ffi::av_channel_layout_default(layout, audio.channels as i32);
                    }
                }
                if options.global_header {
                    encoder.set_flags(Flags::GLOBAL_HEADER);
                }

                let encoder = encoder
                    .open_as_with(codec, dict)
                    .map_err(|e| encode_error(index, e))?;
                EncoderType::Audio(encoder)
            }
            (kind, _, _) => {
                return Err(Error::UnsupportedStream {
                    index,
                    kind: kind.to_string(),
                });
            }
        };

        let time_base: Rational = unsafe { (*inner.context().as_ptr()).time_base.into() };
        log::info!(
            "opened {} encoder {} for stream {}, time_base={}",
            hints.kind,
            codec.name(),
            index,
            time_base
        );

        Ok(Self {
            stream_index: index,
            codec,
            inner: Some(inner),
            time_base,
            scaler: None,
            last_pts: None,
            pending: VecDeque::new(),
            state: State::Open,
            frames: 0,
            packets: 0,
        })
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn codec_name(&self) -> &str {
        self.codec.name()
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames
    }

    pub fn packets_produced(&self) -> u64 {
        self.packets
    }

    /// Whether the codec buffers input. Encoders without delay have
    /// nothing left to flush once every frame has been drained.
    pub fn needs_flush(&self) -> bool {
        self.codec.capabilities().contains(Capabilities::DELAY)
    }

    /// Codec parameters for the output stream, valid once the encoder is open.
    pub fn parameters(&self) -> Result<Parameters> {
        let inner = self.inner.as_ref().ok_or(Error::NotOpen("encoder"))?;
        let mut parameters = Parameters::new();
        let ret = unsafe {
            ffmpeg_next::ffi::avcodec_parameters_from_context(
                parameters.as_mut_ptr(),
                inner.context().as_ptr(),
            )
        };
        if ret < 0 {
            return Err(encode_error(self.stream_index, ffmpeg_next::Error::from(ret)));
        }
        Ok(parameters)
    }

    fn inner_mut(&mut self) -> Result<&mut EncoderType> {
        self.inner.as_mut().ok_or(Error::NotOpen("encoder"))
    }

    /// Bring `frame` into the shape and time base the encoder was opened with.
    fn prepare(&mut self, frame: &mut Frame) -> Result<()> {
        frame.rescale_ts(self.time_base);
        let index = self.stream_index;
        let kind = frame.kind();

        let inner = self.inner.as_ref().ok_or(Error::NotOpen("encoder"))?;
        match (inner, frame.get_mut()) {
            (EncoderType::Video(encoder), RawFrame::Video(raw)) => {
                let target = (encoder.format(), encoder.width(), encoder.height());
                if (raw.format(), raw.width(), raw.height()) != target {
                    let rebuild = self.scaler.as_ref().is_none_or(|s| !s.accepts(raw));
                    if rebuild {
                        self.scaler = Some(Scaler::new(
                            index,
                            (raw.format(), raw.width(), raw.height()),
                            target,
                        )?);
                    }
                    if let Some(scaler) = self.scaler.as_mut() {
                        *raw = scaler.run(raw)?;
                    }
                }
                raw.set_kind(picture::Type::None);

                // last_pts only moves once the encoder accepts the frame, so a
                // frame resent after NotReady keeps the pts it was given
                if let (Some(pts), Some(last)) = (raw.pts(), self.last_pts) {
                    if pts <= last {
                        log::trace!("stream {}: bumping pts {} to {}", index, pts, last + 1);
                        raw.set_pts(Some(last + 1));
                    }
                }
            }
            (EncoderType::Audio(encoder), RawFrame::Audio(raw)) => {
                if raw.format() != encoder.format() {
                    log::error!(
                        "stream {}: audio frame format {:?} does not match encoder format {:?}",
                        index,
                        raw.format(),
                        encoder.format()
                    );
                    return Err(encode_error(index, ffmpeg_next::Error::InvalidData));
                }
            }
            _ => {
                return Err(Error::InvalidState(format!(
                    "{} frame sent to encoder of stream {}",
                    kind,
                    index
                )));
            }
        }
        Ok(())
    }

    /// Submit one frame. The frame is rewritten in place into the encoder's
    /// time base and pixel format before submission.
    pub fn send(&mut self, frame: &mut Frame) -> Result<()> {
        match self.state {
            State::Closed => return Err(Error::NotOpen("encoder")),
            State::Flushing | State::Drained => return Err(Error::EndOfStream),
            State::Open => {}
        }
        self.prepare(frame)?;

        let index = self.stream_index;
        match self.inner_mut()?.send_frame(frame.raw()) {
            Ok(()) => {
                if frame.as_video().is_some() && frame.pts().is_some() {
                    self.last_pts = frame.pts();
                }
                self.frames += 1;
                Ok(())
            }
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Err(Error::NotReady)
            }
            Err(ffmpeg_next::Error::Eof) => Err(Error::EndOfStream),
            Err(err) => Err(encode_error(index, err)),
        }
    }

    /// Signal end of input. Further calls are no-ops.
    pub fn send_eof(&mut self) -> Result<()> {
        match self.state {
            State::Closed => Err(Error::NotOpen("encoder")),
            State::Flushing | State::Drained => Ok(()),
            State::Open => {
                let index = self.stream_index;
                match self.inner_mut()?.send_eof() {
                    Ok(()) | Err(ffmpeg_next::Error::Eof) => {}
                    Err(err) => return Err(encode_error(index, err)),
                }
                log::debug!("encoder for stream {} flushing", index);
                self.state = State::Flushing;
                Ok(())
            }
        }
    }

    /// Next encoded packet, in the encoder time base and tagged with the
    /// input stream index.
    pub fn receive(&mut self) -> Result<Option<Packet>> {
        match self.state {
            State::Closed => return Err(Error::NotOpen("encoder")),
            State::Drained => return Ok(None),
            State::Open | State::Flushing => {}
        }
        let index = self.stream_index;
        let mut packet = ffmpeg_next::Packet::empty();
        match self.inner_mut()?.receive_packet(&mut packet) {
            Ok(()) => {
                packet.set_stream(index);
                if packet.duration() == 0 && matches!(self.inner, Some(EncoderType::Video(_))) {
                    packet.set_duration(1);
                }
                self.packets += 1;
                log::trace!(
                    "encoded packet stream={} pts={:?} dts={:?} size={}",
                    index,
                    packet.pts(),
                    packet.dts(),
                    packet.size()
                );
                Ok(Some(Packet::from((packet, self.time_base))))
            }
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(None)
            }
            Err(ffmpeg_next::Error::Eof) => {
                log::debug!(
                    "encoder for stream {} drained after {} packets",
                    index,
                    self.packets
                );
                self.state = State::Drained;
                Ok(None)
            }
            Err(err) => Err(encode_error(index, err)),
        }
    }

    /// Send `frame` and hand every packet it yields to `on_packet`.
    pub fn encode<F>(&mut self, frame: &mut Frame, on_packet: F) -> Result<usize>
    where
        F: FnMut(Packet) -> Result<()>,
    {
        stage::push(self, frame, on_packet)
    }

    /// Signal end of input and hand every remaining packet to `on_packet`.
    pub fn flush<F>(&mut self, on_packet: F) -> Result<usize>
    where
        F: FnMut(Packet) -> Result<()>,
    {
        stage::flush(self, on_packet)
    }

    /// Single-shot form: submit one frame, or `None` to request a flush
    /// pass, and return at most one packet. Packets beyond the first are
    /// kept and returned by later calls, so callers flush by calling
    /// `encode_frame(None)` until it yields `None`.
    pub fn encode_frame(&mut self, frame: Option<&mut Frame>) -> Result<Option<Packet>> {
        let mut produced = Vec::new();
        let collect = |packet: Packet| -> Result<()> {
            produced.push(packet);
            Ok(())
        };
        match frame {
            Some(frame) => stage::push(self, frame, collect)?,
            None => stage::flush(self, collect)?,
        };
        self.pending.extend(produced);
        Ok(self.pending.pop_front())
    }

    /// Release encode state. Idempotent.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            log::debug!("closed encoder for stream {}", self.stream_index);
        }
        self.scaler = None;
        self.pending.clear();
        self.state = State::Closed;
    }
}

impl CodecStage for Encoder {
    type Input = Frame;
    type Output = Packet;

    fn send(&mut self, input: &mut Frame) -> Result<()> {
        Encoder::send(self, input)
    }

    fn send_eof(&mut self) -> Result<()> {
        Encoder::send_eof(self)
    }

    fn receive(&mut self) -> Result<Option<Packet>> {
        Encoder::receive(self)
    }

    fn stream_index(&self) -> usize {
        self.stream_index
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        self.close();
    }
}

fn encode_error(stream_index: usize, source: ffmpeg_next::Error) -> Error {
    Error::Encode {
        stream_index,
        source,
    }
}

#[cfg(test)]
mod tests {
    use ffmpeg_next::frame::Video;

    use super::*;
    use crate::fixtures::{self, FRAME_RATE, HEIGHT, WIDTH};

    fn open_video() -> anyhow::Result<Encoder> {
        crate::init()?;
        Ok(Encoder::open(&fixtures::video_hints(), &EncoderOptions::default())?)
    }

    fn frame(format: Pixel, pts: i64, time_base: Rational) -> Frame {
        let mut raw = Video::new(format, WIDTH, HEIGHT);
        for plane in 0..raw.planes() {
            raw.data_mut(plane).fill(0x60);
        }
        raw.set_pts(Some(pts));
        Frame::video(raw, 0, time_base)
    }

    fn encode_all(encoder: &mut Encoder, frames: &mut [Frame]) -> anyhow::Result<Vec<Packet>> {
        let mut packets = Vec::new();
        for frame in frames.iter_mut() {
            encoder.encode(frame, |p| {
                packets.push(p);
                Ok(())
            })?;
        }
        encoder.flush(|p| {
            packets.push(p);
            Ok(())
        })?;
        Ok(packets)
    }

    #[test]
    fn test_converts_pixel_format() -> anyhow::Result<()> {
        let mut encoder = open_video()?;
        let mut frames = [frame(Pixel::RGB24, 7, Rational::new(1, FRAME_RATE))];

        let packets = encode_all(&mut encoder, &mut frames)?;
        assert!(encoder.scaler.is_some());
        let converted = frames[0].as_video().expect("video frame");
        assert_eq!(converted.format(), Pixel::YUV420P);
        assert_eq!((converted.width(), converted.height()), (WIDTH, HEIGHT));

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].pts(), Some(7));
        Ok(())
    }

    #[test]
    fn test_collapsed_timestamps_are_bumped() -> anyhow::Result<()> {
        let mut encoder = open_video()?;
        // 0ms and 10ms both land on tick 0 at 1/30
        let time_base = Rational::new(1, 1000);
        let mut frames = [
            frame(Pixel::YUV420P, 0, time_base),
            frame(Pixel::YUV420P, 10, time_base),
        ];

        let packets = encode_all(&mut encoder, &mut frames)?;
        assert_eq!(frames[0].pts(), Some(0));
        assert_eq!(frames[1].pts(), Some(1));
        assert!(encoder.scaler.is_none());

        let pts: Vec<Option<i64>> = packets.iter().map(|p| p.pts()).collect();
        assert_eq!(pts, vec![Some(0), Some(1)]);
        Ok(())
    }

    #[test]
    fn test_resent_frame_keeps_its_timestamp() -> anyhow::Result<()> {
        let mut encoder = open_video()?;
        encoder.last_pts = Some(5);
        let mut frame = frame(Pixel::YUV420P, 5, Rational::new(1, FRAME_RATE));

        encoder.prepare(&mut frame)?;
        assert_eq!(frame.pts(), Some(6));
        // a second preparation of the same frame, as after NotReady
        encoder.prepare(&mut frame)?;
        assert_eq!(frame.pts(), Some(6));
        assert_eq!(encoder.last_pts, Some(5));

        encoder.send(&mut frame)?;
        assert_eq!(frame.pts(), Some(6));
        assert_eq!(encoder.last_pts, Some(6));
        Ok(())
    }
}
