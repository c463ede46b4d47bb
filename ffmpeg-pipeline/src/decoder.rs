use ffmpeg_next::Rational;

use crate::{
    encoder::{AudioHints, EncoderHints, VideoHints},
    error::{Error, Result},
    frame::Frame,
    packet::Packet,
    stage::{self, CodecStage},
    stream::{MediaKind, StreamDescriptor},
    timestamp,
};

enum DecoderType {
    Video(ffmpeg_next::codec::decoder::Video),
    Audio(ffmpeg_next::codec::decoder::Audio),
}

impl DecoderType {
    fn context(&self) -> &ffmpeg_next::codec::Context {
        match self {
            DecoderType::Video(decoder) => decoder,
            DecoderType::Audio(decoder) => decoder,
        }
    }

    fn send_packet(&mut self, packet: &ffmpeg_next::Packet) -> std::result::Result<(), ffmpeg_next::Error> {
        match self {
            DecoderType::Video(decoder) => decoder.send_packet(packet),
            DecoderType::Audio(decoder) => decoder.send_packet(packet),
        }
    }

    fn send_eof(&mut self) -> std::result::Result<(), ffmpeg_next::Error> {
        match self {
            DecoderType::Video(decoder) => decoder.send_eof(),
            DecoderType::Audio(decoder) => decoder.send_eof(),
        }
    }

    fn receive_frame(
        &mut self,
        stream_index: usize,
        time_base: Rational,
    ) -> std::result::Result<Frame, ffmpeg_next::Error> {
        match self {
            DecoderType::Video(decoder) => {
                let mut frame = ffmpeg_next::frame::Video::empty();
                decoder.receive_frame(&mut frame)?;
                frame.set_pts(frame.timestamp());
                Ok(Frame::video(frame, stream_index, time_base))
            }
            DecoderType::Audio(decoder) => {
                let mut frame = ffmpeg_next::frame::Audio::empty();
                decoder.receive_frame(&mut frame)?;
                frame.set_pts(frame.timestamp());
                Ok(Frame::audio(frame, stream_index, time_base))
            }
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

/// Turns the packets of one input stream into frames.
pub struct Decoder {
    stream: StreamDescriptor,
    inner: Option<DecoderType>,
    time_base: Rational,
    frame_rate: Option<Rational>,
    state: State,
    frames: u64,
}

impl Decoder {
    pub fn open(stream: &StreamDescriptor) -> Result<Self> {
        let kind = stream.kind();
        if !kind.is_transcodable() {
            return Err(Error::UnsupportedStream {
                index: stream.index(),
                kind: kind.to_string(),
            });
        }

        let codec = ffmpeg_next::decoder::find(stream.codec_id())
            .ok_or_else(|| Error::UnsupportedCodec(stream.codec_name()))?;

        let mut decoder_ctx = ffmpeg_next::codec::Context::from_parameters(stream.parameters().clone())
            .map_err(|e| decode_error(stream.index(), e))?;

        let frame_rate = if kind == MediaKind::Video {
            Some(Self::derive_frame_rate(stream))
        } else {
            None
        };
        unsafe {
            let ctx = decoder_ctx.as_mut_ptr();
            (*ctx).time_base = stream.time_base().into();
            (*ctx).pkt_timebase = stream.time_base().into();
            if let Some(rate) = frame_rate {
                (*ctx).framerate = rate.into();
            }
        }

        let opened = decoder_ctx
            .decoder()
            .open_as(codec)
            .map_err(|e| decode_error(stream.index(), e))?;
        let inner = match kind {
            MediaKind::Video => {
                let video = opened.video().map_err(|e| decode_error(stream.index(), e))?;
                if video.format() == ffmpeg_next::format::Pixel::None
                    || video.width() == 0
                    || video.height() == 0
                {
                    return Err(Error::InvalidState(format!(
                        "stream {}: missing video codec parameters",
                        stream.index()
                    )));
                }
                DecoderType::Video(video)
            }
            _ => DecoderType::Audio(opened.audio().map_err(|e| decode_error(stream.index(), e))?),
        };

        let reported: Rational = unsafe { (*inner.context().as_ptr()).time_base.into() };
        let time_base = if timestamp::is_valid(reported) {
            reported
        } else {
            stream.time_base()
        };

        log::info!(
            "opened {} decoder {} for stream {}, time_base={}",
            kind,
            codec.name(),
            stream.index(),
            time_base
        );

        Ok(Self {
            stream: stream.clone(),
            inner: Some(inner),
            time_base,
            frame_rate,
            state: State::Open,
            frames: 0,
        })
    }

    /// Explicit rate if the container has one, otherwise its best guess.
    fn derive_frame_rate(stream: &StreamDescriptor) -> Rational {
        [
            stream.guessed_frame_rate(),
            Some(stream.avg_frame_rate()),
            Some(stream.real_frame_rate()),
        ]
        .into_iter()
        .flatten()
        .find(|rate| timestamp::is_valid(*rate))
        .unwrap_or(Rational::new(25, 1))
    }

    pub fn stream(&self) -> &StreamDescriptor {
        &self.stream
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn frame_rate(&self) -> Option<Rational> {
        self.frame_rate
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames
    }

    pub fn is_flushed(&self) -> bool {
        self.state == State::Drained
    }

    fn inner_mut(&mut self) -> Result<&mut DecoderType> {
        self.inner.as_mut().ok_or(Error::NotOpen("decoder"))
    }

    /// Submit one packet. The packet is moved into the decoder time base
    /// first if it is not already expressed in it.
    pub fn send(&mut self, packet: &mut Packet) -> Result<()> {
        let index = self.stream.index();
        match self.state {
            State::Closed => return Err(Error::NotOpen("decoder")),
            State::Flushing | State::Drained => return Err(Error::EndOfStream),
            State::Open => {}
        }
        if packet.stream_index() != index {
            return Err(Error::InvalidState(format!(
                "packet of stream {} sent to decoder of stream {}",
                packet.stream_index(),
                index
            )));
        }
        packet.rescale_ts(self.time_base);

        match self.inner_mut()?.send_packet(packet.packet()) {
            Ok(()) => Ok(()),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Err(Error::NotReady)
            }
            Err(ffmpeg_next::Error::Eof) => Err(Error::EndOfStream),
            Err(err) => Err(decode_error(index, err)),
        }
    }

    /// Signal end of input. Further calls are no-ops.
    pub fn send_eof(&mut self) -> Result<()> {
        match self.state {
            State::Closed => Err(Error::NotOpen("decoder")),
            State::Flushing | State::Drained => Ok(()),
            State::Open => {
                let index = self.stream.index();
                match self.inner_mut()?.send_eof() {
                    Ok(()) | Err(ffmpeg_next::Error::Eof) => {}
                    Err(err) => return Err(decode_error(index, err)),
                }
                log::debug!("decoder for stream {} flushing", index);
                self.state = State::Flushing;
                Ok(())
            }
        }
    }

    /// Next decoded frame, or `None` when more input is needed or the
    /// decoder is fully flushed.
    pub fn receive(&mut self) -> Result<Option<Frame>> {
        match self.state {
            State::Closed => return Err(Error::NotOpen("decoder")),
            State::Drained => return Ok(None),
            State::Open | State::Flushing => {}
        }
        let index = self.stream.index();
        let time_base = self.time_base;
        match self.inner_mut()?.receive_frame(index, time_base) {
            Ok(frame) => {
                self.frames += 1;
                log::trace!("decoded frame stream={} pts={:?}", index, frame.pts());
                Ok(Some(frame))
            }
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(None)
            }
            Err(ffmpeg_next::Error::Eof) => {
                log::debug!(
                    "decoder for stream {} drained after {} frames",
                    index,
                    self.frames
                );
                self.state = State::Drained;
                Ok(None)
            }
            Err(err) => Err(decode_error(index, err)),
        }
    }

    /// Send `packet` and hand every frame it yields to `on_frame`.
    pub fn decode<F>(&mut self, packet: &mut Packet, on_frame: F) -> Result<usize>
    where
        F: FnMut(Frame) -> Result<()>,
    {
        stage::push(self, packet, on_frame)
    }

    /// Signal end of input and hand every remaining frame to `on_frame`.
    pub fn flush<F>(&mut self, on_frame: F) -> Result<usize>
    where
        F: FnMut(Frame) -> Result<()>,
    {
        stage::flush(self, on_frame)
    }

    /// Parameters an encoder needs to re-encode this stream's frames.
    pub fn encoder_hints(&self) -> Result<EncoderHints> {
        let inner = self.inner.as_ref().ok_or(Error::NotOpen("decoder"))?;
        let (video, audio) = match inner {
            DecoderType::Video(decoder) => {
                let frame_rate = self.frame_rate.unwrap_or(Rational::new(25, 1));
                (
                    Some(VideoHints {
                        width: decoder.width(),
                        height: decoder.height(),
                        aspect_ratio: decoder.aspect_ratio(),
                        format: decoder.format(),
                        frame_rate,
                    }),
                    None,
                )
            }
            DecoderType::Audio(decoder) => {
                let (channels, channel_mask) = unsafe {
                    let layout = &(*decoder.as_ptr()).ch_layout;
                    let mask = if layout.order == ffmpeg_next::ffi::AVChannelOrder::AV_CHANNEL_ORDER_NATIVE {
                        Some(layout.u.mask)
                    } else {
                        None
                    };
                    (layout.nb_channels.max(1) as u32, mask)
                };
                (
                    None,
                    Some(AudioHints {
                        sample_rate: decoder.rate(),
                        format: decoder.format(),
                        channels,
                        channel_mask,
                    }),
                )
            }
        };
        Ok(EncoderHints {
            stream_index: self.stream.index(),
            kind: self.stream.kind(),
            codec_id: self.stream.codec_id(),
            video,
            audio,
        })
    }

    /// Release decode state. Idempotent.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            log::debug!("closed decoder for stream {}", self.stream.index());
        }
        self.state = State::Closed;
    }
}

impl CodecStage for Decoder {
    type Input = Packet;
    type Output = Frame;

    fn send(&mut self, input: &mut Packet) -> Result<()> {
        Decoder::send(self, input)
    }

    fn send_eof(&mut self) -> Result<()> {
        Decoder::send_eof(self)
    }

    fn receive(&mut self) -> Result<Option<Frame>> {
        Decoder::receive(self)
    }

    fn stream_index(&self) -> usize {
        self.stream.index()
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.close();
    }
}

fn decode_error(stream_index: usize, source: ffmpeg_next::Error) -> Error {
    Error::Decode {
        stream_index,
        source,
    }
}
