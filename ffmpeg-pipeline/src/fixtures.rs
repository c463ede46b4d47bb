//! Synthetic media written at test time.

use std::path::PathBuf;

use ffmpeg_next::{
    Rational,
    codec::Id,
    format::{Pixel, Sample, sample},
};

use crate::{
    HeaderOptions,
    encoder::{AudioHints, Encoder, EncoderHints, EncoderOptions, VideoHints},
    frame::Frame,
    muxer::{Muxer, OutputStream},
    packet::Packet,
    stream::MediaKind,
};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;
pub const FRAME_RATE: i32 = 30;
pub const FRAMES: i64 = 90;
pub const SAMPLE_RATE: i32 = 8000;
pub const SAMPLES_PER_FRAME: i32 = 160;

pub struct Fixture {
    // removed on drop
    pub dir: tempfile::TempDir,
    pub path: PathBuf,
}

impl Fixture {
    pub fn location(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn output(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().into_owned()
    }
}

pub fn video_hints() -> EncoderHints {
    EncoderHints {
        stream_index: 0,
        kind: MediaKind::Video,
        codec_id: Id::MPEG4,
        video: Some(VideoHints {
            width: WIDTH,
            height: HEIGHT,
            aspect_ratio: Rational::new(1, 1),
            format: Pixel::YUV420P,
            frame_rate: Rational::new(FRAME_RATE, 1),
        }),
        audio: None,
    }
}

fn audio_hints() -> EncoderHints {
    EncoderHints {
        stream_index: 1,
        kind: MediaKind::Audio,
        codec_id: Id::PCM_S16LE,
        video: None,
        audio: Some(AudioHints {
            sample_rate: SAMPLE_RATE as u32,
            format: Sample::I16(sample::Type::Packed),
            channels: 1,
            channel_mask: Some(ffmpeg_next::ffi::AV_CH_LAYOUT_MONO),
        }),
    }
}

fn video_frame(index: i64) -> Frame {
    let mut raw = ffmpeg_next::frame::Video::new(Pixel::YUV420P, WIDTH, HEIGHT);
    for plane in 0..raw.planes() {
        let stride = raw.stride(plane);
        for (offset, byte) in raw.data_mut(plane).iter_mut().enumerate() {
            let (x, y) = (offset % stride, offset / stride);
            *byte = ((x + y) as i64 * 3 + index * 5) as u8;
        }
    }
    raw.set_pts(Some(index));
    Frame::video(raw, 0, Rational::new(1, FRAME_RATE))
}

fn audio_frame(index: i64) -> Frame {
    let mut raw = ffmpeg_next::frame::Audio::empty();
    unsafe {
        let ptr = raw.as_mut_ptr();
        (*ptr).format = ffmpeg_next::ffi::AVSampleFormat::AV_SAMPLE_FMT_S16 as i32;
        (*ptr).nb_samples = SAMPLES_PER_FRAME;
        (*ptr).sample_rate = SAMPLE_RATE;
        ffmpeg_next::ffi::av_channel_layout_default(&mut (*ptr).ch_layout, 1);
        assert!(ffmpeg_next::ffi::av_frame_get_buffer(ptr, 0) >= 0);
    }
    for (i, byte) in raw.data_mut(0).iter_mut().enumerate() {
        // low-amplitude sawtooth
        *byte = if i % 2 == 0 { (i / 2 % 64) as u8 } else { 0 };
    }
    raw.set_pts(Some(index * SAMPLES_PER_FRAME as i64));
    Frame::audio(raw, 1, Rational::new(1, SAMPLE_RATE))
}

fn add_encoded_stream(muxer: &mut Muxer, encoder: &Encoder) -> OutputStream {
    let handle = muxer.new_stream().unwrap();
    muxer
        .set_stream_parameters(handle, encoder.parameters().unwrap(), encoder.time_base())
        .unwrap();
    handle
}

fn write(muxer: &mut Muxer, handle: OutputStream, mut packet: Packet) -> crate::Result<()> {
    packet.set_stream_index(handle.index());
    muxer.write_interleaved(packet)
}

/// A NUT file with `FRAMES` MPEG-4 video frames at 1/30, plus PCM audio
/// covering the same duration when `with_audio` is set.
pub fn write_fixture(with_audio: bool) -> anyhow::Result<Fixture> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("input.nut");
    let location = path.to_string_lossy().into_owned();

    let mut muxer = Muxer::new();
    muxer.open(&location, Some("nut"))?;
    let options = EncoderOptions {
        global_header: muxer.requires_global_header()?,
        ..Default::default()
    };

    let mut video = Encoder::open(&video_hints(), &options)?;
    let video_out = add_encoded_stream(&mut muxer, &video);
    let mut audio = if with_audio {
        let encoder = Encoder::open(&audio_hints(), &options)?;
        let handle = add_encoded_stream(&mut muxer, &encoder);
        Some((encoder, handle))
    } else {
        None
    };
    muxer.write_header(&HeaderOptions::new())?;

    for index in 0..FRAMES {
        let mut frame = video_frame(index);
        video.encode(&mut frame, |p| write(&mut muxer, video_out, p))?;
        if let Some((encoder, handle)) = audio.as_mut() {
            let mut frame = audio_frame(index);
            let handle = *handle;
            encoder.encode(&mut frame, |p| write(&mut muxer, handle, p))?;
        }
    }
    video.flush(|p| write(&mut muxer, video_out, p))?;
    if let Some((encoder, handle)) = audio.as_mut() {
        let handle = *handle;
        encoder.flush(|p| write(&mut muxer, handle, p))?;
    }
    muxer.write_trailer()?;
    muxer.close()?;

    Ok(Fixture { dir, path })
}

/// Count packets per stream index in `location`.
pub fn count_packets(location: &str) -> anyhow::Result<Vec<usize>> {
    let mut demuxer = crate::Demuxer::new();
    demuxer.open(location, None)?;
    let mut counts = vec![0; demuxer.streams()?.len()];
    while let Some(packet) = demuxer.read_packet()? {
        counts[packet.stream_index()] += 1;
    }
    Ok(counts)
}
