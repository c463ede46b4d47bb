use std::fmt;

use ffmpeg_next::{Rational, codec::Parameters, format::stream};

unsafe impl Send for StreamDescriptor {}
unsafe impl Sync for StreamDescriptor {}

/// Media kind of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
    Data,
    Attachment,
    Unknown,
}

impl MediaKind {
    /// Kinds the transcoder decodes and re-encodes.
    pub fn is_transcodable(&self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::Audio)
    }
}

impl From<ffmpeg_next::media::Type> for MediaKind {
    fn from(value: ffmpeg_next::media::Type) -> Self {
        match value {
            ffmpeg_next::media::Type::Video => MediaKind::Video,
            ffmpeg_next::media::Type::Audio => MediaKind::Audio,
            ffmpeg_next::media::Type::Subtitle => MediaKind::Subtitle,
            ffmpeg_next::media::Type::Data => MediaKind::Data,
            ffmpeg_next::media::Type::Attachment => MediaKind::Attachment,
            ffmpeg_next::media::Type::Unknown => MediaKind::Unknown,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Subtitle => "subtitle",
            MediaKind::Data => "data",
            MediaKind::Attachment => "attachment",
            MediaKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    // AVPixelFormat
    pub format: i32,
    pub sample_aspect_ratio: Rational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u32,
    // AVSampleFormat
    pub format: i32,
}

/// Immutable description of one elementary stream, captured when the
/// input container is opened.
pub struct StreamDescriptor {
    index: usize,
    kind: MediaKind,
    parameters: Parameters,
    time_base: Rational,
    avg_frame_rate: Rational,
    real_frame_rate: Rational,
    guessed_frame_rate: Option<Rational>,
    start_time: Option<i64>,
    duration: Option<i64>,
    frames: i64,
    disposition: i32,
}

impl StreamDescriptor {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn codec_id(&self) -> ffmpeg_next::codec::Id {
        self.parameters.id()
    }

    pub fn codec_name(&self) -> String {
        self.parameters.id().name().to_string()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn avg_frame_rate(&self) -> Rational {
        self.avg_frame_rate
    }

    pub fn real_frame_rate(&self) -> Rational {
        self.real_frame_rate
    }

    /// Frame rate estimated by the container layer, if it could make one.
    pub fn guessed_frame_rate(&self) -> Option<Rational> {
        self.guessed_frame_rate
    }

    pub fn start_time(&self) -> Option<i64> {
        self.start_time
    }

    /// Duration in time-base units, if known.
    pub fn duration(&self) -> Option<i64> {
        self.duration
    }

    pub fn frames(&self) -> i64 {
        self.frames
    }

    /// Raw AV_DISPOSITION_* bits.
    pub fn disposition(&self) -> i32 {
        self.disposition
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind == MediaKind::Audio
    }

    pub fn video(&self) -> Option<VideoParams> {
        if !self.is_video() {
            return None;
        }
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            Some(VideoParams {
                width: (*ptr).width.max(0) as u32,
                height: (*ptr).height.max(0) as u32,
                format: (*ptr).format,
                sample_aspect_ratio: (*ptr).sample_aspect_ratio.into(),
            })
        }
    }

    pub fn audio(&self) -> Option<AudioParams> {
        if !self.is_audio() {
            return None;
        }
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            Some(AudioParams {
                sample_rate: (*ptr).sample_rate.max(0) as u32,
                channels: (*ptr).ch_layout.nb_channels.max(0) as u32,
                format: (*ptr).format,
            })
        }
    }

    pub(crate) fn from_stream(stream: &stream::Stream<'_>, guessed_frame_rate: Rational) -> Self {
        // owned copy, detached from the format context
        let parameters = stream.parameters().clone();
        let kind = MediaKind::from(parameters.medium());
        let (start_time, duration) = (stream.start_time(), stream.duration());
        let disposition = unsafe { (*stream.as_ptr()).disposition };
        Self {
            index: stream.index(),
            kind,
            parameters,
            time_base: stream.time_base(),
            avg_frame_rate: stream.avg_frame_rate(),
            real_frame_rate: stream.rate(),
            guessed_frame_rate: positive(guessed_frame_rate),
            start_time: known(start_time),
            duration: known(duration).filter(|d| *d >= 0),
            frames: stream.frames(),
            disposition,
        }
    }
}

fn positive(rate: Rational) -> Option<Rational> {
    if rate.numerator() > 0 && rate.denominator() > 0 {
        Some(rate)
    } else {
        None
    }
}

/// Negative start times are real (edit lists, reorder delay); only the
/// sentinel means unknown.
fn known(ts: i64) -> Option<i64> {
    if ts == crate::timestamp::NOPTS {
        None
    } else {
        Some(ts)
    }
}

impl Clone for StreamDescriptor {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            kind: self.kind,
            parameters: self.parameters.clone(),
            time_base: self.time_base,
            avg_frame_rate: self.avg_frame_rate,
            real_frame_rate: self.real_frame_rate,
            guessed_frame_rate: self.guessed_frame_rate,
            start_time: self.start_time,
            duration: self.duration,
            frames: self.frames,
            disposition: self.disposition,
        }
    }
}

impl fmt::Debug for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDescriptor")
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("codec", &self.codec_id())
            .field("time_base", &self.time_base)
            .field("guessed_frame_rate", &self.guessed_frame_rate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_keeps_negative_start_times() {
        assert_eq!(known(crate::timestamp::NOPTS), None);
        assert_eq!(known(-1024), Some(-1024));
        assert_eq!(known(0), Some(0));
        assert_eq!(known(90000), Some(90000));
    }

    #[test]
    fn test_positive_rates_only() {
        assert_eq!(positive(Rational::new(30, 1)), Some(Rational::new(30, 1)));
        assert_eq!(positive(Rational::new(0, 1)), None);
        assert_eq!(positive(Rational::new(25, 0)), None);
    }
}
