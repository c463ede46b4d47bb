use ffmpeg_next::Rational;

use crate::{stream::MediaKind, timestamp};

pub enum RawFrame {
    Video(ffmpeg_next::frame::Video),
    Audio(ffmpeg_next::frame::Audio),
}

/// A decoded raw media unit of one stream.
///
/// `pts()` is expressed in `time_base()`. Like [`crate::packet::Packet`],
/// the underlying buffer is released when the `Frame` is dropped.
pub struct Frame {
    raw: RawFrame,
    stream_index: usize,
    time_base: Rational,
}

impl Frame {
    pub fn video(frame: ffmpeg_next::frame::Video, stream_index: usize, time_base: Rational) -> Self {
        Self {
            raw: RawFrame::Video(frame),
            stream_index,
            time_base,
        }
    }

    pub fn audio(frame: ffmpeg_next::frame::Audio, stream_index: usize, time_base: Rational) -> Self {
        Self {
            raw: RawFrame::Audio(frame),
            stream_index,
            time_base,
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self.raw {
            RawFrame::Video(_) => MediaKind::Video,
            RawFrame::Audio(_) => MediaKind::Audio,
        }
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn pts(&self) -> Option<i64> {
        match &self.raw {
            RawFrame::Video(f) => f.pts(),
            RawFrame::Audio(f) => f.pts(),
        }
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        match &mut self.raw {
            RawFrame::Video(f) => f.set_pts(pts),
            RawFrame::Audio(f) => f.set_pts(pts),
        }
    }

    /// Move the presentation timestamp into the `to` time base.
    pub fn rescale_ts(&mut self, to: Rational) {
        if self.time_base == to {
            return;
        }
        let pts = timestamp::rescale_opt(self.pts(), self.time_base, to);
        self.set_pts(pts);
        self.time_base = to;
    }

    pub fn raw(&self) -> &RawFrame {
        &self.raw
    }

    pub fn get_mut(&mut self) -> &mut RawFrame {
        &mut self.raw
    }

    pub fn as_video(&self) -> Option<&ffmpeg_next::frame::Video> {
        match &self.raw {
            RawFrame::Video(f) => Some(f),
            RawFrame::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&ffmpeg_next::frame::Audio> {
        match &self.raw {
            RawFrame::Audio(f) => Some(f),
            RawFrame::Video(_) => None,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("kind", &self.kind())
            .field("stream", &self.stream_index)
            .field("pts", &self.pts())
            .field("time_base", &self.time_base)
            .finish()
    }
}
