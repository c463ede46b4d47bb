use ffmpeg_next::{
    format::Pixel,
    software::scaling::{self, flag::Flags},
};

use crate::error::{Error, Result};

/// Converts decoded video frames to the pixel layout an encoder was opened
/// with. The source geometry is captured on first use; a frame with a
/// different geometry rebuilds the context.
pub struct Scaler {
    context: scaling::Context,
    source: (Pixel, u32, u32),
    stream_index: usize,
}

impl Scaler {
    pub fn new(
        stream_index: usize,
        source: (Pixel, u32, u32),
        target: (Pixel, u32, u32),
    ) -> Result<Self> {
        let context = scaling::Context::get(
            source.0,
            source.1,
            source.2,
            target.0,
            target.1,
            target.2,
            Flags::BILINEAR,
        )
        .map_err(|source| Error::Encode {
            stream_index,
            source,
        })?;
        log::debug!(
            "stream {}: converting {:?} {}x{} to {:?} {}x{}",
            stream_index,
            source.0,
            source.1,
            source.2,
            target.0,
            target.1,
            target.2
        );
        Ok(Self {
            context,
            source,
            stream_index,
        })
    }

    pub fn accepts(&self, frame: &ffmpeg_next::frame::Video) -> bool {
        self.source == (frame.format(), frame.width(), frame.height())
    }

    /// Convert `frame`, carrying its timestamp over to the result.
    pub fn run(&mut self, frame: &ffmpeg_next::frame::Video) -> Result<ffmpeg_next::frame::Video> {
        let mut converted = ffmpeg_next::frame::Video::empty();
        self.context
            .run(frame, &mut converted)
            .map_err(|source| Error::Encode {
                stream_index: self.stream_index,
                source,
            })?;
        converted.set_pts(frame.pts());
        Ok(converted)
    }
}
