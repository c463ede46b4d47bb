use std::ffi::CString;

use ffmpeg_next::{Dictionary, Rational, format::context::Input};

use crate::{
    error::{Error, Result},
    packet::Packet,
    stream::StreamDescriptor,
};

/// Reads an input container and hands out its packets in container order.
pub struct Demuxer {
    location: String,
    input: Option<Input>,
    streams: Vec<StreamDescriptor>,
}

impl Default for Demuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer {
    pub fn new() -> Self {
        Self {
            location: String::new(),
            input: None,
            streams: Vec::new(),
        }
    }

    /// Resolve input format by name (e.g. "nut", "v4l2") via FFmpeg's av_find_input_format.
    fn find_input_format(name: &str) -> Result<ffmpeg_next::format::format::Input> {
        let cname = CString::new(name)
            .map_err(|e| Error::open(name, format!("invalid format name: {}", e)))?;
        let ptr = unsafe { ffmpeg_next::ffi::av_find_input_format(cname.as_ptr()) };
        if ptr.is_null() {
            return Err(Error::Config(format!("input format not found: {}", name)));
        }
        Ok(unsafe { ffmpeg_next::format::format::Input::wrap(ptr as *mut _) })
    }

    /// Open `location` and probe its streams. `format` forces the container
    /// format instead of probing it from content.
    pub fn open(&mut self, location: &str, format: Option<&str>) -> Result<()> {
        use ffmpeg_next::format::format::Format;

        if self.input.is_some() {
            return Err(Error::InvalidState(format!(
                "demuxer already open on {}",
                self.location
            )));
        }

        let input = match format {
            Some(name) => {
                let fmt = Self::find_input_format(name).map_err(|e| Error::open(location, e))?;
                ffmpeg_next::format::open_with(&location, &Format::Input(fmt), Dictionary::new())
                    .map_err(|e| Error::open(location, e))?
                    .input()
            }
            None => ffmpeg_next::format::input(&location).map_err(|e| Error::open(location, e))?,
        };

        let streams = Self::describe_streams(&input);
        if streams.is_empty() {
            return Err(Error::open(location, "no streams found"));
        }

        if log::log_enabled!(log::Level::Debug) {
            ffmpeg_next::format::context::input::dump(&input, 0, Some(location));
        }
        log::info!(
            "opened input {} ({}), {} streams",
            location,
            input.format().name(),
            streams.len()
        );
        for stream in &streams {
            log::debug!(
                "input stream {}: {} {} time_base={}",
                stream.index(),
                stream.kind(),
                stream.codec_name(),
                stream.time_base()
            );
        }

        self.location = location.to_string();
        self.streams = streams;
        self.input = Some(input);
        Ok(())
    }

    fn describe_streams(input: &Input) -> Vec<StreamDescriptor> {
        let ctx = unsafe { input.as_ptr() as *mut ffmpeg_next::ffi::AVFormatContext };
        input
            .streams()
            .map(|stream| {
                let guessed: Rational = unsafe {
                    ffmpeg_next::ffi::av_guess_frame_rate(
                        ctx,
                        stream.as_ptr() as *mut _,
                        std::ptr::null_mut(),
                    )
                    .into()
                };
                StreamDescriptor::from_stream(&stream, guessed)
            })
            .collect()
    }

    pub fn is_open(&self) -> bool {
        self.input.is_some()
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Streams discovered at open time, ordered by index.
    pub fn streams(&self) -> Result<&[StreamDescriptor]> {
        if self.input.is_none() {
            return Err(Error::NotOpen("demuxer"));
        }
        Ok(&self.streams)
    }

    pub fn stream(&self, index: usize) -> Result<&StreamDescriptor> {
        self.streams()?
            .get(index)
            .ok_or_else(|| Error::InvalidState(format!("no input stream {}", index)))
    }

    /// Next packet in container order, or `None` at end of input.
    pub fn read_packet(&mut self) -> Result<Option<Packet>> {
        let input = self.input.as_mut().ok_or(Error::NotOpen("demuxer"))?;
        let mut packet = ffmpeg_next::Packet::empty();
        loop {
            match packet.read(input) {
                Ok(()) => break,
                Err(ffmpeg_next::Error::Eof) => return Ok(None),
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    continue;
                }
                Err(err) => return Err(Error::Read(err)),
            }
        }

        let time_base = self
            .streams
            .get(packet.stream())
            .map(|s| s.time_base())
            .ok_or_else(|| {
                Error::InvalidState(format!(
                    "packet for stream {} appeared after open",
                    packet.stream()
                ))
            })?;
        log::trace!(
            "read packet stream={} pts={:?} dts={:?} size={}",
            packet.stream(),
            packet.pts(),
            packet.dts(),
            packet.size()
        );
        Ok(Some(Packet::from((packet, time_base))))
    }

    /// Container-level information, available while open.
    pub(crate) fn input(&self) -> Result<&Input> {
        self.input.as_ref().ok_or(Error::NotOpen("demuxer"))
    }

    /// Release the container. Safe to call at any time, any number of times.
    pub fn close(&mut self) {
        if self.input.take().is_some() {
            log::debug!("closed input {}", self.location);
        }
        self.streams.clear();
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unopened_demuxer() {
        crate::init().unwrap();
        let mut demuxer = Demuxer::new();
        assert!(matches!(demuxer.streams(), Err(Error::NotOpen(_))));
        assert!(matches!(demuxer.read_packet(), Err(Error::NotOpen(_))));
        demuxer.close();
        demuxer.close();
    }

    #[test]
    fn test_open_missing_location() {
        crate::init().unwrap();
        let mut demuxer = Demuxer::new();
        let err = demuxer
            .open("/nonexistent/dir/input.nut", None)
            .unwrap_err();
        assert!(matches!(err, Error::Open { .. }), "{:?}", err);
        assert!(matches!(demuxer.streams(), Err(Error::NotOpen(_))));
    }

    #[test]
    fn test_open_unknown_format_hint() {
        crate::init().unwrap();
        let mut demuxer = Demuxer::new();
        let err = demuxer
            .open("/nonexistent/input.bin", Some("no-such-container"))
            .unwrap_err();
        assert!(matches!(err, Error::Open { .. }), "{:?}", err);
    }
}
