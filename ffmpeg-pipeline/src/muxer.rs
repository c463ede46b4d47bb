use ffmpeg_next::{Rational, codec::Parameters, format::context::Output};

use crate::{
    error::{Error, Result},
    options::HeaderOptions,
    packet::Packet,
    stream::StreamDescriptor,
    timestamp,
};

/// Handle to a stream registered on a [`Muxer`], in output numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputStream(usize);

impl OutputStream {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Opened,
    HeaderWritten,
    TrailerWritten,
}

/// Writes packets into an output container.
pub struct Muxer {
    location: String,
    output: Option<Output>,
    state: State,
    packets: u64,
}

impl Default for Muxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Muxer {
    pub fn new() -> Self {
        Self {
            location: String::new(),
            output: None,
            state: State::Closed,
            packets: 0,
        }
    }

    /// Allocate the container for `location` and open its sink. `format`
    /// forces the container format instead of guessing it from the name.
    pub fn open(&mut self, location: &str, format: Option<&str>) -> Result<()> {
        if self.output.is_some() {
            return Err(Error::InvalidState(format!(
                "muxer already open on {}",
                self.location
            )));
        }
        let output = match format {
            Some(name) => ffmpeg_next::format::output_as(&location, name),
            None => ffmpeg_next::format::output(&location),
        }
        .map_err(|e| Error::open(location, e))?;

        log::info!("opened output {} ({})", location, output.format().name());
        self.location = location.to_string();
        self.output = Some(output);
        self.state = State::Opened;
        self.packets = 0;
        Ok(())
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_header_written(&self) -> bool {
        self.state == State::HeaderWritten
    }

    pub fn packets_written(&self) -> u64 {
        self.packets
    }

    fn output(&self) -> Result<&Output> {
        self.output.as_ref().ok_or(Error::NotOpen("muxer"))
    }

    fn output_mut(&mut self) -> Result<&mut Output> {
        self.output.as_mut().ok_or(Error::NotOpen("muxer"))
    }

    fn expect_state(&self, expected: State, action: &str) -> Result<()> {
        if self.state == State::Closed {
            return Err(Error::NotOpen("muxer"));
        }
        if self.state != expected {
            return Err(Error::InvalidState(format!(
                "cannot {} on {} in state {:?}",
                action, self.location, self.state
            )));
        }
        Ok(())
    }

    /// Whether encoders feeding this container must emit their codec
    /// headers once, out of band.
    pub fn requires_global_header(&self) -> Result<bool> {
        Ok(self
            .output()?
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER))
    }

    pub fn stream_count(&self) -> usize {
        self.output
            .as_ref()
            .map(|output| output.nb_streams() as usize)
            .unwrap_or(0)
    }

    /// Register an output stream with no codec parameters yet.
    pub fn new_stream(&mut self) -> Result<OutputStream> {
        self.expect_state(State::Opened, "add a stream")?;
        let output = self.output_mut()?;
        let stream = output
            .add_stream(ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::None))
            .map_err(|e| Error::write("add stream", e))?;
        Ok(OutputStream(stream.index()))
    }

    /// Register an output stream carrying the source stream's time base,
    /// frame rate hints and disposition. Codec parameters are attached
    /// later with [`Muxer::set_stream_parameters`].
    pub fn add_stream(&mut self, source: &StreamDescriptor) -> Result<OutputStream> {
        let handle = self.new_stream()?;
        let output = self.output_mut()?;
        let mut stream = output
            .stream_mut(handle.0)
            .ok_or_else(|| Error::InvalidState(format!("output stream {} vanished", handle.0)))?;
        stream.set_time_base(source.time_base());
        if timestamp::is_valid(source.avg_frame_rate()) {
            stream.set_avg_frame_rate(source.avg_frame_rate());
        }
        if timestamp::is_valid(source.real_frame_rate()) {
            stream.set_rate(source.real_frame_rate());
        }
        unsafe {
            (*stream.as_mut_ptr()).disposition = source.disposition();
        }
        log::debug!(
            "output stream {} registered for input stream {} ({})",
            handle.0,
            source.index(),
            source.kind()
        );
        Ok(handle)
    }

    /// Register an output stream that receives the source stream's packets
    /// unchanged.
    pub fn add_stream_copy(&mut self, source: &StreamDescriptor) -> Result<OutputStream> {
        let handle = self.add_stream(source)?;
        self.set_stream_parameters(handle, source.parameters().clone(), source.time_base())?;
        Ok(handle)
    }

    /// Attach codec parameters to a registered stream. The codec tag is
    /// cleared so the container picks its own.
    pub fn set_stream_parameters(
        &mut self,
        handle: OutputStream,
        parameters: Parameters,
        time_base: Rational,
    ) -> Result<()> {
        self.expect_state(State::Opened, "set stream parameters")?;
        let output = self.output_mut()?;
        let mut stream = output
            .stream_mut(handle.0)
            .ok_or_else(|| Error::InvalidState(format!("no output stream {}", handle.0)))?;
        stream.set_parameters(parameters);
        stream.set_time_base(time_base);
        unsafe {
            (*(*stream.as_mut_ptr()).codecpar).codec_tag = 0;
        }
        Ok(())
    }

    /// Time base the container settled on for `handle`. Containers may
    /// replace the requested time base while writing the header, so read
    /// this after [`Muxer::write_header`].
    pub fn stream_time_base(&self, handle: OutputStream) -> Result<Rational> {
        self.output()?
            .stream(handle.0)
            .map(|stream| stream.time_base())
            .ok_or_else(|| Error::InvalidState(format!("no output stream {}", handle.0)))
    }

    /// Check that the header can be written without producing a broken
    /// container.
    fn validate_streams(&self) -> Result<()> {
        let output = self.output()?;
        let no_streams_ok = output
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::NO_STREAMS);
        if output.nb_streams() == 0 && !no_streams_ok {
            return Err(Error::Write(format!(
                "{} has no streams to write",
                self.location
            )));
        }
        for stream in output.streams() {
            let parameters = stream.parameters();
            if parameters.medium() == ffmpeg_next::media::Type::Unknown
                || parameters.id() == ffmpeg_next::codec::Id::None
            {
                return Err(Error::Write(format!(
                    "output stream {} of {} has no codec parameters",
                    stream.index(),
                    self.location
                )));
            }
        }
        Ok(())
    }

    /// Write the container header. Options the container did not consume
    /// are logged and otherwise ignored.
    pub fn write_header(&mut self, options: &HeaderOptions) -> Result<()> {
        self.expect_state(State::Opened, "write the header")?;
        self.validate_streams()?;

        let dict = options.to_dictionary();
        let location = self.location.clone();
        let output = self.output_mut()?;
        let unused = output
            .write_header_with(dict)
            .map_err(|e| Error::write("write header", e))?;
        for (key, value) in unused.iter() {
            log::warn!("{}: header option {}={} was not used", location, key, value);
        }

        if log::log_enabled!(log::Level::Debug) {
            ffmpeg_next::format::context::output::dump(output, 0, Some(&location));
        }
        log::info!(
            "wrote header for {} with {} streams",
            location,
            output.nb_streams()
        );
        self.state = State::HeaderWritten;
        Ok(())
    }

    fn prepare(&mut self, packet: &mut Packet) -> Result<()> {
        self.expect_state(State::HeaderWritten, "write a packet")?;
        let index = packet.stream_index();
        let time_base = self.stream_time_base(OutputStream(index))?;
        packet.rescale_ts(time_base);
        packet.get_mut().set_position(-1);
        Ok(())
    }

    /// Write one packet directly, bypassing cross-stream interleaving. The
    /// packet's stream index must be an output stream index.
    pub fn write_packet(&mut self, mut packet: Packet) -> Result<()> {
        self.prepare(&mut packet)?;
        let output = self.output_mut()?;
        packet
            .into_inner()
            .write(output)
            .map_err(|e| Error::write("write packet", e))?;
        self.packets += 1;
        Ok(())
    }

    /// Hand one packet to the container's interleaving queue, which
    /// releases packets to the sink in timestamp order across streams.
    pub fn write_interleaved(&mut self, mut packet: Packet) -> Result<()> {
        self.prepare(&mut packet)?;
        log::trace!(
            "mux packet stream={} pts={:?} dts={:?}",
            packet.stream_index(),
            packet.pts(),
            packet.dts()
        );
        let output = self.output_mut()?;
        packet
            .into_inner()
            .write_interleaved(output)
            .map_err(|e| Error::write("write interleaved packet", e))?;
        self.packets += 1;
        Ok(())
    }

    /// Flush the interleaving queue and finalize the container.
    pub fn write_trailer(&mut self) -> Result<()> {
        self.expect_state(State::HeaderWritten, "write the trailer")?;
        let location = self.location.clone();
        self.output_mut()?
            .write_trailer()
            .map_err(|e| Error::write("write trailer", e))?;
        log::info!("wrote trailer for {} after {} packets", location, self.packets);
        self.state = State::TrailerWritten;
        Ok(())
    }

    /// Release the container and close the sink if the muxer opened it.
    /// Idempotent; only the first call can fail.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut output) = self.output.take() else {
            return Ok(());
        };
        if self.state == State::HeaderWritten {
            log::warn!("closing {} without a trailer", self.location);
        }
        self.state = State::Closed;

        let mut result = Ok(());
        if !output
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::NO_FILE)
        {
            let ret = unsafe { ffmpeg_next::ffi::avio_closep(&mut (*output.as_mut_ptr()).pb) };
            if ret < 0 {
                result = Err(Error::write("close sink", ffmpeg_next::Error::from(ret)));
            }
        }
        drop(output);
        log::debug!("closed output {}", self.location);
        result
    }
}

impl Drop for Muxer {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("{}", e);
        }
    }
}

#[cfg(test)]
#[path = "muxer_test.rs"]
mod muxer_test;
