use std::fmt;

use bytes::Bytes;
use ffmpeg_next::Rational;

/// An encoded data unit of one stream.
///
/// Timestamps are always expressed in `time_base()`. The wrapped ffmpeg
/// packet is unreferenced exactly once, when the `Packet` is dropped.
pub struct Packet {
    packet: ffmpeg_next::codec::packet::Packet,
    time_base: Rational,
}

impl Packet {
    pub fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    pub fn dts(&self) -> Option<i64> {
        self.packet.dts()
    }

    pub fn duration(&self) -> i64 {
        self.packet.duration()
    }

    pub fn size(&self) -> usize {
        self.packet.size()
    }

    pub fn stream_index(&self) -> usize {
        self.packet.stream()
    }

    pub fn set_stream_index(&mut self, index: usize) {
        self.packet.set_stream(index);
    }

    pub fn data(&self) -> Bytes {
        self.packet
            .data()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default()
    }

    pub fn is_key(&self) -> bool {
        self.packet.is_key()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Move PTS, DTS and duration into the `to` time base.
    pub fn rescale_ts(&mut self, to: Rational) {
        if self.time_base == to {
            return;
        }
        self.packet.rescale_ts(self.time_base, to);
        self.time_base = to;
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::codec::packet::Packet {
        &mut self.packet
    }

    pub fn packet(&self) -> &ffmpeg_next::codec::packet::Packet {
        &self.packet
    }

    pub(crate) fn into_inner(self) -> ffmpeg_next::codec::packet::Packet {
        self.packet
    }
}

impl From<(ffmpeg_next::codec::packet::Packet, Rational)> for Packet {
    fn from((packet, time_base): (ffmpeg_next::codec::packet::Packet, Rational)) -> Self {
        Self { packet, time_base }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("stream", &self.stream_index())
            .field("pts", &self.pts())
            .field("dts", &self.dts())
            .field("duration", &self.duration())
            .field("size", &self.size())
            .field("time_base", &self.time_base)
            .finish()
    }
}
