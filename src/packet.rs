// # Receive buffer record
//
// Every datagram accepted by the receive callback is stored in the ring buffer as one record:
//
// ```
// Minimal: | MAGIC | MSG_LEN | MAC    | PAYLOAD       |
//          | 1byte | 1byte   | 6bytes | MSG_LEN bytes |
//
// Rssi:    | MAGIC | MSG_LEN | TIME_MS      | RSSI  | MAC    | PAYLOAD       |
//          | 1byte | 1byte   | 4bytes (LE)  | 1byte | 6bytes | MSG_LEN bytes |
// ```
//
// The layout is fixed at build time by the `rssi` feature ([`FORMAT`]) and shared by the
// producer and the consumer side.

use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{ETH_ALEN, Error, MAGIC, MAX_DATA_LEN};

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy)]
#[repr(C)]
struct BaseHeader {
    magic: u8,
    msg_len: u8,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy)]
#[repr(C)]
struct SignalHeader {
    time_ms: U32,
    rssi: i8,
}

const BASE_LEN: usize = size_of::<BaseHeader>();
const SIGNAL_LEN: usize = size_of::<SignalHeader>();

/// Longest header of all formats
pub const MAX_HEADER_LEN: usize = BASE_LEN + SIGNAL_LEN;

/// Header layout of a record in the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketFormat {
    /// `magic | msg_len`
    Minimal,
    /// `magic | msg_len | time_ms | rssi`
    Rssi,
}

/// Format used by this build
#[cfg(feature = "rssi")]
pub const FORMAT: PacketFormat = PacketFormat::Rssi;
#[cfg(not(feature = "rssi"))]
pub const FORMAT: PacketFormat = PacketFormat::Minimal;

/// Metadata stored in front of every record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecvHeader {
    pub msg_len: u8,
    /// Milliseconds timestamp of the reception. Always 0 with [`PacketFormat::Minimal`].
    pub time_ms: u32,
    /// Signal strength in dBm. Always 0 with [`PacketFormat::Minimal`].
    pub rssi: i8,
}

impl PacketFormat {
    pub const fn header_len(self) -> usize {
        match self {
            PacketFormat::Minimal => BASE_LEN,
            PacketFormat::Rssi => BASE_LEN + SIGNAL_LEN,
        }
    }

    /// Size of the largest record: header, MAC and a full payload
    pub const fn max_packet_len(self) -> usize {
        self.header_len() + ETH_ALEN + MAX_DATA_LEN
    }

    /// Size of a record carrying `msg_len` payload bytes
    pub const fn record_len(self, msg_len: usize) -> usize {
        self.header_len() + ETH_ALEN + msg_len
    }

    /// Serializes `header` into `out` and returns the written bytes.
    pub fn encode<'a>(self, header: &RecvHeader, out: &'a mut [u8; MAX_HEADER_LEN]) -> &'a [u8] {
        let base = BaseHeader {
            magic: MAGIC,
            msg_len: header.msg_len,
        };
        out[..BASE_LEN].copy_from_slice(base.as_bytes());
        if self == PacketFormat::Rssi {
            let signal = SignalHeader {
                time_ms: U32::new(header.time_ms),
                rssi: header.rssi,
            };
            out[BASE_LEN..MAX_HEADER_LEN].copy_from_slice(signal.as_bytes());
        }
        &out[..self.header_len()]
    }

    /// Parses a header read back from the ring buffer.
    ///
    /// `bytes` must hold exactly [`PacketFormat::header_len`] bytes. A wrong magic byte or a
    /// length above [`MAX_DATA_LEN`] means the buffer content is corrupted.
    pub fn decode(self, bytes: &[u8]) -> Result<RecvHeader, Error> {
        if bytes.len() != self.header_len() {
            return Err(Error::BufferIntegrity);
        }
        let base = BaseHeader::read_from_bytes(&bytes[..BASE_LEN])
            .map_err(|_| Error::BufferIntegrity)?;
        if base.magic != MAGIC || base.msg_len as usize > MAX_DATA_LEN {
            return Err(Error::BufferIntegrity);
        }

        let mut header = RecvHeader {
            msg_len: base.msg_len,
            ..Default::default()
        };
        if self == PacketFormat::Rssi {
            let signal = SignalHeader::read_from_bytes(&bytes[BASE_LEN..])
                .map_err(|_| Error::BufferIntegrity)?;
            header.time_ms = signal.time_ms.get();
            header.rssi = signal.rssi;
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_sizes() {
        assert_eq!(PacketFormat::Minimal.header_len(), 2);
        assert_eq!(PacketFormat::Rssi.header_len(), 7);
        assert_eq!(PacketFormat::Minimal.max_packet_len(), 258);
        assert_eq!(PacketFormat::Rssi.max_packet_len(), 263);
        assert_eq!(PacketFormat::Rssi.record_len(0), 13);
    }

    #[test]
    fn rssi_layout_is_packed_little_endian() {
        let header = RecvHeader {
            msg_len: 4,
            time_ms: 0x0403_0201,
            rssi: -40,
        };
        let mut out = [0; MAX_HEADER_LEN];
        let bytes = PacketFormat::Rssi.encode(&header, &mut out);
        assert_eq!(bytes, &[0x99, 4, 0x01, 0x02, 0x03, 0x04, (-40i8) as u8]);
        assert_eq!(PacketFormat::Rssi.decode(bytes), Ok(header));
    }

    #[test]
    fn minimal_layout_drops_signal_fields() {
        let header = RecvHeader {
            msg_len: 250,
            time_ms: 1234,
            rssi: -70,
        };
        let mut out = [0; MAX_HEADER_LEN];
        let bytes = PacketFormat::Minimal.encode(&header, &mut out);
        assert_eq!(bytes, &[0x99, 250]);
        assert_eq!(
            PacketFormat::Minimal.decode(bytes),
            Ok(RecvHeader {
                msg_len: 250,
                ..Default::default()
            })
        );
    }

    #[test]
    fn corrupted_headers_are_rejected() {
        assert_eq!(
            PacketFormat::Minimal.decode(&[0x98, 1]),
            Err(Error::BufferIntegrity)
        );
        assert_eq!(
            PacketFormat::Minimal.decode(&[0x99, 251]),
            Err(Error::BufferIntegrity)
        );
        assert_eq!(
            PacketFormat::Rssi.decode(&[0x99, 1]),
            Err(Error::BufferIntegrity)
        );
    }
}
