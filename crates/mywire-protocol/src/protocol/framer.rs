//! Packet framing over a byte stream.
//!
//! The framer owns the connection's sequence counter. Reads check each
//! physical packet's sequence id against the counter, writes stamp it, and
//! both advance it (wrapping at 256). Commands reset it through
//! [`Framer::reset_sequence`].

#![allow(clippy::cast_possible_truncation)]

use std::io::{Read, Write};

use mywire_core::error::{FramingErrorKind, TransportErrorKind};
use mywire_core::{Error, Result};

use super::{MAX_PACKET_SIZE, PacketHeader};

/// Reads and writes logical packets on a stream.
#[derive(Debug)]
pub struct Framer<S> {
    stream: S,
    sequence: u8,
    max_payload: usize,
}

impl<S> Framer<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            sequence: 0,
            max_payload: 1 << 30,
        }
    }

    /// Reject logical payloads larger than `max` on read.
    pub fn with_max_payload(mut self, max: usize) -> Self {
        self.max_payload = max;
        self
    }

    /// Sequence id expected on the next read and used on the next write.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Start of a new command exchange.
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write> Framer<S> {
    /// Read one logical packet, joining continuation fragments.
    pub fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        loop {
            let mut header_buf = [0u8; PacketHeader::SIZE];
            self.stream
                .read_exact(&mut header_buf)
                .map_err(|e| Error::transport_io(TransportErrorKind::Read, e))?;
            let header = PacketHeader::from_bytes(&header_buf);

            if header.sequence_id != self.sequence {
                return Err(Error::framing(
                    FramingErrorKind::SequenceGap,
                    format!(
                        "expected sequence {}, got {}",
                        self.sequence, header.sequence_id
                    ),
                ));
            }
            self.sequence = self.sequence.wrapping_add(1);

            let len = header.payload_length as usize;
            if payload.len() + len > self.max_payload {
                return Err(Error::framing(
                    FramingErrorKind::PacketTooLarge,
                    format!(
                        "payload of {} bytes exceeds limit of {}",
                        payload.len() + len,
                        self.max_payload
                    ),
                ));
            }

            let start = payload.len();
            payload.resize(start + len, 0);
            self.stream
                .read_exact(&mut payload[start..])
                .map_err(|e| Error::transport_io(TransportErrorKind::Read, e))?;

            tracing::trace!(
                sequence = header.sequence_id,
                length = len,
                "read packet fragment"
            );

            if len < MAX_PACKET_SIZE {
                return Ok(payload);
            }
        }
    }

    /// Write one logical packet, splitting at 2^24-1 bytes.
    ///
    /// A payload whose last fragment is exactly 2^24-1 bytes is followed by
    /// an empty packet so the reader knows it has ended.
    pub fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let mut frames = Vec::with_capacity(payload.len() + PacketHeader::SIZE);
        let mut offset = 0;
        loop {
            let chunk = (payload.len() - offset).min(MAX_PACKET_SIZE);
            let header = PacketHeader {
                payload_length: chunk as u32,
                sequence_id: self.sequence,
            };
            frames.extend_from_slice(&header.to_bytes());
            frames.extend_from_slice(&payload[offset..offset + chunk]);
            self.sequence = self.sequence.wrapping_add(1);
            offset += chunk;
            if chunk < MAX_PACKET_SIZE {
                break;
            }
        }

        tracing::trace!(
            length = payload.len(),
            next_sequence = self.sequence,
            "write packet"
        );

        self.stream
            .write_all(&frames)
            .and_then(|()| self.stream.flush())
            .map_err(|e| Error::transport_io(TransportErrorKind::Write, e))
    }

    /// Reset the sequence and write a command packet.
    pub fn write_command(&mut self, command: u8, body: &[u8]) -> Result<()> {
        self.reset_sequence();
        let mut payload = Vec::with_capacity(1 + body.len());
        payload.push(command);
        payload.extend_from_slice(body);
        self.write_packet(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// In-memory duplex: writes go to `out`, reads come from `input`.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        out: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.out.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn framer_over(input: Vec<u8>) -> Framer<Duplex> {
        Framer::new(Duplex {
            input: Cursor::new(input),
            out: Vec::new(),
        })
    }

    fn loopback(payload: &[u8]) -> (Vec<u8>, usize) {
        let mut writer = framer_over(Vec::new());
        writer.write_packet(payload).unwrap();
        let wire = writer.into_inner().out;
        let mut reader = framer_over(wire.clone());
        let read = reader.read_packet().unwrap();
        assert_eq!(reader.sequence(), writer_sequence_after(payload.len()));
        (read, wire.len())
    }

    fn writer_sequence_after(len: usize) -> u8 {
        (len / MAX_PACKET_SIZE + 1) as u8
    }

    #[test]
    fn test_small_payload_advances_sequence_by_one() {
        let (read, wire_len) = loopback(b"hello");
        assert_eq!(read, b"hello");
        assert_eq!(wire_len, 9);
    }

    #[test]
    fn test_exact_max_payload_gets_empty_terminator() {
        let payload = vec![0xAB; MAX_PACKET_SIZE];
        let mut writer = framer_over(Vec::new());
        writer.write_packet(&payload).unwrap();
        assert_eq!(writer.sequence(), 2);
        let wire = writer.into_inner().out;
        assert_eq!(wire.len(), MAX_PACKET_SIZE + 8);
        assert_eq!(&wire[MAX_PACKET_SIZE + 4..], &[0, 0, 0, 1]);

        let mut reader = framer_over(wire);
        assert_eq!(reader.read_packet().unwrap(), payload);
        assert_eq!(reader.sequence(), 2);
    }

    #[test]
    fn test_large_payload_reassembled() {
        let payload: Vec<u8> = (0..MAX_PACKET_SIZE + 10).map(|i| i as u8).collect();
        let (read, wire_len) = loopback(&payload);
        assert_eq!(read, payload);
        assert_eq!(wire_len, payload.len() + 8);
    }

    #[test]
    fn test_sequence_gap_is_an_error() {
        let mut reader = framer_over(vec![1, 0, 0, 3, 0xAA]);
        let err = reader.read_packet().unwrap_err();
        assert_eq!(err.framing_kind(), Some(FramingErrorKind::SequenceGap));
    }

    #[test]
    fn test_sequence_wraps() {
        let mut writer = framer_over(Vec::new());
        for _ in 0..256 {
            writer.write_packet(b"x").unwrap();
        }
        assert_eq!(writer.sequence(), 0);
        let wire = writer.into_inner().out;
        assert_eq!(wire[255 * 5 + 3], 255);

        let mut reader = framer_over(wire);
        for _ in 0..256 {
            reader.read_packet().unwrap();
        }
        assert_eq!(reader.sequence(), 0);
    }

    #[test]
    fn test_eof_mid_header_is_remote_closed() {
        let mut reader = framer_over(vec![5, 0]);
        let err = reader.read_packet().unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::RemoteClosed));
    }

    #[test]
    fn test_command_resets_sequence() {
        let mut framer = framer_over(Vec::new());
        framer.write_packet(b"a").unwrap();
        framer.write_packet(b"b").unwrap();
        framer.write_command(0x0e, &[]).unwrap();
        assert_eq!(framer.sequence(), 1);
        let wire = framer.into_inner().out;
        assert_eq!(&wire[10..], &[1, 0, 0, 0, 0x0e]);
    }
}
