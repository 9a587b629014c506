//! Frame codec: length + sequence framing and multi-frame reassembly.

#![allow(clippy::cast_possible_truncation)]

use mysqlwire_core::Result;
use mysqlwire_core::error::ProtocolErrorKind;

use super::{MAX_PACKET_SIZE, PacketHeader, protocol_error};

/// Tracks the per-command sequence number and frames payloads.
///
/// The same counter serves both directions: after the client writes frames
/// `0..n`, the server's reply must start at `n`.
#[derive(Debug, Default, Clone)]
pub struct FrameCodec {
    sequence: u8,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sequence number the next frame (in either direction) must carry.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Start a new command.
    pub fn reset(&mut self) {
        self.sequence = 0;
    }

    /// Append `payload` to `out` as one or more frames.
    ///
    /// A payload whose length is a multiple of the frame limit (including
    /// zero) ends with an empty frame so the peer knows it is complete.
    pub fn encode(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        out.reserve(payload.len() + PacketHeader::SIZE * (1 + payload.len() / MAX_PACKET_SIZE));
        for chunk in payload.chunks(MAX_PACKET_SIZE) {
            self.push_frame(chunk, out);
        }
        if payload.len() % MAX_PACKET_SIZE == 0 {
            self.push_frame(&[], out);
        }
    }

    fn push_frame(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        let header = PacketHeader {
            payload_length: chunk.len() as u32,
            sequence_id: self.sequence,
        };
        tracing::trace!(len = chunk.len(), seq = self.sequence, "frame out");
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(chunk);
        self.sequence = self.sequence.wrapping_add(1);
    }

    /// Validate an incoming header and advance the expected sequence number.
    ///
    /// Returns the frame's payload length.
    pub fn accept_header(&mut self, header: PacketHeader) -> Result<usize> {
        if header.sequence_id != self.sequence {
            return Err(protocol_error(
                ProtocolErrorKind::SequenceMismatch,
                format!(
                    "packet sequence mismatch: expected {}, got {}",
                    self.sequence, header.sequence_id
                ),
            ));
        }
        tracing::trace!(
            len = header.payload_length,
            seq = header.sequence_id,
            "frame in"
        );
        self.sequence = self.sequence.wrapping_add(1);
        Ok(header.payload_length as usize)
    }

    /// Reassemble one logical message from the front of `input`.
    ///
    /// Returns the payload and the number of bytes consumed, or `None` if
    /// `input` does not yet hold the complete message. On `None` the codec
    /// state is left untouched.
    pub fn decode(&mut self, input: &[u8]) -> Result<Option<(Vec<u8>, usize)>> {
        let mut scratch = self.clone();
        let mut payload = Vec::new();
        let mut pos = 0;
        loop {
            let Some(header_bytes) = input.get(pos..pos + PacketHeader::SIZE) else {
                return Ok(None);
            };
            let mut raw = [0u8; PacketHeader::SIZE];
            raw.copy_from_slice(header_bytes);
            let len = scratch.accept_header(PacketHeader::from_bytes(&raw))?;
            pos += PacketHeader::SIZE;
            let Some(chunk) = input.get(pos..pos + len) else {
                return Ok(None);
            };
            payload.extend_from_slice(chunk);
            pos += len;
            if len < MAX_PACKET_SIZE {
                *self = scratch;
                return Ok(Some((payload, pos)));
            }
        }
    }
}
