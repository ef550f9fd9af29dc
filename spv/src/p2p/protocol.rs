use crate::p2p::{Message, MessageHeader};
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Message framing for reading/writing complete messages.
///
/// Incoming bytes are appended to the read buffer as they arrive, so a partial read never loses
/// data. Complete messages are taken from the front of the buffer once their header and whole
/// payload are present. Magic and checksum are verified before the payload is decoded.
pub struct MessageFramer {
    magic: u32,
    read_buffer: BytesMut,
}

impl MessageFramer {
    pub fn new(magic: u32) -> Self {
        Self {
            magic,
            read_buffer: BytesMut::with_capacity(64 * 1024),
        }
    }

    /// Frame a message for sending
    pub fn frame_message(&self, message: &Message) -> Result<Bytes> {
        let mut payload = BytesMut::new();
        message.encode_payload(&mut payload)?;

        let header = MessageHeader::new(self.magic, message.command(), &payload);
        let mut framed = BytesMut::with_capacity(MessageHeader::SIZE + payload.len());
        header.encode(&mut framed);
        framed.put_slice(&payload);
        Ok(framed.freeze())
    }

    /// Try to decode a message from the buffer.
    ///
    /// Returns `Ok(None)` when more data is needed. Any error is a protocol violation and the
    /// connection should be dropped.
    pub fn decode_message(&mut self) -> Result<Option<Message>> {
        if self.read_buffer.len() < MessageHeader::SIZE {
            return Ok(None);
        }

        // Peek at the header to get payload size
        let mut peek_buf = &self.read_buffer[..MessageHeader::SIZE];
        let header = MessageHeader::decode(&mut peek_buf)
            .map_err(|e| Error::ProtocolViolation(e.to_string()))?;
        if header.magic != self.magic {
            return Err(Error::ProtocolViolation(format!(
                "Invalid magic: expected {:#010x}, got {:#010x}",
                self.magic, header.magic
            )));
        }

        let total_size = MessageHeader::SIZE + header.payload_size as usize;
        if self.read_buffer.len() < total_size {
            self.read_buffer.reserve(total_size - self.read_buffer.len());
            return Ok(None);
        }

        // We have a complete message, consume it
        self.read_buffer.advance(MessageHeader::SIZE);
        let payload = self.read_buffer.split_to(header.payload_size as usize);
        let command = header.command_string();
        if !header.verify_checksum(&payload) {
            return Err(Error::ProtocolViolation(format!(
                "checksum mismatch on {}",
                command
            )));
        }
        Message::decode(&command, &payload)
            .map(Some)
            .map_err(|e| Error::ProtocolViolation(format!("malformed {}: {}", command, e)))
    }

    /// Add data to the read buffer
    pub fn add_data(&mut self, data: &[u8]) {
        self.read_buffer.put_slice(data);
    }

    /// The read buffer, for reading from a stream directly into it.
    pub fn read_buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.read_buffer
    }
}
