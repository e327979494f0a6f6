//! Control channel codec.
//!
//! # Responsibilities
//! - Frame outgoing command packets into a fixed-capacity output buffer
//! - Split the inbound byte stream back into packets
//! - Bulk mode: hold back flushing while a metadata burst is assembled
//!
//! # Design Decisions
//! - A packet is never split across buffer flushes; a packet that does not
//!   fit the output buffer is a fatal error
//! - A partial inbound packet simply waits for more bytes, unless the input
//!   buffer is already full
//! - Inbound and outbound halves are separate structs so the driver can
//!   read and write concurrently

use bytes::{Buf, BufMut, BytesMut};
use http::HeaderMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WasError;
use crate::protocol::{Command, Packet, PacketHeader, HEADER_SIZE};

/// Inbound half: bytes received from the peer, not yet dispatched.
#[derive(Debug)]
pub struct ControlInput {
    buffer: BytesMut,
    capacity: usize,
}

impl ControlInput {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn has_room(&self) -> bool {
        self.buffer.len() < self.capacity
    }

    /// Append raw bytes, as if they had been received.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), WasError> {
        if self.buffer.len() + data.len() > self.capacity {
            return Err(WasError::protocol("control input overflow"));
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Read whatever is available, up to the free space. Returns 0 when
    /// the peer closed the socket.
    pub async fn read_from<R>(&mut self, reader: &mut R) -> Result<usize, WasError>
    where
        R: AsyncRead + Unpin,
    {
        let room = self.capacity - self.buffer.len();
        self.buffer.reserve(room);
        let mut limited = (&mut self.buffer).limit(room);
        reader
            .read_buf(&mut limited)
            .await
            .map_err(|e| WasError::io("WAS control receive error", e))
    }

    /// Command of the next buffered packet, without consuming it.
    pub fn peek_command(&self) -> Option<Command> {
        let header = PacketHeader::peek(&self.buffer)?;
        Command::try_from(header.command).ok()
    }

    /// Pop the next complete packet.
    ///
    /// `Ok(None)` means more bytes are needed. A partial packet is fatal
    /// only once the buffer is full and still cannot hold it.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, WasError> {
        let Some(header) = PacketHeader::peek(&self.buffer) else {
            return Ok(None);
        };

        if self.buffer.len() < header.frame_len() {
            if self.buffer.len() >= self.capacity {
                return Err(WasError::protocol(format!(
                    "control header too long ({})",
                    header.length
                )));
            }
            return Ok(None);
        }

        let command = Command::try_from(header.command)
            .map_err(|code| WasError::protocol(format!("unknown packet {code}")))?;

        let mut frame = self.buffer.split_to(header.frame_len());
        frame.advance(HEADER_SIZE);
        Ok(Some(Packet {
            command,
            payload: frame.freeze(),
        }))
    }
}

/// Outbound half: packets waiting to be written.
#[derive(Debug)]
pub struct ControlOutput {
    buffer: BytesMut,
    capacity: usize,
    bulk: u32,
}

impl ControlOutput {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
            bulk: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Pending bytes, for inspection.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Flushing is allowed only outside bulk mode.
    pub fn wants_flush(&self) -> bool {
        self.bulk == 0 && !self.buffer.is_empty()
    }

    pub fn bulk_on(&mut self) {
        self.bulk += 1;
    }

    /// Returns true when the outermost bulk section was closed.
    pub fn bulk_off(&mut self) -> bool {
        debug_assert!(self.bulk > 0);
        self.bulk = self.bulk.saturating_sub(1);
        self.bulk == 0
    }

    /// Queue one packet whose payload is the concatenation of `parts`.
    pub fn send_parts(&mut self, command: Command, parts: &[&[u8]]) -> Result<(), WasError> {
        let length: usize = parts.iter().map(|p| p.len()).sum();
        let length16 = u16::try_from(length)
            .map_err(|_| WasError::protocol("control output is too large"))?;
        if self.buffer.len() + HEADER_SIZE + length > self.capacity {
            return Err(WasError::protocol("control output is too large"));
        }

        PacketHeader {
            length: length16,
            command: command.code(),
        }
        .encode(&mut self.buffer);
        for part in parts {
            self.buffer.put_slice(part);
        }

        tracing::trace!(command = %command, length, "queued control packet");
        Ok(())
    }

    pub fn send(&mut self, command: Command, payload: &[u8]) -> Result<(), WasError> {
        self.send_parts(command, &[payload])
    }

    pub fn send_empty(&mut self, command: Command) -> Result<(), WasError> {
        self.send_parts(command, &[])
    }

    pub fn send_string(&mut self, command: Command, value: &str) -> Result<(), WasError> {
        self.send(command, value.as_bytes())
    }

    /// One packet per element.
    pub fn send_array<S: AsRef<str>>(
        &mut self,
        command: Command,
        values: &[S],
    ) -> Result<(), WasError> {
        for value in values {
            self.send_string(command, value.as_ref())?;
        }
        Ok(())
    }

    pub fn send_pair(&mut self, command: Command, key: &str, value: &[u8]) -> Result<(), WasError> {
        self.send_parts(command, &[key.as_bytes(), b"=", value])
    }

    /// One `key=value` packet per header entry; repeated names repeat.
    pub fn send_header_map(&mut self, command: Command, headers: &HeaderMap) -> Result<(), WasError> {
        for (name, value) in headers {
            self.send_pair(command, name.as_str(), value.as_bytes())?;
        }
        Ok(())
    }

    pub fn send_u32(&mut self, command: Command, value: u32) -> Result<(), WasError> {
        self.send(command, &value.to_le_bytes())
    }

    pub fn send_u64(&mut self, command: Command, value: u64) -> Result<(), WasError> {
        self.send(command, &value.to_le_bytes())
    }

    /// One write attempt.
    pub async fn write_to<W>(&mut self, writer: &mut W) -> Result<usize, WasError>
    where
        W: AsyncWrite + Unpin,
    {
        let n = writer
            .write_buf(&mut self.buffer)
            .await
            .map_err(|e| WasError::io("WAS control send error", e))?;
        if n == 0 {
            return Err(WasError::Closed("control connection"));
        }
        Ok(n)
    }

    /// Write everything that is queued, ignoring bulk mode.
    pub async fn flush_to<W>(&mut self, writer: &mut W) -> Result<(), WasError>
    where
        W: AsyncWrite + Unpin,
    {
        while !self.buffer.is_empty() {
            self.write_to(writer).await?;
        }
        writer
            .flush()
            .await
            .map_err(|e| WasError::io("WAS control send error", e))
    }
}

/// Both halves of the control channel plus the end-of-conversation flag.
#[derive(Debug)]
pub struct ControlChannel {
    pub rx: ControlInput,
    pub tx: ControlOutput,
    done: bool,
}

impl ControlChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            rx: ControlInput::new(capacity),
            tx: ControlOutput::new(capacity),
            done: false,
        }
    }

    /// No more packets will be sent or expected.
    ///
    /// Leftover inbound bytes mean the peer sent more than the protocol
    /// allowed.
    pub fn done(&mut self) -> Result<(), WasError> {
        self.done = true;
        if !self.rx.is_empty() {
            return Err(WasError::protocol("received too much control data"));
        }
        Ok(())
    }

    /// Done and fully flushed.
    pub fn is_eof(&self) -> bool {
        self.done && self.tx.is_empty()
    }
}
