//! Shared utilities for the WAS integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::oneshot;

use was_proxy::protocol::packet::{PacketHeader, HEADER_SIZE};
use was_proxy::protocol::{Command, Packet};
use was_proxy::{Release, WasConfig, WasSocket};

pub type TestSocket = WasSocket<UnixStream, UnixStream, UnixStream>;

/// A connected client/server pair. Each data stream is used in one
/// direction only, like the pipes a real WAS client sets up.
pub fn socket_pair() -> (TestSocket, TestSocket) {
    let (client_control, server_control) = UnixStream::pair().unwrap();
    let (client_output, server_input) = UnixStream::pair().unwrap();
    let (server_output, client_input) = UnixStream::pair().unwrap();
    (
        WasSocket::new(client_control, client_input, client_output),
        WasSocket::new(server_control, server_input, server_output),
    )
}

pub fn test_config() -> Arc<WasConfig> {
    let mut config = WasConfig::default();
    config.timeouts.control_secs = 5;
    config.timeouts.input_secs = 5;
    config.timeouts.output_secs = 5;
    Arc::new(config)
}

/// A lease that reports how the connection came back.
pub fn recording_lease() -> (
    impl FnOnce(Release<TestSocket>) + Send + 'static,
    oneshot::Receiver<Release<TestSocket>>,
) {
    let (tx, rx) = oneshot::channel();
    let lease = move |release: Release<TestSocket>| {
        let _ = tx.send(release);
    };
    (lease, rx)
}

pub async fn released(rx: oneshot::Receiver<Release<TestSocket>>) -> Release<TestSocket> {
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("lease was not released in time")
        .expect("lease dropped without release")
}

/// One encoded control packet.
pub fn packet(command: Command, payload: &[u8]) -> Vec<u8> {
    encode_raw(command.code(), payload)
}

/// A packet with an arbitrary command code.
pub fn encode_raw(command: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    PacketHeader {
        length: payload.len() as u16,
        command,
    }
    .encode(&mut buf);
    buf.put_slice(payload);
    buf.to_vec()
}

pub fn u64_packet(command: Command, value: u64) -> Vec<u8> {
    packet(command, &value.to_le_bytes())
}

pub fn u32_packet(command: Command, value: u32) -> Vec<u8> {
    packet(command, &value.to_le_bytes())
}

/// A scripted peer speaking raw packets on a control stream.
pub struct RawPeer {
    pub control: UnixStream,
    buffer: BytesMut,
}

impl RawPeer {
    pub fn new(control: UnixStream) -> Self {
        Self {
            control,
            buffer: BytesMut::new(),
        }
    }

    pub async fn send(&mut self, packets: &[Vec<u8>]) {
        let data: Vec<u8> = packets.concat();
        self.control.write_all(&data).await.unwrap();
    }

    /// The next packet, or `None` once the other side closed the stream.
    pub async fn recv(&mut self) -> Option<Packet> {
        loop {
            if let Some(header) = PacketHeader::peek(&self.buffer) {
                if self.buffer.len() >= header.frame_len() {
                    self.buffer.advance(HEADER_SIZE);
                    let payload = self.buffer.split_to(header.length as usize).freeze();
                    let command = Command::try_from(header.command).unwrap();
                    return Some(Packet::new(command, payload));
                }
            }
            let n = tokio::time::timeout(Duration::from_secs(5), self.control.read_buf(&mut self.buffer))
                .await
                .expect("control read timed out")
                .unwrap();
            if n == 0 {
                return None;
            }
        }
    }

    /// Read packets up to and including the first one with `command`.
    pub async fn recv_until(&mut self, command: Command) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Some(packet) = self.recv().await {
            let done = packet.command == command;
            packets.push(packet);
            if done {
                return packets;
            }
        }
        panic!("control closed before {command}");
    }
}

pub fn commands(packets: &[Packet]) -> Vec<Command> {
    packets.iter().map(|packet| packet.command).collect()
}

pub fn payload_u64(packet: &Packet) -> u64 {
    packet.parse_u64().unwrap()
}

pub fn bytes_of(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}
