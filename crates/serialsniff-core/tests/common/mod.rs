#![allow(dead_code)]

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use etherparse::PacketBuilder;
use parking_lot::Mutex;

/// `AC ED 00 05` + TC_STRING "hi".
pub const JAVA_STRING_HI: [u8; 9] = [0xAC, 0xED, 0x00, 0x05, 0x74, 0x00, 0x02, b'h', b'i'];

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn udp_frame(payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
        .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
        .udp(40000, 9000);
    let mut frame = Vec::<u8>::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).unwrap();
    frame
}

/// Length-prefixed Java string: `CA FE <len>` followed by the object.
pub fn framed_object_payload() -> Vec<u8> {
    let mut payload = vec![0xCA, 0xFE, JAVA_STRING_HI.len() as u8];
    payload.extend_from_slice(&JAVA_STRING_HI);
    payload
}

pub fn noise_payload() -> Vec<u8> {
    vec![0x13, 0x37, 0xC0, 0xDE, 0x00, 0x42]
}

/// The three frames of the end-to-end scenario: object, noise, object.
pub fn scenario_frames() -> Vec<Vec<u8>> {
    vec![
        udp_frame(&framed_object_payload()),
        udp_frame(&noise_payload()),
        udp_frame(&framed_object_payload()),
    ]
}

pub fn write_pcapng(path: &Path, frames: &[Vec<u8>]) {
    let mut output = Vec::new();
    output.extend_from_slice(&pcapng_block(0x0A0D0D0A, &section_header_body()));
    output.extend_from_slice(&pcapng_block(1, &interface_desc_body()));
    for (idx, data) in frames.iter().enumerate() {
        let ts_us = (idx as u64) * 1_000_000;
        output.extend_from_slice(&pcapng_block(6, &enhanced_packet_body(ts_us, data)));
    }
    std::fs::write(path, output).unwrap();
}

/// Classic little-endian PCAP with an Ethernet link type.
pub fn write_pcap(path: &Path, frames: &[Vec<u8>]) {
    let mut output = Vec::new();
    output.extend_from_slice(&0xA1B2C3D4u32.to_le_bytes());
    output.extend_from_slice(&2u16.to_le_bytes());
    output.extend_from_slice(&4u16.to_le_bytes());
    output.extend_from_slice(&0i32.to_le_bytes());
    output.extend_from_slice(&0u32.to_le_bytes());
    output.extend_from_slice(&65535u32.to_le_bytes());
    output.extend_from_slice(&1u32.to_le_bytes());
    for (idx, data) in frames.iter().enumerate() {
        output.extend_from_slice(&(idx as u32).to_le_bytes());
        output.extend_from_slice(&0u32.to_le_bytes());
        output.extend_from_slice(&(data.len() as u32).to_le_bytes());
        output.extend_from_slice(&(data.len() as u32).to_le_bytes());
        output.extend_from_slice(data);
    }
    std::fs::write(path, output).unwrap();
}

fn pcapng_block(block_type: u32, body: &[u8]) -> Vec<u8> {
    let total_len = (8 + body.len() + 4) as u32;
    let mut block = Vec::with_capacity(total_len as usize);
    block.extend_from_slice(&block_type.to_be_bytes());
    block.extend_from_slice(&total_len.to_be_bytes());
    block.extend_from_slice(body);
    block.extend_from_slice(&total_len.to_be_bytes());
    block
}

fn section_header_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0x1A2B3C4Du32.to_be_bytes());
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&(-1i64).to_be_bytes());
    body
}

fn interface_desc_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&65535u32.to_be_bytes());
    body
}

fn enhanced_packet_body(ts_us: u64, data: &[u8]) -> Vec<u8> {
    let cap_len = data.len() as u32;
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_be_bytes());
    body.extend_from_slice(&((ts_us >> 32) as u32).to_be_bytes());
    body.extend_from_slice(&(ts_us as u32).to_be_bytes());
    body.extend_from_slice(&cap_len.to_be_bytes());
    body.extend_from_slice(&cap_len.to_be_bytes());
    body.extend_from_slice(data);
    body.resize(body.len() + (4 - data.len() % 4) % 4, 0);
    body
}

/// In-memory output that stays readable after the sink drops its writer.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn wait_until(mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}
