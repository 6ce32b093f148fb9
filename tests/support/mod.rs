//! Helpers for building pcap savefiles in tests
#![allow(dead_code)]

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

pub const PAYLOAD: &[u8] = b"test packet, please ignore";

/// One record in a savefile
pub struct Frame {
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn udp(ts_sec: u32, dst: Ipv4Addr, dst_port: u16, payload: &[u8]) -> Self {
        Frame {
            ts_sec,
            ts_usec: 0,
            data: ethernet_udp(Ipv4Addr::new(192, 168, 1, 10), dst, 40000, dst_port, payload),
        }
    }
}

/// Ethernet + IPv4 + UDP frame. Checksums are left zero; BPF does not check them.
pub fn ethernet_udp(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let udp_len = 8 + payload.len() as u16;
    let ip_len = 20 + udp_len;

    let mut data = Vec::new();
    // Ethernet: dst mac, src mac, ethertype IPv4
    data.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    data.extend_from_slice(&[0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb]);
    data.extend_from_slice(&0x0800u16.to_be_bytes());
    // IPv4
    data.push(0x45);
    data.push(0);
    data.extend_from_slice(&ip_len.to_be_bytes());
    data.extend_from_slice(&0x1234u16.to_be_bytes());
    data.extend_from_slice(&0u16.to_be_bytes());
    data.push(64);
    data.push(17); // UDP
    data.extend_from_slice(&0u16.to_be_bytes());
    data.extend_from_slice(&src.octets());
    data.extend_from_slice(&dst.octets());
    // UDP
    data.extend_from_slice(&src_port.to_be_bytes());
    data.extend_from_slice(&dst_port.to_be_bytes());
    data.extend_from_slice(&udp_len.to_be_bytes());
    data.extend_from_slice(&0u16.to_be_bytes());
    data.extend_from_slice(payload);
    data
}

/// Write a little-endian pcap file with Ethernet link type
pub fn write_pcap(path: &Path, frames: &[Frame]) -> std::io::Result<()> {
    let mut data = Vec::new();

    // Global header
    data.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
    data.extend_from_slice(&2u16.to_le_bytes());
    data.extend_from_slice(&4u16.to_le_bytes());
    data.extend_from_slice(&0i32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&65535u32.to_le_bytes());
    data.extend_from_slice(&1u32.to_le_bytes());

    for frame in frames {
        let len = frame.data.len() as u32;
        data.extend_from_slice(&frame.ts_sec.to_le_bytes());
        data.extend_from_slice(&frame.ts_usec.to_le_bytes());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&frame.data);
    }

    fs::write(path, data)
}

/// The probe frame plus unrelated traffic that the default filter rejects
pub fn mixed_traffic() -> Vec<Frame> {
    vec![
        Frame::udp(100, Ipv4Addr::new(1, 1, 1, 1), 53, b"dns"),
        Frame::udp(101, Ipv4Addr::new(8, 8, 8, 8), 9, PAYLOAD),
        Frame::udp(102, Ipv4Addr::new(8, 8, 8, 8), 53, b"dns"),
    ]
}
