//! # Capture Sources
//!
//! Ordered frame delivery from capture files, behind a trait so the
//! analysis pipeline can be driven by synthetic in-memory frame sequences
//! in tests. Sources are lazy, finite, and non-restartable; frames arrive
//! in capture order with their embedded timestamps.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::udp::UdpPacket;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture read failed: {0}")]
    Pcap(#[from] pcap::Error),
}

// ─── Frame sources ───────────────────────────────────────────────────────────

/// One captured frame: link-layer bytes plus the capture timestamp.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub timestamp: DateTime<Utc>,
    pub data: Bytes,
}

/// A lazy, finite, ordered sequence of captured frames.
pub trait FrameSource {
    /// Next frame in capture order, or `None` at end of capture.
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>, CaptureError>;
}

/// Frame source backed by an offline pcap file.
pub struct PcapFileSource {
    capture: pcap::Capture<pcap::Offline>,
}

impl PcapFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        Ok(PcapFileSource {
            capture: pcap::Capture::from_file(path)?,
        })
    }
}

impl FrameSource for PcapFileSource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>, CaptureError> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts;
                let timestamp = Utc
                    .timestamp_opt(ts.tv_sec as i64, (ts.tv_usec as u32).saturating_mul(1000))
                    .single()
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                Ok(Some(CapturedFrame {
                    timestamp,
                    data: Bytes::copy_from_slice(packet.data),
                }))
            }
            Err(pcap::Error::NoMorePackets) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory frame source for synthetic traffic.
#[derive(Default)]
pub struct MemorySource {
    frames: VecDeque<CapturedFrame>,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = CapturedFrame>) -> Self {
        MemorySource {
            frames: frames.into_iter().collect(),
        }
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>, CaptureError> {
        Ok(self.frames.pop_front())
    }
}

// ─── Datagram decoding ───────────────────────────────────────────────────────

const ETHERNET_HEADER_LEN: usize = 14;
const UDP_HEADER_LEN: usize = 8;

/// A decoded IPv4/UDP datagram within one frame.
#[derive(Debug)]
pub struct Datagram<'a> {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: &'a [u8],
}

/// Decode an Ethernet/IPv4/UDP frame. Anything else (other ethertypes,
/// non-UDP protocols, truncated headers) is `None` and skipped.
///
/// The payload slice is bounded by the declared IPv4 total length and UDP
/// length fields, so link-layer padding never leaks into the scan.
pub fn decode_datagram(frame: &[u8]) -> Option<Datagram<'_>> {
    let eth = EthernetPacket::new(frame)?;
    if eth.get_ethertype() != EtherTypes::Ipv4 {
        return None;
    }

    let ip_bytes = frame.get(ETHERNET_HEADER_LEN..)?;
    let ip = Ipv4Packet::new(ip_bytes)?;
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
        return None;
    }
    let header_len = ip.get_header_length() as usize * 4;
    let total_len = (ip.get_total_length() as usize).min(ip_bytes.len());
    let udp_bytes = ip_bytes.get(header_len..total_len)?;

    let udp = UdpPacket::new(udp_bytes)?;
    let udp_len = (udp.get_length() as usize).min(udp_bytes.len());
    let payload = udp_bytes.get(UDP_HEADER_LEN..udp_len)?;

    Some(Datagram {
        src: ip.get_source(),
        dst: ip.get_destination(),
        src_port: udp.get_source(),
        dst_port: udp.get_destination(),
        payload,
    })
}

/// Build a minimal Ethernet/IPv4/UDP frame around `payload`.
///
/// Checksums are left zero; the decoder does not verify them. Used by the
/// tests and by tooling that synthesizes traffic.
pub fn build_udp_frame(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Bytes {
    let ip_total = 20 + UDP_HEADER_LEN + payload.len();
    let mut frame = Vec::with_capacity(ETHERNET_HEADER_LEN + ip_total);

    // Ethernet: zero MACs, IPv4 ethertype.
    frame.extend_from_slice(&[0u8; 12]);
    frame.extend_from_slice(&[0x08, 0x00]);

    // IPv4 header, no options.
    frame.push(0x45);
    frame.push(0);
    frame.extend_from_slice(&(ip_total as u16).to_be_bytes());
    frame.extend_from_slice(&[0, 0, 0, 0]); // id + flags/fragment
    frame.push(64); // TTL
    frame.push(17); // UDP
    frame.extend_from_slice(&[0, 0]); // checksum
    frame.extend_from_slice(&src.octets());
    frame.extend_from_slice(&dst.octets());

    // UDP header.
    frame.extend_from_slice(&src_port.to_be_bytes());
    frame.extend_from_slice(&dst_port.to_be_bytes());
    frame.extend_from_slice(&((UDP_HEADER_LEN + payload.len()) as u16).to_be_bytes());
    frame.extend_from_slice(&[0, 0]); // checksum
    frame.extend_from_slice(payload);

    Bytes::from(frame)
}
