//! AXI4 channel signals as seen at a clock edge

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Burst {
    Fixed = 0,
    #[default]
    Incr = 1,
    Wrap = 2,
}

impl Burst {
    pub fn from_bits(bits: u8) -> Burst {
        match bits & 0b11 {
            0 => Burst::Fixed,
            2 => Burst::Wrap,
            _ => Burst::Incr,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Resp {
    #[default]
    Okay = 0,
    ExOkay = 1,
    SlvErr = 2,
    DecErr = 3,
}

impl Resp {
    pub fn from_bits(bits: u8) -> Resp {
        match bits & 0b11 {
            0 => Resp::Okay,
            1 => Resp::ExOkay,
            2 => Resp::SlvErr,
            _ => Resp::DecErr,
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, Resp::Okay | Resp::ExOkay)
    }
}

/// AW or AR payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddrBeat {
    pub addr: u64,
    /// Beats in the burst minus one
    pub len: u8,
    /// Bytes per beat, log2
    pub size: u8,
    pub burst: Burst,
}

impl AddrBeat {
    pub fn beats(&self) -> usize {
        self.len as usize + 1
    }

    pub fn beat_bytes(&self) -> u64 {
        1 << self.size
    }

    /// Address of beat `index` within the burst.
    pub fn beat_addr(&self, index: usize) -> u64 {
        let bytes = self.beat_bytes();
        let aligned = self.addr & !(bytes - 1);
        match self.burst {
            Burst::Fixed => self.addr,
            Burst::Incr => {
                if index == 0 {
                    self.addr
                } else {
                    aligned + index as u64 * bytes
                }
            }
            Burst::Wrap => {
                let container = bytes * self.beats() as u64;
                let low = (aligned / container) * container;
                low + (aligned - low + index as u64 * bytes) % container
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteBeat {
    pub data: u64,
    pub strb: u8,
    pub last: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RespBeat {
    pub resp: Resp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadBeat {
    pub data: u64,
    pub resp: Resp,
    pub last: bool,
}

/// valid/ready pair plus the payload the sender drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Channel<T> {
    pub valid: bool,
    pub ready: bool,
    pub payload: T,
}

impl<T> Channel<T> {
    /// True when a transfer happens at the edge this value was sampled on.
    pub fn fired(&self) -> bool {
        self.valid && self.ready
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelId {
    Aw,
    W,
    B,
    Ar,
    R,
}

impl ChannelId {
    pub const ALL: [ChannelId; 5] = [
        ChannelId::Aw,
        ChannelId::W,
        ChannelId::B,
        ChannelId::Ar,
        ChannelId::R,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelId::Aw => "AW",
            ChannelId::W => "W",
            ChannelId::B => "B",
            ChannelId::Ar => "AR",
            ChannelId::R => "R",
        };
        f.write_str(name)
    }
}

/// One AXI interface: five independent channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxiPort {
    pub aw: Channel<AddrBeat>,
    pub w: Channel<WriteBeat>,
    pub b: Channel<RespBeat>,
    pub ar: Channel<AddrBeat>,
    pub r: Channel<ReadBeat>,
}

impl AxiPort {
    /// `(valid, ready)` of a channel
    pub fn handshake(&self, channel: ChannelId) -> (bool, bool) {
        match channel {
            ChannelId::Aw => (self.aw.valid, self.aw.ready),
            ChannelId::W => (self.w.valid, self.w.ready),
            ChannelId::B => (self.b.valid, self.b.ready),
            ChannelId::Ar => (self.ar.valid, self.ar.ready),
            ChannelId::R => (self.r.valid, self.r.ready),
        }
    }

    /// Whether the payload of `channel` equals the one in `other`.
    pub fn same_payload(&self, other: &AxiPort, channel: ChannelId) -> bool {
        match channel {
            ChannelId::Aw => self.aw.payload == other.aw.payload,
            ChannelId::W => self.w.payload == other.w.payload,
            ChannelId::B => self.b.payload == other.b.payload,
            ChannelId::Ar => self.ar.payload == other.ar.payload,
            ChannelId::R => self.r.payload == other.r.payload,
        }
    }

    /// Drops every valid and ready, as an asserted reset does.
    pub fn clear_handshakes(&mut self) {
        self.aw.valid = false;
        self.aw.ready = false;
        self.w.valid = false;
        self.w.ready = false;
        self.b.valid = false;
        self.b.ready = false;
        self.ar.valid = false;
        self.ar.ready = false;
        self.r.valid = false;
        self.r.ready = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortId {
    /// Between the master agent and the pipeline stage
    Upstream,
    /// Between the pipeline stage and the memory agent
    Downstream,
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortId::Upstream => f.write_str("upstream"),
            PortId::Downstream => f.write_str("downstream"),
        }
    }
}

/// Every signal of the testbench at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bus {
    pub arst: bool,
    pub upstream: AxiPort,
    pub downstream: AxiPort,
}

impl Bus {
    pub fn port(&self, id: PortId) -> &AxiPort {
        match id {
            PortId::Upstream => &self.upstream,
            PortId::Downstream => &self.downstream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incr_beat_addresses() {
        let aw = AddrBeat {
            addr: 0x104,
            len: 3,
            size: 2,
            burst: Burst::Incr,
        };
        let addrs: Vec<u64> = (0..aw.beats()).map(|i| aw.beat_addr(i)).collect();
        assert_eq!(addrs, vec![0x104, 0x108, 0x10C, 0x110]);
    }

    #[test]
    fn test_wrap_beat_addresses() {
        // 4 beats of 4 bytes wrap inside a 16-byte container
        let ar = AddrBeat {
            addr: 0x38,
            len: 3,
            size: 2,
            burst: Burst::Wrap,
        };
        let addrs: Vec<u64> = (0..ar.beats()).map(|i| ar.beat_addr(i)).collect();
        assert_eq!(addrs, vec![0x38, 0x3C, 0x30, 0x34]);
    }

    #[test]
    fn test_fired_requires_both_signals() {
        let mut ch = Channel::<RespBeat>::default();
        ch.valid = true;
        assert!(!ch.fired());
        ch.ready = true;
        assert!(ch.fired());
    }
}
