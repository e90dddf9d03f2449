//! Passive checker of the valid/ready rules on both ports

use log::trace;

use crate::axi::{AxiPort, Bus, ChannelId, PortId};
use crate::error::TbError;

const PORTS: [PortId; 2] = [PortId::Upstream, PortId::Downstream];

/// Counts handshakes per port and channel and rejects a sender that drops
/// `valid` or changes its payload before the transfer was accepted.
#[derive(Debug, Default)]
pub struct ProtocolMonitor {
    previous: Option<Bus>,
    handshakes: [[u64; 5]; 2],
    edges: u64,
}

impl ProtocolMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn port_index(port: PortId) -> usize {
        match port {
            PortId::Upstream => 0,
            PortId::Downstream => 1,
        }
    }

    pub fn handshakes(&self, port: PortId, channel: ChannelId) -> u64 {
        self.handshakes[Self::port_index(port)][channel.index()]
    }

    pub fn total_handshakes(&self) -> u64 {
        self.handshakes.iter().flatten().sum()
    }

    /// Observes the bus as sampled at a rising edge.
    pub fn observe(&mut self, sampled: &Bus) -> Result<(), TbError> {
        self.edges += 1;
        if sampled.arst {
            self.previous = None;
            return Ok(());
        }
        for port in PORTS {
            let now = sampled.port(port);
            if let Some(previous) = self.previous.as_ref() {
                Self::check_stable(self.edges, port, previous.port(port), now)?;
            }
            for channel in ChannelId::ALL {
                let (valid, ready) = now.handshake(channel);
                if valid && ready {
                    trace!("edge {}: {port} {channel} handshake", self.edges);
                    self.handshakes[Self::port_index(port)][channel.index()] += 1;
                }
            }
        }
        self.previous = Some(*sampled);
        Ok(())
    }

    fn check_stable(edge: u64, port: PortId, before: &AxiPort, now: &AxiPort) -> Result<(), TbError> {
        for channel in ChannelId::ALL {
            let (valid, ready) = before.handshake(channel);
            if !valid || ready {
                continue;
            }
            let (still_valid, _) = now.handshake(channel);
            if !still_valid {
                return Err(TbError::Protocol(format!(
                    "edge {edge}: {port} {channel} valid dropped before ready"
                )));
            }
            if !before.same_payload(now, channel) {
                return Err(TbError::Protocol(format!(
                    "edge {edge}: {port} {channel} payload changed while waiting for ready"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_only_when_both_signals_high() {
        let mut monitor = ProtocolMonitor::new();
        let mut bus = Bus::default();
        bus.upstream.aw.valid = true;
        monitor.observe(&bus).unwrap();
        assert_eq!(monitor.total_handshakes(), 0);
        bus.upstream.aw.ready = true;
        monitor.observe(&bus).unwrap();
        assert_eq!(monitor.handshakes(PortId::Upstream, ChannelId::Aw), 1);
    }

    #[test]
    fn test_dropping_valid_is_a_violation() {
        let mut monitor = ProtocolMonitor::new();
        let mut bus = Bus::default();
        bus.downstream.r.valid = true;
        monitor.observe(&bus).unwrap();
        bus.downstream.r.valid = false;
        assert!(matches!(monitor.observe(&bus), Err(TbError::Protocol(_))));
    }

    #[test]
    fn test_changing_payload_is_a_violation() {
        let mut monitor = ProtocolMonitor::new();
        let mut bus = Bus::default();
        bus.upstream.w.valid = true;
        bus.upstream.w.payload.data = 1;
        monitor.observe(&bus).unwrap();
        bus.upstream.w.payload.data = 2;
        assert!(monitor.observe(&bus).is_err());
    }

    #[test]
    fn test_reset_forgets_pending_transfers() {
        let mut monitor = ProtocolMonitor::new();
        let mut bus = Bus::default();
        bus.upstream.ar.valid = true;
        monitor.observe(&bus).unwrap();
        bus.upstream.ar.valid = false;
        bus.arst = true;
        monitor.observe(&bus).unwrap();
        bus.arst = false;
        monitor.observe(&bus).unwrap();
    }
}
