//! The pipeline stage under test and a behavioral register slice

use log::warn;

use crate::axi::{AddrBeat, Bus, Channel, ReadBeat, RespBeat, WriteBeat};
use crate::error::TbError;

/// A design sitting between the upstream and downstream ports.
///
/// At each rising edge the stage sees the sampled bus and drives its own
/// signals into `next`: the ready of AW/W/AR and the valid/payload of B/R
/// upstream, the valid/payload of AW/W/AR and the ready of B/R downstream.
pub trait PipelineStage {
    fn name(&self) -> &str;

    /// Asynchronous reset is asserted.
    fn reset(&mut self, next: &mut Bus) -> Result<(), TbError>;

    fn tick(&mut self, sampled: &Bus, next: &mut Bus) -> Result<(), TbError>;
}

/// Two-entry buffer that keeps a channel fully registered: `ready` only
/// depends on whether the skid entry is free.
#[derive(Debug, Clone, Default)]
struct SkidBuffer<T> {
    main: Option<T>,
    skid: Option<T>,
}

impl<T: Copy> SkidBuffer<T> {
    /// Applies the handshakes sampled on both sides, returning the payload
    /// accepted from the input side if any.
    fn step(&mut self, input: &Channel<T>, output: &Channel<T>) -> Option<T> {
        if output.fired() {
            self.main = self.skid.take();
        }
        if !input.fired() {
            return None;
        }
        if self.main.is_none() {
            self.main = Some(input.payload);
        } else {
            self.skid = Some(input.payload);
        }
        Some(input.payload)
    }

    fn drive(&self, input: &mut Channel<T>, output: &mut Channel<T>) {
        input.ready = self.skid.is_none();
        output.valid = self.main.is_some();
        if let Some(payload) = self.main {
            output.payload = payload;
        }
    }

    fn clear(&mut self) {
        self.main = None;
        self.skid = None;
    }

    fn occupancy(&self) -> usize {
        self.main.is_some() as usize + self.skid.is_some() as usize
    }
}

/// Defects the behavioral slice can be told to exhibit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// XOR `mask` into data lane `lane` of the `beat`-th forwarded write beat
    CorruptWrite { beat: usize, lane: usize, mask: u8 },
    /// Never forward read data back upstream
    SwallowReadData,
}

/// Full AXI register slice: every channel goes through a skid buffer, so
/// each direction adds one cycle of latency and no combinational path.
#[derive(Debug, Clone, Default)]
pub struct RegisterSlice {
    aw: SkidBuffer<AddrBeat>,
    w: SkidBuffer<WriteBeat>,
    b: SkidBuffer<RespBeat>,
    ar: SkidBuffer<AddrBeat>,
    r: SkidBuffer<ReadBeat>,
    fault: Option<Fault>,
    forwarded_writes: usize,
}

impl RegisterSlice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A slice that injects `fault`. A corrupted lane must exist on a
    /// `bus_bytes`-wide data bus.
    pub fn with_fault(fault: Fault, bus_bytes: usize) -> Result<Self, TbError> {
        if let Fault::CorruptWrite { lane, .. } = fault {
            if lane >= bus_bytes.min(8) {
                return Err(TbError::Config(format!(
                    "cannot corrupt lane {lane} of a {bus_bytes}-byte data bus"
                )));
            }
        }
        Ok(Self {
            fault: Some(fault),
            ..Self::default()
        })
    }

    /// Beats currently held across all channels
    pub fn occupancy(&self) -> usize {
        self.aw.occupancy()
            + self.w.occupancy()
            + self.b.occupancy()
            + self.ar.occupancy()
            + self.r.occupancy()
    }

    fn corrupt_accepted_write(&mut self) {
        if let Some(Fault::CorruptWrite { beat, lane, mask }) = self.fault {
            if self.forwarded_writes == beat {
                // The most recent acceptance sits in skid if main was taken
                let slot = match self.w.skid.as_mut() {
                    Some(skid) => Some(skid),
                    None => self.w.main.as_mut(),
                };
                if let Some(payload) = slot {
                    warn!("injecting corruption into write beat {beat}, lane {lane}");
                    payload.data ^= (mask as u64) << (8 * lane);
                }
            }
        }
        self.forwarded_writes += 1;
    }
}

impl PipelineStage for RegisterSlice {
    fn name(&self) -> &str {
        "register_slice"
    }

    fn reset(&mut self, next: &mut Bus) -> Result<(), TbError> {
        self.aw.clear();
        self.w.clear();
        self.b.clear();
        self.ar.clear();
        self.r.clear();
        let (up, down) = (&mut next.upstream, &mut next.downstream);
        up.aw.ready = false;
        up.w.ready = false;
        up.ar.ready = false;
        up.b.valid = false;
        up.r.valid = false;
        down.aw.valid = false;
        down.w.valid = false;
        down.ar.valid = false;
        down.b.ready = false;
        down.r.ready = false;
        Ok(())
    }

    fn tick(&mut self, sampled: &Bus, next: &mut Bus) -> Result<(), TbError> {
        let (up, down) = (&sampled.upstream, &sampled.downstream);

        self.aw.step(&up.aw, &down.aw);
        if self.w.step(&up.w, &down.w).is_some() {
            self.corrupt_accepted_write();
        }
        self.ar.step(&up.ar, &down.ar);
        self.b.step(&down.b, &up.b);
        if self.fault == Some(Fault::SwallowReadData) {
            // Accept from downstream but drop everything
            self.r.step(&down.r, &up.r);
            self.r.clear();
        } else {
            self.r.step(&down.r, &up.r);
        }

        let (up, down) = (&mut next.upstream, &mut next.downstream);
        self.aw.drive(&mut up.aw, &mut down.aw);
        self.w.drive(&mut up.w, &mut down.w);
        self.ar.drive(&mut up.ar, &mut down.ar);
        self.b.drive(&mut down.b, &mut up.b);
        self.r.drive(&mut down.r, &mut up.r);
        Ok(())
    }
}
