//! Initiator-side bus-functional model

use std::collections::{HashMap, VecDeque};
use std::fmt;

use log::{debug, trace};

use crate::axi::{AddrBeat, AxiPort, Burst, ChannelId, Resp, WriteBeat};
use crate::config::TbConfig;
use crate::error::TbError;
use crate::transaction::{pack_lanes, plan_beats, unpack_lanes, BeatSlot, Transaction, TransferSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Write { resp: Resp },
    Read { data: Vec<u8>, resp: Resp },
}

impl Completion {
    pub fn resp(&self) -> Resp {
        match self {
            Completion::Write { resp } | Completion::Read { resp, .. } => *resp,
        }
    }
}

#[derive(Debug)]
struct WriteJob {
    id: TxnId,
    aw: AddrBeat,
    aw_sent: bool,
    beats: VecDeque<WriteBeat>,
}

#[derive(Debug)]
struct ReadJob {
    id: TxnId,
    ar: AddrBeat,
    ar_sent: bool,
    slots: Vec<BeatSlot>,
    received: usize,
    data: Vec<u8>,
    resp: Resp,
}

/// Drives AW/W/AR and collects B/R on the upstream port. Requests queue in
/// issue order; one write and one read are on the bus at a time.
#[derive(Debug)]
pub struct MasterAgent {
    ram_size: u64,
    bus_bytes: usize,
    writes: VecDeque<WriteJob>,
    reads: VecDeque<ReadJob>,
    completions: HashMap<TxnId, Completion>,
    next_id: u64,
    accepted: [u64; 5],
    completed: u64,
}

impl MasterAgent {
    pub fn new(config: &TbConfig) -> Self {
        Self {
            ram_size: config.ram_size,
            bus_bytes: config.bus_bytes,
            writes: VecDeque::new(),
            reads: VecDeque::new(),
            completions: HashMap::new(),
            next_id: 0,
            accepted: [0; 5],
            completed: 0,
        }
    }

    fn allocate_id(&mut self) -> TxnId {
        let id = TxnId(self.next_id);
        self.next_id += 1;
        id
    }

    fn check(&self, txn: &Transaction) -> Result<(), TbError> {
        txn.validate(self.ram_size)?;
        if txn.size.bytes() > self.bus_bytes {
            return Err(TbError::Config(format!(
                "{}-byte beats do not fit the {}-byte data bus",
                txn.size.bytes(),
                self.bus_bytes
            )));
        }
        Ok(())
    }

    fn addr_beat(&self, txn: &Transaction) -> AddrBeat {
        AddrBeat {
            addr: txn.address,
            len: (txn.beats() - 1) as u8,
            size: txn.size.encoded(),
            burst: Burst::Incr,
        }
    }

    /// Queues a write of `data` at `address`.
    pub fn write(&mut self, address: u64, data: &[u8], size: TransferSize) -> Result<TxnId, TbError> {
        let txn = Transaction::write(address, data.to_vec(), size);
        self.check(&txn)?;
        let slots = plan_beats(address, data.len(), size, self.bus_bytes);
        let last = slots.len() - 1;
        let beats = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| WriteBeat {
                data: pack_lanes(data, slot),
                strb: slot.strobe(),
                last: i == last,
            })
            .collect();
        let id = self.allocate_id();
        debug!("{id}: write {address:#x} {data:02X?}");
        self.writes.push_back(WriteJob {
            id,
            aw: self.addr_beat(&txn),
            aw_sent: false,
            beats,
        });
        Ok(id)
    }

    /// Queues a read of `len` bytes at `address`.
    pub fn read(&mut self, address: u64, len: usize, size: TransferSize) -> Result<TxnId, TbError> {
        let txn = Transaction::read(address, len, size);
        self.check(&txn)?;
        let id = self.allocate_id();
        debug!("{id}: read {address:#x} +{len}");
        self.reads.push_back(ReadJob {
            id,
            ar: self.addr_beat(&txn),
            ar_sent: false,
            slots: plan_beats(address, len, size, self.bus_bytes),
            received: 0,
            data: Vec::with_capacity(len),
            resp: Resp::Okay,
        });
        Ok(id)
    }

    pub fn is_complete(&self, id: TxnId) -> bool {
        self.completions.contains_key(&id)
    }

    pub fn take_completion(&mut self, id: TxnId) -> Option<Completion> {
        self.completions.remove(&id)
    }

    pub fn is_idle(&self) -> bool {
        self.writes.is_empty() && self.reads.is_empty()
    }

    /// Transactions finished since construction
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Handshakes this agent took part in on `channel`
    pub fn accepted(&self, channel: ChannelId) -> u64 {
        self.accepted[channel.index()]
    }

    pub fn total_accepted(&self) -> u64 {
        self.accepted.iter().sum()
    }

    /// Asynchronous reset: drops in-flight requests and deasserts outputs.
    pub fn reset(&mut self, port: &mut AxiPort) {
        if !self.is_idle() {
            debug!(
                "reset dropped {} write(s) and {} read(s)",
                self.writes.len(),
                self.reads.len()
            );
        }
        self.writes.clear();
        self.reads.clear();
        port.aw.valid = false;
        port.w.valid = false;
        port.ar.valid = false;
        port.b.ready = false;
        port.r.ready = false;
    }

    /// Samples the port at a rising edge and drives it for the next cycle.
    pub fn tick(&mut self, sampled: &AxiPort, next: &mut AxiPort) -> Result<(), TbError> {
        if sampled.aw.fired() {
            self.accepted[ChannelId::Aw.index()] += 1;
            if let Some(job) = self.writes.front_mut() {
                trace!("{}: AW accepted", job.id);
                job.aw_sent = true;
            }
        }
        if sampled.w.fired() {
            self.accepted[ChannelId::W.index()] += 1;
            if let Some(job) = self.writes.front_mut() {
                job.beats.pop_front();
            }
        }
        if sampled.b.fired() {
            self.accepted[ChannelId::B.index()] += 1;
            self.finish_write(sampled.b.payload.resp)?;
        }
        if sampled.ar.fired() {
            self.accepted[ChannelId::Ar.index()] += 1;
            if let Some(job) = self.reads.front_mut() {
                trace!("{}: AR accepted", job.id);
                job.ar_sent = true;
            }
        }
        if sampled.r.fired() {
            self.accepted[ChannelId::R.index()] += 1;
            let beat = sampled.r.payload;
            self.receive_read_beat(beat.data, beat.resp, beat.last)?;
        }
        self.drive(next);
        Ok(())
    }

    fn finish_write(&mut self, resp: Resp) -> Result<(), TbError> {
        match self.writes.front() {
            Some(job) if job.aw_sent && job.beats.is_empty() => {}
            Some(job) => {
                return Err(TbError::Protocol(format!(
                    "write response for {} before its address and data were accepted",
                    job.id
                )))
            }
            None => {
                return Err(TbError::Protocol(
                    "write response with no write outstanding".into(),
                ))
            }
        }
        if let Some(job) = self.writes.pop_front() {
            debug!("{}: write done {resp:?}", job.id);
            self.completions.insert(job.id, Completion::Write { resp });
            self.completed += 1;
        }
        Ok(())
    }

    fn receive_read_beat(&mut self, word: u64, resp: Resp, last: bool) -> Result<(), TbError> {
        let job = match self.reads.front_mut() {
            Some(job) if job.ar_sent => job,
            _ => {
                return Err(TbError::Protocol(
                    "read data with no read address accepted".into(),
                ))
            }
        };
        let slot = match job.slots.get(job.received) {
            Some(slot) => *slot,
            None => {
                return Err(TbError::Protocol(format!(
                    "{} received more than {} read beats",
                    job.id,
                    job.slots.len()
                )))
            }
        };
        job.data.extend(unpack_lanes(word, &slot));
        job.received += 1;
        if !resp.is_ok() {
            job.resp = resp;
        }
        let expect_last = job.received == job.slots.len();
        if last != expect_last {
            return Err(TbError::Protocol(format!(
                "{} RLAST={} on beat {} of {}",
                job.id,
                last,
                job.received,
                job.slots.len()
            )));
        }
        if last {
            if let Some(job) = self.reads.pop_front() {
                debug!("{}: read done {:02X?} {:?}", job.id, job.data, job.resp);
                self.completions.insert(
                    job.id,
                    Completion::Read {
                        data: job.data,
                        resp: job.resp,
                    },
                );
                self.completed += 1;
            }
        }
        Ok(())
    }

    fn drive(&self, next: &mut AxiPort) {
        match self.writes.front() {
            Some(job) => {
                next.aw.valid = !job.aw_sent;
                next.aw.payload = job.aw;
                match job.beats.front() {
                    Some(beat) => {
                        next.w.valid = true;
                        next.w.payload = *beat;
                    }
                    None => next.w.valid = false,
                }
                next.b.ready = true;
            }
            None => {
                next.aw.valid = false;
                next.w.valid = false;
                next.b.ready = false;
            }
        }
        match self.reads.front() {
            Some(job) => {
                next.ar.valid = !job.ar_sent;
                next.ar.payload = job.ar;
                next.r.ready = true;
            }
            None => {
                next.ar.valid = false;
                next.r.ready = false;
            }
        }
    }
}
