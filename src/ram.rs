//! Memory-backed responder on the far side of the pipeline stage

use std::collections::VecDeque;

use log::{debug, trace};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::axi::{AddrBeat, AxiPort, ChannelId, Resp, WriteBeat};
use crate::config::TbConfig;
use crate::error::TbError;

/// Accepted requests the agent buffers before it stops accepting more
const QUEUE_DEPTH: usize = 4;

#[derive(Debug)]
struct WriteBurst {
    aw: AddrBeat,
    beat: usize,
    resp: Resp,
}

#[derive(Debug)]
struct ReadBurst {
    ar: AddrBeat,
    beat: usize,
}

#[derive(Debug)]
pub struct RamAgent {
    mem: Vec<u8>,
    bus_bytes: usize,
    aw_queue: VecDeque<AddrBeat>,
    w_queue: VecDeque<WriteBeat>,
    write_burst: Option<WriteBurst>,
    b_queue: VecDeque<Resp>,
    ar_queue: VecDeque<AddrBeat>,
    read_burst: Option<ReadBurst>,
    backpressure: u8,
    rng: Xoshiro256PlusPlus,
    accepted: [u64; 5],
}

impl RamAgent {
    pub fn new(config: &TbConfig) -> Self {
        Self {
            mem: vec![0; config.ram_size as usize],
            bus_bytes: config.bus_bytes,
            aw_queue: VecDeque::new(),
            w_queue: VecDeque::new(),
            write_burst: None,
            b_queue: VecDeque::new(),
            ar_queue: VecDeque::new(),
            read_burst: None,
            backpressure: config.backpressure,
            // Decorrelate stalls from the stimulus stream
            rng: Xoshiro256PlusPlus::seed_from_u64(config.seed ^ 0x9E37_79B9_7F4A_7C15),
            accepted: [0; 5],
        }
    }

    pub fn size(&self) -> u64 {
        self.mem.len() as u64
    }

    fn range(&self, address: u64, len: usize) -> Result<std::ops::Range<usize>, TbError> {
        match address.checked_add(len as u64) {
            Some(end) if end <= self.size() => Ok(address as usize..end as usize),
            _ => Err(TbError::AddressOutOfRange {
                address,
                len,
                limit: self.size(),
            }),
        }
    }

    /// Reads memory directly, bypassing the bus.
    pub fn read(&self, address: u64, len: usize) -> Result<Vec<u8>, TbError> {
        let range = self.range(address, len)?;
        Ok(self.mem[range].to_vec())
    }

    /// Writes memory directly, bypassing the bus.
    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<(), TbError> {
        let range = self.range(address, data.len())?;
        self.mem[range].copy_from_slice(data);
        Ok(())
    }

    pub fn accepted(&self, channel: ChannelId) -> u64 {
        self.accepted[channel.index()]
    }

    pub fn total_accepted(&self) -> u64 {
        self.accepted.iter().sum()
    }

    /// Asynchronous reset: pending requests are dropped, memory is kept.
    pub fn reset(&mut self, port: &mut AxiPort) {
        self.aw_queue.clear();
        self.w_queue.clear();
        self.write_burst = None;
        self.b_queue.clear();
        self.ar_queue.clear();
        self.read_burst = None;
        port.aw.ready = false;
        port.w.ready = false;
        port.ar.ready = false;
        port.b.valid = false;
        port.r.valid = false;
    }

    fn word_base(&self, address: u64) -> u64 {
        address & !(self.bus_bytes as u64 - 1)
    }

    pub fn tick(&mut self, sampled: &AxiPort, next: &mut AxiPort) {
        if sampled.aw.fired() {
            self.accepted[ChannelId::Aw.index()] += 1;
            trace!("ram: AW {:#x}", sampled.aw.payload.addr);
            self.aw_queue.push_back(sampled.aw.payload);
        }
        if sampled.w.fired() {
            self.accepted[ChannelId::W.index()] += 1;
            self.w_queue.push_back(sampled.w.payload);
        }
        if sampled.ar.fired() {
            self.accepted[ChannelId::Ar.index()] += 1;
            trace!("ram: AR {:#x}", sampled.ar.payload.addr);
            self.ar_queue.push_back(sampled.ar.payload);
        }
        if sampled.b.fired() {
            self.accepted[ChannelId::B.index()] += 1;
            self.b_queue.pop_front();
        }
        if sampled.r.fired() {
            self.accepted[ChannelId::R.index()] += 1;
            if let Some(burst) = self.read_burst.as_mut() {
                burst.beat += 1;
                if burst.beat == burst.ar.beats() {
                    self.read_burst = None;
                }
            }
        }

        self.commit_writes();
        if self.read_burst.is_none() {
            self.read_burst = self
                .ar_queue
                .pop_front()
                .map(|ar| ReadBurst { ar, beat: 0 });
        }
        self.drive(next);
    }

    fn commit_writes(&mut self) {
        loop {
            if self.write_burst.is_none() {
                match self.aw_queue.pop_front() {
                    Some(aw) => {
                        self.write_burst = Some(WriteBurst {
                            aw,
                            beat: 0,
                            resp: Resp::Okay,
                        })
                    }
                    None => return,
                }
            }
            let beat = match self.w_queue.pop_front() {
                Some(beat) => beat,
                None => return,
            };
            let Some(mut burst) = self.write_burst.take() else {
                return;
            };
            let base = self.word_base(burst.aw.beat_addr(burst.beat));
            match self.range(base, self.bus_bytes) {
                Ok(range) => {
                    for (lane, slot) in self.mem[range].iter_mut().enumerate() {
                        if beat.strb & (1 << lane) != 0 {
                            *slot = (beat.data >> (8 * lane)) as u8;
                        }
                    }
                }
                Err(_) => burst.resp = Resp::SlvErr,
            }
            burst.beat += 1;
            if beat.last || burst.beat == burst.aw.beats() {
                debug!("ram: committed write {:#x} {:?}", burst.aw.addr, burst.resp);
                self.b_queue.push_back(burst.resp);
            } else {
                self.write_burst = Some(burst);
            }
        }
    }

    fn read_word(&self, address: u64) -> (u64, Resp) {
        let base = self.word_base(address);
        match self.range(base, self.bus_bytes) {
            Ok(range) => {
                let word = self.mem[range]
                    .iter()
                    .rev()
                    .fold(0u64, |word, byte| (word << 8) | *byte as u64);
                (word, Resp::Okay)
            }
            Err(_) => (0, Resp::SlvErr),
        }
    }

    fn drive(&mut self, next: &mut AxiPort) {
        let stalled = self.backpressure > 0 && self.rng.gen_range(0..100u8) < self.backpressure;
        next.aw.ready = !stalled && self.aw_queue.len() < QUEUE_DEPTH;
        next.w.ready = !stalled && self.w_queue.len() < QUEUE_DEPTH * 256;
        next.ar.ready = !stalled && self.ar_queue.len() < QUEUE_DEPTH;

        match self.b_queue.front() {
            Some(resp) => {
                next.b.valid = true;
                next.b.payload.resp = *resp;
            }
            None => next.b.valid = false,
        }
        match &self.read_burst {
            Some(burst) => {
                let (data, resp) = self.read_word(burst.ar.beat_addr(burst.beat));
                next.r.valid = true;
                next.r.payload.data = data;
                next.r.payload.resp = resp;
                next.r.payload.last = burst.beat + 1 == burst.ar.beats();
            }
            None => next.r.valid = false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axi::Burst;

    fn ram() -> RamAgent {
        RamAgent::new(&TbConfig::default())
    }

    #[test]
    fn test_backdoor_round_trip_and_range() {
        let mut ram = ram();
        ram.write(0xFFC, &[1, 2, 3, 4]).unwrap();
        assert_eq!(ram.read(0xFFC, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(ram.read(0x100, 2).unwrap(), vec![0, 0]);
        assert!(matches!(
            ram.read(0x1000, 4),
            Err(TbError::AddressOutOfRange { .. })
        ));
    }

    #[test]
    fn test_strobed_write_then_response() {
        let mut ram = ram();
        let mut sampled = AxiPort::default();
        sampled.aw.valid = true;
        sampled.aw.ready = true;
        sampled.aw.payload = AddrBeat {
            addr: 0x20,
            len: 0,
            size: 1,
            burst: Burst::Incr,
        };
        sampled.w.valid = true;
        sampled.w.ready = true;
        sampled.w.payload = WriteBeat {
            data: 0xAABB_CCDD,
            strb: 0b0011,
            last: true,
        };
        let mut next = sampled;
        ram.tick(&sampled, &mut next);
        assert_eq!(ram.read(0x20, 4).unwrap(), vec![0xDD, 0xCC, 0, 0]);
        assert!(next.b.valid);
        assert_eq!(next.b.payload.resp, Resp::Okay);
    }

    #[test]
    fn test_read_burst_presents_beats_in_order() {
        let mut ram = ram();
        ram.write(0x40, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut port = AxiPort::default();
        port.ar.valid = true;
        port.ar.ready = true;
        port.ar.payload = AddrBeat {
            addr: 0x40,
            len: 1,
            size: 2,
            burst: Burst::Incr,
        };
        let sampled = port;
        ram.tick(&sampled, &mut port);
        port.ar.valid = false;
        assert!(port.r.valid && !port.r.payload.last);
        assert_eq!(port.r.payload.data, 0x0403_0201);

        port.r.ready = true;
        let sampled = port;
        ram.tick(&sampled, &mut port);
        assert!(port.r.valid && port.r.payload.last);
        assert_eq!(port.r.payload.data, 0x0807_0605);

        let sampled = port;
        ram.tick(&sampled, &mut port);
        assert!(!port.r.valid);
        assert_eq!(ram.accepted(ChannelId::R), 2);
    }
}
