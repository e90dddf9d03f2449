//! Transaction generator and scoreboard

use std::collections::VecDeque;

use log::{debug, error, info};
use rand::{Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::bench::Bench;
use crate::config::{ByteOrder, TbConfig};
use crate::error::{Mismatch, Observed, TbError};
use crate::golden::GoldenMemory;
use crate::master::{Completion, TxnId};
use crate::sched::{Process, Step, Trigger};
use crate::time::SimTime;
use crate::transaction::TransferSize;

/// Source of `(address, data)` pairs to write and read back.
pub trait Stimulus {
    fn next_pair(&mut self) -> Option<(u64, Vec<u8>)>;
}

/// Uniformly random aligned addresses and data, reproducible from a seed.
pub struct RandomStimulus {
    rng: Xoshiro256PlusPlus,
    ram_size: u64,
    size: TransferSize,
    remaining: usize,
}

impl RandomStimulus {
    pub fn new(config: &TbConfig) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(config.seed),
            ram_size: config.ram_size,
            size: config.transfer_size,
            remaining: config.iterations,
        }
    }
}

impl Stimulus for RandomStimulus {
    fn next_pair(&mut self) -> Option<(u64, Vec<u8>)> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let address = self.size.align(self.rng.gen_range(0..self.ram_size));
        let mut data = vec![0u8; self.size.bytes()];
        self.rng.fill_bytes(&mut data);
        Some((address, data))
    }
}

/// A fixed list of writes, given as numeric values encoded by byte order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStimulus {
    items: VecDeque<(u64, Vec<u8>)>,
}

impl ScriptedStimulus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(mut self, address: u64, data: Vec<u8>) -> Self {
        self.items.push_back((address, data));
        self
    }

    pub fn word(self, address: u64, value: u64, width: usize, order: ByteOrder) -> Result<Self, TbError> {
        Ok(self.bytes(address, order.encode(value, width)?))
    }
}

impl Stimulus for ScriptedStimulus {
    fn next_pair(&mut self) -> Option<(u64, Vec<u8>)> {
        self.items.pop_front()
    }
}

#[derive(Debug)]
enum Phase {
    AwaitReset,
    Idle,
    Writing { address: u64, data: Vec<u8>, id: TxnId },
    Reading { address: u64, len: usize, id: TxnId },
    Finished,
}

/// Drives each write-then-read pair through the master agent and checks
/// the read-back against the golden model. The first mismatch ends the run.
pub struct Scoreboard<'s> {
    golden: GoldenMemory,
    stimulus: Box<dyn Stimulus + 's>,
    size: TransferSize,
    phase: Phase,
    checked: usize,
}

impl<'s> Scoreboard<'s> {
    pub fn new(config: &TbConfig, stimulus: Box<dyn Stimulus + 's>) -> Self {
        Self {
            golden: GoldenMemory::new(config.ram_size),
            stimulus,
            size: config.transfer_size,
            phase: Phase::AwaitReset,
            checked: 0,
        }
    }

    fn compare(&self, address: u64, expected: &[u8], actual: Vec<u8>, observed: Observed) -> Result<(), TbError> {
        if expected == actual.as_slice() {
            return Ok(());
        }
        let mismatch = Mismatch {
            address,
            expected: expected.to_vec(),
            actual,
            observed,
        };
        error!("{mismatch}");
        Err(TbError::DataIntegrity(mismatch))
    }

    fn completion(bench: &mut Bench<'_>, id: TxnId) -> Result<Completion, TbError> {
        bench
            .take_completion(id)
            .ok_or_else(|| TbError::Protocol(format!("resumed before {id} completed")))
    }
}

impl<'a, 's> Process<Bench<'a>> for Scoreboard<'s> {
    fn name(&self) -> &str {
        "scoreboard"
    }

    fn resume(&mut self, bench: &mut Bench<'a>, now: SimTime) -> Result<Step, TbError> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Finished) {
                Phase::AwaitReset => {
                    self.phase = Phase::Idle;
                    return Ok(Step::Wait(Trigger::ResetReleased));
                }
                Phase::Idle => {
                    let Some((address, data)) = self.stimulus.next_pair() else {
                        info!("{now}: {} transactions checked", self.checked);
                        return Ok(Step::Done);
                    };
                    let id = bench.issue_write(address, &data, self.size)?;
                    self.phase = Phase::Writing { address, data, id };
                    return Ok(Step::Wait(Trigger::Completion(id)));
                }
                Phase::Writing { address, data, id } => {
                    let resp = Self::completion(bench, id)?.resp();
                    if !resp.is_ok() {
                        return Err(TbError::BusResponse { address, resp });
                    }
                    self.golden.write(address, &data)?;
                    let len = data.len();
                    let id = bench.issue_read(address, len, self.size)?;
                    self.phase = Phase::Reading { address, len, id };
                    return Ok(Step::Wait(Trigger::Completion(id)));
                }
                Phase::Reading { address, len, id } => {
                    let (actual, resp) = match Self::completion(bench, id)? {
                        Completion::Read { data, resp } => (data, resp),
                        Completion::Write { .. } => {
                            return Err(TbError::Protocol(format!("{id} completed as a write")))
                        }
                    };
                    if !resp.is_ok() {
                        return Err(TbError::BusResponse { address, resp });
                    }
                    let expected = self.golden.read(address, len)?;
                    self.compare(address, &expected, actual, Observed::BusRead)?;
                    let stored = bench.ram().read(address, len)?;
                    self.compare(address, &expected, stored, Observed::Backdoor)?;
                    self.checked += 1;
                    bench.report_mut().transactions_checked = self.checked;
                    debug!("{now}: {address:#x} ok ({} checked)", self.checked);
                    self.phase = Phase::Idle;
                }
                Phase::Finished => return Ok(Step::Done),
            }
        }
    }
}
