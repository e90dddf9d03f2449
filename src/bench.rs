//! The testbench world: bus, agents, DUT, and the clock/reset processes

use log::{debug, info};

use crate::axi::Bus;
use crate::config::TbConfig;
use crate::error::TbError;
use crate::master::{Completion, MasterAgent, TxnId};
use crate::monitor::ProtocolMonitor;
use crate::ram::RamAgent;
use crate::sched::{Process, Step, Trigger, World};
use crate::slice::PipelineStage;
use crate::time::SimTime;
use crate::transaction::TransferSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetState {
    NotApplied,
    Asserted,
    Released,
}

/// Counters gathered over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub transactions_checked: usize,
    pub writes: usize,
    pub reads: usize,
    pub cycles: u64,
    pub sim_time: SimTime,
}

pub struct Bench<'a> {
    config: &'a TbConfig,
    bus: Bus,
    clk: bool,
    edges: u64,
    reset: ResetState,
    master: MasterAgent,
    ram: RamAgent,
    dut: Box<dyn PipelineStage + 'a>,
    monitor: ProtocolMonitor,
    report: RunReport,
}

impl<'a> Bench<'a> {
    pub fn new(config: &'a TbConfig, dut: Box<dyn PipelineStage + 'a>) -> Self {
        Self {
            config,
            bus: Bus::default(),
            clk: false,
            edges: 0,
            reset: ResetState::NotApplied,
            master: MasterAgent::new(config),
            ram: RamAgent::new(config),
            dut,
            monitor: ProtocolMonitor::new(),
            report: RunReport::default(),
        }
    }

    pub fn config(&self) -> &TbConfig {
        self.config
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn master(&self) -> &MasterAgent {
        &self.master
    }

    pub fn ram(&self) -> &RamAgent {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut RamAgent {
        &mut self.ram
    }

    pub fn monitor(&self) -> &ProtocolMonitor {
        &self.monitor
    }

    pub fn reset_state(&self) -> ResetState {
        self.reset
    }

    pub fn report_mut(&mut self) -> &mut RunReport {
        &mut self.report
    }

    pub fn report(&self, now: SimTime) -> RunReport {
        RunReport {
            cycles: self.edges,
            sim_time: now,
            ..self.report
        }
    }

    /// Drives the asynchronous reset line. Asserting it clears every
    /// component at once, without waiting for a clock edge.
    pub fn set_reset(&mut self, asserted: bool) -> Result<(), TbError> {
        self.bus.arst = asserted;
        if asserted {
            self.reset = ResetState::Asserted;
            self.master.reset(&mut self.bus.upstream);
            self.ram.reset(&mut self.bus.downstream);
            self.dut.reset(&mut self.bus)?;
        } else if self.reset == ResetState::Asserted {
            self.reset = ResetState::Released;
        }
        Ok(())
    }

    /// Drives the clock line; a low-to-high transition evaluates every
    /// synchronous component against the values sampled at the edge.
    pub fn set_clock(&mut self, level: bool) -> Result<(), TbError> {
        let rising = level && !self.clk;
        self.clk = level;
        if rising {
            self.rising_edge()?;
        }
        Ok(())
    }

    fn rising_edge(&mut self) -> Result<(), TbError> {
        let sampled = self.bus;
        let mut next = sampled;
        self.edges += 1;
        self.monitor.observe(&sampled)?;
        if sampled.arst {
            self.master.reset(&mut next.upstream);
            self.ram.reset(&mut next.downstream);
            self.dut.reset(&mut next)?;
        } else {
            self.master.tick(&sampled.upstream, &mut next.upstream)?;
            self.dut.tick(&sampled, &mut next)?;
            self.ram.tick(&sampled.downstream, &mut next.downstream);
        }
        self.bus = next;
        Ok(())
    }

    fn check_out_of_reset(&self) -> Result<(), TbError> {
        if self.reset != ResetState::Released {
            return Err(TbError::Config(
                "transaction issued before reset was released".into(),
            ));
        }
        Ok(())
    }

    pub fn issue_write(&mut self, address: u64, data: &[u8], size: TransferSize) -> Result<TxnId, TbError> {
        self.check_out_of_reset()?;
        let id = self.master.write(address, data, size)?;
        self.report.writes += 1;
        Ok(id)
    }

    pub fn issue_read(&mut self, address: u64, len: usize, size: TransferSize) -> Result<TxnId, TbError> {
        self.check_out_of_reset()?;
        let id = self.master.read(address, len, size)?;
        self.report.reads += 1;
        Ok(id)
    }

    pub fn take_completion(&mut self, id: TxnId) -> Option<Completion> {
        self.master.take_completion(id)
    }

    /// Monotonic count of events that show the run is not hung.
    pub fn progress(&self) -> u64 {
        self.master.completed() + (self.reset == ResetState::Released) as u64
    }
}

impl World for Bench<'_> {
    fn rising_edges(&self) -> u64 {
        self.edges
    }

    fn is_complete(&self, id: TxnId) -> bool {
        self.master.is_complete(id)
    }

    fn reset_released(&self) -> bool {
        self.reset == ResetState::Released
    }
}

/// Free-running clock, starting low.
pub struct Clock {
    half_period: SimTime,
    level: bool,
    started: bool,
}

impl Clock {
    pub fn new(config: &TbConfig) -> Self {
        Self {
            half_period: config.half_period(),
            level: false,
            started: false,
        }
    }
}

impl<'a> Process<Bench<'a>> for Clock {
    fn name(&self) -> &str {
        "clock"
    }

    fn resume(&mut self, bench: &mut Bench<'a>, _now: SimTime) -> Result<Step, TbError> {
        if self.started {
            self.level = !self.level;
        } else {
            self.started = true;
            info!(
                "clock started: period {} {} ({})",
                bench.config().clock_period,
                bench.config().timescale.unit(),
                bench.config().timescale
            );
        }
        bench.set_clock(self.level)?;
        Ok(Step::Wait(Trigger::Timer(self.half_period)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetPhase {
    Assert,
    Release,
    Finished,
}

/// Holds reset for a fixed number of rising edges, then releases it.
pub struct ResetSequencer {
    cycles: u32,
    phase: ResetPhase,
}

impl ResetSequencer {
    pub fn new(config: &TbConfig) -> Self {
        Self {
            cycles: config.reset_cycles,
            phase: ResetPhase::Assert,
        }
    }
}

impl<'a> Process<Bench<'a>> for ResetSequencer {
    fn name(&self) -> &str {
        "reset"
    }

    fn resume(&mut self, bench: &mut Bench<'a>, now: SimTime) -> Result<Step, TbError> {
        match self.phase {
            ResetPhase::Assert => {
                debug!("{now}: reset asserted for {} cycles", self.cycles);
                bench.set_reset(true)?;
                self.phase = ResetPhase::Release;
                Ok(Step::Wait(Trigger::RisingEdges(self.cycles as u64)))
            }
            ResetPhase::Release => {
                bench.set_reset(false)?;
                info!("{now}: reset released");
                self.phase = ResetPhase::Finished;
                Ok(Step::Done)
            }
            ResetPhase::Finished => Ok(Step::Done),
        }
    }
}

/// Fails the run when a whole window passes without progress.
pub struct Watchdog {
    window: SimTime,
    window_cycles: u64,
    last_progress: Option<u64>,
}

impl Watchdog {
    pub fn new(config: &TbConfig) -> Self {
        Self {
            window: config.timeout_window(),
            window_cycles: config.timeout_cycles,
            last_progress: None,
        }
    }
}

impl<'a> Process<Bench<'a>> for Watchdog {
    fn name(&self) -> &str {
        "watchdog"
    }

    fn resume(&mut self, bench: &mut Bench<'a>, now: SimTime) -> Result<Step, TbError> {
        let progress = bench.progress();
        if self.last_progress == Some(progress) {
            let waiting = if bench.reset_state() != ResetState::Released {
                "reset release".to_string()
            } else if bench.master().is_idle() {
                "the stimulus to issue a transaction".to_string()
            } else {
                "a bus response".to_string()
            };
            return Err(TbError::Timeout {
                at: now,
                cycles: self.window_cycles,
                waiting,
            });
        }
        self.last_progress = Some(progress);
        Ok(Step::Wait(Trigger::Timer(self.window)))
    }
}
