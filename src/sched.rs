//! Discrete-event kernel multiplexing testbench processes on simulated time

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace};

use crate::error::TbError;
use crate::master::TxnId;
use crate::time::SimTime;

/// State the kernel needs to decide whether a waiting process can resume.
pub trait World {
    fn rising_edges(&self) -> u64;
    fn is_complete(&self, id: TxnId) -> bool;
    fn reset_released(&self) -> bool;
}

/// What a suspended process waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Relative delay
    Timer(SimTime),
    RisingEdges(u64),
    Completion(TxnId),
    ResetReleased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Wait(Trigger),
    Done,
}

/// A resumable state machine. Each call runs until the next suspension point.
pub trait Process<W> {
    fn name(&self) -> &str;

    fn resume(&mut self, world: &mut W, now: SimTime) -> Result<Step, TbError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    time: SimTime,
    seq: u64,
    pid: Pid,
}

#[derive(Debug, Clone, Copy)]
enum Blocked {
    Edges(u64),
    Completion(TxnId),
    ResetReleased,
}

struct Slot<'a, W> {
    process: Box<dyn Process<W> + 'a>,
    foreground: bool,
    done: bool,
}

pub struct Kernel<'a, W> {
    now: SimTime,
    seq: u64,
    queue: BinaryHeap<Reverse<Entry>>,
    slots: Vec<Slot<'a, W>>,
    blocked: Vec<(Pid, Blocked)>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a, W: World> Default for Kernel<'a, W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, W: World> Kernel<'a, W> {
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            seq: 0,
            queue: BinaryHeap::new(),
            slots: Vec::new(),
            blocked: Vec::new(),
            cancel: None,
        }
    }

    /// Makes `run` stop with `Timeout` at the next event once `flag` is set,
    /// e.g. from another thread enforcing a wall-clock limit.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Spawns a process the run waits for.
    pub fn spawn(&mut self, process: impl Process<W> + 'a) -> Pid {
        self.insert(Box::new(process), true)
    }

    /// Spawns a process that runs for as long as the foreground does.
    pub fn spawn_background(&mut self, process: impl Process<W> + 'a) -> Pid {
        self.insert(Box::new(process), false)
    }

    fn insert(&mut self, process: Box<dyn Process<W> + 'a>, foreground: bool) -> Pid {
        let pid = Pid(self.slots.len());
        debug!("spawn {} as {:?}", process.name(), pid);
        self.slots.push(Slot {
            process,
            foreground,
            done: false,
        });
        self.schedule(pid, self.now);
        pid
    }

    fn schedule(&mut self, pid: Pid, time: SimTime) {
        self.queue.push(Reverse(Entry {
            time,
            seq: self.seq,
            pid,
        }));
        self.seq += 1;
    }

    fn foreground_alive(&self) -> bool {
        self.slots.iter().any(|slot| slot.foreground && !slot.done)
    }

    fn blocked_names(&self) -> String {
        let names: Vec<String> = self
            .blocked
            .iter()
            .map(|(pid, why)| format!("{} ({why:?})", self.slots[pid.0].process.name()))
            .collect();
        if names.is_empty() {
            "nothing".into()
        } else {
            names.join(", ")
        }
    }

    /// Moves every blocked process whose condition holds onto the queue at
    /// the current time, in spawn order.
    fn release(&mut self, world: &W) {
        let mut ready: Vec<Pid> = Vec::new();
        self.blocked.retain(|(pid, why)| {
            let satisfied = match why {
                Blocked::Edges(target) => world.rising_edges() >= *target,
                Blocked::Completion(id) => world.is_complete(*id),
                Blocked::ResetReleased => world.reset_released(),
            };
            if satisfied {
                ready.push(*pid);
            }
            !satisfied
        });
        ready.sort();
        for pid in ready {
            self.schedule(pid, self.now);
        }
    }

    /// Runs until every foreground process is done. `limit` bounds the
    /// simulated time of the whole run.
    pub fn run(&mut self, world: &mut W, limit: Option<SimTime>) -> Result<SimTime, TbError> {
        while self.foreground_alive() {
            if let Some(cancel) = &self.cancel {
                if cancel.load(Ordering::Relaxed) {
                    return Err(TbError::Timeout {
                        at: self.now,
                        cycles: world.rising_edges(),
                        waiting: format!("the wall-clock limit: {}", self.blocked_names()),
                    });
                }
            }
            let Some(Reverse(entry)) = self.queue.pop() else {
                return Err(TbError::Timeout {
                    at: self.now,
                    cycles: world.rising_edges(),
                    waiting: format!("an event that can never occur: {}", self.blocked_names()),
                });
            };
            if let Some(limit) = limit {
                if entry.time > limit {
                    return Err(TbError::Timeout {
                        at: limit,
                        cycles: world.rising_edges(),
                        waiting: self.blocked_names(),
                    });
                }
            }
            self.now = entry.time;
            let slot = &mut self.slots[entry.pid.0];
            if slot.done {
                continue;
            }
            trace!("{}: resume {}", self.now, slot.process.name());
            let step = slot.process.resume(world, self.now)?;
            match step {
                Step::Done => slot.done = true,
                Step::Wait(Trigger::Timer(delay)) => self.schedule(entry.pid, self.now + delay),
                Step::Wait(Trigger::RisingEdges(n)) => self
                    .blocked
                    .push((entry.pid, Blocked::Edges(world.rising_edges() + n))),
                Step::Wait(Trigger::Completion(id)) => {
                    self.blocked.push((entry.pid, Blocked::Completion(id)))
                }
                Step::Wait(Trigger::ResetReleased) => {
                    self.blocked.push((entry.pid, Blocked::ResetReleased))
                }
            }
            self.release(world);
        }
        Ok(self.now)
    }
}
