pub mod axi;
pub mod bench;
pub mod config;
pub mod error;
pub mod golden;
pub mod master;
pub mod monitor;
pub mod ram;
pub mod runner;
pub mod sched;
pub mod scoreboard;
pub mod slice;
pub mod sources;
pub mod time;
pub mod transaction;
#[cfg(feature = "verilator")]
pub mod verilator;

pub use axi::{Burst, Bus, ChannelId, PortId, Resp};
pub use bench::{Bench, RunReport};
pub use config::{ByteOrder, Simulator, TbConfig};
pub use error::{FailureKind, Mismatch, TbError};
pub use golden::GoldenMemory;
pub use runner::{
    run, run_behavioral, run_cancellable, run_with_wall_clock_limit, TestOutcome, Verdict,
};
pub use scoreboard::{RandomStimulus, ScriptedStimulus, Stimulus};
pub use slice::{Fault, PipelineStage, RegisterSlice};
pub use sources::BuildPlan;
pub use time::{SimTime, TimeScale};
pub use transaction::TransferSize;
