//! Run configuration, read once from the environment and passed by reference

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use camino::Utf8PathBuf;

use crate::error::TbError;
use crate::time::{SimTime, TimeScale};
use crate::transaction::TransferSize;

/// Simulation backend named by `SIM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Simulator {
    Verilator,
    Icarus,
    Other(String),
}

impl Simulator {
    /// Extra compile arguments the backend gets (waveform tracing and
    /// coverage for Verilator).
    pub fn extra_args(&self) -> Vec<String> {
        match self {
            Simulator::Verilator => [
                "--trace-fst",
                "--coverage",
                "--coverage-line",
                "--coverage-toggle",
                "--trace-structs",
                "--Wno-UNOPTFLAT",
                "--Wno-REDEFMACRO",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            Simulator::Icarus | Simulator::Other(_) => Vec::new(),
        }
    }
}

impl FromStr for Simulator {
    type Err = TbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" => Err(TbError::Config("empty simulator name".into())),
            "verilator" => Ok(Simulator::Verilator),
            "icarus" | "iverilog" => Ok(Simulator::Icarus),
            other => Ok(Simulator::Other(other.to_string())),
        }
    }
}

impl fmt::Display for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Simulator::Verilator => f.write_str("verilator"),
            Simulator::Icarus => f.write_str("icarus"),
            Simulator::Other(name) => f.write_str(name),
        }
    }
}

/// How a numeric stimulus value becomes payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    /// Encodes the low `width` bytes of `value`; `width` is 1 to 8.
    pub fn encode(self, value: u64, width: usize) -> Result<Vec<u8>, TbError> {
        if !(1..=8).contains(&width) {
            return Err(TbError::Config(format!(
                "a numeric value encodes to 1 to 8 bytes, not {width}"
            )));
        }
        let mut bytes = value.to_le_bytes()[..width].to_vec();
        if self == ByteOrder::Big {
            bytes.reverse();
        }
        Ok(bytes)
    }
}

impl FromStr for ByteOrder {
    type Err = TbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "little" | "le" => Ok(ByteOrder::Little),
            "big" | "be" => Ok(ByteOrder::Big),
            other => Err(TbError::Config(format!("unknown byte order `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TbConfig {
    /// Toplevel of the design under test
    pub dut: String,
    pub simulator: Simulator,
    pub timescale: TimeScale,
    /// Clock period in time units
    pub clock_period: u64,
    pub reset_cycles: u32,
    pub ram_size: u64,
    /// Data bus width in bytes
    pub bus_bytes: usize,
    pub transfer_size: TransferSize,
    pub iterations: usize,
    pub byte_order: ByteOrder,
    pub seed: u64,
    /// Percentage of cycles the memory agent holds its ready signals low
    pub backpressure: u8,
    /// Clock periods without progress before the run is declared hung
    pub timeout_cycles: u64,
    /// Ceiling on the whole run in clock periods
    pub run_limit_cycles: Option<u64>,
    pub wall_clock_limit: Option<Duration>,
    /// Root of the HDL tree the build plan is resolved from
    pub rtl_root: Option<Utf8PathBuf>,
}

impl Default for TbConfig {
    fn default() -> Self {
        Self {
            dut: "axi_register_slice".to_string(),
            simulator: Simulator::Verilator,
            timescale: TimeScale::default(),
            clock_period: 10,
            reset_cycles: 3,
            ram_size: 4096,
            bus_bytes: 4,
            transfer_size: TransferSize::default(),
            iterations: 1000,
            byte_order: ByteOrder::Little,
            seed: 0x5EED,
            backpressure: 0,
            timeout_cycles: 200,
            run_limit_cycles: None,
            wall_clock_limit: None,
            rtl_root: None,
        }
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String, TbError> {
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| TbError::Config(format!("environment variable {name} is not set")))
}

fn optional<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, TbError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| TbError::Config(format!("{name}={raw}: {e}"))),
        _ => Ok(None),
    }
}

impl TbConfig {
    /// Reads `DUT`, `SIM`, `TIMEUNIT`, `TIMEPREC` and the optional `TB_*`
    /// knobs from the process environment.
    pub fn from_env() -> Result<Self, TbError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TbError> {
        let dut = required(&lookup, "DUT")?;
        let simulator = required(&lookup, "SIM")?.parse()?;
        let unit = required(&lookup, "TIMEUNIT")?.parse()?;
        let precision = required(&lookup, "TIMEPREC")?.parse()?;

        let mut config = TbConfig {
            dut,
            simulator,
            timescale: TimeScale::new(unit, precision)?,
            ..TbConfig::default()
        };
        if let Some(seed) = optional(&lookup, "TB_SEED")? {
            config.seed = seed;
        }
        if let Some(iterations) = optional(&lookup, "TB_ITERATIONS")? {
            config.iterations = iterations;
        }
        if let Some(ram_size) = optional(&lookup, "TB_RAM_SIZE")? {
            config.ram_size = ram_size;
        }
        if let Some(backpressure) = optional(&lookup, "TB_BACKPRESSURE")? {
            config.backpressure = backpressure;
        }
        if let Some(order) = optional(&lookup, "TB_BYTE_ORDER")? {
            config.byte_order = order;
        }
        if let Some(secs) = optional::<u64>(&lookup, "TB_WALL_CLOCK_SECS")? {
            config.wall_clock_limit = Some(Duration::from_secs(secs));
        }
        config.rtl_root = lookup("RTL_ROOT")
            .filter(|v| !v.trim().is_empty())
            .map(Utf8PathBuf::from);
        config.validate()?;
        Ok(config)
    }

    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn ram_size(mut self, ram_size: u64) -> Self {
        self.ram_size = ram_size;
        self
    }

    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    pub fn backpressure(mut self, percent: u8) -> Self {
        self.backpressure = percent;
        self
    }

    pub fn bus_bytes(mut self, bus_bytes: usize) -> Self {
        self.bus_bytes = bus_bytes;
        self
    }

    pub fn transfer_size(mut self, size: TransferSize) -> Self {
        self.transfer_size = size;
        self
    }

    pub fn timeout_cycles(mut self, cycles: u64) -> Self {
        self.timeout_cycles = cycles;
        self
    }

    pub fn run_limit_cycles(mut self, cycles: u64) -> Self {
        self.run_limit_cycles = Some(cycles);
        self
    }

    pub fn validate(&self) -> Result<(), TbError> {
        if self.dut.trim().is_empty() {
            return Err(TbError::Config("DUT name is empty".into()));
        }
        if !matches!(self.bus_bytes, 1 | 2 | 4 | 8) {
            return Err(TbError::Config(format!(
                "data bus width must be 1, 2, 4 or 8 bytes, got {}",
                self.bus_bytes
            )));
        }
        if self.transfer_size.bytes() > self.bus_bytes {
            return Err(TbError::Config(format!(
                "{}-byte transfers do not fit a {}-byte bus",
                self.transfer_size.bytes(),
                self.bus_bytes
            )));
        }
        if self.ram_size < self.transfer_size.bytes() as u64
            || self.ram_size % self.bus_bytes as u64 != 0
        {
            return Err(TbError::Config(format!(
                "memory size {} must hold at least one transfer and be a multiple of the bus width",
                self.ram_size
            )));
        }
        if self.reset_cycles == 0 {
            return Err(TbError::Config("reset must last at least one cycle".into()));
        }
        if self.timeout_cycles == 0 {
            return Err(TbError::Config("timeout window must be non-zero".into()));
        }
        if self.backpressure >= 100 {
            return Err(TbError::Config(format!(
                "back-pressure of {}% would never accept a transfer",
                self.backpressure
            )));
        }
        let period = self.period();
        if period.steps() < 2 || period.steps() % 2 != 0 {
            return Err(TbError::Config(format!(
                "clock period of {} {} cannot be split into two half periods at {} precision",
                self.clock_period,
                self.timescale.unit(),
                self.timescale.precision()
            )));
        }
        Ok(())
    }

    /// Clock period in simulated time.
    pub fn period(&self) -> SimTime {
        self.timescale.to_sim_time(self.clock_period)
    }

    pub fn half_period(&self) -> SimTime {
        SimTime(self.period().steps() / 2)
    }

    pub fn timeout_window(&self) -> SimTime {
        SimTime(self.period().steps().saturating_mul(self.timeout_cycles))
    }

    pub fn run_limit(&self) -> Option<SimTime> {
        self.run_limit_cycles
            .map(|cycles| SimTime(self.period().steps().saturating_mul(cycles)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_from_lookup_reads_required_vars() {
        let config = TbConfig::from_lookup(lookup_from(&[
            ("DUT", "axi_register_slice"),
            ("SIM", "verilator"),
            ("TIMEUNIT", "1ns"),
            ("TIMEPREC", "1ps"),
        ]))
        .unwrap();
        assert_eq!(config.dut, "axi_register_slice");
        assert_eq!(config.simulator, Simulator::Verilator);
        assert_eq!(config.timescale.to_string(), "1ns/1ps");
        assert_eq!(config.period(), SimTime(10_000));
        assert_eq!(config.iterations, 1000);
        assert_eq!(config.reset_cycles, 3);
        assert_eq!(config.timeout_window(), SimTime(2_000_000));
    }

    #[test]
    fn test_missing_dut_is_config_error() {
        let err = TbConfig::from_lookup(lookup_from(&[
            ("SIM", "verilator"),
            ("TIMEUNIT", "1ns"),
            ("TIMEPREC", "1ps"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("DUT"), "{err}");
    }

    #[test]
    fn test_optional_knobs() {
        let config = TbConfig::from_lookup(lookup_from(&[
            ("DUT", "slice"),
            ("SIM", "icarus"),
            ("TIMEUNIT", "1ns"),
            ("TIMEPREC", "1ps"),
            ("TB_SEED", "42"),
            ("TB_ITERATIONS", "7"),
            ("TB_BYTE_ORDER", "big"),
            ("RTL_ROOT", "/tmp/rtl"),
        ]))
        .unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.iterations, 7);
        assert_eq!(config.byte_order, ByteOrder::Big);
        assert_eq!(config.rtl_root.as_deref(), Some(camino::Utf8Path::new("/tmp/rtl")));
        assert!(config.simulator.extra_args().is_empty());

        let bad = TbConfig::from_lookup(lookup_from(&[
            ("DUT", "slice"),
            ("SIM", "verilator"),
            ("TIMEUNIT", "1ns"),
            ("TIMEPREC", "1ps"),
            ("TB_ITERATIONS", "many"),
        ]));
        assert!(bad.is_err());
    }

    #[test]
    fn test_odd_period_at_coarse_precision_is_rejected() {
        let mut config = TbConfig::default();
        config.timescale = TimeScale::new("1ns".parse().unwrap(), "1ns".parse().unwrap()).unwrap();
        config.clock_period = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_byte_order_encoding() {
        assert_eq!(ByteOrder::Big.encode(0xDEADBEEF, 4).unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(ByteOrder::Little.encode(0xDEADBEEF, 4).unwrap(), vec![0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(ByteOrder::Big.encode(0x0102, 8).unwrap(), vec![0, 0, 0, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_byte_order_rejects_widths_past_a_u64() {
        assert!(matches!(ByteOrder::Little.encode(1, 16), Err(TbError::Config(_))));
        assert!(ByteOrder::Big.encode(1, 0).is_err());
    }
}
