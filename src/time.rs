//! Simulated time and the `unit/precision` timescale

use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use crate::error::TbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeUnit {
    Fs,
    Ps,
    Ns,
    Us,
    Ms,
    S,
}

impl TimeUnit {
    fn femtos(self) -> u128 {
        match self {
            TimeUnit::Fs => 1,
            TimeUnit::Ps => 1_000,
            TimeUnit::Ns => 1_000_000,
            TimeUnit::Us => 1_000_000_000,
            TimeUnit::Ms => 1_000_000_000_000,
            TimeUnit::S => 1_000_000_000_000_000,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            TimeUnit::Fs => "fs",
            TimeUnit::Ps => "ps",
            TimeUnit::Ns => "ns",
            TimeUnit::Us => "us",
            TimeUnit::Ms => "ms",
            TimeUnit::S => "s",
        }
    }
}

/// A Verilog time literal such as `1ns` or `100ps`. The magnitude is
/// restricted to 1, 10 or 100 like a `` `timescale`` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpec {
    magnitude: u32,
    unit: TimeUnit,
}

impl TimeSpec {
    pub fn new(magnitude: u32, unit: TimeUnit) -> Result<Self, TbError> {
        if !matches!(magnitude, 1 | 10 | 100) {
            return Err(TbError::Config(format!(
                "time magnitude must be 1, 10 or 100, got {magnitude}"
            )));
        }
        Ok(Self { magnitude, unit })
    }

    pub fn femtos(&self) -> u128 {
        self.magnitude as u128 * self.unit.femtos()
    }
}

impl FromStr for TimeSpec {
    type Err = TbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| TbError::Config(format!("time literal `{s}` has no unit")))?;
        let (digits, unit) = s.split_at(split);
        let magnitude = if digits.is_empty() {
            1
        } else {
            digits
                .parse::<u32>()
                .map_err(|e| TbError::Config(format!("bad time magnitude in `{s}`: {e}")))?
        };
        let unit = match unit.trim() {
            "fs" => TimeUnit::Fs,
            "ps" => TimeUnit::Ps,
            "ns" => TimeUnit::Ns,
            "us" => TimeUnit::Us,
            "ms" => TimeUnit::Ms,
            "s" => TimeUnit::S,
            other => return Err(TbError::Config(format!("unknown time unit `{other}`"))),
        };
        TimeSpec::new(magnitude, unit)
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.magnitude, self.unit.suffix())
    }
}

/// Time unit and precision. Simulated time is counted in precision steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeScale {
    unit: TimeSpec,
    precision: TimeSpec,
}

impl TimeScale {
    pub fn new(unit: TimeSpec, precision: TimeSpec) -> Result<Self, TbError> {
        if precision.femtos() > unit.femtos() {
            return Err(TbError::Config(format!(
                "time precision {precision} is coarser than time unit {unit}"
            )));
        }
        Ok(Self { unit, precision })
    }

    pub fn unit(&self) -> TimeSpec {
        self.unit
    }

    pub fn precision(&self) -> TimeSpec {
        self.precision
    }

    /// Precision steps in one time unit.
    pub fn steps_per_unit(&self) -> u64 {
        (self.unit.femtos() / self.precision.femtos()) as u64
    }

    /// Converts an amount of time units into simulated time.
    pub fn to_sim_time(&self, units: u64) -> SimTime {
        SimTime(units.saturating_mul(self.steps_per_unit()))
    }
}

impl Default for TimeScale {
    fn default() -> Self {
        Self {
            unit: TimeSpec {
                magnitude: 1,
                unit: TimeUnit::Ns,
            },
            precision: TimeSpec {
                magnitude: 1,
                unit: TimeUnit::Ps,
            },
        }
    }
}

impl fmt::Display for TimeScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.unit, self.precision)
    }
}

/// Absolute simulated time (or a delay) in precision steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime(pub u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub fn steps(self) -> u64 {
        self.0
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} steps", self.0)
    }
}
