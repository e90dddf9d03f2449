//! Failure taxonomy of a testbench run

use std::fmt;

use thiserror::Error;

use crate::axi::Resp;
use crate::time::SimTime;

/// Broad class of a failure, used to tell "wrong answer" from "hung".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Configuration,
    DataIntegrity,
    Timeout,
    Bus,
    Simulator,
}

/// Where the mismatching bytes were observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    /// Returned through the pipeline on the read channel
    BusRead,
    /// Read directly out of the memory agent
    Backdoor,
}

/// Read-back disagreement with the golden model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub address: u64,
    pub expected: Vec<u8>,
    pub actual: Vec<u8>,
    pub observed: Observed,
}

impl Mismatch {
    /// First differing byte as `(address, expected, actual)`.
    pub fn first_difference(&self) -> Option<(u64, u8, u8)> {
        self.expected
            .iter()
            .zip(&self.actual)
            .enumerate()
            .find(|(_, (e, a))| e != a)
            .map(|(i, (e, a))| (self.address + i as u64, *e, *a))
    }
}

fn hex_bytes(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    write!(f, "[")?;
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{b:02X}")?;
    }
    write!(f, "]")
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.observed {
            Observed::BusRead => "read",
            Observed::Backdoor => "memory",
        };
        write!(f, "{source} at {:#05x}: expected ", self.address)?;
        hex_bytes(f, &self.expected)?;
        write!(f, ", actual ")?;
        hex_bytes(f, &self.actual)?;
        if let Some((addr, e, a)) = self.first_difference() {
            write!(f, " (byte {addr:#05x}: expected {e:#04x}, actual {a:#04x})")?;
        } else if self.expected.len() != self.actual.len() {
            write!(
                f,
                " (length {} vs {})",
                self.expected.len(),
                self.actual.len()
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum TbError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("address {address:#x}+{len} outside addressable range [0, {limit:#x})")]
    AddressOutOfRange { address: u64, len: usize, limit: u64 },

    #[error("address {address:#x} is not aligned to a {bytes}-byte transfer")]
    Misaligned { address: u64, bytes: usize },

    #[error("data mismatch {0}")]
    DataIntegrity(Mismatch),

    #[error("timeout at {at} after {cycles} cycles waiting for {waiting}")]
    Timeout {
        at: SimTime,
        cycles: u64,
        waiting: String,
    },

    #[error("bus responded {resp:?} to access at {address:#x}")]
    BusResponse { address: u64, resp: Resp },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("simulator: {0}")]
    Simulator(String),
}

impl TbError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TbError::Config(_) | TbError::AddressOutOfRange { .. } | TbError::Misaligned { .. } => {
                FailureKind::Configuration
            }
            TbError::DataIntegrity(_) => FailureKind::DataIntegrity,
            TbError::Timeout { .. } => FailureKind::Timeout,
            TbError::BusResponse { .. } | TbError::Protocol(_) => FailureKind::Bus,
            TbError::Simulator(_) => FailureKind::Simulator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_names_first_differing_byte() {
        let mismatch = Mismatch {
            address: 0x10,
            expected: vec![0xDE, 0xAD, 0xBE, 0xEF],
            actual: vec![0xDE, 0xAD, 0x41, 0xEF],
            observed: Observed::BusRead,
        };
        assert_eq!(mismatch.first_difference(), Some((0x12, 0xBE, 0x41)));
        let text = mismatch.to_string();
        assert!(text.contains("0x010"), "{text}");
        assert!(text.contains("[DE AD BE EF]"), "{text}");
        assert!(text.contains("[DE AD 41 EF]"), "{text}");
    }

    #[test]
    fn test_error_kinds() {
        let oob = TbError::AddressOutOfRange {
            address: 0x1000,
            len: 4,
            limit: 0x1000,
        };
        assert_eq!(oob.kind(), FailureKind::Configuration);
        let hung = TbError::Timeout {
            at: SimTime(5),
            cycles: 200,
            waiting: "read".into(),
        };
        assert_eq!(hung.kind(), FailureKind::Timeout);
    }
}
