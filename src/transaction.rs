//! Transactions issued by the master agent and how they map onto beats

use crate::error::TbError;

/// AXI `AxSIZE` encoding: `1 << size` bytes per beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSize(u8);

impl TransferSize {
    /// Largest encoding a 64-bit data bus can carry
    pub const MAX_ENCODED: u8 = 3;

    pub fn new(encoded: u8) -> Result<Self, TbError> {
        if encoded > Self::MAX_ENCODED {
            return Err(TbError::Config(format!(
                "transfer size {encoded} exceeds a 64-bit data bus"
            )));
        }
        Ok(Self(encoded))
    }

    pub fn from_bytes(bytes: usize) -> Result<Self, TbError> {
        if !bytes.is_power_of_two() {
            return Err(TbError::Config(format!(
                "transfer width {bytes} is not a power of two"
            )));
        }
        Self::new(bytes.trailing_zeros() as u8)
    }

    pub fn encoded(self) -> u8 {
        self.0
    }

    pub fn bytes(self) -> usize {
        1 << self.0
    }

    /// Clears the low address bits so the address satisfies this width.
    pub fn align(self, address: u64) -> u64 {
        address & !(self.bytes() as u64 - 1)
    }

    pub fn is_aligned(self, address: u64) -> bool {
        self.align(address) == address
    }
}

impl Default for TransferSize {
    fn default() -> Self {
        // 32-bit transfers
        Self(2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Write,
    Read,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub address: u64,
    pub len: usize,
    /// Payload for writes; returned bytes for a completed read
    pub data: Vec<u8>,
    pub size: TransferSize,
    pub direction: Direction,
}

impl Transaction {
    pub fn write(address: u64, data: Vec<u8>, size: TransferSize) -> Self {
        Self {
            address,
            len: data.len(),
            data,
            size,
            direction: Direction::Write,
        }
    }

    pub fn read(address: u64, len: usize, size: TransferSize) -> Self {
        Self {
            address,
            len,
            data: Vec::new(),
            size,
            direction: Direction::Read,
        }
    }

    /// Checks alignment, range and AXI burst limits.
    pub fn validate(&self, ram_size: u64) -> Result<(), TbError> {
        if self.len == 0 {
            return Err(TbError::Config(format!(
                "zero-length transfer at {:#x}",
                self.address
            )));
        }
        if !self.size.is_aligned(self.address) {
            return Err(TbError::Misaligned {
                address: self.address,
                bytes: self.size.bytes(),
            });
        }
        let end = self.address.checked_add(self.len as u64);
        if end.map_or(true, |end| end > ram_size) {
            return Err(TbError::AddressOutOfRange {
                address: self.address,
                len: self.len,
                limit: ram_size,
            });
        }
        let last = self.address + self.len as u64 - 1;
        if self.address >> 12 != last >> 12 {
            return Err(TbError::Config(format!(
                "burst at {:#x}+{} crosses a 4 KiB boundary",
                self.address, self.len
            )));
        }
        if self.beats() > 256 {
            return Err(TbError::Config(format!(
                "burst at {:#x} needs {} beats, AXI allows 256",
                self.address,
                self.beats()
            )));
        }
        Ok(())
    }

    pub fn beats(&self) -> usize {
        self.len.div_ceil(self.size.bytes())
    }
}

/// Byte lanes one beat of a burst occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatSlot {
    /// First data lane carrying payload
    pub lane: usize,
    /// Payload bytes in this beat
    pub count: usize,
    /// Offset of the first byte within the transaction payload
    pub offset: usize,
}

impl BeatSlot {
    pub fn strobe(&self) -> u8 {
        (((1u16 << self.count) - 1) << self.lane) as u8
    }
}

/// Splits an aligned INCR transfer into beats on a `bus_bytes`-wide bus.
pub fn plan_beats(address: u64, len: usize, size: TransferSize, bus_bytes: usize) -> Vec<BeatSlot> {
    let step = size.bytes();
    (0..len.div_ceil(step))
        .map(|i| {
            let offset = i * step;
            let beat_addr = address + offset as u64;
            BeatSlot {
                lane: (beat_addr % bus_bytes as u64) as usize,
                count: step.min(len - offset),
                offset,
            }
        })
        .collect()
}

/// Packs payload bytes into a data word at the lanes of `slot`.
pub fn pack_lanes(payload: &[u8], slot: &BeatSlot) -> u64 {
    payload[slot.offset..slot.offset + slot.count]
        .iter()
        .enumerate()
        .fold(0u64, |word, (i, byte)| {
            word | (*byte as u64) << (8 * (slot.lane + i))
        })
}

/// Extracts the payload bytes of `slot` from a data word.
pub fn unpack_lanes(word: u64, slot: &BeatSlot) -> Vec<u8> {
    (0..slot.count)
        .map(|i| (word >> (8 * (slot.lane + i))) as u8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_size_encoding() {
        let size = TransferSize::from_bytes(4).unwrap();
        assert_eq!(size.encoded(), 2);
        assert_eq!(size.align(0xFFF), 0xFFC);
        assert!(TransferSize::from_bytes(3).is_err());
        assert!(TransferSize::new(4).is_err());
    }

    #[test]
    fn test_validate_boundaries() {
        let size = TransferSize::default();
        assert!(Transaction::read(4092, 4, size).validate(4096).is_ok());
        assert!(matches!(
            Transaction::read(4096, 4, size).validate(4096),
            Err(TbError::AddressOutOfRange { .. })
        ));
        assert!(matches!(
            Transaction::read(2, 4, size).validate(4096),
            Err(TbError::Misaligned { .. })
        ));
        assert!(Transaction::read(0xFFC, 8, size).validate(0x2000).is_err());
    }

    #[test]
    fn test_narrow_beats_on_wide_bus() {
        // 2-byte beats on a 64-bit bus starting at 0x0A
        let size = TransferSize::from_bytes(2).unwrap();
        let slots = plan_beats(0x0A, 6, size, 8);
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0], BeatSlot { lane: 2, count: 2, offset: 0 });
        assert_eq!(slots[1], BeatSlot { lane: 4, count: 2, offset: 2 });
        assert_eq!(slots[2].lane, 6);
        assert_eq!(slots[0].strobe(), 0b0000_1100);
    }

    #[test]
    fn test_lane_packing() {
        let slot = BeatSlot {
            lane: 4,
            count: 4,
            offset: 0,
        };
        let word = pack_lanes(&[0xDE, 0xAD, 0xBE, 0xEF], &slot);
        assert_eq!(word, 0xEFBE_ADDE_0000_0000);
        assert_eq!(unpack_lanes(word, &slot), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }
}
