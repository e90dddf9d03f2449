//! Reference memory the scoreboard checks the pipeline against

use std::collections::BTreeMap;

use crate::error::TbError;

/// Sparse byte store holding the most recent committed write per address.
/// Never-written bytes read as the fill value.
#[derive(Debug, Clone)]
pub struct GoldenMemory {
    size: u64,
    fill: u8,
    bytes: BTreeMap<u64, u8>,
}

impl GoldenMemory {
    pub fn new(size: u64) -> Self {
        Self::with_fill(size, 0)
    }

    pub fn with_fill(size: u64, fill: u8) -> Self {
        Self {
            size,
            fill,
            bytes: BTreeMap::new(),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn check(&self, address: u64, len: usize) -> Result<(), TbError> {
        match address.checked_add(len as u64) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(TbError::AddressOutOfRange {
                address,
                len,
                limit: self.size,
            }),
        }
    }

    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<(), TbError> {
        self.check(address, data.len())?;
        for (i, byte) in data.iter().enumerate() {
            self.bytes.insert(address + i as u64, *byte);
        }
        Ok(())
    }

    pub fn read(&self, address: u64, len: usize) -> Result<Vec<u8>, TbError> {
        self.check(address, len)?;
        Ok((0..len as u64)
            .map(|i| *self.bytes.get(&(address + i)).unwrap_or(&self.fill))
            .collect())
    }

    pub fn is_written(&self, address: u64) -> bool {
        self.bytes.contains_key(&address)
    }

    /// Number of distinct bytes ever written
    pub fn footprint(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_bytes_read_as_fill() {
        let golden = GoldenMemory::with_fill(64, 0xA5);
        assert_eq!(golden.read(8, 4).unwrap(), vec![0xA5; 4]);
        assert!(!golden.is_written(8));
    }

    #[test]
    fn test_last_write_wins_on_overlap() {
        let mut golden = GoldenMemory::new(64);
        golden.write(0, &[1, 2, 3, 4]).unwrap();
        golden.write(2, &[9, 9]).unwrap();
        assert_eq!(golden.read(0, 4).unwrap(), vec![1, 2, 9, 9]);
        assert_eq!(golden.footprint(), 4);
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let mut golden = GoldenMemory::new(16);
        assert!(golden.write(14, &[0; 4]).is_err());
        assert!(golden.read(16, 1).is_err());
        assert!(golden.read(12, 4).is_ok());
    }
}
