//! Code address map
//!
//! Maps address ranges of dynamically compiled code to call frames. The
//! address space is split into banks of `2^bank_bits` bytes so that inserts
//! and lookups touch short sorted vectors. A range is stored in the bank of
//! its start address; ranges never overlap, which keeps starts and ends in
//! the same global order and lets a lookup stop at the first bank holding a
//! candidate.

use crate::event::CallFrame;
use serde_json::Value;
use std::collections::BTreeMap;

/// One compiled-code address range
#[derive(Debug, Clone, PartialEq)]
pub struct CodeRange {
    pub address: u64,
    pub size: u64,
    pub frame: CallFrame,
}

impl CodeRange {
    pub fn end(&self) -> u64 {
        self.address.saturating_add(self.size)
    }

    pub fn contains(&self, address: u64) -> bool {
        self.address <= address && address < self.end()
    }
}

#[derive(Debug, Clone)]
pub struct CodeMap {
    bank_bits: u32,
    banks: BTreeMap<u64, Vec<CodeRange>>,
}

impl Default for CodeMap {
    fn default() -> Self {
        Self::new(52)
    }
}

impl CodeMap {
    pub fn new(bank_bits: u32) -> Self {
        Self {
            bank_bits: bank_bits.clamp(1, 63),
            banks: BTreeMap::new(),
        }
    }

    fn bank_of(&self, address: u64) -> u64 {
        address >> self.bank_bits
    }

    /// Insert a range, evicting every existing range it overlaps
    pub fn add_entry(&mut self, address: u64, size: u64, frame: CallFrame) {
        let entry = CodeRange {
            address,
            size: size.max(1),
            frame,
        };
        let evicted = self.remove_overlapping(entry.address, entry.end());
        if evicted > 0 {
            tracing::trace!(address, evicted, "code entry replaced overlapping ranges");
        }
        let key = self.bank_of(address);
        let bank = self.banks.entry(key).or_default();
        let index = bank.partition_point(|e| e.address < address);
        bank.insert(index, entry);
    }

    /// Move the range starting exactly at `old` to `new`, resizing it.
    /// Returns false when no range starts at `old`.
    pub fn move_entry(&mut self, old: u64, new: u64, size: u64) -> bool {
        let key = self.bank_of(old);
        let Some(bank) = self.banks.get_mut(&key) else {
            return false;
        };
        let Ok(index) = bank.binary_search_by(|e| e.address.cmp(&old)) else {
            return false;
        };
        let entry = bank.remove(index);
        if bank.is_empty() {
            self.banks.remove(&key);
        }
        self.add_entry(new, size, entry.frame);
        true
    }

    /// The range containing `address`, if any
    pub fn lookup_range(&self, address: u64) -> Option<&CodeRange> {
        for bank in self.banks.range(..=self.bank_of(address)).map(|(_, b)| b).rev() {
            let index = bank.partition_point(|e| e.address <= address);
            if index > 0 {
                let candidate = &bank[index - 1];
                return candidate.contains(address).then_some(candidate);
            }
        }
        None
    }

    pub fn lookup(&self, address: u64) -> Option<&CallFrame> {
        self.lookup_range(address).map(|range| &range.frame)
    }

    fn remove_overlapping(&mut self, start: u64, end: u64) -> usize {
        let last_bank = self.bank_of(end.saturating_sub(1).max(start));
        let mut removed = 0;
        let mut emptied = Vec::new();
        for (key, bank) in self.banks.range_mut(..=last_bank).rev() {
            let upper = bank.partition_point(|e| e.address < end);
            let mut lower = upper;
            while lower > 0 && bank[lower - 1].end() > start {
                lower -= 1;
            }
            removed += upper - lower;
            bank.drain(lower..upper);
            if bank.is_empty() {
                emptied.push(*key);
            }
            if lower > 0 {
                break;
            }
        }
        for key in emptied {
            self.banks.remove(&key);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.banks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.is_empty()
    }

    pub fn ranges(&self) -> impl Iterator<Item = &CodeRange> {
        self.banks.values().flatten()
    }
}

/// Parse an address given as a JSON number or a (hex) string
pub fn parse_address(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}
