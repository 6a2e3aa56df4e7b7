// ── Register store ──
//
// Last value and arrival time of every register a device has published.
// Entries are overwritten in place and never evicted; a device's map
// lives as long as the process.

use std::collections::HashMap;
use std::time::Instant;

use tracing::trace;

/// One stored register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub value: u16,
    pub observed_at: Instant,
}

/// Address → register map for a single device.
#[derive(Debug, Clone, Default)]
pub struct RegisterStore {
    registers: HashMap<u16, Register>,
}

impl RegisterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `raw & 0xFFFF` for `address`, stamped with `now`.
    pub fn update(&mut self, address: u16, raw: i64, now: Instant) -> Register {
        let value = u16::try_from(raw & 0xFFFF).unwrap_or_default();
        let register = Register {
            value,
            observed_at: now,
        };
        self.registers.insert(address, register);
        trace!(address, raw, value = format_args!("0x{value:04X}"), "register stored");
        register
    }

    pub fn get(&self, address: u16) -> Option<&Register> {
        self.registers.get(&address)
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// All stored registers, in ascending address order.
    pub fn snapshot(&self) -> Vec<(u16, Register)> {
        let mut all: Vec<_> = self.registers.iter().map(|(a, r)| (*a, *r)).collect();
        all.sort_unstable_by_key(|(a, _)| *a);
        all
    }
}
