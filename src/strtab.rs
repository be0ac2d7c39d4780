//! Section name string table builder
//!
//! Accumulates deduplicated null-terminated names for `.shstrtab`.
//! Offset 0 is always the empty string, and an offset handed out for
//! a name never changes afterwards.

use std::collections::HashMap;

#[derive(Debug)]
pub struct StringTable {
    offsets: HashMap<String, u32>,
    order: Vec<String>,
    watermark: u32,
}

impl StringTable {
    pub fn new() -> Self {
        let mut table = Self {
            offsets: HashMap::new(),
            order: Vec::new(),
            watermark: 0,
        };
        table.add("");
        table
    }

    /// Insert a name if not already present. Idempotent.
    pub fn add(&mut self, name: &str) {
        if self.offsets.contains_key(name) {
            return;
        }
        self.offsets.insert(name.to_string(), self.watermark);
        self.order.push(name.to_string());
        self.watermark += name.len() as u32 + 1; // trailing NUL
    }

    /// Offset of a name, or 0 (the empty string) if never inserted.
    pub fn offset_of(&self, name: &str) -> u32 {
        self.offsets.get(name).copied().unwrap_or(0)
    }

    /// Total byte size of the serialized table.
    pub fn size(&self) -> usize {
        self.watermark as usize
    }

    /// Serialize all names, each at its assigned offset.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; self.watermark as usize];
        for name in &self.order {
            let off = self.offsets[name] as usize;
            data[off..off + name.len()].copy_from_slice(name.as_bytes());
        }
        data
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}
