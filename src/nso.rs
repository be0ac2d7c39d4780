//! NSO container structure definitions
//!
//! The NSO header is a fixed 0x100-byte little-endian layout: magic,
//! three flag words, three segment descriptors (text, rodata, data in
//! that order), a 32-byte build id, per-segment compressed sizes,
//! padding, the dynstr/dynsym extents inside rodata, and a SHA-256
//! per decompressed segment.

use crate::error::{ConvertError, Result};

/// NSO magic, "NSO0"
pub const NSO_MAGIC: [u8; 4] = *b"NSO0";

/// Flag word written on synthesis: all three segments compressed and
/// hashed (bits 0..2 compress, bits 3..5 hash).
pub const NSO_FLAGS_DEFAULT: u32 = 0x3F;

/// Segment indices inside the NSO header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsoSegmentType {
    Text = 0,
    Rodata = 1,
    Data = 2,
}

pub const SEGMENT_NAMES: [&str; 3] = ["text", "rodata", "data"];

// ============================================================================
// Segment descriptor
// ============================================================================

/// One NSO segment descriptor.
///
/// The fourth word is overloaded: alignment for text and rodata, bss
/// size for the data segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct NsoSegment {
    pub file_offset: u32,
    pub memory_offset: u32,
    pub memory_size: u32,
    pub align_or_bss: u32,
}

impl NsoSegment {
    pub const LEN: usize = 16;

    pub fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        let word = |off: usize| {
            u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
        };
        Some(Self {
            file_offset: word(0),
            memory_offset: word(4),
            memory_size: word(8),
            align_or_bss: word(12),
        })
    }

    pub fn write_to(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.file_offset.to_le_bytes());
        out[4..8].copy_from_slice(&self.memory_offset.to_le_bytes());
        out[8..12].copy_from_slice(&self.memory_size.to_le_bytes());
        out[12..16].copy_from_slice(&self.align_or_bss.to_le_bytes());
    }
}

// ============================================================================
// Data extent
// ============================================================================

/// Offset/size pair packed into a single u64 (low 32 bits offset,
/// high 32 bits size). Locates dynstr/dynsym inside rodata.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataExtent {
    pub offset: u32,
    pub size: u32,
}

impl DataExtent {
    pub fn from_packed(packed: u64) -> Self {
        Self {
            offset: (packed & 0xFFFF_FFFF) as u32,
            size: (packed >> 32) as u32,
        }
    }

    pub fn to_packed(self) -> u64 {
        (self.offset as u64) | ((self.size as u64) << 32)
    }
}

// ============================================================================
// NSO header
// ============================================================================

#[derive(Debug, Clone)]
pub struct NsoHeader {
    pub flags: [u32; 3],
    pub segments: [NsoSegment; 3],
    pub build_id: [u8; 0x20],
    pub compressed_sizes: [u32; 3],
    pub dynstr: DataExtent,
    pub dynsym: DataExtent,
    pub hashes: [[u8; 0x20]; 3],
}

impl NsoHeader {
    /// magic + flags + 3 descriptors + build id + compressed sizes +
    /// padding + 2 extents + 3 hashes
    pub const LEN: usize = 0x10 + 0x30 + 0x20 + 12 + 0x24 + 16 + 3 * 0x20;

    pub fn new() -> Self {
        Self {
            flags: [0, 0, NSO_FLAGS_DEFAULT],
            segments: [NsoSegment::default(); 3],
            build_id: [0u8; 0x20],
            compressed_sizes: [0; 3],
            dynstr: DataExtent::default(),
            dynsym: DataExtent::default(),
            hashes: [[0u8; 0x20]; 3],
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LEN {
            return Err(ConvertError::InvalidNso(format!(
                "file is {} bytes, smaller than the {} byte header",
                data.len(),
                Self::LEN
            )));
        }
        if data[0..4] != NSO_MAGIC {
            return Err(ConvertError::InvalidNso("bad magic, expected NSO0".into()));
        }

        let word = |off: usize| {
            u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
        };

        let mut segments = [NsoSegment::default(); 3];
        for (i, segment) in segments.iter_mut().enumerate() {
            // descriptors start right after magic + flags
            *segment = NsoSegment::read_from(&data[0x10 + i * NsoSegment::LEN..])
                .ok_or_else(|| ConvertError::InvalidNso("truncated segment descriptor".into()))?;
        }

        let mut build_id = [0u8; 0x20];
        build_id.copy_from_slice(&data[0x40..0x60]);

        let compressed_sizes = [word(0x60), word(0x64), word(0x68)];

        // 0x6C..0x90 is padding, then the two packed extents
        let packed = |off: usize| u64::from(word(off)) | (u64::from(word(off + 4)) << 32);
        let dynstr = DataExtent::from_packed(packed(0x90));
        let dynsym = DataExtent::from_packed(packed(0x98));

        let mut hashes = [[0u8; 0x20]; 3];
        for (i, hash) in hashes.iter_mut().enumerate() {
            hash.copy_from_slice(&data[0xA0 + i * 0x20..0xC0 + i * 0x20]);
        }

        Ok(Self {
            flags: [word(0x04), word(0x08), word(0x0C)],
            segments,
            build_id,
            compressed_sizes,
            dynstr,
            dynsym,
            hashes,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::LEN];
        out[0..4].copy_from_slice(&NSO_MAGIC);
        out[4..8].copy_from_slice(&self.flags[0].to_le_bytes());
        out[8..12].copy_from_slice(&self.flags[1].to_le_bytes());
        out[12..16].copy_from_slice(&self.flags[2].to_le_bytes());
        for (i, segment) in self.segments.iter().enumerate() {
            let off = 0x10 + i * NsoSegment::LEN;
            segment.write_to(&mut out[off..off + NsoSegment::LEN]);
        }
        out[0x40..0x60].copy_from_slice(&self.build_id);
        for (i, size) in self.compressed_sizes.iter().enumerate() {
            out[0x60 + i * 4..0x64 + i * 4].copy_from_slice(&size.to_le_bytes());
        }
        out[0x90..0x98].copy_from_slice(&self.dynstr.to_packed().to_le_bytes());
        out[0x98..0xA0].copy_from_slice(&self.dynsym.to_packed().to_le_bytes());
        for (i, hash) in self.hashes.iter().enumerate() {
            out[0xA0 + i * 0x20..0xC0 + i * 0x20].copy_from_slice(hash);
        }
        out
    }
}

impl Default for NsoHeader {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MOD0 metadata
// ============================================================================

/// Pointer block at the start of the decompressed image; the second
/// word is the image offset of the MOD0 header.
#[derive(Debug, Clone, Copy)]
pub struct ModPointer {
    pub field_0: u32,
    pub magic_offset: u32,
}

impl ModPointer {
    pub const LEN: usize = 8;

    pub fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self {
            field_0: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            magic_offset: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        })
    }
}

/// MOD0 header. All offsets are relative to the header's own
/// position in the image.
#[derive(Debug, Clone, Copy)]
pub struct ModHeader {
    pub magic: [u8; 4],
    pub dynamic_offset: i32,
    pub bss_start_offset: i32,
    pub bss_end_offset: i32,
    pub eh_start_offset: i32,
    pub eh_end_offset: i32,
    pub module_object_offset: i32,
}

impl ModHeader {
    pub const LEN: usize = 28;
    pub const MAGIC: [u8; 4] = *b"MOD0";

    pub fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        let word = |off: usize| {
            i32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[0..4]);
        Some(Self {
            magic,
            dynamic_offset: word(4),
            bss_start_offset: word(8),
            bss_end_offset: word(12),
            eh_start_offset: word(16),
            eh_end_offset: word(20),
            module_object_offset: word(24),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_length_is_0x100() {
        assert_eq!(NsoHeader::LEN, 0x100);
    }

    #[test]
    fn header_round_trip() {
        let mut header = NsoHeader::new();
        header.segments[0] = NsoSegment {
            file_offset: 0x100,
            memory_offset: 0,
            memory_size: 0x2000,
            align_or_bss: 0x1000,
        };
        header.segments[2].align_or_bss = 0x340; // bss size
        header.compressed_sizes = [0x800, 0x100, 0x40];
        header.dynstr = DataExtent { offset: 0x10, size: 0x200 };
        header.build_id[0] = 0xAB;
        header.hashes[1][31] = 0xCD;

        let raw = header.to_bytes();
        assert_eq!(raw.len(), NsoHeader::LEN);
        let back = NsoHeader::parse(&raw).unwrap();
        assert_eq!(back.segments[0].memory_size, 0x2000);
        assert_eq!(back.segments[2].align_or_bss, 0x340);
        assert_eq!(back.compressed_sizes, [0x800, 0x100, 0x40]);
        assert_eq!(back.dynstr.offset, 0x10);
        assert_eq!(back.dynstr.size, 0x200);
        assert_eq!(back.build_id[0], 0xAB);
        assert_eq!(back.hashes[1][31], 0xCD);
        assert_eq!(back.flags[2], NSO_FLAGS_DEFAULT);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut raw = NsoHeader::new().to_bytes();
        raw[0] = b'X';
        assert!(matches!(
            NsoHeader::parse(&raw),
            Err(ConvertError::InvalidNso(_))
        ));
    }

    #[test]
    fn extent_packing() {
        let extent = DataExtent { offset: 0x1234, size: 0x5678 };
        let packed = extent.to_packed();
        assert_eq!(packed, 0x0000_5678_0000_1234);
        let back = DataExtent::from_packed(packed);
        assert_eq!(back.offset, 0x1234);
        assert_eq!(back.size, 0x5678);
    }
}
