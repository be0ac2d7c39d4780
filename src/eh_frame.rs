//! `.eh_frame_hdr` measurement
//!
//! NSO records where the unwind info region starts and ends via MOD0,
//! but not how large `.eh_frame` itself is. A small interpreter for
//! the DWARF frame header walks its binary search table and takes the
//! highest FDE end offset as the frame size. Anything the interpreter
//! does not support (header version, pointer encoding, 64-bit length
//! escape) downgrades to "no eh info" instead of failing the
//! conversion.

use log::debug;

use crate::elf::read_u32;

// DWARF pointer encoding: value formats (low nibble)
const DW_EH_PE_UDATA2: u8 = 0x02;
const DW_EH_PE_UDATA4: u8 = 0x03;
const DW_EH_PE_SDATA4: u8 = 0x0B;

// DWARF pointer encoding: bases (bits 4..6)
const DW_EH_PE_ABSPTR: u8 = 0x00;
const DW_EH_PE_PCREL: u8 = 0x10;
const DW_EH_PE_DATAREL: u8 = 0x30;

const DW_EH_PE_INDIRECT: u8 = 0x80;

/// Measured `.eh_frame` extent, relative to the frame header start.
#[derive(Debug, Clone, Copy)]
pub struct FrameExtent {
    /// Offset of `.eh_frame` from the header start
    pub frame_ptr: u32,
    /// Highest FDE end offset seen in the search table
    pub frame_size: u32,
}

struct Decoder<'a> {
    image: &'a [u8],
    hdr_offset: usize,
    /// Read cursor, relative to the header start
    cursor: usize,
}

impl<'a> Decoder<'a> {
    /// Decode one encoded pointer, yielding a header-relative value.
    fn decode(&mut self, enc: u8) -> Option<u32> {
        let base = match enc & 0x70 {
            DW_EH_PE_ABSPTR => 0,
            DW_EH_PE_PCREL => self.cursor as u32,
            DW_EH_PE_DATAREL => 0, // datarel base is the header itself
            _ => return None,
        };
        let raw = match enc & 0x0F {
            DW_EH_PE_UDATA2 => {
                let at = self.hdr_offset + self.cursor;
                let lo = *self.image.get(at)? as u32;
                let hi = *self.image.get(at + 1)? as u32;
                self.cursor += 2;
                lo | (hi << 8)
            }
            DW_EH_PE_UDATA4 | DW_EH_PE_SDATA4 => {
                let val = read_u32(self.image, self.hdr_offset + self.cursor)?;
                self.cursor += 4;
                val
            }
            _ => return None,
        };
        let mut val = base.wrapping_add(raw);
        if enc & DW_EH_PE_INDIRECT != 0 {
            val = read_u32(self.image, self.hdr_offset.checked_add(val as usize)?)?;
        }
        Some(val)
    }
}

/// Measure the unwind frame region described by the `.eh_frame_hdr`
/// at `hdr_offset`. Returns `None` when the header is missing,
/// unsupported, or internally inconsistent.
pub fn measure_frame(image: &[u8], hdr_offset: usize) -> Option<FrameExtent> {
    let header = image.get(hdr_offset..hdr_offset + 4)?;
    let version = header[0];
    if version != 1 {
        debug!("eh_frame_hdr version {version}, not measuring");
        return None;
    }
    let eh_frame_ptr_enc = header[1];
    let fde_count_enc = header[2];
    let table_enc = header[3];

    let mut decoder = Decoder {
        image,
        hdr_offset,
        cursor: 4,
    };

    let frame_ptr = decoder.decode(eh_frame_ptr_enc)?;
    let fde_count = decoder.decode(fde_count_enc)?;

    let mut max_end = 0u32;
    for _ in 0..fde_count {
        // binary search table entries are (initial location, fde offset)
        let _initial_loc = decoder.decode(table_enc)?;
        let fde_offset = decoder.decode(table_enc)?;
        let fde_len = read_u32(image, hdr_offset.checked_add(fde_offset as usize)?)?;
        if fde_len == 0xFFFF_FFFF {
            // 64-bit DWARF length escape, out of scope
            return None;
        }
        max_end = max_end.max(fde_offset.checked_add(fde_len)?);
    }

    Some(FrameExtent {
        frame_ptr,
        frame_size: max_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Build a header at `hdr` with ptr/count as absptr|udata4 and a
    // datarel|sdata4 search table.
    fn build_header(image: &mut [u8], hdr: usize, frame_ptr: u32, fdes: &[(u32, u32)]) {
        image[hdr] = 1; // version
        image[hdr + 1] = DW_EH_PE_ABSPTR | DW_EH_PE_UDATA4;
        image[hdr + 2] = DW_EH_PE_ABSPTR | DW_EH_PE_UDATA4;
        image[hdr + 3] = DW_EH_PE_DATAREL | DW_EH_PE_SDATA4;
        image[hdr + 4..hdr + 8].copy_from_slice(&frame_ptr.to_le_bytes());
        image[hdr + 8..hdr + 12].copy_from_slice(&(fdes.len() as u32).to_le_bytes());
        let mut at = hdr + 12;
        for &(initial_loc, fde_off) in fdes {
            image[at..at + 4].copy_from_slice(&initial_loc.to_le_bytes());
            image[at + 4..at + 8].copy_from_slice(&fde_off.to_le_bytes());
            at += 8;
        }
    }

    #[test]
    fn measures_highest_fde_end() {
        let mut image = vec![0u8; 0x200];
        let hdr = 0x40;
        build_header(&mut image, hdr, 0x20, &[(0x1000, 0x20), (0x1100, 0x60)]);
        // FDE length words, relative to the header
        image[hdr + 0x20..hdr + 0x24].copy_from_slice(&0x18u32.to_le_bytes());
        image[hdr + 0x60..hdr + 0x64].copy_from_slice(&0x30u32.to_le_bytes());

        let extent = measure_frame(&image, hdr).unwrap();
        assert_eq!(extent.frame_ptr, 0x20);
        assert_eq!(extent.frame_size, 0x60 + 0x30);
    }

    #[test]
    fn unsupported_version_yields_none() {
        let mut image = vec![0u8; 0x100];
        image[0x40] = 2;
        assert!(measure_frame(&image, 0x40).is_none());
    }

    #[test]
    fn unsupported_encoding_yields_none() {
        let mut image = vec![0u8; 0x100];
        let hdr = 0x40;
        image[hdr] = 1;
        image[hdr + 1] = 0x01; // uleb128, unsupported
        assert!(measure_frame(&image, hdr).is_none());
    }

    #[test]
    fn empty_table_measures_zero() {
        let mut image = vec![0u8; 0x100];
        build_header(&mut image, 0x10, 0x0C, &[]);
        let extent = measure_frame(&image, 0x10).unwrap();
        assert_eq!(extent.frame_ptr, 0x0C);
        assert_eq!(extent.frame_size, 0);
    }

    #[test]
    fn truncated_header_yields_none() {
        let image = vec![0u8; 0x10];
        assert!(measure_frame(&image, 0x0E).is_none());
    }

    #[test]
    fn length_escape_yields_none() {
        let mut image = vec![0u8; 0x200];
        let hdr = 0x40;
        build_header(&mut image, hdr, 0x20, &[(0x1000, 0x20)]);
        image[hdr + 0x20..hdr + 0x24].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        assert!(measure_frame(&image, hdr).is_none());
    }
}
