//! Section boundary heuristics
//!
//! NSO strips all section metadata, so the reconstructor has to infer
//! it back: the PLT from a masked instruction-pattern match, the GOT
//! from a pointer back to `_DYNAMIC`, the build-id note from its GNU
//! note signature, and `.init`/`.fini` extents from their terminating
//! return/branch instruction. A miss on any of these is a normal
//! outcome (the module simply lacks the feature), never an error.

use log::debug;

use crate::dynamic::DynInfo;
use crate::elf::{self, Elf64Rela};

// ============================================================================
// Byte search primitives
// ============================================================================

/// First occurrence of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// Last occurrence of `needle` in `haystack`.
pub fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// First position where `haystack` matches `needle` under `mask`:
/// only bits set in the mask participate in the comparison.
pub fn find_masked(haystack: &[u8], needle: &[u8], mask: &[u8]) -> Option<usize> {
    debug_assert_eq!(needle.len(), mask.len());
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    'outer: for i in 0..=haystack.len() - needle.len() {
        for j in 0..needle.len() {
            if (haystack[i + j] ^ needle[j]) & mask[j] != 0 {
                continue 'outer;
            }
        }
        return Some(i);
    }
    None
}

// ============================================================================
// PLT detection
// ============================================================================

/// AArch64 PLT header stub: stp x16/x30, adrp x16, ldr x17, add x16,
/// br x17, then three nop-slot words. Immediate fields are wildcarded
/// by the mask.
pub const PLT_PATTERN: [u8; 32] = [
    0xF0, 0x7B, 0xBF, 0xA9, // stp  x16, x30, [sp, #-0x10]!
    0xD0, 0x04, 0x00, 0xD0, // adrp x16, <page>
    0x11, 0x8A, 0x42, 0xF9, // ldr  x17, [x16, #<off>]
    0x10, 0x42, 0x14, 0x91, // add  x16, x16, #<off>
    0x20, 0x02, 0x1F, 0xD6, // br   x17
    0x1F, 0x20, 0x32, 0x50, //
    0x1F, 0x20, 0x32, 0x50, //
    0x1F, 0x20, 0x32, 0x50, //
];

pub const PLT_MASK: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, //
    0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0xFF, //
    0x00, 0x00, 0x00, 0xFF, //
    0x00, 0x00, 0x00, 0xFF, //
    0xFF, 0xFF, 0xFF, 0xFF, //
    0xFF, 0xFF, 0xFF, 0xFF, //
    0xFF, 0xFF, 0xFF, 0xFF, //
];

/// PLT entries are 16 bytes; the header stub counts as two.
pub const PLT_ENTRY_SIZE: u64 = 16;

/// Address and size of a detected `.plt`.
#[derive(Debug, Clone, Copy)]
pub struct PltInfo {
    pub addr: u64,
    pub size: u64,
}

/// Locate the PLT inside the text segment. The size is derived from
/// `.rela.plt`: one 16-byte entry per jump-slot relocation plus the
/// two-entry header stub.
pub fn find_plt(text: &[u8], text_vaddr: u64, dyn_info: &DynInfo) -> Option<PltInfo> {
    if dyn_info.pltrelsz == 0 {
        return None;
    }
    let offset = find_masked(text, &PLT_PATTERN, &PLT_MASK)?;
    let entry_count = dyn_info.pltrelsz / Elf64Rela::LEN as u64;
    let info = PltInfo {
        addr: text_vaddr + offset as u64,
        size: PLT_ENTRY_SIZE * 2 + PLT_ENTRY_SIZE * entry_count,
    };
    debug!("plt at {:#x}, {} entries", info.addr, entry_count);
    Some(info)
}

// ============================================================================
// GOT detection
// ============================================================================

/// End of `.got.plt`: the highest jump-slot relocation target plus
/// one entry. Zero if there are no jump slots.
pub fn jump_slot_end(image: &[u8], dyn_info: &DynInfo) -> u64 {
    if dyn_info.jmprel == 0 {
        return 0;
    }
    let mut end = 0u64;
    let count = dyn_info.pltrelsz / Elf64Rela::LEN as u64;
    for i in 0..count {
        let off = dyn_info.jmprel as usize + i as usize * Elf64Rela::LEN;
        let Some(rela) = image.get(off..).and_then(Elf64Rela::read_from) else {
            break;
        };
        if rela.rel_type() == elf::R_AARCH64_JUMP_SLOT {
            end = end.max(rela.r_offset + 8);
        }
    }
    end
}

/// Locate `.got` by scanning past the end of `.got.plt` for an
/// 8-byte pointer back at the dynamic section. Linkers emit that
/// pointer as the first GOT entry (`_GLOBAL_OFFSET_TABLE_[0]`).
///
/// On adversarial input an unrelated word could match first; inputs
/// here are trusted vendor modules, and downstream tooling depends on
/// the existing behavior.
pub fn find_got(image: &[u8], search_start: u64, dyn_vaddr: u64) -> Option<u64> {
    let start = search_start as usize;
    if start >= image.len() {
        return None;
    }
    let needle = dyn_vaddr.to_le_bytes();
    let offset = find(&image[start..], &needle)?;
    let addr = search_start + offset as u64;
    debug!("got at {:#x} (dynamic back-pointer)", addr);
    Some(addr)
}

/// End of `.got`: the highest `R_AARCH64_GLOB_DAT` target in
/// `.rela.dyn` plus one entry, but never before the GOT base.
pub fn glob_dat_end(image: &[u8], dyn_info: &DynInfo, got_addr: u64) -> u64 {
    let mut end = got_addr;
    let count = dyn_info.relasz / Elf64Rela::LEN as u64;
    for i in 0..count {
        let off = dyn_info.rela as usize + i as usize * Elf64Rela::LEN;
        let Some(rela) = image.get(off..).and_then(Elf64Rela::read_from) else {
            break;
        };
        if rela.rel_type() == elf::R_AARCH64_GLOB_DAT {
            end = end.max(rela.r_offset + 8);
        }
    }
    end
}

// ============================================================================
// Build-id note detection
// ============================================================================

/// GNU build-id note headers for the two descriptor sizes in the
/// wild: namesz 4, descsz 16 (MD5) or 20 (SHA-1), type
/// NT_GNU_BUILD_ID, owner "GNU\0".
pub const BUILD_ID_NEEDLE_MD5: [u8; 16] = [
    4, 0, 0, 0, 16, 0, 0, 0, 3, 0, 0, 0, b'G', b'N', b'U', 0,
];
pub const BUILD_ID_NEEDLE_SHA1: [u8; 16] = [
    4, 0, 0, 0, 20, 0, 0, 0, 3, 0, 0, 0, b'G', b'N', b'U', 0,
];

/// Search a segment backward for a build-id note header, returning
/// its offset within the segment.
pub fn find_build_id_note(segment: &[u8]) -> Option<usize> {
    let md5 = rfind(segment, &BUILD_ID_NEEDLE_MD5);
    let sha1 = rfind(segment, &BUILD_ID_NEEDLE_SHA1);
    match (md5, sha1) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

// ============================================================================
// init/fini extents
// ============================================================================

/// AArch64 `ret`
const INSN_RET: u32 = 0xD65F_03C0;

/// Size of `.init`: scan forward from its entry for the first `ret`.
pub fn measure_init(image: &[u8], init_addr: u64) -> Option<u64> {
    let start = init_addr as usize;
    let mut off = start;
    while let Some(insn) = elf::read_u32(image, off) {
        if insn == INSN_RET {
            return Some((off - start + 4) as u64);
        }
        off += 4;
    }
    None
}

/// Size of `.fini`: scan forward for an unconditional branch (top
/// byte 0x14), giving up after 32 instructions.
pub fn measure_fini(image: &[u8], fini_addr: u64) -> Option<u64> {
    let start = fini_addr as usize;
    for i in 0..32 {
        let insn = elf::read_u32(image, start + i * 4)?;
        if insn >> 24 == 0x14 {
            return Some((i * 4 + 4) as u64);
        }
    }
    None
}
