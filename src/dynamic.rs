//! Dynamic section walker
//!
//! Walks the MOD0-pointed dynamic entry array and collects the tags
//! the converter cares about. The walk is terminated only by DT_NULL;
//! since no entry count can be trusted, an unterminated array is a
//! `CorruptImage` condition, bounded by the image length.

use crate::elf::{self, Elf64Dyn};
use crate::error::{ConvertError, Result};

/// Values of the recognized dynamic tags. Zero means absent
/// (a tag with value zero carries no usable address anyway).
#[derive(Debug, Clone, Copy, Default)]
pub struct DynInfo {
    pub symtab: u64,
    pub rela: u64,
    pub relasz: u64,
    pub jmprel: u64,
    pub pltrelsz: u64,
    pub strtab: u64,
    pub strsz: u64,
    pub pltgot: u64,
    pub hash: u64,
    pub gnu_hash: u64,
    pub init: u64,
    pub fini: u64,
    pub init_array: u64,
    pub init_arraysz: u64,
    pub fini_array: u64,
    pub fini_arraysz: u64,
}

/// Result of walking a dynamic section.
#[derive(Debug, Clone, Copy)]
pub struct DynWalk {
    pub info: DynInfo,
    /// Entries seen, DT_NULL terminator included. PT_DYNAMIC sizing
    /// uses this count.
    pub entry_count: usize,
}

/// Walk the dynamic entry array starting at `offset` in `image`.
///
/// Unrecognized tags are skipped, keeping the walker forward
/// compatible with tags this converter does not consume.
pub fn walk(image: &[u8], offset: usize) -> Result<DynWalk> {
    let mut info = DynInfo::default();
    let mut entry_count = 0usize;
    let mut cursor = offset;

    loop {
        let entry = image
            .get(cursor..)
            .and_then(Elf64Dyn::read_from)
            .ok_or_else(|| {
                ConvertError::CorruptImage(format!(
                    "dynamic section at {offset:#x} has no DT_NULL terminator within the image"
                ))
            })?;
        entry_count += 1;

        match entry.d_tag {
            elf::DT_NULL => break,
            elf::DT_SYMTAB => info.symtab = entry.d_val,
            elf::DT_RELA => info.rela = entry.d_val,
            elf::DT_RELASZ => info.relasz = entry.d_val,
            elf::DT_JMPREL => info.jmprel = entry.d_val,
            elf::DT_PLTRELSZ => info.pltrelsz = entry.d_val,
            elf::DT_STRTAB => info.strtab = entry.d_val,
            elf::DT_STRSZ => info.strsz = entry.d_val,
            elf::DT_PLTGOT => info.pltgot = entry.d_val,
            elf::DT_HASH => info.hash = entry.d_val,
            elf::DT_GNU_HASH => info.gnu_hash = entry.d_val,
            elf::DT_INIT => info.init = entry.d_val,
            elf::DT_FINI => info.fini = entry.d_val,
            elf::DT_INIT_ARRAY => info.init_array = entry.d_val,
            elf::DT_INIT_ARRAYSZ => info.init_arraysz = entry.d_val,
            elf::DT_FINI_ARRAY => info.fini_array = entry.d_val,
            elf::DT_FINI_ARRAYSZ => info.fini_arraysz = entry.d_val,
            _ => {}
        }
        cursor += Elf64Dyn::LEN;
    }

    Ok(DynWalk { info, entry_count })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: i64, val: u64) -> [u8; 16] {
        let mut raw = [0u8; 16];
        raw[0..8].copy_from_slice(&(tag as u64).to_le_bytes());
        raw[8..16].copy_from_slice(&val.to_le_bytes());
        raw
    }

    #[test]
    fn collects_recognized_tags_until_null() {
        let mut image = Vec::new();
        image.extend_from_slice(&entry(elf::DT_STRTAB, 0x1000));
        image.extend_from_slice(&entry(elf::DT_SYMTAB, 0x2000));
        image.extend_from_slice(&entry(elf::DT_PLTRELSZ, 0x180));
        image.extend_from_slice(&entry(elf::DT_NULL, 0));
        // trailing garbage must not be walked
        image.extend_from_slice(&entry(elf::DT_INIT, 0xDEAD));

        let walked = walk(&image, 0).unwrap();
        assert_eq!(walked.entry_count, 4);
        assert_eq!(walked.info.strtab, 0x1000);
        assert_eq!(walked.info.symtab, 0x2000);
        assert_eq!(walked.info.pltrelsz, 0x180);
        assert_eq!(walked.info.init, 0);
    }

    #[test]
    fn unrecognized_tags_are_ignored() {
        let mut image = Vec::new();
        image.extend_from_slice(&entry(0x6FFF_FFFB /* DT_FLAGS_1 */, 0x8));
        image.extend_from_slice(&entry(elf::DT_HASH, 0x400));
        image.extend_from_slice(&entry(elf::DT_NULL, 0));

        let walked = walk(&image, 0).unwrap();
        assert_eq!(walked.entry_count, 3);
        assert_eq!(walked.info.hash, 0x400);
    }

    #[test]
    fn unterminated_section_is_corrupt_image() {
        let mut image = Vec::new();
        image.extend_from_slice(&entry(elf::DT_STRTAB, 0x1000));
        image.extend_from_slice(&entry(elf::DT_SYMTAB, 0x2000));

        let err = walk(&image, 0).unwrap_err();
        assert!(matches!(err, ConvertError::CorruptImage(_)));
    }

    #[test]
    fn offset_past_image_is_corrupt_image() {
        let image = entry(elf::DT_NULL, 0);
        assert!(walk(&image, 4096).is_err());
    }
}
