//! ELF -> NSO synthesis
//!
//! The forward direction is much simpler than reconstruction: the
//! first three loadable program headers become the text/rodata/data
//! segments, each hashed and compressed, and a GNU build-id note is
//! carried over into the header if the ELF has one. Section metadata
//! beyond the note is not consulted; it does not survive the trip.

use log::debug;

use crate::codec;
use crate::elf::{self, Elf64Ehdr, Elf64Nhdr, Elf64Phdr, Elf64Shdr};
use crate::error::{ConvertError, Result};
use crate::nso::{NsoHeader, NsoSegmentType, SEGMENT_NAMES};

/// Convert ELF file bytes into NSO file bytes.
pub fn elf_to_nso(elf_data: &[u8]) -> Result<Vec<u8>> {
    let ehdr = Elf64Ehdr::read_from(elf_data)
        .ok_or_else(|| ConvertError::InvalidElf("file smaller than the ELF header".into()))?;
    if !ehdr.is_valid() {
        return Err(ConvertError::InvalidElf(
            "not a little-endian ELF64 image".into(),
        ));
    }
    if ehdr.e_machine != elf::EM_AARCH64 {
        return Err(ConvertError::InvalidElf(format!(
            "machine {:#x}, expected AArch64",
            ehdr.e_machine
        )));
    }

    let ph_end = ehdr
        .e_phoff
        .checked_add(ehdr.e_phnum as u64 * Elf64Phdr::LEN as u64)
        .filter(|&end| end <= elf_data.len() as u64)
        .ok_or_else(|| ConvertError::InvalidElf("program headers outside the file".into()))?;
    debug!("{} phdrs ending at {:#x}", ehdr.e_phnum, ph_end);

    let mut header = NsoHeader::new();
    let mut payloads: Vec<Vec<u8>> = Vec::with_capacity(3);
    let mut file_offset = NsoHeader::LEN as u32;

    let mut next_phdr = 0usize;
    for i in 0..3 {
        let name = SEGMENT_NAMES[i];

        // next PT_LOAD, in file order
        let mut phdr = None;
        while next_phdr < ehdr.e_phnum as usize {
            let at = ehdr.e_phoff as usize + next_phdr * Elf64Phdr::LEN;
            next_phdr += 1;
            let current = Elf64Phdr::read_from(&elf_data[at..at + Elf64Phdr::LEN])
                .ok_or_else(|| ConvertError::InvalidElf("truncated program header".into()))?;
            if current.p_type == elf::PT_LOAD {
                phdr = Some(current);
                break;
            }
        }
        let phdr = phdr.ok_or_else(|| {
            ConvertError::InvalidElf("expected three loadable program headers".into())
        })?;

        let segment = &mut header.segments[i];
        segment.file_offset = file_offset;
        segment.memory_offset = phdr.p_vaddr as u32;
        segment.memory_size = phdr.p_filesz as u32;
        segment.align_or_bss = if i == NsoSegmentType::Data as usize {
            // the data descriptor carries the bss size
            let bss = phdr.p_memsz.checked_sub(phdr.p_filesz).ok_or_else(|| {
                ConvertError::InvalidElf(format!(
                    "{name} segment memsz {:#x} smaller than filesz {:#x}",
                    phdr.p_memsz, phdr.p_filesz
                ))
            })?;
            bss as u32
        } else {
            1
        };

        let start = phdr.p_offset as usize;
        let end = start + phdr.p_filesz as usize;
        let raw = elf_data.get(start..end).ok_or_else(|| {
            ConvertError::InvalidElf(format!(
                "{name} load segment {start:#x}..{end:#x} outside the file"
            ))
        })?;

        header.hashes[i] = codec::hash_segment(raw);
        let compressed = codec::compress_segment(raw);
        header.compressed_sizes[i] = compressed.len() as u32;
        file_offset += compressed.len() as u32;
        payloads.push(compressed);
    }

    if let Some(build_id) = find_build_id(elf_data, &ehdr) {
        let take = build_id.len().min(header.build_id.len());
        header.build_id[..take].copy_from_slice(&build_id[..take]);
    }

    let mut nso = header.to_bytes();
    for payload in &payloads {
        nso.extend_from_slice(payload);
    }
    Ok(nso)
}

/// Descriptor bytes of the first GNU build-id note section, if any.
fn find_build_id<'a>(elf_data: &'a [u8], ehdr: &Elf64Ehdr) -> Option<&'a [u8]> {
    for i in 0..ehdr.e_shnum as usize {
        let at = ehdr.e_shoff as usize + i * Elf64Shdr::LEN;
        let shdr = elf_data.get(at..).and_then(Elf64Shdr::read_from)?;
        if shdr.sh_type != elf::SHT_NOTE {
            continue;
        }
        let note_at = shdr.sh_offset as usize;
        let note = elf_data.get(note_at..).and_then(Elf64Nhdr::read_from)?;
        let name_at = note_at + Elf64Nhdr::LEN;
        let name = elf_data.get(name_at..name_at + note.n_namesz as usize)?;
        if note.n_type == elf::NT_GNU_BUILD_ID && note.n_namesz == 4 && name == b"GNU\0" {
            let desc_at = name_at + note.n_namesz as usize;
            let desc = elf_data.get(desc_at..desc_at + note.n_descsz as usize)?;
            debug!("build id {}", hex::encode(desc));
            return Some(desc);
        }
    }
    None
}
