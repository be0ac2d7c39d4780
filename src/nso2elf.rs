//! NSO -> ELF reconstruction
//!
//! Parses an NSO, decompresses its three segments into a flat memory
//! image, walks the MOD0-pointed dynamic section, runs the section
//! heuristics, and synthesizes an ELF64 shared object a disassembler
//! or debugger can consume. Section header indices implied by dynsym
//! cross-references are honored; everything else is placed by a
//! first-free-slot allocator that keeps index order consistent with
//! address order where it can.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::codec;
use crate::dynamic::{self, DynInfo};
use crate::elf::{self, read_u32, Elf64Dyn, Elf64Ehdr, Elf64Nhdr, Elf64Phdr, Elf64Rela, Elf64Shdr, Elf64Sym};
use crate::error::{ConvertError, Result};
use crate::heuristics::{self, PltInfo};
use crate::eh_frame;
use crate::nso::{ModHeader, ModPointer, NsoHeader, NsoSegmentType, SEGMENT_NAMES};
use crate::strtab::StringTable;

const NUM_PHDRS: usize = 5;

fn align_up(x: u64, align: u64) -> u64 {
    (x + align - 1) & !(align - 1)
}

// ============================================================================
// Parsed NSO
// ============================================================================

/// An NSO with its segments decompressed and its dynamic-linking
/// metadata located. Owns the flat memory image for the duration of
/// one conversion.
pub struct NsoFile {
    header: NsoHeader,
    image: Vec<u8>,
    dyn_offset: u64,
    dyn_info: DynInfo,
    dyn_entry_count: usize,
    plt: Option<PltInfo>,
    note_addr: Option<u64>,
    eh_hdr_addr: u64,
    eh_hdr_size: u64,
}

impl NsoFile {
    /// Parse and decompress an NSO from raw file bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = NsoHeader::parse(data)?;

        // Segment extents are u32 arithmetic everywhere below; a
        // descriptor wrapping the 32-bit address space is nonsense.
        for (i, segment) in header.segments.iter().enumerate() {
            let name = SEGMENT_NAMES[i];
            let end = segment
                .memory_offset
                .checked_add(segment.memory_size)
                .ok_or_else(|| {
                    ConvertError::InvalidNso(format!(
                        "{name} segment wraps the 32-bit address space"
                    ))
                })?;
            if i == NsoSegmentType::Data as usize && end.checked_add(segment.align_or_bss).is_none()
            {
                return Err(ConvertError::InvalidNso(
                    "bss extends past the 32-bit address space".into(),
                ));
            }
        }

        // The image covers every segment plus the trailing bss.
        let data_segment = &header.segments[NsoSegmentType::Data as usize];
        let mut image_size =
            data_segment.memory_offset as u64 + data_segment.memory_size as u64 + data_segment.align_or_bss as u64;
        for segment in &header.segments {
            image_size = image_size.max(segment.memory_offset as u64 + segment.memory_size as u64);
        }
        let mut image = vec![0u8; image_size as usize];

        for (i, segment) in header.segments.iter().enumerate() {
            let name = SEGMENT_NAMES[i];
            let file_start = segment.file_offset as usize;
            let file_end = file_start + header.compressed_sizes[i] as usize;
            let compressed = data.get(file_start..file_end).ok_or_else(|| {
                ConvertError::InvalidNso(format!(
                    "{name} segment payload {file_start:#x}..{file_end:#x} outside the file"
                ))
            })?;

            let raw = codec::decompress_segment(name, compressed, segment.memory_size)?;
            let mem_start = segment.memory_offset as usize;
            image[mem_start..mem_start + raw.len()].copy_from_slice(&raw);
        }

        // MOD0: pointer block at image start, header at the pointed
        // offset, all header fields relative to the header itself.
        let mod_ptr = ModPointer::read_from(&image)
            .ok_or_else(|| ConvertError::CorruptImage("image too small for MOD0 pointer".into()))?;
        let mod_base = mod_ptr.magic_offset as usize;
        let mod_header = image
            .get(mod_base..)
            .and_then(ModHeader::read_from)
            .ok_or_else(|| {
                ConvertError::CorruptImage(format!("MOD0 pointer {mod_base:#x} outside the image"))
            })?;
        if mod_header.magic != ModHeader::MAGIC {
            debug!("MOD0 magic mismatch at {mod_base:#x}, trusting offsets anyway");
        }

        let rel = |offset: i32| -> Result<u64> {
            let addr = mod_base as i64 + offset as i64;
            if addr < 0 || addr as usize > image.len() {
                return Err(ConvertError::CorruptImage(format!(
                    "MOD0 offset {offset:#x} points outside the image"
                )));
            }
            Ok(addr as u64)
        };

        let dyn_offset = rel(mod_header.dynamic_offset)?;
        let walked = dynamic::walk(&image, dyn_offset as usize)?;

        let eh_hdr_addr = rel(mod_header.eh_start_offset)?;
        let eh_hdr_size = rel(mod_header.eh_end_offset)?.saturating_sub(eh_hdr_addr);

        // Heuristics that only need the image and the dynamic table
        let text = &header.segments[NsoSegmentType::Text as usize];
        let text_data =
            &image[text.memory_offset as usize..(text.memory_offset + text.memory_size) as usize];
        let plt = heuristics::find_plt(text_data, text.memory_offset as u64, &walked.info);

        // Build-id note: rodata first, then text, then data
        let mut note_addr = None;
        for &ty in &[NsoSegmentType::Rodata, NsoSegmentType::Text, NsoSegmentType::Data] {
            let segment = &header.segments[ty as usize];
            let start = segment.memory_offset as usize;
            let segment_data = &image[start..start + segment.memory_size as usize];
            if let Some(offset) = heuristics::find_build_id_note(segment_data) {
                note_addr = Some((start + offset) as u64);
                break;
            }
        }

        Ok(Self {
            header,
            image,
            dyn_offset,
            dyn_info: walked.info,
            dyn_entry_count: walked.entry_count,
            plt,
            note_addr,
            eh_hdr_addr,
            eh_hdr_size,
        })
    }

    pub fn header(&self) -> &NsoHeader {
        &self.header
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    fn dynsym_count(&self) -> u64 {
        self.header.dynsym.size as u64 / Elf64Sym::LEN as u64
    }

    fn dynsym_at(&self, index: u64) -> Option<Elf64Sym> {
        let off = self.dyn_info.symtab as usize + index as usize * Elf64Sym::LEN;
        self.image.get(off..).and_then(Elf64Sym::read_from)
    }

    /// Build a section header for a virtual address falling inside
    /// one of the loaded segments (or the trailing bss). File offsets
    /// are filled in later, once program headers exist.
    fn vaddr_to_shdr(&self, vaddr: u64, shstrtab: &mut StringTable) -> Option<Elf64Shdr> {
        for (i, segment) in self.header.segments.iter().enumerate() {
            let start = segment.memory_offset as u64;
            let end = start + segment.memory_size as u64;
            if vaddr >= start && vaddr < end {
                return Some(self.segment_shdr(i, shstrtab));
            }
            if i == NsoSegmentType::Data as usize
                && vaddr >= end
                && vaddr < end + segment.align_or_bss as u64
            {
                return Some(self.bss_shdr(shstrtab));
            }
        }
        None
    }

    fn segment_shdr(&self, index: usize, shstrtab: &mut StringTable) -> Elf64Shdr {
        let segment = &self.header.segments[index];
        let (name, flags) = match index {
            0 => (".text", elf::SHF_ALLOC | elf::SHF_EXECINSTR),
            1 => (".rodata", elf::SHF_ALLOC),
            _ => (".data", elf::SHF_ALLOC | elf::SHF_WRITE),
        };
        shstrtab.add(name);
        Elf64Shdr {
            sh_name: shstrtab.offset_of(name),
            sh_type: elf::SHT_PROGBITS,
            sh_flags: flags,
            sh_addr: segment.memory_offset as u64,
            sh_size: segment.memory_size as u64,
            sh_addralign: 8,
            ..Elf64Shdr::default()
        }
    }

    fn bss_shdr(&self, shstrtab: &mut StringTable) -> Elf64Shdr {
        let data_segment = &self.header.segments[NsoSegmentType::Data as usize];
        shstrtab.add(".bss");
        Elf64Shdr {
            sh_name: shstrtab.offset_of(".bss"),
            sh_type: elf::SHT_NOBITS,
            sh_flags: elf::SHF_ALLOC | elf::SHF_WRITE,
            sh_addr: data_segment.memory_offset as u64 + data_segment.memory_size as u64,
            sh_size: data_segment.align_or_bss as u64,
            sh_addralign: 8,
            ..Elf64Shdr::default()
        }
    }

    /// Synthesize the ELF byte buffer.
    pub fn to_elf(&self) -> Result<Vec<u8>> {
        let mut shstrtab = StringTable::new();
        shstrtab.add(".shstrtab");

        // ------------------------------------------------------------------
        // Known sections from dynsym cross-references
        // ------------------------------------------------------------------
        let mut known: BTreeMap<u16, Elf64Shdr> = BTreeMap::new();
        let mut max_shndx = 0u16;
        for i in 0..self.dynsym_count() {
            let Some(sym) = self.dynsym_at(i) else { break };
            if sym.st_shndx == elf::SHN_UNDEF || sym.st_shndx >= elf::SHN_LORESERVE {
                continue;
            }
            max_shndx = max_shndx.max(sym.st_shndx);
            if known.contains_key(&sym.st_shndx) {
                continue;
            }
            match self.vaddr_to_shdr(sym.st_value, &mut shstrtab) {
                Some(shdr) => {
                    known.insert(sym.st_shndx, shdr);
                }
                None => {
                    debug!(
                        "dynsym {} points shndx {} at {:#x}, outside every segment",
                        i, sym.st_shndx, sym.st_value
                    );
                }
            }
        }

        // Backfill the segment sections nothing pointed at; they can
        // go at any free index.
        if known.len() < 4 {
            let mut candidates = Vec::new();
            for i in 0..3 {
                candidates.push(self.segment_shdr(i, &mut shstrtab));
            }
            let data_segment = &self.header.segments[NsoSegmentType::Data as usize];
            if data_segment.align_or_bss > 0 {
                candidates.push(self.bss_shdr(&mut shstrtab));
            }
            let mut next_free = 1u16;
            for candidate in candidates {
                if known.values().any(|s| s.sh_name == candidate.sh_name) {
                    continue;
                }
                while known.contains_key(&next_free) {
                    next_free += 1;
                }
                known.insert(next_free, candidate);
            }
        }

        // ------------------------------------------------------------------
        // Presence flags and extra heuristics
        // ------------------------------------------------------------------
        let jump_slot_end = heuristics::jump_slot_end(&self.image, &self.dyn_info);
        let got_addr = if jump_slot_end != 0 {
            heuristics::find_got(&self.image, jump_slot_end, self.dyn_offset)
        } else {
            None
        };

        let present_plt = self.plt.is_some();
        let present_got_plt = jump_slot_end != 0 && self.dyn_info.pltgot != 0;
        let present_got = got_addr.is_some() && self.dyn_info.rela != 0;
        let present_rela_plt =
            present_got_plt && self.dyn_info.jmprel != 0 && self.dyn_info.pltrelsz != 0;
        let present_hash = self.dyn_info.hash != 0;
        let present_gnu_hash = self.dyn_info.gnu_hash != 0;
        let present_init_array = self.dyn_info.init_array != 0 && self.dyn_info.init_arraysz != 0;
        let present_fini_array = self.dyn_info.fini_array != 0 && self.dyn_info.fini_arraysz != 0;
        let present_note = self.note_addr.is_some();

        let init_size = if self.dyn_info.init != 0 {
            heuristics::measure_init(&self.image, self.dyn_info.init)
        } else {
            None
        };
        let fini_size = if self.dyn_info.fini != 0 {
            heuristics::measure_fini(&self.image, self.dyn_info.fini)
        } else {
            None
        };

        let eh = eh_frame::measure_frame(&self.image, self.eh_hdr_addr as usize).map(|extent| {
            // Alignment of both sizes is a fudge carried over from
            // the measurement being an upper bound, not an exact fit.
            let hdr_size = align_up(self.eh_hdr_size, 0x10);
            let frame_addr = self.eh_hdr_addr + extent.frame_ptr as u64;
            let frame_size = align_up(extent.frame_size as u64, 0x10);
            (hdr_size, frame_addr, frame_size)
        });

        // ------------------------------------------------------------------
        // Section count and name table
        // ------------------------------------------------------------------
        let mut num_shdrs = max_shndx as i64 + 1;
        let mut needed = known.len() as i64 - num_shdrs;
        needed += 1; // index 0
        needed += 1; // .shstrtab
        for name in [".dynstr", ".dynsym", ".dynamic", ".rela.dyn"] {
            shstrtab.add(name);
            needed += 1;
        }

        let mut conditional = |present: bool, name: &str| {
            if present {
                shstrtab.add(name);
                needed += 1;
            }
        };
        conditional(present_plt, ".plt");
        conditional(present_got, ".got");
        conditional(present_got_plt, ".got.plt");
        conditional(present_rela_plt, ".rela.plt");
        conditional(present_hash, ".hash");
        conditional(present_gnu_hash, ".gnu.hash");
        conditional(init_size.is_some(), ".init");
        conditional(fini_size.is_some(), ".fini");
        conditional(present_init_array, ".init_array");
        conditional(present_fini_array, ".fini_array");
        conditional(present_note, ".note");
        if eh.is_some() {
            shstrtab.add(".eh_frame_hdr");
            shstrtab.add(".eh_frame");
            needed += 2;
        }

        if needed > 0 {
            num_shdrs += needed;
        }
        // Backfill may have claimed indices past the dynsym-implied
        // bound; the arena must cover them.
        if let Some(highest) = known.keys().next_back() {
            num_shdrs = num_shdrs.max(*highest as i64 + 1);
        }
        let num_shdrs = num_shdrs as usize;

        // ------------------------------------------------------------------
        // Pass 1: program headers and file layout
        // ------------------------------------------------------------------
        let phoff = Elf64Ehdr::LEN as u64;
        let shoff = phoff + (NUM_PHDRS * Elf64Phdr::LEN) as u64;
        let shstrtab_offset = shoff + (num_shdrs * Elf64Shdr::LEN) as u64;
        let mut data_offset = shstrtab_offset + shstrtab.size() as u64;

        let mut load_phdrs = [Elf64Phdr::default(); 3];
        for (i, segment) in self.header.segments.iter().enumerate() {
            let flags = match i {
                0 => elf::PF_R | elf::PF_X,
                1 => elf::PF_R,
                _ => elf::PF_R | elf::PF_W,
            };
            let (memsz, align) = if i == NsoSegmentType::Data as usize {
                // data carries the bss in memory; its alignment word
                // holds the bss size instead
                (
                    segment.memory_size as u64 + segment.align_or_bss as u64,
                    1,
                )
            } else {
                (segment.memory_size as u64, segment.align_or_bss as u64)
            };
            load_phdrs[i] = Elf64Phdr {
                p_type: elf::PT_LOAD,
                p_flags: flags,
                p_offset: data_offset,
                p_vaddr: segment.memory_offset as u64,
                p_paddr: segment.memory_offset as u64,
                p_filesz: segment.memory_size as u64,
                p_memsz: memsz,
                p_align: align,
            };
            data_offset += segment.memory_size as u64;
        }

        let vaddr_to_foffset = |vaddr: u64| -> u64 {
            for phdr in &load_phdrs {
                if vaddr >= phdr.p_vaddr && vaddr < phdr.p_vaddr + phdr.p_filesz {
                    return phdr.p_offset + (vaddr - phdr.p_vaddr);
                }
            }
            0
        };

        let dyn_phdr = Elf64Phdr {
            p_type: elf::PT_DYNAMIC,
            p_flags: elf::PF_R | elf::PF_W,
            p_offset: vaddr_to_foffset(self.dyn_offset),
            p_vaddr: self.dyn_offset,
            p_paddr: self.dyn_offset,
            p_filesz: (self.dyn_entry_count * Elf64Dyn::LEN) as u64,
            p_memsz: (self.dyn_entry_count * Elf64Dyn::LEN) as u64,
            p_align: 8,
        };

        // The slot is kept even with no unwind info; consumers expect
        // a fixed program header count. The phdr carries the raw
        // MOD0-measured extent; only the section sizes are aligned.
        let eh_phdr = match eh {
            Some(_) => Elf64Phdr {
                p_type: elf::PT_GNU_EH_FRAME,
                p_flags: elf::PF_R,
                p_offset: vaddr_to_foffset(self.eh_hdr_addr),
                p_vaddr: self.eh_hdr_addr,
                p_paddr: self.eh_hdr_addr,
                p_filesz: self.eh_hdr_size,
                p_memsz: self.eh_hdr_size,
                p_align: 4,
            },
            None => Elf64Phdr {
                p_type: elf::PT_GNU_EH_FRAME,
                p_flags: elf::PF_R,
                p_align: 4,
                ..Elf64Phdr::default()
            },
        };

        // Known sections learn their file offsets from the finalized
        // program headers.
        let mut known = known;
        for phdr in &load_phdrs {
            for shdr in known.values_mut() {
                if shdr.sh_addr == phdr.p_vaddr && shdr.sh_type != elf::SHT_NOBITS {
                    shdr.sh_offset = phdr.p_offset;
                }
            }
        }

        // ------------------------------------------------------------------
        // Pass 2: section header arena
        // ------------------------------------------------------------------
        let mut arena: Vec<Option<Elf64Shdr>> = vec![None; num_shdrs];
        arena[0] = Some(Elf64Shdr::default()); // reserved null entry
        for (&index, shdr) in &known {
            arena[index as usize] = Some(*shdr);
        }

        let known_snapshot: Vec<(u16, Elf64Shdr)> =
            known.iter().map(|(&i, &s)| (i, s)).collect();
        let insert_shdr = |arena: &mut Vec<Option<Elf64Shdr>>,
                               shdr: Elf64Shdr,
                               ordered: bool,
                               section: &'static str|
         -> Result<u16> {
            let mut start = 1usize;
            if ordered {
                for (index, k) in &known_snapshot {
                    if shdr.sh_addr >= k.sh_addr && shdr.sh_addr < k.sh_addr + k.sh_size {
                        start = *index as usize + 1;
                    }
                }
            }
            let mut relaxed = false;
            loop {
                if let Some(slot) = (start..arena.len()).find(|&i| arena[i].is_none()) {
                    arena[slot] = Some(shdr);
                    return Ok(slot as u16);
                }
                if !relaxed && start != 1 {
                    warn!(
                        "no slot for {} at sh_addr {:#x} keeps index order, relaxing",
                        section, shdr.sh_addr
                    );
                    start = 1;
                    relaxed = true;
                    continue;
                }
                return Err(ConvertError::Layout { section });
            }
        };

        if let Some(size) = init_size {
            let shdr = Elf64Shdr {
                sh_name: shstrtab.offset_of(".init"),
                sh_type: elf::SHT_PROGBITS,
                sh_flags: elf::SHF_ALLOC | elf::SHF_EXECINSTR,
                sh_addr: self.dyn_info.init,
                sh_offset: vaddr_to_foffset(self.dyn_info.init),
                sh_size: size,
                sh_addralign: 4,
                ..Elf64Shdr::default()
            };
            insert_shdr(&mut arena, shdr, true, ".init")?;
        }

        if let Some(size) = fini_size {
            let shdr = Elf64Shdr {
                sh_name: shstrtab.offset_of(".fini"),
                sh_type: elf::SHT_PROGBITS,
                sh_flags: elf::SHF_ALLOC | elf::SHF_EXECINSTR,
                sh_addr: self.dyn_info.fini,
                sh_offset: vaddr_to_foffset(self.dyn_info.fini),
                sh_size: size,
                sh_addralign: 4,
                ..Elf64Shdr::default()
            };
            insert_shdr(&mut arena, shdr, true, ".fini")?;
        }

        let rodata = &self.header.segments[NsoSegmentType::Rodata as usize];
        let rodata_phdr = &load_phdrs[NsoSegmentType::Rodata as usize];

        let dynstr_shndx = insert_shdr(
            &mut arena,
            Elf64Shdr {
                sh_name: shstrtab.offset_of(".dynstr"),
                sh_type: elf::SHT_STRTAB,
                sh_flags: elf::SHF_ALLOC,
                sh_addr: rodata.memory_offset as u64 + self.header.dynstr.offset as u64,
                sh_offset: rodata_phdr.p_offset + self.header.dynstr.offset as u64,
                sh_size: self.header.dynstr.size as u64,
                sh_addralign: 1,
                ..Elf64Shdr::default()
            },
            false,
            ".dynstr",
        )?;

        let mut last_local = 0u32;
        for i in 0..self.dynsym_count() {
            let Some(sym) = self.dynsym_at(i) else { break };
            if sym.binding() == elf::STB_LOCAL {
                last_local = last_local.max(i as u32);
            }
        }
        let dynsym_shndx = insert_shdr(
            &mut arena,
            Elf64Shdr {
                sh_name: shstrtab.offset_of(".dynsym"),
                sh_type: elf::SHT_DYNSYM,
                sh_flags: elf::SHF_ALLOC,
                sh_addr: rodata.memory_offset as u64 + self.header.dynsym.offset as u64,
                sh_offset: rodata_phdr.p_offset + self.header.dynsym.offset as u64,
                sh_size: self.header.dynsym.size as u64,
                sh_link: dynstr_shndx as u32,
                sh_info: last_local + 1,
                sh_addralign: 8,
                sh_entsize: Elf64Sym::LEN as u64,
                ..Elf64Shdr::default()
            },
            false,
            ".dynsym",
        )?;

        insert_shdr(
            &mut arena,
            Elf64Shdr {
                sh_name: shstrtab.offset_of(".dynamic"),
                sh_type: elf::SHT_DYNAMIC,
                sh_flags: elf::SHF_ALLOC | elf::SHF_WRITE,
                sh_addr: dyn_phdr.p_vaddr,
                sh_offset: dyn_phdr.p_offset,
                sh_size: dyn_phdr.p_filesz,
                sh_link: dynstr_shndx as u32,
                sh_addralign: dyn_phdr.p_align,
                sh_entsize: Elf64Dyn::LEN as u64,
                ..Elf64Shdr::default()
            },
            false,
            ".dynamic",
        )?;

        insert_shdr(
            &mut arena,
            Elf64Shdr {
                sh_name: shstrtab.offset_of(".rela.dyn"),
                sh_type: elf::SHT_RELA,
                sh_flags: elf::SHF_ALLOC,
                sh_addr: self.dyn_info.rela,
                sh_offset: vaddr_to_foffset(self.dyn_info.rela),
                sh_size: self.dyn_info.relasz,
                sh_link: dynsym_shndx as u32,
                sh_addralign: 8,
                sh_entsize: Elf64Rela::LEN as u64,
                ..Elf64Shdr::default()
            },
            false,
            ".rela.dyn",
        )?;

        let mut plt_shndx = elf::SHN_UNDEF;
        if let Some(plt) = &self.plt {
            let shdr = Elf64Shdr {
                sh_name: shstrtab.offset_of(".plt"),
                sh_type: elf::SHT_PROGBITS,
                sh_flags: elf::SHF_ALLOC | elf::SHF_EXECINSTR,
                sh_addr: plt.addr,
                sh_offset: vaddr_to_foffset(plt.addr),
                sh_size: plt.size,
                sh_addralign: 0x10,
                sh_entsize: 0x10,
                ..Elf64Shdr::default()
            };
            plt_shndx = insert_shdr(&mut arena, shdr, true, ".plt")?;
        }

        if present_got {
            let got = got_addr.unwrap_or(0);
            let end = heuristics::glob_dat_end(&self.image, &self.dyn_info, got);
            let shdr = Elf64Shdr {
                sh_name: shstrtab.offset_of(".got"),
                sh_type: elf::SHT_PROGBITS,
                sh_flags: elf::SHF_ALLOC | elf::SHF_WRITE,
                sh_addr: got,
                sh_offset: vaddr_to_foffset(got),
                sh_size: end - got,
                sh_addralign: 8,
                sh_entsize: 8,
                ..Elf64Shdr::default()
            };
            insert_shdr(&mut arena, shdr, true, ".got")?;
        }

        if present_got_plt {
            let shdr = Elf64Shdr {
                sh_name: shstrtab.offset_of(".got.plt"),
                sh_type: elf::SHT_PROGBITS,
                sh_flags: elf::SHF_ALLOC | elf::SHF_WRITE,
                sh_addr: self.dyn_info.pltgot,
                sh_offset: vaddr_to_foffset(self.dyn_info.pltgot),
                sh_size: jump_slot_end - self.dyn_info.pltgot,
                sh_addralign: 8,
                sh_entsize: 8,
                ..Elf64Shdr::default()
            };
            insert_shdr(&mut arena, shdr, true, ".got.plt")?;
        }

        if present_rela_plt {
            if !present_plt {
                warn!(".rela.plt present without a detected .plt");
            }
            let mut flags = elf::SHF_ALLOC;
            if plt_shndx != elf::SHN_UNDEF {
                flags |= elf::SHF_INFO_LINK;
            }
            let shdr = Elf64Shdr {
                sh_name: shstrtab.offset_of(".rela.plt"),
                sh_type: elf::SHT_RELA,
                sh_flags: flags,
                sh_addr: self.dyn_info.jmprel,
                sh_offset: vaddr_to_foffset(self.dyn_info.jmprel),
                sh_size: self.dyn_info.pltrelsz,
                sh_link: dynsym_shndx as u32,
                sh_info: plt_shndx as u32,
                sh_addralign: 8,
                sh_entsize: Elf64Rela::LEN as u64,
                ..Elf64Shdr::default()
            };
            insert_shdr(&mut arena, shdr, false, ".rela.plt")?;
        }

        if present_init_array {
            let shdr = Elf64Shdr {
                sh_name: shstrtab.offset_of(".init_array"),
                sh_type: elf::SHT_INIT_ARRAY,
                sh_flags: elf::SHF_ALLOC | elf::SHF_WRITE,
                sh_addr: self.dyn_info.init_array,
                sh_offset: vaddr_to_foffset(self.dyn_info.init_array),
                sh_size: self.dyn_info.init_arraysz,
                sh_addralign: 8,
                ..Elf64Shdr::default()
            };
            insert_shdr(&mut arena, shdr, true, ".init_array")?;
        }

        if present_fini_array {
            let shdr = Elf64Shdr {
                sh_name: shstrtab.offset_of(".fini_array"),
                sh_type: elf::SHT_FINI_ARRAY,
                sh_flags: elf::SHF_ALLOC | elf::SHF_WRITE,
                sh_addr: self.dyn_info.fini_array,
                sh_offset: vaddr_to_foffset(self.dyn_info.fini_array),
                sh_size: self.dyn_info.fini_arraysz,
                sh_addralign: 8,
                ..Elf64Shdr::default()
            };
            insert_shdr(&mut arena, shdr, true, ".fini_array")?;
        }

        if present_hash {
            let at = self.dyn_info.hash as usize;
            let nbucket = read_u32(&self.image, at).ok_or_else(|| {
                ConvertError::CorruptImage("DT_HASH table outside the image".into())
            })?;
            let nchain = read_u32(&self.image, at + 4).ok_or_else(|| {
                ConvertError::CorruptImage("DT_HASH table outside the image".into())
            })?;
            let shdr = Elf64Shdr {
                sh_name: shstrtab.offset_of(".hash"),
                sh_type: elf::SHT_HASH,
                sh_flags: elf::SHF_ALLOC,
                sh_addr: self.dyn_info.hash,
                sh_offset: vaddr_to_foffset(self.dyn_info.hash),
                sh_size: 8 + (nbucket as u64 + nchain as u64) * 4,
                sh_link: dynsym_shndx as u32,
                sh_addralign: 8,
                sh_entsize: 4,
                ..Elf64Shdr::default()
            };
            insert_shdr(&mut arena, shdr, false, ".hash")?;
        }

        if present_gnu_hash {
            let at = self.dyn_info.gnu_hash as usize;
            let header_word = |off: usize| {
                read_u32(&self.image, at + off).ok_or_else(|| {
                    ConvertError::CorruptImage("DT_GNU_HASH table outside the image".into())
                })
            };
            let nbuckets = header_word(0)? as u64;
            let symndx = header_word(4)? as u64;
            let maskwords = header_word(8)? as u64;
            let size =
                16 + maskwords * 8 + nbuckets * 4 + self.dynsym_count().saturating_sub(symndx) * 4;
            let shdr = Elf64Shdr {
                sh_name: shstrtab.offset_of(".gnu.hash"),
                sh_type: elf::SHT_GNU_HASH,
                sh_flags: elf::SHF_ALLOC,
                sh_addr: self.dyn_info.gnu_hash,
                sh_offset: vaddr_to_foffset(self.dyn_info.gnu_hash),
                sh_size: size,
                sh_link: dynsym_shndx as u32,
                sh_addralign: 8,
                sh_entsize: 4,
                ..Elf64Shdr::default()
            };
            insert_shdr(&mut arena, shdr, false, ".gnu.hash")?;
        }

        if let Some(note_addr) = self.note_addr {
            let note = self
                .image
                .get(note_addr as usize..)
                .and_then(Elf64Nhdr::read_from)
                .ok_or_else(|| {
                    ConvertError::CorruptImage("build-id note outside the image".into())
                })?;
            let shdr = Elf64Shdr {
                sh_name: shstrtab.offset_of(".note"),
                sh_type: elf::SHT_NOTE,
                sh_flags: elf::SHF_ALLOC,
                sh_addr: note_addr,
                sh_offset: vaddr_to_foffset(note_addr),
                sh_size: Elf64Nhdr::LEN as u64 + note.n_namesz as u64 + note.n_descsz as u64,
                sh_addralign: 4,
                ..Elf64Shdr::default()
            };
            insert_shdr(&mut arena, shdr, false, ".note")?;
        }

        if let Some((hdr_size, frame_addr, frame_size)) = eh {
            let shdr = Elf64Shdr {
                sh_name: shstrtab.offset_of(".eh_frame_hdr"),
                sh_type: elf::SHT_PROGBITS,
                sh_flags: elf::SHF_ALLOC,
                sh_addr: self.eh_hdr_addr,
                sh_offset: vaddr_to_foffset(self.eh_hdr_addr),
                sh_size: hdr_size,
                sh_addralign: 4,
                ..Elf64Shdr::default()
            };
            insert_shdr(&mut arena, shdr, true, ".eh_frame_hdr")?;

            let shdr = Elf64Shdr {
                sh_name: shstrtab.offset_of(".eh_frame"),
                sh_type: elf::SHT_PROGBITS,
                sh_flags: elf::SHF_ALLOC,
                sh_addr: frame_addr,
                sh_offset: vaddr_to_foffset(frame_addr),
                sh_size: frame_size,
                sh_addralign: 4,
                ..Elf64Shdr::default()
            };
            insert_shdr(&mut arena, shdr, true, ".eh_frame")?;
        }

        let shstrndx = insert_shdr(
            &mut arena,
            Elf64Shdr {
                sh_name: shstrtab.offset_of(".shstrtab"),
                sh_type: elf::SHT_STRTAB,
                sh_offset: shstrtab_offset,
                sh_size: shstrtab.size() as u64,
                sh_addralign: 1,
                ..Elf64Shdr::default()
            },
            false,
            ".shstrtab",
        )?;

        // ------------------------------------------------------------------
        // Serialization
        // ------------------------------------------------------------------
        let total_size = data_offset as usize;
        let mut elf = vec![0u8; total_size];

        let mut ehdr = Elf64Ehdr {
            e_type: elf::ET_DYN,
            e_machine: elf::EM_AARCH64,
            e_version: elf::EV_CURRENT,
            e_entry: self.header.segments[NsoSegmentType::Text as usize].memory_offset as u64,
            e_phoff: phoff,
            e_shoff: shoff,
            e_flags: 0,
            e_ehsize: Elf64Ehdr::LEN as u16,
            e_phentsize: Elf64Phdr::LEN as u16,
            e_phnum: NUM_PHDRS as u16,
            e_shentsize: Elf64Shdr::LEN as u16,
            e_shnum: num_shdrs as u16,
            e_shstrndx: shstrndx,
            ..Elf64Ehdr::default()
        };
        ehdr.e_ident[..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        ehdr.e_ident[4] = elf::ELFCLASS64;
        ehdr.e_ident[5] = elf::ELFDATA2LSB;
        ehdr.e_ident[6] = elf::EV_CURRENT as u8;
        ehdr.write_to(&mut elf);

        let phdrs = [
            load_phdrs[0],
            load_phdrs[1],
            load_phdrs[2],
            dyn_phdr,
            eh_phdr,
        ];
        for (i, phdr) in phdrs.iter().enumerate() {
            let at = phoff as usize + i * Elf64Phdr::LEN;
            phdr.write_to(&mut elf[at..at + Elf64Phdr::LEN]);
        }

        for (i, slot) in arena.iter().enumerate() {
            if let Some(shdr) = slot {
                let at = shoff as usize + i * Elf64Shdr::LEN;
                shdr.write_to(&mut elf[at..at + Elf64Shdr::LEN]);
            }
        }

        let shstrtab_bytes = shstrtab.to_bytes();
        elf[shstrtab_offset as usize..shstrtab_offset as usize + shstrtab_bytes.len()]
            .copy_from_slice(&shstrtab_bytes);

        for (i, phdr) in load_phdrs.iter().enumerate() {
            let segment = &self.header.segments[i];
            let src = segment.memory_offset as usize..(segment.memory_offset + segment.memory_size) as usize;
            let dst = phdr.p_offset as usize;
            elf[dst..dst + segment.memory_size as usize].copy_from_slice(&self.image[src]);
        }

        Ok(elf)
    }
}

/// Convert NSO file bytes into ELF file bytes.
pub fn nso_to_elf(nso: &[u8]) -> Result<Vec<u8>> {
    NsoFile::parse(nso)?.to_elf()
}
