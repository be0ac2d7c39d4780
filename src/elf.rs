//! ELF64 structure definitions and constants
//!
//! Fixed-layout little-endian readers/writers for the ELF64 pieces the
//! converter touches. All layouts are the standard System V ones; the
//! invariant fields (class, data encoding, machine) are pinned to
//! 64-bit / LSB / AArch64.

// ============================================================================
// Identity constants
// ============================================================================

/// ELF magic number (0x7F 'E' 'L' 'F', little-endian u32)
pub const ELF_MAGIC: u32 = 0x464C457F;

pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1;
pub const EV_CURRENT: u32 = 1;

/// Object file types
pub const ET_DYN: u16 = 3;

/// Machine type for AArch64
pub const EM_AARCH64: u16 = 0xB7;

// ============================================================================
// Program header constants
// ============================================================================

pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_GNU_EH_FRAME: u32 = 0x6474E550;

pub const PF_X: u32 = 0x1;
pub const PF_W: u32 = 0x2;
pub const PF_R: u32 = 0x4;

// ============================================================================
// Section header constants
// ============================================================================

pub const SHT_NULL: u32 = 0;
pub const SHT_PROGBITS: u32 = 1;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;
pub const SHT_HASH: u32 = 5;
pub const SHT_DYNAMIC: u32 = 6;
pub const SHT_NOTE: u32 = 7;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_DYNSYM: u32 = 11;
pub const SHT_INIT_ARRAY: u32 = 14;
pub const SHT_FINI_ARRAY: u32 = 15;
pub const SHT_GNU_HASH: u32 = 0x6FFFFFF6;

pub const SHF_WRITE: u64 = 0x1;
pub const SHF_ALLOC: u64 = 0x2;
pub const SHF_EXECINSTR: u64 = 0x4;
pub const SHF_INFO_LINK: u64 = 0x40;

/// Reserved section index range
pub const SHN_UNDEF: u16 = 0;
pub const SHN_LORESERVE: u16 = 0xFF00;

// ============================================================================
// Dynamic tags
// ============================================================================

pub const DT_NULL: i64 = 0;
pub const DT_PLTRELSZ: i64 = 2;
pub const DT_PLTGOT: i64 = 3;
pub const DT_HASH: i64 = 4;
pub const DT_STRTAB: i64 = 5;
pub const DT_SYMTAB: i64 = 6;
pub const DT_RELA: i64 = 7;
pub const DT_RELASZ: i64 = 8;
pub const DT_STRSZ: i64 = 10;
pub const DT_INIT: i64 = 12;
pub const DT_FINI: i64 = 13;
pub const DT_JMPREL: i64 = 23;
pub const DT_INIT_ARRAY: i64 = 25;
pub const DT_FINI_ARRAY: i64 = 26;
pub const DT_INIT_ARRAYSZ: i64 = 27;
pub const DT_FINI_ARRAYSZ: i64 = 28;
pub const DT_GNU_HASH: i64 = 0x6FFFFEF5;

// ============================================================================
// Symbols, relocations, notes
// ============================================================================

pub const STB_LOCAL: u8 = 0;

pub const R_AARCH64_GLOB_DAT: u32 = 1025;
pub const R_AARCH64_JUMP_SLOT: u32 = 1026;

pub const NT_GNU_BUILD_ID: u32 = 3;

// ============================================================================
// Little-endian field access helpers
// ============================================================================

#[inline]
fn u16_at(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

#[inline]
fn u32_at(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

#[inline]
fn u64_at(data: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[off..off + 8]);
    u64::from_le_bytes(raw)
}

/// Read a u64 at an arbitrary image offset, if in bounds.
pub fn read_u64(data: &[u8], off: usize) -> Option<u64> {
    let raw = data.get(off..off.checked_add(8)?)?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(raw);
    Some(u64::from_le_bytes(bytes))
}

/// Read a u32 at an arbitrary image offset, if in bounds.
pub fn read_u32(data: &[u8], off: usize) -> Option<u32> {
    let raw = data.get(off..off.checked_add(4)?)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

// ============================================================================
// ELF Header
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct Elf64Ehdr {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl Elf64Ehdr {
    pub const LEN: usize = 64;

    pub fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        let mut e_ident = [0u8; 16];
        e_ident.copy_from_slice(&data[..16]);
        Some(Self {
            e_ident,
            e_type: u16_at(data, 16),
            e_machine: u16_at(data, 18),
            e_version: u32_at(data, 20),
            e_entry: u64_at(data, 24),
            e_phoff: u64_at(data, 32),
            e_shoff: u64_at(data, 40),
            e_flags: u32_at(data, 48),
            e_ehsize: u16_at(data, 52),
            e_phentsize: u16_at(data, 54),
            e_phnum: u16_at(data, 56),
            e_shentsize: u16_at(data, 58),
            e_shnum: u16_at(data, 60),
            e_shstrndx: u16_at(data, 62),
        })
    }

    pub fn write_to(&self, out: &mut [u8]) {
        out[..16].copy_from_slice(&self.e_ident);
        out[16..18].copy_from_slice(&self.e_type.to_le_bytes());
        out[18..20].copy_from_slice(&self.e_machine.to_le_bytes());
        out[20..24].copy_from_slice(&self.e_version.to_le_bytes());
        out[24..32].copy_from_slice(&self.e_entry.to_le_bytes());
        out[32..40].copy_from_slice(&self.e_phoff.to_le_bytes());
        out[40..48].copy_from_slice(&self.e_shoff.to_le_bytes());
        out[48..52].copy_from_slice(&self.e_flags.to_le_bytes());
        out[52..54].copy_from_slice(&self.e_ehsize.to_le_bytes());
        out[54..56].copy_from_slice(&self.e_phentsize.to_le_bytes());
        out[56..58].copy_from_slice(&self.e_phnum.to_le_bytes());
        out[58..60].copy_from_slice(&self.e_shentsize.to_le_bytes());
        out[60..62].copy_from_slice(&self.e_shnum.to_le_bytes());
        out[62..64].copy_from_slice(&self.e_shstrndx.to_le_bytes());
    }

    /// Check magic, class and data encoding
    pub fn is_valid(&self) -> bool {
        u32_at(&self.e_ident, 0) == ELF_MAGIC
            && self.e_ident[4] == ELFCLASS64
            && self.e_ident[5] == ELFDATA2LSB
    }
}

// ============================================================================
// ELF Program Header
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct Elf64Phdr {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

impl Elf64Phdr {
    pub const LEN: usize = 56;

    pub fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self {
            p_type: u32_at(data, 0),
            p_flags: u32_at(data, 4),
            p_offset: u64_at(data, 8),
            p_vaddr: u64_at(data, 16),
            p_paddr: u64_at(data, 24),
            p_filesz: u64_at(data, 32),
            p_memsz: u64_at(data, 40),
            p_align: u64_at(data, 48),
        })
    }

    pub fn write_to(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.p_type.to_le_bytes());
        out[4..8].copy_from_slice(&self.p_flags.to_le_bytes());
        out[8..16].copy_from_slice(&self.p_offset.to_le_bytes());
        out[16..24].copy_from_slice(&self.p_vaddr.to_le_bytes());
        out[24..32].copy_from_slice(&self.p_paddr.to_le_bytes());
        out[32..40].copy_from_slice(&self.p_filesz.to_le_bytes());
        out[40..48].copy_from_slice(&self.p_memsz.to_le_bytes());
        out[48..56].copy_from_slice(&self.p_align.to_le_bytes());
    }
}

// ============================================================================
// ELF Section Header
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct Elf64Shdr {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

impl Elf64Shdr {
    pub const LEN: usize = 64;

    pub fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self {
            sh_name: u32_at(data, 0),
            sh_type: u32_at(data, 4),
            sh_flags: u64_at(data, 8),
            sh_addr: u64_at(data, 16),
            sh_offset: u64_at(data, 24),
            sh_size: u64_at(data, 32),
            sh_link: u32_at(data, 40),
            sh_info: u32_at(data, 44),
            sh_addralign: u64_at(data, 48),
            sh_entsize: u64_at(data, 56),
        })
    }

    pub fn write_to(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.sh_name.to_le_bytes());
        out[4..8].copy_from_slice(&self.sh_type.to_le_bytes());
        out[8..16].copy_from_slice(&self.sh_flags.to_le_bytes());
        out[16..24].copy_from_slice(&self.sh_addr.to_le_bytes());
        out[24..32].copy_from_slice(&self.sh_offset.to_le_bytes());
        out[32..40].copy_from_slice(&self.sh_size.to_le_bytes());
        out[40..44].copy_from_slice(&self.sh_link.to_le_bytes());
        out[44..48].copy_from_slice(&self.sh_info.to_le_bytes());
        out[48..56].copy_from_slice(&self.sh_addralign.to_le_bytes());
        out[56..64].copy_from_slice(&self.sh_entsize.to_le_bytes());
    }
}

// ============================================================================
// ELF Dynamic Entry
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct Elf64Dyn {
    pub d_tag: i64,
    pub d_val: u64,
}

impl Elf64Dyn {
    pub const LEN: usize = 16;

    pub fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self {
            d_tag: u64_at(data, 0) as i64,
            d_val: u64_at(data, 8),
        })
    }
}

// ============================================================================
// ELF Symbol
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct Elf64Sym {
    pub st_name: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

impl Elf64Sym {
    pub const LEN: usize = 24;

    pub fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self {
            st_name: u32_at(data, 0),
            st_info: data[4],
            st_other: data[5],
            st_shndx: u16_at(data, 6),
            st_value: u64_at(data, 8),
            st_size: u64_at(data, 16),
        })
    }

    pub fn binding(&self) -> u8 {
        self.st_info >> 4
    }
}

// ============================================================================
// ELF Relocation with Addend
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct Elf64Rela {
    pub r_offset: u64,
    pub r_info: u64,
    pub r_addend: i64,
}

impl Elf64Rela {
    pub const LEN: usize = 24;

    pub fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self {
            r_offset: u64_at(data, 0),
            r_info: u64_at(data, 8),
            r_addend: u64_at(data, 16) as i64,
        })
    }

    pub fn rel_type(&self) -> u32 {
        (self.r_info & 0xFFFF_FFFF) as u32
    }
}

// ============================================================================
// ELF Note Header
// ============================================================================

/// Note header. A note section is an array of notes, each starting
/// with this header, followed by `n_namesz` bytes of owner name and
/// `n_descsz` bytes of descriptor (both padded to a word boundary,
/// padding not included in the sizes).
#[derive(Debug, Clone, Copy, Default)]
pub struct Elf64Nhdr {
    pub n_namesz: u32,
    pub n_descsz: u32,
    pub n_type: u32,
}

impl Elf64Nhdr {
    pub const LEN: usize = 12;

    pub fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self {
            n_namesz: u32_at(data, 0),
            n_descsz: u32_at(data, 4),
            n_type: u32_at(data, 8),
        })
    }
}
