//! Bidirectional converter between NSO modules and ELF64 shared
//! objects for AArch64.
//!
//! NSO is a stripped container: three LZ4-compressed loadable
//! segments, a SHA-256 per segment, and almost no linking metadata
//! beyond a MOD0 block pointing at the dynamic section. Going NSO ->
//! ELF therefore reconstructs section headers from the dynamic
//! section and a handful of byte-level heuristics; going ELF -> NSO
//! simply repacks the loadable segments.
//!
//! ```no_run
//! let nso = std::fs::read("module.nso")?;
//! let elf = nsotool::nso_to_elf(&nso)?;
//! std::fs::write("module.elf", elf)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod codec;
pub mod dynamic;
pub mod eh_frame;
pub mod elf;
pub mod elf2nso;
pub mod error;
pub mod heuristics;
pub mod nso;
pub mod nso2elf;
pub mod strtab;

pub use elf2nso::elf_to_nso;
pub use error::{ConvertError, Result};
pub use nso2elf::{nso_to_elf, NsoFile};
