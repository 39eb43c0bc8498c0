//! The object conversion itself.
//!
//! All the pointers in an ELF file move when sections, symbols, and
//! relocation entries are added and removed, so the converter walks the
//! input section headers depth first: a header's dependencies (its linked
//! string table, a relocation section's symbol table and target) receive
//! their output indices before the dependent header is emitted. The index
//! maps kept on [`Converter`] translate every cross reference as it is
//! encountered.

use core::mem;
use std::io::Write;

use log::{debug, info};

use crate::elf::{
    self, FileHeader64, Ident, Rel32, Rela64, SectionHeader32, SectionHeader64, Sym32, Sym64,
};
use crate::error::{Error, Result};
use crate::flist::{FunctionList, Signature};
use crate::pod::{bytes_of, bytes_of_slice};
use crate::read::Object;
use crate::stub;

/// Convert a 32-bit relocatable object into a 64-bit one.
///
/// Equivalent to [`Converter::read`], [`Converter::convert`], and
/// [`Converter::finish`] in sequence.
pub fn convert(data: &[u8], functions: &FunctionList) -> Result<Vec<u8>> {
    let mut converter = Converter::read(data, functions)?;
    converter.convert()?;
    Ok(converter.finish())
}

/// Section dispatch classes for the conversion walk.
enum SectionKind {
    Null,
    Symtab,
    Note,
    Rel,
    Other,
}

impl SectionKind {
    fn of(sh_type: u32) -> SectionKind {
        match sh_type {
            elf::SHT_NULL => SectionKind::Null,
            elf::SHT_SYMTAB => SectionKind::Symtab,
            elf::SHT_NOTE => SectionKind::Note,
            elf::SHT_REL => SectionKind::Rel,
            _ => SectionKind::Other,
        }
    }
}

fn is_real_section(shndx: u16) -> bool {
    shndx != elf::SHN_UNDEF && shndx < elf::SHN_LORESERVE
}

/// Converts one parsed 32-bit object into a 64-bit object.
///
/// The converter holds all conversion state: the input, the function list,
/// the index maps, and the output buffers. It is used once.
#[derive(Debug)]
pub struct Converter<'data> {
    object: Object<'data>,
    functions: &'data FunctionList,
    /// Output index of each converted input section header; 0 while
    /// unconverted. 0 doubles as the null section index, so a real section
    /// never lands there.
    new_shdr_idx: Vec<u16>,
    /// Local duplicate index of each input symbol; 0 for none. Allocated by
    /// the symbol table conversion.
    copied_sym_idx: Option<Vec<u16>>,
    /// Where the widened input symbols start in the output symbol table:
    /// the number of local duplicates plus the leading null symbol.
    new_sym_idx_off: u16,
    /// The output section header table.
    shdr_table: Vec<SectionHeader64>,
    /// The output section data, laid out contiguously after the file header.
    sections: Vec<u8>,
}

impl<'data> Converter<'data> {
    /// Parse `data` and prepare a conversion using `functions`.
    pub fn read(data: &'data [u8], functions: &'data FunctionList) -> Result<Self> {
        let object = Object::parse(data)?;
        let count = object.sections().len();
        Ok(Converter {
            object,
            functions,
            new_shdr_idx: vec![0; count],
            copied_sym_idx: None,
            new_sym_idx_off: 0,
            shdr_table: Vec::new(),
            sections: Vec::new(),
        })
    }

    /// Convert every input section header.
    pub fn convert(&mut self) -> Result<()> {
        for index in 0..self.object.sections().len() {
            self.convert_section(index)?;
        }
        Ok(())
    }

    /// Assemble the output object in memory.
    pub fn finish(self) -> Vec<u8> {
        let header = self.file_header();
        let mut out = Vec::with_capacity(
            mem::size_of::<FileHeader64>()
                + self.sections.len()
                + self.shdr_table.len() * mem::size_of::<SectionHeader64>(),
        );
        out.extend_from_slice(bytes_of(&header));
        out.extend_from_slice(&self.sections);
        out.extend_from_slice(bytes_of_slice(&self.shdr_table));
        out
    }

    /// Write the assembled output to `w`.
    pub fn write<W: Write>(self, mut w: W) -> Result<()> {
        let header = self.file_header();
        w.write_all(bytes_of(&header)).map_err(Error::io)?;
        w.write_all(&self.sections).map_err(Error::io)?;
        w.write_all(bytes_of_slice(&self.shdr_table))
            .map_err(Error::io)?;
        Ok(())
    }

    /// The file offset where the next appended section data will land.
    fn data_offset(&self) -> u64 {
        (mem::size_of::<FileHeader64>() + self.sections.len()) as u64
    }

    fn check_section_index(&self, index: usize) -> Result<()> {
        if index >= self.new_shdr_idx.len() {
            return Err(Error::convert(format!(
                "section index {} out of range",
                index
            )));
        }
        Ok(())
    }

    /// Convert one input section header and everything it depends on.
    fn convert_section(&mut self, index: usize) -> Result<()> {
        if self.new_shdr_idx[index] != 0 {
            return Ok(());
        }
        let section = *self.object.section(index)?;
        let out = match SectionKind::of(section.sh_type.get()) {
            SectionKind::Null => SectionHeader64::default(),
            SectionKind::Note => {
                // Dropped; nothing may reference a note section.
                debug!("dropping note section {}", index);
                return Ok(());
            }
            SectionKind::Symtab => {
                let link = section.sh_link.get() as usize;
                self.check_section_index(link)?;
                if link != 0 && self.new_shdr_idx[link] == 0 {
                    self.convert_section(link)?;
                }
                self.convert_symtab_refs(&section)?;
                self.convert_symtab(&section)?
            }
            SectionKind::Rel => {
                let link = section.sh_link.get() as usize;
                let target = section.sh_info.get() as usize;
                self.check_section_index(link)?;
                self.check_section_index(target)?;
                if link != 0 && self.new_shdr_idx[link] == 0 {
                    self.convert_section(link)?;
                }
                if target != 0 && self.new_shdr_idx[target] == 0 {
                    self.convert_section(target)?;
                }
                self.convert_rel(&section)?
            }
            SectionKind::Other => self.convert_other(&section)?,
        };
        debug!(
            "converted section {} to {}",
            index,
            self.shdr_table.len()
        );
        self.new_shdr_idx[index] = self.shdr_table.len() as u16;
        self.shdr_table.push(out);
        Ok(())
    }

    /// Convert every section referenced by a symbol, so the symbol
    /// conversion finds their output indices populated.
    fn convert_symtab_refs(&mut self, section: &SectionHeader32) -> Result<()> {
        let object = self.object;
        for sym in object.symbols(section)? {
            let shndx = sym.st_shndx.get();
            if !is_real_section(shndx) {
                continue;
            }
            self.check_section_index(shndx as usize)?;
            if self.new_shdr_idx[shndx as usize] == 0 {
                self.convert_section(shndx as usize)?;
            }
        }
        Ok(())
    }

    /// Convert the symbol table, generating thunks, local duplicates, and
    /// relocations for the listed symbols.
    ///
    /// The thunk code and its relocations become two extra output sections,
    /// emitted just before the symbol table's own header.
    fn convert_symtab(&mut self, section: &SectionHeader32) -> Result<SectionHeader64> {
        if self.copied_sym_idx.is_some() {
            return Err(Error::convert("multiple symbol tables"));
        }
        let object = self.object;
        let functions = self.functions;
        let symbols = object.symbols(section)?;
        let strings = object.strings(object.section(section.sh_link.get() as usize)?)?;

        // First pass: decide which symbols get a thunk and a local
        // duplicate, and assign the duplicate indices. Index 0 stays the
        // null symbol.
        let mut copied = vec![0u16; symbols.len()];
        let mut offset = 1u16;
        for (index, sym) in symbols.iter().enumerate() {
            if functions.get(strings.get(sym.st_name.get())?).is_none() {
                continue;
            }
            let shndx = sym.st_shndx.get();
            let global_func = sym.st_info == elf::st_info(elf::STB_GLOBAL, elf::STT_FUNC);
            if shndx == elf::SHN_UNDEF || (global_func && is_real_section(shndx)) {
                copied[index] = offset;
                offset += 1;
            }
        }
        self.new_sym_idx_off = offset;

        // Second pass: widen every symbol, emitting the thunks and their
        // relocations as we go.
        let mut stubs = Vec::new();
        let mut local_syms = vec![Sym64::default()];
        let mut main_syms = Vec::with_capacity(symbols.len());
        let mut relas = Vec::new();
        for (index, sym) in symbols.iter().enumerate() {
            let name = strings.get(sym.st_name.get())?;
            let signature = functions.get(name);
            let shndx = sym.st_shndx.get();
            let global_func = sym.st_info == elf::st_info(elf::STB_GLOBAL, elf::STT_FUNC);
            let out = match signature {
                Some(signature) if global_func && is_real_section(shndx) => {
                    info!("thunking function {}", String::from_utf8_lossy(name));
                    self.convert_global_symbol(
                        sym,
                        index,
                        signature,
                        &copied,
                        &mut stubs,
                        &mut local_syms,
                        &mut relas,
                    )
                }
                Some(signature) if shndx == elf::SHN_UNDEF => {
                    info!(
                        "thunking external function {}",
                        String::from_utf8_lossy(name)
                    );
                    self.convert_extern_symbol(
                        sym,
                        index,
                        signature,
                        &mut stubs,
                        &mut local_syms,
                        &mut relas,
                    )
                }
                _ => self.convert_plain_symbol(sym),
            };
            main_syms.push(out);
        }

        let out = SectionHeader64 {
            sh_name: section.sh_name,
            sh_type: elf::SHT_SYMTAB.into(),
            sh_flags: u64::from(section.sh_flags.get()).into(),
            sh_addr: 0.into(),
            sh_offset: self.data_offset().into(),
            sh_size: (((local_syms.len() + main_syms.len()) * mem::size_of::<Sym64>()) as u64)
                .into(),
            sh_link: u32::from(self.new_shdr_idx[section.sh_link.get() as usize]).into(),
            sh_info: (section.sh_info.get() + u32::from(self.new_sym_idx_off)).into(),
            sh_addralign: 8.into(),
            sh_entsize: (mem::size_of::<Sym64>() as u64).into(),
        };
        self.sections.extend_from_slice(bytes_of_slice(&local_syms));
        self.sections.extend_from_slice(bytes_of_slice(&main_syms));

        let stub_header = SectionHeader64 {
            sh_name: 0.into(),
            sh_type: elf::SHT_PROGBITS.into(),
            sh_flags: u64::from(elf::SHF_ALLOC | elf::SHF_EXECINSTR).into(),
            sh_addr: 0.into(),
            sh_offset: self.data_offset().into(),
            sh_size: (stubs.len() as u64).into(),
            sh_link: 0.into(),
            sh_info: 0.into(),
            sh_addralign: 0.into(),
            sh_entsize: 0.into(),
        };
        self.shdr_table.push(stub_header);
        self.sections.extend_from_slice(&stubs);

        let rela_header = SectionHeader64 {
            sh_name: 0.into(),
            sh_type: elf::SHT_RELA.into(),
            sh_flags: 0.into(),
            sh_addr: 0.into(),
            sh_offset: self.data_offset().into(),
            sh_size: ((relas.len() * mem::size_of::<Rela64>()) as u64).into(),
            // The symbol table's header is appended right after this one.
            sh_link: (self.shdr_table.len() as u32 + 1).into(),
            sh_info: (self.shdr_table.len() as u32 - 1).into(),
            sh_addralign: 8.into(),
            sh_entsize: (mem::size_of::<Rela64>() as u64).into(),
        };
        self.shdr_table.push(rela_header);
        self.sections.extend_from_slice(bytes_of_slice(&relas));

        self.copied_sym_idx = Some(copied);
        Ok(out)
    }

    /// Widen a defined global function that is in the list.
    ///
    /// The global symbol moves to the thunk, so 64-bit callers get the
    /// conversion; the local duplicate keeps pointing at the 32-bit code and
    /// resolves the thunk's call relocation.
    #[allow(clippy::too_many_arguments)]
    fn convert_global_symbol(
        &self,
        sym: &Sym32,
        index: usize,
        signature: &Signature,
        copied: &[u16],
        stubs: &mut Vec<u8>,
        local_syms: &mut Vec<Sym64>,
        relas: &mut Vec<Rela64>,
    ) -> Sym64 {
        let stub_offset = stubs.len() as u32;
        let patch = stub::global_stub(stubs, signature);

        local_syms.push(Sym64 {
            st_name: sym.st_name,
            st_info: elf::st_info(elf::STB_LOCAL, elf::STT_FUNC),
            st_other: 0,
            st_shndx: self.new_shdr_idx[sym.st_shndx.get() as usize].into(),
            st_value: u64::from(sym.st_value.get()).into(),
            st_size: u64::from(sym.st_size.get()).into(),
        });
        relas.push(Rela64 {
            r_offset: u64::from(patch).into(),
            r_info: elf::r_info64(u32::from(copied[index]), elf::R_X86_64_PC32).into(),
            r_addend: (-4).into(),
        });
        Sym64 {
            st_name: sym.st_name,
            st_info: elf::st_info(elf::STB_GLOBAL, elf::STT_FUNC),
            st_other: 0,
            // The thunk section, appended after the symbol conversion.
            st_shndx: (self.shdr_table.len() as u16).into(),
            st_value: u64::from(stub_offset).into(),
            st_size: u64::from(stubs.len() as u32 - stub_offset).into(),
        }
    }

    /// Widen an undefined symbol that is in the list.
    ///
    /// The global symbol stays undefined, to be resolved against 64-bit
    /// code; the local duplicate points at the thunk, so relocations from
    /// 32-bit callers can be repointed to it.
    fn convert_extern_symbol(
        &self,
        sym: &Sym32,
        index: usize,
        signature: &Signature,
        stubs: &mut Vec<u8>,
        local_syms: &mut Vec<Sym64>,
        relas: &mut Vec<Rela64>,
    ) -> Sym64 {
        let stub_offset = stubs.len() as u32;
        let patch = stub::extern_stub(stubs, signature);

        local_syms.push(Sym64 {
            st_name: sym.st_name,
            st_info: elf::st_info(elf::STB_LOCAL, elf::STT_FUNC),
            st_other: 0,
            st_shndx: (self.shdr_table.len() as u16).into(),
            st_value: u64::from(stub_offset).into(),
            st_size: u64::from(stubs.len() as u32 - stub_offset).into(),
        });
        relas.push(Rela64 {
            r_offset: u64::from(patch).into(),
            r_info: elf::r_info64(
                index as u32 + u32::from(self.new_sym_idx_off),
                elf::R_X86_64_PC32,
            )
            .into(),
            r_addend: (-4).into(),
        });
        Sym64 {
            st_name: sym.st_name,
            st_info: elf::st_info(elf::STB_GLOBAL, elf::STT_FUNC),
            st_other: 0,
            st_shndx: elf::SHN_UNDEF.into(),
            st_value: 0.into(),
            st_size: 0.into(),
        }
    }

    /// Widen a symbol without modification, translating a real section
    /// index and carrying reserved indices through.
    fn convert_plain_symbol(&self, sym: &Sym32) -> Sym64 {
        let shndx = sym.st_shndx.get();
        Sym64 {
            st_name: sym.st_name,
            st_info: sym.st_info,
            st_other: 0,
            st_shndx: if is_real_section(shndx) {
                self.new_shdr_idx[shndx as usize].into()
            } else {
                sym.st_shndx
            },
            st_value: u64::from(sym.st_value.get()).into(),
            st_size: u64::from(sym.st_size.get()).into(),
        }
    }

    /// Convert a `SHT_REL` section into a `SHT_RELA` section.
    fn convert_rel(&mut self, section: &SectionHeader32) -> Result<SectionHeader64> {
        let object = self.object;
        let rels = object.relocations(section)?;
        let out = SectionHeader64 {
            sh_name: section.sh_name,
            sh_type: elf::SHT_RELA.into(),
            sh_flags: u64::from(section.sh_flags.get()).into(),
            sh_addr: 0.into(),
            sh_offset: self.data_offset().into(),
            sh_size: ((rels.len() * mem::size_of::<Rela64>()) as u64).into(),
            sh_link: u32::from(self.new_shdr_idx[section.sh_link.get() as usize]).into(),
            sh_info: u32::from(self.new_shdr_idx[section.sh_info.get() as usize]).into(),
            sh_addralign: 8.into(),
            sh_entsize: (mem::size_of::<Rela64>() as u64).into(),
        };
        let copied = self.copied_sym_idx.as_deref().unwrap_or(&[]);
        let mut relas = Vec::with_capacity(rels.len());
        for rel in rels {
            relas.push(Rela64 {
                r_offset: u64::from(rel.r_offset.get()).into(),
                r_info: convert_r_info(rel, copied, self.new_sym_idx_off)?.into(),
                // The implicit addend stays encoded in the target section.
                r_addend: 0.into(),
            });
        }
        self.sections.extend_from_slice(bytes_of_slice(&relas));
        Ok(out)
    }

    /// Copy any other section verbatim, widening its header.
    fn convert_other(&mut self, section: &SectionHeader32) -> Result<SectionHeader64> {
        let object = self.object;
        let data = object.section_data(section)?;
        let out = SectionHeader64 {
            sh_name: section.sh_name,
            sh_type: section.sh_type,
            sh_flags: u64::from(section.sh_flags.get()).into(),
            sh_addr: 0.into(),
            sh_offset: self.data_offset().into(),
            sh_size: u64::from(section.sh_size.get()).into(),
            sh_link: 0.into(),
            sh_info: section.sh_info,
            sh_addralign: u64::from(section.sh_addralign.get()).into(),
            sh_entsize: u64::from(section.sh_entsize.get()).into(),
        };
        self.sections.extend_from_slice(data);
        Ok(out)
    }

    fn file_header(&self) -> FileHeader64 {
        FileHeader64 {
            e_ident: Ident {
                magic: elf::ELFMAG,
                class: elf::ELFCLASS64,
                data: elf::ELFDATA2LSB,
                version: elf::EV_CURRENT,
                os_abi: 0,
                abi_version: 0,
                padding: [0; 7],
            },
            e_type: elf::ET_REL.into(),
            e_machine: elf::EM_X86_64.into(),
            e_version: 1.into(),
            e_entry: 0.into(),
            e_phoff: 0.into(),
            e_shoff: self.data_offset().into(),
            e_flags: 0.into(),
            e_ehsize: (mem::size_of::<FileHeader64>() as u16).into(),
            e_phentsize: 0.into(),
            e_phnum: 0.into(),
            e_shentsize: (mem::size_of::<SectionHeader64>() as u16).into(),
            e_shnum: (self.shdr_table.len() as u16).into(),
            e_shstrndx: self.new_shdr_idx[self.object.header().e_shstrndx.get() as usize].into(),
        }
    }
}

/// Translate a 32-bit relocation's symbol and type.
///
/// A symbol with a local duplicate is repointed to the duplicate, so 32-bit
/// callers reach the thunk; any other index shifts past the prepended
/// duplicate region.
fn convert_r_info(rel: &Rel32, copied: &[u16], new_sym_idx_off: u16) -> Result<u64> {
    let sym = rel.r_sym();
    if sym as usize >= copied.len() {
        return Err(Error::convert(format!(
            "relocation symbol index {} out of range",
            sym
        )));
    }
    let sym = if copied[sym as usize] != 0 {
        u32::from(copied[sym as usize])
    } else {
        sym + u32::from(new_sym_idx_off)
    };
    let typ = match rel.r_type() {
        elf::R_386_32 => elf::R_X86_64_32,
        elf::R_386_PC32 | elf::R_386_PLT32 => elf::R_X86_64_PC32,
        typ => {
            return Err(Error::convert(format!(
                "unsupported relocation type {}",
                typ
            )));
        }
    };
    Ok(elf::r_info64(sym, typ))
}
