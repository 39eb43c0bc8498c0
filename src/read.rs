//! Reading and validation of the input object.

use core::mem;
use core::result;

use crate::elf::{self, FileHeader32, Rel32, SectionHeader32, Sym32};
use crate::error::{Error, Result};
use crate::pod::Bytes;

trait ReadError<T> {
    fn read_error(self, message: &'static str) -> Result<T>;
}

impl<T> ReadError<T> for result::Result<T, ()> {
    fn read_error(self, message: &'static str) -> Result<T> {
        self.map_err(|()| Error::parse(message))
    }
}

/// A parsed 32-bit relocatable input object.
///
/// Parsing validates that the file header, the section header table, and
/// every section's data lie within the file, so the accessors below can only
/// fail on indices that are out of range.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Object<'data> {
    data: Bytes<'data>,
    header: &'data FileHeader32,
    sections: &'data [SectionHeader32],
}

impl<'data> Object<'data> {
    /// Parse and validate the raw input file data.
    pub fn parse(data: &'data [u8]) -> Result<Self> {
        let data = Bytes(data);
        let header = data
            .read_at::<FileHeader32>(0)
            .read_error("file too small for an ELF header")?;
        if header.e_ident.magic != elf::ELFMAG {
            return Err(Error::parse("not an ELF file"));
        }
        if header.e_ident.class != elf::ELFCLASS32 {
            return Err(Error::parse("not a 32-bit ELF file"));
        }
        if header.e_ident.data != elf::ELFDATA2LSB {
            return Err(Error::parse("not a little-endian ELF file"));
        }
        if header.e_type.get() != elf::ET_REL {
            return Err(Error::parse("not a relocatable object"));
        }
        if header.e_machine.get() != elf::EM_386 {
            return Err(Error::parse("not an i386 object"));
        }
        if header.e_shstrndx.get() >= header.e_shnum.get() {
            return Err(Error::parse("section name table index out of range"));
        }
        let sections = data
            .read_slice_at::<SectionHeader32>(
                header.e_shoff.get() as usize,
                header.e_shnum.get() as usize,
            )
            .read_error("section header table out of range")?;
        for section in sections {
            data.read_bytes_at(
                section.sh_offset.get() as usize,
                section.sh_size.get() as usize,
            )
            .read_error("section data out of range")?;
        }
        Ok(Object {
            data,
            header,
            sections,
        })
    }

    /// The input file header.
    pub fn header(&self) -> &'data FileHeader32 {
        self.header
    }

    /// The input section header table.
    pub fn sections(&self) -> &'data [SectionHeader32] {
        self.sections
    }

    /// Get a section header by index.
    pub fn section(&self, index: usize) -> Result<&'data SectionHeader32> {
        self.sections
            .get(index)
            .ok_or_else(|| Error::convert(format!("section index {} out of range", index)))
    }

    /// The raw data of a section.
    pub fn section_data(&self, section: &SectionHeader32) -> Result<&'data [u8]> {
        self.data
            .read_bytes_at(
                section.sh_offset.get() as usize,
                section.sh_size.get() as usize,
            )
            .read_error("section data out of range")
            .map(|bytes| bytes.0)
    }

    /// The symbols of a `SHT_SYMTAB` section.
    ///
    /// A trailing partial entry is ignored.
    pub fn symbols(&self, section: &SectionHeader32) -> Result<&'data [Sym32]> {
        let count = section.sh_size.get() as usize / mem::size_of::<Sym32>();
        Bytes(self.section_data(section)?)
            .read_slice(count)
            .read_error("symbol table out of range")
    }

    /// The relocations of a `SHT_REL` section.
    ///
    /// A trailing partial entry is ignored.
    pub fn relocations(&self, section: &SectionHeader32) -> Result<&'data [Rel32]> {
        let count = section.sh_size.get() as usize / mem::size_of::<Rel32>();
        Bytes(self.section_data(section)?)
            .read_slice(count)
            .read_error("relocation table out of range")
    }

    /// The string table held by a `SHT_STRTAB` section.
    pub fn strings(&self, section: &SectionHeader32) -> Result<StringTable<'data>> {
        Ok(StringTable {
            data: Bytes(self.section_data(section)?),
        })
    }
}

/// A string table section's data.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct StringTable<'data> {
    data: Bytes<'data>,
}

impl<'data> StringTable<'data> {
    /// Get the null terminated string at the given offset.
    pub fn get(&self, offset: u32) -> Result<&'data [u8]> {
        self.data
            .read_string_at(offset as usize)
            .map_err(|()| Error::convert(format!("symbol name offset {} out of range", offset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pod::bytes_of;

    fn empty_object() -> FileHeader32 {
        FileHeader32 {
            e_ident: elf::Ident {
                magic: elf::ELFMAG,
                class: elf::ELFCLASS32,
                data: elf::ELFDATA2LSB,
                version: elf::EV_CURRENT,
                ..Default::default()
            },
            e_type: elf::ET_REL.into(),
            e_machine: elf::EM_386.into(),
            e_version: 1.into(),
            e_shoff: 52.into(),
            e_ehsize: 52.into(),
            e_shentsize: 40.into(),
            e_shnum: 1.into(),
            ..Default::default()
        }
    }

    fn object_bytes(header: &FileHeader32) -> Vec<u8> {
        let mut data = bytes_of(header).to_vec();
        data.extend_from_slice(bytes_of(&SectionHeader32::default()));
        data
    }

    #[test]
    fn accepts_minimal() {
        let data = object_bytes(&empty_object());
        let object = Object::parse(&data).unwrap();
        assert_eq!(object.sections().len(), 1);
        assert_eq!(object.header().e_machine.get(), elf::EM_386);
    }

    #[test]
    fn rejects_bad_headers() {
        assert_eq!(Object::parse(&[]).unwrap_err().kind(), ErrorKind::Parse);

        let mut header = empty_object();
        header.e_ident.magic = *b"\x7fBAD";
        assert!(Object::parse(&object_bytes(&header)).is_err());

        let mut header = empty_object();
        header.e_ident.class = elf::ELFCLASS64;
        assert!(Object::parse(&object_bytes(&header)).is_err());

        let mut header = empty_object();
        header.e_machine.set(elf::EM_X86_64);
        assert!(Object::parse(&object_bytes(&header)).is_err());

        let mut header = empty_object();
        header.e_shstrndx.set(1);
        assert!(Object::parse(&object_bytes(&header)).is_err());

        // Section header table truncated.
        let mut header = empty_object();
        header.e_shnum.set(2);
        assert!(Object::parse(&object_bytes(&header)).is_err());
    }

    #[test]
    fn rejects_section_data_out_of_range() {
        let header = empty_object();
        let mut data = bytes_of(&header).to_vec();
        let section = SectionHeader32 {
            sh_type: elf::SHT_PROGBITS.into(),
            sh_offset: 92.into(),
            sh_size: 100.into(),
            ..Default::default()
        };
        data.extend_from_slice(bytes_of(&section));
        assert_eq!(Object::parse(&data).unwrap_err().kind(), ErrorKind::Parse);
    }
}
