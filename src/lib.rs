//! Convert i386 relocatable objects for linking into x86-64 programs.
//!
//! `objthunk` rewrites a 32-bit `ET_REL` ELF object into a 64-bit one. For
//! every function named in a user-supplied list it generates a machine-code
//! thunk that switches the CPU between 32-bit protected mode and 64-bit long
//! mode around the call and adapts the calling conventions: 64-bit code can
//! call the object's 32-bit functions through their (repointed) global
//! symbols, and the 32-bit code's calls to listed external functions are
//! routed through thunks to their 64-bit definitions.
//!
//! The output is a relocatable object for a linker to consume; nothing is
//! resolved or relinked here. At runtime the 32-bit code must be mapped in
//! the low 4GiB, with a stack to match.
//!
//! # Example
//! ```no_run
//! use objthunk::{Converter, FunctionList};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let list = FunctionList::parse(b"shuffle void ptr int")?;
//!     let input = std::fs::read("shuf.o")?;
//!     let mut converter = Converter::read(&input, &list)?;
//!     converter.convert()?;
//!     let output = std::fs::File::create("shuf64.o")?;
//!     converter.write(output)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod error;
pub use error::{Error, ErrorKind, Result};

pub mod elf;
pub mod endian;

mod pod;
pub use pod::{bytes_of, bytes_of_slice, from_bytes, slice_from_bytes, Bytes, Pod};

mod read;

mod flist;
pub use flist::{CType, FunctionList, Signature, MAX_ARGS, MAX_FUNCTIONS};

mod stub;

mod convert;
pub use convert::{convert, Converter};
