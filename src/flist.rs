//! The function list: which symbols receive thunks, and their signatures.

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// The maximum number of entries in a function list.
pub const MAX_FUNCTIONS: usize = 1023;

/// The maximum number of arguments in a signature.
pub const MAX_ARGS: usize = 6;

/// A C type token from the function list.
///
/// `Ptr` and `Ulong` are 4 bytes on both sides of the call boundary: the
/// 32-bit code supported by this crate runs in the low 4GiB of a 64-bit
/// address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CType {
    /// `void`. Only valid as a return type.
    Void,
    /// `int`: 4 bytes.
    Int,
    /// `unsigned int`: 4 bytes.
    Uint,
    /// `long`: 4 bytes on the 32-bit side, sign extended to 8.
    Long,
    /// `unsigned long`: 4 bytes on both sides.
    Ulong,
    /// `long long`: 8 bytes.
    LongLong,
    /// `unsigned long long`: 8 bytes.
    UlongLong,
    /// A pointer: 4 bytes on both sides.
    Ptr,
}

impl CType {
    fn from_token(token: &[u8]) -> Option<CType> {
        match token {
            b"void" => Some(CType::Void),
            b"int" => Some(CType::Int),
            b"uint" => Some(CType::Uint),
            b"long" => Some(CType::Long),
            b"ulong" => Some(CType::Ulong),
            b"longlong" => Some(CType::LongLong),
            b"ulonglong" => Some(CType::UlongLong),
            b"ptr" => Some(CType::Ptr),
            _ => None,
        }
    }

    /// True for the 8-byte types, which occupy a wide stack slot and need
    /// full-width register moves.
    #[inline]
    pub fn is_wide(self) -> bool {
        matches!(self, CType::LongLong | CType::UlongLong)
    }

    /// The width of this type's stack slot in the 32-bit calling convention.
    #[inline]
    pub fn slot_size(self) -> u32 {
        if self.is_wide() {
            8
        } else {
            4
        }
    }
}

/// A function signature: a return type and up to [`MAX_ARGS`] argument types.
#[derive(Debug, Clone)]
pub struct Signature {
    /// The return type; [`CType::Void`] for none.
    pub ret: CType,
    /// The argument types, in order.
    pub args: Vec<CType>,
}

/// The parsed function list, in file order.
#[derive(Debug, Default)]
pub struct FunctionList {
    entries: IndexMap<Vec<u8>, Signature>,
}

impl FunctionList {
    /// Parse the text form of a function list.
    ///
    /// One function per line: whitespace separated `name return_type
    /// [arg_type ...]` tokens. Lines without any token are ignored. `void`
    /// is only valid as the return type.
    pub fn parse(data: &[u8]) -> Result<FunctionList> {
        let mut entries = IndexMap::new();
        for (index, line) in data.split(|&byte| byte == b'\n').enumerate() {
            let mut tokens = line
                .split(u8::is_ascii_whitespace)
                .filter(|token| !token.is_empty());
            let Some(name) = tokens.next() else {
                continue;
            };
            if entries.len() >= MAX_FUNCTIONS {
                return Err(Error::list(format!(
                    "line {}: more than {} functions",
                    index + 1,
                    MAX_FUNCTIONS
                )));
            }
            let signature = parse_signature(tokens)
                .map_err(|message| Error::list(format!("line {}: {}", index + 1, message)))?;
            // The first entry wins for duplicate names.
            entries.entry(name.to_vec()).or_insert(signature);
        }
        Ok(FunctionList { entries })
    }

    /// Look up a signature by exact name.
    pub fn get(&self, name: &[u8]) -> Option<&Signature> {
        self.entries.get(name)
    }

    /// The number of listed functions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_signature<'data>(
    mut tokens: impl Iterator<Item = &'data [u8]>,
) -> std::result::Result<Signature, String> {
    let Some(token) = tokens.next() else {
        return Err("expected a return type".into());
    };
    let Some(ret) = CType::from_token(token) else {
        return Err(format!(
            "unknown type `{}`",
            String::from_utf8_lossy(token)
        ));
    };
    let mut args = Vec::new();
    for token in tokens {
        let arg = match CType::from_token(token) {
            Some(CType::Void) | None => {
                return Err(format!(
                    "invalid argument type `{}`",
                    String::from_utf8_lossy(token)
                ));
            }
            Some(arg) => arg,
        };
        if args.len() >= MAX_ARGS {
            return Err(format!("more than {} arguments", MAX_ARGS));
        }
        args.push(arg);
    }
    Ok(Signature { ret, args })
}
