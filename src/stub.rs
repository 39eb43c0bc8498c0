//! Thunk code generation.
//!
//! The thunks are emitted as position-independent code, so the only
//! relocation either kind needs is for its near call to the real callee.
//! Both generators report the offset of that call's displacement; the
//! converter turns it into a `R_X86_64_PC32` relocation.
//!
//! A mode switch builds a far pointer in two stack slots (successor address,
//! then code segment selector) and jumps through it. The 32-bit code segment
//! is selector 0x23, the 64-bit one 0x33, and the 32-bit data segments are
//! reloaded with 0x2b; these are the selectors Linux uses for compatibility
//! mode processes.

use crate::flist::{CType, Signature};

// System V integer argument registers in order: rdi, rsi, rdx, rcx, r8, r9.
const ARG_REGS: [u8; 6] = [7, 6, 2, 1, 8, 9];

// Register number of the stack pointer.
const RSP: u8 = 4;

// REX prefix bits.
const REX: u8 = 0x40;
const REX_W: u8 = 0x08;
const REX_R: u8 = 0x04;

#[inline]
fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode & 3) << 6 | (reg & 7) << 3 | (rm & 7)
}

// Callee-saved registers of the 32-bit cdecl convention.
const PUSH_SAVED_32: &[u8] = &[
    0x57, // push edi
    0x56, // push esi
];

const POP_SAVED_RET_32: &[u8] = &[
    0x5e, // pop esi
    0x5f, // pop edi
    0xc3, // ret
];

// Callee-saved registers of the 64-bit System V convention.
const PUSH_SAVED_64: &[u8] = &[
    0x53, // push rbx
    0x55, // push rbp
    0x41, 0x54, // push r12
    0x41, 0x55, // push r13
    0x41, 0x56, // push r14
    0x41, 0x57, // push r15
];

const POP_SAVED_RET_64: &[u8] = &[
    0x41, 0x5f, // pop r15
    0x41, 0x5e, // pop r14
    0x41, 0x5d, // pop r13
    0x41, 0x5c, // pop r12
    0x5d, // pop rbp
    0x5b, // pop rbx
    0xc3, // ret
];

// Drop to 32-bit protected mode. The continuation address is the
// instruction after the far jump, materialized with a rip-relative lea.
// Clobbers ecx and the two stack slots at [rsp].
const SWITCH_TO_32: &[u8] = &[
    0x8d, 0x0d, 0x0e, 0x00, 0x00, 0x00, // lea ecx, [rip + 0x0e]
    0x89, 0x0c, 0x24, // mov [rsp], ecx
    0xc7, 0x44, 0x24, 0x04, 0x23, 0x00, 0x00, 0x00, // mov dword [rsp + 4], 0x23
    0xff, 0x2c, 0x24, // jmp far [rsp]
];

// Return to 64-bit long mode. There is no rip-relative lea in 32-bit mode,
// so the continuation address comes from a near call to the next
// instruction, adjusted past the rest of the block in place.
const SWITCH_TO_64: &[u8] = &[
    0xe8, 0x00, 0x00, 0x00, 0x00, // call <next instruction>
    0x83, 0x04, 0x24, 0x0f, // add dword [esp], 0x0f
    0xc7, 0x44, 0x24, 0x04, 0x33, 0x00, 0x00, 0x00, // mov dword [esp + 4], 0x33
    0xff, 0x2c, 0x24, // jmp far [esp]
];

// Discard the far-pointer slots and reload the 32-bit data segments.
const ENTER_CALL_32: &[u8] = &[
    0x83, 0xc4, 0x08, // add esp, 8
    0x6a, 0x2b, // push 0x2b
    0x1f, // pop ds
    0x6a, 0x2b, // push 0x2b
    0x07, // pop es
];

// Split a 64-bit return value into the edx:eax pair.
const SPLIT_RET: &[u8] = &[
    0x48, 0x89, 0xc2, // mov rdx, rax
    0x48, 0xc1, 0xea, 0x20, // shr rdx, 32
];

// Reassemble rax from the edx:eax pair.
const JOIN_RET: &[u8] = &[
    0x48, 0xc1, 0xe2, 0x20, // shl rdx, 32
    0x48, 0x09, 0xd0, // or rax, rdx
];

/// Move one argument between its System V register and a stack slot at
/// `offset` from the stack pointer.
///
/// ```text
/// 89 /r   mov r/m32, r32       (store)
/// 8b /r   mov r32, r/m32       (load)
/// 63 /r   movsxd r64, r/m32    (load, sign extend)
/// ```
fn mov_arg(code: &mut Vec<u8>, arg: CType, index: usize, offset: u8, load: bool) {
    let reg = ARG_REGS[index];
    let mut rex = REX;
    let mut opcode = 0x89;
    if arg.is_wide() {
        rex |= REX_W;
    }
    if reg & 8 != 0 {
        rex |= REX_R;
    }
    if load {
        if arg == CType::Long {
            rex |= REX_W;
            opcode = 0x63;
        } else {
            opcode = 0x8b;
        }
    }
    if rex != REX {
        code.push(rex);
    }
    code.extend_from_slice(&[opcode, modrm(1, reg, RSP), 0x24, offset]);
}

/// Store the arguments held in the System V registers into 32-bit cdecl
/// stack slots starting at `offset` from the stack pointer.
fn store_args(code: &mut Vec<u8>, signature: &Signature, mut offset: u8) {
    for (index, &arg) in signature.args.iter().enumerate() {
        mov_arg(code, arg, index, offset, false);
        offset += arg.slot_size() as u8;
    }
}

/// Load the arguments from 32-bit cdecl stack slots starting at `offset`
/// into the System V registers.
fn load_args(code: &mut Vec<u8>, signature: &Signature, mut offset: u8) {
    for (index, &arg) in signature.args.iter().enumerate() {
        mov_arg(code, arg, index, offset, true);
        offset += arg.slot_size() as u8;
    }
}

/// Emit a thunk that lets 64-bit code call a 32-bit function.
///
/// Appends to `code` (the thunk section in progress) and returns the offset
/// of the call displacement to relocate against the 32-bit function.
pub(crate) fn global_stub(code: &mut Vec<u8>, signature: &Signature) -> u32 {
    let mut args_size = signature
        .args
        .iter()
        .map(|arg| arg.slot_size() as u8)
        .sum::<u8>();
    // Round the arguments plus the return address up to the 16-byte stack
    // alignment the 64-bit caller guarantees.
    args_size += 8u8.wrapping_sub(args_size) & 0xf;

    code.extend_from_slice(PUSH_SAVED_64);
    // One extra wide slot below the arguments for the far pointer.
    code.extend_from_slice(&[0x83, 0xec, args_size + 8]); // sub esp, args_size + 8
    store_args(code, signature, 8);
    code.extend_from_slice(SWITCH_TO_32);
    code.extend_from_slice(ENTER_CALL_32);
    let patch = code.len() as u32 + 1;
    code.extend_from_slice(&[0xe8, 0x00, 0x00, 0x00, 0x00]); // call <function>
    if signature.ret != CType::Void {
        // eax must survive the clobber in the switch block.
        code.extend_from_slice(&[0x89, 0xc1]); // mov ecx, eax
    }
    code.extend_from_slice(SWITCH_TO_64);
    if signature.ret != CType::Void {
        code.extend_from_slice(&[0x89, 0xc8]); // mov eax, ecx
    }
    if signature.ret.is_wide() {
        code.extend_from_slice(JOIN_RET);
    } else if signature.ret == CType::Long {
        code.extend_from_slice(&[0x48, 0x63, 0xc0]); // movsxd rax, eax
    }
    // The switch back consumed the near call's return slot, hence +4.
    code.extend_from_slice(&[0x83, 0xc4, args_size + 4]); // add esp, args_size + 4
    code.extend_from_slice(POP_SAVED_RET_64);
    patch
}

/// Emit a thunk that lets 32-bit code call a 64-bit function.
///
/// Appends to `code` and returns the offset of the call displacement to
/// relocate against the 64-bit function.
pub(crate) fn extern_stub(code: &mut Vec<u8>, signature: &Signature) -> u32 {
    code.extend_from_slice(PUSH_SAVED_32);
    code.extend_from_slice(&[0x83, 0xec, 0x04]); // sub esp, 4
    code.extend_from_slice(SWITCH_TO_64);
    code.extend_from_slice(&[0x83, 0xc4, 0x04]); // add esp, 4
    load_args(code, signature, 16);
    let patch = code.len() as u32 + 1;
    code.extend_from_slice(&[0xe8, 0x00, 0x00, 0x00, 0x00]); // call <function>
    if signature.ret.is_wide() {
        code.extend_from_slice(SPLIT_RET);
    }
    code.extend_from_slice(&[0x83, 0xec, 0x04]); // sub esp, 4
    code.extend_from_slice(SWITCH_TO_32);
    code.extend_from_slice(&[0x83, 0xc4, 0x08]); // add esp, 8
    code.extend_from_slice(POP_SAVED_RET_32);
    patch
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALL: &[u8] = &[0xe8, 0x00, 0x00, 0x00, 0x00];

    fn signature(ret: CType, args: &[CType]) -> Signature {
        Signature {
            ret,
            args: args.to_vec(),
        }
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn global_no_args() {
        let mut code = Vec::new();
        let patch = global_stub(&mut code, &signature(CType::Void, &[]));

        let mut expect = Vec::new();
        expect.extend_from_slice(PUSH_SAVED_64);
        expect.extend_from_slice(&[0x83, 0xec, 16]);
        expect.extend_from_slice(SWITCH_TO_32);
        expect.extend_from_slice(ENTER_CALL_32);
        expect.extend_from_slice(CALL);
        expect.extend_from_slice(SWITCH_TO_64);
        expect.extend_from_slice(&[0x83, 0xc4, 12]);
        expect.extend_from_slice(POP_SAVED_RET_64);
        assert_eq!(code, expect);

        // The patch site is the displacement of the near call.
        assert_eq!(code[patch as usize - 1], 0xe8);
        assert_eq!(&code[patch as usize..patch as usize + 4], [0, 0, 0, 0]);
    }

    #[test]
    fn global_int_arg() {
        let mut code = Vec::new();
        let patch = global_stub(&mut code, &signature(CType::Int, &[CType::Int]));

        // mov [rsp + 8], edi
        assert!(contains(&code, &[0x89, 0x7c, 0x24, 0x08]));
        // eax is parked in ecx around the mode switch.
        assert!(contains(&code, &[0x89, 0xc1]));
        assert!(contains(&code, &[0x89, 0xc8]));
        // One int argument rounds up to an 8-byte block.
        assert!(contains(&code, &[0x83, 0xec, 16]));
        assert!(contains(&code, &[0x83, 0xc4, 12]));

        assert_eq!(code.len(), 85);
        assert_eq!(code[patch as usize - 1], 0xe8);
    }

    #[test]
    fn global_wide_return() {
        let mut code = Vec::new();
        global_stub(&mut code, &signature(CType::UlongLong, &[]));
        assert!(contains(&code, JOIN_RET));

        let mut code = Vec::new();
        global_stub(&mut code, &signature(CType::Long, &[]));
        // movsxd rax, eax
        assert!(contains(&code, &[0x48, 0x63, 0xc0]));
        assert!(!contains(&code, JOIN_RET));
    }

    #[test]
    fn global_six_args() {
        let sig = signature(
            CType::Void,
            &[
                CType::Int,
                CType::Int,
                CType::Int,
                CType::Int,
                CType::Int,
                CType::LongLong,
            ],
        );
        let mut code = Vec::new();
        global_stub(&mut code, &sig);

        // Slots at 8, 12, 16, 20, 24, and a wide slot at 28.
        assert!(contains(&code, &[0x89, 0x7c, 0x24, 8])); // mov [rsp + 8], edi
        assert!(contains(&code, &[0x89, 0x74, 0x24, 12])); // mov [rsp + 12], esi
        assert!(contains(&code, &[0x44, 0x89, 0x44, 0x24, 24])); // mov [rsp + 24], r8d
        assert!(contains(&code, &[0x4c, 0x89, 0x4c, 0x24, 28])); // mov [rsp + 28], r9

        // 28 bytes of arguments round up to 40.
        assert!(contains(&code, &[0x83, 0xec, 48]));
        assert!(contains(&code, &[0x83, 0xc4, 44]));

        // Block lengths: saved registers, stack reserve, four plain moves,
        // two REX-prefixed moves, the switches, and the call.
        let expect = PUSH_SAVED_64.len()
            + 3
            + 4 * 4
            + 2 * 5
            + SWITCH_TO_32.len()
            + ENTER_CALL_32.len()
            + CALL.len()
            + SWITCH_TO_64.len()
            + 3
            + POP_SAVED_RET_64.len();
        assert_eq!(code.len(), expect);
    }

    #[test]
    fn extern_loads() {
        let mut code = Vec::new();
        let patch = extern_stub(&mut code, &signature(CType::Long, &[CType::LongLong]));

        let mut expect = Vec::new();
        expect.extend_from_slice(PUSH_SAVED_32);
        expect.extend_from_slice(&[0x83, 0xec, 0x04]);
        expect.extend_from_slice(SWITCH_TO_64);
        expect.extend_from_slice(&[0x83, 0xc4, 0x04]);
        expect.extend_from_slice(&[0x48, 0x8b, 0x7c, 0x24, 16]); // mov rdi, [rsp + 16]
        expect.extend_from_slice(CALL);
        expect.extend_from_slice(&[0x83, 0xec, 0x04]);
        expect.extend_from_slice(SWITCH_TO_32);
        expect.extend_from_slice(&[0x83, 0xc4, 0x08]);
        expect.extend_from_slice(POP_SAVED_RET_32);
        assert_eq!(code, expect);

        assert_eq!(code[patch as usize - 1], 0xe8);
        assert!(code.ends_with(POP_SAVED_RET_32));
    }

    #[test]
    fn extern_sign_extends_long_arg() {
        let mut code = Vec::new();
        extern_stub(&mut code, &signature(CType::Void, &[CType::Long, CType::Int]));

        // movsxd rdi, [rsp + 16] then mov esi, [rsp + 20]
        assert!(contains(&code, &[0x48, 0x63, 0x7c, 0x24, 16]));
        assert!(contains(&code, &[0x8b, 0x74, 0x24, 20]));
    }

    #[test]
    fn extern_wide_return() {
        let mut code = Vec::new();
        extern_stub(&mut code, &signature(CType::UlongLong, &[]));
        assert!(contains(&code, SPLIT_RET));

        let mut code = Vec::new();
        extern_stub(&mut code, &signature(CType::Long, &[]));
        assert!(!contains(&code, SPLIT_RET));
    }

    #[test]
    fn patch_offsets_accumulate() {
        let mut code = Vec::new();
        let first = global_stub(&mut code, &signature(CType::Void, &[]));
        let start = code.len();
        let second = extern_stub(&mut code, &signature(CType::Void, &[]));
        assert!((second as usize) > start);
        assert_eq!(code[first as usize - 1], 0xe8);
        assert_eq!(code[second as usize - 1], 0xe8);
    }
}
