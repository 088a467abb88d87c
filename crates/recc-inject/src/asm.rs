//! A minimal x64 assembler for remote stubs.
//!
//! Code destined for another address space gets no relocating loader, so
//! the assembler takes the remote base address up front and resolves every
//! label to its final location there. Only the handful of instructions the
//! stub generator emits are implemented; everything is encoded by hand and
//! covered by encoding tests.

use thiserror::Error;

/// General-purpose 64-bit registers, numbered by their hardware encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
}

impl Reg {
    /// Low three bits of the encoding.
    fn low(self) -> u8 {
        self as u8 & 0x7
    }

    /// Whether the register needs a REX extension bit.
    fn extended(self) -> bool {
        self as u8 >= 8
    }
}

/// A position in the code stream, assigned on `bind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Code-generation failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AsmError {
    /// A label was referenced by an instruction but never bound.
    #[error("label {0} referenced but never bound")]
    UnboundLabel(usize),
}

/// Assembles position-dependent x64 code against a fixed base address.
pub struct Assembler {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    // Patch sites for rel32 fields; the displacement is relative to the
    // end of the four-byte field, which ends the instruction in every
    // form emitted here.
    fixups: Vec<(usize, Label)>,
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Current offset from the base.
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current offset.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len());
    }

    fn rex_w(&mut self, reg_ext: bool, rm_ext: bool) {
        self.code
            .push(0x48 | u8::from(reg_ext) << 2 | u8::from(rm_ext));
    }

    fn modrm(&mut self, mode: u8, reg: u8, rm: u8) {
        self.code.push(mode << 6 | reg << 3 | rm);
    }

    fn rel32_to(&mut self, label: Label) {
        self.fixups.push((self.code.len(), label));
        self.code.extend_from_slice(&[0; 4]);
    }

    /// `and rsp, imm8` (sign-extended).
    pub fn and_rsp(&mut self, imm: i8) {
        self.code.extend_from_slice(&[0x48, 0x83, 0xE4, imm as u8]);
    }

    /// `sub rsp, imm8`.
    pub fn sub_rsp(&mut self, imm: i8) {
        self.code.extend_from_slice(&[0x48, 0x83, 0xEC, imm as u8]);
    }

    /// `mov r64, imm64`.
    pub fn mov_imm(&mut self, dst: Reg, imm: u64) {
        self.rex_w(false, dst.extended());
        self.code.push(0xB8 | dst.low());
        self.code.extend_from_slice(&imm.to_le_bytes());
    }

    /// `mov r64, r64`.
    pub fn mov_reg(&mut self, dst: Reg, src: Reg) {
        self.rex_w(src.extended(), dst.extended());
        self.code.push(0x89);
        self.modrm(0b11, src.low(), dst.low());
    }

    /// `lea r64, [rip + label]`.
    pub fn lea_label(&mut self, dst: Reg, label: Label) {
        self.rex_w(dst.extended(), false);
        self.code.push(0x8D);
        self.modrm(0b00, dst.low(), 0b101);
        self.rel32_to(label);
    }

    /// `lea r64, [rsp + disp8]`.
    pub fn lea_rsp(&mut self, dst: Reg, disp: i8) {
        self.rex_w(dst.extended(), false);
        self.code.push(0x8D);
        self.modrm(0b01, dst.low(), 0b100);
        self.code.push(0x24); // SIB: base rsp, no index
        self.code.push(disp as u8);
    }

    /// `test r64, r64`.
    pub fn test_reg(&mut self, a: Reg, b: Reg) {
        self.rex_w(b.extended(), a.extended());
        self.code.push(0x85);
        self.modrm(0b11, b.low(), a.low());
    }

    /// `call r64`.
    pub fn call_reg(&mut self, r: Reg) {
        if r.extended() {
            self.code.push(0x41);
        }
        self.code.push(0xFF);
        self.modrm(0b11, 2, r.low());
    }

    /// `jmp r64`.
    pub fn jmp_reg(&mut self, r: Reg) {
        if r.extended() {
            self.code.push(0x41);
        }
        self.code.push(0xFF);
        self.modrm(0b11, 4, r.low());
    }

    /// `jz label` (rel32 form).
    pub fn jz(&mut self, label: Label) {
        self.code.extend_from_slice(&[0x0F, 0x84]);
        self.rel32_to(label);
    }

    /// `jnz label` (rel32 form).
    pub fn jnz(&mut self, label: Label) {
        self.code.extend_from_slice(&[0x0F, 0x85]);
        self.rel32_to(label);
    }

    /// `jmp label` (rel32 form).
    pub fn jmp(&mut self, label: Label) {
        self.code.push(0xE9);
        self.rel32_to(label);
    }

    /// `push r64`.
    pub fn push(&mut self, r: Reg) {
        if r.extended() {
            self.code.push(0x41);
        }
        self.code.push(0x50 | r.low());
    }

    /// `mov byte [rsp + disp8], imm8`.
    pub fn store_rsp_u8(&mut self, disp: i8, value: u8) {
        self.code.push(0xC6);
        self.modrm(0b01, 0, 0b100);
        self.code.push(0x24);
        self.code.push(disp as u8);
        self.code.push(value);
    }

    /// `mov [rsp + disp8], r64`.
    pub fn store_rsp(&mut self, disp: i8, src: Reg) {
        self.rex_w(src.extended(), false);
        self.code.push(0x89);
        self.modrm(0b01, src.low(), 0b100);
        self.code.push(0x24);
        self.code.push(disp as u8);
    }

    /// Raw bytes at the current position.
    pub fn embed(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// Little-endian UTF-16 units at the current position.
    pub fn embed_wide(&mut self, units: &[u16]) {
        for unit in units {
            self.code.extend_from_slice(&unit.to_le_bytes());
        }
    }

    /// Resolves all fixups and returns the finished code.
    pub fn finalize(mut self) -> Result<Vec<u8>, AsmError> {
        for (site, label) in &self.fixups {
            let target = self.labels[label.0].ok_or(AsmError::UnboundLabel(label.0))?;
            let rel = target as i64 - (*site as i64 + 4);
            self.code[*site..*site + 4].copy_from_slice(&(rel as i32).to_le_bytes());
        }
        Ok(self.code)
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(f: impl FnOnce(&mut Assembler)) -> Vec<u8> {
        let mut asm = Assembler::new();
        f(&mut asm);
        asm.finalize().expect("finalize")
    }

    #[test]
    fn stack_alignment_prologue() {
        assert_eq!(emit(|a| a.and_rsp(-16)), [0x48, 0x83, 0xE4, 0xF0]);
        assert_eq!(emit(|a| a.sub_rsp(32)), [0x48, 0x83, 0xEC, 0x20]);
    }

    #[test]
    fn mov_imm64_encodings() {
        assert_eq!(
            emit(|a| a.mov_imm(Reg::Rax, 0x1122_3344_5566_7788)),
            [0x48, 0xB8, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
        assert_eq!(
            emit(|a| a.mov_imm(Reg::R12, 1)),
            [0x49, 0xBC, 1, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn mov_reg_encodings() {
        // The stack trampoline hand-stores `mov rcx, rsi` as 48 89 F1;
        // the assembler must agree with it.
        assert_eq!(emit(|a| a.mov_reg(Reg::Rcx, Reg::Rsi)), [0x48, 0x89, 0xF1]);
        assert_eq!(emit(|a| a.mov_reg(Reg::R12, Reg::Rax)), [0x49, 0x89, 0xC4]);
        assert_eq!(emit(|a| a.mov_reg(Reg::Rdi, Reg::Rsp)), [0x48, 0x89, 0xE7]);
        assert_eq!(emit(|a| a.mov_reg(Reg::Rcx, Reg::R12)), [0x4C, 0x89, 0xE1]);
    }

    #[test]
    fn control_flow_encodings() {
        assert_eq!(emit(|a| a.test_reg(Reg::Rax, Reg::Rax)), [0x48, 0x85, 0xC0]);
        assert_eq!(emit(|a| a.call_reg(Reg::Rax)), [0xFF, 0xD0]);
        assert_eq!(emit(|a| a.jmp_reg(Reg::Rax)), [0xFF, 0xE0]);
        assert_eq!(emit(|a| a.push(Reg::Rdi)), [0x57]);
    }

    #[test]
    fn stack_stores() {
        assert_eq!(
            emit(|a| a.store_rsp_u8(3, 0x48)),
            [0xC6, 0x44, 0x24, 0x03, 0x48]
        );
        assert_eq!(
            emit(|a| a.store_rsp(5, Reg::Rax)),
            [0x48, 0x89, 0x44, 0x24, 0x05]
        );
        assert_eq!(
            emit(|a| a.lea_rsp(Reg::R9, 16)),
            [0x4C, 0x8D, 0x4C, 0x24, 0x10]
        );
    }

    #[test]
    fn forward_jump_resolves() {
        let mut asm = Assembler::new();
        let skip = asm.new_label();
        asm.jz(skip); // 6 bytes, field at 2..6
        asm.call_reg(Reg::Rax); // 2 bytes
        asm.bind(skip);
        let code = asm.finalize().expect("finalize");
        assert_eq!(&code[..2], &[0x0F, 0x84]);
        // Target 8, field ends at 6 -> rel32 = 2.
        assert_eq!(i32::from_le_bytes(code[2..6].try_into().unwrap()), 2);
    }

    #[test]
    fn rip_relative_lea_resolves_backward() {
        let mut asm = Assembler::new();
        let data = asm.new_label();
        asm.bind(data);
        asm.embed(&[0xAA, 0xBB]);
        asm.lea_label(Reg::Rdx, data);
        let code = asm.finalize().expect("finalize");
        assert_eq!(&code[2..5], &[0x48, 0x8D, 0x15]);
        // Field at 5..9 ends at 9; target 0 -> rel32 = -9.
        assert_eq!(i32::from_le_bytes(code[5..9].try_into().unwrap()), -9);
    }

    #[test]
    fn unbound_label_is_an_error() {
        let mut asm = Assembler::new();
        let nowhere = asm.new_label();
        asm.jmp(nowhere);
        assert_eq!(asm.finalize(), Err(AsmError::UnboundLabel(0)));
    }

    #[test]
    fn embed_wide_is_little_endian() {
        assert_eq!(emit(|a| a.embed_wide(&[0x0041, 0x1234])), [0x41, 0x00, 0x34, 0x12]);
    }
}
