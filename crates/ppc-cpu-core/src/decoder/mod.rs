//! Instruction decoder, disassembler and a small text assembler.

mod asm;
mod disasm;
mod opcodes;

use rustc_hash::FxHashMap;
use thiserror::Error;

pub use opcodes::{Encoding, Form, OpFlags, Opcode, OpcodeInfo};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown instruction word 0x{raw:08x}")]
    Unknown { raw: u32 },
    #[error("unknown mnemonic `{0}`")]
    UnknownMnemonic(String),
    #[error("`{mnemonic}`: expected {expected} operands, got {got}")]
    OperandCount {
        mnemonic: String,
        expected: usize,
        got: usize,
    },
    #[error("`{mnemonic}`: bad operand `{operand}`")]
    BadOperand { mnemonic: String, operand: String },
    #[error("`{mnemonic}`: operand {value:#x} out of range")]
    OutOfRange { mnemonic: String, value: i64 },
}

/// Either form accepted by [`Decoder::disassemble`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionSource<'a> {
    Word(u32),
    Text(&'a str),
}

impl From<u32> for InstructionSource<'_> {
    fn from(raw: u32) -> Self {
        InstructionSource::Word(raw)
    }
}

impl<'a> From<&'a str> for InstructionSource<'a> {
    fn from(text: &'a str) -> Self {
        InstructionSource::Text(text)
    }
}

/// One decoded instruction: the opcode kind plus the raw word its operand fields are
/// read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecodedInstruction {
    pub opcode: Opcode,
    pub raw: u32,
}

impl DecodedInstruction {
    #[inline]
    pub fn opcode_id(&self) -> u16 {
        self.opcode.id()
    }

    #[inline]
    pub fn info(&self) -> &'static OpcodeInfo {
        self.opcode.info()
    }

    #[inline]
    pub fn is_control_transfer(&self) -> bool {
        self.info().flags.contains(OpFlags::BRANCH)
    }

    /// Control transfer, or an instruction that changes the translation context or
    /// the instruction stream.
    #[inline]
    pub fn ends_block(&self) -> bool {
        self.info()
            .flags
            .intersects(OpFlags::BRANCH | OpFlags::CONTEXT)
    }

    #[inline]
    pub fn rt(&self) -> u32 {
        (self.raw >> 21) & 31
    }

    #[inline]
    pub fn rs(&self) -> u32 {
        self.rt()
    }

    #[inline]
    pub fn ra(&self) -> u32 {
        (self.raw >> 16) & 31
    }

    #[inline]
    pub fn rb(&self) -> u32 {
        (self.raw >> 11) & 31
    }

    #[inline]
    pub fn simm(&self) -> i32 {
        self.raw as u16 as i16 as i32
    }

    #[inline]
    pub fn uimm(&self) -> u32 {
        self.raw & 0xffff
    }

    #[inline]
    pub fn rc(&self) -> bool {
        self.raw & 1 != 0
    }

    #[inline]
    pub fn oe(&self) -> bool {
        matches!(self.info().encoding, Encoding::Op31Xo(_))
            && self.info().flags.contains(OpFlags::OE)
            && self.raw & 0x400 != 0
    }

    #[inline]
    pub fn lk(&self) -> bool {
        self.raw & 1 != 0
    }

    #[inline]
    pub fn aa(&self) -> bool {
        self.raw & 2 != 0
    }

    /// I-form displacement, sign extended.
    #[inline]
    pub fn li(&self) -> i32 {
        ((self.raw & 0x03ff_fffc) << 6) as i32 >> 6
    }

    /// B-form displacement, sign extended.
    #[inline]
    pub fn bd(&self) -> i32 {
        (self.raw & 0xfffc) as u16 as i16 as i32
    }

    #[inline]
    pub fn bo(&self) -> u32 {
        self.rt()
    }

    #[inline]
    pub fn bi(&self) -> u32 {
        self.ra()
    }

    #[inline]
    pub fn sh(&self) -> u32 {
        self.rb()
    }

    #[inline]
    pub fn mb(&self) -> u32 {
        (self.raw >> 6) & 31
    }

    #[inline]
    pub fn me(&self) -> u32 {
        (self.raw >> 1) & 31
    }

    #[inline]
    pub fn crfd(&self) -> u32 {
        (self.raw >> 23) & 7
    }

    #[inline]
    pub fn crfs(&self) -> u32 {
        (self.raw >> 18) & 7
    }

    #[inline]
    pub fn to(&self) -> u32 {
        self.rt()
    }

    /// SPR number with its two 5-bit halves swapped back.
    #[inline]
    pub fn spr(&self) -> u16 {
        (((self.raw >> 16) & 31) | (((self.raw >> 11) & 31) << 5)) as u16
    }

    #[inline]
    pub fn crm(&self) -> u32 {
        (self.raw >> 12) & 0xff
    }

    /// `wrteei` E bit.
    #[inline]
    pub fn e(&self) -> bool {
        self.raw & 0x8000 != 0
    }

    /// Static target of a direct branch at `pc`.
    pub fn branch_target(&self, pc: u64) -> Option<u64> {
        let disp = match self.opcode {
            Opcode::B => self.li(),
            Opcode::Bc => self.bd(),
            _ => return None,
        };
        let base = if self.aa() { 0 } else { pc };
        Some(base.wrapping_add(disp as i64 as u64) & 0xffff_ffff)
    }
}

/// Binary decode and text assembly into [`DecodedInstruction`]s.
pub trait Decoder: Send + Sync {
    fn decode(&self, raw: u32, pc: u64) -> Result<DecodedInstruction, DecodeError>;

    fn assemble(&self, text: &str, pc: u64) -> Result<DecodedInstruction, DecodeError>;

    fn disassemble(
        &self,
        source: InstructionSource<'_>,
        pc: u64,
    ) -> Result<DecodedInstruction, DecodeError> {
        match source {
            InstructionSource::Word(raw) => self.decode(raw, pc),
            InstructionSource::Text(text) => self.assemble(text, pc),
        }
    }
}

/// Table-driven decoder for the e500 integer instruction set.
#[derive(Debug)]
pub struct PpcDecoder {
    primary: [Option<Opcode>; 64],
    op19: FxHashMap<u32, Opcode>,
    op31: FxHashMap<u32, Opcode>,
    op31_xo: FxHashMap<u32, Opcode>,
}

impl Default for PpcDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PpcDecoder {
    pub fn new() -> Self {
        let mut decoder = Self {
            primary: [None; 64],
            op19: FxHashMap::default(),
            op31: FxHashMap::default(),
            op31_xo: FxHashMap::default(),
        };
        for info in opcodes::OPCODES {
            match info.encoding {
                Encoding::Primary(0) => {}
                Encoding::Primary(p) => decoder.primary[p as usize] = Some(info.opcode),
                Encoding::Op19(xo) => {
                    decoder.op19.insert(xo, info.opcode);
                }
                Encoding::Op31(xo) => {
                    decoder.op31.insert(xo, info.opcode);
                }
                Encoding::Op31Xo(xo) => {
                    decoder.op31_xo.insert(xo, info.opcode);
                }
            }
        }
        decoder
    }

    fn lookup(&self, raw: u32) -> Option<Opcode> {
        if raw == 0 {
            return Some(Opcode::Illegal);
        }
        match raw >> 26 {
            19 => self.op19.get(&((raw >> 1) & 0x3ff)).copied(),
            31 => self
                .op31
                .get(&((raw >> 1) & 0x3ff))
                .or_else(|| self.op31_xo.get(&((raw >> 1) & 0x1ff)))
                .copied(),
            p => self.primary[p as usize],
        }
    }
}

impl Decoder for PpcDecoder {
    fn decode(&self, raw: u32, _pc: u64) -> Result<DecodedInstruction, DecodeError> {
        self.lookup(raw)
            .map(|opcode| DecodedInstruction { opcode, raw })
            .ok_or(DecodeError::Unknown { raw })
    }

    fn assemble(&self, text: &str, pc: u64) -> Result<DecodedInstruction, DecodeError> {
        let raw = asm::assemble(text, pc)?;
        self.decode(raw, pc)
    }
}

#[cfg(test)]
mod tests;
