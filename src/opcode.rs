// The instruction set and its wire form. An instruction is a byte
// tag followed by an unsigned-varint operand count and that many
// ZigZag-varint operands, so decoders never need per-opcode operand
// tables to stay in sync with the stream. Jump operands are indices
// into the decoded instruction list, not byte offsets.

use std::fmt;

use crate::codec;
use crate::error::ErrorKind;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    Halt = 0x01,
    PushConst = 0x02,
    Pop = 0x03,
    Dup = 0x04,
    LoadLocal = 0x05,
    StoreLocal = 0x06,
    Jump = 0x07,
    JumpIfFalse = 0x08,
    JumpIfTrue = 0x09,
    ReturnValue = 0x0a,
    CallUser = 0x0b,
    CallBridge = 0x0c,
    CallInit = 0x0d,
    MakeStruct = 0x0e,
    GetField = 0x0f,
    SetField = 0x10,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Result<Opcode, ErrorKind> {
        use Opcode::*;
        Ok(match byte {
            0x00 => Nop,
            0x01 => Halt,
            0x02 => PushConst,
            0x03 => Pop,
            0x04 => Dup,
            0x05 => LoadLocal,
            0x06 => StoreLocal,
            0x07 => Jump,
            0x08 => JumpIfFalse,
            0x09 => JumpIfTrue,
            0x0a => ReturnValue,
            0x0b => CallUser,
            0x0c => CallBridge,
            0x0d => CallInit,
            0x0e => MakeStruct,
            0x0f => GetField,
            0x10 => SetField,
            other => return Err(ErrorKind::InvalidOpcode(other)),
        })
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "nop",
            Halt => "halt",
            PushConst => "push_const",
            Pop => "pop",
            Dup => "dup",
            LoadLocal => "load_local",
            StoreLocal => "store_local",
            Jump => "jump",
            JumpIfFalse => "jump_if_false",
            JumpIfTrue => "jump_if_true",
            ReturnValue => "return_value",
            CallUser => "call_user",
            CallBridge => "call_bridge",
            CallInit => "call_init",
            MakeStruct => "make_struct",
            GetField => "get_field",
            SetField => "set_field",
        }
    }
}

// The decoded in-memory form the VM executes.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<i64>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<i64>) -> Instruction {
        Instruction { opcode, operands }
    }

    pub fn nullary(opcode: Opcode) -> Instruction {
        Instruction { opcode, operands: Vec::new() }
    }

    pub fn operand(&self, index: usize) -> Result<i64, ErrorKind> {
        self.operands
            .get(index)
            .copied()
            .ok_or(ErrorKind::MissingOperand(index))
    }

    // Operand accessor for indices that must be small non-negative
    // numbers (locals, constants, jump targets, arities).
    pub fn operand_index(&self, index: usize) -> Result<usize, ErrorKind> {
        let raw = self.operand(index)?;
        usize::try_from(raw).map_err(|_| ErrorKind::MissingOperand(index))
    }

    pub fn operand_u32(&self, index: usize) -> Result<u32, ErrorKind> {
        let raw = self.operand(index)?;
        u32::try_from(raw).map_err(|_| ErrorKind::MissingOperand(index))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.opcode.byte());
        codec::encode_unsigned(self.operands.len() as u64, out);
        for operand in &self.operands {
            codec::encode_signed(*operand, out);
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.opcode.name())?;
        for operand in &self.operands {
            write!(f, " {}", operand)?;
        }
        Ok(())
    }
}

pub fn encode_stream(instructions: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::new();
    for instruction in instructions {
        instruction.encode(&mut out);
    }
    out
}

pub fn decode_stream(bytes: &[u8]) -> Result<Vec<Instruction>, ErrorKind> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let opcode = Opcode::from_byte(bytes[offset])?;
        offset += 1;
        let count = codec::decode_unsigned(bytes, &mut offset)?;
        let mut operands = Vec::with_capacity(count as usize);
        for _ in 0..count {
            operands.push(codec::decode_signed(bytes, &mut offset)?);
        }
        instructions.push(Instruction { opcode, operands });
    }
    Ok(instructions)
}
