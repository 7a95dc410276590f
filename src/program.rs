// The compiled program: an immutable bundle of byte-stream code, the
// decoded instruction list the VM actually executes, the constant
// pool, the function and struct-layout tables, and a sparse map from
// instruction index to source span. Assembly is deterministic: the
// same input tree always produces byte-identical code.

use std::collections::HashMap;

use crate::constant::{self, Constant};
use crate::error::ErrorKind;
use crate::ids::{FieldId, FunctionId, TypeId};
use crate::opcode::{self, Instruction};
use crate::span::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionMeta {
    pub id: FunctionId,
    pub name: String,
    pub entry_instruction_index: usize,
    pub arity: usize,
    pub local_count: usize,
    pub is_entry: bool,
}

// Kept alongside the metas for diagnostics and preview listings.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionSignature {
    pub id: FunctionId,
    pub name: String,
    pub params: Vec<String>,
}

impl FunctionSignature {
    pub fn render(&self) -> String {
        format!("{}({})", self.name, self.params.join(", "))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDef {
    pub field_id: FieldId,
    pub name: String,
    pub type_hint: Option<String>,
}

// Field order is declaration order and fixes the positional
// construction order.
#[derive(Clone, Debug, PartialEq)]
pub struct StructLayout {
    pub type_id: TypeId,
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl StructLayout {
    // Resolves a wildcard field id ("*.<name>") against this layout,
    // yielding the qualified id the instance actually carries.
    pub fn resolve_wildcard(&self, wildcard: FieldId) -> Option<FieldId> {
        self.fields
            .iter()
            .find(|field| FieldId::wildcard(&field.name) == wildcard)
            .map(|field| field.field_id)
    }

    pub fn field_named(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Clone, Debug)]
pub struct Program {
    pub code: Vec<u8>,
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub functions: Vec<FunctionMeta>,
    pub signatures: Vec<FunctionSignature>,
    pub struct_layouts: Vec<StructLayout>,
    pub spans: HashMap<usize, Span>,
}

impl Program {
    pub fn new(
        instructions: Vec<Instruction>,
        constants: Vec<Constant>,
        functions: Vec<FunctionMeta>,
        signatures: Vec<FunctionSignature>,
        struct_layouts: Vec<StructLayout>,
        spans: HashMap<usize, Span>,
    ) -> Program {
        let code = opcode::encode_stream(&instructions);
        Program { code, instructions, constants, functions, signatures, struct_layouts, spans }
    }

    // Safely fetch the instruction at the given index. One past the
    // end is simply the end of the program, not an error.
    pub fn fetch(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    pub fn constant(&self, index: usize) -> Result<&Constant, ErrorKind> {
        constant::lookup(&self.constants, index)
    }

    pub fn entry_function(&self) -> Option<&FunctionMeta> {
        self.functions
            .iter()
            .find(|meta| meta.is_entry)
            .or_else(|| self.functions.first())
    }

    pub fn function(&self, id: FunctionId) -> Result<&FunctionMeta, ErrorKind> {
        self.functions
            .iter()
            .find(|meta| meta.id == id)
            .ok_or(ErrorKind::UnknownFunction(id))
    }

    pub fn layout(&self, type_id: TypeId) -> Option<&StructLayout> {
        self.struct_layouts.iter().find(|layout| layout.type_id == type_id)
    }

    pub fn span_of(&self, instruction_index: usize) -> Option<Span> {
        self.spans.get(&instruction_index).copied()
    }

    // Re-decodes the byte stream; used to check that the serialized
    // form and the in-memory list agree.
    pub fn decode_code(&self) -> Result<Vec<Instruction>, ErrorKind> {
        opcode::decode_stream(&self.code)
    }
}
