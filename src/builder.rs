// Emits instructions into a block, with forward labels for jumps.
// Jump targets are instruction indices local to the block; the
// compiler offsets them when blocks are merged into one program.
// Labels may be referenced before they are marked; finish() patches
// every pending reference and rejects a label nobody marked.

use crate::error::CompileError;
use crate::opcode::{Instruction, Opcode};
use crate::span::Span;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Label(usize);

// A compiled block plus the span recorded for each instruction,
// kept parallel to the instruction list.
#[derive(Clone, Debug, Default)]
pub struct Block {
    pub instructions: Vec<Instruction>,
    pub spans: Vec<Option<Span>>,
}

#[derive(Default)]
pub struct InstructionBuilder {
    instructions: Vec<Instruction>,
    spans: Vec<Option<Span>>,
    // Index the label was marked at, once mark() runs.
    marks: Vec<Option<usize>>,
    // (instruction index, label) pairs awaiting resolution.
    fixups: Vec<(usize, Label)>,
}

impl InstructionBuilder {
    pub fn new() -> InstructionBuilder {
        InstructionBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn emit(&mut self, opcode: Opcode, operands: Vec<i64>, span: Option<Span>) -> usize {
        let index = self.instructions.len();
        self.instructions.push(Instruction::new(opcode, operands));
        self.spans.push(span);
        index
    }

    pub fn create_label(&mut self) -> Label {
        let label = Label(self.marks.len());
        self.marks.push(None);
        label
    }

    // Marks the label at the position the *next* instruction will
    // occupy.
    pub fn mark(&mut self, label: Label) {
        self.marks[label.0] = Some(self.instructions.len());
    }

    pub fn emit_jump(&mut self, label: Label, span: Option<Span>) {
        self.emit_branch(Opcode::Jump, label, span);
    }

    pub fn emit_jump_if_false(&mut self, label: Label, span: Option<Span>) {
        self.emit_branch(Opcode::JumpIfFalse, label, span);
    }

    pub fn emit_jump_if_true(&mut self, label: Label, span: Option<Span>) {
        self.emit_branch(Opcode::JumpIfTrue, label, span);
    }

    fn emit_branch(&mut self, opcode: Opcode, label: Label, span: Option<Span>) {
        let index = self.emit(opcode, vec![0], span);
        self.fixups.push((index, label));
    }

    pub fn finish(mut self) -> Result<Block, CompileError> {
        for (index, label) in self.fixups {
            let target = self.marks[label.0].ok_or_else(|| {
                CompileError::new("jump to a label that was never marked", self.spans[index])
            })?;
            self.instructions[index].operands[0] = target as i64;
        }
        Ok(Block { instructions: self.instructions, spans: self.spans })
    }
}
