// (C) 2020 Brandon Lewis
//
// A virtual machine for a sandboxed scripting system.
//
// This system is optimized for short-running programs that build a
// single value -- typically a view tree -- and stop.
//
// *Execution Model*
//
// A program is an immutable bundle of decoded instructions, a
// constant pool, and function/struct tables. The VM owns a value
// stack and a call stack of frames; each frame owns its locals. The
// only way out of the sandbox is call_bridge/call_init, which pass
// through the capability policy before dispatch.
//
// *Validity*
//
// All errors are non-recoverable: the loop unwinds, and the error is
// decorated with the failing instruction, its source span, and a
// stack trace assembled from the live frames.
//
// *Safety*
//
// Resource budgets (instruction count, wall clock, call depth, value
// stack depth) are the cancellation mechanism; a hostile or runaway
// program trips a typed resource error. Types are checked at
// runtime by the value operators and the field instructions.
//
// *Inline caches*
//
// Bridge and field sites record what they resolved to, keyed by
// instruction index. At this revision the caches are informative
// only: they are maintained and observable but never consulted to
// short-circuit dispatch.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::bridge::BridgeRuntime;
use crate::catalog::CapabilitySet;
use crate::error::{ErrorKind, RuntimeError, StackTraceFrame};
use crate::guard::{ExecutionLimits, ResourceGuard};
use crate::ids::{FieldId, FunctionId, SymbolId, TypeId};
use crate::opcode::{Instruction, Opcode};
use crate::program::Program;
use crate::value::{StructValue, Value};

// One activation record. return_pc is None only for the entry
// function, whose return clears the stack and halts.
#[derive(Clone, Debug)]
pub struct Frame {
    pub function_id: FunctionId,
    pub function_name: String,
    pub return_pc: Option<usize>,
    pub call_site_pc: Option<usize>,
    pub locals: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BridgeSiteCache {
    pub symbol: SymbolId,
    pub receiver_type: Option<&'static str>,
    pub hits: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldSiteCache {
    pub type_id: TypeId,
    pub field_ids: Vec<FieldId>,
    pub hits: u64,
}

// The entire VM state. An instance runs one program once and is then
// inspected or discarded.
pub struct VirtualMachine<'p> {
    program: &'p Program,
    bridge: BridgeRuntime,
    guard: ResourceGuard,
    pc: usize,
    halted: bool,
    value_stack: Vec<Value>,
    call_stack: Vec<Frame>,
    output: Vec<String>,
    bridge_caches: HashMap<usize, BridgeSiteCache>,
    field_caches: HashMap<usize, FieldSiteCache>,
}

impl<'p> VirtualMachine<'p> {
    pub fn new(
        program: &'p Program,
        capabilities: CapabilitySet,
        limits: ExecutionLimits,
    ) -> VirtualMachine<'p> {
        VirtualMachine::with_bridge(program, BridgeRuntime::new(capabilities), limits)
    }

    // For hosts that registered their own bridge routines.
    pub fn with_bridge(
        program: &'p Program,
        bridge: BridgeRuntime,
        limits: ExecutionLimits,
    ) -> VirtualMachine<'p> {
        VirtualMachine {
            program,
            bridge,
            guard: ResourceGuard::new(limits),
            pc: 0,
            halted: false,
            value_stack: Vec::new(),
            call_stack: Vec::new(),
            output: Vec::new(),
            bridge_caches: HashMap::new(),
            field_caches: HashMap::new(),
        }
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    pub fn bridge_caches(&self) -> &HashMap<usize, BridgeSiteCache> {
        &self.bridge_caches
    }

    pub fn field_caches(&self) -> &HashMap<usize, FieldSiteCache> {
        &self.field_caches
    }

    pub fn instructions_executed(&self) -> u64 {
        self.guard.executed()
    }

    pub fn value_stack_depth(&self) -> usize {
        self.value_stack.len()
    }

    // Run the program to completion or failure. The result is the
    // value the program returned, or none for a program that halted
    // without one.
    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        let entry = match self.program.entry_function() {
            Some(entry) => entry.clone(),
            None => return Ok(Value::Nil),
        };
        debug!(entry = %entry.name, "starting run");
        self.call_stack.push(Frame {
            function_id: entry.id,
            function_name: entry.name.clone(),
            return_pc: None,
            call_site_pc: None,
            locals: vec![Value::Nil; entry.local_count],
        });
        self.pc = entry.entry_instruction_index;

        while !self.halted && self.pc < self.program.instructions.len() {
            let at = self.pc;
            if let Err(kind) = self.guard.on_instruction() {
                return Err(self.decorate(kind, at));
            }
            self.pc = at + 1;
            let instruction = self.program.instructions[at].clone();
            trace!(pc = at, op = instruction.opcode.name(), depth = self.value_stack.len());
            if let Err(kind) = self.execute(instruction, at) {
                return Err(self.decorate(kind, at));
            }
        }

        let value = self.value_stack.last().cloned().unwrap_or(Value::Nil);
        debug!(
            executed = self.guard.executed(),
            output_lines = self.output.len(),
            "run complete"
        );
        Ok(value)
    }

    fn decorate(&self, kind: ErrorKind, at: usize) -> RuntimeError {
        let symbol = match &kind {
            ErrorKind::BridgeDenied(symbol) | ErrorKind::UnknownBridge(symbol) => Some(*symbol),
            _ => None,
        };
        RuntimeError {
            kind,
            symbol,
            instruction: Some(at),
            span: self.program.span_of(at),
            call_stack: self
                .call_stack
                .iter()
                .rev()
                .map(|frame| StackTraceFrame {
                    function_name: frame.function_name.clone(),
                    call_site: frame
                        .call_site_pc
                        .and_then(|site| self.program.span_of(site)),
                })
                .collect(),
        }
    }

    fn push(&mut self, value: Value) -> Result<(), ErrorKind> {
        self.value_stack.push(value);
        self.guard.ensure_value_stack_depth(self.value_stack.len())
    }

    fn pop(&mut self) -> Result<Value, ErrorKind> {
        self.value_stack.pop().ok_or(ErrorKind::StackUnderflow)
    }

    // Pops `count` values, restoring the order they were pushed in.
    fn pop_args(&mut self, count: usize) -> Result<Vec<Value>, ErrorKind> {
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(self.pop()?);
        }
        args.reverse();
        Ok(args)
    }

    fn frame_mut(&mut self) -> Result<&mut Frame, ErrorKind> {
        self.call_stack.last_mut().ok_or(ErrorKind::ReturnWithoutFrame)
    }

    fn execute(&mut self, instruction: Instruction, at: usize) -> Result<(), ErrorKind> {
        match instruction.opcode {
            Opcode::Nop => Ok(()),
            Opcode::Halt => {
                self.halted = true;
                Ok(())
            }
            Opcode::PushConst => {
                let index = instruction.operand_index(0)?;
                let value = self.program.constant(index)?.to_value();
                self.push(value)
            }
            Opcode::Pop => self.pop().map(|_| ()),
            Opcode::Dup => {
                let top = self.value_stack.last().cloned().ok_or(ErrorKind::StackUnderflow)?;
                self.push(top)
            }
            Opcode::LoadLocal => {
                let index = instruction.operand_index(0)?;
                let frame = self.frame_mut()?;
                let value = frame
                    .locals
                    .get(index)
                    .cloned()
                    .ok_or(ErrorKind::InvalidLocal(index))?;
                self.push(value)
            }
            Opcode::StoreLocal => {
                let index = instruction.operand_index(0)?;
                let value = self.pop()?;
                let frame = self.frame_mut()?;
                match frame.locals.get_mut(index) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(ErrorKind::InvalidLocal(index)),
                }
            }
            Opcode::Jump => {
                self.pc = instruction.operand_index(0)?;
                Ok(())
            }
            Opcode::JumpIfFalse => {
                let target = instruction.operand_index(0)?;
                if !self.pop()?.truthy() {
                    self.pc = target;
                }
                Ok(())
            }
            Opcode::JumpIfTrue => {
                let target = instruction.operand_index(0)?;
                if self.pop()?.truthy() {
                    self.pc = target;
                }
                Ok(())
            }
            Opcode::ReturnValue => {
                let result = self.pop()?;
                let frame = self.call_stack.pop().ok_or(ErrorKind::ReturnWithoutFrame)?;
                match frame.return_pc {
                    Some(return_pc) => {
                        self.pc = return_pc;
                        self.push(result)
                    }
                    None => {
                        // Entry return: the program's result is the
                        // only thing left on the stack.
                        self.value_stack.clear();
                        self.value_stack.push(result);
                        self.halted = true;
                        Ok(())
                    }
                }
            }
            Opcode::CallUser => {
                let function_id = FunctionId(instruction.operand_u32(0)?);
                let argc = instruction.operand_index(1)?;
                let target = self.program.function(function_id)?.clone();
                let args = self.pop_args(argc)?;
                let mut locals = vec![Value::Nil; target.local_count.max(argc)];
                for (slot, arg) in locals.iter_mut().zip(args) {
                    *slot = arg;
                }
                self.call_stack.push(Frame {
                    function_id,
                    function_name: target.name.clone(),
                    return_pc: Some(self.pc),
                    call_site_pc: Some(at),
                    locals,
                });
                self.pc = target.entry_instruction_index;
                self.guard.ensure_call_depth(self.call_stack.len())
            }
            Opcode::CallBridge | Opcode::CallInit => {
                let symbol = SymbolId(instruction.operand_u32(0)?);
                let argc = instruction.operand_index(1)?;
                let has_receiver = instruction.operand(2)? == 1;
                let args = self.pop_args(argc)?;
                let receiver = if has_receiver { Some(self.pop()?) } else { None };
                self.record_bridge_site(at, symbol, receiver.as_ref());
                let result = self.bridge.invoke(symbol, receiver, args, &mut self.output)?;
                self.push(result)
            }
            Opcode::MakeStruct => {
                let type_id = TypeId(instruction.operand_u32(0)?);
                let field_count = instruction.operand_index(1)?;
                if instruction.operands.len() != 2 + field_count {
                    return Err(ErrorKind::MalformedStruct);
                }
                let mut field_ids = Vec::with_capacity(field_count);
                for slot in 0..field_count {
                    field_ids.push(FieldId(instruction.operand_u32(2 + slot)?));
                }
                let values = self.pop_args(field_count)?;
                let fields = field_ids.iter().copied().zip(values).collect();
                self.record_field_site(at, type_id, field_ids);
                self.push(Value::Struct(StructValue::new(type_id, fields)))
            }
            Opcode::GetField => {
                let field_id = FieldId(instruction.operand_u32(0)?);
                let value = self.pop()?;
                let instance = value.expect_struct()?;
                let resolved = self.resolve_field(instance, field_id)?;
                let field_value = instance
                    .get(resolved)
                    .cloned()
                    .ok_or_else(|| self.missing_field(instance.type_id))?;
                self.record_field_site(at, instance.type_id, vec![resolved]);
                self.push(field_value)
            }
            Opcode::SetField => {
                let field_id = FieldId(instruction.operand_u32(0)?);
                let value = self.pop()?;
                let base = self.pop()?;
                let instance = base.expect_struct()?;
                let resolved = self.resolve_field(instance, field_id)?;
                let updated = instance.with_field(resolved, value);
                self.record_field_site(at, updated.type_id, vec![resolved]);
                self.push(Value::Struct(updated))
            }
        }
    }

    // Field operands may carry a wildcard id when the compiler could
    // not infer the receiver's type; resolve it against the layout.
    fn resolve_field(
        &self,
        instance: &StructValue,
        field_id: FieldId,
    ) -> Result<FieldId, ErrorKind> {
        if instance.get(field_id).is_some() {
            return Ok(field_id);
        }
        if let Some(layout) = self.program.layout(instance.type_id) {
            if layout.fields.iter().any(|field| field.field_id == field_id) {
                return Ok(field_id);
            }
            if let Some(resolved) = layout.resolve_wildcard(field_id) {
                return Ok(resolved);
            }
        }
        Err(self.missing_field(instance.type_id))
    }

    fn missing_field(&self, type_id: TypeId) -> ErrorKind {
        let type_name = match self.program.layout(type_id) {
            Some(layout) => layout.name.clone(),
            None => type_id.to_string(),
        };
        ErrorKind::MissingField { type_name }
    }

    fn record_bridge_site(&mut self, at: usize, symbol: SymbolId, receiver: Option<&Value>) {
        let receiver_type = receiver.map(Value::type_name);
        let entry = self
            .bridge_caches
            .entry(at)
            .or_insert_with(|| BridgeSiteCache { symbol, receiver_type, hits: 0 });
        if entry.symbol == symbol && entry.receiver_type == receiver_type {
            entry.hits += 1;
        } else {
            *entry = BridgeSiteCache { symbol, receiver_type, hits: 1 };
        }
    }

    fn record_field_site(&mut self, at: usize, type_id: TypeId, field_ids: Vec<FieldId>) {
        match self.field_caches.get_mut(&at) {
            Some(entry) if entry.type_id == type_id && entry.field_ids == field_ids => {
                entry.hits += 1;
            }
            Some(entry) => {
                *entry = FieldSiteCache { type_id, field_ids, hits: 1 };
            }
            None => {
                self.field_caches.insert(at, FieldSiteCache { type_id, field_ids, hits: 1 });
            }
        }
    }
}

// These tests are written against the *behavior* of the VM: any
// conforming implementation should pass them. Programs are built by
// hand so each opcode's contract is pinned independently of the
// compiler.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Capability;
    use crate::constant::Constant;
    use crate::program::{FieldDef, FunctionMeta, StructLayout};
    use enumflags2::BitFlags;
    use pretty_assertions::assert_eq;

    fn entry_meta(local_count: usize) -> FunctionMeta {
        FunctionMeta {
            id: FunctionId::of("<entry>"),
            name: "<entry>".to_string(),
            entry_instruction_index: 0,
            arity: 0,
            local_count,
            is_entry: true,
        }
    }

    fn program(code: Vec<Instruction>, constants: Vec<Constant>, local_count: usize) -> Program {
        Program::new(
            code,
            constants,
            vec![entry_meta(local_count)],
            vec![],
            vec![],
            HashMap::new(),
        )
    }

    fn run(program: &Program) -> Result<Value, RuntimeError> {
        let mut vm =
            VirtualMachine::new(program, BitFlags::all(), ExecutionLimits::default());
        vm.run()
    }

    fn op(opcode: Opcode) -> Instruction {
        Instruction::nullary(opcode)
    }

    fn with(opcode: Opcode, operands: Vec<i64>) -> Instruction {
        Instruction::new(opcode, operands)
    }

    #[test]
    fn test_push_and_implicit_result() {
        let p = program(
            vec![with(Opcode::PushConst, vec![0])],
            vec![Constant::Int(42)],
            0,
        );
        assert_eq!(run(&p).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_entry_return_clears_stack() {
        let p = program(
            vec![
                with(Opcode::PushConst, vec![0]),
                with(Opcode::PushConst, vec![0]),
                with(Opcode::PushConst, vec![1]),
                op(Opcode::ReturnValue),
            ],
            vec![Constant::Int(1), Constant::Int(9)],
            0,
        );
        let mut vm = VirtualMachine::new(&p, BitFlags::all(), ExecutionLimits::default());
        assert_eq!(vm.run().unwrap(), Value::Int(9));
        // Stack discipline: exactly the result remains.
        assert_eq!(vm.value_stack_depth(), 1);
    }

    #[test]
    fn test_locals_round_trip() {
        let p = program(
            vec![
                with(Opcode::PushConst, vec![0]),
                with(Opcode::StoreLocal, vec![0]),
                with(Opcode::LoadLocal, vec![0]),
                op(Opcode::ReturnValue),
            ],
            vec![Constant::Int(7)],
            1,
        );
        assert_eq!(run(&p).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_invalid_local_is_typed() {
        let p = program(vec![with(Opcode::LoadLocal, vec![3])], vec![], 1);
        let error = run(&p).unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidLocal(3));
        assert_eq!(error.instruction, Some(0));
    }

    #[test]
    fn test_underflow_is_typed() {
        let p = program(vec![op(Opcode::Pop)], vec![], 0);
        assert_eq!(run(&p).unwrap_err().kind, ErrorKind::StackUnderflow);
    }

    #[test]
    fn test_conditional_jumps_follow_truthiness() {
        // An empty string is falsy, so the branch takes the else arm.
        let p = program(
            vec![
                with(Opcode::PushConst, vec![0]),
                with(Opcode::JumpIfFalse, vec![4]),
                with(Opcode::PushConst, vec![1]),
                op(Opcode::ReturnValue),
                with(Opcode::PushConst, vec![2]),
                op(Opcode::ReturnValue),
            ],
            vec![Constant::str(""), Constant::Int(1), Constant::Int(2)],
            0,
        );
        assert_eq!(run(&p).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_halt_leaves_top_as_result() {
        let p = program(
            vec![
                with(Opcode::PushConst, vec![0]),
                op(Opcode::Halt),
                with(Opcode::PushConst, vec![0]),
            ],
            vec![Constant::Int(5)],
            0,
        );
        assert_eq!(run(&p).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_call_user_and_return() {
        let add_id = FunctionId::of("add");
        let code = vec![
            with(Opcode::PushConst, vec![0]),
            with(Opcode::PushConst, vec![1]),
            with(Opcode::CallUser, vec![i64::from(add_id.raw()), 2]),
            op(Opcode::ReturnValue),
            // add(a, b) at 4
            with(Opcode::LoadLocal, vec![0]),
            with(Opcode::LoadLocal, vec![1]),
            with(
                Opcode::CallBridge,
                vec![i64::from(SymbolId::operator("+").raw()), 2, 0],
            ),
            op(Opcode::ReturnValue),
        ];
        let p = Program::new(
            code,
            vec![Constant::Int(4), Constant::Int(9)],
            vec![
                entry_meta(0),
                FunctionMeta {
                    id: add_id,
                    name: "add".to_string(),
                    entry_instruction_index: 4,
                    arity: 2,
                    local_count: 2,
                    is_entry: false,
                },
            ],
            vec![],
            vec![],
            HashMap::new(),
        );
        assert_eq!(run(&p).unwrap(), Value::Int(13));
    }

    #[test]
    fn test_first_pushed_is_first_param() {
        let f_id = FunctionId::of("first");
        let code = vec![
            with(Opcode::PushConst, vec![0]),
            with(Opcode::PushConst, vec![1]),
            with(Opcode::CallUser, vec![i64::from(f_id.raw()), 2]),
            op(Opcode::ReturnValue),
            with(Opcode::LoadLocal, vec![0]),
            op(Opcode::ReturnValue),
        ];
        let p = Program::new(
            code,
            vec![Constant::str("first"), Constant::str("second")],
            vec![
                entry_meta(0),
                FunctionMeta {
                    id: f_id,
                    name: "first".to_string(),
                    entry_instruction_index: 4,
                    arity: 2,
                    local_count: 2,
                    is_entry: false,
                },
            ],
            vec![],
            vec![],
            HashMap::new(),
        );
        assert_eq!(run(&p).unwrap(), Value::str("first"));
    }

    #[test]
    fn test_bridge_denied_by_capability() {
        let p = program(
            vec![with(
                Opcode::CallBridge,
                vec![i64::from(SymbolId::of("Date.now").raw()), 0, 0],
            )],
            vec![],
            0,
        );
        let mut vm = VirtualMachine::new(
            &p,
            Capability::FoundationBasic | Capability::Diagnostics,
            ExecutionLimits::default(),
        );
        let error = vm.run().unwrap_err();
        assert_eq!(error.kind, ErrorKind::BridgeDenied(SymbolId::of("Date.now")));
        assert_eq!(error.symbol, Some(SymbolId::of("Date.now")));
        assert!(error.to_string().contains("not allowed"));
    }

    #[test]
    fn test_print_accumulates_output() {
        let p = program(
            vec![
                with(Opcode::PushConst, vec![0]),
                with(
                    Opcode::CallBridge,
                    vec![i64::from(SymbolId::of("print").raw()), 1, 0],
                ),
            ],
            vec![Constant::Int(5)],
            0,
        );
        let mut vm = VirtualMachine::new(&p, BitFlags::all(), ExecutionLimits::default());
        vm.run().unwrap();
        assert_eq!(vm.take_output(), vec!["5".to_string()]);
    }

    #[test]
    fn test_instruction_budget_trips() {
        // An infinite loop: jump back to 0 forever.
        let p = program(vec![with(Opcode::Jump, vec![0])], vec![], 0);
        let mut vm = VirtualMachine::new(
            &p,
            BitFlags::all(),
            ExecutionLimits { instruction_budget: 100, ..ExecutionLimits::default() },
        );
        let error = vm.run().unwrap_err();
        assert_eq!(error.kind, ErrorKind::InstructionBudgetExceeded { budget: 100 });
        assert_eq!(vm.instructions_executed(), 101);
    }

    #[test]
    fn test_call_depth_limit() {
        // f() calls f() with no base case.
        let f_id = FunctionId::of("f");
        let code = vec![
            with(Opcode::CallUser, vec![i64::from(f_id.raw()), 0]),
            op(Opcode::ReturnValue),
            // f at 2
            with(Opcode::CallUser, vec![i64::from(f_id.raw()), 0]),
            op(Opcode::ReturnValue),
        ];
        let p = Program::new(
            code,
            vec![],
            vec![
                entry_meta(0),
                FunctionMeta {
                    id: f_id,
                    name: "f".to_string(),
                    entry_instruction_index: 2,
                    arity: 0,
                    local_count: 0,
                    is_entry: false,
                },
            ],
            vec![],
            vec![],
            HashMap::new(),
        );
        let mut vm = VirtualMachine::new(
            &p,
            BitFlags::all(),
            ExecutionLimits { max_call_depth: 16, ..ExecutionLimits::default() },
        );
        let error = vm.run().unwrap_err();
        assert_eq!(error.kind, ErrorKind::CallDepthExceeded { limit: 16 });
        // The trace names the recursive frames.
        assert!(error.call_stack.iter().any(|frame| frame.function_name == "f"));
    }

    #[test]
    fn test_value_stack_limit() {
        let p = program(
            vec![with(Opcode::PushConst, vec![0]), with(Opcode::Jump, vec![0])],
            vec![Constant::Int(1)],
            0,
        );
        let mut vm = VirtualMachine::new(
            &p,
            BitFlags::all(),
            ExecutionLimits { max_value_stack_depth: 32, ..ExecutionLimits::default() },
        );
        let error = vm.run().unwrap_err();
        assert_eq!(error.kind, ErrorKind::ValueStackExceeded { limit: 32 });
    }

    fn point_layout() -> StructLayout {
        StructLayout {
            type_id: TypeId::of("Point"),
            name: "Point".to_string(),
            fields: vec![
                FieldDef {
                    field_id: FieldId::qualified("Point", "x"),
                    name: "x".to_string(),
                    type_hint: None,
                },
                FieldDef {
                    field_id: FieldId::qualified("Point", "y"),
                    name: "y".to_string(),
                    type_hint: None,
                },
            ],
        }
    }

    fn point_program(code: Vec<Instruction>, constants: Vec<Constant>) -> Program {
        Program::new(
            code,
            constants,
            vec![entry_meta(1)],
            vec![],
            vec![point_layout()],
            HashMap::new(),
        )
    }

    #[test]
    fn test_make_struct_and_get_field() {
        let type_id = TypeId::of("Point");
        let x = FieldId::qualified("Point", "x");
        let y = FieldId::qualified("Point", "y");
        let p = point_program(
            vec![
                with(Opcode::PushConst, vec![0]),
                with(Opcode::PushConst, vec![1]),
                with(
                    Opcode::MakeStruct,
                    vec![
                        i64::from(type_id.raw()),
                        2,
                        i64::from(x.raw()),
                        i64::from(y.raw()),
                    ],
                ),
                with(Opcode::GetField, vec![i64::from(y.raw())]),
                op(Opcode::ReturnValue),
            ],
            vec![Constant::Int(2), Constant::Int(3)],
        );
        assert_eq!(run(&p).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_wildcard_field_resolves_through_layout() {
        let type_id = TypeId::of("Point");
        let x = FieldId::qualified("Point", "x");
        let p = point_program(
            vec![
                with(Opcode::PushConst, vec![0]),
                with(
                    Opcode::MakeStruct,
                    vec![i64::from(type_id.raw()), 1, i64::from(x.raw())],
                ),
                with(Opcode::GetField, vec![i64::from(FieldId::wildcard("x").raw())]),
                op(Opcode::ReturnValue),
            ],
            vec![Constant::Int(11)],
        );
        assert_eq!(run(&p).unwrap(), Value::Int(11));
    }

    #[test]
    fn test_reading_unset_field_fails() {
        let type_id = TypeId::of("Point");
        let x = FieldId::qualified("Point", "x");
        let y = FieldId::qualified("Point", "y");
        let p = point_program(
            vec![
                with(Opcode::PushConst, vec![0]),
                with(
                    Opcode::MakeStruct,
                    vec![i64::from(type_id.raw()), 1, i64::from(x.raw())],
                ),
                with(Opcode::GetField, vec![i64::from(y.raw())]),
            ],
            vec![Constant::Int(1)],
        );
        let error = run(&p).unwrap_err();
        assert_eq!(
            error.kind,
            ErrorKind::MissingField { type_name: "Point".to_string() }
        );
    }

    #[test]
    fn test_set_field_is_copy_on_write() {
        let type_id = TypeId::of("Point");
        let x = FieldId::qualified("Point", "x");
        // Build a point, dup it, set x on the copy, discard the
        // copy, and read x from the untouched original.
        let p = point_program(
            vec![
                with(Opcode::PushConst, vec![0]),
                with(
                    Opcode::MakeStruct,
                    vec![i64::from(type_id.raw()), 1, i64::from(x.raw())],
                ),
                op(Opcode::Dup),
                with(Opcode::PushConst, vec![1]),
                with(Opcode::SetField, vec![i64::from(x.raw())]),
                op(Opcode::Pop),
                with(Opcode::GetField, vec![i64::from(x.raw())]),
                op(Opcode::ReturnValue),
            ],
            vec![Constant::Int(2), Constant::Int(9)],
        );
        assert_eq!(run(&p).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_get_field_on_non_struct() {
        let p = program(
            vec![
                with(Opcode::PushConst, vec![0]),
                with(Opcode::GetField, vec![1]),
            ],
            vec![Constant::Int(3)],
            0,
        );
        assert_eq!(run(&p).unwrap_err().kind, ErrorKind::NotAStruct("int"));
    }

    #[test]
    fn test_inline_caches_record_sites() {
        let p = program(
            vec![
                with(Opcode::PushConst, vec![0]),
                with(Opcode::PushConst, vec![0]),
                with(
                    Opcode::CallBridge,
                    vec![i64::from(SymbolId::operator("+").raw()), 2, 0],
                ),
            ],
            vec![Constant::Int(1)],
            0,
        );
        let mut vm = VirtualMachine::new(&p, BitFlags::all(), ExecutionLimits::default());
        vm.run().unwrap();
        let cache = vm.bridge_caches().get(&2).unwrap();
        assert_eq!(cache.symbol, SymbolId::operator("+"));
        assert_eq!(cache.receiver_type, None);
        assert_eq!(cache.hits, 1);
    }

    #[test]
    fn test_return_on_empty_stack_underflows() {
        let p = program(vec![op(Opcode::ReturnValue)], vec![], 0);
        assert_eq!(run(&p).unwrap_err().kind, ErrorKind::StackUnderflow);
    }
}
