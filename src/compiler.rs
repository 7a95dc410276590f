// Lowering from the folded surface tree to a bytecode program.
//
// The pipeline per source text: parse, fold operators
// (opportunistically), bucket the top-level items, register struct
// layouts and function ids, compile a synthetic entry function from
// the leftover statements, compile each user function, then merge
// every block into one instruction list and assemble. Each function
// compiles against its own label space; merging offsets jump targets
// by the function's start index.
//
// Assignment is detected in three redundant shapes because surface
// parsers differ in how they hand back `=`: the folded infix form,
// the unfolded two-operand chain, and a textual fallback that splits
// the statement's source text on the first non-compound `=` and
// re-parses both halves.

use std::collections::HashMap;

use regex::Regex;
use tracing::debug;

use crate::builder::{Block, InstructionBuilder};
use crate::catalog;
use crate::constant::{Constant, ConstantPoolBuilder};
use crate::error::CompileError;
use crate::fold;
use crate::ids::{FieldId, FunctionId, SymbolId, SymbolTable, TypeId};
use crate::opcode::Opcode;
use crate::program::{FieldDef, FunctionMeta, FunctionSignature, Program, StructLayout};
use crate::span::{Diagnostic, LineIndex, Span};
use crate::syntax::{self, ElseBranch, Expr, FuncDecl, IfStmt, Item, SourceFile, Stmt, StructDecl};

pub const ENTRY_NAME: &str = "<entry>";

lazy_static! {
    // First `=` that is not part of ==, <=, >=, !=, && or ||
    // compounds. The capture keeps the match anchored to the `=`
    // itself rather than the preceding character.
    static ref ASSIGN_SPLIT: Regex = Regex::new(r"[^=<>!&|]=(?:[^=]|$)").unwrap();
}

pub fn compile(source: &str) -> (Option<Program>, Vec<Diagnostic>) {
    let index = LineIndex::new(source);
    let mut diagnostics = Vec::new();

    let file = match syntax::parse(source, &index) {
        Ok(file) => file,
        Err(error) => {
            diagnostics.push(error.into_diagnostic());
            return (None, diagnostics);
        }
    };
    let file = fold::fold_source(file, &mut diagnostics);

    let mut compiler = Compiler {
        source,
        index: &index,
        symbols: SymbolTable::new(),
        constants: ConstantPoolBuilder::new(),
        struct_layouts: Vec::new(),
        struct_names: HashMap::new(),
        function_ids: HashMap::new(),
    };

    match compiler.compile_file(&file) {
        Ok(program) => (Some(program), diagnostics),
        Err(error) => {
            diagnostics.push(error.into_diagnostic());
            (None, diagnostics)
        }
    }
}

struct Compiler<'a> {
    source: &'a str,
    index: &'a LineIndex,
    symbols: SymbolTable,
    constants: ConstantPoolBuilder,
    struct_layouts: Vec<StructLayout>,
    struct_names: HashMap<String, TypeId>,
    function_ids: HashMap<String, FunctionId>,
}

// One compiled function body plus the metadata the merge step needs.
struct CompiledFunction {
    meta_name: String,
    id: FunctionId,
    arity: usize,
    local_count: usize,
    is_entry: bool,
    params: Vec<String>,
    block: Block,
}

impl<'a> Compiler<'a> {
    fn compile_file(&mut self, file: &SourceFile) -> Result<Program, CompileError> {
        let mut structs: Vec<&StructDecl> = Vec::new();
        let mut functions: Vec<&FuncDecl> = Vec::new();
        let mut statements: Vec<&Stmt> = Vec::new();
        for item in &file.items {
            match item {
                Item::Struct(decl) => structs.push(decl),
                Item::Function(decl) => functions.push(decl),
                Item::Statement(stmt) => statements.push(stmt),
            }
        }

        for decl in &structs {
            self.register_struct(decl);
        }
        for decl in &functions {
            let id = self.symbols.function(&decl.name);
            self.function_ids.insert(decl.name.clone(), id);
        }

        let mut compiled = vec![self.compile_entry(&statements)?];
        for decl in &functions {
            compiled.push(self.compile_function(decl)?);
        }

        Ok(self.merge(compiled))
    }

    fn register_struct(&mut self, decl: &StructDecl) {
        let type_id = self.symbols.struct_type(&decl.name);
        let fields = decl
            .fields
            .iter()
            .map(|field| FieldDef {
                field_id: self.symbols.field(&decl.name, &field.name),
                name: field.name.clone(),
                type_hint: field.type_hint.clone(),
            })
            .collect();
        self.struct_names.insert(decl.name.clone(), type_id);
        self.struct_layouts.push(StructLayout {
            type_id,
            name: decl.name.clone(),
            fields,
        });
    }

    fn compile_entry(&mut self, statements: &[&Stmt]) -> Result<CompiledFunction, CompileError> {
        let id = self.symbols.function(ENTRY_NAME);
        let mut body = FunctionCompiler::new(self);
        for stmt in statements {
            body.compile_stmt(stmt)?;
        }
        let (block, local_count) = body.finish(None)?;
        Ok(CompiledFunction {
            meta_name: ENTRY_NAME.to_string(),
            id,
            arity: 0,
            local_count,
            is_entry: true,
            params: Vec::new(),
            block,
        })
    }

    fn compile_function(&mut self, decl: &FuncDecl) -> Result<CompiledFunction, CompileError> {
        let id = self.function_ids[&decl.name];
        let mut body = FunctionCompiler::new(self);
        for param in &decl.params {
            body.scope.declare(param.clone(), None);
        }
        for stmt in &decl.body {
            body.compile_stmt(stmt)?;
        }
        let (block, local_count) = body.finish(Some(decl.span))?;
        Ok(CompiledFunction {
            meta_name: decl.name.clone(),
            id,
            arity: decl.params.len(),
            local_count,
            is_entry: false,
            params: decl.params.clone(),
            block,
        })
    }

    // Concatenates every function's block, offsetting each block's
    // jump targets by its start index, and assembles the program.
    fn merge(&mut self, compiled: Vec<CompiledFunction>) -> Program {
        let mut instructions = Vec::new();
        let mut spans = HashMap::new();
        let mut metas = Vec::new();
        let mut signatures = Vec::new();

        for function in compiled {
            let offset = instructions.len();
            for (local_index, mut instruction) in function.block.instructions.into_iter().enumerate()
            {
                if matches!(
                    instruction.opcode,
                    Opcode::Jump | Opcode::JumpIfFalse | Opcode::JumpIfTrue
                ) {
                    instruction.operands[0] += offset as i64;
                }
                if let Some(span) = function.block.spans[local_index] {
                    spans.insert(offset + local_index, span);
                }
                instructions.push(instruction);
            }
            metas.push(FunctionMeta {
                id: function.id,
                name: function.meta_name.clone(),
                entry_instruction_index: offset,
                arity: function.arity,
                local_count: function.local_count,
                is_entry: function.is_entry,
            });
            signatures.push(FunctionSignature {
                id: function.id,
                name: function.meta_name,
                params: function.params,
            });
        }

        debug!(
            instructions = instructions.len(),
            functions = metas.len(),
            constants = self.constants.len(),
            "assembled program"
        );

        Program::new(
            instructions,
            std::mem::take(&mut self.constants).finish(),
            metas,
            signatures,
            std::mem::take(&mut self.struct_layouts),
            spans,
        )
    }
}

/******************************************************************************/
// Per-function lowering

#[derive(Clone, Debug)]
struct LocalBinding {
    index: usize,
    type_hint: Option<String>,
}

// Lexical scoping over one function body. Local indices come from a
// monotonic counter, so shadowed and out-of-scope bindings keep
// their slots and local_count is just the high-water mark.
#[derive(Default)]
struct LexicalScope {
    scopes: Vec<HashMap<String, LocalBinding>>,
    next_index: usize,
}

impl LexicalScope {
    fn new() -> LexicalScope {
        LexicalScope { scopes: vec![HashMap::new()], next_index: 0 }
    }

    fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: String, type_hint: Option<String>) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        let scope = self.scopes.last_mut().unwrap();
        scope.insert(name, LocalBinding { index, type_hint });
        index
    }

    fn resolve(&self, name: &str) -> Option<&LocalBinding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn set_hint(&mut self, name: &str, type_hint: Option<String>) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(binding) = scope.get_mut(name) {
                binding.type_hint = type_hint;
                return;
            }
        }
    }

    fn local_count(&self) -> usize {
        self.next_index
    }
}

struct FunctionCompiler<'c, 'a> {
    comp: &'c mut Compiler<'a>,
    builder: InstructionBuilder,
    scope: LexicalScope,
}

impl<'c, 'a> FunctionCompiler<'c, 'a> {
    fn new(comp: &'c mut Compiler<'a>) -> FunctionCompiler<'c, 'a> {
        FunctionCompiler { comp, builder: InstructionBuilder::new(), scope: LexicalScope::new() }
    }

    // Appends the implicit return and closes the block.
    fn finish(mut self, span: Option<Span>) -> Result<(Block, usize), CompileError> {
        let none = self.comp.constants.intern(Constant::None);
        self.builder.emit(Opcode::PushConst, vec![none as i64], span);
        self.builder.emit(Opcode::ReturnValue, vec![], span);
        let local_count = self.scope.local_count();
        Ok((self.builder.finish()?, local_count))
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Binding { name, init, span, .. } => self.compile_binding(name, init, *span),
            Stmt::If(stmt) => self.compile_if(stmt),
            Stmt::While { cond, body, span } => self.compile_while(cond, body, *span),
            Stmt::Return { value, span } => {
                match value {
                    Some(expr) => self.compile_expr(expr)?,
                    None => {
                        let none = self.comp.constants.intern(Constant::None);
                        self.builder.emit(Opcode::PushConst, vec![none as i64], Some(*span));
                    }
                }
                self.builder.emit(Opcode::ReturnValue, vec![], Some(*span));
                Ok(())
            }
            Stmt::Expr(expr) => {
                if self.try_compile_assignment(expr)? {
                    return Ok(());
                }
                self.compile_expr(expr)
            }
        }
    }

    fn compile_binding(&mut self, name: &str, init: &Expr, span: Span) -> Result<(), CompileError> {
        self.compile_expr(init)?;
        // Declared after the initializer compiles, so the name is not
        // visible inside its own initializer.
        let hint = self.struct_hint_of(init);
        let index = self.scope.declare(name.to_string(), hint);
        self.builder.emit(Opcode::StoreLocal, vec![index as i64], Some(span));
        Ok(())
    }

    // A call whose callee resolves to a struct name gives the bound
    // local a compile-time type hint for later member lowering.
    fn struct_hint_of(&self, init: &Expr) -> Option<String> {
        match init {
            Expr::Call { callee, .. } => match callee.as_ref() {
                Expr::Ident(name, _) if self.comp.struct_names.contains_key(name) => {
                    Some(name.clone())
                }
                _ => None,
            },
            _ => None,
        }
    }

    fn compile_if(&mut self, stmt: &IfStmt) -> Result<(), CompileError> {
        let else_label = self.builder.create_label();
        let end_label = self.builder.create_label();

        self.compile_expr(&stmt.cond)?;
        self.builder.emit_jump_if_false(else_label, Some(stmt.cond.span()));

        self.scope.push();
        for inner in &stmt.then_body {
            self.compile_stmt(inner)?;
        }
        self.scope.pop();
        self.builder.emit_jump(end_label, Some(stmt.span));

        self.builder.mark(else_label);
        match &stmt.else_branch {
            Some(ElseBranch::ElseIf(nested)) => self.compile_if(nested)?,
            Some(ElseBranch::Else(body)) => {
                self.scope.push();
                for inner in body {
                    self.compile_stmt(inner)?;
                }
                self.scope.pop();
            }
            None => {}
        }
        self.builder.mark(end_label);
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &[Stmt], span: Span) -> Result<(), CompileError> {
        let loop_start = self.builder.create_label();
        let loop_end = self.builder.create_label();

        self.builder.mark(loop_start);
        self.compile_expr(cond)?;
        self.builder.emit_jump_if_false(loop_end, Some(cond.span()));

        self.scope.push();
        for inner in body {
            self.compile_stmt(inner)?;
        }
        self.scope.pop();
        self.builder.emit_jump(loop_start, Some(span));
        self.builder.mark(loop_end);
        Ok(())
    }

    /**************************************************************************/
    // Assignment detection

    fn try_compile_assignment(&mut self, expr: &Expr) -> Result<bool, CompileError> {
        // (a) folded infix whose operator is the assignment form.
        if let Expr::Binary { op, lhs, rhs, span } = expr {
            if op.text == "=" {
                self.compile_assignment(lhs, rhs, *span)?;
                return Ok(true);
            }
        }
        // (b) an unfolded two-operand sequence `lhs = rhs`.
        if let Expr::Chain { operands, operators, span } = expr {
            if operators.len() == 1 && operators[0].text == "=" && operands.len() == 2 {
                self.compile_assignment(&operands[0], &operands[1], *span)?;
                return Ok(true);
            }
            // (c) textual fallback: the raw statement still contains
            // a bare `=`; split on it and re-parse both halves.
            if operators.iter().any(|op| op.text == "=") {
                let span = *span;
                let start = span.start.utf8_offset;
                let end = span.end.utf8_offset.min(self.comp.source.len());
                let text = &self.comp.source[start..end];
                if let Some(found) = ASSIGN_SPLIT.find(text) {
                    let split = found.start() + 1;
                    let lhs_text = &text[..split];
                    let rhs_text = &text[split + 1..];
                    let lhs = reparse(lhs_text, span)?;
                    let rhs = reparse(rhs_text, span)?;
                    self.compile_assignment(&lhs, &rhs, span)?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn compile_assignment(
        &mut self,
        target: &Expr,
        rhs: &Expr,
        span: Span,
    ) -> Result<(), CompileError> {
        match target {
            Expr::Ident(name, name_span) => {
                let index = match self.scope.resolve(name) {
                    Some(binding) => binding.index,
                    None => {
                        return Err(CompileError::new(
                            format!("unknown identifier '{}'", name),
                            Some(*name_span),
                        ));
                    }
                };
                self.compile_expr(rhs)?;
                if let Some(hint) = self.struct_hint_of(rhs) {
                    self.scope.set_hint(name, Some(hint));
                }
                self.builder.emit(Opcode::Dup, vec![], Some(span));
                self.builder.emit(Opcode::StoreLocal, vec![index as i64], Some(span));
                Ok(())
            }
            Expr::Member { base, name, name_span, .. } => {
                let base_name = match base.as_ref() {
                    Expr::Ident(base_name, _) => base_name,
                    _ => {
                        return Err(CompileError::new(
                            "unsupported assignment target",
                            Some(target.span()),
                        ));
                    }
                };
                let (index, hint) = match self.scope.resolve(base_name) {
                    Some(binding) => (binding.index, binding.type_hint.clone()),
                    None => {
                        return Err(CompileError::new(
                            format!("unknown identifier '{}'", base_name),
                            Some(*name_span),
                        ));
                    }
                };
                let field_id = self.field_id_for(hint, name);
                self.builder.emit(Opcode::LoadLocal, vec![index as i64], Some(span));
                self.compile_expr(rhs)?;
                self.builder.emit(
                    Opcode::SetField,
                    vec![i64::from(field_id.raw())],
                    Some(span),
                );
                self.builder.emit(Opcode::StoreLocal, vec![index as i64], Some(span));
                Ok(())
            }
            other => Err(CompileError::new(
                "unsupported assignment target",
                Some(other.span()),
            )),
        }
    }

    // Resolves a field name through the receiver's type hint when one
    // exists, else the wildcard id the VM resolves at runtime.
    fn field_id_for(&mut self, hint: Option<String>, field_name: &str) -> FieldId {
        match hint {
            Some(struct_name) if self.comp.struct_names.contains_key(&struct_name) => {
                self.comp.symbols.field(&struct_name, field_name)
            }
            _ => FieldId::wildcard(field_name),
        }
    }

    /**************************************************************************/
    // Expressions

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Nil(span) => self.push_constant(Constant::None, *span),
            Expr::Bool(value, span) => self.push_constant(Constant::Bool(*value), *span),
            Expr::Int(value, span) => self.push_constant(Constant::Int(*value), *span),
            Expr::Float(value, span) => self.push_constant(Constant::Float(*value), *span),
            Expr::Str(value, span) => self.push_constant(Constant::str(value.clone()), *span),
            Expr::Ident(name, span) => match self.scope.resolve(name) {
                Some(binding) => {
                    let index = binding.index;
                    self.builder.emit(Opcode::LoadLocal, vec![index as i64], Some(*span));
                    Ok(())
                }
                None => Err(CompileError::new(
                    format!("unknown identifier '{}'", name),
                    Some(*span),
                )),
            },
            Expr::Binary { op, lhs, rhs, span } => {
                if op.text == "=" {
                    // Assignment in expression position only supports
                    // a local target, which leaves its value behind.
                    if matches!(lhs.as_ref(), Expr::Ident(_, _)) {
                        self.compile_assignment(lhs, rhs, *span)?;
                        return Ok(());
                    }
                    return Err(CompileError::new(
                        "unsupported assignment target",
                        Some(*span),
                    ));
                }
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                let symbol = self.comp.symbols.operator(&op.text);
                self.emit_bridge_call(Opcode::CallBridge, symbol, 2, false, *span);
                Ok(())
            }
            Expr::Chain { operands, operators, span } => {
                // Unfolded chain: lower in parser order, left to
                // right, so programs still assemble when the fold
                // pass could not run.
                self.compile_expr(&operands[0])?;
                for (op, operand) in operators.iter().zip(&operands[1..]) {
                    self.compile_expr(operand)?;
                    let symbol = self.comp.symbols.operator(&op.text);
                    self.emit_bridge_call(Opcode::CallBridge, symbol, 2, false, *span);
                }
                Ok(())
            }
            Expr::Member { base, name, span, .. } => self.compile_member(base, name, *span),
            Expr::Call { callee, args, span } => self.compile_call(callee, args, *span),
        }
    }

    fn push_constant(&mut self, constant: Constant, span: Span) -> Result<(), CompileError> {
        let index = self.comp.constants.intern(constant);
        self.builder.emit(Opcode::PushConst, vec![index as i64], Some(span));
        Ok(())
    }

    fn emit_bridge_call(
        &mut self,
        opcode: Opcode,
        symbol: SymbolId,
        argc: usize,
        has_receiver: bool,
        span: Span,
    ) {
        self.builder.emit(
            opcode,
            vec![
                i64::from(symbol.raw()),
                argc as i64,
                if has_receiver { 1 } else { 0 },
            ],
            Some(span),
        );
    }

    fn compile_member(&mut self, base: &Expr, name: &str, span: Span) -> Result<(), CompileError> {
        if let Expr::Ident(base_name, _) = base {
            if let Some(binding) = self.scope.resolve(base_name) {
                // Direct field read through the local's hint (or the
                // wildcard id when the type is unknown).
                let index = binding.index;
                let hint = binding.type_hint.clone();
                let field_id = self.field_id_for(hint, name);
                self.builder.emit(Opcode::LoadLocal, vec![index as i64], Some(span));
                self.builder.emit(
                    Opcode::GetField,
                    vec![i64::from(field_id.raw())],
                    Some(span),
                );
                return Ok(());
            }
            if let Some(symbol) = catalog::static_member_symbol(base_name, name) {
                self.emit_bridge_call(Opcode::CallBridge, symbol, 0, false, span);
                return Ok(());
            }
        }
        // Fallback: evaluate the base and call a nullary bridge whose
        // symbol encodes the member name.
        self.compile_expr(base)?;
        let symbol = catalog::method_symbol(name);
        self.emit_bridge_call(Opcode::CallBridge, symbol, 0, true, span);
        Ok(())
    }

    fn compile_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        span: Span,
    ) -> Result<(), CompileError> {
        match callee {
            Expr::Ident(name, _) => self.compile_free_call(name, args, span),
            Expr::Member { base, name, .. } => {
                if let Expr::Ident(base_name, _) = base.as_ref() {
                    if self.scope.resolve(base_name).is_none() && args.is_empty() {
                        if let Some(symbol) = catalog::static_member_symbol(base_name, name) {
                            self.emit_bridge_call(Opcode::CallBridge, symbol, 0, false, span);
                            return Ok(());
                        }
                    }
                }
                self.compile_expr(base)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                let symbol = catalog::method_symbol(name);
                self.emit_bridge_call(Opcode::CallBridge, symbol, args.len(), true, span);
                Ok(())
            }
            other => Err(CompileError::new(
                "unsupported call target",
                Some(other.span()),
            )),
        }
    }

    // Free-function dispatch priority: user function, then struct
    // construction, then the fixed bridge name table, then the
    // generic dynamic namespace.
    fn compile_free_call(
        &mut self,
        name: &str,
        args: &[Expr],
        span: Span,
    ) -> Result<(), CompileError> {
        if let Some(function_id) = self.comp.function_ids.get(name).copied() {
            for arg in args {
                self.compile_expr(arg)?;
            }
            self.builder.emit(
                Opcode::CallUser,
                vec![i64::from(function_id.raw()), args.len() as i64],
                Some(span),
            );
            return Ok(());
        }

        if let Some(type_id) = self.comp.struct_names.get(name).copied() {
            return self.compile_struct_construction(name, type_id, args, span);
        }

        if let Some(symbol) = catalog::initializer_symbol(name) {
            for arg in args {
                self.compile_expr(arg)?;
            }
            self.emit_bridge_call(Opcode::CallInit, symbol, args.len(), false, span);
            return Ok(());
        }

        let symbol = catalog::free_function_symbol(name)
            .unwrap_or_else(|| catalog::dynamic_symbol(name));
        for arg in args {
            self.compile_expr(arg)?;
        }
        self.emit_bridge_call(Opcode::CallBridge, symbol, args.len(), false, span);
        Ok(())
    }

    // Positional construction: the first min(|args|, |fields|)
    // arguments bind to fields in layout order; extra arguments are
    // not lowered, missing fields stay unset.
    fn compile_struct_construction(
        &mut self,
        name: &str,
        type_id: TypeId,
        args: &[Expr],
        span: Span,
    ) -> Result<(), CompileError> {
        let field_ids: Vec<FieldId> = {
            let layout = self
                .comp
                .struct_layouts
                .iter()
                .find(|layout| layout.name == name)
                .expect("registered struct has a layout");
            layout.fields.iter().map(|field| field.field_id).collect()
        };
        let used = args.len().min(field_ids.len());
        for arg in &args[..used] {
            self.compile_expr(arg)?;
        }
        let mut operands = vec![i64::from(type_id.raw()), used as i64];
        operands.extend(field_ids[..used].iter().map(|id| i64::from(id.raw())));
        self.builder.emit(Opcode::MakeStruct, operands, Some(span));
        Ok(())
    }
}

// Used by the textual assignment fallback: parse one half of a split
// statement, then give the fold a chance (keeping the raw chain when
// it declines).
fn reparse(text: &str, span: Span) -> Result<Expr, CompileError> {
    let index = LineIndex::new(text);
    let expr = syntax::parse_expression(text, &index)
        .map_err(|error| CompileError::new(error.message, Some(span)))?;
    Ok(fold::fold_expr(expr.clone()).unwrap_or(expr))
}
