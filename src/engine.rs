// The stable API surface. A host hands in source text, a capability
// set, and execution limits; it gets back a value, captured output,
// and diagnostics -- or a failure that still carries whatever output
// accumulated before the error. build_preview stops short of
// execution and reports which bridge symbols the program would use
// and which the configured capabilities would block.

use std::fmt;

use tracing::debug;

use crate::catalog::{self, Capability, CapabilitySet, SymbolPolicy};
use crate::compiler;
use crate::error::RuntimeError;
use crate::guard::ExecutionLimits;
use crate::ids::SymbolId;
use crate::opcode::Opcode;
use crate::program::Program;
use crate::span::Diagnostic;
use crate::value::Value;
use crate::vm::VirtualMachine;

#[derive(Debug)]
pub struct CompileOutcome {
    pub program: Option<Program>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn compile(source: &str, file_name: &str, capabilities: CapabilitySet) -> CompileOutcome {
    debug!(file = file_name, capabilities = ?capabilities, "compiling");
    let (program, diagnostics) = compiler::compile(source);
    CompileOutcome { program, diagnostics }
}

#[derive(Clone, Debug)]
pub struct RunRequest {
    pub source: String,
    pub file_name: String,
    pub capabilities: CapabilitySet,
    pub limits: ExecutionLimits,
}

impl RunRequest {
    pub fn new(source: impl Into<String>) -> RunRequest {
        RunRequest {
            source: source.into(),
            file_name: "script".to_string(),
            capabilities: Capability::FoundationBasic | Capability::UiBasic,
            limits: ExecutionLimits::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> RunRequest {
        self.capabilities = capabilities;
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> RunRequest {
        self.limits = limits;
        self
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub value: Value,
    pub output: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

// Failure still carries the output accumulated before the error and
// the compile-stage diagnostics.
#[derive(Debug)]
pub enum RunFailure {
    Compile { diagnostics: Vec<Diagnostic> },
    Runtime { error: RuntimeError, output: Vec<String>, diagnostics: Vec<Diagnostic> },
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RunFailure::Compile { diagnostics } => {
                write!(f, "compilation failed")?;
                for diagnostic in diagnostics {
                    write!(f, "\n  {}", diagnostic)?;
                }
                Ok(())
            }
            RunFailure::Runtime { error, .. } => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for RunFailure {}

pub fn compile_and_run(request: RunRequest) -> Result<RunOutcome, RunFailure> {
    let outcome = compile(&request.source, &request.file_name, request.capabilities);
    let program = match outcome.program {
        Some(program) => program,
        None => return Err(RunFailure::Compile { diagnostics: outcome.diagnostics }),
    };

    let mut vm = VirtualMachine::new(&program, request.capabilities, request.limits);
    match vm.run() {
        Ok(value) => Ok(RunOutcome {
            value,
            output: vm.take_output(),
            diagnostics: outcome.diagnostics,
        }),
        Err(error) => Err(RunFailure::Runtime {
            error,
            output: vm.take_output(),
            diagnostics: outcome.diagnostics,
        }),
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PreviewReport {
    pub compilation_diagnostics: Vec<Diagnostic>,
    pub used_symbols: Vec<String>,
    pub blocked_symbols: Vec<String>,
    pub vm_compilation_succeeded: bool,
    pub bytecode_size: usize,
    pub instruction_count: usize,
    pub constant_count: usize,
    pub function_count: usize,
}

// Compiles and inspects, but never executes and never fails:
// compile problems surface through the diagnostics and the
// succeeded flag.
pub fn build_preview(request: RunRequest) -> PreviewReport {
    let outcome = compile(&request.source, &request.file_name, request.capabilities);
    let program = match outcome.program {
        Some(program) => program,
        None => {
            return PreviewReport {
                compilation_diagnostics: outcome.diagnostics,
                ..PreviewReport::default()
            };
        }
    };

    let used = collect_bridge_symbols(&program);
    let blocked: Vec<String> = used
        .iter()
        .filter(|symbol| !SymbolPolicy::is_allowed(**symbol, request.capabilities))
        .map(|symbol| symbol_label(*symbol))
        .collect();
    let used: Vec<String> = used.iter().map(|symbol| symbol_label(*symbol)).collect();

    PreviewReport {
        compilation_diagnostics: outcome.diagnostics,
        used_symbols: used,
        blocked_symbols: blocked,
        vm_compilation_succeeded: true,
        bytecode_size: program.code.len(),
        instruction_count: program.instructions.len(),
        constant_count: program.constants.len(),
        function_count: program.functions.len(),
    }
}

// Every symbol named by an assembled call_bridge/call_init
// instruction, first-use order, deduplicated.
fn collect_bridge_symbols(program: &Program) -> Vec<SymbolId> {
    let mut seen = Vec::new();
    for instruction in &program.instructions {
        if !matches!(instruction.opcode, Opcode::CallBridge | Opcode::CallInit) {
            continue;
        }
        if let Ok(raw) = instruction.operand_u32(0) {
            let symbol = SymbolId(raw);
            if !seen.contains(&symbol) {
                seen.push(symbol);
            }
        }
    }
    seen
}

fn symbol_label(symbol: SymbolId) -> String {
    match catalog::symbol_name(symbol) {
        Some(name) => name.to_string(),
        None => format!("bridge-{}", symbol),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use enumflags2::BitFlags;
    use pretty_assertions::assert_eq;

    fn run(source: &str) -> RunOutcome {
        compile_and_run(RunRequest::new(source)).unwrap()
    }

    fn run_with(source: &str, capabilities: CapabilitySet) -> Result<RunOutcome, RunFailure> {
        compile_and_run(RunRequest::new(source).with_capabilities(capabilities))
    }

    #[test]
    fn test_scenario_arithmetic_and_print() {
        let outcome = run("let x = 2\nlet y = 3\nprint(x + y)\nreturn x + y");
        assert_eq!(outcome.value, Value::Int(5));
        assert_eq!(outcome.output, vec!["5".to_string()]);
    }

    #[test]
    fn test_scenario_user_function() {
        let outcome = run("func add(a, b) { return a + b }\nreturn add(4, 9)");
        assert_eq!(outcome.value, Value::Int(13));
    }

    #[test]
    fn test_scenario_while_and_branch() {
        let outcome = run(
            "var i = 0\nvar sum = 0\nwhile i < 5 { sum = sum + i; i = i + 1 }\nif sum > 5 { return sum } else { return 0 }",
        );
        assert_eq!(outcome.value, Value::Int(10));
    }

    #[test]
    fn test_scenario_struct_mutation() {
        let outcome = run(
            "struct Point { var x; var y }\nvar p = Point(2, 3)\np.x = 9\nreturn p.x + p.y",
        );
        assert_eq!(outcome.value, Value::Int(12));
    }

    #[test]
    fn test_scenario_capability_denial_and_preview() {
        let capabilities = Capability::FoundationBasic | Capability::Diagnostics;
        let failure = run_with("return Date.now", capabilities).unwrap_err();
        match &failure {
            RunFailure::Runtime { error, .. } => {
                assert!(error.to_string().contains("not allowed"));
                assert_eq!(error.symbol, Some(SymbolId::of("Date.now")));
            }
            other => panic!("expected runtime failure, got {:?}", other),
        }

        let report = build_preview(
            RunRequest::new("return Date.now").with_capabilities(capabilities),
        );
        assert!(report.vm_compilation_succeeded);
        assert_eq!(report.blocked_symbols, vec!["Date.now".to_string()]);
    }

    #[test]
    fn test_scenario_string_method_and_preview() {
        let outcome = run("let name = \"vibe\"\nprint(name.uppercased())\nreturn name");
        assert_eq!(outcome.value, Value::str("vibe"));
        assert_eq!(outcome.output, vec!["VIBE".to_string()]);

        let report = build_preview(RunRequest::new(
            "let name = \"vibe\"\nprint(name.uppercased())\nreturn name",
        ));
        assert!(report.used_symbols.contains(&"print".to_string()));
        assert!(report.used_symbols.contains(&"String.uppercased".to_string()));
        assert!(report.blocked_symbols.is_empty());
    }

    #[test]
    fn test_empty_source_returns_none() {
        let outcome = run("");
        assert_eq!(outcome.value, Value::Nil);
        assert!(outcome.output.is_empty());
    }

    #[test]
    fn test_while_with_zero_iterations() {
        let outcome = run("var i = 9\nwhile i < 5 { i = i + 1 }\nreturn i");
        assert_eq!(outcome.value, Value::Int(9));
    }

    #[test]
    fn test_nested_if_three_arms() {
        let source = "func pick(n) { if n < 0 { return \"neg\" } else if n == 0 { return \"zero\" } else { return \"pos\" } }\nreturn pick(0)";
        assert_eq!(run(source).value, Value::str("zero"));
        let source = "func pick(n) { if n < 0 { return \"neg\" } else if n == 0 { return \"zero\" } else { return \"pos\" } }\nreturn pick(7)";
        assert_eq!(run(source).value, Value::str("pos"));
    }

    #[test]
    fn test_single_branch_if() {
        let outcome = run("var x = 1\nif true { x = 2 }\nreturn x");
        assert_eq!(outcome.value, Value::Int(2));
    }

    #[test]
    fn test_shadowed_assignment_hits_innermost() {
        let outcome = run("var x = 1\nif true { var x = 2\nx = 5 }\nreturn x");
        assert_eq!(outcome.value, Value::Int(1));
    }

    #[test]
    fn test_struct_with_zero_fields() {
        let outcome = run("struct Unit { }\nlet u = Unit()\nreturn 1");
        assert_eq!(outcome.value, Value::Int(1));
    }

    #[test]
    fn test_short_construction_reads_fail() {
        let failure = run_with(
            "struct Point { var x; var y }\nlet p = Point(1)\nreturn p.y",
            BitFlags::all(),
        )
        .unwrap_err();
        match failure {
            RunFailure::Runtime { error, .. } => {
                assert!(matches!(error.kind, ErrorKind::MissingField { .. }));
                assert!(error.span.is_some());
            }
            other => panic!("expected runtime failure, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_failure_is_distinguishable() {
        let failure = run_with("return ghost", BitFlags::all()).unwrap_err();
        match failure {
            RunFailure::Compile { diagnostics } => {
                assert!(diagnostics[0].message.contains("ghost"));
            }
            other => panic!("expected compile failure, got {:?}", other),
        }
    }

    #[test]
    fn test_preview_never_fails_on_bad_source() {
        let report = build_preview(RunRequest::new("return ghost"));
        assert!(!report.vm_compilation_succeeded);
        assert!(!report.compilation_diagnostics.is_empty());
        assert_eq!(report.instruction_count, 0);
    }

    #[test]
    fn test_preview_counts() {
        let report = build_preview(RunRequest::new("func f(a) { return a }\nreturn f(1)"));
        assert!(report.vm_compilation_succeeded);
        assert_eq!(report.function_count, 2);
        assert!(report.instruction_count > 0);
        assert!(report.bytecode_size > 0);
        assert!(report.constant_count > 0);
    }

    #[test]
    fn test_budget_failure_carries_output() {
        let failure = compile_and_run(
            RunRequest::new("print(\"before\")\nwhile true { }\nreturn 1").with_limits(
                ExecutionLimits { instruction_budget: 500, ..ExecutionLimits::default() },
            ),
        )
        .unwrap_err();
        match failure {
            RunFailure::Runtime { error, output, .. } => {
                assert!(matches!(error.kind, ErrorKind::InstructionBudgetExceeded { .. }));
                assert_eq!(output, vec!["before".to_string()]);
            }
            other => panic!("expected runtime failure, got {:?}", other),
        }
    }

    #[test]
    fn test_runtime_error_carries_stack_trace() {
        let failure = run_with(
            "func inner() { return 1 / 0 }\nfunc outer() { return inner() }\nreturn outer()",
            BitFlags::all(),
        )
        .unwrap_err();
        match failure {
            RunFailure::Runtime { error, .. } => {
                assert_eq!(error.kind, ErrorKind::DivisionByZero);
                let names: Vec<&str> = error
                    .call_stack
                    .iter()
                    .map(|frame| frame.function_name.as_str())
                    .collect();
                assert!(names.contains(&"inner"));
                assert!(names.contains(&"outer"));
                assert!(error.span.is_some());
            }
            other => panic!("expected runtime failure, got {:?}", other),
        }
    }

    #[test]
    fn test_view_tree_end_to_end() {
        use crate::ir::{TreeDefaults, ViewTree};
        let outcome = run(
            "let view = VStack(Text(\"Hello\"), Spacer())\nreturn view.padding(8)",
        );
        let tree = ViewTree::from(&outcome.value, &TreeDefaults::default()).unwrap();
        assert_eq!(tree.root.node_type, "VStack");
        assert_eq!(tree.root.children.len(), 2);
        assert_eq!(tree.root.children[0].node_type, "Text");
        assert_eq!(tree.root.modifiers.len(), 1);
        assert_eq!(tree.root.modifiers[0].modifier_type, "padding");
    }

    #[test]
    fn test_unknown_name_falls_to_dynamic_and_is_denied() {
        let failure = run_with("return mystery()", BitFlags::all()).unwrap_err();
        match failure {
            RunFailure::Runtime { error, .. } => {
                assert!(matches!(error.kind, ErrorKind::BridgeDenied(_)));
            }
            other => panic!("expected runtime failure, got {:?}", other),
        }
    }
}
