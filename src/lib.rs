// uScript: featherweight sandboxed scripting engine.
//
// Copyright (C) 2020  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.
//
// A source program is re-parsed and re-compiled on every run: source
// text -> loose syntax tree -> operator folding -> bytecode program
// -> stack VM. The VM's only window onto the host is a fixed catalog
// of bridge routines, each gated by a capability tag. Rendering,
// state, and I/O all live behind that bridge; the engine itself emits
// nothing but a value, captured output lines, and diagnostics.

#[macro_use]
extern crate lazy_static;

pub mod bridge;
pub mod builder;
pub mod catalog;
pub mod codec;
pub mod compiler;
pub mod constant;
pub mod engine;
pub mod error;
pub mod fold;
pub mod guard;
pub mod ids;
pub mod ir;
pub mod opcode;
pub mod program;
pub mod span;
pub mod syntax;
pub mod value;
pub mod vm;

pub use crate::bridge::{ScriptContext, ScriptContextGuard};
pub use crate::catalog::{Capability, CapabilitySet};
pub use crate::engine::{
    build_preview, compile, compile_and_run, CompileOutcome, PreviewReport, RunFailure,
    RunOutcome, RunRequest,
};
pub use crate::guard::ExecutionLimits;
pub use crate::value::Value;
