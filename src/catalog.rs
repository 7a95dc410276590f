// The bridge symbol catalog and the capability policy that gates it.
//
// The catalog is the complete, static list of host routines bytecode
// may name. Admission is two conditions: the symbol is cataloged, and
// its capability tag is in the run's capability set. Anything else --
// including the dynamic.* symbols the compiler mints for unknown
// names -- is denied.

use std::collections::HashMap;

use enumflags2::BitFlags;

use crate::ids::SymbolId;

#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum Capability {
    FoundationBasic = 0b0001,
    DateFormatting = 0b0010,
    UiBasic = 0b0100,
    Diagnostics = 0b1000,
}

pub type CapabilitySet = BitFlags<Capability>;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CatalogEntry {
    pub symbol: SymbolId,
    pub name: &'static str,
    pub capability: Capability,
}

pub const OPERATORS: [&str; 11] =
    ["+", "-", "*", "/", "==", "<", ">", "<=", ">=", "&&", "||"];

// Bridge-namespace routines, by capability.
const FOUNDATION: [&str; 7] = [
    "print",
    "String.uppercased",
    "String.lowercased",
    "String.contains",
    "Int.init",
    "Double.init",
    "Bool.init",
];

const UI: [&str; 20] = [
    "Text",
    "Button",
    "VStack",
    "HStack",
    "Spacer",
    "Image",
    "TextField",
    "Toggle",
    "padding",
    "font",
    "foregroundStyle",
    "frame",
    "background",
    "onTap",
    "onAppear",
    "onChange",
    "State.init",
    "State.get",
    "State.set",
    "State.bind",
];

lazy_static! {
    static ref CATALOG: HashMap<SymbolId, CatalogEntry> = {
        let mut catalog = HashMap::new();
        let mut admit = |symbol: SymbolId, name: &'static str, capability: Capability| {
            let entry = CatalogEntry { symbol, name, capability };
            // The catalog is static; a collision here is a
            // programming error fixed by renaming the symbol.
            assert!(
                catalog.insert(symbol, entry).is_none(),
                "bridge catalog id collision on {}",
                name
            );
        };
        for name in FOUNDATION {
            admit(SymbolId::of(name), name, Capability::FoundationBasic);
        }
        for text in OPERATORS {
            admit(SymbolId::operator(text), text, Capability::FoundationBasic);
        }
        admit(SymbolId::of("Date.now"), "Date.now", Capability::DateFormatting);
        for name in UI {
            admit(SymbolId::of(name), name, Capability::UiBasic);
        }
        catalog
    };
}

pub fn lookup(symbol: SymbolId) -> Option<&'static CatalogEntry> {
    CATALOG.get(&symbol)
}

pub fn symbol_name(symbol: SymbolId) -> Option<&'static str> {
    lookup(symbol).map(|entry| entry.name)
}

pub struct SymbolPolicy;

impl SymbolPolicy {
    pub fn is_allowed(symbol: SymbolId, capabilities: CapabilitySet) -> bool {
        match lookup(symbol) {
            Some(entry) => capabilities.contains(entry.capability),
            None => false,
        }
    }
}

// Fixed name tables the compiler consults when lowering calls. A
// free-function name that is neither a user function nor a struct
// resolves here; unknown names fall through to the generic dynamic
// namespace (which the policy will deny at runtime).

pub fn free_function_symbol(name: &str) -> Option<SymbolId> {
    match name {
        "print" => Some(SymbolId::of("print")),
        "Text" | "Button" | "VStack" | "HStack" | "Spacer" | "Image" | "TextField"
        | "Toggle" => Some(SymbolId::of(name)),
        _ => None,
    }
}

// Names that lower to call_init rather than call_bridge: value
// coercions and the state-handle constructor.
pub fn initializer_symbol(name: &str) -> Option<SymbolId> {
    match name {
        "Int" => Some(SymbolId::of("Int.init")),
        "Double" => Some(SymbolId::of("Double.init")),
        "Bool" => Some(SymbolId::of("Bool.init")),
        "State" => Some(SymbolId::of("State.init")),
        _ => None,
    }
}

pub fn dynamic_symbol(name: &str) -> SymbolId {
    SymbolId::of(&format!("dynamic.{}", name))
}

pub fn method_symbol(name: &str) -> SymbolId {
    match name {
        "uppercased" => SymbolId::of("String.uppercased"),
        "lowercased" => SymbolId::of("String.lowercased"),
        "contains" => SymbolId::of("String.contains"),
        "get" => SymbolId::of("State.get"),
        "set" => SymbolId::of("State.set"),
        "padding" | "font" | "foregroundStyle" | "frame" | "background" | "onTap"
        | "onAppear" | "onChange" => SymbolId::of(name),
        name if name.starts_with("bind") => SymbolId::of("State.bind"),
        other => SymbolId::of(&format!("dynamic.method.{}", other)),
    }
}

// Recognized nullary static members, e.g. Date.now.
pub fn static_member_symbol(base: &str, member: &str) -> Option<SymbolId> {
    match (base, member) {
        ("Date", "now") => Some(SymbolId::of("Date.now")),
        _ => None,
    }
}
