// Stable 32-bit identifiers for everything the bytecode names.
//
// Every symbol the program refers to -- functions, struct types,
// fields, bridge routines, operators -- is addressed by a 32-bit
// FNV-1a hash of "<namespace>::<name>". The hash is deterministic
// across platforms and compact enough to ride in varint operands.
// The bridge catalog is static, so a collision there is a programming
// error fixed by renaming; user programs are small enough that
// collisions are not expected in practice.

use std::collections::HashMap;
use std::fmt;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

// The five hash namespaces. The short tags are part of the hash
// input, so they are load-bearing: changing one changes every id in
// that namespace.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    Function,
    Type,
    Field,
    Bridge,
    Operator,
}

impl Namespace {
    pub fn tag(self) -> &'static str {
        match self {
            Namespace::Function => "fn",
            Namespace::Type => "type",
            Namespace::Field => "field",
            Namespace::Bridge => "bridge",
            Namespace::Operator => "op",
        }
    }
}

pub fn fnv1a32(text: &str) -> u32 {
    let mut hash = FNV_OFFSET;
    for byte in text.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn hash_in(ns: Namespace, name: &str) -> u32 {
    let mut hash = FNV_OFFSET;
    for byte in ns.tag().bytes().chain("::".bytes()).chain(name.bytes()) {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

macro_rules! id_type {
    ($name:ident, $ns:expr) => {
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn of(name: &str) -> $name {
                $name(hash_in($ns, name))
            }

            pub fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}(0x{:08x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "0x{:08x}", self.0)
            }
        }
    };
}

id_type!(FunctionId, Namespace::Function);
id_type!(TypeId, Namespace::Type);
id_type!(FieldId, Namespace::Field);
id_type!(SymbolId, Namespace::Bridge);

impl SymbolId {
    // Operator symbols hash in their own namespace, keyed by the
    // operator's literal text.
    pub fn operator(text: &str) -> SymbolId {
        SymbolId(hash_in(Namespace::Operator, text))
    }
}

impl FieldId {
    // Field ids are qualified by the struct name. When the compiler
    // cannot infer the receiver type it falls back to the wildcard
    // form, which the VM resolves against the layout at runtime.
    pub fn qualified(struct_name: &str, field_name: &str) -> FieldId {
        FieldId::of(&format!("{}.{}", struct_name, field_name))
    }

    pub fn wildcard(field_name: &str) -> FieldId {
        FieldId::of(&format!("*.{}", field_name))
    }
}

// Caches name-to-id maps for the duration of one compilation so the
// compiler never hashes the same name twice.
#[derive(Default)]
pub struct SymbolTable {
    cache: HashMap<(Namespace, String), u32>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    pub fn intern(&mut self, ns: Namespace, name: &str) -> u32 {
        if let Some(id) = self.cache.get(&(ns, name.to_string())) {
            return *id;
        }
        let id = hash_in(ns, name);
        self.cache.insert((ns, name.to_string()), id);
        id
    }

    pub fn function(&mut self, name: &str) -> FunctionId {
        FunctionId(self.intern(Namespace::Function, name))
    }

    pub fn struct_type(&mut self, name: &str) -> TypeId {
        TypeId(self.intern(Namespace::Type, name))
    }

    pub fn field(&mut self, struct_name: &str, field_name: &str) -> FieldId {
        let qualified = format!("{}.{}", struct_name, field_name);
        FieldId(self.intern(Namespace::Field, &qualified))
    }

    pub fn bridge(&mut self, name: &str) -> SymbolId {
        SymbolId(self.intern(Namespace::Bridge, name))
    }

    pub fn operator(&mut self, text: &str) -> SymbolId {
        SymbolId(self.intern(Namespace::Operator, text))
    }
}
