// (C) 2020 Brandon Lewis
//
// The runtime value universe. This is a closed sum: every shape the
// VM can ever see is one of these variants, and host-typed objects
// funnel through Native, which the VM never inspects. Aggregates are
// Rc-shared and immutable; "mutation" of a struct field always
// produces a fresh instance (copy-on-write at the value level).

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::error::ErrorKind;
use crate::ids::{FieldId, TypeId};

// Opaque host-owned reference. Equality is identity; every operator
// over a native value is a type error by design of the catalog.
#[derive(Clone)]
pub struct NativeValue(pub Rc<dyn Any>);

impl NativeValue {
    pub fn new<T: Any>(value: T) -> NativeValue {
        NativeValue(Rc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<native>")
    }
}

impl PartialEq for NativeValue {
    fn eq(&self, other: &NativeValue) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructValue {
    pub type_id: TypeId,
    pub fields: Rc<HashMap<FieldId, Value>>,
}

impl StructValue {
    pub fn new(type_id: TypeId, fields: HashMap<FieldId, Value>) -> StructValue {
        StructValue { type_id, fields: Rc::new(fields) }
    }

    pub fn get(&self, field: FieldId) -> Option<&Value> {
        self.fields.get(&field)
    }

    // Copy-on-write: the old instance is untouched, callers rebind.
    pub fn with_field(&self, field: FieldId, value: Value) -> StructValue {
        let mut fields: HashMap<FieldId, Value> = (*self.fields).clone();
        fields.insert(field, value);
        StructValue { type_id: self.type_id, fields: Rc::new(fields) }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Nil,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Rc<String>),
    List(Rc<Vec<Value>>),
    Dict(Rc<BTreeMap<String, Value>>),
    Native(NativeValue),
    Struct(StructValue),
}

// Factors out the boiler plate in operator method implementations.
// Each matcher lists the white-list of operand shapes the operator
// accepts; anything else is a type mismatch carrying the operator's
// surface spelling.
macro_rules! operator {
    ($name:ident, $text:literal { $( $p:pat => $e:expr ),+ $(,)? } ) => {
        pub fn $name(&self, other: &Value) -> Result<Value, ErrorKind> {
            use Value::*;
            #[allow(unreachable_patterns)]
            match (self, other) {
                $($p => $e),+ ,
                (a, b) => Err(ErrorKind::TypeMismatch {
                    operation: $text.to_string(),
                    lhs: a.type_name(),
                    rhs: b.type_name(),
                })
            }
        }
    };
}

impl Value {
    pub fn str(text: impl Into<String>) -> Value {
        Value::Str(Rc::new(text.into()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(items))
    }

    pub fn dict(entries: BTreeMap<String, Value>) -> Value {
        Value::Dict(Rc::new(entries))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "none",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::List(_) => "array",
            Value::Dict(_) => "dict",
            Value::Native(_) => "native",
            Value::Struct(_) => "struct",
        }
    }

    // The truthiness table used by conditional jumps: none is false,
    // numbers are non-zero, aggregates are non-empty, native and
    // struct instances are always true.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(v) => !v.is_empty(),
            Value::List(v) => !v.is_empty(),
            Value::Dict(v) => !v.is_empty(),
            Value::Native(_) => true,
            Value::Struct(_) => true,
        }
    }

    operator! { add, "+" {
        (Int(a), Int(b)) => Ok(Int(a.wrapping_add(*b))),
        (Float(a), Float(b)) => Ok(Float(a + b)),
        (Int(a), Float(b)) => Ok(Float(*a as f64 + b)),
        (Float(a), Int(b)) => Ok(Float(a + *b as f64)),
        (Str(a), Str(b)) => Ok(Value::str(format!("{}{}", a, b))),
    } }

    operator! { sub, "-" {
        (Int(a), Int(b)) => Ok(Int(a.wrapping_sub(*b))),
        (Float(a), Float(b)) => Ok(Float(a - b)),
        (Int(a), Float(b)) => Ok(Float(*a as f64 - b)),
        (Float(a), Int(b)) => Ok(Float(a - *b as f64)),
    } }

    operator! { mul, "*" {
        (Int(a), Int(b)) => Ok(Int(a.wrapping_mul(*b))),
        (Float(a), Float(b)) => Ok(Float(a * b)),
        (Int(a), Float(b)) => Ok(Float(*a as f64 * b)),
        (Float(a), Int(b)) => Ok(Float(a * *b as f64)),
    } }

    operator! { div, "/" {
        (Int(a), Int(b)) => a.checked_div(*b).map(Int).ok_or(ErrorKind::DivisionByZero),
        (Float(a), Float(b)) => Ok(Float(a / b)),
        (Int(a), Float(b)) => Ok(Float(*a as f64 / b)),
        (Float(a), Int(b)) => Ok(Float(a / *b as f64)),
    } }

    operator! { lt, "<" {
        (Int(a), Int(b)) => Ok(Bool(a < b)),
        (Float(a), Float(b)) => Ok(Bool(a < b)),
        (Int(a), Float(b)) => Ok(Bool((*a as f64) < *b)),
        (Float(a), Int(b)) => Ok(Bool(*a < *b as f64)),
        (Str(a), Str(b)) => Ok(Bool(a < b)),
    } }

    operator! { gt, ">" {
        (Int(a), Int(b)) => Ok(Bool(a > b)),
        (Float(a), Float(b)) => Ok(Bool(a > b)),
        (Int(a), Float(b)) => Ok(Bool((*a as f64) > *b)),
        (Float(a), Int(b)) => Ok(Bool(*a > *b as f64)),
        (Str(a), Str(b)) => Ok(Bool(a > b)),
    } }

    operator! { lte, "<=" {
        (Int(a), Int(b)) => Ok(Bool(a <= b)),
        (Float(a), Float(b)) => Ok(Bool(a <= b)),
        (Int(a), Float(b)) => Ok(Bool((*a as f64) <= *b)),
        (Float(a), Int(b)) => Ok(Bool(*a <= *b as f64)),
        (Str(a), Str(b)) => Ok(Bool(a <= b)),
    } }

    operator! { gte, ">=" {
        (Int(a), Int(b)) => Ok(Bool(a >= b)),
        (Float(a), Float(b)) => Ok(Bool(a >= b)),
        (Int(a), Float(b)) => Ok(Bool((*a as f64) >= *b)),
        (Float(a), Int(b)) => Ok(Bool(*a >= *b as f64)),
        (Str(a), Str(b)) => Ok(Bool(a >= b)),
    } }

    // Equality is structural within a kind and false across kinds;
    // it only raises when a native value is involved.
    pub fn eq_value(&self, other: &Value) -> Result<Value, ErrorKind> {
        match (self, other) {
            (Value::Native(_), _) | (_, Value::Native(_)) => Err(ErrorKind::TypeMismatch {
                operation: "==".to_string(),
                lhs: self.type_name(),
                rhs: other.type_name(),
            }),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Bool(*a as f64 == *b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Bool(*a == *b as f64)),
            (a, b) if std::mem::discriminant(a) == std::mem::discriminant(b) => {
                Ok(Value::Bool(a == b))
            }
            _ => Ok(Value::Bool(false)),
        }
    }

    // Logical operators are ordinary bridge calls, so both operands
    // are already evaluated; the result is plain truthiness.
    pub fn and_value(&self, other: &Value) -> Result<Value, ErrorKind> {
        self.logical("&&", other, |a, b| a && b)
    }

    pub fn or_value(&self, other: &Value) -> Result<Value, ErrorKind> {
        self.logical("||", other, |a, b| a || b)
    }

    fn logical(
        &self,
        text: &str,
        other: &Value,
        combine: fn(bool, bool) -> bool,
    ) -> Result<Value, ErrorKind> {
        if matches!(self, Value::Native(_)) || matches!(other, Value::Native(_)) {
            return Err(ErrorKind::TypeMismatch {
                operation: text.to_string(),
                lhs: self.type_name(),
                rhs: other.type_name(),
            });
        }
        Ok(Value::Bool(combine(self.truthy(), other.truthy())))
    }

    pub fn expect_str(&self) -> Result<&str, ErrorKind> {
        match self {
            Value::Str(s) => Ok(s.as_str()),
            other => Err(ErrorKind::TypeError { expected: "string", got: other.type_name() }),
        }
    }

    pub fn expect_struct(&self) -> Result<&StructValue, ErrorKind> {
        match self {
            Value::Struct(s) => Ok(s),
            other => Err(ErrorKind::NotAStruct(other.type_name())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "none"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Native(_) => write!(f, "<native>"),
            Value::Struct(s) => write!(f, "<struct {}>", s.type_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_arithmetic_promotes_mixed_numerics() {
        assert_eq!(Value::Int(2).add(&Value::Int(3)), Ok(Value::Int(5)));
        assert_eq!(Value::Int(2).add(&Value::Float(0.5)), Ok(Value::Float(2.5)));
        assert_eq!(Value::Float(1.5).mul(&Value::Int(2)), Ok(Value::Float(3.0)));
    }

    #[test]
    fn test_string_concat() {
        assert_eq!(
            Value::str("vi").add(&Value::str("be")),
            Ok(Value::str("vibe"))
        );
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        assert_eq!(
            Value::Int(1).div(&Value::Int(0)),
            Err(ErrorKind::DivisionByZero)
        );
        // Float division follows IEEE semantics.
        assert_eq!(
            Value::Float(1.0).div(&Value::Float(0.0)),
            Ok(Value::Float(f64::INFINITY))
        );
    }

    #[test]
    fn test_operator_whitelist() {
        let err = Value::Bool(true).add(&Value::Int(1));
        assert!(matches!(err, Err(ErrorKind::TypeMismatch { .. })));
    }

    #[test]
    fn test_equality_across_kinds_is_false() {
        assert_eq!(
            Value::Int(1).eq_value(&Value::str("1")),
            Ok(Value::Bool(false))
        );
        assert_eq!(
            Value::Int(1).eq_value(&Value::Float(1.0)),
            Ok(Value::Bool(true))
        );
    }

    #[test]
    fn test_native_operators_raise() {
        let native = Value::Native(NativeValue::new(7_u8));
        assert!(native.eq_value(&native.clone()).is_err());
        assert!(native.add(&Value::Int(1)).is_err());
        assert!(native.and_value(&Value::Bool(true)).is_err());
        // But truthiness is defined: native is always true.
        assert!(native.truthy());
    }

    #[test]
    fn test_truthiness_table() {
        assert!(!Value::Nil.truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::Int(-1).truthy());
        assert!(!Value::str("").truthy());
        assert!(Value::str("x").truthy());
        assert!(!Value::list(vec![]).truthy());
        assert!(Value::list(vec![Value::Nil]).truthy());
        assert!(Value::Struct(StructValue::new(TypeId::of("P"), HashMap::new())).truthy());
    }

    #[test]
    fn test_struct_set_is_copy_on_write() {
        let field = FieldId::qualified("Point", "x");
        let first = StructValue::new(TypeId::of("Point"), HashMap::new());
        let second = first.with_field(field, Value::Int(9));
        assert!(first.get(field).is_none());
        assert_eq!(second.get(field), Some(&Value::Int(9)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Nil.to_string(), "none");
        assert_eq!(Value::str("VIBE").to_string(), "VIBE");
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::Bool(true)]).to_string(),
            "[1, true]"
        );
    }
}
