//! Type system for Bismut
//!
//! Every type is either **value kind** (primitives, enums, structs,
//! tuples, function pointers) or **reference kind** (str, List, Dict,
//! classes, interfaces, extern opaques, None). The partition decides
//! assignment semantics, ARC insertion, truthiness legality, dict-key
//! legality and struct-field legality, and is preserved through every
//! stage of the pipeline.

use std::collections::HashMap;
use std::fmt;

/// The twelve primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Prim {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Void,
}

impl Prim {
    /// Parse a primitive type name; `None` for anything else.
    pub fn from_name(name: &str) -> Option<Prim> {
        match name {
            "i8" => Some(Prim::I8),
            "i16" => Some(Prim::I16),
            "i32" => Some(Prim::I32),
            "i64" => Some(Prim::I64),
            "u8" => Some(Prim::U8),
            "u16" => Some(Prim::U16),
            "u32" => Some(Prim::U32),
            "u64" => Some(Prim::U64),
            "f32" => Some(Prim::F32),
            "f64" => Some(Prim::F64),
            "bool" => Some(Prim::Bool),
            "void" => Some(Prim::Void),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Prim::I8 => "i8",
            Prim::I16 => "i16",
            Prim::I32 => "i32",
            Prim::I64 => "i64",
            Prim::U8 => "u8",
            Prim::U16 => "u16",
            Prim::U32 => "u32",
            Prim::U64 => "u64",
            Prim::F32 => "f32",
            Prim::F64 => "f64",
            Prim::Bool => "bool",
            Prim::Void => "void",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Prim::I8
                | Prim::I16
                | Prim::I32
                | Prim::I64
                | Prim::U8
                | Prim::U16
                | Prim::U32
                | Prim::U64
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Prim::I8 | Prim::I16 | Prim::I32 | Prim::I64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Prim::F32 | Prim::F64)
    }

    /// Whether an integer literal value fits this integer type.
    ///
    /// Non-decimal literals are treated as bit patterns, so `0xFF` fits
    /// `u8` and `0xFFFFFFFFFFFFFFFF` fits `u64` even though the stored
    /// i64 is negative.
    pub fn fits_literal(&self, value: i64, radix: u32) -> bool {
        match self {
            Prim::I8 => (-128..=127).contains(&value),
            Prim::I16 => (-32768..=32767).contains(&value),
            Prim::I32 => (i32::MIN as i64..=i32::MAX as i64).contains(&value),
            Prim::I64 => true,
            Prim::U8 => (0..=0xFF).contains(&value),
            Prim::U16 => (0..=0xFFFF).contains(&value),
            Prim::U32 => (0..=0xFFFF_FFFF).contains(&value),
            Prim::U64 => value >= 0 || radix != 10,
            _ => false,
        }
    }
}

/// A resolved Bismut type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Prim(Prim),
    Str,
    List(Box<Type>),
    Dict(Box<Type>, Box<Type>),
    /// Value-kind tuple, two or more elements
    Tuple(Vec<Type>),
    /// Pointer to a top-level function; no captures
    FnPtr { params: Vec<Type>, ret: Box<Type> },
    Class(String),
    Interface(String),
    Struct(String),
    /// Representationally i64
    Enum(String),
    /// Refcounted wrapper around an opaque native handle
    Extern { lib: String, name: String },
    /// Bottom for reference types; the type of the `None` literal
    None,
    /// A generic parameter, only inside generic function bodies
    Generic(String),
}

impl Type {
    pub const I64: Type = Type::Prim(Prim::I64);
    pub const F64: Type = Type::Prim(Prim::F64);
    pub const BOOL: Type = Type::Prim(Prim::Bool);
    pub const VOID: Type = Type::Prim(Prim::Void);

    /// Reference kind: str, containers, classes, interfaces, extern
    /// opaques, and the None bottom.
    pub fn is_ref_kind(&self) -> bool {
        matches!(
            self,
            Type::Str
                | Type::List(_)
                | Type::Dict(_, _)
                | Type::Class(_)
                | Type::Interface(_)
                | Type::Extern { .. }
                | Type::None
        )
    }

    pub fn is_value_kind(&self) -> bool {
        !self.is_ref_kind() && !matches!(self, Type::Generic(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Prim(p) if p.is_integer())
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Prim(p) if p.is_float())
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Prim(Prim::Void))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Type::Prim(Prim::Bool))
    }

    /// Dict keys: integer types, str, bool, or enums.
    pub fn is_dict_key(&self) -> bool {
        match self {
            Type::Prim(p) => p.is_integer() || *p == Prim::Bool,
            Type::Str | Type::Enum(_) => true,
            _ => false,
        }
    }

    /// Legal in a truthiness context: bool, any integer or enum, any
    /// reference kind. Floats, structs, tuples and fn pointers are not.
    pub fn is_truthy(&self) -> bool {
        match self {
            Type::Prim(p) => *p == Prim::Bool || p.is_integer(),
            Type::Enum(_) => true,
            t => t.is_ref_kind(),
        }
    }

    /// Whether the type mentions a generic parameter anywhere.
    pub fn has_generic(&self) -> bool {
        match self {
            Type::Generic(_) => true,
            Type::List(t) => t.has_generic(),
            Type::Dict(k, v) => k.has_generic() || v.has_generic(),
            Type::Tuple(items) => items.iter().any(Type::has_generic),
            Type::FnPtr { params, ret } => {
                params.iter().any(Type::has_generic) || ret.has_generic()
            }
            _ => false,
        }
    }

    /// Substitute generic parameters using `bindings`.
    pub fn substitute(&self, bindings: &HashMap<String, Type>) -> Type {
        match self {
            Type::Generic(name) => bindings.get(name).cloned().unwrap_or_else(|| self.clone()),
            Type::List(t) => Type::List(Box::new(t.substitute(bindings))),
            Type::Dict(k, v) => Type::Dict(
                Box::new(k.substitute(bindings)),
                Box::new(v.substitute(bindings)),
            ),
            Type::Tuple(items) => {
                Type::Tuple(items.iter().map(|t| t.substitute(bindings)).collect())
            }
            Type::FnPtr { params, ret } => Type::FnPtr {
                params: params.iter().map(|t| t.substitute(bindings)).collect(),
                ret: Box::new(ret.substitute(bindings)),
            },
            _ => self.clone(),
        }
    }

    /// Deterministic fingerprint naming this type's emitted C expansion.
    ///
    /// Used for container instantiations (`List_i64`, `Dict_str_i64`),
    /// tuple typedefs (`Tup2_i64_str`) and monomorphization suffixes.
    pub fn tag(&self) -> String {
        match self {
            Type::Prim(p) => p.name().to_string(),
            Type::Str => "str".to_string(),
            Type::List(t) => format!("List_{}", t.tag()),
            Type::Dict(k, v) => format!("Dict_{}_{}", k.tag(), v.tag()),
            Type::Tuple(items) => {
                let mut tag = format!("Tup{}", items.len());
                for t in items {
                    tag.push('_');
                    tag.push_str(&t.tag());
                }
                tag
            }
            Type::FnPtr { params, ret } => {
                let mut tag = format!("Fn{}", params.len());
                for t in params {
                    tag.push('_');
                    tag.push_str(&t.tag());
                }
                tag.push_str("_r_");
                tag.push_str(&ret.tag());
                tag
            }
            Type::Class(name) | Type::Interface(name) | Type::Struct(name) | Type::Enum(name) => {
                name.clone()
            }
            Type::Extern { lib, name } => format!("Ext_{}__{}", lib, name),
            Type::None => "None".to_string(),
            Type::Generic(name) => name.clone(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Prim(p) => write!(f, "{}", p.name()),
            Type::Str => write!(f, "str"),
            Type::List(t) => write!(f, "List[{}]", t),
            Type::Dict(k, v) => write!(f, "Dict[{}, {}]", k, v),
            Type::Tuple(items) => {
                write!(f, "(")?;
                for (i, t) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ")")
            }
            Type::FnPtr { params, ret } => {
                write!(f, "def(")?;
                for (i, t) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ") -> {}", ret)
            }
            Type::Class(name)
            | Type::Interface(name)
            | Type::Struct(name)
            | Type::Enum(name)
            | Type::Generic(name) => write!(f, "{}", name),
            Type::Extern { name, .. } => write!(f, "{}", name),
            Type::None => write!(f, "None"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_partition() {
        assert!(Type::Str.is_ref_kind());
        assert!(Type::List(Box::new(Type::I64)).is_ref_kind());
        assert!(Type::Class("Foo".into()).is_ref_kind());
        assert!(Type::Interface("IFoo".into()).is_ref_kind());
        assert!(Type::None.is_ref_kind());

        assert!(Type::I64.is_value_kind());
        assert!(Type::Enum("Color".into()).is_value_kind());
        assert!(Type::Struct("Point".into()).is_value_kind());
        assert!(Type::Tuple(vec![Type::I64, Type::Str]).is_value_kind());
    }

    #[test]
    fn test_dict_key_legality() {
        assert!(Type::I64.is_dict_key());
        assert!(Type::Prim(Prim::U8).is_dict_key());
        assert!(Type::Str.is_dict_key());
        assert!(Type::BOOL.is_dict_key());
        assert!(Type::Enum("Color".into()).is_dict_key());
        assert!(!Type::F64.is_dict_key());
        assert!(!Type::Class("Foo".into()).is_dict_key());
        assert!(!Type::Tuple(vec![Type::I64, Type::I64]).is_dict_key());
    }

    #[test]
    fn test_truthiness_legality() {
        assert!(Type::BOOL.is_truthy());
        assert!(Type::Prim(Prim::U16).is_truthy());
        assert!(Type::Enum("Color".into()).is_truthy());
        assert!(Type::Str.is_truthy());
        assert!(!Type::F64.is_truthy());
        assert!(!Type::Struct("Point".into()).is_truthy());
        assert!(!Type::Tuple(vec![Type::I64, Type::I64]).is_truthy());
        assert!(!Type::FnPtr {
            params: vec![],
            ret: Box::new(Type::VOID)
        }
        .is_truthy());
    }

    #[test]
    fn test_literal_fit() {
        assert!(Prim::I8.fits_literal(127, 10));
        assert!(!Prim::I8.fits_literal(128, 10));
        assert!(Prim::U8.fits_literal(255, 16));
        assert!(!Prim::U8.fits_literal(-1, 10));
        assert!(Prim::I64.fits_literal(i64::MIN, 10));
        assert!(Prim::U64.fits_literal(-1, 16)); // 0xFFFF... bit pattern
        assert!(!Prim::U64.fits_literal(-1, 10));
    }

    #[test]
    fn test_tags_deterministic() {
        let list = Type::List(Box::new(Type::I64));
        assert_eq!(list.tag(), "List_i64");
        let dict = Type::Dict(Box::new(Type::Str), Box::new(list.clone()));
        assert_eq!(dict.tag(), "Dict_str_List_i64");
        let tup = Type::Tuple(vec![Type::I64, Type::Str]);
        assert_eq!(tup.tag(), "Tup2_i64_str");
        let f = Type::FnPtr {
            params: vec![Type::I64],
            ret: Box::new(Type::BOOL),
        };
        assert_eq!(f.tag(), "Fn1_i64_r_bool");
    }

    #[test]
    fn test_substitute() {
        let mut bindings = HashMap::new();
        bindings.insert("T".to_string(), Type::Str);
        let t = Type::List(Box::new(Type::Generic("T".into())));
        assert_eq!(t.substitute(&bindings), Type::List(Box::new(Type::Str)));
        assert!(t.has_generic());
        assert!(!t.substitute(&bindings).has_generic());
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::Dict(Box::new(Type::Str), Box::new(Type::I64)).to_string(), "Dict[str, i64]");
        assert_eq!(Type::Tuple(vec![Type::I64, Type::Str]).to_string(), "(i64, str)");
        assert_eq!(
            Type::FnPtr {
                params: vec![Type::I64],
                ret: Box::new(Type::Str)
            }
            .to_string(),
            "def(i64) -> str"
        );
    }
}
