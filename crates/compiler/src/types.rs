//! Type model for the C subset.
//!
//! [`Type`] covers scalars, pointers, arrays, functions, and tagged
//! aggregates. Aggregate member layout is not stored here: struct and
//! union tags are resolved through the symbol table, where the analyzer
//! records computed layouts. Scalar sizing depends on the [`Target`]
//! word width (ILP32 on x86-32, LP64 on x86-64).

use crate::ast::Expr;
use std::fmt;

/// Code generation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub x86_64: bool,
}

impl Target {
    pub fn word_size(self) -> u64 {
        if self.x86_64 {
            8
        } else {
            4
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Void,
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LLong,
    ULLong,
    Float,
    Double,
    LDouble,
    FloatComplex,
    DoubleComplex,
    LDoubleComplex,
    Ptr(Box<Type>),
    Array {
        elem: Box<Type>,
        /// Evaluated element count; `None` while incomplete (`[]`, `[*]`,
        /// or a VLA whose size is not a constant)
        len: Option<u64>,
        /// Unevaluated size expression for VLAs
        size_expr: Option<Box<Expr>>,
    },
    Func {
        ret: Box<Type>,
        params: Vec<Type>,
        variadic: bool,
    },
    Struct(String),
    Union(String),
    Enum(String),
}

impl Type {
    pub fn array_of(elem: Type, len: Option<u64>) -> Type {
        Type::Array {
            elem: Box::new(elem),
            len,
            size_expr: None,
        }
    }

    pub fn ptr_to(inner: Type) -> Type {
        Type::Ptr(Box::new(inner))
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Type::Bool
                | Type::Char
                | Type::UChar
                | Type::Short
                | Type::UShort
                | Type::Int
                | Type::UInt
                | Type::Long
                | Type::ULong
                | Type::LLong
                | Type::ULLong
                | Type::Enum(_)
        )
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            Type::Bool | Type::UChar | Type::UShort | Type::UInt | Type::ULong | Type::ULLong
        )
    }

    /// Real floating types (not complex).
    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float | Type::Double | Type::LDouble)
    }

    pub fn is_complex(&self) -> bool {
        matches!(
            self,
            Type::FloatComplex | Type::DoubleComplex | Type::LDoubleComplex
        )
    }

    pub fn is_arith(&self) -> bool {
        self.is_integer() || self.is_float() || self.is_complex()
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array { .. })
    }

    pub fn is_func(&self) -> bool {
        matches!(self, Type::Func { .. })
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Struct(_) | Type::Union(_))
    }

    /// Pointee of a pointer, element of an array.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Ptr(inner) => Some(inner),
            Type::Array { elem, .. } => Some(elem),
            _ => None,
        }
    }

    /// Array-to-pointer and function-to-pointer decay for expression use.
    pub fn decay(&self) -> Type {
        match self {
            Type::Array { elem, .. } => Type::Ptr(elem.clone()),
            Type::Func { .. } => Type::Ptr(Box::new(self.clone())),
            other => other.clone(),
        }
    }

    /// Size in bytes for non-aggregate types; `None` for struct/union,
    /// incomplete arrays, and functions.
    pub fn scalar_size(&self, target: Target) -> Option<u64> {
        Some(match self {
            Type::Void => 1,
            Type::Bool | Type::Char | Type::UChar => 1,
            Type::Short | Type::UShort => 2,
            Type::Int | Type::UInt | Type::Enum(_) => 4,
            Type::Long | Type::ULong => target.word_size(),
            Type::LLong | Type::ULLong => 8,
            Type::Float => 4,
            Type::Double => 8,
            Type::LDouble => {
                if target.x86_64 {
                    16
                } else {
                    12
                }
            }
            Type::FloatComplex => 8,
            Type::DoubleComplex => 16,
            Type::LDoubleComplex => {
                if target.x86_64 {
                    32
                } else {
                    24
                }
            }
            Type::Ptr(_) => target.word_size(),
            Type::Array { elem, len, .. } => {
                let n = (*len)?;
                elem.scalar_size(target)? * n
            }
            Type::Func { .. } | Type::Struct(_) | Type::Union(_) => return None,
        })
    }

    /// Natural alignment for non-aggregate types.
    ///
    /// On x86-32 the SysV psABI caps member alignment of 8-byte scalars
    /// at 4 bytes.
    pub fn scalar_align(&self, target: Target) -> Option<u64> {
        let align = match self {
            Type::Array { elem, .. } => elem.scalar_align(target)?,
            Type::FloatComplex => 4,
            Type::DoubleComplex => 8,
            Type::LDoubleComplex | Type::LDouble => {
                if target.x86_64 {
                    16
                } else {
                    4
                }
            }
            other => other.scalar_size(target)?,
        };
        if target.x86_64 {
            Some(align)
        } else {
            Some(align.min(4))
        }
    }

    /// Integer conversion rank, higher binds in usual arithmetic
    /// conversions.
    fn rank(&self) -> u32 {
        match self {
            Type::Bool => 1,
            Type::Char | Type::UChar => 2,
            Type::Short | Type::UShort => 3,
            Type::Int | Type::UInt | Type::Enum(_) => 4,
            Type::Long | Type::ULong => 5,
            Type::LLong | Type::ULLong => 6,
            _ => 0,
        }
    }

    /// Integer promotion: anything narrower than `int` widens to `int`.
    pub fn promoted(&self) -> Type {
        if self.is_integer() && self.rank() < Type::Int.rank() {
            Type::Int
        } else if let Type::Enum(_) = self {
            Type::Int
        } else {
            self.clone()
        }
    }

    fn unsigned_variant(&self) -> Type {
        match self {
            Type::Int => Type::UInt,
            Type::Long => Type::ULong,
            Type::LLong => Type::ULLong,
            other => other.clone(),
        }
    }

    /// Usual arithmetic conversions over two operand types.
    ///
    /// Floating contagion first (long double > double > float), then
    /// integer promotion, rank contagion, and unsigned contagion at
    /// equal rank.
    pub fn usual_arith(lhs: &Type, rhs: &Type) -> Type {
        for f in [Type::LDoubleComplex, Type::DoubleComplex, Type::FloatComplex] {
            if *lhs == f || *rhs == f {
                return f;
            }
        }
        for f in [Type::LDouble, Type::Double, Type::Float] {
            if *lhs == f || *rhs == f {
                return f;
            }
        }
        let l = lhs.promoted();
        let r = rhs.promoted();
        if l == r {
            return l;
        }
        let (hi, lo) = if l.rank() >= r.rank() { (l, r) } else { (r, l) };
        if hi.is_unsigned() || !lo.is_unsigned() {
            hi
        } else if hi.rank() > lo.rank() {
            // Signed type of higher rank can represent all values of the
            // lower-rank unsigned type at these widths only when wider.
            hi
        } else {
            hi.unsigned_variant()
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "_Bool"),
            Type::Char => write!(f, "char"),
            Type::UChar => write!(f, "unsigned char"),
            Type::Short => write!(f, "short"),
            Type::UShort => write!(f, "unsigned short"),
            Type::Int => write!(f, "int"),
            Type::UInt => write!(f, "unsigned int"),
            Type::Long => write!(f, "long"),
            Type::ULong => write!(f, "unsigned long"),
            Type::LLong => write!(f, "long long"),
            Type::ULLong => write!(f, "unsigned long long"),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::LDouble => write!(f, "long double"),
            Type::FloatComplex => write!(f, "float _Complex"),
            Type::DoubleComplex => write!(f, "double _Complex"),
            Type::LDoubleComplex => write!(f, "long double _Complex"),
            Type::Ptr(inner) => write!(f, "{} *", inner),
            Type::Array { elem, len, .. } => match len {
                Some(n) => write!(f, "{}[{}]", elem, n),
                None => write!(f, "{}[]", elem),
            },
            Type::Func { ret, params, variadic } => {
                write!(f, "{} (", ret)?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                if *variadic {
                    if !params.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "...")?;
                }
                write!(f, ")")
            }
            Type::Struct(tag) => write!(f, "struct {}", tag),
            Type::Union(tag) => write!(f, "union {}", tag),
            Type::Enum(tag) => write!(f, "enum {}", tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T32: Target = Target { x86_64: false };
    const T64: Target = Target { x86_64: true };

    #[test]
    fn test_scalar_sizes_follow_target() {
        assert_eq!(Type::Int.scalar_size(T32), Some(4));
        assert_eq!(Type::Int.scalar_size(T64), Some(4));
        assert_eq!(Type::Long.scalar_size(T32), Some(4));
        assert_eq!(Type::Long.scalar_size(T64), Some(8));
        assert_eq!(Type::ptr_to(Type::Char).scalar_size(T32), Some(4));
        assert_eq!(Type::ptr_to(Type::Char).scalar_size(T64), Some(8));
        assert_eq!(Type::LDouble.scalar_size(T32), Some(12));
        assert_eq!(Type::LDouble.scalar_size(T64), Some(16));
    }

    #[test]
    fn test_array_size_multiplies() {
        let a = Type::array_of(Type::Int, Some(3));
        assert_eq!(a.scalar_size(T64), Some(12));
        let incomplete = Type::array_of(Type::Int, None);
        assert_eq!(incomplete.scalar_size(T64), None);
    }

    #[test]
    fn test_integer_promotion() {
        assert_eq!(Type::Char.promoted(), Type::Int);
        assert_eq!(Type::UShort.promoted(), Type::Int);
        assert_eq!(Type::UInt.promoted(), Type::UInt);
        assert_eq!(Type::Enum("e".into()).promoted(), Type::Int);
    }

    #[test]
    fn test_usual_arith_contagion() {
        assert_eq!(Type::usual_arith(&Type::Char, &Type::Char), Type::Int);
        assert_eq!(Type::usual_arith(&Type::Int, &Type::UInt), Type::UInt);
        assert_eq!(Type::usual_arith(&Type::Int, &Type::Long), Type::Long);
        assert_eq!(Type::usual_arith(&Type::ULong, &Type::LLong), Type::LLong);
        assert_eq!(Type::usual_arith(&Type::Int, &Type::Double), Type::Double);
        assert_eq!(
            Type::usual_arith(&Type::Float, &Type::DoubleComplex),
            Type::DoubleComplex
        );
    }

    #[test]
    fn test_decay() {
        let a = Type::array_of(Type::Int, Some(4));
        assert_eq!(a.decay(), Type::ptr_to(Type::Int));
        let func = Type::Func {
            ret: Box::new(Type::Void),
            params: vec![],
            variadic: false,
        };
        assert_eq!(func.decay(), Type::ptr_to(func.clone()));
    }

    #[test]
    fn test_i386_alignment_cap() {
        assert_eq!(Type::Double.scalar_align(T32), Some(4));
        assert_eq!(Type::Double.scalar_align(T64), Some(8));
        assert_eq!(Type::LLong.scalar_align(T32), Some(4));
    }
}
