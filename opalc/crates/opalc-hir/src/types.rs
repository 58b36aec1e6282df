//! Type model consumed by the lowering core.
//!
//! Types arrive fully inferred from the type-checking phase; the lowering
//! core only inspects them (primitive classification, field projection,
//! cast legality) and never unifies or infers.

use opalc_util::Symbol;
use std::fmt;

/// Primitive ("core") types, kept flat so cast legality tables stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreType {
    U8,
    U16,
    U32,
    U64,
    U128,
    Usize,
    I8,
    I16,
    I32,
    I64,
    I128,
    Isize,
    F32,
    F64,
    Bool,
    Char,
    Str,
}

impl CoreType {
    pub fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            CoreType::U8
                | CoreType::U16
                | CoreType::U32
                | CoreType::U64
                | CoreType::U128
                | CoreType::Usize
        )
    }

    pub fn is_signed_integer(self) -> bool {
        matches!(
            self,
            CoreType::I8
                | CoreType::I16
                | CoreType::I32
                | CoreType::I64
                | CoreType::I128
                | CoreType::Isize
        )
    }

    pub fn is_integer(self) -> bool {
        self.is_unsigned_integer() || self.is_signed_integer()
    }

    pub fn is_float(self) -> bool {
        matches!(self, CoreType::F32 | CoreType::F64)
    }
}

/// Borrow kind, shared between reference types, raw pointers, and MIR borrows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorrowKind {
    Shared,
    Unique,
}

/// Function ABI; intrinsics are recognised by ABI string in the original
/// surface syntax, here by variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Abi {
    Rust,
    RustIntrinsic,
    PlatformIntrinsic,
    C,
}

/// A plain item path: ordered interned components.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SimplePath {
    pub components: Vec<Symbol>,
}

impl SimplePath {
    pub fn new(components: &[&str]) -> Self {
        Self {
            components: components.iter().map(|c| Symbol::intern(c)).collect(),
        }
    }

    /// Last component (item or variant name). Panics on an empty path, which
    /// never leaves the name resolver.
    pub fn last(&self) -> Symbol {
        *self
            .components
            .last()
            .expect("SimplePath with no components")
    }

    /// The path with the last component removed.
    pub fn parent(&self) -> SimplePath {
        let mut components = self.components.clone();
        components.pop();
        SimplePath { components }
    }
}

impl fmt::Debug for SimplePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for SimplePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.components.iter().enumerate() {
            if i != 0 {
                write!(f, "::")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// A path with type parameters applied, e.g. `Option<i32>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericPath {
    pub path: SimplePath,
    pub params: Vec<Type>,
}

impl GenericPath {
    pub fn new(path: SimplePath, params: Vec<Type>) -> Self {
        Self { path, params }
    }

    pub fn plain(path: SimplePath) -> Self {
        Self {
            path,
            params: Vec::new(),
        }
    }
}

impl fmt::Display for GenericPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        if !self.params.is_empty() {
            write!(f, "<")?;
            for (i, t) in self.params.iter().enumerate() {
                if i != 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:?}", t)?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}

/// A possibly-UFCS path, as used for call targets and associated constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Path {
    Simple(GenericPath),
    /// `<Ty as Trait>::item`
    UfcsKnown {
        ty: Box<Type>,
        trait_path: GenericPath,
        item: Symbol,
    },
}

impl Path {
    pub fn simple(path: SimplePath) -> Self {
        Path::Simple(GenericPath::plain(path))
    }

    pub fn as_simple(&self) -> Option<&GenericPath> {
        match self {
            Path::Simple(gp) => Some(gp),
            Path::UfcsKnown { .. } => None,
        }
    }
}

/// Array length: known at this stage, or a const generic parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArraySize {
    Known(u64),
    Generic { name: Symbol, index: u32 },
}

/// Function pointer type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FnPtrTy {
    pub abi: Abi,
    pub params: Vec<Type>,
    pub ret: Box<Type>,
}

/// A fully-resolved type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Primitive(CoreType),
    /// The never type `!`
    Never,
    Tuple(Vec<Type>),
    Array(Box<Type>, ArraySize),
    Slice(Box<Type>),
    /// Named struct/enum/union type
    Path(GenericPath),
    /// `&T` / `&mut T`
    Borrow(BorrowKind, Box<Type>),
    /// `*const T` / `*mut T`
    Pointer(BorrowKind, Box<Type>),
    Function(FnPtrTy),
    TraitObject(GenericPath),
    /// `<Ty as Trait>::Item`, resolved away by
    /// [`crate::resolver::Resolve::expand_associated_types`]
    Associated {
        ty: Box<Type>,
        trait_path: GenericPath,
        item: Symbol,
    },
    /// Generic type parameter placeholder
    Generic { name: Symbol, index: u32 },
}

impl Type {
    pub fn unit() -> Type {
        Type::Tuple(Vec::new())
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Type::Tuple(ts) if ts.is_empty())
    }

    pub fn is_diverge(&self) -> bool {
        matches!(self, Type::Never)
    }

    pub fn borrow(kind: BorrowKind, inner: Type) -> Type {
        Type::Borrow(kind, Box::new(inner))
    }

    pub fn pointer(kind: BorrowKind, inner: Type) -> Type {
        Type::Pointer(kind, Box::new(inner))
    }

    pub fn named(path: SimplePath, params: Vec<Type>) -> Type {
        Type::Path(GenericPath::new(path, params))
    }

    pub fn as_primitive(&self) -> Option<CoreType> {
        match self {
            Type::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Type::Primitive(_))
    }

    /// Replace `Generic { index }` placeholders by `params[index]`.
    ///
    /// Used when projecting ADT fields through a `GenericPath`: the field
    /// types in the item table are written against the item's own generics.
    pub fn substitute_generics(&self, params: &[Type]) -> Type {
        match self {
            Type::Generic { name, index } => params
                .get(*index as usize)
                .cloned()
                .unwrap_or(Type::Generic {
                    name: *name,
                    index: *index,
                }),
            Type::Primitive(_) | Type::Never => self.clone(),
            Type::Tuple(ts) => {
                Type::Tuple(ts.iter().map(|t| t.substitute_generics(params)).collect())
            }
            Type::Array(inner, size) => Type::Array(
                Box::new(inner.substitute_generics(params)),
                size.clone(),
            ),
            Type::Slice(inner) => Type::Slice(Box::new(inner.substitute_generics(params))),
            Type::Path(gp) => Type::Path(GenericPath {
                path: gp.path.clone(),
                params: gp
                    .params
                    .iter()
                    .map(|t| t.substitute_generics(params))
                    .collect(),
            }),
            Type::Borrow(kind, inner) => {
                Type::Borrow(*kind, Box::new(inner.substitute_generics(params)))
            }
            Type::Pointer(kind, inner) => {
                Type::Pointer(*kind, Box::new(inner.substitute_generics(params)))
            }
            Type::Function(f) => Type::Function(FnPtrTy {
                abi: f.abi,
                params: f
                    .params
                    .iter()
                    .map(|t| t.substitute_generics(params))
                    .collect(),
                ret: Box::new(f.ret.substitute_generics(params)),
            }),
            Type::TraitObject(gp) => Type::TraitObject(GenericPath {
                path: gp.path.clone(),
                params: gp
                    .params
                    .iter()
                    .map(|t| t.substitute_generics(params))
                    .collect(),
            }),
            Type::Associated {
                ty,
                trait_path,
                item,
            } => Type::Associated {
                ty: Box::new(ty.substitute_generics(params)),
                trait_path: GenericPath {
                    path: trait_path.path.clone(),
                    params: trait_path
                        .params
                        .iter()
                        .map(|t| t.substitute_generics(params))
                        .collect(),
                },
                item: *item,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_type_classification() {
        assert!(CoreType::U8.is_unsigned_integer());
        assert!(CoreType::Usize.is_unsigned_integer());
        assert!(CoreType::I128.is_signed_integer());
        assert!(CoreType::Isize.is_integer());
        assert!(CoreType::F32.is_float());
        assert!(!CoreType::Bool.is_integer());
        assert!(!CoreType::Char.is_integer());
    }

    #[test]
    fn test_unit_type() {
        assert!(Type::unit().is_unit());
        assert!(!Type::Tuple(vec![Type::unit()]).is_unit());
    }

    #[test]
    fn test_path_display() {
        let p = SimplePath::new(&["core", "option", "Option"]);
        assert_eq!(format!("{}", p), "core::option::Option");
        assert_eq!(p.last(), Symbol::intern("Option"));
        assert_eq!(p.parent(), SimplePath::new(&["core", "option"]));
    }

    #[test]
    fn test_substitute_generics() {
        let generic = Type::Generic {
            name: Symbol::intern("T"),
            index: 0,
        };
        let subst = generic.substitute_generics(&[Type::Primitive(CoreType::I32)]);
        assert_eq!(subst, Type::Primitive(CoreType::I32));

        let nested = Type::Borrow(
            BorrowKind::Shared,
            Box::new(Type::Slice(Box::new(generic))),
        );
        let subst = nested.substitute_generics(&[Type::Primitive(CoreType::U8)]);
        assert_eq!(
            subst,
            Type::Borrow(
                BorrowKind::Shared,
                Box::new(Type::Slice(Box::new(Type::Primitive(CoreType::U8))))
            )
        );
    }
}
