//! Item definitions and the resolver seam.
//!
//! The lowering core treats trait selection and the item table as a black
//! box behind [`Resolve`]. The [`Crate`] type is the default implementation,
//! backed by plain maps; the enclosing compiler can substitute its own.

use crate::types::{Abi, CoreType, SimplePath, Type};
use indexmap::IndexMap;
use opalc_util::{FxHashMap, FxHashSet, Symbol};

/// Language items the lowering core needs to locate by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LangItem {
    Unsize,
    Deref,
    DerefMut,
    MaybeUninit,
    OwnedBox,
    ExchangeMalloc,
    DropInPlace,
    PlacerTrait,
    PlaceTrait,
    BoxPlaceTrait,
    InPlaceTrait,
    BoxedTrait,
}

/// Struct field layout.
#[derive(Debug, Clone)]
pub enum StructFields {
    Unit,
    Tuple(Vec<Type>),
    Named(Vec<(Symbol, Type)>),
}

#[derive(Debug, Clone)]
pub struct StructDef {
    pub fields: StructFields,
}

/// Enum variant payload.
#[derive(Debug, Clone)]
pub enum VariantData {
    Unit,
    Tuple(Vec<Type>),
    Struct(Vec<(Symbol, Type)>),
}

#[derive(Debug, Clone)]
pub struct Variant {
    pub name: Symbol,
    pub data: VariantData,
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub variants: Vec<Variant>,
}

impl EnumDef {
    pub fn find_variant(&self, name: Symbol) -> Option<usize> {
        self.variants.iter().position(|v| v.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct UnionDef {
    pub fields: Vec<(Symbol, Type)>,
}

impl UnionDef {
    pub fn find_field(&self, name: Symbol) -> Option<usize> {
        self.fields.iter().position(|(n, _)| *n == name)
    }
}

/// Function signature, as much of it as lowering consumes.
#[derive(Debug, Clone)]
pub struct FnSig {
    pub abi: Abi,
    pub params: Vec<Type>,
    pub ret: Type,
}

/// Trait definition, reduced to what associated-item resolution needs.
#[derive(Debug, Clone, Default)]
pub struct TraitDef {
    pub methods: Vec<Symbol>,
    pub consts: Vec<Symbol>,
}

/// An entry in the item table.
#[derive(Debug, Clone)]
pub enum Item {
    Struct(StructDef),
    Enum(EnumDef),
    Union(UnionDef),
    Trait(TraitDef),
    Static { ty: Type },
    Const { ty: Type },
    Function(FnSig),
}

/// The resolver seam: everything the lowering core asks of the surrounding
/// compiler.
pub trait Resolve {
    /// Item table lookup
    fn lookup(&self, path: &SimplePath) -> Option<&Item>;

    /// Locate a lang item's path, if the crate defines one
    fn lang_item(&self, item: LangItem) -> Option<&SimplePath>;

    /// Does an impl of `trait_path<params>` exist for `self_ty`?
    fn find_impl(&self, trait_path: &SimplePath, params: &[Type], self_ty: &Type) -> bool;

    /// Normalise associated types inside `ty`
    fn expand_associated_types(&self, ty: Type) -> Type {
        ty
    }

    /// Is `ty` statically uninhabited?
    fn type_is_impossible(&self, ty: &Type) -> bool;

    /// Does `ty` implement `Copy`? Move tracking depends on this.
    fn type_is_copy(&self, ty: &Type) -> bool;

    /// Size and alignment if statically known for the target
    fn get_size_and_align(&self, ty: &Type) -> Option<(u64, u64)>;
}

/// Default item-table-backed resolver, used by tests and the driver.
#[derive(Default)]
pub struct Crate {
    /// Item table; insertion order is preserved so diagnostics and debug
    /// output stay deterministic across runs
    items: IndexMap<SimplePath, Item>,
    lang_items: FxHashMap<LangItem, SimplePath>,
    /// Path types known to be `Copy`
    copy_paths: FxHashSet<SimplePath>,
    /// Registered trait impls as (trait, self type) pairs; parameters are
    /// compared structurally
    impls: Vec<(SimplePath, Vec<Type>, Type)>,
}

impl Crate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&mut self, path: SimplePath, item: Item) {
        self.items.insert(path, item);
    }

    pub fn set_lang_item(&mut self, li: LangItem, path: SimplePath) {
        self.lang_items.insert(li, path);
    }

    pub fn mark_copy(&mut self, path: SimplePath) {
        self.copy_paths.insert(path);
    }

    pub fn register_impl(&mut self, trait_path: SimplePath, params: Vec<Type>, self_ty: Type) {
        self.impls.push((trait_path, params, self_ty));
    }

    fn enum_variant_impossible(&self, data: &VariantData, params: &[Type]) -> bool {
        match data {
            VariantData::Unit => false,
            VariantData::Tuple(tys) => tys
                .iter()
                .any(|t| self.type_is_impossible(&t.substitute_generics(params))),
            VariantData::Struct(fields) => fields
                .iter()
                .any(|(_, t)| self.type_is_impossible(&t.substitute_generics(params))),
        }
    }
}

impl Resolve for Crate {
    fn lookup(&self, path: &SimplePath) -> Option<&Item> {
        self.items.get(path)
    }

    fn lang_item(&self, item: LangItem) -> Option<&SimplePath> {
        self.lang_items.get(&item)
    }

    fn find_impl(&self, trait_path: &SimplePath, params: &[Type], self_ty: &Type) -> bool {
        self.impls
            .iter()
            .any(|(t, p, s)| t == trait_path && p == params && s == self_ty)
    }

    fn type_is_impossible(&self, ty: &Type) -> bool {
        match ty {
            Type::Never => true,
            Type::Tuple(ts) => ts.iter().any(|t| self.type_is_impossible(t)),
            Type::Array(inner, _) => self.type_is_impossible(inner),
            Type::Path(gp) => match self.items.get(&gp.path) {
                Some(Item::Enum(e)) => e
                    .variants
                    .iter()
                    .all(|v| self.enum_variant_impossible(&v.data, &gp.params)),
                Some(Item::Struct(s)) => match &s.fields {
                    StructFields::Unit => false,
                    StructFields::Tuple(tys) => tys
                        .iter()
                        .any(|t| self.type_is_impossible(&t.substitute_generics(&gp.params))),
                    StructFields::Named(fields) => fields
                        .iter()
                        .any(|(_, t)| self.type_is_impossible(&t.substitute_generics(&gp.params))),
                },
                _ => false,
            },
            _ => false,
        }
    }

    fn type_is_copy(&self, ty: &Type) -> bool {
        match ty {
            Type::Primitive(p) => *p != CoreType::Str,
            Type::Never => true,
            Type::Tuple(ts) => ts.iter().all(|t| self.type_is_copy(t)),
            Type::Array(inner, _) => self.type_is_copy(inner),
            Type::Slice(_) | Type::TraitObject(_) => false,
            Type::Borrow(crate::types::BorrowKind::Shared, _) => true,
            Type::Borrow(crate::types::BorrowKind::Unique, _) => false,
            Type::Pointer(..) | Type::Function(_) => true,
            Type::Path(gp) => self.copy_paths.contains(&gp.path),
            Type::Associated { .. } => false,
            Type::Generic { .. } => false,
        }
    }

    fn get_size_and_align(&self, ty: &Type) -> Option<(u64, u64)> {
        // Pointer-width-8 target. ADT layout is the backend's business; the
        // emplace lowering falls back to size_of/align_of intrinsics when we
        // return None here.
        match ty {
            Type::Primitive(p) => {
                let sa = match p {
                    CoreType::U8 | CoreType::I8 | CoreType::Bool => (1, 1),
                    CoreType::U16 | CoreType::I16 => (2, 2),
                    CoreType::U32 | CoreType::I32 | CoreType::Char | CoreType::F32 => (4, 4),
                    CoreType::U64 | CoreType::I64 | CoreType::F64 => (8, 8),
                    CoreType::U128 | CoreType::I128 => (16, 16),
                    CoreType::Usize | CoreType::Isize => (8, 8),
                    CoreType::Str => return None,
                };
                Some(sa)
            }
            Type::Pointer(_, inner) | Type::Borrow(_, inner) => match **inner {
                Type::Slice(_) | Type::TraitObject(_) | Type::Primitive(CoreType::Str) => {
                    Some((16, 8))
                }
                _ => Some((8, 8)),
            },
            Type::Function(_) => Some((8, 8)),
            _ => None,
        }
    }
}
