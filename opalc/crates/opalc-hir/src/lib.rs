//! opalc-hir - Typed high-level IR and the resolver seam.
//!
//! The HIR is produced by earlier phases (parsing, name resolution, type
//! inference) and consumed read-only by the MIR lowering in `opalc-mir`.

pub mod hir;
pub mod resolver;
pub mod types;

pub use resolver::{Crate, Item, LangItem, Resolve};
pub use types::{
    Abi, ArraySize, BorrowKind, CoreType, FnPtrTy, GenericPath, Path, SimplePath, Type,
};
