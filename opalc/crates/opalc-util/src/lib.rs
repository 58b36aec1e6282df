//! opalc-util - Core Utilities and Foundation Types
//!
//! Fundamental utilities shared by every phase of the Opal compiler: typed
//! indices, source spans, interned strings, and the diagnostic
//! infrastructure. All of them are zero-cost wrappers over plain data; none
//! of them allocate beyond what the equivalent hand-written code would.

pub mod diagnostic;
pub mod index_vec;
pub mod span;
pub mod symbol;

pub use diagnostic::{Diagnostic, Handler, Level};
pub use index_vec::{Idx, IndexVec};
pub use span::{FileId, Span};
pub use symbol::Symbol;

// Re-export commonly used hash collections
pub use rustc_hash::FxHashMap;
pub use rustc_hash::FxHashSet;
