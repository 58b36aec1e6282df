//! MIR - the mid-level intermediate representation.
//!
//! A function is a flat control-flow graph: an ordered list of locals and an
//! ordered list of basic blocks, block 0 being the entry. Each block is a
//! straight-line run of statements sealed by exactly one terminator.
//!
//! Everything here is plain data. Construction goes through
//! [`crate::builder::MirBuilder`]; once a function is emitted and validated
//! it is immutable.

use opalc_hir::types::{BorrowKind, CoreType, GenericPath, Path, Type};
use opalc_util::{define_idx, IndexVec, Span, Symbol};
use std::fmt;

define_idx!(BlockId, "bb");
define_idx!(LocalId, "_");

/// The root of an lvalue: where the projection chain starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LValueRoot {
    /// The function return slot
    Return,
    /// Argument by signature index
    Argument(u32),
    /// A local (variable or temporary)
    Local(LocalId),
    /// A static item
    Static(Box<Path>),
}

/// One projection step applied to an lvalue root.
///
/// Wrappers apply left to right: `Argument(0)` with `[Field(0), Deref]` is
/// "argument 0, field 0, dereferenced".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LValueWrapper {
    Deref,
    Field(u32),
    /// Select an enum variant (or union field) before projecting into it
    Downcast(u32),
    /// Runtime indexing; always by a local so evaluation order stays explicit
    Index(LocalId),
}

/// A memory place: a root plus an ordered projection chain.
#[derive(Clone, PartialEq, Eq)]
pub struct LValue {
    pub root: LValueRoot,
    pub wrappers: Vec<LValueWrapper>,
}

impl LValue {
    pub fn new_return() -> LValue {
        LValue {
            root: LValueRoot::Return,
            wrappers: Vec::new(),
        }
    }

    pub fn new_argument(idx: u32) -> LValue {
        LValue {
            root: LValueRoot::Argument(idx),
            wrappers: Vec::new(),
        }
    }

    pub fn new_local(local: LocalId) -> LValue {
        LValue {
            root: LValueRoot::Local(local),
            wrappers: Vec::new(),
        }
    }

    pub fn new_static(path: Path) -> LValue {
        LValue {
            root: LValueRoot::Static(Box::new(path)),
            wrappers: Vec::new(),
        }
    }

    pub fn deref(mut self) -> LValue {
        self.wrappers.push(LValueWrapper::Deref);
        self
    }

    pub fn field(mut self, idx: u32) -> LValue {
        self.wrappers.push(LValueWrapper::Field(idx));
        self
    }

    pub fn downcast(mut self, variant: u32) -> LValue {
        self.wrappers.push(LValueWrapper::Downcast(variant));
        self
    }

    pub fn index(mut self, local: LocalId) -> LValue {
        self.wrappers.push(LValueWrapper::Index(local));
        self
    }

    /// The bare local, if this is an unprojected local place.
    pub fn as_local(&self) -> Option<LocalId> {
        match self.root {
            LValueRoot::Local(l) if self.wrappers.is_empty() => Some(l),
            _ => None,
        }
    }

    /// Root local regardless of projections.
    pub fn root_local(&self) -> Option<LocalId> {
        match self.root {
            LValueRoot::Local(l) => Some(l),
            _ => None,
        }
    }
}

impl fmt::Debug for LValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            LValueRoot::Return => write!(f, "retval")?,
            LValueRoot::Argument(i) => write!(f, "arg{}", i)?,
            LValueRoot::Local(l) => write!(f, "{}", l)?,
            LValueRoot::Static(p) => write!(f, "static({:?})", p)?,
        }
        for w in &self.wrappers {
            match w {
                LValueWrapper::Deref => write!(f, ".*")?,
                LValueWrapper::Field(i) => write!(f, ".{}", i)?,
                LValueWrapper::Downcast(v) => write!(f, "#{}", v)?,
                LValueWrapper::Index(l) => write!(f, "[{}]", l)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for LValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A constant operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int { value: i128, ty: CoreType },
    Uint { value: u128, ty: CoreType },
    Float { value: f64, ty: CoreType },
    Bool(bool),
    Str(Symbol),
    Bytes(Vec<u8>),
    /// Address of a named item (function, constructor, static)
    ItemAddr(Box<Path>),
    /// Reference to a named constant, resolved by const evaluation later
    Const(Box<Path>),
    /// Generic const parameter placeholder
    Generic { name: Symbol, index: u32 },
}

/// Operand that tolerates either a place use or an inline constant without
/// forcing a load.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    LValue(LValue),
    Constant(Constant),
}

impl From<LValue> for Param {
    fn from(lv: LValue) -> Param {
        Param::LValue(lv)
    }
}

impl From<Constant> for Param {
    fn from(c: Constant) -> Param {
        Param::Constant(c)
    }
}

impl Param {
    pub fn as_lvalue(&self) -> Option<&LValue> {
        match self {
            Param::LValue(lv) => Some(lv),
            Param::Constant(_) => None,
        }
    }
}

/// Binary operations. Overflow-checked variants are introduced by a later
/// pass; lowering emits the plain forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniOp {
    /// `!` (logical on bool, bitwise on integers)
    Inv,
    /// unary `-`
    Neg,
}

/// A computed value.
#[derive(Debug, Clone, PartialEq)]
pub enum RValue {
    Use(LValue),
    Constant(Constant),
    Borrow {
        kind: BorrowKind,
        val: LValue,
    },
    Cast {
        val: LValue,
        ty: Type,
    },
    BinOp {
        lhs: Param,
        op: BinOp,
        rhs: Param,
    },
    UniOp {
        val: LValue,
        op: UniOp,
    },
    /// Metadata (length/vtable) half of a fat pointer
    DstMeta {
        val: LValue,
    },
    /// Data half of a fat pointer
    DstPtr {
        val: LValue,
    },
    /// Construct a fat pointer from data and metadata
    MakeDst {
        ptr: Param,
        meta: Param,
    },
    Tuple {
        vals: Vec<Param>,
    },
    Array {
        vals: Vec<Param>,
    },
    /// `[val; count]`
    SizedArray {
        val: Param,
        count: u64,
    },
    Struct {
        path: GenericPath,
        vals: Vec<Param>,
    },
    EnumVariant {
        path: GenericPath,
        index: u32,
        vals: Vec<Param>,
    },
    UnionVariant {
        path: GenericPath,
        index: u32,
        val: Param,
    },
}

impl RValue {
    pub fn unit() -> RValue {
        RValue::Tuple { vals: Vec::new() }
    }
}

/// How much of a value a drop statement destroys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropKind {
    /// Full recursive destructor
    Deep,
    /// Only the outer allocation (used for moved-out boxes)
    Shallow,
}

/// Inline assembly payload, carried through unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct AsmStatement {
    pub template: String,
    pub outputs: Vec<(String, LValue)>,
    pub inputs: Vec<(String, LValue)>,
    pub clobbers: Vec<String>,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assign {
        dst: LValue,
        src: RValue,
        /// Whether codegen must drop the previous contents of `dst` first.
        /// Cleared for writes into freshly allocated raw memory (emplace).
        drop_dst: bool,
    },
    Drop {
        val: LValue,
        kind: DropKind,
    },
    Asm(AsmStatement),
}

/// Call target: a value of function-pointer type, a named item, or an
/// intrinsic selected by name.
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    Value(LValue),
    Path(Path),
    Intrinsic { name: Symbol, params: Vec<Type> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Block not yet sealed. Must not survive lowering; validation rejects it.
    Incomplete,
    Return,
    /// Control never continues (panic stubs, unreachable code)
    Diverge,
    Goto(BlockId),
    If {
        cond: LValue,
        bb_true: BlockId,
        bb_false: BlockId,
    },
    /// Branch by enum variant; one target per variant
    Switch {
        val: LValue,
        targets: Vec<BlockId>,
    },
    /// Branch by constant value with a default
    SwitchValue {
        val: LValue,
        values: Vec<Constant>,
        targets: Vec<BlockId>,
        default: BlockId,
    },
    Call {
        ret_block: BlockId,
        panic_block: BlockId,
        result: LValue,
        target: CallTarget,
        args: Vec<Param>,
    },
}

impl Terminator {
    /// Successor blocks, in emission order.
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            Terminator::Incomplete | Terminator::Return | Terminator::Diverge => Vec::new(),
            Terminator::Goto(bb) => vec![*bb],
            Terminator::If {
                bb_true, bb_false, ..
            } => vec![*bb_true, *bb_false],
            Terminator::Switch { targets, .. } => targets.clone(),
            Terminator::SwitchValue {
                targets, default, ..
            } => {
                let mut out = targets.clone();
                out.push(*default);
                out
            }
            Terminator::Call {
                ret_block,
                panic_block,
                ..
            } => vec![*ret_block, *panic_block],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub statements: Vec<Statement>,
    pub terminator: Terminator,
}

impl BasicBlock {
    pub fn new() -> BasicBlock {
        BasicBlock {
            statements: Vec::new(),
            terminator: Terminator::Incomplete,
        }
    }
}

impl Default for BasicBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// A local slot: a named variable or a compiler temporary.
#[derive(Debug, Clone, PartialEq)]
pub struct Local {
    pub ty: Type,
    pub span: Span,
    pub name: Option<Symbol>,
}

/// A lowered function body.
#[derive(Clone, PartialEq)]
pub struct Function {
    pub name: Symbol,
    pub locals: IndexVec<LocalId, Local>,
    /// Block 0 is the entry
    pub blocks: IndexVec<BlockId, BasicBlock>,
    /// Argument types, in signature order
    pub args: Vec<Type>,
    pub ret_ty: Type,
}

impl Function {
    pub fn new(name: Symbol, args: Vec<Type>, ret_ty: Type) -> Self {
        Self {
            name,
            locals: IndexVec::new(),
            blocks: IndexVec::new(),
            args,
            ret_ty,
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("block_count", &self.block_count())
            .field("local_count", &self.local_count())
            .field("ret_ty", &self.ret_ty)
            .finish()
    }
}
