//! HIR - the typed high-level expression tree.
//!
//! This is the input contract of the MIR lowering core. Every node carries
//! its resolved type and span; name resolution and type inference are done.
//! Nodes are read-only during lowering.

use crate::types::{BorrowKind, GenericPath, Path, SimplePath, Type};
use opalc_util::{Span, Symbol};

/// How a value position is used, as classified by the type checker.
/// Drives the `deref`/`deref_mut` selection for overloaded deref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueUsage {
    Unknown,
    Borrow,
    Mutate,
    Move,
}

/// A typed HIR expression.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub span: Span,
    pub usage: ValueUsage,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type, span: Span) -> Self {
        Self {
            kind,
            ty,
            span,
            usage: ValueUsage::Unknown,
        }
    }

    pub fn with_usage(mut self, usage: ValueUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// Literal values.
#[derive(Debug, Clone)]
pub enum Literal {
    /// Raw bits; sign comes from the expression type.
    Integer(u128),
    Float(f64),
    Boolean(bool),
    String(Symbol),
    ByteString(Vec<u8>),
}

/// Compound-assignment operators (`a += b` etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// Binary operators at the HIR level. `BoolAnd`/`BoolOr` never reach a MIR
/// `BinOp`; they are desugared into control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    CmpEq,
    CmpNe,
    CmpLt,
    CmpLe,
    CmpGt,
    CmpGe,
    BoolAnd,
    BoolOr,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniOp {
    /// `!`
    Invert,
    /// unary `-`
    Negate,
}

/// Emplacement flavour (`box expr` and the old placement-in syntax).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmplaceKind {
    /// No allocation, just evaluate
    Noop,
    /// `box expr`
    Boxer,
    /// `place <- expr`
    Placer,
}

/// One `match` arm.
#[derive(Debug, Clone)]
pub struct MatchArm {
    pub patterns: Vec<Pattern>,
    pub guard: Option<Expr>,
    pub body: Expr,
}

/// Expression kinds; one variant per lowering construct.
#[derive(Debug, Clone)]
pub enum ExprKind {
    Block {
        stmts: Vec<Expr>,
        tail: Option<Box<Expr>>,
    },
    Asm {
        template: String,
        outputs: Vec<(String, Expr)>,
        inputs: Vec<(String, Expr)>,
        clobbers: Vec<String>,
        flags: Vec<String>,
    },
    Return(Box<Expr>),
    Yield(Box<Expr>),
    Let {
        pattern: Pattern,
        ty: Type,
        value: Option<Box<Expr>>,
    },
    Loop {
        body: Box<Expr>,
        label: Option<Symbol>,
        /// Set by type checking when no `break` targets this loop.
        diverges: bool,
    },
    Break {
        label: Option<Symbol>,
        value: Option<Box<Expr>>,
    },
    Continue {
        label: Option<Symbol>,
    },
    Match {
        value: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    If {
        cond: Box<Expr>,
        then_arm: Box<Expr>,
        else_arm: Option<Box<Expr>>,
    },
    Assign {
        op: Option<AssignOp>,
        slot: Box<Expr>,
        value: Box<Expr>,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UniOp {
        op: UniOp,
        value: Box<Expr>,
    },
    Borrow {
        kind: BorrowKind,
        value: Box<Expr>,
    },
    /// Target type is `self.ty`
    Cast {
        value: Box<Expr>,
    },
    /// Sized-to-unsized coercion; target type is `self.ty`
    Unsize {
        value: Box<Expr>,
    },
    Index {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Deref {
        value: Box<Expr>,
    },
    Emplace {
        kind: EmplaceKind,
        place: Option<Box<Expr>>,
        value: Box<Expr>,
    },
    /// Tuple-struct or tuple-enum-variant constructor call
    TupleVariant {
        path: GenericPath,
        is_struct: bool,
        args: Vec<Expr>,
    },
    CallPath {
        path: Path,
        args: Vec<Expr>,
    },
    CallValue {
        value: Box<Expr>,
        args: Vec<Expr>,
    },
    Field {
        value: Box<Expr>,
        field: Symbol,
    },
    Literal(Literal),
    UnitVariant {
        path: GenericPath,
        is_struct: bool,
    },
    PathValue {
        path: Path,
    },
    Variable {
        name: Symbol,
        slot: u32,
    },
    ConstParam {
        name: Symbol,
        binding: u32,
    },
    StructLiteral {
        path: GenericPath,
        base: Option<Box<Expr>>,
        fields: Vec<(Symbol, Expr)>,
    },
    Tuple {
        vals: Vec<Expr>,
    },
    ArrayList {
        vals: Vec<Expr>,
    },
    ArraySized {
        val: Box<Expr>,
        count: u64,
    },
    Closure {
        obj_path: GenericPath,
        captures: Vec<Expr>,
    },
    Generator {
        obj_path: GenericPath,
        captures: Vec<Expr>,
        state_data_ty: Type,
        state_idx_enum: SimplePath,
    },
}

/// Pattern binding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    Move,
    Ref,
    MutRef,
}

/// A named binding attached to a pattern.
#[derive(Debug, Clone)]
pub struct PatBinding {
    pub name: Symbol,
    /// Variable slot in `Function::locals`
    pub slot: u32,
    pub mode: BindMode,
    /// Auto-derefs applied before the binding takes the value
    pub implicit_derefs: u32,
}

/// Constants allowed in literal patterns.
#[derive(Debug, Clone, PartialEq)]
pub enum PatConst {
    Int(i128),
    Uint(u128),
    Bool(bool),
    Str(Symbol),
}

/// A pattern, possibly carrying a binding for the whole matched value.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub binding: Option<PatBinding>,
    /// Auto-derefs applied to the scrutinee before matching the kind
    pub implicit_derefs: u32,
    pub kind: PatKind,
}

impl Pattern {
    pub fn any() -> Pattern {
        Pattern {
            binding: None,
            implicit_derefs: 0,
            kind: PatKind::Any,
        }
    }

    /// A plain `name` binding.
    pub fn bind(name: &str, slot: u32) -> Pattern {
        Pattern {
            binding: Some(PatBinding {
                name: Symbol::intern(name),
                slot,
                mode: BindMode::Move,
                implicit_derefs: 0,
            }),
            implicit_derefs: 0,
            kind: PatKind::Any,
        }
    }

    /// True for a bare irrefutable `var` binding with move semantics, the
    /// shape `let` assigns directly without a destructure pass.
    pub fn is_simple_move_binding(&self) -> bool {
        matches!(
            (&self.binding, &self.kind),
            (Some(b), PatKind::Any) if b.mode == BindMode::Move && b.implicit_derefs == 0
        ) && self.implicit_derefs == 0
    }
}

#[derive(Debug, Clone)]
pub enum PatKind {
    Any,
    Ref(Box<Pattern>),
    Tuple(Vec<Pattern>),
    /// Unit struct or unit enum variant
    PathValue { path: GenericPath },
    /// Tuple struct or tuple enum variant
    PathTuple {
        path: GenericPath,
        pats: Vec<Pattern>,
    },
    /// Named-field struct or struct enum variant
    PathNamed {
        path: GenericPath,
        fields: Vec<(Symbol, Pattern)>,
    },
    Value(PatConst),
    Range { lo: PatConst, hi: PatConst },
    Slice(Vec<Pattern>),
    SplitSlice {
        leading: Vec<Pattern>,
        extra: Option<PatBinding>,
        trailing: Vec<Pattern>,
    },
}

/// Generator-specific declaration data attached to a generator function.
#[derive(Debug, Clone)]
pub struct GeneratorDecl {
    /// The synthesised generator object type
    pub obj: SimplePath,
    /// Enum holding the state discriminant values (`0..N`, `END`)
    pub state_enum: SimplePath,
    /// Tuple struct holding the lifted saved locals
    pub state_struct: SimplePath,
    /// One entry per closure capture, in field order
    pub capture_usages: Vec<ValueUsage>,
}

/// A function ready for lowering: typed body, argument patterns, declared
/// variable slots.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: Symbol,
    pub args: Vec<(Pattern, Type)>,
    pub ret_ty: Type,
    /// Types of the named variable slots, in slot order
    pub locals: Vec<Type>,
    pub body: Expr,
    pub generator: Option<GeneratorDecl>,
}
