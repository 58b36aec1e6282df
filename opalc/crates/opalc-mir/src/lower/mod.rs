//! HIR to MIR lowering.
//!
//! Entry point for turning a typed [`opalc_hir::hir::Function`] into a
//! validated [`crate::mir::Function`]. The traversal itself lives in
//! [`expr`]; patterns, match lowering, and the generator transform are split
//! out alongside it.
//!
//! A lowering failure is a user diagnostic for *this* function only; the
//! driver decides whether to continue with other functions. Invariants the
//! type checker should have guaranteed panic instead.

pub mod expr;
pub mod generator;
pub mod matches;
pub mod pattern;

use crate::builder::MirBuilder;
use crate::mir::{Function, LValue};
use crate::validate;
use opalc_hir::hir;
use opalc_hir::resolver::Resolve;
use opalc_hir::types::Type;
use opalc_util::{Span, Symbol};
use rayon::prelude::*;
use thiserror::Error;

/// Which rustc edition's lowering quirks to match; selects the emplace
/// protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetVersion {
    V1_19,
    V1_29,
    V1_39,
}

/// Lowering configuration.
#[derive(Debug, Clone)]
pub struct LowerConfig {
    pub target: TargetVersion,
    /// Run the full initialisation-consistency validation pass
    pub full_validate: bool,
    /// Emit index bounds checks. Off by default, matching the upstream
    /// behaviour where the check exists but is disabled; kept as a flag
    /// rather than deleted.
    pub emit_bounds_checks: bool,
}

impl Default for LowerConfig {
    fn default() -> Self {
        Self {
            target: TargetVersion::V1_39,
            full_validate: false,
            emit_bounds_checks: false,
        }
    }
}

/// User-facing lowering failures. Every variant carries enough to render a
/// span diagnostic; none are recoverable within the function.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LowerErrorKind {
    #[error("refutable pattern in irrefutable context")]
    RefutablePattern,
    #[error("unknown field `{0}`")]
    UnknownField(Symbol),
    #[error("cannot cast from `{from:?}` to `{to:?}`")]
    InvalidCast { from: Type, to: Type },
    #[error("field `{0}` not specified and no base value given")]
    MissingField(Symbol),
    #[error("break outside of a loop")]
    BreakOutsideLoop,
    #[error("no loop named `{0}` in scope")]
    UnknownLoopLabel(Symbol),
    #[error("variant `{0}` not handled")]
    UnhandledVariant(Symbol),
    #[error("assembly output constraints must start with `=`")]
    MalformedAsmConstraint,
    #[error("{0}")]
    InvalidOperands(String),
    #[error("failed to locate item for `{0}`")]
    UnresolvedItem(String),
}

/// A lowering error with its source location.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind}")]
pub struct LowerError {
    pub span: Span,
    pub kind: LowerErrorKind,
}

impl LowerError {
    pub fn new(span: Span, kind: LowerErrorKind) -> Self {
        Self { span, kind }
    }

    pub fn to_diagnostic(&self) -> opalc_util::Diagnostic {
        opalc_util::Diagnostic::error(self.kind.to_string(), self.span)
    }
}

pub(crate) type LowerResult<T = ()> = Result<T, LowerError>;

/// What the generator transform produced beyond the body: the pieces the
/// enclosing compiler writes back into the state enum, the state struct, and
/// the drop impl.
#[derive(Debug, Clone)]
pub struct GeneratorOutput {
    /// Variant names of the state-discriminant enum, in value order
    pub state_variants: Vec<Symbol>,
    /// Field types lifted into the state-data struct, in field order
    pub state_fields: Vec<Type>,
    /// Synthesised drop glue for the generator object
    pub drop_fn: Function,
}

/// A fully lowered function.
#[derive(Debug, Clone)]
pub struct LoweredFunction {
    pub mir: Function,
    pub generator: Option<GeneratorOutput>,
}

/// Lower one typed function to MIR and validate the result.
pub fn lower_function<R: Resolve>(
    resolver: &R,
    cfg: &LowerConfig,
    f: &hir::Function,
) -> LowerResult<LoweredFunction> {
    let sp = f.body.span;
    log::debug!("lowering fn {}", f.name);

    let builder = MirBuilder::new(resolver, f.name, f.ret_ty.clone(), &f.args, &f.locals, sp);
    let mut vis = expr::ExprVisitor::new(builder, cfg, f.generator.as_ref());

    // Argument prelude: anything that isn't a plain `name: Type` binding is
    // destructured out of the argument place.
    for (i, (pat, _ty)) in f.args.iter().enumerate() {
        if !pat.is_simple_move_binding() {
            vis.define_vars_from(sp, pat);
            vis.destructure_from(sp, pat, LValue::new_argument(i as u32), false)?;
        }
    }

    let generator = if let Some(decl) = &f.generator {
        Some(generator::lower_generator_body(&mut vis, f, decl)?)
    } else {
        vis.visit(&f.body)?;
        let builder = &mut vis.builder;
        if builder.block_active() {
            let res = builder.get_result(sp);
            builder.push_stmt_assign(sp, LValue::new_return(), res);
        }
        vis.builder.final_cleanup(sp);
        None
    };

    let mir = vis.finish();
    validate::validate(&mir).unwrap_or_else(|e| {
        panic!("lowering of {} produced invalid MIR: {}", f.name, e)
    });
    validate::validate_types(&mir, resolver)
        .unwrap_or_else(|e| panic!("lowering of {} produced ill-typed MIR: {}", f.name, e));
    if cfg.full_validate {
        validate::validate_full(&mir)
            .unwrap_or_else(|e| panic!("lowering of {} failed full validation: {}", f.name, e));
    }

    Ok(LoweredFunction { mir, generator })
}

/// Lower a batch of functions, one rayon worker per function. The resolver
/// and HIR are shared immutably; each worker owns its builder.
pub fn lower_functions<R: Resolve + Sync>(
    resolver: &R,
    cfg: &LowerConfig,
    fns: &[hir::Function],
) -> Vec<LowerResult<LoweredFunction>> {
    fns.par_iter()
        .map(|f| lower_function(resolver, cfg, f))
        .collect()
}
