use crate::funcs::Callee;
use crate::value::Value;
use miette::SourceSpan;

pub type Span = SourceSpan;

/// Create a span from offset and length
pub fn span(offset: usize, len: usize) -> Span {
    SourceSpan::new(offset.into(), len)
}

/// Smallest span covering both `a` and `b`.
pub fn join(a: Span, b: Span) -> Span {
    let start = a.offset().min(b.offset());
    let end = (a.offset() + a.len()).max(b.offset() + b.len());
    span(start, end - start)
}

#[derive(Debug, Clone)]
pub enum Node {
    Text(String),
    Action(Pipeline),
    Range(RangeNode),
    If(BranchNode),
    With(BranchNode),
    Break(Span),
    Continue(Span),
}

/// `{{range}}`: body runs per element, else body runs once when empty.
#[derive(Debug, Clone)]
pub struct RangeNode {
    pub pipeline: Pipeline,
    pub body: Vec<Node>,
    pub else_body: Vec<Node>,
    pub span: Span,
}

/// Shared shape of `{{if}}` and `{{with}}`.
#[derive(Debug, Clone)]
pub struct BranchNode {
    pub pipeline: Pipeline,
    pub body: Vec<Node>,
    pub else_body: Vec<Node>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    /// `$x := ...` introduces variables in the current frame.
    Declare,
    /// `$x = ...` overwrites the nearest existing binding.
    Assign,
}

#[derive(Debug, Clone)]
pub struct Declaration {
    pub vars: Vec<String>,
    pub kind: DeclKind,
    pub span: Span,
}

/// Stages run left to right; each result is appended as the last argument
/// of the next stage.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub decl: Option<Declaration>,
    pub stages: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Value),
    Dot,
    Variable(String),
    /// `.A.B`, `$x.A`, `(pipe).A`; `args` go to the last name when it is a method.
    FieldChain {
        root: Box<Expr>,
        fields: Vec<String>,
        args: Vec<Expr>,
    },
    Call {
        name: String,
        callee: Callee,
        args: Vec<Expr>,
    },
    /// `slice target [start [end]]`
    Slice { operands: Vec<Expr> },
    Pipeline(Box<Pipeline>),
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Whether this expression can take a piped value as its last argument.
    pub fn accepts_input(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Call { .. } | ExprKind::Slice { .. } | ExprKind::FieldChain { .. }
        )
    }
}
