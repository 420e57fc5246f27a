//! Error types for every stage of a template's life.
//!
//! Lexing and parsing errors happen once, before any render. Evaluation
//! errors happen per render and abort only that render. All of them carry a
//! byte span into the template source so a `miette` report can point at the
//! offending construct; use [`TemplateSource::report`] (or
//! [`crate::Template::report`]) to attach the source text.

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::sync::Arc;
use thiserror::Error;

/// Error type host functions and record methods return.
pub type FunctionError = Box<dyn std::error::Error + Send + Sync>;

/// A template's name and source text, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct TemplateSource {
    pub name: String,
    pub source: Arc<str>,
}

impl TemplateSource {
    pub fn new(name: impl Into<String>, source: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Create a NamedSource for miette
    pub fn named_source(&self) -> NamedSource<String> {
        NamedSource::new(&self.name, self.source.to_string())
    }

    /// Wrap any template error in a report that can render its source snippet.
    pub fn report<E>(&self, err: E) -> miette::Report
    where
        E: Diagnostic + Send + Sync + 'static,
    {
        miette::Report::new(err).with_source_code(self.named_source())
    }
}

/// Any error the engine can produce.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),
}

/// Malformed delimiters or tokens inside an action.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum LexError {
    #[error("unclosed action")]
    #[diagnostic(
        code(template::lex::unterminated_action),
        help("add `{close}` to close this action")
    )]
    UnterminatedAction {
        close: String,
        #[label("opened here")]
        span: SourceSpan,
    },

    #[error("unclosed comment")]
    #[diagnostic(code(template::lex::unterminated_comment), help("comments end with `*/`"))]
    UnterminatedComment {
        #[label("comment starts here")]
        span: SourceSpan,
    },

    #[error("unterminated string literal")]
    #[diagnostic(code(template::lex::unterminated_string))]
    UnterminatedString {
        #[label("string starts here")]
        span: SourceSpan,
    },

    #[error("unexpected character `{found}` in action")]
    #[diagnostic(code(template::lex::unexpected_char))]
    UnexpectedChar {
        found: char,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("bad number syntax `{text}`")]
    #[diagnostic(code(template::lex::bad_number))]
    BadNumber {
        text: String,
        #[label("here")]
        span: SourceSpan,
    },
}

impl LexError {
    pub fn span(&self) -> SourceSpan {
        match self {
            LexError::UnterminatedAction { span, .. }
            | LexError::UnterminatedComment { span }
            | LexError::UnterminatedString { span }
            | LexError::UnexpectedChar { span, .. }
            | LexError::BadNumber { span, .. } => *span,
        }
    }
}

/// Errors detected while building the tree, before any execution.
#[derive(Error, Debug, Diagnostic)]
pub enum ParseError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lex(#[from] LexError),

    #[error("unexpected {found}")]
    #[diagnostic(code(template::parse::syntax), help("expected {expected}"))]
    Syntax {
        found: String,
        expected: String,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("function `{name}` not defined")]
    #[diagnostic(
        code(template::parse::undefined_function),
        help("register `{name}` in the FunctionRegistry before parsing")
    )]
    UndefinedFunction {
        name: String,
        #[label("unknown function")]
        span: SourceSpan,
    },

    #[error("`{keyword}` is only allowed inside a range body")]
    #[diagnostic(code(template::parse::illegal_control_flow))]
    IllegalControlFlow {
        keyword: &'static str,
        #[label("not inside {{{{range}}}}")]
        span: SourceSpan,
    },

    #[error("wrong number of arguments for `{name}`: expected {expected}, got {got}")]
    #[diagnostic(code(template::parse::wrong_arity))]
    WrongArity {
        name: String,
        expected: String,
        got: usize,
        #[label("called here")]
        span: SourceSpan,
    },
}

impl ParseError {
    pub(crate) fn syntax(
        found: impl Into<String>,
        expected: impl Into<String>,
        span: SourceSpan,
    ) -> Self {
        ParseError::Syntax {
            found: found.into(),
            expected: expected.into(),
            span,
        }
    }

    pub fn span(&self) -> SourceSpan {
        match self {
            ParseError::Lex(e) => e.span(),
            ParseError::Syntax { span, .. }
            | ParseError::UndefinedFunction { span, .. }
            | ParseError::IllegalControlFlow { span, .. }
            | ParseError::WrongArity { span, .. } => *span,
        }
    }
}

/// Errors raised while rendering; each aborts only the current render.
#[derive(Error, Debug, Diagnostic)]
pub enum EvalError {
    #[error("variable `${name}` is not defined")]
    #[diagnostic(code(template::eval::undefined_variable))]
    UndefinedVariable {
        name: String,
        #[label("not found in scope")]
        span: SourceSpan,
    },

    #[error("{receiver} has no field or method `{field}`")]
    #[diagnostic(code(template::eval::no_such_field), help("{}", known_help(known)))]
    NoSuchField {
        field: String,
        receiver: String,
        known: Vec<String>,
        #[label("this field doesn't exist")]
        span: SourceSpan,
    },

    #[error("index {index} out of range for sequence of length {len}")]
    #[diagnostic(code(template::eval::index_out_of_range))]
    IndexOutOfRange {
        index: i64,
        len: usize,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("slice bounds [{start}:{end}] out of range for length {len}")]
    #[diagnostic(code(template::eval::slice_out_of_range))]
    SliceOutOfRange {
        start: i64,
        end: i64,
        len: usize,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("error calling `{name}`")]
    #[diagnostic(code(template::eval::function_failed))]
    FunctionFailed {
        name: String,
        #[source]
        source: FunctionError,
        #[label("call failed")]
        span: SourceSpan,
    },

    #[error("{op}: incompatible types {left} and {right}")]
    #[diagnostic(code(template::eval::type_mismatch))]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("{op}: expected {expected}, found {found}")]
    #[diagnostic(code(template::eval::wrong_type))]
    WrongType {
        op: &'static str,
        expected: &'static str,
        found: &'static str,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("can't iterate over {found}")]
    #[diagnostic(
        code(template::eval::not_iterable),
        help("range accepts sequences, maps, integers and null")
    )]
    NotIterable {
        found: &'static str,
        #[label("this value")]
        span: SourceSpan,
    },

    #[error("`{name}` is not a method and can't take arguments")]
    #[diagnostic(code(template::eval::not_callable))]
    NotCallable {
        name: String,
        #[label("arguments given here")]
        span: SourceSpan,
    },

    #[error("failed to write output")]
    #[diagnostic(code(template::eval::write))]
    Write {
        #[source]
        source: std::fmt::Error,
        #[label("while writing this")]
        span: SourceSpan,
    },
}

impl EvalError {
    pub fn span(&self) -> SourceSpan {
        match self {
            EvalError::UndefinedVariable { span, .. }
            | EvalError::NoSuchField { span, .. }
            | EvalError::IndexOutOfRange { span, .. }
            | EvalError::SliceOutOfRange { span, .. }
            | EvalError::FunctionFailed { span, .. }
            | EvalError::TypeMismatch { span, .. }
            | EvalError::WrongType { span, .. }
            | EvalError::NotIterable { span, .. }
            | EvalError::NotCallable { span, .. }
            | EvalError::Write { span, .. } => *span,
        }
    }
}

fn known_help(known: &[String]) -> String {
    if known.is_empty() {
        "no fields are known on this value".to_string()
    } else {
        format!("available: {}", known.join(", "))
    }
}
