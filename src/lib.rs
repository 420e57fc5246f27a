//! shimmytmpl: a small text-template engine in the style of Go's
//! `text/template`.
//!
//! A template is parsed once against a [`FunctionRegistry`] and can then be
//! executed any number of times, from any number of threads, against a
//! [`Value`] tree. Host structs take part through the [`Record`] adapter
//! trait rather than reflection.
//!
//! Supported:
//! - Text with `{{ pipeline }}` actions, `{{- ` / ` -}}` trim markers and
//!   `{{/* comments */}}`.
//! - `.Field` chains over records, maps and sequences; record methods with
//!   arguments.
//! - Pipelines (`a | f b`), where each result becomes the last argument of
//!   the next stage.
//! - `{{ range }}`, `{{ if }}`, `{{ with }}`, each with `{{ else }}`, plus
//!   `{{ else if }}` / `{{ else with }}` chains.
//! - `$variables` with `:=` and `=`, `{{ break }}` and `{{ continue }}`.
//! - Built-ins `and or not len index print println eq ne lt le gt ge slice`,
//!   and host helpers registered per registry.
//!
//! Not supported:
//! - Named sub-templates (`define`, `template`, `block`).
//! - `printf` and HTML escaping.
//! - Loading templates from disk.
//!
//! Errors are `miette` diagnostics with spans into the template source; use
//! [`Template::report`] to get a report that can print the offending line.
//!
//! ```
//! use shimmytmpl::{render, Value};
//!
//! let data: Value = [("Name", "Ada")].into_iter().collect();
//! assert_eq!(render("Hello, {{ .Name }}!", &data).unwrap(), "Hello, Ada!");
//! ```

pub mod ast;
pub mod error;
pub mod eval;
pub mod exec;
pub mod funcs;
pub mod lexer;
pub mod parser;
pub mod value;

pub use error::{Error, EvalError, FunctionError, LexError, ParseError, TemplateSource};
pub use funcs::{Arity, FunctionRegistry};
pub use value::{Record, Value};

use ast::Node;
use exec::Executor;
use lexer::{DEFAULT_LEFT_DELIM, DEFAULT_RIGHT_DELIM};
use parser::Parser;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// What a `.key` lookup on a map does when the key is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingKey {
    /// Fail the render with [`EvalError::NoSuchField`].
    #[default]
    Error,
    /// Evaluate to [`Value::Null`], which prints as nothing.
    Null,
}

/// Per-template settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub left_delim: String,
    pub right_delim: String,
    pub missing_key: MissingKey,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            left_delim: DEFAULT_LEFT_DELIM.to_string(),
            right_delim: DEFAULT_RIGHT_DELIM.to_string(),
            missing_key: MissingKey::default(),
        }
    }
}

/// Configures and parses a [`Template`].
#[derive(Debug, Clone)]
pub struct TemplateBuilder {
    name: String,
    options: Options,
    functions: FunctionRegistry,
}

impl TemplateBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Options::default(),
            functions: FunctionRegistry::new(),
        }
    }

    pub fn delims(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.options.left_delim = left.into();
        self.options.right_delim = right.into();
        self
    }

    pub fn missing_key(mut self, missing_key: MissingKey) -> Self {
        self.options.missing_key = missing_key;
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Helpers the template may call. The registry is copied, so changing
    /// it afterwards has no effect on templates already parsed.
    pub fn functions(mut self, functions: &FunctionRegistry) -> Self {
        self.functions = functions.clone();
        self
    }

    pub fn parse(self, source: impl Into<Arc<str>>) -> Result<Template, ParseError> {
        let source = TemplateSource::new(self.name, source);
        let Options {
            left_delim,
            right_delim,
            ..
        } = &self.options;
        if left_delim.is_empty() || right_delim.is_empty() {
            return Err(ParseError::syntax(
                "empty delimiter",
                "non-empty left and right delimiters",
                ast::span(0, 0),
            ));
        }

        let nodes = Parser::with_delims(&source.source, left_delim, right_delim, &self.functions)
            .parse()?;
        debug!(
            template = %source.name,
            nodes = nodes.len(),
            helpers = self.functions.len(),
            "parsed template"
        );

        Ok(Template {
            source,
            options: self.options,
            nodes,
            functions: Arc::new(self.functions),
        })
    }
}

/// A parsed template, ready to execute.
///
/// Immutable after parsing: executions never touch the tree or the
/// registry, so one `Template` can be shared across threads.
#[derive(Debug, Clone)]
pub struct Template {
    source: TemplateSource,
    options: Options,
    nodes: Vec<Node>,
    functions: Arc<FunctionRegistry>,
}

impl Template {
    /// Parse with default options.
    pub fn parse(
        name: impl Into<String>,
        source: impl Into<Arc<str>>,
        functions: &FunctionRegistry,
    ) -> Result<Self, ParseError> {
        Self::builder(name).functions(functions).parse(source)
    }

    pub fn builder(name: impl Into<String>) -> TemplateBuilder {
        TemplateBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.source.name
    }

    pub fn source(&self) -> &str {
        &self.source.source
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Host helpers this template actually calls, in first-use order.
    pub fn host_functions(&self) -> Vec<String> {
        parser::called_functions(&self.nodes)
    }

    /// Render into a new string.
    pub fn execute(&self, data: &Value) -> Result<String, EvalError> {
        let mut out = String::with_capacity(self.source.source.len());
        self.execute_to(&mut out, data)?;
        Ok(out)
    }

    /// Render into `out`. On error, text written before the failure stays in
    /// `out`.
    pub fn execute_to<W>(&self, out: &mut W, data: &Value) -> Result<(), EvalError>
    where
        W: fmt::Write + ?Sized,
    {
        debug!(template = %self.name(), "executing template");
        let result = Executor::new(out, data.clone(), self.options.missing_key).run(&self.nodes, data);
        match &result {
            Ok(()) => debug!(template = %self.name(), "execution finished"),
            Err(err) => debug!(template = %self.name(), error = %err, "execution failed"),
        }
        result
    }

    /// Attach this template's source to `err` so the report can show it.
    pub fn report<E>(&self, err: E) -> miette::Report
    where
        E: miette::Diagnostic + Send + Sync + 'static,
    {
        self.source.report(err)
    }
}

/// Parse and execute `source` in one go, with built-ins only.
pub fn render(source: &str, data: &Value) -> Result<String, Error> {
    let template = Template::parse("template", source, &FunctionRegistry::new())?;
    Ok(template.execute(data)?)
}
