//! Walking the parsed tree and writing output.
//!
//! The executor owns one render's [`Scope`] and borrows the caller's sink.
//! Loop control travels back up the walk as a [`Flow`] value; a failure is
//! an `Err` and aborts the render, leaving whatever was already written.

use crate::ast::*;
use crate::error::EvalError;
use crate::eval::{Evaluator, Scope};
use crate::value::Value;
use crate::MissingKey;
use std::fmt;
use tracing::trace;

/// How a node list finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Normal,
    Break,
    Continue,
}

pub struct Executor<'w, W: fmt::Write + ?Sized> {
    out: &'w mut W,
    scope: Scope,
    missing_key: MissingKey,
}

impl<'w, W: fmt::Write + ?Sized> Executor<'w, W> {
    pub fn new(out: &'w mut W, root: Value, missing_key: MissingKey) -> Self {
        Self {
            out,
            scope: Scope::new(root),
            missing_key,
        }
    }

    /// Render `nodes` with `dot` as the initial cursor.
    pub fn run(&mut self, nodes: &[Node], dot: &Value) -> Result<(), EvalError> {
        self.exec_list(nodes, dot).map(|_| ())
    }

    fn evaluator<'e>(&'e self, dot: &'e Value) -> Evaluator<'e> {
        Evaluator::new(&self.scope, dot, self.missing_key)
    }

    fn exec_list(&mut self, nodes: &[Node], dot: &Value) -> Result<Flow, EvalError> {
        for node in nodes {
            let flow = self.exec_node(node, dot)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_node(&mut self, node: &Node, dot: &Value) -> Result<Flow, EvalError> {
        match node {
            Node::Text(text) => {
                self.out
                    .write_str(text)
                    .map_err(|source| EvalError::Write {
                        source,
                        span: span(0, 0),
                    })?;
            }
            Node::Action(pipeline) => {
                let value = self.evaluator(dot).eval_pipeline(pipeline)?;
                match &pipeline.decl {
                    Some(decl) => self.bind(decl, &[value])?,
                    None => write!(self.out, "{value}").map_err(|source| EvalError::Write {
                        source,
                        span: pipeline.span,
                    })?,
                }
            }
            Node::Range(range) => return self.exec_range(range, dot),
            Node::If(branch) => return self.exec_branch(branch, dot, false),
            Node::With(branch) => return self.exec_branch(branch, dot, true),
            Node::Break(_) => return Ok(Flow::Break),
            Node::Continue(_) => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    /// Run `f` inside a fresh frame, popping it however `f` ends.
    fn in_frame<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EvalError>,
    ) -> Result<T, EvalError> {
        self.scope.push();
        let result = f(self);
        self.scope.pop();
        result
    }

    /// Bind declared variables to `values`, pairwise.
    fn bind(&mut self, decl: &Declaration, values: &[Value]) -> Result<(), EvalError> {
        for (name, value) in decl.vars.iter().zip(values) {
            match decl.kind {
                DeclKind::Declare => self.scope.declare(name.clone(), value.clone()),
                DeclKind::Assign => {
                    if !self.scope.assign(name, value.clone()) {
                        return Err(EvalError::UndefinedVariable {
                            name: name.trim_start_matches('$').to_string(),
                            span: decl.span,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn exec_range(&mut self, node: &RangeNode, dot: &Value) -> Result<Flow, EvalError> {
        let value = self.evaluator(dot).eval_pipeline(&node.pipeline)?;
        // Pairs are produced one at a time; `range N` never materialises 0..N.
        let items: Box<dyn Iterator<Item = (Value, Value)>> = match value {
            Value::Seq(items) => Box::new(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (Value::from(i), v)),
            ),
            Value::Map(map) => Box::new(map.into_iter().map(|(k, v)| (Value::String(k), v))),
            Value::Int(n) => Box::new((0..n.max(0)).map(|i| (Value::Int(i), Value::Int(i)))),
            Value::Null => Box::new(std::iter::empty()),
            other => {
                return Err(EvalError::NotIterable {
                    found: other.kind(),
                    span: node.pipeline.span,
                })
            }
        };
        let mut items = items.peekable();

        if items.peek().is_none() {
            return self.in_frame(|exec| exec.exec_list(&node.else_body, dot));
        }

        for (i, (key, elem)) in items.enumerate() {
            trace!(iteration = i, "range");
            let flow = self.in_frame(|exec| {
                if let Some(decl) = &node.pipeline.decl {
                    // One variable gets the element, two get key and element.
                    let values = if decl.vars.len() == 1 {
                        vec![elem.clone()]
                    } else {
                        vec![key, elem.clone()]
                    };
                    exec.bind(decl, &values)?;
                }
                exec.exec_list(&node.body, &elem)
            })?;
            if flow == Flow::Break {
                break;
            }
        }
        Ok(Flow::Normal)
    }

    /// `if` and `with`. The frame covers whichever branch runs, so a
    /// variable declared in the condition is visible in both.
    fn exec_branch(
        &mut self,
        node: &BranchNode,
        dot: &Value,
        rebind: bool,
    ) -> Result<Flow, EvalError> {
        let value = self.evaluator(dot).eval_pipeline(&node.pipeline)?;
        self.in_frame(|exec| {
            if let Some(decl) = &node.pipeline.decl {
                exec.bind(decl, std::slice::from_ref(&value))?;
            }
            match (value.is_truthy(), rebind) {
                (true, true) => exec.exec_list(&node.body, &value),
                (true, false) => exec.exec_list(&node.body, dot),
                (false, _) => exec.exec_list(&node.else_body, dot),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::FunctionRegistry;
    use crate::parser::Parser;

    fn run(source: &str, data: &Value) -> (String, Result<(), EvalError>, usize) {
        let funcs = FunctionRegistry::new();
        let nodes = Parser::new(source, &funcs).parse().expect("parse");
        let mut out = String::new();
        let mut exec = Executor::new(&mut out, data.clone(), MissingKey::Error);
        let result = exec.run(&nodes, data);
        let depth = exec.scope.depth();
        (out, result, depth)
    }

    fn render(source: &str, data: &Value) -> String {
        let (out, result, _) = run(source, data);
        result.expect("render");
        out
    }

    #[test]
    fn text_and_actions() {
        let data: Value = [("Name", "Ada")].into_iter().collect();
        assert_eq!(render("Hello, {{ .Name }}!", &data), "Hello, Ada!");
        assert_eq!(render("{{ nil }}|{{ 1.5 }}|{{ true }}", &Value::Null), "|1.5|true");
    }

    #[test]
    fn declarations_produce_no_output() {
        assert_eq!(render("{{ $x := 3 }}[{{ $x }}]", &Value::Null), "[3]");
    }

    #[test]
    fn assignment_reaches_outer_frame() {
        let data = Value::from(vec![1, 2, 3]);
        let out = render("{{ $last := 0 }}{{ range . }}{{ $last = . }}{{ end }}{{ $last }}", &data);
        assert_eq!(out, "3");
    }

    #[test]
    fn assigning_undeclared_variable_fails() {
        let (_, result, _) = run("{{ $x = 1 }}", &Value::Null);
        assert!(matches!(
            result,
            Err(EvalError::UndefinedVariable { ref name, .. }) if name == "x"
        ));
    }

    #[test]
    fn range_over_map_with_key_and_value() {
        let data: Value = [("b", 2), ("a", 1)].into_iter().collect();
        assert_eq!(render("{{ range $k, $v := . }}{{ $k }}={{ $v }};{{ end }}", &data), "b=2;a=1;");
        // A single variable binds the value.
        assert_eq!(render("{{ range $v := . }}{{ $v }}{{ end }}", &data), "21");
    }

    #[test]
    fn range_over_int_and_null() {
        assert_eq!(render("{{ range 3 }}{{ . }}{{ end }}", &Value::Null), "012");
        assert_eq!(render("{{ range . }}x{{ else }}none{{ end }}", &Value::Null), "none");
    }

    #[test]
    fn range_over_huge_int_stops_at_break() {
        let out = render("{{ range 100000000000000 }}{{ . }}{{ break }}{{ end }}", &Value::Null);
        assert_eq!(out, "0");
        let out = render("{{ range $i := . }}{{ if eq $i 3 }}{{ break }}{{ end }}{{ $i }}{{ end }}", &Value::Int(i64::MAX));
        assert_eq!(out, "012");
    }

    #[test]
    fn range_over_string_is_not_iterable() {
        let (_, result, depth) = run("{{ range . }}{{ end }}", &Value::from("abc"));
        assert!(matches!(result, Err(EvalError::NotIterable { found: "string", .. })));
        assert_eq!(depth, 1);
    }

    #[test]
    fn break_and_continue() {
        let data = Value::from(vec![1, 2, 3]);
        assert_eq!(render("{{ range . }}{{ if eq . 2 }}{{ break }}{{ end }}{{ . }}{{ end }}", &data), "1");
        assert_eq!(render("{{ range . }}{{ if eq . 2 }}{{ continue }}{{ end }}{{ . }}{{ end }}", &data), "13");
    }

    #[test]
    fn break_in_nested_range_only_ends_inner_loop() {
        let data = Value::from(vec![vec![1, 2], vec![3, 4]]);
        let out = render("{{ range . }}{{ range . }}{{ . }}{{ break }}{{ end }};{{ end }}", &data);
        assert_eq!(out, "1;3;");
    }

    #[test]
    fn frames_are_popped_after_errors() {
        let data = Value::from(vec![1, 2]);
        let (out, result, depth) = run("{{ range . }}{{ with . }}{{ . }}{{ $nope }}{{ end }}{{ end }}", &data);
        assert_eq!(out, "1");
        assert!(result.is_err());
        assert_eq!(depth, 1);
    }

    #[test]
    fn with_rebinds_dot_only_when_truthy() {
        let data: Value = [("User", "ada"), ("Empty", "")].into_iter().collect();
        assert_eq!(render("{{ with .User }}{{ . }}{{ end }}", &data), "ada");
        assert_eq!(
            render("{{ with .Empty }}{{ . }}{{ else }}{{ .User }}{{ end }}", &data),
            "ada"
        );
    }

    #[test]
    fn if_declaration_is_visible_in_else() {
        let out = render("{{ if $x := 0 }}yes{{ else }}no {{ $x }}{{ end }}", &Value::Null);
        assert_eq!(out, "no 0");
    }

    #[test]
    fn else_if_chain() {
        let tpl = "{{ if eq . 1 }}one{{ else if eq . 2 }}two{{ else }}many{{ end }}";
        assert_eq!(render(tpl, &Value::Int(1)), "one");
        assert_eq!(render(tpl, &Value::Int(2)), "two");
        assert_eq!(render(tpl, &Value::Int(7)), "many");
    }

    #[test]
    fn collections_render_canonically() {
        let data: Value = [("xs", Value::from(vec![1, 2])), ("m", [("k", "v")].into_iter().collect())]
            .into_iter()
            .collect();
        assert_eq!(render("{{ .xs }} {{ .m }}", &data), "[1 2] map[k:v]");
    }
}
