//! Expression evaluation.
//!
//! Expressions → Values; turning values into text is the executor's job.

use crate::ast::*;
use crate::error::EvalError;
use crate::funcs::{sprint, sprintln, Builtin, Callee};
use crate::value::Value;
use crate::MissingKey;
use std::cmp::Ordering;
use tracing::trace;

/// Variable bindings, innermost frame last.
///
/// The outermost frame binds `$` to the root data. Lookups walk frames from
/// the innermost outwards; within a frame the latest declaration wins.
#[derive(Debug, Clone)]
pub struct Scope {
    frames: Vec<Vec<(String, Value)>>,
}

impl Scope {
    pub fn new(root: Value) -> Self {
        Self {
            frames: vec![vec![("$".to_string(), root)]],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(Vec::new());
    }

    /// The root frame is never popped.
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Bind `name` in the innermost frame.
    pub fn declare(&mut self, name: impl Into<String>, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.push((name.into(), value));
        }
    }

    /// Overwrite the nearest existing binding. Returns false if there is none.
    pub fn assign(&mut self, name: &str, value: Value) -> bool {
        let slot = self
            .frames
            .iter_mut()
            .rev()
            .flat_map(|frame| frame.iter_mut().rev())
            .find(|(n, _)| n == name);
        match slot {
            Some((_, v)) => {
                *v = value;
                true
            }
            None => false,
        }
    }
}

pub struct Evaluator<'e> {
    scope: &'e Scope,
    dot: &'e Value,
    missing_key: MissingKey,
}

impl<'e> Evaluator<'e> {
    pub fn new(scope: &'e Scope, dot: &'e Value, missing_key: MissingKey) -> Self {
        Self {
            scope,
            dot,
            missing_key,
        }
    }

    /// Run every stage, feeding each result into the next as its last
    /// argument. Declarations are left to the caller.
    pub fn eval_pipeline(&self, pipeline: &Pipeline) -> Result<Value, EvalError> {
        let mut value = None;
        for stage in &pipeline.stages {
            value = Some(self.eval_stage(stage, value.take())?);
        }
        Ok(value.unwrap_or_default())
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        self.eval_stage(expr, None)
    }

    fn eval_args(&self, args: &[Expr], piped: Option<Value>) -> Result<Vec<Value>, EvalError> {
        let mut values = args
            .iter()
            .map(|a| self.eval(a))
            .collect::<Result<Vec<_>, _>>()?;
        values.extend(piped);
        Ok(values)
    }

    fn eval_stage(&self, expr: &Expr, piped: Option<Value>) -> Result<Value, EvalError> {
        match &expr.kind {
            ExprKind::Literal(v) => Ok(v.clone()),
            ExprKind::Dot => Ok(self.dot.clone()),
            ExprKind::Variable(name) => {
                self.scope
                    .get(name)
                    .cloned()
                    .ok_or_else(|| EvalError::UndefinedVariable {
                        name: name.trim_start_matches('$').to_string(),
                        span: expr.span,
                    })
            }
            ExprKind::Pipeline(inner) => self.eval_pipeline(inner),
            ExprKind::FieldChain { root, fields, args } => {
                let mut receiver = self.eval(root)?;
                let has_args = !args.is_empty() || piped.is_some();
                let mut final_args = Some(self.eval_args(args, piped)?);
                for (i, name) in fields.iter().enumerate() {
                    let is_last = i + 1 == fields.len();
                    let call_args = if is_last {
                        final_args.take().unwrap_or_default()
                    } else {
                        Vec::new()
                    };
                    receiver = self.access(
                        &receiver,
                        name,
                        &call_args,
                        is_last && has_args,
                        expr.span,
                    )?;
                }
                Ok(receiver)
            }
            ExprKind::Call { name, callee, args } => match callee {
                Callee::Builtin(builtin) => self.call_builtin(*builtin, args, piped, expr.span),
                Callee::Host(function) => {
                    let values = self.eval_args(args, piped)?;
                    trace!(function = %name, args = values.len(), "calling helper");
                    function
                        .call(&values)
                        .map_err(|source| EvalError::FunctionFailed {
                            name: name.clone(),
                            source,
                            span: expr.span,
                        })
                }
            },
            ExprKind::Slice { operands } => {
                let values = self.eval_args(operands, piped)?;
                slice(values, expr.span)
            }
        }
    }

    /// One step of dot access: record field, record method, map key, then
    /// sequence index.
    fn access(
        &self,
        receiver: &Value,
        name: &str,
        args: &[Value],
        has_args: bool,
        span: Span,
    ) -> Result<Value, EvalError> {
        let not_callable = || EvalError::NotCallable {
            name: name.to_string(),
            span,
        };
        match receiver {
            Value::Record(record) => {
                if let Some(value) = record.field(name) {
                    if has_args {
                        return Err(not_callable());
                    }
                    return Ok(value);
                }
                match record.method(name, args) {
                    Some(result) => result.map_err(|source| EvalError::FunctionFailed {
                        name: format!("{}.{}", record.type_name(), name),
                        source,
                        span,
                    }),
                    None => Err(EvalError::NoSuchField {
                        field: name.to_string(),
                        receiver: record.type_name().to_string(),
                        known: record.field_names(),
                        span,
                    }),
                }
            }
            Value::Map(map) => {
                if has_args {
                    return Err(not_callable());
                }
                match (map.get(name), self.missing_key) {
                    (Some(value), _) => Ok(value.clone()),
                    (None, MissingKey::Null) => Ok(Value::Null),
                    (None, MissingKey::Error) => Err(EvalError::NoSuchField {
                        field: name.to_string(),
                        receiver: "map".to_string(),
                        known: map.keys().cloned().collect(),
                        span,
                    }),
                }
            }
            Value::Seq(items) => {
                if has_args {
                    return Err(not_callable());
                }
                let Ok(index) = name.parse::<usize>() else {
                    return Err(EvalError::NoSuchField {
                        field: name.to_string(),
                        receiver: "sequence".to_string(),
                        known: Vec::new(),
                        span,
                    });
                };
                items
                    .get(index)
                    .cloned()
                    .ok_or_else(|| EvalError::IndexOutOfRange {
                        index: i64::try_from(index).unwrap_or(i64::MAX),
                        len: items.len(),
                        span,
                    })
            }
            other => Err(EvalError::NoSuchField {
                field: name.to_string(),
                receiver: other.describe(),
                known: Vec::new(),
                span,
            }),
        }
    }

    fn call_builtin(
        &self,
        builtin: Builtin,
        args: &[Expr],
        piped: Option<Value>,
        span: Span,
    ) -> Result<Value, EvalError> {
        // `and` / `or` stop evaluating at the first deciding operand.
        if let Builtin::And | Builtin::Or = builtin {
            let want = builtin == Builtin::Or;
            let mut last = Value::Null;
            for arg in args {
                last = self.eval(arg)?;
                if last.is_truthy() == want {
                    return Ok(last);
                }
            }
            return Ok(piped.unwrap_or(last));
        }

        let values = self.eval_args(args, piped)?;
        let first = values.first().cloned().unwrap_or_default();
        match builtin {
            Builtin::Not => Ok(Value::Bool(!first.is_truthy())),
            Builtin::Len => first
                .len()
                .map(Value::from)
                .ok_or_else(|| EvalError::WrongType {
                    op: "len",
                    expected: "string, sequence or map",
                    found: first.kind(),
                    span,
                }),
            Builtin::Index => self.index(first, &values[1..], span),
            Builtin::Print => Ok(Value::String(sprint(&values))),
            Builtin::Println => Ok(Value::String(sprintln(&values))),
            Builtin::Eq => Ok(Value::Bool(values[1..].iter().any(|v| *v == first))),
            Builtin::Ne => Ok(Value::Bool(values.get(1) != Some(&first))),
            Builtin::Lt | Builtin::Le | Builtin::Gt | Builtin::Ge => {
                let second = values.get(1).cloned().unwrap_or_default();
                let ordering = first.compare(&second).ok_or_else(|| EvalError::TypeMismatch {
                    op: builtin.name(),
                    left: first.kind(),
                    right: second.kind(),
                    span,
                })?;
                let result = match builtin {
                    Builtin::Lt => ordering == Ordering::Less,
                    Builtin::Le => ordering != Ordering::Greater,
                    Builtin::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                };
                Ok(Value::Bool(result))
            }
            Builtin::And | Builtin::Or => Ok(first),
        }
    }

    /// `index x 1 "key"` is `x[1]["key"]`.
    fn index(&self, mut value: Value, keys: &[Value], span: Span) -> Result<Value, EvalError> {
        for key in keys {
            value = match (&value, key) {
                (Value::Seq(items), Value::Int(i)) => usize::try_from(*i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(|| EvalError::IndexOutOfRange {
                        index: *i,
                        len: items.len(),
                        span,
                    })?,
                (Value::Map(map), Value::String(k)) => match (map.get(k), self.missing_key) {
                    (Some(v), _) => v.clone(),
                    (None, MissingKey::Null) => Value::Null,
                    (None, MissingKey::Error) => {
                        return Err(EvalError::NoSuchField {
                            field: k.clone(),
                            receiver: "map".to_string(),
                            known: map.keys().cloned().collect(),
                            span,
                        })
                    }
                },
                (Value::Seq(_), other) => {
                    return Err(EvalError::WrongType {
                        op: "index",
                        expected: "int",
                        found: other.kind(),
                        span,
                    })
                }
                (Value::Map(_), other) => {
                    return Err(EvalError::WrongType {
                        op: "index",
                        expected: "string",
                        found: other.kind(),
                        span,
                    })
                }
                (other, _) => {
                    return Err(EvalError::WrongType {
                        op: "index",
                        expected: "sequence or map",
                        found: other.kind(),
                        span,
                    })
                }
            };
        }
        Ok(value)
    }
}

/// `slice target [start [end]]` in chars for strings, elements for sequences.
fn slice(values: Vec<Value>, span: Span) -> Result<Value, EvalError> {
    let mut values = values.into_iter();
    let target = values.next().unwrap_or_default();
    let len = match &target {
        Value::String(s) => s.chars().count(),
        Value::Seq(items) => items.len(),
        other => {
            return Err(EvalError::WrongType {
                op: "slice",
                expected: "string or sequence",
                found: other.kind(),
                span,
            })
        }
    };
    let bound = |v: Value| match v {
        Value::Int(i) => Ok(i),
        other => Err(EvalError::WrongType {
            op: "slice",
            expected: "int",
            found: other.kind(),
            span,
        }),
    };
    let max = i64::try_from(len).unwrap_or(i64::MAX);
    let start = values.next().map(bound).transpose()?.unwrap_or(0);
    let end = values.next().map(bound).transpose()?.unwrap_or(max);
    if start < 0 || end < start || end > max {
        return Err(EvalError::SliceOutOfRange {
            start,
            end,
            len,
            span,
        });
    }

    // Bounds are checked above, so both fit in usize.
    let (start, end) = (start as usize, end as usize);
    Ok(match target {
        Value::String(s) => Value::String(s.chars().skip(start).take(end - start).collect()),
        Value::Seq(items) => Value::Seq(items[start..end].to_vec()),
        _ => Value::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::FunctionRegistry;
    use crate::parser::Parser;
    use indexmap::IndexMap;

    fn eval_with(source: &str, dot: &Value, scope: &Scope) -> Result<Value, EvalError> {
        let funcs = FunctionRegistry::new();
        let nodes = Parser::new(source, &funcs).parse().expect("parse");
        let Some(Node::Action(pipeline)) = nodes.first() else {
            panic!("expected a single action in {source:?}");
        };
        Evaluator::new(scope, dot, MissingKey::Error).eval_pipeline(pipeline)
    }

    fn eval(source: &str, dot: &Value) -> Result<Value, EvalError> {
        eval_with(source, dot, &Scope::new(dot.clone()))
    }

    #[test]
    fn scope_lookup_is_innermost_first() {
        let mut scope = Scope::new(Value::Null);
        scope.declare("$x", Value::Int(1));
        scope.push();
        scope.declare("$x", Value::Int(2));
        assert_eq!(scope.get("$x"), Some(&Value::Int(2)));
        assert!(scope.assign("$x", Value::Int(3)));
        scope.pop();
        assert_eq!(scope.get("$x"), Some(&Value::Int(1)));
        assert!(!scope.assign("$y", Value::Null));
        scope.pop();
        assert_eq!(scope.depth(), 1);
        assert_eq!(scope.get("$"), Some(&Value::Null));
    }

    #[test]
    fn map_and_sequence_access() {
        let data: Value = [("Items", Value::from(vec!["a", "b"]))].into_iter().collect();
        assert_eq!(eval("{{ .Items.1 }}", &data).unwrap(), Value::from("b"));
        assert!(matches!(
            eval("{{ .Items.5 }}", &data).unwrap_err(),
            EvalError::IndexOutOfRange { index: 5, len: 2, .. }
        ));
        assert!(matches!(
            eval("{{ .Missing }}", &data).unwrap_err(),
            EvalError::NoSuchField { .. }
        ));
    }

    #[test]
    fn missing_key_null_policy() {
        let data = Value::Map(IndexMap::new());
        let scope = Scope::new(data.clone());
        let funcs = FunctionRegistry::new();
        let nodes = Parser::new("{{ .Nope }}", &funcs).parse().unwrap();
        let Node::Action(p) = &nodes[0] else { panic!() };
        let value = Evaluator::new(&scope, &data, MissingKey::Null).eval_pipeline(p);
        assert_eq!(value.unwrap(), Value::Null);
    }

    #[test]
    fn undefined_variable() {
        let err = eval("{{ $nope }}", &Value::Null).unwrap_err();
        assert!(matches!(err, EvalError::UndefinedVariable { ref name, .. } if name == "nope"));
    }

    #[test]
    fn slice_strings_by_char() {
        assert_eq!(eval(r#"{{ slice "left1" 0 4 }}"#, &Value::Null).unwrap(), Value::from("left"));
        assert_eq!(eval(r#"{{ slice "héllo" 1 3 }}"#, &Value::Null).unwrap(), Value::from("él"));
        assert_eq!(eval(r#"{{ slice "abc" 1 }}"#, &Value::Null).unwrap(), Value::from("bc"));
        assert!(matches!(
            eval(r#"{{ slice "abc" 2 1 }}"#, &Value::Null).unwrap_err(),
            EvalError::SliceOutOfRange { start: 2, end: 1, .. }
        ));
        assert!(matches!(
            eval(r#"{{ slice "abc" 0 9 }}"#, &Value::Null).unwrap_err(),
            EvalError::SliceOutOfRange { .. }
        ));
        assert!(matches!(
            eval(r#"{{ slice "abc" -1 }}"#, &Value::Null).unwrap_err(),
            EvalError::SliceOutOfRange { .. }
        ));
    }

    #[test]
    fn pipeline_appends_last_argument() {
        assert_eq!(eval(r#"{{ "abc" | len }}"#, &Value::Null).unwrap(), Value::Int(3));
        assert_eq!(eval(r#"{{ "b" | eq "b" }}"#, &Value::Null).unwrap(), Value::Bool(true));
        assert_eq!(eval(r#"{{ "abcdef" | slice }}"#, &Value::Null).unwrap(), Value::from("abcdef"));
    }

    #[test]
    fn comparisons_are_kind_aware() {
        assert_eq!(eval(r#"{{ eq 1 "1" }}"#, &Value::Null).unwrap(), Value::Bool(false));
        assert_eq!(eval(r#"{{ eq 2 1 2 }}"#, &Value::Null).unwrap(), Value::Bool(true));
        assert_eq!(eval(r#"{{ ne "a" "b" }}"#, &Value::Null).unwrap(), Value::Bool(true));
        assert_eq!(eval("{{ lt 1 1.5 }}", &Value::Null).unwrap(), Value::Bool(true));
        assert_eq!(eval("{{ ge 2 2 }}", &Value::Null).unwrap(), Value::Bool(true));
        assert_eq!(eval("{{ eq 9007199254740993 9007199254740992.0 }}", &Value::Null).unwrap(), Value::Bool(false));
        assert_eq!(eval("{{ gt 9007199254740993 9007199254740992.0 }}", &Value::Null).unwrap(), Value::Bool(true));
        assert!(matches!(
            eval(r#"{{ lt 1 "2" }}"#, &Value::Null).unwrap_err(),
            EvalError::TypeMismatch { op: "lt", left: "int", right: "string", .. }
        ));
    }

    #[test]
    fn and_or_short_circuit() {
        // `$nope` would fail if evaluated.
        assert_eq!(eval("{{ and 0 $nope }}", &Value::Null).unwrap(), Value::Int(0));
        assert_eq!(eval(r#"{{ or "x" $nope }}"#, &Value::Null).unwrap(), Value::from("x"));
        assert_eq!(eval("{{ and 1 2 }}", &Value::Null).unwrap(), Value::Int(2));
        assert_eq!(eval("{{ not 0 }}", &Value::Null).unwrap(), Value::Bool(true));
    }

    #[test]
    fn index_builtin() {
        let data: Value = [("m", Value::from(vec![10, 20]))].into_iter().collect();
        assert_eq!(eval(r#"{{ index . "m" 1 }}"#, &data).unwrap(), Value::Int(20));
        assert!(matches!(
            eval(r#"{{ index . "m" -1 }}"#, &data).unwrap_err(),
            EvalError::IndexOutOfRange { index: -1, .. }
        ));
        assert!(matches!(
            eval("{{ index 3 0 }}", &data).unwrap_err(),
            EvalError::WrongType { op: "index", .. }
        ));
    }

    #[test]
    fn variable_field_chain() {
        let mut scope = Scope::new(Value::Null);
        let node: Value = [("Data", [("k", "v")].into_iter().collect::<Value>())]
            .into_iter()
            .collect();
        scope.declare("$node", node);
        assert_eq!(eval_with("{{ $node.Data.k }}", &Value::Null, &scope).unwrap(), Value::from("v"));
    }

    #[test]
    fn field_on_scalar_fails() {
        let err = eval("{{ .Name }}", &Value::Int(3)).unwrap_err();
        assert!(matches!(err, EvalError::NoSuchField { ref receiver, .. } if receiver == "int"));
    }
}
