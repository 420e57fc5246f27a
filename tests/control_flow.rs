use shimmytmpl::{render, Arity, FunctionRegistry, Template, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn three() -> Value {
    Value::from(vec!["a", "b", "c"])
}

// ── range / else ──

#[test]
fn empty_range_runs_else_once() {
    let tpl = "{{ range . }}body{{ else }}empty{{ end }}";
    assert_eq!(render(tpl, &Value::from(Vec::<Value>::new())).unwrap(), "empty");
    assert_eq!(render(tpl, &Value::Map(Default::default())).unwrap(), "empty");
    assert_eq!(render(tpl, &Value::Int(0)).unwrap(), "empty");
}

#[test]
fn non_empty_range_skips_else() {
    let tpl = "{{ range . }}{{ . }}{{ else }}empty{{ end }}";
    assert_eq!(render(tpl, &three()).unwrap(), "abc");
}

#[test]
fn range_with_index_and_element() {
    let tpl = "{{ range $i, $v := . }}{{ $i }}:{{ $v }} {{ end }}";
    assert_eq!(render(tpl, &three()).unwrap(), "0:a 1:b 2:c ");
}

#[test]
fn root_variable_stays_reachable() {
    let data: Value = [("Items", Value::from(vec![1, 2])), ("Sep", Value::from("/"))]
        .into_iter()
        .collect();
    let tpl = "{{ range .Items }}{{ . }}{{ $.Sep }}{{ end }}";
    assert_eq!(render(tpl, &data).unwrap(), "1/2/");
}

// ── break / continue ──

/// Counts how many times the body's helper runs.
fn counting_registry() -> (FunctionRegistry, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let mut funcs = FunctionRegistry::new();
    let counter = Arc::clone(&hits);
    funcs.register("visit", Arity::Exact(1), move |args| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(args[0].clone())
    });
    (funcs, hits)
}

#[test]
fn break_on_first_element_processes_one() {
    let (funcs, hits) = counting_registry();
    let tpl = Template::parse("t", "{{ range . }}{{ visit . }}{{ break }}{{ end }}", &funcs).unwrap();
    assert_eq!(tpl.execute(&three()).unwrap(), "a");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn continue_skips_only_the_current_element() {
    let (funcs, hits) = counting_registry();
    let tpl = Template::parse(
        "t",
        r#"{{ range . }}{{ if eq . "b" }}{{ continue }}{{ end }}{{ visit . }}{{ end }}"#,
        &funcs,
    )
    .unwrap();
    assert_eq!(tpl.execute(&three()).unwrap(), "ac");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn break_inside_with_and_if_leaves_the_loop() {
    let tpl = r#"{{ range . }}{{ with . }}{{ if eq . "b" }}{{ break }}{{ end }}{{ . }}{{ end }}{{ end }}!"#;
    assert_eq!(render(tpl, &three()).unwrap(), "a!");
}

#[test]
fn break_in_else_of_inner_range_ends_outer_loop() {
    let data = Value::from(vec![Value::from(vec![1]), Value::from(Vec::<Value>::new()), Value::from(vec![3])]);
    let tpl = "{{ range . }}{{ range . }}{{ . }}{{ else }}{{ break }}{{ end }}{{ end }}";
    assert_eq!(render(tpl, &data).unwrap(), "1");
}

#[test]
fn same_template_after_break_starts_fresh() {
    let tpl = Template::parse("t", "{{ range . }}{{ . }}{{ break }}{{ end }}", &FunctionRegistry::new()).unwrap();
    assert_eq!(tpl.execute(&three()).unwrap(), "a");
    assert_eq!(tpl.execute(&three()).unwrap(), "a");
}

// ── variables ──

#[test]
fn loop_variables_do_not_leak() {
    let err = render("{{ range $v := . }}{{ end }}{{ $v }}", &three()).unwrap_err();
    assert!(err.to_string().contains("$v"), "{err}");
}

#[test]
fn inner_declaration_shadows_outer() {
    let tpl = r#"{{ $x := "outer" }}{{ with true }}{{ $x := "inner" }}{{ $x }} {{ end }}{{ $x }}"#;
    assert_eq!(render(tpl, &Value::Null).unwrap(), "inner outer");
}

#[test]
fn assignment_updates_enclosing_binding() {
    let tpl = r#"{{ $found := "none" }}{{ range . }}{{ if eq . "b" }}{{ $found = . }}{{ end }}{{ end }}{{ $found }}"#;
    assert_eq!(render(tpl, &three()).unwrap(), "b");
}

// ── if / with ──

#[test]
fn truthiness_of_each_kind() {
    let tpl = "{{ if . }}T{{ else }}F{{ end }}";
    let cases = [
        (Value::Null, "F"),
        (Value::Bool(false), "F"),
        (Value::Int(0), "F"),
        (Value::Float(0.0), "F"),
        (Value::from(""), "F"),
        (Value::from(Vec::<Value>::new()), "F"),
        (Value::Int(-1), "T"),
        (Value::from("0"), "T"),
        (three(), "T"),
    ];
    for (value, expected) in cases {
        assert_eq!(render(tpl, &value).unwrap(), expected, "{value:?}");
    }
}

#[test]
fn else_with_chain() {
    let tpl = "{{ with .a }}a={{ . }}{{ else with .b }}b={{ . }}{{ else }}neither{{ end }}";
    let only_b: Value = [("a", Value::Null), ("b", Value::from(2))].into_iter().collect();
    let none: Value = [("a", Value::Null), ("b", Value::Null)].into_iter().collect();
    assert_eq!(render(tpl, &only_b).unwrap(), "b=2");
    assert_eq!(render(tpl, &none).unwrap(), "neither");
}

#[test]
fn parenthesised_pipelines_and_chained_stages() {
    let data: Value = [("Name", "Ada")].into_iter().collect();
    assert_eq!(render(r#"{{ if (eq .Name "Ada") }}yes{{ end }}"#, &data).unwrap(), "yes");
    assert_eq!(render("{{ .Name | len | print }}", &data).unwrap(), "3");
    assert!(render("{{ (slice .Name 1).x }}", &data).is_err());
}
