use shimmytmpl::{render, Error, EvalError, FunctionRegistry, LexError, ParseError, Template, Value};

// ── Literals and whitespace ──

#[test]
fn plain_text_is_identity() {
    let inputs = [
        "",
        "Hello, world!",
        "trailing newline\n",
        "  leading and trailing  ",
        "single braces { } and } {",
        "こんにちは 🌍\n\ttab",
    ];
    for input in inputs {
        assert_eq!(render(input, &Value::Null).unwrap(), input);
    }
}

#[test]
fn trim_markers_are_idempotent() {
    let inputs = [
        "a  \n {{- \"\" -}} \n  b",
        "x {{- /* note */ -}} y",
        "{{- \"\" }}   lead",
        "tail   {{ \"\" -}}",
        "one\n\n{{- /* drop blank lines */}}\ntwo",
    ];
    for input in inputs {
        let once = render(input, &Value::Null).unwrap();
        let twice = render(&once, &Value::Null).unwrap();
        assert_eq!(once, twice, "input: {input:?}");
    }
}

#[test]
fn trim_removes_all_adjacent_whitespace() {
    let rendered = render("a \t\r\n {{- 1 -}} \n\t b", &Value::Null).unwrap();
    assert_eq!(rendered, "a1b");
}

#[test]
fn dash_without_space_is_a_number() {
    assert_eq!(render("{{-3}}", &Value::Null).unwrap(), "-3");
}

#[test]
fn comments_produce_nothing() {
    assert_eq!(render("a{{/* hidden */}}b", &Value::Null).unwrap(), "ab");
}

#[test]
fn special_characters_are_not_escaped() {
    let data: Value = [("s", "Hello <world> & \"friends\"")].into_iter().collect();
    assert_eq!(render("{{ .s }}", &data).unwrap(), "Hello <world> & \"friends\"");
}

#[test]
fn string_escapes_and_raw_strings() {
    assert_eq!(render(r#"{{ "a\tb\n" }}"#, &Value::Null).unwrap(), "a\tb\n");
    assert_eq!(render(r"{{ `raw\n` }}", &Value::Null).unwrap(), r"raw\n");
}

#[test]
fn print_builtins() {
    assert_eq!(render(r#"{{ print 1 2 "x" 3 }}"#, &Value::Null).unwrap(), "1 2x3");
    assert_eq!(render(r#"{{ println "a" 1 }}"#, &Value::Null).unwrap(), "a 1\n");
}

// ── Parse-time failures ──

#[test]
fn unclosed_action_is_a_lex_error() {
    let err = Template::parse("t", "Hi {{ .Name", &FunctionRegistry::new()).unwrap_err();
    match err {
        ParseError::Lex(LexError::UnterminatedAction { close, span }) => {
            assert_eq!(close, "}}");
            assert_eq!(span.offset(), 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn unclosed_string_and_comment() {
    assert!(matches!(
        Template::parse("t", r#"{{ "abc }}"#, &FunctionRegistry::new()),
        Err(ParseError::Lex(LexError::UnterminatedString { .. }))
    ));
    assert!(matches!(
        Template::parse("t", "{{/* abc }}", &FunctionRegistry::new()),
        Err(ParseError::Lex(LexError::UnterminatedComment { .. }))
    ));
}

#[test]
fn undefined_function_fails_before_execution() {
    let err = Template::parse("t", "{{ shout .Name }}", &FunctionRegistry::new()).unwrap_err();
    assert!(matches!(err, ParseError::UndefinedFunction { ref name, .. } if name == "shout"));
}

#[test]
fn break_outside_range_fails_at_parse_time() {
    for source in ["{{ break }}", "{{ if true }}{{ continue }}{{ end }}", "{{ range . }}{{ else }}{{ break }}{{ end }}"] {
        let err = Template::parse("t", source, &FunctionRegistry::new()).unwrap_err();
        assert!(matches!(err, ParseError::IllegalControlFlow { .. }), "{source}: {err:?}");
    }
}

#[test]
fn wrong_arity_counts_piped_value() {
    let err = Template::parse("t", r#"{{ "a" | eq "a" "b" "c" | not }}"#, &FunctionRegistry::new());
    assert!(err.is_ok());

    let err = Template::parse("t", r#"{{ "a" | len "b" }}"#, &FunctionRegistry::new()).unwrap_err();
    assert!(matches!(err, ParseError::WrongArity { ref name, got: 2, .. } if name == "len"));
}

#[test]
fn structural_errors() {
    for source in [
        "{{ end }}",
        "{{ else }}",
        "{{ if true }}open",
        "{{ }}",
        "{{ (1 }}",
        "{{ range . }}{{ else if true }}{{ end }}",
    ] {
        let err = Template::parse("t", source, &FunctionRegistry::new()).unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }), "{source}: {err:?}");
    }
}

// ── Execution failures ──

#[test]
fn no_such_field_keeps_earlier_output() {
    let tpl = Template::parse("t", "before {{ .Name }} {{ .Nmae }} after", &FunctionRegistry::new()).unwrap();
    let data: Value = [("Name", "Ada")].into_iter().collect();

    let mut out = String::new();
    let err = tpl.execute_to(&mut out, &data).unwrap_err();
    assert_eq!(out, "before Ada ");
    match err {
        EvalError::NoSuchField { field, known, .. } => {
            assert_eq!(field, "Nmae");
            assert_eq!(known, vec!["Name".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn failed_render_leaves_template_reusable() {
    let tpl = Template::parse("t", "{{ .x }}", &FunctionRegistry::new()).unwrap();
    assert!(tpl.execute(&Value::Null).is_err());
    let data: Value = [("x", 7)].into_iter().collect();
    assert_eq!(tpl.execute(&data).unwrap(), "7");
}

#[test]
fn host_function_errors_surface_with_cause() {
    let mut funcs = FunctionRegistry::new();
    funcs.register("fail", shimmytmpl::Arity::Exact(0), |_| Err("boom".into()));
    let tpl = Template::parse("t", "{{ fail }}", &funcs).unwrap();
    let err = tpl.execute(&Value::Null).unwrap_err();
    assert_eq!(err.to_string(), "error calling `fail`");
    let cause = std::error::Error::source(&err).map(ToString::to_string);
    assert_eq!(cause.as_deref(), Some("boom"));
}

#[test]
fn error_spans_point_into_source() {
    let source = "ok {{ .missing }}";
    let err = render(source, &Value::Map(Default::default())).unwrap_err();
    let Error::Eval(err) = err else {
        panic!("expected an eval error");
    };
    let span = err.span();
    assert_eq!(&source[span.offset()..span.offset() + span.len()], ".missing");
}
