//! End-to-end tests: compile Flow source against a test registry,
//! invoke handlers, observe consumption and native side effects.

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::rc::Rc;

use flow_core::{FlowValue, NativeRegistry, Runtime, ValueKind};

/// Build a runtime whose error handler prints to stderr so failing
/// compiles are diagnosable in test output
fn runtime(configure: impl FnOnce(&mut NativeRegistry)) -> Runtime {
    let mut registry = NativeRegistry::new();
    configure(&mut registry);
    let mut rt = Runtime::new(registry);
    rt.set_error_handler(|m| eprintln!("flow: {m}"));
    rt
}

fn compile(rt: &mut Runtime, source: &str) {
    assert!(rt.compile_source(source), "compile failed: {source}");
}

fn invoke_main(rt: &Runtime) -> bool {
    let main = rt.find_handler("main").expect("handler 'main' not found");
    rt.invoke(&main, std::ptr::null_mut())
}

/// Register a `mark` native handler that sets a flag and consumes
fn with_mark(registry: &mut NativeRegistry) -> Rc<Cell<bool>> {
    let flag = Rc::new(Cell::new(false));
    let inner = Rc::clone(&flag);
    registry
        .register_handler("mark", move |call| {
            inner.set(true);
            call.ret().set_boolean(true);
        })
        .unwrap();
    flag
}

#[test]
fn empty_handler_consumes_nothing() {
    let mut rt = runtime(|_| {});
    compile(&mut rt, "handler main { }");
    assert!(!invoke_main(&rt));
}

#[test]
fn native_handler_consumes() {
    let mut rt = runtime(|reg| {
        reg.register_handler("consume", |call| call.ret().set_boolean(true))
            .unwrap();
    });
    compile(&mut rt, "handler main { consume; }");
    assert!(invoke_main(&rt));
}

#[test]
fn native_handler_returning_false_falls_through() {
    let mut rt = runtime(|reg| {
        reg.register_handler("pass", |call| call.ret().set_boolean(false))
            .unwrap();
    });
    compile(&mut rt, "handler main { pass; pass; }");
    assert!(!invoke_main(&rt));
}

#[test]
fn short_circuit_or_skips_the_right_side() {
    let called = Rc::new(Cell::new(false));
    let inner = Rc::clone(&called);
    let mut rt = runtime(move |reg| {
        reg.register_function("crash", ValueKind::Boolean, move |call| {
            inner.set(true);
            call.ret().set_boolean(true);
        })
        .unwrap();
    });
    compile(&mut rt, "handler main { if (true || crash()) return; }");
    assert!(!invoke_main(&rt));
    assert!(!called.get(), "crash() must not be evaluated");
}

#[test]
fn or_evaluates_the_right_side_when_needed() {
    let called = Rc::new(Cell::new(false));
    let inner = Rc::clone(&called);
    let mut rt = runtime(move |reg| {
        with_mark(reg);
        reg.register_function("probe", ValueKind::Boolean, move |call| {
            inner.set(true);
            call.ret().set_boolean(true);
        })
        .unwrap();
    });
    compile(&mut rt, "handler main { if (false || probe()) mark; }");
    assert!(invoke_main(&rt));
    assert!(called.get());
}

#[test]
fn case_insensitive_string_equality() {
    let mut flag = None;
    let mut rt = runtime(|reg| flag = Some(with_mark(reg)));
    compile(&mut rt, "handler main { if (\"Foo\" == 'foo') mark; }");
    assert!(invoke_main(&rt));
    assert!(flag.unwrap().get());
}

#[test]
fn string_inequality_and_ordering() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(
        &mut rt,
        r#"handler main {
            if ("alpha" != "beta" && "alpha" < "beta" && "beta" > "ALPHA") mark;
        }"#,
    );
    assert!(invoke_main(&rt));
}

#[test]
fn prefix_match_is_case_insensitive() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(&mut rt, "handler main { if (\"foobar\" =^ \"FOO\") mark; }");
    assert!(invoke_main(&rt));
}

#[test]
fn prefix_shorter_than_pattern_does_not_match() {
    let mut flag = None;
    let mut rt = runtime(|reg| flag = Some(with_mark(reg)));
    compile(&mut rt, "handler main { if (\"foo\" =^ \"foobar\") mark; }");
    assert!(!invoke_main(&rt));
    assert!(!flag.unwrap().get());
}

#[test]
fn suffix_match() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(
        &mut rt,
        "handler main { if (\"index.html\" =$ \".HTML\") mark; }",
    );
    assert!(invoke_main(&rt));
}

#[test]
fn number_in_array() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(&mut rt, "handler main { if (42 in [1, 2, 42, 7]) mark; }");
    assert!(invoke_main(&rt));
}

#[test]
fn string_not_in_array() {
    let mut flag = None;
    let mut rt = runtime(|reg| flag = Some(with_mark(reg)));
    compile(&mut rt, "handler main { if (\"x\" in [\"a\", \"b\"]) mark; }");
    assert!(!invoke_main(&rt));
    assert!(!flag.unwrap().get());
}

#[test]
fn substring_test() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(&mut rt, "handler main { if (\"BAR\" in \"rhubarb\") mark; }");
    assert!(invoke_main(&rt));
}

#[test]
fn arithmetic_operators() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(
        &mut rt,
        r#"handler main {
            if (2 ** 10 == 1024 && 7 * 6 == 42 && 9 / 3 == 3
                && 10 - 3 == 7 && 1 + 1 == 2 && -5 + 6 == 1) mark;
        }"#,
    );
    assert!(invoke_main(&rt));
}

#[test]
fn logical_operators() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(
        &mut rt,
        r#"handler main {
            if ((true xor false) && !(true xor true) && !false) mark;
        }"#,
    );
    assert!(invoke_main(&rt));
}

#[test]
fn empties_are_falsy() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(&mut rt, "handler main { if (!0 && !\"\" && ![]) mark; }");
    assert!(invoke_main(&rt));
}

#[test]
fn string_length_comparison() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(
        &mut rt,
        "handler main { if (\"hello\" == 5 && \"hello\" < 9) mark; }",
    );
    assert!(invoke_main(&rt));
}

#[test]
fn local_variables_and_assignment() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(
        &mut rt,
        "handler main { var x = 5; x = x + 37; if (x == 42) mark; }",
    );
    assert!(invoke_main(&rt));
}

#[test]
fn global_variables_are_initialized_once() {
    let count = Rc::new(Cell::new(0i64));
    let inner = Rc::clone(&count);
    let mut rt = runtime(move |reg| {
        with_mark(reg);
        reg.register_function("next", ValueKind::Number, move |call| {
            inner.set(inner.get() + 1);
            call.ret().set_number(inner.get());
        })
        .unwrap();
    });
    compile(
        &mut rt,
        r#"
            var x = next();
            var y = next();
            handler main { if (x == 1 && y == 2) mark; }
        "#,
    );
    assert_eq!(count.get(), 2, "initializer must run exactly once");
    assert!(invoke_main(&rt));
    assert!(invoke_main(&rt));
    assert_eq!(count.get(), 2, "invocations must not rerun initializers");
}

#[test]
fn global_string_concatenation() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(
        &mut rt,
        r#"
            var greeting = "Hello" + " " + "World";
            handler main { if (greeting == "hello world") mark; }
        "#,
    );
    assert!(invoke_main(&rt));
}

#[test]
fn handler_calls_another_handler() {
    let mut rt = runtime(|reg| {
        reg.register_handler("consume", |call| call.ret().set_boolean(true))
            .unwrap();
    });
    compile(
        &mut rt,
        "handler helper { consume; } handler main { helper; }",
    );
    assert!(invoke_main(&rt));
}

#[test]
fn return_falls_through_without_consuming() {
    let called = Rc::new(Cell::new(false));
    let inner = Rc::clone(&called);
    let mut rt = runtime(move |reg| {
        reg.register_handler("consume", move |call| {
            inner.set(true);
            call.ret().set_boolean(true);
        })
        .unwrap();
    });
    compile(&mut rt, "handler main { return; consume; }");
    assert!(!invoke_main(&rt));
    assert!(!called.get(), "statements after return must not run");
}

#[test]
fn else_branch_runs_when_condition_fails() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(&mut rt, "handler main { if (1 == 2) { } else mark; }");
    assert!(invoke_main(&rt));
}

#[test]
fn array_concatenation_and_equality() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(
        &mut rt,
        r#"handler main {
            if ([1, 2] + [3] == [1, 2, 3] && !([1] == [2])) mark;
        }"#,
    );
    assert!(invoke_main(&rt));
}

#[test]
fn regex_literal_match_is_case_insensitive() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(
        &mut rt,
        r"handler main { if ('Hello123' =~ /^hello[0-9]+$/) mark; }",
    );
    assert!(invoke_main(&rt));
}

#[test]
fn regex_from_string_pattern() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(&mut rt, "handler main { if ('abc' =~ '^a.c$') mark; }");
    assert!(invoke_main(&rt));
}

#[test]
fn ip_literals_compare_by_parsed_form() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    compile(
        &mut rt,
        r#"handler main {
            if (127.0.0.1 == "127.0.0.1" && ::1 == ::1 && !(10.0.0.1 == 10.0.0.2)) mark;
        }"#,
    );
    assert!(invoke_main(&rt));
}

#[test]
fn native_string_property() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
        reg.register_property("req.method", ValueKind::String, |call| {
            call.ret().set_string(b"GET\0".as_ptr().cast());
        })
        .unwrap();
    });
    compile(&mut rt, "handler main { if (req.method == 'get') mark; }");
    assert!(invoke_main(&rt));
}

#[test]
fn native_buffer_return_and_windows() {
    static PAYLOAD: &[u8] = b"hello world";
    let mut rt = runtime(|reg| {
        with_mark(reg);
        reg.register_function("payload", ValueKind::Buffer, |call| {
            call.ret().set_buffer(PAYLOAD.len() as u64, PAYLOAD.as_ptr());
        })
        .unwrap();
    });
    compile(
        &mut rt,
        r#"handler main {
            if (payload() == 11 && payload() + 6 == "World" && payload() - 5 == "WORLD") mark;
        }"#,
    );
    assert!(invoke_main(&rt));
}

#[test]
fn native_variable_reads_and_writes() {
    let store = Rc::new(Cell::new(0i64));
    let inner = Rc::clone(&store);
    let mut rt = runtime(move |reg| {
        with_mark(reg);
        reg.register_variable("req.limit", ValueKind::Number, move |call| {
            if call.argc() == 0 {
                call.ret().set_number(inner.get());
            } else {
                inner.set(call.arg(0).map(FlowValue::as_number).unwrap_or(0));
            }
        })
        .unwrap();
    });
    compile(
        &mut rt,
        "handler main { req.limit = 42; if (req.limit == 42) mark; }",
    );
    assert!(invoke_main(&rt));
    assert_eq!(store.get(), 42);
}

#[test]
fn argument_marshalling_kinds_and_values() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let inner = Rc::clone(&log);
    let mut rt = runtime(move |reg| {
        reg.register_function("check", ValueKind::Void, move |call| {
            let mut entries = Vec::new();
            for arg in call.args() {
                let desc = match arg.value_kind() {
                    Some(ValueKind::Number) => format!("num:{}", arg.as_number()),
                    Some(ValueKind::String) => format!("str:{}", unsafe { arg.as_str() }),
                    Some(ValueKind::Boolean) => format!("bool:{}", arg.as_bool()),
                    Some(ValueKind::Array) => {
                        let len = unsafe {
                            flow_core::runtime::flow_arraylen(arg.buffer.cast::<FlowValue>())
                        };
                        format!("array:{len}")
                    }
                    Some(ValueKind::Ip) => "ip".to_string(),
                    other => format!("{other:?}"),
                };
                entries.push(desc);
            }
            inner.borrow_mut().extend(entries);
        })
        .unwrap();
    });
    compile(
        &mut rt,
        "handler main { check(1 + 1, \"two\", true, [3, 4, 5], 10.0.0.1); }",
    );
    assert!(!invoke_main(&rt));
    assert_eq!(
        *log.borrow(),
        vec!["num:2", "str:two", "bool:true", "array:3", "ip"]
    );
}

#[test]
fn handler_reference_marshals_as_function_pointer() {
    let seen = Rc::new(Cell::new(0u32));
    let inner = Rc::clone(&seen);
    let mut rt = runtime(move |reg| {
        reg.register_function("probe", ValueKind::Void, move |call| {
            if let Some(arg) = call.arg(0) {
                inner.set(arg.kind);
            }
        })
        .unwrap();
    });
    compile(&mut rt, "handler aux { } handler main { probe(aux); }");
    assert!(!invoke_main(&rt));
    assert_eq!(seen.get(), ValueKind::Handler as u32);
}

#[test]
fn context_pointer_reaches_native_callbacks() {
    let mut rt = runtime(|reg| {
        reg.register_handler("bump", |call| {
            let counter = call.context().cast::<i64>();
            if !counter.is_null() {
                unsafe { *counter += 1 };
            }
            call.ret().set_boolean(true);
        })
        .unwrap();
    });
    compile(&mut rt, "handler main { bump; }");

    let mut counter: i64 = 0;
    let main = rt.find_handler("main").unwrap();
    assert!(rt.invoke(&main, std::ptr::addr_of_mut!(counter).cast::<c_void>()));
    assert_eq!(counter, 1);
}

#[test]
fn handler_listing_preserves_declaration_order() {
    let mut rt = runtime(|_| {});
    compile(&mut rt, "handler one { } handler two { } handler three { }");
    let names: Vec<_> = rt.list_handlers().iter().map(|h| h.name().to_string()).collect();
    assert_eq!(names, vec!["one", "two", "three"]);
    assert!(rt.find_handler("two").is_some());
    assert!(rt.find_handler("four").is_none());
}

#[test]
fn reset_then_recompile() {
    let mut rt = runtime(|reg| {
        reg.register_handler("consume", |call| call.ret().set_boolean(true))
            .unwrap();
    });
    compile(&mut rt, "handler main { consume; }");
    assert!(invoke_main(&rt));

    assert!(rt.reset());
    assert!(rt.list_handlers().is_empty());

    compile(&mut rt, "handler main { }");
    assert!(!invoke_main(&rt));
}

#[test]
fn recompile_without_reset_replaces_the_unit() {
    let mut rt = runtime(|reg| {
        reg.register_handler("consume", |call| call.ret().set_boolean(true))
            .unwrap();
    });
    compile(&mut rt, "handler main { }");
    assert!(!invoke_main(&rt));
    compile(&mut rt, "handler main { consume; }");
    assert!(invoke_main(&rt));
}

#[test]
fn invoke_after_close_returns_false() {
    let mut rt = runtime(|_| {});
    compile(&mut rt, "handler main { }");
    let main = rt.find_handler("main").unwrap();
    rt.close();
    assert!(!rt.invoke(&main, std::ptr::null_mut()));
}

#[test]
fn all_optimization_levels_produce_working_code() {
    for level in 0..=4 {
        let mut rt = runtime(|reg| {
            with_mark(reg);
        });
        rt.set_optimization_level(level);
        compile(
            &mut rt,
            "handler main { if (\"request\" =^ \"re\" && 6 * 7 == 42) mark; }",
        );
        assert!(invoke_main(&rt), "level {level}");
    }
}

#[test]
fn import_hook_runs_before_codegen() {
    let imports = Rc::new(RefCell::new(Vec::new()));
    let inner = Rc::clone(&imports);
    let mut rt = runtime(move |reg| {
        reg.set_import_hook(move |name, path| {
            inner.borrow_mut().push((name.to_string(), path.map(String::from)));
            true
        });
    });
    compile(
        &mut rt,
        "import director from 'plugins/director';\nimport compress;\nhandler main { }",
    );
    assert_eq!(
        *imports.borrow(),
        vec![
            ("director".to_string(), Some("plugins/director".to_string())),
            ("compress".to_string(), None),
        ]
    );
}

// ===== compile errors =====

fn failing_compile(source: &str, configure: impl FnOnce(&mut NativeRegistry)) -> Vec<String> {
    let messages = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&messages);
    let mut registry = NativeRegistry::new();
    configure(&mut registry);
    let mut rt = Runtime::new(registry);
    rt.set_error_handler(move |m| sink.borrow_mut().push(m.to_string()));
    assert!(!rt.compile_source(source), "compile unexpectedly succeeded");
    assert!(rt.list_handlers().is_empty());
    let out = messages.borrow().clone();
    out
}

#[test]
fn undefined_symbol_is_a_compile_error() {
    let errors = failing_compile("handler main { no_such_native; }", |_| {});
    assert!(errors.iter().any(|m| m.contains("undefined symbol")));
}

#[test]
fn one_compile_surfaces_multiple_errors() {
    let errors = failing_compile(
        "handler a { missing_one; } handler b { missing_two; }",
        |_| {},
    );
    assert!(errors.len() >= 2, "got: {errors:?}");
}

#[test]
fn operator_type_mismatch_is_a_compile_error() {
    let errors = failing_compile("handler main { var x = true + 'nope'; }", |_| {});
    assert!(errors.iter().any(|m| m.contains("not compatible")));
}

#[test]
fn assignment_to_non_variable_native_is_rejected() {
    let errors = failing_compile("handler main { deny = 1; }", |reg| {
        reg.register_handler("deny", |call| call.ret().set_boolean(true))
            .unwrap();
    });
    assert!(errors.iter().any(|m| m.contains("non-variable")));
}

#[test]
fn parse_errors_report_through_the_handler() {
    let errors = failing_compile("handler main { 1 + ; }", |_| {});
    assert!(errors.iter().any(|m| m.contains("parse error")));
}

#[test]
fn a_failed_compile_does_not_poison_the_next_one() {
    let mut rt = runtime(|reg| {
        with_mark(reg);
    });
    assert!(!rt.compile_source("handler main { no_such_native; }"));
    compile(&mut rt, "handler main { mark; }");
    assert!(invoke_main(&rt));
}

#[test]
fn failed_import_fails_the_compile() {
    let errors = failing_compile("import broken;\nhandler main { }", |reg| {
        reg.set_import_hook(|_, _| false);
    });
    assert!(errors.iter().any(|m| m.contains("import")));
}
