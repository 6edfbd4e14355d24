//! The six concrete literal-input scenarios and the goto-over-local
//! compile error, each asserted against the exact expected result.

use crate::value::Value;
use crate::vm::error::ControlFlow;

fn ints(values: &[Value]) -> Vec<i64> {
    values.iter().map(|v| v.as_integer_exact().expect("expected integer")).collect()
}

#[test]
fn for_loop_closures_capture_distinct_upvalues() {
    let result = crate::run(
        "local t = {}
         for i=1,3 do t[i] = function() return i end end
         return t[1]()+t[2]()+t[3]()",
        "scenario1",
    )
    .expect("program should run");
    assert_eq!(ints(&result), vec![6]);
}

#[test]
fn close_error_surfaces_through_pcall_with_captured_returns() {
    let result = crate::run(
        "local function f()
            local x<close> = setmetatable({}, {__close = function() error(\"boom\") end})
            return 1, 2
         end
         local ok, e = pcall(f)
         return ok, e",
        "scenario2",
    )
    .expect("pcall should swallow the close error");
    assert_eq!(result.len(), 2);
    assert!(matches!(result[0], Value::Bool(false)));
    // `error`'s message-position prefix (spec §4.12) applies here: the
    // close handler's `error("boom")` runs with the close-handler closure
    // as the live frame, so the raised string is prefixed
    // `"<source>:<line>: "` the same as any other `error` call would be.
    let message = result[1].as_str().expect("error value should be a string");
    assert!(message.contains("boom"), "{}", message);
}

#[test]
fn non_last_multi_call_is_truncated_to_one_value() {
    let result = crate::run(
        "local function g() return 1, 2, 3 end
         local a,b,c,d = g(), 10
         return a,b,c,d",
        "scenario3",
    )
    .expect("program should run");
    assert_eq!(result.len(), 4);
    assert_eq!(result[0].as_integer_exact(), Some(1));
    assert_eq!(result[1].as_integer_exact(), Some(10));
    assert!(result[2].is_nil());
    assert!(result[3].is_nil());
}

#[test]
fn goto_over_local_declaration_is_a_compile_error() {
    let err = crate::run("goto l1; local x = 1; ::l1:: ::l2:: print(x)", "scenario4").unwrap_err();
    match err {
        ControlFlow::Error(e) => assert!(e.message.contains("jump") || e.message.contains("local"), "{}", e.message),
        ControlFlow::Yield(_) => panic!("expected a compile error, not a yield"),
    }
}

#[test]
fn coroutine_yields_in_sequence() {
    let result = crate::run(
        "local co = coroutine.create(function()
            coroutine.yield(10)
            coroutine.yield(20)
            return 30
         end)
         local r = {}
         for i=1,3 do
            local ok, v = coroutine.resume(co)
            r[i] = v
         end
         return r[1], r[2], r[3]",
        "scenario5",
    )
    .expect("program should run");
    assert_eq!(ints(&result), vec![10, 20, 30]);
}

#[test]
fn integer_for_loop_keeps_integer_type_throughout() {
    let result = crate::run(
        "local sum = 0
         for i=1,10 do
            assert(math.type(i) == \"integer\")
            sum = sum + i
         end
         return sum",
        "scenario6",
    )
    .expect("program should run");
    assert_eq!(ints(&result), vec![55]);
}
