//! Spot checks over the standard library surface built in `stdlib::*` —
//! enough to exercise each module's host-callable boundary, not a full
//! conformance suite.

use crate::value::Value;

#[test]
fn string_format_and_pattern_functions() {
    let result = crate::run(
        r#"
        local s = string.format("%d-%s-%5.2f", 7, "x", 3.14159)
        local a, b = string.find("hello world", "wor")
        local first = string.match("key=value", "(%a+)=(%a+)")
        local replaced = string.gsub("one two three", "%a+", string.upper)
        return s, a, b, first, replaced
        "#,
        "stdlib_string",
    )
    .expect("program should run");
    assert_eq!(result[0].as_str(), Some("7-x- 3.14"));
    assert_eq!(result[1].as_integer_exact(), Some(7));
    assert_eq!(result[2].as_integer_exact(), Some(9));
    assert_eq!(result[3].as_str(), Some("key"));
    assert_eq!(result[4].as_str(), Some("ONE TWO THREE"));
}

#[test]
fn string_gmatch_iterates_every_match() {
    let result = crate::run(
        r#"
        local words = {}
        for w in string.gmatch("the quick brown fox", "%a+") do
            words[#words+1] = w
        end
        return #words, words[1], words[4]
        "#,
        "stdlib_gmatch",
    )
    .expect("program should run");
    assert_eq!(result[0].as_integer_exact(), Some(4));
    assert_eq!(result[1].as_str(), Some("the"));
    assert_eq!(result[2].as_str(), Some("fox"));
}

#[test]
fn table_library_round_trip() {
    let result = crate::run(
        r#"
        local t = {5, 3, 1, 4, 2}
        table.sort(t)
        table.insert(t, 1, 0)
        table.remove(t)
        return table.concat(t, ","), table.unpack(t)
        "#,
        "stdlib_table",
    )
    .expect("program should run");
    assert_eq!(result[0].as_str(), Some("0,1,2,3,4"));
    assert_eq!(result.len(), 6);
}

#[test]
fn table_sort_with_custom_comparator() {
    let result = crate::run(
        r#"
        local t = {5, 3, 1, 4, 2}
        table.sort(t, function(a, b) return a > b end)
        return table.concat(t, ",")
        "#,
        "stdlib_table_sort_custom",
    )
    .expect("program should run");
    assert_eq!(result[0].as_str(), Some("5,4,3,2,1"));
}

#[test]
fn coroutine_wrap_propagates_errors() {
    let result = crate::run(
        r#"
        local gen = coroutine.wrap(function()
            coroutine.yield(1)
            error("stop")
        end)
        local first = gen()
        local ok, err = pcall(gen)
        return first, ok, err
        "#,
        "stdlib_coroutine_wrap",
    )
    .expect("program should run");
    assert_eq!(result[0].as_integer_exact(), Some(1));
    assert!(matches!(result[1], Value::Bool(false)));
}

#[test]
fn debug_traceback_mentions_source() {
    let result = crate::run("return debug.traceback(\"oops\")", "stdlib_debug").expect("program should run");
    let s = result[0].as_str().expect("expected a string");
    assert!(s.contains("oops"));
    assert!(s.contains("stack traceback"));
}
