//! Boundary behaviors: integer wraparound, float NaN, floor-mod, and the
//! `#` border ambiguity on a table with an embedded hole.

use crate::value::Value;

#[test]
fn integer_overflow_wraps_two_complement() {
    let result = crate::run("return math.mininteger + math.mininteger", "boundary_overflow").unwrap();
    assert_eq!(result[0].as_integer_exact(), Some(0));
}

#[test]
fn float_division_by_zero_is_nan_not_an_error() {
    let result = crate::run("return 0.0 / 0.0", "boundary_nan").unwrap();
    match result[0] {
        Value::Float(f) => assert!(f.is_nan()),
        _ => panic!("expected a float"),
    }
}

#[test]
fn modulo_follows_sign_of_divisor() {
    let result = crate::run("return (-5) % 3", "boundary_mod").unwrap();
    assert_eq!(result[0].as_integer_exact(), Some(1));
}

#[test]
fn length_of_table_with_hole_is_a_legal_border() {
    let result = crate::run("return #{1,2,nil,4}", "boundary_border").unwrap();
    let n = result[0].as_integer_exact().expect("expected integer");
    assert!(n == 2 || n == 4, "border must be 2 or 4, got {n}");
}

#[test]
fn integer_division_by_zero_is_an_error() {
    let err = crate::run("return 1 // 0", "boundary_idiv_zero").unwrap_err();
    assert!(matches!(err, crate::vm::error::ControlFlow::Error(_)));
}
