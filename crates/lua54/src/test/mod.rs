//! Whole-program integration tests, one file per concern, each driving a
//! fresh [`crate::run`] rather than reaching into VM internals.

mod test_boundary;
mod test_scenarios;
mod test_stdlib;
