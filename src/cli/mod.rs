//! Command-line interface: argument definitions, command handlers, and
//! the sandbox line protocol used by `arbiter run`.

pub mod args;
pub mod commands;
pub mod driver;
