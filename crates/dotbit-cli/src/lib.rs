//! # dotbit-cli
//!
//! Command-line front-end for `dotbit-server`: reads the configuration file,
//! applies command-line overrides, and runs the server until Ctrl-C or a
//! serve failure.

pub mod cli;

pub use cli::run;
