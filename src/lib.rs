//! Run a program under a profiling session and render what was measured.
//!
//! The command line is parsed into a [`opt::SessionConfig`], the program is
//! run by a [`runtime::Host`] under a [`session::SessionController`], and
//! once it has finished the report is routed by [`output`] to stdout, a
//! file, or a directory.

pub mod app;
pub mod engine;
pub mod error;
pub mod exit;
pub mod opt;
pub mod output;
pub mod prelude;
pub mod printers;
pub mod runtime;
pub mod session;
pub mod symbols;
