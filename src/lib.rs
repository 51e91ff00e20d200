//! snipcon: run Python-flavoured snippets against a persistent namespace,
//! capture their output, errors and plots, and save the session to disk.

pub mod config;
pub mod execution;
pub mod lang;
pub mod printer;
pub mod session;
