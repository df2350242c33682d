//! The `utils` module collects shared pieces used across `relaymq`:
//! the broker error taxonomy and the logging setup helper.

pub mod error;
pub mod logging;
