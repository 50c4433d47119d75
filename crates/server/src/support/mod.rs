#![forbid(unsafe_code)]

mod args;
mod errors;
mod jsonrpc;
mod runtime;
mod session_log;
mod time;
mod tokens;

pub(crate) use args::*;
pub(crate) use errors::*;
pub(crate) use jsonrpc::*;
pub(crate) use runtime::*;
pub(crate) use session_log::*;
pub(crate) use time::*;
pub(crate) use tokens::*;
