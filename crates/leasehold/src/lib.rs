//! Leasehold CLI library interface
//!
//! The binary is a thin wrapper over [`cli`]; the modules are exposed for tests.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod cli;
pub mod commands;
