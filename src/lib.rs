//! gardi: authentication and second-factor (TOTP) service.
//!
//! The HTTP surface lives in [`api`], credential parsing and authorization in
//! [`auth`], and the second-factor lifecycle in [`totp`]. The binary entry
//! point wires them together through [`cli`].

pub mod api;
pub mod auth;
pub mod cli;
pub mod totp;
