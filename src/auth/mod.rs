//! Authentication module for the login gateway
//!
//! This module handles the per-IP failure blocklist, bearer token
//! issuance/verification and the login orchestration behind the HTTP
//! handlers.

pub mod blocklist;
mod client_ip;
pub mod handlers;
mod service;
mod token;

pub use blocklist::{BlockEntry, Blocklist, BlocklistPolicy};
pub use client_ip::client_ip;
pub use service::{attach_token, AuthService, LoginForm, LoginOutcome, TOKEN_QUERY_PARAM};
pub use token::{Claims, TokenService, DEFAULT_TOKEN_TTL_DAYS, TOKEN_SUBJECT};
