//! Session handling for Quire.
//!
//! This crate answers two questions for every incoming connection:
//!
//! 1. **Who is this?** The [`Authenticator`] trait turns the upgrade
//!    request into a [`User`]. The user's name stamps chat messages.
//! 2. **Is the client resuming the right session?** Every document room
//!    carries a session token ([`generate_token`]). A client that presents
//!    a stale token is told to reload instead of merging its outdated
//!    state ([`validate_session`]).
//!
//! [`UserRegistry`] keeps track of who is connected, one entry per user,
//! counting their open connections.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server handler (above)  ← authenticates, validates tokens, tracks users
//!     ↕
//! Session Layer (this crate)
//!     ↕
//! Transport Layer (below)  ← provides ConnectRequest
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod registry;
mod token;

pub use auth::{Authenticator, QueryAuthenticator, User};
pub use error::SessionError;
pub use registry::UserRegistry;
pub use token::{generate_token, validate_session};
