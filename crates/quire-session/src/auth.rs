//! Authentication hook for resolving user identity.
//!
//! Quire doesn't implement authentication itself. It defines the
//! [`Authenticator`] trait: one async method that looks at the upgrade
//! request and returns a [`User`] or an error. The server calls it before
//! the client is attached to any room.
//!
//! [`QueryAuthenticator`] is the default: it trusts a `username` query
//! parameter and invents an anonymous name otherwise. Suitable for local
//! use behind an authenticating proxy.

use std::fmt;

use quire_transport::ConnectRequest;
use rand::Rng;
use rand::seq::IndexedRandom;

use crate::SessionError;

/// An identified user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    /// Stable identifier, used as the registry key.
    pub id: String,
    /// Name shown to other clients (chat sender).
    pub display_name: String,
}

impl User {
    /// Creates a user whose display name equals its id.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            display_name: name,
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

/// Resolves the identity of a connecting client.
///
/// `Send + Sync + 'static` because a single authenticator is shared by
/// every connection task for the lifetime of the server.
///
/// # Example
///
/// ```rust
/// use quire_session::{Authenticator, SessionError, User};
/// use quire_transport::ConnectRequest;
///
/// /// Only lets in requests carrying `?key=letmein`.
/// struct SharedKey;
///
/// impl Authenticator for SharedKey {
///     async fn authenticate(&self, request: &ConnectRequest) -> Result<User, SessionError> {
///         match request.query_param("key") {
///             Some("letmein") => Ok(User::named("guest")),
///             _ => Err(SessionError::AuthFailed("bad key".into())),
///         }
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates the request and returns the user behind it.
    ///
    /// # Returns
    /// - `Ok(User)`: the client may join
    /// - `Err(SessionError::AuthFailed)`: the connection is closed
    fn authenticate(
        &self,
        request: &ConnectRequest,
    ) -> impl std::future::Future<Output = Result<User, SessionError>> + Send;
}

/// Takes the user name from the `username` query parameter, or makes one
/// up (`Anonymous Io`, `Anonymous Europa`, ...).
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryAuthenticator;

const MOONS: &[&str] = &[
    "Io", "Europa", "Ganymede", "Callisto", "Titan", "Rhea", "Iapetus", "Dione", "Tethys",
    "Enceladus", "Mimas", "Miranda", "Ariel", "Umbriel", "Titania", "Oberon", "Triton", "Nereid",
    "Phobos", "Deimos", "Charon",
];

impl QueryAuthenticator {
    fn anonymous() -> User {
        let mut rng = rand::rng();
        let moon = MOONS.choose(&mut rng).copied().unwrap_or("Moon");
        let suffix: u16 = rng.random();
        User {
            id: format!("anonymous-{suffix:04x}"),
            display_name: format!("Anonymous {moon}"),
        }
    }
}

impl Authenticator for QueryAuthenticator {
    async fn authenticate(&self, request: &ConnectRequest) -> Result<User, SessionError> {
        match request.query_param("username") {
            Some(name) if !name.trim().is_empty() => Ok(User::named(name.trim())),
            _ => Ok(Self::anonymous()),
        }
    }
}
