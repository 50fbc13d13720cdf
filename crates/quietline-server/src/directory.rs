//! User directory with trust-on-first-use pinning.
//!
//! The first login for a username binds it to the identity it carries. A
//! later login must present the same identity or is refused. Callers register
//! only after the client has proven possession of the signing key, so a
//! username cannot be claimed with someone else's public identity.

use quietline_core::PeerIdentity;
use quietline_proto::PublicIdentity;

use crate::{
    relay::{KeyedLocks, RelayError},
    storage::Storage,
};

/// Longest accepted username, in bytes.
pub const MAX_USERNAME_LEN: usize = 64;

/// Largest page a user search returns.
pub const MAX_SEARCH_PAGE: u32 = 100;

/// Username to identity bindings.
pub struct UserDirectory<S: Storage> {
    storage: S,
    locks: KeyedLocks<String>,
}

impl<S: Storage> UserDirectory<S> {
    /// Create a directory over `storage`.
    pub fn new(storage: S) -> Self {
        Self { storage, locks: KeyedLocks::new() }
    }

    /// Check `identity` against the one pinned for `username` without
    /// binding anything.
    ///
    /// # Errors
    ///
    /// - `BadRequest` if the username is malformed
    /// - `Conflict` if the username is pinned to a different identity
    pub fn check(&self, username: &str, identity: &PublicIdentity) -> Result<(), RelayError> {
        validate_username(username)?;
        match self.storage.load_user(username)? {
            Some(pinned) if &pinned != identity => Err(conflict(username)),
            _ => Ok(()),
        }
    }

    /// Bind `username` to `identity`, or check it against the pinned one.
    ///
    /// # Errors
    ///
    /// - `BadRequest` if the username or either key is malformed
    /// - `Conflict` if the username is pinned to a different identity
    pub async fn register(
        &self,
        username: &str,
        identity: &PublicIdentity,
    ) -> Result<(), RelayError> {
        validate_username(username)?;
        PeerIdentity::from_public(username, identity)
            .map_err(|e| RelayError::BadRequest(e.to_string()))?;

        let _guard = self.locks.lock(username.to_string()).await;
        match self.storage.load_user(username)? {
            Some(pinned) if &pinned == identity => Ok(()),
            Some(_) => Err(conflict(username)),
            None => {
                self.storage.store_user(username, identity)?;
                tracing::info!(username, "identity pinned");
                Ok(())
            },
        }
    }

    /// Page `page` (zero-based) of usernames matching `query`.
    ///
    /// # Errors
    ///
    /// - `Storage` if the backend fails
    pub fn search(&self, query: &str, page: u32, size: u32) -> Result<Vec<String>, RelayError> {
        let size = size.clamp(1, MAX_SEARCH_PAGE) as usize;
        let offset = (page as usize).saturating_mul(size);
        Ok(self.storage.search_users(query, offset, size)?)
    }

    /// Identity bound to `username`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the username has never connected
    pub fn resolve(&self, username: &str) -> Result<PublicIdentity, RelayError> {
        self.storage
            .load_user(username)?
            .ok_or_else(|| RelayError::NotFound(format!("user {username}")))
    }
}

fn conflict(username: &str) -> RelayError {
    RelayError::Conflict(format!("username {username} is bound to a different identity"))
}

fn validate_username(username: &str) -> Result<(), RelayError> {
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(RelayError::BadRequest(format!(
            "username must be 1 to {MAX_USERNAME_LEN} bytes"
        )));
    }
    if username.chars().any(char::is_control) {
        return Err(RelayError::BadRequest("username contains control characters".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use quietline_core::LocalIdentity;
    use quietline_crypto::IdentityKeys;

    use super::*;
    use crate::storage::MemoryStorage;

    fn identity(seed: u8) -> PublicIdentity {
        LocalIdentity::new("x", IdentityKeys::from_seeds([seed; 32], [seed; 32])).public()
    }

    #[tokio::test]
    async fn first_identity_is_pinned() {
        let directory = UserDirectory::new(MemoryStorage::new());

        directory.register("alice", &identity(1)).await.unwrap();
        directory.register("alice", &identity(1)).await.unwrap();

        assert!(matches!(
            directory.register("alice", &identity(2)).await,
            Err(RelayError::Conflict(_))
        ));
        assert_eq!(directory.resolve("alice").unwrap(), identity(1));
    }

    #[tokio::test]
    async fn check_binds_nothing() {
        let directory = UserDirectory::new(MemoryStorage::new());

        directory.check("alice", &identity(1)).unwrap();
        assert!(matches!(directory.resolve("alice"), Err(RelayError::NotFound(_))));

        directory.register("alice", &identity(1)).await.unwrap();
        directory.check("alice", &identity(1)).unwrap();
        assert!(matches!(directory.check("alice", &identity(2)), Err(RelayError::Conflict(_))));
    }

    #[tokio::test]
    async fn search_pages_through_users() {
        let directory = UserDirectory::new(MemoryStorage::new());
        for (seed, name) in (1u8..).zip(["amy", "ann", "bea", "cat", "dan"]) {
            directory.register(name, &identity(seed)).await.unwrap();
        }

        assert_eq!(directory.search("", 0, 2).unwrap(), ["amy", "ann"]);
        assert_eq!(directory.search("", 2, 2).unwrap(), ["dan"]);
        assert_eq!(directory.search("A", 0, 10).unwrap(), ["amy", "ann", "bea", "cat", "dan"]);
        assert_eq!(directory.search("an", 0, 0).unwrap(), ["ann"]);
        assert!(directory.search("zed", 0, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_identity_rejected() {
        let directory = UserDirectory::new(MemoryStorage::new());
        let bogus = PublicIdentity { signing_key: vec![0; 3], kem_key: vec![0; 3] };

        assert!(matches!(
            directory.register("alice", &bogus).await,
            Err(RelayError::BadRequest(_))
        ));
        assert!(matches!(directory.resolve("alice"), Err(RelayError::NotFound(_))));
    }

    #[tokio::test]
    async fn usernames_validated() {
        let directory = UserDirectory::new(MemoryStorage::new());

        let long = "x".repeat(MAX_USERNAME_LEN + 1);
        for bad in ["", "a\0b", long.as_str()] {
            assert!(matches!(
                directory.register(bad, &identity(1)).await,
                Err(RelayError::BadRequest(_))
            ));
        }
    }
}
