//! Auth and anonymous-id tokens

use arc_swap::ArcSwap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;
use std::sync::Arc;

/// Token pair attached to every request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Sent as `Authorization: Basic <auth_token>`
    pub auth_token: String,
    /// Sent as the `AnonymousId` header
    pub anonymous_id_token: String,
}

impl Credentials {
    /// Create credentials from already encoded tokens
    pub fn new(auth_token: impl Into<String>, anonymous_id_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            anonymous_id_token: anonymous_id_token.into(),
        }
    }

    /// Encode a write key and anonymous id the way the collection endpoint expects.
    ///
    /// The auth token is `base64("<write_key>:")`, the anonymous-id token is
    /// `base64(anonymous_id)`.
    pub fn from_write_key(write_key: &str, anonymous_id: &str) -> Self {
        Self {
            auth_token: STANDARD.encode(format!("{}:", write_key)),
            anonymous_id_token: STANDARD.encode(anonymous_id),
        }
    }

    /// Value for the `Authorization` header
    pub fn authorization(&self) -> String {
        format!("Basic {}", self.auth_token)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_token", &"<redacted>")
            .field("anonymous_id_token", &"<redacted>")
            .finish()
    }
}

/// Holds the current [`Credentials`] and hands out whole snapshots.
///
/// Readers get an `Arc` of one complete pair; writers swap in a new pair.
/// A reader can never observe one token from an old pair and one from a new one.
pub struct CredentialStore {
    current: ArcSwap<Credentials>,
}

impl CredentialStore {
    /// Create a store holding `credentials`
    pub fn new(credentials: Credentials) -> Self {
        Self {
            current: ArcSwap::from_pointee(credentials),
        }
    }

    /// Snapshot of the current pair
    pub fn get(&self) -> Arc<Credentials> {
        self.current.load_full()
    }

    /// Replace both tokens at once
    pub fn set(&self, credentials: Credentials) {
        self.current.store(Arc::new(credentials));
        tracing::trace!("credentials replaced");
    }

    /// Replace the pair with `f(current)`, retrying if another writer got there first.
    pub fn update<F>(&self, f: F)
    where
        F: Fn(&Credentials) -> Credentials,
    {
        self.current.rcu(|current| Arc::new(f(current)));
        tracing::trace!("credentials updated");
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn write_key_encoding() {
        let credentials = Credentials::from_write_key("user", "pass");
        assert_eq!(credentials.auth_token, "dXNlcjo=");
        assert_eq!(credentials.anonymous_id_token, "cGFzcw==");
        assert_eq!(credentials.authorization(), "Basic dXNlcjo=");
    }

    #[test]
    fn debug_redacts_tokens() {
        let rendered = format!("{:?}", Credentials::new("secret-auth", "secret-anon"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn single_field_update_keeps_other_token() {
        let store = CredentialStore::new(Credentials::new("a", "b"));
        store.update(|current| Credentials::new("c", current.anonymous_id_token.clone()));
        assert_eq!(*store.get(), Credentials::new("c", "b"));
    }

    #[test]
    fn snapshots_are_never_torn() {
        let store = Arc::new(CredentialStore::new(Credentials::new("auth-0", "anon-0")));
        let barrier = Arc::new(Barrier::new(5));
        let mut handles = Vec::new();

        for writer in 0..2 {
            let store = store.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                for i in 0..2_000 {
                    let tag = format!("{}-{}", writer, i);
                    store.set(Credentials::new(
                        format!("auth-{}", tag),
                        format!("anon-{}", tag),
                    ));
                }
            }));
        }

        for _ in 0..3 {
            let store = store.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                for _ in 0..2_000 {
                    let snapshot = store.get();
                    let auth = snapshot.auth_token.trim_start_matches("auth-");
                    let anon = snapshot.anonymous_id_token.trim_start_matches("anon-");
                    assert_eq!(auth, anon);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
