//! Resolving the signed-in user's GitHub username.
//!
//! The dashboard never looks a username up itself. Instead it registers an
//! observer with a [`ProfileResolver`] and holds onto the [`Subscription`]
//! it gets back, dropping it when the dashboard goes away.

use failure::{Error, ResultExt};
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// A callback which receives the resolved username, or `None` if the
/// lookup failed.
pub type ProfileObserver = Box<dyn Fn(Option<String>) + Send + Sync + 'static>;

/// Something which can map the current session to a GitHub username.
pub trait ProfileResolver {
    /// Register an observer, returning a handle which unregisters it when
    /// dropped.
    fn subscribe(&self, observer: ProfileObserver) -> Subscription;
}

/// The disposer for a registered observer.
///
/// Once a `Subscription` is disposed (explicitly or by being dropped) its
/// observer won't be called again.
#[must_use = "Dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    disposer: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Subscription {
    pub fn new<F>(disposer: F) -> Subscription
    where
        F: FnOnce() + Send + 'static,
    {
        Subscription {
            disposer: Some(Box::new(disposer)),
        }
    }

    /// A subscription with nothing to clean up.
    pub fn noop() -> Subscription {
        Subscription { disposer: None }
    }

    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.disposer.is_some())
            .finish()
    }
}

/// A resolver which always gives back the same username.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedProfile {
    username: Option<String>,
}

impl FixedProfile {
    pub fn new<S: Into<String>>(username: S) -> FixedProfile {
        FixedProfile {
            username: Some(username.into()),
        }
    }

    /// A resolver for a user without a profile.
    pub fn missing() -> FixedProfile {
        FixedProfile { username: None }
    }
}

impl ProfileResolver for FixedProfile {
    fn subscribe(&self, observer: ProfileObserver) -> Subscription {
        observer(self.username.clone());
        Subscription::noop()
    }
}

/// A TOML document mapping user IDs to their profiles.
///
/// ```toml
/// [users.9f2c7a]
/// username = "octocat"
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> ProfileStore {
        ProfileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up the username stored for `uid`.
    ///
    /// The document is read from disk every time so edits are picked up
    /// without restarting.
    pub async fn lookup(&self, uid: &str) -> Result<Option<String>, Error> {
        trace!("Looking up the profile for {} in {}", uid, self.path.display());

        let src = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|_| format!("Unable to read {}", self.path.display()))?;
        let mut doc: ProfileDocument =
            toml::from_str(&src).context("Invalid profile document")?;

        Ok(doc
            .users
            .remove(uid)
            .map(|profile| profile.username)
            .filter(|username| !username.is_empty()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProfileDocument {
    #[serde(default)]
    users: HashMap<String, UserProfile>,
}

#[derive(Debug, Deserialize)]
struct UserProfile {
    username: String,
}

/// Resolves the username for a particular user in a [`ProfileStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredProfile {
    store: ProfileStore,
    uid: String,
}

impl StoredProfile {
    pub fn new<S: Into<String>>(store: ProfileStore, uid: S) -> StoredProfile {
        StoredProfile {
            store,
            uid: uid.into(),
        }
    }
}

impl ProfileResolver for StoredProfile {
    /// Start the lookup in the background.
    ///
    /// This must be called from within a Tokio runtime.
    fn subscribe(&self, observer: ProfileObserver) -> Subscription {
        // held while the observer runs, so disposing waits for a delivery
        // that is already underway
        let active = Arc::new(Mutex::new(true));
        let still_active = Arc::clone(&active);
        let store = self.store.clone();
        let uid = self.uid.clone();

        let lookup = tokio::spawn(async move {
            let username = match store.lookup(&uid).await {
                Ok(Some(username)) => Some(username),
                Ok(None) => {
                    info!("No profile found for {}", uid);
                    None
                }
                Err(e) => {
                    warn!("Unable to fetch the profile for {}, {}", uid, e);
                    None
                }
            };

            let still_active = still_active.lock().unwrap_or_else(PoisonError::into_inner);
            if *still_active {
                observer(username);
            }
        });

        Subscription::new(move || {
            *active.lock().unwrap_or_else(PoisonError::into_inner) = false;
            lookup.abort();
        })
    }
}
