use failure::Error;
use sec::Secret;
use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::errors::FetchError;
use crate::github::GitHub;
use crate::profile::{ProfileObserver, ProfileResolver, Subscription};
use crate::{representative_avatar, RepositorySummary};

/// What happened to a successful fetch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Refresh {
    /// The dashboard now shows this many repositories.
    Applied { count: usize },
    /// The username changed while the request was in flight, so the result
    /// was thrown away.
    Superseded,
}

/// The state behind the dashboard screen.
///
/// Cloning a `Dashboard` gives another handle to the same state.
#[derive(Clone)]
pub struct Dashboard {
    inner: Arc<Inner>,
}

struct Inner {
    github: GitHub,
    credential: Secret<String>,
    activity_delay: Duration,
    state: Mutex<ViewState>,
}

#[derive(Debug, Default)]
struct ViewState {
    username: String,
    /// Bumped every time the username is set. A fetch only gets applied if
    /// this hasn't changed since it was sent.
    generation: u64,
    repos: Arc<Vec<RepositorySummary>>,
    avatar: String,
    /// Bumped on every mount and unmount so a timer from an old mount can't
    /// reveal the activity panel.
    mount_epoch: u64,
    activity_visible: bool,
}

impl ViewState {
    fn reset_activity(&mut self) -> u64 {
        self.mount_epoch += 1;
        self.activity_visible = false;
        self.mount_epoch
    }
}

/// The fetches started by a mounted dashboard's profile observer.
#[derive(Debug, Default)]
struct Fetches {
    /// Set on unmount, after which no new fetches are started.
    closed: bool,
    running: Vec<JoinHandle<()>>,
}

impl Dashboard {
    pub fn new(
        github: GitHub,
        credential: Secret<String>,
        activity_delay: Duration,
    ) -> Dashboard {
        Dashboard {
            inner: Arc::new(Inner {
                github,
                credential,
                activity_delay,
                state: Mutex::default(),
            }),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Dashboard, Error> {
        let github = GitHub::with_config(&cfg.github)?;
        let credential = Secret::new(cfg.credential().to_string());

        Ok(Dashboard::new(
            github,
            credential,
            cfg.dashboard.activity_delay(),
        ))
    }

    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch to a new user and fetch their repositories.
    ///
    /// On failure the previous list is left untouched.
    pub async fn set_username<S: Into<String>>(
        &self,
        username: S,
    ) -> Result<Refresh, FetchError> {
        let username = username.into();

        let generation = {
            let mut state = self.state();
            state.username = username.clone();
            state.generation += 1;
            state.generation
        };

        let fetched = self
            .inner
            .github
            .fetch(&username, self.inner.credential.reveal_str())
            .await;

        let repos = match fetched {
            Ok(repos) => repos,
            Err(e @ FetchError::InvalidInput { .. }) => {
                debug!("Skipped fetching repositories, {}", e);
                return Err(e);
            }
            Err(e) => {
                error!("Unable to fetch the repositories for {:?}, {}", username, e);
                return Err(e);
            }
        };

        let mut state = self.state();

        if state.generation != generation {
            debug!(
                "Discarding {} repositories for {:?}, the username changed to {:?}",
                repos.len(),
                username,
                state.username
            );
            return Ok(Refresh::Superseded);
        }

        let count = repos.len();
        state.avatar = representative_avatar(&repos).to_string();
        state.repos = Arc::new(repos);
        info!("Showing {} repositories for {:?}", count, username);

        Ok(Refresh::Applied { count })
    }

    pub fn username(&self) -> String {
        self.state().username.clone()
    }

    /// A snapshot of the repositories currently being shown.
    pub fn repositories(&self) -> Arc<Vec<RepositorySummary>> {
        Arc::clone(&self.state().repos)
    }

    /// The avatar for the header and sidebar.
    pub fn representative_avatar(&self) -> String {
        self.state().avatar.clone()
    }

    /// The user whose activity should be shown, once the activity panel's
    /// loading delay has passed.
    pub fn activity_user(&self) -> Option<String> {
        let state = self.state();

        if state.activity_visible && !state.username.is_empty() {
            Some(state.username.clone())
        } else {
            None
        }
    }

    /// Wire the dashboard up to a [`ProfileResolver`] and start the activity
    /// panel's timer.
    ///
    /// Every username the resolver emits triggers a fetch in the background.
    /// Everything is torn down when the returned [`MountedDashboard`] is
    /// dropped. This must be called from within a Tokio runtime.
    pub fn mount<R>(&self, resolver: &R) -> MountedDashboard
    where
        R: ProfileResolver + ?Sized,
    {
        let runtime = Handle::current();
        let fetches: Arc<Mutex<Fetches>> = Arc::default();
        let epoch = self.state().reset_activity();

        let dashboard = self.clone();
        let delay = self.inner.activity_delay;
        let timer = runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let mut state = dashboard.state();
            if state.mount_epoch == epoch {
                debug!("Showing the activity panel");
                state.activity_visible = true;
            }
        });

        let observer = self.profile_observer(runtime, Arc::clone(&fetches));
        let subscription = resolver.subscribe(observer);

        MountedDashboard {
            dashboard: self.clone(),
            subscription: Some(subscription),
            timer,
            fetches,
        }
    }

    fn profile_observer(
        &self,
        runtime: Handle,
        fetches: Arc<Mutex<Fetches>>,
    ) -> ProfileObserver {
        let dashboard = self.clone();

        Box::new(move |username: Option<String>| {
            let username = match username {
                Some(username) => username,
                None => {
                    info!("No GitHub username for the current user");
                    return;
                }
            };

            let mut fetches = fetches.lock().unwrap_or_else(PoisonError::into_inner);
            if fetches.closed {
                debug!("Ignoring {:?}, the dashboard was unmounted", username);
                return;
            }

            let dashboard = dashboard.clone();
            let fetch = runtime.spawn(async move {
                // errors were already logged
                let _ = dashboard.set_username(username).await;
            });

            fetches.running.retain(|f| !f.is_finished());
            fetches.running.push(fetch);
        })
    }
}

impl Debug for Dashboard {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Dashboard")
            .field("github", &self.inner.github)
            .field("activity_delay", &self.inner.activity_delay)
            .field("state", &*self.state())
            .finish()
    }
}

/// A [`Dashboard`] which is attached to a profile resolver and timer.
///
/// Dropping this unsubscribes from the resolver, stops the timer and
/// cancels any fetches still in flight.
#[derive(Debug)]
pub struct MountedDashboard {
    dashboard: Dashboard,
    subscription: Option<Subscription>,
    timer: JoinHandle<()>,
    fetches: Arc<Mutex<Fetches>>,
}

impl MountedDashboard {
    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    pub fn unmount(self) {}
}

impl Drop for MountedDashboard {
    fn drop(&mut self) {
        trace!("Unmounting the dashboard");

        if let Some(subscription) = self.subscription.take() {
            subscription.dispose();
        }

        self.timer.abort();
        self.dashboard.state().reset_activity();

        let mut fetches = self.fetches.lock().unwrap_or_else(PoisonError::into_inner);
        fetches.closed = true;
        for fetch in fetches.running.drain(..) {
            fetch.abort();
        }
    }
}
