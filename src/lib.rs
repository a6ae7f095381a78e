//! The data layer behind a developer dashboard.
//!
//! Given a GitHub username (usually resolved from a stored user profile) and
//! an access token, fetch that user's repositories and boil each one down to
//! the handful of fields the dashboard actually shows.

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod config;
pub mod dashboard;
pub mod errors;
pub mod github;
pub mod profile;

pub use crate::config::{Config, DashboardConfig, GitHubConfig, MalformedPolicy};
pub use crate::dashboard::{Dashboard, MountedDashboard, Refresh};
pub use crate::errors::FetchError;
pub use crate::github::GitHub;
pub use crate::profile::{
    FixedProfile, ProfileObserver, ProfileResolver, ProfileStore, StoredProfile,
    Subscription,
};

/// The minimal view of a repository shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub html_url: String,
    /// The primary language, if GitHub detected one.
    pub language: Option<String>,
    pub name: String,
    pub owner_avatar_url: String,
    pub visibility: String,
}

/// The avatar used for the header and sidebar, taken from the first
/// repository in the list.
///
/// An empty list gives an empty string.
pub fn representative_avatar(repos: &[RepositorySummary]) -> &str {
    repos
        .first()
        .map(|repo| repo.owner_avatar_url.as_str())
        .unwrap_or("")
}
