//! The errors encountered while fetching a user's repositories.

use failure::Fail;
use reqwest::StatusCode;

/// Everything that can go wrong during a single repository fetch.
///
/// None of these are retried. Whoever triggered the fetch decides whether
/// to log the error and keep showing whatever they had before.
#[derive(Debug, Fail)]
pub enum FetchError {
    /// The request wasn't sent because an argument was empty.
    #[fail(display = "Invalid input, {}", reason)]
    InvalidInput { reason: &'static str },
    /// GitHub responded with a non-successful status code.
    #[fail(display = "Request failed with {}", status)]
    Upstream { status: StatusCode },
    /// An element of the response didn't look like a repository.
    #[fail(display = "Record {} is malformed, {}", index, reason)]
    MalformedRecord { index: usize, reason: String },
    /// The response body wasn't a JSON array.
    #[fail(display = "Unable to deserialize response")]
    MalformedBody(#[cause] serde_json::Error),
    /// Sending the request or reading the response failed.
    #[fail(display = "Unable to send request")]
    Network(#[cause] reqwest::Error),
}

impl FetchError {
    /// The HTTP status code, if this was an upstream error.
    pub fn status(&self) -> Option<StatusCode> {
        match *self {
            FetchError::Upstream { status } => Some(status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(other: reqwest::Error) -> FetchError {
        FetchError::Network(other)
    }
}
