use failure::{Error, ResultExt};
use log::Level;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::{Client, Url};
use serde_json::Value;
use std::fmt::{self, Debug, Formatter};

use crate::config::{GitHubConfig, MalformedPolicy};
use crate::errors::FetchError;
use crate::RepositorySummary;

const GITHUB_JSON: &str = "application/vnd.github+json";

/// Fetches a user's repositories from the GitHub REST API.
#[derive(Clone)]
pub struct GitHub {
    client: Client,
    base: Url,
    on_malformed: MalformedPolicy,
}

impl GitHub {
    /// Create a new `GitHub` with the provided config.
    ///
    /// The token is *not* taken from the config, it gets passed to each
    /// [`GitHub::fetch()`] call.
    pub fn with_config(cfg: &GitHubConfig) -> Result<GitHub, Error> {
        let base = Url::parse(&cfg.host)
            .with_context(|_| format!("\"{}\" isn't a valid URL", cfg.host))?;

        if base.cannot_be_a_base() {
            return Err(failure::err_msg(format!(
                "\"{}\" can't be used as the API host",
                cfg.host
            )));
        }

        let mut builder = Client::builder().user_agent(cfg.user_agent.as_str());
        if let Some(timeout) = cfg.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .context("Unable to initialize the HTTP client")?;

        Ok(GitHub {
            client,
            base,
            on_malformed: cfg.on_malformed,
        })
    }

    /// Get the first page of repositories owned by `user_id`.
    ///
    /// Only GitHub's default page is requested, so accounts with lots of
    /// repositories get truncated. Records come back in the order GitHub
    /// sent them.
    pub async fn fetch(
        &self,
        user_id: &str,
        credential: &str,
    ) -> Result<Vec<RepositorySummary>, FetchError> {
        if user_id.is_empty() {
            debug!("Not fetching repositories, the username is empty");
            return Err(FetchError::InvalidInput {
                reason: "the username is empty",
            });
        }
        if credential.is_empty() {
            debug!("Not fetching repositories, no API token was provided");
            return Err(FetchError::InvalidInput {
                reason: "the API token is empty",
            });
        }

        let url = self.repos_url(user_id);
        debug!("Sending request to {}", url);

        let request = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static(GITHUB_JSON))
            .bearer_auth(credential)
            .build()
            .map_err(|e| {
                debug!("Unable to build the request, {}", e);
                FetchError::InvalidInput {
                    reason: "the API token isn't a valid header value",
                }
            })?;

        if log_enabled!(Level::Trace) {
            let redacted = format!("Request Headers {:#?}", request.headers())
                .replace(credential, "XXXXXXXXXX");

            for line in redacted.lines() {
                trace!("{}", line);
            }
        }

        let response = self.client.execute(request).await?;
        let status = response.status();
        debug!("Received response ({})", status);

        if !status.is_success() {
            warn!("Request for {}'s repositories failed with {}", user_id, status);
            return Err(FetchError::Upstream { status });
        }

        let body = response.bytes().await?;
        let records: Vec<Value> =
            serde_json::from_slice(&body).map_err(FetchError::MalformedBody)?;
        trace!("Received {} records", records.len());

        let repos = project(records, self.on_malformed)?;
        debug!("Found {} repositories for {}", repos.len(), user_id);

        Ok(repos)
    }

    fn repos_url(&self, user_id: &str) -> Url {
        let mut url = self.base.clone();

        // the constructor already rejected cannot-be-a-base URLs
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(&["users", user_id, "repos"]);
        }

        url
    }
}

impl Debug for GitHub {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("GitHub")
            .field("base", &self.base.as_str())
            .field("on_malformed", &self.on_malformed)
            .finish()
    }
}

/// Turn the raw response elements into summaries, skipping or failing on
/// malformed elements according to `policy`.
fn project(
    records: Vec<Value>,
    policy: MalformedPolicy,
) -> Result<Vec<RepositorySummary>, FetchError> {
    let mut repos = Vec::with_capacity(records.len());

    for (index, record) in records.into_iter().enumerate() {
        match convert_repo(index, record) {
            Ok(repo) => repos.push(repo),
            Err(e) => match policy {
                MalformedPolicy::Skip => warn!("Skipping a repository, {}", e),
                MalformedPolicy::Fail => return Err(e),
            },
        }
    }

    Ok(repos)
}

fn convert_repo(index: usize, record: Value) -> Result<RepositorySummary, FetchError> {
    let raw: RawRepo =
        serde_json::from_value(record).map_err(|e| FetchError::MalformedRecord {
            index,
            reason: e.to_string(),
        })?;

    let missing = |field: &str| FetchError::MalformedRecord {
        index,
        reason: format!("missing `{}`", field),
    };

    let owner = raw.owner.ok_or_else(|| missing("owner"))?;

    Ok(RepositorySummary {
        html_url: raw.html_url.ok_or_else(|| missing("html_url"))?,
        language: raw.language,
        name: raw.name.ok_or_else(|| missing("name"))?,
        owner_avatar_url: owner.avatar_url.ok_or_else(|| missing("owner.avatar_url"))?,
        visibility: raw.visibility.ok_or_else(|| missing("visibility"))?,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawRepo {
    html_url: Option<String>,
    language: Option<String>,
    name: Option<String>,
    owner: Option<Owner>,
    visibility: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Owner {
    avatar_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn github_for(server: &MockServer, policy: MalformedPolicy) -> GitHub {
        let cfg = GitHubConfig {
            host: server.uri(),
            on_malformed: policy,
            ..Default::default()
        };

        GitHub::with_config(&cfg).unwrap()
    }

    fn repo_json(name: &str, language: Value) -> Value {
        json!({
            "id": 1296269,
            "name": name,
            "full_name": format!("octocat/{}", name),
            "html_url": format!("https://github.com/octocat/{}", name),
            "language": language,
            "owner": {
                "login": "octocat",
                "avatar_url": "https://avatars.githubusercontent.com/u/583231",
            },
            "visibility": "public",
            "stargazers_count": 80,
        })
    }

    #[test]
    fn project_the_documented_example() {
        let records = vec![json!({
            "html_url": "https://x/a",
            "language": "Go",
            "name": "a",
            "owner": { "avatar_url": "https://img/a" },
            "visibility": "public",
        })];

        let got = project(records, MalformedPolicy::Fail).unwrap();

        assert_eq!(
            got,
            vec![RepositorySummary {
                html_url: String::from("https://x/a"),
                language: Some(String::from("Go")),
                name: String::from("a"),
                owner_avatar_url: String::from("https://img/a"),
                visibility: String::from("public"),
            }]
        );
        assert_eq!(crate::representative_avatar(&got), "https://img/a");
    }

    #[test]
    fn null_and_absent_languages_are_none() {
        let mut no_language = repo_json("b", Value::Null);
        no_language.as_object_mut().unwrap().remove("language");
        let records = vec![repo_json("a", Value::Null), no_language];

        let got = project(records, MalformedPolicy::Fail).unwrap();

        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|repo| repo.language.is_none()));
    }

    #[test]
    fn skip_records_without_an_owner() {
        let mut orphan = repo_json("orphan", json!("Rust"));
        orphan.as_object_mut().unwrap().remove("owner");
        let records = vec![
            repo_json("first", json!("Rust")),
            orphan,
            json!("not even an object"),
            repo_json("last", json!("C")),
        ];

        let got = project(records, MalformedPolicy::Skip).unwrap();

        let names: Vec<_> = got.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["first", "last"]);
    }

    #[test]
    fn fail_the_batch_on_a_malformed_record() {
        let mut no_avatar = repo_json("no-avatar", json!("Rust"));
        no_avatar["owner"].as_object_mut().unwrap().remove("avatar_url");
        let records = vec![repo_json("fine", json!("Rust")), no_avatar];

        let err = project(records, MalformedPolicy::Fail).unwrap_err();

        match err {
            FetchError::MalformedRecord { index, reason } => {
                assert_eq!(index, 1);
                assert!(reason.contains("owner.avatar_url"), "{}", reason);
            }
            other => panic!("Unexpected error: {}", other),
        }
    }

    #[test]
    fn user_ids_are_a_single_path_segment() {
        let cfg = GitHubConfig {
            host: String::from("https://github.example.com/api/v3/"),
            ..Default::default()
        };
        let gh = GitHub::with_config(&cfg).unwrap();

        let got = gh.repos_url("some/one");

        assert_eq!(
            got.as_str(),
            "https://github.example.com/api/v3/users/some%2Fone/repos"
        );
    }

    #[test]
    fn reject_hosts_which_cant_be_a_base() {
        let cfg = GitHubConfig {
            host: String::from("mailto:someone@example.com"),
            ..Default::default()
        };

        assert!(GitHub::with_config(&cfg).is_err());
    }

    #[tokio::test]
    async fn fetch_preserves_upstream_order() {
        let server = MockServer::start().await;
        let body = json!([
            repo_json("zeta", json!("Rust")),
            repo_json("alpha", Value::Null),
            repo_json("mu", json!("Go")),
        ]);
        Mock::given(method("GET"))
            .and(path("/users/octocat/repos"))
            .and(header("authorization", "Bearer secret-token"))
            .and(header("accept", GITHUB_JSON))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;
        let gh = github_for(&server, MalformedPolicy::Skip);

        let got = gh.fetch("octocat", "secret-token").await.unwrap();

        let names: Vec<_> = got.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mu"]);
        assert_eq!(got[0].html_url, "https://github.com/octocat/zeta");
        assert_eq!(
            got[0].owner_avatar_url,
            "https://avatars.githubusercontent.com/u/583231"
        );
    }

    #[tokio::test]
    async fn empty_user_id_never_hits_the_network() {
        let server = MockServer::start().await;
        let gh = github_for(&server, MalformedPolicy::Skip);

        let err = gh.fetch("", "secret-token").await.unwrap_err();

        assert!(matches!(err, FetchError::InvalidInput { .. }));
        let requests = server.received_requests().await.unwrap();
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn empty_credential_never_hits_the_network() {
        let server = MockServer::start().await;
        let gh = github_for(&server, MalformedPolicy::Skip);

        let err = gh.fetch("octocat", "").await.unwrap_err();

        assert!(matches!(err, FetchError::InvalidInput { .. }));
        let requests = server.received_requests().await.unwrap();
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn tokens_which_cant_be_sent_are_invalid_input() {
        let server = MockServer::start().await;
        let gh = github_for(&server, MalformedPolicy::Skip);

        let err = gh.fetch("octocat", "secret\ntoken").await.unwrap_err();

        assert!(matches!(err, FetchError::InvalidInput { .. }));
        let requests = server.received_requests().await.unwrap();
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn not_found_is_an_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "Not Found",
            })))
            .mount(&server)
            .await;
        let gh = github_for(&server, MalformedPolicy::Skip);

        let err = gh.fetch("nobody", "secret-token").await.unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn an_empty_array_is_an_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        let gh = github_for(&server, MalformedPolicy::Skip);

        let got = gh.fetch("octocat", "secret-token").await.unwrap();

        assert!(got.is_empty());
        assert_eq!(crate::representative_avatar(&got), "");
    }

    #[tokio::test]
    async fn a_non_array_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": "this isn't a list",
            })))
            .mount(&server)
            .await;
        let gh = github_for(&server, MalformedPolicy::Skip);

        let err = gh.fetch("octocat", "secret-token").await.unwrap_err();

        assert!(matches!(err, FetchError::MalformedBody(_)));
    }

    #[tokio::test]
    async fn fetching_twice_gives_the_same_list() {
        let server = MockServer::start().await;
        let body = json!([repo_json("a", json!("Rust")), repo_json("b", Value::Null)]);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(2)
            .mount(&server)
            .await;
        let gh = github_for(&server, MalformedPolicy::Skip);

        let first = gh.fetch("octocat", "secret-token").await.unwrap();
        let second = gh.fetch("octocat", "secret-token").await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn connection_failures_are_network_errors() {
        // grab a free port then release it so nothing is listening there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let cfg = GitHubConfig {
            host: format!("http://127.0.0.1:{}", port),
            ..Default::default()
        };
        let gh = GitHub::with_config(&cfg).unwrap();

        let err = gh.fetch("octocat", "secret-token").await.unwrap_err();

        assert!(matches!(err, FetchError::Network(_)));
    }
}
