#[macro_use]
extern crate log;

use chrono::Local;
use env_logger::{Builder, Env};
use failure::{Error, ResultExt};
use log::LevelFilter;
use repo_dashboard::{Config, Dashboard, ProfileStore, RepositorySummary};
use sec::Secret;
use std::env;
use std::io::Write;
use std::process;
use structopt::StructOpt;

#[tokio::main]
async fn main() {
    let args = Args::from_args();

    if args.example_config {
        if let Err(e) = generate_example() {
            report(&e);
            process::exit(1);
        }
        return;
    }

    if let Err(e) = run(&args).await {
        report(&e);
        process::exit(1);
    }
}

fn report(e: &Error) {
    eprintln!("Error: {}", e);

    for cause in e.iter_causes() {
        eprintln!("\tCaused By: {}", cause);
    }
}

fn generate_example() -> Result<(), Error> {
    let example = Config::example();
    println!("{}", example.as_toml()?);

    Ok(())
}

async fn run(args: &Args) -> Result<(), Error> {
    initialize_logging(args.verbosity)?;
    let mut cfg = args.config()?;

    // the environment always wins over the config file
    if let Ok(token) = env::var("GITHUB_TOKEN") {
        debug!("Using the API token from $GITHUB_TOKEN");
        cfg.github.token = Secret::new(token);
    }

    if log_enabled!(log::Level::Debug) {
        for line in format!("{:#?}", cfg).lines() {
            debug!("{}", line);
        }
    }

    let username = args.username(&cfg).await?;
    let dashboard = Dashboard::from_config(&cfg)?;

    dashboard
        .set_username(username.as_str())
        .await
        .with_context(|_| format!("Unable to fetch the repositories for {}", username))?;

    let repos = dashboard.repositories();

    if args.json {
        let json = serde_json::to_string_pretty(&*repos)
            .context("Unable to serialize the repositories")?;
        println!("{}", json);
    } else {
        print_summaries(&repos, &dashboard.representative_avatar());
    }

    Ok(())
}

fn print_summaries(repos: &[RepositorySummary], avatar: &str) {
    if !avatar.is_empty() {
        println!("Avatar: {}", avatar);
    }

    for repo in repos {
        println!(
            "{:<30} {:<12} {:<8} {}",
            repo.name,
            repo.language.as_deref().unwrap_or("-"),
            repo.visibility,
            repo.html_url
        );
    }

    println!("{} repositories", repos.len());
}

#[derive(Debug, Clone, PartialEq, StructOpt)]
struct Args {
    #[structopt(
        short = "c",
        long = "config",
        default_value = "~/.repo-dashboard.toml",
        help = "The configuration file to use."
    )]
    config_file: String,
    #[structopt(
        short = "v",
        long = "verbose",
        parse(from_occurrences),
        help = "Verbose output (repeat for more verbosity)"
    )]
    verbosity: u64,
    #[structopt(
        long = "example-config",
        help = "Generate an example config and immediately exit."
    )]
    example_config: bool,
    #[structopt(
        short = "u",
        long = "user",
        help = "The GitHub username to show repositories for."
    )]
    user: Option<String>,
    #[structopt(
        long = "uid",
        help = "Look the GitHub username up in the profile store.",
        conflicts_with = "user"
    )]
    uid: Option<String>,
    #[structopt(long = "json", help = "Print the repositories as JSON.")]
    json: bool,
}

impl Args {
    pub fn config(&self) -> Result<Config, Error> {
        let config_file =
            shellexpand::full(&self.config_file).context("Unable to expand wildcards")?;

        Config::from_file(&*config_file)
            .context("Couldn't load the config")
            .map_err(Into::into)
    }

    async fn username(&self, cfg: &Config) -> Result<String, Error> {
        if let Some(ref user) = self.user {
            return Ok(user.clone());
        }

        let uid = match self.uid {
            Some(ref uid) => uid,
            None => {
                return Err(failure::err_msg(
                    "Either a username (--user) or user ID (--uid) is required",
                ))
            }
        };

        let profiles = match cfg.dashboard.profiles {
            Some(ref path) => path.to_string_lossy().into_owned(),
            None => return Err(failure::err_msg("No profile store was configured")),
        };
        let profiles = shellexpand::full(&profiles).context("Unable to expand wildcards")?;

        let store = ProfileStore::new(&*profiles);
        let username = store
            .lookup(uid)
            .await
            .with_context(|_| format!("Unable to look up the profile for {}", uid))?;

        username.ok_or_else(|| failure::err_msg(format!("{} doesn't have a GitHub username", uid)))
    }
}

/// Our own messages go to stderr at the level picked with `-v`, everything
/// else (reqwest, hyper, etc.) only shows up if asked for via `RUST_LOG`.
fn initialize_logging(verbosity: u64) -> Result<(), Error> {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = Builder::new();
    builder
        .filter_level(LevelFilter::Warn)
        .filter_module(env!("CARGO_CRATE_NAME"), level)
        .parse_env(Env::default());

    builder.format(|out, record| {
        let timestamp = Local::now().format("%H:%M:%S%.3f");

        if record.target().starts_with(env!("CARGO_CRATE_NAME")) {
            writeln!(out, "{} {:<5} {}", timestamp, record.level(), record.args())
        } else {
            writeln!(
                out,
                "{} {:<5} [{}] {}",
                timestamp,
                record.level(),
                record.target(),
                record.args()
            )
        }
    });

    builder.try_init()?;

    Ok(())
}
