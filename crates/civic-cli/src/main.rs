//! `civic` - log in, inspect the session and query the portal API from a terminal.

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use civic_client::{AuthenticatedHttpClient, ClientConfig, FileStore, TracingNavigator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod commands;

const DEFAULT_SESSION_FILE: &str = ".civic-session.json";

fn build_cli() -> Command {
    Command::new("civic")
        .version(civic_client::VERSION)
        .about("Civic portal command-line client")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("login")
                .about("Log in and store the session")
                .arg(Arg::new("username").long("username").required(true))
                .arg(Arg::new("password").long("password").required(true)),
        )
        .subcommand(
            Command::new("register")
                .about("Create an account")
                .arg(Arg::new("first-name").long("first-name").required(true))
                .arg(Arg::new("last-name").long("last-name").required(true))
                .arg(Arg::new("username").long("username").required(true))
                .arg(Arg::new("email").long("email").required(true))
                .arg(Arg::new("password").long("password").required(true))
                .arg(
                    Arg::new("role")
                        .long("role")
                        .help("ADMIN, TOURIST, STUDENT, JOB_APPLICANT or BUSINESS_USER"),
                ),
        )
        .subcommand(Command::new("logout").about("End the session"))
        .subcommand(Command::new("whoami").about("Show the stored session"))
        .subcommand(
            Command::new("get")
                .about("GET an endpoint and print the body")
                .arg(Arg::new("endpoint").required(true)),
        )
        .subcommand(
            Command::new("list")
                .about("List a resource collection")
                .arg(Arg::new("collection").required(true)),
        )
        .subcommand(
            Command::new("guard")
                .about("Check page access for the stored session")
                .arg(Arg::new("path").required(true)),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<ClientConfig> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::new(),
    };
    Ok(config.with_env()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = build_cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    let config = load_config(&matches)?;
    let session_file = config
        .session_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE));
    let store = FileStore::open(&session_file)
        .with_context(|| format!("opening session file {}", session_file.display()))?;

    let client = AuthenticatedHttpClient::builder(config)
        .store(Arc::new(store))
        .navigator(Arc::new(TracingNavigator))
        .build()?;

    match matches.subcommand() {
        Some(("login", args)) => commands::login(&client, args).await,
        Some(("register", args)) => commands::register(&client, args).await,
        Some(("logout", _)) => commands::logout(&client).await,
        Some(("whoami", _)) => commands::whoami(&client),
        Some(("get", args)) => commands::get(&client, args).await,
        Some(("list", args)) => commands::list(&client, args).await,
        Some(("guard", args)) => commands::guard(&client, args),
        _ => unreachable!("subcommand_required"),
    }
}
