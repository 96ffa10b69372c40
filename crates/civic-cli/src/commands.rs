//! Subcommand handlers

use anyhow::{bail, Context};
use clap::ArgMatches;
use civic_client::{
    ApiBody, AuthGuard, AuthenticatedHttpClient, Collection, Credentials, RegisterRequest, Role,
    RoleRouter,
};

fn required<'a>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a str> {
    args.get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("missing --{name}"))
}

fn print_body(body: &ApiBody) -> anyhow::Result<()> {
    match body {
        ApiBody::Json(value) => println!("{}", serde_json::to_string_pretty(value)?),
        ApiBody::Text(text) => println!("{text}"),
    }
    Ok(())
}

pub(crate) async fn login(client: &AuthenticatedHttpClient, args: &ArgMatches) -> anyhow::Result<()> {
    let credentials = Credentials::new(required(args, "username")?, required(args, "password")?);
    let session = client.login(&credentials).await?;

    println!("Logged in as {} ({})", session.username, session.role);
    println!("Dashboard: {}", RoleRouter::dashboard_for(Some(session.role)));
    Ok(())
}

pub(crate) async fn register(
    client: &AuthenticatedHttpClient,
    args: &ArgMatches,
) -> anyhow::Result<()> {
    let role = args
        .get_one::<String>("role")
        .map(|r| r.parse::<Role>())
        .transpose()?;

    let request = RegisterRequest {
        first_name: required(args, "first-name")?.to_string(),
        last_name: required(args, "last-name")?.to_string(),
        username: required(args, "username")?.to_string(),
        email: required(args, "email")?.to_string(),
        password: required(args, "password")?.to_string(),
        role,
    };

    match client.register(&request).await? {
        Some(session) => println!("Registered as {} ({})", session.username, session.role),
        None => println!("Registration successful, please log in"),
    }
    Ok(())
}

pub(crate) async fn logout(client: &AuthenticatedHttpClient) -> anyhow::Result<()> {
    client.logout().await?;
    println!("Logged out");
    Ok(())
}

pub(crate) fn whoami(client: &AuthenticatedHttpClient) -> anyhow::Result<()> {
    match client.session()? {
        Some(session) => {
            println!("{} ({})", session.username, session.role);
            if let Some(user) = &session.user {
                println!("{}", serde_json::to_string_pretty(user)?);
            }
        }
        None => println!("Not logged in"),
    }
    Ok(())
}

pub(crate) async fn get(client: &AuthenticatedHttpClient, args: &ArgMatches) -> anyhow::Result<()> {
    let body = client.get(required(args, "endpoint")?).await?;
    print_body(&body)
}

pub(crate) async fn list(client: &AuthenticatedHttpClient, args: &ArgMatches) -> anyhow::Result<()> {
    let collection: Collection = required(args, "collection")?.parse()?;
    let items = client
        .resource::<serde_json::Value>(collection)
        .list()
        .await?;

    println!("{}", serde_json::to_string_pretty(&items)?);
    eprintln!("{} item(s)", items.len());
    Ok(())
}

pub(crate) fn guard(client: &AuthenticatedHttpClient, args: &ArgMatches) -> anyhow::Result<()> {
    let path = required(args, "path")?;
    let decision = AuthGuard::check_store(path, client.store().as_ref())?;

    match decision.redirect_route(&client.config().login_route) {
        None => println!("allow"),
        Some(route) => {
            println!("redirect {route}");
            bail!("access to {path} denied");
        }
    }
    Ok(())
}
