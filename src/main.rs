use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::env;
use std::path::PathBuf;

mod certbot;
mod commands;
mod config;
mod exec;
mod nginx;
mod output;
mod php;
mod system;
mod vhost;

use commands::auth::AuthAction;
use commands::ssl::SslAction;
use config::Config;
use exec::Runner;

const ENV_HELP: &str = "\
CONFIGURATION:
  Settings are read from the environment, after loading a .env file from the
  executable's directory and then from the current directory.

  SVP_SITES_AVAILABLE  nginx sites-available directory (/etc/nginx/sites-available)
  SVP_SITES_ENABLED    nginx sites-enabled directory (/etc/nginx/sites-enabled)
  SVP_NGINX_SNIPPETS   nginx snippets directory (/etc/nginx/snippets)
  SVP_WEBROOT          parent of the per-site directories (/var/www)
  SVP_LETSENCRYPT_DIR  certbot live directory (/etc/letsencrypt/live)
  SVP_PHP_VERSION      PHP-FPM version for new vhosts (8.4)
  SVP_PHP_DIR          PHP configuration root holding <version>/fpm/pool.d (/etc/php)
  SVP_PHP_RUN_DIR      directory of the PHP-FPM sockets (/run/php)
  SVP_LE_EMAIL         Let's Encrypt notification address (optional)

  RUST_LOG overrides --verbose/--debug for diagnostic logging.";

fn main() {
    if let Err(e) = run() {
        output::error(format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    load_env_files();

    let matches = cli().get_matches();
    output::init_tracing(matches.get_flag("verbose"), matches.get_flag("debug"));

    let config = Config::from_env().context("Configuration Error")?;
    let runner = Runner::new();
    tracing::debug!(?config, "loaded configuration");

    match matches.subcommand() {
        Some(("auth", auth_matches)) => {
            let (action, sub) = subcommand(auth_matches)?;
            let domain = domain_arg(sub);
            let action = match action {
                "enable" => AuthAction::Enable {
                    username: sub.get_one::<String>("username").map(String::as_str),
                    password: sub.get_one::<String>("password").map(String::as_str),
                },
                "disable" => AuthAction::Disable,
                _ => AuthAction::Check,
            };
            commands::auth::run(&config, &runner, domain, action)
        }
        Some(("ssl", ssl_matches)) => {
            let (action, sub) = subcommand(ssl_matches)?;
            let domain = domain_arg(sub);
            let action = match action {
                "enable" => SslAction::Enable {
                    email: sub.get_one::<String>("email").map(String::as_str),
                },
                "disable" => SslAction::Disable,
                "renew" => SslAction::Renew,
                _ => SslAction::Check,
            };
            commands::ssl::run(&config, &runner, domain, action)
        }
        Some(("vhost", vhost_matches)) => {
            let (action, sub) = subcommand(vhost_matches)?;
            let domain = domain_arg(sub);
            match action {
                "create" => commands::vhost::create(&config, &runner, domain),
                _ => commands::vhost::show(&config, domain),
            }
        }
        Some(("php", php_matches)) => {
            let (_, sub) = subcommand(php_matches)?;
            let version = sub
                .get_one::<String>("version")
                .map(String::as_str)
                .unwrap_or_default();
            commands::php::update(&config, &runner, domain_arg(sub), version, sub.get_flag("yes"))
        }
        _ => {
            println!("No valid subcommand provided. Use --help for usage information.");
            Ok(())
        }
    }
}

fn cli() -> Command {
    Command::new("svp")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Manage nginx virtual hosts: basic authentication, Let's Encrypt SSL and vhost files")
        .after_help(ENV_HELP)
        .arg_required_else_help(true)
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .global(true)
            .help("Enable verbose output")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("debug")
            .long("debug")
            .global(true)
            .help("Log every command that is run")
            .action(ArgAction::SetTrue))
        .subcommand(Command::new("auth")
            .about("Manage HTTP basic authentication for a site")
            .subcommand_required(true)
            .subcommand(Command::new("enable")
                .about("Create the password file and add auth_basic directives")
                .arg(domain())
                .arg(Arg::new("username")
                    .short('u')
                    .long("username")
                    .value_name("USER")
                    .help("Username (prompted for when omitted)"))
                .arg(Arg::new("password")
                    .short('p')
                    .long("password")
                    .value_name("PASS")
                    .help("Password (prompted for when omitted)")))
            .subcommand(Command::new("disable")
                .about("Remove the password file and the auth_basic directives")
                .arg(domain()))
            .subcommand(Command::new("check")
                .about("Show basic authentication status")
                .arg(domain())))
        .subcommand(Command::new("ssl")
            .about("Manage the Let's Encrypt certificate and HTTPS server block")
            .subcommand_required(true)
            .subcommand(Command::new("enable")
                .about("Obtain or reuse a certificate and configure HTTPS")
                .arg(domain())
                .arg(Arg::new("email")
                    .short('e')
                    .long("email")
                    .value_name("EMAIL")
                    .help("Email address for Let's Encrypt notifications (default: SVP_LE_EMAIL)")))
            .subcommand(Command::new("disable")
                .about("Remove the HTTPS server block, keeping certificate files")
                .arg(domain()))
            .subcommand(Command::new("renew")
                .about("Force renewal of the certificate")
                .arg(domain()))
            .subcommand(Command::new("check")
                .about("Show certificate details")
                .arg(domain())))
        .subcommand(Command::new("vhost")
            .about("Create or inspect the nginx vhost file")
            .subcommand_required(true)
            .subcommand(Command::new("create")
                .about("Write the vhost from the template and enable it")
                .arg(domain()))
            .subcommand(Command::new("show")
                .about("Print the server blocks of the vhost")
                .arg(domain())))
        .subcommand(Command::new("php")
            .about("Manage the PHP-FPM version serving a site")
            .subcommand_required(true)
            .subcommand(Command::new("update")
                .about("Switch the site to another PHP version, keeping auth and SSL")
                .arg(domain())
                .arg(Arg::new("version")
                    .help("PHP version to switch to, e.g. 8.4")
                    .required(true)
                    .index(2))
                .arg(Arg::new("yes")
                    .short('y')
                    .long("yes")
                    .help("Do not ask for confirmation")
                    .action(ArgAction::SetTrue))))
}

fn domain() -> Arg {
    Arg::new("domain")
        .help("Domain name of the site")
        .required(true)
        .index(1)
}

fn subcommand(matches: &ArgMatches) -> Result<(&str, &ArgMatches)> {
    matches.subcommand().context("Missing subcommand")
}

fn domain_arg(matches: &ArgMatches) -> &str {
    matches
        .get_one::<String>("domain")
        .map(String::as_str)
        .unwrap_or_default()
}

/// Loads `.env` next to the executable, then from the working directory.
/// Variables already set are never overridden.
fn load_env_files() {
    let exe_env = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(".env")));
    let candidates = exe_env.into_iter().chain([PathBuf::from(".env")]);

    for path in candidates {
        if path.is_file() {
            dotenv::from_path(&path).ok();
        }
    }
}
