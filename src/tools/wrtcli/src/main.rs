mod app;
mod prompt;
mod render;
mod shell;
mod util;

use app::{build_context, CliApp};
use clap::{Arg, ArgAction, Command};
use log::*;
use std::path::{Path, PathBuf};
use util::parse_action_args;
use wrt_api::load_panel_config;

fn cli() -> Command {
    Command::new("wrtcli")
        .about("OpenWrt admin panel over ubus")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .help("config file, default ~/.wrtcli/config.toml"),
        )
        .arg(
            Arg::new("url")
                .long("url")
                .global(true)
                .help("ubus endpoint, e.g. http://192.168.1.1/ubus"),
        )
        .arg(
            Arg::new("yes")
                .long("yes")
                .short('y')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("answer yes to every confirmation"),
        )
        .subcommand(
            Command::new("login")
                .about("log in and store the session")
                .arg(Arg::new("user").long("user").default_value("root"))
                .arg(Arg::new("password").long("password").required(true))
                .arg(
                    Arg::new("remember")
                        .long("remember")
                        .action(ArgAction::SetTrue)
                        .help("keep credentials for automatic re-login"),
                ),
        )
        .subcommand(Command::new("logout").about("destroy the session and forget credentials"))
        .subcommand(Command::new("status").about("session and feature overview"))
        .subcommand(
            Command::new("open")
                .about("navigate to a page and print it")
                .arg(Arg::new("path").required(true).help("e.g. /network/firewall")),
        )
        .subcommand(
            Command::new("do")
                .about("run a module action")
                .arg(Arg::new("module").required(true))
                .arg(Arg::new("action").required(true))
                .arg(
                    Arg::new("args")
                        .num_args(0..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true)
                        .help("--id <id>, --file <input>=<path>, key=value"),
                ),
        )
        .subcommand(
            Command::new("backup")
                .about("download a configuration backup")
                .arg(Arg::new("out").long("out").default_value(".")),
        )
        .subcommand(Command::new("shell").about("interactive session with live dashboard polling"))
}

#[tokio::main]
async fn main() -> std::result::Result<(), String> {
    wrt_kit::init_logging("wrtcli", false);
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = load_panel_config(config_path.as_deref()).map_err(|err| {
        println!("{}", err);
        err.to_string()
    })?;
    if let Some(url) = matches.get_one::<String>("url") {
        config.endpoint = url.clone();
    }
    let assume_yes = matches.get_flag("yes");

    let out_dir = match matches.subcommand() {
        Some(("backup", sub)) => sub
            .get_one::<String>("out")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
        _ => PathBuf::from("."),
    };
    let ctx = build_context(config, assume_yes)?;
    let app = CliApp::new(ctx, Path::new(&out_dir));

    let result = match matches.subcommand() {
        Some(("login", sub)) => {
            let user = sub.get_one::<String>("user").map(|s| s.as_str()).unwrap_or("root");
            let password = sub.get_one::<String>("password").map(|s| s.as_str()).unwrap_or("");
            app.login(user, password, sub.get_flag("remember")).await.map(|_| {
                println!("logged in as {}", user);
            })
        }
        Some(("logout", _)) => match app.resume().await {
            Ok(()) => {
                app.ctx.logout().await;
                println!("logged out");
                Ok(())
            }
            Err(_) => {
                println!("no active session");
                Ok(())
            }
        },
        Some(("status", _)) => {
            let _ = app.resume().await;
            print!("{}", app.status());
            Ok(())
        }
        Some(("open", sub)) => match app.resume().await {
            Ok(()) => {
                let path = sub.get_one::<String>("path").map(|s| s.as_str()).unwrap_or("/dashboard");
                app.open(path).await;
                app.show();
                Ok(())
            }
            Err(err) => Err(err),
        },
        Some(("do", sub)) => {
            let module = sub.get_one::<String>("module").cloned().unwrap_or_default();
            let action = sub.get_one::<String>("action").cloned().unwrap_or_default();
            let raw: Vec<String> = sub
                .get_many::<String>("args")
                .map(|values| values.cloned().collect())
                .unwrap_or_default();
            match parse_action_args(&raw) {
                Ok(args) => match app.resume().await {
                    Ok(()) => {
                        app.flush_toasts();
                        let result = app.run_action(&module, &action, &args).await;
                        app.show();
                        result
                    }
                    Err(err) => Err(err),
                },
                Err(err) => Err(err),
            }
        }
        Some(("backup", _)) => match app.resume().await {
            Ok(()) => {
                app.flush_toasts();
                let result = app
                    .run_action("system", "backup", &Default::default())
                    .await;
                app.flush_toasts();
                result
            }
            Err(err) => Err(err),
        },
        Some(("shell", _)) => match app.resume().await {
            Ok(()) => shell::run_shell(&app).await,
            Err(err) => Err(err),
        },
        _ => Err("unknown command".to_string()),
    };

    app.ctx.stop_polling();
    if let Err(err) = &result {
        error!("wrtcli failed: {}", err);
        println!("{}", err);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_do_args() {
        let matches = cli()
            .try_get_matches_from([
                "wrtcli", "--yes", "do", "network", "save-forward", "--id", "cfg01", "name=Web", "--file", "x=y",
            ])
            .unwrap();
        assert!(matches.get_flag("yes"));
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "do");
        let raw: Vec<String> = sub.get_many::<String>("args").unwrap().cloned().collect();
        let args = parse_action_args(&raw).unwrap();
        assert_eq!(args.id.as_deref(), Some("cfg01"));
        assert_eq!(args.form.get("name"), Some("Web"));
        assert_eq!(args.files.len(), 1);
    }

    #[test]
    fn test_cli_global_url_after_subcommand() {
        let matches = cli()
            .try_get_matches_from(["wrtcli", "open", "/vpn", "--url", "http://10.0.0.1/ubus"])
            .unwrap();
        assert_eq!(matches.get_one::<String>("url").map(|s| s.as_str()), Some("http://10.0.0.1/ubus"));
        assert!(cli().try_get_matches_from(["wrtcli", "login"]).is_err());
    }
}
