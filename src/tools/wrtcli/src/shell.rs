use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::app::CliApp;
use crate::util::{parse_action_args, split_words};

const HELP: &str = "commands:
  go <path>                         navigate, e.g. go /network/firewall
  do <module> <action> [args...]    --id <id>, --file <input>=<path>, key=value
  show                              print the current page
  visible on|off                    pause or resume dashboard polling
  logout
  exit";

pub async fn run_shell(app: &CliApp) -> Result<(), String> {
    let mut rl = DefaultEditor::new().map_err(|err| format!("init line editor failed: {}", err))?;
    app.show();
    loop {
        let readline = rl.readline("wrt> ");
        match readline {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                let words = split_words(&line);
                if words.is_empty() {
                    continue;
                }

                match words[0].as_str() {
                    "go" => {
                        if words.len() != 2 {
                            println!("usage: go <path>");
                            continue;
                        }
                        app.open(&words[1]).await;
                        app.show();
                    }
                    "do" => {
                        if words.len() < 3 {
                            println!("usage: do <module> <action> [args...]");
                            continue;
                        }
                        match parse_action_args(&words[3..]) {
                            Ok(args) => {
                                if let Err(err) = app.run_action(&words[1], &words[2], &args).await {
                                    println!("error: {}", err);
                                }
                                app.flush_toasts();
                            }
                            Err(err) => println!("error: {}", err),
                        }
                    }
                    "show" => app.show(),
                    "visible" => match words.get(1).map(|s| s.as_str()) {
                        Some("on") => app.ctx.set_page_visible(true),
                        Some("off") => app.ctx.set_page_visible(false),
                        _ => println!("usage: visible on|off"),
                    },
                    "logout" => {
                        app.ctx.logout().await;
                        println!("logged out");
                        break;
                    }
                    "help" => println!("{}", HELP),
                    "exit" | "quit" => break,
                    other => println!("unknown command: {}, try help", other),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("read input failed: {}", err);
                break;
            }
        }
    }
    app.ctx.stop_polling();
    Ok(())
}
