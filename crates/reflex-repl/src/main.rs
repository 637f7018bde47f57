use std::{
    fs,
    io::{self, IsTerminal},
    path::PathBuf,
};

use anyhow::Result;
use clap::{Arg, Command};
use reflex_core::{init_tracing, DirectorySources, EngineConfig};
use reflex_repl::repl::{LineProcessResult, MultiLineCollector, Repl};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let matches = Command::new("reflex-repl")
        .version(reflex_core::VERSION)
        .about("Interactive shell for inspecting and mutating a running Reflex program")
        .arg(
            Arg::new("sources")
                .value_name("DIR")
                .help("Directory of .rfx sources to load")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("JSON engine configuration"),
        )
        .arg(
            Arg::new("artifacts")
                .long("artifacts")
                .value_name("DIR")
                .help("Persist installed artifacts below this directory"),
        )
        .arg(
            Arg::new("script")
                .long("script")
                .value_name("FILE")
                .help("Run REPL input from a file instead of the terminal"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Log engine internals")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let debug = matches.get_flag("debug");
    if debug {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("reflex_core=debug,reflex_repl=debug"))
            .try_init();
    } else {
        init_tracing();
    }

    let sources: PathBuf = matches
        .get_one::<String>("sources")
        .map(PathBuf::from)
        .unwrap_or_default();
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(root) = matches.get_one::<String>("artifacts") {
        config = config.with_artifact_root(root);
    }
    let script = matches.get_one::<String>("script").cloned();

    println!("Reflex REPL v{}", reflex_core::VERSION);
    println!("Sources: {}", sources.display());

    let mut repl = Repl::from_sources(config, &DirectorySources::new(&sources))?;
    println!("Loaded {} type(s)", repl.engine().types().len());
    println!("Type .help for help, .quit to exit");
    println!();

    run_repl(&mut repl, script)
}

fn run_repl(repl: &mut Repl, script: Option<String>) -> Result<()> {
    use rustyline::{error::ReadlineError, DefaultEditor};

    let mut rl = DefaultEditor::new()?;
    let mut multiline = MultiLineCollector::new();

    let script_lines: Option<Vec<String>> = match script {
        Some(path) => Some(fs::read_to_string(path)?.lines().map(str::to_string).collect()),
        None => None,
    };
    let is_interactive = script_lines.is_none() && io::stdin().is_terminal();
    let mut script_iter = script_lines.as_ref().map(|lines| lines.iter());

    while repl.is_running() {
        let line_result = match script_iter.as_mut() {
            Some(iter) => match iter.next() {
                Some(line) => Ok(line.clone()),
                None => break,
            },
            None => rl.readline(multiline.get_prompt()),
        };

        match line_result {
            Ok(line) => {
                if !multiline.is_collecting() && line.trim().is_empty() {
                    continue;
                }
                let LineProcessResult::Complete(input) = multiline.process_line(&line) else {
                    continue;
                };
                let input = input.trim();
                rl.add_history_entry(input)?;
                if !is_interactive {
                    println!("reflex> {input}");
                }

                if input.starts_with('.') {
                    match repl.parse_input(input) {
                        Ok(command) => match repl.handle_command(command) {
                            Ok(output) => repl.notifier().on_output(&output),
                            Err(e) => repl.notifier().on_error(&format!("Error: {e:#}")),
                        },
                        Err(e) => repl.notifier().on_error(&format!("Error: {e}")),
                    }
                } else {
                    match repl.execute(input) {
                        Ok((output, duration)) => {
                            repl.notifier().on_result(&output, duration, repl.is_quiet())
                        }
                        Err(e) => repl.notifier().on_error(&format!("Error: {e:#}")),
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                if multiline.is_collecting() {
                    println!("^C");
                    multiline.reset();
                } else {
                    println!("Use .quit to exit");
                }
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }

    repl.show_exit_stats();
    Ok(())
}
