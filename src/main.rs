// ABOUTME: Command-line driver: ordered load/eval/convert operations, REPL and protocol server

use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command};
use evl::error::EvlError;
use evl::eval::{AbortFlag, Strategy};
use evl::session::{respond, Request, Session};
use rustyline::error::ReadlineError;
use rustyline::{Config, Editor};
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// One operation from the command line, kept in argument order.
#[derive(Debug)]
enum Operation {
    Load(PathBuf),
    Eval(String),
    Convert(PathBuf),
}

fn cli() -> Command {
    let strategy_flags = Strategy::ALL.map(|s| s.id());
    let mut command = Command::new("evl")
        .version(env!("CARGO_PKG_VERSION"))
        .about("An educational Lisp dialect with six interchangeable evaluators")
        .arg(
            Arg::new("load")
                .short('l')
                .value_name("FILE")
                .action(ArgAction::Append)
                .help("Load and evaluate an EVL source file"),
        )
        .arg(
            Arg::new("eval")
                .short('e')
                .value_name("FORM")
                .action(ArgAction::Append)
                .help("Evaluate a form given on the command line"),
        )
        .arg(
            Arg::new("convert")
                .long("convert")
                .value_name("FILE")
                .action(ArgAction::Append)
                .help("Convert an EVL source file to its XML rendering"),
        )
        .arg(
            Arg::new("serve")
                .long("serve")
                .action(ArgAction::SetTrue)
                .help("Serve the JSON request/response protocol over stdio"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Raise the log level (repeatable)"),
        );
    for id in strategy_flags {
        command = command.arg(
            Arg::new(id)
                .long(id)
                .action(ArgAction::SetTrue)
                .help(format!("Select the {} evaluator", id)),
        );
    }
    command.group(ArgGroup::new("strategy").args(strategy_flags).multiple(false))
}

fn selected_strategy(matches: &ArgMatches) -> Strategy {
    for strategy in Strategy::ALL {
        if matches.get_flag(strategy.id()) {
            return strategy;
        }
    }
    Strategy::TrampolinePp
}

/// Collects `-l`/`-e`/`--convert` in command-line order; the operations
/// run in exactly that order against one session.
fn ordered_operations(matches: &ArgMatches) -> Vec<Operation> {
    let mut operations: Vec<(usize, Operation)> = Vec::new();
    if let (Some(indices), Some(values)) = (
        matches.indices_of("load"),
        matches.get_many::<String>("load"),
    ) {
        for (i, v) in indices.zip(values) {
            operations.push((i, Operation::Load(PathBuf::from(v))));
        }
    }
    if let (Some(indices), Some(values)) = (
        matches.indices_of("eval"),
        matches.get_many::<String>("eval"),
    ) {
        for (i, v) in indices.zip(values) {
            operations.push((i, Operation::Eval(v.clone())));
        }
    }
    if let (Some(indices), Some(values)) = (
        matches.indices_of("convert"),
        matches.get_many::<String>("convert"),
    ) {
        for (i, v) in indices.zip(values) {
            operations.push((i, Operation::Convert(PathBuf::from(v))));
        }
    }
    operations.sort_by_key(|(i, _)| *i);
    operations.into_iter().map(|(_, op)| op).collect()
}

fn main() {
    let matches = cli().get_matches();

    let level = match matches.get_count("verbose") {
        0 => log::Level::Warn,
        1 => log::Level::Info,
        _ => log::Level::Debug,
    };
    if let Err(e) = simple_logger::init_with_level(level) {
        eprintln!("failed to initialize logging: {}", e);
    }

    if matches.get_flag("serve") {
        serve();
        return;
    }

    let strategy = selected_strategy(&matches);
    log::debug!("selected evaluator strategy {}", strategy.id());

    let abort = AbortFlag::new();
    let (session, result) = Session::initialize(strategy, &[], abort);
    if let Err(e) = result {
        fail(&e);
    }

    let operations = ordered_operations(&matches);
    if operations.is_empty() {
        repl(&session);
        return;
    }

    for operation in operations {
        if let Err(e) = run_operation(&session, &operation) {
            fail(&e);
        }
    }
}

/// Errors print to standard output and terminate with a nonzero code.
fn fail(error: &EvlError) -> ! {
    println!("{}: {}", error.kind_name(), error);
    std::process::exit(1);
}

fn read_source(path: &PathBuf) -> Result<String, EvlError> {
    std::fs::read_to_string(path).map_err(|e| {
        EvlError::signal(format!("cannot read file {}: {}", path.display(), e))
    })
}

fn run_operation(session: &Session, operation: &Operation) -> Result<(), EvlError> {
    match operation {
        Operation::Load(path) => {
            log::info!("loading {}", path.display());
            session.evaluate_all_forms(&read_source(path)?)?;
            Ok(())
        }
        Operation::Eval(form) => {
            for value in session.evaluate_all_forms(form)? {
                println!("{}", value);
            }
            Ok(())
        }
        Operation::Convert(path) => {
            log::info!("converting {}", path.display());
            let xml = session.convert_evl_to_xml(&read_source(path)?)?;
            println!("{}", xml);
            Ok(())
        }
    }
}

/// Interactive loop, entered when no operations are given.
fn repl(session: &Session) {
    let config = Config::builder().auto_add_history(true).build();
    let mut editor = match Editor::<(), rustyline::history::DefaultHistory>::with_config(config) {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("failed to initialize the REPL: {}", e);
            std::process::exit(1);
        }
    };

    let history_file = ".evl_history";
    let _ = editor.load_history(history_file);

    println!("EVL interpreter ({} evaluator)", session.strategy().id());
    println!("Type (quit) to leave.");

    loop {
        match editor.readline("evl> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed == "(quit)" || trimmed == "(exit)" {
                    println!("Goodbye!");
                    break;
                }
                match session.evaluate_all_forms(&line) {
                    Ok(values) => {
                        for value in values {
                            println!("=> {}", value);
                        }
                    }
                    Err(e) => eprintln!("{}: {}", e.kind_name(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(e) => {
                eprintln!("readline error: {}", e);
                break;
            }
        }
    }

    let _ = editor.save_history(history_file);
}

/// The message protocol over stdio: one JSON request per line in, one
/// JSON response per line out. The abort buffer belongs to the embedding
/// host; here the process owns one.
fn serve() {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let abort = AbortFlag::new();
    let mut session: Option<Session> = None;

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => respond(&mut session, request, abort.clone()),
            Err(e) => {
                log::warn!("unreadable request: {}", e);
                continue;
            }
        };
        match serde_json::to_string(&response) {
            Ok(json) => {
                if writeln!(stdout, "{}", json).and_then(|_| stdout.flush()).is_err() {
                    break;
                }
            }
            Err(e) => log::error!("unwritable response: {}", e),
        }
    }
}
