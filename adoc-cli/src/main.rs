//! Command-line interface for adoc
//! Compiles an adoc document and prints the resulting element lines, or the
//! elements and diagnostics as JSON.
//!
//! Usage:
//!   adoc `<path>` [-a name=value]... [--safe] [-c `<config>`]... [-f text|json] [-v]
//!   adoc -                                  - Read the document from stdin

use std::process::ExitCode;

use adoc_config::Loader;
use adoc_engine::adoc::context::{parse_command_attribute, CommandAttributes};
use adoc_engine::adoc::reader::Source;
use adoc_engine::{Compilation, CompileContext};
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("adoc")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Compile adoc documents")
        .arg_required_else_help(true)
        .arg(
            Arg::new("path")
                .help("Path to the adoc file, or - for stdin")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("attribute")
                .long("attribute")
                .short('a')
                .help("Define (name=value, name) or undefine (name!) a document attribute")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("safe")
                .long("safe")
                .help("Refuse shell commands, expression evaluation and includes outside the document tree")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Configuration file layered over the defaults (TOML, repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("no-user-config")
                .long("no-user-config")
                .help("Skip the user configuration file")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .short('f')
                .help("Output format")
                .value_parser(["text", "json"])
                .default_value("text"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Log progress to stderr")
                .action(ArgAction::SetTrue),
        )
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("verbose"));

    let mut loader = Loader::new();
    if !matches.get_flag("no-user-config") {
        loader = loader.with_user_file();
    }
    for path in matches.get_many::<String>("config").into_iter().flatten() {
        loader = loader.with_file(path);
    }
    let mut config = match loader.build() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if matches.get_flag("safe") {
        config.settings.safe = true;
    }

    let attributes: CommandAttributes = matches
        .get_many::<String>("attribute")
        .into_iter()
        .flatten()
        .map(|a| parse_command_attribute(a))
        .collect();
    let source = match matches.get_one::<String>("path").map(String::as_str) {
        Some("-") | None => Source::Stdin,
        Some(path) => Source::Path(path.into()),
    };

    let mut ctx = match CompileContext::with_attributes(config, attributes) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let (elements, failure) = match ctx.compile(source) {
        Ok(elements) => (elements, None),
        Err(e) => (Vec::new(), Some(e)),
    };
    let compilation = Compilation {
        elements,
        diagnostics: ctx.doc.messages.take(),
    };
    if let Some(e) = failure {
        print_diagnostics(&compilation);
        eprintln!("FAILED: {}", e);
        return ExitCode::FAILURE;
    }
    print_output(&matches, &compilation)
}

/// `RUST_LOG` wins; otherwise warnings, or debug with `-v`.
fn init_logging(verbose: bool) {
    let default = if verbose { "adoc_engine=debug,adoc=debug" } else { "off" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn print_diagnostics(compilation: &Compilation) {
    for diagnostic in &compilation.diagnostics {
        eprintln!("{}", diagnostic);
    }
}

fn print_output(matches: &ArgMatches, compilation: &Compilation) -> ExitCode {
    match matches.get_one::<String>("format").map(String::as_str) {
        Some("json") => match serde_json::to_string_pretty(compilation) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error formatting output: {}", e);
                return ExitCode::FAILURE;
            }
        },
        _ => {
            print_diagnostics(compilation);
            for line in compilation.lines() {
                println!("{}", line);
            }
        }
    }
    ExitCode::SUCCESS
}
