mod output;

use clap::{Arg, ArgAction, ArgMatches, Command};
use kiln_core::{generate_error_report, load_ast_from_path, BuilderOptions, IrModule};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use output::{ConsoleLogger, OutputFormat};

fn main() -> ExitCode {
    let cli = Command::new("kiln")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Lower parsed script ASTs into scope-structured IR");

    let cli = setup_cli(cli);
    let matches = cli.get_matches();
    dispatch_commands(&matches)
}

/// Sets up the `lower` and `scopes` subcommands.
fn setup_cli(cli: Command) -> Command {
    cli.subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .help("Raise the log level (repeat for more)")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true),
        )
        .subcommand(
            Command::new("lower")
                .about("Lower one or more AST documents and print the IR")
                .arg(
                    Arg::new("files")
                        .help("AST JSON files or glob patterns")
                        .required(true)
                        .num_args(1..)
                        .index(1),
                )
                .arg(
                    Arg::new("format")
                        .help("Output format")
                        .short('f')
                        .long("format")
                        .value_parser(["text", "json", "table"])
                        .default_value("text")
                        .value_name("FORMAT"),
                )
                .arg(
                    Arg::new("output")
                        .help("Write the output to a file instead of stdout")
                        .short('o')
                        .long("output")
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_name("FILE"),
                )
                .arg(
                    Arg::new("eval")
                        .help("Lower as the body of an eval string evaluated at LINE")
                        .long("eval")
                        .value_parser(clap::value_parser!(usize))
                        .value_name("LINE"),
                )
                .arg(
                    Arg::new("no-lines")
                        .help("Do not emit line number instructions")
                        .long("no-lines")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("scopes")
                .about("Summarize the scopes produced for an AST document")
                .arg(
                    Arg::new("file")
                        .help("The AST JSON file")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .index(1),
                ),
        )
}

fn dispatch_commands(matches: &ArgMatches) -> ExitCode {
    ConsoleLogger::install(matches.get_count("verbose"));

    let result = match matches.subcommand() {
        Some(("lower", sub_m)) => run_lower(sub_m),
        Some(("scopes", sub_m)) => run_scopes(sub_m),
        _ => Err("No valid subcommand was used. Use --help for more information.".to_string()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            output::print_failure(&message);
            ExitCode::FAILURE
        }
    }
}

fn run_lower(sub_m: &ArgMatches) -> Result<(), String> {
    let patterns: Vec<&String> = sub_m.get_many::<String>("files").map(|v| v.collect()).unwrap_or_default();
    let files = expand_patterns(&patterns)?;
    let format = sub_m
        .get_one::<String>("format")
        .map(|f| OutputFormat::parse(f))
        .unwrap_or(OutputFormat::Text);
    let eval_line = sub_m.get_one::<usize>("eval").copied();
    let emit_line_numbers = !sub_m.get_flag("no-lines");

    let progress = output::progress_for(files.len());
    let mut modules = Vec::with_capacity(files.len());
    for file in &files {
        progress.set_message(file.display().to_string());
        let options = BuilderOptions { emit_line_numbers, file_name: file.display().to_string() };
        modules.push(lower_file(file, eval_line, options)?);
        progress.inc(1);
    }
    progress.finish_and_clear();

    let rendered = output::render_modules(&modules, format)?;
    match sub_m.get_one::<PathBuf>("output") {
        Some(path) => fs::write(path, rendered).map_err(|e| format!("Unable to write {:?}: {}", path, e)),
        None => {
            print!("{}", rendered);
            Ok(())
        }
    }
}

fn run_scopes(sub_m: &ArgMatches) -> Result<(), String> {
    let file = sub_m.get_one::<PathBuf>("file").ok_or("missing file argument")?;
    let options = BuilderOptions { file_name: file.display().to_string(), ..BuilderOptions::default() };
    let module = lower_file(file, None, options)?;
    println!("{}", output::scope_table(&module));
    Ok(())
}

fn lower_file(path: &Path, eval_line: Option<usize>, options: BuilderOptions) -> Result<IrModule, String> {
    let ast = load_ast_from_path(path).map_err(|e| generate_error_report(&e))?;
    let lowered = match eval_line {
        Some(line) => kiln_core::lower_eval_to_ir(&ast, line, options),
        None => kiln_core::lower_ast_to_ir_with(&ast, options),
    };
    lowered.map_err(|e| generate_error_report(&e))
}

/// Expand every argument as a glob; arguments matching nothing are kept
/// as literal paths so a missing file reports a read error.
fn expand_patterns(patterns: &[&String]) -> Result<Vec<PathBuf>, String> {
    let mut files = Vec::new();
    for pattern in patterns {
        let paths = glob::glob(pattern).map_err(|e| format!("Invalid pattern '{}': {}", pattern, e))?;
        let mut matched = false;
        for entry in paths {
            let path = entry.map_err(|e| format!("Unable to read {:?}: {}", e.path(), e.error()))?;
            if path.is_file() {
                files.push(path);
                matched = true;
            }
        }
        if !matched {
            files.push(PathBuf::from(pattern.as_str()));
        }
    }
    Ok(files)
}
