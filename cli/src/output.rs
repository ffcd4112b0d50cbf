/// cli/src/output.rs
/// description: rendering for the CLI: the stderr logger, progress
/// reporting for multi-file runs, and the text/json/table views of a
/// lowered module.

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use kiln_core::ir::op::IROp;
use kiln_core::IrModule;
use log::{Level, LevelFilter, Log, Metadata, Record};

/// ====================================================================
/// Logging

/// Writes `log` records to stderr, coloured by level.
pub struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl ConsoleLogger {
    /// Warnings by default; each `-v` adds a level (debug, then trace).
    pub fn install(verbosity: u8) {
        let filter = match verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };
        // a second install in the same process keeps the first logger
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(filter);
        }
    }

    fn style_for(level: Level) -> Style {
        match level {
            Level::Error => Style::new().red().bold(),
            Level::Warn => Style::new().yellow(),
            Level::Info => Style::new().green(),
            Level::Debug => Style::new().cyan(),
            Level::Trace => Style::new().dim(),
        }
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let level = Self::style_for(record.level()).apply_to(format!("{:<5}", record.level()));
        eprintln!("{} {} {}: {}", Style::new().dim().apply_to(stamp), level, record.target(), record.args());
    }

    fn flush(&self) {}
}

pub fn print_failure(message: &str) {
    eprintln!("{} {}", Style::new().red().bold().apply_to("error:"), message);
}

/// ====================================================================
/// Progress

/// A bar for runs over several files; single-file runs stay quiet.
pub fn progress_for(total: usize) -> ProgressBar {
    if total < 2 {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::with_template("{bar:30.cyan/blue} {pos}/{len} {wide_msg}") {
        bar.set_style(style.progress_chars("█▒░"));
    }
    bar
}

/// ====================================================================
/// Module rendering

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl OutputFormat {
    pub fn parse(name: &str) -> Self {
        match name {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

pub fn render_modules(modules: &[IrModule], format: OutputFormat) -> Result<String, String> {
    match format {
        OutputFormat::Text => {
            let dumps: Vec<String> = modules.iter().map(|m| format!("# {}\n{}", m.file_name, m)).collect();
            Ok(dumps.join("\n"))
        }
        OutputFormat::Json => {
            let rendered = match modules {
                [single] => serde_json::to_string_pretty(single),
                many => serde_json::to_string_pretty(many),
            };
            rendered.map(|mut s| {
                s.push('\n');
                s
            })
            .map_err(|e| format!("Unable to serialize IR: {}", e))
        }
        OutputFormat::Table => {
            let tables: Vec<String> = modules.iter().map(|m| format!("{}\n", instruction_table(m))).collect();
            Ok(tables.join("\n"))
        }
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_content_arrangement(ContentArrangement::Dynamic).set_header(header);
    table
}

/// One row per instruction, labels in their own column.
fn instruction_table(module: &IrModule) -> Table {
    let mut table = new_table(vec!["scope", "label", "instruction"]);
    for scope in &module.scopes {
        let owner = format!("{} {} '{}'", scope.kind, scope.id, scope.name);
        for op in &scope.instrs {
            match op {
                IROp::Label { label } => table.add_row(vec![owner.clone(), label.to_string(), String::new()]),
                _ => table.add_row(vec![owner.clone(), String::new(), op.to_string()]),
            };
        }
    }
    table
}

pub fn scope_table(module: &IrModule) -> Table {
    let mut table = new_table(vec!["id", "kind", "name", "parent", "instrs", "locals", "flags"]);
    for scope in &module.scopes {
        let parent = scope.parent.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        let locals: Vec<&str> = scope.locals.iter().map(|l| l.name.as_str()).collect();
        let flags: Vec<String> = scope.flags.iter().map(|f| format!("{:?}", f)).collect();
        table.add_row(vec![
            scope.id.to_string(),
            scope.kind.to_string(),
            scope.name.clone(),
            parent,
            scope.instrs.len().to_string(),
            locals.join(", "),
            flags.join(", "),
        ]);
    }
    table
}
