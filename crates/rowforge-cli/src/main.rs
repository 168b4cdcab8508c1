mod registry;
mod settings;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use registry::{RunContext, init_logging, start_run, write_json};
use rowforge_recipe::{
    IssueSeverity, Recipe, StoppingCriteria, ValidationReport, load_recipe, recipe_json_schema,
};
use rowforge_runtime::{
    ContinuationSnapshot, CsvOutputStream, DebugOutputStream, GenerateOptions, GenerationEngine,
    JsonLinesOutputStream, OutputError, OutputStream, RuntimeError,
};
use settings::{OutputFormat, SettingsError, load_settings};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
enum CliError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
    #[error("recipe is invalid: {0} error(s)")]
    InvalidRecipe(usize),
    #[error("{0}")]
    Runtime(#[from] RuntimeError),
    #[error("output error: {0}")]
    Output(#[from] OutputError),
    #[error("io error reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Parser, Debug)]
#[command(name = "rowforge", version, about = "Generate relational test data from recipes")]
struct Cli {
    /// Settings file; defaults to ./rowforge.toml when present.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a recipe and emit its rows.
    Generate(GenerateArgs),
    /// Check a recipe without running it.
    Validate(ValidateArgs),
    /// Print the recipe JSON Schema.
    Schema,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Recipe JSON file.
    recipe: PathBuf,
    /// Keep running until COUNT rows of TABLE exist in the run chain.
    #[arg(long, num_args = 2, value_names = ["COUNT", "TABLE"])]
    target_number: Vec<String>,
    /// Recipe option value; may be repeated.
    #[arg(long = "option", num_args = 2, value_names = ["NAME", "VALUE"])]
    options: Vec<String>,
    #[arg(long, value_enum)]
    output_format: Option<OutputFormat>,
    /// Directory for CSV files.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Parent directory for run artifacts (config, logs, summary).
    #[arg(long)]
    run_dir: Option<PathBuf>,
    /// Continue the run chain saved in this file.
    #[arg(long)]
    continuation_file: Option<PathBuf>,
    /// Save the run-chain state to this file after the run.
    #[arg(long)]
    generate_continuation_file: Option<PathBuf>,
    /// Write the table load order as JSON to this file.
    #[arg(long)]
    load_order_file: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Recipe JSON file.
    recipe: PathBuf,
    /// Also check that TABLE can be a stopping target.
    #[arg(long, num_args = 2, value_names = ["COUNT", "TABLE"])]
    target_number: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let settings = load_settings(cli.config.as_deref())?;
    match cli.command {
        Command::Generate(args) => run_generate(args, &settings),
        Command::Validate(args) => {
            init_logging(&settings.logging.filter, None)?;
            run_validate(args)
        }
        Command::Schema => {
            println!("{}", serde_json::to_string_pretty(&recipe_json_schema())?);
            Ok(())
        }
    }
}

fn run_generate(args: GenerateArgs, settings: &settings::Settings) -> Result<(), CliError> {
    let target = parse_target(&args.target_number)?;
    let user_options = parse_options(&args.options)?;
    let output_format = args.output_format.unwrap_or(settings.generate.output_format);
    let seed = args.seed.or(settings.generate.seed);

    let run_paths = match args.run_dir.as_ref().or(settings.generate.run_dir.as_ref()) {
        Some(run_dir) => Some(start_run(&RunContext {
            run_id: Uuid::new_v4().to_string(),
            started_at: chrono::Utc::now(),
            run_dir: run_dir.clone(),
            recipe: args.recipe.clone(),
            target: target.clone(),
            seed,
            output_format,
            options: user_options.clone(),
            continuation_file: args.continuation_file.clone(),
        })?),
        None => None,
    };
    let json_log = run_paths
        .as_ref()
        .filter(|_| settings.logging.json)
        .map(|paths| paths.logs_path.as_path());
    init_logging(&settings.logging.filter, json_log)?;

    let recipe = load_validated(&args.recipe, target.as_ref())?;
    let continuation = args
        .continuation_file
        .as_deref()
        .map(ContinuationSnapshot::load)
        .transpose()?;

    let options = GenerateOptions {
        stopping_criteria: target,
        seed,
        today: None,
        user_options,
    };

    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| settings.generate.output_dir.clone());
    let mut output: Box<dyn OutputStream> = match output_format {
        OutputFormat::Csv => Box::new(
            CsvOutputStream::new(&output_dir)?.with_table_fields(recipe.table_fields()),
        ),
        OutputFormat::Debug => Box::new(DebugOutputStream::stdout()),
        OutputFormat::Jsonl => Box::new(JsonLinesOutputStream::new(io::stdout())),
    };

    let engine = GenerationEngine::new(options);
    let summary = engine.run(&recipe, output.as_mut(), continuation)?;

    if let Some(path) = &args.generate_continuation_file {
        summary.continuation().save(path)?;
        tracing::info!(path = %path.display(), "continuation written");
    }
    if let Some(path) = &args.load_order_file {
        write_json(path, &summary.load_order())?;
    }
    if let Some(paths) = &run_paths {
        write_json(&paths.summary_path, &summary.report)?;
        eprintln!("run_dir={}", paths.root.display());
    }
    if output_format == OutputFormat::Csv {
        eprintln!("csv written to {}", output_dir.display());
    }
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<(), CliError> {
    let target = parse_target(&args.target_number)?;
    let recipe = load_validated(&args.recipe, target.as_ref())?;
    println!(
        "{} is valid: {} statement(s), {} table(s)",
        args.recipe.display(),
        recipe.statements.len(),
        recipe.tables().len()
    );
    Ok(())
}

fn load_validated(
    path: &Path,
    target: Option<&StoppingCriteria>,
) -> Result<Recipe, CliError> {
    let content = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let json: serde_json::Value = serde_json::from_str(&content)?;
    match load_recipe(&json, target) {
        Ok(validated) => {
            for warning in &validated.warnings {
                tracing::warn!(code = %warning.code, path = %warning.path, "{}", warning.message);
            }
            Ok(validated.recipe)
        }
        Err(report) => {
            print_report(&report);
            Err(CliError::InvalidRecipe(report.errors.len()))
        }
    }
}

fn print_report(report: &ValidationReport) {
    for issue in report.errors.iter().chain(&report.warnings) {
        let severity = match issue.severity {
            IssueSeverity::Error => "error",
            IssueSeverity::Warning => "warning",
        };
        eprintln!("{severity}[{}] {}: {}", issue.code, issue.path, issue.message);
        if let Some(hint) = &issue.hint {
            eprintln!("  hint: {hint}");
        }
    }
}

fn parse_target(values: &[String]) -> Result<Option<StoppingCriteria>, CliError> {
    match values {
        [] => Ok(None),
        [count, table] => {
            let count = count.parse::<u64>().map_err(|_| {
                CliError::InvalidArgument(format!("target count must be a number, got {count}"))
            })?;
            Ok(Some(StoppingCriteria::new(table.clone(), count)))
        }
        _ => Err(CliError::InvalidArgument(
            "--target-number takes COUNT TABLE".to_string(),
        )),
    }
}

fn parse_options(values: &[String]) -> Result<BTreeMap<String, String>, CliError> {
    if values.len() % 2 != 0 {
        return Err(CliError::InvalidArgument(
            "--option takes NAME VALUE".to_string(),
        ));
    }
    Ok(values
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_number_takes_count_then_table() {
        let target = parse_target(&["5".to_string(), "Account".to_string()]).unwrap();
        assert_eq!(target, Some(StoppingCriteria::new("Account", 5)));
        assert!(parse_target(&["Account".to_string(), "5".to_string()]).is_err());
        assert_eq!(parse_target(&[]).unwrap(), None);
    }

    #[test]
    fn options_are_name_value_pairs() {
        let options = parse_options(&[
            "region".to_string(),
            "APAC".to_string(),
            "accounts".to_string(),
            "3".to_string(),
        ])
        .unwrap();
        assert_eq!(options.get("region").map(String::as_str), Some("APAC"));
        assert_eq!(options.len(), 2);
    }

    #[test]
    fn cli_parses_generate_flags() {
        let cli = Cli::try_parse_from([
            "rowforge",
            "generate",
            "recipe.json",
            "--target-number",
            "10",
            "Contact",
            "--option",
            "region",
            "EMEA",
            "--output-format",
            "csv",
        ])
        .unwrap();
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.target_number, vec!["10", "Contact"]);
        assert_eq!(args.options, vec!["region", "EMEA"]);
        assert_eq!(args.output_format, Some(OutputFormat::Csv));
    }
}
