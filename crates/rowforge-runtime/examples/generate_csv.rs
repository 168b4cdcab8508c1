use std::env;
use std::path::PathBuf;

use rowforge_recipe::Recipe;
use rowforge_runtime::{CsvOutputStream, GenerateOptions, GenerationEngine};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let mut recipe_path: Option<PathBuf> = None;
    let mut out_dir = PathBuf::from("out");
    let mut options = GenerateOptions::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--out" => out_dir = args.next().map(PathBuf::from).ok_or("missing --out path")?,
            "--seed" => options.seed = Some(args.next().ok_or("missing --seed value")?.parse()?),
            "--target" => {
                let table = args.next().ok_or("missing --target table")?;
                let count = args.next().ok_or("missing --target count")?.parse()?;
                options = options.with_target(table, count);
            }
            _ => {
                if recipe_path.is_none() {
                    recipe_path = Some(PathBuf::from(arg));
                } else {
                    return Err("unexpected argument".into());
                }
            }
        }
    }

    let recipe_path = recipe_path.ok_or("missing recipe path")?;
    let recipe: Recipe = serde_json::from_str(&std::fs::read_to_string(&recipe_path)?)?;

    let mut output = CsvOutputStream::new(&out_dir)?.with_table_fields(recipe.table_fields());
    let summary = GenerationEngine::new(options).run(&recipe, &mut output, None)?;

    for table in &summary.report.tables {
        println!("{}: {} rows", table.table, table.rows_written);
    }
    println!("out_dir={}", out_dir.display());
    Ok(())
}
