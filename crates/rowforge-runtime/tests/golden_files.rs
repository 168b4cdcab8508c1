use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use rowforge_recipe::{FieldExpr, ObjectTemplate, Recipe};
use rowforge_runtime::{CsvOutputStream, GenerateOptions, GenerationEngine};

fn hash_file(path: &Path) -> Result<String, std::io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn recipe_fixture() -> Recipe {
    Recipe::new(vec![
        ObjectTemplate::new("Account")
            .nickname("Acme")
            .just_once()
            .field("name", FieldExpr::literal("Acme Corp"))
            .field("tier", FieldExpr::literal(1))
            .into(),
        ObjectTemplate::new("Contact")
            .count(2)
            .field(
                "name",
                FieldExpr::concat(vec![
                    FieldExpr::literal("Contact "),
                    FieldExpr::var("child_index"),
                ]),
            )
            .field("account", FieldExpr::reference("Acme"))
            .field("score", FieldExpr::literal(2.5))
            .into(),
        ObjectTemplate::new("__Counter")
            .field("hidden", FieldExpr::literal(true))
            .into(),
    ])
}

fn temp_out_dir(label: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!("rowforge_runtime_{label}_{}", uuid::Uuid::new_v4()));
    dir
}

#[test]
fn csv_output_matches_golden_hashes() {
    let out_dir = temp_out_dir("golden");
    let mut output = CsvOutputStream::new(&out_dir).expect("open csv output");

    let options = GenerateOptions::default()
        .with_seed(42)
        .with_today(NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"))
        .with_target("Contact", 4);
    GenerationEngine::new(options)
        .run(&recipe_fixture(), &mut output, None)
        .expect("run generation");

    assert_eq!(
        fs::read_to_string(out_dir.join("Contact.csv")).expect("read Contact.csv"),
        "id,name,account,score\n1,Contact 0,1,2.5\n2,Contact 1,1,2.5\n3,Contact 0,1,2.5\n4,Contact 1,1,2.5\n"
    );

    let account_hash = hash_file(&out_dir.join("Account.csv")).expect("hash Account.csv");
    let contact_hash = hash_file(&out_dir.join("Contact.csv")).expect("hash Contact.csv");
    assert_eq!(
        account_hash,
        "d5624c8ecaff01523b0e23f14a49f9f64a092d25d634b18cbc9b747f9671c584"
    );
    assert_eq!(
        contact_hash,
        "43cd5bbd436b38475e8cd70f6f196e7850a880c2c3057eed3ab689d294c8b682"
    );
    assert!(!out_dir.join("__Counter.csv").exists());
    assert!(output.bytes_written() > 0);

    let _ = fs::remove_dir_all(out_dir);
}

#[test]
fn same_seed_produces_identical_csv() {
    let recipe_path =
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../recipes/sales.recipe.json");
    let recipe: Recipe = serde_json::from_str(
        &fs::read_to_string(&recipe_path).expect("read sales recipe"),
    )
    .expect("parse sales recipe");

    let mut hashes = Vec::new();
    for label in ["run_a", "run_b"] {
        let out_dir = temp_out_dir(label);
        let mut output = CsvOutputStream::new(&out_dir)
            .expect("open csv output")
            .with_table_fields(recipe.table_fields());
        let options = GenerateOptions::default()
            .with_seed(7)
            .with_today(NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"))
            .with_target("Opportunity", 5);
        let summary = GenerationEngine::new(options)
            .run(&recipe, &mut output, None)
            .expect("run generation");
        assert_eq!(summary.report.iterations, 5);

        let run_hashes: Vec<String> = ["Account", "Contact", "Opportunity", "OpportunityContactRole"]
            .iter()
            .map(|table| hash_file(&out_dir.join(format!("{table}.csv"))).expect("hash csv"))
            .collect();
        hashes.push(run_hashes);
        let _ = fs::remove_dir_all(out_dir);
    }

    assert_eq!(hashes[0], hashes[1], "csv output should be deterministic");
}

#[test]
fn templates_of_one_table_with_different_fields_share_a_header() {
    let recipe = Recipe::new(vec![
        ObjectTemplate::new("Contact")
            .field("name", FieldExpr::literal("Ada"))
            .into(),
        ObjectTemplate::new("Contact")
            .nickname("Boss")
            .field("name", FieldExpr::literal("Grace"))
            .field("title", FieldExpr::literal("CEO"))
            .into(),
    ]);
    let out_dir = temp_out_dir("union");
    let mut output = CsvOutputStream::new(&out_dir)
        .expect("open csv output")
        .with_table_fields(recipe.table_fields());

    let options = GenerateOptions::default()
        .with_seed(1)
        .with_today(NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"));
    GenerationEngine::new(options)
        .run(&recipe, &mut output, None)
        .expect("run generation");

    assert_eq!(
        fs::read_to_string(out_dir.join("Contact.csv")).expect("read Contact.csv"),
        "id,name,title\n1,Ada,\n2,Grace,CEO\n"
    );
    let _ = fs::remove_dir_all(out_dir);
}
