use rowforge_recipe::recipe_json_schema;

fn main() -> Result<(), serde_json::Error> {
    let schema = recipe_json_schema();
    let json = serde_json::to_string_pretty(&schema)?;
    println!("{json}");
    Ok(())
}
