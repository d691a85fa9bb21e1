use std::{env, fmt::Write as _, fs, path::PathBuf};

use waterlevel_common::content_type_for_name;

const GENERATED_FILE: &str = "assets_generated.rs";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if env::var_os("CARGO_FEATURE_ESP32").is_some() {
        embuild::espidf::sysenv::output();
    }

    let web_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?).join("web");
    println!("cargo:rerun-if-changed={}", web_dir.display());

    let mut files = fs::read_dir(&web_dir)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()?;
    files.retain(|path| path.is_file());
    files.sort();

    let mut generated = String::from("pub static ASSET_MANIFEST: &[AssetEntry] = &[\n");
    for path in &files {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| format!("asset name is not UTF-8: {}", path.display()))?;
        let source = path.display().to_string();
        writeln!(
            generated,
            "    AssetEntry::new({name:?}, {:?}, include_bytes!({source:?})),",
            content_type_for_name(name),
        )?;
    }
    generated.push_str("];\n");

    let out_path = PathBuf::from(env::var("OUT_DIR")?).join(GENERATED_FILE);
    fs::write(out_path, generated)?;
    Ok(())
}
