use std::error::Error;
use std::path::{Path, PathBuf};

use packlink_gen::{generate_file, GenerateRequest, Target};

/// Schema stems in dependency order, each with the stems it imports.
const SCHEMAS: &[(&str, &[&str])] = &[("common", &[]), ("device", &["common"])];

const PARENT_NAMESPACE: &str = "conformance";

fn main() -> Result<(), Box<dyn Error>> {
    let out_dir = PathBuf::from(std::env::var_os("OUT_DIR").ok_or("OUT_DIR is not set")?);
    let schema_dir = Path::new("schemas");
    println!("cargo:rerun-if-changed={}", schema_dir.display());

    for (stem, deps) in SCHEMAS {
        let input = schema_dir.join(format!("{stem}.pk"));
        println!("cargo:rerun-if-changed={}", input.display());
        let deps: Vec<PathBuf> = deps
            .iter()
            .map(|dep| schema_dir.join(format!("{dep}.pk")))
            .collect();

        for (target, output) in [
            (Target::Rust, out_dir.join(format!("{stem}.rs"))),
            (
                Target::Cpp,
                out_dir.join("include").join(PARENT_NAMESPACE).join(format!("{stem}.hpp")),
            ),
        ] {
            let request = GenerateRequest::new(&input, output, target)
                .with_deps(deps.iter().cloned())
                .with_parent_namespace(PARENT_NAMESPACE);
            generate_file(&request)?;
        }
    }
    Ok(())
}
