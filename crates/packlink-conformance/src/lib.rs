//! Rust generated at build time from `schemas/*.pk`.
//!
//! Each schema becomes a sibling module named after its file stem, which is
//! how generated code refers to the namespaces it imports.

pub mod common {
    include!(concat!(env!("OUT_DIR"), "/common.rs"));
}

pub mod device {
    include!(concat!(env!("OUT_DIR"), "/device.rs"));
}

/// Directory holding the schema sources.
pub const SCHEMA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/schemas");

/// Include root of the generated C++ headers; `conformance/<stem>.hpp`
/// lives below it.
pub const INCLUDE_DIR: &str = concat!(env!("OUT_DIR"), "/include");

/// Generated C++ header for `stem`.
pub fn cpp_header(stem: &str) -> std::io::Result<String> {
    let path = std::path::Path::new(INCLUDE_DIR)
        .join("conformance")
        .join(format!("{stem}.hpp"));
    std::fs::read_to_string(path)
}
