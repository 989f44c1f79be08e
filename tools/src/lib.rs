// Licensed under the Apache-2.0 license

//! Shared helpers for the SystemRDL command-line tools.

use std::path::{Path, PathBuf};

pub mod csv;

/// Default JSON output filename: the input's stem plus a suffix, in the
/// current directory. `chip.rdl` with suffix `_ast` becomes `chip_ast.json`.
pub fn default_json_filename(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    PathBuf::from(format!("{}{}.json", stem, suffix))
}
