// Licensed under the Apache-2.0 license

//! CSV register map to SystemRDL conversion.
//!
//! Consumes a spreadsheet-style register description and emits SystemRDL
//! text. The header row is mapped onto the standard column set by exact
//! name, known abbreviations, or edit distance; the delimiter (`,` or `;`)
//! is auto-detected; quoted cells may span lines. Rows group into address
//! maps and registers in order: a row carrying an addrmap name opens a new
//! addrmap, a row carrying a register name opens a new register, and rows
//! carrying only field columns add fields to the open register.

use anyhow::{bail, Result};
use log::debug;

/// Standard column names, in the order matching [`CsvRow`]'s fields.
const STANDARD_COLUMNS: &[&str] = &[
    "addrmap_offset",
    "addrmap_name",
    "reg_offset",
    "reg_name",
    "reg_width",
    "field_name",
    "field_lsb",
    "field_msb",
    "reset_value",
    "sw_access",
    "hw_access",
    "description",
];

/// Common header abbreviations accepted in place of the standard names.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("sw_acc", "sw_access"),
    ("hw_acc", "hw_access"),
    ("access", "sw_access"),
    ("addr_offset", "addrmap_offset"),
    ("addr_name", "addrmap_name"),
    ("lsb", "field_lsb"),
    ("msb", "field_msb"),
    ("desc", "description"),
    ("width", "reg_width"),
];

#[derive(Clone, Debug, Default)]
struct CsvRow {
    addrmap_offset: String,
    addrmap_name: String,
    reg_offset: String,
    reg_name: String,
    reg_width: String,
    field_name: String,
    field_lsb: String,
    field_msb: String,
    reset_value: String,
    sw_access: String,
    hw_access: String,
    description: String,
    /// 1-based logical line for error reporting.
    line: usize,
}

/// Convert CSV content to SystemRDL text. All malformed rows are reported
/// together in the error message.
pub fn csv_to_rdl(content: &str) -> Result<String> {
    let lines = split_logical_lines(content);
    let mut rows = Vec::new();
    let mut mapping: Option<Vec<Option<usize>>> = None;
    let mut errors = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let delimiter = detect_delimiter(line);
        let cells = split_csv_line(line, delimiter);
        match &mapping {
            None => {
                let map = column_mapping(&cells);
                if map.iter().all(Option::is_none) {
                    bail!("line 1: no recognizable columns in CSV header");
                }
                mapping = Some(map);
            }
            Some(map) => {
                let row = parse_row(&cells, map, index + 1);
                if let Err(message) = check_row(&row) {
                    errors.push(message);
                }
                rows.push(row);
            }
        }
    }

    if mapping.is_none() {
        bail!("empty CSV input");
    }
    if !errors.is_empty() {
        bail!("{}", errors.join("\n"));
    }
    debug!("parsed {} CSV data rows", rows.len());
    Ok(generate_rdl(&rows))
}

/// Split content into logical lines, keeping quoted cells that span
/// physical lines together.
fn split_logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in content.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\n' if !in_quotes => {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Whichever of `;` and `,` occurs more often wins; ties go to `,`.
fn detect_delimiter(line: &str) -> char {
    let commas = line.matches(',').count();
    let semicolons = line.matches(';').count();
    if semicolons > commas {
        ';'
    } else {
        ','
    }
}

/// Split one logical line on the delimiter, honoring quotes and `""`
/// escapes.
fn split_csv_line(line: &str, delimiter: char) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if in_quotes && chars.peek() == Some(&'"') {
                current.push('"');
                chars.next();
            } else {
                in_quotes = !in_quotes;
            }
        } else if c == delimiter && !in_quotes {
            cells.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    cells.push(current);
    cells
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut row = vec![i + 1];
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            row.push(substitution.min(prev[j + 1] + 1).min(row[j] + 1));
        }
        prev = row;
    }
    prev[b.len()]
}

/// Map one header cell onto a standard column: exact, abbreviation, then
/// fuzzy with edit distance below 4.
fn match_column(header: &str) -> Option<usize> {
    let lower = header.trim().to_lowercase();
    if let Some(index) = STANDARD_COLUMNS.iter().position(|c| *c == lower) {
        return Some(index);
    }
    if let Some((_, standard)) = ABBREVIATIONS.iter().find(|(abbrev, _)| *abbrev == lower) {
        return STANDARD_COLUMNS.iter().position(|c| c == standard);
    }
    let mut best = None;
    let mut best_distance = 4;
    for (index, standard) in STANDARD_COLUMNS.iter().enumerate() {
        let distance = levenshtein(&lower, standard);
        if distance < best_distance {
            best_distance = distance;
            best = Some(index);
        }
    }
    best
}

fn column_mapping(headers: &[String]) -> Vec<Option<usize>> {
    headers
        .iter()
        .map(|h| {
            let matched = match_column(h);
            match matched {
                Some(index) => debug!("column '{}' -> {}", h.trim(), STANDARD_COLUMNS[index]),
                None => debug!("column '{}' ignored", h.trim()),
            }
            matched
        })
        .collect()
}

fn trim(s: &str) -> String {
    s.trim().to_string()
}

/// Name cells lose embedded newlines entirely.
fn clean_name(s: &str) -> String {
    s.trim().chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

/// Descriptions keep internal newlines but runs collapse to one.
fn clean_description(s: &str) -> String {
    let trimmed = s.trim();
    let mut result = String::new();
    let mut prev_newline = false;
    for c in trimmed.chars() {
        if c == '\n' || c == '\r' {
            if !prev_newline {
                result.push('\n');
                prev_newline = true;
            }
        } else {
            result.push(c);
            prev_newline = false;
        }
    }
    result
}

fn parse_row(cells: &[String], mapping: &[Option<usize>], line: usize) -> CsvRow {
    let mut row = CsvRow {
        line,
        ..Default::default()
    };
    for (cell, column) in cells.iter().zip(mapping.iter()) {
        let Some(column) = column else {
            continue;
        };
        match column {
            0 => row.addrmap_offset = trim(cell),
            1 => row.addrmap_name = clean_name(cell),
            2 => row.reg_offset = trim(cell),
            3 => row.reg_name = clean_name(cell),
            4 => row.reg_width = trim(cell),
            5 => row.field_name = clean_name(cell),
            6 => row.field_lsb = trim(cell),
            7 => row.field_msb = trim(cell),
            8 => row.reset_value = trim(cell),
            9 => row.sw_access = trim(cell),
            10 => row.hw_access = trim(cell),
            11 => row.description = clean_description(cell),
            _ => {}
        }
    }
    row
}

fn parse_number(text: &str) -> Option<u64> {
    let clean = text.trim().replace('_', "");
    if let Some(hex) = clean.strip_prefix("0x").or_else(|| clean.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        clean.parse().ok()
    }
}

fn check_row(row: &CsvRow) -> Result<(), String> {
    let check_num = |name: &str, value: &str| -> Result<(), String> {
        if !value.is_empty() && parse_number(value).is_none() {
            return Err(format!(
                "line {}: {} '{}' is not a number",
                row.line, name, value
            ));
        }
        Ok(())
    };
    check_num("addrmap_offset", &row.addrmap_offset)?;
    check_num("reg_offset", &row.reg_offset)?;
    check_num("reg_width", &row.reg_width)?;
    check_num("field_lsb", &row.field_lsb)?;
    check_num("field_msb", &row.field_msb)?;
    check_num("reset_value", &row.reset_value)?;
    if !row.field_name.is_empty() {
        match (parse_number(&row.field_lsb), parse_number(&row.field_msb)) {
            (Some(lsb), Some(msb)) if msb < lsb => {
                return Err(format!(
                    "line {}: field '{}' has msb {} below lsb {}",
                    row.line, row.field_name, msb, lsb
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

fn escape(s: &str) -> String {
    s.chars()
        .flat_map(|c| match c {
            '"' => vec!['\\', '"'],
            '\\' => vec!['\\', '\\'],
            '\n' => vec!['\\', 'n'],
            other => vec![other],
        })
        .collect()
}

fn format_address(addr: &str) -> String {
    if addr.is_empty() {
        "0x0".to_string()
    } else if addr.starts_with("0x") || addr.starts_with("0X") {
        addr.to_string()
    } else {
        format!("0x{}", addr)
    }
}

fn generate_rdl(rows: &[CsvRow]) -> String {
    let mut rdl = String::new();
    let mut current_addrmap = String::new();
    let mut current_reg = String::new();
    let mut current_reg_offset = String::new();
    let mut in_reg = false;

    let close_reg = |rdl: &mut String, reg: &str, offset: &str| {
        rdl.push_str(&format!("    }} {} @ {};\n\n", reg, format_address(offset)));
    };

    for row in rows {
        if !row.addrmap_name.is_empty() && !row.addrmap_offset.is_empty() {
            if in_reg {
                close_reg(&mut rdl, &current_reg, &current_reg_offset);
                in_reg = false;
            }
            if !current_addrmap.is_empty() {
                rdl.push_str("};\n\n");
            }
            current_addrmap = row.addrmap_name.clone();
            rdl.push_str(&format!("addrmap {} {{\n", current_addrmap));
            rdl.push_str(&format!("    name = \"{}\";\n", escape(&row.addrmap_name)));
            if !row.description.is_empty() {
                rdl.push_str(&format!("    desc = \"{}\";\n", escape(&row.description)));
            }
            rdl.push('\n');
        } else if !row.reg_name.is_empty() && !row.reg_offset.is_empty() {
            if in_reg {
                close_reg(&mut rdl, &current_reg, &current_reg_offset);
            }
            current_reg = row.reg_name.clone();
            current_reg_offset = row.reg_offset.clone();
            in_reg = true;
            rdl.push_str("    reg {\n");
            rdl.push_str(&format!("        name = \"{}\";\n", escape(&row.reg_name)));
            if !row.description.is_empty() {
                rdl.push_str(&format!("        desc = \"{}\";\n", escape(&row.description)));
            }
            if !row.reg_width.is_empty() {
                rdl.push_str(&format!("        regwidth = {};\n", row.reg_width));
            }
            rdl.push('\n');
        } else if !row.field_name.is_empty() && in_reg {
            rdl.push_str("        field {\n");
            rdl.push_str(&format!("            name = \"{}\";\n", escape(&row.field_name)));
            if !row.description.is_empty() {
                rdl.push_str(&format!(
                    "            desc = \"{}\";\n",
                    escape(&row.description)
                ));
            }
            if !row.sw_access.is_empty() {
                rdl.push_str(&format!("            sw = {};\n", row.sw_access.to_lowercase()));
            }
            if !row.hw_access.is_empty() {
                rdl.push_str(&format!("            hw = {};\n", row.hw_access.to_lowercase()));
            }
            rdl.push_str(&format!("        }} {}", row.field_name));
            if !row.field_lsb.is_empty() && !row.field_msb.is_empty() {
                rdl.push_str(&format!("[{}:{}]", row.field_msb, row.field_lsb));
            }
            if !row.reset_value.is_empty() {
                rdl.push_str(&format!(" = {}", row.reset_value));
            }
            rdl.push_str(";\n\n");
        }
    }

    if in_reg {
        close_reg(&mut rdl, &current_reg, &current_reg_offset);
    }
    if !current_addrmap.is_empty() {
        rdl.push_str("};\n");
    }
    rdl
}
