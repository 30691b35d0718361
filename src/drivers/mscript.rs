//! MethodSCRIPT result parsing.
//!
//! The instrument answers a script with one line per event:
//! - `M....` a measurement loop starts (opens a curve),
//! - `P....` a data package, variables separated by `;`,
//! - `*` the loop ended (closes the curve),
//! - `!....` an error reported by the firmware,
//! - an empty line once the whole script has finished.
//!
//! A variable is a two letter type code, seven hex digits offset by `0x8000000`
//! and an SI prefix character, optionally followed by `,`-separated metadata.
use crate::drivers::curve::{Column, Curve};
use crate::drivers::ScanError;
const VALUE_OFFSET: i64 = 0x800_0000;
const SI_PREFIXES: &[(char, i32)] = &[
    ('a', -18),
    ('f', -15),
    ('p', -12),
    ('n', -9),
    ('u', -6),
    ('m', -3),
    (' ', 0),
    ('i', 0),
    ('k', 3),
    ('M', 6),
    ('G', 9),
    ('T', 12),
    ('P', 15),
    ('E', 18),
];
const VARIABLE_TYPES: &[(&str, &str, &str)] = &[
    ("aa", "Unknown", ""),
    ("ab", "WE vs RE potential", "V"),
    ("ac", "CE vs GND potential", "V"),
    ("ae", "RE vs GND potential", "V"),
    ("af", "WE vs GND potential", "V"),
    ("ba", "WE current", "A"),
    ("ca", "Phase", "degrees"),
    ("cb", "Impedance", "Ohm"),
    ("da", "Applied potential", "V"),
    ("db", "Applied current", "A"),
    ("dc", "Applied frequency", "Hz"),
    ("dd", "Applied AC amplitude", "Vrms"),
    ("eb", "Time", "s"),
    ("ja", "Misc. generic 1", ""),
];
/// Variable type code used for the applied potential column.
pub const APPLIED_POTENTIAL: &str = "da";
/// Variable type code used for the working-electrode current columns.
pub const WE_CURRENT: &str = "ba";
pub fn column_for(code: &str) -> Column {
    VARIABLE_TYPES
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, name, unit)| Column::new(*name, *unit))
        .unwrap_or_else(|| Column::new(code, ""))
}
fn scale(value: f64, exponent: i32) -> f64 {
    if exponent < 0 {
        value / 10f64.powi(-exponent)
    } else {
        value * 10f64.powi(exponent)
    }
}
fn prefix_exponent(prefix: char) -> Option<i32> {
    SI_PREFIXES
        .iter()
        .find(|(c, _)| *c == prefix)
        .map(|(_, e)| *e)
}
/// Decodes one package variable into its type code and value.
pub fn decode_variable(text: &str) -> Result<(String, f64), ScanError> {
    let body = text.split(',').next().unwrap_or_default();
    let chars: Vec<char> = body.chars().collect();
    if chars.len() != 10 {
        return Err(ScanError::InstrumentCommunication(format!(
            "malformed package variable '{text}'"
        )));
    }
    let code: String = chars[..2].iter().collect();
    let hex: String = chars[2..9].iter().collect();
    let raw = i64::from_str_radix(&hex, 16).map_err(|e| {
        ScanError::InstrumentCommunication(format!("bad value in '{text}': {e}"))
    })?;
    let exponent = prefix_exponent(chars[9]).ok_or_else(|| {
        ScanError::InstrumentCommunication(format!("unknown SI prefix in '{text}'"))
    })?;
    Ok((code, scale((raw - VALUE_OFFSET) as f64, exponent)))
}
/// Encodes a value with the finest SI prefix that still fits the 7 hex digits.
pub fn encode_variable(code: &str, value: f64) -> String {
    for &(prefix, exponent) in SI_PREFIXES {
        if prefix == 'i' {
            continue;
        }
        let scaled = scale(value, -exponent).round();
        if scaled.abs() < VALUE_OFFSET as f64 {
            return format!("{code}{:07X}{prefix}", scaled as i64 + VALUE_OFFSET);
        }
    }
    format!("{code}{:07X} ", VALUE_OFFSET)
}
/// Formats a data package line (without the trailing newline).
pub fn format_package(variables: &[(&str, f64)]) -> String {
    let body: Vec<String> = variables
        .iter()
        .map(|(code, value)| encode_variable(code, *value))
        .collect();
    format!("P{}", body.join(";"))
}
/// Parses an SI-suffixed script literal such as `-215m`, `10u` or `0.5`.
pub fn parse_si_value(text: &str) -> Option<f64> {
    let text = text.trim();
    let last = text.chars().last()?;
    if last.is_ascii_alphabetic() {
        let exponent = prefix_exponent(last)?;
        let number: f64 = text[..text.len() - last.len_utf8()].parse().ok()?;
        Some(scale(number, exponent))
    } else {
        text.parse().ok()
    }
}
/// Splits the instrument's answer into curves. Lines after the terminating empty
/// line are ignored.
pub fn parse_result_lines(lines: &[String]) -> Result<Vec<Curve>, ScanError> {
    let mut curves = Vec::new();
    let mut columns: Option<Vec<Column>> = None;
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut flush = |columns: &mut Option<Vec<Column>>, rows: &mut Vec<Vec<f64>>| {
        if let Some(cols) = columns.take() {
            if !rows.is_empty() {
                curves.push(Curve::from_rows(cols, rows));
            }
        }
        rows.clear();
    };
    for line in lines {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        match line.chars().next() {
            Some('!') => {
                return Err(ScanError::InstrumentCommunication(format!(
                    "instrument reported error '{line}'"
                )))
            }
            Some('M') => flush(&mut columns, &mut rows),
            Some('*') => flush(&mut columns, &mut rows),
            Some('P') => {
                let decoded = line[1..]
                    .split(';')
                    .map(decode_variable)
                    .collect::<Result<Vec<_>, _>>()?;
                if columns.is_none() {
                    columns = Some(decoded.iter().map(|(code, _)| column_for(code)).collect());
                }
                rows.push(decoded.into_iter().map(|(_, v)| v).collect());
            }
            _ => {}
        }
    }
    flush(&mut columns, &mut rows);
    curves.into_iter().collect()
}
