//! CSV decoding into a [`Table`].
//!
//! Downloads arrive as raw bytes. Encoding is detected with `chardet`,
//! the delimiter from the header line, and each cell is coerced to a number,
//! null or string (see [`crate::table::value::coerce`]).

use crate::error::{CsvError, CsvResult};
use crate::table::value::coerce;
use crate::table::{Record, Table};

/// Result of parsing with metadata
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// Parsed rows
    pub table: Table,
    /// Detected encoding
    pub encoding: String,
    /// Detected delimiter
    pub delimiter: char,
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    // Normalize charset names
    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    // Strip a UTF-8 byte order mark so the first header is clean
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => {
            encoding_rs::ISO_8859_15.decode(bytes).0.into_owned()
        }
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Pick the delimiter that occurs most often in the header line.
///
/// Ties go to the earlier candidate, so a single-column header is read as
/// comma separated.
pub fn detect_delimiter(content: &str) -> char {
    const CANDIDATES: [char; 4] = [',', ';', '\t', '|'];
    let header = content.lines().next().unwrap_or_default();

    CANDIDATES
        .into_iter()
        .rev()
        .max_by_key(|sep| header.matches(*sep).count())
        .unwrap_or(',')
}

/// Parse CSV text with an explicit delimiter.
///
/// Quoted fields may contain delimiters and newlines. Short rows are padded
/// with nulls, extra fields are ignored, blank lines are skipped.
pub fn parse_csv(content: &str, delimiter: char) -> CsvResult<Table> {
    if content.trim().is_empty() {
        return Err(CsvError::EmptyFile);
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(CsvError::NoHeaders);
    }

    let mut table = Table::new(headers.iter().cloned());
    for result in reader.records() {
        let record = result?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let row: Record = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), record.get(i).map(coerce).unwrap_or_default()))
            .collect();
        table.push_row(row);
    }

    Ok(table)
}

/// Parse CSV bytes with auto-detection of encoding and delimiter.
pub fn parse_bytes_auto(bytes: &[u8]) -> CsvResult<ParseResult> {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = detect_delimiter(&content);
    let table = parse_csv(&content, delimiter)?;

    Ok(ParseResult {
        table,
        encoding,
        delimiter,
    })
}

/// Parse a CSV file with auto-detection.
pub fn parse_csv_file_auto<P: AsRef<std::path::Path>>(path: P) -> CsvResult<ParseResult> {
    let bytes = std::fs::read(path.as_ref())?;
    parse_bytes_auto(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_simple_csv_with_coercion() {
        let csv = "date,state,confirmed\n2020-03-01,NSW,4\n2020-03-02,VIC,";
        let t = parse_csv(csv, ',').unwrap();

        assert_eq!(t.len(), 2);
        assert_eq!(t.columns(), ["date", "state", "confirmed"]);
        assert_eq!(t.rows()[0]["confirmed"], 4);
        assert_eq!(t.rows()[1]["confirmed"], Value::Null);
        assert_eq!(t.rows()[1]["state"], "VIC");
    }

    #[test]
    fn test_quoted_values() {
        let csv = "lga_name,note\n\"Albury (C)\",\"a, b\"";
        let t = parse_csv(csv, ',').unwrap();

        assert_eq!(t.rows()[0]["lga_name"], "Albury (C)");
        assert_eq!(t.rows()[0]["note"], "a, b");
    }

    #[test]
    fn test_empty_lines_skipped_and_short_rows_padded() {
        let csv = "a,b,c\n1,2,3\n\n4\n";
        let t = parse_csv(csv, ',').unwrap();

        assert_eq!(t.len(), 2);
        assert_eq!(t.rows()[1]["a"], 4);
        assert_eq!(t.rows()[1]["c"], Value::Null);
    }

    #[test]
    fn test_extra_columns_ignored() {
        let t = parse_csv("a;b\n1;2;3;4", ';').unwrap();
        assert_eq!(t.columns(), ["a", "b"]);
        assert_eq!(t.rows()[0]["b"], 2);
    }

    #[test]
    fn test_empty_csv_error() {
        assert!(matches!(parse_csv("", ','), Err(CsvError::EmptyFile)));
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), ',');
        assert_eq!(detect_delimiter("a\tb\tc\n1\t2\t3"), '\t');
        assert_eq!(detect_delimiter("single"), ',');
    }

    #[test]
    fn test_auto_parse_strips_bom() {
        let bytes = b"\xEF\xBB\xBFdate,deaths\n2020-03-01,1\n";
        let result = parse_bytes_auto(bytes).unwrap();

        assert_eq!(result.delimiter, ',');
        assert_eq!(result.table.columns(), ["date", "deaths"]);
        assert_eq!(result.table.rows()[0]["deaths"], json!(1));
    }

    #[test]
    fn test_latin1_decoding() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        let decoded = decode_content(bytes, "iso-8859-1");
        assert_eq!(decoded, "Société");
    }
}
