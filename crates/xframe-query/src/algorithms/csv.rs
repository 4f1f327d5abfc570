//! CSV row producer and row sink.
//!
//! CSV internals are an external concern; the engine only needs a row
//! producer feeding parsed values into a sink, and a row sink writing
//! frames back out. Both are backed by the `csv` crate, configured
//! through [`CsvConfig`].

use std::sync::Arc;

use xframe_storage::frame::{XFrame, XFrameWriter};
use xframe_storage::readers::RowIter;
use xframe_types::error::{Result, XFrameError};
use xframe_types::value::{Value, ValueKind};

/// Tokenizer/writer configuration.
///
/// `use_escape_char` controls escaping on its own; it is deliberately not
/// coupled to `skip_initial_space`.
#[derive(Debug, Clone)]
pub struct CsvConfig {
    pub delimiter: u8,
    pub quote_char: u8,
    pub escape_char: u8,
    pub use_escape_char: bool,
    pub double_quote: bool,
    /// Cell strings treated as NA (the empty string always is).
    pub na_values: Vec<String>,
    pub comment_char: Option<u8>,
    pub skip_initial_space: bool,
    pub has_header: bool,
    /// Record terminator when writing; reading accepts `\r`, `\n`, `\r\n`.
    pub line_terminator: String,
}

impl Default for CsvConfig {
    fn default() -> Self {
        CsvConfig {
            delimiter: b',',
            quote_char: b'"',
            escape_char: b'\\',
            use_escape_char: false,
            double_quote: true,
            na_values: Vec::new(),
            comment_char: None,
            skip_initial_space: true,
            has_header: true,
            line_terminator: "\n".to_string(),
        }
    }
}

/// Parse one cell with the NA / integer / float / string ladder.
fn parse_cell(cell: &str, config: &CsvConfig) -> Value {
    let trimmed = if config.skip_initial_space {
        cell.trim_start()
    } else {
        cell
    };
    if trimmed.is_empty() || config.na_values.iter().any(|na| na == trimmed) {
        return Value::Undefined;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Value::Float(f);
    }
    Value::String(Arc::from(trimmed))
}

fn reader_builder(config: &CsvConfig) -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .delimiter(config.delimiter)
        .quote(config.quote_char)
        .double_quote(config.double_quote)
        .escape(config.use_escape_char.then_some(config.escape_char))
        .comment(config.comment_char)
        .has_headers(config.has_header)
        .flexible(true);
    builder
}

/// Tokenize a CSV file and feed each parsed row to `sink`. Returns the
/// column names (from the header, or generated `X{k}` names).
pub fn read_csv<F>(path: &str, config: &CsvConfig, mut sink: F) -> Result<Vec<String>>
where
    F: FnMut(&[Value]) -> Result<()>,
{
    let mut reader = reader_builder(config)
        .from_path(path)
        .map_err(|e| XFrameError::Parse(format!("cannot open {}: {}", path, e)))?;

    let mut names: Vec<String> = Vec::new();
    if config.has_header {
        let headers = reader
            .headers()
            .map_err(|e| XFrameError::Parse(format!("bad CSV header: {}", e)))?;
        for h in headers {
            names.push(h.trim().to_string());
        }
    }

    let mut row: Vec<Value> = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| XFrameError::Parse(format!("CSV record {}: {}", line, e)))?;
        if names.is_empty() {
            for k in 0..record.len() {
                names.push(xframe_storage::frame::generate_column_name(&names, k));
            }
        }
        if record.len() != names.len() {
            return Err(XFrameError::Parse(format!(
                "CSV record {} has {} fields, expected {}",
                line,
                record.len(),
                names.len()
            )));
        }
        row.clear();
        row.extend(record.iter().map(|cell| parse_cell(cell, config)));
        sink(&row)?;
    }
    Ok(names)
}

/// Read a CSV file into a frame, unifying each column to the widest
/// observed numeric kind (integer < float < string).
pub fn read_csv_frame(path: &str, config: &CsvConfig) -> Result<Arc<XFrame>> {
    let mut rows: Vec<Vec<Value>> = Vec::new();
    let names = read_csv(path, config, |row| {
        rows.push(row.to_vec());
        Ok(())
    })?;

    let num_columns = names.len();
    let mut kinds = vec![ValueKind::Integer; num_columns];
    for row in &rows {
        for (kind, value) in kinds.iter_mut().zip(row.iter()) {
            *kind = widen(*kind, value);
        }
    }

    let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
    let mut writer = XFrameWriter::open_anonymous(&name_refs, &kinds, 1)?;
    let mut sink = writer.get_output_iterator(0)?;
    let mut out_row: Vec<Value> = Vec::with_capacity(num_columns);
    for row in &rows {
        out_row.clear();
        out_row.extend(
            row.iter()
                .zip(kinds.iter())
                .map(|(v, &k)| coerce(v.clone(), k)),
        );
        sink.write_row(&out_row)?;
    }
    let finished = [sink.finish()?];
    writer.close(&finished)
}

fn widen(kind: ValueKind, value: &Value) -> ValueKind {
    match (kind, value) {
        (k, Value::Undefined) => k,
        (ValueKind::Integer, Value::Integer(_)) => ValueKind::Integer,
        (ValueKind::Integer, Value::Float(_)) | (ValueKind::Float, Value::Integer(_)) => {
            ValueKind::Float
        }
        (ValueKind::Float, Value::Float(_)) => ValueKind::Float,
        _ => ValueKind::String,
    }
}

fn coerce(value: Value, kind: ValueKind) -> Value {
    match (kind, value) {
        (_, Value::Undefined) => Value::Undefined,
        (ValueKind::Float, Value::Integer(i)) => Value::Float(i as f64),
        (ValueKind::String, Value::Integer(i)) => Value::String(Arc::from(i.to_string())),
        (ValueKind::String, Value::Float(f)) => Value::String(Arc::from(f.to_string())),
        (_, v) => v,
    }
}

/// Write a frame to a CSV file through a `csv` writer configured from
/// `config`.
pub fn write_csv(frame: &Arc<XFrame>, path: &str, config: &CsvConfig) -> Result<()> {
    let terminator = match config.line_terminator.as_str() {
        "\r\n" => csv::Terminator::CRLF,
        other => csv::Terminator::Any(other.as_bytes().first().copied().unwrap_or(b'\n')),
    };
    let mut writer = csv::WriterBuilder::new()
        .delimiter(config.delimiter)
        .quote(config.quote_char)
        .double_quote(config.double_quote)
        .escape(config.escape_char)
        .terminator(terminator)
        .from_path(path)
        .map_err(|e| XFrameError::Parse(format!("cannot create {}: {}", path, e)))?;

    if config.has_header {
        writer
            .write_record(frame.column_names())
            .map_err(|e| XFrameError::Parse(format!("CSV header write: {}", e)))?;
    }

    let mut cells: Vec<String> = Vec::with_capacity(frame.num_columns());
    for seg in 0..frame.num_segments() {
        let mut rows = RowIter::new(frame, seg)?;
        let mut row: Vec<Value> = Vec::new();
        while rows.next_row(&mut row)? {
            cells.clear();
            cells.extend(row.iter().map(|v| match v {
                Value::Undefined => String::new(),
                other => other.to_string(),
            }));
            writer
                .write_record(&cells)
                .map_err(|e| XFrameError::Parse(format!("CSV row write: {}", e)))?;
        }
    }
    writer
        .flush()
        .map_err(|e| XFrameError::Parse(format!("CSV flush: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(content: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        let path = path.to_string_lossy().into_owned();
        (dir, path)
    }

    #[test]
    fn test_read_with_header_and_types() {
        let (_dir, path) = write_file("id,score,name\n1,1.5,ann\n2,,bo\n3,2.5,\n");
        let frame = read_csv_frame(&path, &CsvConfig::default()).unwrap();

        assert_eq!(frame.column_names(), &["id", "score", "name"]);
        assert_eq!(
            frame.column_types(),
            vec![ValueKind::Integer, ValueKind::Float, ValueKind::String]
        );
        assert_eq!(frame.num_rows(), 3);

        let scores = frame.columns()[1].read_all().unwrap();
        assert_eq!(scores[0], Value::Float(1.5));
        assert_eq!(scores[1], Value::Undefined);
    }

    #[test]
    fn test_na_values_and_comments() {
        let (_dir, path) = write_file("v\n# a comment line\nNA\n7\n");
        let config = CsvConfig {
            na_values: vec!["NA".to_string()],
            comment_char: Some(b'#'),
            ..CsvConfig::default()
        };
        let frame = read_csv_frame(&path, &config).unwrap();
        let values = frame.columns()[0].read_all().unwrap();
        assert_eq!(values, vec![Value::Undefined, Value::Integer(7)]);
    }

    #[test]
    fn test_headerless_generates_names() {
        let (_dir, path) = write_file("1,2\n3,4\n");
        let config = CsvConfig {
            has_header: false,
            ..CsvConfig::default()
        };
        let frame = read_csv_frame(&path, &config).unwrap();
        assert_eq!(frame.column_names(), &["X1", "X2"]);
        assert_eq!(frame.num_rows(), 2);
    }

    #[test]
    fn test_mixed_numeric_column_widens_to_float() {
        let (_dir, path) = write_file("v\n1\n2.5\n3\n");
        let frame = read_csv_frame(&path, &CsvConfig::default()).unwrap();
        assert_eq!(frame.column_types(), vec![ValueKind::Float]);
        assert_eq!(
            frame.columns()[0].read_all().unwrap(),
            vec![Value::Float(1.0), Value::Float(2.5), Value::Float(3.0)]
        );
    }

    #[test]
    fn test_roundtrip_through_writer() {
        let (_dir, path) = write_file("a,b\n1,x\n2,y\n");
        let config = CsvConfig::default();
        let frame = read_csv_frame(&path, &config).unwrap();

        let out_dir = tempfile::tempdir().unwrap();
        let out_path = out_dir.path().join("out.csv").to_string_lossy().into_owned();
        write_csv(&frame, &out_path, &config).unwrap();

        let back = read_csv_frame(&out_path, &config).unwrap();
        assert_eq!(back.column_names(), frame.column_names());
        for (a, b) in back.columns().iter().zip(frame.columns()) {
            assert_eq!(a.read_all().unwrap(), b.read_all().unwrap());
        }
    }

    #[test]
    fn test_ragged_record_rejected() {
        let (_dir, path) = write_file("a,b\n1,2\n3\n");
        assert!(read_csv_frame(&path, &CsvConfig::default()).is_err());
    }

    #[test]
    fn test_custom_delimiter() {
        let (_dir, path) = write_file("a|b\n1|2\n");
        let config = CsvConfig {
            delimiter: b'|',
            ..CsvConfig::default()
        };
        let frame = read_csv_frame(&path, &config).unwrap();
        assert_eq!(frame.num_columns(), 2);
        assert_eq!(
            frame.columns()[1].read_all().unwrap(),
            vec![Value::Integer(2)]
        );
    }
}
