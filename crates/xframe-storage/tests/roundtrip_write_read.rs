//! Round-trip integration test: build a frame → save → load → compare.

use std::sync::Arc;

use xframe_storage::frame::{XFrame, XFrameWriter};
use xframe_types::value::{DateTimeValue, Value, ValueKind};

fn value_for(col: usize, row: i64) -> Value {
    match col {
        0 => Value::Integer(row),
        1 => {
            if row % 13 == 0 {
                Value::Undefined
            } else {
                Value::Float(row as f64 * 0.25)
            }
        }
        2 => Value::String(format!("row-{}", row).into()),
        3 => Value::Vector((0..(row % 4)).map(|i| i as f64).collect::<Vec<_>>().into()),
        _ => Value::List(Arc::from(vec![Value::Integer(row), Value::Undefined])),
    }
}

fn build_frame(nrows: i64, num_segments: usize) -> Arc<XFrame> {
    let names = ["id", "score", "label", "vec", "tags"];
    let dtypes = [
        ValueKind::Integer,
        ValueKind::Float,
        ValueKind::String,
        ValueKind::Vector,
        ValueKind::List,
    ];
    let mut writer = XFrameWriter::open_anonymous(&names, &dtypes, num_segments).unwrap();
    let per_seg = (nrows as usize).div_ceil(num_segments).max(1);
    let mut finished = Vec::new();
    for seg in 0..num_segments {
        let lo = (seg * per_seg).min(nrows as usize) as i64;
        let hi = (((seg + 1) * per_seg).min(nrows as usize)) as i64;
        let mut sink = writer.get_output_iterator(seg).unwrap();
        for row in lo..hi {
            let values: Vec<Value> = (0..names.len()).map(|c| value_for(c, row)).collect();
            sink.write_row(&values).unwrap();
        }
        finished.push(sink.finish().unwrap());
    }
    writer.close(&finished).unwrap()
}

#[test]
fn test_roundtrip_multi_segment() {
    let frame = build_frame(5000, 4);

    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("roundtrip.xf");
    frame.save(path.to_str().unwrap()).unwrap();

    let loaded = XFrame::load(path.to_str().unwrap()).unwrap();
    assert_eq!(loaded.num_rows(), 5000);
    assert_eq!(loaded.num_columns(), 5);
    assert_eq!(loaded.column_names(), frame.column_names());
    assert_eq!(loaded.column_types(), frame.column_types());

    // Cell-wise equality, column by column.
    for (orig, back) in frame.columns().iter().zip(loaded.columns()) {
        assert_eq!(orig.read_all().unwrap(), back.read_all().unwrap());
    }

    // Segmentation shared by every loaded column.
    for col in loaded.columns() {
        assert_eq!(col.segment_sizes(), loaded.segment_sizes());
    }
}

#[test]
fn test_roundtrip_empty_frame() {
    let frame = build_frame(0, 1);
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("empty.xf");
    frame.save(path.to_str().unwrap()).unwrap();

    let loaded = XFrame::load(path.to_str().unwrap()).unwrap();
    assert_eq!(loaded.num_rows(), 0);
    assert_eq!(loaded.num_columns(), 5);
    assert_eq!(loaded.column_names()[0], "id");
}

#[test]
fn test_roundtrip_datetime_column() {
    let mut writer =
        XFrameWriter::open_anonymous(&["ts"], &[ValueKind::DateTime], 1).unwrap();
    let mut sink = writer.get_output_iterator(0).unwrap();
    let rows: Vec<Value> = (0..100)
        .map(|i| {
            Value::DateTime(DateTimeValue {
                posix_timestamp: 1_500_000_000 + i * 3600,
                tz_offset_quarter_hours: (i % 32) as i8 - 16,
                microsecond: (i * 1000) as u32,
            })
        })
        .collect();
    for v in &rows {
        sink.write_row(std::slice::from_ref(v)).unwrap();
    }
    let finished = vec![sink.finish().unwrap()];
    let frame = writer.close(&finished).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("dt.xf");
    frame.save(path.to_str().unwrap()).unwrap();
    let loaded = XFrame::load(path.to_str().unwrap()).unwrap();
    assert_eq!(loaded.columns()[0].read_all().unwrap(), rows);
}

#[test]
fn test_column_immutability_across_readers() {
    let frame = build_frame(500, 2);
    let col = frame.columns()[0].clone();

    let first = col.read_all().unwrap();
    // Constructing more readers and re-reading never changes content.
    for _ in 0..3 {
        let mut reader = col.reader(None).unwrap();
        let mut out = Vec::new();
        reader.read_rows(0, col.len(), &mut out).unwrap();
        assert_eq!(out, first);
    }
}
