//! Hash join of two frames.
//!
//! Builds a hash table over the right frame's keys and probes it with the
//! left frame's rows. Output columns are all left columns followed by the
//! right columns minus its key columns; name collisions get a `.1`
//! suffix. NA keys never match (NA is unordered), but outer variants
//! still emit their rows NA-padded.

use std::collections::HashMap;
use std::sync::Arc;

use xframe_storage::frame::{XFrame, XFrameWriter};
use xframe_storage::readers::RowIter;
use xframe_types::error::{Result, XFrameError};
use xframe_types::value::{Value, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Outer,
}

/// Join `left` and `right` on pairs of `(left column, right column)`
/// names.
pub fn join(
    left: &Arc<XFrame>,
    right: &Arc<XFrame>,
    how: JoinType,
    on: &[(String, String)],
) -> Result<Arc<XFrame>> {
    if on.is_empty() {
        return Err(XFrameError::SchemaMismatch(
            "join needs at least one key pair".to_string(),
        ));
    }
    let left_keys: Vec<usize> = on
        .iter()
        .map(|(l, _)| left.column_index(l))
        .collect::<Result<_>>()?;
    let right_keys: Vec<usize> = on
        .iter()
        .map(|(_, r)| right.column_index(r))
        .collect::<Result<_>>()?;

    // Right columns that survive into the output.
    let right_carry: Vec<usize> = (0..right.num_columns())
        .filter(|i| !right_keys.contains(i))
        .collect();

    let mut names: Vec<String> = left.column_names().to_vec();
    for &i in &right_carry {
        let base = &right.column_names()[i];
        let name = if names.contains(base) {
            format!("{}.1", base)
        } else {
            base.clone()
        };
        names.push(name);
    }
    let mut kinds: Vec<ValueKind> = left.column_types();
    let right_kinds = right.column_types();
    kinds.extend(right_carry.iter().map(|&i| right_kinds[i]));

    // Build the hash table over the right side: key -> row ordinals.
    let mut table: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
    let mut right_rows: Vec<Vec<Value>> = Vec::new();
    for seg in 0..right.num_segments() {
        let mut iter = RowIter::new(right, seg)?;
        let mut row: Vec<Value> = Vec::new();
        while iter.next_row(&mut row)? {
            let key: Vec<Value> = right_keys.iter().map(|&k| row[k].clone()).collect();
            if !key.iter().any(|v| v.is_na()) {
                table.entry(key).or_default().push(right_rows.len());
            }
            right_rows.push(row.clone());
        }
    }

    let mut right_matched = vec![false; right_rows.len()];

    let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
    let mut writer = XFrameWriter::open_anonymous(&name_refs, &kinds, 1)?;
    let mut sink = writer.get_output_iterator(0)?;

    // Probe with the left side.
    let mut out_row: Vec<Value> = Vec::with_capacity(names.len());
    for seg in 0..left.num_segments() {
        let mut iter = RowIter::new(left, seg)?;
        let mut row: Vec<Value> = Vec::new();
        while iter.next_row(&mut row)? {
            let key: Vec<Value> = left_keys.iter().map(|&k| row[k].clone()).collect();
            let matches = if key.iter().any(|v| v.is_na()) {
                None
            } else {
                table.get(&key)
            };

            match matches {
                Some(ordinals) => {
                    for &idx in ordinals {
                        right_matched[idx] = true;
                        out_row.clear();
                        out_row.extend(row.iter().cloned());
                        out_row.extend(
                            right_carry.iter().map(|&c| right_rows[idx][c].clone()),
                        );
                        sink.write_row(&out_row)?;
                    }
                }
                None => {
                    if matches!(how, JoinType::Left | JoinType::Outer) {
                        out_row.clear();
                        out_row.extend(row.iter().cloned());
                        out_row.extend(right_carry.iter().map(|_| Value::Undefined));
                        sink.write_row(&out_row)?;
                    }
                }
            }
        }
    }

    // Unmatched right rows for right/outer joins: left columns NA except
    // the join keys, which take the right key values.
    if matches!(how, JoinType::Right | JoinType::Outer) {
        for (idx, matched) in right_matched.iter().enumerate() {
            if *matched {
                continue;
            }
            let row = &right_rows[idx];
            out_row.clear();
            out_row.extend(std::iter::repeat(Value::Undefined).take(left.num_columns()));
            for (pos, &rk) in right_keys.iter().enumerate() {
                out_row[left_keys[pos]] = row[rk].clone();
            }
            out_row.extend(right_carry.iter().map(|&c| row[c].clone()));
            sink.write_row(&out_row)?;
        }
    }

    let finished = [sink.finish()?];
    writer.close(&finished)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(names: &[&str], dtypes: &[ValueKind], rows: &[Vec<Value>]) -> Arc<XFrame> {
        let mut writer = XFrameWriter::open_anonymous(names, dtypes, 1).unwrap();
        let mut sink = writer.get_output_iterator(0).unwrap();
        for row in rows {
            sink.write_row(row).unwrap();
        }
        let finished = [sink.finish().unwrap()];
        writer.close(&finished).unwrap()
    }

    fn people() -> Arc<XFrame> {
        frame(
            &["id", "name"],
            &[ValueKind::Integer, ValueKind::String],
            &[
                vec![Value::Integer(1), Value::String("ann".into())],
                vec![Value::Integer(2), Value::String("bo".into())],
                vec![Value::Integer(3), Value::String("cy".into())],
            ],
        )
    }

    fn scores() -> Arc<XFrame> {
        frame(
            &["pid", "score"],
            &[ValueKind::Integer, ValueKind::Integer],
            &[
                vec![Value::Integer(1), Value::Integer(10)],
                vec![Value::Integer(1), Value::Integer(11)],
                vec![Value::Integer(3), Value::Integer(30)],
                vec![Value::Integer(9), Value::Integer(90)],
            ],
        )
    }

    fn all_rows(frame: &Arc<XFrame>) -> Vec<Vec<Value>> {
        let cols: Vec<Vec<Value>> = frame
            .columns()
            .iter()
            .map(|c| c.read_all().unwrap())
            .collect();
        (0..frame.num_rows() as usize)
            .map(|i| cols.iter().map(|c| c[i].clone()).collect())
            .collect()
    }

    #[test]
    fn test_inner_join() {
        let on = vec![("id".to_string(), "pid".to_string())];
        let joined = join(&people(), &scores(), JoinType::Inner, &on).unwrap();

        assert_eq!(joined.column_names(), &["id", "name", "score"]);
        let rows = all_rows(&joined);
        assert_eq!(rows.len(), 3); // 1 matches twice, 3 once
        assert!(rows.contains(&vec![
            Value::Integer(1),
            Value::String("ann".into()),
            Value::Integer(10)
        ]));
        assert!(rows.contains(&vec![
            Value::Integer(3),
            Value::String("cy".into()),
            Value::Integer(30)
        ]));
    }

    #[test]
    fn test_left_join_pads_na() {
        let on = vec![("id".to_string(), "pid".to_string())];
        let joined = join(&people(), &scores(), JoinType::Left, &on).unwrap();
        let rows = all_rows(&joined);
        assert_eq!(rows.len(), 4);
        assert!(rows.contains(&vec![
            Value::Integer(2),
            Value::String("bo".into()),
            Value::Undefined
        ]));
    }

    #[test]
    fn test_right_and_outer_join() {
        let on = vec![("id".to_string(), "pid".to_string())];
        let right = join(&people(), &scores(), JoinType::Right, &on).unwrap();
        let rows = all_rows(&right);
        // 3 matched + unmatched right row (pid 9).
        assert_eq!(rows.len(), 4);
        assert!(rows.contains(&vec![
            Value::Integer(9),
            Value::Undefined,
            Value::Integer(90)
        ]));

        let outer = join(&people(), &scores(), JoinType::Outer, &on).unwrap();
        assert_eq!(outer.num_rows(), 5); // + unmatched left row (id 2)
    }

    #[test]
    fn test_na_keys_never_match() {
        let left = frame(
            &["k"],
            &[ValueKind::Integer],
            &[vec![Value::Undefined], vec![Value::Integer(1)]],
        );
        let right = frame(
            &["k", "v"],
            &[ValueKind::Integer, ValueKind::Integer],
            &[
                vec![Value::Undefined, Value::Integer(100)],
                vec![Value::Integer(1), Value::Integer(10)],
            ],
        );
        let on = vec![("k".to_string(), "k".to_string())];
        let joined = join(&left, &right, JoinType::Inner, &on).unwrap();
        assert_eq!(joined.num_rows(), 1);
        assert_eq!(
            all_rows(&joined)[0],
            vec![Value::Integer(1), Value::Integer(10)]
        );
    }

    #[test]
    fn test_duplicate_name_suffixed() {
        let left = frame(
            &["k", "v"],
            &[ValueKind::Integer, ValueKind::Integer],
            &[vec![Value::Integer(1), Value::Integer(2)]],
        );
        let right = frame(
            &["k", "v"],
            &[ValueKind::Integer, ValueKind::Integer],
            &[vec![Value::Integer(1), Value::Integer(3)]],
        );
        let on = vec![("k".to_string(), "k".to_string())];
        let joined = join(&left, &right, JoinType::Inner, &on).unwrap();
        assert_eq!(joined.column_names(), &["k", "v", "v.1"]);
    }

    #[test]
    fn test_missing_key_column_rejected() {
        let on = vec![("nope".to_string(), "pid".to_string())];
        assert!(join(&people(), &scores(), JoinType::Inner, &on).is_err());
    }
}
