/// Mixed JSON + binary-archive codec (`application/x-jsonnpy`).
///
/// Envelope: `<len>\n<json><len>\n<archive>`. The JSON layout is the serde
/// serialization of the message with every array replaced by
/// `{"__array__": true, "id": n}`; the archive is the bincode encoding of
/// the array side-table in id order. Structure stays introspectable while
/// bulk numeric data skips JSON entirely.

use crate::error::{EngineError, Result};
use crate::kernel::array::{stash, RawArray};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn dumps<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    stash::begin_encode();
    let layout = serde_json::to_vec(value);
    let arrays = stash::end_encode();
    let layout = layout?;
    let archive = bincode::serde::encode_to_vec(&arrays, bincode::config::standard())?;

    let mut out = Vec::with_capacity(layout.len() + archive.len() + 24);
    out.extend_from_slice(format!("{}\n", layout.len()).as_bytes());
    out.extend_from_slice(&layout);
    out.extend_from_slice(format!("{}\n", archive.len()).as_bytes());
    out.extend_from_slice(&archive);
    Ok(out)
}

pub fn loads<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (layout, rest) = take_sized(bytes)?;
    let (archive, rest) = take_sized(rest)?;
    if !rest.is_empty() {
        return Err(EngineError::Serialization(
            "trailing bytes after envelope".to_string(),
        ));
    }
    let (arrays, _): (Vec<RawArray>, usize) =
        bincode::serde::decode_from_slice(archive, bincode::config::standard())?;

    stash::begin_decode(arrays);
    let value = serde_json::from_slice(layout);
    stash::end_decode();
    Ok(value?)
}

fn take_sized(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    let newline = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| EngineError::Serialization("truncated envelope header".to_string()))?;
    let len: usize = std::str::from_utf8(&bytes[..newline])
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| EngineError::Serialization("bad envelope header".to_string()))?;
    let start = newline + 1;
    if bytes.len() < start + len {
        return Err(EngineError::Serialization("truncated envelope".to_string()));
    }
    Ok((&bytes[start..start + len], &bytes[start + len..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Progress;
    use crate::kernel::{GroupKey, GroupMap, Matrix, NdArray, Scalar, Value, Vector};
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Message {
        name: String,
        data: Vector,
        coord: Matrix,
    }

    #[test]
    fn arrays_travel_in_the_archive() {
        let msg = Message {
            name: "m".to_string(),
            data: Vector::Float(vec![1.0, f64::NAN, 3.0]),
            coord: Matrix::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
        };
        let bytes = dumps(&msg).unwrap();
        // The JSON layout holds references, not data.
        let json_part = {
            let newline = bytes.iter().position(|&b| b == b'\n').unwrap();
            let len: usize = std::str::from_utf8(&bytes[..newline]).unwrap().parse().unwrap();
            String::from_utf8(bytes[newline + 1..newline + 1 + len].to_vec()).unwrap()
        };
        assert!(json_part.contains("__array__"));
        assert!(!json_part.contains("3.0"));

        let back: Message = loads(&bytes).unwrap();
        assert_eq!(back.name, msg.name);
        assert_eq!(back.coord, msg.coord);
        match back.data {
            Vector::Float(v) => {
                assert_eq!(v.len(), 3);
                assert!(v[1].is_nan());
            }
            other => panic!("unexpected vector: {:?}", other),
        }
    }

    #[test]
    fn shared_values_round_trip() {
        let mut shared: HashMap<String, Value> = HashMap::new();
        shared.insert("r".to_string(), Value::float(0.5));
        shared.insert(
            "coords".to_string(),
            Value::Array(NdArray::Matrix(
                Matrix::new(2, 1, vec![0.1, 0.2]).unwrap(),
            )),
        );
        shared.insert(
            "list".to_string(),
            Value::Row(vec![Value::int(1), Value::Scalar(Scalar::Str("x".into()))]),
        );
        let bytes = dumps(&shared).unwrap();
        let back: HashMap<String, Value> = loads(&bytes).unwrap();
        assert_eq!(back, shared);
    }

    #[test]
    fn group_maps_round_trip() {
        let mut groups = GroupMap::new();
        groups.insert(GroupKey::none(), Value::int(8));
        groups.insert(
            GroupKey::tuple(vec![Scalar::Int(1)]),
            Value::Row(vec![
                Value::vector(Vector::Int(vec![1, 2])),
                Value::float(f64::NAN),
            ]),
        );
        let bytes = dumps(&groups).unwrap();
        let back: GroupMap = loads(&bytes).unwrap();
        assert_eq!(back, groups);
    }

    #[test]
    fn progress_without_data_is_compact() {
        let p = Progress {
            done: 3,
            total: 10,
            data: None,
        };
        let bytes = dumps(&p).unwrap();
        let back: Progress = loads(&bytes).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn truncated_input_fails_cleanly() {
        let bytes = dumps(&Progress {
            done: 1,
            total: 2,
            data: None,
        })
        .unwrap();
        assert!(loads::<Progress>(&bytes[..bytes.len() - 1]).is_err());
        assert!(loads::<Progress>(b"garbage").is_err());
    }
}
