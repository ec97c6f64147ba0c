use crate::value::Value;

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(n) => {
            out.push(b'i');
            out.extend_from_slice(n.to_string().as_bytes());
            out.push(b'e');
        }
        Value::ByteString(b) => {
            out.extend_from_slice(b.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(b);
        }
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(map) => {
            out.push(b'd');
            // BTreeMap iterates in key-sorted order, matching bencode's
            // required dict key ordering.
            for (k, v) in map {
                encode_into(&Value::ByteString(k.clone()), out);
                encode_into(v, out);
            }
            out.push(b'e');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode;
    use std::collections::BTreeMap;

    #[test]
    fn round_trips_through_decode() {
        let mut d = BTreeMap::new();
        d.insert(b"a".to_vec(), Value::Int(1));
        d.insert(b"b".to_vec(), Value::ByteString(b"hi".to_vec()));
        let v = Value::Dict(d);
        let bytes = encode(&v);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn dict_keys_are_sorted() {
        let mut d = BTreeMap::new();
        d.insert(b"z".to_vec(), Value::Int(1));
        d.insert(b"a".to_vec(), Value::Int(2));
        let bytes = encode(&Value::Dict(d));
        assert_eq!(bytes, b"d1:ai2e1:zi1ee");
    }
}
