use base64::Engine;
use ipld_core::ipld::Ipld;
use serde_json::Value;

/// Convert a decoded DAG-CBOR value into JSON the way the network's own
/// tooling renders it: links become `{"$link": "<cid>"}` and raw bytes become
/// `{"$bytes": "<base64>"}`. Record fields the indexer consumes are plain
/// strings and maps and pass through untouched.
pub fn ipld_to_json(ipld: &Ipld) -> Value {
    match ipld {
        Ipld::Null => Value::Null,
        Ipld::Bool(b) => Value::Bool(*b),
        Ipld::Integer(i) => serde_json::Number::from(*i as i64).into(),
        Ipld::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Ipld::String(s) => Value::String(s.clone()),
        Ipld::Bytes(bytes) => {
            let b64 = base64::engine::general_purpose::STANDARD_NO_PAD.encode(bytes);
            serde_json::json!({ "$bytes": b64 })
        }
        Ipld::Link(cid) => serde_json::json!({ "$link": cid.to_string() }),
        Ipld::List(list) => Value::Array(list.iter().map(ipld_to_json).collect()),
        Ipld::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), ipld_to_json(v)))
                .collect(),
        ),
    }
}
