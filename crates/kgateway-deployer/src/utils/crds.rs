use schemars::{Schema, SchemaGenerator, json_schema};

/// Schema of an arbitrary JSON object, which is kept as-is by the API server.
pub fn raw_object_schema(_: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true,
    })
}
