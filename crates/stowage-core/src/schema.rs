//! JSON schema helpers for custom resource definitions

use schemars::r#gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};

/// Schema for free-form objects (chart values, patches, issuer specs)
///
/// Usage: `#[schemars(schema_with = "stowage_core::schema::preserve_unknown_fields")]`
pub fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut object = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    object.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserve_unknown_fields_schema() {
        let mut generator = SchemaGenerator::default();
        let schema = preserve_unknown_fields(&mut generator);
        let json = serde_json::to_value(&schema).unwrap();

        assert_eq!(json["type"], "object");
        assert_eq!(json["x-kubernetes-preserve-unknown-fields"], true);
    }
}
