//! Structural overlays over fetched manifests
//!
//! A manifest source is a multi-document YAML stream. Rendering applies, in
//! order:
//! 1. JSON merge patches (RFC 7386) to every document matching the patch target
//! 2. Image substitutions to every `containers`/`initContainers` entry
//!
//! The output is the canonical YAML of each document joined by `---`, so the
//! same input always renders to the same bytes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};

/// Selects the documents a patch applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PatchTarget {
    /// Kind to match (e.g. "Deployment")
    pub kind: String,

    /// Name to match (all names when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Namespace to match (all namespaces when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl PatchTarget {
    /// Check whether a rendered document is selected by this target
    pub fn matches(&self, doc: &JsonValue) -> bool {
        let kind = doc.get("kind").and_then(JsonValue::as_str);
        let metadata = doc.get("metadata");
        let name = metadata
            .and_then(|m| m.get("name"))
            .and_then(JsonValue::as_str);
        let namespace = metadata
            .and_then(|m| m.get("namespace"))
            .and_then(JsonValue::as_str);

        kind == Some(self.kind.as_str())
            && self.name.as_deref().is_none_or(|n| name == Some(n))
            && self.namespace.as_deref().is_none_or(|ns| namespace == Some(ns))
    }
}

/// A JSON merge patch applied to matching documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    /// Documents to patch
    pub target: PatchTarget,

    /// Merge patch body (`null` removes a key)
    #[schemars(schema_with = "crate::schema::preserve_unknown_fields")]
    pub patch: JsonValue,
}

/// Rewrites container images, kustomize style
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSubstitution {
    /// Image name to match, without tag or digest (e.g. "ghcr.io/acme/app")
    pub name: String,

    /// Replacement image name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,

    /// Replacement tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tag: Option<String>,

    /// Replacement digest (wins over `newTag`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ImageSubstitution {
    /// Rewrite an image reference, or None if it does not match
    pub fn apply_to(&self, image: &str) -> Option<String> {
        let (name, tag, digest) = split_image(image);
        if name != self.name {
            return None;
        }

        let new_name = self.new_name.as_deref().unwrap_or(name);
        let rewritten = if let Some(digest) = &self.digest {
            format!("{}@{}", new_name, digest)
        } else if let Some(tag) = &self.new_tag {
            format!("{}:{}", new_name, tag)
        } else {
            let mut out = new_name.to_string();
            if let Some(tag) = tag {
                out.push(':');
                out.push_str(tag);
            }
            if let Some(digest) = digest {
                out.push('@');
                out.push_str(digest);
            }
            out
        };
        Some(rewritten)
    }
}

/// Split "registry:5000/repo/app:tag@sha256:..." into (name, tag, digest)
fn split_image(image: &str) -> (&str, Option<&str>, Option<&str>) {
    let (rest, digest) = match image.split_once('@') {
        Some((rest, digest)) => (rest, Some(digest)),
        None => (image, None),
    };
    let last_segment = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
    match rest[last_segment..].rfind(':') {
        Some(i) => {
            let split = last_segment + i;
            (&rest[..split], Some(&rest[split + 1..]), digest)
        }
        None => (rest, None, digest),
    }
}

/// Parse a multi-document YAML stream into JSON documents
///
/// Empty documents are skipped and `kind: List` documents are flattened into
/// their items.
pub fn parse_documents(source: &str) -> Result<Vec<JsonValue>> {
    let mut documents = Vec::new();

    for (index, doc) in serde_yaml::Deserializer::from_str(source).enumerate() {
        let value = JsonValue::deserialize(doc)?;
        match value {
            JsonValue::Null => continue,
            JsonValue::Object(_) => {}
            _ => {
                return Err(CoreError::InvalidDocument {
                    index,
                    message: "document is not a mapping".to_string(),
                });
            }
        }

        if value.get("kind").and_then(JsonValue::as_str).is_none() {
            return Err(CoreError::InvalidDocument {
                index,
                message: "document has no kind".to_string(),
            });
        }

        if value.get("kind").and_then(JsonValue::as_str) == Some("List") {
            if let Some(JsonValue::Array(items)) = value.get("items") {
                documents.extend(items.iter().filter(|i| i.is_object()).cloned());
            }
            continue;
        }

        documents.push(value);
    }

    Ok(documents)
}

/// Render a manifest source with patches and image substitutions
pub fn render(
    source: &str,
    patches: &[Patch],
    images: &[ImageSubstitution],
) -> Result<Vec<u8>> {
    for patch in patches {
        if !patch.patch.is_object() {
            return Err(CoreError::InvalidPatch {
                message: format!("patch for kind '{}' must be an object", patch.target.kind),
            });
        }
    }

    let mut documents = parse_documents(source)?;

    for doc in &mut documents {
        let matched: Vec<&Patch> = patches.iter().filter(|p| p.target.matches(doc)).collect();
        for patch in matched {
            merge_patch(doc, &patch.patch);
        }
        if !images.is_empty() {
            substitute_images(doc, images);
        }
    }

    let mut out = String::new();
    for (i, doc) in documents.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        out.push_str(&serde_yaml::to_string(doc)?);
    }
    Ok(out.into_bytes())
}

/// RFC 7386 merge patch
pub fn merge_patch(target: &mut JsonValue, patch: &JsonValue) {
    match (target, patch) {
        (JsonValue::Object(target_map), JsonValue::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                if patch_value.is_null() {
                    target_map.remove(key);
                    continue;
                }
                match target_map.get_mut(key) {
                    Some(target_value) => merge_patch(target_value, patch_value),
                    None => {
                        let mut fresh = JsonValue::Null;
                        merge_patch(&mut fresh, patch_value);
                        target_map.insert(key.clone(), fresh);
                    }
                }
            }
        }
        (target, JsonValue::Object(patch_map)) => {
            // Non-object target is replaced by the patch with nulls stripped
            let mut fresh = JsonValue::Object(serde_json::Map::new());
            merge_patch(&mut fresh, &JsonValue::Object(patch_map.clone()));
            *target = fresh;
        }
        (target, patch) => {
            *target = patch.clone();
        }
    }
}

/// Walk a document and rewrite every container image that matches
fn substitute_images(value: &mut JsonValue, images: &[ImageSubstitution]) {
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "containers" || key == "initContainers" {
                    if let JsonValue::Array(containers) = child {
                        for container in containers.iter_mut() {
                            rewrite_container_image(container, images);
                        }
                    }
                }
                substitute_images(child, images);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                substitute_images(item, images);
            }
        }
        _ => {}
    }
}

fn rewrite_container_image(container: &mut JsonValue, images: &[ImageSubstitution]) {
    let Some(image) = container.get("image").and_then(JsonValue::as_str) else {
        return;
    };
    if let Some(rewritten) = images.iter().find_map(|sub| sub.apply_to(image)) {
        container["image"] = JsonValue::String(rewritten);
    }
}
