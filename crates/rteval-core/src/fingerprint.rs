use crate::extract::Fields;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub hex: String,
    pub components: Vec<String>,
}

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Computes the deduplication fingerprint of a system.
///
/// Components are `name=value` in the order the template lists them, so two
/// reports from the same machine hash identically as long as the identity
/// fields agree. Absent fields contribute an empty value.
pub fn system_identity(fields: &Fields, identity: &[String]) -> Fingerprint {
    let components: Vec<String> = identity
        .iter()
        .map(|name| {
            let value = fields.get(name).map(|v| v.canonical()).unwrap_or_default();
            format!("{}={}", name, value)
        })
        .collect();

    let raw = components.join("\n");
    Fingerprint {
        hex: sha256_hex(&raw),
        components,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ReportDocument;
    use crate::extract::{extract, EntityKind, ExtractionTemplate};
    use serde_json::json;

    fn system(host: &str, serial: Option<&str>) -> Fields {
        let mut dmi = json!({ "manufacturer": "Dell", "product": "R740" });
        if let Some(s) = serial {
            dmi["serial"] = json!(s);
        }
        let doc = ReportDocument::new(json!({
            "SystemInfo": {
                "uname": { "node": host, "machine": "x86_64", "kernel": "6.6" },
                "cpu": { "cores": 8 },
                "dmi": dmi
            }
        }))
        .unwrap();
        let t = ExtractionTemplate::builtin().unwrap();
        extract(&doc, &t, EntityKind::System)
            .unwrap()
            .single()
            .unwrap()
            .clone()
    }

    fn identity() -> Vec<String> {
        ExtractionTemplate::builtin().unwrap().system.identity
    }

    #[test]
    fn test_same_machine_same_fingerprint() {
        let a = system_identity(&system("rt1", Some("ABC")), &identity());
        let b = system_identity(&system("rt1", Some("ABC")), &identity());
        assert_eq!(a, b);
        assert_eq!(a.hex.len(), 64);
    }

    #[test]
    fn test_identity_fields_change_fingerprint() {
        let a = system_identity(&system("rt1", Some("ABC")), &identity());
        let b = system_identity(&system("rt1", Some("XYZ")), &identity());
        let c = system_identity(&system("rt2", Some("ABC")), &identity());
        assert_ne!(a.hex, b.hex);
        assert_ne!(a.hex, c.hex);
    }

    #[test]
    fn test_absent_field_is_empty_component() {
        let fp = system_identity(&system("rt1", None), &identity());
        assert!(fp.components.contains(&"system_serial=".to_string()));
    }
}
