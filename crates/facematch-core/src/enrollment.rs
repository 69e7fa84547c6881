//! Enrollment record construction.

use crate::types::{Descriptor, IdentityRecord, ProfileMetadata};
use chrono::{SecondsFormat, Utc};

/// Profile URL template; `{handle}` is replaced verbatim.
pub const PROFILE_URL_TEMPLATE: &str = "https://www.instagram.com/{handle}/";

pub fn profile_link(handle: &str) -> String {
    PROFILE_URL_TEMPLATE.replace("{handle}", handle)
}

/// Reject a required field that is empty or only whitespace.
pub(crate) fn require(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(())
}

/// Assemble the record written for a new enrollment.
pub fn new_record(name: &str, handle: &str, descriptor: Descriptor) -> IdentityRecord {
    IdentityRecord {
        name: name.to_string(),
        descriptor,
        metadata: ProfileMetadata {
            handle: handle.to_string(),
            profile_link: profile_link(handle),
            enrolled_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_link_template() {
        assert_eq!(profile_link("alice_h"), "https://www.instagram.com/alice_h/");
    }

    #[test]
    fn test_require_rejects_blank() {
        assert!(require("name", "").is_err());
        assert!(require("name", "   ").is_err());
        assert!(require("name", "Alice").is_ok());
    }

    #[test]
    fn test_new_record_metadata() {
        let descriptor = Descriptor { values: vec![0.5; 4], model_version: None };
        let record = new_record("Alice", "alice_h", descriptor.clone());
        assert_eq!(record.name, "Alice");
        assert_eq!(record.descriptor, descriptor);
        assert_eq!(record.metadata.handle, "alice_h");
        assert_eq!(record.metadata.profile_link, "https://www.instagram.com/alice_h/");
        assert!(chrono::DateTime::parse_from_rfc3339(&record.metadata.enrolled_at).is_ok());
    }
}
