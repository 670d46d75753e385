pub mod artifacts;
pub mod rows;
pub mod schema;
pub mod store;

pub use artifacts::{ArtifactStore, JobArtifact, RunMeta};
pub use rows::{
    CapabilitySnapshot, JobOutcome, JobRow, JobStatus, MetricRow, NewJob, NewMetric, RunRow,
    RunStatus,
};
pub use store::Store;

use sha2::{Digest, Sha256};

/// Current UTC time as RFC 3339 with millisecond precision.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// SHA-256 of the prompt text, lowercase hex.
pub fn hash_prompt(prompt: &str) -> String {
    hex::encode(Sha256::digest(prompt.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_hash_is_stable_hex() {
        let h = hash_prompt("hello");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn timestamps_are_utc() {
        assert!(now_rfc3339().ends_with('Z'));
    }
}
