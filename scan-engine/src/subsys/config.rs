use serde::{Deserialize, Serialize};

use crate::core::DdtClass;

/// Knobs of the scan engine. All of these have conservative defaults; the
/// booleans marked test-only exist to take pieces of the pipeline out of
/// the picture while exercising the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanOpts {
    /// Minimum traversal time per txg before a waiting sync may pause the
    /// scan, in milliseconds.
    pub scan_min_time_ms: u64,
    /// Minimum deferred-free drain time per txg, in milliseconds.
    pub free_min_time_ms: u64,
    /// Minimum resilver traversal time per txg, in milliseconds.
    pub resilver_min_time_ms: u64,
    /// Wall-clock budget of one txg, in milliseconds.
    pub txg_timeout_ms: u64,
    /// Skip the scrub read phase (test only).
    pub no_scrub_io: bool,
    /// Disable traversal prefetch.
    pub no_scrub_prefetch: bool,
    /// Highest-numbered dedup class the pre-pass covers.
    pub scrub_ddt_class_max: DdtClass,
    /// Stall the final state transition (test only).
    pub delay_completion: bool,
    /// Upper bound on concurrently outstanding scrub reads.
    pub scrub_maxinflight: u64,
    /// Record every issued scrub read for diagnostics (test only).
    pub scrub_io_log: bool,
}

impl Default for ScanOpts {
    fn default() -> Self {
        Self {
            scan_min_time_ms: 1000,
            free_min_time_ms: 1000,
            resilver_min_time_ms: 3000,
            txg_timeout_ms: 5000,
            no_scrub_io: false,
            no_scrub_prefetch: false,
            scrub_ddt_class_max: DdtClass::Duplicate,
            delay_completion: false,
            scrub_maxinflight: 32,
            scrub_io_log: false,
        }
    }
}

impl ScanOpts {
    /// Parse options from a yaml document; unknown fields are rejected.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let opts = ScanOpts::default();
        assert_eq!(opts.scan_min_time_ms, 1000);
        assert_eq!(opts.free_min_time_ms, 1000);
        assert_eq!(opts.resilver_min_time_ms, 3000);
        assert_eq!(opts.scrub_ddt_class_max, DdtClass::Duplicate);
        assert!(!opts.no_scrub_io);
    }

    #[test]
    fn yaml_roundtrip() {
        let yaml = "scan_min_time_ms: 5\nno_scrub_io: true\n";
        let opts = ScanOpts::from_yaml(yaml).unwrap();
        assert_eq!(opts.scan_min_time_ms, 5);
        assert!(opts.no_scrub_io);
        // everything else keeps its default
        assert_eq!(opts.resilver_min_time_ms, 3000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(ScanOpts::from_yaml("no_such_knob: 1\n").is_err());
    }
}
