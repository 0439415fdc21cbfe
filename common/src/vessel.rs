//! Vessel id derivation from a filename, shared by the Ingest and Transfer
//! workers.

use regex::Regex;
use std::sync::OnceLock;

const UNKNOWN_VESSEL: &str = "unknown";

fn eki_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-(EKI\d+)\.").expect("static pattern is valid"))
}

fn vessel_token_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(VESSEL[0-9A-Za-z]+)_").expect("static pattern is valid"))
}

/// Derive a vessel id from a filename: `*-EKI<digits>.*` wins first, then
/// `*VESSEL<token>_*`, else `unknown`.
pub fn derive_from_filename(filename: &str) -> String {
    if let Some(caps) = eki_pattern().captures(filename) {
        return caps[1].to_owned();
    }
    if let Some(caps) = vessel_token_pattern().captures(filename) {
        return caps[1].to_owned();
    }
    UNKNOWN_VESSEL.to_owned()
}

/// Derive a vessel id from a canonical payload path `<VesselID>/<filename>`,
/// taking the first path segment. Used as the Transfer Worker's fallback
/// when metadata carries no `vesselId`.
pub fn derive_from_path(path: &str) -> String {
    path.split('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_VESSEL)
        .to_owned()
}
