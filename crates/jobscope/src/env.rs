use std::env;

pub(crate) const DEVICE_TAG_VAR: &str = "JOBSCOPE_DEVICE_TAG";
pub(crate) const MACHINE_DEVICE_IDS_VAR: &str = "JOBSCOPE_MACHINE_DEVICE_IDS";
pub(crate) const MIRRORED_VAR: &str = "JOBSCOPE_MIRRORED";

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Reads `name` from the process environment; blank values count as unset.
pub(crate) fn process_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}
