//! Service identity used as the `service` metric label.

use std::path::Path;

/// Label value used whenever an identity cannot be determined.
pub const UNKNOWN: &str = "unknown";

/// Resolve the service label.
///
/// An explicit, non-blank name wins; otherwise the running executable's file
/// stem is used; otherwise [`UNKNOWN`].
pub fn resolve_service_name(explicit: Option<&str>) -> String {
    if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }

    std::env::current_exe()
        .ok()
        .as_deref()
        .and_then(executable_stem)
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn executable_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::trim)
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_name_wins() {
        assert_eq!(resolve_service_name(Some(" billing ")), "billing");
    }

    #[test]
    fn blank_name_falls_back_to_process() {
        let resolved = resolve_service_name(Some("   "));
        assert!(!resolved.is_empty());
        assert_eq!(resolved, resolve_service_name(None));
    }

    #[test]
    fn stem_drops_directory_and_extension() {
        assert_eq!(
            executable_stem(Path::new("/opt/app/bin/report-worker.exe")).as_deref(),
            Some("report-worker")
        );
        assert_eq!(executable_stem(Path::new("/")), None);
    }
}
