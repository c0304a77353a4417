//! Shared User-Agent string for probe and segment requests.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/rangeget";

/// Default User-Agent for download requests (identifies the tool).
#[must_use]
pub(crate) fn default_download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("rangeget/{version} (segmented-downloader; +{PROJECT_UA_URL})")
}
