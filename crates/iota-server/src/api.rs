//! API version constants and comparison.

/// Server build version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current REST API version, negotiated via the `/api/vN/` segment.
pub const API_VERSION: &str = "1";

/// Oldest REST API version still served.
pub const MIN_API_VERSION: &str = "1";

/// Build commit, injected by CI; `unknown` for local builds.
pub const GIT_COMMIT: &str = match option_env!("IOTA_GIT_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};

/// Build timestamp, injected by CI; `unknown` for local builds.
pub const BUILD_TIME: &str = match option_env!("IOTA_BUILD_TIME") {
    Some(time) => time,
    None => "unknown",
};

/// Compare dotted numeric versions, missing segments count as zero.
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let mut left = a.split('.').map(|s| s.parse::<u64>().unwrap_or(0));
    let mut right = b.split('.').map(|s| s.parse::<u64>().unwrap_or(0));
    loop {
        match (left.next(), right.next()) {
            (None, None) => return std::cmp::Ordering::Equal,
            (l, r) => {
                let (l, r) = (l.unwrap_or(0), r.unwrap_or(0));
                if l != r {
                    return l.cmp(&r);
                }
            }
        }
    }
}
