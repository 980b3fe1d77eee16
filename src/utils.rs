use url::Url;
use uuid::Uuid;

/// Destination base name for `url`: the last non-empty path segment,
/// sanitized. URLs without one map to a name derived from the URL itself, so
/// a rerun finds the same progress record.
pub fn file_name_for(url: &str) -> String {
    let segment = Url::parse(url).ok().and_then(|u| {
        u.path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()).map(str::to_string))
    });

    match segment.map(|s| sanitize_filename(&s)) {
        Some(name) if !name.trim_matches('.').is_empty() => name,
        _ => format!("download-{}", Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes())),
    }
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}
