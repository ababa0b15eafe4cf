use url::Url;

/// Canonical form used both as the stored `resolved_website` and as the dedup key for the
/// extraction stage: scheme added when missing, host lowercased, fragment and trailing slash
/// dropped. Returns `None` for anything that is not an http(s) URL with a dotted host.
pub fn normalize_website(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else if trimmed.starts_with("//") {
        format!("https:{}", trimmed)
    } else {
        format!("https://{}", trimmed)
    };

    let mut url = Url::parse(&with_scheme).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    // "mailto:x@y.z" parses as credentials once a scheme is glued on
    if !url.username().is_empty() || url.password().is_some() {
        return None;
    }
    let host = url.host_str()?.to_lowercase();
    if !host.contains('.') {
        return None;
    }
    url.set_fragment(None);

    let mut out = url.to_string();
    while out.ends_with('/') {
        out.pop();
    }
    Some(out)
}

/// Resolves root-relative, path-relative and absolute hrefs against `base`.
pub fn absolutize(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let mut joined = base.join(href).ok()?;
    joined.set_fragment(None);
    match joined.scheme() {
        "http" | "https" => Some(joined),
        _ => None,
    }
}

pub fn bare_host(url: &Url) -> Option<String> {
    url.host_str()
        .map(|h| h.trim_start_matches("www.").to_lowercase())
}

/// Same origin for link-following purposes; `www.` is ignored.
pub fn same_site(a: &Url, b: &Url) -> bool {
    match (bare_host(a), bare_host(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
