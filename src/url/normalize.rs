use crate::UrlError;
use url::Url;

/// Query parameters that never change which page is served
const NOISE_PARAMS: &[&str] = &["fbclid", "gclid", "igshid", "igsh", "hl", "ref", "source"];

/// Normalizes a target URL into the form used as the queue dedup key
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not http(s)
/// 2. Upgrade http to https
/// 3. Lowercase the host and strip a leading `www.`
/// 4. Remove dot segments, empty segments and the trailing slash (root stays `/`)
/// 5. Drop the fragment
/// 6. Drop tracking/locale parameters and sort the rest by key
///
/// # Arguments
///
/// * `url_str` - The URL string to normalize
///
/// # Returns
///
/// * `Ok(Url)` - Normalized URL
/// * `Err(UrlError)` - Failed to parse or normalize the URL
///
/// # Examples
///
/// ```
/// use tidemark::url::normalize_url;
///
/// let url = normalize_url("http://WWW.SITE.EXAMPLE/nasa/?hl=en#top").unwrap();
/// assert_eq!(url.as_str(), "https://site.example/nasa");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    match url.scheme() {
        "https" => {}
        "http" => url
            .set_scheme("https")
            .map_err(|_| UrlError::Malformed(format!("cannot upgrade scheme of {}", url_str)))?,
        other => return Err(UrlError::InvalidScheme(other.to_string())),
    }

    let host = url.host_str().ok_or(UrlError::MissingHost)?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let path = normalize_path(url.path());
    url.set_path(&path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Collapses dot segments and duplicate slashes; drops the trailing slash
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    format!("/{}", segments.join("/"))
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_noise_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort();
    params
}

fn is_noise_param(key: &str) -> bool {
    key.starts_with("utm_") || NOISE_PARAMS.contains(&key)
}
