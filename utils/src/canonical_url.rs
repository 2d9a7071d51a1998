use getset::Getters;
use multimap::MultiMap;
use url::Url;

/// A case-folded URL with its query parameters pulled out and sorted.
///
/// Two URLs that differ only in parameter order, letter case or a trailing
/// slash canonicalize to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[get = "pub"]
pub struct CanonicalUrl {
    /// `scheme://host[:port]/path`, lower case, no query or fragment.
    base: String,
    /// Sorted by name, then by value.
    params: Vec<(String, String)>,
}

impl CanonicalUrl {
    /// Serializes the parameters as `a=1&b=2` with percent-encoding.
    pub fn query_string(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl std::fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}", self.base)
        } else {
            write!(f, "{}?{}", self.base, self.query_string())
        }
    }
}

/// Parses `raw`, merges `extra` query parameters into the ones already on
/// the URL and produces the canonical form.
pub fn canonicalize(
    raw: &str,
    extra: &[(String, String)],
) -> Result<CanonicalUrl, url::ParseError> {
    let url = Url::parse(raw.trim())?;

    let mut grouped: MultiMap<String, String> = MultiMap::new();
    for (name, value) in url.query_pairs() {
        grouped.insert(name.to_lowercase(), value.to_lowercase());
    }
    for (name, value) in extra {
        grouped.insert(name.to_lowercase(), value.to_lowercase());
    }

    let mut params = Vec::new();
    for (name, mut values) in grouped.into_iter() {
        values.sort();
        params.extend(values.into_iter().map(|value| (name.clone(), value)));
    }
    params.sort();

    let mut base = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        base.push_str(&format!(":{}", port));
    }
    let path = url.path().trim_end_matches('/');
    base.push_str(&path.to_lowercase());

    Ok(CanonicalUrl {
        base: base.to_lowercase(),
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_order_does_not_matter() {
        let a = canonicalize("https://api.example.com/v1/marine?latitude=1&longitude=2", &[])
            .unwrap();
        let b = canonicalize("https://api.example.com/v1/marine?longitude=2&latitude=1", &[])
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "https://api.example.com/v1/marine?latitude=1&longitude=2");
    }

    #[test]
    fn test_case_and_trailing_slash_are_folded() {
        let a = canonicalize("HTTPS://API.Example.com/V1/Marine/", &[]).unwrap();
        let b = canonicalize("https://api.example.com/v1/marine", &[]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_extra_params_merge_with_url_params() {
        let extra = vec![("hourly".to_string(), "wave_height".to_string())];
        let a = canonicalize("https://api.example.com/marine?latitude=1", &extra).unwrap();
        let b =
            canonicalize("https://api.example.com/marine?hourly=wave_height&latitude=1", &[])
                .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_repeated_params_are_sorted() {
        let a = canonicalize("https://x.io/a?h=b&h=a", &[]).unwrap();
        assert_eq!(a.query_string(), "h=a&h=b");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(canonicalize("not a url", &[]).is_err());
    }
}
