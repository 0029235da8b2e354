//! Header-based record filtering.

use sockscope_protocols::http1::HttpMessage;

/// Inclusion/exclusion set over `(header_name, value_substring)` pairs.
///
/// A message passes iff it matches at least one inclusion pair (an empty
/// inclusion set passes everything) and no exclusion pair. Header names
/// match case-insensitively; substrings match verbatim.
#[derive(Clone, Debug, Default)]
pub struct HttpHeaderFilter {
    pub inclusions: Vec<(String, String)>,
    pub exclusions: Vec<(String, String)>,
}

impl HttpHeaderFilter {
    pub fn new(
        inclusions: Vec<(String, String)>,
        exclusions: Vec<(String, String)>,
    ) -> HttpHeaderFilter {
        HttpHeaderFilter {
            inclusions,
            exclusions,
        }
    }

    /// The stock response filter: keep JSON payloads, drop gzip-encoded
    /// bodies we cannot inspect.
    pub fn default_response_filter() -> HttpHeaderFilter {
        HttpHeaderFilter {
            inclusions: vec![("Content-Type".to_string(), "json".to_string())],
            exclusions: vec![("Content-Encoding".to_string(), "gzip".to_string())],
        }
    }

    pub fn matches(&self, message: &HttpMessage) -> bool {
        let pair_matches = |(name, substr): &(String, String)| {
            message
                .header(name)
                .map(|value| value.contains(substr.as_str()))
                .unwrap_or(false)
        };

        if self.exclusions.iter().any(pair_matches) {
            return false;
        }
        self.inclusions.is_empty() || self.inclusions.iter().any(pair_matches)
    }
}
