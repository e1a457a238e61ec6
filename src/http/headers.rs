//! Header fields: case-insensitive, order-preserving, multi-valued.
//!
//! Besides plain lookup, the map knows the two things a proxy tier needs: which
//! fields are scoped to a single connection (and so never cross the edge), and how
//! to read list-valued fields such as `X-Forwarded-Proto`.

/// Fields that describe one connection hop (RFC 9110 §7.6.1).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Returns `true` for fields that must not be forwarded to the next hop.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Header fields of a request or response.
///
/// # Examples
///
/// ```
/// use dynhtml::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("X-Forwarded-Proto", "https, http");
/// headers.insert("Cache-Control", "public");
/// headers.insert("cache-control", "max-age=60");
///
/// assert_eq!(headers.first_token("x-forwarded-proto"), Some("https"));
/// assert_eq!(headers.joined("Cache-Control"), "public, max-age=60");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Appends a field; earlier fields with the same name are kept.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Replaces every field named `name` with a single one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.fields.push((name, value.into()));
    }

    /// Drops every field named `name`; returns whether any existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.fields.len() != before
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of `name` combined into one list value, as RFC 9110 §5.3 permits
    /// for list-valued fields. Empty when the field is absent.
    pub fn joined(&self, name: &str) -> String {
        self.get_all(name).collect::<Vec<_>>().join(", ")
    }

    /// The first element of a list-valued field, trimmed. For `X-Forwarded-Proto`
    /// and `X-Forwarded-For` this is the value the client-facing proxy wrote.
    pub fn first_token(&self, name: &str) -> Option<&str> {
        self.get(name)?
            .split(',')
            .map(str::trim)
            .find(|t| !t.is_empty())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of fields, counting repeats.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Fields that may cross to the next hop: everything except the connection
    /// scoped ones and any field the `Connection` header itself nominates.
    pub fn end_to_end(&self) -> impl Iterator<Item = (&str, &str)> {
        let nominated: Vec<String> = self
            .get_all("connection")
            .flat_map(|v| v.split(','))
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self.iter().filter(move |(name, _)| {
            !is_hop_by_hop(name) && !nominated.iter().any(|n| n.eq_ignore_ascii_case(name))
        })
    }
}
