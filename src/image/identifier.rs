use crate::errors::ImageError;
use std::{
    cmp::{Ord, Ordering, PartialOrd},
    fmt,
    str::FromStr,
};

static LATEST_STR: &str = "latest";

/// Parsed reference to a tagged container image
///
/// An identifier names an image the way callers ask for it: an optional
/// registry, a repository, and a tag defaulting to `latest`. It is parsed
/// from a single string of the form `[registry/]repository[:tag]` with a
/// two-segment split: everything before the first slash is the registry, and
/// only the segment immediately after it is kept as the repository part.
///
/// Identifiers are plain values. Equality and hashing cover all three
/// fields and back every map and set keyed by identifier. The sort order is
/// repository first, then tag, then registry — and the registry is only
/// compared when both sides carry a non-empty one, so a registry-less
/// identifier is never ordered strictly against a qualified one. That makes
/// the order a grouping order, not a total order consistent with equality;
/// it is used for sorted presentation only.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ImageIdentifier {
    registry: Option<String>,
    repository: String,
    tag: String,
}

/// Split, discarding trailing empty segments the way the reference parser
/// expects (`"a//"` yields just `["a"]`, but a lone `""` is kept).
fn split_segments(s: &str, sep: char) -> Vec<&str> {
    let mut parts: Vec<&str> = s.split(sep).collect();
    while parts.len() > 1 && parts.last() == Some(&"") {
        parts.pop();
    }
    parts
}

impl ImageIdentifier {
    /// Parse a [prim@str] as an [ImageIdentifier]
    ///
    /// The only malformed input is one with an empty repository.
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        let slash = split_segments(s, '/');
        let (registry, remainder) = if slash.len() > 1 {
            (Some(slash[0]), slash[1])
        } else {
            (None, *slash.first().unwrap_or(&""))
        };
        let colon = split_segments(remainder, ':');
        let repository = *colon.first().unwrap_or(&"");
        let tag = colon.get(1).copied().unwrap_or(LATEST_STR);
        if repository.is_empty() {
            return Err(ImageError::InvalidReferenceFormat(s.to_owned()));
        }
        Ok(ImageIdentifier {
            registry: registry.map(str::to_owned),
            repository: repository.to_owned(),
            tag: tag.to_owned(),
        })
    }

    /// Identifier for `repository:latest` with no registry
    pub fn new(repository: &str) -> Self {
        ImageIdentifier::with_tag(repository, LATEST_STR)
    }

    /// Identifier for `repository:tag` with no registry
    pub fn with_tag(repository: &str, tag: &str) -> Self {
        ImageIdentifier {
            registry: None,
            repository: repository.to_owned(),
            tag: tag.to_owned(),
        }
    }

    /// Identifier with all three components spelled out
    pub fn with_registry(registry: &str, repository: &str, tag: &str) -> Self {
        ImageIdentifier {
            registry: Some(registry.to_owned()),
            repository: repository.to_owned(),
            tag: tag.to_owned(),
        }
    }

    /// Returns the optional registry portion
    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    /// Returns the repository portion
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Returns the tag portion, `latest` if none was given
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Is this the special tag `latest`?
    pub fn is_latest(&self) -> bool {
        self.tag == LATEST_STR
    }
}

impl FromStr for ImageIdentifier {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageIdentifier::parse(s)
    }
}

impl fmt::Display for ImageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

impl fmt::Debug for ImageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Ord for ImageIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.repository
            .cmp(&other.repository)
            .then_with(|| self.tag.cmp(&other.tag))
            .then_with(|| match (&self.registry, &other.registry) {
                (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => a.cmp(b),
                _ => Ordering::Equal,
            })
    }
}

impl PartialOrd for ImageIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
