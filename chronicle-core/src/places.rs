//! Free-text place descriptions to stable location identifiers.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Separators that end the primary place name.
const QUALIFIER_SEPARATORS: &[&str] = &[",", "(", " - ", "/", ":", ";"];

/// A place description split into its identifier and qualifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceRef {
    /// Identifier derived from the primary name.
    pub id: String,
    /// Primary name as written.
    pub name: String,
    /// Sub-location after the first separator, if any.
    pub detail: Option<String>,
}

/// Fold text into an identifier-safe token.
///
/// Strips diacritics, lowercases and maps every run of other characters
/// to a single `_`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_sep = false;

    for c in text.nfd().filter(|c| !is_combining_mark(*c)) {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    slug
}

/// Split a place description and derive its location ID.
///
/// Returns `None` when nothing identifier-worthy remains.
pub fn normalize_place(text: &str) -> Option<PlaceRef> {
    let text = text.trim();
    let split = QUALIFIER_SEPARATORS
        .iter()
        .filter_map(|sep| text.find(sep).map(|at| (at, sep.len())))
        .min_by_key(|&(at, _)| at);

    let (primary, qualifier) = match split {
        Some((at, len)) => (&text[..at], Some(&text[at + len..])),
        None => (text, None),
    };

    let id = slugify(primary);
    if id.is_empty() {
        return None;
    }

    let detail = qualifier
        .map(|q| q.trim().trim_matches(|c| c == '(' || c == ')').trim())
        .filter(|q| !q.is_empty())
        .map(str::to_string);

    Some(PlaceRef {
        id,
        name: primary.trim().to_string(),
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Alcázar Real"), "alcazar_real");
        assert_eq!(slugify("  Córdoba!! "), "cordoba");
        assert_eq!(slugify("Logroño"), "logrono");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn test_normalize_with_qualifier() {
        let place = normalize_place("Toledo, Alcázar Real").unwrap();
        assert_eq!(place.id, "toledo");
        assert_eq!(place.name, "Toledo");
        assert_eq!(place.detail.as_deref(), Some("Alcázar Real"));

        let place = normalize_place("Sevilla (Torre del Oro)").unwrap();
        assert_eq!(place.id, "sevilla");
        assert_eq!(place.detail.as_deref(), Some("Torre del Oro"));
    }

    #[test]
    fn test_earliest_separator_wins() {
        let place = normalize_place("Burgos - Catedral, nave norte").unwrap();
        assert_eq!(place.id, "burgos");
        assert_eq!(place.detail.as_deref(), Some("Catedral, nave norte"));

        // A hyphen without spaces belongs to the name.
        let place = normalize_place("Villa-Real").unwrap();
        assert_eq!(place.id, "villa_real");
        assert!(place.detail.is_none());
    }

    #[test]
    fn test_empty_place() {
        assert!(normalize_place("").is_none());
        assert!(normalize_place(", somewhere").is_none());
    }
}
