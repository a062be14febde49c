//! Matching host-supplied links against reading-order hrefs.
//!
//! Hrefs in the reading order are container-relative. Links coming back from
//! the host or from a table of contents may be spelled differently (`./`
//! prefixes, backslashes, query strings, fragments), so lookups rank each
//! entry by how closely it matches and take the strongest candidate.

/// Split `href` into its base path and fragment. An empty fragment is absent.
pub fn split_href_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((base, "")) => (base, None),
        Some((base, fragment)) => (base, Some(fragment)),
        None => (href, None),
    }
}

/// Canonical form of a container-relative path.
///
/// The query string is dropped, both slash styles separate segments, and
/// `.`/`..` segments are folded. A `..` above the root is discarded.
pub fn canonical_path(path: &str) -> String {
    let without_query = path.split('?').next().unwrap_or(path);
    without_query
        .split(['/', '\\'])
        .fold(Vec::new(), |mut kept, segment| {
            match segment {
                "" | "." => {}
                ".." => {
                    kept.pop();
                }
                name => kept.push(name),
            }
            kept
        })
        .join("/")
}

fn file_name(canonical: &str) -> &str {
    canonical.rsplit('/').next().unwrap_or(canonical)
}

/// How an entry matched a looked-up href; stronger variants compare greater.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum MatchStrength {
    FileName,
    Canonical,
    Exact,
}

struct Target<'a> {
    raw: &'a str,
    canonical: String,
}

impl Target<'_> {
    fn strength(&self, entry: &str) -> Option<MatchStrength> {
        if entry == self.raw {
            return Some(MatchStrength::Exact);
        }
        let entry = canonical_path(entry);
        if entry == self.canonical {
            return Some(MatchStrength::Canonical);
        }
        let wanted = file_name(&self.canonical);
        (!wanted.is_empty() && file_name(&entry) == wanted).then_some(MatchStrength::FileName)
    }
}

/// Index of the entry in `hrefs` that `href` refers to.
///
/// An exact spelling wins over a canonical-path match, which wins over a
/// file-name match. A file-name match only counts when exactly one entry
/// has that file name. Ties between equal matches go to the earliest entry.
pub fn resolve_href_index<'a, I>(hrefs: I, href: &str) -> Option<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let (raw, _) = split_href_fragment(href);
    if raw.is_empty() {
        return None;
    }
    let target = Target {
        raw,
        canonical: canonical_path(raw),
    };

    let mut best: Option<(MatchStrength, usize)> = None;
    let mut file_name_matches = 0usize;
    for (index, entry) in hrefs.into_iter().enumerate() {
        let Some(strength) = target.strength(entry) else {
            continue;
        };
        if strength == MatchStrength::FileName {
            file_name_matches += 1;
        }
        if best.is_none_or(|(current, _)| strength > current) {
            best = Some((strength, index));
        }
    }

    match best {
        Some((MatchStrength::FileName, _)) if file_name_matches > 1 => None,
        best => best.map(|(_, index)| index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: [&str; 3] = ["OEBPS/text/ch0.xhtml", "OEBPS/text/ch1.xhtml", "OEBPS/notes.xhtml"];

    #[test]
    fn exact_canonical_and_file_name_spellings_resolve() {
        let order = || ORDER.iter().copied();
        assert_eq!(resolve_href_index(order(), "OEBPS/text/ch1.xhtml"), Some(1));
        assert_eq!(
            resolve_href_index(order(), "./OEBPS//text/../text/ch1.xhtml#p3"),
            Some(1)
        );
        assert_eq!(resolve_href_index(order(), "OEBPS\\text\\ch0.xhtml"), Some(0));
        assert_eq!(resolve_href_index(order(), "notes.xhtml?x=1"), Some(2));
        assert_eq!(resolve_href_index(order(), "missing.xhtml"), None);
        assert_eq!(resolve_href_index(order(), "#only-a-fragment"), None);
    }

    #[test]
    fn stronger_match_beats_earlier_weaker_one() {
        let order = ["a/ch.xhtml", "ch.xhtml"];
        assert_eq!(resolve_href_index(order.iter().copied(), "ch.xhtml"), Some(1));
        assert_eq!(resolve_href_index(order.iter().copied(), "./a/ch.xhtml"), Some(0));
    }

    #[test]
    fn shared_file_name_does_not_resolve() {
        let order = ["a/ch.xhtml", "b/ch.xhtml"];
        assert_eq!(resolve_href_index(order.iter().copied(), "c/ch.xhtml"), None);
    }

    #[test]
    fn canonical_path_folds_segments() {
        assert_eq!(canonical_path("./a\\b/../c.xhtml?v=2"), "a/c.xhtml");
        assert_eq!(canonical_path("../../c.xhtml"), "c.xhtml");
        assert_eq!(canonical_path(""), "");
    }

    #[test]
    fn empty_fragment_is_absent() {
        assert_eq!(split_href_fragment("a.xhtml#"), ("a.xhtml", None));
        assert_eq!(split_href_fragment("a.xhtml#x"), ("a.xhtml", Some("x")));
        assert_eq!(split_href_fragment("a.xhtml"), ("a.xhtml", None));
    }
}
