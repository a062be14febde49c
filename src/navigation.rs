//! Table of contents model handed over by the container parser.
//!
//! The parser owns XML decoding; this module only models the resulting tree
//! and answers lookups the bridge needs (TOC entry -> href).

use serde::{Deserialize, Serialize};

use crate::href::split_href_fragment;

/// Table of contents entry, possibly nested.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavPoint {
    pub label: String,
    /// Container-relative href, possibly with a fragment.
    pub href: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NavPoint>,
}

impl NavPoint {
    pub fn new(label: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            href: href.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<NavPoint>) -> Self {
        self.children = children;
        self
    }
}

/// Navigation documents of a publication.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Navigation {
    pub toc: Vec<NavPoint>,
    /// Print page numbers, when the publication declares them.
    #[serde(default)]
    pub page_list: Vec<NavPoint>,
    #[serde(default)]
    pub landmarks: Vec<NavPoint>,
}

impl Navigation {
    /// TOC entries depth-first with their nesting depth, for list rendering.
    pub fn toc_flat(&self) -> Vec<(usize, &NavPoint)> {
        let mut stack: Vec<(usize, &NavPoint)> =
            self.toc.iter().rev().map(|point| (0, point)).collect();
        let mut flat = Vec::with_capacity(stack.len());
        while let Some((depth, point)) = stack.pop() {
            flat.push((depth, point));
            stack.extend(point.children.iter().rev().map(|child| (depth + 1, child)));
        }
        flat
    }

    /// Find the href of the TOC entry whose label or fragment equals `id`.
    ///
    /// Depth-first, first match wins.
    pub fn find_toc_href(&self, id: &str) -> Option<&str> {
        fn visit<'a>(points: &'a [NavPoint], id: &str) -> Option<&'a str> {
            for point in points {
                let (_, fragment) = split_href_fragment(&point.href);
                if point.label == id || fragment == Some(id) {
                    return Some(point.href.as_str());
                }
                if let Some(hit) = visit(&point.children, id) {
                    return Some(hit);
                }
            }
            None
        }
        visit(&self.toc, id)
    }
}
