//! Trie walk that resolves a request path to a registered route.

use std::sync::Arc;

use super::{RouteDescriptor, TrieNode};
use crate::context::Parameters;

/// A successful lookup: the terminal route plus the path segments captured by
/// its parameter segments, in order.
#[derive(Debug)]
pub struct RouteMatch<'t, 'p> {
    route: &'t Arc<RouteDescriptor>,
    captures: Vec<&'p str>,
}

impl<'t, 'p> RouteMatch<'t, 'p> {
    pub fn route(&self) -> &'t Arc<RouteDescriptor> {
        self.route
    }

    pub fn captures(&self) -> &[&'p str] {
        &self.captures
    }

    /// Zips the route's declared parameter names with the captured values.
    pub fn params(&self) -> Parameters {
        Parameters::from_pairs(
            self.route
                .pattern()
                .param_names()
                .zip(self.captures.iter().copied()),
        )
    }
}

/// Walks `segments` down from `root`.
///
/// A literal child always wins over the wildcard child. When the last segment
/// could only match through a wildcard that ends a route and a static file
/// exists for the path, the lookup fails so the file is served instead; a
/// wildcard that continues into deeper segments is not subject to that rule.
pub(crate) fn find<'t, 'p>(
    root: &'t TrieNode,
    segments: &[&'p str],
    file_exists: bool,
) -> Option<RouteMatch<'t, 'p>> {
    let last = segments.len().saturating_sub(1);
    let mut node = root;
    let mut captures = Vec::new();

    for (idx, segment) in segments.iter().copied().enumerate() {
        if let Some(child) = node.literal.get(segment) {
            node = child;
            continue;
        }

        let child = node.wildcard.as_deref()?;
        if idx == last && file_exists && child.terminal.is_some() {
            return None;
        }
        captures.push(segment);
        node = child;
    }

    node.terminal
        .as_ref()
        .map(|route| RouteMatch { route, captures })
}
