//! Segment trie used for route matching.
//!
//! A [`Tree`] stores values under URL patterns and finds the best registered
//! pattern for a concrete request path. Each `/`-separated segment of a
//! pattern becomes one [`Node`]; a segment is classified into a [`MatchKind`]
//! when its node is created.
//!
//! # Pattern Syntax
//!
//! | Segment                      | Kind                 | Bound name   |
//! |------------------------------|----------------------|--------------|
//! | `users`                      | [`MatchKind::Strict`] | none        |
//! | `:id`                        | [`MatchKind::Single`] | `id`        |
//! | `{id}` or `[id]`             | [`MatchKind::Single`] | `id`        |
//! | `*rest`                      | [`MatchKind::Multi`]  | `rest`      |
//! | `...rest` or `rest...`       | [`MatchKind::Multi`]  | `rest`      |
//! | `{*rest}` or `[...rest]`     | [`MatchKind::Multi`]  | `rest`      |
//!
//! Braces and brackets always make a segment dynamic: the wrapped text is
//! classified again and promoted to `Single` if it would otherwise be literal.
//!
//! # Precedence
//!
//! Children of every node are kept ordered `Strict < Single < Multi`. Search
//! walks that order depth first and stops at the first registered endpoint it
//! reaches, so `/users/list` wins over `/users/:id`, which in turn wins over
//! `/users/*rest`.
//!
//! Two dynamic segments of the same kind at the same position (`/a/:x` and
//! `/a/:y`) are stored as separate siblings. The sibling registered first is
//! tried first. This order dependence is logged as a warning at registration
//! and should not be relied on.
//!
//! # Examples
//!
//! ```
//! use trellis_core::tree::{parse_params, Tree};
//!
//! let mut tree = Tree::new();
//! tree.insert("/users/list", "list");
//! tree.insert("/users/:id", "show");
//! tree.insert("/files/*path", "files");
//!
//! let node = tree.search("/users/42").unwrap();
//! assert_eq!(node.value(), Some(&"show"));
//! assert_eq!(parse_params("/users/42", node.pattern())["id"], "42");
//!
//! let node = tree.search("/files/a/b/c").unwrap();
//! assert_eq!(parse_params("/files/a/b/c", node.pattern())["path"], "a/b/c");
//! ```

use std::collections::HashMap;

use tracing::warn;

/// Parameters bound by a matched pattern, keyed by name.
pub type Params = HashMap<String, String>;

/// How a pattern segment matches path segments.
///
/// The derived ordering is the lookup precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchKind {
    /// Matches the literal segment text exactly.
    Strict,
    /// Matches exactly one path segment and binds it.
    Single,
    /// Matches all remaining path segments and binds them joined by `/`.
    Multi,
}

impl MatchKind {
    /// Returns `true` for `Single` and `Multi`.
    pub fn is_dynamic(self) -> bool {
        self != MatchKind::Strict
    }
}

/// A classified pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// The match kind.
    pub kind: MatchKind,
    /// The bound parameter name, or the literal text for `Strict` segments.
    pub name: String,
}

impl Segment {
    fn new(kind: MatchKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
        }
    }
}

/// Classifies one pattern segment.
///
/// ```
/// use trellis_core::tree::{classify, MatchKind};
///
/// assert_eq!(classify(":id").kind, MatchKind::Single);
/// assert_eq!(classify("{id}").name, "id");
/// assert_eq!(classify("rest...").kind, MatchKind::Multi);
/// assert_eq!(classify("users").kind, MatchKind::Strict);
/// ```
pub fn classify(segment: &str) -> Segment {
    if wrapped(segment, '{', '}') || wrapped(segment, '[', ']') {
        let mut inner = classify(&segment[1..segment.len() - 1]);
        if inner.kind == MatchKind::Strict {
            inner.kind = MatchKind::Single;
        }
        return inner;
    }

    if segment.len() > 1 {
        if let Some(name) = segment.strip_prefix(':') {
            return Segment::new(MatchKind::Single, name);
        }
        if let Some(name) = segment.strip_prefix('*') {
            return Segment::new(MatchKind::Multi, name);
        }
        if segment.starts_with("...") || segment.ends_with("...") {
            let name = segment.strip_suffix("...").unwrap_or(segment);
            let name = name.strip_prefix("...").unwrap_or(name);
            return Segment::new(MatchKind::Multi, name);
        }
    }

    Segment::new(MatchKind::Strict, segment)
}

fn wrapped(segment: &str, open: char, close: char) -> bool {
    segment.len() >= 2 && segment.starts_with(open) && segment.ends_with(close)
}

/// Splits a path or pattern on `/`, dropping empty segments.
pub fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Extracts the parameters `pattern` binds when matched against `path`.
///
/// Path segments missing for a `Single` segment are skipped. A `Multi`
/// segment binds everything that is left and ends extraction.
pub fn parse_params(path: &str, pattern: &str) -> Params {
    let path_parts = split_segments(path);
    let mut params = Params::new();

    for (i, part) in split_segments(pattern).into_iter().enumerate() {
        let segment = classify(part);
        match segment.kind {
            MatchKind::Strict => {}
            MatchKind::Single => {
                if let Some(value) = path_parts.get(i) {
                    params.insert(segment.name, (*value).to_string());
                }
            }
            MatchKind::Multi => {
                let rest = path_parts.get(i..).unwrap_or_default().join("/");
                params.insert(segment.name, rest);
                break;
            }
        }
    }

    params
}

/// One segment position in the trie.
#[derive(Debug)]
pub struct Node<T> {
    segment: String,
    kind: MatchKind,
    pattern: String,
    value: Option<T>,
    children: Vec<Node<T>>,
}

impl<T> Node<T> {
    fn new(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            kind: classify(segment).kind,
            pattern: String::new(),
            value: None,
            children: Vec::new(),
        }
    }

    /// The segment text exactly as registered.
    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn kind(&self) -> MatchKind {
        self.kind
    }

    /// The full registered pattern, empty unless this node is an endpoint.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_endpoint(&self) -> bool {
        !self.pattern.is_empty()
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Child nodes in lookup order.
    pub fn children(&self) -> &[Node<T>] {
        &self.children
    }

    fn search(&self, parts: &[&str], height: usize) -> Option<&Node<T>> {
        if parts.len() == height || self.kind == MatchKind::Multi {
            return self.is_endpoint().then_some(self);
        }

        let part = parts[height];
        self.children
            .iter()
            .filter(|child| child.kind.is_dynamic() || child.segment == part)
            .find_map(|child| child.search(parts, height + 1))
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(Node::count).sum::<usize>()
    }

    fn collect_endpoints<'a>(&'a self, out: &mut Vec<&'a Node<T>>) {
        if self.is_endpoint() {
            out.push(self);
        }
        for child in &self.children {
            child.collect_endpoints(out);
        }
    }
}

/// A route trie mapping patterns to values of type `T`.
///
/// The tree is append-only: nodes are never removed. Registration is meant
/// to finish before concurrent lookups start; share the finished tree behind
/// an `Arc` and wrap it in a lock only if routes must change while serving.
#[derive(Debug)]
pub struct Tree<T> {
    root: Node<T>,
}

impl<T> Default for Tree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Tree<T> {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self {
            root: Node::new(""),
        }
    }

    /// Registers `value` under `pattern`, returning the value it replaces.
    ///
    /// Inserting an identical pattern again overwrites the value at the same
    /// node without creating any new nodes.
    pub fn insert(&mut self, pattern: &str, value: T) -> Option<T> {
        let node = self.endpoint_mut(pattern);
        node.value.replace(value)
    }

    /// Returns the value under `pattern`, inserting `default()` first if the
    /// pattern has none.
    pub fn get_or_insert_with<F>(&mut self, pattern: &str, default: F) -> &mut T
    where
        F: FnOnce() -> T,
    {
        let node = self.endpoint_mut(pattern);
        node.value.get_or_insert_with(default)
    }

    /// Finds the endpoint node that best matches a concrete request path.
    pub fn search(&self, path: &str) -> Option<&Node<T>> {
        let parts = split_segments(path);
        self.root.search(&parts, 0)
    }

    /// Total number of nodes, the root included.
    pub fn node_count(&self) -> usize {
        self.root.count()
    }

    /// All endpoint nodes in depth-first lookup order.
    pub fn endpoints(&self) -> Vec<&Node<T>> {
        let mut out = Vec::new();
        self.root.collect_endpoints(&mut out);
        out
    }

    /// All registered patterns in depth-first lookup order.
    pub fn patterns(&self) -> Vec<&str> {
        self.endpoints().into_iter().map(Node::pattern).collect()
    }

    pub fn root(&self) -> &Node<T> {
        &self.root
    }

    fn endpoint_mut(&mut self, pattern: &str) -> &mut Node<T> {
        let parts = split_segments(pattern);
        let catch_all = parts
            .iter()
            .position(|part| classify(part).kind == MatchKind::Multi);
        let reachable = match catch_all {
            Some(idx) if idx + 1 < parts.len() => {
                warn!(
                    pattern,
                    ignored = %parts[idx + 1..].join("/"),
                    "segments after a catch-all can never match"
                );
                &parts[..=idx]
            }
            _ => &parts[..],
        };

        let mut node = &mut self.root;
        for &part in reachable {
            let idx = match node.children.iter().position(|c| c.segment == part) {
                Some(idx) => idx,
                None => node.add_child(part, pattern),
            };
            node = &mut node.children[idx];
        }

        node.pattern = pattern.to_string();
        node
    }
}

impl<T> Node<T> {
    /// Inserts a new child after all siblings of the same or lower kind.
    fn add_child(&mut self, part: &str, pattern: &str) -> usize {
        let child = Node::new(part);

        if child.kind.is_dynamic() {
            for sibling in self.children.iter().filter(|c| c.kind == child.kind) {
                warn!(
                    pattern,
                    segment = part,
                    existing = %sibling.segment,
                    "route may conflict with an existing dynamic segment; the earlier registration is tried first"
                );
            }
        }

        let idx = self.children.partition_point(|c| c.kind <= child.kind);
        self.children.insert(idx, child);
        idx
    }
}
