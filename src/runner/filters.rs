//! Element filter algebra
//!
//! A selector compiles into one composite filter over the flattened view
//! hierarchy. Clauses are AND-combined in a fixed order (text, id, size,
//! below, above, left-of, right-of, contains-child, traits, enabled), then
//! either an explicit index or the clickable-first tie-break is applied.

use crate::driver::hierarchy::{attr, Bounds, TreeNode, UiElement};
use crate::driver::traits::DeviceInfo;
use crate::parser::types::{ElementSelector, ElementTrait, SizeSelector};
use regex::Regex;

/// Maps candidate nodes to the matching subset, in result order
pub type ElementFilter =
    Box<dyn for<'a> Fn(&[&'a TreeNode]) -> Vec<&'a TreeNode> + Send + Sync>;

pub struct FilterWithDescription {
    pub description: String,
    pub filter: ElementFilter,
}

impl FilterWithDescription {
    /// First matching element of a hierarchy snapshot
    pub fn find_in(&self, root: &TreeNode) -> Option<UiElement> {
        let nodes = root.aggregate();
        (self.filter)(&nodes)
            .into_iter()
            .find_map(UiElement::from_tree_node)
    }
}

const LONG_TEXT_LENGTH: usize = 200;
const SQUARE_TOLERANCE: f64 = 0.03;

/// Compile a selector into a filter
pub fn build_filter(selector: &ElementSelector, device_info: &DeviceInfo) -> FilterWithDescription {
    let mut filters: Vec<ElementFilter> = Vec::new();

    if let Some(text) = &selector.text_regex {
        filters.push(deepest_matching_element(text_matches(Pattern::new(text))));
    }

    if let Some(id) = &selector.id_regex {
        filters.push(deepest_matching_element(id_matches(Pattern::new(id))));
    }

    if let Some(size) = &selector.size {
        filters.push(as_filter(size_matches(size.clone())));
    }

    let relations = [
        (&selector.below, Relation::Below),
        (&selector.above, Relation::Above),
        (&selector.left_of, Relation::LeftOf),
        (&selector.right_of, Relation::RightOf),
    ];
    for (sub, relation) in relations {
        if let Some(sub) = sub {
            let anchor = build_filter(sub, device_info).filter;
            filters.push(relative_to(anchor, relation, device_info.clone()));
        }
    }

    if let Some(child) = &selector.contains_child {
        filters.push(contains_child(build_filter(child, device_info).filter));
    }

    for t in selector.traits.iter().flatten() {
        filters.push(as_filter(trait_matches(*t)));
    }

    if let Some(enabled) = selector.enabled {
        filters.push(as_filter(move |n: &TreeNode| n.is_enabled() == enabled));
    }

    let combined = intersect(filters);
    let filter = match selector.index {
        Some(idx) => compose(combined, index(idx)),
        None => compose(combined, clickable_first()),
    };

    FilterWithDescription {
        description: selector.description(),
        filter,
    }
}

/// Case-insensitive, dot-all, multi-line full match; invalid patterns match literally
pub fn to_regex_safe(pattern: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?ism)\A(?:{})\z", pattern))
        .or_else(|_| {
            log::debug!("Invalid regex {:?}, matching literally", pattern);
            Regex::new(&format!(r"(?ism)\A{}\z", regex::escape(pattern)))
        })
        .ok()
}

/// Attribute matcher: full regex match, or the raw pattern verbatim
struct Pattern {
    regex: Option<Regex>,
    raw: String,
}

impl Pattern {
    fn new(raw: &str) -> Self {
        Self {
            regex: to_regex_safe(raw),
            raw: raw.to_string(),
        }
    }

    fn matches(&self, value: &str) -> bool {
        let is_match = |v: &str| self.regex.as_ref().map_or(false, |re| re.is_match(v)) || v == self.raw;
        is_match(value) || is_match(&value.replace('\n', " "))
    }
}

fn text_matches(pattern: Pattern) -> impl Fn(&TreeNode) -> bool + Send + Sync + 'static {
    move |node: &TreeNode| {
        [attr::TEXT, attr::HINT_TEXT, attr::ACCESSIBILITY_TEXT]
            .iter()
            .filter_map(|key| node.attribute(key))
            .any(|value| pattern.matches(value))
    }
}

fn id_matches(pattern: Pattern) -> impl Fn(&TreeNode) -> bool + Send + Sync + 'static {
    move |node: &TreeNode| {
        node.attribute(attr::RESOURCE_ID)
            .map_or(false, |id| pattern.matches(id))
    }
}

fn size_matches(size: SizeSelector) -> impl Fn(&TreeNode) -> bool + Send + Sync + 'static {
    move |node: &TreeNode| {
        let Some(bounds) = node.bounds() else {
            return false;
        };
        let tolerance = size.tolerance.unwrap_or(0);
        if let Some(w) = size.width {
            if (bounds.width() - w).abs() > tolerance {
                return false;
            }
        }
        if let Some(h) = size.height {
            if (bounds.height() - h).abs() > tolerance {
                return false;
            }
        }
        true
    }
}

fn trait_matches(t: ElementTrait) -> impl Fn(&TreeNode) -> bool + Send + Sync + 'static {
    move |node: &TreeNode| match t {
        ElementTrait::Text => node.text().map_or(false, |s| !s.trim().is_empty()),
        ElementTrait::LongText => node
            .text()
            .map_or(false, |s| s.chars().count() >= LONG_TEXT_LENGTH),
        ElementTrait::Square => node.bounds().map_or(false, |b| {
            let (w, h) = (b.width() as f64, b.height() as f64);
            w > 0.0 && h > 0.0 && (1.0 - w / h).abs() < SQUARE_TOLERANCE
        }),
    }
}

fn make_filter<F>(f: F) -> ElementFilter
where
    F: for<'a> Fn(&[&'a TreeNode]) -> Vec<&'a TreeNode> + Send + Sync + 'static,
{
    Box::new(f)
}

/// Lift a node predicate into a filter
fn as_filter<P>(predicate: P) -> ElementFilter
where
    P: Fn(&TreeNode) -> bool + Send + Sync + 'static,
{
    make_filter(move |nodes| nodes.iter().copied().filter(|n| predicate(n)).collect())
}

/// Replace each match by its deepest matching descendant
///
/// Text is often repeated on a container and its label; the label wins.
fn deepest_matching_element<P>(predicate: P) -> ElementFilter
where
    P: Fn(&TreeNode) -> bool + Send + Sync + 'static,
{
    make_filter(move |nodes| {
        let mut result: Vec<&TreeNode> = Vec::new();
        for node in nodes.iter().copied().filter(|n| predicate(n)) {
            let deepest = deepest_of(node, &predicate);
            push_unique(&mut result, deepest);
        }
        result
    })
}

fn deepest_of<'a, P>(node: &'a TreeNode, predicate: &P) -> &'a TreeNode
where
    P: Fn(&TreeNode) -> bool,
{
    match node.children.iter().filter(|c| predicate(c)).last() {
        Some(child) => deepest_of(child, predicate),
        None => node,
    }
}

fn push_unique<'a>(nodes: &mut Vec<&'a TreeNode>, node: &'a TreeNode) {
    if !nodes.iter().any(|n| std::ptr::eq(*n, node)) {
        nodes.push(node);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Below,
    Above,
    LeftOf,
    RightOf,
}

impl Relation {
    /// Inclusive so adjacent elements qualify
    fn holds(self, candidate: &Bounds, anchor: &Bounds) -> bool {
        match self {
            Relation::Below => candidate.top >= anchor.bottom,
            Relation::Above => candidate.bottom <= anchor.top,
            Relation::LeftOf => candidate.right <= anchor.left,
            Relation::RightOf => candidate.left >= anchor.right,
        }
    }

    /// Edge-to-edge gap
    fn distance(self, candidate: &Bounds, anchor: &Bounds) -> i32 {
        match self {
            Relation::Below => candidate.top - anchor.bottom,
            Relation::Above => anchor.top - candidate.bottom,
            Relation::LeftOf => anchor.left - candidate.right,
            Relation::RightOf => candidate.left - anchor.right,
        }
    }
}

/// Screen-sized containers are never a meaningful relative match
fn is_large_container(bounds: &Bounds, device_info: &DeviceInfo) -> bool {
    if device_info.width_grid == 0 || device_info.height_grid == 0 {
        return false;
    }
    let width_ratio = bounds.width() as f64 / device_info.width_grid as f64;
    let height_ratio = bounds.height() as f64 / device_info.height_grid as f64;
    width_ratio > 0.8 && height_ratio > 0.5
}

/// Nodes in `relation` to the first match of `anchor`, nearest first
fn relative_to(anchor: ElementFilter, relation: Relation, device_info: DeviceInfo) -> ElementFilter {
    make_filter(move |nodes| {
        let Some(anchor_node) = anchor(nodes).into_iter().find(|n| n.bounds().is_some()) else {
            return Vec::new();
        };
        let Some(anchor_bounds) = anchor_node.bounds() else {
            return Vec::new();
        };

        let mut matches: Vec<(&TreeNode, i32)> = nodes
            .iter()
            .copied()
            .filter(|n| !std::ptr::eq(*n, anchor_node))
            .filter_map(|n| n.bounds().map(|b| (n, b)))
            .filter(|(_, b)| !is_large_container(b, &device_info))
            .filter(|(_, b)| relation.holds(b, &anchor_bounds))
            .map(|(n, b)| (n, relation.distance(&b, &anchor_bounds)))
            .collect();

        matches.sort_by_key(|(_, distance)| *distance);
        matches.into_iter().map(|(n, _)| n).collect()
    })
}

/// Nodes having the first match of `child` as a direct child
fn contains_child(child: ElementFilter) -> ElementFilter {
    make_filter(move |nodes| {
        let Some(child_node) = child(nodes).into_iter().next() else {
            return Vec::new();
        };
        nodes
            .iter()
            .copied()
            .filter(|n| n.children.iter().any(|c| std::ptr::eq(c, child_node)))
            .collect()
    })
}

/// Nodes accepted by every filter, in the order of the first one
fn intersect(filters: Vec<ElementFilter>) -> ElementFilter {
    make_filter(move |nodes| {
        let mut iter = filters.iter();
        let Some(first) = iter.next() else {
            return nodes.to_vec();
        };
        let mut result = first(nodes);
        for filter in iter {
            let other = filter(nodes);
            result.retain(|n| other.iter().any(|o| std::ptr::eq(*o, *n)));
        }
        result
    })
}

fn compose(first: ElementFilter, second: ElementFilter) -> ElementFilter {
    make_filter(move |nodes| {
        let intermediate = first(nodes);
        second(&intermediate)
    })
}

fn index(idx: usize) -> ElementFilter {
    make_filter(move |nodes| nodes.get(idx).copied().into_iter().collect())
}

/// Stable: clickable nodes first, relative order otherwise kept
fn clickable_first() -> ElementFilter {
    make_filter(|nodes| {
        let mut sorted = nodes.to_vec();
        sorted.sort_by_key(|n| !n.is_clickable());
        sorted
    })
}
