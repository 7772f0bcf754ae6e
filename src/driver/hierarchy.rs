//! View hierarchy model
//!
//! A `TreeNode` is a read-only snapshot of one on-screen element produced by
//! the driver on every hierarchy read. The engine only traverses it.

use super::traits::Point;
use anyhow::{Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Attribute keys shared by every backend
pub mod attr {
    pub const TEXT: &str = "text";
    pub const HINT_TEXT: &str = "hintText";
    pub const ACCESSIBILITY_TEXT: &str = "accessibilityText";
    pub const RESOURCE_ID: &str = "resource-id";
    pub const BOUNDS: &str = "bounds";
    pub const CLICKABLE: &str = "clickable";
    pub const ENABLED: &str = "enabled";
}

/// A node of the view hierarchy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(attributes: HashMap<String, String>, children: Vec<TreeNode>) -> Self {
        Self {
            attributes,
            children,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    pub fn text(&self) -> Option<&str> {
        self.attribute(attr::TEXT)
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.attribute(attr::BOUNDS).and_then(Bounds::from_string)
    }

    pub fn is_clickable(&self) -> bool {
        self.attribute(attr::CLICKABLE) == Some("true")
    }

    /// Missing attribute counts as enabled
    pub fn is_enabled(&self) -> bool {
        self.attribute(attr::ENABLED) != Some("false")
    }

    /// All nodes of the tree in hierarchy (pre-order) order, including `self`
    pub fn aggregate(&self) -> Vec<&TreeNode> {
        let mut nodes = Vec::new();
        self.collect_into(&mut nodes);
        nodes
    }

    fn collect_into<'a>(&'a self, nodes: &mut Vec<&'a TreeNode>) {
        nodes.push(self);
        for child in &self.children {
            child.collect_into(nodes);
        }
    }

    /// Pretty JSON dump for diagnostics
    pub fn dump(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("<unprintable: {}>", e))
    }
}

/// Element rectangle in grid units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Get the center point of the bounds
    pub fn center(&self) -> Point {
        Point::new((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }

    /// Check if this bounds contains another bounds entirely
    pub fn contains(&self, other: &Bounds) -> bool {
        self.left <= other.left
            && self.top <= other.top
            && self.right >= other.right
            && self.bottom >= other.bottom
    }

    /// Parse bounds from string like "[0,0][1080,1920]"
    pub fn from_string(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split("][").collect();
        if parts.len() != 2 {
            return None;
        }

        let left_top = parts[0].trim_start_matches('[');
        let right_bottom = parts[1].trim_end_matches(']');

        let lt: Vec<i32> = left_top
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        let rb: Vec<i32> = right_bottom
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();

        if lt.len() == 2 && rb.len() == 2 {
            Some(Bounds::new(lt[0], lt[1], rb[0], rb[1]))
        } else {
            None
        }
    }

    pub fn to_attribute(&self) -> String {
        format!(
            "[{},{}][{},{}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// A resolved element: a tree node together with its parsed bounds
#[derive(Debug, Clone, PartialEq)]
pub struct UiElement {
    pub tree_node: TreeNode,
    pub bounds: Bounds,
}

impl UiElement {
    /// Nodes without parseable bounds cannot be interacted with
    pub fn from_tree_node(node: &TreeNode) -> Option<Self> {
        node.bounds().map(|bounds| Self {
            tree_node: node.clone(),
            bounds,
        })
    }

    pub fn center(&self) -> Point {
        self.bounds.center()
    }
}

/// Decode common HTML entities in a string
/// Handles: &amp; &lt; &gt; &quot; &apos; &#NNN; (decimal) &#xHHH; (hex)
fn decode_html_entities(s: &str) -> String {
    static DECIMAL: OnceLock<Regex> = OnceLock::new();
    static HEX: OnceLock<Regex> = OnceLock::new();

    let mut result = s
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ");

    let decimal_re = DECIMAL.get_or_init(|| Regex::new(r"&#(\d+);").expect("valid regex"));
    result = decimal_re
        .replace_all(&result, |caps: &regex::Captures| {
            caps[1]
                .parse::<u32>()
                .ok()
                .and_then(char::from_u32)
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string();

    let hex_re = HEX.get_or_init(|| Regex::new(r"&#x([0-9A-Fa-f]+);").expect("valid regex"));
    result = hex_re
        .replace_all(&result, |caps: &regex::Captures| {
            u32::from_str_radix(&caps[1], 16)
                .ok()
                .and_then(char::from_u32)
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string();

    // Last, so "&amp;lt;" stays "&lt;"
    result.replace("&amp;", "&")
}

fn node_from_xml(e: &BytesStart) -> TreeNode {
    let mut attributes = HashMap::new();
    for a in e.attributes().filter_map(|a| a.ok()) {
        let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
        let value = decode_html_entities(&String::from_utf8_lossy(&a.value));

        let key = match key.as_str() {
            "content-desc" => attr::ACCESSIBILITY_TEXT.to_string(),
            "hint" => attr::HINT_TEXT.to_string(),
            _ => key,
        };
        attributes.insert(key, value);
    }
    TreeNode::new(attributes, Vec::new())
}

/// Build a tree from a uiautomator XML dump
///
/// The `<hierarchy>` element becomes an attribute-less root; every `<node>`
/// keeps its attributes, with `content-desc` and `hint` mapped onto the
/// shared `accessibilityText`/`hintText` keys.
pub fn parse_uiautomator_xml(xml: &str) -> Result<TreeNode> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<TreeNode> = vec![TreeNode::default()];
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .context("Failed to parse UI hierarchy XML")?
        {
            Event::Start(ref e) if e.name().as_ref() == b"node" => {
                stack.push(node_from_xml(e));
            }
            Event::Empty(ref e) if e.name().as_ref() == b"node" => {
                let node = node_from_xml(e);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::End(ref e) if e.name().as_ref() == b"node" => {
                if stack.len() > 1 {
                    if let Some(node) = stack.pop() {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(node);
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    // Unbalanced documents: fold whatever is still open into its parent
    while stack.len() > 1 {
        if let Some(node) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                parent.children.push(node);
            }
        }
    }

    stack
        .pop()
        .ok_or_else(|| anyhow::anyhow!("Empty UI hierarchy"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_html_entities_named() {
        assert_eq!(
            decode_html_entities("Devices &amp; Groups"),
            "Devices & Groups"
        );
        assert_eq!(decode_html_entities("&lt;tag&gt;"), "<tag>");
        assert_eq!(decode_html_entities("it&apos;s"), "it's");
    }

    #[test]
    fn test_decode_html_entities_numeric() {
        assert_eq!(decode_html_entities("Security&#10;Safe"), "Security\nSafe");
        assert_eq!(decode_html_entities("&#x41;&#x42;&#x43;"), "ABC");
    }

    #[test]
    fn test_bounds_from_string() {
        let b = Bounds::from_string("[0,10][100,210]").unwrap();
        assert_eq!(b, Bounds::new(0, 10, 100, 210));
        assert_eq!(b.center(), Point::new(50, 110));
        assert!(Bounds::from_string("garbage").is_none());
    }

    #[test]
    fn test_parse_uiautomator_xml_builds_tree() {
        let xml = r#"<?xml version='1.0'?>
<hierarchy rotation="0">
  <node class="FrameLayout" bounds="[0,0][1080,1920]">
    <node class="Button" text="OK" content-desc="Confirm &amp; close" bounds="[10,10][110,60]" clickable="true"/>
    <node class="EditText" hint="Email" bounds="[10,100][500,160]"/>
  </node>
</hierarchy>"#;
        let root = parse_uiautomator_xml(xml).unwrap();
        assert_eq!(root.children.len(), 1);

        let frame = &root.children[0];
        assert_eq!(frame.children.len(), 2);
        assert_eq!(frame.children[0].text(), Some("OK"));
        assert_eq!(
            frame.children[0].attribute(attr::ACCESSIBILITY_TEXT),
            Some("Confirm & close")
        );
        assert!(frame.children[0].is_clickable());
        assert_eq!(frame.children[1].attribute(attr::HINT_TEXT), Some("Email"));

        // root, frame, button, edit text
        assert_eq!(root.aggregate().len(), 4);
    }

    #[test]
    fn test_aggregate_is_preorder() {
        let leaf = |t: &str| {
            TreeNode::new(
                HashMap::from([(attr::TEXT.to_string(), t.to_string())]),
                vec![],
            )
        };
        let root = TreeNode::new(
            HashMap::new(),
            vec![
                TreeNode::new(HashMap::new(), vec![leaf("a"), leaf("b")]),
                leaf("c"),
            ],
        );
        let texts: Vec<_> = root.aggregate().iter().filter_map(|n| n.text()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }
}
