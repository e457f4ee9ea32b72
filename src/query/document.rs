// src/query/document.rs

use std::collections::HashMap;

use ego_tree::{NodeId, NodeRef};
use scraper::{Html, Node};

/// A parsed HTML document with a precomputed document order.
pub struct Document {
    html: Html,
    order: HashMap<NodeId, usize>,
}

impl Document {
    /// Parse markup leniently. Malformed HTML still yields a tree.
    pub fn parse(markup: &str) -> Self {
        let html = Html::parse_document(markup);
        let order = html
            .tree
            .root()
            .descendants()
            .enumerate()
            .map(|(index, node)| (node.id(), index))
            .collect();
        Self { html, order }
    }

    /// Parse a response body, rejecting content that holds no markup at all.
    pub fn try_parse(markup: &str) -> Result<Self, String> {
        if markup.trim().is_empty() {
            return Err("response body is empty".to_string());
        }
        if !markup.contains('<') {
            return Err("response body contains no markup".to_string());
        }
        Ok(Self::parse(markup))
    }

    pub(crate) fn root(&self) -> NodeRef<'_, Node> {
        self.html.tree.root()
    }

    /// Position of a node in document order.
    pub(crate) fn position(&self, id: NodeId) -> usize {
        self.order.get(&id).copied().unwrap_or(usize::MAX)
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_order_is_preorder() {
        let doc = Document::parse("<div><p>a</p><p>b</p></div>");
        let ids: Vec<_> = doc.root().descendants().map(|n| n.id()).collect();
        for pair in ids.windows(2) {
            assert!(doc.position(pair[0]) < doc.position(pair[1]));
        }
        assert_eq!(doc.node_count(), ids.len());
    }

    #[test]
    fn test_try_parse_rejects_non_markup() {
        assert!(Document::try_parse("").is_err());
        assert!(Document::try_parse("   \n ").is_err());
        assert!(Document::try_parse("just some words").is_err());
        assert!(Document::try_parse("<p>fine</p>").is_ok());
    }

    #[test]
    fn test_malformed_markup_still_parses() {
        let doc = Document::try_parse("<div><p>unclosed<span>text</div>").unwrap();
        assert!(doc.node_count() > 3);
    }
}
