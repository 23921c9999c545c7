//! Render planning
//!
//! Maps extracted blocks to presentation nodes. Holds no protocol state,
//! so the same prefix can be re-planned on every chunk and yields the same
//! nodes for blocks that were already complete.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::delimiters::BlockKind;
use crate::extractor::{BlockContent, BlockExtractor, ContentBlock};
use crate::payload::{Market, MarketList, NetworkGraph, Table};

/// Line-start headings, emphasis, fenced code, links, or list bullets.
static MARKDOWN_HINTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?m)^#{1,6}\s",
        r"|\*\*[^*\n]+\*\*",
        r"|__[^_\n]+__",
        r"|\*[^*\s][^*\n]*\*",
        r"|```",
        r"|\[[^\]\n]+\]\([^)\s]+\)",
        r"|^\s*(?:[-*+]|\d+\.)\s+\S",
    ))
    .expect("markdown hint pattern is valid")
});

/// Best-effort check for markdown formatting.
///
/// Not authoritative: a miss renders the text as plain prose.
pub fn looks_like_markdown(text: &str) -> bool {
    MARKDOWN_HINTS.is_match(text)
}

/// One presentation unit
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "renderer", rename_all = "snake_case")]
pub enum RenderNode {
    Markdown { id: String, source: String },
    PlainText { id: String, text: String },
    MarketCard { id: String, market: Market },
    MarketList { id: String, list: MarketList },
    Table { id: String, table: Table },
    NetworkGraph { id: String, graph: NetworkGraph },
    /// A structured block whose closing sentinel has not arrived yet
    Loading { kind: BlockKind },
}

impl RenderNode {
    fn prose(id: String, text: String) -> Self {
        if looks_like_markdown(&text) {
            RenderNode::Markdown { id, source: text }
        } else {
            RenderNode::PlainText { id, text }
        }
    }
}

impl From<ContentBlock> for RenderNode {
    fn from(block: ContentBlock) -> Self {
        let id = block.id;
        match block.content {
            BlockContent::Text(text) => RenderNode::prose(id, text),
            BlockContent::MarketCard(market) => RenderNode::MarketCard { id, market },
            BlockContent::MarketList(list) => RenderNode::MarketList { id, list },
            BlockContent::Table(table) => RenderNode::Table { id, table },
            BlockContent::NetworkGraph(graph) => RenderNode::NetworkGraph { id, graph },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderPlan {
    pub nodes: Vec<RenderNode>,
}

impl RenderPlan {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether a structured block is still arriving
    pub fn is_loading(&self) -> bool {
        self.nodes
            .iter()
            .any(|node| matches!(node, RenderNode::Loading { .. }))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenderDispatcher {
    extractor: BlockExtractor,
}

impl RenderDispatcher {
    pub fn new(extractor: BlockExtractor) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &BlockExtractor {
        &self.extractor
    }

    /// Plan a finished message
    pub fn plan(&self, text: &str) -> RenderPlan {
        RenderPlan {
            nodes: self
                .extractor
                .extract(text)
                .into_iter()
                .map(RenderNode::from)
                .collect(),
        }
    }

    /// Plan a message that is still streaming.
    ///
    /// While a block is open, only the prefix up to the last closing
    /// sentinel is extracted. Prose before the next opening sentinel is
    /// shown as is, and the open block becomes a [`RenderNode::Loading`].
    pub fn plan_streaming(&self, buffer: &str) -> RenderPlan {
        if !self.extractor.has_incomplete_blocks(buffer) {
            return self.plan(buffer);
        }

        let split = self.extractor.split_for_streaming(buffer);
        let mut plan = if split.complete.trim().is_empty() {
            RenderPlan::default()
        } else {
            self.plan(split.complete)
        };

        let (prose, loading) = match self.extractor.first_opening(split.pending) {
            Some((at, kind)) => (&split.pending[..at], Some(kind)),
            None => (split.pending, None),
        };
        let prose = prose.trim();
        if !prose.is_empty() {
            plan.nodes
                .push(RenderNode::prose("pending".to_string(), prose.to_string()));
        }
        if let Some(kind) = loading {
            plan.nodes.push(RenderNode::Loading { kind });
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD: &str = r#"[MARKET_CARD]{"id":"m1","question":"Will it snow?","probability":0.1}[/MARKET_CARD]"#;

    #[test]
    fn test_markdown_heuristics() {
        assert!(looks_like_markdown("## Top markets"));
        assert!(looks_like_markdown("This is **important**"));
        assert!(looks_like_markdown("see [docs](https://example.com)"));
        assert!(looks_like_markdown("Options:\n- yes\n- no"));
        assert!(looks_like_markdown("1. first\n2. second"));
        assert!(looks_like_markdown("```rust\nfn main() {}\n```"));

        assert!(!looks_like_markdown("Probability is 62% today."));
        assert!(!looks_like_markdown("2 * 3 * 4 = 24"));
        assert!(!looks_like_markdown("a#b is not a heading"));
    }

    #[test]
    fn test_plan_maps_blocks_to_renderers() {
        let plan = RenderDispatcher::default().plan(&format!("**Snow** watch:\n{}\nthanks", CARD));
        assert_eq!(plan.nodes.len(), 3);
        assert!(matches!(plan.nodes[0], RenderNode::Markdown { .. }));
        assert!(matches!(&plan.nodes[1], RenderNode::MarketCard { market, .. } if market.id == "m1"));
        assert!(matches!(&plan.nodes[2], RenderNode::PlainText { text, .. } if text == "thanks"));
    }

    #[test]
    fn test_streaming_plan_shows_loading_block() {
        let dispatcher = RenderDispatcher::default();
        let buffer = format!("Intro\n{}\nNow a table: [TABLE]{{\"headers\":[", CARD);
        let plan = dispatcher.plan_streaming(&buffer);

        assert!(plan.is_loading());
        assert!(matches!(plan.nodes[0], RenderNode::PlainText { .. }));
        assert!(matches!(plan.nodes[1], RenderNode::MarketCard { .. }));
        assert!(matches!(&plan.nodes[2], RenderNode::PlainText { text, .. } if text == "Now a table:"));
        assert_eq!(plan.nodes[3], RenderNode::Loading { kind: BlockKind::Table });
    }

    #[test]
    fn test_streaming_plan_is_stable_for_finished_blocks() {
        let dispatcher = RenderDispatcher::default();
        let mut buffer = format!("Intro\n{}\n[MARKET_LIST]{{\"markets\":[", CARD);
        let early = dispatcher.plan_streaming(&buffer);

        buffer.push_str(r#"{"id":"m2","question":"Q2"}]}[/MARKET_LIST]"#);
        let done = dispatcher.plan_streaming(&buffer);

        assert!(!done.is_loading());
        assert_eq!(&done.nodes[..2], &early.nodes[..2]);
        assert!(matches!(&done.nodes[2], RenderNode::MarketList { list, .. } if list.markets.len() == 1));
    }

    #[test]
    fn test_streaming_plan_without_sentinels_matches_final_plan() {
        let dispatcher = RenderDispatcher::default();
        let text = "Just prose, nothing structured.";
        assert_eq!(dispatcher.plan_streaming(text), dispatcher.plan(text));
    }
}
