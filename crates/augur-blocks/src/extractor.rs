//! Structured-block extraction
//!
//! Partitions a text buffer into prose and sentinel-delimited structured
//! blocks, and answers the two questions a streaming renderer needs: is a
//! block still arriving, and which prefix of the buffer is safe to render.

use serde::Serialize;
use tracing::{debug, warn};

use crate::delimiters::{BlockDelimiters, BlockKind};
use crate::payload::{
    decode_graph, decode_market, decode_market_list, decode_table, BlockError, Market,
    MarketList, NetworkGraph, Table,
};

/// Content of one parsed block
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BlockContent {
    Text(String),
    MarketCard(Market),
    MarketList(MarketList),
    Table(Table),
    NetworkGraph(NetworkGraph),
}

impl BlockContent {
    fn decode(kind: BlockKind, raw: &str) -> Result<Self, BlockError> {
        Ok(match kind {
            BlockKind::MarketCard => BlockContent::MarketCard(decode_market(raw)?),
            BlockKind::MarketList => BlockContent::MarketList(decode_market_list(raw)?),
            BlockKind::Table => BlockContent::Table(decode_table(raw)?),
            BlockKind::NetworkGraph => BlockContent::NetworkGraph(decode_graph(raw)?),
        })
    }

    /// The structured kind, `None` for prose
    pub fn kind(&self) -> Option<BlockKind> {
        match self {
            BlockContent::Text(_) => None,
            BlockContent::MarketCard(_) => Some(BlockKind::MarketCard),
            BlockContent::MarketList(_) => Some(BlockKind::MarketList),
            BlockContent::Table(_) => Some(BlockKind::Table),
            BlockContent::NetworkGraph(_) => Some(BlockKind::NetworkGraph),
        }
    }
}

/// A parsed block.
///
/// `id` is unique within one [`BlockExtractor::extract`] call and assigned
/// in document order, so the same input always yields the same IDs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentBlock {
    pub id: String,
    #[serde(flatten)]
    pub content: BlockContent,
}

/// Buffer split at the right-most closing sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSplit<'a> {
    /// Prefix up to and including the last closing sentinel
    pub complete: &'a str,
    /// Remainder, to be re-examined when more text arrives
    pub pending: &'a str,
}

/// A decoded sentinel match
struct Span {
    start: usize,
    end: usize,
    content: BlockContent,
}

#[derive(Debug, Clone, Default)]
pub struct BlockExtractor {
    delimiters: BlockDelimiters,
}

impl BlockExtractor {
    pub fn new(delimiters: BlockDelimiters) -> Self {
        Self { delimiters }
    }

    pub fn delimiters(&self) -> &BlockDelimiters {
        &self.delimiters
    }

    /// Partition `text` into prose and structured blocks, in document order.
    ///
    /// Prose between blocks is trimmed and omitted when empty. A block whose
    /// payload does not decode is logged and left in the surrounding prose.
    /// Without any structured block the whole input is returned untouched
    /// as a single text block.
    pub fn extract(&self, text: &str) -> Vec<ContentBlock> {
        let mut spans = Vec::new();
        for kind in BlockKind::ALL {
            self.collect_spans(kind, text, &mut spans);
        }
        spans.sort_by_key(|span| span.start);

        // Spans of different kinds may interleave on adversarial input;
        // keep the earliest and drop anything overlapping it.
        let mut accepted: Vec<Span> = Vec::with_capacity(spans.len());
        let mut cursor = 0;
        for span in spans {
            if span.start < cursor {
                debug!(start = span.start, "Skipping structured block overlapping an earlier one");
                continue;
            }
            cursor = span.end;
            accepted.push(span);
        }

        let mut blocks = Vec::with_capacity(accepted.len() * 2 + 1);
        let mut next_id = 0usize;
        let mut push = |blocks: &mut Vec<ContentBlock>, content: BlockContent| {
            blocks.push(ContentBlock {
                id: format!("block-{}", next_id),
                content,
            });
            next_id += 1;
        };

        if accepted.is_empty() {
            push(&mut blocks, BlockContent::Text(text.to_string()));
            return blocks;
        }

        let mut last = 0;
        for span in accepted {
            let before = text[last..span.start].trim();
            if !before.is_empty() {
                push(&mut blocks, BlockContent::Text(before.to_string()));
            }
            push(&mut blocks, span.content);
            last = span.end;
        }
        let trailing = text[last..].trim();
        if !trailing.is_empty() {
            push(&mut blocks, BlockContent::Text(trailing.to_string()));
        }
        blocks
    }

    /// Non-greedy, non-overlapping, left-to-right scan for one kind.
    fn collect_spans(&self, kind: BlockKind, text: &str, spans: &mut Vec<Span>) {
        let delimiter = self.delimiters.get(kind);
        if delimiter.open.is_empty() || delimiter.close.is_empty() {
            return;
        }

        let mut from = 0;
        while let Some(open_at) = text[from..].find(&delimiter.open).map(|i| from + i) {
            let inner_start = open_at + delimiter.open.len();
            let Some(close_at) = text[inner_start..]
                .find(&delimiter.close)
                .map(|i| inner_start + i)
            else {
                break;
            };
            let end = close_at + delimiter.close.len();

            match BlockContent::decode(kind, &text[inner_start..close_at]) {
                Ok(content) => spans.push(Span {
                    start: open_at,
                    end,
                    content,
                }),
                Err(e) => warn!(%kind, error = %e, "Dropping malformed structured block"),
            }
            from = end;
        }
    }

    /// Whether any kind has more opening than closing sentinels.
    ///
    /// Counts sentinels per kind only; it does not check nesting or which
    /// kind closes which block.
    pub fn has_incomplete_blocks(&self, text: &str) -> bool {
        self.incomplete_kinds(text).next().is_some()
    }

    /// Kinds whose opening sentinels outnumber their closing ones
    pub fn incomplete_kinds<'a>(&'a self, text: &'a str) -> impl Iterator<Item = BlockKind> + 'a {
        self.delimiters.iter().filter_map(move |(kind, delimiter)| {
            if delimiter.open.is_empty() || delimiter.close.is_empty() {
                return None;
            }
            let opens = text.matches(delimiter.open.as_str()).count();
            let closes = text.matches(delimiter.close.as_str()).count();
            (opens > closes).then_some(kind)
        })
    }

    /// Split at the right-most closing sentinel of any kind.
    ///
    /// Everything up to and including that sentinel is safe to extract now.
    /// Without any closing sentinel the whole buffer is pending.
    pub fn split_for_streaming<'a>(&self, text: &'a str) -> StreamSplit<'a> {
        let boundary = self
            .delimiters
            .iter()
            .filter(|(_, delimiter)| !delimiter.close.is_empty())
            .filter_map(|(_, delimiter)| {
                text.rfind(delimiter.close.as_str())
                    .map(|at| at + delimiter.close.len())
            })
            .max()
            .unwrap_or(0);

        let (complete, pending) = text.split_at(boundary);
        StreamSplit { complete, pending }
    }

    /// Earliest opening sentinel in `text`, with its kind
    pub fn first_opening(&self, text: &str) -> Option<(usize, BlockKind)> {
        self.delimiters
            .iter()
            .filter(|(_, delimiter)| !delimiter.open.is_empty())
            .filter_map(|(kind, delimiter)| text.find(delimiter.open.as_str()).map(|at| (at, kind)))
            .min_by_key(|(at, _)| *at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD: &str = r#"[MARKET_CARD]{"id":"m1","question":"Will BTC close above 100k?","probability":0.62}[/MARKET_CARD]"#;
    const TABLE: &str = r#"[TABLE]{"headers":["Market","Yes"],"rows":[["Rain",0.4]]}[/TABLE]"#;

    fn extractor() -> BlockExtractor {
        BlockExtractor::default()
    }

    fn kinds(blocks: &[ContentBlock]) -> Vec<Option<BlockKind>> {
        blocks.iter().map(|b| b.content.kind()).collect()
    }

    #[test]
    fn test_plain_text_is_returned_unchanged() {
        for input in ["", "  hello world  ", "## Heading\n\n- item\n", "[TABLE without close"] {
            let blocks = extractor().extract(input);
            assert_eq!(blocks.len(), 1);
            assert_eq!(blocks[0].content, BlockContent::Text(input.to_string()));
            assert_eq!(blocks[0].id, "block-0");
        }
    }

    #[test]
    fn test_alternates_text_and_blocks_in_order() {
        let input = format!("Here is one:\n{}\nand a table:\n{}\nThat's all.", CARD, TABLE);
        let blocks = extractor().extract(&input);

        assert_eq!(
            kinds(&blocks),
            vec![
                None,
                Some(BlockKind::MarketCard),
                None,
                Some(BlockKind::Table),
                None
            ]
        );
        assert_eq!(blocks[0].content, BlockContent::Text("Here is one:".to_string()));
        assert_eq!(blocks[2].content, BlockContent::Text("and a table:".to_string()));
        assert_eq!(blocks[4].content, BlockContent::Text("That's all.".to_string()));
        let ids: Vec<&str> = blocks.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["block-0", "block-1", "block-2", "block-3", "block-4"]);
    }

    #[test]
    fn test_leading_and_trailing_blocks_have_no_empty_text() {
        let input = format!("{}\n\n{}", CARD, TABLE);
        let blocks = extractor().extract(&input);
        assert_eq!(
            kinds(&blocks),
            vec![Some(BlockKind::MarketCard), Some(BlockKind::Table)]
        );
    }

    #[test]
    fn test_malformed_payload_reverts_to_text() {
        let input = format!("before [TABLE]{{not json}}[/TABLE] after {}", CARD);
        let blocks = extractor().extract(&input);
        assert_eq!(kinds(&blocks), vec![None, Some(BlockKind::MarketCard)]);
        assert_eq!(
            blocks[0].content,
            BlockContent::Text("before [TABLE]{not json}[/TABLE] after".to_string())
        );
    }

    #[test]
    fn test_non_greedy_matching() {
        let second = CARD.replace("m1", "m2");
        let input = format!("{} middle {}", CARD, second);
        let blocks = extractor().extract(&input);
        assert_eq!(blocks.len(), 3);
        match (&blocks[0].content, &blocks[2].content) {
            (BlockContent::MarketCard(a), BlockContent::MarketCard(b)) => {
                assert_eq!(a.id, "m1");
                assert_eq!(b.id, "m2");
            }
            other => panic!("unexpected blocks: {:?}", other),
        }
    }

    #[test]
    fn test_interleaved_kinds_never_overlap() {
        let input = r#"[TABLE]{"headers":["a"],"rows":[]}[MARKET_CARD]{"id":"x","question":"q"}[/TABLE][/MARKET_CARD]"#;
        // Each payload swallows the other kind's sentinel and fails to decode.
        let blocks = extractor().extract(input);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].content, BlockContent::Text(input.to_string()));

        let input = format!("{}{}", TABLE, CARD);
        let blocks = extractor().extract(&input);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let input = format!("a {} b {} c", CARD, TABLE);
        assert_eq!(extractor().extract(&input), extractor().extract(&input));
    }

    #[test]
    fn test_incomplete_detection() {
        let ex = extractor();
        assert!(!ex.has_incomplete_blocks("plain prose"));
        assert!(!ex.has_incomplete_blocks(CARD));
        assert!(ex.has_incomplete_blocks(r#"Look: [MARKET_CARD]{"id":"m1""#));

        let partial = format!("{} then [TABLE]{{\"headers\":", CARD);
        assert_eq!(ex.incomplete_kinds(&partial).collect::<Vec<_>>(), vec![BlockKind::Table]);
    }

    #[test]
    fn test_split_without_closing_sentinel_is_all_pending() {
        let buffer = r#"Intro [MARKET_LIST]{"markets":["#;
        let split = extractor().split_for_streaming(buffer);
        assert_eq!(split.complete, "");
        assert_eq!(split.pending, buffer);
    }

    #[test]
    fn test_split_at_last_closing_sentinel() {
        let buffer = format!("Intro {} more [TABLE]{{\"head", CARD);
        let split = extractor().split_for_streaming(&buffer);
        assert_eq!(split.complete, format!("Intro {}", CARD));
        assert_eq!(split.pending, " more [TABLE]{\"head");
    }

    #[test]
    fn test_finalized_prefix_is_stable_as_text_grows() {
        let ex = extractor();
        let mut buffer = format!("Intro {} more [TABLE]", CARD);
        let first = ex.extract(ex.split_for_streaming(&buffer).complete);

        buffer.push_str(r#"{"headers":["Market","Yes"],"rows":[["Rain",0.4]]}[/TABLE] done"#);
        let second = ex.extract(&buffer);
        assert_eq!(&second[..first.len()], &first[..]);
    }

    #[test]
    fn test_custom_delimiters() {
        let mut delimiters = BlockDelimiters::default();
        delimiters.table = crate::Delimiter::new("<table>", "</table>");
        let ex = BlockExtractor::new(delimiters);
        let blocks = ex.extract(r#"x <table>{"headers":["a"],"rows":[[1]]}</table>"#);
        assert_eq!(kinds(&blocks), vec![None, Some(BlockKind::Table)]);
        assert_eq!(ex.first_opening("ab <table>"), Some((3, BlockKind::Table)));
    }
}
