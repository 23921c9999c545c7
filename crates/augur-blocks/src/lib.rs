//! Structured blocks inside streamed assistant text
//!
//! Assistant responses carry inline, sentinel-delimited JSON documents
//! (market cards, market lists, tables, relationship graphs) between
//! ordinary prose. [`BlockExtractor`] partitions a buffer into ordered
//! blocks and tells finished blocks apart from ones still arriving;
//! [`RenderDispatcher`] turns those blocks into a render plan.

mod delimiters;
mod extractor;
mod payload;
mod render;

pub use delimiters::{BlockDelimiters, BlockKind, Delimiter};
pub use extractor::{BlockContent, BlockExtractor, ContentBlock, StreamSplit};
pub use payload::{BlockError, GraphEdge, GraphNode, Market, MarketList, NetworkGraph, Table};
pub use render::{looks_like_markdown, RenderDispatcher, RenderNode, RenderPlan};
