//! Payload shapes of the structured block kinds

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::delimiters::BlockKind;

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("Invalid {kind} payload: {source}")]
    Json {
        kind: BlockKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid {kind} payload: {detail}")]
    Shape { kind: BlockKind, detail: String },
}

impl BlockError {
    fn shape(kind: BlockKind, detail: impl Into<String>) -> Self {
        Self::Shape {
            kind,
            detail: detail.into(),
        }
    }
}

/// A prediction market entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub id: String,
    pub question: String,
    /// Implied probability of the "yes" outcome, `0.0..=1.0`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Market {
    fn validate(&self, kind: BlockKind) -> Result<(), BlockError> {
        if self.id.trim().is_empty() {
            return Err(BlockError::shape(kind, "market id is empty"));
        }
        if let Some(p) = self.probability {
            if !(0.0..=1.0).contains(&p) {
                return Err(BlockError::shape(
                    kind,
                    format!("probability {} outside 0..1 for market {}", p, self.id),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub markets: Vec<Market>,
}

/// Tabular dataset; every row has one cell per header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// Relationship graph between markets or topics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkGraph {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

fn parse<T: serde::de::DeserializeOwned>(kind: BlockKind, raw: &str) -> Result<T, BlockError> {
    serde_json::from_str(raw.trim()).map_err(|source| BlockError::Json { kind, source })
}

pub(crate) fn decode_market(raw: &str) -> Result<Market, BlockError> {
    let kind = BlockKind::MarketCard;
    let market: Market = parse(kind, raw)?;
    market.validate(kind)?;
    Ok(market)
}

pub(crate) fn decode_market_list(raw: &str) -> Result<MarketList, BlockError> {
    let kind = BlockKind::MarketList;
    let list: MarketList = parse(kind, raw)?;
    for market in &list.markets {
        market.validate(kind)?;
    }
    Ok(list)
}

pub(crate) fn decode_table(raw: &str) -> Result<Table, BlockError> {
    let kind = BlockKind::Table;
    let table: Table = parse(kind, raw)?;
    if table.headers.is_empty() {
        return Err(BlockError::shape(kind, "table has no headers"));
    }
    if let Some((index, row)) = table
        .rows
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != table.headers.len())
    {
        return Err(BlockError::shape(
            kind,
            format!(
                "row {} has {} cells, expected {}",
                index,
                row.len(),
                table.headers.len()
            ),
        ));
    }
    Ok(table)
}

pub(crate) fn decode_graph(raw: &str) -> Result<NetworkGraph, BlockError> {
    let kind = BlockKind::NetworkGraph;
    let graph: NetworkGraph = parse(kind, raw)?;
    let ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    for edge in &graph.edges {
        for end in [&edge.source, &edge.target] {
            if !ids.contains(end.as_str()) {
                return Err(BlockError::shape(
                    kind,
                    format!("edge references unknown node {}", end),
                ));
            }
        }
    }
    Ok(graph)
}
