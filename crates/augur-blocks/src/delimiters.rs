use serde::{Deserialize, Serialize};

/// The structured block kinds an assistant may embed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    MarketCard,
    MarketList,
    Table,
    NetworkGraph,
}

impl BlockKind {
    pub const ALL: [BlockKind; 4] = [
        BlockKind::MarketCard,
        BlockKind::MarketList,
        BlockKind::Table,
        BlockKind::NetworkGraph,
    ];
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockKind::MarketCard => write!(f, "market card"),
            BlockKind::MarketList => write!(f, "market list"),
            BlockKind::Table => write!(f, "table"),
            BlockKind::NetworkGraph => write!(f, "network graph"),
        }
    }
}

/// Opening and closing sentinel of one block kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiter {
    pub open: String,
    pub close: String,
}

impl Delimiter {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }
}

/// Sentinel vocabulary, one pair per [`BlockKind`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDelimiters {
    pub market_card: Delimiter,
    pub market_list: Delimiter,
    pub table: Delimiter,
    pub network_graph: Delimiter,
}

impl Default for BlockDelimiters {
    fn default() -> Self {
        Self {
            market_card: Delimiter::new("[MARKET_CARD]", "[/MARKET_CARD]"),
            market_list: Delimiter::new("[MARKET_LIST]", "[/MARKET_LIST]"),
            table: Delimiter::new("[TABLE]", "[/TABLE]"),
            network_graph: Delimiter::new("[NETWORK_GRAPH]", "[/NETWORK_GRAPH]"),
        }
    }
}

impl BlockDelimiters {
    pub fn get(&self, kind: BlockKind) -> &Delimiter {
        match kind {
            BlockKind::MarketCard => &self.market_card,
            BlockKind::MarketList => &self.market_list,
            BlockKind::Table => &self.table,
            BlockKind::NetworkGraph => &self.network_graph,
        }
    }

    /// Iterate kinds with their sentinels
    pub fn iter(&self) -> impl Iterator<Item = (BlockKind, &Delimiter)> {
        BlockKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }
}
