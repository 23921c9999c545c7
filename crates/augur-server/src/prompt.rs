//! System prompt and market context

use serde_json::Value;

/// Tells the model how to embed structured blocks in its reply
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are Augur, an analyst for prediction markets.
Answer in Markdown. When you show market data, embed it as a structured block: the opening tag, one JSON document, the closing tag.

- A single market: [MARKET_CARD]{"id":"...","question":"...","probability":0.42,"volume":1200,"endDate":"2025-01-31"}[/MARKET_CARD]
- Several markets: [MARKET_LIST]{"title":"...","markets":[...]}[/MARKET_LIST]
- A comparison: [TABLE]{"title":"...","headers":["Market","Odds"],"rows":[["...",0.42]]}[/TABLE]
- Related markets or entities: [NETWORK_GRAPH]{"nodes":[{"id":"a","label":"..."}],"edges":[{"source":"a","target":"b"}]}[/NETWORK_GRAPH]

Every row of a table has exactly one cell per header. Never invent markets that are not in the provided data."#;

/// Describe market search results for the system prompt
pub fn market_context(markets: &Value) -> String {
    let count = match markets {
        Value::Array(items) => items.len(),
        Value::Object(map) => map
            .get("markets")
            .and_then(Value::as_array)
            .map_or(1, Vec::len),
        _ => 0,
    };
    format!(
        "Market data relevant to the user's message ({} result{}):\n{}",
        count,
        if count == 1 { "" } else { "s" },
        markets
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_market_context_counts_results() {
        let context = market_context(&json!([{ "id": "a" }, { "id": "b" }]));
        assert!(context.starts_with("Market data relevant to the user's message (2 results):\n"));
        assert!(context.ends_with(r#"[{"id":"a"},{"id":"b"}]"#));
    }

    #[test]
    fn test_market_context_wrapped_list() {
        let context = market_context(&json!({ "markets": [{ "id": "a" }] }));
        assert!(context.contains("(1 result)"));
    }

    #[test]
    fn test_prompt_names_every_sentinel() {
        for tag in ["MARKET_CARD", "MARKET_LIST", "TABLE", "NETWORK_GRAPH"] {
            assert!(DEFAULT_SYSTEM_PROMPT.contains(&format!("[{}]", tag)));
            assert!(DEFAULT_SYSTEM_PROMPT.contains(&format!("[/{}]", tag)));
        }
    }
}
