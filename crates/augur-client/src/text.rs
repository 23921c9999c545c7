//! Plain-text rendering of render plans for terminals

use augur_blocks::{Market, RenderNode, RenderPlan};
use serde_json::Value;
use std::fmt::Write;

/// Render a plan as terminal text, one node per paragraph
pub fn render_plan(plan: &RenderPlan) -> String {
    plan.nodes
        .iter()
        .map(render_node)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render a streaming plan without its loading placeholders.
///
/// Output only grows while a reply streams, so a terminal can print the
/// new suffix each time.
pub fn render_settled(plan: &RenderPlan) -> String {
    plan.nodes
        .iter()
        .filter(|node| !matches!(node, RenderNode::Loading { .. }))
        .map(render_node)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Byte length of the longest common prefix of `a` and `b`
pub fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .take_while(|((_, x), y)| x == y)
        .last()
        .map_or(0, |((i, c), _)| i + c.len_utf8())
}

fn render_node(node: &RenderNode) -> String {
    match node {
        RenderNode::Markdown { source, .. } => source.clone(),
        RenderNode::PlainText { text, .. } => text.clone(),
        RenderNode::MarketCard { market, .. } => market_line(market),
        RenderNode::MarketList { list, .. } => {
            let mut out = String::new();
            if let Some(title) = &list.title {
                let _ = writeln!(out, "{}", title);
            }
            let lines: Vec<String> = list
                .markets
                .iter()
                .map(|m| format!("  {}", market_line(m)))
                .collect();
            out.push_str(&lines.join("\n"));
            out
        }
        RenderNode::Table { table, .. } => {
            let mut out = String::new();
            if let Some(title) = &table.title {
                let _ = writeln!(out, "{}", title);
            }
            let header = table.headers.join(" | ");
            let _ = writeln!(out, "{}", header);
            out.push_str(&"-".repeat(header.chars().count()));
            for row in &table.rows {
                let cells: Vec<String> = row.iter().map(cell).collect();
                let _ = write!(out, "\n{}", cells.join(" | "));
            }
            out
        }
        RenderNode::NetworkGraph { graph, .. } => {
            let mut out = String::new();
            if let Some(title) = &graph.title {
                let _ = writeln!(out, "{}", title);
            }
            let _ = write!(out, "{} nodes, {} edges", graph.nodes.len(), graph.edges.len());
            for edge in &graph.edges {
                let _ = write!(out, "\n  {} -> {}", edge.source, edge.target);
                if let Some(label) = &edge.label {
                    let _ = write!(out, " ({})", label);
                }
            }
            out
        }
        RenderNode::Loading { kind } => format!("[loading {}...]", kind),
    }
}

fn market_line(market: &Market) -> String {
    let mut line = format!("* {}", market.question);
    if let Some(p) = market.probability {
        let _ = write!(line, "  {:.0}%", p * 100.0);
    }
    if let Some(volume) = market.volume {
        let _ = write!(line, "  vol {:.0}", volume);
    }
    if let Some(end) = &market.end_date {
        let _ = write!(line, "  ends {}", end);
    }
    line
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use augur_blocks::RenderDispatcher;

    #[test]
    fn test_render_card_and_table() {
        let text = concat!(
            "Markets:\n",
            r#"[MARKET_CARD]{"id":"m1","question":"Rain?","probability":0.25}[/MARKET_CARD]"#,
            r#"[TABLE]{"headers":["name","odds"],"rows":[["Rain",0.25],["Snow",null]]}[/TABLE]"#,
        );
        let rendered = render_plan(&RenderDispatcher::default().plan(text));
        assert_eq!(
            rendered,
            "Markets:\n\n* Rain?  25%\n\nname | odds\n-----------\nRain | 0.25\nSnow | "
        );
    }

    #[test]
    fn test_settled_render_hides_sentinels_while_streaming() {
        let dispatcher = RenderDispatcher::default();
        let partial = dispatcher.plan_streaming("Top pick:\n[MARKET_CARD]{\"id\":\"m1\",");
        let settled = render_settled(&partial);
        assert!(!settled.contains("MARKET_CARD"));
        assert!(!settled.contains("loading"));

        let done = dispatcher.plan_streaming(
            "Top pick:\n[MARKET_CARD]{\"id\":\"m1\",\"question\":\"Rain?\"}[/MARKET_CARD]",
        );
        let full = render_settled(&done);
        assert!(full.ends_with("* Rain?"));
        assert_eq!(common_prefix_len(&settled, &full), settled.len());
    }

    #[test]
    fn test_common_prefix_len() {
        assert_eq!(common_prefix_len("abc", "abd"), 2);
        assert_eq!(common_prefix_len("", "abc"), 0);
        assert_eq!(common_prefix_len("héllo", "héllo!"), "héllo".len());
        assert_eq!(common_prefix_len("xyz", "abc"), 0);
    }

    #[test]
    fn test_render_loading_placeholder() {
        let plan = RenderDispatcher::default().plan_streaming("Graph: [NETWORK_GRAPH]{\"nodes\":");
        assert!(render_plan(&plan).ends_with("[loading network graph...]"));
    }
}
