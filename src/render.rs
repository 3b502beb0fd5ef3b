//! Sankey flow diagram data built from a trace.
//!
//! Nodes are ordered by the shallowest layer an address appears at and
//! coloured per layer; links carry the converted amount. Inbound and outbound
//! layers are windowed independently so a viewer can expand each side of the
//! root on its own.

use crate::ethereum::canonical;
use crate::schemas::{ClassifiedEdge, FlowDirection};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// Per-layer colours, cycled when a trace is deeper than the palette
pub const LAYER_PALETTE: [&str; 6] = [
    "rgba(44,160,44,0.4)",
    "rgba(31,119,180,0.4)",
    "rgba(255,127,14,0.4)",
    "rgba(214,39,40,0.4)",
    "rgba(148,103,189,0.4)",
    "rgba(140,86,75,0.4)",
];

pub const UNKNOWN_NODE_COLOR: &str = "lightblue";
pub const UNKNOWN_LINK_COLOR: &str = "rgba(128,128,128,0.4)";

/// Palette entry of a layer; `None` for layer 0
pub fn layer_color(layer: u32) -> Option<&'static str> {
    if layer == 0 {
        return None;
    }
    Some(LAYER_PALETTE[(layer as usize - 1) % LAYER_PALETTE.len()])
}

/// Shallowest layer at which each address appears as sender or recipient
#[derive(Debug, Clone, Default)]
pub struct AddressDepthIndex {
    depths: HashMap<String, u32>,
    /// Canonical keys in first-seen order
    order: Vec<String>,
    /// Display form as first seen
    display: HashMap<String, String>,
}

impl AddressDepthIndex {
    pub fn from_edges(edges: &[ClassifiedEdge]) -> Self {
        let mut index = Self::default();
        for edge in edges {
            for address in [&edge.from, &edge.to] {
                index.observe(address, edge.layer);
            }
        }
        index
    }

    fn observe(&mut self, address: &str, layer: u32) {
        let key = canonical(address);
        if key.is_empty() {
            return;
        }
        match self.depths.get_mut(&key) {
            Some(depth) => *depth = (*depth).min(layer),
            None => {
                self.depths.insert(key.clone(), layer);
                self.display.insert(key.clone(), address.trim().to_string());
                self.order.push(key);
            }
        }
    }

    pub fn depth(&self, address: &str) -> Option<u32> {
        self.depths.get(&canonical(address)).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Display labels ordered by depth, then by first appearance
    pub fn labels_by_depth(&self) -> Vec<String> {
        let mut keys: Vec<&String> = self.order.iter().collect();
        // stable sort keeps first-appearance order within a depth
        keys.sort_by_key(|k| self.depths.get(*k).copied().unwrap_or(u32::MAX));
        keys.into_iter()
            .map(|k| self.display.get(k).cloned().unwrap_or_else(|| k.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SankeyNode {
    pub label: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SankeyLink {
    pub source: usize,
    pub target: usize,
    pub value: f64,
    pub color: String,
    pub layer: u32,
    pub direction: FlowDirection,
}

/// Plot-ready Sankey data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SankeyDiagram {
    pub title: String,
    pub in_layers: u32,
    pub out_layers: u32,
    pub max_layer: u32,
    pub nodes: Vec<SankeyNode>,
    pub links: Vec<SankeyLink>,
}

impl SankeyDiagram {
    /// Build the diagram showing inbound layers `1..=in_layers` and outbound
    /// layers `1..=out_layers`. Windows are clamped to the deepest layer.
    pub fn build(edges: &[ClassifiedEdge], in_layers: u32, out_layers: u32) -> Self {
        let max_layer = edges.iter().map(|e| e.layer).max().unwrap_or(0);
        let in_layers = in_layers.min(max_layer);
        let out_layers = out_layers.min(max_layer);

        let index = AddressDepthIndex::from_edges(edges);
        let labels = index.labels_by_depth();
        let positions: HashMap<String, usize> = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (canonical(label), i))
            .collect();

        let nodes = labels
            .iter()
            .map(|label| SankeyNode {
                label: label.clone(),
                color: index
                    .depth(label)
                    .and_then(layer_color)
                    .unwrap_or(UNKNOWN_NODE_COLOR)
                    .to_string(),
            })
            .collect();

        let mut links = Vec::new();
        for (direction, window) in [(FlowDirection::In, in_layers), (FlowDirection::Out, out_layers)] {
            for layer in 1..=window {
                for edge in edges
                    .iter()
                    .filter(|e| e.direction == direction && e.layer == layer)
                {
                    let (Some(&source), Some(&target)) = (
                        positions.get(&canonical(&edge.from)),
                        positions.get(&canonical(&edge.to)),
                    ) else {
                        continue;
                    };
                    links.push(SankeyLink {
                        source,
                        target,
                        value: edge.amount,
                        color: layer_color(edge.layer)
                            .unwrap_or(UNKNOWN_LINK_COLOR)
                            .to_string(),
                        layer: edge.layer,
                        direction,
                    });
                }
            }
        }

        Self {
            title: format!("Fund flow (in L{}, out L{})", in_layers, out_layers),
            in_layers,
            out_layers,
            max_layer,
            nodes,
            links,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(layer: u32, from: &str, to: &str, direction: FlowDirection, amount: f64) -> ClassifiedEdge {
        ClassifiedEdge {
            layer,
            origin: crate::schemas::layer_label(layer.saturating_sub(1)),
            address: String::new(),
            hash: format!("0x{}{}", from, to),
            block: "1".into(),
            timestamp_utc: "2024-01-01 00:00:00".into(),
            from: from.into(),
            to: to.into(),
            direction,
            amount,
            fee: 0.0,
            token_symbol: None,
        }
    }

    fn sample() -> Vec<ClassifiedEdge> {
        vec![
            edge(1, "0xX", "0xRoot", FlowDirection::In, 2.0),
            edge(2, "0xY", "0xX", FlowDirection::In, 1.0),
            edge(1, "0xroot", "0xB", FlowDirection::Out, 3.0),
            edge(2, "0xB", "0xC", FlowDirection::Out, 0.5),
            edge(3, "0xC", "0xD", FlowDirection::Out, 0.25),
        ]
    }

    #[test]
    fn test_depth_index_takes_minimum() {
        let index = AddressDepthIndex::from_edges(&sample());
        assert_eq!(index.depth("0xROOT"), Some(1));
        assert_eq!(index.depth("0xx"), Some(1));
        assert_eq!(index.depth("0xY"), Some(2));
        assert_eq!(index.depth("0xD"), Some(3));
        assert_eq!(index.depth("0xnone"), None);
        assert_eq!(index.len(), 6);
        assert_eq!(
            index.labels_by_depth(),
            vec!["0xX", "0xRoot", "0xB", "0xY", "0xC", "0xD"]
        );
    }

    #[test]
    fn test_layer_windows_select_links() {
        let diagram = SankeyDiagram::build(&sample(), 1, 2);
        assert_eq!(diagram.max_layer, 3);
        assert_eq!(diagram.nodes.len(), 6);

        let links: Vec<(FlowDirection, u32, f64)> = diagram
            .links
            .iter()
            .map(|l| (l.direction, l.layer, l.value))
            .collect();
        assert_eq!(
            links,
            vec![
                (FlowDirection::In, 1, 2.0),
                (FlowDirection::Out, 1, 3.0),
                (FlowDirection::Out, 2, 0.5)
            ]
        );
        // 0xX -> 0xRoot
        assert_eq!((diagram.links[0].source, diagram.links[0].target), (0, 1));
        assert_eq!(diagram.title, "Fund flow (in L1, out L2)");
    }

    #[test]
    fn test_windows_clamped_and_colours_cycle() {
        let diagram = SankeyDiagram::build(&sample(), 10, 0);
        assert_eq!(diagram.in_layers, 3);
        assert_eq!(diagram.out_layers, 0);
        assert!(diagram.links.iter().all(|l| l.direction == FlowDirection::In));

        assert_eq!(diagram.nodes[0].color, LAYER_PALETTE[0]);
        assert_eq!(layer_color(7), Some(LAYER_PALETTE[0]));
        assert_eq!(layer_color(0), None);
    }

    #[test]
    fn test_empty_trace() {
        let diagram = SankeyDiagram::build(&[], 3, 3);
        assert_eq!(diagram.max_layer, 0);
        assert!(diagram.nodes.is_empty());
        assert!(diagram.links.is_empty());

        let json = diagram.to_json().unwrap();
        assert!(json.contains("\"nodes\": []"));
    }
}
