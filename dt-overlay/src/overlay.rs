// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! DMA node extraction and overlay rendering

use regex::Regex;

/// `label: dma@unit-address {`
const DMA_NODE_PATTERN: &str = r"((\w+):\s*dma@([0-9a-fA-F]+))\s*\{";
const COMMENT_PATTERN: &str = r"(?s)/\*.*?\*/";

/// Indentation of the node inside fragment@1's `__overlay__`.
const NODE_INDENT: &str = "            ";

#[derive(thiserror::Error, Debug)]
pub enum OverlayError {
    #[error("internal pattern error: {0}")]
    Pattern(#[source] regex::Error),
    #[error("no 'dma@' node found in the .dtsi")]
    NoDmaNode,
    #[error("DMA node '{label}' has unbalanced braces")]
    Unbalanced { label: String },
    #[error("bad unit address '{0}'")]
    BadUnitAddress(String),
}

/// The DMA node lifted out of the generated `.dtsi`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaNode {
    pub label: String,
    /// Physical base of the register block
    pub unit_address: u64,
    /// Node source from the label to the closing brace (and `;`, if any)
    pub text: String,
}

pub fn strip_comments(src: &str) -> Result<String, OverlayError> {
    let comments = Regex::new(COMMENT_PATTERN).map_err(OverlayError::Pattern)?;
    Ok(comments.replace_all(src, "").into_owned())
}

/// Finds the first labelled DMA node, ignoring whatever bus hierarchy
/// (`amba_pl` or `/`) the tool flow wrapped it in.
pub fn extract_dma_node(src: &str) -> Result<DmaNode, OverlayError> {
    let content = strip_comments(src)?;
    let pattern = Regex::new(DMA_NODE_PATTERN).map_err(OverlayError::Pattern)?;
    let caps = pattern.captures(&content).ok_or(OverlayError::NoDmaNode)?;

    let (whole, label, addr) = match (caps.get(0), caps.get(2), caps.get(3)) {
        (Some(whole), Some(label), Some(addr)) => (whole, label.as_str(), addr.as_str()),
        _ => return Err(OverlayError::NoDmaNode),
    };
    let unit_address = u64::from_str_radix(addr, 16)
        .map_err(|_| OverlayError::BadUnitAddress(addr.to_string()))?;

    let start = whole.start();
    let mut depth = 0usize;
    let mut end = None;
    for (i, c) in content[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    end = Some(start + i + 1);
                    break;
                }
            }
            _ => {}
        }
    }
    let end = end.ok_or_else(|| OverlayError::Unbalanced {
        label: label.to_string(),
    })?;

    let mut text = content[start..end].to_string();
    if content[end..].starts_with(';') {
        text.push(';');
    }

    Ok(DmaNode {
        label: label.to_string(),
        unit_address,
        text,
    })
}

/// Renders the two-fragment overlay: bitstream load into `/fpga-region`
/// and the DMA node under `/axi`.
pub fn render(firmware: &str, node: &DmaNode) -> String {
    let body = node
        .text
        .lines()
        .map(|line| format!("{}{}", NODE_INDENT, line))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"/dts-v1/;
/plugin/;

/ {{
    /* Fragment 0: load the bitstream */
    fragment@0 {{
        target-path = "/fpga-region";
        __overlay__ {{
            firmware-name = "{firmware}";
        }};
    }};

    /* Fragment 1: hardware nodes (AXI DMA) */
    fragment@1 {{
        target-path = "/axi";
        __overlay__ {{
            #address-cells = <2>;
            #size-cells = <2>;

{body}
        }};
    }};
}};
"#
    )
}
