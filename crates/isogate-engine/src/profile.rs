//! CPU profile model and its JSON document.
//!
//! Engines report profiles as a call tree with one-based source positions.
//! [`CpuProfile::to_json`] renders the tree in the DevTools `.cpuprofile`
//! layout: nodes breadth-first from the root, zero-based positions, and
//! sample deltas relative to the profile start.

use serde::Serialize;
use std::collections::VecDeque;

/// Per-line hit count inside a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTick {
    pub line: i32,
    pub hit_count: u32,
}

/// A node in the top-down call tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuProfileNode {
    pub id: u32,
    pub function_name: String,
    pub script_id: i32,
    /// Script resource name
    pub url: String,
    /// One-based line number
    pub line_number: i32,
    /// One-based column number
    pub column_number: i32,
    pub hit_count: u32,
    /// Why the function was deoptimized, if it was
    pub bailout_reason: Option<String>,
    pub line_ticks: Vec<LineTick>,
    pub children: Vec<CpuProfileNode>,
}

/// A recorded sample: the node on top of the stack and when it was seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuProfileSample {
    pub node_id: u32,
    /// Microseconds
    pub timestamp: i64,
}

/// A completed CPU profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuProfile {
    pub title: String,
    pub root: CpuProfileNode,
    /// Microseconds
    pub start_time: i64,
    /// Microseconds
    pub end_time: i64,
    pub samples: Vec<CpuProfileSample>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileDocument<'a> {
    nodes: Vec<NodeDocument<'a>>,
    start_time: i64,
    end_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    samples: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_deltas: Option<Vec<i64>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeDocument<'a> {
    id: u32,
    call_frame: CallFrame<'a>,
    hit_count: u32,
    children: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deopt_reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position_ticks: Option<Vec<PositionTick>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CallFrame<'a> {
    function_name: &'a str,
    script_id: String,
    url: &'a str,
    line_number: i32,
    column_number: i32,
}

#[derive(Serialize)]
struct PositionTick {
    line: i32,
    ticks: u32,
}

impl<'a> NodeDocument<'a> {
    fn new(node: &'a CpuProfileNode) -> Self {
        Self {
            id: node.id,
            call_frame: CallFrame {
                function_name: &node.function_name,
                script_id: node.script_id.to_string(),
                url: &node.url,
                line_number: node.line_number - 1,
                column_number: node.column_number - 1,
            },
            hit_count: node.hit_count,
            children: node.children.iter().map(|child| child.id).collect(),
            deopt_reason: node.bailout_reason.as_deref(),
            position_ticks: (!node.line_ticks.is_empty()).then(|| {
                node.line_ticks
                    .iter()
                    .map(|tick| PositionTick {
                        line: tick.line,
                        ticks: tick.hit_count,
                    })
                    .collect()
            }),
        }
    }
}

impl CpuProfile {
    /// Render the profile as a `.cpuprofile` JSON document.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut nodes = Vec::new();
        let mut pending = VecDeque::from([&self.root]);
        while let Some(node) = pending.pop_front() {
            nodes.push(NodeDocument::new(node));
            pending.extend(node.children.iter());
        }

        let (samples, time_deltas) = if self.samples.is_empty() {
            (None, None)
        } else {
            let mut previous = self.start_time;
            let deltas = self
                .samples
                .iter()
                .map(|sample| {
                    let delta = sample.timestamp - previous;
                    previous = sample.timestamp;
                    delta
                })
                .collect();
            (
                Some(self.samples.iter().map(|sample| sample.node_id).collect()),
                Some(deltas),
            )
        };

        serde_json::to_string(&ProfileDocument {
            nodes,
            start_time: self.start_time,
            end_time: self.end_time,
            samples,
            time_deltas,
        })
    }

    /// Total number of nodes in the call tree.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut pending = VecDeque::from([&self.root]);
        while let Some(node) = pending.pop_front() {
            count += 1;
            pending.extend(node.children.iter());
        }
        count
    }
}
