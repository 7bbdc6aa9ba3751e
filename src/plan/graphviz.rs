// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Graphviz rendering of a fragmented query plan.
//!
//! Pure tree-walk over an already-built plan: one cluster per fragment, one
//! record-shaped node per plan node (label = kind + key parameters + output
//! columns), edges along data flow, and a cross-fragment edge from each
//! exchange node to the root of the fragment it pulls from. Textual output
//! only; no effect on execution.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::plan::{FragmentId, PlanArena, PlanFragment, PlanNode, PlanNodeIndex};

/// Render the fragments of one plan as a Graphviz digraph.
pub fn print(arena: &PlanArena, fragments: &[PlanFragment]) -> Result<String, String> {
    let mut fragments_by_id: HashMap<FragmentId, &PlanFragment> = HashMap::new();
    for fragment in fragments {
        if fragments_by_id.insert(fragment.id, fragment).is_some() {
            return Err(format!("duplicate fragment id {}", fragment.id));
        }
    }

    let mut output = String::new();
    output.push_str("digraph Plan {\n");

    for fragment in fragments {
        print_fragment_nodes(arena, fragment, &mut output)?;
    }

    for fragment in fragments {
        print_edges(arena, &fragments_by_id, fragment.root, &mut output)?;
    }

    output.push_str("}\n");
    Ok(output)
}

fn print_fragment_nodes(
    arena: &PlanArena,
    fragment: &PlanFragment,
    output: &mut String,
) -> Result<(), String> {
    let _ = writeln!(output, "subgraph cluster_{} {{", fragment.id);
    let _ = writeln!(
        output,
        "label = \"{}\"",
        if fragment.partitioned {
            "partitioned"
        } else {
            "unpartitioned"
        }
    );
    print_node_tree(arena, fragment.root, output)?;
    output.push_str("}\n");
    Ok(())
}

fn print_node_tree(
    arena: &PlanArena,
    index: PlanNodeIndex,
    output: &mut String,
) -> Result<(), String> {
    let node = arena.node(index)?;
    match node {
        PlanNode::Output { columns, .. } => {
            print_node(index, node, &format!("Output[{}]", columns.join(", ")), "", output);
        }
        PlanNode::Exchange { .. } => {
            print_node(index, node, "Exchange 1:N", "", output);
        }
        PlanNode::Aggregate {
            step, aggregations, ..
        } => {
            let mut details = String::new();
            for (symbol, function) in aggregations {
                let _ = write!(details, "{symbol} := {function}\\n");
            }
            print_node(index, node, &format!("Aggregate[{step}]"), &details, output);
        }
        PlanNode::Join { criteria, .. } => {
            print_node(index, node, "Join", &escape_record_text(criteria), output);
        }
        PlanNode::Filter { predicate, .. } => {
            print_node(index, node, "Filter", &escape_record_text(predicate), output);
        }
        PlanNode::Project { assignments, .. } => {
            let mut details = String::new();
            for (symbol, expression) in assignments {
                // Skip identity assignments.
                if symbol == expression {
                    continue;
                }
                let _ = write!(details, "{symbol} := {}\\n", escape_record_text(expression));
            }
            print_node(index, node, "Project", &details, output);
        }
        PlanNode::TopN {
            count, order_by, ..
        } => {
            print_node(
                index,
                node,
                &format!("TopN[{count}]"),
                &order_by.join(", "),
                output,
            );
        }
        PlanNode::Limit { count, .. } => {
            print_node(index, node, &format!("Limit[{count}]"), "", output);
        }
        PlanNode::TableScan {
            table, assignments, ..
        } => {
            let mut details = String::new();
            for (handle, symbol) in assignments {
                let _ = write!(details, "{handle} := {symbol}\\n");
            }
            print_node(index, node, &format!("TableScan[{table}]"), &details, output);
        }
    }
    for child in node.children() {
        print_node_tree(arena, child, output)?;
    }
    Ok(())
}

fn print_node(
    index: PlanNodeIndex,
    node: &PlanNode,
    label: &str,
    details: &str,
    output: &mut String,
) {
    let outputs = node.outputs().join(", ");
    if details.is_empty() {
        let _ = writeln!(
            output,
            "plannode_{index}[label=\"{{{label}|{outputs}}}\", shape=record];"
        );
    } else {
        let _ = writeln!(
            output,
            "plannode_{index}[label=\"{{{label}|{outputs}|{details}}}\", shape=record];"
        );
    }
}

fn print_edges(
    arena: &PlanArena,
    fragments_by_id: &HashMap<FragmentId, &PlanFragment>,
    index: PlanNodeIndex,
    output: &mut String,
) -> Result<(), String> {
    let node = arena.node(index)?;
    if let PlanNode::Exchange {
        source_fragment, ..
    } = node
    {
        let target = fragments_by_id.get(source_fragment).ok_or_else(|| {
            format!(
                "exchange node {} references unknown fragment {}",
                index, source_fragment
            )
        })?;
        print_edge(index, target.root, output);
        return Ok(());
    }
    for child in node.children() {
        print_edge(index, child, output);
        print_edges(arena, fragments_by_id, child, output)?;
    }
    Ok(())
}

fn print_edge(from: PlanNodeIndex, to: PlanNodeIndex, output: &mut String) {
    let _ = writeln!(output, "plannode_{from} -> plannode_{to};");
}

fn escape_record_text(text: &str) -> String {
    text.replace('>', "\\>").replace('<', "\\<")
}
