use super::lexer::{references, RefTarget};
use crate::error::{SheetError, SheetResult};
use crate::model::{CellRef, NamedRange, NamedRangeScope, Workbook};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Vertex of the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
    /// Formula-bearing cell, by sheet position
    Cell { sheet: usize, at: CellRef },
    /// Named range, by scope and lowercased name
    Name { scope: Option<usize>, name: String },
}

/// Formula dependency graph of one workbook
///
/// Rebuilt from scratch for every validation pass. Edges run from a formula
/// cell to every formula cell or named range it reads; plain value cells
/// cannot close a cycle, so they get no vertex.
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<Node, NodeIndex>,
}

impl DependencyGraph {
    pub fn build(workbook: &Workbook) -> SheetResult<Self> {
        let mut builder = GraphBuilder {
            workbook,
            graph: DiGraph::new(),
            index: HashMap::new(),
            formula_cells: Vec::new(),
            expanded_names: HashSet::new(),
        };

        for (sheet_idx, sheet) in workbook.sheets.iter().enumerate() {
            let cells: BTreeSet<CellRef> = sheet.formula_cells().map(|(at, _)| at).collect();
            for &at in &cells {
                builder.node(Node::Cell { sheet: sheet_idx, at });
            }
            builder.formula_cells.push(cells);
        }

        for (sheet_idx, sheet) in workbook.sheets.iter().enumerate() {
            for (at, formula) in sheet.formula_cells() {
                builder.add_formula(sheet_idx, at, formula)?;
            }
        }

        debug!(
            nodes = builder.graph.node_count(),
            edges = builder.graph.edge_count(),
            "built formula dependency graph"
        );
        Ok(Self {
            graph: builder.graph,
            index: builder.index,
        })
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// True if `from` has a direct edge to `to`
    pub fn depends_on(&self, from: &Node, to: &Node) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => self.graph.contains_edge(a, b),
            _ => false,
        }
    }

    /// Every cycle in the graph, one concrete path per cyclic component
    ///
    /// Each path starts at its smallest label and does not repeat the first
    /// vertex at the end; paths are sorted.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
            .filter_map(|scc| self.cycle_in(&scc))
            .map(|path| {
                let mut labels: Vec<String> = path.iter().map(|&n| self.graph[n].clone()).collect();
                if let Some(min) = labels
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.cmp(b.1))
                    .map(|(i, _)| i)
                {
                    labels.rotate_left(min);
                }
                labels
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Fail with every cycle path if the graph is not acyclic
    pub fn validate(&self) -> SheetResult<()> {
        let cycles = self.cycles();
        if cycles.is_empty() {
            debug!(nodes = self.node_count(), "formula graph is acyclic");
            Ok(())
        } else {
            warn!(count = cycles.len(), "circular formula references found");
            Err(SheetError::CircularReference { cycles })
        }
    }

    /// Three-color DFS restricted to one strongly connected component,
    /// returning the first back-edge cycle
    fn cycle_in(&self, scc: &[NodeIndex]) -> Option<Vec<NodeIndex>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let members: HashSet<NodeIndex> = scc.iter().copied().collect();
        let mut color: HashMap<NodeIndex, Color> = scc.iter().map(|&n| (n, Color::White)).collect();
        let start = scc.iter().copied().min_by(|a, b| self.graph[*a].cmp(&self.graph[*b]))?;

        let mut path = vec![start];
        let mut stack: Vec<Vec<NodeIndex>> = vec![self.successors(start, &members)];
        color.insert(start, Color::Gray);

        while let Some(pending) = stack.last_mut() {
            match pending.pop() {
                Some(next) => match color.get(&next).copied().unwrap_or(Color::Black) {
                    Color::Gray => {
                        let from = path.iter().position(|&n| n == next)?;
                        return Some(path[from..].to_vec());
                    }
                    Color::White => {
                        color.insert(next, Color::Gray);
                        path.push(next);
                        stack.push(self.successors(next, &members));
                    }
                    Color::Black => {}
                },
                None => {
                    stack.pop();
                    if let Some(done) = path.pop() {
                        color.insert(done, Color::Black);
                    }
                }
            }
        }
        None
    }

    /// Successors inside the component, reversed so popping visits them in
    /// label order
    fn successors(&self, node: NodeIndex, members: &HashSet<NodeIndex>) -> Vec<NodeIndex> {
        let mut next: Vec<NodeIndex> = self
            .graph
            .neighbors(node)
            .filter(|n| members.contains(n))
            .collect();
        next.sort_by(|a, b| self.graph[*b].cmp(&self.graph[*a]));
        next.dedup();
        next
    }
}

struct GraphBuilder<'w> {
    workbook: &'w Workbook,
    graph: DiGraph<String, ()>,
    index: HashMap<Node, NodeIndex>,
    /// Formula cell positions per sheet, ordered by (row, col)
    formula_cells: Vec<BTreeSet<CellRef>>,
    expanded_names: HashSet<Node>,
}

impl GraphBuilder<'_> {
    fn node(&mut self, node: Node) -> NodeIndex {
        if let Some(&idx) = self.index.get(&node) {
            return idx;
        }
        let label = match &node {
            Node::Cell { sheet, at } => {
                format!("{}!{}", self.workbook.sheets[*sheet].name, at.to_a1())
            }
            Node::Name { scope: Some(sheet), name } => {
                format!("{}!{name}", self.workbook.sheets[*sheet].name)
            }
            Node::Name { scope: None, name } => name.clone(),
        };
        let idx = self.graph.add_node(label);
        self.index.insert(node, idx);
        idx
    }

    fn add_formula(&mut self, sheet_idx: usize, at: CellRef, formula: &str) -> SheetResult<()> {
        let workbook = self.workbook;
        let sheet_name = &workbook.sheets[sheet_idx].name;
        let location = format!("{sheet_name}!{}", at.to_a1());
        let from = self.node(Node::Cell { sheet: sheet_idx, at });

        let tokens = references(formula).map_err(|e| SheetError::FormulaReference {
            cell: location.clone(),
            message: e.to_string(),
        })?;

        for token in tokens {
            let target_sheet = match &token.sheet {
                None => sheet_idx,
                Some(name) => workbook.sheet_index(name).ok_or_else(|| {
                    SheetError::FormulaReference {
                        cell: location.clone(),
                        message: format!("reference to unknown sheet '{name}'"),
                    }
                })?,
            };

            match token.target {
                RefTarget::Cells { start, end, .. } => {
                    self.link_range(from, target_sheet, start, end);
                }
                RefTarget::Columns { first, last } => {
                    let rows = workbook.sheets[target_sheet].row_count();
                    if rows > 0 {
                        self.link_range(
                            from,
                            target_sheet,
                            CellRef::new(0, first),
                            CellRef::new(rows - 1, last),
                        );
                    }
                }
                RefTarget::Name(name) => {
                    let sheet = &workbook.sheets[target_sheet].name;
                    match workbook.lookup_name(sheet, &name) {
                        Some(named) => {
                            let to = self.name_node(named);
                            self.graph.update_edge(from, to, ());
                        }
                        None => warn!(
                            cell = %location,
                            name = %name,
                            "formula refers to an undefined name; leaving it to the spreadsheet application"
                        ),
                    }
                }
            }
        }
        Ok(())
    }

    /// Edge from `from` to every formula cell inside the rectangle
    fn link_range(&mut self, from: NodeIndex, sheet: usize, start: CellRef, end: CellRef) {
        let targets: Vec<CellRef> = self.formula_cells[sheet]
            .range(CellRef::new(start.row, 0)..=CellRef::new(end.row, u32::MAX))
            .filter(|c| c.col >= start.col && c.col <= end.col)
            .copied()
            .collect();
        for at in targets {
            let to = self.node(Node::Cell { sheet, at });
            self.graph.update_edge(from, to, ());
        }
    }

    /// Vertex for a named range, linked to the formula cells it covers
    fn name_node(&mut self, named: &NamedRange) -> NodeIndex {
        let workbook = self.workbook;
        let scope = match &named.scope {
            NamedRangeScope::Workbook => None,
            NamedRangeScope::Sheet(s) => workbook.sheet_index(s),
        };
        let node = Node::Name {
            scope,
            name: named.name.to_lowercase(),
        };
        let idx = self.node(node.clone());
        if self.expanded_names.insert(node) {
            let target = named
                .range
                .sheet
                .as_deref()
                .and_then(|s| workbook.sheet_index(s));
            if let Some(sheet) = target {
                self.link_range(idx, sheet, named.range.start, named.range.end);
            }
        }
        idx
    }
}

/// Build the graph and fail on any circular reference
pub fn validate_formulas(workbook: &Workbook) -> SheetResult<DependencyGraph> {
    let graph = DependencyGraph::build(workbook)?;
    graph.validate()?;
    Ok(graph)
}
