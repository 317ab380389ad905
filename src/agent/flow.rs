//! A small labeled-edge graph runner.
//!
//! Every node runs `prep → exec → post`. `post` returns an optional label that selects the
//! outgoing edge: a label follows the edge registered under it, no label follows the default
//! edge, and a missing edge ends the flow. A [`Flow`] is itself a [`Step`], so sub-flows nest
//! and leave through their parent's default edge.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::error::AgentError;
use crate::state::SharedState;

/// One unit of work in the graph.
///
/// `prep` reads what it needs out of the shared state, `exec` does the slow part (LLM, I/O)
/// without touching state, and `post` writes results back and picks the next edge.
#[async_trait]
pub trait Node: Send + Sync {
    type Prep: Send;
    type Output: Send;

    fn name(&self) -> &'static str;

    fn prep(&self, state: &SharedState) -> Result<Self::Prep>;

    async fn exec(&self, prep: Self::Prep) -> Result<Self::Output>;

    fn post(&self, state: &mut SharedState, output: Self::Output) -> Result<Option<String>>;
}

/// Counts node executions across a whole run, nested flows included.
#[derive(Debug)]
pub struct StepBudget {
    limit: usize,
    used: usize,
}

impl StepBudget {
    pub fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    fn spend(&mut self) -> Result<(), AgentError> {
        if self.used >= self.limit {
            return Err(AgentError::StepBudgetExhausted(self.limit));
        }
        self.used += 1;
        Ok(())
    }
}

/// Object-safe form of a graph member: a node or a nested flow.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, state: &mut SharedState, budget: &mut StepBudget)
        -> Result<Option<String>>;

    fn as_flow(&self) -> Option<&Flow> {
        None
    }
}

#[async_trait]
impl<N: Node> Step for N {
    fn name(&self) -> &str {
        Node::name(self)
    }

    async fn run(
        &self,
        state: &mut SharedState,
        budget: &mut StepBudget,
    ) -> Result<Option<String>> {
        budget.spend()?;
        debug!(node = Node::name(self), step = budget.used(), "running node");
        let prep = self.prep(state)?;
        let output = self.exec(prep).await?;
        self.post(state, output)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

pub struct FlowBuilder {
    name: &'static str,
    steps: Vec<Box<dyn Step>>,
    defaults: BTreeMap<NodeId, NodeId>,
    labeled: BTreeMap<(NodeId, String), NodeId>,
}

impl FlowBuilder {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
            defaults: BTreeMap::new(),
            labeled: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, step: impl Step + 'static) -> NodeId {
        self.steps.push(Box::new(step));
        NodeId(self.steps.len() - 1)
    }

    /// Default edge, taken when `from` returns no label.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> &mut Self {
        self.defaults.insert(from, to);
        self
    }

    pub fn route(&mut self, from: NodeId, label: impl Into<String>, to: NodeId) -> &mut Self {
        self.labeled.insert((from, label.into()), to);
        self
    }

    pub fn build(self, start: NodeId) -> Flow {
        Flow {
            name: self.name,
            steps: self.steps,
            start,
            defaults: self.defaults,
            labeled: self.labeled,
        }
    }
}

pub struct Flow {
    name: &'static str,
    steps: Vec<Box<dyn Step>>,
    start: NodeId,
    defaults: BTreeMap<NodeId, NodeId>,
    labeled: BTreeMap<(NodeId, String), NodeId>,
}

impl Flow {
    /// Walk the graph from the start node until no successor remains.
    pub async fn execute(&self, state: &mut SharedState, budget: &mut StepBudget) -> Result<()> {
        let mut current = Some(self.start);
        while let Some(id) = current {
            let step = &self.steps[id.0];
            let label = step.run(state, budget).await?;
            current = self.successor(id, label.as_deref());
            if current.is_none() {
                debug!(flow = self.name, last = step.name(), label = ?label, "flow finished");
            }
        }
        Ok(())
    }

    fn successor(&self, from: NodeId, label: Option<&str>) -> Option<NodeId> {
        match label {
            None => self.defaults.get(&from).copied(),
            Some(label) => {
                let next = self.labeled.get(&(from, label.to_string())).copied();
                if next.is_none() && self.has_edges(from) {
                    debug!(
                        flow = self.name,
                        node = self.steps[from.0].name(),
                        label,
                        "no edge for label, leaving flow"
                    );
                }
                next
            }
        }
    }

    fn has_edges(&self, from: NodeId) -> bool {
        self.defaults.contains_key(&from) || self.labeled.keys().any(|(id, _)| *id == from)
    }

    /// Mermaid `flowchart` text of the graph, sub-flows drawn as subgraphs.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("flowchart TD\n");
        self.render(&mut out, "n", 1);
        out
    }

    fn render(&self, out: &mut String, prefix: &str, depth: usize) {
        let indent = "    ".repeat(depth);
        for (i, step) in self.steps.iter().enumerate() {
            let id = format!("{}{}", prefix, i);
            match step.as_flow() {
                Some(sub) => {
                    let _ = writeln!(out, "{}subgraph {}[\"{}\"]", indent, id, sub.name);
                    sub.render(out, &format!("{}_", id), depth + 1);
                    let _ = writeln!(out, "{}end", indent);
                }
                None => {
                    let _ = writeln!(out, "{}{}[\"{}\"]", indent, id, step.name());
                }
            }
        }
        for ((from, label), to) in &self.labeled {
            let _ = writeln!(
                out,
                "{}{}{} -->|{}| {}{}",
                indent, prefix, from.0, label, prefix, to.0
            );
        }
        for (from, to) in &self.defaults {
            let _ = writeln!(out, "{}{}{} --> {}{}", indent, prefix, from.0, prefix, to.0);
        }
    }
}

#[async_trait]
impl Step for Flow {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(
        &self,
        state: &mut SharedState,
        budget: &mut StepBudget,
    ) -> Result<Option<String>> {
        self.execute(state, budget).await?;
        Ok(None)
    }

    fn as_flow(&self) -> Option<&Flow> {
        Some(self)
    }
}
