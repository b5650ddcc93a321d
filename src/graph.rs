//! # Agent graph
//!
//! The set of agents a runner can drive, keyed by name. Handoffs point at
//! names, so the graph is where they are resolved and where a workflow is
//! checked before it runs: every handoff target must exist, nobody hands off
//! to itself, and an agent's tool names must not collide with each other or
//! with its handoff tools. Cycles are allowed.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use crate::agent::Agent;
use crate::error::{AgentsError, Result};

pub struct AgentGraph<C = ()> {
    agents: Arc<BTreeMap<String, Arc<Agent<C>>>>,
    order: Arc<Vec<String>>,
}

impl<C> Clone for AgentGraph<C> {
    fn clone(&self) -> Self {
        Self {
            agents: self.agents.clone(),
            order: self.order.clone(),
        }
    }
}

impl<C> std::fmt::Debug for AgentGraph<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentGraph")
            .field("agents", &self.order)
            .field("edges", &self.edges())
            .finish()
    }
}

impl<C> AgentGraph<C> {
    /// Builds and validates a graph.
    pub fn new(agents: impl IntoIterator<Item = Agent<C>>) -> Result<Self> {
        let mut map = BTreeMap::new();
        let mut order = Vec::new();
        for agent in agents {
            let name = agent.name().to_string();
            if map.contains_key(&name) {
                return Err(AgentsError::Config(format!(
                    "agent '{}' is registered twice",
                    name
                )));
            }
            order.push(name.clone());
            map.insert(name, Arc::new(agent));
        }

        for agent in map.values() {
            check_agent(agent, &map)?;
        }

        Ok(Self {
            agents: Arc::new(map),
            order: Arc::new(order),
        })
    }

    /// Graph of one agent with no handoffs.
    pub fn single(agent: Agent<C>) -> Result<Self> {
        Self::new([agent])
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Agent<C>>> {
        self.agents.get(name)
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<Agent<C>>> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| AgentsError::UnknownAgent(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Agent names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Every declared `(source, target)` edge, sources in registration order.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.order
            .iter()
            .filter_map(|name| self.agents.get(name))
            .flat_map(|agent| {
                agent
                    .handoffs()
                    .iter()
                    .map(move |h| (agent.name(), h.target()))
            })
            .collect()
    }

    pub fn handoff_targets(&self, name: &str) -> Vec<&str> {
        self.agents
            .get(name)
            .map(|agent| agent.handoffs().iter().map(|h| h.target()).collect())
            .unwrap_or_default()
    }

    /// Agents that can become active when a run starts at `start`, including `start`.
    pub fn reachable_from(&self, start: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        if !self.contains(start) {
            return seen;
        }
        let mut queue = VecDeque::from([start.to_string()]);
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            for target in self.handoff_targets(&name) {
                if !seen.contains(target) {
                    queue.push_back(target.to_string());
                }
            }
        }
        seen
    }

    /// Whether control can ever return to an agent it already left.
    pub fn has_cycle(&self) -> bool {
        self.names().any(|name| {
            self.handoff_targets(name)
                .into_iter()
                .any(|target| self.reachable_from(target).contains(name))
        })
    }
}

fn check_agent<C>(agent: &Agent<C>, agents: &BTreeMap<String, Arc<Agent<C>>>) -> Result<()> {
    let mut tool_names = HashSet::new();
    for tool in agent.tools() {
        if !tool_names.insert(tool.name()) {
            return Err(AgentsError::Config(format!(
                "agent '{}' declares tool '{}' twice",
                agent.name(),
                tool.name()
            )));
        }
    }

    for handoff in agent.handoffs() {
        let invalid = |reason: &str| AgentsError::InvalidHandoff {
            source_agent: agent.name().to_string(),
            target: handoff.target().to_string(),
            reason: reason.to_string(),
        };
        if handoff.target() == agent.name() {
            return Err(invalid("an agent cannot hand off to itself"));
        }
        if !agents.contains_key(handoff.target()) {
            return Err(invalid("target agent is not registered"));
        }
        if !tool_names.insert(handoff.tool_name()) {
            return Err(AgentsError::Config(format!(
                "agent '{}': handoff tool '{}' clashes with another tool",
                agent.name(),
                handoff.tool_name()
            )));
        }
    }
    Ok(())
}
