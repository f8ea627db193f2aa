// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The topology tree: which roles a cluster has and how they nest.
//!
//! A topology template is a nested mapping of role name to child roles, e.g. a driver that talks
//! to a proxy that talks to a backend. The same role may appear under several parents (two proxy
//! layers in front of a single backend); such a role is still only ever expanded once.
//!
//! Nodes live in an arena and refer to each other by index, so expanding a node into its concrete
//! instance names is just an update of the node's `name` field.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use {
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

/// Name of the synthetic root node.
pub const ROOT_NAME: &str = "cluster";

/// A static nested description of roles. Each key is a role; its value holds the roles below it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct TopologyTemplate(pub BTreeMap<String, TopologyTemplate>);

impl TopologyTemplate {
    /// Every role mentioned anywhere in the template.
    pub fn roles(&self) -> BTreeSet<String> {
        let mut roles = BTreeSet::new();
        let mut stack = vec![self];
        while let Some(template) = stack.pop() {
            for (role, children) in &template.0 {
                roles.insert(role.clone());
                stack.push(children);
            }
        }
        roles
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TopologyError {
    #[error("role '{0}' is used in the topology but has no parameters in any environment")]
    MissingRole(String),

    #[error("role '{0}' has a count of 0")]
    ZeroCount(String),

    #[error("role '{0}' has no recorded expansion")]
    NotExpanded(String),
}

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    /// The raw role name before expansion; comma-joined instance names after.
    pub name: String,
    pub role: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl TreeNode {
    pub fn is_expanded(&self) -> bool {
        self.name != self.role
    }

    /// The concrete instance names held by this node. Empty until the node is expanded.
    pub fn instances(&self) -> Vec<&str> {
        if !self.is_expanded() {
            return Vec::new();
        }
        self.name.split(',').filter(|n| !n.is_empty()).collect()
    }
}

/// Name of the `index`th replica of `role`.
pub fn instance_name(role: &str, index: u32) -> String {
    format!("{role}_{index}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopologyTree {
    nodes: Vec<TreeNode>,
}

impl TopologyTree {
    pub const ROOT: NodeId = 0;

    pub fn from_template(template: &TopologyTemplate) -> Self {
        let mut tree = TopologyTree {
            nodes: vec![TreeNode {
                name: ROOT_NAME.to_string(),
                role: ROOT_NAME.to_string(),
                parent: None,
                children: Vec::new(),
            }],
        };

        let mut pending = VecDeque::from([(Self::ROOT, template)]);
        while let Some((parent, template)) = pending.pop_front() {
            for (role, children) in &template.0 {
                let id = tree.nodes.len();
                tree.nodes.push(TreeNode {
                    name: role.clone(),
                    role: role.clone(),
                    parent: Some(parent),
                    children: Vec::new(),
                });
                tree.nodes[parent].children.push(id);
                pending.push_back((id, children));
            }
        }
        tree
    }

    /// Rebuild an expanded tree from its template and a previously recorded topology map. No new
    /// instance names are made up.
    pub fn restore(
        template: &TopologyTemplate,
        topology_map: &BTreeMap<String, String>,
    ) -> Result<Self, TopologyError> {
        let mut tree = Self::from_template(template);
        for node in tree.nodes.iter_mut().skip(1) {
            match topology_map.get(&node.role) {
                Some(names) => node.name = names.clone(),
                None => return Err(TopologyError::NotExpanded(node.role.clone())),
            }
        }
        Ok(tree)
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Visit every node, root first, one level at a time.
    pub fn level_order(&self) -> LevelOrder<'_> {
        LevelOrder {
            tree: self,
            queue: VecDeque::from([Self::ROOT]),
        }
    }

    /// Expand every node into concrete instance names.
    ///
    /// `count_of` gives the replica count of a role, or `None` if no environment defines it. All
    /// roles are checked before any node is touched, so a configuration error leaves the tree as
    /// it was. Nodes that are already expanded are left alone, which makes this idempotent.
    pub fn expand<F>(&mut self, count_of: F) -> Result<BTreeMap<String, String>, TopologyError>
    where
        F: Fn(&str) -> Option<u32>,
    {
        let order: Vec<NodeId> = self.level_order().skip(1).map(|(id, _)| id).collect();

        for &id in &order {
            let node = &self.nodes[id];
            if node.is_expanded() {
                continue;
            }
            match count_of(&node.role) {
                None => return Err(TopologyError::MissingRole(node.role.clone())),
                Some(0) => return Err(TopologyError::ZeroCount(node.role.clone())),
                Some(_) => {}
            }
        }

        // Seed the map with whatever was expanded before, so that shared roles keep their names.
        let mut expansions: BTreeMap<String, String> = BTreeMap::new();
        for &id in &order {
            let node = &self.nodes[id];
            if node.is_expanded() {
                expansions
                    .entry(node.role.clone())
                    .or_insert_with(|| node.name.clone());
            }
        }

        for &id in &order {
            if self.nodes[id].is_expanded() {
                continue;
            }
            let role = self.nodes[id].role.clone();
            let names = match expansions.get(&role) {
                Some(names) => names.clone(),
                None => {
                    // Validated above.
                    let count = count_of(&role).unwrap_or(1);
                    let names = (0..count)
                        .map(|i| instance_name(&role, i))
                        .collect::<Vec<_>>()
                        .join(",");
                    expansions.insert(role.clone(), names.clone());
                    names
                }
            };
            self.nodes[id].name = names;
        }

        Ok(expansions)
    }

    /// Raw role name -> comma-joined instance names, for every expanded node.
    pub fn topology_map(&self) -> BTreeMap<String, String> {
        self.nodes
            .iter()
            .skip(1)
            .filter(|n| n.is_expanded())
            .map(|n| (n.role.clone(), n.name.clone()))
            .collect()
    }

    /// Distinct roles in level order, each with its instance names.
    pub fn groups(&self) -> Vec<(&str, Vec<&str>)> {
        let mut seen = BTreeSet::new();
        self.level_order()
            .skip(1)
            .filter(|(_, node)| seen.insert(node.role.as_str()))
            .map(|(_, node)| (node.role.as_str(), node.instances()))
            .collect()
    }

    /// The role that `instance` was expanded from.
    pub fn role_of(&self, instance: &str) -> Option<&str> {
        self.find_instance(instance)
            .map(|id| self.nodes[id].role.as_str())
    }

    /// The role of the group directly above the first node (in level order) expanded from
    /// `role`, or `None` when that node sits right under the root.
    pub fn parent_role(&self, role: &str) -> Option<&str> {
        let (_, node) = self.level_order().skip(1).find(|(_, n)| n.role == role)?;
        match node.parent {
            Some(parent) if parent != Self::ROOT => Some(self.nodes[parent].role.as_str()),
            _ => None,
        }
    }

    fn find_instance(&self, instance: &str) -> Option<NodeId> {
        self.level_order()
            .skip(1)
            .find(|(_, node)| node.instances().contains(&instance))
            .map(|(id, _)| id)
    }
}

/// This iterator visits all of the nodes in a topology tree in breadth-first order.
pub struct LevelOrder<'a> {
    tree: &'a TopologyTree,
    queue: VecDeque<NodeId>,
}

impl<'a> Iterator for LevelOrder<'a> {
    type Item = (NodeId, &'a TreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.queue.pop_front()?;
        let node = &self.tree.nodes[id];

        self.queue.extend(node.children.iter().copied());

        Some((id, node))
    }
}
