//! Neighborhood accessors layered on the fetch engine: `in_edges`/`out_edges`/`both_edges` and
//! `in_nodes`/`out_nodes`/`both_nodes`, for a single node and (via [`NodeSetTraversal`]) for a
//! whole [`NodeSet`] at once.

use crate::edge::EdgeSet;
use crate::error::{GraphyDbError, Result};
use crate::item::GraphItem;
use crate::node::{Node, NodeSet};
use crate::pattern::FetchParams;
use crate::value::AttrValue;

fn with_self_uid(mut params: FetchParams, uid: &str) -> FetchParams {
    params.where_clauses.insert(0, "self.uid = :selfuid".to_string());
    params.params.insert("selfuid".to_string(), AttrValue::Text(uid.to_string()));
    params
}

fn expect_edges(result: crate::pattern::FetchResult) -> Result<EdgeSet> {
    result.into_edges().ok_or_else(|| GraphyDbError::Pattern("expected an edge result".to_string()))
}

fn expect_nodes(result: crate::pattern::FetchResult) -> Result<NodeSet> {
    result.into_nodes().ok_or_else(|| GraphyDbError::Pattern("expected a node result".to_string()))
}

fn expect_count(result: crate::pattern::FetchResult) -> Result<i64> {
    result.into_count().ok_or_else(|| GraphyDbError::Pattern("expected a count result".to_string()))
}

impl Node {
    /// Edges starting at this node.
    pub fn out_edges(&self, params: FetchParams) -> Result<EdgeSet> {
        let mut params = with_self_uid(params, self.uid());
        params.count = false;
        expect_edges(self.graph.fetch("(self) -[e]>", params)?)
    }

    /// Edges ending at this node.
    pub fn in_edges(&self, params: FetchParams) -> Result<EdgeSet> {
        let mut params = with_self_uid(params, self.uid());
        params.count = false;
        expect_edges(self.graph.fetch("(self) <[e]-", params)?)
    }

    /// Union of [`Node::in_edges`] and [`Node::out_edges`], uid-deduplicated. A self-loop edge
    /// appears only once, not twice.
    pub fn both_edges(&self, params: FetchParams) -> Result<EdgeSet> {
        let out = self.out_edges(params.clone())?;
        let inc = self.in_edges(params)?;
        Ok(out.union(&inc))
    }

    /// Nodes this node has an outgoing edge to.
    pub fn out_nodes(&self, params: FetchParams) -> Result<NodeSet> {
        let mut params = with_self_uid(params, self.uid());
        params.count = false;
        expect_nodes(self.graph.fetch("(self) -(e)> [n2]", params)?)
    }

    /// Nodes with an outgoing edge to this node.
    pub fn in_nodes(&self, params: FetchParams) -> Result<NodeSet> {
        let mut params = with_self_uid(params, self.uid());
        params.count = false;
        expect_nodes(self.graph.fetch("[n2] -(e)> (self)", params)?)
    }

    /// Union of [`Node::in_nodes`] and [`Node::out_nodes`], uid-deduplicated.
    pub fn both_nodes(&self, params: FetchParams) -> Result<NodeSet> {
        let out = self.out_nodes(params.clone())?;
        let inc = self.in_nodes(params)?;
        Ok(out.union(&inc))
    }

    pub fn out_edges_count(&self, params: FetchParams) -> Result<i64> {
        let mut params = with_self_uid(params, self.uid());
        params.count = true;
        expect_count(self.graph.fetch("(self) -[e]>", params)?)
    }

    pub fn in_edges_count(&self, params: FetchParams) -> Result<i64> {
        let mut params = with_self_uid(params, self.uid());
        params.count = true;
        expect_count(self.graph.fetch("(self) <[e]-", params)?)
    }

    /// Computed by materializing [`Node::both_edges`] and taking the length of the union, not the
    /// sum of the directed counts -- a self-loop on both sides is still one edge.
    pub fn both_edges_count(&self, params: FetchParams) -> Result<i64> {
        Ok(self.both_edges(params)?.len() as i64)
    }

    pub fn out_nodes_count(&self, params: FetchParams) -> Result<i64> {
        let mut params = with_self_uid(params, self.uid());
        params.count = true;
        expect_count(self.graph.fetch("(self) -(e)> [n2]", params)?)
    }

    pub fn in_nodes_count(&self, params: FetchParams) -> Result<i64> {
        let mut params = with_self_uid(params, self.uid());
        params.count = true;
        expect_count(self.graph.fetch("[n2] -(e)> (self)", params)?)
    }

    /// Computed by materializing [`Node::both_nodes`] and taking the length of the union; see
    /// [`Node::both_edges_count`].
    pub fn both_nodes_count(&self, params: FetchParams) -> Result<i64> {
        Ok(self.both_nodes(params)?.len() as i64)
    }
}

/// Set-valued counterparts of the [`Node`] traversal accessors: run the accessor on every member
/// and union the results. Each per-node call gets its own clone of `params`, since the compiler
/// consumes its `where_clauses`/`params` while building SQL.
pub trait NodeSetTraversal {
    fn out_edges(&self, params: &FetchParams) -> Result<EdgeSet>;
    fn in_edges(&self, params: &FetchParams) -> Result<EdgeSet>;
    fn both_edges(&self, params: &FetchParams) -> Result<EdgeSet>;
    fn out_nodes(&self, params: &FetchParams) -> Result<NodeSet>;
    fn in_nodes(&self, params: &FetchParams) -> Result<NodeSet>;
    fn both_nodes(&self, params: &FetchParams) -> Result<NodeSet>;
}

impl NodeSetTraversal for NodeSet {
    fn out_edges(&self, params: &FetchParams) -> Result<EdgeSet> {
        let mut acc = EdgeSet::new();
        for node in self.iter() {
            acc = acc.union(&node.out_edges(params.clone())?);
        }
        Ok(acc)
    }

    fn in_edges(&self, params: &FetchParams) -> Result<EdgeSet> {
        let mut acc = EdgeSet::new();
        for node in self.iter() {
            acc = acc.union(&node.in_edges(params.clone())?);
        }
        Ok(acc)
    }

    fn both_edges(&self, params: &FetchParams) -> Result<EdgeSet> {
        let mut acc = EdgeSet::new();
        for node in self.iter() {
            acc = acc.union(&node.both_edges(params.clone())?);
        }
        Ok(acc)
    }

    fn out_nodes(&self, params: &FetchParams) -> Result<NodeSet> {
        let mut acc = NodeSet::new();
        for node in self.iter() {
            acc = acc.union(&node.out_nodes(params.clone())?);
        }
        Ok(acc)
    }

    fn in_nodes(&self, params: &FetchParams) -> Result<NodeSet> {
        let mut acc = NodeSet::new();
        for node in self.iter() {
            acc = acc.union(&node.in_nodes(params.clone())?);
        }
        Ok(acc)
    }

    fn both_nodes(&self, params: &FetchParams) -> Result<NodeSet> {
        let mut acc = NodeSet::new();
        for node in self.iter() {
            acc = acc.union(&node.both_nodes(params.clone())?);
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, GraphOptions};

    fn graph() -> Graph {
        Graph::open(GraphOptions::memory()).unwrap()
    }

    fn node(g: &Graph, kind: &str) -> Node {
        let mut n = g.node(kind).unwrap();
        n.save(false, None, true).unwrap();
        n
    }

    #[test]
    fn friend_graph_out_nodes_filtered_by_edge_kind() {
        let g = graph();
        let a = node(&g, "Person");
        let b = node(&g, "Person");
        let c = node(&g, "Person");
        let mut likes_ab = g.edge("Likes", &a, &b).unwrap();
        likes_ab.save(false, None, true).unwrap();
        let mut likes_bc = g.edge("Likes", &b, &c).unwrap();
        likes_bc.save(false, None, true).unwrap();
        let mut likes_ba = g.edge("Likes", &b, &a).unwrap();
        likes_ba.save(false, None, true).unwrap();

        let a_out = a.out_nodes(FetchParams::new().with_where("e.kind = \"Likes\"")).unwrap();
        assert_eq!(a_out.len(), 1);
        assert!(a_out.contains_uid(b.uid()));

        let b_both = b.both_nodes(FetchParams::new()).unwrap();
        assert_eq!(b_both.len(), 2);
        assert!(b_both.contains_uid(a.uid()));
        assert!(b_both.contains_uid(c.uid()));
    }

    #[test]
    fn both_edges_dedupes_self_loop() {
        let g = graph();
        let a = node(&g, "Person");
        let mut loop_edge = g.edge("Knows", &a, &a).unwrap();
        loop_edge.save(false, None, true).unwrap();

        let both = a.both_edges(FetchParams::new()).unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(a.both_edges_count(FetchParams::new()).unwrap(), 1);
    }

    #[test]
    fn counts_agree_between_materialized_and_count_mode() {
        let g = graph();
        let a = node(&g, "Person");
        let b = node(&g, "Person");
        let mut e1 = g.edge("Likes", &a, &b).unwrap();
        e1.save(false, None, true).unwrap();
        let mut e2 = g.edge("Likes", &a, &b).unwrap();
        e2.save(false, None, true).unwrap();

        let materialized = a.out_edges(FetchParams::new()).unwrap().len() as i64;
        let counted = a.out_edges_count(FetchParams::new()).unwrap();
        assert_eq!(materialized, counted);
        assert_eq!(materialized, 2);
    }
}
