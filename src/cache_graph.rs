//! Lazily recomputed dependency graph of cached values.
//!
//! Nodes live in an arena owned by [`DependencyGraph`] and refer to their
//! parent by [`NodeId`], so the parent link is non-owning and cycles cannot be
//! built. A node recomputes only when read while dirty:
//!
//! - its own parameter changed ([`DependencyGraph::set_parameter`]),
//! - something outside the parameter changed ([`DependencyGraph::mark_dirty`]),
//! - or its parent's output is no longer the value it last consumed.
//!
//! "Changed" is decided by `T`'s equality. For [`ImageValue`](crate::imaging::ImageValue)
//! that is identity, so a freshly captured frame always propagates even when
//! its pixels match the previous one. Reading an unchanged node returns the
//! identical cached instance.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

type Transform<T, P> = Box<dyn Fn(&T, &P) -> T + Send + Sync>;
type Aux<T> = Box<dyn Fn(T) -> T + Send + Sync>;

enum Kind<T, P> {
    Source,
    Derived {
        parent: NodeId,
        seen_parent: Option<T>,
        transform: Transform<T, P>,
        aux: Option<Aux<T>>,
    },
}

struct Node<T, P> {
    kind: Kind<T, P>,
    param: P,
    dirty: bool,
    output: Option<T>,
    recomputes: u64,
}

/// Arena of cached nodes. See the [module docs](self).
pub struct DependencyGraph<T, P> {
    nodes: Vec<Node<T, P>>,
}

impl<T, P> Default for DependencyGraph<T, P> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<T, P> fmt::Debug for DependencyGraph<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl<T: Clone + PartialEq, P: PartialEq> DependencyGraph<T, P> {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: Kind<T, P>, param: P) -> NodeId {
        self.nodes.push(Node {
            kind,
            param,
            dirty: true,
            output: None,
            recomputes: 0,
        });
        NodeId(self.nodes.len() - 1)
    }

    /// Parentless node whose output is set directly.
    pub fn add_source(&mut self, param: P) -> NodeId {
        self.push(Kind::Source, param)
    }

    /// Node computing `aux(transform(parent_output, param))`.
    pub fn add_derived(
        &mut self,
        parent: NodeId,
        param: P,
        transform: impl Fn(&T, &P) -> T + Send + Sync + 'static,
        aux: Option<Aux<T>>,
    ) -> NodeId {
        self.push(
            Kind::Derived {
                parent,
                seen_parent: None,
                transform: Box::new(transform),
                aux,
            },
            param,
        )
    }

    /// Replace a source node's value. Marks dirty only when the value
    /// changed; returns whether it did.
    pub fn set_source(&mut self, id: NodeId, value: Option<T>) -> bool {
        let node = &mut self.nodes[id.0];
        debug_assert!(matches!(node.kind, Kind::Source));
        if node.output == value {
            return false;
        }
        node.output = value;
        node.dirty = true;
        true
    }

    /// Replace a node's parameter. Marks dirty only when it differs; returns
    /// whether it did.
    pub fn set_parameter(&mut self, id: NodeId, param: P) -> bool {
        let node = &mut self.nodes[id.0];
        if node.param == param {
            return false;
        }
        node.param = param;
        node.dirty = true;
        true
    }

    /// Last computed (or, for a source, last set) value, without resolving.
    pub fn peek(&self, id: NodeId) -> Option<&T> {
        self.nodes[id.0].output.as_ref()
    }

    pub fn param(&self, id: NodeId) -> &P {
        &self.nodes[id.0].param
    }

    pub fn mark_dirty(&mut self, id: NodeId) {
        self.nodes[id.0].dirty = true;
    }

    /// Whether reading `id` would recompute (or, for a source, deliver a new
    /// value). Never recomputes anything.
    pub fn is_dirty(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.0];
        if node.dirty {
            return true;
        }
        match &node.kind {
            Kind::Source => false,
            Kind::Derived {
                parent,
                seen_parent,
                ..
            } => self.is_dirty(*parent) || self.nodes[parent.0].output != *seen_parent,
        }
    }

    /// Resolve the node's output, recomputing along the chain as needed.
    ///
    /// `None` upstream propagates as `None` without calling any transform.
    pub fn output(&mut self, id: NodeId) -> Option<T> {
        let parent_output = match self.nodes[id.0].kind {
            Kind::Source => {
                let node = &mut self.nodes[id.0];
                node.dirty = false;
                return node.output.clone();
            }
            Kind::Derived { parent, .. } => self.output(parent),
        };

        let node = &mut self.nodes[id.0];
        let Kind::Derived {
            seen_parent,
            transform,
            aux,
            ..
        } = &mut node.kind
        else {
            return node.output.clone();
        };

        if *seen_parent != parent_output {
            *seen_parent = parent_output;
            node.dirty = true;
        }
        if node.dirty {
            node.output = seen_parent.as_ref().map(|input| {
                let computed = transform(input, &node.param);
                match aux {
                    Some(post) => post(computed),
                    None => computed,
                }
            });
            node.dirty = false;
            node.recomputes += 1;
        }
        node.output.clone()
    }

    /// Number of recomputations performed by `id` so far.
    pub fn recompute_count(&self, id: NodeId) -> u64 {
        self.nodes[id.0].recomputes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Identity-compared payload, like `ImageValue`.
    #[derive(Debug, Clone)]
    struct Token(Arc<i64>);

    impl Token {
        fn new(v: i64) -> Self {
            Self(Arc::new(v))
        }
        fn value(&self) -> i64 {
            *self.0
        }
    }

    impl PartialEq for Token {
        fn eq(&self, other: &Self) -> bool {
            Arc::ptr_eq(&self.0, &other.0)
        }
    }

    fn add(input: &Token, param: &i64) -> Token {
        Token::new(input.value() + param)
    }

    /// source → a(+1) → {b(+10), c(+100)}
    fn diamond() -> (DependencyGraph<Token, i64>, [NodeId; 4]) {
        let mut g: DependencyGraph<Token, i64> = DependencyGraph::new();
        let src = g.add_source(0);
        let a = g.add_derived(src, 1, add, None);
        let b = g.add_derived(a, 10, add, None);
        let c = g.add_derived(a, 100, add, None);
        (g, [src, a, b, c])
    }

    // =========================================================================
    // recompute tests
    // =========================================================================

    #[test]
    fn unchanged_reads_return_identical_instance() {
        let (mut g, [src, _, b, _]) = diamond();
        g.set_source(src, Some(Token::new(5)));
        let first = g.output(b).unwrap();
        let second = g.output(b).unwrap();
        assert_eq!(first.value(), 16);
        assert_eq!(first, second);
        assert_eq!(g.recompute_count(b), 1);
    }

    #[test]
    fn source_change_recomputes_each_node_once() {
        let (mut g, [src, a, b, c]) = diamond();
        g.set_source(src, Some(Token::new(1)));
        g.output(b);
        g.output(c);
        g.set_source(src, Some(Token::new(2)));
        assert_eq!(g.output(b).unwrap().value(), 13);
        assert_eq!(g.output(c).unwrap().value(), 103);
        assert_eq!(g.recompute_count(a), 2);
        assert_eq!(g.recompute_count(b), 2);
        assert_eq!(g.recompute_count(c), 2);
    }

    #[test]
    fn parameter_change_leaves_siblings_untouched() {
        let (mut g, [src, a, b, c]) = diamond();
        g.set_source(src, Some(Token::new(1)));
        let c_before = g.output(c).unwrap();
        g.output(b);

        g.set_parameter(b, 20);
        assert_eq!(g.output(b).unwrap().value(), 22);
        assert_eq!(g.output(c).unwrap(), c_before);
        assert_eq!(g.recompute_count(a), 1);
        assert_eq!(g.recompute_count(c), 1);
    }

    #[test]
    fn equal_parameter_is_not_a_change() {
        let (mut g, [src, _, b, _]) = diamond();
        g.set_source(src, Some(Token::new(1)));
        g.output(b);
        assert!(!g.set_parameter(b, 10));
        assert!(!g.is_dirty(b));
    }

    #[test]
    fn identical_source_is_not_a_change() {
        let (mut g, [src, a, _, _]) = diamond();
        let token = Token::new(3);
        g.set_source(src, Some(token.clone()));
        g.output(a);
        assert!(!g.set_source(src, Some(token)));
        assert!(!g.is_dirty(a));
    }

    #[test]
    fn equal_but_distinct_source_is_a_change() {
        let (mut g, [src, a, _, _]) = diamond();
        g.set_source(src, Some(Token::new(3)));
        g.output(a);
        g.set_source(src, Some(Token::new(3)));
        assert!(g.is_dirty(a));
    }

    // =========================================================================
    // dirty / None propagation tests
    // =========================================================================

    #[test]
    fn dirty_propagates_without_recomputing() {
        let (mut g, [src, a, b, c]) = diamond();
        g.set_source(src, Some(Token::new(1)));
        g.output(b);
        g.output(c);
        g.mark_dirty(a);
        assert!(g.is_dirty(b));
        assert!(g.is_dirty(c));
        assert_eq!(g.recompute_count(b), 1);
    }

    #[test]
    fn none_source_yields_none_downstream() {
        let (mut g, [src, _, b, _]) = diamond();
        assert_eq!(g.output(b), None);
        g.set_source(src, Some(Token::new(1)));
        assert_eq!(g.output(b).unwrap().value(), 12);
        g.set_source(src, None);
        assert_eq!(g.output(b), None);
    }

    #[test]
    fn aux_runs_after_transform() {
        let mut g: DependencyGraph<Token, i64> = DependencyGraph::new();
        let src = g.add_source(0);
        let neg = g.add_derived(src, 1, add, Some(Box::new(|t: Token| Token::new(-t.value()))));
        g.set_source(src, Some(Token::new(4)));
        assert_eq!(g.output(neg).unwrap().value(), -5);
    }
}
