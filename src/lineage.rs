//! Session lineage: the forest formed by copies, plus the reset journal.
//!
//! Lineage is best-effort local bookkeeping. The service does not expose
//! ancestry, so a session this tracker never saw created is treated as a root.
//! Parent pointers are only ever set by copies; a reset is recorded as an
//! event on the session itself and never changes its position in the forest.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::models::{BranchReason, LineageEdge, SessionId};

const RESET_MARK: char = '↺';

#[derive(Debug, Default)]
struct LineageState {
    known: HashSet<SessionId>,
    parents: HashMap<SessionId, SessionId>,
    children: HashMap<SessionId, BTreeSet<SessionId>>,
    resets: HashMap<SessionId, usize>,
    events: Vec<LineageEdge>,
}

impl LineageState {
    fn insert(&mut self, edge: LineageEdge) -> Result<()> {
        match edge.reason {
            BranchReason::Reset => {
                if edge.parent != edge.child {
                    return Err(Error::ProtocolViolation(format!(
                        "reset edge must not change the session id ({} -> {})",
                        edge.parent, edge.child
                    )));
                }
                self.note_reset(&edge.child);
            }
            BranchReason::Copy => {
                if edge.parent == edge.child {
                    return Err(Error::ProtocolViolation(format!(
                        "copy of {} returned the source id",
                        edge.parent
                    )));
                }
                if self.known.contains(&edge.child) {
                    return Err(Error::ProtocolViolation(format!(
                        "copy of {} returned already issued id {}",
                        edge.parent, edge.child
                    )));
                }
                self.known.insert(edge.parent.clone());
                self.known.insert(edge.child.clone());
                self.parents.insert(edge.child.clone(), edge.parent.clone());
                self.children
                    .entry(edge.parent.clone())
                    .or_default()
                    .insert(edge.child.clone());
            }
        }
        self.events.push(edge);
        Ok(())
    }

    fn note_reset(&mut self, session: &str) {
        self.known.insert(session.to_string());
        *self.resets.entry(session.to_string()).or_default() += 1;
    }

    fn root_of(&self, session: &str) -> SessionId {
        let mut current = session;
        // A fresh child is rejected on insert, so parent chains cannot loop.
        while let Some(parent) = self.parents.get(current) {
            current = parent.as_str();
        }
        current.to_string()
    }
}

/// Thread-safe lineage forest shared by every task driving sessions.
#[derive(Debug, Clone, Default)]
pub struct LineageTracker {
    state: Arc<RwLock<LineageState>>,
}

impl LineageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session as a root if it is not known yet.
    pub fn register_root(&self, session: impl Into<SessionId>) {
        let mut state = self.state.write().expect("lineage lock poisoned");
        state.known.insert(session.into());
    }

    /// Record that `child` was minted by copying `parent`.
    ///
    /// Fails when `child` was already issued, which keeps the forest acyclic.
    pub fn record_copy(&self, parent: &str, child: &str) -> Result<LineageEdge> {
        let edge = LineageEdge::copy(parent, child);
        let mut state = self.state.write().expect("lineage lock poisoned");
        state.insert(edge.clone())?;
        tracing::debug!(parent, child, "recorded copy");
        Ok(edge)
    }

    /// Record that `session` was reset in place.
    pub fn record_reset(&self, session: &str) -> LineageEdge {
        let edge = LineageEdge::reset(session);
        let mut state = self.state.write().expect("lineage lock poisoned");
        state.note_reset(session);
        state.events.push(edge.clone());
        tracing::debug!(session, "recorded reset");
        edge
    }

    /// Replay a previously recorded edge (e.g. from the journal).
    pub fn restore(&self, edge: LineageEdge) -> Result<()> {
        let mut state = self.state.write().expect("lineage lock poisoned");
        state.insert(edge)
    }

    pub fn contains(&self, session: &str) -> bool {
        let state = self.state.read().expect("lineage lock poisoned");
        state.known.contains(session)
    }

    pub fn parent(&self, session: &str) -> Option<SessionId> {
        let state = self.state.read().expect("lineage lock poisoned");
        state.parents.get(session).cloned()
    }

    /// Proper ancestors of `session`, root first. Empty for roots and for
    /// sessions the tracker has never seen.
    pub fn ancestors(&self, session: &str) -> Vec<SessionId> {
        let state = self.state.read().expect("lineage lock poisoned");
        let mut chain = Vec::new();
        let mut current = session;
        while let Some(parent) = state.parents.get(current) {
            chain.push(parent.clone());
            current = parent.as_str();
        }
        chain.reverse();
        chain
    }

    pub fn root_of(&self, session: &str) -> SessionId {
        let state = self.state.read().expect("lineage lock poisoned");
        state.root_of(session)
    }

    /// Direct copies of `session`.
    pub fn children(&self, session: &str) -> BTreeSet<SessionId> {
        let state = self.state.read().expect("lineage lock poisoned");
        state.children.get(session).cloned().unwrap_or_default()
    }

    pub fn reset_count(&self, session: &str) -> usize {
        let state = self.state.read().expect("lineage lock poisoned");
        state.resets.get(session).copied().unwrap_or(0)
    }

    /// Every recorded edge in the order it happened.
    pub fn events(&self) -> Vec<LineageEdge> {
        let state = self.state.read().expect("lineage lock poisoned");
        state.events.clone()
    }

    /// Render the tree containing `session` as ASCII art.
    ///
    /// Example output:
    /// ```text
    /// 7f3a
    /// ├── 91bc ↺2
    /// │   └── c0de
    /// └── e4f1
    /// ```
    pub fn render(&self, session: &str) -> String {
        let state = self.state.read().expect("lineage lock poisoned");
        let root = state.root_of(session);
        let mut output = String::new();
        render_node(&state, &mut output, &root, "", true, true);
        output
    }
}

/// Recursively render a session and its copies.
fn render_node(
    state: &LineageState,
    output: &mut String,
    session: &str,
    prefix: &str,
    is_last: bool,
    is_root: bool,
) {
    if !is_root {
        let branch = if is_last { "└── " } else { "├── " };
        output.push_str(prefix);
        output.push_str(branch);
    }
    output.push_str(session);
    if let Some(&resets) = state.resets.get(session) {
        output.push(' ');
        output.push(RESET_MARK);
        output.push_str(&resets.to_string());
    }
    output.push('\n');

    let child_prefix = if is_root {
        String::new()
    } else {
        let continuation = if is_last { "    " } else { "│   " };
        format!("{}{}", prefix, continuation)
    };

    if let Some(children) = state.children.get(session) {
        for (i, child) in children.iter().enumerate() {
            let child_is_last = i == children.len() - 1;
            render_node(state, output, child, &child_prefix, child_is_last, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_session_is_a_root() {
        let lineage = LineageTracker::new();
        assert!(lineage.ancestors("ghost").is_empty());
        assert_eq!(lineage.root_of("ghost"), "ghost");
        assert!(lineage.children("ghost").is_empty());
    }

    #[test]
    fn ancestors_of_a_copy_extend_the_source_chain() {
        let lineage = LineageTracker::new();
        lineage.register_root("root");
        lineage.record_copy("root", "a").unwrap();
        lineage.record_copy("a", "b").unwrap();

        let mut expected = lineage.ancestors("a");
        expected.push("a".to_string());
        assert_eq!(lineage.ancestors("b"), expected);
        assert_eq!(lineage.ancestors("b"), vec!["root", "a"]);
        assert_eq!(lineage.root_of("b"), "root");
    }

    #[test]
    fn children_lists_every_copy() {
        let lineage = LineageTracker::new();
        lineage.record_copy("root", "a").unwrap();
        lineage.record_copy("root", "b").unwrap();
        let children: Vec<_> = lineage.children("root").into_iter().collect();
        assert_eq!(children, vec!["a", "b"]);
    }

    #[test]
    fn copy_to_an_issued_id_is_rejected() {
        let lineage = LineageTracker::new();
        lineage.record_copy("root", "a").unwrap();

        // Would create a cycle root -> a -> root.
        let err = lineage.record_copy("a", "root").unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        // Would give `a` a second parent.
        let err = lineage.record_copy("root", "a").unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert!(matches!(
            lineage.record_copy("a", "a"),
            Err(Error::ProtocolViolation(_))
        ));
        assert_eq!(lineage.events().len(), 1);
    }

    #[test]
    fn reset_keeps_position_in_the_forest() {
        let lineage = LineageTracker::new();
        lineage.record_copy("root", "a").unwrap();
        let edge = lineage.record_reset("a");

        assert_eq!(edge.reason, BranchReason::Reset);
        assert_eq!(edge.parent, edge.child);
        assert_eq!(lineage.parent("a").as_deref(), Some("root"));
        assert_eq!(lineage.reset_count("a"), 1);
        assert_eq!(lineage.events().len(), 2);
    }

    #[test]
    fn restore_replays_events_in_order() {
        let source = LineageTracker::new();
        source.record_copy("root", "a").unwrap();
        source.record_reset("a");
        source.record_copy("a", "b").unwrap();

        let replica = LineageTracker::new();
        for edge in source.events() {
            replica.restore(edge).unwrap();
        }
        assert_eq!(replica.ancestors("b"), vec!["root", "a"]);
        assert_eq!(replica.reset_count("a"), 1);
        assert_eq!(replica.events(), source.events());
    }

    #[test]
    fn render_draws_the_whole_tree_with_reset_marks() {
        let lineage = LineageTracker::new();
        lineage.record_copy("root", "a").unwrap();
        lineage.record_copy("root", "b").unwrap();
        lineage.record_copy("a", "c").unwrap();
        lineage.record_reset("a");
        lineage.record_reset("a");

        let expected = "root\n├── a ↺2\n│   └── c\n└── b\n";
        assert_eq!(lineage.render("c"), expected);
    }

    #[test]
    fn concurrent_copies_keep_the_forest_consistent() {
        let lineage = LineageTracker::new();
        lineage.register_root("root");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let lineage = lineage.clone();
                std::thread::spawn(move || {
                    let child = format!("child-{}", i);
                    lineage.record_copy("root", &child).unwrap();
                    lineage.record_copy(&child, &format!("{}-leaf", child)).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(lineage.children("root").len(), 8);
        for i in 0..8 {
            let leaf = format!("child-{}-leaf", i);
            assert_eq!(lineage.ancestors(&leaf), vec!["root".to_string(), format!("child-{}", i)]);
        }
    }
}
