//! Navigation forest of displayed topics.
//!
//! Each root is a viewer window with no topic of its own. Its children form
//! one chain: `next` points to the older page (the back stack) and `sibling`
//! to the newer one (the forward stack), so back and forward share a single
//! linkage. `lastborn` is the page currently shown. Any page can in turn act
//! as the root of a nested chain.
//!
//! Nodes live in an arena and are addressed by [`TopicId`]; ids carry a
//! generation so a handle to a destroyed node never aliases its successor.

use crate::topic::Topic;
use crate::{Error, Result};
use tracing::debug;

/// Handle to a node of a [`TopicTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopicId {
    index: usize,
    generation: u32,
}

/// Result of [`TopicTree::link_new_and_show`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Linked {
    /// Node whose chain now shows the topic.
    pub root: TopicId,
    /// Node holding the shown topic.
    pub shown: TopicId,
}

#[derive(Debug)]
struct Node {
    topic: Option<Topic>,
    parent: Option<TopicId>,
    lastborn: Option<TopicId>,
    next: Option<TopicId>,
    sibling: Option<TopicId>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena-backed topic forest.
#[derive(Debug, Default)]
pub struct TopicTree {
    slots: Vec<Slot>,
    free: Vec<usize>,
    roots: Vec<TopicId>,
}

impl TopicTree {
    /// Creates an empty forest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, node: Node) -> TopicId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.node = Some(node);
            TopicId {
                index,
                generation: slot.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            TopicId {
                index: self.slots.len() - 1,
                generation: 0,
            }
        }
    }

    fn node(&self, id: TopicId) -> Option<&Node> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: TopicId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    fn require(&self, id: TopicId) -> Result<&Node> {
        self.node(id)
            .ok_or_else(|| Error::NotFound(format!("topic node {}", id.index)))
    }

    /// Whether `id` refers to a live node.
    #[must_use]
    pub fn contains(&self, id: TopicId) -> bool {
        self.node(id).is_some()
    }

    /// Topic held by `id`. Window roots hold none.
    #[must_use]
    pub fn get(&self, id: TopicId) -> Option<&Topic> {
        self.node(id).and_then(|n| n.topic.as_ref())
    }

    /// Mutable topic held by `id`.
    pub fn get_mut(&mut self, id: TopicId) -> Option<&mut Topic> {
        self.node_mut(id).and_then(|n| n.topic.as_mut())
    }

    /// Parent of `id`.
    #[must_use]
    pub fn parent(&self, id: TopicId) -> Option<TopicId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Window roots in creation order.
    #[must_use]
    pub fn roots(&self) -> &[TopicId] {
        &self.roots
    }

    /// Number of live nodes, roots included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    /// Whether the forest has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Page currently shown under `root`.
    #[must_use]
    pub fn shown(&self, root: TopicId) -> Option<TopicId> {
        self.node(root).and_then(|n| n.lastborn)
    }

    /// Children of `root`, oldest first.
    #[must_use]
    pub fn children(&self, root: TopicId) -> Vec<TopicId> {
        let Some(mut oldest) = self.shown(root) else {
            return Vec::new();
        };
        while let Some(prev) = self.node(oldest).and_then(|n| n.next) {
            oldest = prev;
        }

        let mut out = vec![oldest];
        let mut cursor = oldest;
        while let Some(newer) = self.node(cursor).and_then(|n| n.sibling) {
            out.push(newer);
            cursor = newer;
        }
        out
    }

    /// Shows `topic`.
    ///
    /// With no root a new window is created. Otherwise, if the shown page
    /// has exactly the same keyword it takes over the incoming content and
    /// the incoming topic is dropped. In every other case the topic becomes
    /// the new shown page; the old one is pushed on the back stack and any
    /// forward pages are destroyed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `root` is stale.
    pub fn link_new_and_show(&mut self, root: Option<TopicId>, topic: Topic) -> Result<Linked> {
        let root = match root {
            Some(root) => {
                self.require(root)?;
                root
            },
            None => {
                let root = self.alloc(Node {
                    topic: None,
                    parent: None,
                    lastborn: None,
                    next: None,
                    sibling: None,
                });
                self.roots.push(root);
                debug!(root = root.index, "New topic window");
                root
            },
        };

        let shown = self.shown(root);
        if let Some(current) = shown {
            if let Some(existing) = self.get_mut(current).filter(|t| t.keyword == topic.keyword) {
                existing.absorb(topic);
                return Ok(Linked {
                    root,
                    shown: current,
                });
            }
            let forward = self.node(current).and_then(|n| n.sibling);
            self.destroy_chain(forward);
        }

        let id = self.alloc(Node {
            topic: Some(topic),
            parent: Some(root),
            lastborn: None,
            next: shown,
            sibling: None,
        });
        if let Some(node) = shown.and_then(|current| self.node_mut(current)) {
            node.sibling = Some(id);
        }
        if let Some(node) = self.node_mut(root) {
            node.lastborn = Some(id);
        }
        Ok(Linked { root, shown: id })
    }

    /// Steps back under `root`. Returns the newly shown page.
    pub fn back(&mut self, root: TopicId) -> Option<TopicId> {
        let older = self.shown(root).and_then(|s| self.node(s)).and_then(|n| n.next)?;
        self.node_mut(root)?.lastborn = Some(older);
        Some(older)
    }

    /// Steps forward under `root`. Returns the newly shown page.
    pub fn forward(&mut self, root: TopicId) -> Option<TopicId> {
        let newer = self.shown(root).and_then(|s| self.node(s)).and_then(|n| n.sibling)?;
        self.node_mut(root)?.lastborn = Some(newer);
        Some(newer)
    }

    /// Destroys `id` and everything beneath it, unlinking it from its
    /// parent's chain.
    ///
    /// Returns `false` if `id` is stale.
    pub fn close(&mut self, id: TopicId) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        let (parent, older, newer) = (node.parent, node.next, node.sibling);

        if let Some(n) = older.and_then(|o| self.node_mut(o)) {
            n.sibling = newer;
        }
        if let Some(n) = newer.and_then(|o| self.node_mut(o)) {
            n.next = older;
        }
        if let Some(p) = parent.and_then(|p| self.node_mut(p)) {
            if p.lastborn == Some(id) {
                p.lastborn = older.or(newer);
            }
        }
        self.roots.retain(|&r| r != id);
        self.destroy(id);
        true
    }

    fn destroy_chain(&mut self, mut cursor: Option<TopicId>) {
        while let Some(id) = cursor {
            cursor = self.node(id).and_then(|n| n.sibling);
            self.destroy(id);
        }
    }

    fn destroy(&mut self, id: TopicId) {
        for child in self.children(id) {
            self.destroy(child);
        }
        if let Some(slot) = self.slots.get_mut(id.index) {
            if slot.generation == id.generation && slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
            }
        }
    }
}
