//! Typed attachment points between blocks.
//!
//! Every block exposes a set of [`Connection`]s: an output plug, a previous/next
//! statement notch, and one connection per input socket. Connections are the
//! only way blocks reference each other; the block tree is entirely encoded in
//! their `target` links.
//!
//! Connections live in a [`ConnectionArena`] owned by the workspace and are
//! addressed by [`ConnectionId`]. The arena never reuses a slot, so a stale id
//! of a disposed connection can be detected instead of silently aliasing a new
//! one.

use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

use crate::block::{BlockArena, BlockId};

// ────────────────────────────────────────────────────────────────────────────
// Point
// ────────────────────────────────────────────────────────────────────────────

/// A position in workspace coordinates (pixels, y grows downwards).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance_to(&self, other: Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ConnectionKind
// ────────────────────────────────────────────────────────────────────────────

/// The four kinds of attachment points.
///
/// Kinds come in complementary pairs: a value input socket accepts a value
/// output plug, and a next-statement notch accepts a previous-statement notch.
/// A connection's kind is fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionKind {
    /// Value input socket on the right edge of a block.
    InputValue,
    /// Value output plug on the left edge of a block.
    OutputValue,
    /// Notch under a statement block (or inside a statement input).
    NextStatement,
    /// Notch on top of a statement block.
    PreviousStatement,
}

impl ConnectionKind {
    /// All kinds, in the order used to index per-kind databases.
    pub const ALL: [ConnectionKind; 4] = [
        ConnectionKind::InputValue,
        ConnectionKind::OutputValue,
        ConnectionKind::NextStatement,
        ConnectionKind::PreviousStatement,
    ];

    /// The kind this one connects to.
    pub fn opposite(self) -> ConnectionKind {
        match self {
            ConnectionKind::InputValue => ConnectionKind::OutputValue,
            ConnectionKind::OutputValue => ConnectionKind::InputValue,
            ConnectionKind::NextStatement => ConnectionKind::PreviousStatement,
            ConnectionKind::PreviousStatement => ConnectionKind::NextStatement,
        }
    }

    /// True for the parent-side kinds (input sockets and next-statement
    /// notches). The superior side owns the inferior block in the tree.
    pub fn is_superior(self) -> bool {
        matches!(
            self,
            ConnectionKind::InputValue | ConnectionKind::NextStatement
        )
    }

    /// True for value connections (as opposed to statement connections).
    pub fn is_value(self) -> bool {
        matches!(
            self,
            ConnectionKind::InputValue | ConnectionKind::OutputValue
        )
    }

    pub(crate) fn db_index(self) -> usize {
        match self {
            ConnectionKind::InputValue => 0,
            ConnectionKind::OutputValue => 1,
            ConnectionKind::NextStatement => 2,
            ConnectionKind::PreviousStatement => 3,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Connection
// ────────────────────────────────────────────────────────────────────────────

/// Handle to a [`Connection`] in the workspace's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub(crate) u32);

/// A typed attachment point on a block.
///
/// Carries the connection's absolute workspace position, its offset inside the
/// owning block, and its index-membership bookkeeping. Position is maintained
/// by the workspace whenever the owning block moves or reflows.
#[derive(Debug, Clone)]
pub struct Connection {
    pub(crate) kind: ConnectionKind,
    pub(crate) block: BlockId,
    /// Accepted type names; `None` accepts anything.
    pub(crate) check: Option<Vec<String>>,
    pub(crate) target: Option<ConnectionId>,
    pub(crate) pos: Point,
    pub(crate) offset_in_block: Point,
    /// Hidden connections (inside a collapsed block) are excluded from the
    /// spatial index.
    pub(crate) hidden: bool,
    /// True iff this connection is currently a member of its kind's database.
    pub(crate) in_db: bool,
    /// Copied from the owning block at creation: flyout blocks are palette
    /// templates and their connections are never indexed.
    pub(crate) in_flyout: bool,
}

impl Connection {
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    /// The block this connection belongs to.
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// The connection this one is plugged into, if any.
    pub fn target(&self) -> Option<ConnectionId> {
        self.target
    }

    pub fn is_connected(&self) -> bool {
        self.target.is_some()
    }

    /// Absolute position in workspace coordinates.
    pub fn position(&self) -> Point {
        self.pos
    }

    /// Position relative to the owning block's origin.
    pub fn offset_in_block(&self) -> Point {
        self.offset_in_block
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn is_in_db(&self) -> bool {
        self.in_db
    }

    /// The type-check list, `None` meaning "accepts anything".
    pub fn check(&self) -> Option<&[String]> {
        self.check.as_deref()
    }

    /// Euclidean distance between this connection and another.
    pub fn distance_from(&self, other: &Connection) -> f64 {
        self.pos.distance_to(other.pos)
    }

    /// True if the two check lists are compatible: either side unconstrained,
    /// or a shared type name exists.
    pub fn checks_compatible(&self, other: &Connection) -> bool {
        match (&self.check, &other.check) {
            (None, _) | (_, None) => true,
            (Some(a), Some(b)) => a.iter().any(|t| b.contains(t)),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Compatibility rules
// ────────────────────────────────────────────────────────────────────────────

/// Decide whether `candidate` may be offered as a snap target for `probe`.
///
/// `radius_limit` is the current search radius; when `tighten` is set an
/// equally-distant candidate is rejected so that the first candidate found at
/// a given distance wins and only strictly closer ones replace it.
///
/// Beyond the distance check this enforces the full connection policy:
/// complementary kinds, intersecting check lists, no self-connection, no
/// nesting a block inside its own descendants, and the occupancy rules that
/// keep a drop from silently stealing an existing child.
pub(crate) fn connection_allowed(
    conns: &ConnectionArena,
    blocks: &BlockArena,
    probe: ConnectionId,
    candidate: ConnectionId,
    radius_limit: f64,
    tighten: bool,
) -> bool {
    let p = &conns[probe];
    let c = &conns[candidate];

    let dist = p.distance_from(c);
    if dist > radius_limit || (tighten && dist >= radius_limit) {
        return false;
    }
    if c.kind != p.kind.opposite() {
        return false;
    }
    if !p.checks_compatible(c) {
        return false;
    }

    match c.kind {
        // Don't offer an already-plugged output or previous notch.
        ConnectionKind::OutputValue | ConnectionKind::PreviousStatement => {
            if c.target.is_some() {
                return false;
            }
        }
        // An occupied input socket can be spliced into, but not when the
        // current child is pinned in place.
        ConnectionKind::InputValue => {
            if let Some(t) = c.target {
                if !blocks[conns[t].block].is_movable() {
                    return false;
                }
            }
        }
        // Splicing into a stack needs a free notch at the bottom of the
        // incoming block; otherwise the existing child would be orphaned
        // with nowhere to go.
        ConnectionKind::NextStatement => {
            if c.target.is_some() && blocks[p.block].next_connection().is_none() {
                return false;
            }
        }
    }

    // Reject self-connections and anything that would nest a block inside
    // its own subtree: walk up from the candidate's block through parents.
    let mut cursor = Some(c.block);
    while let Some(b) = cursor {
        if b == p.block {
            return false;
        }
        cursor = blocks[b].parent_block(conns);
    }

    true
}

// ────────────────────────────────────────────────────────────────────────────
// ConnectionArena
// ────────────────────────────────────────────────────────────────────────────

/// Slot storage for all connections of one workspace.
///
/// Slots of disposed connections stay `None`; indexing a disposed id panics,
/// which surfaces caller bookkeeping bugs instead of corrupting the graph.
#[derive(Debug, Default, Clone)]
pub struct ConnectionArena {
    slots: Vec<Option<Connection>>,
}

impl ConnectionArena {
    pub(crate) fn insert(&mut self, conn: Connection) -> ConnectionId {
        let id = ConnectionId(self.slots.len() as u32);
        self.slots.push(Some(conn));
        id
    }

    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.slots.get_mut(id.0 as usize).and_then(Option::take)
    }

    /// Non-panicking lookup; `None` for disposed or unknown ids.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Index<ConnectionId> for ConnectionArena {
    type Output = Connection;

    fn index(&self, id: ConnectionId) -> &Connection {
        self.slots[id.0 as usize]
            .as_ref()
            .unwrap_or_else(|| panic!("connection {:?} has been disposed", id))
    }
}

impl IndexMut<ConnectionId> for ConnectionArena {
    fn index_mut(&mut self, id: ConnectionId) -> &mut Connection {
        self.slots[id.0 as usize]
            .as_mut()
            .unwrap_or_else(|| panic!("connection {:?} has been disposed", id))
    }
}
