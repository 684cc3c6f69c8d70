//! Workspace: owner of the block graph and its connection index.
//!
//! A [`Workspace`] holds the block and connection arenas, the four per-kind
//! [`ConnectionDb`]s (an explicit field, constructed with the workspace — no
//! process-wide state), the snap radius, the drag-in-progress flag, and a
//! queue of render requests for the external renderer.
//!
//! All mutation is synchronous and single-threaded: the workspace is owned by
//! the UI/interaction loop, and the index is consistent (sorted, complete)
//! after every `connect`/`disconnect`/move before the next query runs.
//! `Workspace` is deliberately not `Sync`-aware; sharing one across threads
//! would need an external synchronization layer.

use anyhow::{Result, bail};
use log::debug;

use crate::block::{
    BLOCK_WIDTH, Block, BlockArena, BlockId, BlockTemplate, Input, InputKind, ROW_HEIGHT,
    STATEMENT_NOTCH_X, TypeCheck,
};
use crate::connection::{
    Connection, ConnectionArena, ConnectionId, ConnectionKind, Point, connection_allowed,
};
use crate::connection_db::{ClosestCandidate, ConnectionDb, ConnectionDbSet};

/// Default maximum pixel distance at which a dragged connection snaps onto a
/// partner.
pub const DEFAULT_SNAP_RADIUS: f64 = 15.0;

// ────────────────────────────────────────────────────────────────────────────
// Render requests
// ────────────────────────────────────────────────────────────────────────────

/// How much re-rendering a block needs after a graph change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderKind {
    /// The block's shape changed (a stack grew or shrank): full relayout.
    FullRelayout,
    /// Only the block's position changed: translate, no reshaping.
    PositionOnly,
}

/// A pending re-render the external renderer should perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRequest {
    pub block: BlockId,
    pub kind: RenderKind,
}

// ────────────────────────────────────────────────────────────────────────────
// Workspace
// ────────────────────────────────────────────────────────────────────────────

/// The block graph plus its spatial connection index.
#[derive(Debug)]
pub struct Workspace {
    blocks: BlockArena,
    connections: ConnectionArena,
    dbs: ConnectionDbSet,
    snap_radius: f64,
    dragging: bool,
    render_queue: Vec<RenderRequest>,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    pub fn new() -> Self {
        Self::with_snap_radius(DEFAULT_SNAP_RADIUS)
    }

    pub fn with_snap_radius(snap_radius: f64) -> Self {
        Self {
            blocks: BlockArena::default(),
            connections: ConnectionArena::default(),
            dbs: ConnectionDbSet::new(),
            snap_radius,
            dragging: false,
            render_queue: Vec::new(),
        }
    }

    pub fn snap_radius(&self) -> f64 {
        self.snap_radius
    }

    pub fn set_snap_radius(&mut self, radius: f64) {
        self.snap_radius = radius;
    }

    /// Set by the drag controller while a gesture is active. Bumping is
    /// suppressed for its duration so the engine never fights the user's own
    /// drag.
    pub fn set_dragging(&mut self, dragging: bool) {
        self.dragging = dragging;
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Drain the pending render requests, in the order they were produced.
    pub fn take_render_requests(&mut self) -> Vec<RenderRequest> {
        std::mem::take(&mut self.render_queue)
    }

    // ── accessors ───────────────────────────────────────────────────────────

    /// Look up a live block; panics on a disposed id.
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    /// Look up a live connection; panics on a disposed id.
    pub fn connection(&self, id: ConnectionId) -> &Connection {
        &self.connections[id]
    }

    /// Iterate all live blocks in creation order.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks.iter()
    }

    /// Top-level blocks: live blocks with no parent.
    pub fn top_blocks(&self) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|(_, b)| b.parent_block(&self.connections).is_none())
            .map(|(id, _)| id)
            .collect()
    }

    /// The database holding the given kind's connections.
    pub fn connection_db(&self, kind: ConnectionKind) -> &ConnectionDb {
        self.dbs.get(kind)
    }

    /// Read-only view of the connection arena, for use with the
    /// [`ConnectionDb`] query API.
    pub fn connection_arena(&self) -> &ConnectionArena {
        &self.connections
    }

    /// Read-only view of the block arena.
    pub fn block_arena(&self) -> &BlockArena {
        &self.blocks
    }

    /// Root of the stack a block belongs to (the block itself if unparented).
    pub fn root_block_of(&self, mut id: BlockId) -> BlockId {
        while let Some(parent) = self.blocks[id].parent_block(&self.connections) {
            id = parent;
        }
        id
    }

    // ── block creation / disposal ───────────────────────────────────────────

    /// Instantiate a template as a live block at the given position. All of
    /// its connections are registered in their databases immediately.
    pub fn add_block(&mut self, template: &BlockTemplate, x: f64, y: f64) -> Result<BlockId> {
        self.instantiate(template, Point::new(x, y), false)
    }

    /// Instantiate a template as a flyout (palette) block. Flyout blocks are
    /// display-only: their connections are never indexed and they are exempt
    /// from bumping.
    pub fn add_flyout_block(
        &mut self,
        template: &BlockTemplate,
        x: f64,
        y: f64,
    ) -> Result<BlockId> {
        self.instantiate(template, Point::new(x, y), true)
    }

    fn instantiate(
        &mut self,
        template: &BlockTemplate,
        origin: Point,
        in_flyout: bool,
    ) -> Result<BlockId> {
        let id = self.blocks.insert(Block {
            type_name: template.name.clone(),
            position: origin,
            movable: template.movable,
            in_flyout,
            collapsed: false,
            output: None,
            previous: None,
            next: None,
            inputs: Vec::new(),
            fields: template.fields.clone(),
        });

        if let Some(check) = &template.output {
            let conn = self.create_connection(
                id,
                ConnectionKind::OutputValue,
                check.clone(),
                Point::new(0.0, ROW_HEIGHT / 2.0),
            )?;
            self.blocks[id].output = Some(conn);
        }
        if let Some(check) = &template.previous {
            let conn = self.create_connection(
                id,
                ConnectionKind::PreviousStatement,
                check.clone(),
                Point::new(0.0, 0.0),
            )?;
            self.blocks[id].previous = Some(conn);
        }
        for (row, input) in template.inputs.iter().enumerate() {
            let (kind, offset) = match input.kind {
                InputKind::Value => (
                    ConnectionKind::InputValue,
                    Point::new(BLOCK_WIDTH, ROW_HEIGHT / 2.0 + row as f64 * ROW_HEIGHT),
                ),
                InputKind::Statement => (
                    ConnectionKind::NextStatement,
                    Point::new(STATEMENT_NOTCH_X, (row as f64 + 1.0) * ROW_HEIGHT),
                ),
            };
            let conn = self.create_connection(id, kind, input.check.clone(), offset)?;
            self.blocks[id].inputs.push(Input {
                name: input.name.clone(),
                kind: input.kind,
                connection: conn,
            });
        }
        if let Some(check) = &template.next {
            let height = ROW_HEIGHT * (1.0 + template.inputs.len() as f64);
            let conn = self.create_connection(
                id,
                ConnectionKind::NextStatement,
                check.clone(),
                Point::new(0.0, height),
            )?;
            self.blocks[id].next = Some(conn);
        }
        Ok(id)
    }

    fn create_connection(
        &mut self,
        block: BlockId,
        kind: ConnectionKind,
        check: TypeCheck,
        offset: Point,
    ) -> Result<ConnectionId> {
        let origin = self.blocks[block].position;
        let in_flyout = self.blocks[block].in_flyout;
        let id = self.connections.insert(Connection {
            kind,
            block,
            check: check.into_check(),
            target: None,
            pos: Point::new(origin.x + offset.x, origin.y + offset.y),
            offset_in_block: offset,
            hidden: false,
            in_db: false,
            in_flyout,
        });
        self.dbs
            .get_mut(kind)
            .add_connection(&mut self.connections, id)?;
        Ok(id)
    }

    /// Set a field value (e.g. a number literal's text) on a block.
    pub fn set_field(
        &mut self,
        id: BlockId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.blocks[id].fields.insert(name.into(), value.into());
    }

    /// Dispose a block and everything nested inside it. Blocks stacked below
    /// via the next notch are siblings, not content: they are detached first
    /// and survive. The block is unplugged from its parent; all of its
    /// connections leave their databases and become unusable.
    pub fn dispose_block(&mut self, id: BlockId) -> Result<()> {
        if let Some(next) = self.blocks[id].next {
            if self.connections[next].target.is_some() {
                self.disconnect(next)?;
            }
        }
        self.dispose_subtree(id)
    }

    fn dispose_subtree(&mut self, id: BlockId) -> Result<()> {
        let parent_side: Vec<ConnectionId> = {
            let block = &self.blocks[id];
            [block.output, block.previous].into_iter().flatten().collect()
        };
        for conn in parent_side {
            if self.connections[conn].target.is_some() {
                self.disconnect(conn)?;
            }
        }
        for child in self.blocks[id].child_blocks(&self.connections) {
            self.dispose_subtree(child)?;
        }
        for conn in self.blocks[id].connection_ids() {
            if let Some(target) = self.connections[conn].target {
                self.break_link(conn, target);
            }
            if self.connections[conn].in_db {
                let kind = self.connections[conn].kind;
                self.dbs
                    .get_mut(kind)
                    .remove_connection(&mut self.connections, conn)?;
            }
            self.connections.remove(conn);
        }
        self.blocks.remove(id);
        Ok(())
    }

    // ── movement & visibility ───────────────────────────────────────────────

    /// Move a block and its whole subtree by a delta, keeping every affected
    /// connection's index entry current.
    pub fn move_block_by(&mut self, id: BlockId, dx: f64, dy: f64) -> Result<()> {
        for bid in self.collect_subtree(id) {
            let pos = self.blocks[bid].position;
            self.blocks[bid].position = Point::new(pos.x + dx, pos.y + dy);
            for conn in self.blocks[bid].connection_ids() {
                let p = self.connections[conn].pos;
                self.move_connection_to(conn, p.x + dx, p.y + dy)?;
            }
        }
        Ok(())
    }

    /// Move a block (and subtree) so its origin lands at the given position.
    pub fn move_block_to(&mut self, id: BlockId, x: f64, y: f64) -> Result<()> {
        let pos = self.blocks[id].position;
        self.move_block_by(id, x - pos.x, y - pos.y)
    }

    /// Renderer reflow hook: update a connection's offset inside its block and
    /// re-derive its absolute position.
    pub fn set_connection_offset(&mut self, id: ConnectionId, offset: Point) -> Result<()> {
        self.connections[id].offset_in_block = offset;
        let origin = self.blocks[self.connections[id].block].position;
        self.move_connection_to(id, origin.x + offset.x, origin.y + offset.y)
    }

    /// Remove from the index, update coordinates, re-add unless hidden.
    fn move_connection_to(&mut self, id: ConnectionId, x: f64, y: f64) -> Result<()> {
        let kind = self.connections[id].kind;
        if self.connections[id].in_db {
            self.dbs
                .get_mut(kind)
                .remove_connection(&mut self.connections, id)?;
        }
        self.connections[id].pos = Point::new(x, y);
        if !self.connections[id].hidden {
            self.dbs
                .get_mut(kind)
                .add_connection(&mut self.connections, id)?;
        }
        Ok(())
    }

    /// Register a connection in its kind's database. External collaborators
    /// (e.g. a deserializer re-creating connections) use this; there is no
    /// bulk-load path. Fails loudly if the connection is already indexed;
    /// silently skips flyout connections.
    pub fn index_connection(&mut self, id: ConnectionId) -> Result<()> {
        let kind = self.connections[id].kind;
        self.dbs
            .get_mut(kind)
            .add_connection(&mut self.connections, id)
    }

    /// Remove a connection from its kind's database. Fails if it is not a
    /// member.
    pub fn unindex_connection(&mut self, id: ConnectionId) -> Result<()> {
        let kind = self.connections[id].kind;
        self.dbs
            .get_mut(kind)
            .remove_connection(&mut self.connections, id)
    }

    /// Hide or reveal a single connection, maintaining index membership.
    pub fn set_connection_hidden(&mut self, id: ConnectionId, hidden: bool) -> Result<()> {
        self.connections[id].hidden = hidden;
        let kind = self.connections[id].kind;
        if hidden && self.connections[id].in_db {
            self.dbs
                .get_mut(kind)
                .remove_connection(&mut self.connections, id)?;
        } else if !hidden && !self.connections[id].in_db {
            self.dbs
                .get_mut(kind)
                .add_connection(&mut self.connections, id)?;
        }
        Ok(())
    }

    /// Collapse or expand a block. Collapsing hides the block's input
    /// connections and everything nested inside them; the
    /// output/previous/next connections stay visible so the collapsed block
    /// itself remains connectable. Expanding reveals the content again,
    /// except inside nested blocks that are still collapsed themselves.
    pub fn set_collapsed(&mut self, id: BlockId, collapsed: bool) -> Result<()> {
        if self.blocks[id].collapsed == collapsed {
            return Ok(());
        }
        self.blocks[id].collapsed = collapsed;
        self.refresh_input_visibility(id, false)?;
        self.render_queue.push(RenderRequest {
            block: id,
            kind: RenderKind::FullRelayout,
        });
        Ok(())
    }

    /// Re-derive the hidden state of a block's input connections and their
    /// contents. `enclosed` is true when the block itself sits inside a
    /// collapsed ancestor's input.
    fn refresh_input_visibility(&mut self, id: BlockId, enclosed: bool) -> Result<()> {
        let hidden = enclosed || self.blocks[id].collapsed;
        let inputs: Vec<ConnectionId> =
            self.blocks[id].inputs.iter().map(|i| i.connection).collect();
        for conn in inputs {
            self.set_connection_hidden(conn, hidden)?;
            if let Some(target) = self.connections[conn].target {
                let child = self.connections[target].block;
                self.refresh_content_visibility(child, hidden)?;
            }
        }
        Ok(())
    }

    /// Re-derive the hidden state of a block living inside an input. Its
    /// outward connections follow the enclosing visibility, its own inputs
    /// additionally honor its own collapsed flag, and the stack below it
    /// belongs to the same content.
    fn refresh_content_visibility(&mut self, id: BlockId, hidden: bool) -> Result<()> {
        let outward: Vec<ConnectionId> = {
            let block = &self.blocks[id];
            [block.output, block.previous, block.next]
                .into_iter()
                .flatten()
                .collect()
        };
        for conn in outward {
            self.set_connection_hidden(conn, hidden)?;
        }
        self.refresh_input_visibility(id, hidden)?;
        let sibling = self.blocks[id]
            .next
            .and_then(|next| self.connections[next].target)
            .map(|target| self.connections[target].block);
        if let Some(sibling) = sibling {
            self.refresh_content_visibility(sibling, hidden)?;
        }
        Ok(())
    }

    /// A block plus every block attached below or inside it, breadth-first.
    fn collect_subtree(&self, id: BlockId) -> Vec<BlockId> {
        let mut out = vec![id];
        let mut cursor = 0;
        while cursor < out.len() {
            let children = self.blocks[out[cursor]].child_blocks(&self.connections);
            out.extend(children);
            cursor += 1;
        }
        out
    }

    // ── queries ─────────────────────────────────────────────────────────────

    /// Snap-candidate search for a dragged connection: the nearest compatible,
    /// unobstructed partner within `max_radius`, as if the connection had
    /// moved by `dxy` from its last indexed position. The index is left
    /// untouched; the temporary coordinate offset is always restored.
    pub fn closest_connection(
        &mut self,
        id: ConnectionId,
        max_radius: f64,
        dxy: Point,
    ) -> ClosestCandidate {
        let opposite = self.connections[id].kind.opposite();
        self.dbs.get(opposite).search_for_closest(
            &mut self.connections,
            &self.blocks,
            id,
            max_radius,
            dxy,
        )
    }

    /// All connections of the opposite kind within `max_radius`, regardless
    /// of compatibility. Used for bumping, not for snap candidates.
    pub fn neighbours(&self, id: ConnectionId, max_radius: f64) -> Vec<ConnectionId> {
        let opposite = self.connections[id].kind.opposite();
        self.dbs
            .get(opposite)
            .get_neighbours(&self.connections, id, max_radius)
    }

    /// Whether `candidate` would be accepted as a partner for `id` within the
    /// given radius: distance, kind, type checks, occupancy, and cycle rules.
    pub fn is_connection_allowed(
        &self,
        id: ConnectionId,
        candidate: ConnectionId,
        max_radius: f64,
    ) -> bool {
        connection_allowed(
            &self.connections,
            &self.blocks,
            id,
            candidate,
            max_radius,
            false,
        )
    }

    // ── connect / disconnect ────────────────────────────────────────────────

    /// Join two complementary connections, updating both sides and queueing a
    /// render request for the block whose shape changed: a full relayout of
    /// the superior block for statement connections, a positional shift of the
    /// inferior block for value connections.
    ///
    /// If the superior side is already occupied, the previous child is
    /// unplugged first: a statement orphan is spliced onto the bottom of the
    /// incoming stack when a compatible notch is free there, otherwise the
    /// orphan is bumped aside.
    pub fn connect(&mut self, a: ConnectionId, b: ConnectionId) -> Result<()> {
        let kind_a = self.connections[a].kind;
        let kind_b = self.connections[b].kind;
        if kind_b != kind_a.opposite() {
            bail!(
                "connection kinds are not complementary: {:?} vs {:?}",
                kind_a,
                kind_b
            );
        }
        let (sup, inf) = if kind_a.is_superior() { (a, b) } else { (b, a) };
        let sup_block = self.connections[sup].block;
        let inf_block = self.connections[inf].block;
        if sup_block == inf_block {
            bail!("cannot connect a block to itself");
        }
        if !self.connections[sup].checks_compatible(&self.connections[inf]) {
            bail!("type checks do not match");
        }
        let mut cursor = Some(sup_block);
        while let Some(bid) = cursor {
            if bid == inf_block {
                bail!("connection would create a cycle");
            }
            cursor = self.blocks[bid].parent_block(&self.connections);
        }
        if self.connections[inf].target.is_some() {
            bail!("inferior connection already connected");
        }

        let orphan = self.connections[sup].target;
        if let Some(orphan) = orphan {
            self.break_link(sup, orphan);
        }

        self.connections[sup].target = Some(inf);
        self.connections[inf].target = Some(sup);
        debug!(
            "connected {:?} block {:?} -> {:?} block {:?}",
            self.connections[sup].kind, sup_block, self.connections[inf].kind, inf_block
        );

        if let Some(orphan) = orphan {
            self.place_orphan(sup, inf_block, orphan)?;
        }

        let request = if self.connections[sup].kind.is_value() {
            RenderRequest {
                block: inf_block,
                kind: RenderKind::PositionOnly,
            }
        } else {
            RenderRequest {
                block: sup_block,
                kind: RenderKind::FullRelayout,
            }
        };
        self.render_queue.push(request);
        Ok(())
    }

    /// Re-home a child displaced by a new connection: splice statement
    /// orphans onto the bottom of the incoming stack when possible, bump
    /// everything else aside.
    fn place_orphan(
        &mut self,
        sup: ConnectionId,
        incoming_block: BlockId,
        orphan: ConnectionId,
    ) -> Result<()> {
        if self.connections[sup].kind == ConnectionKind::NextStatement {
            if let Some(bottom) = self.stack_bottom_next(incoming_block) {
                if self.connections[bottom].checks_compatible(&self.connections[orphan]) {
                    return self.connect(bottom, orphan);
                }
            }
        }
        self.bump_away_from(orphan, sup);
        Ok(())
    }

    /// The free next-notch at the bottom of the stack starting at `block`,
    /// or `None` if the last block of the stack has no next connection.
    fn stack_bottom_next(&self, mut block: BlockId) -> Option<ConnectionId> {
        loop {
            let next = self.blocks[block].next?;
            match self.connections[next].target {
                Some(target) => block = self.connections[target].block,
                None => return Some(next),
            }
        }
    }

    /// Unplug a connection from its partner. Queues the same render request
    /// kinds as [`Workspace::connect`].
    pub fn disconnect(&mut self, id: ConnectionId) -> Result<()> {
        let Some(target) = self.connections[id].target else {
            bail!("connection is not connected");
        };
        let (sup, inf) = if self.connections[id].kind.is_superior() {
            (id, target)
        } else {
            (target, id)
        };
        let sup_block = self.connections[sup].block;
        let inf_block = self.connections[inf].block;
        self.break_link(sup, inf);
        debug!(
            "disconnected {:?} block {:?} from block {:?}",
            self.connections[sup].kind, sup_block, inf_block
        );
        let request = if self.connections[sup].kind.is_value() {
            RenderRequest {
                block: inf_block,
                kind: RenderKind::PositionOnly,
            }
        } else {
            RenderRequest {
                block: sup_block,
                kind: RenderKind::FullRelayout,
            }
        };
        self.render_queue.push(request);
        Ok(())
    }

    fn break_link(&mut self, a: ConnectionId, b: ConnectionId) {
        self.connections[a].target = None;
        self.connections[b].target = None;
    }

    // ── bump & tighten ──────────────────────────────────────────────────────

    /// Push the movable side away so `id` ends up a fixed visual offset from
    /// `static_conn`: snap-radius to the right, twice that below. No-op while
    /// a drag is in progress, and when neither side's root stack is movable.
    pub fn bump_away_from(&mut self, id: ConnectionId, static_conn: ConnectionId) {
        if self.dragging {
            return;
        }
        let mut moving = id;
        let mut fixed = static_conn;
        let mut reverse = false;
        let mut root = self.root_block_of(self.connections[moving].block);
        if self.blocks[root].in_flyout {
            return;
        }
        if !self.blocks[root].movable {
            root = self.root_block_of(self.connections[fixed].block);
            if !self.blocks[root].movable || self.blocks[root].in_flyout {
                return;
            }
            std::mem::swap(&mut moving, &mut fixed);
            // Bumping the opposite side goes upward instead.
            reverse = true;
        }
        let m = self.connections[moving].pos;
        let f = self.connections[fixed].pos;
        let dx = (f.x + self.snap_radius) - m.x;
        let mut dy = (f.y + self.snap_radius * 2.0) - m.y;
        if reverse {
            dy = -dy;
        }
        if let Err(err) = self.move_block_by(root, dx, dy) {
            debug!("bump of block {:?} failed: {}", root, err);
        }
    }

    /// Bump every unconnected neighbour of a block's connections out of the
    /// snap radius. Connected pairs and blocks in the same stack are left
    /// alone; the superior side always stays put.
    pub fn bump_neighbours(&mut self, id: BlockId) {
        let radius = self.snap_radius;
        let root = self.root_block_of(id);
        for conn in self.blocks[id].connection_ids() {
            if self.connections[conn].hidden {
                continue;
            }
            for other in self.neighbours(conn, radius) {
                if self.connections[conn].target.is_some()
                    && self.connections[other].target.is_some()
                {
                    continue;
                }
                if self.root_block_of(self.connections[other].block) == root {
                    continue;
                }
                if self.connections[conn].kind.is_superior() {
                    self.bump_away_from(other, conn);
                } else {
                    self.bump_away_from(conn, other);
                }
            }
        }
    }

    /// Remove positional slack after a drag: snap the child block (and its
    /// subtree) so its connection coincides exactly with the parent's
    /// coordinates. A direct delta, not an animation.
    pub fn tighten(&mut self, id: ConnectionId) -> Result<()> {
        let Some(target) = self.connections[id].target else {
            return Ok(());
        };
        let (sup, inf) = if self.connections[id].kind.is_superior() {
            (id, target)
        } else {
            (target, id)
        };
        let sup_pos = self.connections[sup].pos;
        let inf_pos = self.connections[inf].pos;
        let dx = sup_pos.x - inf_pos.x;
        let dy = sup_pos.y - inf_pos.y;
        if dx != 0.0 || dy != 0.0 {
            let child = self.connections[inf].block;
            self.move_block_by(child, dx, dy)?;
            self.render_queue.push(RenderRequest {
                block: child,
                kind: RenderKind::PositionOnly,
            });
        }
        Ok(())
    }
}
