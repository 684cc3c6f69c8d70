//! Ordered spatial index of connections.
//!
//! One [`ConnectionDb`] exists per connection kind and workspace, holding that
//! kind's connections sorted by ascending `y`. The ordering supports
//! binary-search insertion, identity lookup inside equal-`y` bands, radius
//! queries for bumping ([`ConnectionDb::get_neighbours`]), and the
//! snap-candidate search that runs on every pointer move during a drag
//! ([`ConnectionDb::search_for_closest`]).
//!
//! Index maintenance is strictly incremental: every block move removes and
//! re-inserts the affected connections, so the sequence is sorted again before
//! the next query. There is no batching and no deferred repair.

use anyhow::{Result, bail};
use log::trace;

use crate::block::BlockArena;
use crate::connection::{
    ConnectionArena, ConnectionId, ConnectionKind, Point, connection_allowed,
};

// ────────────────────────────────────────────────────────────────────────────
// ConnectionDb
// ────────────────────────────────────────────────────────────────────────────

/// Ordered collection of one kind's connections, sorted by ascending `y`.
///
/// Ties on `y` keep their insertion position; the order inside an equal-`y`
/// band is unspecified but stable for a given sequence of operations, and
/// lookups always disambiguate by identity.
#[derive(Debug, Clone)]
pub struct ConnectionDb {
    kind: ConnectionKind,
    ordered: Vec<ConnectionId>,
}

impl ConnectionDb {
    pub fn new(kind: ConnectionKind) -> Self {
        Self {
            kind,
            ordered: Vec::new(),
        }
    }

    /// The connection kind this database holds.
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// The indexed ids in their current `y` order.
    pub fn ids(&self) -> &[ConnectionId] {
        &self.ordered
    }

    /// Insert a connection at its sorted position and mark it as a member.
    ///
    /// Adding a connection that is already indexed is a caller bookkeeping bug
    /// and fails loudly. Connections of flyout (palette) blocks are silently
    /// skipped: they are never drag targets, so indexing them would only slow
    /// down every search.
    pub fn add_connection(
        &mut self,
        conns: &mut ConnectionArena,
        id: ConnectionId,
    ) -> Result<()> {
        let conn = &conns[id];
        if conn.is_in_db() {
            bail!("connection already in database");
        }
        if conn.in_flyout {
            return Ok(());
        }
        debug_assert_eq!(conn.kind(), self.kind, "connection added to wrong database");
        let position = self.find_position_for_connection(conns, id);
        self.ordered.insert(position, id);
        conns[id].in_db = true;
        Ok(())
    }

    /// Remove a connection and clear its membership flag.
    ///
    /// Fails if the connection is not a member; fails with a distinct error if
    /// the membership flag is set but the identity scan cannot locate the
    /// entry, which signals index corruption.
    pub fn remove_connection(
        &mut self,
        conns: &mut ConnectionArena,
        id: ConnectionId,
    ) -> Result<()> {
        if !conns[id].is_in_db() {
            bail!("connection not in database");
        }
        let Some(index) = self.find_connection(conns, id) else {
            bail!("unable to find connection in database");
        };
        conns[id].in_db = false;
        self.ordered.remove(index);
        Ok(())
    }

    /// Binary search for the insertion index of a connection, comparing by
    /// `y`. On an exact `y` match the search stops immediately, landing
    /// anywhere inside a run of equal values; callers needing the exact entry
    /// must scan the band by identity. Returns an index in `[0, len]`.
    pub fn find_position_for_connection(
        &self,
        conns: &ConnectionArena,
        id: ConnectionId,
    ) -> usize {
        self.position_for_y(conns, conns[id].position().y)
    }

    fn position_for_y(&self, conns: &ConnectionArena, y: f64) -> usize {
        if self.ordered.is_empty() {
            return 0;
        }
        let mut min = 0usize;
        let mut max = self.ordered.len();
        while min < max {
            let mid = (min + max) / 2;
            let mid_y = conns[self.ordered[mid]].position().y;
            if mid_y < y {
                min = mid + 1;
            } else if mid_y > y {
                max = mid;
            } else {
                min = mid;
                break;
            }
        }
        min
    }

    /// Locate a connection by identity.
    ///
    /// Binary search gives only an approximate index because many connections
    /// can share a `y`; the equal-`y` band around it is scanned linearly in
    /// both directions. Returns `None` if the connection is not present.
    pub fn find_connection(&self, conns: &ConnectionArena, id: ConnectionId) -> Option<usize> {
        if self.ordered.is_empty() {
            return None;
        }
        let guess = self.find_position_for_connection(conns, id);
        if guess >= self.ordered.len() {
            return None;
        }
        let y = conns[id].position().y;
        // Scan down from the guess, then up, staying inside the band.
        let mut index = guess;
        loop {
            if self.ordered[index] == id {
                return Some(index);
            }
            if index == 0 || conns[self.ordered[index - 1]].position().y != y {
                break;
            }
            index -= 1;
        }
        let mut index = guess + 1;
        while index < self.ordered.len() && conns[self.ordered[index]].position().y == y {
            if self.ordered[index] == id {
                return Some(index);
            }
            index += 1;
        }
        None
    }

    /// All indexed connections within Euclidean distance `max_radius` of the
    /// given connection's current position, regardless of compatibility.
    ///
    /// This is the "bump" query: after a drop, overlapping neighbours get
    /// pushed apart no matter whether they could legally connect. The vertical
    /// distance bounds the scan (a cheap necessary condition); each candidate
    /// inside the band is then checked against the full Euclidean distance.
    /// Results are in discovery order, not sorted by distance.
    pub fn get_neighbours(
        &self,
        conns: &ConnectionArena,
        id: ConnectionId,
        max_radius: f64,
    ) -> Vec<ConnectionId> {
        let mut neighbours = Vec::new();
        if self.ordered.is_empty() {
            return neighbours;
        }
        let base = conns[id].position();
        let start = self.position_for_y(conns, base.y);

        let mut index = start;
        while index > 0 {
            index -= 1;
            let candidate = self.ordered[index];
            let pos = conns[candidate].position();
            if (pos.y - base.y).abs() > max_radius {
                break;
            }
            if candidate != id && base.distance_to(pos) <= max_radius {
                neighbours.push(candidate);
            }
        }
        let mut index = start;
        while index < self.ordered.len() {
            let candidate = self.ordered[index];
            let pos = conns[candidate].position();
            if (pos.y - base.y).abs() > max_radius {
                break;
            }
            if candidate != id && base.distance_to(pos) <= max_radius {
                neighbours.push(candidate);
            }
            index += 1;
        }
        neighbours
    }

    /// Find the best snap candidate for a connection being dragged.
    ///
    /// The probe connection is treated as if it had moved by `dxy` from its
    /// last indexed position; its coordinates are offset for the duration of
    /// the search and restored on every exit path (the restore lives in a drop
    /// guard, so even a panicking type-check callback cannot leave the probe
    /// displaced). Repeated calls during a drag are therefore free of
    /// observable side effects.
    ///
    /// The scan walks outward from the probe's `y` band while candidates stay
    /// within `max_radius` vertically. Acceptance is greedy distance
    /// tightening: once a candidate at distance `d` is accepted, only strictly
    /// closer ones can replace it, so the first candidate found among equal
    /// distances wins.
    ///
    /// Returns the nearest compatible, unobstructed candidate and its exact
    /// distance, or no candidate and `max_radius` untouched.
    pub fn search_for_closest(
        &self,
        conns: &mut ConnectionArena,
        blocks: &BlockArena,
        id: ConnectionId,
        max_radius: f64,
        dxy: Point,
    ) -> ClosestCandidate {
        if self.ordered.is_empty() {
            return ClosestCandidate {
                connection: None,
                radius: max_radius,
            };
        }

        let moved = TempOffset::new(conns, id, dxy);
        let conns = moved.arena();
        let probe_y = conns[id].position().y;
        let start = self.find_position_for_connection(conns, id);

        let mut best: Option<ConnectionId> = None;
        let mut best_radius = max_radius;

        let mut index = start;
        while index > 0 {
            index -= 1;
            let candidate = self.ordered[index];
            if (conns[candidate].position().y - probe_y).abs() > max_radius {
                break;
            }
            if connection_allowed(conns, blocks, id, candidate, best_radius, best.is_some()) {
                best_radius = conns[id].distance_from(&conns[candidate]);
                best = Some(candidate);
            }
        }
        let mut index = start;
        while index < self.ordered.len() {
            let candidate = self.ordered[index];
            if (conns[candidate].position().y - probe_y).abs() > max_radius {
                break;
            }
            if connection_allowed(conns, blocks, id, candidate, best_radius, best.is_some()) {
                best_radius = conns[id].distance_from(&conns[candidate]);
                best = Some(candidate);
            }
            index += 1;
        }

        trace!(
            "closest search in {:?} db: {} candidates scanned, best {:?} at {:.2}",
            self.kind,
            self.ordered.len(),
            best,
            best_radius
        );
        ClosestCandidate {
            connection: best,
            radius: best_radius,
        }
    }
}

/// Result of [`ConnectionDb::search_for_closest`]: the best candidate, if any,
/// and the search radius tightened to its exact distance ("no candidate"
/// leaves the radius at the caller's maximum).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestCandidate {
    pub connection: Option<ConnectionId>,
    pub radius: f64,
}

// ────────────────────────────────────────────────────────────────────────────
// Temporary probe offset
// ────────────────────────────────────────────────────────────────────────────

/// Offsets a connection's coordinates for the lifetime of the guard and
/// restores the original position on drop, including during unwinding.
struct TempOffset<'a> {
    conns: &'a mut ConnectionArena,
    id: ConnectionId,
    original: Point,
}

impl<'a> TempOffset<'a> {
    fn new(conns: &'a mut ConnectionArena, id: ConnectionId, dxy: Point) -> Self {
        let original = conns[id].position();
        conns[id].pos = Point::new(original.x + dxy.x, original.y + dxy.y);
        Self {
            conns,
            id,
            original,
        }
    }

    fn arena(&self) -> &ConnectionArena {
        self.conns
    }
}

impl Drop for TempOffset<'_> {
    fn drop(&mut self) {
        self.conns[self.id].pos = self.original;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ConnectionDbSet
// ────────────────────────────────────────────────────────────────────────────

/// The four per-kind databases of one workspace, indexed by
/// [`ConnectionKind`]. Owned by the workspace; constructed alongside it.
#[derive(Debug, Clone)]
pub struct ConnectionDbSet {
    dbs: [ConnectionDb; 4],
}

impl ConnectionDbSet {
    pub fn new() -> Self {
        Self {
            dbs: ConnectionKind::ALL.map(ConnectionDb::new),
        }
    }

    pub fn get(&self, kind: ConnectionKind) -> &ConnectionDb {
        &self.dbs[kind.db_index()]
    }

    pub fn get_mut(&mut self, kind: ConnectionKind) -> &mut ConnectionDb {
        &mut self.dbs[kind.db_index()]
    }
}

impl Default for ConnectionDbSet {
    fn default() -> Self {
        Self::new()
    }
}
