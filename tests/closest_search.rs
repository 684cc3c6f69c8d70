//! Snap-candidate search: correctness, restoration, tie-breaking, and the
//! radius query checked against a brute-force reference.

use blocklink::block::{BlockTemplate, TypeCheck};
use blocklink::connection::{ConnectionId, ConnectionKind, Point};
use blocklink::workspace::Workspace;

fn number() -> BlockTemplate {
    BlockTemplate::new("number").with_output(TypeCheck::only(["Number"]))
}

fn sink() -> BlockTemplate {
    BlockTemplate::new("sink").with_value_input("VALUE", TypeCheck::only(["Number"]))
}

fn place(ws: &mut Workspace, conn: ConnectionId, x: f64, y: f64) {
    let block = ws.connection(conn).block();
    ws.set_connection_offset(conn, Point::new(0.0, 0.0)).unwrap();
    ws.move_block_to(block, x, y).unwrap();
}

/// Create a number block whose output connection sits exactly at (x, y).
fn output_at(ws: &mut Workspace, x: f64, y: f64) -> ConnectionId {
    let block = ws.add_block(&number(), 0.0, 0.0).unwrap();
    let out = ws.block(block).output_connection().unwrap();
    place(ws, out, x, y);
    out
}

/// Create a sink block whose input connection sits exactly at (x, y).
fn input_at(ws: &mut Workspace, x: f64, y: f64) -> ConnectionId {
    let block = ws.add_block(&sink(), 0.0, 0.0).unwrap();
    let input = ws.block(block).inputs()[0].connection;
    place(ws, input, x, y);
    input
}

#[test]
fn finds_nearest_compatible_candidate() {
    let mut ws = Workspace::new();
    let far = output_at(&mut ws, 0.0, 50.0);
    let near_left = output_at(&mut ws, 0.0, 10.0);
    let near_right = output_at(&mut ws, 5.0, 10.0);
    let probe = input_at(&mut ws, 0.0, 0.0);

    // Dragged to (3, 11): nearest is (5, 10) at distance sqrt(5).
    let result = ws.closest_connection(probe, 10.0, Point::new(3.0, 11.0));
    assert_eq!(result.connection, Some(near_right));
    assert!((result.radius - 5.0f64.sqrt()).abs() < 1e-9);
    assert_ne!(result.connection, Some(near_left));
    assert_ne!(result.connection, Some(far), "y=50 is outside the radius");
}

#[test]
fn probe_coordinates_are_restored_after_search() {
    let mut ws = Workspace::new();
    output_at(&mut ws, 5.0, 10.0);
    let probe = input_at(&mut ws, 1.0, 2.0);

    // Hit path.
    let result = ws.closest_connection(probe, 20.0, Point::new(3.0, 9.0));
    assert!(result.connection.is_some());
    assert_eq!(ws.connection(probe).position(), Point::new(1.0, 2.0));

    // Miss path: offset pushes the probe far away from everything.
    let result = ws.closest_connection(probe, 20.0, Point::new(500.0, 500.0));
    assert_eq!(result.connection, None);
    assert_eq!(result.radius, 20.0);
    assert_eq!(ws.connection(probe).position(), Point::new(1.0, 2.0));
}

#[test]
fn empty_database_returns_no_candidate() {
    let mut ws = Workspace::new();
    let probe = input_at(&mut ws, 0.0, 0.0);
    let result = ws.closest_connection(probe, 10.0, Point::new(0.0, 0.0));
    assert_eq!(result.connection, None);
    assert_eq!(result.radius, 10.0);
}

#[test]
fn candidate_exactly_at_max_radius_is_accepted() {
    let mut ws = Workspace::new();
    let out = output_at(&mut ws, 0.0, 10.0);
    let probe = input_at(&mut ws, 0.0, 0.0);
    let result = ws.closest_connection(probe, 10.0, Point::new(0.0, 0.0));
    assert_eq!(result.connection, Some(out));
    assert_eq!(result.radius, 10.0);
}

#[test]
fn equal_distance_candidates_resolve_stably() {
    let mut ws = Workspace::new();
    let left = output_at(&mut ws, -5.0, 0.0);
    let right = output_at(&mut ws, 5.0, 0.0);
    let probe = input_at(&mut ws, 0.0, 0.0);

    let first = ws.closest_connection(probe, 10.0, Point::new(0.0, 0.0));
    assert!(first.connection == Some(left) || first.connection == Some(right));
    assert_eq!(first.radius, 5.0);

    // Ties go to the first candidate found in scan order; repeating the
    // query without touching the index must give the same answer.
    for _ in 0..5 {
        let again = ws.closest_connection(probe, 10.0, Point::new(0.0, 0.0));
        assert_eq!(again.connection, first.connection);
    }
}

#[test]
fn incompatible_type_checks_are_skipped() {
    let mut ws = Workspace::new();
    let text_block = BlockTemplate::new("text").with_output(TypeCheck::only(["String"]));
    let block = ws.add_block(&text_block, 0.0, 0.0).unwrap();
    let text_out = ws.block(block).output_connection().unwrap();
    place(&mut ws, text_out, 0.0, 2.0);
    let number_out = output_at(&mut ws, 0.0, 8.0);
    let probe = input_at(&mut ws, 0.0, 0.0);

    // The String output is closer but fails the check; the Number output
    // further away must win.
    let result = ws.closest_connection(probe, 10.0, Point::new(0.0, 0.0));
    assert_eq!(result.connection, Some(number_out));
}

#[test]
fn unconstrained_check_accepts_anything() {
    let mut ws = Workspace::new();
    let any_sink = BlockTemplate::new("any_sink").with_value_input("VALUE", TypeCheck::Any);
    let block = ws.add_block(&any_sink, 0.0, 0.0).unwrap();
    let probe = ws.block(block).inputs()[0].connection;
    place(&mut ws, probe, 0.0, 0.0);
    let out = output_at(&mut ws, 3.0, 4.0);

    let result = ws.closest_connection(probe, 10.0, Point::new(0.0, 0.0));
    assert_eq!(result.connection, Some(out));
    assert_eq!(result.radius, 5.0);
}

#[test]
fn occupied_output_is_not_offered() {
    let mut ws = Workspace::new();
    let out = output_at(&mut ws, 0.0, 5.0);
    let holder = input_at(&mut ws, 0.0, 5.0);
    ws.connect(holder, out).unwrap();

    let probe = input_at(&mut ws, 0.0, 0.0);
    let result = ws.closest_connection(probe, 10.0, Point::new(0.0, 0.0));
    assert_eq!(result.connection, None, "a plugged output is obstructed");
}

#[test]
fn own_subtree_is_rejected() {
    let mut ws = Workspace::new();
    let wrapper = BlockTemplate::new("wrapper")
        .with_output(TypeCheck::Any)
        .with_value_input("INNER", TypeCheck::Any);

    let parent = ws.add_block(&wrapper, 0.0, 0.0).unwrap();
    let child = ws.add_block(&wrapper, 200.0, 0.0).unwrap();
    let parent_input = ws.block(parent).inputs()[0].connection;
    let child_out = ws.block(child).output_connection().unwrap();
    ws.connect(parent_input, child_out).unwrap();

    // Dragging the parent's output near the child's free input: connecting
    // would nest the parent inside its own descendant.
    let parent_out = ws.block(parent).output_connection().unwrap();
    let child_input = ws.block(child).inputs()[0].connection;
    assert!(!ws.is_connection_allowed(parent_out, child_input, 1_000.0));

    // An unrelated block's input is fine.
    let other = ws.add_block(&wrapper, 400.0, 0.0).unwrap();
    let other_input = ws.block(other).inputs()[0].connection;
    assert!(ws.is_connection_allowed(parent_out, other_input, 1_000.0));
}

// ────────────────────────────────────────────────────────────────────────────
// Radius query vs. brute force
// ────────────────────────────────────────────────────────────────────────────

/// Small deterministic LCG so the point set is reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn coord(&mut self, span: u64) -> f64 {
        (self.next() % span) as f64 - span as f64 / 2.0
    }
}

#[test]
fn neighbours_match_brute_force() {
    let mut ws = Workspace::new();
    let mut rng = Lcg(0x5eed);
    let mut outputs = Vec::new();
    for _ in 0..80 {
        let x = rng.coord(160);
        let y = rng.coord(160);
        outputs.push(output_at(&mut ws, x, y));
    }
    let probe = input_at(&mut ws, rng.coord(40), rng.coord(40));
    let base = ws.connection(probe).position();

    for radius in [5.0, 17.5, 40.0, 120.0] {
        let mut expected: Vec<ConnectionId> = outputs
            .iter()
            .copied()
            .filter(|&c| base.distance_to(ws.connection(c).position()) <= radius)
            .collect();
        let mut found = ws.neighbours(probe, radius);
        expected.sort_by_key(|c| format!("{:?}", c));
        found.sort_by_key(|c| format!("{:?}", c));
        assert_eq!(found, expected, "radius {} mismatch", radius);
    }

    // Sanity: the index this query ran against is complete.
    assert_eq!(
        ws.connection_db(ConnectionKind::OutputValue).len(),
        outputs.len()
    );
}
