//! Workspace-level behavior: collapse/expand, disposal, subtree moves, and
//! neighbour bumping.

use blocklink::block::{BlockTemplate, TypeCheck};
use blocklink::connection::{ConnectionKind, Point};
use blocklink::workspace::Workspace;

fn stmt() -> BlockTemplate {
    BlockTemplate::new("stmt")
        .with_previous(TypeCheck::Any)
        .with_next(TypeCheck::Any)
}

fn number() -> BlockTemplate {
    BlockTemplate::new("number").with_output(TypeCheck::only(["Number"]))
}

fn repeat() -> BlockTemplate {
    BlockTemplate::new("repeat")
        .with_previous(TypeCheck::Any)
        .with_next(TypeCheck::Any)
        .with_value_input("TIMES", TypeCheck::only(["Number"]))
        .with_statement_input("DO", TypeCheck::Any)
}

#[test]
fn collapse_hides_inputs_and_nested_connections() {
    let mut ws = Workspace::new();
    let loop_block = ws.add_block(&repeat(), 0.0, 0.0).unwrap();
    let times = ws.add_block(&number(), 200.0, 0.0).unwrap();
    let body = ws.add_block(&stmt(), 300.0, 0.0).unwrap();

    let times_input = ws.block(loop_block).input("TIMES").unwrap().connection;
    let do_input = ws.block(loop_block).input("DO").unwrap().connection;
    let times_out = ws.block(times).output_connection().unwrap();
    let body_prev = ws.block(body).previous_connection().unwrap();
    ws.connect(times_input, times_out).unwrap();
    ws.connect(do_input, body_prev).unwrap();

    let body_next = ws.block(body).next_connection().unwrap();
    let prev = ws.block(loop_block).previous_connection().unwrap();
    let next = ws.block(loop_block).next_connection().unwrap();

    ws.set_collapsed(loop_block, true).unwrap();
    // Everything inside the collapsed block leaves the index…
    for conn in [times_input, do_input, times_out, body_prev, body_next] {
        assert!(ws.connection(conn).is_hidden(), "{:?} should be hidden", conn);
        assert!(!ws.connection(conn).is_in_db());
    }
    // …while the collapsed block itself stays connectable.
    assert!(ws.connection(prev).is_in_db());
    assert!(ws.connection(next).is_in_db());

    ws.set_collapsed(loop_block, false).unwrap();
    for conn in [times_input, do_input, times_out, body_prev, body_next] {
        assert!(!ws.connection(conn).is_hidden());
        assert!(ws.connection(conn).is_in_db());
    }
}

#[test]
fn expanding_keeps_nested_collapsed_content_hidden() {
    let mut ws = Workspace::new();
    let outer = ws.add_block(&repeat(), 0.0, 0.0).unwrap();
    let inner = ws.add_block(&repeat(), 50.0, 50.0).unwrap();
    let outer_do = ws.block(outer).input("DO").unwrap().connection;
    let inner_prev = ws.block(inner).previous_connection().unwrap();
    ws.connect(outer_do, inner_prev).unwrap();

    let inner_times = ws.block(inner).input("TIMES").unwrap().connection;
    let inner_do = ws.block(inner).input("DO").unwrap().connection;
    ws.set_collapsed(inner, true).unwrap();
    ws.set_collapsed(outer, true).unwrap();
    ws.set_collapsed(outer, false).unwrap();

    // The inner block is still collapsed: its inputs must stay out of the
    // index instead of becoming snap targets again.
    for conn in [inner_times, inner_do] {
        assert!(ws.connection(conn).is_hidden(), "{:?} should stay hidden", conn);
        assert!(!ws.connection(conn).is_in_db());
    }
    // Its outward connections come back: the collapsed block itself remains
    // connectable inside the expanded outer block.
    assert!(ws.connection(inner_prev).is_in_db());
    assert!(ws.connection(ws.block(inner).next_connection().unwrap()).is_in_db());

    ws.set_collapsed(inner, false).unwrap();
    assert!(ws.connection(inner_times).is_in_db());
    assert!(ws.connection(inner_do).is_in_db());
}

#[test]
fn collapse_twice_is_idempotent() {
    let mut ws = Workspace::new();
    let loop_block = ws.add_block(&repeat(), 0.0, 0.0).unwrap();
    ws.set_collapsed(loop_block, true).unwrap();
    ws.set_collapsed(loop_block, true).unwrap();
    let times_input = ws.block(loop_block).input("TIMES").unwrap().connection;
    assert!(!ws.connection(times_input).is_in_db());
    ws.set_collapsed(loop_block, false).unwrap();
    assert!(ws.connection(times_input).is_in_db());
}

#[test]
fn moving_a_block_moves_its_hidden_connections_too() {
    let mut ws = Workspace::new();
    let loop_block = ws.add_block(&repeat(), 0.0, 0.0).unwrap();
    let times_input = ws.block(loop_block).input("TIMES").unwrap().connection;
    ws.set_collapsed(loop_block, true).unwrap();
    let before = ws.connection(times_input).position();

    ws.move_block_by(loop_block, 40.0, 7.0).unwrap();
    let after = ws.connection(times_input).position();
    assert_eq!(after, Point::new(before.x + 40.0, before.y + 7.0));
    assert!(!ws.connection(times_input).is_in_db(), "still hidden");
}

#[test]
fn dispose_removes_the_whole_subtree_from_the_index() {
    let mut ws = Workspace::new();
    let loop_block = ws.add_block(&repeat(), 0.0, 0.0).unwrap();
    let times = ws.add_block(&number(), 200.0, 0.0).unwrap();
    let body = ws.add_block(&stmt(), 300.0, 0.0).unwrap();
    let below = ws.add_block(&stmt(), 0.0, 400.0).unwrap();

    let times_input = ws.block(loop_block).input("TIMES").unwrap().connection;
    let do_input = ws.block(loop_block).input("DO").unwrap().connection;
    ws.connect(times_input, ws.block(times).output_connection().unwrap())
        .unwrap();
    ws.connect(do_input, ws.block(body).previous_connection().unwrap())
        .unwrap();
    let next = ws.block(loop_block).next_connection().unwrap();
    let below_prev = ws.block(below).previous_connection().unwrap();
    ws.connect(next, below_prev).unwrap();

    ws.dispose_block(loop_block).unwrap();

    // The loop, its value child, and its body are gone; the block that was
    // stacked below survives, disconnected.
    assert!(ws.block_arena().get(loop_block).is_none());
    assert!(ws.block_arena().get(times).is_none());
    assert!(ws.block_arena().get(body).is_none());
    assert!(ws.block_arena().get(below).is_some());
    assert_eq!(ws.connection(below_prev).target(), None);
    assert!(ws.connection(below_prev).is_in_db());

    // Remaining index content: only the survivor's two connections.
    assert_eq!(ws.connection_db(ConnectionKind::PreviousStatement).len(), 1);
    assert_eq!(ws.connection_db(ConnectionKind::NextStatement).len(), 1);
    assert_eq!(ws.connection_db(ConnectionKind::OutputValue).len(), 0);
    assert_eq!(ws.connection_db(ConnectionKind::InputValue).len(), 0);
}

#[test]
fn top_blocks_tracks_parentage() {
    let mut ws = Workspace::new();
    let a = ws.add_block(&stmt(), 0.0, 0.0).unwrap();
    let b = ws.add_block(&stmt(), 0.0, 100.0).unwrap();
    assert_eq!(ws.top_blocks().len(), 2);

    let next = ws.block(a).next_connection().unwrap();
    let prev = ws.block(b).previous_connection().unwrap();
    ws.connect(next, prev).unwrap();
    assert_eq!(ws.top_blocks(), vec![a]);
    assert_eq!(ws.root_block_of(b), a);

    ws.disconnect(prev).unwrap();
    assert_eq!(ws.top_blocks().len(), 2);
}

#[test]
fn bump_neighbours_separates_overlapping_stacks() {
    let mut ws = Workspace::new();
    let a = ws.add_block(&stmt(), 0.0, 0.0).unwrap();
    let b = ws.add_block(&stmt(), 1.0, 1.0).unwrap();
    let b_before = ws.block(b).position();

    // A's next notch overlaps B's previous notch; bumping A's neighbours
    // must push B's stack away while A stays put.
    ws.move_block_to(b, 1.0, ws.connection(ws.block(a).next_connection().unwrap()).position().y)
        .unwrap();
    ws.bump_neighbours(a);

    assert_eq!(ws.block(a).position(), Point::new(0.0, 0.0));
    assert_ne!(ws.block(b).position(), b_before);
    let a_next = ws.connection(ws.block(a).next_connection().unwrap()).position();
    let b_prev = ws.connection(ws.block(b).previous_connection().unwrap()).position();
    assert!(a_next.distance_to(b_prev) > ws.snap_radius());
}

#[test]
fn bump_neighbours_leaves_connected_pairs_alone() {
    let mut ws = Workspace::new();
    let a = ws.add_block(&stmt(), 0.0, 0.0).unwrap();
    let b = ws.add_block(&stmt(), 0.0, 25.0).unwrap();
    let next = ws.block(a).next_connection().unwrap();
    let prev = ws.block(b).previous_connection().unwrap();
    ws.connect(next, prev).unwrap();
    ws.tighten(next).unwrap();
    let b_pos = ws.block(b).position();

    ws.bump_neighbours(a);
    assert_eq!(ws.block(b).position(), b_pos, "same stack never bumps itself");
}
