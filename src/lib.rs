//! Connection & snap engine for visual block-programming editors.
//!
//! This crate implements the spatial/logical core behind drag-and-snap block
//! editing: typed connection points ([`connection`]), a per-kind ordered
//! spatial index with nearest-candidate search ([`connection_db`]), the
//! workspace that owns the block graph and keeps the index consistent under
//! mutation ([`workspace`]), and XML/binary persistence of the graph
//! ([`xml`]).
//!
//! Rendering, styling, and input capture are external collaborators: the
//! engine decides *which* connection a dragged block snaps to and *which*
//! blocks need re-rendering, never how they look.
//!
//! The binary `blocklink` demonstrates usage and prints a parsed workspace
//! as JSON.

pub mod block;
pub mod connection;
pub mod connection_db;
pub mod workspace;
pub mod xml;
