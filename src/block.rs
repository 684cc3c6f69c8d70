//! Block model: the owners of connections.
//!
//! The engine does not render blocks; it only tracks the data needed for
//! connection bookkeeping — position, movability, flyout/collapse state, and
//! which connections a block exposes. Block shapes are declared with
//! [`BlockTemplate`] (one per block type, collected in a [`BlockRegistry`])
//! and instantiated by the workspace.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

use crate::connection::{ConnectionArena, ConnectionId, Point};

/// Nominal row height used for the synthesized connection layout.
///
/// Real geometry comes from the renderer, which reflows connection offsets via
/// the workspace. Until it does, templates lay their connections out on this
/// grid so that freshly created blocks already have distinct, ordered
/// positions in the index.
pub const ROW_HEIGHT: f64 = 25.0;

/// Nominal block width for the synthesized connection layout.
pub const BLOCK_WIDTH: f64 = 100.0;

/// X offset of the notch inside a statement input.
pub const STATEMENT_NOTCH_X: f64 = 20.0;

// ────────────────────────────────────────────────────────────────────────────
// Type checks
// ────────────────────────────────────────────────────────────────────────────

/// Type constraint on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeCheck {
    /// Accepts any partner.
    Any,
    /// Accepts partners whose check list shares at least one of these names.
    Only(Vec<String>),
}

impl TypeCheck {
    /// Constraint to the given type names.
    pub fn only<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TypeCheck::Only(types.into_iter().map(Into::into).collect())
    }

    pub(crate) fn into_check(self) -> Option<Vec<String>> {
        match self {
            TypeCheck::Any => None,
            TypeCheck::Only(types) => Some(types),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Block templates
// ────────────────────────────────────────────────────────────────────────────

/// Kind of input socket on a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputKind {
    /// Value socket on the right edge, accepts an output plug.
    Value,
    /// Statement socket holding a nested stack, accepts a previous notch.
    Statement,
}

/// One input declared by a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputTemplate {
    pub name: String,
    pub kind: InputKind,
    pub check: TypeCheck,
}

/// Declares the shape of a block type: which connections it exposes and with
/// what type checks.
///
/// # Example
///
/// ```rust,ignore
/// let repeat = BlockTemplate::new("controls_repeat")
///     .with_previous(TypeCheck::Any)
///     .with_next(TypeCheck::Any)
///     .with_value_input("TIMES", TypeCheck::only(["Number"]))
///     .with_statement_input("DO", TypeCheck::Any);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub name: String,
    pub output: Option<TypeCheck>,
    pub previous: Option<TypeCheck>,
    pub next: Option<TypeCheck>,
    pub inputs: Vec<InputTemplate>,
    /// Default field values (e.g. a number literal's text).
    pub fields: IndexMap<String, String>,
    pub movable: bool,
}

impl BlockTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: None,
            previous: None,
            next: None,
            inputs: Vec::new(),
            fields: IndexMap::new(),
            movable: true,
        }
    }

    pub fn with_output(mut self, check: TypeCheck) -> Self {
        self.output = Some(check);
        self
    }

    pub fn with_previous(mut self, check: TypeCheck) -> Self {
        self.previous = Some(check);
        self
    }

    pub fn with_next(mut self, check: TypeCheck) -> Self {
        self.next = Some(check);
        self
    }

    pub fn with_value_input(mut self, name: impl Into<String>, check: TypeCheck) -> Self {
        self.inputs.push(InputTemplate {
            name: name.into(),
            kind: InputKind::Value,
            check,
        });
        self
    }

    pub fn with_statement_input(mut self, name: impl Into<String>, check: TypeCheck) -> Self {
        self.inputs.push(InputTemplate {
            name: name.into(),
            kind: InputKind::Statement,
            check,
        });
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Mark the block as pinned: it can never be moved or bumped.
    pub fn immovable(mut self) -> Self {
        self.movable = false;
        self
    }
}

/// Block type name → template lookup, used when reconstructing a workspace
/// from its serialized form.
#[derive(Debug, Clone, Default)]
pub struct BlockRegistry {
    templates: IndexMap<String, BlockTemplate>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template under its own name, replacing any previous one.
    pub fn register(&mut self, template: BlockTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get(&self, name: &str) -> Option<&BlockTemplate> {
        self.templates.get(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Block
// ────────────────────────────────────────────────────────────────────────────

/// Handle to a [`Block`] in the workspace's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub(crate) u32);

/// An input socket on a live block.
#[derive(Debug, Clone)]
pub struct Input {
    pub name: String,
    pub kind: InputKind,
    pub connection: ConnectionId,
}

/// A live block instance.
#[derive(Debug, Clone)]
pub struct Block {
    pub(crate) type_name: String,
    pub(crate) position: Point,
    pub(crate) movable: bool,
    pub(crate) in_flyout: bool,
    pub(crate) collapsed: bool,
    pub(crate) output: Option<ConnectionId>,
    pub(crate) previous: Option<ConnectionId>,
    pub(crate) next: Option<ConnectionId>,
    pub(crate) inputs: Vec<Input>,
    pub(crate) fields: IndexMap<String, String>,
}

impl Block {
    /// The block type name this block was instantiated from.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Origin of the block in workspace coordinates.
    pub fn position(&self) -> Point {
        self.position
    }

    pub fn is_movable(&self) -> bool {
        self.movable
    }

    pub fn is_in_flyout(&self) -> bool {
        self.in_flyout
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    pub fn output_connection(&self) -> Option<ConnectionId> {
        self.output
    }

    pub fn previous_connection(&self) -> Option<ConnectionId> {
        self.previous
    }

    pub fn next_connection(&self) -> Option<ConnectionId> {
        self.next
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    /// Find an input socket by name.
    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn fields(&self) -> &IndexMap<String, String> {
        &self.fields
    }

    /// All connections of this block, parent-side first.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut out = Vec::with_capacity(3 + self.inputs.len());
        out.extend(self.output);
        out.extend(self.previous);
        out.extend(self.inputs.iter().map(|i| i.connection));
        out.extend(self.next);
        out
    }

    /// The block this one is plugged into via its output or previous
    /// connection, if any.
    pub fn parent_block(&self, conns: &ConnectionArena) -> Option<BlockId> {
        for id in [self.output, self.previous].into_iter().flatten() {
            if let Some(target) = conns[id].target() {
                return Some(conns[target].block());
            }
        }
        None
    }

    /// Blocks directly attached below or inside this one (via inputs and the
    /// next notch).
    pub fn child_blocks(&self, conns: &ConnectionArena) -> Vec<BlockId> {
        let mut out = Vec::new();
        for input in &self.inputs {
            if let Some(target) = conns[input.connection].target() {
                out.push(conns[target].block());
            }
        }
        if let Some(next) = self.next {
            if let Some(target) = conns[next].target() {
                out.push(conns[target].block());
            }
        }
        out
    }
}

// ────────────────────────────────────────────────────────────────────────────
// BlockArena
// ────────────────────────────────────────────────────────────────────────────

/// Slot storage for all blocks of one workspace. Ids of disposed blocks are
/// never reused.
#[derive(Debug, Default, Clone)]
pub struct BlockArena {
    slots: Vec<Option<Block>>,
}

impl BlockArena {
    pub(crate) fn insert(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.slots.len() as u32);
        self.slots.push(Some(block));
        id
    }

    pub(crate) fn remove(&mut self, id: BlockId) -> Option<Block> {
        self.slots.get_mut(id.0 as usize).and_then(Option::take)
    }

    /// Non-panicking lookup; `None` for disposed or unknown ids.
    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Iterate all live blocks in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|b| (BlockId(i as u32), b)))
    }

    /// Number of live blocks.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Index<BlockId> for BlockArena {
    type Output = Block;

    fn index(&self, id: BlockId) -> &Block {
        self.slots[id.0 as usize]
            .as_ref()
            .unwrap_or_else(|| panic!("block {:?} has been disposed", id))
    }
}

impl IndexMut<BlockId> for BlockArena {
    fn index_mut(&mut self, id: BlockId) -> &mut Block {
        self.slots[id.0 as usize]
            .as_mut()
            .unwrap_or_else(|| panic!("block {:?} has been disposed", id))
    }
}
