//! Workspace persistence: XML import/export and a binary snapshot format.
//!
//! The on-disk representation is the logical block graph only — block types,
//! fields, nesting, and top-level positions. The spatial index is never
//! serialized: restoring goes through the normal workspace API, so every
//! connection re-enters its database on the standard `add_connection` path and
//! all index invariants hold by construction. There is no bulk-load shortcut.
//!
//! Two formats share one intermediate model ([`SavedWorkspace`]):
//! - XML, the editor interchange format (`<xml><block>…</block></xml>` with
//!   nested `<value>`, `<statement>`, and `<next>` elements), read with
//!   `roxmltree` and written by direct string generation.
//! - A binary snapshot with magic bytes and a version header, via `bincode`.

use anyhow::{Context, Result, anyhow, bail};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::block::{BlockId, BlockRegistry, InputKind};
use crate::connection::{ConnectionId, Point};
use crate::workspace::Workspace;

// ────────────────────────────────────────────────────────────────────────────
// Saved model
// ────────────────────────────────────────────────────────────────────────────

/// Serialized form of one block and everything attached to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedBlock {
    pub type_name: String,
    /// Workspace position; only meaningful on top-level blocks (children are
    /// positioned by their parent connection).
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default)]
    pub fields: IndexMap<String, String>,
    /// Children plugged into value inputs, `(input name, child)`.
    #[serde(default)]
    pub values: Vec<(String, SavedBlock)>,
    /// Stacks nested in statement inputs, `(input name, first child)`.
    #[serde(default)]
    pub statements: Vec<(String, SavedBlock)>,
    /// The block attached below this one.
    #[serde(default)]
    pub next: Option<Box<SavedBlock>>,
}

/// Serialized form of a whole workspace: its top-level blocks in creation
/// order. Flyout blocks are palette content, not program content, and are
/// not saved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedWorkspace {
    pub blocks: Vec<SavedBlock>,
}

/// Capture the logical block graph of a workspace.
pub fn snapshot(ws: &Workspace) -> SavedWorkspace {
    let blocks = ws
        .top_blocks()
        .into_iter()
        .filter(|&id| !ws.block(id).is_in_flyout())
        .map(|id| save_block(ws, id))
        .collect();
    SavedWorkspace { blocks }
}

fn save_block(ws: &Workspace, id: BlockId) -> SavedBlock {
    let block = ws.block(id);
    let pos = block.position();
    let mut values = Vec::new();
    let mut statements = Vec::new();
    for input in block.inputs() {
        if let Some(target) = ws.connection(input.connection).target() {
            let child = ws.connection(target).block();
            let saved = save_block(ws, child);
            match input.kind {
                InputKind::Value => values.push((input.name.clone(), saved)),
                InputKind::Statement => statements.push((input.name.clone(), saved)),
            }
        }
    }
    let next = block
        .next_connection()
        .and_then(|next| ws.connection(next).target())
        .map(|target| Box::new(save_block(ws, ws.connection(target).block())));
    SavedBlock {
        type_name: block.type_name().to_string(),
        x: pos.x,
        y: pos.y,
        collapsed: block.is_collapsed(),
        fields: block.fields().clone(),
        values,
        statements,
        next,
    }
}

/// Rebuild a workspace from its saved form. Block types are instantiated from
/// the registry, children are attached through the normal `connect` path and
/// tightened into place.
pub fn restore(saved: &SavedWorkspace, registry: &BlockRegistry) -> Result<Workspace> {
    let mut ws = Workspace::new();
    for block in &saved.blocks {
        restore_block(&mut ws, registry, block, Point::new(block.x, block.y), None)?;
    }
    Ok(ws)
}

fn restore_block(
    ws: &mut Workspace,
    registry: &BlockRegistry,
    saved: &SavedBlock,
    origin: Point,
    attach_to: Option<ConnectionId>,
) -> Result<()> {
    let template = registry
        .get(&saved.type_name)
        .ok_or_else(|| anyhow!("unknown block type '{}'", saved.type_name))?;
    let id = ws.add_block(template, origin.x, origin.y)?;
    for (name, value) in &saved.fields {
        ws.set_field(id, name, value);
    }

    if let Some(parent_conn) = attach_to {
        let child_conn = match ws.connection(parent_conn).kind() {
            k if k.is_value() => ws.block(id).output_connection(),
            _ => ws.block(id).previous_connection(),
        }
        .ok_or_else(|| {
            anyhow!(
                "block type '{}' cannot attach to its saved parent",
                saved.type_name
            )
        })?;
        ws.connect(parent_conn, child_conn)
            .with_context(|| format!("attaching saved block '{}'", saved.type_name))?;
        ws.tighten(parent_conn)?;
    }

    for (name, child) in &saved.values {
        let conn = ws
            .block(id)
            .input(name)
            .ok_or_else(|| anyhow!("block type '{}' has no input '{}'", saved.type_name, name))?
            .connection;
        let origin = ws.connection(conn).position();
        restore_block(ws, registry, child, origin, Some(conn))?;
    }
    for (name, child) in &saved.statements {
        let conn = ws
            .block(id)
            .input(name)
            .ok_or_else(|| anyhow!("block type '{}' has no input '{}'", saved.type_name, name))?
            .connection;
        let origin = ws.connection(conn).position();
        restore_block(ws, registry, child, origin, Some(conn))?;
    }
    if let Some(next) = &saved.next {
        let conn = ws
            .block(id)
            .next_connection()
            .ok_or_else(|| anyhow!("block type '{}' has no next notch", saved.type_name))?;
        let origin = ws.connection(conn).position();
        restore_block(ws, registry, next, origin, Some(conn))?;
    }
    if saved.collapsed {
        ws.set_collapsed(id, true)?;
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// XML generation
// ────────────────────────────────────────────────────────────────────────────

/// Escape text content for XML.
fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

fn indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

/// Generate the XML text for a saved workspace, 2-space indented.
pub fn generate_workspace_xml(saved: &SavedWorkspace) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<xml>\n");
    for block in &saved.blocks {
        write_block(&mut out, block, 1, true);
    }
    out.push_str("</xml>\n");
    out
}

fn write_block(out: &mut String, block: &SavedBlock, level: usize, top_level: bool) {
    indent(out, level);
    out.push_str(&format!("<block type=\"{}\"", xml_escape(&block.type_name)));
    if top_level {
        out.push_str(&format!(" x=\"{}\" y=\"{}\"", block.x, block.y));
    }
    if block.collapsed {
        out.push_str(" collapsed=\"true\"");
    }
    out.push_str(">\n");
    for (name, value) in &block.fields {
        indent(out, level + 1);
        out.push_str(&format!(
            "<field name=\"{}\">{}</field>\n",
            xml_escape(name),
            xml_escape(value)
        ));
    }
    for (name, child) in &block.values {
        indent(out, level + 1);
        out.push_str(&format!("<value name=\"{}\">\n", xml_escape(name)));
        write_block(out, child, level + 2, false);
        indent(out, level + 1);
        out.push_str("</value>\n");
    }
    for (name, child) in &block.statements {
        indent(out, level + 1);
        out.push_str(&format!("<statement name=\"{}\">\n", xml_escape(name)));
        write_block(out, child, level + 2, false);
        indent(out, level + 1);
        out.push_str("</statement>\n");
    }
    if let Some(next) = &block.next {
        indent(out, level + 1);
        out.push_str("<next>\n");
        write_block(out, next, level + 2, false);
        indent(out, level + 1);
        out.push_str("</next>\n");
    }
    indent(out, level);
    out.push_str("</block>\n");
}

// ────────────────────────────────────────────────────────────────────────────
// XML parsing
// ────────────────────────────────────────────────────────────────────────────

/// Parse workspace XML text into the saved model.
pub fn parse_workspace_xml(text: &str) -> Result<SavedWorkspace> {
    let doc = roxmltree::Document::parse(text).context("parsing workspace XML")?;
    let root = doc.root_element();
    if root.tag_name().name() != "xml" {
        bail!(
            "expected <xml> root element, found <{}>",
            root.tag_name().name()
        );
    }
    let mut blocks = Vec::new();
    for child in root.children().filter(|n| n.is_element()) {
        if child.tag_name().name() != "block" {
            bail!("unexpected element <{}> in <xml>", child.tag_name().name());
        }
        blocks.push(parse_block(child)?);
    }
    Ok(SavedWorkspace { blocks })
}

fn parse_block(node: roxmltree::Node) -> Result<SavedBlock> {
    let type_name = node
        .attribute("type")
        .ok_or_else(|| anyhow!("<block> without type attribute"))?
        .to_string();
    let parse_coord = |name: &str| -> Result<f64> {
        match node.attribute(name) {
            Some(v) => v
                .parse::<f64>()
                .with_context(|| format!("invalid {} attribute on block '{}'", name, type_name)),
            None => Ok(0.0),
        }
    };
    let x = parse_coord("x")?;
    let y = parse_coord("y")?;
    let collapsed = node.attribute("collapsed") == Some("true");

    let mut block = SavedBlock {
        type_name,
        x,
        y,
        collapsed,
        fields: IndexMap::new(),
        values: Vec::new(),
        statements: Vec::new(),
        next: None,
    };

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "field" => {
                let name = child
                    .attribute("name")
                    .ok_or_else(|| anyhow!("<field> without name attribute"))?;
                let value = child.text().unwrap_or_default();
                block.fields.insert(name.to_string(), value.to_string());
            }
            "value" | "statement" => {
                let tag = child.tag_name().name();
                let name = child
                    .attribute("name")
                    .ok_or_else(|| anyhow!("<{}> without name attribute", tag))?
                    .to_string();
                let inner = single_block_child(child)?;
                if tag == "value" {
                    block.values.push((name, inner));
                } else {
                    block.statements.push((name, inner));
                }
            }
            "next" => {
                block.next = Some(Box::new(single_block_child(child)?));
            }
            other => bail!("unexpected element <{}> in <block>", other),
        }
    }
    Ok(block)
}

fn single_block_child(node: roxmltree::Node) -> Result<SavedBlock> {
    let mut elements = node.children().filter(|n| n.is_element());
    let first = elements
        .next()
        .ok_or_else(|| anyhow!("<{}> without child block", node.tag_name().name()))?;
    if first.tag_name().name() != "block" || elements.next().is_some() {
        bail!(
            "<{}> must contain exactly one <block>",
            node.tag_name().name()
        );
    }
    parse_block(first)
}

// ────────────────────────────────────────────────────────────────────────────
// Convenience round-trips
// ────────────────────────────────────────────────────────────────────────────

/// Export a workspace as XML text.
pub fn workspace_to_xml(ws: &Workspace) -> String {
    generate_workspace_xml(&snapshot(ws))
}

/// Import a workspace from XML text, instantiating block types from the
/// registry.
pub fn workspace_from_xml(text: &str, registry: &BlockRegistry) -> Result<Workspace> {
    restore(&parse_workspace_xml(text)?, registry)
}

// ────────────────────────────────────────────────────────────────────────────
// WorkspaceDoc – binary serialization wrapper
// ────────────────────────────────────────────────────────────────────────────

const MAGIC: &[u8; 9] = b"BLOCKLINK";
const VERSION: u32 = 1;

/// Binary container for a saved workspace, with magic bytes and versioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceDoc {
    pub saved: SavedWorkspace,
}

impl WorkspaceDoc {
    pub fn capture(ws: &Workspace) -> Self {
        Self { saved: snapshot(ws) }
    }

    /// Rebuild the workspace through the normal construction path.
    pub fn restore(&self, registry: &BlockRegistry) -> Result<Workspace> {
        restore(&self.saved, registry)
    }

    /// Save to a binary file with magic bytes and versioning.
    pub fn save_to_binary<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut writer = std::io::BufWriter::new(file);
        std::io::Write::write_all(&mut writer, MAGIC)?;
        std::io::Write::write_all(&mut writer, &VERSION.to_le_bytes())?;
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())?;
        Ok(())
    }

    /// Load from a binary file, checking magic bytes and version.
    pub fn load_from_binary<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut reader = std::io::BufReader::new(file);
        let mut magic = [0u8; 9];
        std::io::Read::read_exact(&mut reader, &mut magic)?;
        if &magic != MAGIC {
            bail!("Invalid magic bytes: expected 'BLOCKLINK'");
        }
        let mut version_bytes = [0u8; 4];
        std::io::Read::read_exact(&mut reader, &mut version_bytes)?;
        let version = u32::from_le_bytes(version_bytes);
        if version != VERSION {
            bail!("Unsupported version: {}", version);
        }
        let doc: WorkspaceDoc =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())?;
        Ok(doc)
    }
}
