use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use clap::Parser;

use blocklink::xml::{SavedBlock, SavedWorkspace, WorkspaceDoc, parse_workspace_xml};

#[derive(Parser, Debug)]
#[command(author, version, about = "Parse block-workspace XML or binary files to JSON", long_about = None)]
struct Cli {
    /// Workspace .xml file or binary .blk snapshot
    #[arg(value_name = "WORKSPACE_FILE")]
    workspace_file: String,

    /// Print block counts instead of the full JSON
    #[arg(long)]
    stats: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let path = Utf8PathBuf::from(&cli.workspace_file);
    let saved = if path.extension() == Some("blk") {
        WorkspaceDoc::load_from_binary(&path)
            .with_context(|| format!("Failed to load {}", path))?
            .saved
    } else if path.extension() == Some("xml") {
        let text =
            std::fs::read_to_string(&path).with_context(|| format!("Open {}", path))?;
        parse_workspace_xml(&text).with_context(|| format!("Failed to parse {}", path))?
    } else {
        bail!("Unsupported file extension: {}", path);
    };

    if cli.stats {
        print_stats(&saved);
    } else {
        let json = serde_json::to_string_pretty(&saved)?;
        println!("{}", json);
    }
    Ok(())
}

fn print_stats(saved: &SavedWorkspace) {
    let mut total = 0usize;
    let mut by_type: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for block in &saved.blocks {
        count_blocks(block, &mut total, &mut by_type);
    }
    println!("top-level blocks: {}", saved.blocks.len());
    println!("total blocks:     {}", total);
    for (type_name, count) in by_type {
        println!("  {:30} {}", type_name, count);
    }
}

fn count_blocks<'a>(
    block: &'a SavedBlock,
    total: &mut usize,
    by_type: &mut std::collections::BTreeMap<&'a str, usize>,
) {
    *total += 1;
    *by_type.entry(&block.type_name).or_default() += 1;
    for (_, child) in block.values.iter().chain(block.statements.iter()) {
        count_blocks(child, total, by_type);
    }
    if let Some(next) = &block.next {
        count_blocks(next, total, by_type);
    }
}
