use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};
use bonsai_tree::{CreateOutcome, Node, NodeId, TreeBackend, TreeStore, TreeStoreError};

use crate::cli_args::CliCommand;
use crate::tree_view::{build_tree_view, export_tree_json, render_tree_json};

const LOG_PREVIEW_CHARS: usize = 150;
const OFFSHOOT_PREVIEW_CHARS: usize = 100;
const SEED_PREVIEW_CHARS: usize = 100;
const PRUNE_PREVIEW_CHARS: usize = 50;
const CHERRY_PICK_PREVIEW_CHARS: usize = 200;

const NO_CURRENT_NODE_HINT: &str =
    "no current node: run 'bai seed <message>' or 'bai checkout <id>' first";

pub fn execute_command<B, R, W>(
    store: &TreeStore<B>,
    command: CliCommand,
    input: &mut R,
    out: &mut W,
) -> Result<()>
where
    B: TreeBackend,
    R: BufRead,
    W: Write,
{
    let rendered = match command {
        CliCommand::Seed { content, model } => execute_seed(store, content, model)?,
        CliCommand::Say { message, model } => execute_say(store, message, model)?,
        CliCommand::Reply {
            content,
            model,
            parent,
        } => execute_reply(store, content, model, parent.as_deref())?,
        CliCommand::Checkout { id } => execute_checkout(store, &id)?,
        CliCommand::Current => execute_current(store)?,
        CliCommand::Log { up, all } => execute_log(store, if all { 0 } else { up.max(1) })?,
        CliCommand::History => execute_history(store)?,
        CliCommand::Offshoots => execute_offshoots(store)?,
        CliCommand::Seeds => execute_seeds(store)?,
        CliCommand::Prune { id, yes } => execute_prune(store, &id, yes, input, out)?,
        CliCommand::CherryPick { id } => execute_cherry_pick(store, &id)?,
        CliCommand::Tree { output } => {
            let view = build_tree_view(store).context("failed to build tree view")?;
            match output {
                Some(path) => {
                    export_tree_json(&view, &path)?;
                    format!(
                        "tree exported: path={} nodes={}",
                        path.display(),
                        view.node_count
                    )
                }
                None => render_tree_json(&view)?,
            }
        }
        CliCommand::Validate => execute_validate(store, out)?,
    };

    if !rendered.is_empty() {
        writeln!(out, "{rendered}")?;
    }
    Ok(())
}

fn parse_node_id(raw: &str) -> Result<NodeId> {
    NodeId::parse(raw).with_context(|| format!("invalid node id '{raw}'"))
}

fn normalize_preview_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn content_preview(content: &str, max_chars: usize) -> String {
    let normalized = normalize_preview_text(content);
    if normalized.is_empty() {
        return "(empty)".to_string();
    }
    if normalized.chars().count() <= max_chars {
        return normalized;
    }
    let truncated = normalized.chars().take(max_chars).collect::<String>();
    format!("{truncated}...")
}

fn model_label(node: &Node) -> &str {
    node.model.as_deref().unwrap_or("none")
}

fn node_line(label: &str, node: &Node, max_chars: usize) -> String {
    format!(
        "{label}: id={} kind={} model={} preview={}",
        node.id,
        node.kind,
        model_label(node),
        content_preview(&node.content, max_chars)
    )
}

fn render_created(label: &str, outcome: &CreateOutcome) -> String {
    let node = &outcome.node;
    let mut lines = vec![format!(
        "{label}: id={} parent={} kind={} model={}",
        node.id,
        node.parent
            .as_ref()
            .map(NodeId::as_str)
            .unwrap_or("none"),
        node.kind,
        model_label(node)
    )];
    if let Some(error) = &outcome.pointer_error {
        lines.push(format!(
            "warning: node saved but current pointer was not moved: error={error}; run 'bai checkout {}'",
            node.id
        ));
    }
    lines.join("\n")
}

fn require_current<B: TreeBackend>(store: &TreeStore<B>) -> Result<Option<Node>> {
    store
        .current_node()
        .context("failed to resolve current node")
}

fn execute_seed<B: TreeBackend>(
    store: &TreeStore<B>,
    content: String,
    model: Option<String>,
) -> Result<String> {
    let outcome = store
        .create_root(content, model)
        .context("failed to create seed")?;
    Ok(render_created("seeded", &outcome))
}

fn execute_say<B: TreeBackend>(
    store: &TreeStore<B>,
    message: String,
    model: Option<String>,
) -> Result<String> {
    let Some(current) = require_current(store)? else {
        return Ok(NO_CURRENT_NODE_HINT.to_string());
    };
    let model = model.or_else(|| current.model.clone());
    let outcome = store
        .create_user_child(message, &current.id, model)
        .context("failed to add message")?;
    Ok(render_created("added", &outcome))
}

fn execute_reply<B: TreeBackend>(
    store: &TreeStore<B>,
    content: String,
    model: String,
    parent: Option<&str>,
) -> Result<String> {
    let parent_id = match parent {
        Some(raw) => parse_node_id(raw)?,
        None => match require_current(store)? {
            Some(current) => current.id,
            None => bail!("{NO_CURRENT_NODE_HINT}"),
        },
    };
    let outcome = store
        .create_assistant_reply(&parent_id, content, model)
        .context("failed to record reply")?;
    Ok(render_created("replied", &outcome))
}

fn execute_checkout<B: TreeBackend>(store: &TreeStore<B>, raw_id: &str) -> Result<String> {
    let id = parse_node_id(raw_id)?;
    if store.current()?.as_ref() == Some(&id) && store.contains(&id)? {
        return Ok(format!("already on node: id={id}"));
    }
    let node = store
        .checkout(&id)
        .with_context(|| format!("failed to check out node '{id}'"))?;
    Ok(node_line("checked out", &node, LOG_PREVIEW_CHARS))
}

fn execute_current<B: TreeBackend>(store: &TreeStore<B>) -> Result<String> {
    Ok(match require_current(store)? {
        Some(node) => node_line("current", &node, LOG_PREVIEW_CHARS),
        None => "current: none".to_string(),
    })
}

fn execute_log<B: TreeBackend>(store: &TreeStore<B>, max_levels: i64) -> Result<String> {
    let Some(current) = require_current(store)? else {
        return Ok(NO_CURRENT_NODE_HINT.to_string());
    };
    let ancestors = store
        .ancestors(&current.id, max_levels)
        .context("failed to walk ancestors")?;

    let levels = if max_levels > 0 {
        max_levels.to_string()
    } else {
        "all".to_string()
    };
    let mut lines = vec![
        format!(
            "log: node={} levels={} ancestors={}",
            current.id,
            levels,
            ancestors.len()
        ),
        node_line("node", &current, LOG_PREVIEW_CHARS),
    ];
    if ancestors.is_empty() {
        lines.push("ancestors: none".to_string());
    }
    for (depth, ancestor) in ancestors.iter().enumerate() {
        lines.push(format!(
            "ancestor: depth={} id={} kind={} model={} preview={}",
            depth + 1,
            ancestor.id,
            ancestor.kind,
            model_label(ancestor),
            content_preview(&ancestor.content, LOG_PREVIEW_CHARS)
        ));
    }
    Ok(lines.join("\n"))
}

fn execute_history<B: TreeBackend>(store: &TreeStore<B>) -> Result<String> {
    let Some(current) = require_current(store)? else {
        return Ok(NO_CURRENT_NODE_HINT.to_string());
    };
    let history = store
        .conversation_history(&current.id)
        .context("failed to load conversation history")?;

    let mut lines = vec![format!(
        "history: node={} turns={}",
        current.id,
        history.len()
    )];
    for (index, turn) in history.iter().enumerate() {
        lines.push(format!(
            "turn: index={} id={} kind={} model={} content={}",
            index,
            turn.id,
            turn.kind,
            model_label(turn),
            normalize_preview_text(&turn.content)
        ));
    }
    Ok(lines.join("\n"))
}

fn execute_offshoots<B: TreeBackend>(store: &TreeStore<B>) -> Result<String> {
    let Some(current) = require_current(store)? else {
        return Ok(NO_CURRENT_NODE_HINT.to_string());
    };
    let children = store
        .children(&current.id)
        .context("failed to list offshoots")?;

    let mut lines = vec![format!(
        "offshoots: node={} count={}",
        current.id,
        children.len()
    )];
    if children.is_empty() {
        lines.push("offshoots: none".to_string());
    }
    lines.extend(
        children
            .iter()
            .map(|child| node_line("offshoot", child, OFFSHOOT_PREVIEW_CHARS)),
    );
    Ok(lines.join("\n"))
}

fn execute_seeds<B: TreeBackend>(store: &TreeStore<B>) -> Result<String> {
    let roots = store.roots().context("failed to list seeds")?;
    let current = store.current()?;

    let mut lines = vec![format!("seeds: count={}", roots.len())];
    if roots.is_empty() {
        lines.push("seeds: none".to_string());
    }
    for root in &roots {
        let marker = match &current {
            Some(current) if current == &root.id => "current",
            Some(current) if store.subtree_contains(&root.id, current)? => "contains_current",
            _ => "none",
        };
        lines.push(format!(
            "seed: id={} marker={} model={} preview={}",
            root.id,
            marker,
            model_label(root),
            content_preview(&root.content, SEED_PREVIEW_CHARS)
        ));
    }
    Ok(lines.join("\n"))
}

fn confirm<R: BufRead, W: Write>(prompt: &str, input: &mut R, out: &mut W) -> Result<bool> {
    write!(out, "{prompt} [y/N]: ")?;
    out.flush()?;
    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn execute_prune<B, R, W>(
    store: &TreeStore<B>,
    raw_id: &str,
    assume_yes: bool,
    input: &mut R,
    out: &mut W,
) -> Result<String>
where
    B: TreeBackend,
    R: BufRead,
    W: Write,
{
    let id = parse_node_id(raw_id)?;
    let doomed = store
        .collect_subtree(&id)
        .context("failed to collect subtree")?;
    if doomed.is_empty() {
        return Err(TreeStoreError::NotFound(id)).context("nothing to prune");
    }

    let current = store.current()?;
    let clears_current = current
        .as_ref()
        .is_some_and(|current| doomed.iter().any(|node| &node.id == current));

    let mut preview = vec![format!(
        "prune preview: root={} nodes={} clears_current={}",
        id,
        doomed.len(),
        clears_current
    )];
    preview.extend(
        doomed
            .iter()
            .map(|node| node_line("prune node", node, PRUNE_PREVIEW_CHARS)),
    );
    writeln!(out, "{}", preview.join("\n"))?;

    if !assume_yes && !confirm(&format!("Delete {} node(s)?", doomed.len()), input, out)? {
        return Ok("prune cancelled".to_string());
    }

    let deleted = store
        .prune(&id)
        .with_context(|| format!("failed to prune node '{id}'"))?;
    if clears_current {
        store
            .clear_current()
            .context("pruned subtree but failed to clear current pointer")?;
    }
    Ok(format!(
        "pruned: root={id} deleted={deleted} current_cleared={clears_current}"
    ))
}

fn execute_cherry_pick<B: TreeBackend>(store: &TreeStore<B>, raw_id: &str) -> Result<String> {
    let source_id = parse_node_id(raw_id)?;
    let Some(current) = require_current(store)? else {
        bail!("{NO_CURRENT_NODE_HINT}");
    };
    if current.id == source_id {
        bail!("cannot cherry-pick node '{source_id}' onto itself");
    }
    let outcome = store
        .cherry_pick(&source_id, &current.id)
        .with_context(|| format!("failed to cherry-pick node '{source_id}'"))?;

    Ok(format!(
        "{}\nsource: id={source_id} preview={}",
        render_created("cherry-picked", &outcome),
        content_preview(&outcome.node.content, CHERRY_PICK_PREVIEW_CHARS)
    ))
}

fn execute_validate<B: TreeBackend, W: Write>(store: &TreeStore<B>, out: &mut W) -> Result<String> {
    let report = store
        .validation_report()
        .context("failed to validate tree")?;
    let mut lines = vec![format!(
        "tree validation: nodes={} orphaned={} cycles={} valid={}",
        report.nodes,
        report.orphaned,
        report.cycles,
        report.is_valid()
    )];
    lines.extend(
        report
            .orphaned_ids
            .iter()
            .map(|id| format!("orphaned: id={id}")),
    );
    lines.extend(report.cycle_ids.iter().map(|id| format!("cycle: id={id}")));

    if !report.is_valid() {
        writeln!(out, "{}", lines.join("\n"))?;
        bail!(
            "tree validation failed: orphaned={} cycles={}",
            report.orphaned,
            report.cycles
        );
    }
    Ok(lines.join("\n"))
}
