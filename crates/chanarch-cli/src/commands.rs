//! Command implementations
//!
//! Each command renders its output to a `String`; the binary prints it.

use std::fmt::Write as _;

use anyhow::{Context, Result, bail};
use chanarch_index::{
    ArchiveIndex, ByteSource, ChannelEntry, Instant, Interval, LeafRecord, RTree,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{CliConfig, Command};

/// Run the configured command
pub fn run(cli: &CliConfig) -> Result<String> {
    let config = cli.index_config()?;
    let index = ArchiveIndex::open(&cli.index, &config)
        .with_context(|| format!("failed to open index {}", cli.index.display()))?;

    let output = match &cli.command {
        Command::Info => info_command(&index, &cli.index.display().to_string()),
        Command::Dump { channel } => dump_command(&index, channel),
        Command::Query {
            channel,
            start,
            end,
            json,
            reverse,
            ..
        } => query_command(&index, channel, *start, *end, *json, *reverse),
        Command::Verify { channel } => verify_command(&index, channel.as_deref()),
    };
    index.close();
    output
}

fn open_tree<'a, S: ByteSource>(
    index: &'a ArchiveIndex<S>,
    channel: &str,
) -> Result<RTree<'a, S>> {
    index
        .tree(channel)
        .with_context(|| format!("failed to open tree of channel {channel}"))
}

/// Header, channel directory and covered span per channel
pub fn info_command<S: ByteSource>(index: &ArchiveIndex<S>, name: &str) -> Result<String> {
    let header = index.header();
    let codec = index.codec();
    let mut out = String::new();

    writeln!(out, "Index: {name}")?;
    writeln!(out, "Version: {}", header.version)?;
    writeln!(
        out,
        "Epoch: {} ({} Unix seconds)",
        codec.epoch(),
        codec.epoch_unix_secs()
    )?;
    writeln!(out, "Resolution: {} ticks/s", codec.ticks_per_second())?;
    writeln!(out, "Channels: {}", header.channels.len())?;

    for entry in index.channels() {
        writeln!(out, "  {}", channel_summary(index, entry))?;
    }
    Ok(out)
}

fn channel_summary<S: ByteSource>(index: &ArchiveIndex<S>, entry: &ChannelEntry) -> String {
    let tree = match index.tree_for(entry) {
        Ok(tree) => tree,
        Err(e) => {
            warn!("Channel {}: {e}", entry.name);
            return format!("{}: unreadable anchor ({e})", entry.name);
        }
    };
    let shape = format!(
        "{}: fanout {}, root {:#x}",
        entry.name,
        tree.fanout(),
        tree.root_offset()
    );
    match tree.time_range() {
        Ok(Some(span)) => format!("{shape}, {span}"),
        Ok(None) => format!("{shape}, empty"),
        Err(e) => format!("{shape}, unreadable ({e})"),
    }
}

/// Every node of a channel's tree, indented by depth
pub fn dump_command<S: ByteSource>(index: &ArchiveIndex<S>, channel: &str) -> Result<String> {
    let tree = open_tree(index, channel)?;
    let mut out = String::new();
    writeln!(
        out,
        "Channel {channel}: root {:#x}, fanout {}",
        tree.root_offset(),
        tree.fanout()
    )?;

    for visit in tree.nodes() {
        let visit = visit.with_context(|| format!("failed to walk tree of channel {channel}"))?;
        let indent = "  ".repeat(visit.depth);
        for line in visit.node.to_string().lines() {
            writeln!(out, "{indent}{line}")?;
        }
    }
    Ok(out)
}

/// One query result as printed in JSON
#[derive(Debug, Serialize)]
struct QueryRow {
    start: String,
    end: String,
    data_offset: u64,
}

impl From<&LeafRecord> for QueryRow {
    fn from(record: &LeafRecord) -> Self {
        Self {
            start: record.interval.start.format(),
            end: record.interval.end.format(),
            data_offset: record.data_offset,
        }
    }
}

/// Leaf records of a channel overlapping `[start, end]`
pub fn query_command<S: ByteSource>(
    index: &ArchiveIndex<S>,
    channel: &str,
    start: Instant,
    end: Instant,
    json: bool,
    reverse: bool,
) -> Result<String> {
    let tree = open_tree(index, channel)?;
    let interval = Interval::new(start, end)?;
    let options = index.config().query_options().with_descending(reverse);

    let records = tree
        .range_query_with(interval, options)?
        .collect_all()
        .with_context(|| format!("query {interval} on channel {channel} failed"))?;
    info!("Query on {channel} matched {} blocks", records.len());

    if json {
        let rows: Vec<QueryRow> = records.iter().map(QueryRow::from).collect();
        return Ok(serde_json::to_string_pretty(&rows)? + "\n");
    }

    let mut out = String::new();
    for record in &records {
        writeln!(out, "{} -> {:#x}", record.interval, record.data_offset)?;
    }
    writeln!(out, "{} blocks", records.len())?;
    Ok(out)
}

/// Consistency check of one channel, or all channels
pub fn verify_command<S: ByteSource>(
    index: &ArchiveIndex<S>,
    channel: Option<&str>,
) -> Result<String> {
    let entries: Vec<&ChannelEntry> = match channel {
        Some(name) => vec![
            index
                .header()
                .channel(name)
                .with_context(|| format!("channel not found: {name}"))?,
        ],
        None => index.channels().iter().collect(),
    };

    let mut out = String::new();
    let mut failed = 0;
    for entry in &entries {
        match index.tree_for(entry).and_then(|tree| tree.verify()) {
            Ok(stats) => writeln!(
                out,
                "{}: ok ({} nodes, {} leaves, {} records, depth {})",
                entry.name, stats.nodes, stats.leaf_nodes, stats.leaf_records, stats.depth
            )?,
            Err(e) => {
                failed += 1;
                writeln!(out, "{}: FAILED: {e}", entry.name)?;
            }
        }
    }

    if failed > 0 {
        bail!(
            "{out}{failed} of {} channels failed verification",
            entries.len()
        );
    }
    Ok(out)
}
