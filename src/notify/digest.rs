// src/notify/digest.rs
//! Slack Block Kit rendering of a digest.
//!
//! Layout: header, divider, then per source a header section, one section
//! per item and a divider, then a footer. Items are sorted newest first
//! (undated last) and grouped by source in first-appearance order.
//!
//! Slack rejects messages above 50 blocks. When the digest would exceed that,
//! whole source groups are dropped from the end and a notice replaces them.

use chrono::NaiveDate;
use serde::Serialize;

use crate::item::{cap_chars, sort_for_delivery, Item};

pub const MAX_BLOCKS: usize = 50;
pub const DEFAULT_DIGEST_TITLE: &str = "AI News Update";
const ENTRY_DESCRIPTION_CAP: usize = 200;
const FOOTER_TEXT: &str = "_Updates delivered by News Digest_ 🤖";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Text {
    #[serde(rename = "type")]
    kind: &'static str,
    pub text: String,
}

impl Text {
    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self {
            kind: "mrkdwn",
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    Section { text: Text },
    Divider,
    Context { elements: Vec<Text> },
}

impl Block {
    pub fn section(text: impl Into<String>) -> Self {
        Block::Section {
            text: Text::mrkdwn(text),
        }
    }

    /// Section text, if this is a section.
    pub fn text(&self) -> Option<&str> {
        match self {
            Block::Section { text } => Some(&text.text),
            _ => None,
        }
    }
}

pub(crate) fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Escape the three characters Slack mrkdwn treats as control characters.
pub fn escape_mrkdwn(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Link target for `<url|label>`: control characters escaped, `|` encoded.
fn escape_link(url: &str) -> String {
    escape_mrkdwn(url).replace('|', "%7C")
}

pub fn format_entry(item: &Item) -> String {
    let date = item
        .published
        .map(|d| format!(" • {}", d.format("%b %d, %Y")))
        .unwrap_or_default();
    let mut text = format!(
        "• *<{}|{}>*{}",
        escape_link(&item.link),
        escape_mrkdwn(&item.title),
        date
    );
    if !item.description.is_empty() {
        let desc = cap_chars(&item.description, ENTRY_DESCRIPTION_CAP);
        text.push_str(&format!("\n  _{}_", escape_mrkdwn(&desc)));
    }
    text
}

struct Group<'a> {
    name: &'a str,
    items: Vec<&'a Item>,
}

fn group_by_source(sorted: &[Item]) -> Vec<Group<'_>> {
    let mut groups: Vec<Group<'_>> = Vec::new();
    for item in sorted {
        match groups.iter_mut().find(|g| g.name == item.source_name) {
            Some(g) => g.items.push(item),
            None => groups.push(Group {
                name: &item.source_name,
                items: vec![item],
            }),
        }
    }
    groups
}

fn group_header(name: &str, count: usize) -> Block {
    Block::section(format!(
        "*{}* ({} update{})",
        escape_mrkdwn(name),
        count,
        plural(count)
    ))
}

fn render_group(group: &Group<'_>) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(group.items.len() + 2);
    blocks.push(group_header(group.name, group.items.len()));
    blocks.extend(group.items.iter().map(|it| Block::section(format_entry(it))));
    blocks.push(Block::Divider);
    blocks
}

fn overflow_notice(omitted: usize) -> Block {
    Block::section(format!(
        "_... and {omitted} more update{}. Check the sources for the complete list._",
        plural(omitted)
    ))
}

/// Render `items` as Block Kit blocks, never more than [`MAX_BLOCKS`].
pub fn build_digest(items: &[Item], title: &str, today: NaiveDate) -> Vec<Block> {
    let mut sorted = items.to_vec();
    sort_for_delivery(&mut sorted);
    let groups = group_by_source(&sorted);

    let total = sorted.len();
    let head = vec![
        Block::section(format!(
            "🤖 *{} - {}*\n_{} new update{} found_",
            title,
            today.format("%B %d, %Y"),
            total,
            plural(total)
        )),
        Block::Divider,
    ];
    let footer = Block::Context {
        elements: vec![Text::mrkdwn(FOOTER_TEXT)],
    };

    let rendered: Vec<Vec<Block>> = groups.iter().map(render_group).collect();
    let body_len: usize = rendered.iter().map(Vec::len).sum();

    let mut blocks = head;
    if blocks.len() + body_len + 1 <= MAX_BLOCKS {
        blocks.extend(rendered.into_iter().flatten());
        blocks.push(footer);
        return blocks;
    }

    // head + body + notice + footer must fit
    let budget = MAX_BLOCKS - blocks.len() - 2;
    let mut used = 0usize;
    let mut shown_items = 0usize;
    for (group, group_blocks) in groups.iter().zip(rendered) {
        if used + group_blocks.len() > budget {
            if used == 0 {
                // the first group alone is too big: cut inside it
                let room = budget.saturating_sub(2);
                let partial = Group {
                    name: group.name,
                    items: group.items.iter().take(room).copied().collect(),
                };
                shown_items = partial.items.len();
                let mut cut = render_group(&partial);
                // keep the full count in the header
                cut[0] = group_header(group.name, group.items.len());
                blocks.extend(cut);
            }
            break;
        }
        used += group_blocks.len();
        shown_items += group.items.len();
        blocks.extend(group_blocks);
    }

    blocks.push(overflow_notice(total - shown_items));
    blocks.push(footer);
    blocks
}

/// Single-block error message.
pub fn build_error(message: &str) -> Vec<Block> {
    vec![Block::section(format!(
        "⚠️ *News Digest Error*\n```{}```",
        escape_mrkdwn(message)
    ))]
}
