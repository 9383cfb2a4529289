//! HTML table fallback
//!
//! Last-resort extraction straight from the rendered leaderboard table,
//! used when no fragment payload yields anything. Candidate tables are
//! tried in priority order: tables carrying a leaderboard marker in their
//! own tag, tables inside a leaderboard-marked container, tables inside
//! `<main>`, then any table. The first one whose header row maps both a
//! model column and a score column and whose body yields at least one row
//! wins.
//!
//! Scanning is deliberately tolerant of broken markup: unmatched tags end
//! the block early rather than failing the parse.

use serde_json::{json, Value};
use tracing::debug;

/// Parse the first usable table into raw claim objects
pub fn parse_table(html: &str) -> Vec<Value> {
    debug!("Using table fallback parser");

    let tables = blocks(html, "table");
    if tables.is_empty() {
        return Vec::new();
    }

    let main_range = blocks(html, "main")
        .into_iter()
        .next()
        .map(|b| (b.body_start, b.body_start + b.body.len()));
    let leaderboard_containers: Vec<(usize, usize)> = blocks(html, "div")
        .into_iter()
        .filter(|b| contains_ci(b.open_tag, "leaderboard"))
        .map(|b| (b.body_start, b.body_start + b.body.len()))
        .collect();

    let mut ordered: Vec<(u8, usize)> = tables
        .iter()
        .enumerate()
        .map(|(idx, table)| {
            let priority = if contains_ci(table.open_tag, "leaderboard") {
                0
            } else if leaderboard_containers
                .iter()
                .any(|&(s, e)| table.start >= s && table.start < e)
            {
                1
            } else if main_range
                .map(|(s, e)| table.start >= s && table.start < e)
                .unwrap_or(false)
            {
                2
            } else {
                3
            };
            (priority, idx)
        })
        .collect();
    ordered.sort_by_key(|&(priority, idx)| (priority, idx));

    for (_, idx) in ordered {
        let models = models_from_table(&tables[idx]);
        if !models.is_empty() {
            debug!("Table fallback found {} models", models.len());
            return models;
        }
    }

    debug!("Table fallback found no models");
    Vec::new()
}

fn models_from_table(table: &Block) -> Vec<Value> {
    let thead = match blocks(table.body, "thead").into_iter().next() {
        Some(t) => t,
        None => return Vec::new(),
    };
    let headers: Vec<String> = cell_texts(thead.body, true)
        .into_iter()
        .map(|h| h.to_lowercase())
        .collect();

    let model_idx = headers
        .iter()
        .position(|h| h.contains("model") || h.contains("name"));
    let score_idx = headers
        .iter()
        .position(|h| h.contains("quality") || h.contains("intelligence") || h.contains("score"));
    let (model_idx, score_idx) = match (model_idx, score_idx) {
        (Some(m), Some(s)) => (m, s),
        _ => return Vec::new(),
    };

    let tbody = match blocks(table.body, "tbody").into_iter().next() {
        Some(t) => t,
        None => return Vec::new(),
    };

    let mut models = Vec::new();
    for row in blocks(tbody.body, "tr") {
        let cells = cell_texts(row.body, false);
        if cells.len() <= model_idx.max(score_idx) {
            continue;
        }

        let model_name = cells[model_idx].trim();
        let score_text: String = cells[score_idx]
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let score = match score_text.parse::<f64>() {
            Ok(v) => v,
            Err(_) => continue,
        };
        if model_name.is_empty() {
            continue;
        }

        models.push(json!({
            "model_name": model_name,
            "quality_index": score,
        }));
    }

    models
}

/// One element block located in a larger fragment
struct Block<'a> {
    /// Opening tag content without the angle brackets, e.g. `table class="x"`
    open_tag: &'a str,
    body: &'a str,
    start: usize,
    body_start: usize,
    end: usize,
}

/// Find the next `<tag ...>body</tag>` block at or after `from`
///
/// The body ends at the first matching close tag, so nesting of the same
/// element truncates the outer body. Good enough for the markup at hand.
fn next_block<'a>(html: &'a str, tag: &str, from: usize) -> Option<Block<'a>> {
    let open_marker = format!("<{}", tag);
    let close_marker = format!("</{}", tag);
    let mut pos = from;

    loop {
        let start = find_ci(html, &open_marker, pos)?;
        let after = start + open_marker.len();
        // Require a tag-name boundary so `<th` does not claim `<thead`
        let boundary = matches!(
            html.as_bytes().get(after),
            Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(b'/')
        );
        if !boundary {
            pos = after;
            continue;
        }

        let gt = match html[after..].find('>') {
            Some(rel) => after + rel,
            None => return None,
        };
        let close = match find_ci(html, &close_marker, gt + 1) {
            Some(c) => c,
            None => return None,
        };
        let end = match html[close..].find('>') {
            Some(rel) => close + rel + 1,
            None => html.len(),
        };

        return Some(Block {
            open_tag: &html[start + 1..gt],
            body: &html[gt + 1..close],
            start,
            body_start: gt + 1,
            end,
        });
    }
}

/// All blocks of `tag`, including nested occurrences
fn blocks<'a>(html: &'a str, tag: &str) -> Vec<Block<'a>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(block) = next_block(html, tag, pos) {
        pos = block.body_start;
        out.push(block);
    }
    out
}

/// Text of each `<td>` (and `<th>` when asked) cell in document order
fn cell_texts(fragment: &str, include_th: bool) -> Vec<String> {
    let mut out = Vec::new();
    let mut pos = 0;

    loop {
        let th = if include_th {
            next_block(fragment, "th", pos)
        } else {
            None
        };
        let td = next_block(fragment, "td", pos);

        let cell = match (th, td) {
            (Some(a), Some(b)) => Some(if a.start <= b.start { a } else { b }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        match cell {
            Some(c) => {
                out.push(text_of(c.body));
                pos = c.end;
            }
            None => break,
        }
    }

    out
}

/// Visible text of a fragment: tags stripped, common entities decoded
fn text_of(fragment: &str) -> String {
    let mut text = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for ch in fragment.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }
    decode_entities(&text).trim().to_string()
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() || from > h.len() - n.len() {
        return None;
    }
    (from..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    find_ci(haystack, needle, 0).is_some()
}
