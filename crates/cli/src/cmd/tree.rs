//! Print the directory tree at a point in time

use crate::cmd::Context;
use anyhow::Result;
use dfb_index::StateQuery;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Default)]
struct Node {
    children: BTreeMap<String, Node>,
    deleted: bool,
    is_file: bool,
}

pub fn run(
    config_path: &Path,
    path: &str,
    at: Option<&str>,
    max_depth: Option<usize>,
) -> Result<i32> {
    let ctx = Context::open(config_path, false)?;

    let root_path = path.trim_end_matches('/');
    let query = StateQuery {
        at: at.map(|expr| ctx.parse_time(expr)).transpose()?,
        subpath: root_path.to_string(),
        ..Default::default()
    };
    let listing = ctx.store.tree(&query, true);

    let mut root = Node::default();
    for entry in &listing.files {
        let rel = if root_path.is_empty() {
            entry.rec.apath.as_str()
        } else {
            &entry.rec.apath[root_path.len() + 1..]
        };
        let mut node = &mut root;
        for part in rel.split('/') {
            node = node.children.entry(part.to_string()).or_default();
        }
        node.is_file = true;
        node.deleted = !entry.rec.exists();
    }

    println!("{root_path}/");
    print_node(&root, "", 1, max_depth.unwrap_or(0));
    Ok(0)
}

fn print_node(node: &Node, indent: &str, depth: usize, max_depth: usize) {
    if max_depth > 0 && depth > max_depth {
        return;
    }
    let count = node.children.len();
    for (i, (name, child)) in node.children.iter().enumerate() {
        let (prefix, next_indent) = if i == count - 1 {
            ("└── ", format!("{indent}    "))
        } else {
            ("├── ", format!("{indent}│   "))
        };

        let mut label = name.clone();
        if !child.is_file || !child.children.is_empty() {
            label.push('/');
        } else if child.deleted {
            label.push_str(" (DEL)");
        }
        println!("{indent}{prefix}{label}");
        print_node(child, &next_indent, depth + 1, max_depth);
    }
}
