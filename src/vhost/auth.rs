//! `auth_basic` directive editing.
//!
//! Removal is file-wide, not scoped to one server block. Each vhost file
//! carries a single site.

use super::scanner::{directive_part, is_server_opener, leading_whitespace, scan};

pub const AUTH_MARKER: &str = "# Basic Authentication";
pub const AUTH_REALM: &str = "Restricted Access";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEdit {
    pub lines: Vec<String>,
    /// Auth directives were present before the edit.
    pub existed: bool,
    /// A fresh directive block was written after `server_name`.
    pub inserted: bool,
}

/// Adds or removes basic-auth directives.
///
/// Existing directives are always dropped first. When enabling, a new block is
/// inserted after the first `server_name ...;` directly inside each top-level
/// server block, using that line's indentation, so the HTTP and HTTPS sides of
/// a site are both protected. Without such a line anywhere the input comes
/// back untouched with `inserted == false`.
pub fn apply(lines: Vec<String>, enable: bool, htpasswd: &str) -> AuthEdit {
    let (stripped, existed) = remove_directives(&lines);

    if !enable {
        return AuthEdit {
            lines: stripped,
            existed,
            inserted: false,
        };
    }

    let anchors = find_anchors(&stripped);
    if anchors.is_empty() {
        return AuthEdit {
            lines,
            existed,
            inserted: false,
        };
    }

    let mut result = Vec::with_capacity(stripped.len() + 4 * anchors.len());
    for (idx, line) in stripped.into_iter().enumerate() {
        let indent = leading_whitespace(&line).to_string();
        result.push(line);
        if anchors.contains(&idx) {
            result.extend(auth_block(&indent, htpasswd));
        }
    }

    AuthEdit {
        lines: result,
        existed,
        inserted: true,
    }
}

/// Whether the text carries any basic-auth directive.
pub fn has_auth<S: AsRef<str>>(lines: &[S]) -> bool {
    lines.iter().any(|line| line.as_ref().contains("auth_basic"))
}

fn remove_directives(lines: &[String]) -> (Vec<String>, bool) {
    let mut result: Vec<String> = Vec::with_capacity(lines.len());
    let mut existed = false;

    for line in lines {
        let trimmed = line.trim();
        if trimmed.contains("auth_basic") {
            existed = true;
            continue;
        }
        // The marker comment and the blank line before it were written together
        // with the directives.
        if trimmed == AUTH_MARKER {
            if result.last().is_some_and(|prev| prev.trim().is_empty()) {
                result.pop();
            }
            continue;
        }
        result.push(line.clone());
    }

    (result, existed)
}

/// First depth-1 `server_name` line of every top-level server block.
fn find_anchors(lines: &[String]) -> Vec<usize> {
    let info = scan(lines);
    let mut anchors: Vec<usize> = Vec::new();
    let mut seen_openers: Vec<usize> = Vec::new();

    for (idx, line_info) in info.iter().enumerate() {
        if line_info.depth != 1 || line_info.opens_block_with.is_some() {
            continue;
        }
        let Some(opener) = line_info.outermost() else {
            continue;
        };
        if seen_openers.contains(&opener)
            || !is_server_opener(&lines[opener])
            || !is_server_name(&lines[idx])
        {
            continue;
        }
        seen_openers.push(opener);
        anchors.push(idx);
    }

    anchors
}

fn is_server_name(line: &str) -> bool {
    line.trim_start().starts_with("server_name") && directive_part(line).ends_with(';')
}

fn auth_block(indent: &str, htpasswd: &str) -> [String; 4] {
    [
        String::new(),
        format!("{indent}{AUTH_MARKER}"),
        format!("{indent}auth_basic \"{AUTH_REALM}\";"),
        format!("{indent}auth_basic_user_file {htpasswd};"),
    ]
}
