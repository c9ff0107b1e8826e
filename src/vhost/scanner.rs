//! Brace-depth scanning of nginx virtual-host text.
//!
//! Every line is classified by how deeply it sits inside `{ }` blocks. Braces
//! inside quoted strings or comments are counted like any other brace, so the
//! result is best-effort on hand-edited files and `nginx -t` stays the final
//! word on validity.

use std::ops::RangeInclusive;

/// Nesting information for a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo {
    /// Nesting depth. A block opener reports the depth of its own body.
    pub depth: usize,
    /// Trimmed opener text when the line opens a block, e.g. `server {`.
    pub opens_block_with: Option<String>,
    /// Indices of the enclosing opener lines, outermost first.
    pub enclosing: Vec<usize>,
    /// For opener lines, the index of the line that closes the block.
    pub block_end: Option<usize>,
}

impl LineInfo {
    pub fn outermost(&self) -> Option<usize> {
        self.enclosing.first().copied()
    }
}

/// A top-level `server { ... }` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerBlock {
    /// Index of the `server {` line.
    pub start: usize,
    /// Index of the matching `}` (the last line when the block never closes).
    pub end: usize,
    /// Ports from every `listen` directive directly inside the block.
    pub ports: Vec<u16>,
    /// Value of the first `root` directive directly inside the block.
    pub root: Option<String>,
}

impl ServerBlock {
    pub fn listens_on(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }
}

/// Classifies each line by nesting depth.
///
/// Depth is recorded before the line's own closing braces are applied, so a
/// closing `}` still counts as inside the block it closes. Opener lines are
/// recorded at the depth of the body they open. Stray closers never push the
/// depth below zero.
pub fn scan<S: AsRef<str>>(lines: &[S]) -> Vec<LineInfo> {
    let mut info: Vec<LineInfo> = Vec::with_capacity(lines.len());
    let mut stack: Vec<usize> = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        let opens = line.matches('{').count();
        let closes = line.matches('}').count();

        if opens > closes {
            for _ in 0..opens - closes {
                stack.push(idx);
            }
            info.push(LineInfo {
                depth: stack.len(),
                opens_block_with: Some(line.trim().to_string()),
                enclosing: stack.clone(),
                block_end: None,
            });
            continue;
        }

        info.push(LineInfo {
            depth: stack.len(),
            opens_block_with: None,
            enclosing: stack.clone(),
            block_end: None,
        });

        for _ in 0..closes - opens {
            if let Some(opener) = stack.pop() {
                info[opener].block_end = Some(idx);
            }
        }
    }

    info
}

/// Finds every top-level `server` block together with the ports it listens on.
pub fn server_blocks<S: AsRef<str>>(lines: &[S]) -> Vec<ServerBlock> {
    let info = scan(lines);
    collect_server_blocks(lines, &info)
}

fn collect_server_blocks<S: AsRef<str>>(lines: &[S], info: &[LineInfo]) -> Vec<ServerBlock> {
    let last = lines.len().saturating_sub(1);
    let mut blocks = Vec::new();

    for (idx, line_info) in info.iter().enumerate() {
        let is_server = line_info.outermost() == Some(idx)
            && line_info
                .opens_block_with
                .as_deref()
                .is_some_and(is_server_opener);
        if !is_server {
            continue;
        }

        let end = line_info.block_end.unwrap_or(last);
        let mut ports = Vec::new();
        let mut root = None;
        for j in idx + 1..=end {
            if info[j].enclosing.len() != 1 {
                continue;
            }
            let line = lines[j].as_ref();
            ports.extend(listen_port(line));
            if root.is_none() {
                root = root_value(line).map(str::to_string);
            }
        }

        blocks.push(ServerBlock {
            start: idx,
            end,
            ports,
            root,
        });
    }

    blocks
}

/// Line ranges of every block holding a port-443 listener.
///
/// The range spans the outermost block around the `listen` line, opener and
/// closing brace included. A listener outside any block yields a range
/// covering just that line.
pub fn ssl_spans<S: AsRef<str>>(lines: &[S]) -> Vec<RangeInclusive<usize>> {
    let info = scan(lines);
    let last = lines.len().saturating_sub(1);
    let mut spans: Vec<RangeInclusive<usize>> = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if !is_ssl_listen(line.as_ref()) || spans.iter().any(|span| span.contains(&idx)) {
            continue;
        }
        let span = match info[idx].outermost() {
            Some(opener) => opener..=info[opener].block_end.unwrap_or(last),
            None => idx..=idx,
        };
        spans.push(span);
    }

    spans
}

/// Document root of the plain-HTTP server block, if one declares it.
pub fn http_document_root<S: AsRef<str>>(lines: &[S]) -> Option<String> {
    server_blocks(lines)
        .into_iter()
        .filter(|block| block.listens_on(80) && !block.listens_on(443))
        .find_map(|block| block.root)
}

/// Document root of the site: the plain-HTTP block's when there is one,
/// otherwise the first block declaring a root. Certbot's `--redirect` merges
/// the HTTP site into the HTTPS block, which leaves no plain-HTTP root.
pub fn site_document_root<S: AsRef<str>>(lines: &[S]) -> Option<String> {
    http_document_root(lines).or_else(|| {
        server_blocks(lines)
            .into_iter()
            .find_map(|block| block.root)
    })
}

/// PHP version of the `include snippets/phpX.Y-fpm.conf;` line.
pub fn php_version<S: AsRef<str>>(lines: &[S]) -> Option<String> {
    lines.iter().find_map(|line| {
        let rest = directive_part(line.as_ref())
            .trim()
            .strip_prefix("include")?
            .trim_start()
            .strip_prefix("snippets/php")?;
        let version = rest.strip_suffix("-fpm.conf;")?;
        (!version.is_empty() && version.chars().all(|c| c.is_ascii_digit() || c == '.'))
            .then(|| version.to_string())
    })
}

pub fn is_server_opener(text: &str) -> bool {
    text.trim_start()
        .strip_prefix("server")
        .is_some_and(|rest| rest.trim_start().starts_with('{'))
}

pub fn is_ssl_listen(line: &str) -> bool {
    line.contains("listen 443") || line.contains("listen [::]:443")
}

/// Port of a `listen` directive: `listen 80;`, `listen [::]:443 ssl;`,
/// `listen 127.0.0.1:8080;`.
pub fn listen_port(line: &str) -> Option<u16> {
    let rest = line.trim().strip_prefix("listen")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let address = rest.split_whitespace().next()?.trim_end_matches(';');
    address.rsplit(':').next()?.parse().ok()
}

/// Value of a `root` directive, without the terminating `;`.
pub fn root_value(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("root")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let value = rest.split(';').next()?.trim();
    (!value.is_empty()).then_some(value)
}

pub fn leading_whitespace(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// The directive part of a line, with any trailing `#` comment removed.
pub fn directive_part(line: &str) -> &str {
    line.split('#').next().unwrap_or(line).trim_end()
}
