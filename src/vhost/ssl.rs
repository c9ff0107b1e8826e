//! Edits on the HTTPS side of a vhost: stripping the port-443 block, pointing
//! its `root` at the site's document root and adding hardened TLS directives.

use super::scanner::{is_ssl_listen, leading_whitespace, root_value, ssl_spans};

pub const HSTS_HEADER: &str = "Strict-Transport-Security";
pub const HSTS_MAX_AGE: u32 = 63_072_000;
pub const RESOLVERS: [&str; 2] = ["8.8.8.8", "8.8.4.4"];

/// Removes every port-443 block and any stray SSL directives left elsewhere.
pub fn strip(lines: Vec<String>) -> Vec<String> {
    let spans = ssl_spans(&lines);

    lines
        .into_iter()
        .enumerate()
        .filter(|(idx, line)| !spans.iter().any(|span| span.contains(idx)) && !is_stray_ssl(line))
        .map(|(_, line)| line)
        .collect()
}

fn is_stray_ssl(line: &str) -> bool {
    line.contains("ssl_") || line.contains(HSTS_HEADER)
}

/// Rewrites `root` directives inside the port-443 block to `webroot`.
///
/// Returns the input unchanged when no 443 listener exists yet.
pub fn fix_docroot(lines: Vec<String>, webroot: &str) -> (Vec<String>, bool) {
    let spans = ssl_spans(&lines);
    if spans.is_empty() {
        return (lines, false);
    }

    let mut fixed = false;
    let result = lines
        .into_iter()
        .enumerate()
        .map(|(idx, line)| {
            let in_ssl_block = spans.iter().any(|span| span.contains(&idx));
            if in_ssl_block && root_value(&line).is_some_and(|value| value != webroot) {
                fixed = true;
                format!("{}root {};", leading_whitespace(&line), webroot)
            } else {
                line
            }
        })
        .collect();

    (result, fixed)
}

/// Inserts OCSP stapling, resolver and HSTS directives after each
/// `ssl_certificate_key` line.
///
/// Skipped when HSTS is already configured or no 443 listener exists.
pub fn enhance(lines: Vec<String>) -> (Vec<String>, bool) {
    let already_enhanced = is_enhanced(&lines);
    let has_ssl = lines.iter().any(|line| is_ssl_listen(line));
    if already_enhanced || !has_ssl {
        return (lines, false);
    }

    let mut enhanced = false;
    let mut result = Vec::with_capacity(lines.len() + 9);
    for line in lines {
        let anchor = line.contains("ssl_certificate_key") && line.contains(';');
        let indent = leading_whitespace(&line).to_string();
        result.push(line);
        if anchor {
            result.extend(enhancement_block(&indent));
            enhanced = true;
        }
    }

    (result, enhanced)
}

/// Whether an HSTS header is already configured.
pub fn is_enhanced<S: AsRef<str>>(lines: &[S]) -> bool {
    lines.iter().any(|line| line.as_ref().contains(HSTS_HEADER))
}

fn enhancement_block(indent: &str) -> Vec<String> {
    vec![
        String::new(),
        format!("{indent}# Enhanced SSL Security Settings"),
        format!("{indent}ssl_stapling on;"),
        format!("{indent}ssl_stapling_verify on;"),
        format!("{indent}resolver {} valid=300s;", RESOLVERS.join(" ")),
        format!("{indent}resolver_timeout 5s;"),
        String::new(),
        format!("{indent}# HSTS (HTTP Strict Transport Security)"),
        format!(
            "{indent}add_header {HSTS_HEADER} \"max-age={HSTS_MAX_AGE}; includeSubDomains; preload\" always;"
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vhost::scanner::server_blocks;
    use crate::vhost::scanner::tests::{HTTP_AND_HTTPS, to_lines};

    const WEBROOT: &str = "/var/www/example.com/web";

    fn count(lines: &[String], needle: &str) -> usize {
        lines.iter().filter(|line| line.contains(needle)).count()
    }

    #[test]
    fn test_strip_removes_https_block() {
        let original = to_lines(HTTP_AND_HTTPS);
        let https = server_blocks(&original)[1].clone();

        let stripped = strip(original.clone());

        assert_eq!(stripped.len(), original.len() - (https.end - https.start + 1));
        assert_eq!(count(&stripped, "listen 443"), 0);
        assert_eq!(count(&stripped, "listen [::]:443"), 0);
        assert_eq!(count(&stripped, "ssl_"), 0);
        assert_eq!(count(&stripped, HSTS_HEADER), 0);
        // the HTTP block survives unchanged and in order
        assert_eq!(stripped[..], original[..https.start]);
    }

    #[test]
    fn test_strip_drops_stray_ssl_directives() {
        let text = "server {\n    listen 80;\n    ssl_certificate /x.pem;\n    add_header Strict-Transport-Security \"max-age=1\";\n    root /srv;\n}";
        let stripped = strip(to_lines(text));
        assert_eq!(
            stripped,
            to_lines("server {\n    listen 80;\n    root /srv;\n}")
        );
    }

    #[test]
    fn test_strip_removes_enhanced_block() {
        let (enhanced, _) = enhance(to_lines(HTTP_AND_HTTPS));
        let stripped = strip(enhanced);
        assert_eq!(count(&stripped, "resolver"), 0);
        assert_eq!(count(&stripped, HSTS_HEADER), 0);
        assert_eq!(stripped[..], to_lines(HTTP_AND_HTTPS)[..13]);
    }

    #[test]
    fn test_strip_without_ssl_is_noop() {
        let text = "server {\n    listen 80;\n    server_name example.com;\n}";
        assert_eq!(strip(to_lines(text)), to_lines(text));
    }

    #[test]
    fn test_fix_docroot_only_touches_https_block() {
        let (fixed_lines, fixed) = fix_docroot(to_lines(HTTP_AND_HTTPS), "/var/www/example.com/new");

        assert!(fixed);
        assert_eq!(fixed_lines[6], "    root /var/www/example.com/web;");
        assert_eq!(fixed_lines[20], "    root /var/www/example.com/new;");
        assert_eq!(fixed_lines.len(), to_lines(HTTP_AND_HTTPS).len());
    }

    #[test]
    fn test_fix_docroot_matching_http_root() {
        let (fixed_lines, fixed) = fix_docroot(to_lines(HTTP_AND_HTTPS), WEBROOT);
        assert!(fixed);
        assert_eq!(count(&fixed_lines, "root /old/path"), 0);
        assert_eq!(count(&fixed_lines, &format!("root {WEBROOT};")), 2);
    }

    #[test]
    fn test_fix_docroot_already_correct() {
        let text = HTTP_AND_HTTPS.replace("/old/path", WEBROOT);
        let original = to_lines(&text);
        let (fixed_lines, fixed) = fix_docroot(original.clone(), WEBROOT);
        assert!(!fixed);
        assert_eq!(fixed_lines, original);
    }

    #[test]
    fn test_fix_docroot_without_ssl_is_noop() {
        let text = "server {\n    listen 80;\n    root /old/path;\n}";
        let original = to_lines(text);
        let (fixed_lines, fixed) = fix_docroot(original.clone(), WEBROOT);
        assert!(!fixed);
        assert_eq!(fixed_lines, original);
    }

    #[test]
    fn test_enhance_inserts_after_certificate_key() {
        let original = to_lines(HTTP_AND_HTTPS);
        let (enhanced, done) = enhance(original.clone());

        assert!(done);
        assert_eq!(count(&enhanced, HSTS_HEADER), 1);

        let key = enhanced
            .iter()
            .position(|line| line.contains("ssl_certificate_key"))
            .unwrap();
        let hsts = enhanced
            .iter()
            .position(|line| line.contains(HSTS_HEADER))
            .unwrap();
        let next_original = enhanced
            .iter()
            .position(|line| line.contains("root /old/path"))
            .unwrap();
        assert!(key < hsts && hsts < next_original);
        assert_eq!(enhanced[key + 1], "");
        assert_eq!(enhanced[key + 2], "    # Enhanced SSL Security Settings");
        assert_eq!(enhanced[key + 3], "    ssl_stapling on;");
        assert_eq!(enhanced[key + 5], "    resolver 8.8.8.8 8.8.4.4 valid=300s;");
        assert_eq!(
            enhanced[hsts],
            "    add_header Strict-Transport-Security \"max-age=63072000; includeSubDomains; preload\" always;"
        );
        assert_eq!(enhanced.len(), original.len() + 9);
    }

    #[test]
    fn test_enhance_is_guarded_by_hsts() {
        let (once, _) = enhance(to_lines(HTTP_AND_HTTPS));
        let (twice, done) = enhance(once.clone());
        assert!(!done);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_is_enhanced() {
        let original = to_lines(HTTP_AND_HTTPS);
        assert!(!is_enhanced(&original));
        let (enhanced, _) = enhance(original);
        assert!(is_enhanced(&enhanced));
    }

    #[test]
    fn test_enhance_requires_ssl_listener() {
        let text = "server {\n    listen 80;\n    ssl_certificate_key /k.pem;\n}";
        let original = to_lines(text);
        let (lines, done) = enhance(original.clone());
        assert!(!done);
        assert_eq!(lines, original);
    }

    #[test]
    fn test_enhance_every_certificate_key_occurrence() {
        let text = "server {\n    listen 443 ssl;\n    ssl_certificate_key /a.pem;\n}\nserver {\n    listen 443 ssl;\n  ssl_certificate_key /b.pem;\n}";
        let (lines, done) = enhance(to_lines(text));
        assert!(done);
        assert_eq!(count(&lines, HSTS_HEADER), 2);
        assert!(lines.contains(&"  ssl_stapling on;".to_string()));
    }

    #[test]
    fn test_enhance_requires_terminated_key_line() {
        let text = "server {\n    listen 443 ssl;\n    ssl_certificate_key /a.pem\n}";
        let (_, done) = enhance(to_lines(text));
        assert!(!done);
    }
}
