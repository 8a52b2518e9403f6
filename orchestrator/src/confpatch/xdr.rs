use serde::{Deserialize, Serialize};

use super::stanza::{find_all, find_stanza, open_one_line, StanzaSpan};
use super::{join_lines, split_lines, PatchError};

pub const XDR_DEFAULT_PORT: u16 = 3000;
pub const XDR_CONNECTOR_PORT: u16 = 8901;

/// XDR config dialect: v4 uses `datacenter` stanzas and namespace-level
/// grants, v5 nests `namespace` blocks inside each `dc`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XdrVersion {
    V4,
    V5,
}

impl XdrVersion {
    /// Dialect used by a deployed server version string
    pub fn for_server_version(version: &str) -> Self {
        let v = version.trim();
        if v.starts_with("4.") || v.starts_with("3.") {
            XdrVersion::V4
        } else {
            XdrVersion::V5
        }
    }

    fn dc_keyword(self) -> &'static str {
        match self {
            XdrVersion::V4 => "datacenter",
            XdrVersion::V5 => "dc",
        }
    }

    fn address_keyword(self) -> &'static str {
        match self {
            XdrVersion::V4 => "dc-node-address-port",
            XdrVersion::V5 => "node-address-port",
        }
    }

    fn default_stanza(self) -> &'static [&'static str] {
        match self {
            XdrVersion::V4 => &[
                "xdr {",
                "    enable-xdr true",
                "    xdr-digestlog-path /opt/aerospike/xdr/digestlog 1G",
                "}",
            ],
            XdrVersion::V5 => &["xdr {", "", "}"],
        }
    }
}

/// One shipping destination and its seed endpoints (`ip` or `ip port`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XdrDestination {
    pub name: String,
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct XdrOptions {
    pub version: XdrVersion,
    pub destinations: Vec<XdrDestination>,
    pub namespaces: Vec<String>,
    /// Destinations are connectors rather than clusters
    pub connector: bool,
}

/// Add XDR destinations and namespace grants to a config.
///
/// Creates the `xdr` stanza when absent. Destinations already present by
/// name are left alone (v5 only gains missing namespace blocks). Applying
/// the same options twice produces the same text.
pub fn apply_xdr(text: &str, opts: &XdrOptions) -> Result<String, PatchError> {
    let mut lines = split_lines(text);
    let trailing = text.ends_with('\n') || text.is_empty();

    let xdr = match find_stanza(&lines, None, |w| w == ["xdr"]) {
        Some(span) => span,
        None => {
            if lines.iter().any(|l| l.trim_start().starts_with("xdr {")) {
                return Err(PatchError::UnterminatedStanza("xdr".to_string()));
            }
            lines.extend(opts.version.default_stanza().iter().map(|s| s.to_string()));
            find_stanza(&lines, None, |w| w == ["xdr"])
                .ok_or_else(|| PatchError::UnterminatedStanza("xdr".to_string()))?
        }
    };

    let mut xdr = open_one_line(&mut lines, xdr);
    let keyword = opts.version.dc_keyword();
    loop {
        let one_line = find_all(&lines, Some(xdr), |w| w.len() == 2 && w[0] == keyword)
            .into_iter()
            .find(|span| span.start == span.end);
        let Some(span) = one_line else { break };
        let opened = open_one_line(&mut lines, span);
        xdr.end += opened.end - span.end;
    }

    let existing: Vec<(String, StanzaSpan)> =
        find_all(&lines, Some(xdr), |w| w.len() == 2 && w[0] == keyword)
            .into_iter()
            .filter_map(|span| {
                let words = super::header_words(&lines[span.start])?;
                Some((words[1].to_string(), span))
            })
            .collect();

    // new destinations go just before the xdr closing brace
    let mut block = Vec::new();
    for (i, dest) in opts.destinations.iter().enumerate() {
        let listed_earlier = opts.destinations[..i].iter().any(|d| d.name == dest.name);
        if listed_earlier || existing.iter().any(|(name, _)| name == &dest.name) {
            continue;
        }
        block.extend(dc_block(dest, opts));
    }

    // v5: existing destinations gain missing namespace blocks, back to front
    let mut inserts: Vec<(usize, Vec<String>)> = Vec::new();
    if opts.version == XdrVersion::V5 {
        for (name, span) in &existing {
            if !opts.destinations.iter().any(|d| &d.name == name) {
                continue;
            }
            let have: Vec<String> = find_all(&lines, Some(*span), |w| {
                w.len() == 2 && w[0] == "namespace"
            })
            .iter()
            .filter_map(|s| super::header_words(&lines[s.start]).map(|w| w[1].to_string()))
            .collect();
            let missing: Vec<String> = unique(&opts.namespaces)
                .into_iter()
                .filter(|ns| !have.contains(ns))
                .flat_map(|ns| vec![format!("        namespace {} {{", ns), "        }".to_string()])
                .collect();
            if !missing.is_empty() {
                inserts.push((span.end, missing));
            }
        }
    }
    if !block.is_empty() {
        inserts.push((xdr.end, block));
    }
    inserts.sort_by(|a, b| b.0.cmp(&a.0));
    for (at, new_lines) in inserts {
        lines.splice(at..at, new_lines);
    }

    if opts.version == XdrVersion::V4 {
        grant_v4_namespaces(&mut lines, opts);
    }

    Ok(join_lines(&lines, trailing))
}

fn dc_block(dest: &XdrDestination, opts: &XdrOptions) -> Vec<String> {
    let port = if opts.connector {
        XDR_CONNECTOR_PORT
    } else {
        XDR_DEFAULT_PORT
    };
    let mut out = vec![format!("    {} {} {{", opts.version.dc_keyword(), dest.name)];
    if opts.connector {
        out.push("        connector true".to_string());
    }
    for endpoint in &dest.endpoints {
        let endpoint = endpoint.trim();
        if endpoint.contains(' ') {
            out.push(format!("        {} {}", opts.version.address_keyword(), endpoint));
        } else {
            out.push(format!(
                "        {} {} {}",
                opts.version.address_keyword(),
                endpoint,
                port
            ));
        }
    }
    if opts.version == XdrVersion::V5 {
        for ns in unique(&opts.namespaces) {
            out.push(format!("        namespace {} {{", ns));
            out.push("        }".to_string());
        }
    }
    out.push("    }".to_string());
    out
}

/// v4: every listed namespace gets `enable-xdr true` and one
/// `xdr-remote-datacenter` per destination
fn grant_v4_namespaces(lines: &mut Vec<String>, opts: &XdrOptions) {
    let mut spans = find_all(lines, None, |w| {
        w.len() == 2 && w[0] == "namespace" && opts.namespaces.iter().any(|ns| ns == w[1])
    });
    spans.reverse();

    for span in spans {
        let body = &lines[span.body()];
        let has_enable = body.iter().any(|l| {
            let mut words = l.split_whitespace();
            words.next() == Some("enable-xdr") && words.next() == Some("true")
        });
        let remote: Vec<String> = body
            .iter()
            .filter_map(|l| {
                let mut words = l.split_whitespace();
                match words.next() {
                    Some("xdr-remote-datacenter") => words.next().map(|s| s.to_string()),
                    _ => None,
                }
            })
            .collect();

        let mut grants = Vec::new();
        if !has_enable {
            grants.push("    enable-xdr true".to_string());
        }
        for dest in &opts.destinations {
            let line = format!("    xdr-remote-datacenter {}", dest.name);
            if !remote.contains(&dest.name) && !grants.contains(&line) {
                grants.push(line);
            }
        }
        lines.splice(span.start + 1..span.start + 1, grants);
    }
}

fn unique(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "service {\n    proto-fd-max 15000\n}\nnamespace test {\n    replication-factor 2\n    storage-engine memory\n}\nnamespace bar {\n    replication-factor 2\n}\n";

    fn opts(version: XdrVersion, connector: bool) -> XdrOptions {
        XdrOptions {
            version,
            destinations: vec![XdrDestination {
                name: "dc2".to_string(),
                endpoints: vec!["172.17.0.5".to_string(), "172.17.0.6 3100".to_string()],
            }],
            namespaces: vec!["test".to_string(), "test".to_string()],
            connector,
        }
    }

    #[test]
    fn test_v5_adds_stanza_and_destination() {
        let out = apply_xdr(BASE, &opts(XdrVersion::V5, false)).unwrap();
        assert!(out.contains(
            "xdr {\n\n    dc dc2 {\n        node-address-port 172.17.0.5 3000\n        node-address-port 172.17.0.6 3100\n        namespace test {\n        }\n    }\n}\n"
        ));
        assert_eq!(out.matches("namespace test {").count(), 2);
    }

    #[test]
    fn test_v5_twice_is_unchanged() {
        let o = opts(XdrVersion::V5, false);
        let once = apply_xdr(BASE, &o).unwrap();
        let twice = apply_xdr(&once, &o).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.matches("dc dc2 {").count(), 1);
    }

    #[test]
    fn test_v5_existing_dc_gains_missing_namespace() {
        let once = apply_xdr(BASE, &opts(XdrVersion::V5, false)).unwrap();
        let mut more = opts(XdrVersion::V5, false);
        more.namespaces = vec!["test".to_string(), "bar".to_string()];
        let out = apply_xdr(&once, &more).unwrap();
        assert_eq!(out.matches("dc dc2 {").count(), 1);
        assert!(out.contains("        namespace test {\n        }\n        namespace bar {\n        }\n    }\n}"));
    }

    #[test]
    fn test_v5_one_line_dc_gains_namespace_inside_braces() {
        let conf = format!("{}xdr {{\n    dc dc2 {{}}\n}}\n", BASE);
        let out = apply_xdr(&conf, &opts(XdrVersion::V5, false)).unwrap();
        assert!(out.ends_with("xdr {\n    dc dc2 {\n        namespace test {\n        }\n    }\n}\n"));
        assert_eq!(out.matches("dc dc2 {").count(), 1);
        assert_eq!(apply_xdr(&out, &opts(XdrVersion::V5, false)).unwrap(), out);

        let out = apply_xdr("xdr {}\n", &opts(XdrVersion::V5, false)).unwrap();
        assert!(out.starts_with("xdr {\n    dc dc2 {\n"));
        assert!(out.ends_with("    }\n}\n"));
    }

    #[test]
    fn test_v5_connector() {
        let out = apply_xdr(BASE, &opts(XdrVersion::V5, true)).unwrap();
        assert!(out.contains("    dc dc2 {\n        connector true\n        node-address-port 172.17.0.5 8901\n"));
    }

    #[test]
    fn test_v4_grants_namespace_once() {
        let o = opts(XdrVersion::V4, false);
        let once = apply_xdr(BASE, &o).unwrap();
        assert!(once.contains("xdr {\n    enable-xdr true\n    xdr-digestlog-path /opt/aerospike/xdr/digestlog 1G\n    datacenter dc2 {\n        dc-node-address-port 172.17.0.5 3000\n"));
        assert!(once.contains("namespace test {\n    enable-xdr true\n    xdr-remote-datacenter dc2\n    replication-factor 2\n"));
        assert!(once.contains("namespace bar {\n    replication-factor 2\n}"));

        let twice = apply_xdr(&once, &o).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_v4_prefixed_enable_flag_is_not_a_grant() {
        let conf = "namespace test {\n    forward-xdr-writes true\n    ship-enable-xdr true\n}\n";
        let out = apply_xdr(conf, &opts(XdrVersion::V4, false)).unwrap();
        assert!(out.contains("namespace test {\n    enable-xdr true\n"));
    }

    #[test]
    fn test_version_detection() {
        assert_eq!(XdrVersion::for_server_version("4.9.0.3\n"), XdrVersion::V4);
        assert_eq!(XdrVersion::for_server_version("3.15.1"), XdrVersion::V4);
        assert_eq!(XdrVersion::for_server_version("5.7.0.8c"), XdrVersion::V5);
    }
}
