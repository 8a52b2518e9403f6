use serde::{Deserialize, Serialize};

use super::stanza::{find_stanza, StanzaSpan};
use super::{indent_of, join_lines, split_lines, PatchError};

pub const MESH_PORT: u16 = 3002;
pub const MESH_TLS_PORT: u16 = 3012;

/// Which cluster IPs become seed entries in a node's mesh config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeedPolicy {
    /// Every cluster IP, including the recipient's own
    #[default]
    AllNodes,
    /// Every cluster IP except the recipient's own
    ExcludeSelf,
}

/// Result of a mesh conversion pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshReport {
    pub text: String,
    /// multicast-group removals and mode flips (an existing `mode mesh` counts as both)
    pub transformations: u32,
    /// Seed lines written, plain and TLS
    pub seed_lines: usize,
}

/// Seed list for one recipient under the given policy
pub fn seeds_for(all_ips: &[String], recipient: Option<&str>, policy: SeedPolicy) -> Vec<String> {
    match (policy, recipient) {
        (SeedPolicy::ExcludeSelf, Some(me)) => {
            all_ips.iter().filter(|ip| ip.as_str() != me).cloned().collect()
        }
        _ => all_ips.to_vec(),
    }
}

/// Heartbeat stanza body if present, else the whole document
fn heartbeat_scope(lines: &[String]) -> std::ops::Range<usize> {
    find_stanza(lines, None, |w| w == ["network"])
        .and_then(|net| find_stanza(lines, Some(net), |w| w == ["heartbeat"]))
        .map(|hb: StanzaSpan| hb.body())
        .unwrap_or(0..lines.len())
}

/// Rewrite the multicast group (and optionally the heartbeat port)
pub fn apply_mcast(text: &str, group: &str, port: Option<&str>) -> Result<String, PatchError> {
    let mut lines = split_lines(text);
    let scope = heartbeat_scope(&lines);
    let mut found = false;

    for line in lines[scope].iter_mut() {
        let first = line.split_whitespace().next();
        if line.contains("multicast-group") {
            *line = format!("{}multicast-group {}", indent_of(line), group);
            found = true;
        } else if let (Some("port"), Some(port)) = (first, port) {
            *line = format!("{}port {}", indent_of(line), port);
        }
    }

    if !found {
        return Err(PatchError::MulticastGroupMissing);
    }
    Ok(join_lines(&lines, text.ends_with('\n')))
}

/// Convert the heartbeat to mesh mode with the given seed IPs.
///
/// Drops `multicast-group`, flips `mode multicast` to `mode mesh`, strips
/// existing seed lines and writes one `mesh-seed-address-port` per seed after
/// the `port 9918`/`port 3002` anchor (normalised to 3002). A `tls-port 3012`
/// line gets matching `tls-mesh-seed-address-port` lines. Running the pass
/// again on its own output yields the same text.
pub fn apply_mesh(text: &str, seeds: &[String]) -> Result<MeshReport, PatchError> {
    let lines = split_lines(text);
    let scope = heartbeat_scope(&lines);

    let mut out = Vec::with_capacity(lines.len() + seeds.len() * 2);
    let mut removed_group = false;
    let mut mode_mesh = false;
    let mut transformations = 0u32;
    let mut anchored = false;
    let mut seed_lines = 0usize;

    for (i, line) in lines.iter().enumerate() {
        if !scope.contains(&i) {
            out.push(line.clone());
            continue;
        }
        let indent = indent_of(line);

        if line.contains("multicast-group") {
            transformations += 1;
            removed_group = true;
        } else if line.contains("mode multicast") {
            out.push(line.replace("mode multicast", "mode mesh"));
            transformations += 1;
            mode_mesh = true;
        } else if line.contains("mode mesh") {
            out.push(line.clone());
            transformations += 2;
            mode_mesh = true;
            removed_group = true;
        } else if line.contains("mesh-seed-address-port") {
            // replaced below at the anchor
        } else if line.contains("tls-port 3012") {
            out.push(line.clone());
            for ip in seeds {
                out.push(format!(
                    "{}tls-mesh-seed-address-port {} {}",
                    indent, ip, MESH_TLS_PORT
                ));
                seed_lines += 1;
            }
        } else if line.contains("port 9918") || line.contains("port 3002") {
            out.push(format!("{}port {}", indent, MESH_PORT));
            for ip in seeds {
                out.push(format!("{}mesh-seed-address-port {} {}", indent, ip, MESH_PORT));
                seed_lines += 1;
            }
            anchored = true;
        } else {
            out.push(line.clone());
        }
    }

    if transformations < 2 {
        let mut missing = Vec::new();
        if !removed_group {
            missing.push("no multicast-group line was removed");
        }
        if !mode_mesh {
            missing.push("no 'mode multicast' line was changed to 'mode mesh'");
        }
        return Err(PatchError::MeshIncomplete(missing.join(", ")));
    }
    if !anchored {
        return Err(PatchError::MeshAnchorMissing);
    }

    Ok(MeshReport {
        text: join_lines(&out, text.ends_with('\n')),
        transformations,
        seed_lines,
    })
}
