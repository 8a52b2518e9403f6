//! Line-oriented rewriting of Aerospike configuration text.
//!
//! Every function here is pure: text in, text (or a [`PatchError`]) out.
//! Input may use `\r\n` line endings; output always uses `\n` and keeps a
//! trailing newline when the input had one.

mod access;
mod cluster_name;
mod heartbeat;
mod paths;
mod stanza;
mod xdr;

pub use access::{replace_private_access_addresses, set_access_addresses};
pub use cluster_name::set_cluster_name;
pub use heartbeat::{apply_mcast, apply_mesh, seeds_for, MeshReport, SeedPolicy};
pub use paths::{redirect_console_log, referenced_directories};
pub use stanza::{find_stanza, header_words, StanzaSpan};
pub use xdr::{apply_xdr, XdrDestination, XdrOptions, XdrVersion};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("could not find a multicast-group line to rewrite")]
    MulticastGroupMissing,

    #[error("mesh conversion incomplete: {0}")]
    MeshIncomplete(String),

    #[error(
        "could not locate heartbeat line stating 'port 9918' or 'port 3002' to attach mesh seeds to"
    )]
    MeshAnchorMissing,

    #[error("stanza '{0}' is opened but never closed")]
    UnterminatedStanza(String),

    #[error("stanza '{0}' not found")]
    StanzaMissing(String),
}

/// Split text into lines with any trailing `\r` removed
pub(crate) fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.trim_end_matches('\r').to_string())
        .collect()
}

pub(crate) fn join_lines(lines: &[String], trailing_newline: bool) -> String {
    let mut out = lines.join("\n");
    if trailing_newline && !out.is_empty() {
        out.push('\n');
    }
    out
}

pub(crate) fn indent_of(line: &str) -> &str {
    let trimmed = line.trim_start();
    &line[..line.len() - trimmed.len()]
}
