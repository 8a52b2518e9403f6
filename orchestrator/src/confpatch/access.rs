use std::net::IpAddr;

use super::stanza::find_stanza;
use super::{indent_of, join_lines, split_lines, PatchError};

const ACCESS_KEYS: [&str; 2] = ["access-address", "alternate-access-address"];

/// Set `access-address` and `alternate-access-address` in `network { service { } }`.
///
/// Existing directives are overwritten in place, missing ones are inserted
/// after the stanza header.
pub fn set_access_addresses(
    text: &str,
    access: &str,
    alternate: &str,
) -> Result<String, PatchError> {
    let mut lines = split_lines(text);
    let trailing = text.ends_with('\n');

    let service = find_stanza(&lines, None, |w| w == ["network"])
        .and_then(|net| find_stanza(&lines, Some(net), |w| w == ["service"]))
        .ok_or_else(|| PatchError::StanzaMissing("network.service".to_string()))?;

    let child_indent = match service.body().find(|i| !lines[*i].trim().is_empty()) {
        Some(i) => indent_of(&lines[i]).to_string(),
        None => format!("{}    ", indent_of(&lines[service.start])),
    };

    let mut missing = Vec::new();
    for (key, value) in ACCESS_KEYS.into_iter().zip([access, alternate]) {
        match service
            .body()
            .find(|i| lines[*i].split_whitespace().next() == Some(key))
        {
            Some(i) => lines[i] = format!("{}{} {}", indent_of(&lines[i]), key, value),
            None => missing.push(format!("{}{} {}", child_indent, key, value)),
        }
    }

    let at = service.start + 1;
    lines.splice(at..at, missing);
    Ok(join_lines(&lines, trailing))
}

/// Point every private access address at `ip`, leaving loopback and public ones alone
pub fn replace_private_access_addresses(text: &str, ip: &str) -> Result<String, PatchError> {
    let mut lines = split_lines(text);
    let service = find_stanza(&lines, None, |w| w == ["network"])
        .and_then(|net| find_stanza(&lines, Some(net), |w| w == ["service"]))
        .ok_or_else(|| PatchError::StanzaMissing("network.service".to_string()))?;

    for i in service.body() {
        let mut words = lines[i].split_whitespace();
        let (Some(key), Some(value)) = (words.next(), words.next()) else {
            continue;
        };
        if !ACCESS_KEYS.contains(&key) {
            continue;
        }
        let private = match value.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => v4.is_private(),
            _ => false,
        };
        if private {
            lines[i] = format!("{}{} {}", indent_of(&lines[i]), key, ip);
        }
    }
    Ok(join_lines(&lines, text.ends_with('\n')))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONF: &str = "network {\n    service {\n        address any\n        port 3000\n        access-address 10.0.0.4\n    }\n}\n";

    #[test]
    fn test_set_access_addresses() {
        let out = set_access_addresses(CONF, "10.0.0.9", "34.1.2.3").unwrap();
        assert_eq!(
            out,
            "network {\n    service {\n        alternate-access-address 34.1.2.3\n        address any\n        port 3000\n        access-address 10.0.0.9\n    }\n}\n"
        );
        assert_eq!(set_access_addresses(&out, "10.0.0.9", "34.1.2.3").unwrap(), out);
    }

    #[test]
    fn test_missing_service_stanza() {
        let err = set_access_addresses("service {\n}\n", "a", "b").unwrap_err();
        assert_eq!(err, PatchError::StanzaMissing("network.service".to_string()));
    }

    #[test]
    fn test_replace_private_only() {
        let conf = "network {\n    service {\n        access-address 192.168.1.5\n        alternate-access-address 34.1.2.3\n        access-address 127.0.0.1\n    }\n}\n";
        let out = replace_private_access_addresses(conf, "172.17.0.4").unwrap();
        assert!(out.contains("access-address 172.17.0.4\n"));
        assert!(out.contains("alternate-access-address 34.1.2.3\n"));
        assert!(out.contains("access-address 127.0.0.1\n"));
    }
}
