//! Danger Detector (spec §4.I): heuristics that assess an
//! [`Operation`]'s risk, combined by taking the maximum.
//!
//! The parameter-`command` heuristic reuses the teacher's exact
//! `RegexSet`-over-`LazyLock` pattern (`moltis-tools::approval`'s
//! `DANGEROUS_SET`/`check_dangerous`), generalized from "exec command
//! string" to "any confirmation operation's parameters".

use std::{net::IpAddr, path::Path, str::FromStr, sync::LazyLock};

use ipnet::IpNet;
use regex::RegexSet;

use crate::types::{ConfirmationRequest, OperationType, Risk};

const SYSTEM_PATH_PREFIXES: &[&str] = &["/etc", "/sys", "/proc", "/boot", "/dev"];

/// Dangerous command patterns, each `(regex, description)` — a superset of
/// the teacher's exec-tool-specific list extended with the spec §4.I
/// enumeration (fork bomb, `sudo ` with a space, publish commands, ...).
static DANGEROUS_PATTERN_DEFS: &[(&str, &str)] = &[
    (r"rm\s+(-\S*[rR]\S*\s+)*/(\s|$|\*)", "rm -r on filesystem root"),
    (r"\bmkfs\b", "make filesystem"),
    (r"\bdd\s+if=", "disk overwrite with dd"),
    (r":\(\)\s*\{.*\|.*&\s*\}\s*;", "fork bomb"),
    (r"git\s+push\s+.*(-\S*f\S*|--force\b|--force-with-lease\b)", "git force push"),
    (r"\bsudo\s", "sudo with elevated privileges"),
    (r"(?i)\bDROP\s+TABLE\b", "DROP TABLE"),
    (r"(?i)\bTRUNCATE\b", "TRUNCATE"),
    (r"\bnpm\s+publish\b", "npm publish"),
    (r"\btwine\s+upload\b", "twine upload"),
];

static DANGEROUS_SET: LazyLock<RegexSet> =
    LazyLock::new(|| RegexSet::new(DANGEROUS_PATTERN_DEFS.iter().map(|(p, _)| *p)).unwrap_or_else(|e| panic!("built-in dangerous patterns must be valid regex: {e}")));

/// Check the `command` parameter, if present, against the dangerous-pattern
/// set. Returns every matching description (spec: "combine").
fn check_dangerous_command(command: &str) -> Vec<&'static str> {
    DANGEROUS_SET.matches(command).iter().map(|i| DANGEROUS_PATTERN_DEFS[i].1).collect()
}

fn is_system_path(target: &str) -> bool {
    SYSTEM_PATH_PREFIXES.iter().any(|prefix| Path::new(target).starts_with(prefix))
}

/// Whether `host` resolves to a private/loopback/link-local address (RFC
/// 1918, RFC 3927, loopback). Non-IP hostnames are treated as non-private
/// (the conservative choice for the network-risk heuristic).
fn is_private_host(host: &str) -> bool {
    let Ok(ip) = IpAddr::from_str(host) else {
        return false;
    };
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_link_local()
                || IpNet::from_str("10.0.0.0/8").is_ok_and(|n| n.contains(&ip))
                || IpNet::from_str("172.16.0.0/12").is_ok_and(|n| n.contains(&ip))
                || IpNet::from_str("192.168.0.0/16").is_ok_and(|n| n.contains(&ip))
        },
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Risk assessment result (spec §4.I).
#[derive(Debug, Clone)]
pub struct Assessment {
    pub risk: Risk,
    pub reversible: bool,
    pub dangers: Vec<String>,
}

/// Assess `request`'s danger level by combining every heuristic and
/// taking the maximum risk.
#[must_use]
pub fn assess(request: &ConfirmationRequest) -> Assessment {
    let mut risk = Risk::None;
    let mut reversible = true;
    let mut dangers = Vec::new();

    if request.operation.op_type == OperationType::Delete {
        risk = risk.max(Risk::High);
        reversible = false;
        dangers.push("delete operation".to_string());
    }

    if is_system_path(&request.operation.target) {
        risk = Risk::Critical;
        reversible = false;
        dangers.push(format!("target under system path: {}", request.operation.target));
    }

    if let Some(command) = request.parameters.get("command").and_then(|v| v.as_str()) {
        let matches = check_dangerous_command(command);
        if !matches.is_empty() {
            risk = risk.max(Risk::High);
            dangers.extend(matches.iter().map(|d| (*d).to_string()));
        }
    }

    if request.operation.op_type == OperationType::Network && !is_private_host(&request.operation.target) {
        risk = risk.max(Risk::Medium);
        dangers.push(format!("network access to non-private host: {}", request.operation.target));
    }

    Assessment { risk, reversible, dangers }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use super::*;
    use crate::types::{ExecutionContext, Operation};

    fn request(op_type: OperationType, target: &str, command: Option<&str>) -> ConfirmationRequest {
        let mut parameters = HashMap::new();
        if let Some(cmd) = command {
            parameters.insert("command".to_string(), serde_json::json!(cmd));
        }
        ConfirmationRequest {
            tool_name: "exec".to_string(),
            operation: Operation {
                op_type,
                description: "test op".to_string(),
                target: target.to_string(),
                risk: Risk::None,
                reversible: true,
                preview: None,
            },
            parameters,
            context: ExecutionContext {
                user: "u".to_string(),
                session_id: "s".to_string(),
                conversation_id: "c".to_string(),
                timestamp: Utc::now(),
                is_ci: false,
            },
            batch_mode: false,
        }
    }

    #[test]
    fn delete_floors_at_high_and_irreversible() {
        let assessment = assess(&request(OperationType::Delete, "/tmp/file", None));
        assert_eq!(assessment.risk, Risk::High);
        assert!(!assessment.reversible);
    }

    #[test]
    fn system_path_is_critical_and_irreversible() {
        let assessment = assess(&request(OperationType::Write, "/etc/passwd", None));
        assert_eq!(assessment.risk, Risk::Critical);
        assert!(!assessment.reversible);
    }

    #[test]
    fn dangerous_command_raises_risk() {
        let assessment = assess(&request(OperationType::Execute, "n/a", Some("rm -rf /")));
        assert_eq!(assessment.risk, Risk::High);
        assert!(assessment.dangers.iter().any(|d| d.contains("rm -r")));
    }

    #[test]
    fn fork_bomb_detected() {
        let assessment = assess(&request(OperationType::Execute, "n/a", Some(":(){ :|:& };:")));
        assert_eq!(assessment.risk, Risk::High);
    }

    #[test]
    fn network_to_public_host_is_medium() {
        let assessment = assess(&request(OperationType::Network, "8.8.8.8", None));
        assert_eq!(assessment.risk, Risk::Medium);
    }

    #[test]
    fn network_to_private_host_is_not_flagged() {
        let assessment = assess(&request(OperationType::Network, "192.168.1.1", None));
        assert_eq!(assessment.risk, Risk::None);
    }

    #[test]
    fn combine_takes_maximum_risk() {
        let assessment = assess(&request(OperationType::Delete, "/etc/shadow", Some("sudo rm -rf /")));
        assert_eq!(assessment.risk, Risk::Critical);
        assert!(assessment.dangers.len() >= 2);
    }

    #[test]
    fn benign_operation_is_no_risk() {
        let assessment = assess(&request(OperationType::Read, "/home/user/notes.txt", None));
        assert_eq!(assessment.risk, Risk::None);
        assert!(assessment.reversible);
    }
}
