//! Threat catalogue: one family of regex detectors per category.

use evoguard_core::ThreatCategory;
use regex::Regex;

/// A compiled detector.
pub(crate) struct Detector {
    pub category: ThreatCategory,
    pub pattern: Regex,
    pub description: &'static str,
}

struct Entry {
    category: ThreatCategory,
    pattern: &'static str,
    description: &'static str,
}

const fn entry(category: ThreatCategory, pattern: &'static str, description: &'static str) -> Entry {
    Entry {
        category,
        pattern,
        description,
    }
}

const CATALOGUE: &[Entry] = &[
    // Unbounded loops
    entry(
        ThreatCategory::UnboundedLoop,
        r"\bwhile\s*\(?\s*(?:true|True|1)\s*\)?\s*[:{]",
        "loop with a constant-true condition",
    ),
    entry(ThreatCategory::UnboundedLoop, r"\bloop\s*\{", "unconditional loop block"),
    entry(ThreatCategory::UnboundedLoop, r"\bfor\s*\(\s*;\s*;\s*\)", "for loop without a condition"),
    entry(
        ThreatCategory::UnboundedLoop,
        r"\bitertools\.count\s*\(|\bitertools\.cycle\s*\(",
        "iteration over an infinite iterator",
    ),
    // Resource exhaustion
    entry(
        ThreatCategory::ResourceExhaustion,
        r"\brange\s*\(\s*\d{8,}\s*\)",
        "iteration count in the tens of millions",
    ),
    entry(
        ThreatCategory::ResourceExhaustion,
        r"\[[^\]]*\]\s*\*\s*\d{7,}",
        "list multiplied to millions of elements",
    ),
    entry(
        ThreatCategory::ResourceExhaustion,
        r"\bwith_capacity\s*\(\s*\d{8,}\s*\)",
        "very large preallocation",
    ),
    entry(
        ThreatCategory::ResourceExhaustion,
        r"/dev/(?:zero|urandom)",
        "read from an endless device",
    ),
    entry(ThreatCategory::ResourceExhaustion, r":\(\)\s*\{\s*:\|:", "shell fork bomb"),
    // Exfiltration
    entry(
        ThreatCategory::Exfiltration,
        r"\brequests\.(?:get|post|put)\s*\(|\burllib\.request\b|\bhttp\.client\b",
        "outbound HTTP request",
    ),
    entry(
        ThreatCategory::Exfiltration,
        r"\bsocket\.(?:socket|create_connection)\s*\(|\bTcpStream::connect\b",
        "raw network socket",
    ),
    entry(ThreatCategory::Exfiltration, r"\b(?:curl|wget)\s+\S", "download or upload tool"),
    entry(ThreatCategory::Exfiltration, r"\b(?:smtplib|ftplib|paramiko)\b", "mail or file transfer client"),
    // Replication
    entry(ThreatCategory::Replication, r"\bos\.fork\s*\(|\bfork\s*\(\s*\)", "process fork"),
    entry(
        ThreatCategory::Replication,
        r"\bsubprocess\.(?:Popen|run|call|check_output)\s*\(|\bCommand::new\s*\(",
        "child process spawn",
    ),
    entry(ThreatCategory::Replication, r"\bmultiprocessing\.Process\b", "worker process spawn"),
    entry(
        ThreatCategory::Replication,
        r"open\s*\(\s*__file__|shutil\.copy\w*\s*\(\s*__file__",
        "code reading or copying itself",
    ),
    // Privilege escalation
    entry(ThreatCategory::PrivilegeEscalation, r"\bsudo\s+", "sudo invocation"),
    entry(
        ThreatCategory::PrivilegeEscalation,
        r"\b(?:os\.)?set(?:e?uid|e?gid)\s*\(",
        "user or group id change",
    ),
    entry(
        ThreatCategory::PrivilegeEscalation,
        r"\bchmod\s+(?:-R\s+)?0?777\b|\bchown\s+root\b",
        "permission widening",
    ),
    entry(
        ThreatCategory::PrivilegeEscalation,
        r"/etc/(?:shadow|sudoers|passwd)\b",
        "access to system credential files",
    ),
    // Injection
    entry(ThreatCategory::Injection, r"\beval\s*\(", "dynamic evaluation"),
    entry(ThreatCategory::Injection, r"\bexec\s*\(", "dynamic execution"),
    entry(ThreatCategory::Injection, r"\b__import__\s*\(", "dynamic import"),
    entry(ThreatCategory::Injection, r"\bos\.(?:system|popen)\s*\(", "shell command execution"),
    entry(ThreatCategory::Injection, r"\bshell\s*=\s*True\b", "subprocess run through a shell"),
    entry(ThreatCategory::Injection, r"\brm\s+-rf\b", "recursive forced delete"),
    entry(ThreatCategory::Injection, r"(?i)\bdrop\s+table\b", "SQL table drop"),
];

/// Sub-patterns that escalate loop and exhaustion findings to high.
const AGGRAVATORS: &[&str] = &[
    r"\.(?:push|append|extend|insert)\s*\(",
    r"\b(?:malloc|calloc|alloc|with_capacity)\s*\(",
    r"\b\d{9,}\b",
];

/// Compile the catalogue in declaration order.
pub(crate) fn detectors() -> Result<Vec<Detector>, regex::Error> {
    CATALOGUE
        .iter()
        .map(|e| {
            Ok(Detector {
                category: e.category,
                pattern: Regex::new(e.pattern)?,
                description: e.description,
            })
        })
        .collect()
}

/// Compile the aggravating sub-patterns.
pub(crate) fn aggravators() -> Result<Vec<Regex>, regex::Error> {
    AGGRAVATORS.iter().map(|p| Regex::new(p)).collect()
}

/// Suggested mitigation for a category.
pub(crate) fn mitigation(category: ThreatCategory) -> &'static str {
    match category {
        ThreatCategory::UnboundedLoop => "add an explicit iteration bound or timeout",
        ThreatCategory::ResourceExhaustion => "reduce allocation sizes and bound iteration counts",
        ThreatCategory::Exfiltration => "remove network access; genomes run offline",
        ThreatCategory::PrivilegeEscalation => "remove privileged operations",
        ThreatCategory::Injection => "replace dynamic evaluation with static code",
        ThreatCategory::Replication => "remove process spawning and self-reference",
        ThreatCategory::UnapprovedDependency => "use an allow-listed dependency or request approval",
        ThreatCategory::StructuralComplexity => "flatten nesting and move large literals to data files",
        ThreatCategory::RuntimeAnomaly => "reduce resource usage below the configured ceilings",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_compiles() {
        let detectors = detectors().unwrap();
        assert_eq!(detectors.len(), CATALOGUE.len());
        assert_eq!(aggravators().unwrap().len(), AGGRAVATORS.len());
    }

    #[test]
    fn test_every_category_has_detectors() {
        let detectors = detectors().unwrap();
        for category in [
            ThreatCategory::UnboundedLoop,
            ThreatCategory::ResourceExhaustion,
            ThreatCategory::Exfiltration,
            ThreatCategory::Replication,
            ThreatCategory::PrivilegeEscalation,
            ThreatCategory::Injection,
        ] {
            assert!(detectors.iter().any(|d| d.category == category), "{:?}", category);
        }
    }

    #[test]
    fn test_exec_does_not_match_execv() {
        let detectors = detectors().unwrap();
        let exec = detectors
            .iter()
            .find(|d| d.description == "dynamic execution")
            .unwrap();
        assert!(exec.pattern.is_match("exec(code)"));
        assert!(!exec.pattern.is_match("os.execv(path, args)"));
    }
}
