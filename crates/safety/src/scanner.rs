//! Safety scanner.

use crate::catalogue::{self, Detector};
use crate::quarantine::QuarantineSet;
use crate::runtime::{RuntimeCeilings, RuntimeObservation};
use crate::Result;
use evoguard_core::{
    Genome, GenomeId, QuarantineRecord, SafetyViolation, Severity, ThreatCategory,
};
use evoguard_storage::QuarantineStore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const SNIPPET_MAX_CHARS: usize = 120;

/// Scanner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Top-level modules a genome may import
    pub allowed_dependencies: Vec<String>,
    /// Deepest bracket or indentation nesting allowed
    pub max_nesting_depth: usize,
    /// Most elements allowed in one literal list
    pub max_literal_elements: usize,
    /// Runtime behaviour ceilings
    pub runtime: RuntimeCeilings,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            allowed_dependencies: [
                "std", "core", "alloc", "crate", "self", "super", "math", "random",
                "itertools", "functools", "collections", "typing", "dataclasses",
                "numpy", "torch", "serde", "rand",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_nesting_depth: 8,
            max_literal_elements: 1000,
            runtime: RuntimeCeilings::default(),
        }
    }
}

/// Heuristic safety scanner with a violation log and quarantine set.
pub struct SafetyScanner {
    config: ScannerConfig,
    detectors: Vec<Detector>,
    aggravators: Vec<Regex>,
    import_pattern: Regex,
    literal_pattern: Regex,
    quarantine: QuarantineSet,
    log: RwLock<Vec<SafetyViolation>>,
}

impl SafetyScanner {
    /// Create a scanner with an in-memory quarantine set.
    pub fn new(config: ScannerConfig) -> Result<Self> {
        Ok(Self {
            config,
            detectors: catalogue::detectors()?,
            aggravators: catalogue::aggravators()?,
            import_pattern: Regex::new(
                r"(?m)^\s*(?:from\s+([A-Za-z_][\w.]*)\s+import\b|import\s+([A-Za-z_][\w.]*(?:\s*,\s*[A-Za-z_][\w.]*)*)|use\s+([A-Za-z_]\w*)|extern\s+crate\s+([A-Za-z_]\w*))",
            )?,
            literal_pattern: Regex::new(r"\[([^\[\]]*)\]")?,
            quarantine: QuarantineSet::new(),
            log: RwLock::new(Vec::new()),
        })
    }

    /// Persist quarantine membership through `store`.
    pub fn with_store(mut self, store: Arc<dyn QuarantineStore>) -> Self {
        self.quarantine = QuarantineSet::with_store(store);
        self
    }

    /// Scanner configuration.
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Scan a genome's representation.
    ///
    /// Pure: the result depends only on the genome, so repeated scans
    /// return the same findings (timestamps aside). Findings are not
    /// logged; see [`SafetyScanner::record`].
    pub fn scan(&self, genome: &Genome) -> Vec<SafetyViolation> {
        let text = genome.representation();
        let mut findings = self.scan_threats(genome.id, &text);
        findings.extend(self.scan_dependencies(genome));
        findings.extend(self.scan_structure(genome.id, &text));

        if !findings.is_empty() {
            debug!(genome = %genome.id, "Scan found {} issues", findings.len());
        }
        findings
    }

    fn scan_threats(&self, genome_id: GenomeId, text: &str) -> Vec<SafetyViolation> {
        let aggravated = self.aggravators.iter().any(|re| re.is_match(text));
        let mut findings = Vec::new();

        for detector in &self.detectors {
            let Some(m) = detector.pattern.find(text) else {
                continue;
            };
            let mut severity = detector.category.base_severity();
            if aggravated
                && matches!(
                    detector.category,
                    ThreatCategory::UnboundedLoop | ThreatCategory::ResourceExhaustion
                )
            {
                severity = Severity::High;
            }
            findings.push(violation(
                genome_id,
                detector.category,
                severity,
                detector.description.to_string(),
                Some(line_of(text, m.start())),
            ));
        }
        findings
    }

    fn scan_dependencies(&self, genome: &Genome) -> Vec<SafetyViolation> {
        let mut deps: Vec<String> = Vec::new();

        if let Some(source) = &genome.source {
            for caps in self.import_pattern.captures_iter(source) {
                let names = (1..=4)
                    .filter_map(|i| caps.get(i))
                    .flat_map(|m| m.as_str().split(','))
                    .map(|s| s.trim().to_string());
                deps.extend(names);
            }
        }
        match genome.metadata.get("dependencies") {
            Some(serde_json::Value::Array(items)) => {
                deps.extend(items.iter().filter_map(|v| v.as_str()).map(str::to_string));
            }
            Some(serde_json::Value::String(list)) => {
                deps.extend(list.split(',').map(|s| s.trim().to_string()));
            }
            _ => {}
        }

        let mut seen = HashSet::new();
        deps.iter()
            .map(|dep| root_module(dep))
            .filter(|root| !root.is_empty())
            .filter(|root| !self.config.allowed_dependencies.iter().any(|a| a == root))
            .filter(|root| seen.insert(root.to_string()))
            .map(|root| {
                violation(
                    genome.id,
                    ThreatCategory::UnapprovedDependency,
                    ThreatCategory::UnapprovedDependency.base_severity(),
                    format!("dependency '{}' is not on the allow-list", root),
                    Some(root.to_string()),
                )
            })
            .collect()
    }

    fn scan_structure(&self, genome_id: GenomeId, text: &str) -> Vec<SafetyViolation> {
        let mut findings = Vec::new();

        let depth = nesting_depth(text);
        if depth > self.config.max_nesting_depth {
            findings.push(violation(
                genome_id,
                ThreatCategory::StructuralComplexity,
                ThreatCategory::StructuralComplexity.base_severity(),
                format!(
                    "nesting depth {} exceeds limit {}",
                    depth, self.config.max_nesting_depth
                ),
                None,
            ));
        }

        let largest = self
            .literal_pattern
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().split(',').filter(|s| !s.trim().is_empty()).count())
            .max()
            .unwrap_or(0);
        if largest > self.config.max_literal_elements {
            findings.push(violation(
                genome_id,
                ThreatCategory::StructuralComplexity,
                ThreatCategory::StructuralComplexity.base_severity(),
                format!(
                    "literal with {} elements exceeds limit {}",
                    largest, self.config.max_literal_elements
                ),
                None,
            ));
        }

        findings
    }

    /// Compare observed runtime behaviour with the configured ceilings.
    ///
    /// Exceeding a ceiling is medium, exceeding twice the ceiling is high.
    /// Any connection above the allowed count is treated as exfiltration.
    pub fn check_runtime_behavior(&self, observation: &RuntimeObservation) -> Vec<SafetyViolation> {
        let ceilings = &self.config.runtime;
        let mut findings = Vec::new();

        let measures = [
            ("memory", observation.memory_kb, ceilings.max_memory_kb, "KB"),
            ("cpu", observation.cpu_percent, ceilings.max_cpu_percent, "%"),
            ("execution time", observation.execution_ms, ceilings.max_execution_ms, "ms"),
        ];
        for (name, value, ceiling, unit) in measures {
            if value > ceiling {
                let severity = if value > 2.0 * ceiling {
                    Severity::High
                } else {
                    Severity::Medium
                };
                findings.push(violation(
                    observation.genome_id,
                    ThreatCategory::RuntimeAnomaly,
                    severity,
                    format!("{} {:.1}{} exceeds ceiling {:.1}{}", name, value, unit, ceiling, unit),
                    None,
                ));
            }
        }

        if observation.open_connections > ceilings.max_connections {
            findings.push(violation(
                observation.genome_id,
                ThreatCategory::Exfiltration,
                ThreatCategory::Exfiltration.base_severity(),
                format!(
                    "{} open network connections (allowed {})",
                    observation.open_connections, ceilings.max_connections
                ),
                None,
            ));
        }

        findings
    }

    /// Append findings to the violation log.
    pub async fn record(&self, violations: &[SafetyViolation]) {
        if violations.is_empty() {
            return;
        }
        for v in violations.iter().filter(|v| v.severity.is_blocking()) {
            warn!(
                genome = %v.genome_id,
                "{} finding ({}): {}",
                v.severity.as_str(),
                v.category.as_str(),
                v.description
            );
        }
        self.log.write().await.extend_from_slice(violations);
    }

    /// Copy of the violation log.
    pub async fn violations(&self) -> Vec<SafetyViolation> {
        self.log.read().await.clone()
    }

    /// Safety score over the whole violation log.
    pub async fn safety_score(&self) -> f64 {
        Self::score_violations(&self.log.read().await)
    }

    /// `1 - sum(weights) / count`, or 1.0 when there are no findings.
    pub fn score_violations(violations: &[SafetyViolation]) -> f64 {
        if violations.is_empty() {
            return 1.0;
        }
        let total: f64 = violations.iter().map(|v| v.severity.weight()).sum();
        (1.0 - total / violations.len() as f64).clamp(0.0, 1.0)
    }

    /// Load persisted quarantine membership.
    pub async fn load_quarantine(&self) -> Result<usize> {
        self.quarantine.load().await
    }

    /// Quarantine a genome with the findings that caused it.
    pub async fn quarantine(
        &self,
        genome: &Genome,
        violations: Vec<SafetyViolation>,
    ) -> Result<QuarantineRecord> {
        let record = QuarantineRecord {
            genome_id: genome.id,
            code_hash: code_hash(genome),
            violations,
            timestamp: chrono::Utc::now(),
        };
        self.quarantine.insert(record.clone()).await?;
        Ok(record)
    }

    /// Release a genome. Returns whether it was quarantined.
    pub async fn release(&self, id: GenomeId) -> Result<bool> {
        self.quarantine.remove(id).await
    }

    /// Whether a genome is quarantined.
    pub async fn is_quarantined(&self, id: GenomeId) -> bool {
        self.quarantine.contains(id).await
    }

    /// Quarantined genome ids.
    pub async fn quarantined(&self) -> Vec<GenomeId> {
        self.quarantine.ids().await
    }

    /// Quarantine records.
    pub async fn quarantine_records(&self) -> Vec<QuarantineRecord> {
        self.quarantine.records().await
    }
}

/// SHA-256 of the genome representation, hex encoded.
pub fn code_hash(genome: &Genome) -> String {
    format!("{:x}", Sha256::digest(genome.representation().as_bytes()))
}

fn violation(
    genome_id: GenomeId,
    category: ThreatCategory,
    severity: Severity,
    description: String,
    snippet: Option<String>,
) -> SafetyViolation {
    SafetyViolation {
        timestamp: chrono::Utc::now(),
        category,
        severity,
        description,
        genome_id,
        snippet,
        mitigation: catalogue::mitigation(category).to_string(),
    }
}

fn line_of(text: &str, offset: usize) -> String {
    let start = text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = text[offset..].find('\n').map(|i| offset + i).unwrap_or(text.len());
    text[start..end].trim().chars().take(SNIPPET_MAX_CHARS).collect()
}

fn root_module(dep: &str) -> &str {
    dep.split(['.', ':']).next().unwrap_or("").trim()
}

/// Deepest nesting of brackets or four-space indentation.
fn nesting_depth(text: &str) -> usize {
    let mut depth = 0usize;
    let mut max_bracket = 0usize;
    for c in text.chars() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                max_bracket = max_bracket.max(depth);
            }
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    let max_indent = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            let spaces = l.chars().take_while(|c| *c == ' ').count();
            let tabs = l.chars().take_while(|c| *c == '\t').count();
            spaces / 4 + tabs
        })
        .max()
        .unwrap_or(0);

    max_bracket.max(max_indent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoguard_core::GeneSchema;
    use evoguard_storage::JsonStorage;

    fn scanner() -> SafetyScanner {
        SafetyScanner::new(ScannerConfig::default()).unwrap()
    }

    fn genome_with(source: &str) -> Genome {
        Genome::new(GeneSchema::default().default_genes()).with_source(source)
    }

    #[test]
    fn test_default_genome_is_clean() {
        let genome = Genome::new(GeneSchema::default().default_genes());
        assert!(scanner().scan(&genome).is_empty());
    }

    #[test]
    fn test_injection_is_critical() {
        let genome = genome_with("result = eval(user_input)\n");
        let findings = scanner().scan(&genome);
        let injection = findings
            .iter()
            .find(|v| v.category == ThreatCategory::Injection)
            .unwrap();
        assert_eq!(injection.severity, Severity::Critical);
        assert_eq!(injection.genome_id, genome.id);
        assert_eq!(injection.snippet.as_deref(), Some("result = eval(user_input)"));
    }

    #[test]
    fn test_scan_is_idempotent() {
        let scanner = scanner();
        let genome = genome_with(
            "import socket\nwhile True:\n    buf.append(socket.socket())\nos.system('ls')\n",
        );
        let first = scanner.scan(&genome);
        let second = scanner.scan(&genome);
        assert!(!first.is_empty());
        assert_eq!(first.len(), second.len());
        assert!(first.iter().zip(&second).all(|(a, b)| a.same_finding(b)));
    }

    #[test]
    fn test_loop_escalated_by_allocation() {
        let scanner = scanner();

        let plain = scanner.scan(&genome_with("while True:\n    pass\n"));
        let plain_loop = plain
            .iter()
            .find(|v| v.category == ThreatCategory::UnboundedLoop)
            .unwrap();
        assert_eq!(plain_loop.severity, Severity::Medium);

        let growing = scanner.scan(&genome_with("while True:\n    data.append(1)\n"));
        let growing_loop = growing
            .iter()
            .find(|v| v.category == ThreatCategory::UnboundedLoop)
            .unwrap();
        assert_eq!(growing_loop.severity, Severity::High);
    }

    #[test]
    fn test_unapproved_dependencies() {
        let genome = genome_with("import os\nimport numpy as np\nfrom requests import get\n")
            .with_metadata("dependencies", serde_json::json!(["leftpad", "numpy"]));
        let deps: Vec<_> = scanner()
            .scan(&genome)
            .into_iter()
            .filter(|v| v.category == ThreatCategory::UnapprovedDependency)
            .map(|v| v.snippet.unwrap())
            .collect();
        assert_eq!(deps, vec!["os", "requests", "leftpad"]);
    }

    #[test]
    fn test_structural_limits() {
        let scanner = scanner();

        let deep = format!("x = {}1{}\n", "[".repeat(10), "]".repeat(10));
        let findings = scanner.scan(&genome_with(&deep));
        assert!(findings
            .iter()
            .any(|v| v.category == ThreatCategory::StructuralComplexity
                && v.description.starts_with("nesting depth 10")));

        let items: Vec<String> = (0..1001).map(|i| i.to_string()).collect();
        let wide = format!("table = [{}]\n", items.join(", "));
        let findings = scanner.scan(&genome_with(&wide));
        assert!(findings
            .iter()
            .any(|v| v.description.starts_with("literal with 1001 elements")));
    }

    #[test]
    fn test_runtime_behavior() {
        let scanner = scanner();
        let id = GenomeId::new();
        let observation = RuntimeObservation {
            genome_id: id,
            memory_kb: 600.0,
            cpu_percent: 10.0,
            open_connections: 0,
            execution_ms: 20_000.0,
        };
        let findings = scanner.check_runtime_behavior(&observation);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert_eq!(findings[1].severity, Severity::High);

        let connected = RuntimeObservation {
            open_connections: 1,
            memory_kb: 1.0,
            execution_ms: 1.0,
            ..observation
        };
        let findings = scanner.check_runtime_behavior(&connected);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, ThreatCategory::Exfiltration);
    }

    #[tokio::test]
    async fn test_safety_score() {
        let scanner = scanner();
        assert_eq!(scanner.safety_score().await, 1.0);

        let findings = scanner.scan(&genome_with("eval(x)\nimport leftpad\n"));
        assert_eq!(findings.len(), 2);
        scanner.record(&findings).await;

        // (1.0 + 0.2) / 2
        assert!((scanner.safety_score().await - 0.4).abs() < 1e-9);
        assert_eq!(scanner.violations().await.len(), 2);
    }

    #[tokio::test]
    async fn test_quarantine_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn QuarantineStore> = Arc::new(JsonStorage::new(dir.path()).await.unwrap());

        let genome = genome_with("exec(payload)\n");
        let scanner = scanner().with_store(store.clone());
        let record = scanner.quarantine(&genome, scanner.scan(&genome)).await.unwrap();
        assert_eq!(record.code_hash.len(), 64);
        assert!(scanner.is_quarantined(genome.id).await);

        let reloaded = SafetyScanner::new(ScannerConfig::default())
            .unwrap()
            .with_store(store);
        assert_eq!(reloaded.load_quarantine().await.unwrap(), 1);
        assert_eq!(reloaded.quarantined().await, vec![genome.id]);

        assert!(reloaded.release(genome.id).await.unwrap());
        assert!(!reloaded.is_quarantined(genome.id).await);
        assert!(!reloaded.release(genome.id).await.unwrap());
    }
}
