//! Line-coverage aggregation and report emission.
//!
//! Walks every artifact's kept source-map records, projects the visitation
//! flags onto the owning files' line maps and derives a per-line tri-state:
//! covered (any offset hit), uncovered (no hit, at least one attributable
//! offset) or not-instrumented (excluded from totals entirely). Emits the
//! LCOV text format and a parallel JSON document.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde_json::{Value, json};
use solcov_solidity::Registry;

/// The finished reports.
#[derive(Clone, Debug)]
pub struct CoverageReport {
    /// `{"coverage": {<file path>: {<line>: 0|1}}}`.
    pub json: Value,
    /// LCOV tracefile text.
    pub lcov: String,
}

/// Projects every kept source-map record onto the line map of the file it
/// spans. A visited record marks its byte range hit, an unvisited one marks
/// it miss; bytes never touched by any record stay unmarked and their lines
/// are not instrumented.
fn project_hits(registry: &mut Registry) {
    let mut spans = Vec::new();
    for artifact in registry.artifacts() {
        for entry in artifact.source_map.iter().flatten() {
            spans.push((
                entry.file_id,
                entry.start as usize,
                (entry.start + entry.length) as usize,
                entry.visited,
            ));
        }
    }

    for (file_id, start, end, visited) in spans {
        let Some(index) = registry.artifact_index_by_file_id(file_id) else {
            continue;
        };
        let line_map = &mut registry.artifacts_mut()[index].line_map;

        for offset in start..end.min(line_map.len()) {
            if visited {
                line_map[offset].hit = true;
            } else {
                line_map[offset].miss = true;
            }
        }
    }
}

/// Computes the coverage reports over all artifacts not matching `ignore`.
/// Idempotent: visitation flags are monotonic, so recomputing after more
/// traces arrived only turns lines from uncovered to covered.
pub fn compute(registry: &mut Registry, ignore: Option<&Regex>) -> CoverageReport {
    project_hits(registry);

    let mut coverage = serde_json::Map::new();
    let mut lcov = String::new();

    for artifact in registry.artifacts() {
        let path = &artifact.file_path;

        if let Some(pattern) = ignore
            && pattern.is_match(path)
        {
            tracing::info!("ignoring {path}");
            continue;
        }

        // Covered wins over uncovered regardless of the order offsets are
        // visited in; a line without any attributable offset never appears.
        let mut covered = BTreeSet::new();
        let mut missed = BTreeSet::new();
        for entry in &artifact.line_map {
            if entry.hit {
                covered.insert(entry.line);
            } else if entry.miss {
                missed.insert(entry.line);
            }
        }
        missed.retain(|line| !covered.contains(line));

        let mut lines: BTreeMap<u32, u64> = BTreeMap::new();
        lines.extend(covered.iter().map(|line| (*line, 1)));
        lines.extend(missed.iter().map(|line| (*line, 0)));

        lcov.push_str(&format!("SF:{path}\n"));
        for (line, state) in &lines {
            lcov.push_str(&format!("DA:{line},{state}\n"));
        }
        lcov.push_str(&format!(
            "LH:{}\nLF:{}\nend_of_record\n",
            covered.len(),
            covered.len() + missed.len()
        ));

        let file_lines: serde_json::Map<String, Value> = lines
            .iter()
            .map(|(line, state)| (line.to_string(), json!(state)))
            .collect();
        coverage.insert(path.clone(), Value::Object(file_lines));

        let total = artifact.number_of_lines;
        let miss = missed.len() as u32;
        let percentage = if total == 0 {
            100.0
        } else {
            f64::from(total - miss.min(total)) / f64::from(total) * 100.0
        };
        tracing::info!(
            contract = %artifact.name,
            hits = covered.len(),
            miss = missed.len(),
            total_lines = total,
            "coverage: {percentage:.1}%"
        );
    }

    CoverageReport {
        json: json!({ "coverage": coverage }),
        lcov,
    }
}
