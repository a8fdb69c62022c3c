//! The artifact registry: loads every artifact file from a directory, owns
//! the resolved [`Artifact`]s and matches on-chain deployed bytecode back to
//! them.

use std::{collections::HashMap, fs, io, path::Path};

use crate::{
    artifacts::{self, CombinedOutput, ContractArtifact},
    build_model::{Artifact, make_line_map},
    log_once::DedupLog,
    source_map::{SourceMapError, decode_source_map},
};

/// Default acceptance threshold for the fuzzy bytecode match.
pub const DEFAULT_FUZZY_MATCH_FACTOR: f64 = 0.7;

/// A bad artifact file. Only the directory-level variant is fatal to a load;
/// per-file errors are logged and the file skipped.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// A file or the artifact directory could not be read.
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    /// An artifact file is not valid JSON of a known shape.
    #[error("failed to parse `{path}`: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// An artifact file lacks a field the registry cannot do without.
    #[error("`{path}` is missing required field `{field}`")]
    MissingField { path: String, field: &'static str },
    /// The deployed bytecode is not valid hex.
    #[error("invalid deployed bytecode in `{path}`: {source}")]
    InvalidBytecode {
        path: String,
        #[source]
        source: hex::FromHexError,
    },
    /// The compact source map could not be decoded.
    #[error("invalid source map in `{path}`: {source}")]
    SourceMap {
        path: String,
        #[source]
        source: SourceMapError,
    },
}

/// An artifact read from disk, before its source map has been decoded.
/// Decoding needs every source file to be known first for cross-file spans.
struct PendingArtifact {
    name: String,
    deployed_bytecode: String,
    bytecode: Vec<u8>,
    deployed_source_map: String,
    source: String,
    file_path: String,
    file_id: i32,
}

/// In-memory model of all compiled contracts.
#[derive(Debug, Default)]
pub struct Registry {
    artifacts: Vec<Artifact>,
    by_file_id: HashMap<i32, usize>,
    match_cache: HashMap<String, Option<usize>>,
    fuzzy_match_factor: f64,
}

impl Registry {
    /// Builds a registry from already-resolved artifacts.
    pub fn from_artifacts(artifacts: Vec<Artifact>, fuzzy_match_factor: f64) -> Self {
        let mut by_file_id = HashMap::new();
        for (index, artifact) in artifacts.iter().enumerate() {
            by_file_id.insert(artifact.file_id, index);
        }

        Self {
            artifacts,
            by_file_id,
            match_cache: HashMap::new(),
            fuzzy_match_factor,
        }
    }

    /// Reads every `*.json` file in `dir` and builds one artifact per
    /// contract. Malformed files are logged and skipped; only an unreadable
    /// directory is fatal. The result replaces any previous registry
    /// wholesale; the caller swaps it in atomically.
    pub fn load(dir: impl AsRef<Path>, fuzzy_match_factor: f64) -> Result<Self, LoadError> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|source| LoadError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut pending = Vec::new();
        for path in &paths {
            match Self::read_artifact_file(path) {
                Ok(mut from_file) => pending.append(&mut from_file),
                Err(error) => tracing::warn!("skipping artifact file: {error}"),
            }
        }

        // On duplicate file ids the most recently added artifact wins, both
        // here and in the by_file_id index below.
        let mut source_by_file_id = HashMap::new();
        for artifact in &pending {
            source_by_file_id.insert(artifact.file_id, artifact.source.clone());
        }

        let mut artifacts = Vec::with_capacity(pending.len());
        for artifact in pending {
            match decode_source_map(
                &artifact.bytecode,
                &artifact.deployed_source_map,
                &source_by_file_id,
            ) {
                Ok(source_map) => {
                    let (line_map, number_of_lines) = make_line_map(&artifact.source);
                    tracing::debug!(
                        name = %artifact.name,
                        bytecode_len = artifact.bytecode.len(),
                        mapped = source_map.iter().filter(|slot| slot.is_some()).count(),
                        "resolved artifact"
                    );
                    artifacts.push(Artifact {
                        name: artifact.name,
                        deployed_bytecode: artifact.deployed_bytecode,
                        bytecode: artifact.bytecode,
                        deployed_source_map: artifact.deployed_source_map,
                        source: artifact.source,
                        file_path: artifact.file_path,
                        file_id: artifact.file_id,
                        number_of_lines,
                        line_map,
                        source_map,
                    });
                }
                Err(error) => {
                    tracing::warn!("skipping artifact `{}`: {error}", artifact.name);
                }
            }
        }

        Ok(Self::from_artifacts(artifacts, fuzzy_match_factor))
    }

    fn read_artifact_file(path: &Path) -> Result<Vec<PendingArtifact>, LoadError> {
        let display_path = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: display_path.clone(),
            source,
        })?;
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|source| LoadError::Json {
                path: display_path.clone(),
                source,
            })?;

        if value.get("contracts").is_some() {
            let combined: CombinedOutput =
                serde_json::from_value(value).map_err(|source| LoadError::Json {
                    path: display_path.clone(),
                    source,
                })?;

            let mut keyed: Vec<_> = combined.contracts.into_iter().collect();
            keyed.sort_by(|a, b| a.0.cmp(&b.0));

            let mut pending = Vec::new();
            for (key, contract) in keyed {
                match Self::pending_from_combined(&display_path, &key, contract) {
                    Ok(artifact) => pending.push(artifact),
                    Err(error) => tracing::warn!("skipping contract `{key}`: {error}"),
                }
            }
            Ok(pending)
        } else {
            let artifact: ContractArtifact =
                serde_json::from_value(value).map_err(|source| LoadError::Json {
                    path: display_path.clone(),
                    source,
                })?;
            Ok(vec![Self::pending_from_artifact(&display_path, artifact)?])
        }
    }

    fn pending_from_artifact(
        path: &str,
        artifact: ContractArtifact,
    ) -> Result<PendingArtifact, LoadError> {
        let deployed_bytecode =
            artifact
                .deployed_bytecode_hex()
                .ok_or_else(|| LoadError::MissingField {
                    path: path.to_string(),
                    field: "deployedBytecode",
                })?;
        let deployed_source_map = artifact
            .deployed_source_map_str()
            .ok_or_else(|| LoadError::MissingField {
                path: path.to_string(),
                field: "deployedSourceMap",
            })?
            .to_string();
        let source = artifact.source.ok_or_else(|| LoadError::MissingField {
            path: path.to_string(),
            field: "source",
        })?;

        let (file_path, file_id) = match &artifact.ast {
            Some(ast) => (
                ast.absolute_path.clone(),
                artifacts::file_id_from_src(&ast.src).ok_or_else(|| LoadError::MissingField {
                    path: path.to_string(),
                    field: "ast.src",
                })?,
            ),
            None => (
                path.to_string(),
                artifacts::file_id_from_src(&deployed_source_map).ok_or_else(|| {
                    LoadError::MissingField {
                        path: path.to_string(),
                        field: "deployedSourceMap file id",
                    }
                })?,
            ),
        };

        let bytecode = hex::decode(&deployed_bytecode).map_err(|source| {
            LoadError::InvalidBytecode {
                path: path.to_string(),
                source,
            }
        })?;

        let name = artifact
            .contract_name
            .unwrap_or_else(|| file_path.clone());

        Ok(PendingArtifact {
            name,
            deployed_bytecode,
            bytecode,
            deployed_source_map,
            source,
            file_path,
            file_id,
        })
    }

    fn pending_from_combined(
        path: &str,
        key: &str,
        mut contract: ContractArtifact,
    ) -> Result<PendingArtifact, LoadError> {
        let (source_path, contract_name) =
            key.rsplit_once(':')
                .ok_or_else(|| LoadError::MissingField {
                    path: path.to_string(),
                    field: "contracts key contract name",
                })?;

        if contract.source.is_none() {
            let source =
                fs::read_to_string(source_path).map_err(|source| LoadError::Io {
                    path: source_path.to_string(),
                    source,
                })?;
            contract.source = Some(source);
        }
        if contract.contract_name.is_none() {
            contract.contract_name = Some(contract_name.to_string());
        }

        let mut pending = Self::pending_from_artifact(path, contract)?;
        pending.file_path = source_path.to_string();
        Ok(pending)
    }

    /// All resolved artifacts, in load order.
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Mutable access for the coverage aggregator, which projects visitation
    /// flags onto the artifacts' line maps.
    pub fn artifacts_mut(&mut self) -> &mut [Artifact] {
        &mut self.artifacts
    }

    /// The artifact whose source file carries `file_id`.
    pub fn artifact_by_file_id(&self, file_id: i32) -> Option<&Artifact> {
        self.by_file_id.get(&file_id).map(|index| &self.artifacts[*index])
    }

    /// Index of the artifact whose source file carries `file_id`.
    pub fn artifact_index_by_file_id(&self, file_id: i32) -> Option<usize> {
        self.by_file_id.get(&file_id).copied()
    }

    /// Matches on-chain deployed bytecode to an artifact, exactly or
    /// approximately. Resolved inputs (hits and misses alike) are memoized,
    /// so repeated lookups of the same bytecode are cheap and silent. `None`
    /// is not an error; the caller skips attribution for that frame.
    pub fn match_bytecode(&mut self, code: &str, log: &DedupLog) -> Option<usize> {
        if let Some(cached) = self.match_cache.get(code) {
            return *cached;
        }

        let found = self.find_artifact(code, log);
        self.match_cache.insert(code.to_string(), found);
        found
    }

    fn find_artifact(&self, code: &str, log: &DedupLog) -> Option<usize> {
        // Exact pass, most recently added first, so duplicate artifacts
        // resolve to the latest.
        for index in (0..self.artifacts.len()).rev() {
            if self.artifacts[index].deployed_bytecode == code {
                return Some(index);
            }
        }

        // Fuzzy pass: compilers embed per-deployment immutables and metadata
        // hashes into otherwise-identical bytecode, so exact matching alone
        // would miss most real contracts. Count equal hex characters over
        // the overlapping prefix, past the `0x` marker.
        let mut best: Option<(usize, usize)> = None;
        for index in (0..self.artifacts.len()).rev() {
            let candidate = &self.artifacts[index].deployed_bytecode;
            let overlap = candidate.len().min(code.len());
            if overlap <= 2 {
                continue;
            }
            let compared = overlap - 2;
            let matches = candidate
                .bytes()
                .zip(code.bytes())
                .skip(2)
                .filter(|(ours, theirs)| ours == theirs)
                .count();

            if (matches as f64) < (compared as f64) * self.fuzzy_match_factor {
                continue;
            }
            if best.is_none_or(|(_, count)| matches > count) {
                best = Some((index, matches));
            }
        }

        match best {
            Some((index, _)) => {
                log.warn_once(format!(
                    "fuzzy-matched bytecode as `{}`",
                    self.artifacts[index].name
                ));
                Some(index)
            }
            None => {
                log.warn_once(format!(
                    "no artifact found for bytecode `{}…`",
                    abbreviate(code)
                ));
                None
            }
        }
    }

    /// Records that a trace landed on `pc` of `artifact`. A no-op for
    /// out-of-range or unattributable PCs; idempotent otherwise.
    pub fn mark_visited(&mut self, artifact: usize, pc: usize) {
        if let Some(Some(entry)) = self
            .artifacts
            .get_mut(artifact)
            .and_then(|artifact| artifact.source_map.get_mut(pc))
        {
            entry.visited = true;
        }
    }
}

fn abbreviate(code: &str) -> &str {
    &code[..code.len().min(18)]
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::build_model::JumpType;

    fn test_artifact(name: &str, deployed_bytecode: &str, file_id: i32) -> Artifact {
        let source = "line one\nline two\n".to_string();
        let (line_map, number_of_lines) = make_line_map(&source);
        let bytecode = hex::decode(deployed_bytecode).unwrap();
        let source_map = vec![None; bytecode.len()];

        Artifact {
            name: name.to_string(),
            deployed_bytecode: deployed_bytecode.to_string(),
            bytecode,
            deployed_source_map: String::new(),
            source,
            file_path: format!("contracts/{name}.sol"),
            file_id,
            number_of_lines,
            line_map,
            source_map,
        }
    }

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut file = fs::File::create(dir.join(name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn load_skips_malformed_files() {
        let dir = tempfile::tempdir().unwrap();

        write_file(
            dir.path(),
            "Foo.json",
            r#"{
                "contractName": "Foo",
                "deployedBytecode": "0x600100",
                "deployedSourceMap": "0:4:0:-;5:3;5:3",
                "source": "abcd\nefgh\n",
                "ast": {"absolutePath": "contracts/Foo.sol", "src": "0:10:0"}
            }"#,
        );
        write_file(dir.path(), "broken.json", "{ not json");
        write_file(dir.path(), "empty.json", r#"{"contractName": "Empty"}"#);
        write_file(dir.path(), "notes.txt", "not an artifact");

        let registry = Registry::load(dir.path(), DEFAULT_FUZZY_MATCH_FACTOR).unwrap();

        assert_eq!(registry.artifacts().len(), 1);
        let foo = &registry.artifacts()[0];
        assert_eq!(foo.name, "Foo");
        assert_eq!(foo.bytecode, vec![0x60, 0x01, 0x00]);
        assert_eq!(foo.file_path, "contracts/Foo.sol");
        assert_eq!(foo.number_of_lines, 2);
        // PUSH1 at pc 0 swallows pc 1; STOP at pc 2.
        assert_eq!(foo.source_map.len(), 3);
        assert!(foo.source_map[0].is_some());
        assert!(foo.source_map[1].is_none());
        assert!(foo.source_map[2].is_some());
        assert_eq!(foo.source_map[2].as_ref().unwrap().jump_type, JumpType::Regular);
    }

    #[test]
    fn load_fails_on_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");

        assert!(matches!(
            Registry::load(&missing, DEFAULT_FUZZY_MATCH_FACTOR),
            Err(LoadError::Io { .. })
        ));
    }

    #[test]
    fn exact_match_prefers_the_most_recently_added() {
        let registry_artifacts = vec![
            test_artifact("Old", "0x600100", 0),
            test_artifact("New", "0x600100", 1),
        ];
        let mut registry = Registry::from_artifacts(registry_artifacts, 0.7);
        let log = DedupLog::default();

        let found = registry.match_bytecode("0x600100", &log).unwrap();
        assert_eq!(registry.artifacts()[found].name, "New");
        assert_eq!(log.emitted(), 0);
    }

    #[test]
    fn exact_match_is_idempotent_and_silent() {
        let mut registry =
            Registry::from_artifacts(vec![test_artifact("Foo", "0x600100", 0)], 0.7);
        let log = DedupLog::default();

        let first = registry.match_bytecode("0x600100", &log);
        let second = registry.match_bytecode("0x600100", &log);

        assert_eq!(first, second);
        assert!(first.is_some());
        assert_eq!(log.emitted(), 0);
    }

    #[test]
    fn fuzzy_match_picks_the_closest_candidate() {
        // Ten bytecode bytes: candidate A differs from the input in one
        // (10%), candidate B in four (40%).
        let input = "0x00112233445566778899";
        let a = "0x001122334455667788ff";
        let b = "0x00112233ffffffff8899";

        let mut registry = Registry::from_artifacts(
            vec![test_artifact("B", b, 0), test_artifact("A", a, 1)],
            0.7,
        );
        let log = DedupLog::default();

        let found = registry.match_bytecode(input, &log).unwrap();
        assert_eq!(registry.artifacts()[found].name, "A");
        assert_eq!(log.emitted(), 1);
    }

    #[test]
    fn fuzzy_match_below_threshold_logs_once() {
        let mut registry =
            Registry::from_artifacts(vec![test_artifact("Foo", "0x00112233445566778899", 0)], 0.7);
        let log = DedupLog::default();

        // More than 30% of the hex characters differ.
        let input = "0xffffffffffff66778899";
        assert!(registry.match_bytecode(input, &log).is_none());
        assert!(registry.match_bytecode(input, &log).is_none());
        assert!(registry.match_bytecode(input, &log).is_none());

        assert_eq!(log.emitted(), 1);
    }

    #[test]
    fn mark_visited_is_idempotent_and_bounds_checked() {
        let mut artifact = test_artifact("Foo", "0x600100", 0);
        artifact.source_map[0] = Some(crate::build_model::SourceMapEntry {
            start: 0,
            length: 4,
            file_id: 0,
            jump_type: JumpType::None,
            visited: false,
        });
        let mut registry = Registry::from_artifacts(vec![artifact], 0.7);

        registry.mark_visited(0, 0);
        registry.mark_visited(0, 0);
        registry.mark_visited(0, 1); // unattributable slot
        registry.mark_visited(0, 999); // out of range
        registry.mark_visited(7, 0); // unknown artifact

        let marked = &registry.artifacts()[0].source_map;
        assert!(marked[0].as_ref().unwrap().visited);
        assert!(marked[1].is_none());
    }
}
