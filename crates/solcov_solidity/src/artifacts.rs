//! Serde models for the artifact files read from the artifact directory.
//!
//! Two shapes are accepted: a per-contract build artifact (with optional
//! embedded AST and source text) and a solc combined-output file whose
//! `contracts` object is keyed by `"path:ContractName"`.

use std::collections::HashMap;

use serde::Deserialize;

/// A per-contract build artifact. The `bin-runtime`/`srcmap-runtime`
/// spellings are how the same data appears inside combined output.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
    pub contract_name: Option<String>,
    /// Deployed (runtime) bytecode as a `0x`-prefixed hex string.
    pub deployed_bytecode: Option<String>,
    /// Compact source map of the deployed bytecode.
    pub deployed_source_map: Option<String>,
    #[serde(rename = "bin-runtime")]
    pub bin_runtime: Option<String>,
    #[serde(rename = "srcmap-runtime")]
    pub srcmap_runtime: Option<String>,
    /// Source text, when the artifact embeds it.
    pub source: Option<String>,
    /// Compiler AST metadata, when the artifact embeds it.
    pub ast: Option<SourceAst>,
}

/// The slice of the compiler AST needed for provenance.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAst {
    pub absolute_path: String,
    /// Source range of the file's root node, in `start:length:fileId` form.
    pub src: String,
}

/// A solc combined-output file.
#[derive(Debug, Deserialize)]
pub struct CombinedOutput {
    pub contracts: HashMap<String, ContractArtifact>,
}

impl ContractArtifact {
    /// The deployed bytecode in canonical `0x`-prefixed form, whichever
    /// spelling the file used.
    pub fn deployed_bytecode_hex(&self) -> Option<String> {
        self.deployed_bytecode
            .clone()
            .or_else(|| self.bin_runtime.as_ref().map(|bin| format!("0x{bin}")))
    }

    /// The compact source map of the deployed bytecode, whichever spelling
    /// the file used.
    pub fn deployed_source_map_str(&self) -> Option<&str> {
        self.deployed_source_map
            .as_deref()
            .or(self.srcmap_runtime.as_deref())
    }
}

/// Extracts the file index from a `start:length:fileId` range.
pub fn file_id_from_src(src: &str) -> Option<i32> {
    src.split(':').nth(2)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytecode_spellings_are_canonicalized() {
        let artifact: ContractArtifact =
            serde_json::from_str(r#"{"bin-runtime": "6001", "srcmap-runtime": "0:1:0:-"}"#)
                .unwrap();

        assert_eq!(artifact.deployed_bytecode_hex().unwrap(), "0x6001");
        assert_eq!(artifact.deployed_source_map_str().unwrap(), "0:1:0:-");
    }

    #[test]
    fn hardhat_style_artifact_fields_win() {
        let artifact: ContractArtifact = serde_json::from_str(
            r#"{
                "contractName": "Foo",
                "deployedBytecode": "0x6001",
                "deployedSourceMap": "0:1:0:-",
                "source": "contract Foo {}",
                "ast": {"absolutePath": "contracts/Foo.sol", "src": "0:15:2"}
            }"#,
        )
        .unwrap();

        assert_eq!(artifact.contract_name.as_deref(), Some("Foo"));
        assert_eq!(artifact.deployed_bytecode_hex().unwrap(), "0x6001");
        assert_eq!(artifact.ast.as_ref().unwrap().absolute_path, "contracts/Foo.sol");
        assert_eq!(file_id_from_src(&artifact.ast.unwrap().src), Some(2));
    }

    #[test]
    fn file_id_requires_three_components() {
        assert_eq!(file_id_from_src("0:15"), None);
        assert_eq!(file_id_from_src("0:15:x"), None);
        assert_eq!(file_id_from_src("7:5:3:i"), Some(3));
    }
}
