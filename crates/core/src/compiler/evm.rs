//! Solidity toolchain driven through `solc`

use super::toolchain::{probe_version, run_command, SourceCheck, Toolchain, ToolVersion};
use crate::{
    analysis::lexer::{tokenize, TokenKind},
    artifacts::ArtifactKind,
    error::{Error, Result},
};
use async_trait::async_trait;
use convert_case::{Case, Casing};
use eyre::Context;
use serde::Serialize;
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::process::Command;

/// Pseudo target triple used for EVM build output
pub const EVM_TARGET: &str = "evm";

#[derive(Serialize)]
struct BuildManifest<'a> {
    contract: ManifestContract<'a>,
    solc: ManifestSolc,
}

#[derive(Serialize)]
struct ManifestContract<'a> {
    name: &'a str,
    source: String,
}

#[derive(Serialize)]
struct ManifestSolc {
    optimize: bool,
    output: String,
}

/// Compiles Solidity with a `solc` binary found on PATH or configured explicitly
#[derive(Debug, Clone)]
pub struct SolcToolchain {
    solc: PathBuf,
    optimize: bool,
}

impl Default for SolcToolchain {
    fn default() -> Self {
        Self::new("solc", true)
    }
}

impl SolcToolchain {
    pub fn new(solc: impl Into<PathBuf>, optimize: bool) -> Self {
        Self {
            solc: solc.into(),
            optimize,
        }
    }

    fn source_path(contract_name: &str) -> PathBuf {
        PathBuf::from("src").join(format!("{contract_name}.sol"))
    }

    fn raw_output_dir() -> PathBuf {
        PathBuf::from("target").join(EVM_TARGET).join("solc")
    }

    /// Deterministic path of the decoded bytecode
    pub fn binary_path(dir: &Path, contract_name: &str) -> PathBuf {
        dir.join("target")
            .join(EVM_TARGET)
            .join("release")
            .join(format!("{}.bin", contract_name.to_case(Case::Snake)))
    }
}

/// Names of non-abstract contracts declared in Solidity source
pub fn declared_contracts(source: &str) -> Result<Vec<String>> {
    let tokens = tokenize(source).map_err(|e| Error::InvalidSource(e.to_string()))?;
    let mut names = Vec::new();

    for (i, pair) in tokens.windows(2).enumerate() {
        if let (TokenKind::Ident(keyword), TokenKind::Ident(name)) = (&pair[0].kind, &pair[1].kind) {
            let is_abstract =
                i > 0 && matches!(&tokens[i - 1].kind, TokenKind::Ident(w) if w == "abstract");
            if keyword == "contract" && !is_abstract {
                names.push(name.clone());
            }
        }
    }

    Ok(names)
}

/// Pulls the JSON ABI for `contract_name` out of `solc --abi` output
pub fn parse_abi_output(stdout: &str, contract_name: &str) -> Result<Value> {
    let header_suffix = format!(":{contract_name} =======");
    let mut lines = stdout.lines();

    while let Some(line) = lines.next() {
        if line.trim().starts_with("=======") && line.trim().ends_with(&header_suffix) {
            if let Some(json) = lines.find(|l| l.trim_start().starts_with('[')) {
                return Ok(serde_json::from_str(json.trim())?);
            }
        }
    }

    Err(Error::Internal(eyre::eyre!(
        "No ABI for {contract_name} in solc output"
    )))
}

#[async_trait]
impl Toolchain for SolcToolchain {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Evm
    }

    fn check_source(&self, source: &str, contract_name: Option<&str>) -> Result<SourceCheck> {
        let contracts = declared_contracts(source)?;
        let Some(last) = contracts.last() else {
            return Err(Error::InvalidSource(
                "No contract declaration found".to_string(),
            ));
        };

        let contract_name = match contract_name {
            Some(name) if contracts.iter().any(|c| c == name) => name.to_string(),
            Some(name) => {
                return Err(Error::InvalidSource(format!(
                    "No deployable contract named {name} in the source"
                )))
            }
            None => last.clone(),
        };

        let mut warnings = Vec::new();
        if !source.contains("pragma solidity") {
            warnings.push("Source has no `pragma solidity` version constraint".to_string());
        }

        Ok(SourceCheck {
            contract_name,
            warnings,
        })
    }

    /// `solc` is the only binary an EVM build runs; bytecode decoding and
    /// the manifest are handled in-process.
    async fn check_available(&self) -> Result<Vec<ToolVersion>> {
        let version = probe_version("solc", &self.solc, &["--version"]).await?;
        Ok(vec![("solc".to_string(), version)])
    }

    fn materialize(&self, dir: &Path, contract_name: &str, source: &str) -> Result<()> {
        let source_path = dir.join(Self::source_path(contract_name));
        if let Some(parent) = source_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&source_path, source)
            .with_context(|| format!("Failed to write {}", source_path.display()))?;

        let manifest = BuildManifest {
            contract: ManifestContract {
                name: contract_name,
                source: Self::source_path(contract_name).display().to_string(),
            },
            solc: ManifestSolc {
                optimize: self.optimize,
                output: Self::raw_output_dir().display().to_string(),
            },
        };
        let manifest = toml::to_string(&manifest)
            .map_err(|e| eyre::eyre!("Failed to render build manifest: {}", e))?;
        std::fs::write(dir.join("build.toml"), manifest)
            .with_context(|| format!("Failed to write manifest in {}", dir.display()))?;
        Ok(())
    }

    async fn build(&self, dir: &Path, contract_name: &str, timeout: Duration) -> Result<PathBuf> {
        let mut cmd = Command::new(&self.solc);
        cmd.current_dir(dir);
        if self.optimize {
            cmd.arg("--optimize");
        }
        cmd.args(["--bin", "--overwrite", "-o"])
            .arg(Self::raw_output_dir())
            .arg(Self::source_path(contract_name));

        run_command(cmd, timeout, "solc").await?;

        let raw_path = dir
            .join(Self::raw_output_dir())
            .join(format!("{contract_name}.bin"));
        let hex_code = std::fs::read_to_string(&raw_path).map_err(|e| {
            Error::BuildFailure(format!(
                "Expected bytecode not found at {}: {e}",
                raw_path.display()
            ))
        })?;
        let bytecode = hex::decode(hex_code.trim())
            .map_err(|e| Error::BuildFailure(format!("solc produced invalid hex: {e}")))?;
        if bytecode.is_empty() {
            return Err(Error::BuildFailure(format!(
                "{contract_name} compiled to empty bytecode (abstract or interface?)"
            )));
        }

        let binary = Self::binary_path(dir, contract_name);
        if let Some(parent) = binary.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&binary, &bytecode)
            .with_context(|| format!("Failed to write {}", binary.display()))?;

        Ok(binary)
    }

    async fn inspect(&self, dir: &Path, contract_name: &str, _binary: &Path) -> Result<Value> {
        let mut cmd = Command::new(&self.solc);
        cmd.current_dir(dir)
            .arg("--abi")
            .arg(Self::source_path(contract_name));

        let output = run_command(cmd, Duration::from_secs(30), "solc --abi").await?;
        parse_abi_output(&String::from_utf8_lossy(&output.stdout), contract_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_source() {
        let toolchain = SolcToolchain::default();
        let source = "pragma solidity ^0.8.0;\nabstract contract Base {}\ncontract Test is Base { uint256 public value = 1; }";

        let check = toolchain.check_source(source, None).unwrap();
        assert_eq!(check.contract_name, "Test");
        assert!(check.warnings.is_empty());

        assert!(matches!(
            toolchain.check_source(source, Some("Base")),
            Err(Error::InvalidSource(_))
        ));
        assert!(matches!(
            toolchain.check_source("library L {}", None),
            Err(Error::InvalidSource(_))
        ));
    }

    #[test]
    fn test_missing_pragma_is_a_warning() {
        let check = SolcToolchain::default()
            .check_source("contract Test { uint256 public value = 1; }", Some("Test"))
            .unwrap();
        assert_eq!(check.contract_name, "Test");
        assert_eq!(check.warnings.len(), 1);
    }

    #[test]
    fn test_materialize_layout() {
        let dir = TempDir::new().unwrap();
        let toolchain = SolcToolchain::default();
        toolchain
            .materialize(dir.path(), "MyToken", "contract MyToken {}")
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/MyToken.sol")).unwrap(),
            "contract MyToken {}"
        );
        let manifest: toml::Value =
            toml::from_str(&std::fs::read_to_string(dir.path().join("build.toml")).unwrap())
                .unwrap();
        assert_eq!(manifest["contract"]["name"].as_str(), Some("MyToken"));
        assert_eq!(
            SolcToolchain::binary_path(dir.path(), "MyToken"),
            dir.path().join("target/evm/release/my_token.bin")
        );
    }

    #[tokio::test]
    async fn test_check_available_probes_solc() {
        let toolchain = SolcToolchain::new("/nonexistent/chainsmith-solc", true);
        match toolchain.check_available().await {
            Err(Error::ToolchainUnavailable { component, .. }) => assert_eq!(component, "solc"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_parse_abi_output() {
        let stdout = "\n======= src/Test.sol:Base =======\nContract JSON ABI\n[]\n\n======= src/Test.sol:Test =======\nContract JSON ABI\n[{\"type\":\"function\",\"name\":\"value\",\"inputs\":[],\"outputs\":[{\"name\":\"\",\"type\":\"uint256\"}],\"stateMutability\":\"view\"}]\n";
        let abi = parse_abi_output(stdout, "Test").unwrap();
        assert_eq!(abi[0]["name"], "value");
        assert!(parse_abi_output(stdout, "Missing").is_err());
    }
}
