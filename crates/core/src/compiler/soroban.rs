//! Soroban toolchain: cargo for the WASM build, the stellar CLI for the spec

use super::toolchain::{probe_version, run_command, SourceCheck, Toolchain, ToolVersion};
use crate::{
    artifacts::ArtifactKind,
    error::{Error, Result},
};
use async_trait::async_trait;
use convert_case::{Case, Casing};
use eyre::Context;
use quote::ToTokens;
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};
use syn::{visit::Visit, Attribute, ItemImpl, ItemStruct, ItemUse};
use tokio::process::Command;

pub const WASM_TARGET: &str = "wasm32-unknown-unknown";
const DEFAULT_SDK_VERSION: &str = "22";

#[derive(Serialize)]
struct CargoManifest<'a> {
    package: Package<'a>,
    lib: Lib,
    dependencies: BTreeMap<&'a str, &'a str>,
    profile: Profiles,
    /// Empty table keeps the sandbox out of any enclosing workspace
    workspace: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct Package<'a> {
    name: &'a str,
    version: &'a str,
    edition: &'a str,
    publish: bool,
}

#[derive(Serialize)]
struct Lib {
    #[serde(rename = "crate-type")]
    crate_type: Vec<&'static str>,
}

#[derive(Serialize)]
struct Profiles {
    release: ReleaseProfile,
}

#[derive(Serialize)]
struct ReleaseProfile {
    #[serde(rename = "opt-level")]
    opt_level: &'static str,
    #[serde(rename = "overflow-checks")]
    overflow_checks: bool,
    debug: u8,
    strip: &'static str,
    panic: &'static str,
    #[serde(rename = "codegen-units")]
    codegen_units: u8,
    lto: bool,
}

/// Builds Soroban contracts with cargo and reads their spec with the stellar CLI
#[derive(Debug, Clone)]
pub struct SorobanToolchain {
    cargo: PathBuf,
    stellar: PathBuf,
    sdk_version: String,
}

impl Default for SorobanToolchain {
    fn default() -> Self {
        Self {
            cargo: PathBuf::from("cargo"),
            stellar: PathBuf::from("stellar"),
            sdk_version: DEFAULT_SDK_VERSION.to_string(),
        }
    }
}

impl SorobanToolchain {
    pub fn new(cargo: impl Into<PathBuf>, stellar: impl Into<PathBuf>) -> Self {
        Self {
            cargo: cargo.into(),
            stellar: stellar.into(),
            ..Self::default()
        }
    }

    pub fn with_sdk_version(mut self, version: impl Into<String>) -> Self {
        self.sdk_version = version.into();
        self
    }

    /// Deterministic path of the compiled WASM
    pub fn binary_path(dir: &Path, contract_name: &str) -> PathBuf {
        dir.join("target")
            .join(WASM_TARGET)
            .join("release")
            .join(format!("{}.wasm", contract_name.to_case(Case::Snake)))
    }

    fn manifest(&self, package_name: &str) -> Result<String> {
        let manifest = CargoManifest {
            package: Package {
                name: package_name,
                version: "0.1.0",
                edition: "2021",
                publish: false,
            },
            lib: Lib {
                crate_type: vec!["cdylib"],
            },
            dependencies: BTreeMap::from([("soroban-sdk", self.sdk_version.as_str())]),
            profile: Profiles {
                release: ReleaseProfile {
                    opt_level: "z",
                    overflow_checks: true,
                    debug: 0,
                    strip: "symbols",
                    panic: "abort",
                    codegen_units: 1,
                    lto: true,
                },
            },
            workspace: BTreeMap::new(),
        };
        toml::to_string(&manifest)
            .map_err(|e| Error::Internal(eyre::eyre!("Failed to render Cargo.toml: {}", e)))
    }
}

/// Markers a Soroban contract source must carry
#[derive(Debug, Default)]
struct SorobanMarkers {
    sdk_import: bool,
    contracts: Vec<String>,
    impl_blocks: Vec<String>,
}

fn has_attribute(attrs: &[Attribute], name: &str) -> bool {
    attrs.iter().any(|attr| {
        attr.path()
            .segments
            .last()
            .is_some_and(|segment| segment.ident == name)
    })
}

impl<'ast> Visit<'ast> for SorobanMarkers {
    fn visit_item_use(&mut self, node: &'ast ItemUse) {
        if node
            .tree
            .to_token_stream()
            .to_string()
            .starts_with("soroban_sdk")
        {
            self.sdk_import = true;
        }
        syn::visit::visit_item_use(self, node);
    }

    fn visit_item_struct(&mut self, node: &'ast ItemStruct) {
        if has_attribute(&node.attrs, "contract") {
            self.contracts.push(node.ident.to_string());
        }
        syn::visit::visit_item_struct(self, node);
    }

    fn visit_item_impl(&mut self, node: &'ast ItemImpl) {
        if has_attribute(&node.attrs, "contractimpl") {
            self.impl_blocks
                .push(node.self_ty.to_token_stream().to_string());
        }
        syn::visit::visit_item_impl(self, node);
    }
}

#[async_trait]
impl Toolchain for SorobanToolchain {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Soroban
    }

    fn check_source(&self, source: &str, contract_name: Option<&str>) -> Result<SourceCheck> {
        let file = syn::parse_file(source)
            .map_err(|e| Error::InvalidSource(format!("Failed to parse Rust source: {e}")))?;

        let mut markers = SorobanMarkers::default();
        markers.visit_file(&file);

        if !markers.sdk_import {
            return Err(Error::InvalidSource(
                "Missing `use soroban_sdk` import".to_string(),
            ));
        }
        let Some(first) = markers.contracts.first() else {
            return Err(Error::InvalidSource(
                "No #[contract] type found".to_string(),
            ));
        };
        if markers.impl_blocks.is_empty() {
            return Err(Error::InvalidSource(
                "No #[contractimpl] block found".to_string(),
            ));
        }

        // An explicit name only drives the crate and output file names
        let contract_name = contract_name
            .map(str::to_string)
            .unwrap_or_else(|| first.clone());

        let mut warnings = Vec::new();
        for target in &markers.impl_blocks {
            if !markers.contracts.contains(target) {
                warnings.push(format!(
                    "#[contractimpl] targets {target}, which is not a #[contract] type"
                ));
            }
        }

        Ok(SourceCheck {
            contract_name,
            warnings,
        })
    }

    async fn check_available(&self) -> Result<Vec<ToolVersion>> {
        let cargo = probe_version("cargo", &self.cargo, &["--version"]).await?;
        let stellar = probe_version("stellar", &self.stellar, &["--version"]).await?;
        Ok(vec![
            ("cargo".to_string(), cargo),
            ("stellar".to_string(), stellar),
        ])
    }

    fn materialize(&self, dir: &Path, contract_name: &str, source: &str) -> Result<()> {
        let package_name = contract_name.to_case(Case::Snake);
        std::fs::write(dir.join("Cargo.toml"), self.manifest(&package_name)?)
            .with_context(|| format!("Failed to write Cargo.toml in {}", dir.display()))?;

        let src = dir.join("src");
        std::fs::create_dir_all(&src)
            .with_context(|| format!("Failed to create {}", src.display()))?;
        std::fs::write(src.join("lib.rs"), source)
            .with_context(|| format!("Failed to write {}", src.join("lib.rs").display()))?;
        Ok(())
    }

    async fn build(&self, dir: &Path, contract_name: &str, timeout: Duration) -> Result<PathBuf> {
        let mut cmd = Command::new(&self.cargo);
        cmd.current_dir(dir)
            .env("CARGO_TARGET_DIR", dir.join("target"))
            .args(["build", "--target", WASM_TARGET, "--release"]);

        run_command(cmd, timeout, "cargo build").await?;

        let binary = Self::binary_path(dir, contract_name);
        if !binary.is_file() {
            return Err(Error::BuildFailure(format!(
                "Expected WASM file not found: {}",
                binary.display()
            )));
        }
        Ok(binary)
    }

    async fn inspect(&self, _dir: &Path, _contract_name: &str, binary: &Path) -> Result<Value> {
        let mut cmd = Command::new(&self.stellar);
        cmd.args(["contract", "bindings", "json", "--wasm"]).arg(binary);

        let output = run_command(cmd, Duration::from_secs(30), "stellar contract bindings").await?;
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO: &str = r#"
        #![no_std]
        use soroban_sdk::{contract, contractimpl, symbol_short, vec, Env, Symbol, Vec};

        #[contract]
        pub struct HelloContract;

        #[contractimpl]
        impl HelloContract {
            pub fn hello(env: Env, to: Symbol) -> Vec<Symbol> {
                vec![&env, symbol_short!("Hello"), to]
            }
        }
    "#;

    #[test]
    fn test_check_source_accepts_contract() {
        let check = SorobanToolchain::default().check_source(HELLO, None).unwrap();
        assert_eq!(check.contract_name, "HelloContract");
        assert!(check.warnings.is_empty());
    }

    #[test]
    fn test_check_source_rejects_missing_markers() {
        let toolchain = SorobanToolchain::default();

        let no_import = HELLO.replace("use soroban_sdk", "use other_sdk");
        let no_contract = HELLO.replace("#[contract]\n", "");
        let no_impl = HELLO.replace("#[contractimpl]", "");

        for source in [no_import, no_contract, no_impl, "fn broken(".to_string()] {
            assert!(
                matches!(
                    toolchain.check_source(&source, None),
                    Err(Error::InvalidSource(_))
                ),
                "accepted: {source}"
            );
        }
    }

    #[test]
    fn test_materialize_layout() {
        let dir = TempDir::new().unwrap();
        SorobanToolchain::default()
            .materialize(dir.path(), "HelloContract", HELLO)
            .unwrap();

        let manifest: toml::Value =
            toml::from_str(&std::fs::read_to_string(dir.path().join("Cargo.toml")).unwrap())
                .unwrap();
        assert_eq!(manifest["package"]["name"].as_str(), Some("hello_contract"));
        assert_eq!(manifest["lib"]["crate-type"][0].as_str(), Some("cdylib"));
        assert_eq!(manifest["dependencies"]["soroban-sdk"].as_str(), Some("22"));
        assert!(manifest.get("workspace").is_some());

        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(),
            HELLO
        );
        assert_eq!(
            SorobanToolchain::binary_path(dir.path(), "HelloContract"),
            dir.path()
                .join("target/wasm32-unknown-unknown/release/hello_contract.wasm")
        );
    }
}
