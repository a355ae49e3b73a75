//! Language registry
//!
//! Maps a language key (`py`, `js`, `c`, ...) to the sandbox image and
//! the command lines of its install/compile/run stages. The table is
//! validated once when loaded and never mutated afterwards.

use crate::{ReslError, Result, template::Template};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// How to build and run one language inside its sandbox image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageConfig {
    /// Registry key, taken from the table's map key
    #[serde(skip)]
    pub key: String,

    /// Sandbox image
    pub image: String,

    /// Extension of the file handed to the run stage
    #[serde(alias = "executeExtension")]
    pub file_extension: String,

    /// Extension of the source file when a compile stage exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_extension: Option<String>,

    #[serde(default, alias = "installCmd", skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,

    #[serde(default, alias = "compileCmd", skip_serializing_if = "Option::is_none")]
    pub compile_command: Option<String>,

    #[serde(
        default,
        alias = "runCmd",
        alias = "executeCmd",
        skip_serializing_if = "Option::is_none"
    )]
    pub run_command: Option<String>,

    /// Packages appended to the install command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,

    /// Artifacts (`{id}.{ext}`) a successful compile stage must leave behind
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub output_extensions: BTreeSet<String>,

    /// Entry-point wrapper applied to the submitted source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
}

impl LanguageConfig {
    /// Minimal interpreted-language entry
    #[must_use]
    pub fn interpreted(
        key: impl Into<String>,
        image: impl Into<String>,
        extension: impl Into<String>,
        run_command: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            image: image.into(),
            file_extension: extension.into(),
            compile_extension: None,
            install_command: None,
            compile_command: None,
            run_command: Some(run_command.into()),
            packages: Vec::new(),
            output_extensions: BTreeSet::new(),
            template: None,
        }
    }

    #[must_use]
    pub fn with_compile(
        mut self,
        command: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        self.compile_command = Some(command.into());
        self.compile_extension = Some(extension.into());
        self
    }

    #[must_use]
    pub fn with_install<I, S>(mut self, command: impl Into<String>, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.install_command = Some(command.into());
        self.packages = packages.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_template(mut self, template: Template) -> Self {
        self.template = Some(template);
        self
    }

    #[must_use]
    pub fn with_outputs<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn without_run_command(mut self) -> Self {
        self.run_command = None;
        self
    }

    #[must_use]
    pub const fn requires_compile(&self) -> bool {
        self.compile_command.is_some()
    }

    /// Extension of the file the workspace manager writes
    #[must_use]
    pub fn source_extension(&self) -> &str {
        match (&self.compile_command, &self.compile_extension) {
            (Some(_), Some(ext)) => ext,
            _ => &self.file_extension,
        }
    }

    #[must_use]
    pub fn source_file_name(&self, id: &str) -> String {
        file_name(id, self.source_extension())
    }

    /// `{installCommand} {package...}`, or `None` when there is nothing to install
    #[must_use]
    pub fn install_line(&self) -> Option<String> {
        let command = self.install_command.as_deref()?;
        if self.packages.is_empty() {
            return None;
        }
        let mut line = command.to_owned();
        for package in &self.packages {
            line.push(' ');
            line.push_str(package);
        }
        Some(line)
    }

    #[must_use]
    pub fn compile_line(&self, id: &str) -> Option<String> {
        let command = self.compile_command.as_deref()?;
        let extension = self.compile_extension.as_deref()?;
        Some(compose(command, id, &file_name(id, extension)))
    }

    /// Run line, defaulting to executing the artifact directly
    #[must_use]
    pub fn run_line(&self, id: &str) -> String {
        let file = file_name(id, &self.file_extension);
        match self.run_command.as_deref() {
            Some(command) => compose(command, id, &file),
            None => format!("./{file}"),
        }
    }

    /// Artifact paths (relative to the workspace) the compile stage must produce
    #[must_use]
    pub fn expected_outputs(&self, id: &str) -> Vec<String> {
        self.output_extensions
            .iter()
            .map(|ext| file_name(id, ext))
            .collect()
    }

    /// Check the entry's invariants
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(ReslError::Registry(format!("{}: {msg}", self.key)));

        if self.key.trim().is_empty() {
            return Err(ReslError::Registry("empty language key".into()));
        }
        if self.image.trim().is_empty() {
            return fail("image must not be empty");
        }
        if !valid_extension(&self.file_extension) {
            return fail("fileExtension must be a non-empty bare extension");
        }
        match (&self.compile_command, &self.compile_extension) {
            (Some(cmd), Some(ext)) => {
                if cmd.trim().is_empty() {
                    return fail("compileCommand must not be empty");
                }
                if !valid_extension(ext) {
                    return fail("compileExtension must be a non-empty bare extension");
                }
            }
            (None, None) => {}
            (Some(_), None) => return fail("compileCommand requires compileExtension"),
            (None, Some(_)) => return fail("compileExtension requires compileCommand"),
        }
        if let Some(cmd) = &self.run_command {
            if cmd.trim().is_empty() {
                return fail("runCommand must not be empty");
            }
        } else if !self.requires_compile() {
            return fail("runCommand is required when nothing is compiled");
        }
        if self.output_extensions.iter().any(|ext| !valid_extension(ext)) {
            return fail("outputExtensions must be bare extensions");
        }
        Ok(())
    }
}

fn valid_extension(ext: &str) -> bool {
    !ext.is_empty()
        && ext
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn file_name(id: &str, extension: &str) -> String {
    format!("{id}.{extension}")
}

/// Substitute `{name}`/`{file}`; a command without placeholders gets the
/// file name appended.
fn compose(command: &str, id: &str, file: &str) -> String {
    if command.contains("{file}") || command.contains("{name}") {
        command.replace("{file}", file).replace("{name}", id)
    } else {
        format!("{command} {file}")
    }
}

/// Immutable mapping from language key to its configuration
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    languages: BTreeMap<String, LanguageConfig>,
}

impl LanguageRegistry {
    /// Build a registry from entries, validating each one
    pub fn from_configs(configs: impl IntoIterator<Item = LanguageConfig>) -> Result<Self> {
        let mut languages = BTreeMap::new();
        for config in configs {
            config.validate()?;
            if languages.contains_key(&config.key) {
                return Err(ReslError::Registry(format!(
                    "duplicate language key {}",
                    config.key
                )));
            }
            languages.insert(config.key.clone(), config);
        }
        Ok(Self { languages })
    }

    /// Parse a `languages.json` table (`{ "<key>": { ...entry } }`)
    pub fn from_json_str(json: &str) -> Result<Self> {
        let table: BTreeMap<String, LanguageConfig> = serde_json::from_str(json)?;
        Self::from_configs(table.into_iter().map(|(key, mut config)| {
            config.key = key;
            config
        }))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ReslError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let registry = Self::from_json_str(&json)?;
        tracing::info!(
            path = %path.display(),
            languages = registry.len(),
            "language table loaded"
        );
        Ok(registry)
    }

    /// Languages supported out of the box
    pub fn builtin() -> Self {
        let configs = [
            LanguageConfig::interpreted("js", "node:20-alpine", "js", "node"),
            LanguageConfig::interpreted("py", "python:3-alpine", "py", "python"),
            LanguageConfig::interpreted("rb", "ruby:3-alpine", "rb", "ruby"),
            LanguageConfig::interpreted("sh", "alpine:3", "sh", "sh"),
            LanguageConfig::interpreted("go", "golang:1-alpine", "go", "go run")
                .with_template(Template::GoMain),
            LanguageConfig::interpreted("c", "gcc:13", "out", "")
                .without_run_command()
                .with_compile("gcc -o {name}.out {file}", "c")
                .with_outputs(["out"])
                .with_template(Template::CMain),
            LanguageConfig::interpreted("cpp", "gcc:13", "out", "")
                .without_run_command()
                .with_compile("g++ -o {name}.out {file}", "cpp")
                .with_outputs(["out"])
                .with_template(Template::CppMain),
            LanguageConfig::interpreted(
                "java",
                "eclipse-temurin:21-jdk",
                "class",
                "java -cp . {name}",
            )
            .with_compile("javac", "java")
            .with_outputs(["class"])
            .with_template(Template::JavaMain),
            LanguageConfig::interpreted("rs", "rust:1-slim", "out", "")
                .without_run_command()
                .with_compile("rustc -o {name}.out {file}", "rs")
                .with_outputs(["out"])
                .with_template(Template::RustMain),
        ];

        Self {
            languages: configs
                .into_iter()
                .map(|config| (config.key.clone(), config))
                .collect(),
        }
    }

    /// Load from `path` when given, otherwise fall back to the builtin table
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_json_file(path),
            None => Ok(Self::builtin()),
        }
    }

    /// Look up a language; misses are `UnsupportedLanguage`
    pub fn resolve(&self, key: &str) -> Result<&LanguageConfig> {
        self.languages
            .get(key)
            .ok_or_else(|| ReslError::UnsupportedLanguage(key.to_owned()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.languages.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LanguageConfig> {
        self.languages.values()
    }

    /// Distinct images, in key order of first use
    #[must_use]
    pub fn images(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.languages
            .values()
            .map(|config| config.image.as_str())
            .filter(|image| seen.insert(*image))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.languages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_entries_are_valid_and_runnable() {
        let registry = LanguageRegistry::builtin();
        assert!(!registry.is_empty());
        for config in registry.iter() {
            config.validate().unwrap();
            assert!(!config.file_extension.is_empty());
            assert!(!config.run_line("resl_x").trim().is_empty());
        }
    }

    #[test]
    fn resolve_miss_is_unsupported_language() {
        let registry = LanguageRegistry::builtin();
        match registry.resolve("cobol") {
            Err(ReslError::UnsupportedLanguage(key)) => assert_eq!(key, "cobol"),
            other => panic!("expected UnsupportedLanguage, got {other:?}"),
        }
    }

    #[test]
    fn stage_lines_follow_registry_entry() {
        let config = LanguageConfig::interpreted("js", "node:20-alpine", "js", "node")
            .with_install("npm install --silent", ["lodash", "chalk"]);
        assert_eq!(
            config.install_line().as_deref(),
            Some("npm install --silent lodash chalk")
        );
        assert_eq!(config.compile_line("id"), None);
        assert_eq!(config.run_line("id"), "node id.js");
        assert_eq!(config.source_file_name("id"), "id.js");
    }

    #[test]
    fn install_without_packages_is_skipped() {
        let config = LanguageConfig::interpreted("js", "node", "js", "node")
            .with_install("npm install", Vec::<String>::new());
        assert_eq!(config.install_line(), None);
    }

    #[test]
    fn compiled_language_lines() {
        let registry = LanguageRegistry::builtin();

        let c = registry.resolve("c").unwrap();
        assert_eq!(c.source_file_name("id"), "id.c");
        assert_eq!(c.compile_line("id").as_deref(), Some("gcc -o id.out id.c"));
        assert_eq!(c.run_line("id"), "./id.out");
        assert_eq!(c.expected_outputs("id"), vec!["id.out".to_owned()]);

        let java = registry.resolve("java").unwrap();
        assert_eq!(java.compile_line("id").as_deref(), Some("javac id.java"));
        assert_eq!(java.run_line("id"), "java -cp . id");
    }

    #[test]
    fn compile_pairing_is_enforced() {
        let mut config = LanguageConfig::interpreted("c", "gcc", "out", "./a.out");
        config.compile_command = Some("gcc".into());
        assert!(matches!(config.validate(), Err(ReslError::Registry(_))));

        config.compile_command = None;
        config.compile_extension = Some("c".into());
        assert!(matches!(config.validate(), Err(ReslError::Registry(_))));
    }

    #[test]
    fn missing_run_path_is_rejected() {
        let config = LanguageConfig::interpreted("py", "python", "py", "").without_run_command();
        assert!(config.validate().is_err());

        let config = LanguageConfig::interpreted("py", "python", "py", "  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_table_uses_original_field_names() {
        let json = r#"{
            "py": { "image": "python:3-alpine", "fileExtension": "py", "runCmd": "python" },
            "c": {
                "image": "gcc:13",
                "fileExtension": "out",
                "compileExtension": "c",
                "compileCmd": "gcc -o {name}.out {file}",
                "outputExtensions": ["out"],
                "template": "c_main"
            }
        }"#;
        let registry = LanguageRegistry::from_json_str(json).unwrap();
        assert_eq!(registry.keys().collect::<Vec<_>>(), vec!["c", "py"]);

        let py = registry.resolve("py").unwrap();
        assert_eq!(py.key, "py");
        assert_eq!(py.run_line("x"), "python x.py");

        let c = registry.resolve("c").unwrap();
        assert_eq!(c.template, Some(Template::CMain));
        assert_eq!(c.run_line("x"), "./x.out");
    }

    #[test]
    fn unknown_template_fails_to_load() {
        let json = r#"{
            "py": {
                "image": "p",
                "fileExtension": "py",
                "runCmd": "python",
                "template": "cobol_main"
            }
        }"#;
        assert!(matches!(
            LanguageRegistry::from_json_str(json),
            Err(ReslError::Json(_))
        ));
    }

    #[test]
    fn images_are_deduplicated() {
        let registry = LanguageRegistry::builtin();
        let images = registry.images();
        assert_eq!(images.iter().filter(|i| **i == "gcc:13").count(), 1);
    }
}
