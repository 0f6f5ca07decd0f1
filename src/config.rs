//! Generation configuration: the line-oriented directive file.
//!
//! Grammar (one directive per line, `#` starts a comment line):
//!
//! ```text
//! Assemblies [Whitelist]
//! Assembly <name> [Whitelist]
//! Type <fullName>
//! ExcludeMethod <name>
//! ```
//!
//! Nesting is strictly hierarchical: `Assembly` requires a preceding `Assemblies`,
//! `Type` a preceding `Assembly`, `ExcludeMethod` a preceding `Type`. Violations are
//! parse errors naming the offending line.
//!
//! Semantics: `Assemblies Whitelist` restricts *dependency* generation to assemblies
//! declared here (root assemblies always generate). Under an `Assembly ... Whitelist`,
//! each `Type` directive disables the named type - it is emitted as a placeholder with
//! zero members so cross-module references keep compiling. `ExcludeMethod` skips a
//! single method of the enclosing `Type`.

use std::collections::{HashMap, HashSet};

use crate::{Error, Result};

/// Per-type configuration: the declaring line (for stale-entry diagnostics) and the
/// excluded member set.
#[derive(Debug, Clone)]
pub struct TypeConfig {
    /// 1-based line of the `Type` directive.
    pub line: u32,
    /// Configured full type name.
    pub name: String,
    exclude_methods: HashSet<String>,
}

impl TypeConfig {
    /// `true` if `method` was excluded under this type.
    #[must_use]
    pub fn is_method_excluded(&self, method: &str) -> bool {
        self.exclude_methods.contains(method)
    }

    /// Adds an excluded method; `false` if it was already present.
    fn add_exclude_method(&mut self, name: &str) -> bool {
        self.exclude_methods.insert(name.to_string())
    }
}

/// Per-assembly configuration.
#[derive(Debug, Clone, Default)]
pub struct AssemblyConfig {
    /// `true` when declared with the `Whitelist` argument.
    pub whitelist: bool,
    types: HashMap<String, TypeConfig>,
}

impl AssemblyConfig {
    /// `true` if `full_name` must be emitted as a disabled placeholder.
    #[must_use]
    pub fn is_type_disabled(&self, full_name: &str) -> bool {
        self.whitelist && self.types.contains_key(full_name)
    }

    /// The configuration attached to `full_name`, if any.
    #[must_use]
    pub fn type_config(&self, full_name: &str) -> Option<&TypeConfig> {
        self.types.get(full_name)
    }

    /// All configured types, for stale-entry validation.
    pub fn configured_types(&self) -> impl Iterator<Item = &TypeConfig> {
        self.types.values()
    }
}

/// The parsed configuration for a whole run.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Source file name, used in diagnostics.
    pub file: String,
    /// `true` when `Assemblies Whitelist` was given.
    pub whitelist: bool,
    assemblies: HashMap<String, AssemblyConfig>,
}

impl Config {
    /// An empty open-mode configuration, used when no config file is given.
    #[must_use]
    pub fn open() -> Config {
        Config::default()
    }

    /// Parses the directive file `text` originating from `file`.
    ///
    /// # Errors
    /// Returns [`Error::ConfigParse`] with the file name and line number of the first
    /// offending directive.
    pub fn parse(file: &str, text: &str) -> Result<Config> {
        let mut parser = ConfigParser {
            file,
            line_number: 0,
            config: None,
            current_assembly: None,
            current_type: None,
        };

        for (index, line) in text.lines().enumerate() {
            parser.line_number = index as u32 + 1;
            parser.parse_line(line.trim_end_matches('\r'))?;
        }

        parser.finish()
    }

    /// Per-assembly configuration, if declared.
    #[must_use]
    pub fn assembly(&self, name: &str) -> Option<&AssemblyConfig> {
        self.assemblies.get(name)
    }

    /// Whether a *discovered dependency* assembly should be generated.
    ///
    /// Root assemblies bypass this check; in whitelist mode only declared assemblies
    /// are generated as dependencies.
    #[must_use]
    pub fn is_dependency_enabled(&self, name: &str) -> bool {
        !self.whitelist || self.assemblies.contains_key(name)
    }
}

struct ConfigParser<'a> {
    file: &'a str,
    line_number: u32,
    config: Option<Config>,
    current_assembly: Option<String>,
    current_type: Option<String>,
}

impl ConfigParser<'_> {
    fn parse_line(&mut self, line: &str) -> Result<()> {
        let mut remaining = line;
        let directive = peel(&mut remaining);
        if directive.is_empty() || directive.starts_with('#') {
            return Ok(());
        }

        match directive {
            "Assemblies" => {
                if self.config.is_some() {
                    return Err(self.error("found multiple 'Assemblies' directives"));
                }
                let whitelist = self.parse_whitelist_arg(directive, &mut remaining)?;
                self.enforce_directive_done(directive, remaining)?;
                self.config = Some(Config {
                    file: self.file.to_string(),
                    whitelist,
                    assemblies: HashMap::new(),
                });
            }
            "Assembly" => {
                if self.config.is_none() {
                    return Err(self.error(
                        "directive 'Assembly' must appear after the 'Assemblies' directive",
                    ));
                }
                let name = peel(&mut remaining).to_string();
                if name.is_empty() {
                    return Err(self.error("the 'Assembly' directive requires a name"));
                }
                let whitelist = self.parse_whitelist_arg(directive, &mut remaining)?;
                self.enforce_directive_done(directive, remaining)?;
                if let Some(config) = self.config.as_mut() {
                    let assembly = config.assemblies.entry(name.clone()).or_default();
                    assembly.whitelist = whitelist;
                }
                self.current_type = None;
                self.current_assembly = Some(name);
            }
            "Type" => {
                if self.current_assembly.is_none() {
                    return Err(
                        self.error("directive 'Type' must appear after an 'Assembly' directive")
                    );
                }
                let name = peel(&mut remaining).to_string();
                if name.is_empty() {
                    return Err(self.error("the 'Type' directive requires a name"));
                }
                self.enforce_directive_done(directive, remaining)?;
                let line = self.line_number;
                self.with_current_assembly(|assembly| {
                    assembly.types.insert(
                        name.clone(),
                        TypeConfig {
                            line,
                            name: name.clone(),
                            exclude_methods: HashSet::new(),
                        },
                    );
                });
                self.current_type = Some(name);
            }
            "ExcludeMethod" => {
                let Some(type_name) = self.current_type.clone() else {
                    return Err(self
                        .error("directive 'ExcludeMethod' must appear after a 'Type' directive"));
                };
                let name = peel(&mut remaining).to_string();
                if name.is_empty() {
                    return Err(self.error("the 'ExcludeMethod' directive requires a name"));
                }
                self.enforce_directive_done(directive, remaining)?;
                let mut newly_added = true;
                self.with_current_assembly(|assembly| {
                    if let Some(type_config) = assembly.types.get_mut(&type_name) {
                        newly_added = type_config.add_exclude_method(&name);
                    }
                });
                if !newly_added {
                    return Err(
                        self.error(&format!("method '{name}' has already been excluded"))
                    );
                }
            }
            unknown => {
                return Err(self.error(&format!("Unknown directive '{unknown}'")));
            }
        }

        Ok(())
    }

    fn finish(self) -> Result<Config> {
        match self.config {
            Some(config) => Ok(config),
            None => Err(Error::ConfigParse {
                file: self.file.to_string(),
                line: self.line_number,
                message: "missing the 'Assemblies' directive".to_string(),
            }),
        }
    }

    fn parse_whitelist_arg(&self, directive: &str, remaining: &mut &str) -> Result<bool> {
        let optional_arg = peel(remaining);
        if optional_arg.is_empty() {
            Ok(false)
        } else if optional_arg == "Whitelist" {
            Ok(true)
        } else {
            Err(self.error(&format!(
                "invalid argument '{optional_arg}' for '{directive}' directive, expected 'Whitelist' or nothing"
            )))
        }
    }

    fn enforce_directive_done(&self, directive: &str, mut remaining: &str) -> Result<()> {
        let more = peel(&mut remaining);
        if more.is_empty() {
            Ok(())
        } else {
            Err(self.error(&format!(
                "too many arguments for the '{directive}' directive, extra is: {more}"
            )))
        }
    }

    fn with_current_assembly(&mut self, apply: impl FnOnce(&mut AssemblyConfig)) {
        if let (Some(config), Some(assembly_name)) =
            (self.config.as_mut(), self.current_assembly.as_ref())
        {
            if let Some(assembly) = config.assemblies.get_mut(assembly_name) {
                apply(assembly);
            }
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::ConfigParse {
            file: self.file.to_string(),
            line: self.line_number,
            message: message.to_string(),
        }
    }
}

/// Splits the next space-delimited word off the front of `line`.
fn peel<'a>(line: &mut &'a str) -> &'a str {
    let trimmed = line.trim_start_matches(' ');
    match trimmed.find(' ') {
        Some(end) => {
            let word = &trimmed[..end];
            *line = &trimmed[end..];
            word
        }
        None => {
            let word = trimmed;
            *line = "";
            word
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_hierarchy() {
        let text = "# bindings config\nAssemblies Whitelist\nAssembly AcmeLib Whitelist\nType Acme.Season\nExcludeMethod Reset\n";
        let config = Config::parse("test.cfg", text).unwrap();
        assert!(config.whitelist);

        let assembly = config.assembly("AcmeLib").unwrap();
        assert!(assembly.whitelist);
        assert!(assembly.is_type_disabled("Acme.Season"));
        assert!(!assembly.is_type_disabled("Acme.Weather"));
        assert!(assembly
            .type_config("Acme.Season")
            .unwrap()
            .is_method_excluded("Reset"));
    }

    #[test]
    fn dependency_gating() {
        let open = Config::parse("t", "Assemblies\n").unwrap();
        assert!(open.is_dependency_enabled("Anything"));

        let gated = Config::parse("t", "Assemblies Whitelist\nAssembly AcmeLib\n").unwrap();
        assert!(gated.is_dependency_enabled("AcmeLib"));
        assert!(!gated.is_dependency_enabled("Other"));
    }

    #[test]
    fn rejects_out_of_order_directives() {
        let err = Config::parse("t.cfg", "Assemblies\nType Acme.Season\n").unwrap_err();
        match err {
            Error::ConfigParse { file, line, message } => {
                assert_eq!(file, "t.cfg");
                assert_eq!(line, 2);
                assert!(message.contains("'Type'"));
            }
            other => panic!("unexpected error {other}"),
        }

        assert!(Config::parse("t.cfg", "Assembly AcmeLib\n").is_err());
        assert!(Config::parse("t.cfg", "Assemblies\nAssembly A\nExcludeMethod M\n").is_err());
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(Config::parse("t", "Assemblies Blacklist\n").is_err());
        assert!(Config::parse("t", "Assemblies\nAssembly\n").is_err());
        assert!(Config::parse("t", "Assemblies Whitelist extra\n").is_err());
        assert!(Config::parse("t", "Assemblies\nNonsense x\n").is_err());
    }

    #[test]
    fn duplicate_exclude_method_is_an_error() {
        let text = "Assemblies\nAssembly A\nType T\nExcludeMethod M\nExcludeMethod M\n";
        let err = Config::parse("t.cfg", text).unwrap_err();
        match err {
            Error::ConfigParse { line, message, .. } => {
                assert_eq!(line, 5);
                assert!(message.contains("already been excluded"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn missing_assemblies_directive() {
        assert!(Config::parse("t.cfg", "# nothing here\n").is_err());
    }
}
