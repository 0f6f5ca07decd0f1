//! The generation session: assembly registry and incremental build control.
//!
//! A session owns all cross-assembly state of one run. Assemblies move through a
//! monotonic `Initial -> Generating -> Generated` state machine, enforced as an
//! internal invariant; dependency assemblies discovered while mapping types are
//! registered `Initial` and picked up by the fixed-point loop. Each assembly's output
//! is produced in a staging directory and all staging directories are renamed over
//! the final outputs only once the whole batch has succeeded, so a failing run leaves
//! every published tree exactly as it was.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

use sha1::{Digest, Sha1};

use crate::{
    codegen::{
        self,
        typemap::{ResolvedType, TypeResolver},
    },
    config::Config,
    file::File,
    metadata::{
        descriptor::{AssemblyGraph, TypeName},
        loader,
    },
    Error, Result,
};

/// Name of the content-hash marker file inside each generated package.
const HASH_MARKER: &str = "assembly.sha1";

/// Generation state of one assembly. Transitions are monotonic and never revisited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenState {
    /// Registered, not yet generated.
    Initial,
    /// Generation in progress.
    Generating,
    /// Generation finished (or skipped via the hash gate).
    Generated,
}

struct AssemblyEntry {
    package: String,
    hash: String,
    state: GenState,
    graph: Rc<AssemblyGraph>,
    is_root: bool,
}

struct Staged {
    temp_dir: PathBuf,
    final_dir: PathBuf,
}

/// Options controlling a generation run.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Process only explicitly requested assemblies, not discovered dependencies.
    pub shallow: bool,
    /// Regenerate even when the content hash matches the previous run.
    pub force: bool,
    /// Directories searched when resolving logical assembly names.
    pub search_dirs: Vec<PathBuf>,
}

/// One generation run over a root assembly set and its discovered dependencies.
pub struct Session {
    config: Config,
    output_dir: PathBuf,
    options: SessionOptions,
    assemblies: BTreeMap<String, AssemblyEntry>,
    /// Registration order; the fixed-point scan picks the first eligible entry.
    order: Vec<String>,
    /// Logical names that failed resolution, to avoid repeated probing.
    unresolvable: HashSet<String>,
    staged: Vec<Staged>,
}

impl Session {
    /// Creates a session writing under `output_dir`.
    #[must_use]
    pub fn new(config: Config, output_dir: &Path, options: SessionOptions) -> Session {
        Session {
            config,
            output_dir: output_dir.to_path_buf(),
            options,
            assemblies: BTreeMap::new(),
            order: Vec::new(),
            unresolvable: HashSet::new(),
            staged: Vec::new(),
        }
    }

    /// Registers a root assembly from a file path or logical name.
    ///
    /// # Errors
    /// Returns [`Error::AssemblyNotFound`] if the reference cannot be resolved, or a
    /// loading error for an unreadable image.
    pub fn add_root(&mut self, reference: &str) -> Result<()> {
        let path = self.resolve_reference(reference)?;
        let name = self.load_assembly(&path, reference)?;
        if let Some(entry) = self.assemblies.get_mut(&name) {
            entry.is_root = true;
        }
        Ok(())
    }

    /// Registers an already-built graph (programmatic and test entry point).
    ///
    /// The graph's name fields are prepared here, exactly as for loaded binaries.
    pub fn register(&mut self, mut graph: AssemblyGraph, source_hash: &str, is_root: bool) {
        let package = codegen::ident::package_name(&graph.name);
        codegen::prepare_graph(&mut graph, &package);

        let name = graph.name.clone();
        if self.assemblies.contains_key(&name) {
            return;
        }
        self.assemblies.insert(
            name.clone(),
            AssemblyEntry {
                package,
                hash: source_hash.to_string(),
                state: GenState::Initial,
                graph: Rc::new(graph),
                is_root,
            },
        );
        self.order.push(name);
    }

    /// The generation state of `name`, if registered.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<GenState> {
        self.assemblies.get(name).map(|entry| entry.state)
    }

    /// Runs generation to its fixed point and publishes the batch.
    ///
    /// # Errors
    /// Any fatal error discards all staged output and leaves published trees
    /// untouched.
    pub fn run(&mut self) -> Result<()> {
        match self.generate_all() {
            Ok(()) => self.commit(),
            Err(error) => {
                self.discard();
                Err(error)
            }
        }
    }

    /// Generates every eligible assembly until a scan finds nothing left `Initial`.
    fn generate_all(&mut self) -> Result<()> {
        while let Some(name) = self.next_pending() {
            self.generate_one(&name)?;
        }
        Ok(())
    }

    fn next_pending(&self) -> Option<String> {
        self.order
            .iter()
            .find(|name| {
                let Some(entry) = self.assemblies.get(*name) else {
                    return false;
                };
                if entry.state != GenState::Initial {
                    return false;
                }
                if entry.is_root {
                    return true;
                }
                !self.options.shallow && self.config.is_dependency_enabled(name)
            })
            .cloned()
    }

    fn generate_one(&mut self, name: &str) -> Result<()> {
        let (package, graph, hash) = {
            let entry = self
                .assemblies
                .get_mut(name)
                .ok_or_else(|| Error::Invariant(format!("assembly '{name}' not registered")))?;
            match entry.state {
                GenState::Initial => entry.state = GenState::Generating,
                state => {
                    return Err(Error::Invariant(format!(
                        "assembly '{name}' generation re-entered from state {state:?}"
                    )))
                }
            }
            (entry.package.clone(), entry.graph.clone(), entry.hash.clone())
        };

        let final_dir = self.output_dir.join(&package);
        if !self.options.force && self.recorded_hash(&final_dir).as_deref() == Some(hash.as_str())
        {
            tracing::info!("assembly '{name}' is up to date, skipping");
            self.mark_generated(name)?;
            return Ok(());
        }

        tracing::info!("generating assembly '{name}' into package '{package}'");
        let config = self.config.clone();
        let tree = {
            let mut resolver = SessionResolver {
                session: &mut *self,
                current: graph.clone(),
            };
            codegen::generate_assembly(&graph, &package, &config, &mut resolver)?
        };

        let temp_dir = self.output_dir.join(format!(".{package}.staging"));
        if temp_dir.exists() {
            fs::remove_dir_all(&temp_dir)?;
        }
        fs::create_dir_all(&temp_dir)?;
        for (relative, content) in &tree.files {
            let path = temp_dir.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content)?;
        }
        fs::write(temp_dir.join(HASH_MARKER), format!("{hash}\n"))?;

        self.staged.push(Staged {
            temp_dir,
            final_dir,
        });
        self.mark_generated(name)
    }

    fn mark_generated(&mut self, name: &str) -> Result<()> {
        let entry = self
            .assemblies
            .get_mut(name)
            .ok_or_else(|| Error::Invariant(format!("assembly '{name}' not registered")))?;
        match entry.state {
            GenState::Generating => {
                entry.state = GenState::Generated;
                Ok(())
            }
            state => Err(Error::Invariant(format!(
                "assembly '{name}' finished from state {state:?}"
            ))),
        }
    }

    /// The hash recorded by a previous run for this output location, if any.
    fn recorded_hash(&self, final_dir: &Path) -> Option<String> {
        let content = fs::read_to_string(final_dir.join(HASH_MARKER)).ok()?;
        Some(content.trim().to_string())
    }

    /// Publishes every staged directory; deferred to the end of the batch so a
    /// partial failure cannot mix fresh and stale outputs.
    fn commit(&mut self) -> Result<()> {
        for staged in self.staged.drain(..) {
            if staged.final_dir.exists() {
                fs::remove_dir_all(&staged.final_dir)?;
            }
            if let Some(parent) = staged.final_dir.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&staged.temp_dir, &staged.final_dir)?;
        }
        Ok(())
    }

    /// Removes all staged directories without touching published output.
    fn discard(&mut self) {
        for staged in self.staged.drain(..) {
            if let Err(error) = fs::remove_dir_all(&staged.temp_dir) {
                tracing::warn!(
                    "failed to remove staging directory {}: {error}",
                    staged.temp_dir.display()
                );
            }
        }
    }

    /// Resolves an assembly reference: an existing file path wins, otherwise the
    /// search directories are probed for `<name>.dll` / `<name>.exe`.
    fn resolve_reference(&self, reference: &str) -> Result<PathBuf> {
        let as_path = Path::new(reference);
        if as_path.is_file() {
            return Ok(as_path.to_path_buf());
        }

        for dir in &self.options.search_dirs {
            for extension in ["dll", "exe"] {
                let candidate = dir.join(format!("{reference}.{extension}"));
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }

        Err(Error::AssemblyNotFound(reference.to_string()))
    }

    /// Loads, hashes and registers the assembly at `path`; returns its simple name.
    fn load_assembly(&mut self, path: &Path, reference: &str) -> Result<String> {
        let file = File::from_file(path)?;

        let mut hasher = Sha1::new();
        hasher.update(file.data());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect();

        let fallback = Path::new(reference)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(reference);
        let graph = loader::load_graph(&file, fallback)?;
        let name = graph.name.clone();

        if !self.assemblies.contains_key(&name) {
            tracing::debug!("loaded assembly '{name}' from {}", path.display());
            self.register(graph, &hash, false);
        }
        Ok(name)
    }

    /// Ensures the assembly named `name` is loaded, resolving it through the search
    /// directories. Returns `false` when it cannot be located.
    fn ensure_loaded(&mut self, name: &str) -> bool {
        if self.assemblies.contains_key(name) {
            return true;
        }
        if self.unresolvable.contains(name) {
            return false;
        }

        match self.resolve_reference(name) {
            Ok(path) => match self.load_assembly(&path, name) {
                Ok(_) => true,
                Err(error) => {
                    tracing::warn!("failed to load dependency '{name}': {error}");
                    self.unresolvable.insert(name.to_string());
                    false
                }
            },
            Err(_) => {
                self.unresolvable.insert(name.to_string());
                false
            }
        }
    }
}

/// Resolves named type references against the session registry, loading dependency
/// assemblies on demand (which is what feeds the driver's fixed-point loop).
struct SessionResolver<'a> {
    session: &'a mut Session,
    current: Rc<AssemblyGraph>,
}

impl TypeResolver for SessionResolver<'_> {
    fn resolve(&mut self, name: &TypeName) -> Option<ResolvedType> {
        let graph: &AssemblyGraph = match &name.assembly {
            None => &self.current,
            Some(assembly) => {
                if !self.session.ensure_loaded(assembly) {
                    return None;
                }
                &self.session.assemblies.get(assembly)?.graph
            }
        };

        let id = graph.find(&name.full_name())?;
        let desc = graph.ty(id);
        Some(ResolvedType {
            kind: desc.kind,
            is_generic: !desc.generic_params.is_empty(),
            assembly: graph.name.clone(),
            full_name: desc.full_name.clone(),
            module_name: desc.module_name.clone(),
            qualified_name: desc.qualified_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::descriptor::{GraphBuilder, TypeDesc, TypeKind};

    fn graph(name: &str) -> AssemblyGraph {
        let mut builder = GraphBuilder::new(name);
        builder.add_type(TypeDesc::new(TypeKind::Class, "Acme", "Widget"));
        builder.finish().unwrap()
    }

    #[test]
    fn register_is_idempotent_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(Config::open(), dir.path(), SessionOptions::default());
        session.register(graph("B"), "h1", true);
        session.register(graph("A"), "h2", true);
        session.register(graph("B"), "h3", true);

        assert_eq!(session.order, vec!["B".to_string(), "A".to_string()]);
        assert_eq!(session.assemblies.get("B").unwrap().hash, "h1");
    }

    #[test]
    fn states_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(Config::open(), dir.path(), SessionOptions::default());
        session.register(graph("A"), "hash", true);
        assert_eq!(session.state("A"), Some(GenState::Initial));

        session.generate_one("A").unwrap();
        assert_eq!(session.state("A"), Some(GenState::Generated));

        // Re-entering generation from Generated is a programming fault
        let error = session.generate_one("A").unwrap_err();
        assert!(matches!(error, Error::Invariant(_)));
    }

    #[test]
    fn run_publishes_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");
        let mut session = Session::new(Config::open(), &output, SessionOptions::default());
        session.register(graph("AcmeLib"), "hash-1", true);
        session.run().unwrap();

        let package_dir = output.join("AcmeLib");
        assert!(package_dir.join("assembly.sha1").is_file());
        assert!(package_dir.join("all.d").is_file());
        assert!(package_dir.join("Acme").join("package.d").is_file());
        // No staging leftovers
        assert!(!output.join(".AcmeLib.staging").exists());
    }

    #[test]
    fn dependency_gating_and_shallow_mode() {
        let dir = tempfile::tempdir().unwrap();

        // Open mode: discovered dependencies generate too
        let output = dir.path().join("open");
        let mut session = Session::new(Config::open(), &output, SessionOptions::default());
        session.register(graph("Root"), "h-root", true);
        session.register(graph("Dep"), "h-dep", false);
        session.run().unwrap();
        assert!(output.join("Root").join("all.d").is_file());
        assert!(output.join("Dep").join("all.d").is_file());

        // Whitelist mode: undeclared dependencies stay Initial; roots always generate
        let config = Config::parse("t.cfg", "Assemblies Whitelist\n").unwrap();
        let output = dir.path().join("gated");
        let mut session = Session::new(config, &output, SessionOptions::default());
        session.register(graph("Root"), "h-root", true);
        session.register(graph("Dep"), "h-dep", false);
        session.run().unwrap();
        assert!(output.join("Root").join("all.d").is_file());
        assert!(!output.join("Dep").exists());
        assert_eq!(session.state("Dep"), Some(GenState::Initial));

        // Shallow: dependencies stay untouched even in open mode
        let output = dir.path().join("shallow");
        let mut session = Session::new(
            Config::open(),
            &output,
            SessionOptions {
                shallow: true,
                ..SessionOptions::default()
            },
        );
        session.register(graph("Root"), "h-root", true);
        session.register(graph("Dep"), "h-dep", false);
        session.run().unwrap();
        assert!(!output.join("Dep").exists());
    }

    #[test]
    fn hash_gate_skips_unchanged_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");

        let mut session = Session::new(Config::open(), &output, SessionOptions::default());
        session.register(graph("AcmeLib"), "hash-1", true);
        session.run().unwrap();
        let module = output.join("AcmeLib").join("Acme").join("package.d");
        let first = fs::read_to_string(&module).unwrap();
        let first_mtime = fs::metadata(&module).unwrap().modified().unwrap();

        // Same hash: nothing regenerated, file untouched
        let mut session = Session::new(Config::open(), &output, SessionOptions::default());
        session.register(graph("AcmeLib"), "hash-1", true);
        session.run().unwrap();
        assert_eq!(fs::metadata(&module).unwrap().modified().unwrap(), first_mtime);

        // Changed hash: regenerated, content still deterministic
        let mut session = Session::new(Config::open(), &output, SessionOptions::default());
        session.register(graph("AcmeLib"), "hash-2", true);
        session.run().unwrap();
        assert_eq!(fs::read_to_string(&module).unwrap(), first);
        assert_eq!(
            fs::read_to_string(output.join("AcmeLib").join("assembly.sha1")).unwrap(),
            "hash-2\n"
        );
    }

    #[test]
    fn failed_runs_leave_published_output_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");

        let mut session = Session::new(Config::open(), &output, SessionOptions::default());
        session.register(graph("AcmeLib"), "hash-1", true);
        session.run().unwrap();
        let module = output.join("AcmeLib").join("Acme").join("package.d");
        let published = fs::read_to_string(&module).unwrap();

        // Second batch: the good assembly regenerates, then a case collision in the
        // second assembly fails the whole run
        let mut bad = GraphBuilder::new("BadLib");
        bad.add_type(TypeDesc::new(TypeKind::Class, "Foo.Bar", "A"));
        bad.add_type(TypeDesc::new(TypeKind::Class, "foo.bar", "B"));
        let bad = bad.finish().unwrap();

        let mut session = Session::new(
            Config::open(),
            &output,
            SessionOptions {
                force: true,
                ..SessionOptions::default()
            },
        );
        session.register(graph("AcmeLib"), "hash-9", true);
        session.register(bad, "hash-b", true);
        let error = session.run().unwrap_err();
        assert!(matches!(error, Error::NamespaceCaseCollision(_, _)));

        // Published output is exactly as before; no staging dirs remain
        assert_eq!(fs::read_to_string(&module).unwrap(), published);
        assert_eq!(
            fs::read_to_string(output.join("AcmeLib").join("assembly.sha1")).unwrap(),
            "hash-1\n"
        );
        assert!(!output.join(".AcmeLib.staging").exists());
        assert!(!output.join(".BadLib.staging").exists());
        assert!(!output.join("BadLib").exists());
    }
}
