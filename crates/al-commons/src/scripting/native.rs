//! Compiler for class manifests bound to in-process symbols.
//!
//! Sources are TOML class files; their hooks and methods resolve against a
//! [`NativeSymbols`] table filled by the server binary. The manifests are read
//! from script roots at runtime, so classes are defined by a script loader and
//! a bad manifest fails its context instead of the process.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::instrument::LoaderKind;

use super::class::{ClassFile, NativeSymbols, SymbolTable};
use super::class_loader::ScriptClassLoader;
use super::compiler::{
    self, CompilationResult, CompiledClass, ScriptCompiler, class_name_of_file,
};

pub struct NativeScriptCompiler {
    symbols: Arc<NativeSymbols>,
    parent: Option<Arc<ScriptClassLoader>>,
    libraries: Vec<PathBuf>,
}

impl NativeScriptCompiler {
    pub const NAME: &'static str = "native";

    pub fn new(symbols: Arc<NativeSymbols>) -> Self {
        Self {
            symbols,
            parent: None,
            libraries: Vec::new(),
        }
    }

    fn parse(&self, name: &str, source: &str) -> Result<CompiledClass> {
        let mut class: ClassFile = toml::from_str(source).map_err(|e| Error::Compilation {
            class: Some(name.to_string()),
            message: e.to_string(),
        })?;
        if class.name.is_empty() {
            class.name = name.to_string();
        }
        if class.scheduled.is_some() && class.run.is_none() {
            return Err(Error::Compilation {
                class: Some(class.name),
                message: "scheduled class has no run symbol".to_string(),
            });
        }

        let symbols: Arc<dyn SymbolTable> = self.symbols.clone();
        Ok(CompiledClass {
            name: class.name.clone(),
            bytes: class.to_bytes()?,
            symbols,
        })
    }

    fn link(&self, classes: Vec<CompiledClass>) -> Result<CompilationResult> {
        compiler::link(
            LoaderKind::Script,
            self.parent.clone(),
            &self.libraries,
            classes,
        )
    }
}

impl ScriptCompiler for NativeScriptCompiler {
    fn set_parent_class_loader(&mut self, parent: Arc<ScriptClassLoader>) {
        self.parent = Some(parent);
    }

    fn set_libraries(&mut self, libraries: &[PathBuf]) {
        self.libraries = libraries.to_vec();
    }

    fn compile_sources(&mut self, names: &[&str], sources: &[&str]) -> Result<CompilationResult> {
        compiler::check_parallel(names, sources)?;
        let classes = names
            .iter()
            .zip(sources)
            .map(|(name, source)| self.parse(name, source))
            .collect::<Result<Vec<_>>>()?;
        self.link(classes)
    }

    fn compile_files(&mut self, files: &[PathBuf]) -> Result<CompilationResult> {
        let mut classes = Vec::with_capacity(files.len());
        for file in files {
            let source = fs::read_to_string(file)?;
            classes.push(self.parse(&class_name_of_file(file)?, &source)?);
        }
        tracing::debug!("Compiled {} native class manifests", classes.len());
        self.link(classes)
    }

    fn supported_source_extensions(&self) -> &[&'static str] {
        &["toml"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    #[test]
    fn test_compile_sources_names_classes() {
        let symbols = Arc::new(NativeSymbols::new());
        symbols.register_method("hello", |_r: Option<&dyn Any>, _a: &[&dyn Any]| {
            Box::new("hello".to_string()) as Box<dyn Any>
        });
        let mut compiler = NativeScriptCompiler::new(symbols);

        let result = compiler
            .compile_sources(
                &["native.A", "native.B"],
                &[
                    "[[method]]\nname = \"greet\"\nsymbol = \"hello\"\nstatic = true\nreturns = \"object\"\n",
                    "name = \"native.Renamed\"\n",
                ],
            )
            .unwrap();

        let names: Vec<_> = result.classes().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["native.A", "native.Renamed"]);
        assert_eq!(result.loader().kind(), LoaderKind::Script);

        let greeting = result
            .class("native.A")
            .unwrap()
            .invoke("greet", None, &[])
            .unwrap();
        assert_eq!(greeting.downcast_ref::<String>().unwrap(), "hello");
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        let mut compiler = NativeScriptCompiler::new(Arc::new(NativeSymbols::new()));
        let err = compiler.compile_sources(&["a", "b"], &[""]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_scheduled_without_run_is_rejected() {
        let mut compiler = NativeScriptCompiler::new(Arc::new(NativeSymbols::new()));
        let err = compiler
            .compile_class("tasks.Cleanup", "[scheduled]\nvalue = [\"0 * * * * ?\"]\n")
            .unwrap_err();
        assert!(matches!(err, Error::Compilation { .. }));
    }

    #[test]
    fn test_untransformable_manifest_is_returned_as_error() {
        let symbols = Arc::new(NativeSymbols::new());
        symbols.register_method("talk", |_r: Option<&dyn Any>, _a: &[&dyn Any]| {
            Box::new(()) as Box<dyn Any>
        });
        let mut compiler = NativeScriptCompiler::new(symbols);

        let err = compiler
            .compile_class(
                "x.Bad",
                "[[method]]\nname = \"on_talk\"\nsymbol = \"talk\"\nstatic = true\ncallback = { listener = \" \" }\n",
            )
            .unwrap_err();
        assert!(matches!(err, Error::ClassTransform { .. }));
    }
}
