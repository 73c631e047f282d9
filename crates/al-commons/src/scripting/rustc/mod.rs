//! Compiler for Rust script files.
//!
//! All scripts of one compilation are built into a single crate, emitted both
//! as a `cdylib` to load and as an `rlib` for child contexts to link against.
//! Each script becomes a module of a generated wrapper crate, re-exported
//! under its class name, and every exported function gets an `extern "C"`
//! entry point that the class files reference. A child compilation sees the
//! crate of its nearest compiled ancestor as `parent`.

mod scanner;
mod toolchain;

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;

pub use toolchain::{Toolchain, dylib_file_name};

use crate::error::{Error, Result};
use crate::instrument::LoaderKind;

use super::abi::{GUEST_PRELUDE, STATUS_BAD_ARGS, STATUS_OK, STATUS_PANICKED};
use super::class::{CallbackAnnotation, CallbackScope, ClassFile, DylibSymbols, MethodInfo, SymbolTable};
use super::class_loader::{ScriptClassLoader, ScriptCrate};
use super::compiler::{self, CompilationResult, CompiledClass, ScriptCompiler, class_name_of_file};
use scanner::{Param, ScannedMethod, ScannedScript};

/// Extern name of the parent context's crate inside child scripts.
pub const PARENT_CRATE: &str = "parent";

/// Build settings of the rustc compiler.
#[derive(Debug, Clone)]
pub struct RustcConfig {
    /// Each compilation builds in a fresh subdirectory of this one.
    pub build_dir: PathBuf,
    pub opt_level: u8,
    pub debug_info: bool,
    pub extra_rustc_flags: Vec<String>,
}

impl Default for RustcConfig {
    fn default() -> Self {
        Self {
            build_dir: std::env::temp_dir().join("al-scripts"),
            opt_level: 0,
            debug_info: false,
            extra_rustc_flags: Vec::new(),
        }
    }
}

pub struct RustcCompiler {
    config: RustcConfig,
    toolchain: Toolchain,
    parent: Option<Arc<ScriptClassLoader>>,
    libraries: Vec<PathBuf>,
}

impl RustcCompiler {
    pub fn new() -> Result<Self> {
        Self::with_config(RustcConfig::default())
    }

    pub fn with_config(config: RustcConfig) -> Result<Self> {
        Ok(Self::with_toolchain(config, Toolchain::detect()?))
    }

    pub fn with_toolchain(config: RustcConfig, toolchain: Toolchain) -> Self {
        Self {
            config,
            toolchain,
            parent: None,
            libraries: Vec::new(),
        }
    }

    fn compile_scripts(&self, scripts: &[(String, String)]) -> Result<CompilationResult> {
        if scripts.is_empty() {
            return compiler::link(
                LoaderKind::Script,
                self.parent.clone(),
                &self.libraries,
                Vec::new(),
            );
        }

        let scanned = scripts
            .iter()
            .map(|(name, source)| scanner::scan(name, source))
            .collect::<Result<Vec<_>>>()?;
        let names: Vec<&str> = scripts.iter().map(|(name, _)| name.as_str()).collect();

        let crate_name = format!("al_scripts_{}", uuid::Uuid::new_v4().simple());
        let start = Instant::now();
        let wrapper = generate_wrapper(&crate_name, &names, &scanned);
        let built = self.build(&crate_name, &wrapper, scripts)?;
        tracing::info!(
            "Compiled {} scripts in {}ms",
            scripts.len(),
            start.elapsed().as_millis()
        );

        let symbols: Arc<dyn SymbolTable> = Arc::new(DylibSymbols::open(&built.dylib)?);
        let classes = names
            .iter()
            .zip(&scanned)
            .enumerate()
            .map(|(index, (name, script))| {
                let file = class_file(&crate_name, index, name, script);
                Ok(CompiledClass {
                    name: name.to_string(),
                    bytes: file.to_bytes()?,
                    symbols: symbols.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let result = compiler::link(LoaderKind::Script, self.parent.clone(), &self.libraries, classes)?;
        result.loader().set_script_crate(built.script_crate);
        Ok(result)
    }

    /// Write the wrapper crate and run rustc on it.
    fn build(&self, crate_name: &str, wrapper: &str, scripts: &[(String, String)]) -> Result<Built> {
        let build_dir = self
            .config
            .build_dir
            .join(uuid::Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&build_dir)?;

        let src_file = build_dir.join("scripts.rs");
        fs::write(&src_file, wrapper)?;

        let parent = self.parent.as_ref().and_then(|p| p.nearest_script_crate());
        let mut cmd = Command::new(self.toolchain.rustc_path());
        cmd.arg(&src_file)
            .arg("--crate-type=cdylib")
            .arg("--crate-type=rlib")
            .arg(format!("--crate-name={}", crate_name))
            .arg("--edition=2021")
            .arg("--out-dir")
            .arg(&build_dir)
            .arg(format!("-Copt-level={}", self.config.opt_level))
            .args(link_args(parent.as_ref()));
        if self.config.debug_info {
            cmd.arg("-g");
        }
        for flag in &self.config.extra_rustc_flags {
            cmd.arg(flag);
        }

        let output = cmd
            .output()
            .map_err(|e| Error::Toolchain(format!("Failed to run rustc: {}", e)))?;
        if !output.status.success() {
            let class = match scripts {
                [(name, _)] => Some(name.clone()),
                _ => None,
            };
            return Err(Error::Compilation {
                class,
                message: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let mut search_dirs = vec![build_dir.clone()];
        if let Some(parent) = parent {
            search_dirs.extend(parent.search_dirs);
        }
        Ok(Built {
            dylib: build_dir.join(dylib_file_name(crate_name)),
            script_crate: ScriptCrate {
                name: crate_name.to_string(),
                rlib: build_dir.join(format!("lib{}.rlib", crate_name)),
                search_dirs,
            },
        })
    }
}

/// Outputs of one rustc run.
struct Built {
    dylib: PathBuf,
    script_crate: ScriptCrate,
}

/// rustc arguments linking the parent crate and everything it links.
fn link_args(parent: Option<&ScriptCrate>) -> Vec<String> {
    let Some(parent) = parent else {
        return Vec::new();
    };
    let mut args = vec![
        "--extern".to_string(),
        format!("{}={}", PARENT_CRATE, parent.rlib.display()),
    ];
    for dir in &parent.search_dirs {
        args.push("-L".to_string());
        args.push(format!("dependency={}", dir.display()));
    }
    args
}

fn hook_symbol(crate_name: &str, index: usize, function: &str) -> String {
    format!("__{}_{}_{}", crate_name, index, function)
}

fn method_symbol(crate_name: &str, index: usize, function: &str) -> String {
    format!("__{}_{}_m_{}", crate_name, index, function)
}

/// Generate the wrapper crate of a compilation.
fn generate_wrapper(crate_name: &str, names: &[&str], scripts: &[ScannedScript]) -> String {
    let mut code = String::new();
    code.push_str("// Generated script library\n");
    code.push_str("#![allow(dead_code, unused_imports, unused_variables)]\n\n");
    code.push_str(GUEST_PRELUDE);
    code.push('\n');

    for (index, script) in scripts.iter().enumerate() {
        code.push_str(&format!("pub mod __script_{} {{\n", index));
        code.push_str(&script.code);
        code.push_str("\n}\n\n");

        for function in script.hooks() {
            code.push_str(&hook_entry(crate_name, index, function));
        }
        for method in &script.methods {
            code.push_str(&method_entry(crate_name, index, method));
        }
    }

    code.push_str(&class_modules(names));
    code
}

fn hook_entry(crate_name: &str, index: usize, function: &str) -> String {
    let mut code = String::new();
    code.push_str("#[no_mangle]\n");
    code.push_str(&format!(
        "pub extern \"C\" fn {}() {{\n",
        hook_symbol(crate_name, index, function)
    ));
    code.push_str(&format!(
        "    if std::panic::catch_unwind(|| __script_{}::{}()).is_err() {{\n",
        index, function
    ));
    code.push_str(&format!(
        "        eprintln!(\"script function {} panicked\");\n",
        function
    ));
    code.push_str("    }\n");
    code.push_str("}\n\n");
    code
}

/// Entry point decoding the arguments, calling the function inside
/// `catch_unwind` and writing the encoded result.
fn method_entry(crate_name: &str, index: usize, method: &ScannedMethod) -> String {
    let args: Vec<String> = method
        .params
        .iter()
        .enumerate()
        .map(|(i, param)| match param {
            Param::Value(ty) => format!("<{} as __al_abi::Decode>::decode(fields[{}])?", ty, i),
            Param::Str => format!("&<String as __al_abi::Decode>::decode(fields[{}])?", i),
        })
        .collect();

    let mut code = String::new();
    code.push_str("#[no_mangle]\n");
    code.push_str(&format!(
        "pub unsafe extern \"C\" fn {}(\n",
        method_symbol(crate_name, index, &method.name)
    ));
    code.push_str("    args_ptr: *const u8,\n");
    code.push_str("    args_len: usize,\n");
    code.push_str("    sink: *mut std::ffi::c_void,\n");
    code.push_str("    write: __al_abi::Write,\n");
    code.push_str(") -> i32 {\n");
    code.push_str("    let bytes = std::slice::from_raw_parts(args_ptr, args_len);\n");
    code.push_str("    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {\n");
    code.push_str("        let fields = __al_abi::split(bytes)?;\n");
    code.push_str(&format!(
        "        if fields.len() != {} {{\n            return None;\n        }}\n",
        method.params.len()
    ));
    code.push_str(&format!(
        "        Some(__al_abi::Encode::encode(__script_{}::{}({})))\n",
        index,
        method.name,
        args.join(", ")
    ));
    code.push_str("    }));\n");
    code.push_str("    match result {\n");
    code.push_str("        Ok(Some(output)) => {\n");
    code.push_str("            write(sink, output.as_ptr(), output.len());\n");
    code.push_str(&format!("            {}\n", STATUS_OK));
    code.push_str("        }\n");
    code.push_str(&format!("        Ok(None) => {},\n", STATUS_BAD_ARGS));
    code.push_str(&format!(
        "        Err(_) => {{\n            eprintln!(\"script function {} panicked\");\n            {}\n        }}\n",
        method.name, STATUS_PANICKED
    ));
    code.push_str("    }\n");
    code.push_str("}\n\n");
    code
}

/// Re-export every script module under its class name, `quest.Q1000` as
/// `quest::Q1000`, so child scripts can write `parent::quest::Q1000::f()`.
fn class_modules(names: &[&str]) -> String {
    #[derive(Default)]
    struct Package {
        classes: Vec<(String, usize)>,
        packages: BTreeMap<String, Package>,
    }

    fn render(package: &Package, depth: usize, code: &mut String) {
        let indent = "    ".repeat(depth);
        for (class, index) in &package.classes {
            code.push_str(&format!(
                "{}pub use crate::__script_{} as {};\n",
                indent, index, class
            ));
        }
        for (name, child) in &package.packages {
            code.push_str(&format!("{}pub mod {} {{\n", indent, name));
            render(child, depth + 1, code);
            code.push_str(&format!("{}}}\n", indent));
        }
    }

    let mut root = Package::default();
    for (index, name) in names.iter().enumerate() {
        let segments: Vec<&str> = name.split('.').collect();
        if !segments.iter().all(|s| syn::parse_str::<syn::Ident>(s).is_ok()) {
            tracing::debug!("{} is not a Rust path, not re-exported", name);
            continue;
        }
        let Some((class, packages)) = segments.split_last() else {
            continue;
        };
        let mut package = &mut root;
        for segment in packages {
            package = package.packages.entry(segment.to_string()).or_default();
        }
        package.classes.push((class.to_string(), index));
    }

    let mut code = String::new();
    render(&root, 0, &mut code);
    code
}

/// Class file of a scanned script, referencing the wrapper's entry points.
fn class_file(crate_name: &str, index: usize, name: &str, script: &ScannedScript) -> ClassFile {
    let hooks = |functions: &[String]| -> Vec<String> {
        functions
            .iter()
            .map(|f| hook_symbol(crate_name, index, f))
            .collect()
    };

    ClassFile {
        name: name.to_string(),
        on_load: hooks(&script.on_load),
        on_unload: hooks(&script.on_unload),
        scheduled: script.scheduled.as_ref().map(|(s, _)| s.clone()),
        run: script
            .scheduled
            .as_ref()
            .map(|(_, run)| hook_symbol(crate_name, index, run)),
        methods: script
            .methods
            .iter()
            .map(|method| MethodInfo {
                name: method.name.clone(),
                symbol: Some(method_symbol(crate_name, index, &method.name)),
                is_static: true,
                native: false,
                returns: method.returns,
                callback: method.listener.as_ref().map(|listener| CallbackAnnotation {
                    listener: listener.clone(),
                    scope: CallbackScope::Global,
                }),
                enhanced: false,
            })
            .collect(),
        fields: Vec::new(),
    }
}

impl ScriptCompiler for RustcCompiler {
    fn set_parent_class_loader(&mut self, parent: Arc<ScriptClassLoader>) {
        self.parent = Some(parent);
    }

    fn set_libraries(&mut self, libraries: &[PathBuf]) {
        self.libraries = libraries.to_vec();
    }

    fn compile_sources(&mut self, names: &[&str], sources: &[&str]) -> Result<CompilationResult> {
        compiler::check_parallel(names, sources)?;
        let scripts: Vec<(String, String)> = names
            .iter()
            .zip(sources)
            .map(|(name, source)| (name.to_string(), source.to_string()))
            .collect();
        self.compile_scripts(&scripts)
    }

    fn compile_files(&mut self, files: &[PathBuf]) -> Result<CompilationResult> {
        let mut scripts: Vec<(String, String)> = Vec::with_capacity(files.len());
        for file in files {
            let name = class_name_of_file(file)?;
            if scripts.iter().any(|(existing, _)| *existing == name) {
                return Err(Error::InvalidInput(format!(
                    "two script files define class {}",
                    name
                )));
            }
            scripts.push((name, fs::read_to_string(file)?));
        }
        self.compile_scripts(&scripts)
    }

    fn supported_source_extensions(&self) -> &[&'static str] {
        &["rs"]
    }
}
