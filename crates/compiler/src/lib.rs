//! Bismut Compiler Library
//!
//! Provides compilation from `.mut` source to C99 and on to executable
//! binaries. The pipeline is a single-threaded chain of owned
//! transformations:
//!
//! ```text
//! preprocess -> lex -> parse -> import resolve -> type check -> C emit
//! ```
//!
//! All stages report into one [`Diagnostics`] sink; emission only runs
//! when the sink holds no errors. The emitted translation unit relies on
//! the `bismut_rt.h` runtime ABI shipped in `<compiler-dir>/runtime`,
//! and the driver links it by invoking the host C compiler (`gcc` by
//! default, `tcc` via `--tcc`).
//!
//! ```rust,ignore
//! use bismutc::{CompilerConfig, Diagnostics};
//!
//! let config = CompilerConfig::new().with_define("FEATURE_X");
//! let mut diags = Diagnostics::new();
//! match bismutc::compile_to_c(path, &config, &mut diags) {
//!     Ok(unit) => std::fs::write("out.c", unit.c_source)?,
//!     Err(_) => diags.print_human(false),
//! }
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod diag;
pub mod lexer;
pub mod mutlib;
pub mod parser;
pub mod preprocess;
pub mod resolver;
pub mod typecheck;
pub mod types;

pub use codegen::CodeGen;
pub use config::CompilerConfig;
pub use diag::{Diagnostic, Diagnostics, Fatal, Pos, Severity};
pub use lexer::Lexer;
pub use mutlib::ExternManifest;
pub use parser::Parser;
pub use resolver::Resolver;
pub use typecheck::{Checked, TypeChecker};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;

/// Result of running the front half of the pipeline plus emission.
pub struct CompiledUnit {
    pub c_source: String,
    /// Manifests of every `extern` library, for compile/link flags
    pub externs: Vec<ExternManifest>,
}

/// Preprocessor symbol set: host platform plus `-D` flags.
fn base_defines(config: &CompilerConfig) -> HashSet<String> {
    let mut defines: HashSet<String> = config.defines.iter().cloned().collect();
    defines.insert(preprocess::host_platform_symbol().to_string());
    defines
}

/// Run preprocess → lex → parse → resolve → typecheck.
///
/// Returns the decorated unit and its extern manifests. The sink may
/// hold errors afterwards (the checker accumulates); callers that want
/// to emit must test [`Diagnostics::has_errors`].
pub fn check_file(
    source_path: &Path,
    config: &CompilerConfig,
    diags: &mut Diagnostics,
) -> Result<(Checked, Vec<ExternManifest>), Fatal> {
    let source = std::fs::read_to_string(source_path).map_err(|e| {
        diags.fatal(
            &Pos::new(Rc::from(source_path.display().to_string()), 0, 0),
            1,
            format!("failed to read {}: {}", source_path.display(), e),
        )
    })?;

    let defines = base_defines(config);
    let file: Rc<str> = Rc::from(source_path.display().to_string());
    let text = preprocess::preprocess(&source, &file, &defines, diags)?;
    let tokens = Lexer::new(&text, file, diags).lex()?;
    let (module, next_id) = Parser::new(tokens, 0, diags).parse_module()?;

    let compiler_dir = config.resolve_compiler_dir();
    let module_dir = compiler_dir.join("modules");
    let module_dir = module_dir.is_dir().then_some(module_dir);
    let resolver = Resolver::new(module_dir, &defines, diags);
    let resolved = resolver.resolve(source_path, module, next_id)?;

    let externs = load_extern_manifests(&resolved.extern_libs, source_path, &compiler_dir, diags)?;
    let checked = TypeChecker::check(resolved.decls, &externs, resolved.next_expr_id, diags);
    Ok((checked, externs))
}

/// Full front end plus C emission. Fails (after reporting) when any
/// diagnostic of error severity was recorded.
pub fn compile_to_c(
    source_path: &Path,
    config: &CompilerConfig,
    diags: &mut Diagnostics,
) -> Result<CompiledUnit, Fatal> {
    let (checked, externs) = check_file(source_path, config, diags)?;
    if diags.has_errors() {
        return Err(Fatal);
    }
    let c_source = CodeGen::new(&checked).emit_program().map_err(|e| {
        diags.fatal(
            &Pos::new(Rc::from(source_path.display().to_string()), 0, 0),
            1,
            format!("internal code generation failure: {}", e),
        )
    })?;
    Ok(CompiledUnit { c_source, externs })
}

/// `extern foo` looks for `foo.mutlib` next to the root source file,
/// then under `<compiler-dir>/externs/foo/`.
fn load_extern_manifests(
    libs: &[(String, Pos)],
    source_path: &Path,
    compiler_dir: &Path,
    diags: &mut Diagnostics,
) -> Result<Vec<ExternManifest>, Fatal> {
    let source_dir = source_path.parent().unwrap_or(Path::new("."));
    let mut manifests = Vec::new();
    for (lib, pos) in libs {
        let candidates = [
            source_dir.join(format!("{}.mutlib", lib)),
            compiler_dir
                .join("externs")
                .join(lib)
                .join(format!("{}.mutlib", lib)),
        ];
        let Some(path) = candidates.iter().find(|p| p.is_file()) else {
            return Err(diags.fatal(
                pos,
                lib.len() as u32,
                format!("cannot find extern library '{}' ({}.mutlib)", lib, lib),
            ));
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            diags.fatal(pos, lib.len() as u32, format!("failed to read {}: {}", path.display(), e))
        })?;
        let dir = path.parent().unwrap_or(Path::new("."));
        let manifest = mutlib::parse_manifest(&text, lib, dir).map_err(|e| {
            diags.fatal(
                pos,
                lib.len() as u32,
                format!("invalid extern manifest {}: {}", path.display(), e),
            )
        })?;
        manifests.push(manifest);
    }
    Ok(manifests)
}

/// Compile a source file to a binary: emit C next to the requested
/// output, then drive the host C compiler with the runtime include path
/// and every extern library's flags.
pub fn build_file(
    source_path: &Path,
    output: &Path,
    config: &CompilerConfig,
    diags: &mut Diagnostics,
) -> Result<(), Fatal> {
    let unit = compile_to_c(source_path, config, diags)?;

    let c_path = output.with_extension("c");
    std::fs::write(&c_path, &unit.c_source).map_err(|e| {
        diags.fatal(
            &Pos::new(Rc::from(c_path.display().to_string()), 0, 0),
            1,
            format!("failed to write {}: {}", c_path.display(), e),
        )
    })?;

    let compiler_dir = config.resolve_compiler_dir();
    let runtime_dir = compiler_dir.join("runtime");

    let mut cmd = Command::new(config.cc_command());
    cmd.arg("-std=c99");
    if config.release {
        cmd.arg("-O2");
    } else {
        cmd.args(["-O0", "-g"]);
        if config.debug_leaks {
            cmd.arg("-DBM_DEBUG_LEAKS");
        }
    }
    cmd.arg("-I").arg(&runtime_dir);
    for manifest in &unit.externs {
        cmd.args(&manifest.cflags);
    }
    cmd.arg(&c_path);
    cmd.arg(runtime_dir.join("bismut_rt.c"));
    cmd.arg("-o").arg(output);
    cmd.arg("-lm");
    for manifest in &unit.externs {
        cmd.args(&manifest.ldflags);
    }

    let pos = Pos::new(Rc::from(source_path.display().to_string()), 0, 0);
    let status = cmd.status().map_err(|e| {
        diags.fatal(
            &pos,
            1,
            format!("failed to run C compiler '{}': {}", config.cc_command(), e),
        )
    })?;
    if !status.success() {
        return Err(diags.fatal(
            &pos,
            1,
            format!(
                "C compiler '{}' failed with status {:?}",
                config.cc_command(),
                status.code()
            ),
        ));
    }
    Ok(())
}

/// Build into a scratch directory and execute; returns the program's
/// exit code. The scratch directory is removed on all paths (RAII).
pub fn run_file(
    source_path: &Path,
    config: &CompilerConfig,
    diags: &mut Diagnostics,
) -> Result<i32, Fatal> {
    let pos = Pos::new(Rc::from(source_path.display().to_string()), 0, 0);
    let scratch = tempfile::tempdir().map_err(|e| {
        diags.fatal(&pos, 1, format!("failed to create scratch directory: {}", e))
    })?;
    let stem = source_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "program".to_string());
    let binary: PathBuf = scratch.path().join(stem);

    build_file(source_path, &binary, config, diags)?;

    let status = Command::new(&binary).status().map_err(|e| {
        diags.fatal(&pos, 1, format!("failed to execute {}: {}", binary.display(), e))
    })?;
    Ok(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn emit(source: &str) -> String {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.mut");
        fs::write(&path, source).unwrap();
        let mut diags = Diagnostics::new();
        let unit = compile_to_c(&path, &CompilerConfig::default(), &mut diags)
            .unwrap_or_else(|_| panic!("compile failed: {:?}", diags.diagnostics()));
        unit.c_source
    }

    fn emit_err(source: &str) -> Vec<String> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.mut");
        fs::write(&path, source).unwrap();
        let mut diags = Diagnostics::new();
        let res = compile_to_c(&path, &CompilerConfig::default(), &mut diags);
        assert!(res.is_err(), "expected failure");
        diags
            .diagnostics()
            .iter()
            .map(|d| d.to_string())
            .collect()
    }

    const FIZZBUZZ: &str = "def main()\n    for i: i64 in range(1, 101)\n        if i % 15 == 0\n            print(\"FizzBuzz\")\n        elif i % 3 == 0\n            print(\"Fizz\")\n        elif i % 5 == 0\n            print(\"Buzz\")\n        else\n            print(i)\n        end\n    end\nend\n\nmain()\n";

    #[test]
    fn test_fizzbuzz_emits() {
        let c = emit(FIZZBUZZ);
        assert!(c.contains("#include \"bismut_rt.h\""));
        assert!(c.contains("static void bm_main(void)"));
        assert!(c.contains("bm_print_str"));
        assert!(c.contains("int main(int argc, char** argv)"));
        assert!(c.contains("bm_toplevel"));
    }

    #[test]
    fn test_deterministic_emission() {
        let a = emit(FIZZBUZZ);
        let b = emit(FIZZBUZZ);
        assert_eq!(a, b);
    }

    #[test]
    fn test_string_interning_dedups() {
        let c = emit("def f()\n    print(\"dup\")\n    print(\"dup\")\nend\nf()\n");
        assert_eq!(c.matches("BM_RC_IMMORTAL").count(), 1);
        assert!(c.contains("bm_strlit_0"));
        assert!(!c.contains("bm_strlit_1"));
    }

    #[test]
    fn test_container_instantiation() {
        let c = emit(
            "def f()\n    xs := List[i64]() { 1, 2 }\n    d := Dict[str, i64]() { \"a\": 1 }\n    n := xs.len()\n    k := d.keys()\nend\nf()\n",
        );
        assert!(c.contains("BM_LIST_IMPL(List_i64, int64_t, BM_NOP, BM_NOP)"));
        assert!(c.contains("BM_DICT_STR_IMPL(Dict_str_i64, int64_t, BM_NOP, BM_NOP)"));
        assert!(c.contains("BM_DICT_STR_KEYS_IMPL(Dict_str_i64, List_str)"));
        // keys() forced the List_str expansion too
        assert!(c.contains("BM_LIST_IMPL(List_str, Str*, BM_RETAIN_OBJ, BM_REL_str)"));
    }

    #[test]
    fn test_interface_vtable_emission() {
        let c = emit(
            "interface IShape\n    def area() -> f64\nend\n\nclass Circle : IShape\n    r: f64\n    def init(r: f64)\n        self.r = r\n    end\n    def area() -> f64\n        return self.r * self.r * 3.14159\n    end\nend\n\ndef f() -> f64\n    s: IShape = Circle(1.0)\n    return s.area()\nend\nf()\n",
        );
        assert!(c.contains("struct bm_IShape_vtbl"));
        assert!(c.contains("struct bm_IShape { Rc rc; void* obj; const bm_IShape_vtbl* vtbl; };"));
        assert!(c.contains("static const bm_IShape_vtbl bm_Circle_IShape_vtbl"));
        assert!(c.contains("bm_IShape_make"));
        assert!(c.contains("bm_IShape_area_dyn"));
        assert!(c.contains("bm_Circle_new"));
        assert!(c.contains("bm_Circle_drop"));
    }

    #[test]
    fn test_monomorphization_emission() {
        let c = emit(
            "def id[T](x: T) -> T\n    return x\nend\n\ndef f()\n    a := id[i64](7)\n    b := id(\"abc\")\n    print(a)\n    print(b)\nend\nf()\n",
        );
        assert!(c.contains("static int64_t bm_id__i64(int64_t x)"));
        assert!(c.contains("static Str* bm_id__str(Str* x)"));
        assert!(c.contains("bm_id__i64(INT64_C(7))"));
    }

    #[test]
    fn test_arc_on_assignment() {
        let c = emit(
            "def f(a: str)\n    s := a\n    s = a + a\nend\nf(\"x\")\n",
        );
        assert!(c.contains("bm_retain"));
        assert!(c.contains("bm_release((void*)(s), bm_str_drop);"));
        assert!(c.contains("bm_str_concat"));
    }

    #[test]
    fn test_tuple_destructure_emission() {
        let c = emit(
            "def pair() -> (i64, str)\n    return (42, \"hi\")\nend\n\na, b := pair()\nprint(a)\nprint(b)\n",
        );
        assert!(c.contains("struct Tup2_i64_str"));
        assert!(c.contains("Tup2_i64_str bm_pair(void)"));
        assert!(c.contains("._0;"));
        assert!(c.contains("._1;"));
    }

    #[test]
    fn test_source_positions_flow_into_c() {
        let c = emit("def f(d: Dict[str, i64]) -> i64\n    return d[\"missing\"]\nend\n");
        assert!(c.contains("BM_POS("));
        assert!(c.contains("main.mut"));
        // the dict subscript sits on line 2
        assert!(c.contains(", 2, "));
    }

    #[test]
    fn test_mixed_width_error_reports_position() {
        let errs = emit_err(
            "def f()\n    x: i32 = 1\n    y: i64 = 2\n    z := x + y\nend\nf()\n",
        );
        assert!(errs[0].contains("main.mut:4:"), "{:?}", errs);
        assert!(errs[0].contains("error"), "{:?}", errs);
    }

    #[test]
    fn test_globals_lifting() {
        let c = emit("answer: i64 = 42\ngreeting := \"hello\" + \"!\"\n\nprint(answer)\n");
        // literal stays a static initializer, runtime init is lifted
        assert!(c.contains("static int64_t bm_answer = INT64_C(42);"));
        assert!(c.contains("static Str* bm_greeting;"));
        assert!(c.contains("static void bm_init_globals(void)"));
        assert!(c.contains("static void bm_exit_globals(void)"));
        assert!(c.contains("bm_release((void*)(bm_greeting), bm_str_drop);"));
    }

    #[test]
    fn test_static_local_lifted_and_released_at_exit() {
        let c = emit(
            "def bump() -> str\n    static cache: str = \"seed\" + \"!\"\n    return cache\nend\nbump()\n",
        );
        assert!(c.contains("static Str* bm_static_bump_cache;"));
        assert!(c.contains("static bool bm_static_bump_cache_init = false;"));
        // released at termination, not on function exit
        let exit_at = c.find("static void bm_exit_globals(void)").unwrap();
        assert!(c[exit_at..].contains("bm_static_bump_cache"));
    }
}
