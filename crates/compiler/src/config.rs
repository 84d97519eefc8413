//! Compiler configuration
//!
//! Carries everything the driver hands the pipeline: preprocessor
//! symbols, the C compiler choice, the compiler directory (modules,
//! externs and runtime live under it), and build-mode flags.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Extra `-D` symbols for the preprocessor
    pub defines: Vec<String>,
    /// C compiler executable; `None` means `gcc`
    pub cc: Option<String>,
    /// Root directory holding `modules/`, `externs/` and `runtime/`
    pub compiler_dir: Option<PathBuf>,
    /// Optimized build, no debug instrumentation
    pub release: bool,
    /// Compile the runtime leak detector into debug builds
    pub debug_leaks: bool,
    /// Suppress warnings on stderr
    pub quiet: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            defines: Vec::new(),
            cc: None,
            compiler_dir: None,
            release: false,
            debug_leaks: true,
            quiet: false,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_define(mut self, sym: impl Into<String>) -> Self {
        self.defines.push(sym.into());
        self
    }

    pub fn with_cc(mut self, cc: impl Into<String>) -> Self {
        self.cc = Some(cc.into());
        self
    }

    pub fn with_compiler_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.compiler_dir = Some(dir.into());
        self
    }

    pub fn with_release(mut self, release: bool) -> Self {
        self.release = release;
        self
    }

    /// The C compiler to invoke.
    pub fn cc_command(&self) -> &str {
        self.cc.as_deref().unwrap_or("gcc")
    }

    /// Resolve the compiler directory: explicit flag, then the
    /// `BISMUT_HOME` environment variable, then the executable's own
    /// directory.
    pub fn resolve_compiler_dir(&self) -> PathBuf {
        if let Some(dir) = &self.compiler_dir {
            return dir.clone();
        }
        if let Ok(home) = std::env::var("BISMUT_HOME") {
            if !home.is_empty() {
                return PathBuf::from(home);
            }
        }
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = CompilerConfig::new()
            .with_define("FEATURE_X")
            .with_cc("tcc")
            .with_release(true);
        assert_eq!(config.defines, vec!["FEATURE_X".to_string()]);
        assert_eq!(config.cc_command(), "tcc");
        assert!(config.release);
        assert!(config.debug_leaks);
    }

    #[test]
    fn test_default_cc() {
        assert_eq!(CompilerConfig::default().cc_command(), "gcc");
    }

    #[test]
    fn test_explicit_compiler_dir_wins() {
        let config = CompilerConfig::new().with_compiler_dir("/opt/bismut");
        assert_eq!(config.resolve_compiler_dir(), PathBuf::from("/opt/bismut"));
    }
}
