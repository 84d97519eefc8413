//! Extern library manifests (`.mutlib`)
//!
//! A native library is described by an INI-style manifest with four
//! sections:
//!
//! ```ini
//! [types]
//! File = FILE
//!
//! [functions]
//! open(path: str, mode: str) -> File = bm_os_open
//! [dtor] close(f: File) = bm_os_close
//!
//! [constants]
//! STDIN_FD: i64 = 0
//!
//! [flags]
//! cflags = -I{LIB_DIR}/include
//! ldflags_linux = -L{LIB_DIR} -los_native
//! ```
//!
//! `[types]` names become extern-opaque Bismut types wrapping the given C
//! type. `[functions]` lines map Bismut signatures to C symbols; a
//! `[dtor]` tag marks the destructor the ARC wrapper calls when the last
//! reference drops. `{LIB_DIR}` in `[flags]` values expands to the
//! manifest's absolute directory at parse time, and platform-specific
//! keys (`cflags_linux`, `ldflags_macos`, ...) are selected by host.

use std::collections::HashMap;
use std::path::Path;

/// `Name = c_type` from `[types]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternType {
    pub name: String,
    pub c_type: String,
}

/// One `[functions]` entry. Parameter and return types are still type
/// *names* here; the checker resolves them against primitives, `str`,
/// and the manifest's own `[types]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternFunc {
    pub name: String,
    pub params: Vec<(String, String)>,
    /// `None` for void
    pub ret: Option<String>,
    pub c_name: String,
    pub is_dtor: bool,
    /// 1-based line in the manifest, for diagnostics
    pub line: u32,
}

/// `name: T = literal` from `[constants]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternConst {
    pub name: String,
    pub ty: String,
    pub value: String,
}

/// A parsed `.mutlib` manifest.
#[derive(Debug, Clone, Default)]
pub struct ExternManifest {
    pub lib: String,
    pub types: Vec<ExternType>,
    pub functions: Vec<ExternFunc>,
    pub constants: Vec<ExternConst>,
    /// Host-selected C compiler flags, `{LIB_DIR}` already expanded
    pub cflags: Vec<String>,
    /// Host-selected linker flags, `{LIB_DIR}` already expanded
    pub ldflags: Vec<String>,
}

impl ExternManifest {
    pub fn has_type(&self, name: &str) -> bool {
        self.types.iter().any(|t| t.name == name)
    }

    pub fn find_function(&self, name: &str) -> Option<&ExternFunc> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// The C destructor registered for an extern type, if any. A `[dtor]`
    /// function's single parameter type identifies the type it destroys.
    pub fn dtor_for(&self, type_name: &str) -> Option<&str> {
        self.functions
            .iter()
            .find(|f| f.is_dtor && f.params.first().map(|(_, t)| t.as_str()) == Some(type_name))
            .map(|f| f.c_name.as_str())
    }
}

/// Host key suffix used to select platform-specific `[flags]` entries.
fn host_suffix() -> &'static str {
    if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "windows") {
        "win"
    } else {
        "linux"
    }
}

/// Parse a manifest. `lib_dir` is the directory holding the `.mutlib`
/// file; `{LIB_DIR}` in flags expands to its absolute form.
pub fn parse_manifest(text: &str, lib: &str, lib_dir: &Path) -> Result<ExternManifest, String> {
    let lib_dir_str = lib_dir
        .canonicalize()
        .unwrap_or_else(|_| lib_dir.to_path_buf())
        .display()
        .to_string();

    let mut manifest = ExternManifest {
        lib: lib.to_string(),
        ..Default::default()
    };
    let mut flags: HashMap<String, String> = HashMap::new();
    let mut section = String::new();

    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx as u32 + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        // A section header is a lone [name]; the [dtor] tag always has a
        // function after it on the same line.
        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].trim().to_string();
            continue;
        }
        match section.as_str() {
            "types" => {
                let (name, c_type) = split_eq(line, lineno)?;
                if !is_ident(&name) {
                    return Err(format!("line {}: invalid type name '{}'", lineno, name));
                }
                manifest.types.push(ExternType { name, c_type });
            }
            "functions" => {
                manifest.functions.push(parse_function_line(line, lineno)?);
            }
            "constants" => {
                let (decl, value) = split_eq(line, lineno)?;
                let (name, ty) = decl
                    .split_once(':')
                    .map(|(n, t)| (n.trim().to_string(), t.trim().to_string()))
                    .ok_or_else(|| {
                        format!("line {}: constant must be 'name: type = value'", lineno)
                    })?;
                if !is_ident(&name) {
                    return Err(format!("line {}: invalid constant name '{}'", lineno, name));
                }
                manifest.constants.push(ExternConst { name, ty, value });
            }
            "flags" => {
                let (key, value) = split_eq(line, lineno)?;
                flags.insert(key, value.replace("{LIB_DIR}", &lib_dir_str));
            }
            "" => {
                return Err(format!(
                    "line {}: entry before any [section] header",
                    lineno
                ));
            }
            other => {
                return Err(format!("line {}: unknown section [{}]", lineno, other));
            }
        }
    }

    let host = host_suffix();
    for (base, out) in [("cflags", &mut manifest.cflags), ("ldflags", &mut manifest.ldflags)] {
        if let Some(v) = flags.get(base) {
            out.extend(v.split_whitespace().map(String::from));
        }
        if let Some(v) = flags.get(&format!("{}_{}", base, host)) {
            out.extend(v.split_whitespace().map(String::from));
        }
    }

    Ok(manifest)
}

/// `bismut_name(p: T, ...) -> R = c_name`, optionally tagged `[dtor]`.
fn parse_function_line(line: &str, lineno: u32) -> Result<ExternFunc, String> {
    let (line, is_dtor) = match line.strip_prefix("[dtor]") {
        Some(rest) => (rest.trim(), true),
        None => (line, false),
    };

    let (sig, c_name) = line
        .rsplit_once('=')
        .map(|(s, c)| (s.trim(), c.trim().to_string()))
        .ok_or_else(|| format!("line {}: function entry needs '= c_name'", lineno))?;
    if !is_ident(&c_name) {
        return Err(format!("line {}: invalid C symbol '{}'", lineno, c_name));
    }

    let open = sig
        .find('(')
        .ok_or_else(|| format!("line {}: function entry needs a parameter list", lineno))?;
    let close = sig
        .rfind(')')
        .ok_or_else(|| format!("line {}: unclosed parameter list", lineno))?;
    let name = sig[..open].trim().to_string();
    if !is_ident(&name) {
        return Err(format!("line {}: invalid function name '{}'", lineno, name));
    }

    let mut params = Vec::new();
    let params_text = &sig[open + 1..close];
    if !params_text.trim().is_empty() {
        for part in params_text.split(',') {
            let (pname, pty) = part
                .split_once(':')
                .map(|(n, t)| (n.trim().to_string(), t.trim().to_string()))
                .ok_or_else(|| {
                    format!("line {}: parameter must be 'name: type'", lineno)
                })?;
            params.push((pname, pty));
        }
    }

    let after = sig[close + 1..].trim();
    let ret = if after.is_empty() {
        None
    } else if let Some(r) = after.strip_prefix("->") {
        Some(r.trim().to_string())
    } else {
        return Err(format!(
            "line {}: unexpected '{}' after parameter list",
            lineno, after
        ));
    };

    if is_dtor && params.len() != 1 {
        return Err(format!(
            "line {}: a [dtor] function takes exactly one parameter",
            lineno
        ));
    }

    Ok(ExternFunc {
        name,
        params,
        ret,
        c_name,
        is_dtor,
        line: lineno,
    })
}

fn split_eq(line: &str, lineno: u32) -> Result<(String, String), String> {
    line.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("line {}: expected 'key = value'", lineno))
}

fn is_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SAMPLE: &str = r#"
# native OS bindings
[types]
File = FILE

[functions]
open(path: str, mode: str) -> File = bm_os_open
[dtor] close(f: File) = bm_os_close
write_line(f: File, text: str) = bm_os_write_line

[constants]
MAX_PATH: i64 = 4096

[flags]
cflags = -I{LIB_DIR}/include
ldflags = -lm
"#;

    fn parse(text: &str) -> ExternManifest {
        parse_manifest(text, "os", &PathBuf::from("/opt/bismut/externs/os")).unwrap()
    }

    #[test]
    fn test_sections() {
        let m = parse(SAMPLE);
        assert_eq!(m.types, vec![ExternType { name: "File".into(), c_type: "FILE".into() }]);
        assert_eq!(m.functions.len(), 3);
        assert_eq!(m.constants.len(), 1);
    }

    #[test]
    fn test_function_signature() {
        let m = parse(SAMPLE);
        let open = m.find_function("open").unwrap();
        assert_eq!(open.params.len(), 2);
        assert_eq!(open.params[0], ("path".to_string(), "str".to_string()));
        assert_eq!(open.ret.as_deref(), Some("File"));
        assert_eq!(open.c_name, "bm_os_open");
        assert!(!open.is_dtor);

        let write = m.find_function("write_line").unwrap();
        assert_eq!(write.ret, None);
    }

    #[test]
    fn test_dtor_lookup() {
        let m = parse(SAMPLE);
        assert_eq!(m.dtor_for("File"), Some("bm_os_close"));
        assert_eq!(m.dtor_for("Sock"), None);
    }

    #[test]
    fn test_lib_dir_expansion() {
        let m = parse(SAMPLE);
        assert!(m.cflags[0].starts_with("-I"));
        assert!(m.cflags[0].contains("externs/os"));
        assert!(m.cflags[0].ends_with("/include"));
        assert_eq!(m.ldflags, vec!["-lm".to_string()]);
    }

    #[test]
    fn test_platform_flags_selected() {
        let text = format!(
            "[flags]\ncflags = -DCOMMON\ncflags_{} = -DHOST\ncflags_plan9 = -DNOPE\n",
            host_suffix()
        );
        let m = parse(&text);
        assert_eq!(m.cflags, vec!["-DCOMMON".to_string(), "-DHOST".to_string()]);
    }

    #[test]
    fn test_errors() {
        let dir = PathBuf::from(".");
        assert!(parse_manifest("junk\n", "x", &dir).is_err());
        assert!(parse_manifest("[functions]\nnoparens = c\n", "x", &dir).is_err());
        assert!(parse_manifest("[functions]\n[dtor] f(a: T, b: T) = c\n", "x", &dir).is_err());
        assert!(parse_manifest("[wat]\nk = v\n", "x", &dir).is_err());
        assert!(parse_manifest("[functions]\nf() -> T\n", "x", &dir).is_err());
    }
}
