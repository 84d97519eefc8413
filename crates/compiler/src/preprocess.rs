//! Text-level preprocessor
//!
//! Runs before the lexer on raw source text. Recognizes line-leading
//! directives `@define NAME`, `@if NAME`, `@elif NAME`, `@else`, `@end`.
//! Only defined-or-not tests are supported; there is no expression
//! language over symbols.
//!
//! Dead lines (and every directive line) are replaced by empty lines so
//! line/column positions downstream match the original file. A file
//! containing no `@` at all passes through untouched.

use crate::diag::{Diagnostics, Fatal, Pos};
use std::collections::HashSet;
use std::rc::Rc;

/// One open `@if` block.
struct Frame {
    /// Whether the enclosing context is live
    outer_live: bool,
    /// Whether some branch of this conditional has already been taken
    taken: bool,
    /// Whether the current branch is live
    live: bool,
    /// Whether `@else` has been seen
    in_else: bool,
    /// Position of the opening `@if`, for unterminated-conditional errors
    open_pos: Pos,
}

/// The symbol the host platform predefines. Exactly one of
/// `__LINUX__ | __MACOS__ | __WIN__`.
pub fn host_platform_symbol() -> &'static str {
    if cfg!(target_os = "macos") {
        "__MACOS__"
    } else if cfg!(target_os = "windows") {
        "__WIN__"
    } else {
        "__LINUX__"
    }
}

/// Filter `source` through the conditional directives.
///
/// `defines` seeds the symbol table (host platform symbol plus `-D` flags
/// from the driver); `@define` inside live branches extends it.
pub fn preprocess(
    source: &str,
    file: &Rc<str>,
    defines: &HashSet<String>,
    diags: &mut Diagnostics,
) -> Result<String, Fatal> {
    if !source.contains('@') {
        return Ok(source.to_string());
    }

    let mut symbols: HashSet<String> = defines.clone();
    let mut stack: Vec<Frame> = Vec::new();
    let mut out = String::with_capacity(source.len());

    for (idx, line) in source.lines().enumerate() {
        let lineno = idx as u32 + 1;
        let trimmed = line.trim_start();
        if !trimmed.starts_with('@') {
            let live = stack.iter().all(|f| f.live);
            if live {
                out.push_str(line);
            }
            out.push('\n');
            continue;
        }

        let col = (line.len() - trimmed.len()) as u32 + 1;
        let pos = Pos::new(file.clone(), lineno, col);
        let mut words = trimmed.split_whitespace();
        let directive = words.next().unwrap_or("@");
        let arg = words.next();

        match directive {
            "@define" => {
                let live = stack.iter().all(|f| f.live);
                match arg {
                    Some(name) if live => {
                        symbols.insert(name.to_string());
                    }
                    Some(_) => {} // dead branch: not evaluated
                    None => {
                        return Err(diags.fatal(&pos, trimmed.len() as u32, "@define requires a symbol name"));
                    }
                }
            }
            "@if" => {
                let name = arg.ok_or_else(|| {
                    diags.fatal(&pos, trimmed.len() as u32, "@if requires a symbol name")
                })?;
                let outer_live = stack.iter().all(|f| f.live);
                let cond = symbols.contains(name);
                stack.push(Frame {
                    outer_live,
                    taken: cond,
                    live: outer_live && cond,
                    in_else: false,
                    open_pos: pos,
                });
            }
            "@elif" => {
                let name = arg.ok_or_else(|| {
                    diags.fatal(&pos, trimmed.len() as u32, "@elif requires a symbol name")
                })?;
                let frame = stack.last_mut().ok_or_else(|| {
                    diags.fatal(&pos, trimmed.len() as u32, "@elif without matching @if")
                })?;
                if frame.in_else {
                    return Err(diags.fatal(&pos, trimmed.len() as u32, "@elif after @else"));
                }
                let cond = !frame.taken && symbols.contains(name);
                frame.live = frame.outer_live && cond;
                frame.taken = frame.taken || cond;
            }
            "@else" => {
                let frame = stack.last_mut().ok_or_else(|| {
                    diags.fatal(&pos, trimmed.len() as u32, "@else without matching @if")
                })?;
                if frame.in_else {
                    return Err(diags.fatal(&pos, trimmed.len() as u32, "duplicate @else"));
                }
                frame.in_else = true;
                frame.live = frame.outer_live && !frame.taken;
            }
            "@end" => {
                if stack.pop().is_none() {
                    return Err(diags.fatal(&pos, trimmed.len() as u32, "unmatched @end"));
                }
            }
            other => {
                return Err(diags.fatal(
                    &pos,
                    other.len() as u32,
                    format!("unknown preprocessor directive '{}'", other),
                ));
            }
        }
        // Directive lines become blank lines in the output.
        out.push('\n');
    }

    if let Some(frame) = stack.last() {
        return Err(diags.fatal(&frame.open_pos, 3, "unterminated @if conditional"));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str, defines: &[&str]) -> Result<String, Fatal> {
        let mut diags = Diagnostics::new();
        let set: HashSet<String> = defines.iter().map(|s| s.to_string()).collect();
        preprocess(source, &Rc::from("t.mut"), &set, &mut diags)
    }

    #[test]
    fn test_passthrough_without_directives() {
        let src = "def main()\n    print(1)\nend\n";
        assert_eq!(run(src, &[]).unwrap(), src);
    }

    #[test]
    fn test_if_taken_and_dropped() {
        let src = "@if FOO\na\n@else\nb\n@end\nc\n";
        let with = run(src, &["FOO"]).unwrap();
        assert_eq!(with, "\na\n\n\n\nc\n");
        let without = run(src, &[]).unwrap();
        assert_eq!(without, "\n\n\nb\n\nc\n");
    }

    #[test]
    fn test_positions_stable() {
        // Line 4 must remain line 4 whichever branch is live.
        let src = "@if X\none\n@else\ntwo\n@end\n";
        let out = run(src, &[]).unwrap();
        assert_eq!(out.lines().count(), 5);
        assert_eq!(out.lines().nth(3).unwrap(), "two");
    }

    #[test]
    fn test_elif_chain() {
        let src = "@if A\na\n@elif B\nb\n@elif C\nc\n@else\nd\n@end\n";
        assert!(run(src, &["B"]).unwrap().contains("b"));
        assert!(!run(src, &["B"]).unwrap().contains("a"));
        // First taken branch wins even if later symbols are also defined
        let out = run(src, &["B", "C"]).unwrap();
        assert!(out.contains("b") && !out.contains("c"));
        assert!(run(src, &[]).unwrap().contains("d"));
    }

    #[test]
    fn test_nested_define_in_dead_branch_ignored() {
        let src = "@if DEAD\n@define INNER\n@end\n@if INNER\nx\n@end\n";
        let out = run(src, &[]).unwrap();
        assert!(!out.contains('x'));
    }

    #[test]
    fn test_define_then_if() {
        let src = "@define FOO\n@if FOO\nyes\n@end\n";
        assert!(run(src, &[]).unwrap().contains("yes"));
    }

    #[test]
    fn test_nesting() {
        let src = "@if A\n@if B\nab\n@end\n@end\n";
        assert!(run(src, &["A", "B"]).unwrap().contains("ab"));
        assert!(!run(src, &["A"]).unwrap().contains("ab"));
        assert!(!run(src, &["B"]).unwrap().contains("ab"));
    }

    #[test]
    fn test_unmatched_end_is_error() {
        assert!(run("@end\n", &[]).is_err());
    }

    #[test]
    fn test_unterminated_if_is_error() {
        let mut diags = Diagnostics::new();
        let res = preprocess("@if FOO\nx\n", &Rc::from("t.mut"), &HashSet::new(), &mut diags);
        assert!(res.is_err());
        assert!(diags.diagnostics()[0].message.contains("unterminated"));
        assert_eq!(diags.diagnostics()[0].line, 1);
    }

    #[test]
    fn test_elif_after_else_is_error() {
        assert!(run("@if A\n@else\n@elif B\n@end\n", &[]).is_err());
    }

    #[test]
    fn test_host_symbol_is_one_of_three() {
        let sym = host_platform_symbol();
        assert!(["__LINUX__", "__MACOS__", "__WIN__"].contains(&sym));
    }
}
