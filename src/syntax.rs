//! Tree-sitter structural parsing used by the AST watcher
//!
//! Only answers one question: how big is the syntax tree of this buffer?

use std::cell::RefCell;
use std::path::Path;
use tree_sitter::Parser;

/// Languages with a structural parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    JavaScript,
    TypeScript,
    Tsx,
    Python,
    Go,
    Unknown,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "rs" => Language::Rust,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "mts" | "cts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "py" | "pyi" => Language::Python,
            "go" => Language::Go,
            _ => Language::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::Unknown)
    }

    pub fn is_supported(&self) -> bool {
        *self != Language::Unknown
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  THREAD-LOCAL PARSER POOL
// ═══════════════════════════════════════════════════════════════════════════
//
// Parsers are reused per thread; the AST worker always parses on a runtime
// worker thread, so each thread keeps its own configured set.

thread_local! {
    static RUST_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // Ignore error here - will be caught at parse time if language fails
        let _ = p.set_language(&tree_sitter_rust::LANGUAGE.into());
        p
    });

    static JS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_javascript::LANGUAGE.into());
        p
    });

    static TS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into());
        p
    });

    static TSX_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TSX.into());
        p
    });

    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });

    static GO_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_go::LANGUAGE.into());
        p
    });
}

fn parse_with_pooled_parser(content: &str, language: Language) -> anyhow::Result<tree_sitter::Tree> {
    let parse_result = match language {
        Language::Rust => RUST_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::JavaScript => JS_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::TypeScript => TS_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Tsx => TSX_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Python => PYTHON_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Go => GO_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Unknown => return Err(anyhow::anyhow!("Unknown language")),
    };

    parse_result.ok_or_else(|| anyhow::anyhow!("Failed to parse file"))
}

/// Count every node (named and anonymous) in the syntax tree of `content`.
///
/// Errors for unsupported languages or when the parser gives up.
pub fn count_nodes(path: &Path, content: &str) -> anyhow::Result<usize> {
    let language = Language::from_path(path);
    let tree = parse_with_pooled_parser(content, language)?;

    let mut cursor = tree.walk();
    let mut count = 0usize;
    // Pre-order walk without recursion
    loop {
        count += 1;
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return Ok(count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_path() {
        assert_eq!(Language::from_path(Path::new("src/main.rs")), Language::Rust);
        assert_eq!(Language::from_path(Path::new("App.TSX")), Language::Tsx);
        assert_eq!(Language::from_path(Path::new("tool.py")), Language::Python);
        assert_eq!(Language::from_path(Path::new("README")), Language::Unknown);
        assert!(!Language::from_path(Path::new("notes.txt")).is_supported());
    }

    #[test]
    fn test_count_nodes_small_rust_file() {
        let count = count_nodes(Path::new("lib.rs"), "fn main() {}").unwrap();
        // source_file > function_item > fn, name, parameters ( ), block { }
        assert!(count >= 5, "got {count}");
        assert!(count < 20, "got {count}");
    }

    #[test]
    fn test_count_nodes_grows_with_content() {
        let small = count_nodes(Path::new("a.py"), "x = 1\n").unwrap();
        let big_src: String = (0..200).map(|i| format!("x{i} = {i} + {i}\n")).collect();
        let big = count_nodes(Path::new("a.py"), &big_src).unwrap();
        assert!(big > 1000, "got {big}");
        assert!(big > small);
    }

    #[test]
    fn test_unsupported_language_errors() {
        assert!(count_nodes(Path::new("notes.txt"), "hello").is_err());
    }
}
