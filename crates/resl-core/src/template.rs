//! Source templates
//!
//! Snippets submitted from chat are usually bare statements. A template
//! wraps them in the entry-point boilerplate their toolchain expects, and
//! leaves complete programs alone.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    CMain,
    CppMain,
    JavaMain,
    GoMain,
    RustMain,
}

impl Template {
    /// Identifier used in language tables
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CMain => "c_main",
            Self::CppMain => "cpp_main",
            Self::JavaMain => "java_main",
            Self::GoMain => "go_main",
            Self::RustMain => "rust_main",
        }
    }

    /// Apply the template to `code`.
    ///
    /// `class_name` is the execution id; Java needs it because the public
    /// class must match the file stem.
    #[must_use]
    pub fn apply(self, code: &str, class_name: &str) -> String {
        match self {
            Self::CMain => {
                if code.contains("main(") {
                    return code.to_owned();
                }
                format!(
                    "#include <stdio.h>\n#include <stdlib.h>\n#include <string.h>\n\n\
                     int main(void) {{\n{}\nreturn 0;\n}}\n",
                    indent(code)
                )
            }
            Self::CppMain => {
                if code.contains("main(") {
                    return code.to_owned();
                }
                format!(
                    "#include <bits/stdc++.h>\nusing namespace std;\n\n\
                     int main() {{\n{}\nreturn 0;\n}}\n",
                    indent(code)
                )
            }
            Self::JavaMain => {
                if let Some(renamed) = rename_java_class(code, class_name) {
                    return renamed;
                }
                format!(
                    "import java.util.*;\n\npublic class {class_name} {{\n    \
                     public static void main(String[] args) throws Exception {{\n{}\n    }}\n}}\n",
                    indent(&indent(code))
                )
            }
            Self::GoMain => {
                if code.contains("package ") {
                    return code.to_owned();
                }
                format!(
                    "package main\n\nimport \"fmt\"\n\nvar _ = fmt.Println\n\n\
                     func main() {{\n{}\n}}\n",
                    indent(code)
                )
            }
            Self::RustMain => {
                if code.contains("fn main") {
                    return code.to_owned();
                }
                format!("fn main() {{\n{}\n}}\n", indent(code))
            }
        }
    }
}

fn indent(code: &str) -> String {
    code.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("    {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

const JAVA_TYPE_KEYWORDS: [&str; 3] = ["class", "interface", "enum"];
const JAVA_MODIFIERS: [&str; 5] = ["public", "final", "abstract", "static", "strictfp"];

/// A top-level type declaration found in Java source
struct JavaType<'a> {
    name: &'a str,
    public: bool,
    has_main: bool,
}

/// Rename the program's entry class to `class_name`, or `None` when `code`
/// declares no type and is a bare snippet.
///
/// The entry class is the `public` one, else the first declaring
/// `void main`, else the first declared. Every use of its old name outside
/// literals and comments is renamed too, so constructors keep compiling.
fn rename_java_class(code: &str, class_name: &str) -> Option<String> {
    let masked = mask_literals(code);
    let tokens = identifiers(&masked);
    let text = |(start, end): (usize, usize)| &code[start..end];
    let only_space = |from: usize, to: usize| masked[from..to].iter().all(u8::is_ascii_whitespace);

    let mut types: Vec<(usize, JavaType<'_>)> = Vec::new();
    for (k, window) in tokens.windows(2).enumerate() {
        let (keyword, name) = (window[0], window[1]);
        let declares = JAVA_TYPE_KEYWORDS.contains(&text(keyword))
            && only_space(keyword.1, name.0)
            && masked[..keyword.0]
                .iter()
                .rev()
                .find(|b| !b.is_ascii_whitespace())
                .is_none_or(|b| *b != b'.');
        if !declares {
            continue;
        }

        let mut public = false;
        let mut j = k;
        while j > 0 && only_space(tokens[j - 1].1, tokens[j].0) {
            let modifier = text(tokens[j - 1]);
            if !JAVA_MODIFIERS.contains(&modifier) {
                break;
            }
            public |= modifier == "public";
            j -= 1;
        }
        types.push((
            k + 1,
            JavaType {
                name: text(name),
                public,
                has_main: false,
            },
        ));
    }

    // A type owns the tokens up to the next declaration
    let starts: Vec<usize> = types.iter().map(|(at, _)| *at).collect();
    for (n, (at, java_type)) in types.iter_mut().enumerate() {
        let until = starts.get(n + 1).copied().unwrap_or(tokens.len());
        java_type.has_main = tokens[*at..until]
            .windows(2)
            .any(|pair| text(pair[0]) == "void" && text(pair[1]) == "main");
    }

    let entry = types
        .iter()
        .find(|(_, t)| t.public)
        .or_else(|| types.iter().find(|(_, t)| t.has_main))
        .or_else(|| types.first())?;
    let old_name = entry.1.name;

    let mut out = String::with_capacity(code.len() + class_name.len());
    let mut copied = 0;
    for token in tokens.iter().copied().filter(|t| text(*t) == old_name) {
        out.push_str(&code[copied..token.0]);
        out.push_str(class_name);
        copied = token.1;
    }
    out.push_str(&code[copied..]);
    Some(out)
}

/// Bytes of `code` with comments, string and char literals blanked out
fn mask_literals(code: &str) -> Vec<u8> {
    let bytes = code.as_bytes();
    let mut masked = bytes.to_vec();
    let mut i = 0;
    while i < bytes.len() {
        let rest = &bytes[i..];
        let end = if rest.starts_with(b"//") {
            find_from(bytes, i, b"\n").unwrap_or(bytes.len())
        } else if rest.starts_with(b"/*") {
            find_from(bytes, i + 2, b"*/").map_or(bytes.len(), |n| n + 2)
        } else if rest.starts_with(b"\"\"\"") {
            find_from(bytes, i + 3, b"\"\"\"").map_or(bytes.len(), |n| n + 3)
        } else if rest[0] == b'"' || rest[0] == b'\'' {
            quoted_end(bytes, i)
        } else {
            i += 1;
            continue;
        };
        masked[i..end].fill(b' ');
        i = end;
    }
    masked
}

fn find_from(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|n| from + n)
}

/// End of the quoted literal opening at `start`, stopping at a line break
fn quoted_end(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Byte ranges of identifier-like tokens; non-ASCII bytes count as
/// identifier characters so ranges stay on char boundaries
fn identifiers(masked: &[u8]) -> Vec<(usize, usize)> {
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80;
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < masked.len() {
        if is_ident(masked[i]) {
            let start = i;
            while i < masked.len() && is_ident(masked[i]) {
                i += 1;
            }
            tokens.push((start, i));
        } else {
            i += 1;
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_language_table_identifiers() {
        for template in [Template::CMain, Template::JavaMain, Template::RustMain] {
            let json = serde_json::to_string(&template).unwrap();
            assert_eq!(json, format!("\"{}\"", template.name()));
        }
        assert!(serde_json::from_str::<Template>("\"perl_main\"").is_err());
    }

    #[test]
    fn c_snippet_is_wrapped() {
        let out = Template::CMain.apply("printf(\"hi\\n\");", "resl_x");
        assert!(out.starts_with("#include <stdio.h>"));
        assert!(out.contains("int main(void) {\n    printf(\"hi\\n\");\nreturn 0;\n}"));
    }

    #[test]
    fn complete_c_program_is_untouched() {
        let code = "int main() { return 3; }";
        assert_eq!(Template::CMain.apply(code, "resl_x"), code);
    }

    #[test]
    fn java_snippet_uses_execution_id_as_class() {
        let out = Template::JavaMain.apply("System.out.println(1);", "resl_abc");
        assert!(out.contains("public class resl_abc {"));
        assert!(out.contains("        System.out.println(1);"));
    }

    #[test]
    fn java_class_is_renamed() {
        let code = "public class Main {\n  public static void main(String[] a) {}\n}";
        let out = Template::JavaMain.apply(code, "resl_abc");
        assert!(out.starts_with("public class resl_abc {"));
        assert!(!out.contains("Main {"));
    }

    #[test]
    fn java_snippet_mentioning_class_is_wrapped() {
        let code = "System.out.println(\"my class is here\"); // class Foo";
        let out = Template::JavaMain.apply(code, "resl_abc");
        assert!(out.contains("public class resl_abc {"));
        assert!(out.contains("        System.out.println(\"my class is here\");"));
    }

    #[test]
    fn java_class_literal_is_not_a_declaration() {
        let out = Template::JavaMain.apply("System.out.println(String.class);", "resl_abc");
        assert!(out.contains("public static void main(String[] args)"));
    }

    #[test]
    fn package_private_java_class_is_renamed() {
        let code = "class Main {\n  Main() {}\n  public static void main(String[] a) {\n    \
                    new Main();\n    System.out.println(\"Main\");\n  }\n}";
        let out = Template::JavaMain.apply(code, "resl_abc");
        assert_eq!(
            out,
            "class resl_abc {\n  resl_abc() {}\n  public static void main(String[] a) {\n    \
             new resl_abc();\n    System.out.println(\"Main\");\n  }\n}"
        );
    }

    #[test]
    fn java_entry_class_is_the_one_with_main() {
        let code = "class Helper { static int two() { return 2; } }\n\
                    final class App { public static void main(String[] a) { Helper.two(); } }";
        let out = Template::JavaMain.apply(code, "resl_abc");
        assert!(out.contains("class Helper {"));
        assert!(out.contains("final class resl_abc {"));
        assert!(out.contains("Helper.two()"));
    }

    #[test]
    fn go_and_rust_snippets_are_wrapped() {
        let go = Template::GoMain.apply("fmt.Println(\"hi\")", "resl_x");
        assert!(go.starts_with("package main"));
        assert!(go.contains("func main() {\n    fmt.Println(\"hi\")\n}"));

        let rust = Template::RustMain.apply("println!(\"hi\");", "resl_x");
        assert_eq!(rust, "fn main() {\n    println!(\"hi\");\n}\n");
    }

    #[test]
    fn template_deserializes_from_snake_case() {
        let t: Template = serde_json::from_str("\"java_main\"").unwrap();
        assert_eq!(t, Template::JavaMain);
    }
}
