//! Benchmark script parser
//!
//! A script is a list of SQL statements grouped by `\benchmark` directives:
//!
//! ```text
//! -- create table
//! \benchmark once \name create
//! CREATE TABLE t (id INT PRIMARY KEY, v INT);
//!
//! \benchmark loop \parallel
//! INSERT INTO t VALUES({{.Iter}}, {{call .RandInt63n 100}});
//! DELETE FROM t WHERE id = {{.Iter}};
//! ```
//!
//! Statements before the first directive belong to an implicit loop block.

use super::{BenchMode, Benchmark, Template};
use crate::error::ScriptError;

/// Settings of the most recent `\benchmark` directive
struct Directive {
    mode: BenchMode,
    name: Option<String>,
    parallel: bool,
}

impl Directive {
    fn implicit() -> Self {
        Self {
            mode: BenchMode::Loop,
            name: None,
            parallel: false,
        }
    }
}

/// Statement lines collected for the current loop block
struct LoopBlock {
    start: usize,
    lines: Vec<String>,
}

/// Parse a script into benchmarks, in file order
pub fn parse_script(input: &str) -> Result<Vec<Benchmark>, ScriptError> {
    let mut benchmarks = Vec::new();
    let mut directive = Directive::implicit();
    let mut block = LoopBlock {
        start: 1,
        lines: Vec::new(),
    };
    let mut total_lines = 0;

    for (idx, raw) in input.lines().enumerate() {
        let line_no = idx + 1;
        total_lines = line_no;
        let line = raw.trim();

        if line.is_empty() || line.starts_with("--") {
            continue;
        }

        if line.starts_with("\\benchmark") {
            let mut tokens = line.split_whitespace().skip(1);
            let mode = match tokens.next() {
                None => return Err(ScriptError::NoMode),
                Some("loop") => BenchMode::Loop,
                Some("once") => BenchMode::Once,
                Some(other) => return Err(ScriptError::UnknownMode(other.to_string())),
            };

            flush_loop(&mut benchmarks, &directive, &mut block, line_no)?;

            directive = Directive {
                mode,
                name: None,
                parallel: false,
            };
            while let Some(token) = tokens.next() {
                match token {
                    "\\parallel" => directive.parallel = true,
                    "\\name" => {
                        let name = tokens.next().ok_or(ScriptError::NoName)?;
                        directive.name = Some(name.to_string());
                    }
                    _ => {}
                }
            }
            if mode == BenchMode::Loop {
                block.start = line_no + 1;
            }
            continue;
        }

        match directive.mode {
            BenchMode::Loop => block.lines.push(line.to_string()),
            BenchMode::Once => {
                let name = match directive.name.take() {
                    Some(name) => format!("(once) {}", name),
                    None => format!("(once) line {}", line_no),
                };
                let template = parse_template(line, line_no)?;
                let mut bench = Benchmark::statement(name, BenchMode::Once, template);
                bench.parallel = directive.parallel;
                benchmarks.push(bench);
                // A name or \parallel only applies to the first statement
                directive.parallel = false;
            }
        }
    }

    flush_loop(&mut benchmarks, &directive, &mut block, total_lines + 1)?;
    Ok(benchmarks)
}

/// Turn the collected loop lines into a benchmark. `closing_line` is the line
/// that ended the block (one past the last line at end of input).
fn flush_loop(
    benchmarks: &mut Vec<Benchmark>,
    directive: &Directive,
    block: &mut LoopBlock,
    closing_line: usize,
) -> Result<(), ScriptError> {
    if directive.mode != BenchMode::Loop || block.lines.is_empty() {
        return Ok(());
    }

    let name = match &directive.name {
        Some(name) => format!("(loop) {}", name),
        None => format!("(loop) line {}-{}", block.start, closing_line - 1),
    };
    let sql = block.lines.join("\n");
    block.lines.clear();

    let template = parse_template(&sql, block.start)?;
    let mut bench = Benchmark::statement(name, BenchMode::Loop, template);
    bench.parallel = directive.parallel;
    benchmarks.push(bench);
    Ok(())
}

fn parse_template(sql: &str, line: usize) -> Result<Template, ScriptError> {
    Template::parse(sql).map_err(|message| ScriptError::Template { line, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::Workload;

    fn summary(benchmarks: &[Benchmark]) -> Vec<(String, BenchMode, bool, String)> {
        benchmarks
            .iter()
            .map(|b| {
                let sql = match &b.workload {
                    Workload::Script(t) => t.source().to_string(),
                    Workload::Mix(_) => String::new(),
                };
                (b.name.clone(), b.mode, b.parallel, sql)
            })
            .collect()
    }

    fn names(input: &str) -> Vec<String> {
        parse_script(input)
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect()
    }

    #[test]
    fn test_directive_errors() {
        assert_eq!(parse_script("\\benchmark"), Err(ScriptError::NoMode));
        assert_eq!(
            parse_script("\\benchmark unknown-mode"),
            Err(ScriptError::UnknownMode("unknown-mode".to_string()))
        );
        assert_eq!(parse_script("\\benchmark once \\name"), Err(ScriptError::NoName));
        assert_eq!(
            ScriptError::UnknownMode("x".into()).to_string(),
            "failed to parse mode, neither 'once' nor 'loop': x"
        );
    }

    #[test]
    fn test_implicit_loop() {
        assert_eq!(names("INSERT INTO ...;"), vec!["(loop) line 1-1"]);

        let parsed = parse_script("\n\t\t\tINSERT INTO ...;\n\t\t\tDELETE FROM ...;\n\t\t\t").unwrap();
        assert_eq!(
            summary(&parsed),
            vec![(
                "(loop) line 1-4".to_string(),
                BenchMode::Loop,
                false,
                "INSERT INTO ...;\nDELETE FROM ...;".to_string()
            )]
        );
    }

    #[test]
    fn test_mode_switches_without_statements() {
        assert_eq!(
            names("\n\\benchmark loop\n\\benchmark once\nINSERT INTO ...;\n"),
            vec!["(once) line 4"]
        );
        assert_eq!(
            names("\n\\benchmark once\n\\benchmark loop\nINSERT INTO ...;\n"),
            vec!["(loop) line 4-4"]
        );
        assert_eq!(
            names("\n\\benchmark once\n\\benchmark loop\nINSERT INTO ...;\n\t\t\t"),
            vec!["(loop) line 4-5"]
        );
    }

    #[test]
    fn test_comments_are_skipped_but_counted() {
        let parsed = parse_script(
            "\n-- MY COMMENT\nINSERT INTO ...; -- MY COMMENT\nDELETE FROM ...;\n\t",
        )
        .unwrap();
        assert_eq!(
            summary(&parsed),
            vec![(
                "(loop) line 1-5".to_string(),
                BenchMode::Loop,
                false,
                "INSERT INTO ...; -- MY COMMENT\nDELETE FROM ...;".to_string()
            )]
        );
    }

    #[test]
    fn test_once_statements_are_separate_benchmarks() {
        assert_eq!(
            names("\n\\benchmark once\nINSERT INTO ...;\nDELETE FROM ...;\n"),
            vec!["(once) line 3", "(once) line 4"]
        );
    }

    #[test]
    fn test_full_script() {
        let script = "
            -- create table
            \\benchmark once
            CREATE TABLE ...;

            -- how long takes an insert and delete?
            \\benchmark loop
            INSERT INTO ...;
            DELETE FROM ...;

            -- delete table
            \\benchmark once
            DROP TABLE ...;
            ";
        let parsed = parse_script(script).unwrap();
        assert_eq!(
            summary(&parsed),
            vec![
                (
                    "(once) line 4".to_string(),
                    BenchMode::Once,
                    false,
                    "CREATE TABLE ...;".to_string()
                ),
                (
                    "(loop) line 8-11".to_string(),
                    BenchMode::Loop,
                    false,
                    "INSERT INTO ...;\nDELETE FROM ...;".to_string()
                ),
                (
                    "(once) line 13".to_string(),
                    BenchMode::Once,
                    false,
                    "DROP TABLE ...;".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_names() {
        let script = "
            \\benchmark loop \\name insert
            INSERT INTO ...;

            \\benchmark loop
            UPDATE ...;

            \\benchmark loop \\name delete
            DELETE ...;
            ";
        assert_eq!(
            names(script),
            vec!["(loop) insert", "(loop) line 6-7", "(loop) delete"]
        );

        let script = "
            \\benchmark once \\name insert
            INSERT INTO ...;

            \\benchmark once
            UPDATE ...;

            \\benchmark once \\name delete
            DELETE ...;
            ";
        assert_eq!(
            names(script),
            vec!["(once) insert", "(once) line 6", "(once) delete"]
        );
    }

    #[test]
    fn test_name_after_parallel_flag() {
        let parsed = parse_script("\\benchmark loop \\parallel \\name bulk\nINSERT INTO ...;").unwrap();
        assert_eq!(parsed[0].name, "(loop) bulk");
        assert!(parsed[0].parallel);
    }

    #[test]
    fn test_parallel() {
        let parsed = parse_script("\n\\benchmark loop \\parallel\nINSERT INTO ...;\n\t").unwrap();
        assert_eq!(
            summary(&parsed),
            vec![(
                "(loop) line 3-4".to_string(),
                BenchMode::Loop,
                true,
                "INSERT INTO ...;".to_string()
            )]
        );
    }

    #[test]
    fn test_template_errors_carry_line() {
        let err = parse_script("\\benchmark once\nSELECT {{.Bogus}};").unwrap_err();
        assert!(matches!(err, ScriptError::Template { line: 2, .. }));
    }
}
