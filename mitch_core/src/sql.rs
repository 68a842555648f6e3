//! SQL statement splitting and canonical reformatting.
//!
//! A migration script is a sequence of statements separated by semicolons.
//! Splitting must not break on semicolons inside string literals, quoted
//! identifiers, comments or PostgreSQL dollar-quoted bodies. The canonical
//! form of a script (reformatted statements joined by blank lines) is what
//! makes cosmetic rewrites hash-stable.

use sqlformat::{FormatOptions, Indent, QueryParams};


enum SplitState {
    Normal,
    LineComment,
    BlockComment { depth: u32 },
    SingleQuoted,
    DoubleQuoted,
    DollarQuoted { tag: String },
}

/// Splits a script into its individual statements.
///
/// Whitespace-only statements and statements beginning with a `--`
/// line-comment marker are excluded from the result.
pub fn split_statements(script: &str) -> Vec<String> {
    let characters: Vec<char> = script.chars().collect();

    let mut statements = Vec::new();
    let mut current_statement = String::new();
    let mut state = SplitState::Normal;

    let mut index = 0;
    while index < characters.len() {
        let character = characters[index];

        match &state {
            SplitState::Normal => match character {
                '-' if characters.get(index + 1) == Some(&'-') => {
                    current_statement.push_str("--");
                    state = SplitState::LineComment;
                    index += 2;
                    continue;
                }
                '/' if characters.get(index + 1) == Some(&'*') => {
                    current_statement.push_str("/*");
                    state = SplitState::BlockComment { depth: 1 };
                    index += 2;
                    continue;
                }
                '\'' => {
                    current_statement.push(character);
                    state = SplitState::SingleQuoted;
                }
                '"' => {
                    current_statement.push(character);
                    state = SplitState::DoubleQuoted;
                }
                '$' => {
                    if let Some(tag) = dollar_quote_tag_at(&characters, index) {
                        current_statement.push_str(&tag);
                        index += tag.chars().count();
                        state = SplitState::DollarQuoted { tag };
                        continue;
                    }

                    current_statement.push(character);
                }
                ';' => {
                    current_statement.push(character);
                    push_statement(&mut statements, &mut current_statement);
                }
                _ => current_statement.push(character),
            },
            SplitState::LineComment => {
                current_statement.push(character);
                if character == '\n' {
                    state = SplitState::Normal;
                }
            }
            SplitState::BlockComment { depth } => {
                if character == '*' && characters.get(index + 1) == Some(&'/') {
                    current_statement.push_str("*/");
                    index += 2;

                    state = if *depth > 1 {
                        SplitState::BlockComment { depth: depth - 1 }
                    } else {
                        SplitState::Normal
                    };
                    continue;
                }

                if character == '/' && characters.get(index + 1) == Some(&'*') {
                    current_statement.push_str("/*");
                    state = SplitState::BlockComment { depth: depth + 1 };
                    index += 2;
                    continue;
                }

                current_statement.push(character);
            }
            SplitState::SingleQuoted => {
                current_statement.push(character);
                if character == '\'' {
                    // An immediately following quote is an escaped quote,
                    // not the end of the literal.
                    if characters.get(index + 1) == Some(&'\'') {
                        current_statement.push('\'');
                        index += 2;
                        continue;
                    }

                    state = SplitState::Normal;
                }
            }
            SplitState::DoubleQuoted => {
                current_statement.push(character);
                if character == '"' {
                    if characters.get(index + 1) == Some(&'"') {
                        current_statement.push('"');
                        index += 2;
                        continue;
                    }

                    state = SplitState::Normal;
                }
            }
            SplitState::DollarQuoted { tag } => {
                if character == '$' {
                    if let Some(closing_tag) = dollar_quote_tag_at(&characters, index) {
                        if &closing_tag == tag {
                            current_statement.push_str(&closing_tag);
                            index += closing_tag.chars().count();
                            state = SplitState::Normal;
                            continue;
                        }
                    }
                }

                current_statement.push(character);
            }
        }

        index += 1;
    }

    push_statement(&mut statements, &mut current_statement);

    statements
}

/// Reads a dollar-quote delimiter (`$$` or `$tag$`) starting at `index`,
/// if one is present.
fn dollar_quote_tag_at(characters: &[char], index: usize) -> Option<String> {
    let mut tag = String::from('$');

    let mut cursor = index + 1;
    while let Some(&character) = characters.get(cursor) {
        if character == '$' {
            tag.push('$');
            return Some(tag);
        }

        if character.is_alphanumeric() || character == '_' {
            tag.push(character);
            cursor += 1;
            continue;
        }

        return None;
    }

    None
}

fn push_statement(statements: &mut Vec<String>, current_statement: &mut String) {
    let statement = current_statement.trim();

    let has_content = !statement.trim_end_matches(';').trim().is_empty();
    if has_content && !statement.starts_with("--") {
        statements.push(statement.to_string());
    }

    current_statement.clear();
}


/// Reformats a single statement into its canonical form:
/// two-space indentation and lowercased keywords.
pub fn canonicalize_statement(statement: &str) -> String {
    sqlformat::format(
        statement,
        &QueryParams::None,
        &FormatOptions {
            indent: Indent::Spaces(2),
            uppercase: Some(false),
            ..FormatOptions::default()
        },
    )
}

/// Canonical form of a whole script: each statement canonicalized,
/// joined by blank lines.
pub fn canonicalize_script(script: &str) -> String {
    split_statements(script)
        .iter()
        .map(|statement| canonicalize_statement(statement))
        .collect::<Vec<_>>()
        .join("\n\n")
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn splits_on_semicolons() {
        let statements = split_statements(
            "create table a (x integer);\ncreate table b (y integer);",
        );

        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("create table a"));
        assert!(statements[1].starts_with("create table b"));
    }

    #[test]
    fn keeps_trailing_statement_without_semicolon() {
        let statements = split_statements("create table a (x integer)");

        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn excludes_whitespace_only_statements() {
        let statements = split_statements("create table a (x integer);\n\n   \n;\n;");

        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn excludes_statements_beginning_with_line_comments() {
        let statements = split_statements("-- deploy users/create\n;select 1;");

        assert_eq!(statements, vec!["select 1;".to_string()]);
    }

    #[test]
    fn does_not_split_inside_string_literals() {
        let statements = split_statements("insert into a values ('x;y');select 'it''s;';");

        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "insert into a values ('x;y');");
    }

    #[test]
    fn does_not_split_inside_quoted_identifiers() {
        let statements = split_statements("create table \"odd;name\" (x integer);");

        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn does_not_split_inside_dollar_quoted_bodies() {
        let script = "create function f() returns void as $fn$\n\
                      begin\n  perform 1;\n  perform 2;\nend;\n$fn$ language plpgsql;";
        let statements = split_statements(script);

        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn does_not_split_inside_comments() {
        let statements =
            split_statements("create table a (\n  x integer -- trailing; note\n);");

        assert_eq!(statements.len(), 1);

        let statements =
            split_statements("create table b (\n  y integer /* block; comment */\n);");

        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn canonical_form_ignores_cosmetic_whitespace() {
        let terse = "CREATE TABLE a (x integer, y integer);";
        let airy = "CREATE   TABLE a\n    (x integer,\n     y integer);";

        assert_eq!(canonicalize_script(terse), canonicalize_script(airy));
    }

    #[test]
    fn canonicalizing_twice_is_a_fixed_point() {
        let script = "SELECT x, y FROM a WHERE x = 1;";
        let once = canonicalize_script(script);
        let twice = canonicalize_script(&once);

        assert_eq!(once, twice);
    }

    #[test]
    fn canonical_script_joins_statements_with_blank_lines() {
        let canonical = canonicalize_script("select 1; select 2;");

        assert_eq!(canonical.matches("\n\n").count(), 1);
    }
}
