// src/query/functions.rs

//! Function library for the extended dialect.

use regex::Regex;

use crate::query::QueryError;
use crate::query::eval::{Context, Evaluator, Item, Value, parse_number};
use crate::query::parser::Expr;
use crate::utils::normalize_whitespace;

/// Name, minimum and maximum argument count.
const FUNCTIONS: &[(&str, usize, Option<usize>)] = &[
    // node-set
    ("last", 0, Some(0)),
    ("position", 0, Some(0)),
    ("count", 1, Some(1)),
    ("name", 0, Some(1)),
    ("local-name", 0, Some(1)),
    // string
    ("string", 0, Some(1)),
    ("concat", 2, None),
    ("contains", 2, Some(2)),
    ("starts-with", 2, Some(2)),
    ("ends-with", 2, Some(2)),
    ("substring", 2, Some(3)),
    ("substring-before", 2, Some(2)),
    ("substring-after", 2, Some(2)),
    ("string-length", 0, Some(1)),
    ("normalize-space", 0, Some(1)),
    ("translate", 3, Some(3)),
    ("upper-case", 1, Some(1)),
    ("lower-case", 1, Some(1)),
    ("replace", 3, Some(3)),
    ("matches", 2, Some(2)),
    ("string-join", 1, Some(2)),
    // boolean
    ("boolean", 1, Some(1)),
    ("not", 1, Some(1)),
    ("true", 0, Some(0)),
    ("false", 0, Some(0)),
    // number
    ("number", 0, Some(1)),
    ("sum", 1, Some(1)),
    ("floor", 1, Some(1)),
    ("ceiling", 1, Some(1)),
    ("round", 1, Some(1)),
];

/// Check a call's name and arity. Literal regex patterns are compiled here
/// so a bad pattern fails before any document is fetched.
pub(crate) fn check_call(name: &str, args: &[Expr]) -> Result<(), QueryError> {
    let &(_, min, max) = FUNCTIONS
        .iter()
        .find(|(known, ..)| *known == name)
        .ok_or_else(|| QueryError::UnknownFunction(name.to_string()))?;

    if args.len() < min || max.is_some_and(|max| args.len() > max) {
        let expected = match max {
            Some(max) if max == min => min.to_string(),
            Some(max) => format!("{min} to {max}"),
            None => format!("at least {min}"),
        };
        return Err(QueryError::Arity {
            function: name.to_string(),
            expected,
            found: args.len(),
        });
    }

    if matches!(name, "replace" | "matches") {
        if let Some(Expr::Literal(pattern)) = args.get(1) {
            compile_pattern(pattern)?;
        }
    }
    Ok(())
}

fn compile_pattern(pattern: &str) -> Result<Regex, QueryError> {
    Regex::new(pattern).map_err(|e| QueryError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// XPath rounding: halves go toward positive infinity.
fn round_half_up(n: f64) -> f64 {
    if n.is_finite() { (n + 0.5).floor() } else { n }
}

struct Args<'e, 'a> {
    ev: &'e Evaluator<'a>,
    exprs: &'e [Expr],
    ctx: &'e Context<'a>,
}

impl<'a> Args<'_, 'a> {
    fn value(&self, index: usize) -> Result<Value<'a>, QueryError> {
        self.ev.eval(&self.exprs[index], self.ctx)
    }

    fn string(&self, index: usize) -> Result<String, QueryError> {
        Ok(self.ev.to_string(&self.value(index)?))
    }

    fn number(&self, index: usize) -> Result<f64, QueryError> {
        Ok(self.ev.to_number(&self.value(index)?))
    }

    fn boolean(&self, index: usize) -> Result<bool, QueryError> {
        Ok(self.ev.to_bool(&self.value(index)?))
    }

    fn nodes(&self, index: usize, function: &str) -> Result<Vec<Item<'a>>, QueryError> {
        self.ev.eval_nodes(
            &self.exprs[index],
            self.ctx,
            &format!("argument to {function}()"),
        )
    }

    fn string_or_context(&self, index: usize) -> Result<String, QueryError> {
        if index < self.exprs.len() {
            self.string(index)
        } else {
            Ok(self.ev.string_value(&self.ctx.item))
        }
    }

    fn nodes_or_context(&self, index: usize, function: &str) -> Result<Vec<Item<'a>>, QueryError> {
        if index < self.exprs.len() {
            self.nodes(index, function)
        } else {
            Ok(vec![self.ctx.item])
        }
    }
}

pub(crate) fn call<'a>(
    ev: &Evaluator<'a>,
    name: &str,
    exprs: &[Expr],
    ctx: &Context<'a>,
) -> Result<Value<'a>, QueryError> {
    let args = Args { ev, exprs, ctx };

    let value = match name {
        "last" => Value::Num(ctx.size as f64),
        "position" => Value::Num(ctx.position as f64),
        "count" => Value::Num(args.nodes(0, name)?.len() as f64),
        "name" | "local-name" => Value::Str(
            args.nodes_or_context(0, name)?
                .first()
                .map(|item| ev.item_name(item))
                .unwrap_or_default(),
        ),

        "string" => Value::Str(args.string_or_context(0)?),
        "concat" => Value::Str(
            (0..exprs.len())
                .map(|i| args.string(i))
                .collect::<Result<String, _>>()?,
        ),
        "contains" => Value::Bool(args.string(0)?.contains(args.string(1)?.as_str())),
        "starts-with" => Value::Bool(args.string(0)?.starts_with(args.string(1)?.as_str())),
        "ends-with" => Value::Bool(args.string(0)?.ends_with(args.string(1)?.as_str())),
        "substring" => {
            let text = args.string(0)?;
            let start = round_half_up(args.number(1)?);
            let end = if exprs.len() > 2 {
                start + round_half_up(args.number(2)?)
            } else {
                f64::INFINITY
            };
            Value::Str(
                text.chars()
                    .enumerate()
                    .filter(|(i, _)| {
                        let position = (*i + 1) as f64;
                        position >= start && position < end
                    })
                    .map(|(_, c)| c)
                    .collect(),
            )
        }
        "substring-before" => {
            let text = args.string(0)?;
            let needle = args.string(1)?;
            Value::Str(
                text.find(needle.as_str())
                    .map(|at| text[..at].to_string())
                    .unwrap_or_default(),
            )
        }
        "substring-after" => {
            let text = args.string(0)?;
            let needle = args.string(1)?;
            Value::Str(
                text.find(needle.as_str())
                    .map(|at| text[at + needle.len()..].to_string())
                    .unwrap_or_default(),
            )
        }
        "string-length" => Value::Num(args.string_or_context(0)?.chars().count() as f64),
        "normalize-space" => Value::Str(normalize_whitespace(&args.string_or_context(0)?)),
        "translate" => {
            let text = args.string(0)?;
            let from: Vec<char> = args.string(1)?.chars().collect();
            let to: Vec<char> = args.string(2)?.chars().collect();
            Value::Str(
                text.chars()
                    .filter_map(|c| match from.iter().position(|&f| f == c) {
                        Some(index) => to.get(index).copied(),
                        None => Some(c),
                    })
                    .collect(),
            )
        }
        "upper-case" => Value::Str(args.string(0)?.to_uppercase()),
        "lower-case" => Value::Str(args.string(0)?.to_lowercase()),
        "replace" => {
            let text = args.string(0)?;
            let pattern = compile_pattern(&args.string(1)?)?;
            let replacement = args.string(2)?;
            Value::Str(
                pattern
                    .replace_all(&text, replacement.as_str())
                    .into_owned(),
            )
        }
        "matches" => {
            let text = args.string(0)?;
            Value::Bool(compile_pattern(&args.string(1)?)?.is_match(&text))
        }
        "string-join" => {
            let separator = if exprs.len() > 1 {
                args.string(1)?
            } else {
                String::new()
            };
            let parts: Vec<String> = match args.value(0)? {
                Value::Nodes(items) => items.iter().map(|item| ev.string_value(item)).collect(),
                other => vec![ev.to_string(&other)],
            };
            Value::Str(parts.join(&separator))
        }

        "boolean" => Value::Bool(args.boolean(0)?),
        "not" => Value::Bool(!args.boolean(0)?),
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),

        "number" => Value::Num(if exprs.is_empty() {
            parse_number(&ev.string_value(&ctx.item))
        } else {
            args.number(0)?
        }),
        "sum" => Value::Num(
            args.nodes(0, name)?
                .iter()
                .map(|item| parse_number(&ev.string_value(item)))
                .sum(),
        ),
        "floor" => Value::Num(args.number(0)?.floor()),
        "ceiling" => Value::Num(args.number(0)?.ceil()),
        "round" => Value::Num(round_half_up(args.number(0)?)),

        other => return Err(QueryError::UnknownFunction(other.to_string())),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Dialect, Document, evaluate};

    const PAGE: &str = r#"<html><body>
        <h1>  Quarterly   Report </h1>
        <a href="https://example.com/docs/guide.pdf">Guide</a>
        <a href="/local/page.html">Local</a>
        <span class="price">$1,234.50</span>
        <ol><li>one</li><li>two</li></ol>
    </body></html>"#;

    fn ext(query: &str) -> Vec<String> {
        evaluate(&Document::parse(PAGE), query, Dialect::Extended).unwrap()
    }

    fn one(query: &str) -> String {
        let mut values = ext(query);
        assert_eq!(values.len(), 1, "{query} gave {values:?}");
        values.remove(0)
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(one("normalize-space(//h1)"), "Quarterly Report");
        assert_eq!(one("upper-case('abc')"), "ABC");
        assert_eq!(one("lower-case(normalize-space(//h1/text()))"), "quarterly report");
        assert_eq!(one("concat('a', 'b', 'c')"), "abc");
        assert_eq!(one("substring('12345', 2, 3)"), "234");
        assert_eq!(one("substring('12345', 1.5, 2.6)"), "234");
        assert_eq!(one("substring('12345', 0, 3)"), "12");
        assert_eq!(one("substring-before('2024-01-02', '-')"), "2024");
        assert_eq!(one("substring-after('2024-01-02', '-')"), "01-02");
        assert_eq!(one("translate('bar', 'abc', 'ABC')"), "BAr");
        assert_eq!(one("translate('--aaa--', 'abc-', 'ABC')"), "AAA");
        assert_eq!(one("string-length('héllo')"), "5");
    }

    #[test]
    fn test_link_filters() {
        assert_eq!(
            ext("//a[starts-with(@href, 'https')]/@href"),
            vec!["https://example.com/docs/guide.pdf"]
        );
        assert_eq!(ext("//a[ends-with(@href, '.html')]"), vec!["Local"]);
        assert_eq!(ext("//a[contains(@href, 'docs')]"), vec!["Guide"]);
    }

    #[test]
    fn test_regex_functions() {
        assert_eq!(one("replace(//span, '[^0-9.]', '')"), "1234.50");
        assert_eq!(one("number(replace(//span, '[^0-9.]', '')) * 2"), "2469");
        assert_eq!(ext("//a[matches(@href, '^/')]"), vec!["Local"]);
    }

    #[test]
    fn test_numeric_functions() {
        assert_eq!(one("floor(2.7)"), "2");
        assert_eq!(one("ceiling(2.1)"), "3");
        assert_eq!(one("round(2.5)"), "3");
        assert_eq!(one("round(-2.5)"), "-2");
        assert_eq!(one("number('abc')"), "NaN");
        assert_eq!(one("count(//li)"), "2");
    }

    #[test]
    fn test_names_and_booleans() {
        assert_eq!(one("name(//ol/*[1])"), "li");
        assert_eq!(one("local-name(//a/@href)"), "href");
        assert_eq!(one("boolean(//table)"), "false");
        assert_eq!(one("not(//table)"), "true");
        assert_eq!(one("true()"), "true");
    }

    #[test]
    fn test_string_join() {
        assert_eq!(one("string-join(//li, '|')"), "one|two");
        assert_eq!(one("string-join(//li)"), "onetwo");
    }

    #[test]
    fn test_arity_and_unknown_functions() {
        let doc = Document::parse(PAGE);
        assert!(matches!(
            evaluate(&doc, "upper-case()", Dialect::Extended),
            Err(QueryError::Arity { .. })
        ));
        assert!(matches!(
            evaluate(&doc, "shout('x')", Dialect::Extended),
            Err(QueryError::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_literal_pattern_checked_at_compile_time() {
        assert!(matches!(
            crate::query::compile("matches(//a, '(')", Dialect::Extended),
            Err(QueryError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_dynamic_pattern_fails_at_evaluation() {
        let doc = Document::parse("<p>(</p>");
        assert!(matches!(
            evaluate(&doc, "matches('x', //p)", Dialect::Extended),
            Err(QueryError::InvalidPattern { .. })
        ));
    }
}
