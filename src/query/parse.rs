use crate::context::ExecutionContext;
use crate::error::{RepographError, Result};
use crate::graph::{Name, Path, Value};

use super::{Columns, Constraint, Operand, Operator, Query};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Bare word: keyword, function or unbracketed name.
    Word(String),
    /// `[...]` name, taken verbatim.
    Bracketed(String),
    Text(String),
    Number(String),
    Symbol(&'static str),
}

fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '\'' {
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                        text.push('\'');
                        i += 2;
                    }
                    Some('\'') => {
                        i += 1;
                        break;
                    }
                    Some(ch) => {
                        text.push(*ch);
                        i += 1;
                    }
                    None => {
                        return Err(RepographError::QueryParse(
                            "unterminated string literal".to_string(),
                        ))
                    }
                }
            }
            tokens.push(Token::Text(text));
        } else if c == '[' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|ch| *ch == ']')
                .map(|offset| start + offset)
                .ok_or_else(|| RepographError::QueryParse("unterminated '[' name".to_string()))?;
            tokens.push(Token::Bracketed(chars[start..end].iter().collect()));
            i = end + 1;
        } else if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Number(chars[start..i].iter().collect()));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | ':' | '.' | '-'))
            {
                i += 1;
            }
            tokens.push(Token::Word(chars[start..i].iter().collect()));
        } else {
            let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let symbol = match two.as_str() {
                "<=" => Some("<="),
                ">=" => Some(">="),
                "<>" => Some("<>"),
                "!=" => Some("!="),
                _ => None,
            };
            if let Some(symbol) = symbol {
                tokens.push(Token::Symbol(symbol));
                i += 2;
                continue;
            }
            let symbol = match c {
                '(' => "(",
                ')' => ")",
                ',' => ",",
                '*' => "*",
                '=' => "=",
                '<' => "<",
                '>' => ">",
                _ => {
                    return Err(RepographError::QueryParse(format!(
                        "unexpected character '{}'",
                        c
                    )))
                }
            };
            tokens.push(Token::Symbol(symbol));
            i += 1;
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    context: &'a ExecutionContext,
    table: String,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn error(&self, expected: &str) -> RepographError {
        match self.peek() {
            Some(token) => RepographError::QueryParse(format!(
                "expected {} but found {:?}",
                expected, token
            )),
            None => RepographError::QueryParse(format!("expected {} at end of query", expected)),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn accept_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.accept_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(keyword))
        }
    }

    fn accept_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<()> {
        if self.accept_symbol(symbol) {
            Ok(())
        } else {
            Err(self.error(&format!("'{}'", symbol)))
        }
    }

    fn is_function(&self, name: &str) -> bool {
        self.is_keyword(name)
            && matches!(self.tokens.get(self.position + 1), Some(Token::Symbol("(")))
    }

    /// Table or column name, bracketed or bare.
    fn raw_name(&mut self) -> Result<(String, bool)> {
        let name = match self.peek() {
            Some(Token::Bracketed(name)) => (name.clone(), true),
            Some(Token::Word(word)) => (word.clone(), false),
            _ => return Err(self.error("a name")),
        };
        self.position += 1;
        Ok(name)
    }

    /// Property name, dropping a `table.` qualifier on bare names.
    fn property_name(&mut self) -> Result<Name> {
        let (text, bracketed) = self.raw_name()?;
        let text = if bracketed {
            text
        } else {
            let qualifier = format!("{}.", self.table);
            text.strip_prefix(&qualifier).map(str::to_string).unwrap_or(text)
        };
        self.context.name(&text)
    }

    fn query(&mut self) -> Result<Query> {
        self.expect_keyword("SELECT")?;
        let columns = self.columns()?;
        self.expect_keyword("FROM")?;
        let (table, _) = self.raw_name()?;
        self.table = table;

        let constraint = if self.accept_keyword("WHERE") {
            Some(self.or_constraint()?)
        } else {
            None
        };

        let mut limit = None;
        let mut offset = 0;
        if self.accept_keyword("LIMIT") {
            limit = Some(self.count()?);
            if self.accept_keyword("OFFSET") {
                offset = self.count()?;
            }
        }
        if self.peek().is_some() {
            return Err(self.error("end of query"));
        }
        Ok(Query {
            table: self.table.clone(),
            columns,
            constraint,
            limit,
            offset,
        })
    }

    fn columns(&mut self) -> Result<Columns> {
        if self.accept_symbol("*") {
            return Ok(Columns::All);
        }
        let mut names = vec![self.column_name()?];
        while self.accept_symbol(",") {
            names.push(self.column_name()?);
        }
        Ok(Columns::Named(names))
    }

    /// Select-list names may carry any selector qualifier.
    fn column_name(&mut self) -> Result<Name> {
        let (text, bracketed) = self.raw_name()?;
        if !bracketed {
            if let Some((_, column)) = text.split_once('.') {
                return self.context.name(column);
            }
        }
        self.context.name(&text)
    }

    fn count(&mut self) -> Result<usize> {
        let Some(Token::Number(text)) = self.peek().cloned() else {
            return Err(self.error("a count"));
        };
        self.position += 1;
        text.parse()
            .map_err(|_| RepographError::QueryParse(format!("invalid count '{}'", text)))
    }

    fn or_constraint(&mut self) -> Result<Constraint> {
        let mut left = self.and_constraint()?;
        while self.accept_keyword("OR") {
            left = left.or(self.and_constraint()?);
        }
        Ok(left)
    }

    fn and_constraint(&mut self) -> Result<Constraint> {
        let mut left = self.unary_constraint()?;
        while self.accept_keyword("AND") {
            left = left.and(self.unary_constraint()?);
        }
        Ok(left)
    }

    fn unary_constraint(&mut self) -> Result<Constraint> {
        if self.accept_keyword("NOT") {
            return Ok(self.unary_constraint()?.negate());
        }
        if self.accept_symbol("(") {
            let inner = self.or_constraint()?;
            self.expect_symbol(")")?;
            return Ok(inner);
        }
        self.predicate()
    }

    fn predicate(&mut self) -> Result<Constraint> {
        if self.is_function("CONTAINS") {
            self.position += 1;
            self.expect_symbol("(")?;
            let property = if self.accept_symbol("*") {
                None
            } else {
                let (text, bracketed) = self.raw_name()?;
                if !bracketed && text.ends_with('.') && self.accept_symbol("*") {
                    None
                } else {
                    let text = match text.split_once('.') {
                        Some((_, column)) if !bracketed => column.to_string(),
                        _ => text,
                    };
                    if text.is_empty() {
                        None
                    } else {
                        Some(self.context.name(&text)?)
                    }
                }
            };
            self.expect_symbol(",")?;
            let expression = self.text()?;
            self.expect_symbol(")")?;
            return Ok(Constraint::FullTextSearch {
                property,
                expression,
            });
        }
        let tree_predicates: [(&str, fn(Path) -> Constraint); 3] = [
            ("ISDESCENDANTNODE", Constraint::DescendantNode),
            ("ISCHILDNODE", Constraint::ChildNode),
            ("ISSAMENODE", Constraint::SameNode),
        ];
        for (function, make) in tree_predicates {
            if self.is_function(function) {
                self.position += 1;
                let path = self.path_argument()?;
                return Ok(make(path));
            }
        }

        let left = self.operand()?;
        if self.accept_keyword("IS") {
            let negated = self.accept_keyword("NOT");
            self.expect_keyword("NULL")?;
            let Operand::PropertyValue(name) = left else {
                return Err(RepographError::QueryParse(
                    "IS NULL applies to property values only".to_string(),
                ));
            };
            let exists = Constraint::PropertyExistence(name);
            return Ok(if negated { exists } else { exists.negate() });
        }
        if self.accept_keyword("NOT") {
            self.expect_keyword("LIKE")?;
            let right = self.operand()?;
            return Ok(Constraint::compare(left, Operator::Like, right).negate());
        }
        let operator = self.operator()?;
        let right = self.operand()?;
        Ok(Constraint::compare(left, operator, right))
    }

    /// `(path)` or `(selector, path)`.
    fn path_argument(&mut self) -> Result<Path> {
        self.expect_symbol("(")?;
        let mut text = self.path_text()?;
        if self.accept_symbol(",") {
            text = self.path_text()?;
        }
        self.expect_symbol(")")?;
        self.context.path(&text)
    }

    fn path_text(&mut self) -> Result<String> {
        let text = match self.peek() {
            Some(Token::Text(text)) | Some(Token::Bracketed(text)) | Some(Token::Word(text)) => {
                text.clone()
            }
            _ => return Err(self.error("a path")),
        };
        self.position += 1;
        Ok(text)
    }

    fn text(&mut self) -> Result<String> {
        let Some(Token::Text(text)) = self.peek().cloned() else {
            return Err(self.error("a string literal"));
        };
        self.position += 1;
        Ok(text)
    }

    fn operator(&mut self) -> Result<Operator> {
        if self.accept_keyword("LIKE") {
            return Ok(Operator::Like);
        }
        let operator = match self.peek() {
            Some(Token::Symbol("=")) => Operator::EqualTo,
            Some(Token::Symbol("!=")) | Some(Token::Symbol("<>")) => Operator::NotEqualTo,
            Some(Token::Symbol("<")) => Operator::LessThan,
            Some(Token::Symbol("<=")) => Operator::LessThanOrEqualTo,
            Some(Token::Symbol(">")) => Operator::GreaterThan,
            Some(Token::Symbol(">=")) => Operator::GreaterThanOrEqualTo,
            _ => return Err(self.error("a comparison operator")),
        };
        self.position += 1;
        Ok(operator)
    }

    fn operand(&mut self) -> Result<Operand> {
        let wrappers: [(&str, fn(Box<Operand>) -> Operand); 3] = [
            ("LOWER", Operand::Lower),
            ("UPPER", Operand::Upper),
            ("LENGTH", Operand::Length),
        ];
        for (function, wrap) in wrappers {
            if self.is_function(function) {
                self.position += 2;
                let inner = self.operand()?;
                self.expect_symbol(")")?;
                return Ok(wrap(Box::new(inner)));
            }
        }
        for (function, operand) in [
            ("NAME", Operand::NodeName),
            ("LOCALNAME", Operand::NodeLocalName),
            ("DEPTH", Operand::NodeDepth),
            ("PATH", Operand::NodePath),
        ] {
            if self.is_function(function) {
                self.position += 2;
                // Optional selector name.
                if !self.accept_symbol(")") {
                    self.raw_name()?;
                    self.expect_symbol(")")?;
                }
                return Ok(operand);
            }
        }

        match self.peek().cloned() {
            Some(Token::Text(text)) => {
                self.position += 1;
                Ok(Operand::Literal(Value::String(text)))
            }
            Some(Token::Number(text)) => {
                self.position += 1;
                let value = match text.parse::<i64>() {
                    Ok(long) => Value::Long(long),
                    Err(_) => Value::Double(text.parse().map_err(|_| {
                        RepographError::QueryParse(format!("invalid number '{}'", text))
                    })?),
                };
                Ok(Operand::Literal(value))
            }
            Some(Token::Word(_)) | Some(Token::Bracketed(_)) => {
                Ok(Operand::PropertyValue(self.property_name()?))
            }
            _ => Err(self.error("an operand")),
        }
    }
}

/// Parse the SQL subset:
/// `SELECT cols FROM table [WHERE constraint] [LIMIT n [OFFSET m]]`.
///
/// Names are resolved with the context's namespace registry.
pub fn parse_sql(sql: &str, context: &ExecutionContext) -> Result<Query> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser {
        tokens,
        position: 0,
        context,
        table: String::new(),
    };
    parser.query()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::JCR_URI;

    fn parse(sql: &str) -> Query {
        parse_sql(sql, &ExecutionContext::new()).unwrap()
    }

    fn prop(name: &str) -> Operand {
        Operand::PropertyValue(Name::unqualified(name))
    }

    #[test]
    fn test_select_star() {
        let query = parse("SELECT * FROM cars");
        assert_eq!(query, Query::select_all("cars"));
    }

    #[test]
    fn test_named_and_bracketed_columns() {
        let query = parse("select maker, [jcr:primaryType], cars.model from [cars]");
        assert_eq!(
            query.columns,
            Columns::Named(vec![
                Name::unqualified("maker"),
                Name::new(JCR_URI, "primaryType"),
                Name::unqualified("model"),
            ])
        );
        assert_eq!(query.table, "cars");
    }

    #[test]
    fn test_where_precedence() {
        let query = parse("SELECT * FROM cars WHERE a = 'x' OR b = 'y' AND NOT c = 'z'");
        let expected = Constraint::compare(prop("a"), Operator::EqualTo, Operand::Literal("x".into())).or(
            Constraint::compare(prop("b"), Operator::EqualTo, Operand::Literal("y".into())).and(
                Constraint::compare(prop("c"), Operator::EqualTo, Operand::Literal("z".into()))
                    .negate(),
            ),
        );
        assert_eq!(query.constraint, Some(expected));
    }

    #[test]
    fn test_parentheses_and_operators() {
        let query = parse("SELECT * FROM cars WHERE (year >= 2008 OR msrp <> 'n/a') AND mpg < 20.5");
        let Some(Constraint::And(left, right)) = query.constraint else {
            panic!("expected AND");
        };
        assert!(matches!(*left, Constraint::Or(_, _)));
        assert_eq!(
            *right,
            Constraint::compare(prop("mpg"), Operator::LessThan, Operand::Literal(Value::Double(20.5)))
        );
    }

    #[test]
    fn test_functions() {
        let query = parse(
            "SELECT * FROM cars WHERE LOWER(maker) LIKE 'toy%' AND LENGTH(model) > 3 AND NAME() = 'x' AND DEPTH(cars) = 3",
        );
        let text = format!("{:?}", query.constraint);
        assert!(text.contains("Lower(PropertyValue"));
        assert!(text.contains("Like"));
        assert!(text.contains("Length(PropertyValue"));
        assert!(text.contains("NodeName"));
        assert!(text.contains("NodeDepth"));
    }

    #[test]
    fn test_is_null_and_not_like() {
        let query = parse("SELECT * FROM cars WHERE engine IS NULL AND msrp IS NOT NULL AND model NOT LIKE 'L%'");
        let expected = Constraint::PropertyExistence(Name::unqualified("engine"))
            .negate()
            .and(Constraint::PropertyExistence(Name::unqualified("msrp")))
            .and(
                Constraint::compare(prop("model"), Operator::Like, Operand::Literal("L%".into()))
                    .negate(),
            );
        assert_eq!(query.constraint, Some(expected));
    }

    #[test]
    fn test_contains_and_tree_predicates() {
        let query = parse(
            "SELECT * FROM cars WHERE CONTAINS(*, 'toyota') AND CONTAINS(cars.model, 'prius') AND ISDESCENDANTNODE('/Cars') AND ISCHILDNODE(cars, [/Cars/Hybrid])",
        );
        let context = ExecutionContext::new();
        let expected = Constraint::FullTextSearch {
            property: None,
            expression: "toyota".to_string(),
        }
        .and(Constraint::FullTextSearch {
            property: Some(Name::unqualified("model")),
            expression: "prius".to_string(),
        })
        .and(Constraint::DescendantNode(context.path("/Cars").unwrap()))
        .and(Constraint::ChildNode(context.path("/Cars/Hybrid").unwrap()));
        assert_eq!(query.constraint, Some(expected));
    }

    #[test]
    fn test_limit_offset() {
        let query = parse("SELECT * FROM cars LIMIT 5 OFFSET 2");
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.offset, 2);
    }

    #[test]
    fn test_string_escape() {
        let query = parse("SELECT * FROM t WHERE a = 'it''s'");
        assert_eq!(
            query.constraint,
            Some(Constraint::compare(prop("a"), Operator::EqualTo, Operand::Literal("it's".into())))
        );
    }

    #[test]
    fn test_errors() {
        let context = ExecutionContext::new();
        for sql in [
            "",
            "SELECT FROM cars",
            "SELECT * cars",
            "SELECT * FROM cars WHERE",
            "SELECT * FROM cars WHERE a = 'open",
            "SELECT * FROM cars WHERE a ~ 1",
            "SELECT * FROM cars LIMIT x",
            "SELECT * FROM cars extra",
            "SELECT * FROM cars WHERE NAME() IS NULL",
        ] {
            assert!(
                matches!(parse_sql(sql, &context), Err(RepographError::QueryParse(_))),
                "{} should not parse",
                sql
            );
        }
        assert!(matches!(
            parse_sql("SELECT * FROM t WHERE nope:x = 1", &context),
            Err(RepographError::Namespace(_))
        ));
    }
}
