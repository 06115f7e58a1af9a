//! Rule conditions: a closed predicate grammar over one field occurrence.
//!
//! Conditions are parsed once, when a rule document is loaded, into a
//! [`Condition`] tree that is interpreted against a [`FieldRef`]. The grammar
//! only compares field content with literals, so rule documents never carry
//! executable code.
//!
//! ```text
//! expr     := and_expr ("or" and_expr)*
//! and_expr := unary ("and" unary)*
//! unary    := "not" unary | "(" expr ")" | test
//! test     := "has" "$"code
//!           | operand ("==" | "!=") literal
//!           | operand "in" "(" literal ("," literal)* ")"
//! operand  := "$"code | "[" digits "]" | "ind1" | "ind2"
//! literal  := "'" chars "'" | "\"" chars "\""
//! ```
//!
//! # Examples
//!
//! ```
//! use rdacore::rules::condition::Condition;
//! use rdacore::{Field, FieldRef};
//!
//! let cond = Condition::parse("$2 == 'marccontent' and not ind1 == '#'").unwrap();
//! let field = Field::builder("336".to_string(), '1', ' ')
//!     .subfield_str('a', "text")
//!     .subfield_str('2', "marc")
//!     .subfield_str('2', "content")
//!     .build();
//! assert!(cond.evaluate(FieldRef::Data(&field)));
//! ```

use crate::record::FieldRef;
use crate::rules::normalize_indicator;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while};
use nom::character::complete::{char, digit1, multispace0, satisfy};
use nom::combinator::{all_consuming, map, map_res, not};
use nom::multi::separated_list1;
use nom::sequence::{delimited, preceded, terminated};
use nom::IResult;

/// The part of a field a comparison reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Concatenation of every subfield with this code (`$x`)
    Subfield(char),
    /// Character at a control field position (`[n]`)
    Position(usize),
    /// Indicator 0 (`ind1`) or 1 (`ind2`)
    Indicator(u8),
}

/// Comparison applied to an operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Test {
    /// `== 'literal'`
    Equals(String),
    /// `!= 'literal'`
    NotEquals(String),
    /// `in ('a', 'b', ...)`
    OneOf(Vec<String>),
}

/// A parsed rule condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Operand comparison
    Compare {
        /// What to read from the field
        operand: Operand,
        /// How to compare it
        test: Test,
    },
    /// At least one subfield with this code is present (`has $x`)
    HasSubfield(char),
    /// Negation
    Not(Box<Condition>),
    /// Conjunction
    All(Vec<Condition>),
    /// Disjunction
    Any(Vec<Condition>),
}

impl Condition {
    /// Parse a condition expression.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if `text` is not a complete
    /// expression of the grammar.
    pub fn parse(text: &str) -> Result<Self, String> {
        all_consuming(ws(expr))(text)
            .map(|(_, condition)| condition)
            .map_err(|e| format!("cannot parse condition '{text}': {e}"))
    }

    /// Evaluate against one field occurrence. Pure: no side effects.
    #[must_use]
    pub fn evaluate(&self, field: FieldRef<'_>) -> bool {
        match self {
            Condition::Compare { operand, test } => {
                let Some(actual) = read_operand(*operand, field) else {
                    return false;
                };
                let matches = |literal: &str| match operand {
                    Operand::Indicator(_) => normalize_literal_indicator(literal) == actual,
                    _ => literal == actual,
                };
                match test {
                    Test::Equals(literal) => matches(literal),
                    Test::NotEquals(literal) => !matches(literal),
                    Test::OneOf(literals) => literals.iter().any(|l| matches(l)),
                }
            },
            Condition::HasSubfield(code) => match field {
                FieldRef::Data(f) => f.subfields.iter().any(|sf| sf.code == *code),
                FieldRef::Control { .. } => false,
            },
            Condition::Not(inner) => !inner.evaluate(field),
            Condition::All(parts) => parts.iter().all(|c| c.evaluate(field)),
            Condition::Any(parts) => parts.iter().any(|c| c.evaluate(field)),
        }
    }
}

fn read_operand(operand: Operand, field: FieldRef<'_>) -> Option<String> {
    match operand {
        Operand::Subfield(code) => match field {
            FieldRef::Data(_) => Some(field.joined_subfield(code)),
            FieldRef::Control { .. } => None,
        },
        Operand::Position(index) => field.char_at(index).map(String::from),
        Operand::Indicator(which) => field
            .indicator(which)
            .map(|c| normalize_indicator(c).to_string()),
    }
}

fn normalize_literal_indicator(literal: &str) -> String {
    let mut chars = literal.chars();
    match (chars.next(), chars.next()) {
        (None, _) => " ".to_string(),
        (Some(c), None) => normalize_indicator(c).to_string(),
        _ => literal.to_string(),
    }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(
        tag(word),
        not(satisfy(|c: char| c.is_alphanumeric() || c == '_')),
    )
}

fn literal(input: &str) -> IResult<&str, String> {
    map(
        alt((
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
        )),
        str::to_string,
    )(input)
}

fn subfield_code(input: &str) -> IResult<&str, char> {
    preceded(char('$'), satisfy(|c: char| c.is_ascii_alphanumeric()))(input)
}

fn operand(input: &str) -> IResult<&str, Operand> {
    alt((
        map(subfield_code, Operand::Subfield),
        map(
            delimited(char('['), map_res(digit1, str::parse::<usize>), char(']')),
            Operand::Position,
        ),
        map(keyword("ind1"), |_| Operand::Indicator(0)),
        map(keyword("ind2"), |_| Operand::Indicator(1)),
    ))(input)
}

fn comparison(input: &str) -> IResult<&str, Condition> {
    let (input, operand) = ws(operand)(input)?;
    let (input, test) = alt((
        map(preceded(ws(tag("==")), ws(literal)), Test::Equals),
        map(preceded(ws(tag("!=")), ws(literal)), Test::NotEquals),
        map(
            preceded(
                ws(keyword("in")),
                delimited(
                    ws(char('(')),
                    separated_list1(ws(char(',')), ws(literal)),
                    ws(char(')')),
                ),
            ),
            Test::OneOf,
        ),
    ))(input)?;
    Ok((input, Condition::Compare { operand, test }))
}

fn unary(input: &str) -> IResult<&str, Condition> {
    alt((
        map(preceded(ws(keyword("not")), unary), |inner| {
            Condition::Not(Box::new(inner))
        }),
        delimited(ws(char('(')), expr, ws(char(')'))),
        map(preceded(ws(keyword("has")), ws(subfield_code)), Condition::HasSubfield),
        comparison,
    ))(input)
}

fn and_expr(input: &str) -> IResult<&str, Condition> {
    map(separated_list1(ws(keyword("and")), unary), |mut parts| {
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Condition::All(parts)
        }
    })(input)
}

fn expr(input: &str) -> IResult<&str, Condition> {
    map(separated_list1(ws(keyword("or")), and_expr), |mut parts| {
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Condition::Any(parts)
        }
    })(input)
}
