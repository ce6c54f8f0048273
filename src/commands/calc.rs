use super::{Command, CommandContext};
use std::f64::consts;
use thiserror::Error;

const HELP: &str = "\
Calculator

Usage:
  :calc <expression>       evaluate an expression
  :calc functions          list functions
  :calc constants          list constants

Operators: + - * / % ^ (or **), parentheses, unary minus
Examples:
  :calc (3 + 4) * 5
  :calc sqrt(16) + sin(pi/2)
  :calc log10(1000)";

const FUNCTIONS: &[(&str, fn(f64) -> Result<f64, CalcError>)] = &[
    ("abs", |x| Ok(x.abs())),
    ("acos", |x| domain(x.acos(), "acos")),
    ("asin", |x| domain(x.asin(), "asin")),
    ("atan", |x| Ok(x.atan())),
    ("ceil", |x| Ok(x.ceil())),
    ("cos", |x| Ok(x.cos())),
    ("cosh", |x| Ok(x.cosh())),
    ("degrees", |x| Ok(x.to_degrees())),
    ("exp", |x| Ok(x.exp())),
    ("factorial", factorial),
    ("floor", |x| Ok(x.floor())),
    ("ln", |x| positive(x, "ln").map(f64::ln)),
    ("log", |x| positive(x, "log").map(f64::ln)),
    ("log10", |x| positive(x, "log10").map(f64::log10)),
    ("log2", |x| positive(x, "log2").map(f64::log2)),
    ("radians", |x| Ok(x.to_radians())),
    ("round", |x| Ok(x.round())),
    ("sin", |x| Ok(x.sin())),
    ("sinh", |x| Ok(x.sinh())),
    ("sqrt", |x| {
        if x < 0.0 {
            Err(CalcError::Domain("sqrt of a negative number".to_string()))
        } else {
            Ok(x.sqrt())
        }
    }),
    ("tan", |x| Ok(x.tan())),
    ("tanh", |x| Ok(x.tanh())),
];

/// Nesting bound for parentheses, unary signs and exponents
const MAX_DEPTH: usize = 256;

const CONSTANTS: &[(&str, f64)] = &[("e", consts::E), ("pi", consts::PI), ("tau", consts::TAU)];

#[derive(Debug, Error, PartialEq)]
pub enum CalcError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected '{0}'")]
    UnexpectedToken(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("unknown constant: {0}")]
    UnknownConstant(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("{0}")]
    Domain(String),
    #[error("expression nested too deeply")]
    TooDeep,
}

fn domain(value: f64, name: &str) -> Result<f64, CalcError> {
    if value.is_nan() {
        Err(CalcError::Domain(format!("{name} argument out of range")))
    } else {
        Ok(value)
    }
}

fn positive(x: f64, name: &str) -> Result<f64, CalcError> {
    if x > 0.0 {
        Ok(x)
    } else {
        Err(CalcError::Domain(format!("{name} of a non-positive number")))
    }
}

fn factorial(x: f64) -> Result<f64, CalcError> {
    if x < 0.0 || x.fract() != 0.0 || x > 170.0 {
        return Err(CalcError::Domain(
            "factorial needs a whole number between 0 and 170".to_string(),
        ));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let n = x as u32;
    Ok((1..=n).map(f64::from).product())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, CalcError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // exponent, e.g. 1e-3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse()
                    .map_err(|_| CalcError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect::<String>().to_lowercase()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Op('^'));
                i += 2;
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            other => return Err(CalcError::UnexpectedChar(other, i)),
        }
    }

    Ok(tokens)
}

/// Recursive-descent evaluator.
///
/// ```text
/// expr    := term (('+' | '-') term)*
/// term    := unary (('*' | '/' | '%') unary)*
/// unary   := ('-' | '+') unary | power
/// power   := primary ('^' unary)?
/// primary := number | name | name '(' expr ')' | '(' expr ')'
/// ```
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect_rparen(&mut self) -> Result<(), CalcError> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            Some(other) => Err(CalcError::UnexpectedToken(describe(&other))),
            None => Err(CalcError::UnexpectedEnd),
        }
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                '*' => value * rhs,
                _ if rhs == 0.0 => return Err(CalcError::DivisionByZero),
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    // Every nesting path passes through here
    fn unary(&mut self) -> Result<f64, CalcError> {
        if self.depth >= MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        self.depth += 1;
        let value = self.unary_inner();
        self.depth -= 1;
        value
    }

    fn unary_inner(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, CalcError> {
        let base = self.primary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, CalcError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect_rparen()?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let arg = self.expr()?;
                    self.expect_rparen()?;
                    let (_, func) = FUNCTIONS
                        .iter()
                        .find(|(n, _)| *n == name)
                        .ok_or(CalcError::UnknownFunction(name))?;
                    func(arg)
                } else {
                    CONSTANTS
                        .iter()
                        .find(|(n, _)| *n == name)
                        .map(|(_, v)| *v)
                        .ok_or(CalcError::UnknownConstant(name))
                }
            }
            Some(other) => Err(CalcError::UnexpectedToken(describe(&other))),
            None => Err(CalcError::UnexpectedEnd),
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => n.to_string(),
        Token::Ident(s) => s.clone(),
        Token::Op(c) => c.to_string(),
        Token::LParen => "(".to_string(),
        Token::RParen => ")".to_string(),
    }
}

/// Evaluate an arithmetic expression
pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(CalcError::UnexpectedEnd);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;

    if let Some(extra) = parser.peek() {
        return Err(CalcError::UnexpectedToken(describe(extra)));
    }
    if value.is_nan() {
        return Err(CalcError::Domain("result is not a number".to_string()));
    }
    Ok(value)
}

/// Whole numbers print without a fractional part
#[must_use]
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        let text = format!("{value:.10}");
        let text = text.trim_end_matches('0').trim_end_matches('.');
        if text.is_empty() || text == "-" {
            value.to_string()
        } else {
            text.to_string()
        }
    }
}

/// `:calc <expression>`
#[derive(Debug, Default, Clone, Copy)]
pub struct CalcCommand;

impl CalcCommand {
    #[must_use]
    pub fn boxed() -> Box<dyn Command> {
        Box::new(Self)
    }
}

impl Command for CalcCommand {
    fn name(&self) -> &'static str {
        "calc"
    }

    fn help(&self) -> &'static str {
        HELP
    }

    fn execute(&self, args: &str, _ctx: &CommandContext) -> String {
        let expression = args.trim();
        match expression.to_lowercase().as_str() {
            "" => "Please provide an expression. Usage: :calc 2 + 3 * 4".to_string(),
            "help" | "?" => HELP.to_string(),
            "functions" => {
                let names: Vec<String> = FUNCTIONS.iter().map(|(n, _)| format!("  {n}(x)")).collect();
                format!("Available functions:\n{}", names.join("\n"))
            }
            "constants" => {
                let names: Vec<String> = CONSTANTS
                    .iter()
                    .map(|(n, v)| format!("  {n} = {v}"))
                    .collect();
                format!("Available constants:\n{}", names.join("\n"))
            }
            _ => match evaluate(expression) {
                Ok(value) => format!("{expression} = {}", format_number(value)),
                Err(e) => format!("Calculation error: {e}"),
            },
        }
    }
}
