//! Band arithmetic formulas for spectral indices
//!
//! Formulas are written over band identifiers, e.g. `(B08-B04)/(B08+B04)`.
//! The grammar is deliberately tiny:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('-' | '+') unary | primary
//! primary := NUMBER | BAND | '(' expr ')'
//! ```
//!
//! The only names an expression can see are the keys of the [`BandMap`] it is
//! evaluated against. There are no functions, attributes or assignments.

use crate::{sanitize_non_finite, MathError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Pixel arrays of one acquisition, keyed by band name (e.g. "B04")
pub type BandMap = HashMap<String, Array2<f64>>;

/// Named spectral indices with a fixed canonical expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormulaPreset {
    /// Normalized Difference Vegetation Index
    Ndvi,
    /// Normalized Difference Water Index
    Ndwi,
    /// Normalized Difference Built-up Index
    Ndbi,
    /// Enhanced Vegetation Index
    Evi,
    /// Soil Adjusted Vegetation Index
    Savi,
    /// Atmospherically Resistant Vegetation Index
    Arvi,
    /// Land Surface Water Index
    Lswi,
    /// Normalized Difference Snow Index
    Ndsi,
    /// Normalized Burn Ratio
    Nbr,
    /// Modified Normalized Difference Water Index
    Mndwi,
}

impl FormulaPreset {
    /// Every known preset
    pub const ALL: [FormulaPreset; 10] = [
        FormulaPreset::Ndvi,
        FormulaPreset::Ndwi,
        FormulaPreset::Ndbi,
        FormulaPreset::Evi,
        FormulaPreset::Savi,
        FormulaPreset::Arvi,
        FormulaPreset::Lswi,
        FormulaPreset::Ndsi,
        FormulaPreset::Nbr,
        FormulaPreset::Mndwi,
    ];

    /// Preset name as written in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            FormulaPreset::Ndvi => "NDVI",
            FormulaPreset::Ndwi => "NDWI",
            FormulaPreset::Ndbi => "NDBI",
            FormulaPreset::Evi => "EVI",
            FormulaPreset::Savi => "SAVI",
            FormulaPreset::Arvi => "ARVI",
            FormulaPreset::Lswi => "LSWI",
            FormulaPreset::Ndsi => "NDSI",
            FormulaPreset::Nbr => "NBR",
            FormulaPreset::Mndwi => "MNDWI",
        }
    }

    /// Canonical band expression of the preset
    pub fn expression(&self) -> &'static str {
        match self {
            FormulaPreset::Ndvi => "(B08-B04)/(B08+B04)",
            FormulaPreset::Ndwi => "(B03-B08)/(B03+B08)",
            FormulaPreset::Ndbi => "(B11-B08)/(B11+B08)",
            FormulaPreset::Evi => "2.5*((B08-B04)/(B08+6*B04-7.5*B02+1))",
            FormulaPreset::Savi => "((B08-B04)/(B08+B04+0.5))*(1+0.5)",
            FormulaPreset::Arvi => "(B08-(2*B04-B02))/(B08+(2*B04-B02))",
            FormulaPreset::Lswi => "(B08-B11)/(B08+B11)",
            FormulaPreset::Ndsi => "(B03-B11)/(B03+B11)",
            FormulaPreset::Nbr => "(B08-B12)/(B08+B12)",
            FormulaPreset::Mndwi => "(B03-B11)/(B03+B11)",
        }
    }

    /// Look up a preset by its exact name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|preset| preset.name() == name)
    }
}

/// Resolve a preset name to its expression.
///
/// Anything that is not a preset name is returned unchanged, so a raw
/// expression can be passed wherever a preset is accepted.
///
/// ```
/// use band_math::resolve_preset;
///
/// assert_eq!(resolve_preset("NDVI"), "(B08-B04)/(B08+B04)");
/// assert_eq!(resolve_preset("B08/B04"), "B08/B04");
/// ```
pub fn resolve_preset(name: &str) -> &str {
    match FormulaPreset::from_name(name) {
        Some(preset) => preset.expression(),
        None => name,
    }
}

/// Parse and evaluate a formula (or preset name) against one band map.
pub fn evaluate(expression: &str, bands: &BandMap) -> Result<Array2<f64>> {
    Formula::parse(resolve_preset(expression))?.evaluate(bands)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
        }
    }

    fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(f64),
    Band(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::Band(name) => write!(f, "{}", name),
            Expr::Neg(inner) => write!(f, "(-{})", inner),
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Ident(String),
    Op(BinaryOp),
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    position: usize,
}

fn syntax_error(position: usize, message: impl Into<String>) -> MathError {
    MathError::Syntax {
        position,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;
        let kind = match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                pos += 1;
                continue;
            }
            b'+' => TokenKind::Op(BinaryOp::Add),
            b'-' => TokenKind::Op(BinaryOp::Sub),
            b'*' => TokenKind::Op(BinaryOp::Mul),
            b'/' => TokenKind::Op(BinaryOp::Div),
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'0'..=b'9' | b'.' => {
                while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                    pos += 1;
                }
                // Exponent, only when followed by digits
                if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
                    let mut exp = pos + 1;
                    if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
                        exp += 1;
                    }
                    if exp < bytes.len() && bytes[exp].is_ascii_digit() {
                        while exp < bytes.len() && bytes[exp].is_ascii_digit() {
                            exp += 1;
                        }
                        pos = exp;
                    }
                }
                let text = &source[start..pos];
                let value = text
                    .parse::<f64>()
                    .map_err(|_| syntax_error(start, format!("invalid number '{}'", text)))?;
                tokens.push(Token {
                    kind: TokenKind::Number(value),
                    position: start,
                });
                continue;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_')
                {
                    pos += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(source[start..pos].to_string()),
                    position: start,
                });
                continue;
            }
            _ => {
                let ch = source[start..].chars().next().unwrap_or('?');
                return Err(syntax_error(start, format!("unexpected character '{}'", ch)));
            }
        };
        tokens.push(Token {
            kind,
            position: start,
        });
        pos += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    end: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, end: usize) -> Self {
        Self {
            tokens,
            cursor: 0,
            end,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn peek_op(&self, ops: &[BinaryOp]) -> Option<BinaryOp> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Op(op),
                ..
            }) if ops.contains(op) => Some(*op),
            _ => None,
        }
    }

    fn parse(mut self) -> Result<Expr> {
        let expr = self.expr()?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(syntax_error(
                token.position,
                format!("unexpected {}", describe(&token.kind)),
            )),
        }
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        while let Some(op) = self.peek_op(&[BinaryOp::Add, BinaryOp::Sub]) {
            self.cursor += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek_op(&[BinaryOp::Mul, BinaryOp::Div]) {
            self.cursor += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.peek_op(&[BinaryOp::Add, BinaryOp::Sub]) {
            Some(BinaryOp::Sub) => {
                self.cursor += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(_) => {
                self.cursor += 1;
                self.unary()
            }
            None => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let end = self.end;
        match self.next() {
            Some(Token {
                kind: TokenKind::Number(value),
                ..
            }) => Ok(Expr::Literal(value)),
            Some(Token {
                kind: TokenKind::Ident(name),
                ..
            }) => Ok(Expr::Band(name)),
            Some(Token {
                kind: TokenKind::LParen,
                position,
            }) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => Ok(inner),
                    Some(token) => Err(syntax_error(
                        token.position,
                        format!("expected ')' to close '(' at {}", position),
                    )),
                    None => Err(syntax_error(
                        end,
                        format!("unclosed '(' opened at {}", position),
                    )),
                }
            }
            Some(token) => Err(syntax_error(
                token.position,
                format!("unexpected {}", describe(&token.kind)),
            )),
            None => Err(syntax_error(end, "unexpected end of formula")),
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Number(value) => format!("number {}", value),
        TokenKind::Ident(name) => format!("identifier '{}'", name),
        TokenKind::Op(op) => format!("operator '{}'", op.symbol()),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
    }
}

enum Value {
    Scalar(f64),
    Field(Array2<f64>),
}

fn combine(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
    Ok(match (lhs, rhs) {
        (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(op.apply(a, b)),
        (Value::Field(a), Value::Scalar(b)) => Value::Field(a.mapv(|x| op.apply(x, b))),
        (Value::Scalar(a), Value::Field(b)) => Value::Field(b.mapv(|x| op.apply(a, x))),
        (Value::Field(mut a), Value::Field(b)) => {
            if a.shape() != b.shape() {
                return Err(MathError::ShapeMismatch {
                    expected: a.shape().to_vec(),
                    found: b.shape().to_vec(),
                });
            }
            a.zip_mut_with(&b, |x, &y| *x = op.apply(*x, y));
            Value::Field(a)
        }
    })
}

/// A parsed band formula, ready to be evaluated against many images
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    root: Expr,
}

impl Formula {
    /// Parse a band expression. Preset names are not resolved here, see
    /// [`Formula::from_preset_or_expression`].
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let root = Parser::new(tokens, source.len()).parse()?;
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// Resolve a preset name (if it is one) and parse the result
    pub fn from_preset_or_expression(name: &str) -> Result<Self> {
        Self::parse(resolve_preset(name))
    }

    /// The expression text this formula was parsed from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Band identifiers referenced by the formula, sorted and deduplicated
    pub fn bands(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        collect_bands(&self.root, &mut names);
        names.into_iter().collect()
    }

    /// Evaluate the formula pixel by pixel.
    ///
    /// Non-finite results (division by zero, 0/0) are replaced by 0. A formula
    /// without any band reference yields a 1x1 field.
    pub fn evaluate(&self, bands: &BandMap) -> Result<Array2<f64>> {
        let mut field = match self.eval(&self.root, bands)? {
            Value::Field(field) => field,
            Value::Scalar(value) => Array2::from_elem((1, 1), value),
        };
        sanitize_non_finite(&mut field);
        Ok(field)
    }

    fn eval(&self, expr: &Expr, bands: &BandMap) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(Value::Scalar(*value)),
            Expr::Band(name) => bands
                .get(name)
                .map(|band| Value::Field(band.clone()))
                .ok_or_else(|| MathError::UnknownBand(name.clone())),
            Expr::Neg(inner) => Ok(match self.eval(inner, bands)? {
                Value::Scalar(value) => Value::Scalar(-value),
                Value::Field(field) => Value::Field(field.mapv(|x| -x)),
            }),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, bands)?;
                let rhs = self.eval(rhs, bands)?;
                combine(*op, lhs, rhs)
            }
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

fn collect_bands(expr: &Expr, names: &mut BTreeSet<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Band(name) => {
            names.insert(name.clone());
        }
        Expr::Neg(inner) => collect_bands(inner, names),
        Expr::Binary { lhs, rhs, .. } => {
            collect_bands(lhs, names);
            collect_bands(rhs, names);
        }
    }
}
