//! Minimal symbolic handles for declared variables and output expressions.
//!
//! This is only what the registry needs to hand out stable handles and evaluate outputs
//! numerically. Differentiation and code emission belong to the model code generator.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::DaeError;

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(0);

/// A named scalar symbol. Two symbols are equal only if they were created by the same call,
/// regardless of their names.
#[derive(Clone, Debug)]
pub struct Symbol {
    id: u64,
    name: Arc<str>,
}

impl Symbol {
    pub(crate) fn new(name: &str) -> Self {
        Symbol {
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl std::hash::Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Sin,
    Cos,
    Tan,
    Tanh,
    Exp,
    Ln,
    Sqrt,
    Abs,
}

impl UnaryOp {
    fn apply(self, v: f64) -> f64 {
        match self {
            UnaryOp::Sin => v.sin(),
            UnaryOp::Cos => v.cos(),
            UnaryOp::Tan => v.tan(),
            UnaryOp::Tanh => v.tanh(),
            UnaryOp::Exp => v.exp(),
            UnaryOp::Ln => v.ln(),
            UnaryOp::Sqrt => v.sqrt(),
            UnaryOp::Abs => v.abs(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tan => "tan",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Exp => "exp",
            UnaryOp::Ln => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Abs => "fabs",
        }
    }
}

/// Scalar symbolic expression
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Symbol(Symbol),
    Const(f64),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
}

impl Expr {
    pub fn constant(value: f64) -> Self {
        Expr::Const(value)
    }

    /// The symbol behind this expression, if it is a bare symbol
    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Expr::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn powf(self, exponent: impl Into<Expr>) -> Self {
        Expr::Pow(Box::new(self), Box::new(exponent.into()))
    }

    pub fn sin(self) -> Self {
        Expr::Unary(UnaryOp::Sin, Box::new(self))
    }

    pub fn cos(self) -> Self {
        Expr::Unary(UnaryOp::Cos, Box::new(self))
    }

    pub fn tan(self) -> Self {
        Expr::Unary(UnaryOp::Tan, Box::new(self))
    }

    pub fn tanh(self) -> Self {
        Expr::Unary(UnaryOp::Tanh, Box::new(self))
    }

    pub fn exp(self) -> Self {
        Expr::Unary(UnaryOp::Exp, Box::new(self))
    }

    pub fn ln(self) -> Self {
        Expr::Unary(UnaryOp::Ln, Box::new(self))
    }

    pub fn sqrt(self) -> Self {
        Expr::Unary(UnaryOp::Sqrt, Box::new(self))
    }

    pub fn abs(self) -> Self {
        Expr::Unary(UnaryOp::Abs, Box::new(self))
    }

    /// Evaluates the expression, resolving symbols through `lookup`
    pub fn eval<F>(&self, lookup: &F) -> Result<f64, DaeError>
    where
        F: Fn(&Symbol) -> Option<f64>,
    {
        Ok(match self {
            Expr::Symbol(s) => {
                lookup(s).ok_or_else(|| DaeError::UnboundSymbol(s.name().to_string()))?
            }
            Expr::Const(c) => *c,
            Expr::Neg(a) => -a.eval(lookup)?,
            Expr::Add(a, b) => a.eval(lookup)? + b.eval(lookup)?,
            Expr::Sub(a, b) => a.eval(lookup)? - b.eval(lookup)?,
            Expr::Mul(a, b) => a.eval(lookup)? * b.eval(lookup)?,
            Expr::Div(a, b) => a.eval(lookup)? / b.eval(lookup)?,
            Expr::Pow(a, b) => a.eval(lookup)?.powf(b.eval(lookup)?),
            Expr::Unary(op, a) => op.apply(a.eval(lookup)?),
        })
    }

    /// Collects every distinct symbol referenced by the expression, in first-seen order
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut out = Vec::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut Vec<Symbol>) {
        match self {
            Expr::Symbol(s) => {
                if !out.contains(s) {
                    out.push(s.clone());
                }
            }
            Expr::Const(_) => {}
            Expr::Neg(a) | Expr::Unary(_, a) => a.collect_symbols(out),
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Pow(a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Symbol(s) => write!(f, "{}", s.name()),
            Expr::Const(c) => write!(f, "{}", c),
            Expr::Neg(a) => write!(f, "(-{})", a),
            Expr::Add(a, b) => write!(f, "({}+{})", a, b),
            Expr::Sub(a, b) => write!(f, "({}-{})", a, b),
            Expr::Mul(a, b) => write!(f, "({}*{})", a, b),
            Expr::Div(a, b) => write!(f, "({}/{})", a, b),
            Expr::Pow(a, b) => write!(f, "pow({},{})", a, b),
            Expr::Unary(op, a) => write!(f, "{}({})", op.as_str(), a),
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Const(value)
    }
}

impl From<Symbol> for Expr {
    fn from(value: Symbol) -> Self {
        Expr::Symbol(value)
    }
}

impl From<&Expr> for Expr {
    fn from(value: &Expr) -> Self {
        value.clone()
    }
}

macro_rules! binary_op {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl<R: Into<Expr>> $trait<R> for Expr {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                Expr::$variant(Box::new(self), Box::new(rhs.into()))
            }
        }

        impl<R: Into<Expr>> $trait<R> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                Expr::$variant(Box::new(self.clone()), Box::new(rhs.into()))
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::$variant(Box::new(Expr::Const(self)), Box::new(rhs))
            }
        }
    };
}

binary_op!(Add, add, Add);
binary_op!(Sub, sub, Sub);
binary_op!(Mul, mul, Mul);
binary_op!(Div, div, Div);

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }
}

impl Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self.clone()))
    }
}

/// A column of expressions, the concatenation of one or more variable categories
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SymVector(Vec<Expr>);

impl SymVector {
    pub fn new(elements: Vec<Expr>) -> Self {
        SymVector(elements)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Expr] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Expr> {
        self.0.iter()
    }

    /// Appends `other` below `self`
    pub fn concat(mut self, other: &SymVector) -> Self {
        self.0.extend(other.0.iter().cloned());
        self
    }

    /// The symbols making up this vector. Every element built by the registry is a bare symbol.
    pub(crate) fn symbols(&self) -> Vec<Symbol> {
        self.0.iter().flat_map(|e| e.symbols()).collect()
    }
}

impl std::ops::Index<usize> for SymVector {
    type Output = Expr;
    fn index(&self, index: usize) -> &Expr {
        &self.0[index]
    }
}

impl IntoIterator for SymVector {
    type Item = Expr;
    type IntoIter = std::vec::IntoIter<Expr>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Numeric function from `(x, [u; p])` to the model's ordered outputs
#[derive(Clone, Debug)]
pub struct OutputsFunction {
    x: Vec<Symbol>,
    up: Vec<Symbol>,
    names: Vec<String>,
    outputs: Vec<Expr>,
}

impl OutputsFunction {
    pub(crate) fn new(
        x: &SymVector,
        up: &SymVector,
        names: Vec<String>,
        outputs: Vec<Expr>,
    ) -> Self {
        OutputsFunction {
            x: x.symbols(),
            up: up.symbols(),
            names,
            outputs,
        }
    }

    /// Output names, in the order values are returned
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn num_inputs(&self) -> (usize, usize) {
        (self.x.len(), self.up.len())
    }

    pub fn evaluate(&self, x: &[f64], up: &[f64]) -> Result<Vec<f64>, DaeError> {
        if x.len() != self.x.len() {
            return Err(DaeError::InputLength {
                input: "x",
                expected: self.x.len(),
                actual: x.len(),
            });
        }
        if up.len() != self.up.len() {
            return Err(DaeError::InputLength {
                input: "up",
                expected: self.up.len(),
                actual: up.len(),
            });
        }

        let bindings: HashMap<u64, f64> = self
            .x
            .iter()
            .zip(x)
            .chain(self.up.iter().zip(up))
            .map(|(s, v)| (s.id(), *v))
            .collect();
        let lookup = |s: &Symbol| bindings.get(&s.id()).copied();

        self.outputs.iter().map(|e| e.eval(&lookup)).collect()
    }

    /// Evaluates and pairs each value with its output name
    pub fn evaluate_named(&self, x: &[f64], up: &[f64]) -> Result<HashMap<String, f64>, DaeError> {
        let values = self.evaluate(x, up)?;
        Ok(self.names.iter().cloned().zip(values).collect())
    }
}
