//! Expression module for representing mathematical expressions.
//!
//! This module defines the expression tree used for connection, objective and constraint
//! expressions as well as for the output equations of [`ExprComponent`](crate::model::ExprComponent).
//! The tree can be:
//! - Symbolically differentiated to compute derivatives
//! - Simplified using algebraic rules
//! - Evaluated against a [`Values`] source
//!
//! Supported operations include:
//! - Basic arithmetic (+, -, *, /)
//! - Variables and constants
//! - Absolute value
//! - Integer, floating point and expression exponents
//! - Transcendental functions (exp, ln, sqrt, sin, cos)
//!
//! # Symbolic Differentiation
//! The derivative method implements symbolic differentiation by recursively applying
//! calculus rules like:
//! - Product rule
//! - Quotient rule
//! - Chain rule
//! - Power rule
//! - Special function derivatives (exp, ln, sqrt, sin, cos)
//!
//! # Expression Simplification
//! The simplify method performs algebraic simplifications including:
//! - Constant folding (e.g. 2 + 3 → 5)
//! - Identity rules (e.g. x + 0 → x, x * 1 → x)
//! - Exponent rules (e.g. x^0 → 1, x^1 → x)
//!
//! A derivative of a linear expression simplifies to a constant, which is why connection
//! derivatives usually need no variable values at all.

use std::collections::BTreeSet;

use crate::errors::ExpressionError;
use crate::types::Values;

/// An expression tree node representing mathematical operations.
///
/// The expression tree is built recursively using `Box<Expr>` for nested expressions.
/// Variables are referenced by their (possibly dotted) name.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A constant floating point value
    Const(f64),
    /// A reference to a variable
    Var(String),
    /// Addition of two expressions
    Add(Box<Expr>, Box<Expr>),
    /// Multiplication of two expressions
    Mul(Box<Expr>, Box<Expr>),
    /// Subtraction of two expressions
    Sub(Box<Expr>, Box<Expr>),
    /// Division of two expressions
    Div(Box<Expr>, Box<Expr>),
    /// Absolute value of an expression
    Abs(Box<Expr>),
    /// Exponentiation of an expression by an integer constant
    Pow(Box<Expr>, i64),
    /// Exponentiation of an expression by a floating point constant
    PowFloat(Box<Expr>, f64),
    /// Exponentiation of an expression by another expression
    PowExpr(Box<Expr>, Box<Expr>),
    /// Exponential function of an expression
    Exp(Box<Expr>),
    /// Natural logarithm of an expression
    Ln(Box<Expr>),
    /// Square root of an expression
    Sqrt(Box<Expr>),
    /// Sine of an expression (argument in radians)
    Sin(Box<Expr>),
    /// Cosine of an expression (argument in radians)
    Cos(Box<Expr>),
    /// Negation of an expression
    Neg(Box<Expr>),
}

impl Expr {
    /// Shorthand for a boxed variable node.
    pub fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Var(name.to_string()))
    }

    /// Shorthand for a boxed constant node.
    pub fn constant(value: f64) -> Box<Expr> {
        Box::new(Expr::Const(value))
    }

    /// Returns the names of all variables referenced by the expression, sorted.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(name) => {
                names.insert(name.clone());
            }
            Expr::Add(l, r)
            | Expr::Mul(l, r)
            | Expr::Sub(l, r)
            | Expr::Div(l, r)
            | Expr::PowExpr(l, r) => {
                l.collect_variables(names);
                r.collect_variables(names);
            }
            Expr::Abs(e)
            | Expr::Pow(e, _)
            | Expr::PowFloat(e, _)
            | Expr::Exp(e)
            | Expr::Ln(e)
            | Expr::Sqrt(e)
            | Expr::Sin(e)
            | Expr::Cos(e)
            | Expr::Neg(e) => e.collect_variables(names),
        }
    }

    /// Evaluates the expression, reading variables from `values`.
    ///
    /// # Errors
    /// Returns `ExpressionError::MissingValue` for the first variable without a value.
    pub fn eval(&self, values: &dyn Values) -> Result<f64, ExpressionError> {
        Ok(match self {
            Expr::Const(c) => *c,
            Expr::Var(name) => values
                .value(name)
                .ok_or_else(|| ExpressionError::MissingValue(name.clone()))?,
            Expr::Add(l, r) => l.eval(values)? + r.eval(values)?,
            Expr::Sub(l, r) => l.eval(values)? - r.eval(values)?,
            Expr::Mul(l, r) => l.eval(values)? * r.eval(values)?,
            Expr::Div(l, r) => l.eval(values)? / r.eval(values)?,
            Expr::Abs(e) => e.eval(values)?.abs(),
            Expr::Pow(e, n) => e.eval(values)?.powi(*n as i32),
            Expr::PowFloat(e, p) => e.eval(values)?.powf(*p),
            Expr::PowExpr(b, p) => b.eval(values)?.powf(p.eval(values)?),
            Expr::Exp(e) => e.eval(values)?.exp(),
            Expr::Ln(e) => e.eval(values)?.ln(),
            Expr::Sqrt(e) => e.eval(values)?.sqrt(),
            Expr::Sin(e) => e.eval(values)?.sin(),
            Expr::Cos(e) => e.eval(values)?.cos(),
            Expr::Neg(e) => -e.eval(values)?,
        })
    }

    /// Computes the symbolic derivative of this expression with respect to a variable.
    ///
    /// Recursively applies the rules of differentiation to build a new expression tree
    /// representing the derivative. The rules implemented are:
    /// - d/dx(c) = 0 for constants
    /// - d/dx(x) = 1 for the variable we're differentiating with respect to
    /// - d/dx(y) = 0 for other variables
    /// - Sum rule: d/dx(f + g) = df/dx + dg/dx
    /// - Product rule: d/dx(f * g) = f * dg/dx + g * df/dx
    /// - Quotient rule: d/dx(f/g) = (g * df/dx - f * dg/dx) / g^2
    /// - Chain rule for abs: d/dx|f| = f/|f| * df/dx
    /// - Power rule: d/dx(f^n) = n * f^(n-1) * df/dx
    /// - Chain rule for exp, ln, sqrt, sin and cos
    /// - Negation: d/dx(-f) = -(df/dx)
    ///
    /// The result is not simplified; call [`Expr::simplify`] on it.
    pub fn derivative(&self, with_respect_to: &str) -> Box<Expr> {
        match self {
            Expr::Const(_) => Expr::constant(0.0),

            Expr::Var(name) => {
                if name == with_respect_to {
                    Expr::constant(1.0)
                } else {
                    Expr::constant(0.0)
                }
            }

            Expr::Add(left, right) => Box::new(Expr::Add(
                left.derivative(with_respect_to),
                right.derivative(with_respect_to),
            )),

            Expr::Sub(left, right) => Box::new(Expr::Sub(
                left.derivative(with_respect_to),
                right.derivative(with_respect_to),
            )),

            Expr::Mul(left, right) => {
                // d/dx(f * g) = f * dg/dx + g * df/dx
                Box::new(Expr::Add(
                    Box::new(Expr::Mul(left.clone(), right.derivative(with_respect_to))),
                    Box::new(Expr::Mul(right.clone(), left.derivative(with_respect_to))),
                ))
            }

            Expr::Div(left, right) => {
                // d/dx(f/g) = (g * df/dx - f * dg/dx) / g^2
                Box::new(Expr::Div(
                    Box::new(Expr::Sub(
                        Box::new(Expr::Mul(right.clone(), left.derivative(with_respect_to))),
                        Box::new(Expr::Mul(left.clone(), right.derivative(with_respect_to))),
                    )),
                    Box::new(Expr::Pow(right.clone(), 2)),
                ))
            }

            Expr::Abs(expr) => Box::new(Expr::Mul(
                Box::new(Expr::Div(expr.clone(), Box::new(Expr::Abs(expr.clone())))),
                expr.derivative(with_respect_to),
            )),

            Expr::Pow(base, exp) => Box::new(Expr::Mul(
                Box::new(Expr::Mul(
                    Expr::constant(*exp as f64),
                    Box::new(Expr::Pow(base.clone(), exp - 1)),
                )),
                base.derivative(with_respect_to),
            )),

            Expr::PowFloat(base, exp) => Box::new(Expr::Mul(
                Box::new(Expr::Mul(
                    Expr::constant(*exp),
                    Box::new(Expr::PowFloat(base.clone(), exp - 1.0)),
                )),
                base.derivative(with_respect_to),
            )),

            Expr::PowExpr(base, exponent) => {
                // d/dx(f^g) = f^g * (g' * ln(f) + g * f'/f)
                Box::new(Expr::Mul(
                    Box::new(Expr::PowExpr(base.clone(), exponent.clone())),
                    Box::new(Expr::Add(
                        Box::new(Expr::Mul(
                            exponent.derivative(with_respect_to),
                            Box::new(Expr::Ln(base.clone())),
                        )),
                        Box::new(Expr::Mul(
                            exponent.clone(),
                            Box::new(Expr::Div(base.derivative(with_respect_to), base.clone())),
                        )),
                    )),
                ))
            }

            Expr::Exp(expr) => Box::new(Expr::Mul(
                Box::new(Expr::Exp(expr.clone())),
                expr.derivative(with_respect_to),
            )),

            Expr::Ln(expr) => Box::new(Expr::Mul(
                Box::new(Expr::Div(Expr::constant(1.0), expr.clone())),
                expr.derivative(with_respect_to),
            )),

            Expr::Sqrt(expr) => {
                // d/dx(sqrt(f)) = 1/(2*sqrt(f)) * df/dx
                Box::new(Expr::Mul(
                    Box::new(Expr::Div(
                        Expr::constant(1.0),
                        Box::new(Expr::Mul(
                            Expr::constant(2.0),
                            Box::new(Expr::Sqrt(expr.clone())),
                        )),
                    )),
                    expr.derivative(with_respect_to),
                ))
            }

            Expr::Sin(expr) => Box::new(Expr::Mul(
                Box::new(Expr::Cos(expr.clone())),
                expr.derivative(with_respect_to),
            )),

            Expr::Cos(expr) => Box::new(Expr::Mul(
                Box::new(Expr::Neg(Box::new(Expr::Sin(expr.clone())))),
                expr.derivative(with_respect_to),
            )),

            Expr::Neg(expr) => Box::new(Expr::Neg(expr.derivative(with_respect_to))),
        }
    }

    /// Simplifies the expression by folding constants and applying basic algebraic rules.
    ///
    /// # Constant Folding
    /// - Evaluates constant expressions: 2 + 3 → 5
    /// - Simplifies operations with special constants: x * 0 → 0
    ///
    /// # Identity Rules
    /// - Additive identity: x + 0 → x
    /// - Multiplicative identity: x * 1 → x
    /// - Division identity: x / 1 → x
    /// - Division by self: x / x → 1
    ///
    /// # Exponent Rules
    /// - Zero exponent: x^0 → 1
    /// - First power: x^1 → x
    /// - Nested exponents: (x^a)^b → x^(a*b)
    ///
    /// # Special Function Simplification
    /// - Absolute value: |-3| → 3, ||x|| → |x|
    /// - Double negation: -(-x) → x
    /// - Evaluates constant special functions: ln(1) → 0
    pub fn simplify(&self) -> Box<Expr> {
        match self {
            Expr::Const(_) | Expr::Var(_) => Box::new(self.clone()),

            Expr::Add(left, right) => {
                let l = left.simplify();
                let r = right.simplify();
                match (&*l, &*r) {
                    (Expr::Const(a), Expr::Const(b)) => Expr::constant(a + b),
                    (expr, Expr::Const(0.0)) | (Expr::Const(0.0), expr) => Box::new(expr.clone()),
                    // x + (-y) -> x - y
                    (expr, Expr::Neg(inner)) => {
                        Expr::Sub(Box::new(expr.clone()), inner.clone()).simplify()
                    }
                    // c1*x + c2*x -> (c1+c2)*x
                    (Expr::Mul(a1, x1), Expr::Mul(a2, x2))
                        if x1 == x2
                            && matches!(**a1, Expr::Const(_))
                            && matches!(**a2, Expr::Const(_)) =>
                    {
                        Box::new(Expr::Mul(
                            Expr::Add(a1.clone(), a2.clone()).simplify(),
                            x1.clone(),
                        ))
                    }
                    _ => Box::new(Expr::Add(l, r)),
                }
            }

            Expr::Sub(left, right) => {
                let l = left.simplify();
                let r = right.simplify();
                match (&*l, &*r) {
                    (Expr::Const(a), Expr::Const(b)) => Expr::constant(a - b),
                    (expr, Expr::Const(0.0)) => Box::new(expr.clone()),
                    (Expr::Const(0.0), expr) => Expr::Neg(Box::new(expr.clone())).simplify(),
                    (a, b) if a == b => Expr::constant(0.0),
                    _ => Box::new(Expr::Sub(l, r)),
                }
            }

            Expr::Mul(left, right) => {
                let l = left.simplify();
                let r = right.simplify();
                match (&*l, &*r) {
                    (Expr::Const(a), Expr::Const(b)) => Expr::constant(a * b),
                    (Expr::Const(0.0), _) | (_, Expr::Const(0.0)) => Expr::constant(0.0),
                    (expr, Expr::Const(1.0)) | (Expr::Const(1.0), expr) => Box::new(expr.clone()),
                    (expr, Expr::Const(-1.0)) | (Expr::Const(-1.0), expr) => {
                        Expr::Neg(Box::new(expr.clone())).simplify()
                    }
                    // x^a * x^b -> x^(a+b)
                    (Expr::Pow(b1, e1), Expr::Pow(b2, e2)) if b1 == b2 => {
                        Expr::Pow(b1.clone(), e1 + e2).simplify()
                    }
                    // c1 * (c2 * x) -> (c1 * c2) * x
                    (Expr::Const(c1), Expr::Mul(c2, x)) | (Expr::Mul(c2, x), Expr::Const(c1))
                        if matches!(**c2, Expr::Const(_)) =>
                    {
                        let Expr::Const(c2) = **c2 else {
                            unreachable!("guarded by matches!")
                        };
                        Box::new(Expr::Mul(Expr::constant(c1 * c2), x.clone()))
                    }
                    // Keep constants on the left
                    (expr, Expr::Const(c)) => {
                        Box::new(Expr::Mul(Expr::constant(*c), Box::new(expr.clone())))
                    }
                    _ if l == r => Box::new(Expr::Pow(l, 2)),
                    _ => Box::new(Expr::Mul(l, r)),
                }
            }

            Expr::Div(left, right) => {
                let l = left.simplify();
                let r = right.simplify();
                match (&*l, &*r) {
                    (Expr::Const(a), Expr::Const(b)) if *b != 0.0 => Expr::constant(a / b),
                    (Expr::Const(0.0), _) => Expr::constant(0.0),
                    (expr, Expr::Const(1.0)) => Box::new(expr.clone()),
                    (expr, Expr::Const(-1.0)) => Expr::Neg(Box::new(expr.clone())).simplify(),
                    (a, b) if a == b => Expr::constant(1.0),
                    // x / c -> (1/c) * x
                    (x, Expr::Const(c)) if *c != 0.0 => {
                        Expr::Mul(Expr::constant(1.0 / c), Box::new(x.clone())).simplify()
                    }
                    _ => Box::new(Expr::Div(l, r)),
                }
            }

            Expr::Abs(expr) => {
                let e = expr.simplify();
                match &*e {
                    Expr::Const(a) => Expr::constant(a.abs()),
                    Expr::Abs(inner) => Box::new(Expr::Abs(inner.clone())),
                    Expr::Neg(inner) => Box::new(Expr::Abs(inner.clone())),
                    Expr::Pow(_, exp) if exp % 2 == 0 => e,
                    _ => Box::new(Expr::Abs(e)),
                }
            }

            Expr::Pow(base, exp) => {
                let b = base.simplify();
                match (&*b, exp) {
                    (_, 0) => Expr::constant(1.0),
                    (Expr::Const(a), exp) => Expr::constant(a.powi(*exp as i32)),
                    (expr, 1) => Box::new(expr.clone()),
                    (Expr::Pow(inner_base, inner_exp), outer_exp) => {
                        Box::new(Expr::Pow(inner_base.clone(), inner_exp * outer_exp))
                    }
                    _ => Box::new(Expr::Pow(b, *exp)),
                }
            }

            Expr::PowFloat(base, exp) => {
                let b = base.simplify();
                match (&*b, exp) {
                    (_, exp) if exp.abs() < 1e-12 => Expr::constant(1.0),
                    (Expr::Const(a), exp) => Expr::constant(a.powf(*exp)),
                    (expr, exp) if (exp - 1.0).abs() < 1e-12 => Box::new(expr.clone()),
                    (expr, exp) if exp.fract().abs() < 1e-12 => {
                        Expr::Pow(Box::new(expr.clone()), *exp as i64).simplify()
                    }
                    _ => Box::new(Expr::PowFloat(b, *exp)),
                }
            }

            Expr::PowExpr(base, exponent) => {
                let b = base.simplify();
                let e = exponent.simplify();
                match (&*b, &*e) {
                    (Expr::Const(a), Expr::Const(p)) => Expr::constant(a.powf(*p)),
                    (expr, Expr::Const(p)) => {
                        Expr::PowFloat(Box::new(expr.clone()), *p).simplify()
                    }
                    _ => Box::new(Expr::PowExpr(b, e)),
                }
            }

            Expr::Exp(expr) => {
                let e = expr.simplify();
                match &*e {
                    Expr::Const(a) => Expr::constant(a.exp()),
                    Expr::Ln(inner) => inner.clone(),
                    _ => Box::new(Expr::Exp(e)),
                }
            }

            Expr::Ln(expr) => {
                let e = expr.simplify();
                match &*e {
                    Expr::Const(a) if *a > 0.0 => Expr::constant(a.ln()),
                    Expr::Exp(inner) => inner.clone(),
                    _ => Box::new(Expr::Ln(e)),
                }
            }

            Expr::Sqrt(expr) => {
                let e = expr.simplify();
                match &*e {
                    Expr::Const(a) if *a >= 0.0 => Expr::constant(a.sqrt()),
                    Expr::Pow(x, 2) => Box::new(Expr::Abs(x.clone())),
                    _ => Box::new(Expr::Sqrt(e)),
                }
            }

            Expr::Sin(expr) => {
                let e = expr.simplify();
                match &*e {
                    Expr::Const(a) => Expr::constant(a.sin()),
                    _ => Box::new(Expr::Sin(e)),
                }
            }

            Expr::Cos(expr) => {
                let e = expr.simplify();
                match &*e {
                    Expr::Const(a) => Expr::constant(a.cos()),
                    _ => Box::new(Expr::Cos(e)),
                }
            }

            Expr::Neg(expr) => {
                let e = expr.simplify();
                match &*e {
                    Expr::Const(a) => Expr::constant(-a),
                    Expr::Neg(inner) => inner.clone(),
                    // -(c*x) -> (-c)*x
                    Expr::Mul(c, x) if matches!(**c, Expr::Const(_)) => {
                        Expr::Mul(Box::new(Expr::Neg(c.clone())), x.clone()).simplify()
                    }
                    _ => Box::new(Expr::Neg(e)),
                }
            }
        }
    }

    /// Returns the constant value if the expression is a constant node.
    pub fn as_const(&self) -> Option<f64> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }
}

/// Implements string formatting for expressions.
///
/// Binary operations are wrapped in parentheses, functions use call notation,
/// absolute value uses |x| notation and exponents use ^.
impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Const(val) => write!(f, "{val}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Add(left, right) => write!(f, "({left} + {right})"),
            Expr::Mul(left, right) => write!(f, "({left} * {right})"),
            Expr::Sub(left, right) => write!(f, "({left} - {right})"),
            Expr::Div(left, right) => write!(f, "({left} / {right})"),
            Expr::Abs(expr) => write!(f, "|{expr}|"),
            Expr::Pow(base, exp) => write!(f, "({base}^{exp})"),
            Expr::PowFloat(base, exp) => write!(f, "({base}^{exp})"),
            Expr::PowExpr(base, exponent) => write!(f, "({base}^{exponent})"),
            Expr::Exp(expr) => write!(f, "exp({expr})"),
            Expr::Ln(expr) => write!(f, "ln({expr})"),
            Expr::Sqrt(expr) => write!(f, "sqrt({expr})"),
            Expr::Sin(expr) => write!(f, "sin({expr})"),
            Expr::Cos(expr) => write!(f, "cos({expr})"),
            Expr::Neg(expr) => write!(f, "-({expr})"),
        }
    }
}
