//! Conversion module for transforming evalexpr AST nodes into our internal expression representation.
//!
//! Expressions are parsed with evalexpr and then mapped onto [`Expr`], which supports
//! symbolic differentiation. Dotted identifiers such as `comp1.y` are read as a single
//! variable name.
//!
//! The main entry points are [`build_ast`], which recursively traverses the evalexpr AST
//! and builds up our expression tree, and [`build_relation`], which splits a constraint
//! such as `comp.y >= 2*x` into its two sides and the comparator between them.

use evalexpr::{Node, Operator, Value};

use crate::{errors::ConvertError, expr::Expr, expression::Comparator};

/// Converts an evalexpr AST node into our internal expression representation.
///
/// # Supported operations
/// * Basic arithmetic: +, -, *, / and unary minus
/// * Variables: x, comp1.y, etc.
/// * Constants: integer and floating point numbers
/// * Functions: abs, ln, log, sqrt, exp, sin, cos (with or without a `math::` prefix)
/// * Exponentiation: `x^n` with an integer, float or arbitrary expression exponent
pub fn build_ast(node: &Node) -> Result<Expr, ConvertError> {
    match node.operator() {
        // Addition and multiplication may carry more than two children after parsing
        Operator::Add => fold_children(node, "+", |acc, next| {
            Expr::Add(Box::new(acc), Box::new(next))
        }),
        Operator::Mul => fold_children(node, "*", |acc, next| {
            Expr::Mul(Box::new(acc), Box::new(next))
        }),
        Operator::Sub => {
            let [left, right] = binary(node, "-")?;
            Ok(Expr::Sub(Box::new(left), Box::new(right)))
        }
        Operator::Div => {
            let [left, right] = binary(node, "/")?;
            Ok(Expr::Div(Box::new(left), Box::new(right)))
        }
        Operator::Neg => Ok(Expr::Neg(Box::new(unary(node, "neg")?))),
        Operator::Const { value } => match value {
            Value::Float(f) => Ok(Expr::Const(*f)),
            Value::Int(i) => Ok(Expr::Const(*i as f64)),
            _ => Err(ConvertError::ConstOperator(format!("{value:?}"))),
        },
        Operator::VariableIdentifierRead { identifier } => Ok(Expr::Var(identifier.to_string())),
        Operator::FunctionIdentifier { identifier } => {
            let name = identifier.strip_prefix("math::").unwrap_or(identifier);
            let arg = Box::new(unary(node, name)?);
            match name {
                "abs" => Ok(Expr::Abs(arg)),
                "ln" | "log" => Ok(Expr::Ln(arg)),
                "sqrt" => Ok(Expr::Sqrt(arg)),
                "exp" => Ok(Expr::Exp(arg)),
                "sin" => Ok(Expr::Sin(arg)),
                "cos" => Ok(Expr::Cos(arg)),
                _ => Err(ConvertError::UnsupportedFunction(identifier.to_string())),
            }
        }
        Operator::RootNode => {
            let children = node.children();
            if children.len() == 1 {
                build_ast(&children[0])
            } else {
                Err(ConvertError::RootNode(format!("{children:?}")))
            }
        }
        Operator::Exp => {
            let children = node.children();
            if children.len() != 2 {
                return Err(ConvertError::Arity {
                    operator: "^".to_string(),
                    expected: 2,
                    got: children.len(),
                });
            }
            let base = Box::new(build_ast(&children[0])?);
            match constant_exponent(&children[1]) {
                Some(Value::Int(n)) => Ok(Expr::Pow(base, n)),
                Some(Value::Float(p)) => Ok(Expr::PowFloat(base, p)),
                _ => Ok(Expr::PowExpr(base, Box::new(build_ast(&children[1])?))),
            }
        }
        other => Err(ConvertError::UnsupportedOperator(format!("{other:?}"))),
    }
}

/// Splits a relation into `(lhs, comparator, rhs)`.
///
/// Accepts `<`, `<=`, `>`, `>=`, `==` and the assignment form `a = b`, which evalexpr
/// parses with a write identifier on its left.
pub fn build_relation(node: &Node) -> Result<(Expr, Comparator, Expr), ConvertError> {
    let comparator = match node.operator() {
        Operator::RootNode => {
            let children = node.children();
            return if children.len() == 1 {
                build_relation(&children[0])
            } else {
                Err(ConvertError::RootNode(format!("{children:?}")))
            };
        }
        Operator::Lt => Comparator::Less,
        Operator::Leq => Comparator::LessEqual,
        Operator::Gt => Comparator::Greater,
        Operator::Geq => Comparator::GreaterEqual,
        Operator::Eq | Operator::Assign => Comparator::Equal,
        other => return Err(ConvertError::NotARelation(format!("{other:?}"))),
    };

    let children = node.children();
    if children.len() != 2 {
        return Err(ConvertError::Arity {
            operator: comparator.to_string(),
            expected: 2,
            got: children.len(),
        });
    }
    let lhs = match children[0].operator() {
        Operator::VariableIdentifierWrite { identifier } => Expr::Var(identifier.to_string()),
        _ => build_ast(&children[0])?,
    };
    let rhs = build_ast(&children[1])?;
    Ok((lhs, comparator, rhs))
}

fn fold_children(
    node: &Node,
    operator: &str,
    combine: impl Fn(Expr, Expr) -> Expr,
) -> Result<Expr, ConvertError> {
    let children = node.children();
    let (first, rest) = children.split_first().ok_or_else(|| ConvertError::Arity {
        operator: operator.to_string(),
        expected: 2,
        got: 0,
    })?;
    rest.iter()
        .try_fold(build_ast(first)?, |acc, child| Ok(combine(acc, build_ast(child)?)))
}

fn binary(node: &Node, operator: &str) -> Result<[Expr; 2], ConvertError> {
    match node.children() {
        [left, right] => Ok([build_ast(left)?, build_ast(right)?]),
        children => Err(ConvertError::Arity {
            operator: operator.to_string(),
            expected: 2,
            got: children.len(),
        }),
    }
}

fn unary(node: &Node, operator: &str) -> Result<Expr, ConvertError> {
    match node.children() {
        [child] => build_ast(child),
        children => Err(ConvertError::Arity {
            operator: operator.to_string(),
            expected: 1,
            got: children.len(),
        }),
    }
}

/// Returns the exponent value when it is a (possibly negated) numeric literal.
fn constant_exponent(node: &Node) -> Option<Value> {
    match node.operator() {
        Operator::Const { value } => match value {
            Value::Int(_) | Value::Float(_) => Some(value.clone()),
            _ => None,
        },
        Operator::Neg => match node.children() {
            [child] => match constant_exponent(child)? {
                Value::Int(n) => Some(Value::Int(-n)),
                Value::Float(p) => Some(Value::Float(-p)),
                _ => None,
            },
            _ => None,
        },
        Operator::RootNode => match node.children() {
            [child] => constant_exponent(child),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use evalexpr::build_operator_tree;

    use super::*;

    fn parse(input: &str) -> Expr {
        let node: Node = build_operator_tree(input).unwrap();
        build_ast(&node).unwrap()
    }

    #[test]
    fn test_dotted_identifiers() {
        let expr = parse("2 * comp1.y + sub.comp2.x");
        let names: Vec<String> = expr.variables().into_iter().collect();
        assert_eq!(names, vec!["comp1.y".to_string(), "sub.comp2.x".to_string()]);
    }

    #[test]
    fn test_exponents() {
        assert!(matches!(parse("x^2"), Expr::Pow(_, 2)));
        assert!(matches!(parse("x^0.5"), Expr::PowFloat(_, p) if p == 0.5));
        assert!(matches!(parse("x^y"), Expr::PowExpr(_, _)));

        let point: HashMap<String, f64> = [("x".to_string(), 2.0)].into_iter().collect();
        assert_eq!(parse("x^(-1)").eval(&point).unwrap(), 0.5);
    }

    #[test]
    fn test_functions() {
        let point: HashMap<String, f64> = [("x".to_string(), 0.0)].into_iter().collect();
        assert_eq!(parse("exp(x) + cos(x) - sin(x)").eval(&point).unwrap(), 2.0);
        assert_eq!(parse("math::sqrt(4)").eval(&point).unwrap(), 2.0);

        let node: Node = build_operator_tree("tan(x)").unwrap();
        assert!(matches!(
            build_ast(&node),
            Err(ConvertError::UnsupportedFunction(_))
        ));
    }

    #[test]
    fn test_relations() {
        let node: Node = build_operator_tree("comp.y >= 2 * x").unwrap();
        let (lhs, comparator, rhs) = build_relation(&node).unwrap();
        assert_eq!(lhs, Expr::Var("comp.y".to_string()));
        assert_eq!(comparator, Comparator::GreaterEqual);
        assert_eq!(rhs.variables().len(), 1);

        let node: Node = build_operator_tree("a.y = b.x").unwrap();
        let (lhs, comparator, rhs) = build_relation(&node).unwrap();
        assert_eq!(lhs, Expr::Var("a.y".to_string()));
        assert_eq!(comparator, Comparator::Equal);
        assert_eq!(rhs, Expr::Var("b.x".to_string()));

        let node: Node = build_operator_tree("a + b").unwrap();
        assert!(matches!(
            build_relation(&node),
            Err(ConvertError::NotARelation(_))
        ));
    }
}
