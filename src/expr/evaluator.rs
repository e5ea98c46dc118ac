//! RPN evaluator for the logical-expression sub-language (spec.md §4.2).

use crate::error::{ArchetypeError, Location};
use crate::expr::RpnToken;
use crate::value::Value;

/// A pure lookup from a (possibly `~`-prefixed-stripped) variable name to its
/// current value. Returning `None` is an unresolved variable.
pub trait Resolver {
    fn resolve(&self, name: &str, parent_scope: bool) -> Option<Value>;
}

impl<F: Fn(&str, bool) -> Option<Value>> Resolver for F {
    fn resolve(&self, name: &str, parent_scope: bool) -> Option<Value> {
        self(name, parent_scope)
    }
}

/// Evaluates an RPN token stream against `resolver`, operating a value stack.
pub fn evaluate(rpn: &[RpnToken], resolver: &dyn Resolver) -> Result<Value, ArchetypeError> {
    let mut stack: Vec<Value> = Vec::with_capacity(rpn.len());

    for tok in rpn {
        match tok {
            RpnToken::Literal(v) => stack.push(v.clone()),
            RpnToken::Var { name, parent_scope } => {
                let v = resolver
                    .resolve(name, *parent_scope)
                    .ok_or_else(|| ArchetypeError::UnresolvedVariable(Location::unknown(), name.clone()))?;
                stack.push(v);
            }
            RpnToken::Not => {
                let a = pop(&mut stack)?;
                let b = a.as_bool().map_err(|_| eval_err("! requires a boolean operand"))?;
                stack.push(Value::Bool(!b));
            }
            RpnToken::And => {
                let b = pop(&mut stack)?;
                let a = pop(&mut stack)?;
                stack.push(Value::Bool(a.as_bool()? && b.as_bool()?));
            }
            RpnToken::Or => {
                let b = pop(&mut stack)?;
                let a = pop(&mut stack)?;
                stack.push(Value::Bool(a.as_bool()? || b.as_bool()?));
            }
            RpnToken::Eq => {
                let b = pop(&mut stack)?;
                let a = pop(&mut stack)?;
                stack.push(Value::Bool(Value::values_equal(&a, &b)));
            }
            RpnToken::Ne => {
                let b = pop(&mut stack)?;
                let a = pop(&mut stack)?;
                stack.push(Value::Bool(!Value::values_equal(&a, &b)));
            }
            RpnToken::Contains => {
                let b = pop(&mut stack)?;
                let a = pop(&mut stack)?;
                stack.push(Value::Bool(contains(&a, &b)?));
            }
        }
    }

    if stack.len() != 1 {
        return Err(eval_err(&format!(
            "expression did not reduce to a single value (got {})",
            stack.len()
        )));
    }
    Ok(stack.pop().unwrap())
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, ArchetypeError> {
    stack.pop().ok_or_else(|| eval_err("operator stack underflow"))
}

fn eval_err(msg: &str) -> ArchetypeError {
    ArchetypeError::EvalError(Location::unknown(), msg.to_string())
}

/// `a contains b`: if `b` is a list, subset test; otherwise membership of
/// `b.asString()` in `a.asList()` (spec.md §4.2).
fn contains(a: &Value, b: &Value) -> Result<bool, ArchetypeError> {
    if let Value::StringList(needles) = b {
        let haystack = a.as_list()?;
        Ok(needles.iter().all(|n| haystack.contains(n)))
    } else {
        let haystack = a.as_list()?;
        let needle = b.as_string()?;
        Ok(haystack.contains(&needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;

    struct MapResolver(std::collections::HashMap<&'static str, Value>);
    impl Resolver for MapResolver {
        fn resolve(&self, name: &str, _parent_scope: bool) -> Option<Value> {
            self.0.get(name).cloned()
        }
    }

    #[test]
    fn spec_example_evaluates_true() {
        let rpn = parse("!(${a} == 'x') || ${b} contains ['y']").unwrap();
        let mut m = std::collections::HashMap::new();
        m.insert("a", Value::String("x".into()));
        m.insert("b", Value::StringList(vec!["y".into(), "z".into()]));
        let resolver = MapResolver(m);
        assert_eq!(evaluate(&rpn, &resolver).unwrap(), Value::Bool(true));
    }

    #[test]
    fn unresolved_variable_errors() {
        let rpn = parse("${x} contains 'y'").unwrap();
        let resolver = MapResolver(std::collections::HashMap::new());
        let err = evaluate(&rpn, &resolver).unwrap_err();
        assert!(err.is_unresolved_variable());
    }

    #[test]
    fn contains_scalar_membership() {
        let rpn = parse("${a} contains 'y'").unwrap();
        let mut m = std::collections::HashMap::new();
        m.insert("a", Value::StringList(vec!["x".into(), "y".into()]));
        assert_eq!(evaluate(&rpn, &MapResolver(m)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn and_or_short_circuit_equivalent_results() {
        let rpn = parse("${a} && ${b}").unwrap();
        let mut m = std::collections::HashMap::new();
        m.insert("a", Value::Bool(false));
        m.insert("b", Value::Bool(true));
        assert_eq!(evaluate(&rpn, &MapResolver(m)).unwrap(), Value::Bool(false));
    }
}
