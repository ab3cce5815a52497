//! Policy lambda evaluator
//!
//! A sandboxed interpreter for the fixed policy vocabulary: numeric and
//! string literals, `lambda`, `let*`, `begin`, `if`, arithmetic,
//! comparisons, `list`, `map`, `filter`, `length`, `nth`, `first`, and the
//! positional parameters bound at the call site.
//!
//! The sandbox is total: no I/O, no host access, bounded nesting, bounded
//! step count, and a wall-clock deadline. Every failure surfaces as an
//! `EvalError`; callers fall back to their documented defaults.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::sexpr::{self, Sexp};

/// Evaluation failure (parse, type, arity, budget)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("parse: {0}")]
    Parse(String),
    #[error("type: {0}")]
    Type(String),
    #[error("unbound symbol '{0}'")]
    Unbound(String),
    #[error("arity: {0}")]
    Arity(String),
    #[error("evaluation budget exhausted")]
    Budget,
    #[error("evaluation deadline exceeded")]
    Deadline,
}

/// A runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(f64),
    Str(String),
    Bool(bool),
    List(Vec<Value>),
    Lambda(LambdaDef),
}

/// A user lambda: parameter names and body forms
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaDef {
    pub params: Vec<String>,
    pub body: Vec<Sexp>,
}

impl Value {
    /// Numeric view; booleans coerce to 0/1
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Truthiness: `false` and `0` are false, everything else is true
    fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            _ => true,
        }
    }

    /// Build a numeric list value
    pub fn num_list(nums: &[f64]) -> Value {
        Value::List(nums.iter().map(|n| Value::Num(*n)).collect())
    }
}

/// Evaluation bounds
#[derive(Debug, Clone, Copy)]
pub struct EvalLimits {
    /// Maximum nesting depth of evaluation frames
    pub max_depth: usize,
    /// Maximum number of evaluation steps
    pub fuel: u64,
    /// Wall-clock budget
    pub timeout: Duration,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            max_depth: 64,
            fuel: 100_000,
            timeout: Duration::from_millis(100),
        }
    }
}

impl EvalLimits {
    /// Limits with the given wall-clock budget in milliseconds
    pub fn with_timeout_ms(ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(ms),
            ..Self::default()
        }
    }
}

struct Interp {
    scopes: Vec<HashMap<String, Value>>,
    fuel: u64,
    deadline: Instant,
    max_depth: usize,
}

impl Interp {
    fn tick(&mut self) -> Result<(), EvalError> {
        if self.fuel == 0 {
            return Err(EvalError::Budget);
        }
        self.fuel -= 1;
        // Checking the clock every step would dominate tiny lambdas
        if self.fuel % 256 == 0 && Instant::now() >= self.deadline {
            return Err(EvalError::Deadline);
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn eval(&mut self, expr: &Sexp, depth: usize) -> Result<Value, EvalError> {
        self.tick()?;
        if depth > self.max_depth {
            return Err(EvalError::Budget);
        }
        match expr {
            Sexp::Num(n) => Ok(Value::Num(*n)),
            Sexp::Str(s) => Ok(Value::Str(s.clone())),
            Sexp::Sym(name) => match name.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => self
                    .lookup(name)
                    .cloned()
                    .ok_or_else(|| EvalError::Unbound(name.clone())),
            },
            Sexp::Map(_) => Err(EvalError::Type("map literal in lambda body".to_string())),
            Sexp::List(items) => {
                let Some(head) = items.first() else {
                    return Err(EvalError::Type("empty application".to_string()));
                };
                if let Some(sym) = head.as_sym() {
                    match sym {
                        "lambda" => return self.eval_lambda_form(&items[1..]),
                        "let*" => return self.eval_let_star(&items[1..], depth),
                        "begin" => return self.eval_begin(&items[1..], depth),
                        "if" => return self.eval_if(&items[1..], depth),
                        _ => {}
                    }
                    // Builtins apply unless the symbol is shadowed by a binding
                    if self.lookup(sym).is_none() && is_builtin(sym) {
                        let args = self.eval_args(&items[1..], depth)?;
                        return self.apply_builtin(sym, args, depth);
                    }
                }
                let callee = self.eval(head, depth + 1)?;
                let args = self.eval_args(&items[1..], depth)?;
                self.apply(callee, args, depth)
            }
        }
    }

    fn eval_args(&mut self, exprs: &[Sexp], depth: usize) -> Result<Vec<Value>, EvalError> {
        exprs.iter().map(|e| self.eval(e, depth + 1)).collect()
    }

    fn eval_lambda_form(&mut self, rest: &[Sexp]) -> Result<Value, EvalError> {
        let Some(param_list) = rest.first().and_then(|p| p.as_list()) else {
            return Err(EvalError::Type("lambda needs a parameter list".to_string()));
        };
        let mut params = Vec::with_capacity(param_list.len());
        for p in param_list {
            match p.as_sym() {
                Some(name) => params.push(name.to_string()),
                None => return Err(EvalError::Type("lambda parameter must be a symbol".to_string())),
            }
        }
        if rest.len() < 2 {
            return Err(EvalError::Type("lambda needs a body".to_string()));
        }
        Ok(Value::Lambda(LambdaDef {
            params,
            body: rest[1..].to_vec(),
        }))
    }

    fn eval_let_star(&mut self, rest: &[Sexp], depth: usize) -> Result<Value, EvalError> {
        let Some(bindings) = rest.first().and_then(|b| b.as_list()) else {
            return Err(EvalError::Type("let* needs a binding list".to_string()));
        };
        self.scopes.push(HashMap::new());
        let result = (|| {
            for binding in bindings {
                let pair = binding
                    .as_list()
                    .filter(|p| p.len() == 2)
                    .ok_or_else(|| EvalError::Type("let* binding must be (name expr)".to_string()))?;
                let name = pair[0]
                    .as_sym()
                    .ok_or_else(|| EvalError::Type("let* name must be a symbol".to_string()))?
                    .to_string();
                let value = self.eval(&pair[1], depth + 1)?;
                self.scopes
                    .last_mut()
                    .expect("scope pushed above")
                    .insert(name, value);
            }
            self.eval_begin(&rest[1..], depth)
        })();
        self.scopes.pop();
        result
    }

    fn eval_begin(&mut self, body: &[Sexp], depth: usize) -> Result<Value, EvalError> {
        if body.is_empty() {
            return Err(EvalError::Type("empty body".to_string()));
        }
        let mut last = Value::Num(0.0);
        for expr in body {
            last = self.eval(expr, depth + 1)?;
        }
        Ok(last)
    }

    fn eval_if(&mut self, rest: &[Sexp], depth: usize) -> Result<Value, EvalError> {
        if rest.len() != 2 && rest.len() != 3 {
            return Err(EvalError::Arity("if takes 2 or 3 forms".to_string()));
        }
        let condition = self.eval(&rest[0], depth + 1)?;
        if condition.truthy() {
            self.eval(&rest[1], depth + 1)
        } else if let Some(alt) = rest.get(2) {
            self.eval(alt, depth + 1)
        } else {
            Ok(Value::Num(0.0))
        }
    }

    fn apply(&mut self, callee: Value, args: Vec<Value>, depth: usize) -> Result<Value, EvalError> {
        let Value::Lambda(def) = callee else {
            return Err(EvalError::Type("cannot apply a non-lambda".to_string()));
        };
        if args.len() != def.params.len() {
            return Err(EvalError::Arity(format!(
                "expected {} arguments, got {}",
                def.params.len(),
                args.len()
            )));
        }
        let frame: HashMap<String, Value> = def.params.iter().cloned().zip(args).collect();
        self.scopes.push(frame);
        let result = self.eval_begin(&def.body, depth);
        self.scopes.pop();
        result
    }

    fn apply_builtin(
        &mut self,
        name: &str,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, EvalError> {
        match name {
            "+" | "-" | "*" | "/" => self.arith(name, args),
            "<" | ">" | "<=" | ">=" | "=" => self.compare(name, args),
            "list" => Ok(Value::List(args)),
            "length" => match args.as_slice() {
                [Value::List(items)] => Ok(Value::Num(items.len() as f64)),
                _ => Err(EvalError::Type("length takes one list".to_string())),
            },
            "first" => match args.as_slice() {
                [Value::List(items)] => items
                    .first()
                    .cloned()
                    .ok_or_else(|| EvalError::Type("first of empty list".to_string())),
                _ => Err(EvalError::Type("first takes one list".to_string())),
            },
            "nth" => match args.as_slice() {
                [Value::List(items), index] => {
                    let i = index
                        .as_num()
                        .ok_or_else(|| EvalError::Type("nth index must be numeric".to_string()))?;
                    if i < 0.0 || i.fract() != 0.0 || i as usize >= items.len() {
                        return Err(EvalError::Type(format!("nth index {} out of range", i)));
                    }
                    Ok(items[i as usize].clone())
                }
                _ => Err(EvalError::Type("nth takes (nth list index)".to_string())),
            },
            "map" => match args.as_slice() {
                [f @ Value::Lambda(_), Value::List(items)] => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.apply(f.clone(), vec![item.clone()], depth + 1)?);
                    }
                    Ok(Value::List(out))
                }
                _ => Err(EvalError::Type("map takes (map lambda list)".to_string())),
            },
            "filter" => match args.as_slice() {
                [f @ Value::Lambda(_), Value::List(items)] => {
                    let mut out = Vec::new();
                    for item in items {
                        if self.apply(f.clone(), vec![item.clone()], depth + 1)?.truthy() {
                            out.push(item.clone());
                        }
                    }
                    Ok(Value::List(out))
                }
                _ => Err(EvalError::Type("filter takes (filter lambda list)".to_string())),
            },
            _ => Err(EvalError::Unbound(name.to_string())),
        }
    }

    fn arith(&self, op: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        if args.is_empty() {
            return Err(EvalError::Arity(format!("{} needs arguments", op)));
        }
        let nums: Option<Vec<f64>> = args.iter().map(|v| v.as_num()).collect();
        let nums = nums.ok_or_else(|| EvalError::Type(format!("{} over non-numbers", op)))?;
        let mut acc = nums[0];
        if nums.len() == 1 {
            match op {
                "-" => return Ok(Value::Num(-acc)),
                "/" => return Ok(Value::Num(1.0 / acc)),
                _ => return Ok(Value::Num(acc)),
            }
        }
        for n in &nums[1..] {
            acc = match op {
                "+" => acc + n,
                "-" => acc - n,
                "*" => acc * n,
                "/" => acc / n,
                _ => unreachable!(),
            };
        }
        Ok(Value::Num(acc))
    }

    fn compare(&self, op: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        let [a, b] = args.as_slice() else {
            return Err(EvalError::Arity(format!("{} takes two arguments", op)));
        };
        if let (Value::Str(a), Value::Str(b)) = (a, b) {
            if op == "=" {
                return Ok(Value::Bool(a == b));
            }
        }
        let (a, b) = match (a.as_num(), b.as_num()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(EvalError::Type(format!("{} over non-numbers", op))),
        };
        let out = match op {
            "<" => a < b,
            ">" => a > b,
            "<=" => a <= b,
            ">=" => a >= b,
            "=" => a == b,
            _ => unreachable!(),
        };
        Ok(Value::Bool(out))
    }
}

fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "+" | "-"
            | "*"
            | "/"
            | "<"
            | ">"
            | "<="
            | ">="
            | "="
            | "list"
            | "length"
            | "first"
            | "nth"
            | "map"
            | "filter"
    )
}

/// Evaluate a lambda source against positional arguments
///
/// The source must be a single `(lambda (params...) body...)` form. Extra or
/// missing arguments, parse failures, type errors, and exhausted budgets all
/// surface as `EvalError`.
pub fn eval_lambda(source: &str, args: &[Value], limits: &EvalLimits) -> Result<Value, EvalError> {
    let parsed = sexpr::parse(source).map_err(|e| EvalError::Parse(e.to_string()))?;
    let mut interp = Interp {
        scopes: vec![HashMap::new()],
        fuel: limits.fuel,
        deadline: Instant::now() + limits.timeout,
        max_depth: limits.max_depth,
    };
    let callee = interp.eval(&parsed, 0)?;
    if !matches!(callee, Value::Lambda(_)) {
        return Err(EvalError::Type("policy source must be a lambda".to_string()));
    }
    interp.apply(callee, args.to_vec(), 0)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str, args: &[Value]) -> Result<Value, EvalError> {
        eval_lambda(source, args, &EvalLimits::default())
    }

    #[test]
    fn test_weighted_sum_score() {
        let src = "(lambda (act rec imp) (+ (* 0.6 act) (* 0.25 rec) (* 0.15 imp)))";
        let out = eval(
            src,
            &[Value::Num(1.0), Value::Num(0.5), Value::Num(0.0)],
        )
        .unwrap();
        assert_eq!(out, Value::Num(0.6 + 0.125));
    }

    #[test]
    fn test_let_star_sequential_bindings() {
        let src = "(lambda (x) (let* ((a (* x 2)) (b (+ a 1))) b))";
        assert_eq!(eval(src, &[Value::Num(3.0)]).unwrap(), Value::Num(7.0));
    }

    #[test]
    fn test_if_and_comparisons() {
        let src = "(lambda (s f) (if (> s f) 1 -1))";
        assert_eq!(
            eval(src, &[Value::Num(5.0), Value::Num(2.0)]).unwrap(),
            Value::Num(1.0)
        );
        assert_eq!(
            eval(src, &[Value::Num(1.0), Value::Num(2.0)]).unwrap(),
            Value::Num(-1.0)
        );
    }

    #[test]
    fn test_list_map_filter() {
        let src = "(lambda (xs) (length (filter (lambda (x) (> x 1)) (map (lambda (x) (* x 2)) xs))))";
        let out = eval(src, &[Value::num_list(&[0.0, 1.0, 2.0])]).unwrap();
        assert_eq!(out, Value::Num(2.0));
    }

    #[test]
    fn test_nth_and_first() {
        let src = "(lambda (xs) (+ (first xs) (nth xs 2)))";
        let out = eval(src, &[Value::num_list(&[1.0, 2.0, 3.0])]).unwrap();
        assert_eq!(out, Value::Num(4.0));
    }

    #[test]
    fn test_string_result_for_generator() {
        let src = "(lambda (hs) (if (> (length hs) 0) \"(lambda (a r i ac s f h d) a)\" \"\"))";
        let out = eval(src, &[Value::num_list(&[1.0])]).unwrap();
        assert_eq!(
            out,
            Value::Str("(lambda (a r i ac s f h d) a)".to_string())
        );
    }

    #[test]
    fn test_arity_mismatch_is_error() {
        let src = "(lambda (a b) (+ a b))";
        assert!(matches!(
            eval(src, &[Value::Num(1.0)]),
            Err(EvalError::Arity(_))
        ));
    }

    #[test]
    fn test_parse_error_surfaces() {
        assert!(matches!(eval("(lambda (a", &[]), Err(EvalError::Parse(_))));
        assert!(matches!(eval("42", &[]), Err(EvalError::Type(_))));
    }

    #[test]
    fn test_unbound_symbol_is_error() {
        let src = "(lambda (a) (+ a mystery))";
        assert!(matches!(
            eval(src, &[Value::Num(1.0)]),
            Err(EvalError::Unbound(_))
        ));
    }

    #[test]
    fn test_runaway_recursion_hits_budget() {
        // Self-application loops forever without the fuel/depth bounds
        let looping = "(lambda (n) ((lambda (f) (f f)) (lambda (f) (f f))))";
        assert!(matches!(
            eval(looping, &[Value::Num(1.0)]),
            Err(EvalError::Budget)
        ));
    }

    #[test]
    fn test_division_produces_numeric_result() {
        let src = "(lambda (a b) (/ a b))";
        let out = eval(src, &[Value::Num(1.0), Value::Num(0.0)]).unwrap();
        match out {
            Value::Num(n) => assert!(n.is_infinite()),
            other => panic!("expected number, got {:?}", other),
        }
    }

    #[test]
    fn test_shadowing_param_over_builtin() {
        // A parameter named `list` shadows the builtin inside the body
        let src = "(lambda (list) (+ list 1))";
        assert_eq!(eval(src, &[Value::Num(1.0)]).unwrap(), Value::Num(2.0));
    }
}
