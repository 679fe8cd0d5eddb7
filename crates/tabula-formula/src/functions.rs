//! Built-in math functions and constants.

use std::f64::consts;

/// Number of arguments a function accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Exactly(n) => count == *n,
            Arity::AtLeast(n) => count >= *n,
        }
    }
}

/// Arity of a known function, `None` for unknown names
pub fn arity(name: &str) -> Option<Arity> {
    let arity = match name {
        "sin" | "cos" | "tan" | "asin" | "acos" | "atan" | "exp" | "ln" | "log10" | "log2"
        | "sqrt" | "abs" | "floor" | "ceil" | "round" => Arity::Exactly(1),
        "pow" => Arity::Exactly(2),
        "min" | "max" => Arity::AtLeast(1),
        _ => return None,
    };
    Some(arity)
}

pub fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(consts::PI),
        "e" => Some(consts::E),
        _ => None,
    }
}

/// Call a function whose name and arity were already validated; anything else yields NaN
pub fn call(name: &str, args: &[f64]) -> f64 {
    match (name, args) {
        ("sin", [x]) => x.sin(),
        ("cos", [x]) => x.cos(),
        ("tan", [x]) => x.tan(),
        ("asin", [x]) => x.asin(),
        ("acos", [x]) => x.acos(),
        ("atan", [x]) => x.atan(),
        ("exp", [x]) => x.exp(),
        ("ln", [x]) => x.ln(),
        ("log10", [x]) => x.log10(),
        ("log2", [x]) => x.log2(),
        ("sqrt", [x]) => x.sqrt(),
        ("abs", [x]) => x.abs(),
        ("floor", [x]) => x.floor(),
        ("ceil", [x]) => x.ceil(),
        ("round", [x]) => x.round(),
        ("pow", [x, y]) => x.powf(*y),
        ("min", [first, rest @ ..]) => rest.iter().fold(*first, |acc, x| nan_aware(acc, *x, f64::min)),
        ("max", [first, rest @ ..]) => rest.iter().fold(*first, |acc, x| nan_aware(acc, *x, f64::max)),
        _ => f64::NAN,
    }
}

/// `f64::min`/`max` skip NaN; a formula must propagate it instead
fn nan_aware(a: f64, b: f64, pick: fn(f64, f64) -> f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        pick(a, b)
    }
}
