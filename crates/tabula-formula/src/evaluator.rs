use tabula_core::{Column, ColumnError, GlobalFormula, Result};

use crate::ast::{Expr, UnaryOp};
use crate::functions;
use crate::parser::Parser;

/// Reserved variable holding the 1-based row number
pub const ROW_VARIABLE: &str = "i";

/// Evaluator for a formula AST; identifiers are resolved through `lookup`
pub struct Evaluator<F>
where
    F: Fn(&str) -> Option<f64>,
{
    lookup: F,
}

impl<F> Evaluator<F>
where
    F: Fn(&str) -> Option<f64>,
{
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }

    pub fn evaluate(&self, expr: &Expr) -> f64 {
        match expr {
            Expr::Number(n) => *n,
            Expr::Variable(name) => (self.lookup)(name)
                .or_else(|| functions::constant(name))
                .unwrap_or(f64::NAN),
            Expr::Binary { left, op, right } => op.apply(self.evaluate(left), self.evaluate(right)),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Neg => -self.evaluate(operand),
                UnaryOp::Pos => self.evaluate(operand),
            },
            Expr::FunctionCall { name, args } => {
                let values: Vec<f64> = args.iter().map(|a| self.evaluate(a)).collect();
                functions::call(name, &values)
            }
            Expr::Grouped(inner) => self.evaluate(inner),
        }
    }
}

/// A global formula parsed and checked against its declared variables
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFormula {
    expr: Expr,
    /// (variable name, column name) in declaration order
    bindings: Vec<(String, String)>,
}

impl CompiledFormula {
    /// Parse `formula` and reject unknown functions, wrong arities and undeclared names
    pub fn compile(formula: &GlobalFormula) -> Result<Self> {
        let expr = Parser::new()
            .parse(&formula.expression)
            .map_err(|e| ColumnError::FormulaParse(e.to_string()))?;
        check_functions(&expr)?;

        let declared = |name: &str| formula.variables.iter().any(|v| v.name == name);
        for name in expr.variables() {
            if !declared(name) && name != ROW_VARIABLE && functions::constant(name).is_none() {
                return Err(ColumnError::FormulaParse(format!(
                    "undeclared variable '{}'",
                    name
                )));
            }
        }

        let bindings = formula
            .variables
            .iter()
            .map(|v| (v.name.clone(), v.column.clone()))
            .collect();
        Ok(Self { expr, bindings })
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluate every row. `resolve` maps a column name to the column supplying a variable.
    ///
    /// The result has as many rows as the shortest variable column (`own_rows` without
    /// variables). A row where any variable column is invalid or masked yields NaN.
    pub fn evaluate<'a>(
        &self,
        own_rows: usize,
        resolve: impl Fn(&str) -> Option<&'a Column>,
    ) -> Result<Vec<f64>> {
        let mut sources: Vec<(&str, &'a Column)> = Vec::with_capacity(self.bindings.len());
        for (name, column) in &self.bindings {
            let source =
                resolve(column).ok_or_else(|| ColumnError::UnknownColumn(column.clone()))?;
            sources.push((name.as_str(), source));
        }

        let rows = sources
            .iter()
            .map(|(_, c)| c.row_count())
            .min()
            .unwrap_or(own_rows);

        let values = (0..rows)
            .map(|row| {
                let usable = sources
                    .iter()
                    .all(|(_, c)| c.is_valid(row) && !c.is_masked(row));
                if !usable {
                    return f64::NAN;
                }
                let evaluator = Evaluator::new(|name: &str| {
                    sources
                        .iter()
                        .find(|(var, _)| *var == name)
                        .map(|(_, c)| c.numeric_at(row))
                        .or_else(|| (name == ROW_VARIABLE).then(|| (row + 1) as f64))
                });
                evaluator.evaluate(&self.expr)
            })
            .collect();
        Ok(values)
    }
}

fn check_functions(expr: &Expr) -> Result<()> {
    match expr {
        Expr::Number(_) | Expr::Variable(_) => Ok(()),
        Expr::Binary { left, right, .. } => {
            check_functions(left)?;
            check_functions(right)
        }
        Expr::Unary { operand, .. } => check_functions(operand),
        Expr::Grouped(inner) => check_functions(inner),
        Expr::FunctionCall { name, args } => {
            match functions::arity(name) {
                Some(arity) if arity.accepts(args.len()) => {}
                Some(_) => {
                    return Err(ColumnError::FormulaParse(format!(
                        "wrong number of arguments for {}: {}",
                        name,
                        args.len()
                    )))
                }
                None => {
                    return Err(ColumnError::FormulaParse(format!(
                        "unknown function '{}'",
                        name
                    )))
                }
            }
            args.iter().try_for_each(check_functions)
        }
    }
}
