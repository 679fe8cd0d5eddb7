pub mod ast;
pub mod dependency;
pub mod evaluator;
pub mod functions;
pub mod parser;
pub mod table;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use dependency::DependencyGraph;
pub use evaluator::{CompiledFormula, Evaluator, ROW_VARIABLE};
pub use parser::{ParseError, Parser};
pub use table::Table;

use tabula_core::{Column, ColumnData, ColumnDelta, ColumnMode, Result};

/// Parse and evaluate a constant expression (no variables besides constants)
pub fn evaluate_expression(expression: &str) -> std::result::Result<f64, ParseError> {
    let ast = Parser::new().parse(expression)?;
    Ok(Evaluator::new(|_| None).evaluate(&ast))
}

/// Evaluate the global formula of a standalone column, resolving variable columns through
/// `resolve`, and replace its values with the result.
///
/// Columns living in a [`Table`] should go through [`Table::evaluate`] instead so that
/// dependents are updated.
pub fn apply_global_formula<'a>(
    column: &mut Column,
    resolve: impl Fn(&str) -> Option<&'a Column>,
) -> Result<ColumnDelta> {
    let Some(formula) = column.global_formula() else {
        return Err(tabula_core::ColumnError::FormulaParse(format!(
            "{} has no formula",
            column.name()
        )));
    };
    let values = CompiledFormula::compile(formula)?.evaluate(column.row_count(), resolve)?;
    column.replace_all(ColumnMode::Numeric, ColumnData::Numeric(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::GlobalFormula;

    #[test]
    fn test_evaluate_expression() {
        assert_eq!(evaluate_expression("1 + 2 * 3").unwrap(), 7.0);
        assert!(evaluate_expression("1 +").is_err());
    }

    #[test]
    fn test_apply_global_formula_standalone() {
        let source = Column::integer("n", vec![1, 2, 3]);
        let mut target = Column::text("t", ["a"]);
        target
            .set_global_formula(Some(GlobalFormula::new("n * n + i").with_variable("n", "n")))
            .unwrap();

        let delta = apply_global_formula(&mut target, |name| (name == "n").then_some(&source)).unwrap();
        assert_eq!(target.column_mode(), ColumnMode::Numeric);
        assert_eq!(target.row_count(), 3);
        assert_eq!(target.value_at(2), 12.0);

        target.revert_delta(&delta).unwrap();
        assert_eq!(target.column_mode(), ColumnMode::Text);
        assert_eq!(target.text_at(0), "a");
    }
}
