use serde::{Deserialize, Serialize};

/// A named variable of a global formula, bound to another column by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaVariable {
    /// Name used inside the expression
    pub name: String,
    /// Name of the column supplying the values, resolved at evaluation time
    pub column: String,
}

impl FormulaVariable {
    pub fn new(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
        }
    }
}

/// Expression that recomputes a whole column from other columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalFormula {
    pub expression: String,
    #[serde(default)]
    pub variables: Vec<FormulaVariable>,
    /// Re-evaluate whenever a variable column changes
    #[serde(default)]
    pub auto_update: bool,
}

impl GlobalFormula {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            variables: Vec::new(),
            auto_update: false,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.variables.push(FormulaVariable::new(name, column));
        self
    }

    pub fn auto_update(mut self, enabled: bool) -> Self {
        self.auto_update = enabled;
        self
    }

    /// Names of the columns this formula reads
    pub fn referenced_columns(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|v| v.column.as_str())
    }
}
