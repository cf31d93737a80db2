//! Per-channel conversion formulas.
//!
//! Each analog axis may carry an expression turning the raw mean (bound to
//! `value`) into a physical quantity, for example `(value/10.0)*0.000001`.
//! Expressions are lower-cased and compiled once with Rhai; the identity
//! formulas `value` and `(value)` are never evaluated.

use rhai::{Dynamic, Engine, Scope, AST};

use crate::error::{AdlinkError, Result};

/// Identity formula assigned to new axes.
pub const IDENTITY: &str = "value";

/// Operations allowed per evaluation.
const MAX_OPERATIONS: u64 = 1_000;

/// A compiled formula.
#[derive(Debug, Clone)]
pub struct Formula {
    source: String,
    ast: Option<AST>,
}

impl Formula {
    /// The identity formula.
    pub fn identity() -> Self {
        Self {
            source: IDENTITY.to_string(),
            ast: None,
        }
    }

    /// Normalized source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether applying this formula changes values.
    pub fn is_applied(&self) -> bool {
        self.ast.is_some()
    }
}

impl Default for Formula {
    fn default() -> Self {
        Self::identity()
    }
}

/// Sandboxed expression engine used to compile and evaluate formulas.
pub struct FormulaEngine {
    engine: Engine,
}

impl std::fmt::Debug for FormulaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormulaEngine")
            .field("max_operations", &MAX_OPERATIONS)
            .finish()
    }
}

impl Default for FormulaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FormulaEngine {
    /// Engine with the operation limit installed.
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.on_progress(|count| {
            if count > MAX_OPERATIONS {
                Some(format!("Safety limit exceeded: maximum {} operations", MAX_OPERATIONS).into())
            } else {
                None
            }
        });
        Self { engine }
    }

    /// Normalize and compile a formula.
    pub fn compile(&self, source: &str) -> Result<Formula> {
        let normalized = source.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(AdlinkError::Formula {
                formula: source.to_string(),
                message: "formula is empty".to_string(),
            });
        }
        if normalized == IDENTITY || normalized == "(value)" {
            return Ok(Formula {
                source: normalized,
                ast: None,
            });
        }

        let ast = self
            .engine
            .compile_expression(&normalized)
            .map_err(|e| AdlinkError::Formula {
                formula: normalized.clone(),
                message: e.to_string(),
            })?;

        Ok(Formula {
            source: normalized,
            ast: Some(ast),
        })
    }

    /// Apply a formula to one value.
    pub fn apply(&self, formula: &Formula, value: f64) -> Result<f64> {
        let Some(ast) = &formula.ast else {
            return Ok(value);
        };

        let mut scope = Scope::new();
        scope.push("value", value);

        let result: Dynamic = self
            .engine
            .eval_ast_with_scope(&mut scope, ast)
            .map_err(|e| AdlinkError::Formula {
                formula: formula.source.clone(),
                message: e.to_string(),
            })?;

        if let Ok(f) = result.as_float() {
            Ok(f)
        } else if let Ok(i) = result.as_int() {
            Ok(i as f64)
        } else {
            Err(AdlinkError::Formula {
                formula: formula.source.clone(),
                message: format!("expected a number, got {}", result.type_name()),
            })
        }
    }

    /// Apply a formula element-wise.
    pub fn apply_all(&self, formula: &Formula, values: Vec<f64>) -> Result<Vec<f64>> {
        if !formula.is_applied() {
            return Ok(values);
        }
        values.into_iter().map(|v| self.apply(formula, v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_not_applied() {
        let engine = FormulaEngine::new();
        for source in ["value", "VALUE", " (value) "] {
            let formula = engine.compile(source).unwrap();
            assert!(!formula.is_applied(), "{source} should be identity");
            assert_eq!(engine.apply(&formula, 1.25).unwrap(), 1.25);
        }
    }

    #[test]
    fn test_formula_is_lowercased_and_applied() {
        let engine = FormulaEngine::new();
        let formula = engine.compile("(VALUE / 10.0) * 2.0").unwrap();
        assert_eq!(formula.source(), "(value / 10.0) * 2.0");
        assert!(formula.is_applied());
        let out = engine.apply(&formula, 5.0).unwrap();
        assert!((out - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_apply_all_elementwise() {
        let engine = FormulaEngine::new();
        let formula = engine.compile("value * 2.0 + 1.0").unwrap();
        let out = engine.apply_all(&formula, vec![0.0, 1.0, 2.5]).unwrap();
        assert_eq!(out, vec![1.0, 3.0, 6.0]);
    }

    #[test]
    fn test_integer_result_is_converted() {
        let engine = FormulaEngine::new();
        let formula = engine.compile("42").unwrap();
        assert_eq!(engine.apply(&formula, 0.0).unwrap(), 42.0);
    }

    #[test]
    fn test_bad_formulas() {
        let engine = FormulaEngine::new();
        assert!(engine.compile("").is_err());
        assert!(engine.compile("value * (").is_err());

        let formula = engine.compile("unknown_var * 2.0").unwrap();
        assert!(engine.apply(&formula, 1.0).is_err());

        let formula = engine.compile("\"text\"").unwrap();
        assert!(matches!(
            engine.apply(&formula, 1.0),
            Err(AdlinkError::Formula { .. })
        ));
    }
}
