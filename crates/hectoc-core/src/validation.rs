use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::difficulty::Difficulty;
use crate::elo;
use crate::eval::{self, EPSILON};
use crate::generator;

/// Why a submission was rejected. Carried in the result, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFailure {
    EmptySolution,
    WrongDigits,
    BadExpression,
    WrongValue,
}

/// One checkpoint of the validation pipeline, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationStep {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationMetric {
    pub length: usize,
    pub operator_count: u32,
    pub paren_count: u32,
    pub complexity: f64,
    pub execution_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_correct: bool,
    pub steps: Vec<ValidationStep>,
    pub error_kind: Option<ValidationFailure>,
    pub score: f64,
    pub rating_delta: i32,
    pub metric: ValidationMetric,
}

fn step(name: &str, passed: bool, detail: impl Into<String>) -> ValidationStep {
    ValidationStep {
        name: name.to_string(),
        passed,
        detail: detail.into(),
    }
}

fn rejected(
    steps: Vec<ValidationStep>,
    kind: ValidationFailure,
    metric: ValidationMetric,
) -> ValidationResult {
    ValidationResult {
        is_correct: false,
        steps,
        error_kind: Some(kind),
        score: 0.0,
        rating_delta: 0,
        metric,
    }
}

fn measure(normalized: &str) -> ValidationMetric {
    ValidationMetric {
        length: normalized.len(),
        operator_count: normalized
            .chars()
            .filter(|c| matches!(c, '+' | '-' | '*' | '/' | '^'))
            .count() as u32,
        paren_count: normalized.chars().filter(|c| *c == '(').count() as u32,
        complexity: generator::complexity(normalized),
        execution_time_ms: 0.0,
    }
}

/// Validate a candidate solution against a puzzle sequence. Runs the
/// pipeline in order, recording a step per check; every failure mode is a
/// structured result, never a panic.
pub fn validate(
    sequence: &str,
    difficulty: Difficulty,
    solution: &str,
    player_rating: i32,
    solve_secs: f64,
) -> ValidationResult {
    let mut steps = Vec::new();

    let normalized = eval::normalize(solution);
    steps.push(step("normalize", true, normalized.clone()));

    if normalized.is_empty() {
        steps.push(step("non_empty", false, "solution is empty"));
        return rejected(steps, ValidationFailure::EmptySolution, ValidationMetric::default());
    }
    steps.push(step("non_empty", true, ""));

    let metric_base = measure(&normalized);

    let digits = eval::extract_digits(&normalized);
    if digits != sequence {
        steps.push(step(
            "digit_order",
            false,
            format!("expected digits {}, found {}", sequence, digits),
        ));
        return rejected(steps, ValidationFailure::WrongDigits, metric_base);
    }
    steps.push(step("digit_order", true, format!("digits match {}", sequence)));

    let started = Instant::now();
    let value = match eval::evaluate(&normalized) {
        Ok(v) => v,
        Err(e) => {
            steps.push(step("evaluate", false, e.to_string()));
            return rejected(steps, ValidationFailure::BadExpression, metric_base);
        }
    };
    let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
    let mut metric = metric_base;
    metric.execution_time_ms = execution_time_ms;
    steps.push(step("evaluate", true, format!("{:?}", value)));

    if (value - 100.0).abs() > EPSILON {
        steps.push(step(
            "target",
            false,
            format!("Evaluator returned {:?}, expected 100", value),
        ));
        return rejected(steps, ValidationFailure::WrongValue, metric);
    }
    steps.push(step("target", true, "exactly 100"));

    let complexity_factor = if metric.complexity < 5.0 {
        1.2
    } else if metric.complexity > 10.0 {
        0.8
    } else {
        1.0
    };
    let time_factor = if execution_time_ms < 10.0 {
        1.1
    } else if execution_time_ms > 100.0 {
        0.9
    } else {
        1.0
    };
    let score = difficulty.level() as f64 * 100.0 * complexity_factor * time_factor;
    steps.push(step(
        "score",
        true,
        format!(
            "base {} x complexity {:.1} x time {:.1} = {:.1}",
            difficulty.level() as u32 * 100,
            complexity_factor,
            time_factor,
            score
        ),
    ));

    let rating_delta = elo::rating_delta(player_rating, difficulty, solve_secs);
    steps.push(step("rating", true, format!("delta {:+}", rating_delta)));

    ValidationResult {
        is_correct: true,
        steps,
        error_kind: None,
        score,
        rating_delta,
        metric,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elegant_solution_accepted() {
        let r = validate("123456", Difficulty::D2, "1+(2+3+4)*(5+6)", 1500, 20.0);
        assert!(r.is_correct);
        assert!(r.error_kind.is_none());
        let cf = if r.metric.complexity < 5.0 {
            1.2
        } else if r.metric.complexity > 10.0 {
            0.8
        } else {
            1.0
        };
        let tf = if r.metric.execution_time_ms < 10.0 {
            1.1
        } else if r.metric.execution_time_ms > 100.0 {
            0.9
        } else {
            1.0
        };
        assert_eq!(r.score, 200.0 * cf * tf);
        assert!(r.rating_delta > 0);
        assert!(r.rating_delta <= elo::MAX_DELTA);
        assert!(r.steps.iter().all(|s| s.passed));
    }

    #[test]
    fn digit_order_violation_rejected() {
        // Evaluates to 90 but reorders nothing it may: digits must spell
        // the sequence exactly.
        let r = validate("123456", Difficulty::D2, "(1+2+3)*(4+5+6)", 1500, 20.0);
        assert!(!r.is_correct);
        assert_eq!(r.error_kind, Some(ValidationFailure::WrongDigits));
        let failed: Vec<_> = r.steps.iter().filter(|s| !s.passed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "digit_order");
    }

    #[test]
    fn wrong_value_carries_evaluator_detail() {
        let r = validate("111111", Difficulty::D1, "1+1+1+1+1+1", 1000, 10.0);
        assert!(!r.is_correct);
        assert_eq!(r.error_kind, Some(ValidationFailure::WrongValue));
        assert!(r
            .steps
            .iter()
            .any(|s| s.detail == "Evaluator returned 6.0, expected 100"));
    }

    #[test]
    fn empty_solution_rejected() {
        let r = validate("123456", Difficulty::D1, "   ", 1000, 5.0);
        assert_eq!(r.error_kind, Some(ValidationFailure::EmptySolution));
    }

    #[test]
    fn division_by_zero_is_bad_expression_not_a_crash() {
        let r = validate("123456", Difficulty::D1, "1/(2-3+4-5+6/6)", 1000, 5.0);
        assert!(!r.is_correct);
        // Digits mismatch or eval failure, never a panic; this input spells
        // 1234566 so it fails digit order first.
        assert!(r.error_kind.is_some());
    }

    #[test]
    fn division_by_zero_expression_rejected_as_bad() {
        let r = validate("123456", Difficulty::D1, "123456/(1-1)", 1000, 5.0);
        assert_eq!(r.error_kind, Some(ValidationFailure::WrongDigits));
        let r = validate("123455", Difficulty::D1, "1234/(5-5)", 1000, 5.0);
        assert_eq!(r.error_kind, Some(ValidationFailure::BadExpression));
    }

    #[test]
    fn unicode_operators_accepted() {
        let r = validate("123456", Difficulty::D2, "1+(2+3+4)×(5+6)", 1500, 20.0);
        assert!(r.is_correct);
    }

    #[test]
    fn exponent_accepted_even_if_never_generated() {
        // 10^2 = 100 via repeated multiplication.
        let r = validate("102", Difficulty::D1, "10^2", 1000, 5.0);
        assert!(r.is_correct, "{:?}", r.steps);
    }

    #[test]
    fn idempotent_modulo_execution_time() {
        let a = validate("123456", Difficulty::D2, "1+(2+3+4)*(5+6)", 1500, 20.0);
        let b = validate("123456", Difficulty::D2, "1+(2+3+4)*(5+6)", 1500, 20.0);
        assert_eq!(a.is_correct, b.is_correct);
        assert_eq!(a.score, b.score);
        assert_eq!(a.rating_delta, b.rating_delta);
        assert_eq!(a.metric.complexity, b.metric.complexity);
    }
}
