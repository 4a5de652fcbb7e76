use serde::{Deserialize, Serialize};

use crate::difficulty::Difficulty;
use crate::generator;

/// A Hectoc puzzle: six digits in '1'..'9' to be combined into 100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Puzzle {
    pub id: String,
    pub sequence: String,
    pub difficulty: Difficulty,
    pub complexity_score: f64,
    pub solution_count: i64,
    pub optimal_solution: String,
    pub explanation: String,
    pub min_elo: i32,
    pub max_elo: i32,
    pub usage_count: i64,
    pub success_rate: f64,
    pub avg_solve_time: f64,
}

/// One enumerated solution of a puzzle. Exactly one per puzzle is optimal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PuzzleSolution {
    pub puzzle_id: String,
    pub expression: String,
    pub complexity: f64,
    pub is_optimal: bool,
}

impl Puzzle {
    /// Assemble a puzzle from its enumerated solution set. Returns `None`
    /// when the set is empty: unsolvable sequences are never stored.
    pub fn from_solutions(id: String, sequence: String, solutions: &[String]) -> Option<Puzzle> {
        let optimal = generator::optimal(solutions)?.to_string();
        let difficulty = generator::difficulty_for(solutions);
        let complexity_score =
            solutions.iter().map(|s| generator::complexity(s)).sum::<f64>() / solutions.len() as f64;
        let (min_elo, max_elo) = difficulty.rating_range();
        let explanation = explain(&sequence, &optimal, solutions.len());

        Some(Puzzle {
            id,
            sequence,
            difficulty,
            complexity_score,
            solution_count: solutions.len() as i64,
            optimal_solution: optimal,
            explanation,
            min_elo,
            max_elo,
            usage_count: 0,
            success_rate: 0.0,
            avg_solve_time: 0.0,
        })
    }

    /// The per-solution rows backing this puzzle.
    pub fn solution_rows(&self, solutions: &[String]) -> Vec<PuzzleSolution> {
        solutions
            .iter()
            .map(|s| PuzzleSolution {
                puzzle_id: self.id.clone(),
                expression: s.clone(),
                complexity: generator::complexity(s),
                is_optimal: s == &self.optimal_solution,
            })
            .collect()
    }
}

/// Human-readable walkthrough shown after a game.
fn explain(sequence: &str, optimal: &str, solution_count: usize) -> String {
    let mut s = format!(
        "Keep the digits {} in order and insert operators: {} = 100.",
        sequence, optimal
    );
    if solution_count > 1 {
        s.push_str(&format!(
            " This is the most elegant of {} known solutions.",
            solution_count
        ));
    } else {
        s.push_str(" It is the only known solution.");
    }
    s
}
