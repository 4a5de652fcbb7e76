pub mod difficulty;
pub mod elo;
pub mod eval;
pub mod generator;
pub mod protocol;
pub mod puzzle;
pub mod validation;

pub use difficulty::Difficulty;
pub use eval::{evaluate, extract_digits, EvalError};
pub use puzzle::{Puzzle, PuzzleSolution};
pub use validation::{validate, ValidationResult};
