//! Decision-quality judging.
//!
//! Scores decisions on a fixed six-dimension rubric, gates risky decisions
//! before execution, and feeds recent verdicts back as context together
//! with how often the judge has been right.

#![warn(missing_docs, unused_crate_dependencies)]

pub mod rubric;
pub mod evaluator;
pub mod feedback;

pub use rubric::{parse_evaluation, scoring_prompt, Evaluation, JudgeContext};
pub use evaluator::{HeuristicEvaluator, JudgeEvaluator, LlmJudgeEvaluator};
pub use feedback::{
    BlockReason, Calibration, GateDecision, JudgeFeedbackLoop, JudgeRunReport, JudgeSynthesis,
};
