//! Derived statistics over research output

use serde::{Deserialize, Serialize};

use crate::research::ResearchOutput;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResearchMetrics {
    /// 0..10
    pub quality: f64,
    pub fact_count: usize,
    pub iterations: usize,
}

pub fn research_metrics(output: &ResearchOutput) -> ResearchMetrics {
    ResearchMetrics {
        quality: output.average_quality,
        fact_count: output.fact_count(),
        iterations: output.iterations_used,
    }
}
