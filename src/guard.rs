// Per-run resource accounting. The guard is the only cancellation
// mechanism the VM has: when a budget trips, the run loop unwinds
// with a typed resource error. Checks happen at fixed points -- once
// per instruction, after every frame push, after every value push.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    pub instruction_budget: u64,
    pub max_call_depth: usize,
    pub max_value_stack_depth: usize,
    pub wall_clock_limit_ms: u64,
}

impl Default for ExecutionLimits {
    fn default() -> ExecutionLimits {
        ExecutionLimits {
            instruction_budget: 250_000,
            max_call_depth: 128,
            max_value_stack_depth: 2_048,
            wall_clock_limit_ms: 1_000,
        }
    }
}

pub struct ResourceGuard {
    limits: ExecutionLimits,
    executed: u64,
    started: Instant,
}

impl ResourceGuard {
    pub fn new(limits: ExecutionLimits) -> ResourceGuard {
        ResourceGuard { limits, executed: 0, started: Instant::now() }
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }

    // Called before every instruction: counts it, then checks the
    // wall clock so a stalled bridge call still gets caught on the
    // next cycle.
    pub fn on_instruction(&mut self) -> Result<(), ErrorKind> {
        self.executed += 1;
        if self.executed > self.limits.instruction_budget {
            return Err(ErrorKind::InstructionBudgetExceeded {
                budget: self.limits.instruction_budget,
            });
        }
        let elapsed = self.started.elapsed();
        let limit = Duration::from_millis(self.limits.wall_clock_limit_ms);
        if elapsed > limit {
            return Err(ErrorKind::TimeLimitExceeded {
                elapsed_ms: elapsed.as_millis() as u64,
                limit_ms: self.limits.wall_clock_limit_ms,
            });
        }
        Ok(())
    }

    pub fn ensure_call_depth(&self, depth: usize) -> Result<(), ErrorKind> {
        if depth > self.limits.max_call_depth {
            return Err(ErrorKind::CallDepthExceeded { limit: self.limits.max_call_depth });
        }
        Ok(())
    }

    pub fn ensure_value_stack_depth(&self, depth: usize) -> Result<(), ErrorKind> {
        if depth > self.limits.max_value_stack_depth {
            return Err(ErrorKind::ValueStackExceeded {
                limit: self.limits.max_value_stack_depth,
            });
        }
        Ok(())
    }
}
