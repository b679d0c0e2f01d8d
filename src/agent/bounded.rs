//! Bounded multi-phase loop shared by the agents
//!
//! Each agent describes one cycle of its work as a [`BoundedPhase`]: the
//! phase proposes the next action, runs it and decides whether to go on.
//! [`run_bounded`] owns the counting, so no agent can loop past its budget.

use async_trait::async_trait;
use tracing::debug;

/// Position of the current cycle within the budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cycle {
    /// Zero-based index
    pub index: usize,
    pub budget: usize,
}

impl Cycle {
    /// One-based cycle number for display
    pub fn number(&self) -> usize {
        self.index + 1
    }

    /// True when no cycle follows this one
    pub fn is_last(&self) -> bool {
        self.index + 1 >= self.budget
    }
}

/// What a phase wants after one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control<T> {
    Continue,
    Finish(T),
}

/// How a bounded loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit<T> {
    /// The phase finished on its own
    Finished { value: T, iterations: usize },
    /// Every cycle ran and the phase still wanted to continue
    Exhausted { iterations: usize },
}

impl<T> LoopExit<T> {
    pub fn iterations(&self) -> usize {
        match self {
            LoopExit::Finished { iterations, .. } | LoopExit::Exhausted { iterations } => {
                *iterations
            }
        }
    }
}

/// One cycle of an agent's work
#[async_trait]
pub trait BoundedPhase: Send {
    type Output: Send;
    type Error: Send;

    async fn step(&mut self, cycle: Cycle) -> Result<Control<Self::Output>, Self::Error>;
}

/// Run `phase` for at most `budget` cycles.
///
/// An error from a step ends the loop immediately and is returned as-is.
pub async fn run_bounded<P>(phase: &mut P, budget: usize) -> Result<LoopExit<P::Output>, P::Error>
where
    P: BoundedPhase,
{
    for index in 0..budget {
        let cycle = Cycle { index, budget };
        debug!(cycle = cycle.number(), budget, "Bounded loop cycle");

        if let Control::Finish(value) = phase.step(cycle).await? {
            return Ok(LoopExit::Finished {
                value,
                iterations: cycle.number(),
            });
        }
    }
    Ok(LoopExit::Exhausted { iterations: budget })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountTo {
        target: usize,
        seen: Vec<Cycle>,
    }

    #[async_trait]
    impl BoundedPhase for CountTo {
        type Output = usize;
        type Error = String;

        async fn step(&mut self, cycle: Cycle) -> Result<Control<usize>, String> {
            self.seen.push(cycle);
            if cycle.number() == self.target {
                Ok(Control::Finish(cycle.index))
            } else {
                Ok(Control::Continue)
            }
        }
    }

    struct FailOnSecond;

    #[async_trait]
    impl BoundedPhase for FailOnSecond {
        type Output = ();
        type Error = String;

        async fn step(&mut self, cycle: Cycle) -> Result<Control<()>, String> {
            if cycle.index == 1 {
                Err("boom".to_string())
            } else {
                Ok(Control::Continue)
            }
        }
    }

    #[tokio::test]
    async fn test_finishes_early() {
        let mut phase = CountTo { target: 2, seen: vec![] };
        let exit = run_bounded(&mut phase, 5).await.unwrap();
        assert_eq!(exit, LoopExit::Finished { value: 1, iterations: 2 });
        assert_eq!(phase.seen.len(), 2);
    }

    #[tokio::test]
    async fn test_never_exceeds_budget() {
        let mut phase = CountTo { target: 100, seen: vec![] };
        let exit = run_bounded(&mut phase, 3).await.unwrap();
        assert_eq!(exit, LoopExit::Exhausted { iterations: 3 });
        assert!(phase.seen[2].is_last());
        assert!(!phase.seen[1].is_last());
    }

    #[tokio::test]
    async fn test_error_stops_loop() {
        let result = run_bounded(&mut FailOnSecond, 5).await;
        assert_eq!(result, Err("boom".to_string()));
    }

    #[tokio::test]
    async fn test_zero_budget_runs_nothing() {
        let mut phase = CountTo { target: 1, seen: vec![] };
        let exit = run_bounded(&mut phase, 0).await.unwrap();
        assert_eq!(exit.iterations(), 0);
        assert!(phase.seen.is_empty());
    }
}
