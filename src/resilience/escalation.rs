//! Escalation along the fetch strategy ladder.

use std::collections::BTreeSet;

use tracing::info;

use crate::models::Strategy;

/// Result of asking for a stronger strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    Next(Strategy),
    /// No stronger rung is available; the target fails for this run.
    Exhausted,
}

/// Chooses where a request starts on the ladder and where it goes when blocked.
///
/// Rungs without a configured backend (no browser, archive disabled) are
/// skipped in both directions.
#[derive(Debug, Clone)]
pub struct EscalationController {
    available: BTreeSet<Strategy>,
}

impl Default for EscalationController {
    fn default() -> Self {
        Self::new(Strategy::LADDER)
    }
}

impl EscalationController {
    pub fn new(available: impl IntoIterator<Item = Strategy>) -> Self {
        Self {
            available: available.into_iter().collect(),
        }
    }

    pub fn is_available(&self, strategy: Strategy) -> bool {
        self.available.contains(&strategy)
    }

    pub fn available(&self) -> impl Iterator<Item = Strategy> + '_ {
        self.available.iter().copied()
    }

    /// First rung for a request: the strongest of the job hint and the
    /// origin's learned strategy, moved up to the nearest available rung.
    ///
    /// A learned fallback rung is ignored so new articles still get a live
    /// fetch; only an explicit hint can start a request on the archive.
    pub fn starting_strategy(
        &self,
        hint: Option<Strategy>,
        best_known: Option<Strategy>,
    ) -> Option<Strategy> {
        let floor = hint
            .into_iter()
            .chain(best_known.filter(Strategy::is_live))
            .max()
            .unwrap_or(Strategy::Plain);
        self.available.range(floor..).next().copied()
    }

    /// The next strictly stronger available rung after `current`.
    pub fn next_strategy(&self, origin: &str, current: Strategy) -> Escalation {
        let next = Strategy::LADDER
            .into_iter()
            .filter(|s| *s > current)
            .find(|s| self.available.contains(s));
        match next {
            Some(next) => {
                info!("Escalating {} from {} to {}", origin, current, next);
                Escalation::Next(next)
            }
            None => {
                info!("Escalation ladder exhausted for {} at {}", origin, current);
                Escalation::Exhausted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_ladder_order() {
        let esc = EscalationController::default();
        let mut current = Strategy::Plain;
        let mut seen = vec![current];
        while let Escalation::Next(next) = esc.next_strategy("x", current) {
            assert!(next > current);
            current = next;
            seen.push(next);
        }
        assert_eq!(seen, Strategy::LADDER.to_vec());
    }

    #[test]
    fn test_skips_unavailable_rungs() {
        let esc = EscalationController::new([Strategy::Plain, Strategy::Stealth, Strategy::Archive]);
        assert_eq!(
            esc.next_strategy("x", Strategy::Stealth),
            Escalation::Next(Strategy::Archive)
        );
        assert_eq!(esc.next_strategy("x", Strategy::Archive), Escalation::Exhausted);
        assert_eq!(
            esc.starting_strategy(Some(Strategy::Browser), None),
            Some(Strategy::Archive)
        );
    }

    #[test]
    fn test_starting_strategy_prefers_strongest_known() {
        let esc = EscalationController::default();
        assert_eq!(esc.starting_strategy(None, None), Some(Strategy::Plain));
        assert_eq!(
            esc.starting_strategy(Some(Strategy::Plain), Some(Strategy::Stealth)),
            Some(Strategy::Stealth)
        );
        assert_eq!(
            esc.starting_strategy(Some(Strategy::Browser), Some(Strategy::Stealth)),
            Some(Strategy::Browser)
        );
        let only_plain = EscalationController::new([Strategy::Plain]);
        assert_eq!(only_plain.starting_strategy(Some(Strategy::Stealth), None), None);
    }

    #[test]
    fn test_learned_archive_does_not_skip_live_rungs() {
        let esc = EscalationController::default();
        assert_eq!(
            esc.starting_strategy(None, Some(Strategy::Archive)),
            Some(Strategy::Plain)
        );
        assert_eq!(
            esc.starting_strategy(Some(Strategy::Stealth), Some(Strategy::Archive)),
            Some(Strategy::Stealth)
        );
        assert_eq!(
            esc.starting_strategy(Some(Strategy::Archive), None),
            Some(Strategy::Archive)
        );
    }
}
