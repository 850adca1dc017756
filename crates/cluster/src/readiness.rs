//! Readiness of components and shardings, the predicate that gates stages.

use std::fmt;

use crate::types::{Component, ComponentPhase};

/// Observed state of one topology entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    NotCreated,
    /// Creating, updating, or mutated by the current plan.
    InProgress,
    Ready,
    Failed,
}

impl Readiness {
    /// Readiness of a single component.
    ///
    /// `staged` means the current plan already mutates the component; such
    /// a component is never ready until the mutation is observed.
    pub fn of_component(live: Option<&Component>, staged: bool) -> Self {
        match live {
            None if staged => Self::InProgress,
            None => Self::NotCreated,
            Some(_) if staged => Self::InProgress,
            Some(comp) if is_expected(comp) => Self::Ready,
            Some(comp) if comp.status.phase == Some(ComponentPhase::Failed) => Self::Failed,
            Some(_) => Self::InProgress,
        }
    }

    /// Readiness of a sharding: ready only when all `expected` shards exist
    /// and are ready and none is staged.
    pub fn of_sharding(live: &[&Component], expected: usize, staged: bool) -> Self {
        if live.is_empty() {
            return if staged { Self::InProgress } else { Self::NotCreated };
        }
        if staged || live.len() != expected {
            return Self::InProgress;
        }
        if live.iter().all(|comp| is_expected(comp)) {
            return Self::Ready;
        }
        if live
            .iter()
            .any(|comp| comp.status.phase == Some(ComponentPhase::Failed))
        {
            return Self::Failed;
        }
        Self::InProgress
    }

    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotCreated => "not created",
            Self::InProgress => "in progress",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// The component reached the phase its spec asks for at its current
/// generation: `Running`, or `Stopped` when a stop is requested.
fn is_expected(comp: &Component) -> bool {
    if comp.metadata.generation != comp.status.observed_generation {
        return false;
    }
    let expected = if comp.spec.stop {
        ComponentPhase::Stopped
    } else {
        ComponentPhase::Running
    };
    comp.status.phase == Some(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ComponentSpec;

    fn comp(phase: Option<ComponentPhase>, stop: bool, generation: i64, observed: i64) -> Component {
        let mut comp = Component::new(
            "default",
            "c-a",
            ComponentSpec {
                stop,
                ..ComponentSpec::default()
            },
        );
        comp.metadata.generation = generation;
        comp.status.phase = phase;
        comp.status.observed_generation = observed;
        comp
    }

    #[test]
    fn test_absent_component_is_not_created_unless_staged() {
        assert_eq!(Readiness::of_component(None, false), Readiness::NotCreated);
        assert_eq!(Readiness::of_component(None, true), Readiness::InProgress);
    }

    #[test]
    fn test_running_component_at_current_generation_is_ready() {
        let c = comp(Some(ComponentPhase::Running), false, 2, 2);
        assert!(Readiness::of_component(Some(&c), false).is_ready());
    }

    #[test]
    fn test_stale_generation_is_in_progress() {
        let c = comp(Some(ComponentPhase::Running), false, 3, 2);
        assert_eq!(Readiness::of_component(Some(&c), false), Readiness::InProgress);
    }

    #[test]
    fn test_staged_component_is_never_ready() {
        let c = comp(Some(ComponentPhase::Running), false, 1, 1);
        assert_eq!(Readiness::of_component(Some(&c), true), Readiness::InProgress);
    }

    #[test]
    fn test_stopped_counts_only_when_stop_requested() {
        let stopped = comp(Some(ComponentPhase::Stopped), true, 1, 1);
        assert!(Readiness::of_component(Some(&stopped), false).is_ready());
        let unexpected = comp(Some(ComponentPhase::Stopped), false, 1, 1);
        assert_eq!(
            Readiness::of_component(Some(&unexpected), false),
            Readiness::InProgress
        );
        let still_running = comp(Some(ComponentPhase::Running), true, 1, 1);
        assert_eq!(
            Readiness::of_component(Some(&still_running), false),
            Readiness::InProgress
        );
    }

    #[test]
    fn test_failed_phase_is_failed() {
        let c = comp(Some(ComponentPhase::Failed), false, 1, 1);
        assert_eq!(Readiness::of_component(Some(&c), false), Readiness::Failed);
    }

    #[test]
    fn test_sharding_needs_every_shard() {
        let a = comp(Some(ComponentPhase::Running), false, 1, 1);
        let b = comp(Some(ComponentPhase::Running), false, 1, 1);
        assert_eq!(Readiness::of_sharding(&[], 2, false), Readiness::NotCreated);
        assert_eq!(Readiness::of_sharding(&[&a], 2, false), Readiness::InProgress);
        assert!(Readiness::of_sharding(&[&a, &b], 2, false).is_ready());
        assert_eq!(Readiness::of_sharding(&[&a, &b], 2, true), Readiness::InProgress);
    }
}
