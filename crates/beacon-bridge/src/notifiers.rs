use beacon_core::{Notifier, NotifierId};

/// Where a tracked notifier is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifierState {
    Created,
    Observing,
    Cancelled,
    Aborted,
}

impl NotifierState {
    /// Cancelled and Aborted are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Aborted)
    }
}

#[derive(Debug)]
struct Tracked {
    notifier: Notifier,
    state: NotifierState,
}

/// The current notifiers of one UI session, in request order.
///
/// Only ever replaced wholesale: `take` empties it, `push` refills it.
#[derive(Debug, Default)]
pub struct NotifierSet {
    entries: Vec<Tracked>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, notifier: Notifier) {
        self.entries.push(Tracked {
            notifier,
            state: NotifierState::Created,
        });
    }

    /// Remove every notifier, returning them in order.
    pub fn take(&mut self) -> Vec<Notifier> {
        std::mem::take(&mut self.entries)
            .into_iter()
            .map(|t| t.notifier)
            .collect()
    }

    /// State of a current notifier; None if it is not in the set.
    pub fn state(&self, id: &NotifierId) -> Option<NotifierState> {
        self.entries
            .iter()
            .find(|t| t.notifier.id() == id)
            .map(|t| t.state)
    }

    /// Move a notifier to `state`. Terminal states are never left.
    pub fn transition(&mut self, id: &NotifierId, state: NotifierState) -> bool {
        match self.entries.iter_mut().find(|t| t.notifier.id() == id) {
            Some(t) if !t.state.is_terminal() => {
                t.state = state;
                true
            }
            _ => false,
        }
    }

    pub fn ids(&self) -> Vec<NotifierId> {
        self.entries.iter().map(|t| t.notifier.id().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_keeps_order() {
        let mut set = NotifierSet::new();
        let a = Notifier::new();
        let b = Notifier::new();
        set.push(a.clone());
        set.push(b.clone());
        assert_eq!(set.ids(), vec![a.id().clone(), b.id().clone()]);
        assert_eq!(set.state(a.id()), Some(NotifierState::Created));
    }

    #[test]
    fn take_empties_the_set() {
        let mut set = NotifierSet::new();
        let a = Notifier::new();
        set.push(a.clone());

        let taken = set.take();
        assert_eq!(taken, vec![a.clone()]);
        assert!(set.is_empty());
        assert!(set.state(a.id()).is_none());
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let mut set = NotifierSet::new();
        let a = Notifier::new();
        set.push(a.clone());

        assert!(set.transition(a.id(), NotifierState::Observing));
        assert!(set.transition(a.id(), NotifierState::Aborted));
        assert!(!set.transition(a.id(), NotifierState::Observing));
        assert_eq!(set.state(a.id()), Some(NotifierState::Aborted));
    }

    #[test]
    fn transition_unknown_is_false() {
        let mut set = NotifierSet::new();
        assert!(!set.transition(&NotifierId::new(), NotifierState::Cancelled));
    }
}
