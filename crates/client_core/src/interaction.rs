use std::fmt::Debug;

use shared::{
    domain::ReactionKind,
    protocol::{Follow, ReadMark, Reaction},
};

/// A per-item value the user can change optimistically.
pub trait Interaction: Clone + PartialEq + Debug + Send + Sync + 'static {
    type Action: Clone + PartialEq + Debug + Send + Sync + 'static;

    fn current(&self) -> Self::Action;

    fn neutral() -> Self::Action;

    fn predict(&self, action: &Self::Action) -> Self;

    /// Proposing the action already in effect means "undo".
    fn resolve(&self, proposed: Self::Action) -> Self::Action {
        if self.current() == proposed {
            Self::neutral()
        } else {
            proposed
        }
    }
}

impl Interaction for Reaction {
    type Action = ReactionKind;

    fn current(&self) -> ReactionKind {
        self.kind
    }

    fn neutral() -> ReactionKind {
        ReactionKind::None
    }

    fn predict(&self, action: &ReactionKind) -> Self {
        let mut next = self.clone();
        match self.kind {
            ReactionKind::Like => next.likes = next.likes.saturating_sub(1),
            ReactionKind::Dislike => next.dislikes = next.dislikes.saturating_sub(1),
            ReactionKind::None => {}
        }
        match action {
            ReactionKind::Like => next.likes += 1,
            ReactionKind::Dislike => next.dislikes += 1,
            ReactionKind::None => {}
        }
        next.kind = *action;
        next
    }
}

impl Interaction for Follow {
    type Action = bool;

    fn current(&self) -> bool {
        self.following
    }

    fn neutral() -> bool {
        false
    }

    fn predict(&self, action: &bool) -> Self {
        let followers = match (self.following, *action) {
            (false, true) => self.followers + 1,
            (true, false) => self.followers.saturating_sub(1),
            _ => self.followers,
        };
        Self {
            following: *action,
            followers,
        }
    }
}

impl Interaction for ReadMark {
    type Action = bool;

    fn current(&self) -> bool {
        self.read
    }

    fn neutral() -> bool {
        false
    }

    fn predict(&self, action: &bool) -> Self {
        Self { read: *action }
    }
}
