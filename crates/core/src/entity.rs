//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Replay requests and job specifications are entities: two values with the
/// same identifier describe the same thing even when their status or metadata
/// differ.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
