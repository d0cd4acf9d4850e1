//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity of their own and are compared by their
/// attributes. In the replay model these are the failure message attached to a
/// request and the set of run instants carried by each tree node: two run sets
/// holding the same instants are interchangeable.
///
/// Implementors must be cheap to clone and must not be mutated once shared.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
