//! The hash tables used throughout the crate: `hashbrown` maps keyed with the randomly seeded
//! `std` hasher, so that peers cannot pick node ids or payment hashes which collide.

extern crate hashbrown;

use std::collections::hash_map::RandomState;

/// The HashMap type used in this crate.
pub type HashMap<K, V> = hashbrown::HashMap<K, V, RandomState>;

/// Builds an empty [`HashMap`] with a freshly seeded hasher.
pub fn new_hash_map<K, V>() -> HashMap<K, V> {
	HashMap::with_hasher(RandomState::new())
}
