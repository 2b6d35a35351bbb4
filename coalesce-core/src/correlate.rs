//! Correlators map a shared batch result back to one caller's query.
//!
//! - [`ByField`]: result is a `Vec<T>`; pick the item whose key equals the query.
//! - [`ByKey`]: result is a `HashMap<Q, T>`; direct lookup.
//! - [`ByPredicate`]: any `Fn(&R, &Q) -> V`, e.g. one-to-many filtering.
//!
//! Unmatched queries yield `None` (or whatever the predicate returns). Nothing
//! checks that every query in a batch was answered.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

/// Extracts the value owed to `query` from a batch result
pub trait Correlate<Q, R>: Send + Sync {
    type Output;

    fn correlate(&self, result: &R, query: &Q) -> Self::Output;
}

/// Match items on a key read from each item
#[derive(Debug, Clone, Copy)]
pub struct ByField<F> {
    key: F,
}

impl<F> ByField<F> {
    /// `key` reads the field compared against the query
    pub fn new(key: F) -> Self {
        Self { key }
    }
}

impl<Q, T, K, F> Correlate<Q, Vec<T>> for ByField<F>
where
    F: Fn(&T) -> K + Send + Sync,
    K: PartialEq<Q>,
    T: Clone,
{
    type Output = Option<T>;

    fn correlate(&self, items: &Vec<T>, query: &Q) -> Option<T> {
        items.iter().find(|&item| (self.key)(item) == *query).cloned()
    }
}

/// Look the query up in a keyed result
#[derive(Debug, Clone, Copy, Default)]
pub struct ByKey;

impl<Q, T, S> Correlate<Q, HashMap<Q, T, S>> for ByKey
where
    Q: Hash + Eq,
    T: Clone,
    S: BuildHasher,
{
    type Output = Option<T>;

    fn correlate(&self, map: &HashMap<Q, T, S>, query: &Q) -> Option<T> {
        map.get(query).cloned()
    }
}

/// Arbitrary selection over the whole result
#[derive(Debug, Clone, Copy)]
pub struct ByPredicate<F> {
    select: F,
}

impl<F> ByPredicate<F> {
    pub fn new(select: F) -> Self {
        Self { select }
    }
}

impl<Q, R, V, F> Correlate<Q, R> for ByPredicate<F>
where
    F: Fn(&R, &Q) -> V + Send + Sync,
{
    type Output = V;

    fn correlate(&self, result: &R, query: &Q) -> V {
        (self.select)(result, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct User {
        id: u32,
        name: &'static str,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Post {
        id: u32,
        author: u32,
    }

    fn users() -> Vec<User> {
        vec![User { id: 1, name: "ada" }, User { id: 2, name: "grace" }]
    }

    #[test]
    fn test_by_field_matches_key() {
        let by_id = ByField::new(|u: &User| u.id);

        assert_eq!(by_id.correlate(&users(), &2u32), Some(User { id: 2, name: "grace" }));
        assert_eq!(by_id.correlate(&users(), &9u32), None);
    }

    #[test]
    fn test_by_field_with_string_key() {
        let by_name = ByField::new(|u: &User| u.name.to_string());

        let found = by_name.correlate(&users(), &"ada".to_string());
        assert_eq!(found.map(|u| u.id), Some(1));
    }

    #[test]
    fn test_by_key_lookup() {
        let map: HashMap<&str, u64> = [("a", 1), ("b", 2)].into_iter().collect();

        assert_eq!(ByKey.correlate(&map, &"b"), Some(2));
        assert_eq!(ByKey.correlate(&map, &"z"), None);
    }

    #[test]
    fn test_by_predicate_one_to_many() {
        let posts = vec![
            Post { id: 10, author: 1 },
            Post { id: 11, author: 2 },
            Post { id: 12, author: 1 },
            Post { id: 13, author: 2 },
        ];
        let by_author = ByPredicate::new(|posts: &Vec<Post>, author: &u32| {
            posts.iter().filter(|p| p.author == *author).map(|p| p.id).collect::<Vec<_>>()
        });

        assert_eq!(by_author.correlate(&posts, &1u32), vec![10, 12]);
        assert_eq!(by_author.correlate(&posts, &2u32), vec![11, 13]);
        assert!(by_author.correlate(&posts, &3u32).is_empty());
    }
}
