//! Ordered lookup chain.
//!
//! A [`ResolverChain`] holds strategies, each with a label, the principal it
//! searches for, and a search function. Strategies run in registration order;
//! the first `Some` wins and later strategies are not attempted.

use tracing::debug;

type SearchFn<'a, T, E> = Box<dyn Fn(&str) -> Result<Option<T>, E> + 'a>;

struct Strategy<'a, T, E> {
    label: String,
    principal: String,
    search: SearchFn<'a, T, E>,
}

pub struct ResolverChain<'a, T, E> {
    strategies: Vec<Strategy<'a, T, E>>,
}

impl<'a, T, E> Default for ResolverChain<'a, T, E> {
    fn default() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }
}

impl<'a, T, E> ResolverChain<'a, T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a strategy. Strategies with an empty principal are skipped at
    /// resolution time.
    pub fn with<F>(mut self, label: &str, principal: &str, search: F) -> Self
    where
        F: Fn(&str) -> Result<Option<T>, E> + 'a,
    {
        self.strategies.push(Strategy {
            label: label.to_string(),
            principal: principal.trim().to_string(),
            search: Box::new(search),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Run the strategies in order. A miss is `Ok(None)`; a search error
    /// stops the chain.
    pub fn resolve(&self) -> Result<Option<T>, E> {
        let mut tried = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            if strategy.principal.is_empty() {
                continue;
            }
            tried.push(format!("{}({})", strategy.label, strategy.principal));

            if let Some(found) = (strategy.search)(&strategy.principal)? {
                debug!(
                    strategy = %strategy.label,
                    principal = %strategy.principal,
                    "resolved by strategy"
                );
                return Ok(Some(found));
            }
        }

        debug!(tried = ?tried, "no strategy matched");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_first_match_wins() {
        let calls = RefCell::new(Vec::new());
        let chain: ResolverChain<'_, u32, String> = ResolverChain::new()
            .with("first", "a", |p| {
                calls.borrow_mut().push(p.to_string());
                Ok(None)
            })
            .with("second", "b", |p| {
                calls.borrow_mut().push(p.to_string());
                Ok(Some(2))
            })
            .with("third", "c", |p| {
                calls.borrow_mut().push(p.to_string());
                Ok(Some(3))
            });

        assert_eq!(chain.resolve().unwrap(), Some(2));
        assert_eq!(*calls.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_principal_is_skipped() {
        let chain: ResolverChain<'_, u32, String> = ResolverChain::new()
            .with("guid", "  ", |_| panic!("must not search for an empty principal"))
            .with("name", "jdoe", |_| Ok(Some(1)));
        assert_eq!(chain.resolve().unwrap(), Some(1));
    }

    #[test]
    fn test_total_miss_and_error() {
        let chain: ResolverChain<'_, u32, String> =
            ResolverChain::new().with("name", "jdoe", |_| Ok(None));
        assert_eq!(chain.resolve().unwrap(), None);

        let failing: ResolverChain<'_, u32, String> = ResolverChain::new()
            .with("broken", "jdoe", |_| Err("store down".to_string()))
            .with("never", "jdoe", |_| Ok(Some(1)));
        assert_eq!(failing.resolve(), Err("store down".to_string()));
    }
}
