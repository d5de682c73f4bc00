//! Strategy Registry
//!
//! Name -> constructor table for the built-in strategies. This is the
//! trust boundary: strategies are compiled-in implementations of the
//! `Strategy` trait, constructed by name, never loaded from external code.

use std::collections::HashMap;

use crate::domain::services::strategies::{Breakout, MaCrossover, Strategy};

type StrategyBuilder = fn() -> Box<dyn Strategy>;

pub struct StrategyRegistry {
    builders: HashMap<String, StrategyBuilder>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in strategies.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("ma_crossover", || Box::new(MaCrossover::new()));
        registry.register("breakout", || Box::new(Breakout::new()));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, builder: StrategyBuilder) {
        self.builders.insert(name.into(), builder);
    }

    /// Construct a fresh instance of the named strategy.
    pub fn build(&self, name: &str) -> Option<Box<dyn Strategy>> {
        self.builders.get(name).map(|builder| builder())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
