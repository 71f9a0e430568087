//! Strategy rule trait and registry.
//!
//! Rules hold the per-strategy decision logic. The worker drives them with
//! completed bars; rules act on the market only through the order factory
//! handed to them in the context, never by touching the broker directly.

use crate::domain::{Bar, TradeOrder, TradeStrategy};
use crate::error::EngineError;
use crate::factory::OrderFactory;
use crate::persistence::PositionOrders;
use std::collections::HashMap;

/// Everything a rule may inspect or act through during one bar cycle.
pub struct RuleContext<'a> {
    pub strategy: &'a TradeStrategy,
    pub position: &'a PositionOrders,
    pub factory: &'a OrderFactory,
}

/// Per-strategy decision logic, driven one completed bar at a time.
///
/// **Key invariants:**
/// - Rules submit orders only through `ctx.factory`
/// - `on_bar` runs with `new_bar == false` once at startup so the rule can
///   reconcile against whatever state it finds
pub trait StrategyRule: Send {
    /// React to the latest completed bar.
    ///
    /// `new_bar` is false on the forced startup cycle and when the wake was
    /// coalesced without a fresh bar.
    fn on_bar(
        &mut self,
        ctx: &RuleContext<'_>,
        bars: &[Bar],
        new_bar: bool,
    ) -> Result<(), EngineError>;

    /// Called once per order transitioning to filled.
    fn on_order_filled(
        &mut self,
        _ctx: &RuleContext<'_>,
        _order: &TradeOrder,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    /// Rule name (for logging and registry lookup).
    fn name(&self) -> &str;
}

/// Factory for creating rules by name.
///
/// Lets strategies reference their rule by the `rule_name` string stored in
/// the system of record.
pub struct RuleRegistry {
    constructors: HashMap<String, Box<dyn Fn() -> Box<dyn StrategyRule> + Send + Sync>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn StrategyRule> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn StrategyRule>> {
        self.constructors.get(name).map(|ctor| ctor())
    }

    pub fn list_rules(&self) -> Vec<&str> {
        self.constructors.keys().map(|s| s.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockRule {
        name: String,
    }

    impl StrategyRule for MockRule {
        fn on_bar(
            &mut self,
            _ctx: &RuleContext<'_>,
            _bars: &[Bar],
            _new_bar: bool,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn registry_register_and_create() {
        let mut registry = RuleRegistry::new();
        registry.register("mock", || {
            Box::new(MockRule {
                name: "mock".to_string(),
            })
        });

        let rule = registry.create("mock");
        assert!(rule.is_some());
        assert_eq!(rule.unwrap().name(), "mock");
    }

    #[test]
    fn registry_missing_rule() {
        let registry = RuleRegistry::new();
        assert!(registry.create("nonexistent").is_none());
        assert!(!registry.contains("nonexistent"));
    }

    #[test]
    fn registry_lists_registered_names() {
        let mut registry = RuleRegistry::new();
        registry.register("rule_a", || {
            Box::new(MockRule {
                name: "rule_a".to_string(),
            })
        });
        registry.register("rule_b", || {
            Box::new(MockRule {
                name: "rule_b".to_string(),
            })
        });

        let mut names = registry.list_rules();
        names.sort();
        assert_eq!(names, vec!["rule_a", "rule_b"]);
    }
}
