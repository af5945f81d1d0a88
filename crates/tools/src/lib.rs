//! Built-in tools for the stepwise agent runtime.

pub mod calculator;
pub mod clock;
pub mod echo;

pub use calculator::CalculatorTool;
pub use clock::ClockTool;
pub use echo::EchoTool;

use stepwise_core::ToolRegistry;

/// A registry preloaded with every built-in tool.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool));
    registry.register(Box::new(ClockTool));
    registry.register(Box::new(CalculatorTool));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_builtins() {
        let registry = default_registry();
        for name in ["echo", "clock", "calculator"] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
        assert_eq!(registry.len(), 3);
    }
}
