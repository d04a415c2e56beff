//! Region classification for an impending code modification.
//!
//! The entry handler runs the classifier against the live database before
//! the patch executes; the completion handler uses the recorded result to
//! decide which hashes to recompute.

/// Opaque, comparable key identifying a tracked module.
///
/// This is a non-owning lookup key into the module / kobj registries; the
/// referenced module's lifetime is managed externally and the key may stop
/// resolving (module unloaded) between classification and completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ModuleHandle(pub u64);

/// Where an in-flight code modification is landing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModState {
    /// No modification in flight.
    #[default]
    None,
    /// Target lies in the kernel core image's text range.
    CoreText,
    /// Target lies in a tracked module's text range.
    ModuleText(ModuleHandle),
    /// Target belongs to neither. Tracing facilities generate dynamic
    /// trampolines outside any tracked text region, so this is an expected
    /// outcome, not an anomaly.
    Unaffiliated,
}

impl ModState {
    /// Short name used in log messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::CoreText => "core_text",
            Self::ModuleText(_) => "module_text",
            Self::Unaffiliated => "unaffiliated",
        }
    }
}

/// Resolves a code address to the region that owns it.
///
/// Implemented by [`crate::db::HashDb`] over its own records; tests may
/// supply their own oracle.
pub trait AddressOracle {
    /// Whether `addr` lies in the kernel core image's text range.
    fn is_core_text(&self, addr: u64) -> bool;

    /// The tracked module whose text range contains `addr`, if any.
    fn resolve_module(&self, addr: u64) -> Option<ModuleHandle>;
}

/// Classify the target address of an impending modification.
///
/// Pure lookup, no side effects. Core text wins over a module match; an
/// address in neither is `Unaffiliated` and must not be treated as an error.
pub fn classify<O: AddressOracle + ?Sized>(oracle: &O, addr: u64) -> ModState {
    if oracle.is_core_text(addr) {
        ModState::CoreText
    } else if let Some(handle) = oracle.resolve_module(addr) {
        ModState::ModuleText(handle)
    } else {
        ModState::Unaffiliated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubOracle;

    impl AddressOracle for StubOracle {
        fn is_core_text(&self, addr: u64) -> bool {
            (0x1000..0x2000).contains(&addr)
        }

        fn resolve_module(&self, addr: u64) -> Option<ModuleHandle> {
            (0x8000..0x9000).contains(&addr).then_some(ModuleHandle(7))
        }
    }

    #[test]
    fn test_classify_three_categories() {
        assert_eq!(classify(&StubOracle, 0x1800), ModState::CoreText);
        assert_eq!(
            classify(&StubOracle, 0x8004),
            ModState::ModuleText(ModuleHandle(7))
        );
        assert_eq!(classify(&StubOracle, 0x4000), ModState::Unaffiliated);
    }

    #[test]
    fn test_classify_range_edges() {
        assert_eq!(classify(&StubOracle, 0x1000), ModState::CoreText);
        assert_eq!(classify(&StubOracle, 0x2000), ModState::Unaffiliated);
    }
}
