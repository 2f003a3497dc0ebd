use std::collections::{BTreeMap, HashMap};

/// Source of user supplied initial values, looked up by parameter name.
///
/// Values are on the unconstrained scale.
pub trait InitContext {
    fn value(&self, name: &str) -> Option<f64>;
}

/// A context without any values. Every coordinate is initialized randomly.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyContext;

impl InitContext for EmptyContext {
    fn value(&self, _name: &str) -> Option<f64> {
        None
    }
}

impl InitContext for HashMap<String, f64> {
    fn value(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl InitContext for BTreeMap<String, f64> {
    fn value(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl<C: InitContext + ?Sized> InitContext for &C {
    fn value(&self, name: &str) -> Option<f64> {
        (**self).value(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lookup<C: InitContext + ?Sized>(context: &C) -> Vec<Option<f64>> {
        ["mu", "sigma"].iter().map(|name| context.value(name)).collect()
    }

    #[test]
    fn map_contexts() {
        let hash: HashMap<String, f64> = [("mu".to_string(), 1.5)].into_iter().collect();
        let tree: BTreeMap<String, f64> = [("sigma".to_string(), -0.5)].into_iter().collect();
        assert_eq!(lookup(&hash), vec![Some(1.5), None]);
        assert_eq!(lookup(&&tree), vec![None, Some(-0.5)]);
        assert_eq!(lookup(&EmptyContext), vec![None, None]);
    }
}
