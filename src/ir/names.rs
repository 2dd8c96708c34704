//! Fresh name generation
//!
//! One generator is built per compilation and threaded through lowering, so
//! two independent compilations of the same tree produce the same names.

use std::collections::HashMap;

use super::types::Label;

#[derive(Debug, Default)]
pub struct NameGen {
    counters: HashMap<String, usize>,
}

impl NameGen {
    pub fn new() -> Self {
        Self::default()
    }

    /// `base` followed by the next counter value for that base, from 1
    pub fn fresh(&mut self, base: &str) -> String {
        let counter = self.counters.entry(base.to_string()).or_insert(0);
        *counter += 1;
        format!("{}{}", base, counter)
    }

    pub fn label(&mut self, base: &str) -> Label {
        Label::new(self.fresh(base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_base() {
        let mut names = NameGen::new();
        assert_eq!(names.fresh("valname"), "valname1");
        assert_eq!(names.fresh("valname"), "valname2");
        assert_eq!(names.label("$then").to_string(), "$then1");
        assert_eq!(names.fresh("valname"), "valname3");
    }

    #[test]
    fn test_generators_are_independent() {
        let mut a = NameGen::new();
        let mut b = NameGen::new();
        a.fresh("lambda");
        assert_eq!(b.fresh("lambda"), "lambda1");
    }
}
