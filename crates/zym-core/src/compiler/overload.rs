//! Overload sets of top-level functions
//!
//! Functions are keyed by `(name, arity)`. A name with one arity is stored
//! under the bare name; with several, each overload is stored as
//! `name@arity` and a bare reference builds a dispatcher.

use std::collections::HashMap;
use std::rc::Rc;

use crate::object::{Qualifier, MAX_DISPATCH_CANDIDATES};

use super::error::CompileErrorKind;
use super::scope::mangle;

/// One declared overload
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub arity: usize,
    pub qualifiers: Rc<[Qualifier]>,
}

#[derive(Debug, Default)]
pub struct OverloadSets {
    sets: HashMap<String, Vec<Signature>>,
}

impl OverloadSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an overload found by the hoisting pass
    pub fn register(
        &mut self,
        name: &str,
        qualifiers: Vec<Qualifier>,
    ) -> Result<(), CompileErrorKind> {
        let arity = qualifiers.len();
        let set = self.sets.entry(name.to_string()).or_default();
        if set.iter().any(|s| s.arity == arity) {
            return Err(CompileErrorKind::DuplicateFunction {
                name: name.to_string(),
                arity,
            });
        }
        if set.len() >= MAX_DISPATCH_CANDIDATES {
            return Err(CompileErrorKind::TooManyOverloads(name.to_string()));
        }
        set.push(Signature {
            arity,
            qualifiers: qualifiers.into(),
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sets.contains_key(name)
    }

    pub fn is_overloaded(&self, name: &str) -> bool {
        self.sets.get(name).is_some_and(|set| set.len() > 1)
    }

    pub fn overloads(&self, name: &str) -> &[Signature] {
        self.sets.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn find(&self, name: &str, arity: usize) -> Option<&Signature> {
        self.sets.get(name)?.iter().find(|s| s.arity == arity)
    }

    /// Storage name of the `(name, arity)` overload
    pub fn symbol(&self, name: &str, arity: usize) -> String {
        if self.is_overloaded(name) {
            mangle(name, arity)
        } else {
            name.to_string()
        }
    }

    /// Storage names of every overload of `name`, in declaration order
    pub fn symbols(&self, name: &str) -> Vec<String> {
        self.overloads(name)
            .iter()
            .map(|s| self.symbol(name, s.arity))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_arity_keeps_bare_name() {
        let mut sets = OverloadSets::new();
        sets.register("add", vec![Qualifier::Normal; 2]).unwrap();
        assert!(!sets.is_overloaded("add"));
        assert_eq!(sets.symbol("add", 2), "add");
    }

    #[test]
    fn several_arities_are_mangled() {
        let mut sets = OverloadSets::new();
        sets.register("f", vec![Qualifier::Normal]).unwrap();
        sets.register("f", vec![Qualifier::Ref, Qualifier::Normal]).unwrap();
        assert!(sets.is_overloaded("f"));
        assert_eq!(sets.symbols("f"), vec!["f@1", "f@2"]);
        assert_eq!(
            sets.find("f", 2).unwrap().qualifiers.as_ref(),
            &[Qualifier::Ref, Qualifier::Normal]
        );
        assert!(sets.find("f", 3).is_none());
    }

    #[test]
    fn duplicate_arity_is_rejected() {
        let mut sets = OverloadSets::new();
        sets.register("g", Vec::new()).unwrap();
        assert_eq!(
            sets.register("g", Vec::new()),
            Err(CompileErrorKind::DuplicateFunction {
                name: "g".into(),
                arity: 0
            })
        );
    }

    #[test]
    fn overload_count_is_bounded() {
        let mut sets = OverloadSets::new();
        for arity in 0..MAX_DISPATCH_CANDIDATES {
            sets.register("h", vec![Qualifier::Normal; arity]).unwrap();
        }
        assert_eq!(
            sets.register("h", vec![Qualifier::Normal; 99]),
            Err(CompileErrorKind::TooManyOverloads("h".into()))
        );
    }
}
