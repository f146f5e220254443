//! Attribution of combined-source lines to their modules

/// Maps every line of a combined program back to the module and line it
/// came from. Lines are 1-based on both sides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMap {
    modules: Vec<String>,
    /// `(module index, original line)` per combined line
    lines: Vec<(usize, u32)>,
}

impl LineMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `module`, registering it on first use
    pub(crate) fn module_index(&mut self, module: &str) -> usize {
        match self.modules.iter().position(|m| m == module) {
            Some(index) => index,
            None => {
                self.modules.push(module.to_string());
                self.modules.len() - 1
            }
        }
    }

    /// Append one combined line attributed to `original` in `module`
    pub(crate) fn push(&mut self, module: usize, original: u32) {
        self.lines.push((module, original));
    }

    /// Module and original line of combined line `line`
    pub fn resolve(&self, line: u32) -> Option<(&str, u32)> {
        let index = usize::try_from(line).ok()?.checked_sub(1)?;
        let (module, original) = self.lines.get(index)?;
        Some((self.modules.get(*module)?.as_str(), *original))
    }

    /// Number of combined lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Modules in the order they were first attributed a line
    pub fn modules(&self) -> &[String] {
        &self.modules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_lines_per_module() {
        let mut map = LineMap::new();
        let lib = map.module_index("lib.zym");
        map.push(lib, 1);
        map.push(lib, 2);
        let main = map.module_index("main.zym");
        map.push(main, 1);

        assert_eq!(map.resolve(2), Some(("lib.zym", 2)));
        assert_eq!(map.resolve(3), Some(("main.zym", 1)));
        assert_eq!(map.resolve(0), None);
        assert_eq!(map.resolve(4), None);
        assert_eq!(map.module_index("lib.zym"), lib);
        assert_eq!(map.len(), 3);
    }
}
