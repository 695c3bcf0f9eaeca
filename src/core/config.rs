/// Options controlling how the symbol resolver exposes runtime state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Expose the host configuration tree as `Configuration.<name>`.
    pub allow_configuration_access: bool,
}

impl ResolverOptions {
    pub fn with_configuration_access(mut self, allow: bool) -> Self {
        self.allow_configuration_access = allow;
        self
    }
}
