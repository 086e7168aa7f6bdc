use crate::container::Provider;

use super::controller::ControllerId;

/// Declaration of a module: a named unit owning controllers and providers.
#[derive(Debug, Clone)]
pub struct ModuleOptions {
    pub(super) name: String,
    pub(super) imports: Vec<String>,
    pub(super) controllers: Vec<ControllerId>,
    pub(super) providers: Vec<Provider>,
    pub(super) exports: Vec<String>,
}

impl ModuleOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            imports: Vec::new(),
            controllers: Vec::new(),
            providers: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// Import an already-declared module by name.
    pub fn import(mut self, module: impl Into<String>) -> Self {
        self.imports.push(module.into());
        self
    }

    pub fn controller(mut self, id: ControllerId) -> Self {
        self.controllers.push(id);
        self
    }

    pub fn provider(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    /// Export a provider by name.
    pub fn export(mut self, provider: impl Into<String>) -> Self {
        self.exports.push(provider.into());
        self
    }
}

/// A validated module.
#[derive(Debug, Clone)]
pub struct Module {
    pub(super) name: String,
    pub(super) imports: Vec<String>,
    pub(super) controllers: Vec<ControllerId>,
    pub(super) providers: Vec<Provider>,
    pub(super) exports: Vec<String>,
}

impl Module {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    pub fn controllers(&self) -> &[ControllerId] {
        &self.controllers
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    pub(super) fn exports_provider(&self, name: &str) -> bool {
        self.exports.iter().any(|e| e == name)
    }
}

impl From<ModuleOptions> for Module {
    fn from(options: ModuleOptions) -> Self {
        Self {
            name: options.name,
            imports: options.imports,
            controllers: options.controllers,
            providers: options.providers,
            exports: options.exports,
        }
    }
}
