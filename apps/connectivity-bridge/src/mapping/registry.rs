use std::collections::HashMap;
use std::sync::Arc;

use connectivity_model::MappingContext;

use super::{DittoMapper, MappingError, MappingResult, PayloadMapper, RawMessageMapper};

/// Mapper used by routes that name no aliases.
pub const DEFAULT_ALIAS: &str = "Ditto";

#[derive(Clone, Copy)]
pub struct EngineEntry {
    pub alias: &'static str,
    /// Engines that need options are only reachable through a mapping context.
    pub requires_configuration: bool,
    pub construct: fn(&MappingContext) -> MappingResult<Arc<dyn PayloadMapper>>,
}

fn construct_ditto(_: &MappingContext) -> MappingResult<Arc<dyn PayloadMapper>> {
    Ok(Arc::new(DittoMapper))
}

fn construct_raw(context: &MappingContext) -> MappingResult<Arc<dyn PayloadMapper>> {
    Ok(Arc::new(RawMessageMapper::from_context(context)?))
}

static BUILTIN_ENGINES: &[EngineEntry] = &[
    EngineEntry {
        alias: "Ditto",
        requires_configuration: false,
        construct: construct_ditto,
    },
    EngineEntry {
        alias: "RawMessage",
        requires_configuration: true,
        construct: construct_raw,
    },
];

/// Engine alias → constructor.
#[derive(Clone, Default)]
pub struct MapperRegistry {
    engines: HashMap<&'static str, EngineEntry>,
}

impl MapperRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for entry in BUILTIN_ENGINES {
            registry.register(*entry);
        }
        registry
    }

    pub fn register(&mut self, entry: EngineEntry) {
        self.engines.insert(entry.alias, entry);
    }

    pub fn engine(&self, alias: &str) -> Option<&EngineEntry> {
        self.engines.get(alias)
    }

    pub fn aliases(&self) -> Vec<&'static str> {
        let mut aliases: Vec<_> = self.engines.keys().copied().collect();
        aliases.sort_unstable();
        aliases
    }

    /// Builds the mapper a mapping context describes.
    pub fn instantiate(&self, context: &MappingContext) -> MappingResult<Arc<dyn PayloadMapper>> {
        let entry = self
            .engine(&context.mapping_engine)
            .ok_or_else(|| MappingError::UnknownMapper(context.mapping_engine.clone()))?;
        (entry.construct)(context).map_err(|err| err.with_alias(&context.id))
    }

    /// Resolves a route alias: mapping context ids win over engine aliases.
    pub fn resolve(
        &self,
        alias: &str,
        contexts: &HashMap<String, Arc<dyn PayloadMapper>>,
    ) -> MappingResult<Arc<dyn PayloadMapper>> {
        if let Some(mapper) = contexts.get(alias) {
            return Ok(mapper.clone());
        }
        match self.engine(alias) {
            Some(entry) if !entry.requires_configuration => {
                (entry.construct)(&MappingContext::new(alias, alias))
            }
            _ => Err(MappingError::UnknownMapper(alias.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = MapperRegistry::with_builtins();
        assert_eq!(registry.aliases(), vec!["Ditto", "RawMessage"]);
        assert!(registry.resolve(DEFAULT_ALIAS, &HashMap::new()).is_ok());
    }

    #[test]
    fn configured_engines_need_a_context() {
        let registry = MapperRegistry::with_builtins();
        assert_eq!(
            registry.resolve("RawMessage", &HashMap::new()).err(),
            Some(MappingError::UnknownMapper("RawMessage".into()))
        );
        let ctx = MappingContext::new("sensor-raw", "RawMessage")
            .with_option("thingId", "ns:thing")
            .with_option("subject", "s");
        let mut contexts = HashMap::new();
        contexts.insert(ctx.id.clone(), registry.instantiate(&ctx).unwrap());
        assert!(registry.resolve("sensor-raw", &contexts).is_ok());
    }

    #[test]
    fn unknown_engine_is_reported() {
        let registry = MapperRegistry::with_builtins();
        let ctx = MappingContext::new("js", "JavaScript");
        assert_eq!(
            registry.instantiate(&ctx).err(),
            Some(MappingError::UnknownMapper("JavaScript".into()))
        );
    }
}
