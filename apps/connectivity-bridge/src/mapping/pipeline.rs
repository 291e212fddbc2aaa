use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use connectivity_model::{Adaptable, Connection, InternalMessage, MappingContext, PayloadMapping};
use crossbeam_channel::{Receiver, Sender};

use super::registry::DEFAULT_ALIAS;
use super::{MapperRegistry, MappingResult, PayloadMapper};

/// Bounds how many mapping operations of one connection run at once.
#[derive(Clone)]
pub struct MappingPermits {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl MappingPermits {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = crossbeam_channel::bounded(size);
        for _ in 0..size {
            let _ = tx.send(());
        }
        Self { tx, rx }
    }

    pub fn available(&self) -> usize {
        self.rx.len()
    }

    fn acquire(&self) -> Permit<'_> {
        let _ = self.rx.recv();
        Permit { tx: &self.tx }
    }
}

struct Permit<'a> {
    tx: &'a Sender<()>,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.tx.send(());
    }
}

/// The mappers of one route, applied in order to the same input.
#[derive(Clone)]
pub struct MappingPipeline {
    stages: Vec<(String, Arc<dyn PayloadMapper>)>,
    permits: MappingPermits,
}

impl fmt::Debug for MappingPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingPipeline")
            .field("aliases", &self.aliases())
            .finish()
    }
}

impl MappingPipeline {
    pub fn aliases(&self) -> Vec<&str> {
        self.stages.iter().map(|(alias, _)| alias.as_str()).collect()
    }

    pub fn to_adaptables(&self, message: &InternalMessage) -> MappingResult<Vec<Adaptable>> {
        let _permit = self.permits.acquire();
        let mut out = Vec::new();
        for (alias, mapper) in &self.stages {
            out.extend(mapper.map_inbound(message).map_err(|err| err.with_alias(alias))?);
        }
        Ok(out)
    }

    pub fn to_internal(&self, adaptable: &Adaptable) -> MappingResult<Vec<InternalMessage>> {
        let _permit = self.permits.acquire();
        let mut out = Vec::new();
        for (alias, mapper) in &self.stages {
            if let Some(message) = mapper
                .map_outbound(adaptable)
                .map_err(|err| err.with_alias(alias))?
            {
                out.push(message);
            }
        }
        Ok(out)
    }
}

/// Mapper instances of one connection plus the permits its routes share.
pub struct MappingProcessor {
    registry: Arc<MapperRegistry>,
    contexts: HashMap<String, Arc<dyn PayloadMapper>>,
    permits: MappingPermits,
}

impl MappingProcessor {
    /// Instantiates every mapping context and checks that each route's
    /// aliases resolve.
    pub fn build(
        registry: Arc<MapperRegistry>,
        connection: &Connection,
        mapping_contexts: &[MappingContext],
    ) -> MappingResult<Self> {
        let mut contexts = HashMap::new();
        for context in mapping_contexts {
            contexts.insert(context.id.clone(), registry.instantiate(context)?);
        }
        let processor = Self {
            registry,
            contexts,
            permits: MappingPermits::new(connection.processor_pool_size() as usize),
        };
        for source in connection.sources() {
            processor.pipeline_for(source.payload_mapping())?;
        }
        for target in connection.targets() {
            processor.pipeline_for(target.payload_mapping())?;
        }
        Ok(processor)
    }

    pub fn pipeline_for(&self, mapping: &PayloadMapping) -> MappingResult<MappingPipeline> {
        let aliases: Vec<&str> = if mapping.is_empty() {
            vec![DEFAULT_ALIAS]
        } else {
            mapping.aliases().iter().map(String::as_str).collect()
        };
        let stages = aliases
            .into_iter()
            .map(|alias| Ok((alias.to_string(), self.registry.resolve(alias, &self.contexts)?)))
            .collect::<MappingResult<Vec<_>>>()?;
        Ok(MappingPipeline {
            stages,
            permits: self.permits.clone(),
        })
    }
}
